use crate::error::AppError;
use ::config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "cost-minion";
pub const ENV_PREFIX: &str = "COST_MINION";

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("COST_MINION_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "cminion", SERVICE_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".cost-minion"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upper bound on records processed at the same time.
    pub max_concurrency: usize,
    /// Pod label whose value groups pods into an app record.
    pub app_label: String,
    #[serde(default)]
    pub node_cost_overrides: Vec<NodeCostOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCostOverride {
    pub node: String,
    pub hourly_cost: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            app_label: "app".into(),
            node_cost_overrides: vec![],
        }
    }
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn data_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("data"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn db_path() -> Result<PathBuf, AppError> {
    Ok(data_dir()?.join("records.sqlite"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(data_dir()?)?;
    Ok(())
}

fn normalize_config(config: &mut AppConfig) -> bool {
    let mut changed = false;

    if config.max_concurrency == 0 {
        config.max_concurrency = 1;
        changed = true;
    }

    let label = config.app_label.trim();
    let label = if label.is_empty() { "app" } else { label };
    if label != config.app_label {
        config.app_label = label.to_string();
        changed = true;
    }

    // Later entries for the same node win.
    let mut overrides: Vec<NodeCostOverride> = Vec::new();
    for ov in std::mem::take(&mut config.node_cost_overrides) {
        let node = ov.node.trim().to_string();
        if node != ov.node {
            changed = true;
        }
        if let Some(pos) = overrides.iter().position(|o| o.node == node) {
            overrides.remove(pos);
            changed = true;
        }
        overrides.push(NodeCostOverride {
            node,
            hourly_cost: ov.hourly_cost,
        });
    }
    config.node_cost_overrides = overrides;

    changed
}

/// Defaults, then `config.toml`, then `COST_MINION_*` environment variables.
pub fn load_config() -> Result<AppConfig, AppError> {
    let path = config_path()?;
    let defaults = toml::to_string(&AppConfig::default())?;

    let settings = Config::builder()
        .add_source(File::from_str(&defaults, FileFormat::Toml))
        .add_source(File::from(path.as_path()).format(FileFormat::Toml).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut parsed: AppConfig = settings.try_deserialize()?;
    if normalize_config(&mut parsed) && path.exists() {
        save_config(&parsed)?;
    }
    Ok(parsed)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !Path::new(&cfg_path).exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}
