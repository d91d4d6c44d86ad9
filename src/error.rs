use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid sample: {0}")]
    InvalidSample(String),

    #[error("node '{node}' reports zero allocatable cores")]
    DivisionByZeroCapacity { node: String },

    #[error("failed to fetch record {key}: {reason}")]
    UpstreamFetchFailure { key: String, reason: String },

    #[error("failed to write record {key}: {reason}")]
    UpstreamWriteFailure { key: String, reason: String },

    #[error("record {key} changed since it was fetched (expected revision {expected})")]
    WriteConflict { key: String, expected: i64 },

    #[error("record store lock poisoned")]
    StorePoisoned,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error(transparent)]
    Settings(#[from] ::config::ConfigError),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}
