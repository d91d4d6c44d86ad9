//! Turns a cluster snapshot into per-pod, per-node and per-app samples.

use crate::config::NodeCostOverride;
use crate::error::AppError;
use crate::models::{Observation, ResourceKey, ResourceKind, Sample};
use crate::pricing::{parse_nanocores, resolve_node_pricing};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{debug, warn};

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-zA-Z0-9]+").expect("static pattern"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    #[serde(default)]
    pub pod_metrics: Vec<PodMetrics>,
    #[serde(default)]
    pub pods: Vec<PodInfo>,
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodMetrics {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub containers: Vec<ContainerMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetrics {
    pub name: String,
    pub usage: ContainerUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub cpu: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub node_name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub containers: Vec<ContainerRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRequest {
    pub name: String,
    #[serde(default)]
    pub requests_cpu_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    pub allocatable_cpu: f64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[async_trait]
pub trait SampleSource {
    fn name(&self) -> &'static str;

    async fn fetch_snapshot(&self) -> Result<ClusterSnapshot, AppError>;
}

/// Reads a snapshot previously exported to a JSON file.
pub struct SnapshotFile {
    pub path: PathBuf,
}

#[async_trait]
impl SampleSource for SnapshotFile {
    fn name(&self) -> &'static str {
        "snapshot-file"
    }

    async fn fetch_snapshot(&self) -> Result<ClusterSnapshot, AppError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Clone)]
pub struct CollectSettings {
    pub app_label: String,
    pub node_cost_overrides: Vec<NodeCostOverride>,
}

/// Lowercased label value with every run of non-alphanumerics replaced by `-`.
pub fn sanitize_app_name(raw: &str) -> String {
    NON_ALPHANUMERIC.replace_all(raw, "-").to_lowercase()
}

/// Prices every pod in `snapshot` and groups the costs per pod, node and app.
///
/// Pods without a spec or scheduled on an unknown node are skipped, as are
/// containers whose usage cannot be parsed.
pub fn collect_observations(
    snapshot: &ClusterSnapshot,
    settings: &CollectSettings,
    at: i64,
) -> Vec<Observation> {
    let prices: HashMap<&str, f64> = snapshot
        .nodes
        .iter()
        .map(|node| {
            let pricing = resolve_node_pricing(node, &settings.node_cost_overrides);
            (node.name.as_str(), pricing.guarded_price_per_core())
        })
        .collect();
    let specs: HashMap<(&str, &str), &PodInfo> = snapshot
        .pods
        .iter()
        .map(|p| ((p.namespace.as_str(), p.name.as_str()), p))
        .collect();

    let mut pods: BTreeMap<ResourceKey, (f64, f64)> = BTreeMap::new();
    let mut nodes: BTreeMap<ResourceKey, (f64, f64)> = BTreeMap::new();
    let mut apps: BTreeMap<ResourceKey, (f64, f64)> = BTreeMap::new();

    for metrics in &snapshot.pod_metrics {
        let Some(spec) = specs.get(&(metrics.namespace.as_str(), metrics.name.as_str())) else {
            warn!(pod = %metrics.name, namespace = %metrics.namespace, "no pod spec, skipping");
            continue;
        };
        let Some(price) = prices.get(spec.node_name.as_str()).copied() else {
            warn!(pod = %spec.name, node = %spec.node_name, "pod on unknown node, skipping");
            continue;
        };

        let mut nanocores = 0.0;
        for container in &metrics.containers {
            match parse_nanocores(&container.usage.cpu) {
                Some(value) => nanocores += value,
                None => warn!(
                    pod = %metrics.name,
                    container = %container.name,
                    cpu = %container.usage.cpu,
                    "unparsable cpu usage, skipping container"
                ),
            }
        }
        let requested_cores: f64 = spec
            .containers
            .iter()
            .map(|c| c.requests_cpu_millis as f64 / 1000.0)
            .sum();

        let actual = nanocores / 1_000_000_000.0 * price;
        let requested = requested_cores * price;

        accumulate(
            &mut pods,
            ResourceKey::new(ResourceKind::Pod, &spec.name, &spec.namespace),
            actual,
            requested,
        );
        accumulate(
            &mut nodes,
            ResourceKey::new(ResourceKind::Node, &spec.node_name, ""),
            actual,
            requested,
        );
        if let Some(app) = spec.labels.get(&settings.app_label).filter(|v| !v.is_empty()) {
            accumulate(
                &mut apps,
                ResourceKey::new(ResourceKind::App, sanitize_app_name(app), &spec.namespace),
                actual,
                requested,
            );
        }
    }

    debug!(
        pods = pods.len(),
        nodes = nodes.len(),
        apps = apps.len(),
        "collected observations"
    );

    pods.into_iter()
        .chain(nodes)
        .chain(apps)
        .map(|(key, (actual, requested))| Observation {
            key,
            sample: Sample::new(actual, requested, at),
        })
        .collect()
}

fn accumulate(
    totals: &mut BTreeMap<ResourceKey, (f64, f64)>,
    key: ResourceKey,
    actual: f64,
    requested: f64,
) {
    let entry = totals.entry(key).or_insert((0.0, 0.0));
    entry.0 += actual;
    entry.1 += requested;
}
