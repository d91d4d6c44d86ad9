use crate::collector::NodeInfo;
use crate::config::NodeCostOverride;
use crate::error::AppError;
use tracing::warn;

pub const COST_LABEL: &str = "cost";

#[derive(Debug, Clone, PartialEq)]
pub struct NodePricing {
    pub node: String,
    pub hourly_cost: f64,
    pub cores: f64,
}

impl NodePricing {
    pub fn price_per_core(&self) -> Result<f64, AppError> {
        if self.cores <= 0.0 || !self.cores.is_finite() {
            return Err(AppError::DivisionByZeroCapacity {
                node: self.node.clone(),
            });
        }
        Ok(self.hourly_cost / self.cores)
    }

    /// Per-core price, or zero when the node has no usable capacity.
    pub fn guarded_price_per_core(&self) -> f64 {
        match self.price_per_core() {
            Ok(price) => price,
            Err(e) => {
                warn!(node = %self.node, error = %e, "treating node as zero cost");
                0.0
            }
        }
    }
}

/// Hourly cost of a node: a configured override, else its `cost` label,
/// else one unit per allocatable core.
pub fn resolve_node_pricing(node: &NodeInfo, overrides: &[NodeCostOverride]) -> NodePricing {
    let cores = node.allocatable_cpu;

    if let Some(ov) = overrides.iter().find(|ov| ov.node == node.name) {
        return NodePricing {
            node: node.name.clone(),
            hourly_cost: ov.hourly_cost,
            cores,
        };
    }

    let hourly_cost = match node.labels.get(COST_LABEL).map(|raw| raw.trim()) {
        Some(raw) if !raw.is_empty() => match raw.parse::<f64>() {
            Ok(cost) if cost.is_finite() => cost,
            _ => {
                warn!(node = %node.name, label = raw, "unparsable cost label, pricing per core");
                cores
            }
        },
        _ => cores,
    };

    NodePricing {
        node: node.name.clone(),
        hourly_cost,
        cores,
    }
}

/// Parses a metrics-API CPU quantity into nanocores.
///
/// Accepts the `n`, `u` and `m` suffixes as well as bare core counts.
pub fn parse_nanocores(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let (digits, scale) = match raw.as_bytes().last()? {
        b'n' => (&raw[..raw.len() - 1], 1.0),
        b'u' => (&raw[..raw.len() - 1], 1_000.0),
        b'm' => (&raw[..raw.len() - 1], 1_000_000.0),
        _ => (raw, 1_000_000_000.0),
    };
    let value: f64 = digits.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value * scale)
}
