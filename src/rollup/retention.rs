use crate::models::Sample;

/// Samples strictly newer than `horizon_start`, in their original order.
pub fn prune(historic: &[Sample], horizon_start: i64) -> Vec<Sample> {
    historic
        .iter()
        .filter(|s| s.at > horizon_start)
        .copied()
        .collect()
}
