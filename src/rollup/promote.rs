use crate::models::Sample;

/// True when the coarser tier has not received a total since `boundary`.
///
/// `last_recorded_at` is the timestamp of the newest total already rolled
/// into the coarser tier; a tier that never received one always promotes.
pub fn should_promote(last_recorded_at: Option<i64>, boundary: i64) -> bool {
    match last_recorded_at {
        Some(at) => at < boundary,
        None => true,
    }
}

/// Copy of `coarser_historic` with `finer_total` appended.
pub fn promote(coarser_historic: &[Sample], finer_total: Sample) -> Vec<Sample> {
    let mut next = Vec::with_capacity(coarser_historic.len() + 1);
    next.extend_from_slice(coarser_historic);
    next.push(finer_total);
    next
}
