use crate::models::Sample;

/// Time-weighted average of `historic` over the window that opens at
/// `window_start` and spans `window_seconds`.
///
/// Each sample stands for the time elapsed since the previous qualifying
/// sample (the first one is measured from `window_start`). Samples at or
/// before `window_start` carry no weight, and time past `now` is never
/// counted. The result is stamped with `now`.
pub fn average(historic: &[Sample], window_start: i64, window_seconds: f64, now: i64) -> Sample {
    let mut total = Sample::new(0.0, 0.0, now);
    if window_seconds <= 0.0 {
        return total;
    }

    let mut cursor = window_start;
    for sample in historic.iter().filter(|s| s.at > window_start) {
        let at = sample.at.min(now);
        // Out-of-order input never produces negative weight.
        let elapsed = (at - cursor).max(0) as f64;
        cursor = cursor.max(at);

        let weight = elapsed / window_seconds;
        total.actual += sample.actual * weight;
        total.requested += sample.requested * weight;
    }
    total
}
