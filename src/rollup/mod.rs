//! Multi-resolution cost rollups.
//!
//! A [`CostRecord`] keeps an hourly, daily, monthly and yearly history for one
//! resource. Every observation appends a raw sample to the hour tier, then
//! recomputes each tier's time-weighted total, rolls finished totals into the
//! next coarser tier and trims whatever has aged out.

pub mod average;
pub mod promote;
pub mod retention;

use crate::error::AppError;
use crate::models::{Identity, PerTier, Sample, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    identity: Identity,
    total: PerTier<Sample>,
    #[serde(rename = "historicData")]
    historic: PerTier<Vec<Sample>>,
}

impl CostRecord {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            total: PerTier::default(),
            historic: PerTier::default(),
        }
    }

    /// A fresh record whose history starts with `sample`.
    pub fn seeded(identity: Identity, sample: Sample, now: DateTime<Utc>) -> Result<Self, AppError> {
        let mut record = Self::new(identity);
        record.observe(sample, now)?;
        Ok(record)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn total(&self, tier: Tier) -> Sample {
        self.total[tier]
    }

    pub fn historic(&self, tier: Tier) -> &[Sample] {
        &self.historic[tier]
    }

    /// Appends `sample` to the hour tier and runs a full recompute cycle.
    /// A rejected sample leaves the record untouched.
    pub fn observe(&mut self, sample: Sample, now: DateTime<Utc>) -> Result<(), AppError> {
        validate(&sample)?;
        self.historic.hour.push(sample);
        self.recompute(now);
        Ok(())
    }

    /// Recomputes every tier total, promotes finished totals upward and
    /// prunes each history to its retention horizon.
    pub fn recompute(&mut self, now: DateTime<Utc>) {
        let now_ts = now.timestamp();

        for tier in Tier::ALL {
            let window_start = tier.window_start(now);
            self.total[tier] = average::average(
                &self.historic[tier],
                window_start.timestamp(),
                tier.window_seconds(now),
                now_ts,
            );

            let Some(coarser) = tier.coarser() else {
                continue;
            };
            let last_recorded = self.historic[coarser].last().map(|s| s.at);
            if promote::should_promote(last_recorded, window_start.timestamp()) {
                debug!(
                    name = %self.identity.name,
                    from = %tier,
                    to = %coarser,
                    "promoting total"
                );
                self.historic[coarser] = promote::promote(&self.historic[coarser], self.total[tier]);
            }
        }

        for tier in Tier::ALL {
            let horizon = tier.retention_horizon(now).timestamp();
            self.historic[tier] = retention::prune(&self.historic[tier], horizon);
        }
    }
}

fn validate(sample: &Sample) -> Result<(), AppError> {
    if sample.at < 0 {
        return Err(AppError::InvalidSample(format!(
            "negative timestamp {}",
            sample.at
        )));
    }
    if !sample.actual.is_finite() || !sample.requested.is_finite() {
        return Err(AppError::InvalidSample(format!(
            "non-finite cost at {} (actual {}, requested {})",
            sample.at, sample.actual, sample.requested
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn fixed_now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0)
            .single()
            .expect("valid fixed timestamp")
    }

    fn identity() -> Identity {
        Identity {
            name: "web".into(),
            namespace: "prod".into(),
        }
    }

    fn assert_retained(record: &CostRecord, now: DateTime<Utc>) {
        for tier in Tier::ALL {
            let horizon = tier.retention_horizon(now).timestamp();
            assert!(
                record.historic(tier).iter().all(|s| s.at > horizon),
                "{tier} history keeps samples at or before {horizon}"
            );
        }
    }

    #[test]
    fn hour_total_is_time_weighted() {
        let now = fixed_now();
        let t = now.timestamp();
        let mut record = CostRecord::new(identity());
        record.historic.hour = vec![Sample::new(10.0, 5.0, t - 1800)];

        record
            .observe(Sample::new(20.0, 10.0, t - 900), now)
            .expect("observe");

        let hour = record.total(Tier::Hour);
        assert!((hour.actual - 10.0).abs() < 1e-9);
        assert!((hour.requested - 5.0).abs() < 1e-9);
        assert_eq!(hour.at, t);
    }

    #[test]
    fn first_cycle_promotes_and_second_within_the_hour_does_not() {
        let now = fixed_now();
        let mut record = CostRecord::seeded(identity(), Sample::new(2.0, 4.0, now.timestamp()), now)
            .expect("seed record");
        assert_eq!(record.historic(Tier::Day).len(), 1);
        assert_eq!(record.historic(Tier::Day)[0], record.total(Tier::Hour));

        let later = now + Duration::minutes(10);
        record
            .observe(Sample::new(2.0, 4.0, later.timestamp()), later)
            .expect("second observe");
        assert_eq!(record.historic(Tier::Day).len(), 1);
        assert_eq!(record.historic(Tier::Month).len(), 1);
        assert_eq!(record.historic(Tier::Year).len(), 1);
    }

    #[test]
    fn promotes_again_once_an_hour_has_passed() {
        let now = fixed_now();
        let mut record = CostRecord::seeded(identity(), Sample::new(1.0, 1.0, now.timestamp()), now)
            .expect("seed record");

        let later = now + Duration::minutes(61);
        record
            .observe(Sample::new(1.0, 1.0, later.timestamp()), later)
            .expect("observe");
        let day = record.historic(Tier::Day);
        assert_eq!(day.len(), 2);
        assert_eq!(day[1].at, later.timestamp());
    }

    #[test]
    fn promotes_into_month_once_a_day_has_passed() {
        let now = fixed_now();
        let mut record = CostRecord::seeded(identity(), Sample::new(1.0, 1.0, now.timestamp()), now)
            .expect("seed record");
        assert_eq!(record.historic(Tier::Month).len(), 1);

        let next_day = now + Duration::hours(25);
        record
            .observe(Sample::new(2.0, 2.0, next_day.timestamp()), next_day)
            .expect("observe");
        let month = record.historic(Tier::Month);
        assert_eq!(month.len(), 2);
        assert_eq!(month[1], record.total(Tier::Day));
        assert_eq!(record.historic(Tier::Year).len(), 1);

        let later = next_day + Duration::minutes(10);
        record
            .observe(Sample::new(2.0, 2.0, later.timestamp()), later)
            .expect("observe");
        assert_eq!(record.historic(Tier::Month).len(), 2);
        assert_retained(&record, later);
    }

    #[test]
    fn sample_stamped_after_now_does_not_inflate_totals() {
        let now = fixed_now();
        let ahead = now + Duration::hours(2);
        let record = CostRecord::seeded(identity(), Sample::new(1.0, 1.0, ahead.timestamp()), now)
            .expect("seed record");

        for tier in Tier::ALL {
            let total = record.total(tier);
            assert!(total.actual <= 1.0 + 1e-9, "{tier} total {}", total.actual);
            assert!(total.requested <= 1.0 + 1e-9, "{tier} total {}", total.requested);
        }
        assert!((record.total(Tier::Hour).actual - 1.0).abs() < 1e-9);
    }

    #[test]
    fn month_totals_roll_into_year() {
        let now = fixed_now();
        let mut record = CostRecord::seeded(identity(), Sample::new(1.0, 1.0, now.timestamp()), now)
            .expect("seed record");
        assert_eq!(record.historic(Tier::Year).len(), 1);

        let next_month = now + Duration::days(32);
        record
            .observe(Sample::new(3.0, 3.0, next_month.timestamp()), next_month)
            .expect("observe");
        let year = record.historic(Tier::Year);
        assert_eq!(year.len(), 2);
        assert_eq!(year[1], record.total(Tier::Month));
        assert_retained(&record, next_month);
    }

    #[test]
    fn repeated_cycle_without_new_sample_keeps_totals() {
        let now = fixed_now();
        let mut record = CostRecord::new(identity());
        for minutes in [50, 35, 20, 5] {
            let at = now - Duration::minutes(minutes);
            record
                .observe(Sample::new(minutes as f64, 1.0, at.timestamp()), at)
                .expect("observe");
        }
        record.recompute(now);
        let first = record.clone();
        record.recompute(now);

        for tier in Tier::ALL {
            assert_eq!(first.total(tier), record.total(tier));
        }
        assert_eq!(first, record);
    }

    #[test]
    fn histories_stay_within_retention_over_many_cycles() {
        let start = fixed_now();
        let mut record = CostRecord::new(identity());
        for step in 0..200 {
            let now = start + Duration::hours(step * 7);
            record
                .observe(Sample::new(1.0, 2.0, now.timestamp()), now)
                .expect("observe");
            assert_retained(&record, now);
        }
        assert!(record.historic(Tier::Hour).len() <= 1);
        assert!(record.historic(Tier::Day).len() <= 4);
        assert!((record.total(Tier::Hour).actual - 1.0).abs() < 1e-9);
    }

    #[test]
    fn promoted_totals_have_already_been_computed() {
        let now = fixed_now();
        let record = CostRecord::seeded(identity(), Sample::new(6.0, 6.0, now.timestamp()), now)
            .expect("seed record");
        assert_eq!(record.historic(Tier::Day).last(), Some(&record.total(Tier::Hour)));
        assert_eq!(record.historic(Tier::Month).last(), Some(&record.total(Tier::Day)));
        assert_eq!(record.historic(Tier::Year).last(), Some(&record.total(Tier::Month)));
    }

    #[test]
    fn invalid_samples_leave_record_untouched() {
        let now = fixed_now();
        let mut record = CostRecord::seeded(identity(), Sample::new(1.0, 1.0, now.timestamp()), now)
            .expect("seed record");
        let before = record.clone();

        let err = record
            .observe(Sample::new(1.0, 1.0, -5), now)
            .expect_err("negative timestamp");
        assert!(matches!(err, AppError::InvalidSample(_)));

        let err = record
            .observe(Sample::new(f64::NAN, 1.0, now.timestamp()), now)
            .expect_err("nan cost");
        assert!(matches!(err, AppError::InvalidSample(_)));

        let err = record
            .observe(Sample::new(1.0, f64::INFINITY, now.timestamp()), now)
            .expect_err("infinite request");
        assert!(matches!(err, AppError::InvalidSample(_)));

        assert_eq!(record, before);
    }

    #[test]
    fn serializes_to_wire_shape() {
        let now = fixed_now();
        let record = CostRecord::seeded(identity(), Sample::new(1.0, 2.0, now.timestamp()), now)
            .expect("seed record");
        let json = serde_json::to_value(&record).expect("serialize");

        assert_eq!(json["identity"]["name"], "web");
        assert_eq!(json["identity"]["namespace"], "prod");
        for tier in ["hour", "day", "month", "year"] {
            assert!(json["total"][tier]["time"].is_i64());
            assert!(json["historicData"][tier].is_array());
        }
        assert_eq!(json["historicData"]["hour"][0]["request"], 2.0);

        let back: CostRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, record);
    }
}
