use crate::error::AppError;
use crate::models::{Observation, ResourceKey, Sample, Tier};
use crate::rollup::CostRecord;
use crate::storage::RecordStore;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    Created,
    Updated,
}

#[derive(Debug)]
pub struct CycleOutcome {
    pub key: ResourceKey,
    pub result: Result<CycleStatus, AppError>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[CycleOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.result {
                Ok(CycleStatus::Created) => summary.created += 1,
                Ok(CycleStatus::Updated) => summary.updated += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }
}

pub struct RollupService {
    store: Arc<dyn RecordStore>,
    max_concurrency: usize,
}

impl RollupService {
    pub fn new(store: Arc<dyn RecordStore>, max_concurrency: usize) -> Self {
        Self {
            store,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Runs one recompute cycle per resource, at most `max_concurrency` at a
    /// time. Samples for the same resource are applied in one task, oldest
    /// first, so no two tasks ever write the same record.
    pub async fn run(&self, observations: Vec<Observation>, now: DateTime<Utc>) -> Vec<CycleOutcome> {
        let mut grouped: BTreeMap<ResourceKey, Vec<Sample>> = BTreeMap::new();
        for obs in observations {
            grouped.entry(obs.key).or_default().push(obs.sample);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut running = HashMap::new();
        let mut outcomes = Vec::with_capacity(grouped.len());

        for (key, mut samples) in grouped {
            samples.sort_by_key(|s| s.at);
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    outcomes.push(CycleOutcome {
                        key,
                        result: Err(AppError::Config(format!("worker pool closed: {e}"))),
                    });
                    continue;
                }
            };
            let store = Arc::clone(&self.store);
            let task_key = key.clone();
            let handle = tasks.spawn(async move {
                let _permit = permit;
                let result = run_cycle(store.as_ref(), &task_key, samples, now).await;
                CycleOutcome {
                    key: task_key,
                    result,
                }
            });
            running.insert(handle.id(), key);
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => match running.remove(&e.id()) {
                    Some(key) => CycleOutcome {
                        key,
                        result: Err(AppError::Join(e)),
                    },
                    None => {
                        warn!(error = %e, "rollup task aborted for an untracked resource");
                        continue;
                    }
                },
            };
            match &outcome.result {
                Ok(status) => debug!(key = %outcome.key, ?status, "cycle finished"),
                Err(e) => warn!(key = %outcome.key, error = %e, "cycle failed"),
            }
            outcomes.push(outcome);
        }

        outcomes.sort_by(|a, b| a.key.cmp(&b.key));
        let summary = RunSummary::from_outcomes(&outcomes);
        info!(
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed,
            "rollup run complete"
        );
        outcomes
    }
}

/// Fetch, observe every sample, then write back. Nothing is written unless
/// every sample was accepted.
async fn run_cycle(
    store: &dyn RecordStore,
    key: &ResourceKey,
    samples: Vec<Sample>,
    now: DateTime<Utc>,
) -> Result<CycleStatus, AppError> {
    match store.fetch(key).await? {
        Some(stored) => {
            if stored.record.identity() != &key.identity {
                return Err(AppError::UpstreamFetchFailure {
                    key: key.to_string(),
                    reason: "stored record belongs to another identity".into(),
                });
            }
            let mut record = stored.record;
            observe_all(&mut record, key, samples, now)?;
            store.replace(key, &record, stored.revision).await?;
            Ok(CycleStatus::Updated)
        }
        None => {
            let mut pending = samples.into_iter();
            let mut record = match pending.next() {
                Some(first) => CostRecord::seeded(key.identity.clone(), first, now)?,
                None => CostRecord::new(key.identity.clone()),
            };
            observe_all(&mut record, key, pending, now)?;
            store.create(key, &record).await?;
            Ok(CycleStatus::Created)
        }
    }
}

fn observe_all(
    record: &mut CostRecord,
    key: &ResourceKey,
    samples: impl IntoIterator<Item = Sample>,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    for sample in samples {
        record.observe(sample, now)?;
    }
    debug!(
        key = %key,
        hour = record.total(Tier::Hour).actual,
        day = record.total(Tier::Day).actual,
        hour_samples = record.historic(Tier::Hour).len(),
        "record recomputed"
    );
    Ok(())
}
