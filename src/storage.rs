use crate::error::AppError;
use crate::models::{ResourceKey, ResourceKind};
use crate::rollup::CostRecord;
use async_trait::async_trait;
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A record as persisted, with the revision used for conditional writes.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record: CostRecord,
    pub revision: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedRecord {
    pub kind: ResourceKind,
    pub revision: i64,
    #[serde(flatten)]
    pub record: CostRecord,
}

/// Where finished records are fetched from and written back to.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch(&self, key: &ResourceKey) -> Result<Option<StoredRecord>, AppError>;

    /// Inserts a record that must not exist yet. Returns its revision.
    async fn create(&self, key: &ResourceKey, record: &CostRecord) -> Result<i64, AppError>;

    /// Overwrites a record only if it is still at `expected_revision`.
    async fn replace(
        &self,
        key: &ResourceKey,
        record: &CostRecord,
        expected_revision: i64,
    ) -> Result<i64, AppError>;
}

pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let conn = Connection::open(path)?;
        let this = Self { conn };
        this.init()?;
        Ok(this)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        let this = Self { conn };
        this.init()?;
        Ok(this)
    }

    fn init(&self) -> Result<(), AppError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cost_records (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                revision INTEGER NOT NULL,
                body TEXT NOT NULL,
                UNIQUE (kind, namespace, name)
            );
            "#,
        )?;
        Ok(())
    }

    pub fn fetch(&self, key: &ResourceKey) -> Result<Option<StoredRecord>, AppError> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT body, revision FROM cost_records WHERE kind = ? AND namespace = ? AND name = ?",
                params![
                    key.kind.as_label(),
                    key.identity.namespace,
                    key.identity.name
                ],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        match row {
            Some((body, revision)) => Ok(Some(StoredRecord {
                record: serde_json::from_str(&body)?,
                revision,
            })),
            None => Ok(None),
        }
    }

    pub fn create(&self, key: &ResourceKey, record: &CostRecord) -> Result<i64, AppError> {
        let body = serde_json::to_string(record)?;
        let inserted = self.conn.execute(
            "INSERT INTO cost_records (kind, namespace, name, revision, body)
             VALUES (?, ?, ?, 1, ?)
             ON CONFLICT (kind, namespace, name) DO NOTHING",
            params![
                key.kind.as_label(),
                key.identity.namespace,
                key.identity.name,
                body
            ],
        )?;
        if inserted == 0 {
            return Err(AppError::WriteConflict {
                key: key.to_string(),
                expected: 0,
            });
        }
        Ok(1)
    }

    pub fn replace(
        &self,
        key: &ResourceKey,
        record: &CostRecord,
        expected_revision: i64,
    ) -> Result<i64, AppError> {
        let body = serde_json::to_string(record)?;
        let updated = self.conn.execute(
            "UPDATE cost_records SET body = ?, revision = revision + 1
             WHERE kind = ? AND namespace = ? AND name = ? AND revision = ?",
            params![
                body,
                key.kind.as_label(),
                key.identity.namespace,
                key.identity.name,
                expected_revision
            ],
        )?;
        if updated == 0 {
            return Err(AppError::WriteConflict {
                key: key.to_string(),
                expected: expected_revision,
            });
        }
        Ok(expected_revision + 1)
    }

    pub fn list(&self, kind: Option<ResourceKind>) -> Result<Vec<ExportedRecord>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, revision, body FROM cost_records
             WHERE ?1 IS NULL OR kind = ?1
             ORDER BY kind, namespace, name",
        )?;

        let rows = stmt
            .query_map([kind.map(ResourceKind::as_label)], |r| {
                let raw_kind: String = r.get(0)?;
                let kind = ResourceKind::parse(&raw_kind).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        Type::Text,
                        format!("unknown resource kind '{raw_kind}'").into(),
                    )
                })?;
                let body: String = r.get(2)?;
                let record = serde_json::from_str(&body).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
                })?;
                Ok(ExportedRecord {
                    kind,
                    revision: r.get(1)?,
                    record,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn export_json(&self, kind: Option<ResourceKind>) -> Result<String, AppError> {
        Ok(serde_json::to_string_pretty(&self.list(kind)?)?)
    }
}

/// [`Storage`] shared between concurrent cycles. The connection is used by
/// one cycle at a time, always on the blocking pool.
pub struct SharedStorage {
    inner: Arc<Mutex<Storage>>,
}

impl SharedStorage {
    pub fn new(storage: Storage) -> Self {
        Self {
            inner: Arc::new(Mutex::new(storage)),
        }
    }

    async fn with_storage<T, F>(&self, op: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Storage) -> Result<T, AppError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let storage = inner.lock().map_err(|_| AppError::StorePoisoned)?;
            op(&storage)
        })
        .await?
    }
}

fn fetch_failure(key: &ResourceKey, err: AppError) -> AppError {
    AppError::UpstreamFetchFailure {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

fn write_failure(key: &ResourceKey, err: AppError) -> AppError {
    match err {
        AppError::WriteConflict { .. } => err,
        other => AppError::UpstreamWriteFailure {
            key: key.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl RecordStore for SharedStorage {
    async fn fetch(&self, key: &ResourceKey) -> Result<Option<StoredRecord>, AppError> {
        let owned = key.clone();
        self.with_storage(move |storage| storage.fetch(&owned))
            .await
            .map_err(|e| fetch_failure(key, e))
    }

    async fn create(&self, key: &ResourceKey, record: &CostRecord) -> Result<i64, AppError> {
        let (owned, record) = (key.clone(), record.clone());
        self.with_storage(move |storage| storage.create(&owned, &record))
            .await
            .map_err(|e| write_failure(key, e))
    }

    async fn replace(
        &self,
        key: &ResourceKey,
        record: &CostRecord,
        expected_revision: i64,
    ) -> Result<i64, AppError> {
        let (owned, record) = (key.clone(), record.clone());
        self.with_storage(move |storage| storage.replace(&owned, &record, expected_revision))
            .await
            .map_err(|e| write_failure(key, e))
    }
}
