//! Shared outbox store wrapper used by the engine and the CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Database, PendingScan, QueueCounts, RecordRepository, SqliteRecordRepository};
use crate::models::{FieldRecord, RecordId, RecordPayload};
use crate::Result;

/// Thread-safe handle over the durable field-record outbox.
#[derive(Clone)]
pub struct RecordStoreService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl RecordStoreService {
    /// Open the outbox at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh outbox is
    /// created in its place.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path) {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Outbox at {} is unreadable: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path)?
            }
            Err(error) => return Err(error),
        };

        tracing::debug!(path = %db_path.display(), "Opened outbox store");
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("database disk image is malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let timestamp = chrono::Utc::now().timestamp_millis();
        let backup_name = format!("{base_name}.corrupt-{timestamp}");

        if db_path.exists() {
            let backup_path = db_path.with_file_name(&backup_name);
            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved unreadable outbox from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        // WAL and shared-memory sidecars belong to the quarantined file
        for suffix in ["-wal", "-shm", "-journal"] {
            let sidecar = db_path.with_file_name(format!("{base_name}{suffix}"));
            if sidecar.exists() {
                let target = db_path.with_file_name(format!("{backup_name}{suffix}"));
                std::fs::rename(&sidecar, &target)?;
                tracing::warn!("Moved outbox sidecar {}", sidecar.display());
            }
        }

        Ok(())
    }

    async fn with_repo<T>(
        &self,
        op: impl FnOnce(&SqliteRecordRepository<'_>) -> Result<T>,
    ) -> Result<T> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        op(&repo)
    }

    /// Durably append a new record.
    pub async fn append(&self, payload: RecordPayload) -> Result<RecordId> {
        self.with_repo(|repo| repo.append(payload)).await
    }

    /// Fetch a record by id.
    pub async fn get(&self, id: &RecordId) -> Result<Option<FieldRecord>> {
        self.with_repo(|repo| repo.get(id)).await
    }

    /// Unsettled records oldest first, with any corrupt rows reported.
    pub async fn scan_pending(&self) -> Result<PendingScan> {
        self.with_repo(|repo| repo.scan_pending()).await
    }

    /// Unsettled records oldest first.
    pub async fn list_pending(&self) -> Result<Vec<FieldRecord>> {
        self.with_repo(|repo| repo.list_pending()).await
    }

    /// Mark a record as accepted; unknown ids are ignored.
    pub async fn mark_settled(&self, id: &RecordId) -> Result<()> {
        self.with_repo(|repo| repo.mark_settled(id)).await
    }

    /// Count a failed attempt and remember its message.
    pub async fn record_failure(&self, id: &RecordId, message: &str) -> Result<()> {
        self.with_repo(|repo| {
            repo.increment_attempts(id)?;
            repo.record_error(id, message)
        })
        .await
    }

    /// Count a failed attempt and take the record out of automatic drains.
    pub async fn hold(&self, id: &RecordId, reason: &str) -> Result<()> {
        self.with_repo(|repo| {
            repo.increment_attempts(id)?;
            repo.hold(id, reason)
        })
        .await
    }

    /// Return a held record to automatic drains.
    pub async fn requeue(&self, id: &RecordId) -> Result<()> {
        self.with_repo(|repo| repo.requeue(id)).await
    }

    /// Queue counters.
    pub async fn counts(&self) -> Result<QueueCounts> {
        self.with_repo(|repo| repo.counts()).await
    }

    /// Delete settled records.
    pub async fn purge_settled(&self) -> Result<usize> {
        self.with_repo(|repo| repo.purge_settled()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn in_memory_append_and_list_roundtrip() {
        let store = RecordStoreService::open_in_memory().await.unwrap();

        let id = store
            .append(RecordPayload::new("7", "shortness of breath"))
            .await
            .unwrap();
        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record_id, id);
        assert_eq!(pending[0].payload.chief_complaint, "shortness of breath");
    }

    #[tokio::test]
    async fn record_failure_counts_attempt_and_keeps_message() {
        let store = RecordStoreService::open_in_memory().await.unwrap();
        let id = store.append(RecordPayload::new("7", "fall")).await.unwrap();

        store.record_failure(&id, "timeout").await.unwrap();
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.attempts, 1);
        assert_eq!(record.last_error.as_deref(), Some("timeout"));
        assert!(!record.held);
    }

    #[tokio::test]
    async fn settle_count_and_purge_through_service() {
        let store = RecordStoreService::open_in_memory().await.unwrap();
        let r1 = store.append(RecordPayload::new("7", "one")).await.unwrap();
        let r2 = store.append(RecordPayload::new("7", "two")).await.unwrap();
        store.mark_settled(&r1).await.unwrap();

        let scan = store.scan_pending().await.unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].record_id, r2);
        assert!(scan.skipped.is_empty());
        assert_eq!(
            store.counts().await.unwrap(),
            QueueCounts {
                pending: 1,
                held: 0,
                settled: 1
            }
        );

        assert_eq!(store.purge_settled().await.unwrap(), 1);
        assert_eq!(store.counts().await.unwrap().settled, 0);
        assert_eq!(store.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pending_records_survive_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("outbox.db");

        let (r1, r2) = {
            let store = RecordStoreService::open_path(&path).await.unwrap();
            let r1 = store.append(RecordPayload::new("7", "one")).await.unwrap();
            let r2 = store.append(RecordPayload::new("7", "two")).await.unwrap();
            store.mark_settled(&r1).await.unwrap();
            (r1, r2)
        };

        let store = RecordStoreService::open_path(&path).await.unwrap();
        let pending: Vec<_> = store
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.record_id)
            .collect();
        assert_eq!(pending, vec![r2]);
        assert!(store.get(&r1).await.unwrap().unwrap().settled);
    }

    #[tokio::test]
    async fn unreadable_outbox_is_quarantined_on_open() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("outbox.db");
        std::fs::write(&path, "not sqlite ".repeat(200)).unwrap();

        let store = RecordStoreService::open_path(&path).await.unwrap();
        assert_eq!(store.counts().await.unwrap(), QueueCounts::default());

        let backups = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("outbox.db.corrupt-")
            })
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn detects_corrupted_db_errors() {
        assert!(RecordStoreService::is_corrupted_db_error(
            &crate::Error::Database("SQLite failure: file is not a database".to_string())
        ));
        assert!(!RecordStoreService::is_corrupted_db_error(
            &crate::Error::InvalidInput("record payload must name a destination room".to_string())
        ));
    }

    #[test]
    fn quarantine_moves_db_and_sidecars() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("outbox.db");
        let wal_path = tmp.path().join("outbox.db-wal");
        std::fs::write(&db_path, b"bad-db").unwrap();
        std::fs::write(&wal_path, b"wal").unwrap();

        RecordStoreService::quarantine_corrupted_db_files(&db_path).unwrap();

        assert!(!db_path.exists());
        assert!(!wal_path.exists());
        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|name| name.starts_with("outbox.db.corrupt-")));
    }
}
