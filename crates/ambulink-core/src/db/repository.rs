//! Field record repository implementation

use crate::error::{Error, Result};
use crate::models::{FieldRecord, RecordId, RecordPayload};
use rusqlite::{params, Connection, OptionalExtension};

/// A stored row that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    /// Insertion sequence of the bad row
    pub seq: i64,
    /// Raw record id text as stored
    pub record_id: String,
    pub reason: String,
}

/// Pending records in FIFO order plus any rows that were skipped as corrupt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingScan {
    pub records: Vec<FieldRecord>,
    pub skipped: Vec<SkippedRecord>,
}

/// Row counts for the queue-status indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Unsettled records, including held ones
    pub pending: usize,
    /// Unsettled records waiting for operator action
    pub held: usize,
    pub settled: usize,
}

/// Trait for outbox storage operations
pub trait RecordRepository {
    /// Append a new record; returns its id
    fn append(&self, payload: RecordPayload) -> Result<RecordId>;

    /// Get a record by ID
    fn get(&self, id: &RecordId) -> Result<Option<FieldRecord>>;

    /// Unsettled records oldest first, corrupt rows skipped and reported
    fn scan_pending(&self) -> Result<PendingScan>;

    /// Unsettled records oldest first
    fn list_pending(&self) -> Result<Vec<FieldRecord>>;

    /// Mark a record as accepted by the endpoint; unknown ids are ignored
    fn mark_settled(&self, id: &RecordId) -> Result<()>;

    /// Count one more submission attempt
    fn increment_attempts(&self, id: &RecordId) -> Result<()>;

    /// Record the last failure message
    fn record_error(&self, id: &RecordId, message: &str) -> Result<()>;

    /// Exclude a permanently rejected record from automatic drains
    fn hold(&self, id: &RecordId, reason: &str) -> Result<()>;

    /// Return a held record to automatic drains
    fn requeue(&self, id: &RecordId) -> Result<()>;

    /// Queue counters
    fn counts(&self) -> Result<QueueCounts>;

    /// Delete settled records; unsettled rows are never touched
    fn purge_settled(&self) -> Result<usize>;
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

const RECORD_COLUMNS: &str =
    "seq, record_id, payload, captured_at, settled, attempts, held, last_error";

/// Row as stored, before the payload and id are decoded
struct RawRecord {
    seq: i64,
    record_id: String,
    payload: String,
    captured_at: i64,
    settled: bool,
    attempts: u32,
    held: bool,
    last_error: Option<String>,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
        Ok(RawRecord {
            seq: row.get(0)?,
            record_id: row.get(1)?,
            payload: row.get(2)?,
            captured_at: row.get(3)?,
            settled: row.get::<_, i32>(4)? != 0,
            attempts: row.get(5)?,
            held: row.get::<_, i32>(6)? != 0,
            last_error: row.get(7)?,
        })
    }

    fn decode(raw: RawRecord) -> std::result::Result<FieldRecord, SkippedRecord> {
        let skip = |reason: String| SkippedRecord {
            seq: raw.seq,
            record_id: raw.record_id.clone(),
            reason,
        };
        let record_id = raw
            .record_id
            .parse::<RecordId>()
            .map_err(|error| skip(format!("invalid record id: {error}")))?;
        let payload = serde_json::from_str::<RecordPayload>(&raw.payload)
            .map_err(|error| skip(format!("invalid payload: {error}")))?;

        Ok(FieldRecord {
            record_id,
            payload,
            captured_at: raw.captured_at,
            settled: raw.settled,
            attempts: raw.attempts,
            held: raw.held,
            last_error: raw.last_error,
        })
    }

    /// Column values of the wrong type make the whole row unreadable
    fn unreadable(row: &rusqlite::Row<'_>, error: &rusqlite::Error) -> SkippedRecord {
        SkippedRecord {
            seq: row.get(0).unwrap_or_default(),
            record_id: row.get(1).unwrap_or_default(),
            reason: format!("unreadable row: {error}"),
        }
    }

    fn update_pending(&self, sql: &str, id: &RecordId) -> Result<usize> {
        Ok(self.conn.execute(sql, params![id.as_str()])?)
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn append(&self, payload: RecordPayload) -> Result<RecordId> {
        if payload.room_id.is_empty() {
            return Err(Error::InvalidInput(
                "record payload must name a destination room".into(),
            ));
        }

        let record = FieldRecord::new(payload);
        let payload_json = serde_json::to_string(&record.payload)?;

        self.conn.execute(
            "INSERT INTO field_records (record_id, payload, captured_at) VALUES (?, ?, ?)",
            params![record.record_id.as_str(), payload_json, record.captured_at],
        )?;

        tracing::debug!(record_id = %record.record_id, "Appended field record");
        Ok(record.record_id)
    }

    fn get(&self, id: &RecordId) -> Result<Option<FieldRecord>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM field_records WHERE record_id = ?"),
                params![id.as_str()],
                Self::parse_raw,
            )
            .optional()?;

        raw.map(|raw| {
            Self::decode(raw).map_err(|skipped| Error::Database(skipped.reason))
        })
        .transpose()
    }

    fn scan_pending(&self) -> Result<PendingScan> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS}
             FROM field_records
             WHERE settled = 0
             ORDER BY seq ASC"
        ))?;

        let mut rows = stmt.query([])?;
        let mut scan = PendingScan::default();
        while let Some(row) = rows.next()? {
            let decoded = match Self::parse_raw(row) {
                Ok(raw) => Self::decode(raw),
                Err(error) => Err(Self::unreadable(row, &error)),
            };
            match decoded {
                Ok(record) => scan.records.push(record),
                Err(skipped) => scan.skipped.push(skipped),
            }
        }
        Ok(scan)
    }

    fn list_pending(&self) -> Result<Vec<FieldRecord>> {
        let scan = self.scan_pending()?;
        for skipped in &scan.skipped {
            tracing::warn!(
                seq = skipped.seq,
                record_id = %skipped.record_id,
                reason = %skipped.reason,
                "Skipping corrupt outbox record"
            );
        }
        Ok(scan.records)
    }

    fn mark_settled(&self, id: &RecordId) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let rows = self.conn.execute(
            "UPDATE field_records SET settled = 1, held = 0, settled_at = ? WHERE record_id = ? AND settled = 0",
            params![now, id.as_str()],
        )?;
        if rows == 0 {
            tracing::debug!(record_id = %id, "mark_settled ignored for unknown or settled record");
        }
        Ok(())
    }

    fn increment_attempts(&self, id: &RecordId) -> Result<()> {
        self.update_pending(
            "UPDATE field_records SET attempts = attempts + 1 WHERE record_id = ? AND settled = 0",
            id,
        )?;
        Ok(())
    }

    fn record_error(&self, id: &RecordId, message: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE field_records SET last_error = ? WHERE record_id = ? AND settled = 0",
            params![message, id.as_str()],
        )?;
        Ok(())
    }

    fn hold(&self, id: &RecordId, reason: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE field_records SET held = 1, last_error = ? WHERE record_id = ? AND settled = 0",
            params![reason, id.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn requeue(&self, id: &RecordId) -> Result<()> {
        let rows = self.update_pending(
            "UPDATE field_records SET held = 0 WHERE record_id = ? AND settled = 0",
            id,
        )?;
        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn counts(&self) -> Result<QueueCounts> {
        let (pending, held, settled) = self.conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN settled = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN settled = 0 AND held = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN settled = 1 THEN 1 ELSE 0 END), 0)
             FROM field_records",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
        )?;

        Ok(QueueCounts {
            pending: usize::try_from(pending).unwrap_or_default(),
            held: usize::try_from(held).unwrap_or_default(),
            settled: usize::try_from(settled).unwrap_or_default(),
        })
    }

    fn purge_settled(&self) -> Result<usize> {
        let rows = self
            .conn
            .execute("DELETE FROM field_records WHERE settled = 1", [])?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn payload(complaint: &str) -> RecordPayload {
        RecordPayload::new("7", complaint)
    }

    fn pending_ids(repo: &SqliteRecordRepository<'_>) -> Vec<RecordId> {
        repo.list_pending()
            .unwrap()
            .into_iter()
            .map(|record| record.record_id)
            .collect()
    }

    #[test]
    fn test_append_and_get() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let id = repo.append(payload("chest pain")).unwrap();
        let fetched = repo.get(&id).unwrap().unwrap();
        assert_eq!(fetched.record_id, id);
        assert_eq!(fetched.payload.chief_complaint, "chest pain");
        assert!(!fetched.settled);
        assert_eq!(fetched.attempts, 0);
    }

    #[test]
    fn test_append_requires_room() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let error = repo.append(RecordPayload::default()).unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[test]
    fn test_list_pending_is_fifo() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let r1 = repo.append(payload("one")).unwrap();
        let r2 = repo.append(payload("two")).unwrap();
        let r3 = repo.append(payload("three")).unwrap();

        assert_eq!(pending_ids(&repo), vec![r1, r2, r3]);
    }

    #[test]
    fn test_mark_settled_removes_from_pending() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let r1 = repo.append(payload("one")).unwrap();
        let r2 = repo.append(payload("two")).unwrap();
        repo.mark_settled(&r1).unwrap();

        assert_eq!(pending_ids(&repo), vec![r2]);
        assert!(repo.get(&r1).unwrap().unwrap().settled);
    }

    #[test]
    fn test_mark_settled_unknown_is_noop() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let r1 = repo.append(payload("one")).unwrap();
        repo.mark_settled(&RecordId::new()).unwrap();
        repo.mark_settled(&r1).unwrap();
        repo.mark_settled(&r1).unwrap();

        assert_eq!(repo.counts().unwrap().settled, 1);
    }

    #[test]
    fn test_increment_attempts() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let id = repo.append(payload("one")).unwrap();
        repo.increment_attempts(&id).unwrap();
        repo.increment_attempts(&id).unwrap();

        assert_eq!(repo.get(&id).unwrap().unwrap().attempts, 2);
    }

    #[test]
    fn test_corrupt_row_is_skipped_not_fatal() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let r1 = repo.append(payload("one")).unwrap();
        let r2 = repo.append(payload("two")).unwrap();
        let r3 = repo.append(payload("three")).unwrap();
        db.connection()
            .execute(
                "UPDATE field_records SET payload = '{broken' WHERE record_id = ?",
                params![r2.as_str()],
            )
            .unwrap();

        let scan = repo.scan_pending().unwrap();
        let ids: Vec<_> = scan.records.iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec![r1, r3]);
        assert_eq!(scan.skipped.len(), 1);
        assert_eq!(scan.skipped[0].record_id, r2.as_str());
        assert!(scan.skipped[0].reason.contains("invalid payload"));
    }

    #[test]
    fn test_row_with_bad_column_type_is_skipped() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let r1 = repo.append(payload("one")).unwrap();
        let r2 = repo.append(payload("two")).unwrap();
        let r3 = repo.append(payload("three")).unwrap();
        db.connection()
            .execute(
                "UPDATE field_records SET attempts = 'garbage' WHERE record_id = ?",
                params![r2.as_str()],
            )
            .unwrap();

        let scan = repo.scan_pending().unwrap();
        let ids: Vec<_> = scan.records.iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec![r1, r3]);
        assert_eq!(scan.skipped.len(), 1);
        assert_eq!(scan.skipped[0].record_id, r2.as_str());
        assert!(scan.skipped[0].reason.contains("unreadable row"));
        assert_eq!(pending_ids(&repo), vec![r1, r3]);
    }

    #[test]
    fn test_hold_and_requeue() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let id = repo.append(payload("one")).unwrap();
        repo.hold(&id, "missing vitals").unwrap();

        let held = repo.get(&id).unwrap().unwrap();
        assert!(held.held);
        assert!(held.is_pending());
        assert_eq!(held.last_error.as_deref(), Some("missing vitals"));
        assert_eq!(
            repo.counts().unwrap(),
            QueueCounts {
                pending: 1,
                held: 1,
                settled: 0
            }
        );

        repo.requeue(&id).unwrap();
        assert!(!repo.get(&id).unwrap().unwrap().held);
        assert!(matches!(
            repo.requeue(&RecordId::new()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_purge_settled_keeps_unsettled() {
        let db = setup();
        let repo = SqliteRecordRepository::new(db.connection());

        let r1 = repo.append(payload("one")).unwrap();
        let r2 = repo.append(payload("two")).unwrap();
        repo.mark_settled(&r1).unwrap();

        assert_eq!(repo.purge_settled().unwrap(), 1);
        assert!(repo.get(&r1).unwrap().is_none());
        assert_eq!(pending_ids(&repo), vec![r2]);
    }

    #[test]
    fn test_records_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("outbox.db");

        let id = {
            let db = Database::open(&path).unwrap();
            let repo = SqliteRecordRepository::new(db.connection());
            repo.append(payload("persisted")).unwrap()
        };

        let db = Database::open(&path).unwrap();
        let repo = SqliteRecordRepository::new(db.connection());
        assert_eq!(pending_ids(&repo), vec![id]);
    }
}
