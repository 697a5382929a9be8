//! Offline cache database operations.
//!
//! A durable local queue holding records captured while the registry flow
//! is unreachable. Capture is idempotent: the same record id is updated in
//! place, never duplicated.

use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::models::{PatientRecord, SyncStatus};

/// A cached record with its queue metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    pub record: PatientRecord,
    pub status: SyncStatus,
    pub captured_at: String,
    pub updated_at: String,
}

impl Database {
    /// Capture a record into the offline queue (upsert by record id).
    pub fn capture_record(&self, record: &PatientRecord) -> DbResult<()> {
        capture_record_tx(&self.conn, record)
    }

    /// List captured records in capture order.
    pub fn list_captured_records(&self) -> DbResult<Vec<CachedRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT payload, status, captured_at, updated_at \
             FROM offline_cache ORDER BY captured_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], cached_row)?;

        let mut cached = Vec::new();
        for row in rows {
            cached.push(row?.try_into()?);
        }
        Ok(cached)
    }

    /// Get a single cached record.
    pub fn get_cached_record(&self, record_id: &str) -> DbResult<Option<CachedRecord>> {
        self.conn
            .query_row(
                "SELECT payload, status, captured_at, updated_at \
                 FROM offline_cache WHERE record_id = ?",
                [record_id],
                cached_row,
            )
            .optional()?
            .map(CachedRow::try_into)
            .transpose()
    }

    /// Update the queue status of a cached record.
    pub fn mark_cached_status(&self, record_id: &str, status: SyncStatus) -> DbResult<bool> {
        mark_cached_status_tx(&self.conn, record_id, status)
    }

    /// Remove a cached record once the upstream confirmed it.
    pub fn purge_cached(&self, record_id: &str) -> DbResult<bool> {
        purge_cached_tx(&self.conn, record_id)
    }
}

pub(crate) fn capture_record_tx(conn: &Connection, record: &PatientRecord) -> DbResult<()> {
    let payload = serde_json::to_string(record)?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        r#"
        INSERT INTO offline_cache (record_id, payload, status, captured_at, updated_at)
        VALUES (?1, ?2, 'pending', ?3, ?3)
        ON CONFLICT(record_id) DO UPDATE SET
            payload = excluded.payload,
            status = 'pending',
            updated_at = excluded.updated_at
        "#,
        params![record.id, payload, now],
    )?;
    Ok(())
}

pub(crate) fn mark_cached_status_tx(
    conn: &Connection,
    record_id: &str,
    status: SyncStatus,
) -> DbResult<bool> {
    let rows_affected = conn.execute(
        "UPDATE offline_cache SET status = ?2, updated_at = ?3 WHERE record_id = ?1",
        params![record_id, status.as_str(), chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(rows_affected > 0)
}

pub(crate) fn purge_cached_tx(conn: &Connection, record_id: &str) -> DbResult<bool> {
    let rows_affected =
        conn.execute("DELETE FROM offline_cache WHERE record_id = ?", [record_id])?;
    Ok(rows_affected > 0)
}

/// Intermediate row struct for database mapping.
struct CachedRow {
    payload: String,
    status: String,
    captured_at: String,
    updated_at: String,
}

fn cached_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedRow> {
    Ok(CachedRow {
        payload: row.get(0)?,
        status: row.get(1)?,
        captured_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

impl TryFrom<CachedRow> for CachedRecord {
    type Error = DbError;

    fn try_from(row: CachedRow) -> Result<Self, Self::Error> {
        let record: PatientRecord = serde_json::from_str(&row.payload)?;
        let status = SyncStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown cache status: {}", row.status)))?;

        Ok(CachedRecord {
            record,
            status,
            captured_at: row.captured_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn make_record(external_id: &str) -> PatientRecord {
        PatientRecord::new(
            external_id.into(),
            "John".into(),
            "Doe".into(),
            "researcher@clinic.com".into(),
        )
    }

    #[test]
    fn test_capture_and_list() {
        let db = setup_db();
        let r1 = make_record("PAT-100001-AAA");
        let r2 = make_record("PAT-100002-BBB");

        db.capture_record(&r1).unwrap();
        db.capture_record(&r2).unwrap();

        let captured = db.list_captured_records().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].record.id, r1.id);
        assert_eq!(captured[0].status, SyncStatus::Pending);
    }

    #[test]
    fn test_capture_is_idempotent() {
        let db = setup_db();
        let mut record = make_record("PAT-100001-AAA");

        db.capture_record(&record).unwrap();
        db.mark_cached_status(&record.id, SyncStatus::Error).unwrap();

        // Re-capturing the same id updates in place and resets to pending
        record.notes = Some("second attempt".into());
        db.capture_record(&record).unwrap();

        let captured = db.list_captured_records().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].status, SyncStatus::Pending);
        assert_eq!(captured[0].record.notes, Some("second attempt".into()));
    }

    #[test]
    fn test_purge() {
        let db = setup_db();
        let record = make_record("PAT-100001-AAA");
        db.capture_record(&record).unwrap();

        assert!(db.purge_cached(&record.id).unwrap());
        assert!(db.get_cached_record(&record.id).unwrap().is_none());
        assert!(!db.purge_cached(&record.id).unwrap());
    }

    #[test]
    fn test_mark_status_missing_row() {
        let db = setup_db();
        assert!(!db.mark_cached_status("missing", SyncStatus::Error).unwrap());
    }
}
