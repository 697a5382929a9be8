//! Patient record store operations.
//!
//! Composite `*_audited` methods commit the row change and its ledger entry
//! in one SQLite transaction: a crash leaves both or neither.

use rusqlite::{params, Connection, OptionalExtension};

use super::{audit, cache, map_constraint, Database, DbError, DbResult};
use crate::models::{AuditDraft, AuditEntry, PatientRecord, SyncOutcome, SyncStatus};

/// Sync state counts for the status panel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatusCounts {
    pub total: u64,
    pub pending: u64,
    pub synced: u64,
    pub errors: u64,
}

const RECORD_COLUMNS: &str = "id, patient_external_id, first_name, last_name, date_of_birth, \
     gender, diagnosis, treatment_plan, notes, sync_status, external_record_id, \
     created_by, created_at, updated_at";

impl Database {
    /// Insert a new record. Fails with `Constraint` when the business id is
    /// already taken.
    pub fn insert_record(&self, record: &PatientRecord) -> DbResult<()> {
        insert_record_tx(&self.conn, record)
    }

    /// Get a record by local id.
    pub fn get_record(&self, id: &str) -> DbResult<Option<PatientRecord>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM patient_records WHERE id = ?",
                    RECORD_COLUMNS
                ),
                [id],
                record_row,
            )
            .optional()?
            .map(RecordRow::try_into)
            .transpose()
    }

    /// List all records, newest first.
    pub fn list_records(&self) -> DbResult<Vec<PatientRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM patient_records ORDER BY created_at DESC, rowid DESC",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map([], record_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }

    /// List records awaiting sync, oldest first so the earliest entries
    /// drain first.
    pub fn list_pending_records(&self) -> DbResult<Vec<PatientRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM patient_records WHERE sync_status = 'pending' \
             ORDER BY created_at ASC, rowid ASC",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map([], record_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }

    /// Update a record's business fields in place.
    pub fn update_record(&self, record: &PatientRecord) -> DbResult<bool> {
        update_record_tx(&self.conn, record)
    }

    /// Apply a sync attempt outcome. Fails with `NotFound` when the id is
    /// absent and refuses to move a record that is already synced.
    pub fn apply_sync_outcome(&self, id: &str, outcome: &SyncOutcome) -> DbResult<()> {
        match outcome {
            SyncOutcome::Synced { external_id } => {
                apply_sync_outcome_tx(&self.conn, id, SyncStatus::Synced, Some(external_id))
            }
            SyncOutcome::Error { .. } => {
                apply_sync_outcome_tx(&self.conn, id, SyncStatus::Error, None)
            }
        }
    }

    /// Move an errored record back to pending (the retry edge).
    pub fn mark_record_pending(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE patient_records SET sync_status = 'pending', updated_at = ?2 \
             WHERE id = ?1 AND sync_status = 'error'",
            params![id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(rows_affected > 0)
    }

    /// Count records per sync state.
    pub fn count_by_sync_status(&self) -> DbResult<SyncStatusCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT sync_status, COUNT(*) FROM patient_records GROUP BY sync_status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;

        let mut counts = SyncStatusCounts::default();
        for row in rows {
            let (status, n) = row?;
            counts.total += n;
            match status.as_str() {
                "pending" => counts.pending = n,
                "synced" => counts.synced = n,
                "error" => counts.errors = n,
                _ => {}
            }
        }
        Ok(counts)
    }

    /// Insert a record together with its creation ledger entry; optionally
    /// capture it into the offline cache in the same transaction.
    pub fn insert_record_audited(
        &mut self,
        record: &PatientRecord,
        draft: AuditDraft,
        capture_offline: bool,
    ) -> DbResult<AuditEntry> {
        let tx = self.conn.transaction()?;
        insert_record_tx(&tx, record)?;
        let entry = audit::append_audit_tx(&tx, draft)?;
        if capture_offline {
            cache::capture_record_tx(&tx, record)?;
        }
        tx.commit()?;
        Ok(entry)
    }

    /// Update a record's business fields together with its ledger entry.
    pub fn update_record_audited(
        &mut self,
        record: &PatientRecord,
        draft: AuditDraft,
    ) -> DbResult<AuditEntry> {
        let tx = self.conn.transaction()?;
        if !update_record_tx(&tx, record)? {
            return Err(DbError::NotFound(record.id.clone()));
        }
        let entry = audit::append_audit_tx(&tx, draft)?;
        tx.commit()?;
        Ok(entry)
    }

    /// Commit a successful sync: status to synced, external id set, ledger
    /// entry appended, cache row purged.
    pub fn record_sync_success(
        &mut self,
        id: &str,
        external_id: &str,
        draft: AuditDraft,
    ) -> DbResult<AuditEntry> {
        let tx = self.conn.transaction()?;
        apply_sync_outcome_tx(&tx, id, SyncStatus::Synced, Some(external_id))?;
        let entry = audit::append_audit_tx(&tx, draft)?;
        cache::purge_cached_tx(&tx, id)?;
        tx.commit()?;
        Ok(entry)
    }

    /// Commit a failed sync: status to error, ledger entry appended, cache
    /// row (if any) marked error and retained for retry.
    pub fn record_sync_failure(&mut self, id: &str, draft: AuditDraft) -> DbResult<AuditEntry> {
        let tx = self.conn.transaction()?;
        apply_sync_outcome_tx(&tx, id, SyncStatus::Error, None)?;
        let entry = audit::append_audit_tx(&tx, draft)?;
        cache::mark_cached_status_tx(&tx, id, SyncStatus::Error)?;
        tx.commit()?;
        Ok(entry)
    }
}

pub(crate) fn insert_record_tx(conn: &Connection, record: &PatientRecord) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO patient_records (
            id, patient_external_id, first_name, last_name, date_of_birth,
            gender, diagnosis, treatment_plan, notes, sync_status,
            external_record_id, created_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
        params![
            record.id,
            record.patient_external_id,
            record.first_name,
            record.last_name,
            record.date_of_birth,
            record.gender,
            record.diagnosis,
            record.treatment_plan,
            record.notes,
            record.sync_status.as_str(),
            record.external_record_id,
            record.created_by,
            record.created_at,
            record.updated_at,
        ],
    )
    .map_err(|e| {
        map_constraint(
            e,
            &format!("patient id '{}' already exists", record.patient_external_id),
        )
    })?;
    Ok(())
}

pub(crate) fn update_record_tx(conn: &Connection, record: &PatientRecord) -> DbResult<bool> {
    let rows_affected = conn.execute(
        r#"
        UPDATE patient_records SET
            first_name = ?2,
            last_name = ?3,
            date_of_birth = ?4,
            gender = ?5,
            diagnosis = ?6,
            treatment_plan = ?7,
            notes = ?8,
            updated_at = ?9
        WHERE id = ?1
        "#,
        params![
            record.id,
            record.first_name,
            record.last_name,
            record.date_of_birth,
            record.gender,
            record.diagnosis,
            record.treatment_plan,
            record.notes,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(rows_affected > 0)
}

pub(crate) fn apply_sync_outcome_tx(
    conn: &Connection,
    id: &str,
    status: SyncStatus,
    external_id: Option<&str>,
) -> DbResult<()> {
    let current: Option<String> = conn
        .query_row(
            "SELECT sync_status FROM patient_records WHERE id = ?",
            [id],
            |row| row.get(0),
        )
        .optional()?;

    match current.as_deref() {
        None => return Err(DbError::NotFound(id.to_string())),
        Some("synced") => {
            return Err(DbError::Constraint(format!(
                "record {} already synced",
                id
            )))
        }
        Some(_) => {}
    }

    conn.execute(
        "UPDATE patient_records SET sync_status = ?2, external_record_id = ?3, updated_at = ?4 \
         WHERE id = ?1",
        params![
            id,
            status.as_str(),
            external_id,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Intermediate row struct for database mapping.
struct RecordRow {
    id: String,
    patient_external_id: String,
    first_name: String,
    last_name: String,
    date_of_birth: Option<String>,
    gender: Option<String>,
    diagnosis: Option<String>,
    treatment_plan: Option<String>,
    notes: Option<String>,
    sync_status: String,
    external_record_id: Option<String>,
    created_by: String,
    created_at: String,
    updated_at: String,
}

fn record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        patient_external_id: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        date_of_birth: row.get(4)?,
        gender: row.get(5)?,
        diagnosis: row.get(6)?,
        treatment_plan: row.get(7)?,
        notes: row.get(8)?,
        sync_status: row.get(9)?,
        external_record_id: row.get(10)?,
        created_by: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl TryFrom<RecordRow> for PatientRecord {
    type Error = DbError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let sync_status = SyncStatus::parse(&row.sync_status).ok_or_else(|| {
            DbError::Constraint(format!("Unknown sync status: {}", row.sync_status))
        })?;

        Ok(PatientRecord {
            id: row.id,
            patient_external_id: row.patient_external_id,
            first_name: row.first_name,
            last_name: row.last_name,
            date_of_birth: row.date_of_birth,
            gender: row.gender,
            diagnosis: row.diagnosis,
            treatment_plan: row.treatment_plan,
            notes: row.notes,
            sync_status,
            external_record_id: row.external_record_id,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditAction, EntityType};

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

    fn make_draft(record: &PatientRecord) -> AuditDraft {
        AuditDraft::new(
            "researcher@clinic.com",
            AuditAction::SyncPatient,
            EntityType::Patient,
            record.id.clone(),
            record.display_label(),
        )
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();

        let mut record = make_record("PAT-123456-ABC");
        record.diagnosis = Some("Hypertension".into());
        db.insert_record(&record).unwrap();

        let retrieved = db.get_record(&record.id).unwrap().unwrap();
        assert_eq!(retrieved.patient_external_id, "PAT-123456-ABC");
        assert_eq!(retrieved.diagnosis, Some("Hypertension".into()));
        assert_eq!(retrieved.sync_status, SyncStatus::Pending);
        assert!(retrieved.external_record_id.is_none());
    }

    #[test]
    fn test_duplicate_external_id_is_constraint() {
        let db = setup_db();

        db.insert_record(&make_record("PAT-123456-ABC")).unwrap();
        let result = db.insert_record(&make_record("PAT-123456-ABC"));
        assert!(matches!(result, Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_list_newest_first() {
        let db = setup_db();

        for i in 1..=3 {
            let mut record = make_record(&format!("PAT-10000{}-AAA", i));
            record.created_at = format!("2024-01-0{}T10:00:00+00:00", i);
            db.insert_record(&record).unwrap();
        }

        let records = db.list_records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].patient_external_id, "PAT-100003-AAA");
        assert_eq!(records[2].patient_external_id, "PAT-100001-AAA");
    }

    #[test]
    fn test_sync_outcome_transitions() {
        let db = setup_db();
        let record = make_record("PAT-123456-ABC");
        db.insert_record(&record).unwrap();

        db.apply_sync_outcome(
            &record.id,
            &SyncOutcome::Error {
                reason: "timeout".into(),
            },
        )
        .unwrap();
        let r = db.get_record(&record.id).unwrap().unwrap();
        assert_eq!(r.sync_status, SyncStatus::Error);
        assert!(r.external_record_id.is_none());

        db.apply_sync_outcome(
            &record.id,
            &SyncOutcome::Synced {
                external_id: "REG-000001".into(),
            },
        )
        .unwrap();
        let r = db.get_record(&record.id).unwrap().unwrap();
        assert_eq!(r.sync_status, SyncStatus::Synced);
        assert_eq!(r.external_record_id, Some("REG-000001".into()));

        // No transition away from synced
        let result = db.apply_sync_outcome(
            &record.id,
            &SyncOutcome::Error {
                reason: "late failure".into(),
            },
        );
        assert!(matches!(result, Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_sync_outcome_not_found() {
        let db = setup_db();
        let result = db.apply_sync_outcome(
            "missing-id",
            &SyncOutcome::Synced {
                external_id: "REG-000001".into(),
            },
        );
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_mark_pending_only_from_error() {
        let db = setup_db();
        let record = make_record("PAT-123456-ABC");
        db.insert_record(&record).unwrap();

        // Already pending: no-op
        assert!(!db.mark_record_pending(&record.id).unwrap());

        db.apply_sync_outcome(
            &record.id,
            &SyncOutcome::Error {
                reason: "unreachable".into(),
            },
        )
        .unwrap();
        assert!(db.mark_record_pending(&record.id).unwrap());

        let r = db.get_record(&record.id).unwrap().unwrap();
        assert_eq!(r.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_count_by_sync_status() {
        let db = setup_db();

        for i in 1..=4 {
            db.insert_record(&make_record(&format!("PAT-10000{}-AAA", i)))
                .unwrap();
        }
        let records = db.list_records().unwrap();
        db.apply_sync_outcome(
            &records[0].id,
            &SyncOutcome::Synced {
                external_id: "REG-000001".into(),
            },
        )
        .unwrap();
        db.apply_sync_outcome(
            &records[1].id,
            &SyncOutcome::Error {
                reason: "rejected".into(),
            },
        )
        .unwrap();

        let counts = db.count_by_sync_status().unwrap();
        assert_eq!(counts.total, 4);
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.synced, 1);
        assert_eq!(counts.errors, 1);
    }

    #[test]
    fn test_sync_success_commits_row_audit_and_purge_together() {
        let mut db = setup_db();
        let record = make_record("PAT-123456-ABC");
        db.insert_record(&record).unwrap();
        db.capture_record(&record).unwrap();

        let entry = db
            .record_sync_success(&record.id, "REG-000001", make_draft(&record))
            .unwrap();
        assert!(entry.id > 0);

        let r = db.get_record(&record.id).unwrap().unwrap();
        assert!(r.is_synced());
        assert!(db.get_cached_record(&record.id).unwrap().is_none());
        assert_eq!(db.count_audit_entries().unwrap(), 1);
    }

    #[test]
    fn test_sync_failure_keeps_cache_row() {
        let mut db = setup_db();
        let record = make_record("PAT-123456-ABC");
        db.insert_record(&record).unwrap();
        db.capture_record(&record).unwrap();

        db.record_sync_failure(&record.id, make_draft(&record))
            .unwrap();

        let cached = db.get_cached_record(&record.id).unwrap().unwrap();
        assert_eq!(cached.status, SyncStatus::Error);
        assert_eq!(db.count_audit_entries().unwrap(), 1);
    }

    #[test]
    fn test_failed_audited_insert_leaves_nothing() {
        let mut db = setup_db();
        let record = make_record("PAT-123456-ABC");
        db.insert_record(&record).unwrap();

        // Same business id again: transaction must roll back entirely
        let dup = make_record("PAT-123456-ABC");
        let draft = make_draft(&dup);
        let result = db.insert_record_audited(&dup, draft, true);
        assert!(matches!(result, Err(DbError::Constraint(_))));

        assert_eq!(db.count_audit_entries().unwrap(), 0);
        assert!(db.get_cached_record(&dup.id).unwrap().is_none());
    }
}
