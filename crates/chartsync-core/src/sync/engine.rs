//! Sync engine: pushes pending records to the remote registry.
//!
//! Per-record serialization: at most one attempt may be in flight for a
//! given record id. The guard is RAII-released on every exit path,
//! including connector timeouts, so a stuck remote never blocks a later
//! retry. The database lock is not held across the remote call, so
//! unrelated records proceed while one submission waits.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::error::{RegistryError, RegistryResult};
use crate::models::{
    Actor, AuditAction, AuditDraft, EntityType, FieldChange, PatientRecord, SyncOutcome,
    SyncStatus,
};
use crate::sync::remote::RemoteRegistry;

/// Outcome of one sync invocation for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub record_id: String,
    pub patient_external_id: String,
    pub outcome: SyncOutcome,
    /// True when the record was already synced and nothing was attempted
    pub already_synced: bool,
}

/// Result of draining the pending queue. Partial failure is expected;
/// every record's outcome is independent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSyncSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub reports: Vec<SyncReport>,
}

/// Sync engine over a shared database handle and a registry connector.
pub struct SyncEngine {
    db: Arc<Mutex<Database>>,
    registry: Arc<dyn RemoteRegistry + Send + Sync>,
    in_flight: Mutex<HashSet<String>>,
}

impl SyncEngine {
    pub fn new(
        db: Arc<Mutex<Database>>,
        registry: Arc<dyn RemoteRegistry + Send + Sync>,
    ) -> Self {
        Self {
            db,
            registry,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Attempt to push one record to the registry.
    ///
    /// Success and failure are both committed together with exactly one
    /// audit entry in a single transaction. A record that is already
    /// synced is a no-op success: no remote call, no audit entry.
    pub fn sync_record(&self, record_id: &str, actor: &Actor) -> RegistryResult<SyncReport> {
        let _guard = self.claim(record_id)?;

        let record = {
            let db = self.db.lock()?;
            db.get_record(record_id)?
                .ok_or_else(|| RegistryError::NotFound(record_id.to_string()))?
        };

        if let Some(external_id) = &record.external_record_id {
            return Ok(SyncReport {
                record_id: record.id.clone(),
                patient_external_id: record.patient_external_id.clone(),
                outcome: SyncOutcome::Synced {
                    external_id: external_id.clone(),
                },
                already_synced: true,
            });
        }

        // Suspension point: the db lock is released while the connector
        // runs, so other records are not blocked.
        let result = self.registry.submit(&record);

        let mut db = self.db.lock()?;
        match result {
            Ok(external_id) => {
                let draft = success_draft(&record, &external_id, actor);
                db.record_sync_success(&record.id, &external_id, draft)?;
                tracing::info!(
                    record = %record.patient_external_id,
                    external_id = %external_id,
                    "Record synced to registry"
                );
                Ok(SyncReport {
                    record_id: record.id.clone(),
                    patient_external_id: record.patient_external_id.clone(),
                    outcome: SyncOutcome::Synced { external_id },
                    already_synced: false,
                })
            }
            Err(fault) => {
                let reason = fault.to_string();
                let draft = failure_draft(&record, &reason, actor);
                db.record_sync_failure(&record.id, draft)?;
                tracing::warn!(
                    record = %record.patient_external_id,
                    reason = %reason,
                    "Sync attempt failed"
                );
                Ok(SyncReport {
                    record_id: record.id.clone(),
                    patient_external_id: record.patient_external_id.clone(),
                    outcome: SyncOutcome::Error { reason },
                    already_synced: false,
                })
            }
        }
    }

    /// Drain the pending queue, attempting each record independently. A
    /// failed record never aborts the batch.
    pub fn sync_all_pending(&self, actor: &Actor) -> RegistryResult<BatchSyncSummary> {
        let pending_ids: Vec<String> = {
            let db = self.db.lock()?;
            db.list_pending_records()?
                .into_iter()
                .map(|r| r.id)
                .collect()
        };

        let mut summary = BatchSyncSummary::default();
        for id in pending_ids {
            let report = match self.sync_record(&id, actor) {
                Ok(report) => report,
                // Another caller is already pushing this record; its outcome
                // will be audited there.
                Err(RegistryError::SyncInFlight(_)) => continue,
                Err(e) => return Err(e),
            };

            summary.attempted += 1;
            if report.outcome.is_success() {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            summary.reports.push(report);
        }

        tracing::info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Pending queue drained"
        );
        Ok(summary)
    }

    /// Claim the per-record guard, failing fast when an attempt is already
    /// running for this id.
    fn claim(&self, record_id: &str) -> RegistryResult<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock()?;
        if !in_flight.insert(record_id.to_string()) {
            return Err(RegistryError::SyncInFlight(record_id.to_string()));
        }
        Ok(InFlightGuard {
            set: &self.in_flight,
            record_id: record_id.to_string(),
        })
    }
}

/// RAII release of the per-record guard.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    record_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = match self.set.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        set.remove(&self.record_id);
    }
}

fn success_draft(record: &PatientRecord, external_id: &str, actor: &Actor) -> AuditDraft {
    AuditDraft::new(
        actor.email.clone(),
        AuditAction::SyncPatient,
        EntityType::Patient,
        record.id.clone(),
        record.display_label(),
    )
    .with_change(
        "sync_status",
        FieldChange::changed(record.sync_status.as_str(), SyncStatus::Synced.as_str()),
    )
    .with_change("external_record_id", FieldChange::created(external_id))
    .with_request_context(actor.ip_address.clone(), actor.user_agent.clone())
}

fn failure_draft(record: &PatientRecord, reason: &str, actor: &Actor) -> AuditDraft {
    let mut draft = AuditDraft::new(
        actor.email.clone(),
        AuditAction::SyncPatient,
        EntityType::Patient,
        record.id.clone(),
        record.display_label(),
    )
    .with_change("sync_error", FieldChange::created(reason));

    // Only a real state change is recorded as one
    if record.sync_status != SyncStatus::Error {
        draft = draft.with_change(
            "sync_status",
            FieldChange::changed(record.sync_status.as_str(), SyncStatus::Error.as_str()),
        );
    }
    draft.with_request_context(actor.ip_address.clone(), actor.user_agent.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::sync::remote::{ScriptedRegistry, SyncFault};

    fn setup() -> (SyncEngine, Arc<Mutex<Database>>, Arc<ScriptedRegistry>) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let registry = Arc::new(ScriptedRegistry::new());
        let engine = SyncEngine::new(db.clone(), registry.clone());
        (engine, db, registry)
    }

    fn actor() -> Actor {
        Actor::new("researcher@clinic.com", Role::Researcher)
    }

    fn insert_record(db: &Arc<Mutex<Database>>, external_id: &str) -> PatientRecord {
        let record = PatientRecord::new(
            external_id.into(),
            "John".into(),
            "Doe".into(),
            "researcher@clinic.com".into(),
        );
        db.lock().unwrap().insert_record(&record).unwrap();
        record
    }

    #[test]
    fn test_successful_sync() {
        let (engine, db, _) = setup();
        let record = insert_record(&db, "PAT-100001-AAA");

        let report = engine.sync_record(&record.id, &actor()).unwrap();
        assert!(report.outcome.is_success());
        assert!(!report.already_synced);

        let db = db.lock().unwrap();
        let synced = db.get_record(&record.id).unwrap().unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert_eq!(synced.external_record_id, Some("REG-000001".into()));
        assert_eq!(db.count_audit_entries().unwrap(), 1);
    }

    #[test]
    fn test_failed_sync_records_reason() {
        let (engine, db, registry) = setup();
        let record = insert_record(&db, "PAT-100001-AAA");
        registry.fail_with("PAT-100001-AAA", SyncFault::Unreachable("dns".into()));

        let report = engine.sync_record(&record.id, &actor()).unwrap();
        assert_eq!(
            report.outcome,
            SyncOutcome::Error {
                reason: "unreachable: dns".into()
            }
        );

        let db = db.lock().unwrap();
        let errored = db.get_record(&record.id).unwrap().unwrap();
        assert_eq!(errored.sync_status, SyncStatus::Error);
        assert!(errored.external_record_id.is_none());

        let entries = db.query_audit(&Default::default()).unwrap();
        assert_eq!(entries.len(), 1);
        let change = entries[0].changes.get("sync_error").unwrap();
        assert_eq!(change.to, Some(serde_json::json!("unreachable: dns")));
    }

    #[test]
    fn test_sync_missing_record() {
        let (engine, _, _) = setup();
        let result = engine.sync_record("missing", &actor());
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_already_synced_is_noop() {
        let (engine, db, registry) = setup();
        let record = insert_record(&db, "PAT-100001-AAA");

        engine.sync_record(&record.id, &actor()).unwrap();
        assert_eq!(registry.submission_count(), 1);

        let report = engine.sync_record(&record.id, &actor()).unwrap();
        assert!(report.already_synced);
        assert_eq!(
            report.outcome,
            SyncOutcome::Synced {
                external_id: "REG-000001".into()
            }
        );

        // No second remote call, no second audit entry
        assert_eq!(registry.submission_count(), 1);
        assert_eq!(db.lock().unwrap().count_audit_entries().unwrap(), 1);
    }

    #[test]
    fn test_guard_released_after_fault() {
        let (engine, db, registry) = setup();
        let record = insert_record(&db, "PAT-100001-AAA");
        registry.fail_with("PAT-100001-AAA", SyncFault::Timeout);

        let report = engine.sync_record(&record.id, &actor()).unwrap();
        assert!(!report.outcome.is_success());

        // The guard must not linger after a timeout
        registry.clear_fault("PAT-100001-AAA");
        let report = engine.sync_record(&record.id, &actor()).unwrap();
        assert!(report.outcome.is_success());
    }

    #[test]
    fn test_bulk_sync_partial_failure() {
        let (engine, db, registry) = setup();
        for i in 1..=5 {
            insert_record(&db, &format!("PAT-10000{}-AAA", i));
        }
        registry.fail_with("PAT-100002-AAA", SyncFault::Timeout);
        registry.fail_with("PAT-100004-AAA", SyncFault::Rejected("bad field".into()));

        let summary = engine.sync_all_pending(&actor()).unwrap();
        assert_eq!(summary.attempted, 5);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.reports.len(), 5);

        let db = db.lock().unwrap();
        let counts = db.count_by_sync_status().unwrap();
        assert_eq!(counts.synced, 3);
        assert_eq!(counts.errors, 2);
        assert_eq!(counts.pending, 0);
        // One audit entry per attempt
        assert_eq!(db.count_audit_entries().unwrap(), 5);
    }

    #[test]
    fn test_bulk_sync_skips_synced_and_errored() {
        let (engine, db, registry) = setup();
        let r1 = insert_record(&db, "PAT-100001-AAA");
        let r2 = insert_record(&db, "PAT-100002-AAA");
        insert_record(&db, "PAT-100003-AAA");

        engine.sync_record(&r1.id, &actor()).unwrap();
        registry.fail_with("PAT-100002-AAA", SyncFault::Timeout);
        engine.sync_record(&r2.id, &actor()).unwrap();

        // Only the remaining pending record is attempted
        let summary = engine.sync_all_pending(&actor()).unwrap();
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.succeeded, 1);
    }

    #[test]
    fn test_retry_after_error_via_mark_pending() {
        let (engine, db, registry) = setup();
        let record = insert_record(&db, "PAT-100001-AAA");
        registry.fail_with("PAT-100001-AAA", SyncFault::Unreachable("offline".into()));
        engine.sync_record(&record.id, &actor()).unwrap();

        db.lock().unwrap().mark_record_pending(&record.id).unwrap();
        registry.clear_fault("PAT-100001-AAA");

        let summary = engine.sync_all_pending(&actor()).unwrap();
        assert_eq!(summary.succeeded, 1);

        let db = db.lock().unwrap();
        assert!(db.get_record(&record.id).unwrap().unwrap().is_synced());
        // Two attempts, two audit entries
        assert_eq!(db.count_audit_entries().unwrap(), 2);
    }
}
