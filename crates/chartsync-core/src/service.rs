//! The operation surface consumed by UI/API layers.
//!
//! Owns the shared database handle, the sync engine and the connectivity
//! monitor. Role checks happen here, at the boundary; the layers below
//! trust their callers.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::db::{
    AuditFilter, AuditStats, ChainVerification, CachedRecord, Database, DbError, SyncStatusCounts,
};
use crate::error::{RegistryError, RegistryResult};
use crate::models::{
    has_role, Actor, AuditAction, AuditDraft, AuditEntry, EntityType, FieldChange, NewPatientRecord,
    NewUser, PatientRecord, PatientRecordUpdate, Role, User,
};
use crate::sync::{
    BatchSyncSummary, ConnectivityMonitor, RemoteRegistry, SyncEngine, SyncReport, Transition,
};
use crate::validate;

/// Service facade over the record store, sync engine, audit ledger and
/// connectivity monitor.
pub struct RegistryService {
    db: Arc<Mutex<Database>>,
    engine: SyncEngine,
    monitor: ConnectivityMonitor,
}

impl RegistryService {
    /// Open or create the backing database at the given path.
    pub fn open<P: AsRef<Path>>(
        path: P,
        registry: Arc<dyn RemoteRegistry + Send + Sync>,
    ) -> RegistryResult<Self> {
        let db = Arc::new(Mutex::new(Database::open(path)?));
        Ok(Self::with_database(db, registry))
    }

    /// In-memory service (for testing).
    pub fn open_in_memory(
        registry: Arc<dyn RemoteRegistry + Send + Sync>,
    ) -> RegistryResult<Self> {
        let db = Arc::new(Mutex::new(Database::open_in_memory()?));
        Ok(Self::with_database(db, registry))
    }

    /// Build the service around an existing shared database handle.
    pub fn with_database(
        db: Arc<Mutex<Database>>,
        registry: Arc<dyn RemoteRegistry + Send + Sync>,
    ) -> Self {
        let engine = SyncEngine::new(db.clone(), registry);
        Self {
            db,
            engine,
            monitor: ConnectivityMonitor::default(),
        }
    }

    /// Shared database handle, for wiring collaborators (e.g. the auth
    /// service) onto the same store.
    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }

    // =========================================================================
    // Patient Records
    // =========================================================================

    /// Create a patient record. New records start pending with no external
    /// id; while offline the record is additionally captured into the
    /// offline cache. Rejected input leaves no trace.
    pub fn create_patient_record(
        &self,
        input: NewPatientRecord,
        actor: &Actor,
    ) -> RegistryResult<PatientRecord> {
        validate::validate_new_record(&input)?;

        let mut record = PatientRecord::new(
            input.patient_external_id,
            input.first_name,
            input.last_name,
            actor.email.clone(),
        );
        record.date_of_birth = input.date_of_birth;
        record.gender = input.gender;
        record.diagnosis = input.diagnosis;
        record.treatment_plan = input.treatment_plan;
        record.notes = input.notes;

        let draft = creation_draft(&record, actor);
        let capture_offline = !self.monitor.is_online();

        let mut db = self.db.lock()?;
        db.insert_record_audited(&record, draft, capture_offline)
            .map_err(|e| match e {
                DbError::Constraint(msg) => RegistryError::DuplicateKey(msg),
                other => other.into(),
            })?;
        Ok(record)
    }

    /// Update a record's business fields. Only fields that actually change
    /// are written to the ledger; an empty diff appends nothing.
    pub fn update_patient_record(
        &self,
        record_id: &str,
        update: PatientRecordUpdate,
        actor: &Actor,
    ) -> RegistryResult<PatientRecord> {
        if let Some(first_name) = &update.first_name {
            if first_name.trim().is_empty() {
                return Err(RegistryError::Validation("first name is required".into()));
            }
        }
        if let Some(last_name) = &update.last_name {
            if last_name.trim().is_empty() {
                return Err(RegistryError::Validation("last name is required".into()));
            }
        }
        if let Some(dob) = &update.date_of_birth {
            validate::validate_date_of_birth(dob)?;
        }

        let current = self
            .get_patient_record(record_id)?
            .ok_or_else(|| RegistryError::NotFound(record_id.to_string()))?;

        let (updated, changes) = apply_update(&current, update);
        if changes.is_empty() {
            return Ok(current);
        }

        let mut draft = AuditDraft::new(
            actor.email.clone(),
            AuditAction::UpdatePatient,
            EntityType::Patient,
            updated.id.clone(),
            updated.display_label(),
        )
        .with_request_context(actor.ip_address.clone(), actor.user_agent.clone());
        draft.changes = changes;

        let mut db = self.db.lock()?;
        db.update_record_audited(&updated, draft)?;
        Ok(updated)
    }

    /// Get a record by local id.
    pub fn get_patient_record(&self, record_id: &str) -> RegistryResult<Option<PatientRecord>> {
        let db = self.db.lock()?;
        Ok(db.get_record(record_id)?)
    }

    /// List all records, newest first.
    pub fn list_patient_records(&self) -> RegistryResult<Vec<PatientRecord>> {
        let db = self.db.lock()?;
        Ok(db.list_records()?)
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Push one record to the registry ("Sync Now"). Works on pending and
    /// errored records; already-synced records are a no-op.
    pub fn sync_patient_record(
        &self,
        record_id: &str,
        actor: &Actor,
    ) -> RegistryResult<SyncReport> {
        self.engine.sync_record(record_id, actor)
    }

    /// Drain the pending queue. Typically invoked after
    /// [`Transition::CameOnline`].
    pub fn sync_all_pending(&self, actor: &Actor) -> RegistryResult<BatchSyncSummary> {
        self.engine.sync_all_pending(actor)
    }

    /// Record counts per sync state, for the status panel.
    pub fn sync_stats(&self) -> RegistryResult<SyncStatusCounts> {
        let db = self.db.lock()?;
        Ok(db.count_by_sync_status()?)
    }

    /// Records currently held in the offline cache.
    pub fn offline_queue(&self) -> RegistryResult<Vec<CachedRecord>> {
        let db = self.db.lock()?;
        Ok(db.list_captured_records()?)
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Feed an environment connectivity signal. The caller reacts to
    /// `CameOnline` by invoking [`Self::sync_all_pending`]; the service
    /// never retries on its own.
    pub fn notify_connectivity(&self, online: bool) -> Option<Transition> {
        self.monitor.set_online(online)
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    // =========================================================================
    // Audit Ledger
    // =========================================================================

    /// Query the ledger, newest first.
    pub fn query_audit_log(&self, filter: &AuditFilter) -> RegistryResult<Vec<AuditEntry>> {
        let db = self.db.lock()?;
        Ok(db.query_audit(filter)?)
    }

    /// Aggregate ledger counts relative to the current time.
    pub fn audit_stats(&self) -> RegistryResult<AuditStats> {
        let db = self.db.lock()?;
        Ok(db.audit_stats(Utc::now())?)
    }

    /// Recompute the ledger hash chain.
    pub fn verify_audit_trail(&self) -> RegistryResult<ChainVerification> {
        let db = self.db.lock()?;
        Ok(db.verify_audit_chain()?)
    }

    // =========================================================================
    // User Administration
    // =========================================================================

    /// Create a user account. Administrator-only.
    pub fn create_user(&self, input: NewUser, actor: &Actor) -> RegistryResult<User> {
        self.require_administrator(actor)?;
        validate::validate_email(&input.email)?;

        let user = User::new(input.email, input.password_hash, input.role);
        let draft = AuditDraft::new(
            actor.email.clone(),
            AuditAction::CreateUser,
            EntityType::User,
            user.id.clone(),
            user.email.clone(),
        )
        .with_change("email", FieldChange::created(user.email.as_str()))
        .with_change("role", FieldChange::created(user.role.as_str()))
        .with_request_context(actor.ip_address.clone(), actor.user_agent.clone());

        let mut db = self.db.lock()?;
        db.insert_user_audited(&user, draft).map_err(|e| match e {
            DbError::Constraint(msg) => RegistryError::DuplicateKey(msg),
            other => other.into(),
        })?;
        Ok(user)
    }

    /// Toggle account activation. Administrator-only; re-asserting the
    /// current state appends nothing.
    pub fn set_user_active(
        &self,
        user_id: &str,
        is_active: bool,
        actor: &Actor,
    ) -> RegistryResult<User> {
        self.require_administrator(actor)?;

        let mut user = {
            let db = self.db.lock()?;
            db.get_user(user_id)?
                .ok_or_else(|| RegistryError::NotFound(user_id.to_string()))?
        };
        if user.is_active == is_active {
            return Ok(user);
        }

        let draft = AuditDraft::new(
            actor.email.clone(),
            AuditAction::ToggleUserStatus,
            EntityType::User,
            user.id.clone(),
            user.email.clone(),
        )
        .with_change(
            "is_active",
            FieldChange::changed(user.is_active, is_active),
        )
        .with_request_context(actor.ip_address.clone(), actor.user_agent.clone());

        let mut db = self.db.lock()?;
        db.set_user_active_audited(user_id, is_active, draft)?;
        user.is_active = is_active;
        Ok(user)
    }

    /// List user accounts. Administrator-only.
    pub fn list_users(&self, actor: &Actor) -> RegistryResult<Vec<User>> {
        self.require_administrator(actor)?;
        let db = self.db.lock()?;
        Ok(db.list_users()?)
    }

    fn require_administrator(&self, actor: &Actor) -> RegistryResult<()> {
        if has_role(actor, &[Role::Administrator]) {
            Ok(())
        } else {
            Err(RegistryError::Forbidden(format!(
                "{} lacks administrator access",
                actor.email
            )))
        }
    }
}

/// Ledger entry for a freshly created record: every populated business
/// field appears as a creation change.
fn creation_draft(record: &PatientRecord, actor: &Actor) -> AuditDraft {
    let mut draft = AuditDraft::new(
        actor.email.clone(),
        AuditAction::CreatePatient,
        EntityType::Patient,
        record.id.clone(),
        record.display_label(),
    )
    .with_change(
        "patient_external_id",
        FieldChange::created(record.patient_external_id.as_str()),
    )
    .with_change("first_name", FieldChange::created(record.first_name.as_str()))
    .with_change("last_name", FieldChange::created(record.last_name.as_str()));

    for (field, value) in [
        ("date_of_birth", &record.date_of_birth),
        ("gender", &record.gender),
        ("diagnosis", &record.diagnosis),
        ("treatment_plan", &record.treatment_plan),
        ("notes", &record.notes),
    ] {
        if let Some(value) = value {
            draft = draft.with_change(field, FieldChange::created(value.as_str()));
        }
    }
    draft.with_request_context(actor.ip_address.clone(), actor.user_agent.clone())
}

/// Apply a partial update, returning the new record and the per-field diff.
fn apply_update(
    current: &PatientRecord,
    update: PatientRecordUpdate,
) -> (PatientRecord, BTreeMap<String, FieldChange>) {
    let mut updated = current.clone();
    let mut changes = BTreeMap::new();

    let mut apply = |field: &str, old: Option<String>, new: Option<String>| -> Option<String> {
        match new {
            Some(new_value) if old.as_deref() != Some(new_value.as_str()) => {
                changes.insert(
                    field.to_string(),
                    FieldChange {
                        from: old.map(serde_json::Value::from),
                        to: Some(serde_json::Value::from(new_value.clone())),
                    },
                );
                Some(new_value)
            }
            Some(same) => Some(same),
            None => old,
        }
    };

    updated.first_name = apply(
        "first_name",
        Some(current.first_name.clone()),
        update.first_name,
    )
    .unwrap_or_else(|| current.first_name.clone());
    updated.last_name = apply(
        "last_name",
        Some(current.last_name.clone()),
        update.last_name,
    )
    .unwrap_or_else(|| current.last_name.clone());
    updated.date_of_birth = apply(
        "date_of_birth",
        current.date_of_birth.clone(),
        update.date_of_birth,
    );
    updated.gender = apply("gender", current.gender.clone(), update.gender);
    updated.diagnosis = apply("diagnosis", current.diagnosis.clone(), update.diagnosis);
    updated.treatment_plan = apply(
        "treatment_plan",
        current.treatment_plan.clone(),
        update.treatment_plan,
    );
    updated.notes = apply("notes", current.notes.clone(), update.notes);

    if !changes.is_empty() {
        updated.touch();
    }
    (updated, changes)
}
