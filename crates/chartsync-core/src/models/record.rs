//! Patient record models.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a record relative to the external registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Created locally, not yet accepted by the registry
    Pending,
    /// Accepted by the registry, external id assigned
    Synced,
    /// Last attempt failed, eligible for retry
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            "error" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

/// A patient record with local-first sync metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientRecord {
    /// Local UUID - always present, generated at creation
    pub id: String,
    /// Business-facing identifier, unique (e.g. "PAT-123456-ABC")
    pub patient_external_id: String,
    pub first_name: String,
    pub last_name: String,
    /// ISO 8601 date, never in the future
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub notes: Option<String>,
    /// Sync lifecycle state
    pub sync_status: SyncStatus,
    /// Registry-assigned id - present exactly when sync_status is Synced
    pub external_record_id: Option<String>,
    /// Email of the creating user
    pub created_by: String,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

impl PatientRecord {
    /// Create a new record with required fields. Starts Pending with no
    /// external id.
    pub fn new(
        patient_external_id: String,
        first_name: String,
        last_name: String,
        created_by: String,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_external_id,
            first_name,
            last_name,
            date_of_birth: None,
            gender: None,
            diagnosis: None,
            treatment_plan: None,
            notes: None,
            sync_status: SyncStatus::Pending,
            external_record_id: None,
            created_by,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Check whether the registry has accepted this record.
    pub fn is_synced(&self) -> bool {
        self.sync_status == SyncStatus::Synced
    }

    /// Human-facing label used in audit entries,
    /// e.g. "PAT-123456-ABC (John Doe)".
    pub fn display_label(&self) -> String {
        format!(
            "{} ({} {})",
            self.patient_external_id, self.first_name, self.last_name
        )
    }

    /// Touch the updated_at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

/// Input for creating a record through the service surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPatientRecord {
    pub patient_external_id: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub notes: Option<String>,
}

/// Partial update of a record's business fields. `None` leaves the field
/// unchanged; `patient_external_id` is immutable after creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientRecordUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub notes: Option<String>,
}

impl PatientRecordUpdate {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.date_of_birth.is_none()
            && self.gender.is_none()
            && self.diagnosis.is_none()
            && self.treatment_plan.is_none()
            && self.notes.is_none()
    }
}

/// Outcome of a single submission attempt against the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Registry accepted the record and assigned an id
    Synced { external_id: String },
    /// Attempt failed; the reason is preserved in the audit entry
    Error { reason: String },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Synced { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults() {
        let record = PatientRecord::new(
            "PAT-123456-ABC".into(),
            "John".into(),
            "Doe".into(),
            "researcher@clinic.com".into(),
        );
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert!(record.external_record_id.is_none());
        assert!(!record.is_synced());
        assert_eq!(record.id.len(), 36); // UUID format
    }

    #[test]
    fn test_display_label() {
        let record = PatientRecord::new(
            "PAT-123456-ABC".into(),
            "John".into(),
            "Doe".into(),
            "researcher@clinic.com".into(),
        );
        assert_eq!(record.display_label(), "PAT-123456-ABC (John Doe)");
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Error] {
            assert_eq!(SyncStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SyncStatus::parse("unknown"), None);
    }

    #[test]
    fn test_update_is_empty() {
        assert!(PatientRecordUpdate::default().is_empty());

        let update = PatientRecordUpdate {
            notes: Some("follow-up scheduled".into()),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
