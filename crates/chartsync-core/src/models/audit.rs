//! Audit ledger models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Known audit action kinds. String forms are the ledger column values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    CreatePatient,
    UpdatePatient,
    SyncPatient,
    CreateUser,
    ToggleUserStatus,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreatePatient => "CREATE_PATIENT",
            AuditAction::UpdatePatient => "UPDATE_PATIENT",
            AuditAction::SyncPatient => "SYNC_PATIENT",
            AuditAction::CreateUser => "CREATE_USER",
            AuditAction::ToggleUserStatus => "TOGGLE_USER_STATUS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATE_PATIENT" => Some(AuditAction::CreatePatient),
            "UPDATE_PATIENT" => Some(AuditAction::UpdatePatient),
            "SYNC_PATIENT" => Some(AuditAction::SyncPatient),
            "CREATE_USER" => Some(AuditAction::CreateUser),
            "TOGGLE_USER_STATUS" => Some(AuditAction::ToggleUserStatus),
            _ => None,
        }
    }
}

/// Kind of entity an audit entry refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Patient,
    User,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Patient => "patient",
            EntityType::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "patient" => Some(EntityType::Patient),
            "user" => Some(EntityType::User),
            _ => None,
        }
    }
}

/// Before/after pair for a single field. `from = None` denotes creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub from: Option<serde_json::Value>,
    pub to: Option<serde_json::Value>,
}

impl FieldChange {
    /// A field set for the first time.
    pub fn created(to: impl Into<serde_json::Value>) -> Self {
        Self {
            from: None,
            to: Some(to.into()),
        }
    }

    /// A field changed from one value to another.
    pub fn changed(
        from: impl Into<serde_json::Value>,
        to: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            from: Some(from.into()),
            to: Some(to.into()),
        }
    }
}

/// An entry before the ledger assigns id, timestamp and chain hashes.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub actor_email: String,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_label: String,
    pub changes: BTreeMap<String, FieldChange>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditDraft {
    pub fn new(
        actor_email: impl Into<String>,
        action: AuditAction,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        entity_label: impl Into<String>,
    ) -> Self {
        Self {
            actor_email: actor_email.into(),
            action,
            entity_type,
            entity_id: entity_id.into(),
            entity_label: entity_label.into(),
            changes: BTreeMap::new(),
            ip_address: None,
            user_agent: None,
        }
    }

    /// Record a field change on this entry.
    pub fn with_change(mut self, field: impl Into<String>, change: FieldChange) -> Self {
        self.changes.insert(field.into(), change);
        self
    }

    /// Attach request context (where the action came from).
    pub fn with_request_context(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }
}

/// An immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    /// Monotonically increasing ledger id
    pub id: i64,
    pub actor_email: String,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Human-facing label, e.g. "PAT-123456-ABC (John Doe)"
    pub entity_label: String,
    /// Only the fields that changed, with before/after values
    pub changes: BTreeMap<String, FieldChange>,
    pub timestamp: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// entry_hash of the preceding entry, empty for the first
    pub prev_hash: String,
    /// sha256 over prev_hash and the canonical entry body
    pub entry_hash: String,
}

/// Body fields covered by the chain hash. The id and the hashes themselves
/// are excluded: position in the chain is fixed by prev_hash.
#[derive(Serialize)]
struct CanonicalBody<'a> {
    actor_email: &'a str,
    action: AuditAction,
    entity_type: EntityType,
    entity_id: &'a str,
    entity_label: &'a str,
    changes: &'a BTreeMap<String, FieldChange>,
    timestamp: &'a str,
    ip_address: &'a Option<String>,
    user_agent: &'a Option<String>,
}

impl AuditEntry {
    /// Canonical serialization of the hashed body. BTreeMap keys give a
    /// stable change order.
    pub fn canonical_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&CanonicalBody {
            actor_email: &self.actor_email,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: &self.entity_id,
            entity_label: &self.entity_label,
            changes: &self.changes,
            timestamp: &self.timestamp,
            ip_address: &self.ip_address,
            user_agent: &self.user_agent,
        })
    }
}

/// Chain hash: sha256(prev_hash || body), hex-encoded.
pub fn chain_hash(prev_hash: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry() -> AuditEntry {
        AuditEntry {
            id: 1,
            actor_email: "researcher@clinic.com".into(),
            action: AuditAction::CreatePatient,
            entity_type: EntityType::Patient,
            entity_id: "record-1".into(),
            entity_label: "PAT-123456-ABC (John Doe)".into(),
            changes: BTreeMap::from([(
                "first_name".to_string(),
                FieldChange::created("John"),
            )]),
            timestamp: "2024-01-18T10:30:00+00:00".into(),
            ip_address: Some("192.168.1.100".into()),
            user_agent: None,
            prev_hash: String::new(),
            entry_hash: String::new(),
        }
    }

    #[test]
    fn test_action_string_roundtrip() {
        for action in [
            AuditAction::CreatePatient,
            AuditAction::UpdatePatient,
            AuditAction::SyncPatient,
            AuditAction::CreateUser,
            AuditAction::ToggleUserStatus,
        ] {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::parse("DELETE_PATIENT"), None);
    }

    #[test]
    fn test_canonical_body_deterministic() {
        let entry = make_entry();
        let body1 = entry.canonical_body().unwrap();
        let body2 = entry.canonical_body().unwrap();
        assert_eq!(body1, body2);
    }

    #[test]
    fn test_canonical_body_excludes_id_and_hashes() {
        let mut entry = make_entry();
        let body = entry.canonical_body().unwrap();

        entry.id = 99;
        entry.prev_hash = "something".into();
        entry.entry_hash = "else".into();
        assert_eq!(entry.canonical_body().unwrap(), body);
    }

    #[test]
    fn test_chain_hash_sensitive_to_both_inputs() {
        let body = make_entry().canonical_body().unwrap();
        let h1 = chain_hash("", &body);
        let h2 = chain_hash("prev", &body);
        let h3 = chain_hash("", &format!("{}x", body));

        assert_ne!(h1, h2);
        assert_ne!(h1, h3);
        assert_eq!(h1.len(), 64); // hex sha256
    }

    #[test]
    fn test_field_change_constructors() {
        let created = FieldChange::created("Hypertension");
        assert!(created.from.is_none());
        assert_eq!(created.to, Some(serde_json::json!("Hypertension")));

        let changed = FieldChange::changed("pending", "synced");
        assert_eq!(changed.from, Some(serde_json::json!("pending")));
        assert_eq!(changed.to, Some(serde_json::json!("synced")));
    }
}
