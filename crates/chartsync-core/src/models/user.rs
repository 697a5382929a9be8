//! User account models.

use serde::{Deserialize, Serialize};

/// Account role for the capability check at the API boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Researcher,
    Administrator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Researcher => "researcher",
            Role::Administrator => "administrator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "researcher" => Some(Role::Researcher),
            "administrator" => Some(Role::Administrator),
            _ => None,
        }
    }
}

/// A user account. Never hard-deleted; deactivated instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    /// Unique login identifier
    pub email: String,
    /// bcrypt hash, never the plain password
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: String,
    pub last_login: Option<String>,
}

impl User {
    /// Create a new active user with a pre-hashed password.
    pub fn new(email: String, password_hash: String, role: Role) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            password_hash,
            role,
            is_active: true,
            created_at: chrono::Utc::now().to_rfc3339(),
            last_login: None,
        }
    }
}

/// Input for creating a user through the service surface. The caller hashes
/// the password (see the auth crate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Capability check at the API boundary.
pub fn has_role(actor: &Actor, required: &[Role]) -> bool {
    required.contains(&actor.role)
}

/// The identity performing an operation, with optional request context
/// carried into audit entries.
#[derive(Debug, Clone)]
pub struct Actor {
    pub email: String,
    pub role: Role,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Actor {
    pub fn new(email: impl Into<String>, role: Role) -> Self {
        Self {
            email: email.into(),
            role,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Attach request context (origin IP, user agent).
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
