//! ChartSync Authentication
//!
//! The authentication collaborator consumed by the API layer: bcrypt
//! password verification, in-memory sessions with TTL, and durable
//! password-reset tokens. Owns no record or audit logic; it only reads and
//! updates the core user store.

mod reset;

pub use reset::*;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use chartsync_core::db::{Database, DbError};
use chartsync_core::models::{Role, User};

/// Password policy: minimum length of a plain-text password.
pub const MIN_PASSWORD_LEN: usize = 6;
/// bcrypt work factor.
const HASH_COST: u32 = 10;
/// Default session lifetime.
const SESSION_TTL_HOURS: i64 = 24;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Unknown email, wrong password or deactivated account - deliberately
    /// indistinguishable to the caller
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Not authenticated")]
    NotAuthenticated,

    /// No active account for the given email (reset flow only)
    #[error("No active account for that email")]
    UnknownEmail,

    #[error("Reset token invalid, used or expired")]
    ResetTokenInvalid,

    #[error("Password must be at least {MIN_PASSWORD_LEN} characters")]
    WeakPassword,

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for AuthError {
    fn from(e: rusqlite::Error) -> Self {
        AuthError::Database(DbError::Sqlite(e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for AuthError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        AuthError::Internal(format!("Lock poisoned: {}", e))
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Hash a plain password for storage, enforcing the password policy.
pub fn hash_password(plain: &str) -> AuthResult<String> {
    if plain.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    Ok(bcrypt::hash(plain, HASH_COST)?)
}

/// Authenticated identity handed back to callers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for AuthenticatedUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// A live session as returned by [`AuthService::login`].
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub user: AuthenticatedUser,
    pub expires_at: String,
}

struct SessionEntry {
    user: AuthenticatedUser,
    expires_at: DateTime<Utc>,
}

/// Authentication service over the shared core database handle.
pub struct AuthService {
    db: Arc<Mutex<Database>>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    session_ttl: Duration,
}

impl AuthService {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self {
            db,
            sessions: Mutex::new(HashMap::new()),
            session_ttl: Duration::hours(SESSION_TTL_HOURS),
        }
    }

    /// Override the session lifetime (for testing and short-lived kiosks).
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub(crate) fn db(&self) -> &Arc<Mutex<Database>> {
        &self.db
    }

    /// Verify credentials and open a session. Unknown email, wrong password
    /// and deactivated accounts all fail identically.
    pub fn login(&self, email: &str, password: &str) -> AuthResult<Session> {
        let user = {
            let db = self.db.lock()?;
            db.get_user_by_email(email)?
        };

        let user = match user {
            Some(user) if user.is_active => user,
            _ => return Err(AuthError::InvalidCredentials),
        };
        if !bcrypt::verify(password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        {
            let db = self.db.lock()?;
            db.touch_last_login(&user.id)?;
        }

        let token = uuid::Uuid::new_v4().to_string();
        let expires_at = Utc::now() + self.session_ttl;
        let authenticated = AuthenticatedUser::from(&user);

        let mut sessions = self.sessions.lock()?;
        sessions.insert(
            token.clone(),
            SessionEntry {
                user: authenticated.clone(),
                expires_at,
            },
        );

        tracing::info!(user = %authenticated.email, "Login succeeded");
        Ok(Session {
            token,
            user: authenticated,
            expires_at: expires_at.to_rfc3339(),
        })
    }

    /// Resolve a session token to its user. Expired sessions are removed on
    /// the way out.
    pub fn current_user(&self, token: &str) -> AuthResult<AuthenticatedUser> {
        let mut sessions = self.sessions.lock()?;
        match sessions.get(token) {
            Some(entry) if entry.expires_at > Utc::now() => Ok(entry.user.clone()),
            Some(_) => {
                sessions.remove(token);
                Err(AuthError::NotAuthenticated)
            }
            None => Err(AuthError::NotAuthenticated),
        }
    }

    /// Drop a session. Unknown tokens are ignored.
    pub fn logout(&self, token: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(token);
        }
    }

    /// Evict all expired sessions, returning how many were dropped.
    pub fn purge_expired_sessions(&self) -> AuthResult<usize> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock()?;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        Ok(before - sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (AuthService, User) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let user = User::new(
            "researcher@clinic.com".into(),
            hash_password("researcher123").unwrap(),
            Role::Researcher,
        );
        db.lock().unwrap().insert_user(&user).unwrap();
        (AuthService::new(db), user)
    }

    #[test]
    fn test_login_and_current_user() {
        let (auth, user) = setup();

        let session = auth.login("researcher@clinic.com", "researcher123").unwrap();
        assert_eq!(session.user.email, "researcher@clinic.com");
        assert_eq!(session.user.role, Role::Researcher);

        let resolved = auth.current_user(&session.token).unwrap();
        assert_eq!(resolved.id, user.id);

        // last_login was stamped
        let db = auth.db().lock().unwrap();
        let stored = db.get_user(&user.id).unwrap().unwrap();
        assert!(stored.last_login.is_some());
    }

    #[test]
    fn test_bad_credentials_indistinguishable() {
        let (auth, _) = setup();

        let wrong_password = auth.login("researcher@clinic.com", "nope-nope");
        let unknown_email = auth.login("ghost@clinic.com", "researcher123");

        assert!(matches!(wrong_password, Err(AuthError::InvalidCredentials)));
        assert!(matches!(unknown_email, Err(AuthError::InvalidCredentials)));
    }

    #[test]
    fn test_inactive_user_rejected() {
        let (auth, user) = setup();
        auth.db()
            .lock()
            .unwrap()
            .set_user_active(&user.id, false)
            .unwrap();

        let result = auth.login("researcher@clinic.com", "researcher123");
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[test]
    fn test_logout_invalidates_token() {
        let (auth, _) = setup();
        let session = auth.login("researcher@clinic.com", "researcher123").unwrap();

        auth.logout(&session.token);
        assert!(matches!(
            auth.current_user(&session.token),
            Err(AuthError::NotAuthenticated)
        ));
    }

    #[test]
    fn test_expired_session_rejected() {
        let (auth, _) = setup();
        let auth = auth.with_session_ttl(Duration::zero());

        let session = auth.login("researcher@clinic.com", "researcher123").unwrap();
        assert!(matches!(
            auth.current_user(&session.token),
            Err(AuthError::NotAuthenticated)
        ));
    }

    #[test]
    fn test_password_policy() {
        assert!(matches!(hash_password("short"), Err(AuthError::WeakPassword)));
        assert!(hash_password("long-enough").is_ok());
    }

    #[test]
    fn test_purge_expired_sessions() {
        let (auth, _) = setup();
        let auth = auth.with_session_ttl(Duration::zero());
        auth.login("researcher@clinic.com", "researcher123").unwrap();

        assert_eq!(auth.purge_expired_sessions().unwrap(), 1);
        assert_eq!(auth.purge_expired_sessions().unwrap(), 0);
    }
}
