//! Password reset tokens.
//!
//! Tokens are durable (they survive restarts), single-use and expiring.
//! The email delivery that would carry the token to the user is outside
//! this crate.

use chrono::{Duration, Utc};
use rusqlite::OptionalExtension;

use crate::{hash_password, AuthError, AuthResult, AuthService};

/// How long a reset token stays valid.
const RESET_TOKEN_TTL_MINUTES: i64 = 60;

impl AuthService {
    /// Issue a reset token for an active account. The token is returned to
    /// the caller for delivery; it is never logged.
    pub fn request_password_reset(&self, email: &str) -> AuthResult<String> {
        let db = self.db().lock()?;

        let user = db
            .get_user_by_email(email)?
            .filter(|user| user.is_active)
            .ok_or(AuthError::UnknownEmail)?;

        let token = uuid::Uuid::new_v4().to_string();
        let expires_at = (Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES)).to_rfc3339();
        db.conn().execute(
            "INSERT INTO password_reset_tokens (user_id, token, expires_at, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![user.id, token, expires_at, Utc::now().to_rfc3339()],
        )?;

        tracing::info!(user = %user.email, "Password reset requested");
        Ok(token)
    }

    /// Consume a reset token and set a new password. The token must be
    /// unused and unexpired; it is burned even against replay after
    /// success.
    pub fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        let password_hash = hash_password(new_password)?;

        let mut db = self.db().lock()?;
        let tx = db.transaction()?;

        let row: Option<(i64, String, String, bool)> = tx
            .query_row(
                "SELECT id, user_id, expires_at, used FROM password_reset_tokens WHERE token = ?",
                [token],
                |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                },
            )
            .optional()?;

        let (token_id, user_id, expires_at, used) = row.ok_or(AuthError::ResetTokenInvalid)?;
        if used || expires_at <= Utc::now().to_rfc3339() {
            return Err(AuthError::ResetTokenInvalid);
        }

        tx.execute(
            "UPDATE users SET password_hash = ?2 WHERE id = ?1",
            rusqlite::params![user_id, password_hash],
        )?;
        tx.execute(
            "UPDATE password_reset_tokens SET used = 1 WHERE id = ?",
            [token_id],
        )?;
        tx.commit()?;

        tracing::info!(user_id = %user_id, "Password reset completed");
        Ok(())
    }
}
