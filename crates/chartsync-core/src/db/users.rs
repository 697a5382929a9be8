//! User account database operations.

use rusqlite::{params, Connection, OptionalExtension};

use super::{audit, map_constraint, Database, DbError, DbResult};
use crate::models::{AuditDraft, AuditEntry, Role, User};

const USER_COLUMNS: &str =
    "id, email, password_hash, role, is_active, created_at, last_login";

impl Database {
    /// Insert a new user. Fails with `Constraint` when the email is taken.
    pub fn insert_user(&self, user: &User) -> DbResult<()> {
        insert_user_tx(&self.conn, user)
    }

    /// Get a user by id.
    pub fn get_user(&self, id: &str) -> DbResult<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
                [id],
                user_row,
            )
            .optional()?
            .map(UserRow::try_into)
            .transpose()
    }

    /// Get a user by email.
    pub fn get_user_by_email(&self, email: &str) -> DbResult<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS),
                [email],
                user_row,
            )
            .optional()?
            .map(UserRow::try_into)
            .transpose()
    }

    /// List all users, oldest account first.
    pub fn list_users(&self) -> DbResult<Vec<User>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM users ORDER BY created_at ASC, rowid ASC",
            USER_COLUMNS
        ))?;
        let rows = stmt.query_map([], user_row)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?.try_into()?);
        }
        Ok(users)
    }

    /// Flip the activation flag. Accounts are never deleted.
    pub fn set_user_active(&self, id: &str, is_active: bool) -> DbResult<bool> {
        set_user_active_tx(&self.conn, id, is_active)
    }

    /// Stamp a successful login.
    pub fn touch_last_login(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE users SET last_login = ?2 WHERE id = ?1",
            params![id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(rows_affected > 0)
    }

    /// Replace a user's password hash (reset flow).
    pub fn update_password_hash(&self, id: &str, password_hash: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE users SET password_hash = ?2 WHERE id = ?1",
            params![id, password_hash],
        )?;
        Ok(rows_affected > 0)
    }

    /// Insert a user together with its creation ledger entry.
    pub fn insert_user_audited(
        &mut self,
        user: &User,
        draft: AuditDraft,
    ) -> DbResult<AuditEntry> {
        let tx = self.conn.transaction()?;
        insert_user_tx(&tx, user)?;
        let entry = audit::append_audit_tx(&tx, draft)?;
        tx.commit()?;
        Ok(entry)
    }

    /// Toggle activation together with its ledger entry.
    pub fn set_user_active_audited(
        &mut self,
        id: &str,
        is_active: bool,
        draft: AuditDraft,
    ) -> DbResult<AuditEntry> {
        let tx = self.conn.transaction()?;
        if !set_user_active_tx(&tx, id, is_active)? {
            return Err(DbError::NotFound(id.to_string()));
        }
        let entry = audit::append_audit_tx(&tx, draft)?;
        tx.commit()?;
        Ok(entry)
    }
}

pub(crate) fn insert_user_tx(conn: &Connection, user: &User) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO users (id, email, password_hash, role, is_active, created_at, last_login)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            user.id,
            user.email,
            user.password_hash,
            user.role.as_str(),
            user.is_active,
            user.created_at,
            user.last_login,
        ],
    )
    .map_err(|e| map_constraint(e, &format!("email '{}' already exists", user.email)))?;
    Ok(())
}

pub(crate) fn set_user_active_tx(conn: &Connection, id: &str, is_active: bool) -> DbResult<bool> {
    let rows_affected = conn.execute(
        "UPDATE users SET is_active = ?2 WHERE id = ?1",
        params![id, is_active],
    )?;
    Ok(rows_affected > 0)
}

/// Intermediate row struct for database mapping.
struct UserRow {
    id: String,
    email: String,
    password_hash: String,
    role: String,
    is_active: bool,
    created_at: String,
    last_login: Option<String>,
}

fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        role: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
        last_login: row.get(6)?,
    })
}

impl TryFrom<UserRow> for User {
    type Error = DbError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = Role::parse(&row.role)
            .ok_or_else(|| DbError::Constraint(format!("Unknown role: {}", row.role)))?;

        Ok(User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            role,
            is_active: row.is_active,
            created_at: row.created_at,
            last_login: row.last_login,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn make_user(email: &str, role: Role) -> User {
        User::new(email.into(), "$2b$10$testhash".into(), role)
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();
        let user = make_user("researcher@clinic.com", Role::Researcher);
        db.insert_user(&user).unwrap();

        let by_id = db.get_user(&user.id).unwrap().unwrap();
        assert_eq!(by_id.email, "researcher@clinic.com");
        assert_eq!(by_id.role, Role::Researcher);
        assert!(by_id.is_active);

        let by_email = db.get_user_by_email("researcher@clinic.com").unwrap();
        assert_eq!(by_email.unwrap().id, user.id);
    }

    #[test]
    fn test_duplicate_email_is_constraint() {
        let db = setup_db();
        db.insert_user(&make_user("a@clinic.com", Role::Researcher))
            .unwrap();
        let result = db.insert_user(&make_user("a@clinic.com", Role::Administrator));
        assert!(matches!(result, Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_toggle_active() {
        let db = setup_db();
        let user = make_user("a@clinic.com", Role::Researcher);
        db.insert_user(&user).unwrap();

        assert!(db.set_user_active(&user.id, false).unwrap());
        assert!(!db.get_user(&user.id).unwrap().unwrap().is_active);

        assert!(!db.set_user_active("missing", false).unwrap());
    }

    #[test]
    fn test_touch_last_login() {
        let db = setup_db();
        let user = make_user("a@clinic.com", Role::Researcher);
        db.insert_user(&user).unwrap();

        assert!(user.last_login.is_none());
        db.touch_last_login(&user.id).unwrap();
        assert!(db.get_user(&user.id).unwrap().unwrap().last_login.is_some());
    }

    #[test]
    fn test_update_password_hash() {
        let db = setup_db();
        let user = make_user("a@clinic.com", Role::Researcher);
        db.insert_user(&user).unwrap();

        db.update_password_hash(&user.id, "$2b$10$newhash").unwrap();
        let updated = db.get_user(&user.id).unwrap().unwrap();
        assert_eq!(updated.password_hash, "$2b$10$newhash");
    }
}
