//! SQLite schema definition.

/// Complete database schema for chartsync.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Users
-- ============================================================================

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'researcher'
        CHECK (role IN ('researcher', 'administrator')),
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    last_login TEXT
);

-- ============================================================================
-- Patient Records
-- ============================================================================

CREATE TABLE IF NOT EXISTS patient_records (
    id TEXT PRIMARY KEY,
    patient_external_id TEXT UNIQUE NOT NULL,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    date_of_birth TEXT,
    gender TEXT,
    diagnosis TEXT,
    treatment_plan TEXT,
    notes TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (sync_status IN ('pending', 'synced', 'error')),
    external_record_id TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    -- external id present exactly when synced
    CHECK ((sync_status = 'synced') = (external_record_id IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_records_sync_status ON patient_records(sync_status);
CREATE INDEX IF NOT EXISTS idx_records_created_at ON patient_records(created_at);

-- ============================================================================
-- Audit Ledger (Append-Only - Immutable after creation)
-- ============================================================================

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor_email TEXT NOT NULL,
    action TEXT NOT NULL,
    entity_type TEXT NOT NULL CHECK (entity_type IN ('patient', 'user')),
    entity_id TEXT NOT NULL,
    entity_label TEXT NOT NULL,
    changes TEXT NOT NULL DEFAULT '{}',          -- JSON object {field: {from, to}}
    timestamp TEXT NOT NULL DEFAULT (datetime('now')),
    ip_address TEXT,
    user_agent TEXT,
    prev_hash TEXT NOT NULL,                     -- entry_hash of the preceding row
    entry_hash TEXT NOT NULL                     -- sha256(prev_hash || canonical body)
);

-- Ledger rows are immutable once written
CREATE TRIGGER IF NOT EXISTS audit_log_no_update BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'Audit entries are immutable');
END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_delete BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'Audit entries are immutable');
END;

CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_log(action);
CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);

-- ============================================================================
-- Offline Cache (local queue while the registry flow is unreachable)
-- ============================================================================

CREATE TABLE IF NOT EXISTS offline_cache (
    record_id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,                       -- full PatientRecord JSON
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'synced', 'error')),
    captured_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ============================================================================
-- Password Reset Tokens
-- ============================================================================

CREATE TABLE IF NOT EXISTS password_reset_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL REFERENCES users(id),
    token TEXT UNIQUE NOT NULL,
    expires_at TEXT NOT NULL,
    used INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
