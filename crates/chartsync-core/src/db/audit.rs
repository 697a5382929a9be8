//! Audit ledger database operations.
//!
//! The ledger is append-only: rows are chained with sha256 hashes in
//! insertion (chronological) order and guarded by immutability triggers.
//! Queries return newest-first.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{Database, DbError, DbResult};
use crate::models::{chain_hash, AuditAction, AuditDraft, AuditEntry, EntityType, FieldChange};

/// Optional, conjunctive query filters.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Exact action kind
    pub action: Option<AuditAction>,
    /// Case-insensitive substring of the actor email
    pub actor_contains: Option<String>,
    /// Exact entity type
    pub entity_type: Option<EntityType>,
    /// Inclusive lower timestamp bound (RFC 3339)
    pub from: Option<String>,
    /// Inclusive upper timestamp bound (RFC 3339)
    pub until: Option<String>,
}

/// Aggregate counts over the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditStats {
    pub total: u64,
    pub by_action: BTreeMap<String, u64>,
    pub by_actor: BTreeMap<String, u64>,
    pub by_entity_type: BTreeMap<String, u64>,
    /// Entries within 24 hours before the query time
    pub last_24h: u64,
    /// Entries within 7 days before the query time
    pub last_7d: u64,
}

/// Result of recomputing the ledger hash chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainVerification {
    pub valid: bool,
    pub checked: u64,
    /// First entry whose stored hashes diverge from the recomputation
    pub first_invalid_id: Option<i64>,
}

impl Database {
    /// Append an entry to the ledger. Assigns id, timestamp and chain
    /// hashes; the entry is immutable afterwards.
    pub fn append_audit(&self, draft: AuditDraft) -> DbResult<AuditEntry> {
        append_audit_tx(&self.conn, draft)
    }

    /// Query the ledger, newest first. All filters are optional and
    /// combined with AND semantics.
    pub fn query_audit(&self, filter: &AuditFilter) -> DbResult<Vec<AuditEntry>> {
        let mut sql = String::from(
            "SELECT id, actor_email, action, entity_type, entity_id, entity_label, \
             changes, timestamp, ip_address, user_agent, prev_hash, entry_hash \
             FROM audit_log",
        );
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(action) = filter.action {
            clauses.push("action = ?");
            args.push(action.as_str().to_string());
        }
        if let Some(actor) = &filter.actor_contains {
            clauses.push("actor_email LIKE '%' || ? || '%'");
            args.push(actor.clone());
        }
        if let Some(entity_type) = filter.entity_type {
            clauses.push("entity_type = ?");
            args.push(entity_type.as_str().to_string());
        }
        if let Some(from) = &filter.from {
            clauses.push("timestamp >= ?");
            args.push(from.clone());
        }
        if let Some(until) = &filter.until {
            clauses.push("timestamp <= ?");
            args.push(until.clone());
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), audit_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.try_into()?);
        }
        Ok(entries)
    }

    /// Aggregate counts, with recency windows relative to `now`.
    pub fn audit_stats(&self, now: DateTime<Utc>) -> DbResult<AuditStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT action, actor_email, entity_type, timestamp FROM audit_log")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let day_ago = now - Duration::hours(24);
        let week_ago = now - Duration::days(7);

        let mut stats = AuditStats::default();
        for row in rows {
            let (action, actor, entity_type, timestamp) = row?;
            stats.total += 1;
            *stats.by_action.entry(action).or_insert(0) += 1;
            *stats.by_actor.entry(actor).or_insert(0) += 1;
            *stats.by_entity_type.entry(entity_type).or_insert(0) += 1;

            if let Ok(ts) = DateTime::parse_from_rfc3339(&timestamp) {
                let ts = ts.with_timezone(&Utc);
                if ts >= day_ago && ts <= now {
                    stats.last_24h += 1;
                }
                if ts >= week_ago && ts <= now {
                    stats.last_7d += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Total number of ledger entries.
    pub fn count_audit_entries(&self) -> DbResult<u64> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Recompute the hash chain from the first entry and report the first
    /// divergence, if any.
    pub fn verify_audit_chain(&self) -> DbResult<ChainVerification> {
        let mut stmt = self.conn.prepare(
            "SELECT id, actor_email, action, entity_type, entity_id, entity_label, \
             changes, timestamp, ip_address, user_agent, prev_hash, entry_hash \
             FROM audit_log ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], audit_row)?;

        let mut expected_prev = String::new();
        let mut checked = 0u64;
        for row in rows {
            let entry: AuditEntry = row?.try_into()?;
            let body = entry.canonical_body()?;
            let expected_hash = chain_hash(&expected_prev, &body);

            if entry.prev_hash != expected_prev || entry.entry_hash != expected_hash {
                return Ok(ChainVerification {
                    valid: false,
                    checked,
                    first_invalid_id: Some(entry.id),
                });
            }
            expected_prev = entry.entry_hash;
            checked += 1;
        }

        Ok(ChainVerification {
            valid: true,
            checked,
            first_invalid_id: None,
        })
    }
}

pub(crate) fn append_audit_tx(conn: &Connection, draft: AuditDraft) -> DbResult<AuditEntry> {
    let prev_hash: Option<String> = conn
        .query_row(
            "SELECT entry_hash FROM audit_log ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    let prev_hash = prev_hash.unwrap_or_default();

    let mut entry = AuditEntry {
        id: 0,
        actor_email: draft.actor_email,
        action: draft.action,
        entity_type: draft.entity_type,
        entity_id: draft.entity_id,
        entity_label: draft.entity_label,
        changes: draft.changes,
        timestamp: Utc::now().to_rfc3339(),
        ip_address: draft.ip_address,
        user_agent: draft.user_agent,
        prev_hash,
        entry_hash: String::new(),
    };
    let body = entry.canonical_body()?;
    entry.entry_hash = chain_hash(&entry.prev_hash, &body);

    conn.execute(
        r#"
        INSERT INTO audit_log (
            actor_email, action, entity_type, entity_id, entity_label,
            changes, timestamp, ip_address, user_agent, prev_hash, entry_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        rusqlite::params![
            entry.actor_email,
            entry.action.as_str(),
            entry.entity_type.as_str(),
            entry.entity_id,
            entry.entity_label,
            serde_json::to_string(&entry.changes)?,
            entry.timestamp,
            entry.ip_address,
            entry.user_agent,
            entry.prev_hash,
            entry.entry_hash,
        ],
    )?;
    entry.id = conn.last_insert_rowid();

    tracing::info!(
        target: "audit",
        id = entry.id,
        actor = %entry.actor_email,
        action = entry.action.as_str(),
        entity = %entry.entity_label,
        "Audit entry appended"
    );

    Ok(entry)
}

/// Intermediate row struct for database mapping.
struct AuditRow {
    id: i64,
    actor_email: String,
    action: String,
    entity_type: String,
    entity_id: String,
    entity_label: String,
    changes: String,
    timestamp: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    prev_hash: String,
    entry_hash: String,
}

fn audit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRow> {
    Ok(AuditRow {
        id: row.get(0)?,
        actor_email: row.get(1)?,
        action: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        entity_label: row.get(5)?,
        changes: row.get(6)?,
        timestamp: row.get(7)?,
        ip_address: row.get(8)?,
        user_agent: row.get(9)?,
        prev_hash: row.get(10)?,
        entry_hash: row.get(11)?,
    })
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = DbError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let action = AuditAction::parse(&row.action)
            .ok_or_else(|| DbError::Constraint(format!("Unknown audit action: {}", row.action)))?;
        let entity_type = EntityType::parse(&row.entity_type).ok_or_else(|| {
            DbError::Constraint(format!("Unknown entity type: {}", row.entity_type))
        })?;
        let changes: BTreeMap<String, FieldChange> = serde_json::from_str(&row.changes)?;

        Ok(AuditEntry {
            id: row.id,
            actor_email: row.actor_email,
            action,
            entity_type,
            entity_id: row.entity_id,
            entity_label: row.entity_label,
            changes,
            timestamp: row.timestamp,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            prev_hash: row.prev_hash,
            entry_hash: row.entry_hash,
        })
    }
}
