//! ChartSync Core Library
//!
//! Offline-capable clinical record entry with registry sync and an
//! append-only audit ledger.
//!
//! # Architecture
//!
//! ```text
//! Form input ──▶ validate ──▶ Record Store (status = pending)
//!                                   │
//!                        offline?───┴──▶ Offline Cache (durable queue)
//!                                   │
//!        Connectivity Monitor       │
//!          (came online) ──▶ Sync Engine ──▶ Remote Registry
//!                                   │              │
//!                         ┌─────────▼─────────┐    │
//!                         │ synced + ext. id  │◀───┘ accepted
//!                         │ error  + reason   │◀──── failed
//!                         └─────────┬─────────┘
//!                                   │  (same transaction)
//!                            Audit Ledger (hash-chained, append-only)
//! ```
//!
//! # Core Principle
//!
//! **Every mutation is audited exactly once.** Record writes and their
//! ledger entries commit in the same transaction; reads and rejected
//! inputs append nothing.
//!
//! # Modules
//!
//! - [`db`]: SQLite persistence layer (records, users, ledger, cache)
//! - [`models`]: domain types (PatientRecord, AuditEntry, User, etc.)
//! - [`sync`]: sync engine, registry connector interface, connectivity
//! - [`export`]: record summary and CSV rendering
//! - [`service`]: the operation surface consumed by UI/API layers
//! - [`validate`]: input validation

pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod service;
pub mod sync;
pub mod validate;

// Re-export commonly used types
pub use db::{AuditFilter, AuditStats, CachedRecord, ChainVerification, Database, SyncStatusCounts};
pub use error::{RegistryError, RegistryResult};
pub use export::{ExportRenderer, PlainTextRenderer};
pub use models::{
    Actor, AuditAction, AuditDraft, AuditEntry, EntityType, FieldChange, NewPatientRecord,
    NewUser, PatientRecord, PatientRecordUpdate, Role, SyncOutcome, SyncStatus, User,
};
pub use service::RegistryService;
pub use sync::{
    BatchSyncSummary, ConnectivityMonitor, RemoteRegistry, ScriptedRegistry, SyncEngine,
    SyncFault, SyncReport, Transition,
};
