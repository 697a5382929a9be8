//! Remote registry connector interface.
//!
//! The registry is the external system of record. Connector implementations
//! must bound their own attempt time: an expired deadline surfaces as
//! [`SyncFault::Timeout`], never an indefinite hang, so the engine's
//! per-record guard is always released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use thiserror::Error;

use crate::models::PatientRecord;

/// Why a submission attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncFault {
    /// Attempt exceeded the connector's deadline
    #[error("timeout")]
    Timeout,

    /// Registry rejected the record
    #[error("rejected: {0}")]
    Rejected(String),

    /// Registry could not be reached
    #[error("unreachable: {0}")]
    Unreachable(String),
}

/// External system of record.
pub trait RemoteRegistry {
    /// Submit a record, returning the registry-assigned id.
    fn submit(&self, record: &PatientRecord) -> Result<String, SyncFault>;
}

/// Deterministic connector for tests and demos. Outcomes are scripted per
/// business id; unscripted submissions succeed with a sequential registry
/// id.
#[derive(Default)]
pub struct ScriptedRegistry {
    faults: Mutex<HashMap<String, SyncFault>>,
    submissions: AtomicU64,
    next_id: AtomicU64,
}

impl ScriptedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next submissions of `patient_external_id` to fail.
    pub fn fail_with(&self, patient_external_id: &str, fault: SyncFault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(patient_external_id.to_string(), fault);
        }
    }

    /// Clear a scripted failure so later submissions succeed.
    pub fn clear_fault(&self, patient_external_id: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.remove(patient_external_id);
        }
    }

    /// Number of submit calls received.
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }
}

impl RemoteRegistry for ScriptedRegistry {
    fn submit(&self, record: &PatientRecord) -> Result<String, SyncFault> {
        self.submissions.fetch_add(1, Ordering::SeqCst);

        let fault = self
            .faults
            .lock()
            .ok()
            .and_then(|faults| faults.get(&record.patient_external_id).cloned());
        if let Some(fault) = fault {
            return Err(fault);
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("REG-{:06}", n))
    }
}
