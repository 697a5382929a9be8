//! Online/offline state tracking.
//!
//! The monitor only reports state; it never retries anything itself. A
//! caller reacts to [`Transition::CameOnline`] by invoking the sync
//! engine's bulk sync.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A reported state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CameOnline,
    WentOffline,
}

/// Tracks a boolean online/offline state fed by environment signals.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    last_changed_at: Mutex<Option<String>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            online: AtomicBool::new(initially_online),
            last_changed_at: Mutex::new(None),
        }
    }

    /// Current state on demand.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// When the state last changed, if it ever has.
    pub fn last_changed_at(&self) -> Option<String> {
        match self.last_changed_at.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Feed an environment signal. Returns the transition when the state
    /// actually changed, `None` when it was already there.
    pub fn set_online(&self, online: bool) -> Option<Transition> {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return None;
        }

        let now = chrono::Utc::now().to_rfc3339();
        match self.last_changed_at.lock() {
            Ok(mut guard) => *guard = Some(now),
            Err(poisoned) => *poisoned.into_inner() = Some(now),
        }

        Some(if online {
            Transition::CameOnline
        } else {
            Transition::WentOffline
        })
    }
}

impl Default for ConnectivityMonitor {
    /// Starts online; offline is the exceptional state.
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_reported_once() {
        let monitor = ConnectivityMonitor::new(true);
        assert!(monitor.is_online());
        assert!(monitor.last_changed_at().is_none());

        assert_eq!(monitor.set_online(false), Some(Transition::WentOffline));
        assert!(!monitor.is_online());
        assert!(monitor.last_changed_at().is_some());

        // Repeating the same signal is not a transition
        assert_eq!(monitor.set_online(false), None);

        assert_eq!(monitor.set_online(true), Some(Transition::CameOnline));
        assert!(monitor.is_online());
    }
}
