//! Debounce policy deciding which activity events become heartbeats.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(120);

/// What was last emitted. Only changes when a heartbeat is emitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifierState {
    pub last_path: Option<String>,
    pub last_heartbeat_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct HeartbeatClassifier {
    debounce: Duration,
    state: Mutex<ClassifierState>,
}

impl Default for HeartbeatClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl HeartbeatClassifier {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            state: Mutex::new(ClassifierState::default()),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Returns true when the event should be emitted, recording it as the
    /// latest heartbeat. Decision and update happen under one lock.
    ///
    /// Emit when any of:
    /// - the event is a write
    /// - nothing was emitted yet
    /// - at least `debounce` has passed since the last heartbeat
    /// - the path differs from the last heartbeat's
    pub fn classify(&self, path: &str, is_write: bool, now: DateTime<Utc>) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let emit = is_write
            || match (&state.last_path, state.last_heartbeat_time) {
                (Some(last_path), Some(last_time)) => {
                    self.elapsed_at_least_debounce(last_time, now) || last_path != path
                }
                _ => true,
            };

        if emit {
            state.last_path = Some(path.to_string());
            state.last_heartbeat_time = Some(now);
        }
        emit
    }

    pub fn state(&self) -> ClassifierState {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    // A clock that went backwards counts as "not yet elapsed".
    fn elapsed_at_least_debounce(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - last)
            .to_std()
            .map(|elapsed| elapsed >= self.debounce)
            .unwrap_or(false)
    }
}
