//! Per-resource logging with once-only and throttled modes
//!
//! A pass that is blocked re-runs every few seconds. Logging every attempt
//! would flood the output, so progress and error messages are throttled per
//! resource and message, and milestone messages are logged once per
//! generation.

use crate::tracker::replaced_by;
use keel_core::types::ResourceId;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug, Default)]
struct LogState {
    once: HashSet<(ResourceId, i64, String)>,
    last_progress: HashMap<(ResourceId, String), Instant>,
    last_error: HashMap<(ResourceId, String), Instant>,
}

/// Throttling state shared by every resource a reconciler handles
#[derive(Debug)]
pub struct ThrottledLog {
    progress_interval: Duration,
    error_interval: Duration,
    state: Mutex<LogState>,
}

impl Default for ThrottledLog {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(30))
    }
}

impl ThrottledLog {
    pub fn new(progress_interval: Duration, error_interval: Duration) -> Self {
        Self {
            progress_interval,
            error_interval,
            state: Mutex::new(LogState::default()),
        }
    }

    /// Logger scoped to one resource at one generation
    pub fn scope(&self, id: ResourceId, generation: i64) -> ResourceLog<'_> {
        ResourceLog {
            log: self,
            id,
            generation,
        }
    }

    /// Drop all remembered messages for `id`
    pub fn forget(&self, id: &ResourceId) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.once.retain(|(i, _, _)| i != id);
        state.last_progress.retain(|(i, _), _| i != id);
        state.last_error.retain(|(i, _), _| i != id);
    }

    /// Drop remembered messages of any earlier resource that `id` replaced
    pub fn forget_replaced(&self, id: &ResourceId) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.once.retain(|(i, _, _)| !replaced_by(i, id));
        state.last_progress.retain(|(i, _), _| !replaced_by(i, id));
        state.last_error.retain(|(i, _), _| !replaced_by(i, id));
    }

    fn first_time(&self, id: &ResourceId, generation: i64, msg: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // Older generations can never be logged again
        state
            .once
            .retain(|(i, g, _)| i != id || *g >= generation);
        state.once.insert((id.clone(), generation, msg.to_string()))
    }

    fn due(&self, id: &ResourceId, msg: &str, is_error: bool) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (map, interval) = if is_error {
            (&mut state.last_error, self.error_interval)
        } else {
            (&mut state.last_progress, self.progress_interval)
        };

        // Entries past their window no longer throttle anything
        map.retain(|_, last| now.duration_since(*last) < interval);

        let key = (id.clone(), msg.to_string());
        if map.contains_key(&key) {
            return false;
        }
        map.insert(key, now);
        true
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_progress.len() + state.last_error.len()
    }
}

/// Logger for one resource identity and generation
#[derive(Debug)]
pub struct ResourceLog<'a> {
    log: &'a ThrottledLog,
    id: ResourceId,
    generation: i64,
}

impl ResourceLog<'_> {
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Info level, only the first time for this resource and generation
    pub fn once(&self, msg: &str) {
        if self.log.first_time(&self.id, self.generation, msg) {
            info!(resource = %self.id, generation = self.generation, "{}", msg);
        }
    }

    /// Info level, at most once per progress interval
    pub fn progress(&self, msg: &str) {
        if self.log.due(&self.id, msg, false) {
            info!(resource = %self.id, "{}", msg);
        } else {
            debug!(resource = %self.id, "{}", msg);
        }
    }

    /// Error level, at most once per error interval
    pub fn error_throttled(&self, msg: &str) {
        if self.log.due(&self.id, msg, true) {
            error!(resource = %self.id, "{}", msg);
        } else {
            debug!(resource = %self.id, "{}", msg);
        }
    }

    /// Expected, recoverable conditions never reach error level
    pub fn retryable(&self, msg: &str) {
        debug!(resource = %self.id, "{}", msg);
    }
}
