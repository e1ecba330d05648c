//! Requeue delay policy
//!
//! A pass that cannot finish asks to be re-entered "after a short delay".
//! The delay is drawn uniformly from a configured window so that many
//! resources requeued at once do not all wake in lockstep.

use crate::types::RequeueConfig;
use rand::Rng;
use std::time::Duration;

/// Delay window for requeued passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeuePolicy {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self::from(&RequeueConfig::default())
    }
}

impl From<&RequeueConfig> for RequeuePolicy {
    fn from(config: &RequeueConfig) -> Self {
        Self::new(config.min_delay_ms, config.max_delay_ms)
    }
}

impl RequeuePolicy {
    /// Create a policy; bounds given in the wrong order are swapped
    pub fn new(min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            min_delay_ms: min_delay_ms.min(max_delay_ms),
            max_delay_ms: max_delay_ms.max(min_delay_ms),
        }
    }

    /// A policy that always requeues immediately
    pub fn immediate() -> Self {
        Self::new(0, 0)
    }

    /// Pick the delay for the next requeue
    ///
    /// # Example
    ///
    /// ```rust
    /// use keel_core::RequeuePolicy;
    ///
    /// let policy = RequeuePolicy::new(3000, 5000);
    /// let delay = policy.delay();
    /// assert!(delay.as_millis() >= 3000 && delay.as_millis() <= 5000);
    /// ```
    pub fn delay(&self) -> Duration {
        if self.min_delay_ms == self.max_delay_ms {
            return Duration::from_millis(self.min_delay_ms);
        }
        let ms = rand::rng().random_range(self.min_delay_ms..=self.max_delay_ms);
        Duration::from_millis(ms)
    }
}
