//! Controller loop
//!
//! Re-enters the reconciler for a resource until it settles, a pass limit is
//! hit, or shutdown is signalled. Passes for the same resource identity are
//! serialised by the reconciler's per-key lock; different identities can be
//! driven concurrently with [`Controller::run_all`].

use crate::outcome::{Outcome, OutcomeKind};
use crate::reconciler::Reconciler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Why a controller loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A pass returned Done
    Settled,
    /// A component is parked until the spec changes
    Parked,
    MaxPasses,
    Shutdown,
}

/// Result of driving one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub namespace: String,
    pub name: String,
    pub passes: u64,
    pub last: Outcome,
    pub reason: StopReason,
}

/// Repeatedly reconciles resources, sleeping for the delay each pass asks for
#[derive(Clone)]
pub struct Controller {
    reconciler: Arc<Reconciler>,
    idle_interval: Duration,
    max_passes: u64,
    until_settled: bool,
}

impl Controller {
    pub fn new(reconciler: Arc<Reconciler>, idle_interval: Duration) -> Self {
        Self {
            reconciler,
            idle_interval,
            max_passes: 0,
            until_settled: false,
        }
    }

    /// Stop after `max_passes` passes; 0 means unbounded
    pub fn with_max_passes(mut self, max_passes: u64) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Return as soon as a pass is Done instead of polling every idle interval
    pub fn until_settled(mut self, until_settled: bool) -> Self {
        self.until_settled = until_settled;
        self
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Drive `namespace/name` until it stops for one of the [`StopReason`]s
    pub async fn run(
        &self,
        namespace: &str,
        name: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> RunSummary {
        let mut passes = 0u64;
        let mut last = Outcome::Done;

        let reason = loop {
            if *shutdown.borrow() {
                break StopReason::Shutdown;
            }
            if self.max_passes > 0 && passes >= self.max_passes {
                warn!(
                    resource = %format!("{}/{}", namespace, name),
                    "Stopping after {} passes without settling", passes
                );
                break StopReason::MaxPasses;
            }

            last = self.reconciler.reconcile(namespace, name).await;
            passes += 1;
            debug!(pass = passes, outcome = %last, "Reconcile pass finished");

            let delay = match &last {
                Outcome::Done if self.until_settled => break StopReason::Settled,
                Outcome::Done => self.idle_interval,
                Outcome::RequeueAfter(delay) => *delay,
                Outcome::Error {
                    kind: OutcomeKind::Fatal,
                    ..
                } if self.until_settled => break StopReason::Parked,
                Outcome::Error {
                    kind: OutcomeKind::Fatal,
                    ..
                } => self.idle_interval,
                Outcome::Error { .. } => self.reconciler.settings().requeue.delay(),
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender dropped: nobody can signal shutdown any more
                        tokio::time::sleep(delay).await;
                    } else if *shutdown.borrow() {
                        break StopReason::Shutdown;
                    }
                }
            }
        };

        info!(
            resource = %format!("{}/{}", namespace, name),
            passes,
            reason = ?reason,
            "Controller loop stopped"
        );
        RunSummary {
            namespace: namespace.to_string(),
            name: name.to_string(),
            passes,
            last,
            reason,
        }
    }

    /// Drive several resources concurrently, one task per identity
    pub async fn run_all(
        &self,
        resources: Vec<(String, String)>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<RunSummary> {
        let mut tasks = JoinSet::new();
        for (namespace, name) in resources {
            let controller = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { controller.run(&namespace, &name, shutdown).await });
        }

        let mut summaries = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!("Controller task failed: {}", e),
            }
        }
        summaries.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        summaries
    }
}
