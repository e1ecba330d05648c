//! Pass outcomes and hook errors
//!
//! Every state-machine step returns an [`Outcome`]; every component hook
//! returns a [`HookError`] on failure. The mapping between the two is done
//! in one place ([`Outcome::from_hook_error`]) so all call sites agree on
//! what is retried quietly, what is logged, and what parks a component.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a component hook
#[derive(Error, Debug)]
pub enum HookError {
    /// Expected, recoverable condition; retried without error logging
    #[error("retryable: {0}")]
    Retryable(String),

    /// Unexpected failure; logged (throttled) and retried
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// Configuration or version problem; the component is parked until the spec changes
    #[error("fatal: {0}")]
    Fatal(String),
}

impl HookError {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            HookError::Retryable(_) => OutcomeKind::Retryable,
            HookError::Failed(_) => OutcomeKind::Transient,
            HookError::Fatal(_) => OutcomeKind::Fatal,
        }
    }
}

/// Error category carried by [`Outcome::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Retryable,
    Transient,
    Fatal,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeKind::Retryable => "retryable",
            OutcomeKind::Transient => "transient",
            OutcomeKind::Fatal => "fatal",
        };
        write!(f, "{}", s)
    }
}

/// Result of a reconcile pass or of a single state-machine step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do for now
    Done,

    /// Incomplete; re-enter after the given delay
    RequeueAfter(Duration),

    /// A step failed; Retryable and Transient are retried, Fatal waits for a spec change
    Error { kind: OutcomeKind, message: String },
}

impl Outcome {
    pub fn error(kind: OutcomeKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::error(OutcomeKind::Fatal, message)
    }

    pub fn from_hook_error(err: &HookError) -> Self {
        let message = match err {
            HookError::Retryable(reason) | HookError::Fatal(reason) => reason.clone(),
            HookError::Failed(e) => format!("{:#}", e),
        };
        Self::error(err.kind(), message)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done)
    }

    /// Whether the caller should run another pass soon
    pub fn should_requeue(&self) -> bool {
        match self {
            Outcome::Done => false,
            Outcome::RequeueAfter(_) => true,
            Outcome::Error { kind, .. } => *kind != OutcomeKind::Fatal,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Outcome::Done => 0,
            Outcome::Error {
                kind: OutcomeKind::Fatal,
                ..
            } => 1,
            Outcome::RequeueAfter(_) => 2,
            Outcome::Error {
                kind: OutcomeKind::Retryable,
                ..
            } => 3,
            Outcome::Error {
                kind: OutcomeKind::Transient,
                ..
            } => 4,
        }
    }

    /// Combine the outcomes of independent steps run in the same pass
    ///
    /// Anything that asks for a requeue wins over a parked component, and a
    /// parked component wins over `Done`.
    pub fn merge(self, other: Outcome) -> Outcome {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Done => write!(f, "done"),
            Outcome::RequeueAfter(d) => write!(f, "requeue after {}ms", d.as_millis()),
            Outcome::Error { kind, message } => write!(f, "{} error: {}", kind, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_hook_error_mapping() {
        let o = Outcome::from_hook_error(&HookError::retryable("waiting on webhook"));
        assert_eq!(o, Outcome::error(OutcomeKind::Retryable, "waiting on webhook"));
        assert!(o.should_requeue());

        let o = Outcome::from_hook_error(&HookError::Failed(anyhow!("helm exited 1")));
        assert!(matches!(
            o,
            Outcome::Error {
                kind: OutcomeKind::Transient,
                ..
            }
        ));

        let o = Outcome::from_hook_error(&HookError::fatal("bad override"));
        assert!(!o.should_requeue());
    }

    #[test]
    fn test_merge_prefers_requeue_over_parked() {
        let requeue = Outcome::RequeueAfter(Duration::from_secs(3));
        let parked = Outcome::fatal("bad override");

        assert_eq!(Outcome::Done.merge(parked.clone()), parked);
        assert_eq!(parked.clone().merge(requeue.clone()), requeue);
        assert_eq!(requeue.clone().merge(Outcome::Done), requeue);
    }
}
