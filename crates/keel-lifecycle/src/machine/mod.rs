//! Per-component state machines
//!
//! Each machine is an explicit state enum plus a pure [`transition`]
//! function. A driver executes the action belonging to the current state,
//! reports what it saw as an [`Observation`], and the transition decides the
//! next state and whether the pass continues, waits, retries or parks the
//! component.

mod install;
mod uninstall;
mod upgrade;

pub use install::{InstallContext, InstallMode, InstallState};
pub use uninstall::{skip_uninstall, UninstallContext, UninstallState};
pub use upgrade::{UpgradeContext, UpgradeState};

pub(crate) use install::run_install;
pub(crate) use uninstall::run_uninstall;
pub(crate) use upgrade::run_upgrade;

use crate::outcome::{HookError, Outcome, OutcomeKind};
use crate::pass::Pass;
use std::fmt::Debug;

/// A per-component state with a fixed successor and a terminal state
pub trait MachineState: Copy + Eq + Debug {
    const END: Self;

    /// State reached when the current step succeeds
    fn successor(self) -> Self;
}

/// What a driver observed while running the action for a state
#[derive(Debug)]
pub enum Observation<S> {
    /// Step done, move to the successor
    Advance,
    /// Nothing to do for this component, go to the terminal state
    Skip,
    /// Move to an explicitly chosen state
    Branch(S),
    /// Blocked on an external condition; stay and requeue
    Wait(String),
    /// A hook, probe or write failed
    Failed(HookError),
    /// Work delegated to another machine is still in progress
    Pending(Outcome),
}

/// Consequence of a transition for the current pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Continue,
    Finish,
    Wait(String),
    Retry { kind: OutcomeKind, message: String },
    Park(String),
    Return(Outcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<S> {
    pub next: S,
    pub effect: Effect,
}

/// Pure transition function shared by every component machine
pub fn transition<S: MachineState>(state: S, observed: Observation<S>) -> Transition<S> {
    if state == S::END {
        return Transition {
            next: S::END,
            effect: Effect::Finish,
        };
    }

    let (next, effect) = match observed {
        Observation::Advance => (state.successor(), Effect::Continue),
        Observation::Skip => (S::END, Effect::Continue),
        Observation::Branch(next) => (next, Effect::Continue),
        Observation::Wait(reason) => (state, Effect::Wait(reason)),
        Observation::Failed(HookError::Retryable(reason)) => (
            state,
            Effect::Retry {
                kind: OutcomeKind::Retryable,
                message: reason,
            },
        ),
        Observation::Failed(HookError::Failed(e)) => (
            state,
            Effect::Retry {
                kind: OutcomeKind::Transient,
                message: format!("{:#}", e),
            },
        ),
        Observation::Failed(HookError::Fatal(reason)) => (state, Effect::Park(reason)),
        Observation::Pending(outcome) => (state, Effect::Return(outcome)),
    };

    Transition { next, effect }
}

/// Turn an effect into the pass result, logging it the way its category demands
///
/// Returns `None` when the machine should keep stepping in this pass.
pub(crate) fn settle(
    effect: Effect,
    pass: &Pass<'_>,
    component: &str,
    step: &str,
) -> Option<Outcome> {
    match effect {
        Effect::Continue => None,
        Effect::Finish => Some(Outcome::Done),
        Effect::Wait(reason) => {
            pass.log.progress(&reason);
            Some(pass.requeue())
        }
        Effect::Retry { kind, message } => {
            let msg = format!("Error running {} for component {}: {}", step, component, message);
            if kind == OutcomeKind::Retryable {
                pass.log.retryable(&msg);
            } else {
                pass.log.error_throttled(&msg);
            }
            Some(Outcome::error(kind, msg))
        }
        Effect::Park(reason) => {
            let msg = format!(
                "Component {} parked at {} until the spec changes: {}",
                component, step, reason
            );
            pass.log.once(&msg);
            Some(Outcome::fatal(msg))
        }
        Effect::Return(outcome) => Some(outcome),
    }
}

/// Map a probe result onto an observation
pub(crate) fn probe<S>(result: anyhow::Result<bool>, waiting: impl FnOnce() -> String) -> Observation<S> {
    match result {
        Ok(true) => Observation::Advance,
        Ok(false) => Observation::Wait(waiting()),
        Err(e) => Observation::Failed(HookError::Failed(e)),
    }
}

/// Map a hook result onto an observation
pub(crate) fn hook<S>(result: Result<(), HookError>) -> Observation<S> {
    match result {
        Ok(()) => Observation::Advance,
        Err(e) => Observation::Failed(e),
    }
}
