//! Global phase machines
//!
//! One machine per operation type sequences the system-wide phases and
//! drives the per-component machines. The current phase lives in the
//! operation's tracker entry; a machine that reaches `End` returns
//! [`Outcome::Done`] and the caller drops the entry.

mod install;
mod uninstall;
mod upgrade;

pub use install::{install_needed, InstallPhase};
pub use uninstall::{cleanup_namespaces, UninstallPhase};
pub use upgrade::UpgradePhase;

pub(crate) use install::run_install_phase;
pub(crate) use uninstall::run_uninstall_phase;
pub(crate) use upgrade::run_upgrade_phase;

use crate::outcome::{HookError, Outcome};
use crate::pass::Pass;

/// Map the result of a cluster-level hook, logging failures by category
///
/// Returns `None` when the hook succeeded and the phase may move on.
pub(crate) fn platform_hook(
    pass: &Pass<'_>,
    step: &str,
    result: Result<(), HookError>,
) -> Option<Outcome> {
    let err = result.err()?;
    let outcome = Outcome::from_hook_error(&err);
    let msg = format!("Error running {}: {}", step, outcome);
    match err {
        HookError::Retryable(_) => pass.log.retryable(&msg),
        HookError::Failed(_) => pass.log.error_throttled(&msg),
        HookError::Fatal(_) => pass.log.once(&msg),
    }
    Some(outcome)
}

/// Map a probe failure the way a failed hook is mapped
pub(crate) fn probe_failed(pass: &Pass<'_>, step: &str, err: anyhow::Error) -> Outcome {
    let failed = HookError::Failed(err);
    platform_hook(pass, step, Err(failed)).unwrap_or(Outcome::Done)
}
