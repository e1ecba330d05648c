//! Reconcile command: one pass over one resource

use anyhow::{bail, Result};
use keel_lifecycle::{Outcome, OutcomeKind};

use crate::cli::{GlobalArgs, ReconcileArgs, ResourceArgs};
use crate::output;
use crate::utils;

pub async fn run(args: ReconcileArgs, global: &GlobalArgs) -> Result<()> {
    let config = utils::load_config(global)?;
    let reconciler = utils::build_reconciler(global, &config)?;

    let ResourceArgs { namespace, name } = args.resource;
    let outcome = reconciler.reconcile(&namespace, &name).await;

    match outcome {
        Outcome::Done => output::success(&format!("{}/{} is settled", namespace, name)),
        Outcome::RequeueAfter(delay) => output::info(&format!(
            "{}/{} in progress, next pass in {:?}",
            namespace, name, delay
        )),
        Outcome::Error {
            kind: OutcomeKind::Fatal,
            message,
        } => bail!("{}/{} parked: {}", namespace, name, message),
        Outcome::Error { kind, message } => {
            output::warning(&format!("{}/{} {} error: {}", namespace, name, kind, message))
        }
    }

    Ok(())
}
