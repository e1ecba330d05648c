//! Run command: drive resources through the controller loop

use anyhow::Result;
use keel_lifecycle::{Controller, Outcome, RunSummary, StopReason};
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};
use tokio::sync::watch;

use crate::cli::{GlobalArgs, RunArgs};
use crate::output;
use crate::utils;

#[derive(Tabled)]
struct SummaryRow {
    namespace: String,
    name: String,
    passes: u64,
    #[tabled(rename = "stopped")]
    reason: String,
    #[tabled(rename = "last outcome")]
    last: String,
}

pub async fn run(args: RunArgs, global: &GlobalArgs) -> Result<()> {
    let config = utils::load_config(global)?;
    let reconciler = Arc::new(utils::build_reconciler(global, &config)?);

    let max_passes = args
        .max_passes
        .unwrap_or(config.config.controller.max_passes);
    let controller = Controller::new(reconciler, config.idle_interval())
        .with_max_passes(max_passes)
        .until_settled(!args.watch);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, finishing the current pass");
            let _ = shutdown_tx.send(true);
        }
    });

    let summaries = match args.name {
        Some(name) => vec![controller.run(&args.namespace, &name, shutdown_rx).await],
        None => {
            let store = utils::resource_store(global)?;
            let targets: Vec<(String, String)> = store
                .list()?
                .into_iter()
                .filter(|r| !r.metadata.finalized)
                .map(|r| (r.metadata.namespace, r.metadata.name))
                .collect();
            if targets.is_empty() {
                output::info(&format!("No resources to reconcile in {}", store.dir()));
                return Ok(());
            }
            controller.run_all(targets, shutdown_rx).await
        }
    };

    report(&summaries);

    if summaries.iter().any(|s| s.reason == StopReason::Parked) {
        anyhow::bail!("One or more resources are parked until their spec changes");
    }
    Ok(())
}

fn report(summaries: &[RunSummary]) {
    if let [summary] = summaries {
        let id = format!("{}/{}", summary.namespace, summary.name);
        match summary.reason {
            StopReason::Settled => output::success(&format!(
                "{} settled after {} passes",
                id, summary.passes
            )),
            StopReason::Parked => {
                output::error(&format!("{} parked: {}", id, describe(&summary.last)))
            }
            StopReason::MaxPasses => output::warning(&format!(
                "{} stopped after {} passes: {}",
                id,
                summary.passes,
                describe(&summary.last)
            )),
            StopReason::Shutdown => output::info(&format!(
                "{} interrupted after {} passes",
                id, summary.passes
            )),
        }
        return;
    }

    let rows: Vec<SummaryRow> = summaries
        .iter()
        .map(|s| SummaryRow {
            namespace: s.namespace.clone(),
            name: s.name.clone(),
            passes: s.passes,
            reason: format!("{:?}", s.reason),
            last: describe(&s.last),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{}", table);
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Done => "done".to_string(),
        Outcome::RequeueAfter(delay) => format!("requeue after {:?}", delay),
        Outcome::Error { kind, message } => format!("{} error: {}", kind, message),
    }
}
