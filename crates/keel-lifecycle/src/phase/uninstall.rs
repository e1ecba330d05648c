//! Global uninstall phase machine

use super::{platform_hook, probe_failed};
use crate::machine::{run_uninstall, skip_uninstall, UninstallContext};
use crate::outcome::{Outcome, OutcomeKind};
use crate::pass::Pass;
use crate::registry::ComponentRegistry;
use crate::status::StatusUpdate;
use crate::tracker::TrackerEntry;
use keel_core::types::ConditionType;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UninstallPhase {
    #[default]
    Start,
    RemoveCoOwnedResources,
    UninstallComponents,
    Cleanup,
    Done,
    End,
}

/// Namespaces removed once every component is gone
///
/// Shared namespaces are added to the component namespaces. Any namespace
/// claimed by a component keel does not tear down (the provisioner, externally
/// owned components, components without operator uninstall) is left in place,
/// even when other components or the shared list name it too.
pub fn cleanup_namespaces(
    registry: &ComponentRegistry,
    shared: &[String],
    provisioner: Option<&str>,
) -> BTreeSet<String> {
    let (kept, removed): (Vec<_>, Vec<_>) = registry.list().iter().partition(|c| {
        skip_uninstall(
            c.name(),
            c.supports_operator_uninstall(),
            c.should_use_external_owner(),
            provisioner,
        )
    });
    let protected: BTreeSet<&str> = kept.iter().map(|c| c.namespace()).collect();

    removed
        .iter()
        .map(|c| c.namespace().to_string())
        .chain(shared.iter().cloned())
        .filter(|ns| !protected.contains(ns.as_str()))
        .collect()
}

/// Run the uninstall phases until the pass has to return
///
/// Components are torn down one at a time in reverse registration order.
pub(crate) async fn run_uninstall_phase(
    pass: &mut Pass<'_>,
    entry: &mut TrackerEntry<UninstallPhase, UninstallContext>,
) -> Outcome {
    let registry = pass.registry;

    loop {
        let phase = entry.phase;
        debug!(resource = %pass.log.id(), phase = ?phase, "uninstall phase");

        match phase {
            UninstallPhase::Start => {
                let status = &pass.resource.status;
                if status.is_last_condition(ConditionType::UninstallComplete) {
                    entry.phase = UninstallPhase::End;
                    continue;
                }
                if status.is_last_condition(ConditionType::UninstallStarted) {
                    entry.phase = UninstallPhase::RemoveCoOwnedResources;
                    continue;
                }
                let update =
                    StatusUpdate::condition(ConditionType::UninstallStarted, "Uninstall started");
                let outcome = pass.write_resource(update).await;
                if !matches!(outcome, Outcome::Error { .. }) {
                    pass.log.once("Uninstall started");
                    entry.phase = UninstallPhase::RemoveCoOwnedResources;
                }
                return outcome;
            }

            UninstallPhase::RemoveCoOwnedResources => {
                let provisioner = match pass.platform.cluster_provisioner().await {
                    Ok(p) => p,
                    Err(e) => return probe_failed(pass, "cluster provisioner lookup", e),
                };
                match provisioner {
                    Some(owner) => {
                        pass.log.once(&format!(
                            "Cluster was provisioned by {}, leaving co-owned resources in place",
                            owner
                        ));
                    }
                    None => {
                        let result = pass.platform.remove_co_owned_resources(&pass.resource).await;
                        if let Some(outcome) =
                            platform_hook(pass, "removal of co-owned resources", result)
                        {
                            return outcome;
                        }
                    }
                }
                entry.phase = UninstallPhase::UninstallComponents;
            }

            UninstallPhase::UninstallComponents => {
                for component in registry.list().iter().rev() {
                    let cx = entry.component(component.name());
                    let outcome = run_uninstall(pass, component.as_ref(), cx).await;
                    if !outcome.is_done() {
                        return outcome;
                    }
                }
                pass.log.once("All components uninstalled");
                entry.phase = UninstallPhase::Cleanup;
            }

            UninstallPhase::Cleanup => {
                let provisioner = match pass.platform.cluster_provisioner().await {
                    Ok(p) => p,
                    Err(e) => return probe_failed(pass, "cluster provisioner lookup", e),
                };
                let namespaces = cleanup_namespaces(
                    registry,
                    &pass.settings.shared_namespaces,
                    provisioner.as_deref(),
                );

                let mut remaining = Vec::new();
                for ns in &namespaces {
                    match pass.platform.namespace_exists(ns).await {
                        Ok(false) => {}
                        Ok(true) => {
                            if !entry.deleting.contains(ns) {
                                if let Err(e) = pass.platform.delete_namespace(ns).await {
                                    let msg = format!("Failed deleting namespace {}: {:#}", ns, e);
                                    pass.log.error_throttled(&msg);
                                    return Outcome::error(OutcomeKind::Transient, msg);
                                }
                                entry.deleting.insert(ns.clone());
                            }
                            remaining.push(ns.clone());
                        }
                        Err(e) => {
                            return probe_failed(pass, &format!("lookup of namespace {}", ns), e)
                        }
                    }
                }

                if !remaining.is_empty() {
                    pass.log.progress(&format!(
                        "Waiting for namespaces {:?} to terminate",
                        remaining
                    ));
                    return pass.requeue();
                }
                entry.phase = UninstallPhase::Done;
            }

            UninstallPhase::Done => {
                let update =
                    StatusUpdate::condition(ConditionType::UninstallComplete, "Uninstall complete");
                let outcome = pass.write_resource(update).await;
                if !matches!(outcome, Outcome::Error { .. }) {
                    pass.log.once("Uninstall complete");
                    entry.phase = UninstallPhase::End;
                }
                return outcome;
            }

            UninstallPhase::End => {
                if let Err(e) = pass.store.finalize(&pass.id()).await {
                    let msg = format!("Failed finalizing resource: {:#}", e);
                    pass.log.error_throttled(&msg);
                    return Outcome::error(OutcomeKind::Transient, msg);
                }
                return Outcome::Done;
            }
        }
    }
}
