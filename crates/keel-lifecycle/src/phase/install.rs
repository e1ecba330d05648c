//! Global install phase machine

use super::{platform_hook, probe_failed};
use crate::component::{Component, Operation};
use crate::generation::{awaiting_install, config_changed, is_version_ok};
use crate::machine::{run_install, InstallContext, InstallMode};
use crate::outcome::Outcome;
use crate::pass::Pass;
use crate::status::{ComponentUpdate, StatusUpdate};
use crate::tracker::TrackerEntry;
use keel_core::types::{ComponentState, ConditionType, ManagedResource};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InstallPhase {
    #[default]
    ReconcileWatchedComponents,
    DecideUpdateNeeded,
    SetGlobalInstallingStatus,
    PreInstall,
    InstallAllComponents,
    WaitExternallyManagedReady,
    PostInstall,
    CheckInstallComplete,
    End,
}

/// Whether a resource in its steady Ready state needs an install pass
///
/// True before the first install has completed, when any enabled component
/// saw a generation it has not reconciled, or when an enabled component is
/// still not installed although the platform version now allows it.
pub fn install_needed(
    resource: &ManagedResource,
    components: &[&dyn Component],
    uninstall_disabled: bool,
) -> bool {
    if !resource.status.is_installed() {
        return true;
    }

    let generation = resource.generation();
    components.iter().any(|c| {
        let enabled = c.is_enabled(&resource.spec);
        let Some(status) = resource.component_status(c.name()) else {
            return false;
        };

        if (enabled || uninstall_disabled) && config_changed(generation, status) {
            return true;
        }

        enabled
            && !c.should_use_external_owner()
            && awaiting_install(
                status.state,
                resource.status.version.as_deref(),
                c.min_platform_version(),
            )
    })
}

/// Run the install phases until the pass has to return
pub(crate) async fn run_install_phase(
    pass: &mut Pass<'_>,
    entry: &mut TrackerEntry<InstallPhase, InstallContext>,
) -> Outcome {
    let registry = pass.registry;

    loop {
        let phase = entry.phase;
        debug!(resource = %pass.log.id(), phase = ?phase, "install phase");

        match phase {
            InstallPhase::ReconcileWatchedComponents => {
                let id = pass.id();
                for component in registry.list() {
                    let name = component.name();
                    if !pass.watches.is_watched(&id, name) {
                        continue;
                    }
                    pass.log
                        .once(&format!("Reconciling watched component {}", name));
                    let result = component
                        .reconcile(&pass.hook_ctx(name, Operation::Install))
                        .await;
                    // The flag is cleared even on failure; the regular pass retries
                    platform_hook(pass, &format!("reconcile of component {}", name), result);
                    pass.watches.clear(&id, name);
                }
                entry.phase = InstallPhase::DecideUpdateNeeded;
            }

            InstallPhase::DecideUpdateNeeded => {
                if !pass.resource.status.is_ready() {
                    entry.phase = InstallPhase::PreInstall;
                    continue;
                }
                let components: Vec<&dyn Component> =
                    registry.list().iter().map(|c| c.as_ref()).collect();
                if install_needed(
                    &pass.resource,
                    &components,
                    pass.settings.uninstall_disabled_components,
                ) {
                    entry.phase = InstallPhase::SetGlobalInstallingStatus;
                } else {
                    entry.phase = InstallPhase::End;
                }
            }

            InstallPhase::SetGlobalInstallingStatus => {
                let version = match &pass.resource.status.version {
                    Some(_) => None,
                    None => pass.resource.spec.version.clone(),
                };
                let update = StatusUpdate::condition(
                    ConditionType::InstallStarted,
                    format!("Install started for generation {}", pass.generation()),
                )
                .with_version(version);
                let outcome = pass.write_resource(update).await;
                if !matches!(outcome, Outcome::Error { .. }) {
                    pass.log.once("Install started");
                    entry.phase = InstallPhase::PreInstall;
                }
                return outcome;
            }

            InstallPhase::PreInstall => {
                let result = pass.platform.pre_install(&pass.resource).await;
                if let Some(outcome) = platform_hook(pass, "global pre-install", result) {
                    return outcome;
                }
                entry.phase = InstallPhase::InstallAllComponents;
            }

            InstallPhase::InstallAllComponents => {
                // Every component gets a chance to progress, even when one is stuck
                let mut outcome = Outcome::Done;
                for component in registry.list() {
                    if component.should_use_external_owner() {
                        continue;
                    }
                    let cx = entry.component(component.name());
                    let result =
                        run_install(pass, component.as_ref(), cx, InstallMode::Normal).await;
                    outcome = outcome.merge(result);
                }
                if !outcome.is_done() {
                    return outcome;
                }
                entry.phase = InstallPhase::WaitExternallyManagedReady;
            }

            InstallPhase::WaitExternallyManagedReady => {
                for component in registry.list() {
                    let name = component.name();
                    if !component.should_use_external_owner()
                        || !component.is_enabled(&pass.resource.spec)
                    {
                        continue;
                    }
                    match component
                        .is_ready(&pass.hook_ctx(name, Operation::Install))
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => {
                            pass.log.progress(&format!(
                                "Waiting for externally managed component {} to be ready",
                                name
                            ));
                            return pass.requeue();
                        }
                        Err(e) => {
                            return probe_failed(
                                pass,
                                &format!("readiness check of component {}", name),
                                e,
                            )
                        }
                    }
                }
                entry.phase = InstallPhase::PostInstall;
            }

            InstallPhase::PostInstall => {
                // Cross-component glue only runs when updating an installed platform
                if pass.resource.status.is_installed() {
                    let result = pass.platform.post_install(&pass.resource).await;
                    if let Some(outcome) = platform_hook(pass, "global post-install", result) {
                        return outcome;
                    }
                }
                entry.phase = InstallPhase::CheckInstallComplete;
            }

            InstallPhase::CheckInstallComplete => {
                let pending = pending_components(pass);
                if !pending.is_empty() {
                    pass.log.progress(&format!(
                        "Waiting for components {:?} to be ready",
                        pending
                    ));
                    return pass.requeue();
                }

                let generation = pass.generation();
                let reconciled: Vec<ComponentUpdate> = registry
                    .list()
                    .iter()
                    .filter(|c| c.is_enabled(&pass.resource.spec))
                    .filter_map(|c| pass.resource.component_status(c.name()))
                    .filter(|s| s.state == ComponentState::Ready && s.reconciling_generation == 0)
                    .map(|s| ComponentUpdate::Reconciled {
                        name: s.name.clone(),
                        generation,
                        version: None,
                    })
                    .collect();

                let update = StatusUpdate::condition(
                    ConditionType::InstallComplete,
                    format!("Install complete for generation {}", generation),
                )
                .with_components(reconciled);
                let outcome = pass.write_resource(update).await;
                if !matches!(outcome, Outcome::Error { .. }) {
                    pass.log.once("Install complete");
                    entry.phase = InstallPhase::End;
                }
                return outcome;
            }

            InstallPhase::End => return Outcome::Done,
        }
    }
}

/// Enabled operator-driven components that are not Ready yet
///
/// Components still waiting for a platform upgrade are not counted.
fn pending_components(pass: &Pass<'_>) -> Vec<String> {
    let resource = &pass.resource;
    pass.registry
        .list()
        .iter()
        .filter(|c| c.is_enabled(&resource.spec) && !c.should_use_external_owner())
        .filter(|c| is_version_ok(resource.status.version.as_deref(), c.min_platform_version()))
        .filter(|c| {
            resource
                .component_status(c.name())
                .map(|s| s.state != ComponentState::Ready)
                .unwrap_or(true)
        })
        .map(|c| c.name().to_string())
        .collect()
}
