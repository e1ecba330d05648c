//! Global upgrade phase machine

use super::{platform_hook, probe_failed};
use crate::component::Operation;
use crate::machine::{run_install, run_upgrade, InstallMode, UpgradeContext};
use crate::outcome::Outcome;
use crate::pass::Pass;
use crate::status::{ComponentUpdate, StatusUpdate};
use crate::tracker::TrackerEntry;
use keel_core::types::ConditionType;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpgradePhase {
    #[default]
    Start,
    InstallBeforeUpgrade,
    UpgradeComponents,
    PostUpgrade,
    WaitPostUpgradeReady,
    UpgradeDone,
    End,
}

/// Run the upgrade phases until the pass has to return
///
/// Components are upgraded one at a time in registration order; a component
/// that has not finished holds back the ones after it.
pub(crate) async fn run_upgrade_phase(
    pass: &mut Pass<'_>,
    entry: &mut TrackerEntry<UpgradePhase, UpgradeContext>,
) -> Outcome {
    let registry = pass.registry;

    loop {
        let phase = entry.phase;
        debug!(resource = %pass.log.id(), phase = ?phase, "upgrade phase");

        match phase {
            UpgradePhase::Start => {
                if pass
                    .resource
                    .status
                    .is_last_condition(ConditionType::UpgradeStarted)
                {
                    entry.phase = UpgradePhase::InstallBeforeUpgrade;
                    continue;
                }
                let target = pass.resource.spec.version.clone().unwrap_or_default();
                let update = StatusUpdate::condition(
                    ConditionType::UpgradeStarted,
                    format!("Upgrade to version {} started", target),
                );
                let outcome = pass.write_resource(update).await;
                if !matches!(outcome, Outcome::Error { .. }) {
                    pass.log
                        .once(&format!("Upgrading to version {}", target));
                    entry.phase = UpgradePhase::InstallBeforeUpgrade;
                }
                return outcome;
            }

            UpgradePhase::InstallBeforeUpgrade => {
                let mut outcome = Outcome::Done;
                for component in registry.list() {
                    let cx = &mut entry.component(component.name()).pre_upgrade;
                    let result =
                        run_install(pass, component.as_ref(), cx, InstallMode::PreUpgrade).await;
                    outcome = outcome.merge(result);
                }
                if !outcome.is_done() {
                    return outcome;
                }
                entry.phase = UpgradePhase::UpgradeComponents;
            }

            UpgradePhase::UpgradeComponents => {
                for component in registry.list() {
                    let cx = entry.component(component.name());
                    let outcome = run_upgrade(pass, component.as_ref(), cx).await;
                    if !outcome.is_done() {
                        return outcome;
                    }
                }
                entry.phase = UpgradePhase::PostUpgrade;
            }

            UpgradePhase::PostUpgrade => {
                let result = pass.platform.post_upgrade(&pass.resource).await;
                if let Some(outcome) = platform_hook(pass, "global post-upgrade", result) {
                    return outcome;
                }
                entry.phase = UpgradePhase::WaitPostUpgradeReady;
            }

            UpgradePhase::WaitPostUpgradeReady => {
                for component in registry.list() {
                    let name = component.name();
                    if !component.is_enabled(&pass.resource.spec) {
                        continue;
                    }
                    let ctx = pass.hook_ctx(name, Operation::Upgrade);
                    let waiting = match component.is_installed(&ctx).await {
                        Ok(false) => false,
                        Ok(true) => match component.is_ready(&ctx).await {
                            Ok(ready) => !ready,
                            Err(e) => {
                                return probe_failed(
                                    pass,
                                    &format!("readiness check of component {}", name),
                                    e,
                                )
                            }
                        },
                        Err(e) => {
                            return probe_failed(
                                pass,
                                &format!("install check of component {}", name),
                                e,
                            )
                        }
                    };
                    if waiting {
                        pass.log.progress(&format!(
                            "Waiting for component {} to be ready after the upgrade",
                            name
                        ));
                        return pass.requeue();
                    }
                }
                entry.phase = UpgradePhase::UpgradeDone;
            }

            UpgradePhase::UpgradeDone => {
                let generation = pass.generation();
                let target = pass.resource.spec.version.clone();
                let reconciled: Vec<ComponentUpdate> = registry
                    .list()
                    .iter()
                    .filter(|c| c.is_enabled(&pass.resource.spec))
                    .filter(|c| pass.resource.component_status(c.name()).is_some())
                    .map(|c| ComponentUpdate::Reconciled {
                        name: c.name().to_string(),
                        generation,
                        version: None,
                    })
                    .collect();

                let update = StatusUpdate::condition(
                    ConditionType::UpgradeComplete,
                    format!(
                        "Upgrade to version {} complete",
                        target.as_deref().unwrap_or_default()
                    ),
                )
                .with_version(target)
                .with_components(reconciled);
                let outcome = pass.write_resource(update).await;
                if !matches!(outcome, Outcome::Error { .. }) {
                    pass.log.once("Upgrade complete");
                    entry.phase = UpgradePhase::End;
                }
                return outcome;
            }

            UpgradePhase::End => return Outcome::Done,
        }
    }
}
