//! Per-component install state machine

use super::uninstall::{run_uninstall, UninstallContext};
use super::{hook, probe, settle, transition, Effect, MachineState, Observation};
use crate::component::{Component, Operation};
use crate::gate::unmet_dependencies;
use crate::generation::{awaiting_install, config_changed};
use crate::outcome::{HookError, Outcome};
use crate::pass::Pass;
use crate::status::ComponentUpdate;
use keel_core::types::{ComponentState, ConditionType};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InstallState {
    #[default]
    DetermineState,
    InitDisabled,
    InitReady,
    WriteStartedStatus,
    PreInstall,
    Install,
    WaitReady,
    PostInstall,
    Complete,
    /// Disabled while installed: hand the component to the uninstall machine
    UninstallDisabled,
    End,
}

impl MachineState for InstallState {
    const END: Self = InstallState::End;

    fn successor(self) -> Self {
        match self {
            InstallState::DetermineState => InstallState::InitReady,
            InstallState::InitDisabled | InstallState::InitReady => {
                InstallState::WriteStartedStatus
            }
            InstallState::WriteStartedStatus => InstallState::PreInstall,
            InstallState::PreInstall => InstallState::Install,
            InstallState::Install => InstallState::WaitReady,
            InstallState::WaitReady => InstallState::PostInstall,
            InstallState::PostInstall => InstallState::Complete,
            InstallState::Complete | InstallState::UninstallDisabled | InstallState::End => {
                InstallState::End
            }
        }
    }
}

/// Whether the install machine runs as part of a normal pass or ahead of an upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallMode {
    #[default]
    Normal,
    PreUpgrade,
}

/// Tracker context for one component's install
#[derive(Debug, Clone, Default)]
pub struct InstallContext {
    pub state: InstallState,
    pub parked: Option<String>,
    pub uninstall: UninstallContext,
}

/// Entry state chosen from the persisted component state
pub fn choose_state(state: ComponentState) -> InstallState {
    match state {
        ComponentState::Disabled | ComponentState::Uninstalled => InstallState::InitDisabled,
        ComponentState::PreInstalling | ComponentState::Installing => {
            InstallState::WriteStartedStatus
        }
        _ => InstallState::InitReady,
    }
}

/// Whether a Ready component can be left alone
///
/// Nothing is reinstalled before the resource finished its first install,
/// when the generation has not moved, or when the component opted out of
/// override monitoring.
pub fn skip_from_ready(resource_installed: bool, changed: bool, monitor_overrides: bool) -> bool {
    !resource_installed || !changed || !monitor_overrides
}

/// Drive one component's install until it blocks or reaches End
pub(crate) async fn run_install(
    pass: &mut Pass<'_>,
    component: &dyn Component,
    cx: &mut InstallContext,
    mode: InstallMode,
) -> Outcome {
    let name = component.name().to_string();
    if let Some(reason) = &cx.parked {
        return Outcome::fatal(format!("Component {} is parked: {}", name, reason));
    }

    loop {
        let state = cx.state;
        let observed = step(pass, component, cx, mode, state).await;
        let t = transition(state, observed);
        if t.next != state {
            debug!(component = %name, from = ?state, to = ?t.next, "install transition");
        }
        cx.state = t.next;
        if let Effect::Park(reason) = &t.effect {
            cx.parked = Some(reason.clone());
        }
        if let Some(outcome) = settle(t.effect, pass, &name, &format!("{:?}", state)) {
            return outcome;
        }
    }
}

async fn step(
    pass: &mut Pass<'_>,
    component: &dyn Component,
    cx: &mut InstallContext,
    mode: InstallMode,
    state: InstallState,
) -> Observation<InstallState> {
    let name = component.name();
    let operation = match mode {
        InstallMode::Normal => Operation::Install,
        InstallMode::PreUpgrade => Operation::Upgrade,
    };

    match state {
        InstallState::DetermineState => determine_state(pass, component, mode).await,

        InstallState::InitDisabled => {
            let min = component.min_platform_version();
            let recorded = pass
                .resource
                .component_status(name)
                .map(|s| s.state)
                .unwrap_or_default();
            if mode == InstallMode::Normal
                && !awaiting_install(recorded, pass.resource.status.version.as_deref(), min)
            {
                pass.log.progress(&format!(
                    "Component {} cannot be installed until the platform is upgraded to at least version {}",
                    name,
                    min.unwrap_or_default()
                ));
                return Observation::Skip;
            }
            Observation::Advance
        }

        InstallState::InitReady => {
            let changed = pass
                .resource
                .component_status(name)
                .map(|s| config_changed(pass.generation(), s))
                .unwrap_or(false);
            let monitor = component.monitor_overrides(&pass.hook_ctx(name, operation));
            if changed && !monitor {
                pass.log.once(&format!(
                    "Skipping update for component {}, monitorChanges set to false",
                    name
                ));
            }
            if skip_from_ready(pass.resource.status.is_installed(), changed, monitor) {
                return Observation::Skip;
            }
            if !component.is_enabled(&pass.resource.spec) {
                return Observation::Branch(InstallState::UninstallDisabled);
            }
            Observation::Advance
        }

        InstallState::WriteStartedStatus => {
            let update = ComponentUpdate::Condition {
                name: name.to_string(),
                kind: ConditionType::InstallStarted,
                message: "Install started".to_string(),
                generation: pass.generation(),
                reset_reconciling: true,
                version: None,
            };
            match pass.write_components(vec![update]).await {
                Ok(()) => {
                    pass.log.once(&format!(
                        "Component {} install started for generation {}",
                        name,
                        pass.generation()
                    ));
                    Observation::Advance
                }
                Err(e) => Observation::Failed(HookError::Failed(
                    e.context("writing install started status"),
                )),
            }
        }

        InstallState::PreInstall => {
            let unmet = unmet_dependencies(component, &pass.resource.status.components);
            if !unmet.is_empty() {
                return Observation::Wait(format!(
                    "Component {} waiting for dependencies {:?} to be ready",
                    name, unmet
                ));
            }
            pass.log
                .progress(&format!("Component {} pre-install is running", name));
            hook(component.pre_install(&pass.hook_ctx(name, operation)).await)
        }

        InstallState::Install => {
            pass.log.once(&format!("Component {} install started", name));
            hook(component.install(&pass.hook_ctx(name, operation)).await)
        }

        InstallState::WaitReady => {
            let ready = component.is_ready(&pass.hook_ctx(name, operation)).await;
            let observed = probe(ready, || {
                format!(
                    "Component {} has been installed. Waiting for the component to be ready",
                    name
                )
            });
            if matches!(observed, Observation::Advance) {
                pass.log
                    .once(&format!("Component {} successfully installed", name));
            }
            observed
        }

        InstallState::PostInstall => {
            pass.log
                .once(&format!("Component {} post-install running", name));
            hook(component.post_install(&pass.hook_ctx(name, operation)).await)
        }

        InstallState::Complete => {
            let version = pass.hook_ctx(name, operation).target_version().map(String::from);
            let update = ComponentUpdate::Condition {
                name: name.to_string(),
                kind: ConditionType::InstallComplete,
                message: "Install complete".to_string(),
                generation: pass.generation(),
                reset_reconciling: false,
                version,
            };
            match pass.write_components(vec![update]).await {
                Ok(()) => Observation::Advance,
                Err(e) => Observation::Failed(HookError::Failed(
                    e.context("writing install complete status"),
                )),
            }
        }

        InstallState::UninstallDisabled => {
            let outcome = run_uninstall(pass, component, &mut cx.uninstall).await;
            if outcome.is_done() {
                Observation::Advance
            } else {
                Observation::Pending(outcome)
            }
        }

        InstallState::End => Observation::Advance,
    }
}

async fn determine_state(
    pass: &mut Pass<'_>,
    component: &dyn Component,
    mode: InstallMode,
) -> Observation<InstallState> {
    let name = component.name();
    let Some(state) = pass.resource.component_status(name).map(|s| s.state) else {
        debug!(component = %name, "No status recorded for component, skipping");
        return Observation::Skip;
    };

    // Only some components must be installed ahead of an upgrade
    if mode == InstallMode::PreUpgrade
        && (!component.should_install_before_upgrade()
            || !component.is_enabled(&pass.resource.spec))
    {
        return Observation::Skip;
    }

    if !component.is_enabled(&pass.resource.spec) {
        if !pass.settings.uninstall_disabled_components {
            pass.log
                .once(&format!("Component {} is disabled, skipping install", name));
            return Observation::Skip;
        }
        match component
            .is_installed(&pass.hook_ctx(name, Operation::Install))
            .await
        {
            Ok(true) => pass.log.once(&format!(
                "Installed component {} has been disabled, uninstalling",
                name
            )),
            Ok(false) => {
                pass.log
                    .once(&format!("Component {} is disabled, skipping install", name));
                return Observation::Skip;
            }
            Err(e) => {
                pass.log.error_throttled(&format!(
                    "Error checking installed state for component {}: {:#}",
                    name, e
                ));
                return Observation::Skip;
            }
        }
    }

    Observation::Branch(choose_state(state))
}
