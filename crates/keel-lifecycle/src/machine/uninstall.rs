//! Per-component uninstall state machine

use super::{hook, settle, transition, Effect, MachineState, Observation};
use crate::component::{Component, Operation};
use crate::outcome::{HookError, Outcome};
use crate::pass::Pass;
use crate::status::ComponentUpdate;
use keel_core::types::{ComponentState, ConditionType};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UninstallState {
    #[default]
    Start,
    CheckExists,
    WriteStartedStatus,
    PreUninstall,
    Uninstall,
    WaitUninstalled,
    PostUninstall,
    Complete,
    End,
}

impl MachineState for UninstallState {
    const END: Self = UninstallState::End;

    fn successor(self) -> Self {
        match self {
            UninstallState::Start => UninstallState::CheckExists,
            UninstallState::CheckExists => UninstallState::WriteStartedStatus,
            UninstallState::WriteStartedStatus => UninstallState::PreUninstall,
            UninstallState::PreUninstall => UninstallState::Uninstall,
            UninstallState::Uninstall => UninstallState::WaitUninstalled,
            UninstallState::WaitUninstalled => UninstallState::PostUninstall,
            UninstallState::PostUninstall => UninstallState::Complete,
            UninstallState::Complete | UninstallState::End => UninstallState::End,
        }
    }
}

/// Tracker context for one component's uninstall
#[derive(Debug, Clone, Default)]
pub struct UninstallContext {
    pub state: UninstallState,
    pub parked: Option<String>,
}

/// Whether the uninstall of a component must be skipped outright
///
/// Components without operator-driven uninstall, components whose lifecycle
/// belongs to another owner, and the component that provisioned the cluster
/// are never torn down.
pub fn skip_uninstall(
    name: &str,
    supports_operator_uninstall: bool,
    external_owner: bool,
    provisioner: Option<&str>,
) -> bool {
    !supports_operator_uninstall || external_owner || provisioner == Some(name)
}

/// Next step when a component is already gone
///
/// A component that never got installed needs no status change; one recorded
/// as installed still gets its UninstallComplete condition.
pub fn when_absent(recorded: Option<ComponentState>) -> Observation<UninstallState> {
    match recorded {
        None | Some(ComponentState::Disabled) | Some(ComponentState::Uninstalled) => {
            Observation::Skip
        }
        Some(_) => Observation::Branch(UninstallState::Complete),
    }
}

/// Drive one component's uninstall until it blocks or reaches End
pub(crate) async fn run_uninstall(
    pass: &mut Pass<'_>,
    component: &dyn Component,
    cx: &mut UninstallContext,
) -> Outcome {
    let name = component.name().to_string();
    if let Some(reason) = &cx.parked {
        return Outcome::fatal(format!("Component {} is parked: {}", name, reason));
    }

    loop {
        let state = cx.state;
        let observed = step(pass, component, state).await;
        let t = transition(state, observed);
        if t.next != state {
            debug!(component = %name, from = ?state, to = ?t.next, "uninstall transition");
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
    state: UninstallState,
) -> Observation<UninstallState> {
    let name = component.name();
    let op = Operation::Uninstall;

    match state {
        UninstallState::Start => {
            let provisioner = match pass.platform.cluster_provisioner().await {
                Ok(p) => p,
                Err(e) => return Observation::Failed(HookError::Failed(e)),
            };
            if skip_uninstall(
                name,
                component.supports_operator_uninstall(),
                component.should_use_external_owner(),
                provisioner.as_deref(),
            ) {
                pass.log
                    .once(&format!("Component {} is not uninstalled by keel", name));
                return Observation::Skip;
            }
            Observation::Advance
        }

        UninstallState::CheckExists => {
            match component.exists(&pass.hook_ctx(name, op)).await {
                Ok(true) => Observation::Advance,
                Ok(false) => when_absent(pass.resource.component_status(name).map(|s| s.state)),
                Err(e) => Observation::Failed(HookError::Failed(e)),
            }
        }

        UninstallState::WriteStartedStatus => {
            write_condition(pass, name, ConditionType::UninstallStarted, "Uninstall started")
                .await
        }

        UninstallState::PreUninstall => {
            pass.log
                .once(&format!("Component {} pre-uninstall running", name));
            hook(component.pre_uninstall(&pass.hook_ctx(name, op)).await)
        }

        UninstallState::Uninstall => {
            pass.log.once(&format!("Component {} uninstall running", name));
            hook(component.uninstall(&pass.hook_ctx(name, op)).await)
        }

        UninstallState::WaitUninstalled => {
            match component.exists(&pass.hook_ctx(name, op)).await {
                Ok(false) => Observation::Advance,
                Ok(true) => Observation::Wait(format!(
                    "Waiting for component {} to be uninstalled",
                    name
                )),
                Err(e) => Observation::Failed(HookError::Failed(e)),
            }
        }

        UninstallState::PostUninstall => {
            pass.log
                .once(&format!("Component {} post-uninstall running", name));
            hook(component.post_uninstall(&pass.hook_ctx(name, op)).await)
        }

        UninstallState::Complete => {
            let observed = write_condition(
                pass,
                name,
                ConditionType::UninstallComplete,
                "Uninstall complete",
            )
            .await;
            if matches!(observed, Observation::Advance) {
                pass.log
                    .once(&format!("Component {} successfully uninstalled", name));
            }
            observed
        }

        UninstallState::End => Observation::Advance,
    }
}

async fn write_condition(
    pass: &mut Pass<'_>,
    name: &str,
    kind: ConditionType,
    message: &str,
) -> Observation<UninstallState> {
    let update = ComponentUpdate::Condition {
        name: name.to_string(),
        kind,
        message: message.to_string(),
        generation: pass.generation(),
        reset_reconciling: kind == ConditionType::UninstallStarted,
        version: None,
    };
    match pass.write_components(vec![update]).await {
        Ok(()) => Observation::Advance,
        Err(e) => Observation::Failed(HookError::Failed(
            e.context(format!("writing {} status", kind)),
        )),
    }
}
