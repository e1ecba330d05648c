//! Per-component upgrade state machine

use super::install::InstallContext;
use super::{hook, probe, settle, transition, Effect, MachineState, Observation};
use crate::component::{Component, Operation};
use crate::outcome::{HookError, Outcome};
use crate::pass::Pass;
use crate::status::ComponentUpdate;
use keel_core::types::{ComponentState, ComponentStatus, ConditionType};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpgradeState {
    #[default]
    Start,
    WriteStartedStatus,
    PreUpgrade,
    Upgrade,
    WaitReady,
    PostUpgrade,
    Complete,
    End,
}

impl MachineState for UpgradeState {
    const END: Self = UpgradeState::End;

    fn successor(self) -> Self {
        match self {
            UpgradeState::Start => UpgradeState::WriteStartedStatus,
            UpgradeState::WriteStartedStatus => UpgradeState::PreUpgrade,
            UpgradeState::PreUpgrade => UpgradeState::Upgrade,
            UpgradeState::Upgrade => UpgradeState::WaitReady,
            UpgradeState::WaitReady => UpgradeState::PostUpgrade,
            UpgradeState::PostUpgrade => UpgradeState::Complete,
            UpgradeState::Complete | UpgradeState::End => UpgradeState::End,
        }
    }
}

/// Tracker context for one component's upgrade
///
/// `pre_upgrade` carries the install machine used when the component has to
/// be installed before the rest of the platform is upgraded.
#[derive(Debug, Clone, Default)]
pub struct UpgradeContext {
    pub state: UpgradeState,
    pub parked: Option<String>,
    pub pre_upgrade: InstallContext,
}

/// Whether a component's recorded version already matches the upgrade target
pub fn already_upgraded(status: Option<&ComponentStatus>, target: Option<&str>) -> bool {
    match (status, target) {
        (Some(s), Some(target)) => {
            s.state == ComponentState::Ready && s.version.as_deref() == Some(target)
        }
        _ => false,
    }
}

/// Drive one component's upgrade until it blocks or reaches End
pub(crate) async fn run_upgrade(
    pass: &mut Pass<'_>,
    component: &dyn Component,
    cx: &mut UpgradeContext,
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
            debug!(component = %name, from = ?state, to = ?t.next, "upgrade transition");
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
    state: UpgradeState,
) -> Observation<UpgradeState> {
    let name = component.name();
    let op = Operation::Upgrade;

    match state {
        UpgradeState::Start => {
            if !component.is_enabled(&pass.resource.spec) || component.should_use_external_owner()
            {
                return Observation::Skip;
            }
            let target = pass.hook_ctx(name, op).target_version();
            if already_upgraded(pass.resource.component_status(name), target) {
                debug!(component = %name, "Component already at the target version");
                return Observation::Skip;
            }
            match component.is_installed(&pass.hook_ctx(name, op)).await {
                Ok(true) => Observation::Advance,
                Ok(false) => {
                    pass.log.once(&format!(
                        "Component {} is not installed, skipping upgrade",
                        name
                    ));
                    Observation::Skip
                }
                Err(e) => Observation::Failed(HookError::Failed(e)),
            }
        }

        UpgradeState::WriteStartedStatus => {
            let update = ComponentUpdate::Condition {
                name: name.to_string(),
                kind: ConditionType::UpgradeStarted,
                message: "Upgrade started".to_string(),
                generation: pass.generation(),
                reset_reconciling: true,
                version: None,
            };
            match pass.write_components(vec![update]).await {
                Ok(()) => Observation::Advance,
                Err(e) => Observation::Failed(HookError::Failed(
                    e.context("writing upgrade started status"),
                )),
            }
        }

        UpgradeState::PreUpgrade => {
            pass.log
                .once(&format!("Component {} pre-upgrade running", name));
            hook(component.pre_upgrade(&pass.hook_ctx(name, op)).await)
        }

        UpgradeState::Upgrade => {
            pass.log.once(&format!("Component {} upgrade running", name));
            hook(component.upgrade(&pass.hook_ctx(name, op)).await)
        }

        UpgradeState::WaitReady => {
            let ready = component.is_ready(&pass.hook_ctx(name, op)).await;
            probe(ready, || {
                format!(
                    "Component {} has been upgraded. Waiting for the component to be ready",
                    name
                )
            })
        }

        UpgradeState::PostUpgrade => {
            pass.log
                .once(&format!("Component {} post-upgrade running", name));
            hook(component.post_upgrade(&pass.hook_ctx(name, op)).await)
        }

        UpgradeState::Complete => {
            let version = pass.hook_ctx(name, op).target_version().map(String::from);
            let update = ComponentUpdate::Condition {
                name: name.to_string(),
                kind: ConditionType::UpgradeComplete,
                message: "Upgrade complete".to_string(),
                generation: pass.generation(),
                reset_reconciling: false,
                version,
            };
            match pass.write_components(vec![update]).await {
                Ok(()) => {
                    pass.log
                        .once(&format!("Component {} successfully upgraded", name));
                    Observation::Advance
                }
                Err(e) => Observation::Failed(HookError::Failed(
                    e.context("writing upgrade complete status"),
                )),
            }
        }

        UpgradeState::End => Observation::Advance,
    }
}
