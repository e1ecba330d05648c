//! Reconcile entry point
//!
//! One call to [`Reconciler::reconcile`] is one pass: load the resource,
//! make sure its status is initialised, pick the operation from the
//! persisted state and run that operation's phase machine once.

use crate::component::Operation;
use crate::generation::upgrade_pending;
use crate::log::ThrottledLog;
use crate::outcome::{Outcome, OutcomeKind};
use crate::pass::{Pass, ReconcileSettings};
use crate::phase::{
    run_install_phase, run_uninstall_phase, run_upgrade_phase, InstallPhase, UninstallPhase,
    UpgradePhase,
};
use crate::platform::Platform;
use crate::registry::ComponentRegistry;
use crate::status::{ComponentUpdate, ResourceStore, StatusUpdate};
use crate::tracker::{Trackers, WatchSet};
use keel_core::types::{ComponentState, ManagedResource, ResourceId, ResourceState};
use keel_core::KeelConfig;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Pick the operation a pass runs from the persisted state
///
/// Deletion wins over everything. An upgrade in flight continues, and a
/// Ready resource whose spec names a newer version starts one. Anything
/// else is an install pass, which is a no-op when nothing changed.
pub fn select_operation(resource: &ManagedResource) -> keel_core::Result<Operation> {
    let state = resource.status.state;
    if resource.metadata.deletion_requested || state == Some(ResourceState::Uninstalling) {
        return Ok(Operation::Uninstall);
    }
    if state == Some(ResourceState::Upgrading) {
        return Ok(Operation::Upgrade);
    }
    if state == Some(ResourceState::Ready)
        && upgrade_pending(
            resource.spec.version.as_deref(),
            resource.status.version.as_deref(),
        )?
    {
        return Ok(Operation::Upgrade);
    }
    Ok(Operation::Install)
}

/// Drives managed resources through their lifecycle, one pass per call
pub struct Reconciler {
    registry: Arc<ComponentRegistry>,
    store: Arc<dyn ResourceStore>,
    platform: Arc<dyn Platform>,
    settings: ReconcileSettings,
    trackers: Trackers,
    log: ThrottledLog,
}

impl Reconciler {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        store: Arc<dyn ResourceStore>,
        platform: Arc<dyn Platform>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            registry,
            store,
            platform,
            settings,
            trackers: Trackers::new(),
            log: ThrottledLog::default(),
        }
    }

    /// Reconciler with settings and log throttling taken from a config file
    pub fn from_config(
        registry: Arc<ComponentRegistry>,
        store: Arc<dyn ResourceStore>,
        platform: Arc<dyn Platform>,
        config: &KeelConfig,
    ) -> Self {
        Self::new(
            registry,
            store,
            platform,
            ReconcileSettings::from(config.inner()),
        )
        .with_log(ThrottledLog::new(
            config.progress_throttle(),
            config.error_throttle(),
        ))
    }

    pub fn with_log(mut self, log: ThrottledLog) -> Self {
        self.log = log;
        self
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    pub fn trackers(&self) -> &Trackers {
        &self.trackers
    }

    /// Flags used by external watches to request an out-of-band component reconcile
    pub fn watches(&self) -> &WatchSet {
        &self.trackers.watches
    }

    /// Run one reconcile pass for the resource `namespace/name`
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Outcome {
        let key = ResourceId::new(namespace, name, "");
        let _guard = self.trackers.locks.acquire(&key).await;

        let resource = match self.store.load(namespace, name).await {
            Ok(Some(resource)) => resource,
            Ok(None) => {
                debug!(resource = %key, "Resource not found, nothing to do");
                return Outcome::Done;
            }
            Err(e) => {
                error!(resource = %key, "Failed loading resource: {:#}", e);
                return Outcome::error(OutcomeKind::Transient, format!("{:#}", e));
            }
        };

        let id = resource.id();
        self.trackers.forget_replaced(&id);
        self.log.forget_replaced(&id);
        if resource.metadata.finalized {
            self.trackers.forget(&id);
            return Outcome::Done;
        }

        let generation = resource.generation();
        let mut pass = Pass {
            resource,
            registry: &self.registry,
            store: self.store.as_ref(),
            platform: self.platform.as_ref(),
            watches: &self.trackers.watches,
            settings: &self.settings,
            log: self.log.scope(id.clone(), generation),
        };

        if pass.resource.status.state.is_none() {
            pass.log.once("Initializing resource status");
            return pass
                .write_resource(StatusUpdate::state(ResourceState::Ready))
                .await;
        }

        if let Some(outcome) = init_component_statuses(&mut pass).await {
            return outcome;
        }

        let operation = match select_operation(&pass.resource) {
            Ok(op) => op,
            Err(e) => {
                let msg = format!("Cannot select operation: {}", e);
                pass.log.once(&msg);
                return Outcome::fatal(msg);
            }
        };
        debug!(resource = %id, generation, operation = %operation, "Reconciling");

        match operation {
            Operation::Install => {
                self.trackers.upgrade.delete(&id);
                self.trackers.uninstall.delete(&id);
                let shared = self.trackers.install.get(&id, generation).await;
                let mut entry = shared.lock().await;
                let outcome = run_install_phase(&mut pass, &mut entry).await;
                if outcome.is_done() && entry.phase == InstallPhase::End {
                    drop(entry);
                    self.trackers.install.delete(&id);
                }
                outcome
            }
            Operation::Upgrade => {
                self.trackers.install.delete(&id);
                self.trackers.uninstall.delete(&id);
                let shared = self.trackers.upgrade.get(&id, generation).await;
                let mut entry = shared.lock().await;
                let outcome = run_upgrade_phase(&mut pass, &mut entry).await;
                if outcome.is_done() && entry.phase == UpgradePhase::End {
                    drop(entry);
                    self.trackers.upgrade.delete(&id);
                }
                outcome
            }
            Operation::Uninstall => {
                self.trackers.install.delete(&id);
                self.trackers.upgrade.delete(&id);
                let shared = self.trackers.uninstall.get(&id, generation).await;
                let mut entry = shared.lock().await;
                let outcome = run_uninstall_phase(&mut pass, &mut entry).await;
                if outcome.is_done() && entry.phase == UninstallPhase::End {
                    drop(entry);
                    info!(resource = %id, "Resource uninstalled and finalized");
                    self.trackers.forget(&id);
                    self.log.forget(&id);
                }
                outcome
            }
        }
    }
}

/// Record a status for every registered component that has none
///
/// Components already present on the cluster start out Ready at the current
/// generation, everything else Disabled. Returns the pass result when a
/// write was needed.
async fn init_component_statuses(pass: &mut Pass<'_>) -> Option<Outcome> {
    let registry = pass.registry;
    let generation = pass.generation();
    let mut updates = Vec::new();

    for component in registry.list() {
        let name = component.name();
        if pass.resource.component_status(name).is_some() {
            continue;
        }
        let installed = match component
            .is_installed(&pass.hook_ctx(name, Operation::Install))
            .await
        {
            Ok(installed) => installed,
            Err(e) => {
                let msg = format!(
                    "Failed checking whether component {} is installed: {:#}",
                    name, e
                );
                pass.log.error_throttled(&msg);
                return Some(Outcome::error(OutcomeKind::Transient, msg));
            }
        };
        let update = if installed {
            ComponentUpdate::Set {
                name: name.to_string(),
                state: ComponentState::Ready,
                reconciling_generation: 0,
                last_reconciled_generation: generation,
                version: pass.resource.status.version.clone(),
            }
        } else {
            ComponentUpdate::Set {
                name: name.to_string(),
                state: ComponentState::Disabled,
                reconciling_generation: 0,
                last_reconciled_generation: 0,
                version: None,
            }
        };
        updates.push(update);
    }

    if updates.is_empty() {
        return None;
    }
    pass.log.once("Initializing component status");
    Some(pass.write_resource(StatusUpdate::components(updates)).await)
}
