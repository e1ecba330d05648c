//! State shared by every step of a single reconcile pass

use crate::component::{HookContext, Operation};
use crate::log::ResourceLog;
use crate::outcome::{Outcome, OutcomeKind};
use crate::platform::Platform;
use crate::registry::ComponentRegistry;
use crate::status::{ComponentUpdate, ResourceStore, StatusUpdate};
use crate::tracker::WatchSet;
use keel_core::types::{KeelConfigFile, ManagedResource, ResourceId};
use keel_core::RequeuePolicy;

/// Behaviour switches for the phase machines
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileSettings {
    pub requeue: RequeuePolicy,
    pub uninstall_disabled_components: bool,
    pub shared_namespaces: Vec<String>,
}

impl From<&KeelConfigFile> for ReconcileSettings {
    fn from(config: &KeelConfigFile) -> Self {
        Self {
            requeue: RequeuePolicy::from(&config.requeue),
            uninstall_disabled_components: config.uninstall.uninstall_disabled_components,
            shared_namespaces: config.uninstall.shared_namespaces.clone(),
        }
    }
}

/// Everything a phase or component machine needs during one pass
///
/// `resource` is the pass's snapshot. Component-level writes refresh it from
/// the status the store returns; after a resource-level write the pass ends.
pub struct Pass<'a> {
    pub(crate) resource: ManagedResource,
    pub(crate) registry: &'a ComponentRegistry,
    pub(crate) store: &'a dyn ResourceStore,
    pub(crate) platform: &'a dyn Platform,
    pub(crate) watches: &'a WatchSet,
    pub(crate) settings: &'a ReconcileSettings,
    pub(crate) log: ResourceLog<'a>,
}

impl<'a> Pass<'a> {
    pub(crate) fn id(&self) -> ResourceId {
        self.resource.id()
    }

    pub(crate) fn generation(&self) -> i64 {
        self.resource.generation()
    }

    pub(crate) fn hook_ctx<'b>(&'b self, component: &'b str, operation: Operation) -> HookContext<'b> {
        HookContext::new(&self.resource, component, operation)
    }

    pub(crate) fn requeue(&self) -> Outcome {
        Outcome::RequeueAfter(self.settings.requeue.delay())
    }

    /// Patch component statuses and refresh the snapshot; the pass may continue
    pub(crate) async fn write_components(
        &mut self,
        updates: Vec<ComponentUpdate>,
    ) -> anyhow::Result<()> {
        let status = self
            .store
            .write_status(&self.id(), StatusUpdate::components(updates))
            .await?;
        self.resource.status = status;
        Ok(())
    }

    /// Write a resource-level update; the pass must return the result as-is
    pub(crate) async fn write_resource(&mut self, update: StatusUpdate) -> Outcome {
        match self.store.write_status(&self.id(), update).await {
            Ok(status) => {
                self.resource.status = status;
                self.requeue()
            }
            Err(e) => {
                let msg = format!("Failed writing status: {:#}", e);
                self.log.error_throttled(&msg);
                Outcome::error(OutcomeKind::Transient, msg)
            }
        }
    }
}
