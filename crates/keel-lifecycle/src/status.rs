//! Status persistence interface and the in-memory store
//!
//! Writers never send a whole status document. They send a [`StatusUpdate`]
//! patch which the store applies to its current copy under its own lock, so
//! every write is atomic with respect to the rest of the resource's status.

use async_trait::async_trait;
use keel_core::types::{
    ComponentState, ConditionType, ManagedResource, ResourceId, ResourceSpec, ResourceState,
    ResourceStatus,
};
use keel_core::Error;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Patch to one component's status
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentUpdate {
    /// Record a condition and apply the generation bookkeeping that goes with it
    Condition {
        name: String,
        kind: ConditionType,
        message: String,
        generation: i64,
        /// Clear `reconciling_generation` before applying the condition
        reset_reconciling: bool,
        version: Option<String>,
    },

    /// Set state and generations directly, keeping recorded conditions
    Set {
        name: String,
        state: ComponentState,
        reconciling_generation: i64,
        last_reconciled_generation: i64,
        version: Option<String>,
    },

    /// Mark the component reconciled at `generation` without touching its state
    Reconciled {
        name: String,
        generation: i64,
        version: Option<String>,
    },
}

impl ComponentUpdate {
    pub fn name(&self) -> &str {
        match self {
            ComponentUpdate::Condition { name, .. }
            | ComponentUpdate::Set { name, .. }
            | ComponentUpdate::Reconciled { name, .. } => name,
        }
    }

    fn apply(&self, status: &mut ResourceStatus) {
        let component = status.component_mut(self.name());
        match self {
            ComponentUpdate::Condition {
                kind,
                message,
                generation,
                reset_reconciling,
                version,
                ..
            } => {
                if *reset_reconciling {
                    component.reconciling_generation = 0;
                }
                component.apply_condition(*kind, message.clone(), *generation);
                if version.is_some() {
                    component.version = version.clone();
                }
            }
            ComponentUpdate::Set {
                state,
                reconciling_generation,
                last_reconciled_generation,
                version,
                ..
            } => {
                component.state = *state;
                component.reconciling_generation = *reconciling_generation;
                component.last_reconciled_generation = *last_reconciled_generation;
                if version.is_some() {
                    component.version = version.clone();
                }
            }
            ComponentUpdate::Reconciled {
                generation,
                version,
                ..
            } => {
                component.last_reconciled_generation = *generation;
                component.reconciling_generation = 0;
                if version.is_some() {
                    component.version = version.clone();
                }
            }
        }
    }
}

/// Atomic patch to a resource's status
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    /// Explicit overall state, applied after the condition
    pub state: Option<ResourceState>,

    /// Resource-level condition; also derives the overall state
    pub condition: Option<(ConditionType, String)>,

    /// Reconciled platform version
    pub version: Option<String>,

    pub components: Vec<ComponentUpdate>,
}

impl StatusUpdate {
    pub fn condition(kind: ConditionType, message: impl Into<String>) -> Self {
        Self {
            condition: Some((kind, message.into())),
            ..Default::default()
        }
    }

    pub fn state(state: ResourceState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn components(components: Vec<ComponentUpdate>) -> Self {
        Self {
            components,
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    pub fn with_components(mut self, components: Vec<ComponentUpdate>) -> Self {
        self.components.extend(components);
        self
    }

    /// Whether the patch touches resource-level fields
    ///
    /// A resource-level write ends the pass with a requeue; the in-memory
    /// snapshot is not reused after it.
    pub fn is_resource_level(&self) -> bool {
        self.state.is_some() || self.condition.is_some() || self.version.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.is_resource_level() && self.components.is_empty()
    }

    /// Apply the patch to a status document
    pub fn apply(&self, status: &mut ResourceStatus) {
        for update in &self.components {
            update.apply(status);
        }
        if let Some(version) = &self.version {
            status.version = Some(version.clone());
        }
        if let Some((kind, message)) = &self.condition {
            status.apply_condition(*kind, message.clone());
        }
        if let Some(state) = self.state {
            status.state = Some(state);
        }
    }
}

/// Status persistence interface
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Apply `update` atomically and return the resulting status
    async fn write_status(
        &self,
        id: &ResourceId,
        update: StatusUpdate,
    ) -> anyhow::Result<ResourceStatus>;

    async fn write_condition(
        &self,
        id: &ResourceId,
        kind: ConditionType,
        message: &str,
    ) -> anyhow::Result<ResourceStatus> {
        self.write_status(id, StatusUpdate::condition(kind, message))
            .await
    }

    async fn write_component_status(
        &self,
        id: &ResourceId,
        name: &str,
        state: ComponentState,
        reconciling_generation: i64,
        last_reconciled_generation: i64,
    ) -> anyhow::Result<ResourceStatus> {
        let update = StatusUpdate::components(vec![ComponentUpdate::Set {
            name: name.to_string(),
            state,
            reconciling_generation,
            last_reconciled_generation,
            version: None,
        }]);
        self.write_status(id, update).await
    }
}

/// Source of managed resources for the reconcile entry point
#[async_trait]
pub trait ResourceStore: StatusWriter {
    async fn load(&self, namespace: &str, name: &str) -> anyhow::Result<Option<ManagedResource>>;

    /// Mark the resource as fully uninstalled so it can be dropped
    async fn finalize(&self, id: &ResourceId) -> anyhow::Result<()>;
}

/// Reject a write aimed at a resource that was deleted and recreated
pub(crate) fn check_identity(stored: &ManagedResource, id: &ResourceId) -> keel_core::Result<()> {
    if !id.uid.is_empty() && stored.metadata.uid != id.uid {
        return Err(Error::status_conflict(
            id.to_string(),
            format!(
                "owner uid changed from {} to {}",
                id.uid, stored.metadata.uid
            ),
        ));
    }
    Ok(())
}

/// In-memory resource store for tests and embedding
///
/// Records every applied update so callers can inspect the write history.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    resources: Mutex<BTreeMap<(String, String), ManagedResource>>,
    writes: Mutex<Vec<StatusUpdate>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource: ManagedResource) {
        let key = (
            resource.metadata.namespace.clone(),
            resource.metadata.name.clone(),
        );
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, resource);
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<ManagedResource> {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Replace the spec, bumping the generation; returns the new generation
    pub fn update_spec(&self, namespace: &str, name: &str, spec: ResourceSpec) -> Option<i64> {
        self.modify(namespace, name, |r| {
            r.update_spec(spec);
            r.generation()
        })
    }

    pub fn request_deletion(&self, namespace: &str, name: &str) -> bool {
        self.modify(namespace, name, |r| r.metadata.deletion_requested = true)
            .is_some()
    }

    /// Every update applied so far, oldest first
    pub fn writes(&self) -> Vec<StatusUpdate> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_writes(&self) {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn modify<T>(
        &self,
        namespace: &str,
        name: &str,
        f: impl FnOnce(&mut ManagedResource) -> T,
    ) -> Option<T> {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&(namespace.to_string(), name.to_string()))
            .map(f)
    }
}

#[async_trait]
impl StatusWriter for MemoryStatusStore {
    async fn write_status(
        &self,
        id: &ResourceId,
        update: StatusUpdate,
    ) -> anyhow::Result<ResourceStatus> {
        let status = {
            let mut resources = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
            let resource = resources
                .get_mut(&(id.namespace.clone(), id.name.clone()))
                .ok_or_else(|| Error::resource_not_found(id.to_string()))?;
            check_identity(resource, id)?;
            update.apply(&mut resource.status);
            resource.status.clone()
        };

        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(update);
        Ok(status)
    }
}

#[async_trait]
impl ResourceStore for MemoryStatusStore {
    async fn load(&self, namespace: &str, name: &str) -> anyhow::Result<Option<ManagedResource>> {
        Ok(self.get(namespace, name))
    }

    async fn finalize(&self, id: &ResourceId) -> anyhow::Result<()> {
        self.modify(&id.namespace, &id.name, |r| r.metadata.finalized = true)
            .ok_or_else(|| Error::resource_not_found(id.to_string()))?;
        Ok(())
    }
}
