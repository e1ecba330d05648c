//! Resource builders and the reconcile harness
//!
//! [`ResourceBuilder`] creates managed resources with a fluent API.
//! [`Harness`] wires fake components, a fake platform and an in-memory store
//! into a reconciler that requeues immediately, and drives passes the way a
//! controller would.

#![allow(dead_code)]

use super::constants::*;
use super::mocks::{FakeComponent, FakePlatform};
use keel_core::types::{ComponentSpec, ManagedResource, ResourceSpec};
use keel_core::RequeuePolicy;
use keel_lifecycle::{
    Component, ComponentRegistry, MemoryStatusStore, Outcome, OutcomeKind, Platform,
    ReconcileSettings, Reconciler, ResourceStore,
};
use std::sync::Arc;

/// Builder for managed resource fixtures
pub struct ResourceBuilder {
    namespace: String,
    name: String,
    uid: String,
    spec: ResourceSpec,
}

impl Default for ResourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceBuilder {
    pub fn new() -> Self {
        Self {
            namespace: TEST_NAMESPACE.to_string(),
            name: TEST_NAME.to_string(),
            uid: "uid-1".to_string(),
            spec: ResourceSpec {
                version: Some(INSTALL_VERSION.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.spec.version = Some(version.to_string());
        self
    }

    pub fn enable(mut self, component: &str) -> Self {
        self.component(component).enabled = Some(true);
        self
    }

    pub fn disable(mut self, component: &str) -> Self {
        self.component(component).enabled = Some(false);
        self
    }

    pub fn monitor_changes(mut self, component: &str, monitor: bool) -> Self {
        self.component(component).monitor_changes = Some(monitor);
        self
    }

    pub fn build(self) -> ManagedResource {
        let mut resource = ManagedResource::new(self.namespace, self.name);
        resource.metadata.uid = self.uid;
        resource.spec = self.spec;
        resource
    }

    fn component(&mut self, name: &str) -> &mut ComponentSpec {
        self.spec.components.entry(name.to_string()).or_default()
    }
}

/// Settings used by every harness: no requeue delay
pub fn test_settings() -> ReconcileSettings {
    ReconcileSettings {
        requeue: RequeuePolicy::immediate(),
        ..Default::default()
    }
}

/// A reconciler over fakes, plus handles to inspect them
pub struct Harness {
    pub store: Arc<MemoryStatusStore>,
    pub platform: FakePlatform,
    pub reconciler: Reconciler,
    /// Outcome of every pass so far
    pub outcomes: Vec<Outcome>,
}

impl Harness {
    pub fn new(components: &[FakeComponent], resource: ManagedResource) -> Self {
        Self::with_settings(components, resource, FakePlatform::new(), test_settings())
    }

    pub fn with_settings(
        components: &[FakeComponent],
        resource: ManagedResource,
        platform: FakePlatform,
        settings: ReconcileSettings,
    ) -> Self {
        let registry = ComponentRegistry::new(
            components
                .iter()
                .cloned()
                .map(FakeComponent::into_arc)
                .collect::<Vec<Arc<dyn Component>>>(),
        )
        .expect("valid registry");

        let store = Arc::new(MemoryStatusStore::new());
        store.insert(resource);

        let reconciler = Reconciler::new(
            Arc::new(registry),
            Arc::clone(&store) as Arc<dyn ResourceStore>,
            Arc::new(platform.clone()) as Arc<dyn Platform>,
            settings,
        );

        Self {
            store,
            platform,
            reconciler,
            outcomes: Vec::new(),
        }
    }

    pub fn resource(&self) -> ManagedResource {
        self.store
            .get(TEST_NAMESPACE, TEST_NAME)
            .expect("resource exists")
    }

    /// Run a single pass
    pub async fn pass(&mut self) -> Outcome {
        let outcome = self.reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await;
        self.outcomes.push(outcome.clone());
        outcome
    }

    /// Run passes until one is Done or a component is parked
    ///
    /// Panics after [`MAX_TEST_PASSES`] passes.
    pub async fn settle(&mut self) -> Outcome {
        for _ in 0..MAX_TEST_PASSES {
            let outcome = self.pass().await;
            match &outcome {
                Outcome::Done => return outcome,
                Outcome::Error {
                    kind: OutcomeKind::Fatal,
                    ..
                } => return outcome,
                _ => {}
            }
        }
        panic!(
            "resource did not settle after {} passes; last outcomes: {:?}",
            MAX_TEST_PASSES,
            self.outcomes.iter().rev().take(5).collect::<Vec<_>>()
        );
    }

    /// Run exactly `n` passes, returning their outcomes
    pub async fn passes(&mut self, n: usize) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(n);
        for _ in 0..n {
            outcomes.push(self.pass().await);
        }
        outcomes
    }

    /// Edit the spec, bumping the generation
    pub fn edit_spec(&self, edit: impl FnOnce(&mut ResourceSpec)) -> i64 {
        let mut spec = self.resource().spec;
        edit(&mut spec);
        self.store
            .update_spec(TEST_NAMESPACE, TEST_NAME, spec)
            .expect("resource exists")
    }
}
