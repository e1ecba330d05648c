//! Fake components and platform for lifecycle testing
//!
//! A [`FakeComponent`] models a component on a cluster: install marks it
//! installed, uninstall removes it, and readiness can be delayed for a
//! number of polls. Hook failures can be scripted per hook. Every hook call
//! is recorded in a [`Journal`] that can be shared between components to
//! check ordering.

#![allow(dead_code)]

use async_trait::async_trait;
use keel_core::types::ManagedResource;
use keel_lifecycle::{Component, HookContext, HookError, Platform};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Component hooks a test can observe or make fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Reconcile,
    PreInstall,
    Install,
    PostInstall,
    PreUpgrade,
    Upgrade,
    PostUpgrade,
    PreUninstall,
    Uninstall,
    PostUninstall,
}

/// Failure injected into the next call of a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Retryable,
    Failed,
    Fatal,
}

impl Failure {
    fn into_error(self, component: &str, hook: Hook) -> HookError {
        let reason = format!("{} {:?} injected failure", component, hook);
        match self {
            Failure::Retryable => HookError::retryable(reason),
            Failure::Failed => HookError::Failed(anyhow::anyhow!(reason)),
            Failure::Fatal => HookError::fatal(reason),
        }
    }
}

/// Ordered record of hook calls across components
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<(String, Hook)>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, component: &str, hook: Hook) {
        self.entries
            .lock()
            .unwrap()
            .push((component.to_string(), hook));
    }

    pub fn entries(&self) -> Vec<(String, Hook)> {
        self.entries.lock().unwrap().clone()
    }

    /// Components that received `hook`, in call order
    pub fn calls_to(&self, hook: Hook) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(_, h)| *h == hook)
            .map(|(c, _)| c)
            .collect()
    }

    pub fn count(&self, component: &str, hook: Hook) -> usize {
        self.entries()
            .iter()
            .filter(|(c, h)| c == component && *h == hook)
            .count()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[derive(Debug, Default)]
struct FakeState {
    installed: bool,
    not_ready_polls: u32,
    linger_polls: u32,
    failures: HashMap<Hook, VecDeque<Failure>>,
    probe_error: bool,
}

/// Scriptable in-memory component
///
/// Clones share state, so a test can keep a handle after handing the
/// component to a registry.
#[derive(Debug, Clone)]
pub struct FakeComponent {
    name: String,
    namespace: String,
    dependencies: Vec<String>,
    min_version: Option<String>,
    enabled_by_default: bool,
    external_owner: bool,
    operator_uninstall: bool,
    install_before_upgrade: bool,
    state: Arc<Mutex<FakeState>>,
    journal: Journal,
}

impl FakeComponent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: format!("{}-system", name),
            dependencies: Vec::new(),
            min_version: None,
            enabled_by_default: true,
            external_owner: false,
            operator_uninstall: true,
            install_before_upgrade: false,
            state: Arc::new(Mutex::new(FakeState::default())),
            journal: Journal::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn depends_on(mut self, dependency: &str) -> Self {
        self.dependencies.push(dependency.to_string());
        self
    }

    pub fn with_min_version(mut self, version: &str) -> Self {
        self.min_version = Some(version.to_string());
        self
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    pub fn externally_owned(mut self) -> Self {
        self.external_owner = true;
        self
    }

    pub fn without_operator_uninstall(mut self) -> Self {
        self.operator_uninstall = false;
        self
    }

    pub fn install_before_upgrade(mut self) -> Self {
        self.install_before_upgrade = true;
        self
    }

    pub fn with_journal(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    /// Start out already present on the cluster
    pub fn preinstalled(self) -> Self {
        self.state.lock().unwrap().installed = true;
        self
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn into_arc(self) -> Arc<dyn Component> {
        Arc::new(self)
    }

    /// Fail the next call of `hook` with `failure`; calls queue up
    pub fn fail_next(&self, hook: Hook, failure: Failure) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(hook)
            .or_default()
            .push_back(failure);
    }

    /// Report not ready for the next `polls` readiness checks
    pub fn set_not_ready_for(&self, polls: u32) {
        self.state.lock().unwrap().not_ready_polls = polls;
    }

    /// Keep existing for `polls` checks after uninstall
    pub fn set_linger_for(&self, polls: u32) {
        self.state.lock().unwrap().linger_polls = polls;
    }

    /// Make every probe fail until cleared
    pub fn set_probe_error(&self, fail: bool) {
        self.state.lock().unwrap().probe_error = fail;
    }

    pub fn is_present(&self) -> bool {
        self.state.lock().unwrap().installed
    }

    pub fn calls(&self, hook: Hook) -> usize {
        self.journal.count(&self.name, hook)
    }

    fn call(&self, hook: Hook) -> Result<(), HookError> {
        self.journal.record(&self.name, hook);
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state.failures.get_mut(&hook).and_then(|q| q.pop_front()) {
            return Err(failure.into_error(&self.name, hook));
        }
        match hook {
            Hook::Install | Hook::Upgrade => state.installed = true,
            Hook::Uninstall => state.installed = false,
            _ => {}
        }
        Ok(())
    }

    fn check_probe(&self) -> anyhow::Result<()> {
        if self.state.lock().unwrap().probe_error {
            anyhow::bail!("{} probe unavailable", self.name);
        }
        Ok(())
    }
}

#[async_trait]
impl Component for FakeComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn min_platform_version(&self) -> Option<&str> {
        self.min_version.as_deref()
    }

    fn enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }

    fn should_use_external_owner(&self) -> bool {
        self.external_owner
    }

    fn supports_operator_uninstall(&self) -> bool {
        self.operator_uninstall
    }

    fn should_install_before_upgrade(&self) -> bool {
        self.install_before_upgrade
    }

    async fn is_installed(&self, _ctx: &HookContext<'_>) -> anyhow::Result<bool> {
        self.check_probe()?;
        Ok(self.state.lock().unwrap().installed)
    }

    async fn is_ready(&self, _ctx: &HookContext<'_>) -> anyhow::Result<bool> {
        self.check_probe()?;
        let mut state = self.state.lock().unwrap();
        if !state.installed {
            return Ok(false);
        }
        if state.not_ready_polls > 0 {
            state.not_ready_polls -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    async fn exists(&self, _ctx: &HookContext<'_>) -> anyhow::Result<bool> {
        self.check_probe()?;
        let mut state = self.state.lock().unwrap();
        if state.installed {
            return Ok(true);
        }
        if state.linger_polls > 0 {
            state.linger_polls -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    async fn reconcile(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.call(Hook::Reconcile)
    }

    async fn pre_install(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.call(Hook::PreInstall)
    }

    async fn install(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.call(Hook::Install)
    }

    async fn post_install(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.call(Hook::PostInstall)
    }

    async fn pre_upgrade(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.call(Hook::PreUpgrade)
    }

    async fn upgrade(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.call(Hook::Upgrade)
    }

    async fn post_upgrade(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.call(Hook::PostUpgrade)
    }

    async fn pre_uninstall(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.call(Hook::PreUninstall)
    }

    async fn uninstall(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.call(Hook::Uninstall)
    }

    async fn post_uninstall(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.call(Hook::PostUninstall)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Namespace {
    Active { terminating_polls: u32 },
    Terminating { remaining: u32 },
}

#[derive(Debug, Default)]
struct PlatformState {
    namespaces: BTreeMap<String, Namespace>,
    deleted: Vec<String>,
    delete_requests: HashMap<String, usize>,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, VecDeque<Failure>>,
}

/// Fake cluster with namespaces that take a while to terminate
#[derive(Debug, Clone, Default)]
pub struct FakePlatform {
    provisioner: Option<String>,
    state: Arc<Mutex<PlatformState>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provisioned_by(mut self, component: &str) -> Self {
        self.provisioner = Some(component.to_string());
        self
    }

    /// Add a namespace that keeps existing for `terminating_polls` checks after deletion
    pub fn with_namespace(self, namespace: &str, terminating_polls: u32) -> Self {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .insert(namespace.to_string(), Namespace::Active { terminating_polls });
        self
    }

    /// Fail the next call of the named cluster hook
    pub fn fail_next(&self, hook: &'static str, failure: Failure) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(hook)
            .or_default()
            .push_back(failure);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Namespaces whose deletion was requested, in first-request order
    pub fn deleted_namespaces(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// How many times deletion of `namespace` was requested
    pub fn delete_requests(&self, namespace: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .delete_requests
            .get(namespace)
            .copied()
            .unwrap_or(0)
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .contains_key(namespace)
    }

    fn hook(&self, name: &'static str) -> Result<(), HookError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(name);
        if let Some(failure) = state.failures.get_mut(name).and_then(|q| q.pop_front()) {
            return Err(match failure {
                Failure::Retryable => HookError::retryable(name),
                Failure::Failed => HookError::Failed(anyhow::anyhow!("{} failed", name)),
                Failure::Fatal => HookError::fatal(name),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn cluster_provisioner(&self) -> anyhow::Result<Option<String>> {
        Ok(self.provisioner.clone())
    }

    async fn pre_install(&self, _resource: &ManagedResource) -> Result<(), HookError> {
        self.hook("pre_install")
    }

    async fn post_install(&self, _resource: &ManagedResource) -> Result<(), HookError> {
        self.hook("post_install")
    }

    async fn post_upgrade(&self, _resource: &ManagedResource) -> Result<(), HookError> {
        self.hook("post_upgrade")
    }

    async fn remove_co_owned_resources(
        &self,
        _resource: &ManagedResource,
    ) -> Result<(), HookError> {
        self.hook("remove_co_owned_resources")
    }

    async fn delete_namespace(&self, namespace: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        *state
            .delete_requests
            .entry(namespace.to_string())
            .or_default() += 1;
        if !state.deleted.iter().any(|n| n == namespace) {
            state.deleted.push(namespace.to_string());
        }
        if let Some(Namespace::Active { terminating_polls }) = state.namespaces.get(namespace).copied() {
            state.namespaces.insert(
                namespace.to_string(),
                Namespace::Terminating {
                    remaining: terminating_polls,
                },
            );
        }
        Ok(())
    }

    async fn namespace_exists(&self, namespace: &str) -> anyhow::Result<bool> {
        let mut state = self.state.lock().unwrap();
        match state.namespaces.get(namespace).copied() {
            None => Ok(false),
            Some(Namespace::Active { .. }) => Ok(true),
            Some(Namespace::Terminating { remaining: 0 }) => {
                state.namespaces.remove(namespace);
                Ok(false)
            }
            Some(Namespace::Terminating { remaining }) => {
                state.namespaces.insert(
                    namespace.to_string(),
                    Namespace::Terminating {
                        remaining: remaining - 1,
                    },
                );
                Ok(true)
            }
        }
    }
}
