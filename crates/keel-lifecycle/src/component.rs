//! Component adapter capability set
//!
//! Each installable component implements [`Component`]. The lifecycle
//! machines only ever talk to components through this trait: probes answer
//! questions about the live system, hooks perform side effects.

use crate::outcome::HookError;
use async_trait::async_trait;
use keel_core::types::{ComponentSpec, ManagedResource, ResourceId, ResourceSpec};
use std::fmt;

/// Operation a hook or probe is being invoked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Install,
    Upgrade,
    Uninstall,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Install => "install",
            Operation::Upgrade => "upgrade",
            Operation::Uninstall => "uninstall",
        };
        write!(f, "{}", s)
    }
}

/// Read-only view handed to component probes and hooks
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub resource: &'a ManagedResource,
    pub component: &'a str,
    pub operation: Operation,
}

impl<'a> HookContext<'a> {
    pub fn new(resource: &'a ManagedResource, component: &'a str, operation: Operation) -> Self {
        Self {
            resource,
            component,
            operation,
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource.id()
    }

    pub fn generation(&self) -> i64 {
        self.resource.generation()
    }

    pub fn spec(&self) -> &'a ResourceSpec {
        &self.resource.spec
    }

    /// Spec settings for the component this context was created for
    pub fn component_spec(&self) -> Option<&'a ComponentSpec> {
        self.resource.spec.component(self.component)
    }

    /// Platform version the operation targets (spec version, else the reconciled one)
    pub fn target_version(&self) -> Option<&'a str> {
        self.resource
            .spec
            .version
            .as_deref()
            .or(self.resource.status.version.as_deref())
    }
}

/// A component that can be installed, upgraded and uninstalled
///
/// Hooks return `Ok(())` on success or a [`HookError`] describing whether the
/// failure should be retried quietly, logged and retried, or park the
/// component until the spec changes. Every hook defaults to a no-op so that
/// adapters only implement the steps they need.
#[async_trait]
pub trait Component: Send + Sync {
    /// Unique component name
    fn name(&self) -> &str;

    /// Namespace the component installs into
    fn namespace(&self) -> &str;

    /// Names of components that must be Ready before this one installs
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Minimum platform version required before this component can be installed
    fn min_platform_version(&self) -> Option<&str> {
        None
    }

    /// Whether the component is enabled when the spec does not say
    fn enabled_by_default(&self) -> bool {
        false
    }

    fn is_enabled(&self, spec: &ResourceSpec) -> bool {
        spec.is_component_enabled(self.name(), self.enabled_by_default())
    }

    /// Whether spec edits for this component should trigger a reinstall
    fn monitor_overrides(&self, ctx: &HookContext<'_>) -> bool {
        ctx.component_spec()
            .and_then(|c| c.monitor_changes)
            .unwrap_or(true)
    }

    /// Lifecycle is owned by a separate process; only readiness is polled
    fn should_use_external_owner(&self) -> bool {
        false
    }

    fn supports_operator_uninstall(&self) -> bool {
        true
    }

    /// Must be (re)installed before the upgrade of the other components starts
    fn should_install_before_upgrade(&self) -> bool {
        false
    }

    async fn is_installed(&self, ctx: &HookContext<'_>) -> anyhow::Result<bool>;

    async fn is_ready(&self, ctx: &HookContext<'_>) -> anyhow::Result<bool>;

    /// Whether anything of the component is still present on the cluster
    async fn exists(&self, ctx: &HookContext<'_>) -> anyhow::Result<bool> {
        self.is_installed(ctx).await
    }

    /// Out-of-band reconcile for components flagged by an external watch
    async fn reconcile(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    async fn pre_install(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    async fn install(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    async fn post_install(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    async fn pre_upgrade(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    async fn upgrade(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    async fn post_upgrade(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    async fn pre_uninstall(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    async fn uninstall(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    async fn post_uninstall(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }
}
