//! Cluster-level collaborators used by the global phase machines

use crate::outcome::HookError;
use async_trait::async_trait;
use keel_core::types::ManagedResource;

/// Operations that act on the cluster as a whole rather than on one component
///
/// The global hooks carry cross-component glue (for example wiring an auth
/// integration between two independently installed components). All methods
/// default to no-ops on a cluster where nothing is co-owned and no namespace
/// exists.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Name of the component whose external owner provisioned the cluster
    ///
    /// When set, uninstall must not tear down that component, its namespace,
    /// or the co-owned resources it created.
    async fn cluster_provisioner(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn pre_install(&self, _resource: &ManagedResource) -> Result<(), HookError> {
        Ok(())
    }

    async fn post_install(&self, _resource: &ManagedResource) -> Result<(), HookError> {
        Ok(())
    }

    async fn post_upgrade(&self, _resource: &ManagedResource) -> Result<(), HookError> {
        Ok(())
    }

    /// Remove cluster resources co-owned with components outside this orchestrator
    async fn remove_co_owned_resources(
        &self,
        _resource: &ManagedResource,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Request deletion of a namespace; deleting a missing namespace is not an error
    async fn delete_namespace(&self, _namespace: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whether the namespace still exists (including while terminating)
    async fn namespace_exists(&self, _namespace: &str) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Platform with no cluster-level side effects
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPlatform;

impl Platform for NoopPlatform {}
