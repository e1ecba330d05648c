//! Managed resource types (metadata and desired state)

use super::status_types::{ComponentStatus, ResourceStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a managed resource
///
/// The owner uid distinguishes a resource from an earlier one that was
/// deleted and recreated under the same namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: uid.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Resource metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMeta {
    /// Namespace the resource lives in
    pub namespace: String,

    /// Resource name
    pub name: String,

    /// Owner identity
    #[serde(default)]
    pub uid: String,

    /// Spec generation, bumped on every spec edit
    #[serde(default = "default_generation")]
    pub generation: i64,

    /// Set when the owner asked for the resource to be removed
    #[serde(default)]
    pub deletion_requested: bool,

    /// Set once uninstall finished and the resource may be dropped
    #[serde(default)]
    pub finalized: bool,
}

fn default_generation() -> i64 {
    1
}

/// Desired state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// Target platform version; when newer than the status version an upgrade is due
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Per-component settings keyed by component name
    #[serde(default)]
    pub components: BTreeMap<String, ComponentSpec>,
}

impl ResourceSpec {
    /// Settings for a component, if the spec mentions it
    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.get(name)
    }

    /// Whether a component is enabled, falling back to `default` when unspecified
    pub fn is_component_enabled(&self, name: &str, default: bool) -> bool {
        self.component(name)
            .and_then(|c| c.enabled)
            .unwrap_or(default)
    }
}

/// Per-component desired settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Whether edits to the overrides should trigger a reinstall
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_changes: Option<bool>,

    /// Opaque override values handed to the component
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<serde_json::Value>,
}

/// The single configuration resource describing the desired component set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagedResource {
    pub metadata: ResourceMeta,

    #[serde(default)]
    pub spec: ResourceSpec,

    #[serde(default)]
    pub status: ResourceStatus,
}

impl ManagedResource {
    /// Create a resource at generation 1 with an empty spec
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ResourceMeta {
                namespace: namespace.into(),
                name: name.into(),
                generation: default_generation(),
                ..Default::default()
            },
            spec: ResourceSpec::default(),
            status: ResourceStatus::default(),
        }
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(
            &self.metadata.namespace,
            &self.metadata.name,
            &self.metadata.uid,
        )
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation
    }

    /// Persisted status of a component, if one has been recorded
    pub fn component_status(&self, name: &str) -> Option<&ComponentStatus> {
        self.status.components.get(name)
    }

    /// Apply a spec edit: replaces the spec and bumps the generation
    pub fn update_spec(&mut self, spec: ResourceSpec) {
        self.spec = spec;
        self.metadata.generation += 1;
    }
}
