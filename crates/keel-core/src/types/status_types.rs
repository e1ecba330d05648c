//! Status types and the bookkeeping applied when conditions are written

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Overall state of the managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceState {
    Ready,
    Installing,
    Upgrading,
    Uninstalling,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceState::Ready => "Ready",
            ResourceState::Installing => "Installing",
            ResourceState::Upgrading => "Upgrading",
            ResourceState::Uninstalling => "Uninstalling",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle state of a single component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ComponentState {
    #[default]
    Disabled,
    PreInstalling,
    Installing,
    Ready,
    Upgrading,
    Uninstalling,
    Uninstalled,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentState::Disabled => "Disabled",
            ComponentState::PreInstalling => "PreInstalling",
            ComponentState::Installing => "Installing",
            ComponentState::Ready => "Ready",
            ComponentState::Upgrading => "Upgrading",
            ComponentState::Uninstalling => "Uninstalling",
            ComponentState::Uninstalled => "Uninstalled",
        };
        write!(f, "{}", s)
    }
}

/// Phase transition recorded as a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    PreInstall,
    InstallStarted,
    InstallComplete,
    UpgradeStarted,
    UpgradeComplete,
    UninstallStarted,
    UninstallComplete,
}

impl ConditionType {
    /// Resource state implied by this condition being the latest one
    pub fn resource_state(self) -> ResourceState {
        match self {
            ConditionType::PreInstall | ConditionType::InstallStarted => {
                ResourceState::Installing
            }
            ConditionType::UpgradeStarted => ResourceState::Upgrading,
            ConditionType::UninstallStarted => ResourceState::Uninstalling,
            ConditionType::InstallComplete
            | ConditionType::UpgradeComplete
            | ConditionType::UninstallComplete => ResourceState::Ready,
        }
    }

    /// Component state implied by this condition
    pub fn component_state(self) -> ComponentState {
        match self {
            ConditionType::PreInstall => ComponentState::PreInstalling,
            ConditionType::InstallStarted => ComponentState::Installing,
            ConditionType::UpgradeStarted => ComponentState::Upgrading,
            ConditionType::UninstallStarted => ComponentState::Uninstalling,
            ConditionType::UninstallComplete => ComponentState::Uninstalled,
            ConditionType::InstallComplete | ConditionType::UpgradeComplete => {
                ComponentState::Ready
            }
        }
    }

    /// Whether this condition marks the successful end of an operation
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            ConditionType::InstallComplete
                | ConditionType::UpgradeComplete
                | ConditionType::UninstallComplete
        )
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A timestamped phase transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,

    #[serde(default)]
    pub message: String,

    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(kind: ConditionType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Append a condition, dropping any existing condition of the same type
///
/// Keeps at most one live condition per type, with the newest last.
pub fn append_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    conditions.retain(|c| c.kind != condition.kind);
    conditions.push(condition);
}

/// Persisted status of one component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub name: String,

    #[serde(default)]
    pub state: ComponentState,

    /// Non-zero while an operation targeting this generation is in flight
    #[serde(default)]
    pub reconciling_generation: i64,

    /// Generation at which the component last reached a terminal success state
    #[serde(default)]
    pub last_reconciled_generation: i64,

    /// Version the component was last installed or upgraded at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ComponentStatus {
    pub fn new(name: impl Into<String>, state: ComponentState) -> Self {
        Self {
            name: name.into(),
            state,
            ..Default::default()
        }
    }

    /// Record a condition and update the state and generation bookkeeping
    ///
    /// A completion condition moves the in-flight generation (or the current
    /// generation when nothing was in flight) into `last_reconciled_generation`.
    /// Any other condition pins `reconciling_generation` to the current
    /// generation unless an operation is already in flight.
    pub fn apply_condition(
        &mut self,
        kind: ConditionType,
        message: impl Into<String>,
        generation: i64,
    ) {
        append_condition(&mut self.conditions, Condition::new(kind, message));
        self.state = kind.component_state();

        if kind.is_complete() {
            self.last_reconciled_generation = if self.reconciling_generation > 0 {
                self.reconciling_generation
            } else {
                generation
            };
            self.reconciling_generation = 0;
        } else if self.reconciling_generation == 0 {
            self.reconciling_generation = generation;
        }
    }

    /// Most recent condition, if any
    pub fn last_condition(&self) -> Option<&Condition> {
        self.conditions.last()
    }
}

/// Observed state of the managed resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ResourceState>,

    /// Platform version last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub components: BTreeMap<String, ComponentStatus>,
}

impl ResourceStatus {
    /// Record a resource-level condition and derive the overall state from it
    pub fn apply_condition(&mut self, kind: ConditionType, message: impl Into<String>) {
        append_condition(&mut self.conditions, Condition::new(kind, message));
        self.state = Some(kind.resource_state());
    }

    pub fn has_condition(&self, kind: ConditionType) -> bool {
        self.conditions.iter().any(|c| c.kind == kind)
    }

    /// Whether `kind` is the most recent resource-level condition
    pub fn is_last_condition(&self, kind: ConditionType) -> bool {
        self.conditions.last().map(|c| c.kind) == Some(kind)
    }

    /// Whether the resource has completed its first install
    pub fn is_installed(&self) -> bool {
        self.has_condition(ConditionType::InstallComplete)
    }

    /// Whether the resource is in its steady Ready state
    pub fn is_ready(&self) -> bool {
        self.state == Some(ResourceState::Ready)
    }

    pub fn component(&self, name: &str) -> Option<&ComponentStatus> {
        self.components.get(name)
    }

    /// Component status, created as Disabled if absent
    pub fn component_mut(&mut self, name: &str) -> &mut ComponentStatus {
        self.components
            .entry(name.to_string())
            .or_insert_with(|| ComponentStatus::new(name, ComponentState::Disabled))
    }
}
