//! Dependency readiness gate

use crate::component::Component;
use keel_core::types::{ComponentState, ComponentStatus};
use std::collections::BTreeMap;

/// Whether every declared dependency of `component` is Ready
///
/// A dependency missing from the status map, or in any state other than
/// Ready, blocks. Disabled dependencies block too.
pub fn dependencies_met(
    component: &dyn Component,
    statuses: &BTreeMap<String, ComponentStatus>,
) -> bool {
    unmet_dependencies(component, statuses).is_empty()
}

/// Declared dependencies of `component` that are not Ready yet
pub fn unmet_dependencies(
    component: &dyn Component,
    statuses: &BTreeMap<String, ComponentStatus>,
) -> Vec<String> {
    component
        .dependencies()
        .into_iter()
        .filter(|dep| {
            statuses
                .get(dep)
                .map(|s| s.state != ComponentState::Ready)
                .unwrap_or(true)
        })
        .collect()
}
