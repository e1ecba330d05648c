//! Assertion helpers for lifecycle tests

#![allow(dead_code)]

use keel_core::types::{ComponentState, ConditionType, ManagedResource, ResourceState};
use keel_lifecycle::{Outcome, OutcomeKind, StatusUpdate};

/// Assert a component's recorded state
pub fn assert_component_state(resource: &ManagedResource, component: &str, expected: ComponentState) {
    let status = resource
        .component_status(component)
        .unwrap_or_else(|| panic!("component {} has no status", component));
    assert_eq!(
        status.state, expected,
        "component {} state: expected {:?}, got {:?} ({:?})",
        component, expected, status.state, status
    );
}

/// Assert a component's generation bookkeeping
pub fn assert_component_generations(
    resource: &ManagedResource,
    component: &str,
    reconciling: i64,
    last_reconciled: i64,
) {
    let status = resource
        .component_status(component)
        .unwrap_or_else(|| panic!("component {} has no status", component));
    assert_eq!(
        (status.reconciling_generation, status.last_reconciled_generation),
        (reconciling, last_reconciled),
        "component {} generations (reconciling, last reconciled)",
        component
    );
}

/// Assert the overall resource state
pub fn assert_resource_state(resource: &ManagedResource, expected: ResourceState) {
    assert_eq!(
        resource.status.state,
        Some(expected),
        "resource state, conditions: {:?}",
        condition_kinds(resource)
    );
}

/// Assert the most recent resource-level condition
pub fn assert_last_condition(resource: &ManagedResource, expected: ConditionType) {
    assert!(
        resource.status.is_last_condition(expected),
        "expected last condition {:?}, conditions: {:?}",
        expected,
        condition_kinds(resource)
    );
}

/// Resource-level condition kinds, oldest first
pub fn condition_kinds(resource: &ManagedResource) -> Vec<ConditionType> {
    resource.status.conditions.iter().map(|c| c.kind).collect()
}

pub fn assert_requeue(outcome: &Outcome) {
    assert!(
        matches!(outcome, Outcome::RequeueAfter(_)),
        "expected requeue, got {:?}",
        outcome
    );
}

pub fn assert_error_kind(outcome: &Outcome, expected: OutcomeKind) {
    match outcome {
        Outcome::Error { kind, .. } => assert_eq!(*kind, expected, "outcome: {:?}", outcome),
        other => panic!("expected {:?} error, got {:?}", expected, other),
    }
}

/// Assert that no component's generations ever moved backwards across snapshots
pub fn assert_generations_monotonic(snapshots: &[ManagedResource]) {
    for pair in snapshots.windows(2) {
        let (before, after) = (&pair[0], &pair[1]);
        for (name, old) in &before.status.components {
            let Some(new) = after.status.components.get(name) else {
                panic!("component {} lost its status", name);
            };
            assert!(
                new.last_reconciled_generation >= old.last_reconciled_generation,
                "component {} last reconciled generation went from {} to {}",
                name,
                old.last_reconciled_generation,
                new.last_reconciled_generation
            );
        }
    }
}

/// Resource-level writes, in order
pub fn resource_level_writes(writes: &[StatusUpdate]) -> Vec<&StatusUpdate> {
    writes.iter().filter(|w| w.is_resource_level()).collect()
}
