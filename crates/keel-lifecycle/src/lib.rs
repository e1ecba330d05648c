//! # keel-lifecycle
//!
//! Component lifecycle orchestration for Keel:
//! - Component adapter trait and validated registry
//! - Dependency readiness gate and generation predicates
//! - Per-component install, upgrade and uninstall state machines
//! - Global phase machines and their in-memory generation trackers
//! - Status persistence (in-memory and file-backed stores)
//! - Reconcile entry point and controller loop
//! - Shell-script component adapter

pub mod component;
pub mod controller;
pub mod file_store;
pub mod gate;
pub mod generation;
pub mod log;
pub mod machine;
pub mod outcome;
pub mod pass;
pub mod phase;
pub mod platform;
pub mod reconciler;
pub mod registry;
pub mod script;
pub mod status;
pub mod tracker;

pub use component::{Component, HookContext, Operation};
pub use controller::{Controller, RunSummary, StopReason};
pub use file_store::{ApplyResult, FileResourceStore};
pub use log::ThrottledLog;
pub use outcome::{HookError, Outcome, OutcomeKind};
pub use pass::ReconcileSettings;
pub use platform::{NoopPlatform, Platform};
pub use reconciler::{select_operation, Reconciler};
pub use registry::ComponentRegistry;
pub use script::{ComponentManifest, ScriptComponent, ScriptPlatform};
pub use status::{ComponentUpdate, MemoryStatusStore, ResourceStore, StatusUpdate, StatusWriter};
pub use tracker::Trackers;
