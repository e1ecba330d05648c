//! CLI command implementations

pub mod apply;
pub mod delete;
pub mod reconcile;
pub mod run;
pub mod status;
pub mod validate;
