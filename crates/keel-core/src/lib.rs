//! # keel-core
//!
//! Core library for Keel providing:
//! - The managed resource model (spec, status, conditions)
//! - Component status and generation bookkeeping
//! - Configuration file parsing (keel.yaml)
//! - Requeue delay policy

pub mod config;
pub mod error;
pub mod requeue;
pub mod types;

pub use config::KeelConfig;
pub use error::{Error, Result};
pub use requeue::RequeuePolicy;
