//! Common test utilities for keel-lifecycle
//!
//! This module provides shared test infrastructure including:
//! - Constants for resource identity and versions
//! - Resource builders and a reconcile harness
//! - Scriptable fake components and platform
//! - Assertion helpers for status and hook history

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod assertions;
pub mod builders;
pub mod constants;
pub mod mocks;

pub use assertions::*;
pub use builders::*;
pub use constants::*;
pub use mocks::*;
