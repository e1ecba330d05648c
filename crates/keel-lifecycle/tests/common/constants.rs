//! Test constants for keel-lifecycle tests

#![allow(dead_code)]

/// Namespace of the managed resource under test
pub const TEST_NAMESPACE: &str = "default";

/// Name of the managed resource under test
pub const TEST_NAME: &str = "keel";

/// Platform version a fresh install targets
pub const INSTALL_VERSION: &str = "1.4.0";

/// Platform version upgrade tests move to
pub const UPGRADE_VERSION: &str = "1.5.0";

/// Upper bound on passes before a harness gives up
pub const MAX_TEST_PASSES: usize = 50;

/// Namespace shared by several components and removed last
pub const SHARED_NAMESPACE: &str = "keel-shared";

/// Second shared namespace, slower to terminate
pub const MONITORING_NAMESPACE: &str = "keel-monitoring";
