//! Generation comparison and version predicates
//!
//! [`config_changed`] is the single rule for deciding whether a Ready
//! component must be revisited, and [`awaiting_install`] the rule for a
//! component that is not on the cluster. The global install phase and the
//! per-component install machine both call them so they cannot disagree.

use keel_core::types::{ComponentState, ComponentStatus};
use keel_core::{Error, Result};
use semver::Version;

/// Whether the resource generation has moved past what the component last saw
///
/// An in-flight operation (`reconciling_generation > 0`) is superseded by any
/// newer generation. Otherwise only a Ready component whose last reconciled
/// generation is behind counts as changed.
pub fn config_changed(generation: i64, status: &ComponentStatus) -> bool {
    if status.reconciling_generation > 0 {
        return generation > status.reconciling_generation;
    }
    status.state == ComponentState::Ready && generation > status.last_reconciled_generation
}

/// Parse a platform version, tolerating a leading `v`
pub fn parse_version(version: &str) -> Result<Version> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).map_err(|_| Error::invalid_version(version))
}

/// Whether the reconciled platform version satisfies a component's minimum
///
/// An unknown platform version (nothing reconciled yet) is always ok; an
/// unparseable version never is.
pub fn is_version_ok(platform_version: Option<&str>, min_version: Option<&str>) -> bool {
    let (Some(platform), Some(min)) = (platform_version, min_version) else {
        return true;
    };
    if platform.trim().is_empty() {
        return true;
    }

    match (parse_version(platform), parse_version(min)) {
        (Ok(platform), Ok(min)) => platform >= min,
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!("Failed comparing platform version: {}", e);
            false
        }
    }
}

/// Whether a Disabled or Uninstalled component may be installed now
///
/// A component with a minimum platform version waits for an upgrade that
/// reaches it.
pub fn awaiting_install(
    state: ComponentState,
    platform_version: Option<&str>,
    min_version: Option<&str>,
) -> bool {
    matches!(state, ComponentState::Disabled | ComponentState::Uninstalled)
        && is_version_ok(platform_version, min_version)
}

/// Whether the spec targets a newer platform version than the one reconciled
pub fn upgrade_pending(spec_version: Option<&str>, status_version: Option<&str>) -> Result<bool> {
    match (spec_version, status_version) {
        (Some(spec), Some(status)) if !spec.is_empty() && !status.is_empty() => {
            Ok(parse_version(spec)? > parse_version(status)?)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: ComponentState, reconciling: i64, last: i64) -> ComponentStatus {
        ComponentStatus {
            name: "ingress".to_string(),
            state,
            reconciling_generation: reconciling,
            last_reconciled_generation: last,
            ..Default::default()
        }
    }

    #[test]
    fn test_inflight_generation_takes_precedence() {
        // last_reconciled is ignored while an operation is in flight
        let s = status(ComponentState::Installing, 3, 1);
        assert!(!config_changed(3, &s));
        assert!(config_changed(4, &s));
    }

    #[test]
    fn test_ready_component_behind_generation() {
        assert!(config_changed(5, &status(ComponentState::Ready, 0, 4)));
        assert!(!config_changed(4, &status(ComponentState::Ready, 0, 4)));
    }

    #[test]
    fn test_non_ready_without_inflight_is_unchanged() {
        assert!(!config_changed(9, &status(ComponentState::Disabled, 0, 0)));
        assert!(!config_changed(9, &status(ComponentState::Uninstalled, 0, 2)));
    }

    #[test]
    fn test_version_ok() {
        assert!(is_version_ok(None, Some("1.4.0")));
        assert!(is_version_ok(Some(""), Some("1.4.0")));
        assert!(is_version_ok(Some("1.3.0"), None));
        assert!(is_version_ok(Some("v1.4.0"), Some("1.4.0")));
        assert!(is_version_ok(Some("1.5.2"), Some("1.4.0")));
        assert!(!is_version_ok(Some("1.3.9"), Some("1.4.0")));
        assert!(!is_version_ok(Some("not-a-version"), Some("1.4.0")));
    }

    #[test]
    fn test_awaiting_install() {
        assert!(awaiting_install(ComponentState::Disabled, Some("1.4.0"), None));
        assert!(awaiting_install(ComponentState::Uninstalled, Some("1.4.0"), Some("1.4.0")));
        assert!(!awaiting_install(ComponentState::Disabled, Some("1.3.0"), Some("1.4.0")));
        assert!(!awaiting_install(ComponentState::Ready, Some("1.4.0"), None));
        assert!(!awaiting_install(ComponentState::Installing, None, None));
    }

    #[test]
    fn test_upgrade_pending() {
        assert!(upgrade_pending(Some("1.5.0"), Some("1.4.0")).unwrap());
        assert!(!upgrade_pending(Some("1.4.0"), Some("1.4.0")).unwrap());
        assert!(!upgrade_pending(Some("1.5.0"), None).unwrap());
        assert!(!upgrade_pending(None, Some("1.4.0")).unwrap());
        assert!(upgrade_pending(Some("bogus"), Some("1.4.0")).is_err());
    }
}
