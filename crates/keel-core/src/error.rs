//! Error types for keel-core

use thiserror::Error;

/// Result type alias using keel-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Keel
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration values
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid semver version
    #[error("Invalid version format: {version}")]
    InvalidVersion { version: String },

    /// Component name not present in the registry
    #[error("Unknown component: {component}")]
    UnknownComponent { component: String },

    /// Two registered components share a name
    #[error("Duplicate component registration: {component}")]
    DuplicateComponent { component: String },

    /// A component depends on a name that is not registered
    #[error("Component {component} depends on unknown component {dependency}")]
    UnknownDependency {
        component: String,
        dependency: String,
    },

    /// Circular dependency
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    /// Managed resource could not be found in the store
    #[error("Resource not found: {resource}")]
    ResourceNotFound { resource: String },

    /// The persisted status changed underneath a writer
    #[error("Status update conflict for {resource}: {message}")]
    StatusConflict { resource: String, message: String },
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid version error
    pub fn invalid_version(version: impl Into<String>) -> Self {
        Self::InvalidVersion {
            version: version.into(),
        }
    }

    /// Create an unknown component error
    pub fn unknown_component(component: impl Into<String>) -> Self {
        Self::UnknownComponent {
            component: component.into(),
        }
    }

    /// Create a duplicate component error
    pub fn duplicate_component(component: impl Into<String>) -> Self {
        Self::DuplicateComponent {
            component: component.into(),
        }
    }

    /// Create an unknown dependency error
    pub fn unknown_dependency(component: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnknownDependency {
            component: component.into(),
            dependency: dependency.into(),
        }
    }

    /// Create a circular dependency error
    pub fn circular_dependency(cycle: impl Into<String>) -> Self {
        Self::CircularDependency {
            cycle: cycle.into(),
        }
    }

    /// Create a resource not found error
    pub fn resource_not_found(resource: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource: resource.into(),
        }
    }

    /// Create a status conflict error
    pub fn status_conflict(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StatusConflict {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Whether this error is expected to clear on its own after a short wait
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_) | Error::StatusConflict { .. })
    }
}
