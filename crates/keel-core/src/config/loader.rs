//! Configuration file loading and parsing

use crate::error::{Error, Result};
use crate::types::KeelConfigFile;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::time::Duration;

/// Configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["keel.yaml", "keel.yml"];

/// Loaded and validated Keel configuration
#[derive(Debug, Clone, Default)]
pub struct KeelConfig {
    /// The parsed configuration
    pub config: KeelConfigFile,

    /// Path to the configuration file, `None` when running on defaults
    pub config_path: Option<Utf8PathBuf>,
}

impl KeelConfig {
    /// Load configuration from the specified path or search for it
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let (config_path, content) = match path {
            Some(p) => (p.to_owned(), read_config(p)?),
            None => Self::find_config()?,
        };

        Self::from_yaml(&content, Some(config_path))
    }

    /// Load configuration, falling back to defaults when no file is found
    ///
    /// An explicit path that does not exist is still an error.
    pub fn load_or_default(path: Option<&Utf8Path>) -> Result<Self> {
        match Self::load(path) {
            Err(Error::ConfigNotFound { .. }) if path.is_none() => {
                tracing::debug!("No keel.yaml found, using default configuration");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str, config_path: Option<Utf8PathBuf>) -> Result<Self> {
        let config: KeelConfigFile = if content.trim().is_empty() {
            KeelConfigFile::default()
        } else {
            serde_yaml_ng::from_str(content)?
        };

        let loaded = Self {
            config,
            config_path,
        };
        loaded.validate()?;
        Ok(loaded)
    }

    /// Find configuration file in current directory or parent directories
    fn find_config() -> Result<(Utf8PathBuf, String)> {
        let cwd = std::env::current_dir().map_err(Error::Io)?;
        let cwd = Utf8PathBuf::try_from(cwd)
            .map_err(|_| Error::invalid_config("Current directory path is not valid UTF-8"))?;

        let mut current = cwd.as_path();

        loop {
            for name in CONFIG_FILE_NAMES {
                let path = current.join(name);
                if path.exists() {
                    let content = fs::read_to_string(&path)?;
                    return Ok((path, content));
                }
            }

            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }

        Err(Error::config_not_found(
            "keel.yaml (searched current and parent directories)",
        ))
    }

    fn validate(&self) -> Result<()> {
        let requeue = &self.config.requeue;
        if requeue.min_delay_ms > requeue.max_delay_ms {
            return Err(Error::invalid_config(format!(
                "requeue.min_delay_ms ({}) must not exceed requeue.max_delay_ms ({})",
                requeue.min_delay_ms, requeue.max_delay_ms
            )));
        }

        if let Some(idx) = self
            .config
            .uninstall
            .shared_namespaces
            .iter()
            .position(|ns| ns.trim().is_empty())
        {
            return Err(Error::invalid_config(format!(
                "uninstall.shared_namespaces[{}] must not be empty",
                idx
            )));
        }

        Ok(())
    }

    /// Get the inner configuration file
    pub fn inner(&self) -> &KeelConfigFile {
        &self.config
    }

    /// Minimum interval between two identical error log lines
    pub fn error_throttle(&self) -> Duration {
        Duration::from_secs(self.config.logging.error_throttle_secs)
    }

    /// Minimum interval between two identical progress log lines
    pub fn progress_throttle(&self) -> Duration {
        Duration::from_secs(self.config.logging.progress_throttle_secs)
    }

    /// Poll interval after a pass with nothing left to do
    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.config.controller.idle_interval_secs)
    }
}

fn read_config(path: &Utf8Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::config_not_found(path.as_str())
        } else {
            Error::Io(e)
        }
    })
}
