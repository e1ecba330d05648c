//! Utility functions shared across CLI commands

use anyhow::{anyhow, Context, Result};
use camino::Utf8PathBuf;
use keel_core::KeelConfig;
use keel_lifecycle::{ComponentManifest, FileResourceStore, Reconciler, ResourceStore};
use std::sync::Arc;

use crate::cli::GlobalArgs;

/// Get the keel data directory
///
/// Prefers KEEL_HOME, then the platform data directory (~/.local/share/keel
/// on Linux).
pub fn get_keel_dir() -> Result<Utf8PathBuf> {
    if let Ok(home) = std::env::var("KEEL_HOME") {
        return Ok(Utf8PathBuf::from(home));
    }

    let data = dirs::data_dir().ok_or_else(|| anyhow!("Could not determine data directory"))?;
    let data = Utf8PathBuf::from_path_buf(data)
        .map_err(|p| anyhow!("Data directory is not valid UTF-8: {}", p.display()))?;
    Ok(data.join("keel"))
}

/// Directory holding the resource documents
pub fn state_dir(global: &GlobalArgs) -> Result<Utf8PathBuf> {
    match &global.state_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(get_keel_dir()?.join("resources")),
    }
}

pub fn resource_store(global: &GlobalArgs) -> Result<FileResourceStore> {
    Ok(FileResourceStore::new(state_dir(global)?))
}

pub fn load_config(global: &GlobalArgs) -> Result<KeelConfig> {
    KeelConfig::load_or_default(global.config.as_deref()).context("Failed to load keel config")
}

pub fn load_manifest(global: &GlobalArgs) -> Result<ComponentManifest> {
    ComponentManifest::load(&global.components)
}

/// Reconciler over the script components and the file-backed store
pub fn build_reconciler(global: &GlobalArgs, config: &KeelConfig) -> Result<Reconciler> {
    let manifest = load_manifest(global)?;
    let registry = manifest
        .registry()
        .with_context(|| format!("Invalid component manifest {}", global.components))?;
    let store: Arc<dyn ResourceStore> = Arc::new(resource_store(global)?);

    Ok(Reconciler::from_config(
        Arc::new(registry),
        store,
        Arc::new(manifest.platform()),
        config,
    ))
}
