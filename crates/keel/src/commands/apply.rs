//! Apply command

use anyhow::{Context, Result};
use keel_core::types::ManagedResource;
use keel_lifecycle::ApplyResult;

use crate::cli::{ApplyArgs, GlobalArgs};
use crate::output;
use crate::utils;

pub fn run(args: ApplyArgs, global: &GlobalArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file))?;
    let manifest: ManagedResource = serde_yaml_ng::from_str(&content)
        .with_context(|| format!("Invalid resource manifest {}", args.file))?;

    let namespace = &manifest.metadata.namespace;
    let name = &manifest.metadata.name;
    if name.is_empty() {
        anyhow::bail!("Resource manifest {} has no metadata.name", args.file);
    }

    let store = utils::resource_store(global)?;
    match store.apply(&manifest)? {
        ApplyResult::Created => output::success(&format!("{}/{} created", namespace, name)),
        ApplyResult::Updated(generation) => output::success(&format!(
            "{}/{} updated (generation {})",
            namespace, name, generation
        )),
        ApplyResult::Unchanged => output::info(&format!("{}/{} unchanged", namespace, name)),
    }

    Ok(())
}
