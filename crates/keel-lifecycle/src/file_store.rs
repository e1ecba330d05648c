//! File-backed resource store
//!
//! Each resource is one JSON document under the store directory. Every
//! read-modify-write happens under an exclusive file lock, so a status patch
//! is atomic with respect to concurrent writers in other processes.

use crate::status::{check_identity, ResourceStore, StatusUpdate, StatusWriter};
use anyhow::{Context, Result};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use fs4::fs_std::FileExt;
use keel_core::types::{ManagedResource, ResourceId, ResourceStatus};
use keel_core::Error;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

/// What [`FileResourceStore::apply`] did with a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    Created,
    /// Spec changed; carries the new generation
    Updated(i64),
    Unchanged,
}

/// Resource store keeping one JSON document per resource
#[derive(Debug, Clone)]
pub struct FileResourceStore {
    dir: Utf8PathBuf,
}

impl FileResourceStore {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn path(&self, namespace: &str, name: &str) -> Utf8PathBuf {
        self.dir.join(format!("{}__{}.json", namespace, name))
    }

    /// Create a resource from a manifest, or apply the manifest's spec to the stored one
    ///
    /// Only the spec of an existing resource is taken from the manifest; a
    /// changed spec bumps the generation and the status is kept.
    pub fn apply(&self, manifest: &ManagedResource) -> Result<ApplyResult> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create store directory {}", self.dir))?;

        let path = self.path(&manifest.metadata.namespace, &manifest.metadata.name);
        if !path.exists() {
            let mut resource = ManagedResource::new(
                &manifest.metadata.namespace,
                &manifest.metadata.name,
            );
            resource.spec = manifest.spec.clone();
            resource.metadata.uid = new_uid();
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&path)
                .with_context(|| format!("Failed to create {}", path))?;
            file.lock_exclusive()
                .with_context(|| format!("Failed to lock {}", path))?;
            write_document(&mut file, &resource)?;
            tracing::info!(resource = %resource.id(), "Created resource");
            return Ok(ApplyResult::Created);
        }

        let spec = manifest.spec.clone();
        let result = self.modify(&path, |resource| {
            if resource.spec == spec {
                ApplyResult::Unchanged
            } else {
                resource.update_spec(spec);
                ApplyResult::Updated(resource.generation())
            }
        })?;
        if let ApplyResult::Updated(generation) = result {
            tracing::info!(
                resource = %format!("{}/{}", manifest.metadata.namespace, manifest.metadata.name),
                generation,
                "Updated resource spec"
            );
        }
        Ok(result)
    }

    /// Read a resource, if it exists
    pub fn read(&self, namespace: &str, name: &str) -> Result<Option<ManagedResource>> {
        let path = self.path(namespace, name);
        if !path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&path).with_context(|| format!("Failed to open {}", path))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path))?;
        read_document(&mut file, &path).map(Some)
    }

    /// Every resource in the store, ordered by namespace and name
    pub fn list(&self) -> Result<Vec<ManagedResource>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut resources = Vec::new();
        for entry in self
            .dir
            .read_dir_utf8()
            .with_context(|| format!("Failed to read {}", self.dir))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.extension() != Some("json") {
                continue;
            }
            let mut file =
                File::open(path).with_context(|| format!("Failed to open {}", path))?;
            file.lock_exclusive()
                .with_context(|| format!("Failed to lock {}", path))?;
            resources.push(read_document(&mut file, path)?);
        }
        resources.sort_by(|a, b| a.id().cmp(&b.id()));
        Ok(resources)
    }

    /// Mark a resource for deletion; returns false when it does not exist
    pub fn request_deletion(&self, namespace: &str, name: &str) -> Result<bool> {
        let path = self.path(namespace, name);
        if !path.exists() {
            return Ok(false);
        }
        self.modify(&path, |r| r.metadata.deletion_requested = true)?;
        Ok(true)
    }

    /// Remove the document of a finalized resource
    pub fn remove(&self, namespace: &str, name: &str) -> Result<()> {
        let path = self.path(namespace, name);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path))?;
        }
        Ok(())
    }

    fn modify<T>(&self, path: &Utf8Path, f: impl FnOnce(&mut ManagedResource) -> T) -> Result<T> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path))?;

        // Exclusive lock, released when `file` is dropped
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path))?;

        let mut resource = read_document(&mut file, path)?;
        let result = f(&mut resource);
        write_document(&mut file, &resource)?;
        Ok(result)
    }

    fn write_status_blocking(&self, id: &ResourceId, update: &StatusUpdate) -> Result<ResourceStatus> {
        let path = self.path(&id.namespace, &id.name);
        if !path.exists() {
            return Err(Error::resource_not_found(id.to_string()).into());
        }
        self.modify(&path, |resource| {
            check_identity(resource, id)?;
            update.apply(&mut resource.status);
            Ok::<_, Error>(resource.status.clone())
        })?
        .map_err(Into::into)
    }

    fn finalize_blocking(&self, id: &ResourceId) -> Result<()> {
        let path = self.path(&id.namespace, &id.name);
        if !path.exists() {
            return Err(Error::resource_not_found(id.to_string()).into());
        }
        self.modify(&path, |resource| {
            check_identity(resource, id)?;
            resource.metadata.finalized = true;
            Ok::<_, Error>(())
        })?
        .map_err(Into::into)
    }
}

fn new_uid() -> String {
    format!("{:x}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

fn read_document(file: &mut File, path: &Utf8Path) -> Result<ManagedResource> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut content)
        .with_context(|| format!("Failed to read {}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path))
}

fn write_document(file: &mut File, resource: &ManagedResource) -> Result<()> {
    let json = serde_json::to_string_pretty(resource).context("Failed to serialize resource")?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(json.as_bytes())
        .context("Failed to write resource")?;
    file.sync_all().context("Failed to sync resource file")?;
    Ok(())
}

#[async_trait]
impl StatusWriter for FileResourceStore {
    async fn write_status(&self, id: &ResourceId, update: StatusUpdate) -> Result<ResourceStatus> {
        let store = self.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || store.write_status_blocking(&id, &update))
            .await
            .context("Status write task failed")?
    }
}

#[async_trait]
impl ResourceStore for FileResourceStore {
    async fn load(&self, namespace: &str, name: &str) -> Result<Option<ManagedResource>> {
        let store = self.clone();
        let (namespace, name) = (namespace.to_string(), name.to_string());
        tokio::task::spawn_blocking(move || store.read(&namespace, &name))
            .await
            .context("Resource load task failed")?
    }

    async fn finalize(&self, id: &ResourceId) -> Result<()> {
        let store = self.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || store.finalize_blocking(&id))
            .await
            .context("Finalize task failed")?
    }
}
