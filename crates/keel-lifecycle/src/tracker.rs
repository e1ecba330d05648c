//! In-memory generation trackers
//!
//! A tracker entry remembers, for one resource identity, which global phase
//! an operation is in and how far each component has progressed. Entries are
//! never persisted: losing them on restart only means the phase machine
//! starts over, and every state re-derives its starting point from the
//! persisted component status.

use crate::machine::{InstallContext, UninstallContext, UpgradeContext};
use crate::phase::{InstallPhase, UninstallPhase, UpgradePhase};
use keel_core::types::ResourceId;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Progress of one operation for one resource generation
#[derive(Debug, Clone, Default)]
pub struct TrackerEntry<P, C> {
    pub generation: i64,
    pub phase: P,
    pub components: HashMap<String, C>,
    /// Namespaces whose deletion this operation already requested
    pub deleting: BTreeSet<String>,
}

impl<P: Default, C: Default> TrackerEntry<P, C> {
    fn new(generation: i64) -> Self {
        Self {
            generation,
            phase: P::default(),
            components: HashMap::new(),
            deleting: BTreeSet::new(),
        }
    }

    /// Context for a component, created in its initial state on first use
    pub fn component(&mut self, name: &str) -> &mut C {
        self.components.entry(name.to_string()).or_default()
    }
}

/// Shared handle to a tracker entry
pub type SharedEntry<P, C> = Arc<AsyncMutex<TrackerEntry<P, C>>>;

/// Tracker entries for one operation type, keyed by resource identity
pub struct TrackerStore<P, C> {
    entries: Mutex<HashMap<ResourceId, SharedEntry<P, C>>>,
}

impl<P, C> Default for TrackerStore<P, C> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<P, C> TrackerStore<P, C>
where
    P: Default + Send + 'static,
    C: Default + Send + 'static,
{
    /// Entry for `id` at `generation`
    ///
    /// A missing entry, or one recorded for a different generation, is
    /// replaced by a fresh entry in the initial phase with no component
    /// progress.
    pub async fn get(&self, id: &ResourceId, generation: i64) -> SharedEntry<P, C> {
        let existing = self.lookup(id);
        if let Some(entry) = existing {
            if entry.lock().await.generation == generation {
                return entry;
            }
        }

        let fresh = Arc::new(AsyncMutex::new(TrackerEntry::new(generation)));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::clone(&fresh));
        fresh
    }

    /// Current entry for `id`, if any, regardless of generation
    pub fn lookup(&self, id: &ResourceId) -> Option<SharedEntry<P, C>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn delete(&self, id: &ResourceId) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Drop entries left behind by an earlier resource with the same
    /// namespace and name as `id` but another uid
    pub fn delete_replaced(&self, id: &ResourceId) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|k, _| !replaced_by(k, id));
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether `old` names the same resource as `current` under another uid
pub(crate) fn replaced_by(old: &ResourceId, current: &ResourceId) -> bool {
    old.namespace == current.namespace && old.name == current.name && old.uid != current.uid
}

/// Components flagged by an external watch as needing an out-of-band reconcile
#[derive(Debug, Default)]
pub struct WatchSet {
    flagged: Mutex<HashSet<(ResourceId, String)>>,
}

impl WatchSet {
    pub fn mark(&self, id: &ResourceId, component: &str) {
        self.flagged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((id.clone(), component.to_string()));
    }

    pub fn is_watched(&self, id: &ResourceId, component: &str) -> bool {
        self.flagged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(id.clone(), component.to_string()))
    }

    pub fn clear_replaced(&self, id: &ResourceId) {
        self.flagged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(k, _)| !replaced_by(k, id));
    }

    pub fn clear(&self, id: &ResourceId, component: &str) {
        self.flagged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(id.clone(), component.to_string()));
    }
}

/// Per-resource-identity locks serialising reconcile passes
#[derive(Debug, Default)]
pub struct ResourceLocks {
    locks: Mutex<HashMap<ResourceId, Arc<AsyncMutex<()>>>>,
}

impl ResourceLocks {
    /// Wait for exclusive access to `id`; released when the guard drops
    pub async fn acquire(&self, id: &ResourceId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Every tracker the reconcile entry point needs, injected rather than global
#[derive(Default)]
pub struct Trackers {
    pub install: TrackerStore<InstallPhase, InstallContext>,
    pub upgrade: TrackerStore<UpgradePhase, UpgradeContext>,
    pub uninstall: TrackerStore<UninstallPhase, UninstallContext>,
    pub watches: WatchSet,
    pub locks: ResourceLocks,
}

impl Trackers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all tracker state for `id`
    pub fn forget(&self, id: &ResourceId) {
        self.install.delete(id);
        self.upgrade.delete(id);
        self.uninstall.delete(id);
    }

    /// Drop tracker state of any earlier resource that `id` replaced
    pub fn forget_replaced(&self, id: &ResourceId) {
        self.install.delete_replaced(id);
        self.upgrade.delete_replaced(id);
        self.uninstall.delete_replaced(id);
        self.watches.clear_replaced(id);
    }
}
