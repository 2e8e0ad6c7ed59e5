use std::collections::HashMap;
use std::sync::Arc;

use contentdb_core::BundleDescriptor;
use tracing::{debug, info};

use crate::archive::Archive;

/// An open archive held by the cache.
#[derive(Debug)]
pub struct LoadedBundleHandle {
    pub descriptor: BundleDescriptor,
    pub archive: Arc<Archive>,
    pub reference_count: usize,
}

/// Point-in-time view of one cached bundle, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSnapshot {
    pub name: String,
    pub group_name: String,
    pub reference_count: usize,
    pub items: usize,
}

/// Reference-counted map of opened bundles keyed by bundle name.
///
/// Owned by the queue consumer; nothing else mutates it.
#[derive(Debug, Default)]
pub struct BundleCache {
    bundles: HashMap<String, LoadedBundleHandle>,
    opens: usize,
}

impl BundleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse a cached bundle, bumping its reference count.
    pub fn acquire(&mut self, name: &str) -> Option<Arc<Archive>> {
        let handle = self.bundles.get_mut(name)?;
        handle.reference_count += 1;
        debug!("Bundle {} reused (refs: {})", name, handle.reference_count);
        Some(Arc::clone(&handle.archive))
    }

    /// Store a freshly opened bundle with a reference count of one.
    pub fn insert(&mut self, descriptor: BundleDescriptor, archive: Arc<Archive>) {
        self.opens += 1;
        let name = descriptor.name.clone();
        self.bundles.insert(
            name,
            LoadedBundleHandle {
                descriptor,
                archive,
                reference_count: 1,
            },
        );
    }

    /// Drop one reference. The handle is unloaded when the count reaches
    /// zero. Returns the remaining count, or `None` if the bundle was not
    /// cached.
    pub fn release(&mut self, name: &str) -> Option<usize> {
        let handle = self.bundles.get_mut(name)?;
        handle.reference_count = handle.reference_count.saturating_sub(1);
        let remaining = handle.reference_count;
        if remaining == 0 {
            self.bundles.remove(name);
            info!("Bundle {} unloaded", name);
        }
        Some(remaining)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bundles.contains_key(name)
    }

    pub fn reference_count(&self, name: &str) -> Option<usize> {
        self.bundles.get(name).map(|h| h.reference_count)
    }

    pub fn get(&self, name: &str) -> Option<&LoadedBundleHandle> {
        self.bundles.get(name)
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Unload every bundle regardless of reference count. Returns how many
    /// were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.bundles.len();
        self.bundles.clear();
        info!("Unloaded {} bundles", count);
        count
    }

    /// Every cached bundle, sorted by name.
    pub fn snapshot(&self) -> Vec<BundleSnapshot> {
        let mut bundles: Vec<_> = self
            .bundles
            .values()
            .map(|h| BundleSnapshot {
                name: h.descriptor.name.clone(),
                group_name: h.descriptor.group_name.clone(),
                reference_count: h.reference_count,
                items: h.archive.len(),
            })
            .collect();
        bundles.sort_by(|a, b| a.name.cmp(&b.name));
        bundles
    }

    /// Archives opened since the cache was created.
    pub fn total_opens(&self) -> usize {
        self.opens
    }
}
