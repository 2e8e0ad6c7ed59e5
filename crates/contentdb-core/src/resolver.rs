use tracing::debug;

use crate::descriptor::{AssetDescriptor, BundleDescriptor};
use crate::error::ContentError;
use crate::registry::{AssetEntry, AssetKey, Registry};

/// Where an asset lives and what must be open before it can be extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub asset: AssetDescriptor,
    pub group: String,
    /// Owning bundle; its `dependencies` are already the flattened closure.
    pub bundle: BundleDescriptor,
}

impl Resolution {
    pub fn dependencies(&self) -> &[BundleDescriptor] {
        &self.bundle.dependencies
    }
}

/// Maps asset keys to their owning bundle and dependency chain.
///
/// Never touches the file system.
pub struct DependencyResolver<'a> {
    registry: &'a Registry,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    pub fn resolve(&self, key: &AssetKey) -> Result<Resolution, ContentError> {
        self.resolve_typed(key, None)
    }

    /// Resolve with an optional declared/base type filter.
    pub fn resolve_typed(
        &self,
        key: &AssetKey,
        type_filter: Option<&str>,
    ) -> Result<Resolution, ContentError> {
        let entry = self.find(key, type_filter)?;
        self.bundle_of(entry)
    }

    /// First half of resolution: the registry lookup alone.
    pub fn find(&self, key: &AssetKey, type_filter: Option<&str>) -> Result<AssetEntry, ContentError> {
        self.registry
            .find_asset(key, type_filter)
            .ok_or_else(|| ContentError::AssetNotFound(key.to_string()))
    }

    /// Second half of resolution: the built bundle owning `entry`.
    pub fn bundle_of(&self, entry: AssetEntry) -> Result<Resolution, ContentError> {
        let bundle = self
            .registry
            .bundle_for_group(&entry.group)
            .ok_or_else(|| ContentError::BundleNotFound(entry.group.clone()))?;

        debug!(
            "Resolved {} -> {} ({} dependencies)",
            entry.asset.id,
            bundle.name,
            bundle.dependencies.len()
        );

        Ok(Resolution {
            asset: entry.asset,
            group: entry.group,
            bundle,
        })
    }

    /// Look up a bundle by name for bundle-only loads.
    pub fn resolve_bundle(&self, name: &str) -> Result<BundleDescriptor, ContentError> {
        self.registry
            .bundle(name)
            .ok_or_else(|| ContentError::BundleNotFound(name.to_string()))
    }
}
