use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::info;

use crate::config::ContentConfig;
use crate::descriptor::{is_asset_id, AssetDescriptor, BundleDescriptor};
use crate::error::ContentError;
use crate::manifest::ContentManifest;

/// How a caller names an asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetKey {
    /// Hex identifier, compared case-insensitively
    Id(String),
    /// Display name, exact match
    Name(String),
    /// Source path, exact match
    Path(String),
}

impl AssetKey {
    /// Classify a free-form string: a well-formed identifier becomes `Id`,
    /// anything containing a `/` becomes `Path`, everything else `Name`.
    pub fn parse(s: &str) -> Self {
        if is_asset_id(s) {
            AssetKey::Id(s.to_string())
        } else if s.contains('/') {
            AssetKey::Path(s.to_string())
        } else {
            AssetKey::Name(s.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AssetKey::Id(s) | AssetKey::Name(s) | AssetKey::Path(s) => s,
        }
    }

    fn matches(&self, asset: &AssetDescriptor) -> bool {
        match self {
            AssetKey::Id(id) => asset.matches_id(id),
            AssetKey::Name(name) => asset.display_name == *name,
            AssetKey::Path(path) => asset.source_path == *path,
        }
    }
}

impl From<&str> for AssetKey {
    fn from(s: &str) -> Self {
        AssetKey::parse(s)
    }
}

impl From<String> for AssetKey {
    fn from(s: String) -> Self {
        AssetKey::parse(&s)
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An asset together with the group that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub asset: AssetDescriptor,
    pub group: String,
}

#[derive(Default)]
struct RegistryIndex {
    /// lowercase id -> (group index, asset index)
    by_id: HashMap<String, (usize, usize)>,
}

impl RegistryIndex {
    fn build(manifest: &ContentManifest) -> Self {
        let mut by_id = HashMap::new();
        for (g, group) in manifest.groups.iter().enumerate() {
            for (a, asset) in group.assets.iter().enumerate() {
                by_id.entry(asset.id.to_ascii_lowercase()).or_insert((g, a));
            }
        }
        Self { by_id }
    }
}

struct RegistryState {
    manifest: ContentManifest,
    index: RegistryIndex,
}

/// The content registry: an explicitly constructed owner of the manifest.
///
/// Lookups take a read lock; the rename/remove surface used by curation
/// tooling takes the write lock and rebuilds the index.
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new(manifest: ContentManifest) -> Self {
        let index = RegistryIndex::build(&manifest);
        Self {
            state: RwLock::new(RegistryState { manifest, index }),
        }
    }

    /// Read the manifest named by `config`. Archives are looked up next to
    /// the manifest unless it names its own content directory.
    pub fn open(config: &ContentConfig) -> Result<Self, ContentError> {
        let manifest = ContentManifest::load(&config.manifest_path())?;
        info!(
            "Registry opened with content directory {:?}",
            manifest.content_directory
        );
        Ok(Self::new(manifest))
    }

    pub fn content_dir(&self) -> PathBuf {
        self.state.read().manifest.content_directory.clone()
    }

    /// Find an asset by key, optionally restricted to a declared or base type.
    pub fn find_asset(&self, key: &AssetKey, type_filter: Option<&str>) -> Option<AssetEntry> {
        let state = self.state.read();
        let type_ok = |asset: &AssetDescriptor| type_filter.map_or(true, |t| asset.matches_type(t));

        if let AssetKey::Id(id) = key {
            let &(g, a) = state.index.by_id.get(&id.to_ascii_lowercase())?;
            let group = &state.manifest.groups[g];
            let asset = &group.assets[a];
            return type_ok(asset).then(|| AssetEntry {
                asset: asset.clone(),
                group: group.name.clone(),
            });
        }

        state.manifest.groups.iter().find_map(|group| {
            group
                .assets
                .iter()
                .find(|asset| key.matches(asset) && type_ok(asset))
                .map(|asset| AssetEntry {
                    asset: asset.clone(),
                    group: group.name.clone(),
                })
        })
    }

    pub fn bundle(&self, name: &str) -> Option<BundleDescriptor> {
        self.state.read().manifest.bundle(name).cloned()
    }

    pub fn bundle_for_group(&self, group: &str) -> Option<BundleDescriptor> {
        self.state.read().manifest.bundle_for_group(group).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state
            .read()
            .index
            .by_id
            .contains_key(&id.to_ascii_lowercase())
    }

    pub fn asset_count(&self) -> usize {
        self.state.read().manifest.asset_count()
    }

    /// Every registered asset with its owning group, in manifest order.
    pub fn assets(&self) -> Vec<AssetEntry> {
        let state = self.state.read();
        state
            .manifest
            .groups
            .iter()
            .flat_map(|group| {
                group.assets.iter().map(|asset| AssetEntry {
                    asset: asset.clone(),
                    group: group.name.clone(),
                })
            })
            .collect()
    }

    /// Snapshot of the current manifest.
    pub fn manifest(&self) -> ContentManifest {
        self.state.read().manifest.clone()
    }

    /// Change an asset's display name.
    pub fn rename_asset(&self, id: &str, display_name: &str) -> Result<(), ContentError> {
        let mut state = self.state.write();
        let &(g, a) = state
            .index
            .by_id
            .get(&id.to_ascii_lowercase())
            .ok_or_else(|| ContentError::AssetNotFound(id.to_string()))?;
        let asset = &mut state.manifest.groups[g].assets[a];
        info!("Renamed asset {} '{}' -> '{}'", asset.id, asset.display_name, display_name);
        asset.display_name = display_name.to_string();
        Ok(())
    }

    /// Remove an asset from its group.
    pub fn remove_asset(&self, id: &str) -> Option<AssetDescriptor> {
        let mut state = self.state.write();
        let (g, a) = *state.index.by_id.get(&id.to_ascii_lowercase())?;
        let removed = state.manifest.groups[g].assets.remove(a);
        let index = RegistryIndex::build(&state.manifest);
        state.index = index;
        info!("Removed asset {} from registry", removed.id);
        Some(removed)
    }
}
