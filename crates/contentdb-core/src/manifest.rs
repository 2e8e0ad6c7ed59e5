use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::descriptor::{AssetDescriptor, BundleDescriptor};
use crate::error::ContentError;

/// Default manifest file name inside the content directory.
pub const DEFAULT_MANIFEST_FILE: &str = "ContentDB.json";

/// A named group of assets. Each built group becomes one bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentGroup {
    pub name: String,
    #[serde(default)]
    pub assets: Vec<AssetDescriptor>,
}

impl ContentGroup {
    pub fn new(name: impl Into<String>, assets: Vec<AssetDescriptor>) -> Self {
        Self {
            name: name.into(),
            assets,
        }
    }
}

/// The build-time description of groups, bundles and their dependency graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentManifest {
    #[serde(default)]
    pub groups: Vec<ContentGroup>,
    #[serde(default)]
    pub bundles: Vec<BundleDescriptor>,
    #[serde(default)]
    pub content_directory: PathBuf,
}

impl ContentManifest {
    /// Parse a manifest document. Invalid asset descriptors are dropped.
    pub fn from_json_str(json: &str) -> Result<Self, ContentError> {
        let mut manifest: ContentManifest = serde_json::from_str(json)?;
        manifest.drop_invalid_assets();
        Ok(manifest)
    }

    /// Read a manifest file. The content directory is relative to the
    /// directory containing the file, and defaults to it.
    pub fn load(path: &Path) -> Result<Self, ContentError> {
        let content =
            fs::read_to_string(path).map_err(|e| ContentError::Io(path.to_path_buf(), e))?;

        let mut manifest: ContentManifest = serde_json::from_str(&content)
            .map_err(|e| ContentError::Manifest(path.to_path_buf(), e.to_string()))?;
        manifest.drop_invalid_assets();

        if manifest.content_directory.is_relative() {
            let base = path.parent().unwrap_or(Path::new(""));
            manifest.content_directory = base.join(&manifest.content_directory);
        }

        info!(
            "Loaded manifest {:?}: {} groups, {} bundles, {} assets",
            path,
            manifest.groups.len(),
            manifest.bundles.len(),
            manifest.asset_count()
        );
        Ok(manifest)
    }

    fn drop_invalid_assets(&mut self) {
        for group in &mut self.groups {
            group.assets.retain(|asset| match asset.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("Asset excluded from group '{}': {}", group.name, e);
                    false
                }
            });
        }
    }

    pub fn group(&self, name: &str) -> Option<&ContentGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn bundle(&self, name: &str) -> Option<&BundleDescriptor> {
        self.bundles.iter().find(|b| b.name == name)
    }

    /// The built bundle for a group, if the build produced one.
    pub fn bundle_for_group(&self, group: &str) -> Option<&BundleDescriptor> {
        self.bundles.iter().find(|b| b.group_name == group)
    }

    pub fn asset_count(&self) -> usize {
        self.groups.iter().map(|g| g.assets.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "groups": [
            {
                "name": "props",
                "assets": [
                    {
                        "id": "0123456789abcdef0123456789abcdef",
                        "displayName": "Crate",
                        "sourcePath": "Assets/Props/Crate.prefab",
                        "declaredType": "GameObject",
                        "baseType": "Object"
                    },
                    {
                        "id": "bad",
                        "displayName": "Broken",
                        "sourcePath": "Assets/Props/Broken.prefab"
                    }
                ]
            },
            { "name": "shared", "assets": [] }
        ],
        "bundles": [
            {
                "name": "props.bundle",
                "groupName": "props",
                "checksum": 1234,
                "contentHash": "f00d",
                "dependencies": [
                    { "name": "shared.bundle", "groupName": "shared", "CRC": 99 }
                ]
            },
            { "name": "shared.bundle", "groupName": "shared", "checksum": 99 }
        ]
    }"#;

    #[test]
    fn parses_groups_and_bundles() {
        let manifest = ContentManifest::from_json_str(MANIFEST).unwrap();
        assert_eq!(manifest.groups.len(), 2);
        assert_eq!(manifest.bundles.len(), 2);

        let props = manifest.bundle_for_group("props").unwrap();
        assert_eq!(props.name, "props.bundle");
        assert_eq!(props.checksum, 1234);
        assert_eq!(props.dependencies.len(), 1);
        assert_eq!(props.dependencies[0].checksum, 99);
    }

    #[test]
    fn invalid_assets_are_dropped() {
        let manifest = ContentManifest::from_json_str(MANIFEST).unwrap();
        assert_eq!(manifest.asset_count(), 1);
        assert_eq!(manifest.group("props").unwrap().assets[0].display_name, "Crate");
    }

    #[test]
    fn load_defaults_content_directory_to_manifest_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_MANIFEST_FILE);
        fs::write(&path, MANIFEST).unwrap();

        let manifest = ContentManifest::load(&path).unwrap();
        assert_eq!(manifest.content_directory, dir.path());
    }

    #[test]
    fn relative_content_directory_follows_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_MANIFEST_FILE);
        fs::write(&path, r#"{ "contentDirectory": "archives" }"#).unwrap();

        let manifest = ContentManifest::load(&path).unwrap();
        assert_eq!(manifest.content_directory, dir.path().join("archives"));
    }

    #[test]
    fn absolute_content_directory_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_MANIFEST_FILE);
        let elsewhere = tempfile::tempdir().unwrap();
        let document = serde_json::json!({ "contentDirectory": elsewhere.path() });
        fs::write(&path, document.to_string()).unwrap();

        let manifest = ContentManifest::load(&path).unwrap();
        assert_eq!(manifest.content_directory, elsewhere.path());
    }

    #[test]
    fn missing_file_returns_io_error() {
        let result = ContentManifest::load(Path::new("/nonexistent/ContentDB.json"));
        match result {
            Err(ContentError::Io(_, _)) => {}
            other => panic!("expected Io, got: {:?}", other),
        }
    }

    #[test]
    fn malformed_file_returns_manifest_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_MANIFEST_FILE);
        fs::write(&path, "{ not json").unwrap();

        match ContentManifest::load(&path) {
            Err(ContentError::Manifest(p, _)) => assert_eq!(p, path),
            other => panic!("expected Manifest, got: {:?}", other),
        }
    }
}
