use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::ContentError;

/// Length of an asset identifier (hex characters).
pub const ASSET_ID_LEN: usize = 32;

/// Declared type marking an asset as a scene.
pub const SCENE_TYPE: &str = "SceneAsset";

/// Identity record for a single registered asset.
///
/// Field aliases accept the older database layout (`guid`, `name`, `path`,
/// `type`, `base_type`) alongside the current camelCase names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescriptor {
    #[serde(alias = "guid")]
    pub id: String,
    #[serde(alias = "name", default)]
    pub display_name: String,
    #[serde(alias = "path", default)]
    pub source_path: String,
    #[serde(alias = "type", default)]
    pub declared_type: String,
    #[serde(alias = "base_type", default)]
    pub base_type: String,
}

impl AssetDescriptor {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        source_path: impl Into<String>,
        declared_type: impl Into<String>,
        base_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            source_path: source_path.into(),
            declared_type: declared_type.into(),
            base_type: base_type.into(),
        }
    }

    /// Whether the descriptor is usable: non-empty source path and a
    /// well-formed identifier.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn validate(&self) -> Result<(), ContentError> {
        if self.source_path.is_empty() {
            return Err(self.invalid("empty source path"));
        }
        if !is_asset_id(&self.id) {
            return Err(self.invalid(format!(
                "identifier must be {} hex characters",
                ASSET_ID_LEN
            )));
        }
        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> ContentError {
        ContentError::InvalidDescriptor {
            id: self.id.clone(),
            reason: reason.into(),
        }
    }

    /// Scenes are served by the scene loader only.
    pub fn is_scene(&self) -> bool {
        self.declared_type.eq_ignore_ascii_case(SCENE_TYPE)
            || self.base_type.eq_ignore_ascii_case(SCENE_TYPE)
    }

    /// Type filter used by typed lookups: matches the declared or the base type.
    pub fn matches_type(&self, type_name: &str) -> bool {
        self.declared_type == type_name || self.base_type == type_name
    }

    pub fn matches_id(&self, id: &str) -> bool {
        self.id.eq_ignore_ascii_case(id)
    }
}

/// Whether `s` has the shape of an asset identifier.
pub fn is_asset_id(s: &str) -> bool {
    s.len() == ASSET_ID_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// A built archive and its flattened dependency chain.
///
/// Equality and hashing only consider `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDescriptor {
    pub name: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default, alias = "CRC", alias = "crc")]
    pub checksum: u32,
    #[serde(default)]
    pub content_hash: String,
    /// Transitive closure computed at build time, in emission order.
    #[serde(default)]
    pub dependencies: Vec<BundleDescriptor>,
}

impl BundleDescriptor {
    pub fn new(name: impl Into<String>, group_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group_name: group_name.into(),
            checksum: 0,
            content_hash: String::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: BundleDescriptor) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.name.as_str())
    }
}

impl PartialEq for BundleDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for BundleDescriptor {}

impl Hash for BundleDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}
