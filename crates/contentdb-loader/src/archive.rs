//! Archive files and the store that opens them.
//!
//! The default on-disk format is a JSON document listing the archive's
//! entries. Other formats plug in through [`ArchiveStore`].

use std::io;
use std::path::Path;

use async_trait::async_trait;
use contentdb_core::AssetDescriptor;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::warn;

/// One loadable object stored in an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub id: String,
    #[serde(default)]
    pub type_name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Serialized form of an archive file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveDocument {
    /// Scene archives can only serve scene loads.
    #[serde(default)]
    pub scene_archive: bool,
    #[serde(default)]
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveDocument {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

/// An opened archive: the native handle held by the bundle cache.
#[derive(Debug)]
pub struct Archive {
    name: String,
    scene_archive: bool,
    entries: Vec<ArchiveEntry>,
    byte_len: usize,
}

impl Archive {
    pub fn from_document(name: impl Into<String>, document: ArchiveDocument, byte_len: usize) -> Self {
        Self {
            name: name.into(),
            scene_archive: document.scene_archive,
            entries: document.entries,
            byte_len,
        }
    }

    /// Decode archive bytes. `None` means the bytes do not form a usable archive.
    pub fn parse(name: &str, bytes: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<ArchiveDocument>(bytes) {
            Ok(document) => Some(Self::from_document(name, document, bytes.len())),
            Err(e) => {
                warn!("Archive {} is corrupted: {}", name, e);
                None
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_scene_archive(&self) -> bool {
        self.scene_archive
    }

    /// Scan the contained items for `id` (case-insensitive).
    pub fn entry(&self, id: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.id.eq_ignore_ascii_case(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }
}

/// A payload extracted from an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetObject {
    pub id: String,
    pub name: String,
    pub type_name: String,
    /// Bundle the object was extracted from
    pub bundle: String,
    pub data: serde_json::Value,
}

impl AssetObject {
    pub(crate) fn extract(asset: &AssetDescriptor, bundle: &str, entry: &ArchiveEntry) -> Self {
        let type_name = if entry.type_name.is_empty() {
            asset.declared_type.clone()
        } else {
            entry.type_name.clone()
        };
        Self {
            id: asset.id.clone(),
            name: asset.display_name.clone(),
            type_name,
            bundle: bundle.to_string(),
            data: entry.data.clone(),
        }
    }
}

/// Access to archive files.
///
/// `open` reports read progress through `progress` and yields to the
/// scheduler between reads.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    /// `Ok(None)` means the file was read but held no usable archive.
    async fn open(
        &self,
        path: &Path,
        name: &str,
        progress: &mut (dyn FnMut(f32) + Send),
    ) -> io::Result<Option<Archive>>;
}

/// Reads archives from the local file system in fixed-size chunks, one
/// chunk per scheduling tick.
pub struct FileArchiveStore {
    chunk_size: usize,
}

impl FileArchiveStore {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for FileArchiveStore {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

#[async_trait]
impl ArchiveStore for FileArchiveStore {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn open(
        &self,
        path: &Path,
        name: &str,
        progress: &mut (dyn FnMut(f32) + Send),
    ) -> io::Result<Option<Archive>> {
        let mut file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len() as usize;

        let mut bytes = Vec::with_capacity(len);
        let mut chunk = vec![0u8; self.chunk_size];
        loop {
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..n]);
            if len > 0 {
                progress(bytes.len() as f32 / len as f32);
            }
            tokio::task::yield_now().await;
        }

        Ok(Archive::parse(name, &bytes))
    }
}
