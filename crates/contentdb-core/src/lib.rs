//! contentdb core - content metadata for the bundle loader
//!
//! This crate provides the read-only side of the content pipeline:
//! - Asset and bundle descriptors
//! - The build manifest and its JSON loading
//! - The `Registry` that owns the manifest at runtime
//! - Dependency resolution from asset keys to bundle chains
//! - Loader configuration

pub mod config;
pub mod descriptor;
pub mod error;
pub mod manifest;
pub mod registry;
pub mod resolver;

pub use config::ContentConfig;
pub use descriptor::{is_asset_id, AssetDescriptor, BundleDescriptor, ASSET_ID_LEN, SCENE_TYPE};
pub use error::ContentError;
pub use manifest::{ContentGroup, ContentManifest, DEFAULT_MANIFEST_FILE};
pub use registry::{AssetEntry, AssetKey, Registry};
pub use resolver::{DependencyResolver, Resolution};
