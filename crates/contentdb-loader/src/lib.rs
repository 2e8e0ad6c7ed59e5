//! contentdb loader - asynchronous bundle loading
//!
//! Loads are queued on a single FIFO and run one at a time by a background
//! consumer that owns the bundle cache:
//! - `BundleLoader` opens a target bundle and its dependency chain
//! - `AssetLoader` and `SceneLoader` extract from an opened bundle
//! - `ContentLoader` is the public facade; results stream to callbacks
//!   as `LoadEvent`s

pub mod archive;
pub mod asset_loader;
pub mod bundle_loader;
pub mod cache;
pub mod error;
pub mod instantiate;
pub mod loader;
mod payload_cache;
pub mod queue;
pub mod scene;
pub mod status;

#[cfg(test)]
mod testing;

pub use archive::{Archive, ArchiveDocument, ArchiveEntry, ArchiveStore, AssetObject, FileArchiveStore};
pub use asset_loader::AssetLoader;
pub use bundle_loader::{BundleLoader, BundleRole, BundleState};
pub use cache::{BundleCache, BundleSnapshot, LoadedBundleHandle};
pub use error::LoaderError;
pub use instantiate::{CloneInstantiator, Instance, Instantiator};
pub use loader::{ContentLoader, ContentLoaderBuilder};
pub use queue::{LoadTicket, Pending};
pub use scene::{ActiveScene, SceneHost, SceneLoader, SceneMode, SceneStage};
pub use status::{DependencyTally, LoadCallback, LoadEvent, LoadStatus, Payload};
