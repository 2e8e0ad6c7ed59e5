//! Scene activation.
//!
//! Scenes are loaded through the same bundle pipeline as assets but end in
//! activation on a [`SceneHost`] instead of handing the payload back.

use std::sync::Arc;

use contentdb_core::AssetDescriptor;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::Archive;
use crate::status::{contain, EventSink, LoadEvent, LoadStatus, Payload};

/// How an activated scene relates to the ones already active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SceneMode {
    /// Replace every active scene
    #[default]
    Single,
    /// Activate alongside the current scenes
    Additive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveScene {
    pub id: String,
    pub name: String,
    pub path: String,
    pub bundle: String,
    pub mode: SceneMode,
    pub contents: serde_json::Value,
}

impl ActiveScene {
    /// Match by display name, source path or id.
    pub fn matches(&self, key: &str) -> bool {
        self.name == key || self.path == key || self.id.eq_ignore_ascii_case(key)
    }
}

/// Whatever owns the live scene set.
pub trait SceneHost: Send + Sync {
    fn active_scenes(&self) -> Vec<Arc<ActiveScene>>;

    fn find_active(&self, key: &str) -> Option<Arc<ActiveScene>> {
        self.active_scenes().into_iter().find(|s| s.matches(key))
    }

    fn is_active(&self, key: &str) -> bool {
        self.find_active(key).is_some()
    }

    fn activate(&self, scene: ActiveScene) -> Result<Arc<ActiveScene>, String>;
}

/// In-memory scene host.
#[derive(Default)]
pub struct SceneStage {
    scenes: RwLock<Vec<Arc<ActiveScene>>>,
}

impl SceneStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SceneHost for SceneStage {
    fn active_scenes(&self) -> Vec<Arc<ActiveScene>> {
        self.scenes.read().clone()
    }

    fn activate(&self, scene: ActiveScene) -> Result<Arc<ActiveScene>, String> {
        let scene = Arc::new(scene);
        let mut scenes = self.scenes.write();
        if scene.mode == SceneMode::Single {
            scenes.clear();
        }
        scenes.push(Arc::clone(&scene));
        info!("Scene {} active ({:?}, {} total)", scene.name, scene.mode, scenes.len());
        Ok(scene)
    }
}

pub(crate) enum SceneOutcome {
    Loaded(Arc<ActiveScene>),
    Failed,
    Cancelled,
}

pub struct SceneLoader {
    extract_ticks: u32,
}

impl SceneLoader {
    pub fn new(extract_ticks: u32) -> Self {
        Self {
            extract_ticks: extract_ticks.max(1),
        }
    }

    /// Reject non-scene assets before any I/O.
    pub fn check_request(asset: &AssetDescriptor) -> Result<(), String> {
        if !asset.is_scene() {
            return Err(format!("'{}' is not a scene", asset.display_name));
        }
        Ok(())
    }

    pub(crate) async fn load(
        &self,
        host: &dyn SceneHost,
        asset: &AssetDescriptor,
        archive: &Archive,
        mode: SceneMode,
        sink: &mut EventSink,
        cancel: &CancellationToken,
    ) -> SceneOutcome {
        let name = asset.display_name.as_str();

        if !archive.is_scene_archive() {
            sink.finish(
                LoadEvent::new(LoadStatus::SceneLoadingError, name, 0.0)
                    .with_message(format!("bundle {} holds no scenes", archive.name())),
            );
            return SceneOutcome::Failed;
        }

        let Some(entry) = archive.entry(&asset.id) else {
            sink.finish(
                LoadEvent::new(LoadStatus::SceneNotFound, name, 0.0)
                    .with_message(format!("{} is not in bundle {}", asset.id, archive.name())),
            );
            return SceneOutcome::Failed;
        };

        for tick in 0..self.extract_ticks {
            if cancel.is_cancelled() {
                sink.finish(LoadEvent::new(LoadStatus::Cancelled, name, 0.0));
                return SceneOutcome::Cancelled;
            }
            let progress = tick as f32 / self.extract_ticks as f32;
            sink.emit(LoadEvent::new(LoadStatus::SceneLoading, name, progress));
            tokio::task::yield_now().await;
        }

        let scene = ActiveScene {
            id: asset.id.clone(),
            name: asset.display_name.clone(),
            path: asset.source_path.clone(),
            bundle: archive.name().to_string(),
            mode,
            contents: entry.data.clone(),
        };

        match contain("scene host", || host.activate(scene)) {
            Ok(scene) => {
                sink.finish(
                    LoadEvent::new(LoadStatus::SceneLoaded, name, 1.0)
                        .with_payload(Payload::Scene(Arc::clone(&scene))),
                );
                SceneOutcome::Loaded(scene)
            }
            Err(reason) => {
                warn!("Scene {} failed to activate: {}", name, reason);
                sink.finish(LoadEvent::new(LoadStatus::SceneLoadingError, name, 1.0).with_message(reason));
                SceneOutcome::Failed
            }
        }
    }
}
