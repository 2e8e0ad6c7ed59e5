//! Shared fixtures for the loader tests.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use async_trait::async_trait;
use contentdb_core::{AssetDescriptor, BundleDescriptor, ContentGroup, ContentManifest, Registry};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;

use crate::archive::{Archive, ArchiveDocument, ArchiveEntry, ArchiveStore};
use crate::status::{LoadCallback, LoadEvent, LoadStatus};

pub const HERO_ID: &str = "11111111111111111111111111111111";
pub const SKIN_ID: &str = "22222222222222222222222222222222";
pub const SPARK_ID: &str = "33333333333333333333333333333333";
pub const LEVEL1_ID: &str = "44444444444444444444444444444444";
pub const LEVEL_DATA_ID: &str = "55555555555555555555555555555555";
pub const ARENA_ID: &str = "66666666666666666666666666666666";
pub const GHOST_ID: &str = "77777777777777777777777777777777";
pub const CURSED_ID: &str = "88888888888888888888888888888888";
pub const BROKEN_ID: &str = "99999999999999999999999999999999";
pub const ORPHAN_ID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

fn asset(id: &str, name: &str, path: &str, declared: &str) -> AssetDescriptor {
    AssetDescriptor::new(id, name, path, declared, "Object")
}

fn entry(id: &str, type_name: &str, data: serde_json::Value) -> ArchiveEntry {
    ArchiveEntry {
        id: id.to_string(),
        type_name: type_name.to_string(),
        data,
    }
}

/// Bundles:
/// - `B_main` (Hero, Arena, Ghost, Cursed) depends on `B_shared`
/// - `B_shared` (Skin) is never built onto disk
/// - `B_fx` (Spark) depends on `B_main`, `B_shared`
/// - `B_levels` is a scene archive (Level1, LevelData)
/// - `B_broken` is corrupt on disk
/// - group `unbuilt` (Orphan) has no bundle at all
pub fn manifest() -> ContentManifest {
    let shared = BundleDescriptor::new("B_shared", "shared");
    let main = BundleDescriptor::new("B_main", "main").with_dependency(shared.clone());
    let fx = BundleDescriptor::new("B_fx", "fx")
        .with_dependency(BundleDescriptor::new("B_main", "main"))
        .with_dependency(shared.clone());

    ContentManifest {
        groups: vec![
            ContentGroup::new(
                "main",
                vec![
                    asset(HERO_ID, "Hero", "Assets/Characters/Hero.prefab", "GameObject"),
                    asset(ARENA_ID, "Arena", "Assets/Levels/Arena.unity", "SceneAsset"),
                    asset(GHOST_ID, "Ghost", "Assets/Characters/Ghost.prefab", "GameObject"),
                    asset(CURSED_ID, "Cursed", "Assets/Characters/Cursed.prefab", "GameObject"),
                ],
            ),
            ContentGroup::new("shared", vec![asset(SKIN_ID, "Skin", "Assets/Materials/Skin.mat", "Material")]),
            ContentGroup::new("fx", vec![asset(SPARK_ID, "Spark", "Assets/Fx/Spark.prefab", "ParticleSystem")]),
            ContentGroup::new(
                "levels",
                vec![
                    asset(LEVEL1_ID, "Level1", "Assets/Levels/Level1.unity", "SceneAsset"),
                    asset(LEVEL_DATA_ID, "LevelData", "Assets/Levels/LevelData.json", "TextAsset"),
                ],
            ),
            ContentGroup::new("broken", vec![asset(BROKEN_ID, "Broken", "Assets/Broken.prefab", "GameObject")]),
            ContentGroup::new("unbuilt", vec![asset(ORPHAN_ID, "Orphan", "Assets/Orphan.asset", "TextAsset")]),
        ],
        bundles: vec![
            main,
            shared,
            fx,
            BundleDescriptor::new("B_levels", "levels"),
            BundleDescriptor::new("B_broken", "broken"),
        ],
        content_directory: PathBuf::from("/content"),
    }
}

pub fn registry() -> Arc<Registry> {
    Arc::new(Registry::new(manifest()))
}

/// Archive documents matching [`manifest`]. `B_shared` is left out.
pub fn archives() -> Vec<(&'static str, ArchiveDocument)> {
    vec![
        (
            "B_main",
            ArchiveDocument {
                scene_archive: false,
                entries: vec![
                    entry(HERO_ID, "GameObject", json!({ "hp": 100 })),
                    entry(ARENA_ID, "SceneAsset", json!({ "roots": ["Floor"] })),
                    entry(CURSED_ID, "GameObject", serde_json::Value::Null),
                ],
            },
        ),
        (
            "B_fx",
            ArchiveDocument {
                scene_archive: false,
                entries: vec![entry(SPARK_ID, "ParticleSystem", json!({ "rate": 30 }))],
            },
        ),
        (
            "B_levels",
            ArchiveDocument {
                scene_archive: true,
                entries: vec![
                    entry(LEVEL1_ID, "SceneAsset", json!({ "roots": ["Terrain", "Sun"] })),
                    entry(LEVEL_DATA_ID, "TextAsset", json!("waves: 3")),
                ],
            },
        ),
    ]
}

enum Stored {
    Document(ArchiveDocument),
    Corrupt,
    Panics,
}

/// In-memory store that counts every access, keyed by file name.
pub struct MemoryStore {
    archives: HashMap<String, Stored>,
    exists_calls: AtomicUsize,
    opens: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            archives: HashMap::new(),
            exists_calls: AtomicUsize::new(0),
            opens: Mutex::new(Vec::new()),
        }
    }

    /// The full fixture set from [`archives`] plus a corrupt `B_broken`.
    pub fn fixture() -> Self {
        let mut store = Self::new();
        for (name, document) in archives() {
            store = store.with(name, document);
        }
        store.with_corrupt("B_broken")
    }

    pub fn with(mut self, name: &str, document: ArchiveDocument) -> Self {
        self.archives.insert(name.to_string(), Stored::Document(document));
        self
    }

    pub fn with_corrupt(mut self, name: &str) -> Self {
        self.archives.insert(name.to_string(), Stored::Corrupt);
        self
    }

    /// Opening `name` panics inside the store.
    pub fn with_panicking(mut self, name: &str) -> Self {
        self.archives.insert(name.to_string(), Stored::Panics);
        self
    }

    /// Every `exists` and `open` call so far.
    pub fn accesses(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst) + self.opens.lock().len()
    }

    pub fn opens_of(&self, name: &str) -> usize {
        self.opens.lock().iter().filter(|n| n.as_str() == name).count()
    }

    fn key(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArchiveStore for MemoryStore {
    async fn exists(&self, path: &Path) -> bool {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.archives.contains_key(&Self::key(path))
    }

    async fn open(
        &self,
        path: &Path,
        name: &str,
        progress: &mut (dyn FnMut(f32) + Send),
    ) -> io::Result<Option<Archive>> {
        let key = Self::key(path);
        self.opens.lock().push(key.clone());

        let stored = self
            .archives
            .get(&key)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, key.clone()))?;

        progress(0.5);
        tokio::task::yield_now().await;
        progress(1.0);

        Ok(match stored {
            Stored::Document(document) => Some(Archive::from_document(name, document.clone(), 0)),
            Stored::Corrupt => None,
            Stored::Panics => panic!("store failure opening {}", name),
        })
    }
}

/// Wraps a store so that every `open` waits for a permit from `gate`.
pub struct GatedStore {
    pub inner: Arc<MemoryStore>,
    pub gate: Arc<Semaphore>,
}

impl GatedStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(0)),
        }
    }
}

#[async_trait]
impl ArchiveStore for GatedStore {
    async fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path).await
    }

    async fn open(
        &self,
        path: &Path,
        name: &str,
        progress: &mut (dyn FnMut(f32) + Send),
    ) -> io::Result<Option<Archive>> {
        self.gate.acquire().await.unwrap().forget();
        self.inner.open(path, name, progress).await
    }
}

/// Callback that appends every event to a shared vector.
pub fn recorder() -> (LoadCallback, Arc<Mutex<Vec<LoadEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (Box::new(move |event| sink.lock().push(event)), events)
}

/// Callback that forwards every event over a channel.
pub fn channel() -> (impl FnMut(LoadEvent) + Send + 'static, mpsc::Receiver<LoadEvent>) {
    let (tx, rx) = mpsc::channel();
    (
        move |event: LoadEvent| {
            let _ = tx.send(event);
        },
        rx,
    )
}

/// Receive events until a terminal one arrives.
pub fn until_terminal(rx: &mpsc::Receiver<LoadEvent>) -> Vec<LoadEvent> {
    let mut events = Vec::new();
    loop {
        let event = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("timed out waiting for a terminal event");
        let terminal = event.terminal;
        events.push(event);
        if terminal {
            return events;
        }
    }
}

/// Statuses with consecutive repeats collapsed.
pub fn statuses(events: &[LoadEvent]) -> Vec<LoadStatus> {
    let mut out: Vec<LoadStatus> = events.iter().map(|e| e.status).collect();
    out.dedup();
    out
}
