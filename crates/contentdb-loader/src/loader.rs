use std::sync::Arc;

use contentdb_core::{AssetKey, ContentConfig, Registry};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::archive::{ArchiveStore, AssetObject, FileArchiveStore};
use crate::asset_loader::AssetLoader;
use crate::bundle_loader::BundleLoader;
use crate::cache::{BundleCache, BundleSnapshot};
use crate::error::LoaderError;
use crate::instantiate::{run_instantiation, CloneInstantiator, Instance, Instantiator};
use crate::payload_cache::{Join, PayloadCache, Refill};
use crate::queue::{LoadQueue, LoadTicket, OperationKind, Pending, QueueCommand, QueueWorker};
use crate::scene::{ActiveScene, SceneHost, SceneLoader, SceneMode, SceneStage};
use crate::status::{EventSink, LoadCallback, LoadEvent, LoadStatus, Payload};

/// Facade for all content loading.
///
/// Owns a background tokio runtime running the single queue consumer. Every
/// method returns immediately; progress and results arrive through the
/// callback, which runs on the runtime's worker thread unless noted.
pub struct ContentLoader {
    runtime: tokio::runtime::Runtime,
    registry: Arc<Registry>,
    queue: LoadQueue,
    payloads: PayloadCache,
    scene_host: Arc<dyn SceneHost>,
    instantiator: Arc<dyn Instantiator>,
    shutdown: CancellationToken,
    log_progress: bool,
}

pub struct ContentLoaderBuilder {
    registry: Arc<Registry>,
    config: ContentConfig,
    store: Option<Arc<dyn ArchiveStore>>,
    scene_host: Option<Arc<dyn SceneHost>>,
    instantiator: Option<Arc<dyn Instantiator>>,
}

impl ContentLoaderBuilder {
    pub fn config(mut self, config: ContentConfig) -> Self {
        self.config = config;
        self
    }

    /// Archive access; defaults to the file system.
    pub fn store(mut self, store: Arc<dyn ArchiveStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn scene_host(mut self, host: Arc<dyn SceneHost>) -> Self {
        self.scene_host = Some(host);
        self
    }

    pub fn instantiator(mut self, instantiator: Arc<dyn Instantiator>) -> Self {
        self.instantiator = Some(instantiator);
        self
    }

    pub fn build(self) -> Result<ContentLoader, LoaderError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("contentdb-loader")
            .enable_all()
            .build()
            .map_err(LoaderError::Runtime)?;

        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FileArchiveStore::new(config.read_chunk_size)));
        let scene_host = self.scene_host.unwrap_or_else(|| Arc::new(SceneStage::new()));
        let instantiator = self.instantiator.unwrap_or_else(|| Arc::new(CloneInstantiator));

        let (tx, rx) = mpsc::unbounded_channel();
        let payloads = PayloadCache::new();
        let shutdown = CancellationToken::new();

        let worker = QueueWorker {
            registry: Arc::clone(&self.registry),
            cache: BundleCache::new(),
            bundles: BundleLoader::new(store, self.registry.content_dir(), config.open_timeout()),
            assets: AssetLoader::new(config.extract_ticks),
            scenes: SceneLoader::new(config.extract_ticks),
            scene_host: Arc::clone(&scene_host),
            instantiator: Arc::clone(&instantiator),
            payloads: payloads.clone(),
            log_progress: config.log_progress,
        };
        runtime.spawn(worker.run(rx, shutdown.clone()));

        info!(
            "Content loader ready: {} assets under {:?}",
            self.registry.asset_count(),
            self.registry.content_dir()
        );

        Ok(ContentLoader {
            runtime,
            registry: self.registry,
            queue: LoadQueue::new(tx),
            payloads,
            scene_host,
            instantiator,
            shutdown,
            log_progress: config.log_progress,
        })
    }
}

impl ContentLoader {
    /// Open the manifest named by `config` and serve archives from disk.
    pub fn open(config: ContentConfig) -> Result<Self, LoaderError> {
        let registry = Registry::open(&config)?;
        Self::builder(Arc::new(registry)).config(config).build()
    }

    pub fn builder(registry: Arc<Registry>) -> ContentLoaderBuilder {
        ContentLoaderBuilder {
            registry,
            config: ContentConfig::default(),
            store: None,
            scene_host: None,
            instantiator: None,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Load an asset by id, display name or source path.
    pub fn load_asset(
        &self,
        key: impl Into<AssetKey>,
        callback: impl FnMut(LoadEvent) + Send + 'static,
    ) -> LoadTicket {
        self.enqueue_asset(key.into(), None, false, Box::new(callback))
    }

    /// Load an asset whose declared or base type is `type_name`.
    pub fn load_asset_typed(
        &self,
        key: impl Into<AssetKey>,
        type_name: &str,
        callback: impl FnMut(LoadEvent) + Send + 'static,
    ) -> LoadTicket {
        self.enqueue_asset(key.into(), Some(type_name.to_string()), false, Box::new(callback))
    }

    /// Load an asset and instantiate it. The request ends with
    /// `Instantiated` or `InstantiatingError`.
    pub fn instantiate(
        &self,
        key: impl Into<AssetKey>,
        callback: impl FnMut(LoadEvent) + Send + 'static,
    ) -> LoadTicket {
        self.enqueue_asset(key.into(), None, true, Box::new(callback))
    }

    fn enqueue_asset(
        &self,
        key: AssetKey,
        type_filter: Option<String>,
        instantiate: bool,
        callback: LoadCallback,
    ) -> LoadTicket {
        self.queue.enqueue(
            OperationKind::LoadAsset {
                key,
                type_filter,
                instantiate,
            },
            callback,
        )
    }

    /// Load and activate a scene. A scene that is already active is
    /// reported as `AlreadyLoaded` on the calling thread without queuing.
    pub fn load_scene(
        &self,
        name: &str,
        mode: SceneMode,
        callback: impl FnMut(LoadEvent) + Send + 'static,
    ) -> LoadTicket {
        let callback: LoadCallback = Box::new(callback);
        if let Some(active) = self.scene_host.find_active(name) {
            let ticket = self.queue.ticket();
            EventSink::new(ticket.id(), callback, self.log_progress).finish(
                LoadEvent::new(LoadStatus::AlreadyLoaded, &active.name, 1.0).with_payload(Payload::Scene(active)),
            );
            return ticket;
        }
        self.queue.enqueue(
            OperationKind::LoadScene {
                key: AssetKey::parse(name),
                mode,
            },
            callback,
        )
    }

    /// Open a bundle and its dependencies without extracting anything. The
    /// request ends with `BundleReady`.
    pub fn load_bundle(&self, name: &str, callback: impl FnMut(LoadEvent) + Send + 'static) -> LoadTicket {
        self.queue.enqueue(
            OperationKind::LoadBundle {
                bundle: name.to_string(),
            },
            Box::new(callback),
        )
    }

    /// Load an asset through the single-flight payload cache.
    ///
    /// A cached payload is delivered as `AssetLoaded` on the calling thread.
    /// If a load of the same asset is in flight the caller receives
    /// `Caching` and later that load's terminal event. Only the request that
    /// starts a load gets a ticket; cancelling it hands the load to the next
    /// waiting caller instead of cancelling theirs.
    pub fn load_cached(
        &self,
        key: impl Into<AssetKey>,
        callback: impl FnMut(LoadEvent) + Send + 'static,
    ) -> Option<LoadTicket> {
        let key = key.into();
        let callback: LoadCallback = Box::new(callback);

        let Some(entry) = self.registry.find_asset(&key, None) else {
            return Some(self.enqueue_asset(key, None, false, callback));
        };

        match self.payloads.join(&entry.asset.id, &entry.asset.display_name, callback) {
            Join::Hit(asset, callback) => {
                let ticket = self.queue.ticket();
                EventSink::new(ticket.id(), callback, self.log_progress).finish(
                    LoadEvent::new(LoadStatus::AssetLoaded, &asset.name, 1.0).with_payload(Payload::Asset(asset)),
                );
                None
            }
            Join::Waiting => None,
            Join::Lead(callback) => {
                let queue = self.queue.clone();
                let id = entry.asset.id.clone();
                let refill: Refill = Arc::new(move |callback: LoadCallback| {
                    queue.enqueue(
                        OperationKind::LoadAsset {
                            key: AssetKey::Id(id.clone()),
                            type_filter: None,
                            instantiate: false,
                        },
                        callback,
                    );
                });
                let callback = self.payloads.fill_callback(&entry.asset.id, callback, refill);
                Some(self.enqueue_asset(key, None, false, callback))
            }
        }
    }

    /// Instantiate an already loaded asset on the calling thread.
    pub fn instantiate_loaded(
        &self,
        asset: Arc<AssetObject>,
        callback: impl FnMut(LoadEvent) + Send + 'static,
    ) -> Option<Arc<Instance>> {
        let ticket = self.queue.ticket();
        let mut sink = EventSink::new(ticket.id(), Box::new(callback), self.log_progress);
        run_instantiation(self.instantiator.as_ref(), asset, &mut sink)
    }

    /// Unload every cached bundle and forget cached payloads, after the
    /// loads already queued. Replies with the number of bundles unloaded.
    pub fn unload_all(&self) -> Pending<usize> {
        self.queue.control(QueueCommand::UnloadAll)
    }

    /// Drop one reference to a bundle, unloading it when none remain.
    /// Replies with the remaining count, or `None` if it was not loaded.
    pub fn release_bundle(&self, name: &str) -> Pending<Option<usize>> {
        let bundle = name.to_string();
        self.queue.control(|reply| QueueCommand::Release { bundle, reply })
    }

    /// Snapshot of the bundle cache.
    pub fn loaded_bundles(&self) -> Pending<Vec<BundleSnapshot>> {
        self.queue.control(QueueCommand::Snapshot)
    }

    pub fn active_scenes(&self) -> Vec<Arc<ActiveScene>> {
        self.scene_host.active_scenes()
    }

    /// Whether the payload of `id` is held by the single-flight cache.
    pub fn is_cached(&self, id: &str) -> bool {
        self.payloads.is_ready(id)
    }

    /// Run a future on the loader's runtime, for hosts without their own.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl Drop for ContentLoader {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
