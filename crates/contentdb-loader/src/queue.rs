//! The global load queue.
//!
//! Every load and every cache control command goes through one FIFO and is
//! handled by a single consumer task, which fully drains an operation before
//! taking the next. The bundle cache lives inside that task.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use contentdb_core::{AssetKey, DependencyResolver, Registry};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::asset_loader::{AssetLoader, ExtractOutcome};
use crate::bundle_loader::{BundleLoader, ChainOutcome};
use crate::cache::{BundleCache, BundleSnapshot};
use crate::error::LoaderError;
use crate::instantiate::{run_instantiation, Instantiator};
use crate::payload_cache::PayloadCache;
use crate::scene::{SceneHost, SceneLoader, SceneMode, SceneOutcome};
use crate::status::{deliver, panic_message, EventSink, LoadCallback, LoadEvent, LoadStatus, Payload};

/// Handle to a queued load.
#[derive(Debug, Clone)]
pub struct LoadTicket {
    id: u64,
    cancel: CancellationToken,
}

impl LoadTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ask the load to stop. A load still waiting in the queue ends with
    /// `Cancelled` without doing any work; a running one stops at its next
    /// suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A non-blocking handle to the reply of a queued control command.
pub struct Pending<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> Pending<T> {
    /// Non-blocking check for the reply. Returns `None` while still queued.
    pub fn try_recv(&mut self) -> Option<Result<T, LoaderError>> {
        match self.receiver.try_recv() {
            Ok(value) => Some(Ok(value)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(LoaderError::QueueClosed)),
        }
    }

    /// Block the calling thread until the reply arrives. Must not be called
    /// from inside an async context.
    pub fn wait(self) -> Result<T, LoaderError> {
        self.receiver.blocking_recv().map_err(|_| LoaderError::QueueClosed)
    }

    pub async fn recv(self) -> Result<T, LoaderError> {
        self.receiver.await.map_err(|_| LoaderError::QueueClosed)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum OperationKind {
    LoadBundle {
        bundle: String,
    },
    LoadAsset {
        key: AssetKey,
        type_filter: Option<String>,
        instantiate: bool,
    },
    LoadScene {
        key: AssetKey,
        mode: SceneMode,
    },
}

impl OperationKind {
    fn label(&self) -> &str {
        match self {
            OperationKind::LoadBundle { bundle } => bundle,
            OperationKind::LoadAsset { key, .. } | OperationKind::LoadScene { key, .. } => key.as_str(),
        }
    }

    /// Status used when the request cannot even be queued.
    fn rejected(&self) -> LoadStatus {
        match self {
            OperationKind::LoadBundle { .. } => LoadStatus::BundleLoadError,
            OperationKind::LoadAsset { .. } => LoadStatus::AssetLoadingError,
            OperationKind::LoadScene { .. } => LoadStatus::SceneLoadingError,
        }
    }
}

pub(crate) struct LoadOperation {
    pub id: u64,
    pub kind: OperationKind,
    pub callback: LoadCallback,
    pub cancel: CancellationToken,
}

pub(crate) enum QueueCommand {
    Load(LoadOperation),
    UnloadAll(oneshot::Sender<usize>),
    Release {
        bundle: String,
        reply: oneshot::Sender<Option<usize>>,
    },
    Snapshot(oneshot::Sender<Vec<BundleSnapshot>>),
}

/// Producer side of the queue. Clones share the id sequence.
#[derive(Clone)]
pub(crate) struct LoadQueue {
    tx: mpsc::UnboundedSender<QueueCommand>,
    next_id: Arc<AtomicU64>,
}

impl LoadQueue {
    pub(crate) fn new(tx: mpsc::UnboundedSender<QueueCommand>) -> Self {
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Reserve an operation id without queuing anything.
    pub(crate) fn ticket(&self) -> LoadTicket {
        LoadTicket {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn enqueue(&self, kind: OperationKind, callback: LoadCallback) -> LoadTicket {
        let ticket = self.ticket();
        debug!("Queued #{} {}", ticket.id, kind.label());
        let operation = LoadOperation {
            id: ticket.id,
            kind,
            callback,
            cancel: ticket.cancel.clone(),
        };

        if let Err(mpsc::error::SendError(command)) = self.tx.send(QueueCommand::Load(operation)) {
            if let QueueCommand::Load(mut operation) = command {
                warn!("Load queue closed, rejecting #{}", operation.id);
                let event = LoadEvent::new(operation.kind.rejected(), operation.kind.label(), 0.0)
                    .with_message(LoaderError::QueueClosed.to_string())
                    .finished();
                deliver(operation.id, &mut operation.callback, event);
            }
        }
        ticket
    }

    /// Queue a control command behind every load already queued.
    pub(crate) fn control<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> QueueCommand) -> Pending<T> {
        let (reply, receiver) = oneshot::channel();
        if self.tx.send(command(reply)).is_err() {
            warn!("Load queue closed, control command dropped");
        }
        Pending { receiver }
    }
}

/// Consumer side of the queue. Owns the bundle cache.
pub(crate) struct QueueWorker {
    pub registry: Arc<Registry>,
    pub cache: BundleCache,
    pub bundles: BundleLoader,
    pub assets: AssetLoader,
    pub scenes: SceneLoader,
    pub scene_host: Arc<dyn SceneHost>,
    pub instantiator: Arc<dyn Instantiator>,
    pub payloads: PayloadCache,
    pub log_progress: bool,
}

impl QueueWorker {
    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<QueueCommand>, shutdown: CancellationToken) {
        info!("Load queue worker started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
        info!(
            "Load queue worker stopped ({} bundles cached, {} archives opened)",
            self.cache.len(),
            self.cache.total_opens()
        );
    }

    async fn handle(&mut self, command: QueueCommand) {
        match command {
            QueueCommand::Load(operation) => self.run_operation(operation).await,
            QueueCommand::UnloadAll(reply) => {
                let unloaded = self.cache.clear();
                let forgotten = self.payloads.clear_ready();
                debug!("Unload all: {} bundles, {} cached payloads", unloaded, forgotten);
                let _ = reply.send(unloaded);
            }
            QueueCommand::Release { bundle, reply } => {
                let remaining = self.cache.release(&bundle);
                if remaining.is_none() {
                    warn!("Release of {} ignored: not loaded", bundle);
                }
                let _ = reply.send(remaining);
            }
            QueueCommand::Snapshot(reply) => {
                let _ = reply.send(self.cache.snapshot());
            }
        }
    }

    async fn run_operation(&mut self, operation: LoadOperation) {
        let LoadOperation {
            id,
            kind,
            callback,
            cancel,
        } = operation;
        let mut sink = EventSink::new(id, callback, self.log_progress);

        if cancel.is_cancelled() {
            info!("#{} {} cancelled before it started", id, kind.label());
            sink.finish(LoadEvent::new(LoadStatus::Cancelled, kind.label(), 0.0));
            return;
        }

        debug!("Running #{} {}", id, kind.label());
        let label = kind.label().to_string();
        let failure = kind.rejected();

        // A panicking store or host hook must not take the consumer down.
        let run = AssertUnwindSafe(self.dispatch(kind, &mut sink, &cancel)).catch_unwind();
        if let Err(payload) = run.await {
            let reason = panic_message(payload.as_ref());
            error!("#{} {} panicked: {}", id, label, reason);
            sink.finish(LoadEvent::new(failure, &label, 0.0).with_message(format!("load panicked: {}", reason)));
        }

        if !sink.is_finished() {
            warn!("#{} ended without a terminal event", id);
        }
    }

    async fn dispatch(&mut self, kind: OperationKind, sink: &mut EventSink, cancel: &CancellationToken) {
        match kind {
            OperationKind::LoadBundle { bundle } => self.load_bundle(&bundle, sink, cancel).await,
            OperationKind::LoadAsset {
                key,
                type_filter,
                instantiate,
            } => {
                self.load_asset(&key, type_filter.as_deref(), instantiate, sink, cancel)
                    .await
            }
            OperationKind::LoadScene { key, mode } => self.load_scene(&key, mode, sink, cancel).await,
        }
    }

    async fn load_bundle(&mut self, name: &str, sink: &mut EventSink, cancel: &CancellationToken) {
        let bundle = match DependencyResolver::new(&self.registry).resolve_bundle(name) {
            Ok(bundle) => bundle,
            Err(e) => {
                sink.finish(LoadEvent::new(LoadStatus::BundleNotFound, name, 0.0).with_message(e.to_string()));
                return;
            }
        };
        self.bundles
            .load_chain(&mut self.cache, &bundle, sink, cancel, true)
            .await;
    }

    async fn load_asset(
        &mut self,
        key: &AssetKey,
        type_filter: Option<&str>,
        instantiate: bool,
        sink: &mut EventSink,
        cancel: &CancellationToken,
    ) {
        let resolver = DependencyResolver::new(&self.registry);
        let entry = match resolver.find(key, type_filter) {
            Ok(entry) => entry,
            Err(e) => {
                sink.finish(LoadEvent::new(LoadStatus::AssetNotFound, key.as_str(), 0.0).with_message(e.to_string()));
                return;
            }
        };
        if let Err(reason) = AssetLoader::check_request(&entry.asset) {
            sink.finish(LoadEvent::new(LoadStatus::AssetLoadingError, &entry.asset.display_name, 0.0).with_message(reason));
            return;
        }
        let resolution = match resolver.bundle_of(entry) {
            Ok(resolution) => resolution,
            Err(e) => {
                sink.finish(LoadEvent::new(LoadStatus::BundleNotFound, key.as_str(), 0.0).with_message(e.to_string()));
                return;
            }
        };

        let archive = match self
            .bundles
            .load_chain(&mut self.cache, &resolution.bundle, sink, cancel, false)
            .await
        {
            ChainOutcome::Ready { archive, tally } => {
                debug!("{} ready for {} ({:?})", resolution.bundle.name, key, tally);
                archive
            }
            ChainOutcome::Aborted => return,
        };

        let outcome = self
            .assets
            .extract(&resolution.asset, &archive, sink, cancel, !instantiate)
            .await;

        if let ExtractOutcome::Loaded(asset) = outcome {
            if !instantiate {
                return;
            }
            if cancel.is_cancelled() {
                sink.finish(LoadEvent::new(LoadStatus::Cancelled, &asset.name, 1.0));
                return;
            }
            run_instantiation(self.instantiator.as_ref(), asset, sink);
        }
    }

    async fn load_scene(&mut self, key: &AssetKey, mode: SceneMode, sink: &mut EventSink, cancel: &CancellationToken) {
        let resolver = DependencyResolver::new(&self.registry);
        let entry = match resolver.find(key, None) {
            Ok(entry) => entry,
            Err(e) => {
                sink.finish(LoadEvent::new(LoadStatus::SceneNotFound, key.as_str(), 0.0).with_message(e.to_string()));
                return;
            }
        };
        if let Err(reason) = SceneLoader::check_request(&entry.asset) {
            sink.finish(LoadEvent::new(LoadStatus::SceneLoadingError, &entry.asset.display_name, 0.0).with_message(reason));
            return;
        }
        // Activated by a load that was queued ahead of this one.
        if let Some(active) = self.scene_host.find_active(&entry.asset.id) {
            sink.finish(
                LoadEvent::new(LoadStatus::AlreadyLoaded, &entry.asset.display_name, 1.0)
                    .with_payload(Payload::Scene(active)),
            );
            return;
        }
        let resolution = match resolver.bundle_of(entry) {
            Ok(resolution) => resolution,
            Err(e) => {
                sink.finish(LoadEvent::new(LoadStatus::BundleNotFound, key.as_str(), 0.0).with_message(e.to_string()));
                return;
            }
        };

        let archive = match self
            .bundles
            .load_chain(&mut self.cache, &resolution.bundle, sink, cancel, false)
            .await
        {
            ChainOutcome::Ready { archive, .. } => archive,
            ChainOutcome::Aborted => return,
        };

        let outcome = self
            .scenes
            .load(self.scene_host.as_ref(), &resolution.asset, &archive, mode, sink, cancel)
            .await;
        if let SceneOutcome::Loaded(scene) = outcome {
            info!("Scene {} loaded from {}", scene.name, scene.bundle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_queue_rejects_loads_through_the_callback() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let queue = LoadQueue::new(tx);

        let (callback, events) = crate::testing::recorder();
        let ticket = queue.enqueue(
            OperationKind::LoadScene {
                key: "Level1".into(),
                mode: SceneMode::Single,
            },
            callback,
        );

        assert_eq!(ticket.id(), 1);
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, LoadStatus::SceneLoadingError);
        assert!(events[0].terminal);
    }

    #[test]
    fn closed_queue_fails_control_replies() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let queue = LoadQueue::new(tx);

        let mut pending = queue.control(QueueCommand::UnloadAll);
        assert!(matches!(pending.try_recv(), Some(Err(LoaderError::QueueClosed))));
    }

    #[test]
    fn ticket_ids_increase() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = LoadQueue::new(tx);
        let a = queue.ticket();
        let b = queue.ticket();
        assert!(b.id() > a.id());
        assert!(!a.is_cancelled());
        a.cancel();
        assert!(a.is_cancelled());
    }
}
