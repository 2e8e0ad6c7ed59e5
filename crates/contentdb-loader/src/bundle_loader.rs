//! Opens a target bundle and its dependency chain through the bundle cache.
//!
//! Each bundle goes through `NotStarted -> Opening -> {Opened | OpenError |
//! NotFoundOnDisk}`, or straight to `Skipped` when the cache already holds
//! it. The target decides the request's fate; dependency failures are
//! counted and reported but never abort.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use contentdb_core::BundleDescriptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::{Archive, ArchiveStore};
use crate::cache::BundleCache;
use crate::status::{DependencyTally, EventSink, LoadEvent, LoadStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    NotStarted,
    Opening,
    Opened,
    OpenError,
    NotFoundOnDisk,
    Skipped,
    Cancelled,
}

impl BundleState {
    fn advance(self, bundle: &str, next: BundleState) -> BundleState {
        debug!("Bundle {}: {:?} -> {:?}", bundle, self, next);
        next
    }
}

/// Whether a bundle is the request's target or one of its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleRole {
    Target,
    Dependency,
}

impl BundleRole {
    fn loading(self) -> LoadStatus {
        match self {
            BundleRole::Target => LoadStatus::BundleLoading,
            BundleRole::Dependency => LoadStatus::DependencyLoading,
        }
    }

    fn loaded(self) -> LoadStatus {
        match self {
            BundleRole::Target => LoadStatus::BundleLoaded,
            BundleRole::Dependency => LoadStatus::DependencyLoaded,
        }
    }

    fn skipped(self) -> LoadStatus {
        match self {
            BundleRole::Target => LoadStatus::BundleSkipped,
            BundleRole::Dependency => LoadStatus::DependencySkipped,
        }
    }

    fn not_found(self) -> LoadStatus {
        match self {
            BundleRole::Target => LoadStatus::BundleNotFound,
            BundleRole::Dependency => LoadStatus::DependencyNotFound,
        }
    }

    fn load_error(self) -> LoadStatus {
        match self {
            BundleRole::Target => LoadStatus::BundleLoadError,
            BundleRole::Dependency => LoadStatus::DependencyLoadError,
        }
    }

    /// Target failures end the request.
    fn is_fatal(self) -> bool {
        self == BundleRole::Target
    }
}

/// Result of driving one bundle through the state machine.
pub(crate) enum BundleLoadOutcome {
    Opened(Arc<Archive>),
    Skipped(Arc<Archive>),
    NotFoundOnDisk,
    OpenError,
    Cancelled,
}

impl BundleLoadOutcome {
    pub(crate) fn state(&self) -> BundleState {
        match self {
            BundleLoadOutcome::Opened(_) => BundleState::Opened,
            BundleLoadOutcome::Skipped(_) => BundleState::Skipped,
            BundleLoadOutcome::NotFoundOnDisk => BundleState::NotFoundOnDisk,
            BundleLoadOutcome::OpenError => BundleState::OpenError,
            BundleLoadOutcome::Cancelled => BundleState::Cancelled,
        }
    }

    fn archive(self) -> Option<Arc<Archive>> {
        match self {
            BundleLoadOutcome::Opened(archive) | BundleLoadOutcome::Skipped(archive) => Some(archive),
            _ => None,
        }
    }
}

/// Result of loading a target with its dependencies.
pub(crate) enum ChainOutcome {
    Ready {
        archive: Arc<Archive>,
        tally: DependencyTally,
    },
    /// A terminal event has already been emitted.
    Aborted,
}

enum OpenResult {
    Opened(Archive),
    Corrupt,
    Failed(String),
    Cancelled,
}

pub struct BundleLoader {
    store: Arc<dyn ArchiveStore>,
    content_dir: PathBuf,
    open_timeout: Option<Duration>,
}

impl BundleLoader {
    pub fn new(store: Arc<dyn ArchiveStore>, content_dir: PathBuf, open_timeout: Option<Duration>) -> Self {
        Self {
            store,
            content_dir,
            open_timeout,
        }
    }

    /// Drive one bundle to a final state, consulting and filling `cache`.
    pub(crate) async fn load_one(
        &self,
        cache: &mut BundleCache,
        bundle: &BundleDescriptor,
        role: BundleRole,
        sink: &mut EventSink,
        cancel: &CancellationToken,
    ) -> BundleLoadOutcome {
        let mut state = BundleState::NotStarted;
        let outcome = self.drive(cache, bundle, role, sink, cancel, &mut state).await;
        state.advance(&bundle.name, outcome.state());
        outcome
    }

    async fn drive(
        &self,
        cache: &mut BundleCache,
        bundle: &BundleDescriptor,
        role: BundleRole,
        sink: &mut EventSink,
        cancel: &CancellationToken,
        state: &mut BundleState,
    ) -> BundleLoadOutcome {
        let name = bundle.name.as_str();
        if cancel.is_cancelled() {
            return BundleLoadOutcome::Cancelled;
        }

        if let Some(archive) = cache.acquire(name) {
            sink.emit(LoadEvent::new(role.skipped(), name, 1.0));
            return BundleLoadOutcome::Skipped(archive);
        }

        let path = self.content_dir.join(name);
        if !self.store.exists(&path).await {
            warn!("Bundle {} not found at {:?}", name, path);
            sink.emit_or_finish(
                LoadEvent::new(role.not_found(), name, 0.0)
                    .with_message(format!("no archive at {}", path.display())),
                role.is_fatal(),
            );
            return BundleLoadOutcome::NotFoundOnDisk;
        }
        if cancel.is_cancelled() {
            return BundleLoadOutcome::Cancelled;
        }

        *state = state.advance(name, BundleState::Opening);
        sink.emit(LoadEvent::new(role.loading(), name, 0.0));
        let result = self.open(&path, name, role, sink, cancel).await;

        match result {
            OpenResult::Opened(archive) => {
                let archive = Arc::new(archive);
                cache.insert(bundle.clone(), Arc::clone(&archive));
                info!("Bundle {} opened ({} items)", name, archive.len());
                sink.emit(LoadEvent::new(role.loaded(), name, 1.0));
                BundleLoadOutcome::Opened(archive)
            }
            OpenResult::Corrupt => {
                sink.emit_or_finish(
                    LoadEvent::new(role.load_error(), name, 1.0).with_message("archive is corrupted"),
                    role.is_fatal(),
                );
                BundleLoadOutcome::OpenError
            }
            OpenResult::Failed(reason) => {
                warn!("Bundle {} failed to open: {}", name, reason);
                sink.emit_or_finish(
                    LoadEvent::new(role.load_error(), name, 0.0).with_message(reason),
                    role.is_fatal(),
                );
                BundleLoadOutcome::OpenError
            }
            OpenResult::Cancelled => BundleLoadOutcome::Cancelled,
        }
    }

    async fn open(
        &self,
        path: &std::path::Path,
        name: &str,
        role: BundleRole,
        sink: &mut EventSink,
        cancel: &CancellationToken,
    ) -> OpenResult {
        let mut on_progress = |progress: f32| sink.emit(LoadEvent::new(role.loading(), name, progress));

        let open = async {
            match self.open_timeout {
                Some(limit) => tokio::time::timeout(limit, self.store.open(path, name, &mut on_progress))
                    .await
                    .map_err(|_| format!("open timed out after {}ms", limit.as_millis())),
                None => Ok(self.store.open(path, name, &mut on_progress).await),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => OpenResult::Cancelled,
            result = open => match result {
                Ok(Ok(Some(archive))) => OpenResult::Opened(archive),
                Ok(Ok(None)) => OpenResult::Corrupt,
                Ok(Err(e)) => OpenResult::Failed(e.to_string()),
                Err(timed_out) => OpenResult::Failed(timed_out),
            },
        }
    }

    /// Load `bundle` and then each of its dependencies in listed order,
    /// finishing with `BundleReady`. When `finish_on_ready` is set the
    /// `BundleReady` event ends the request.
    pub(crate) async fn load_chain(
        &self,
        cache: &mut BundleCache,
        bundle: &BundleDescriptor,
        sink: &mut EventSink,
        cancel: &CancellationToken,
        finish_on_ready: bool,
    ) -> ChainOutcome {
        let target = self.load_one(cache, bundle, BundleRole::Target, sink, cancel).await;
        let archive = match target {
            BundleLoadOutcome::Cancelled => return cancelled(sink, &bundle.name),
            outcome => match outcome.archive() {
                Some(archive) => archive,
                None => return ChainOutcome::Aborted,
            },
        };

        let mut tally = DependencyTally::default();
        for dependency in &bundle.dependencies {
            let outcome = self
                .load_one(cache, dependency, BundleRole::Dependency, sink, cancel)
                .await;
            match outcome.state() {
                BundleState::Opened => tally.record_ready(),
                BundleState::Skipped => tally.record_skipped(),
                BundleState::Cancelled => return cancelled(sink, &bundle.name),
                _ => tally.record_missing(),
            }
        }

        if tally.missing > 0 {
            warn!(
                "Bundle {} ready with {}/{} dependencies missing",
                bundle.name, tally.missing, tally.total
            );
        }
        sink.emit_or_finish(
            LoadEvent::new(LoadStatus::BundleReady, &bundle.name, 1.0).with_tally(tally),
            finish_on_ready,
        );
        ChainOutcome::Ready { archive, tally }
    }
}

fn cancelled(sink: &mut EventSink, name: &str) -> ChainOutcome {
    info!("Load of {} cancelled", name);
    sink.finish(LoadEvent::new(LoadStatus::Cancelled, name, 0.0));
    ChainOutcome::Aborted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, GatedStore, MemoryStore};
    use contentdb_core::DependencyResolver;

    fn loader(store: Arc<dyn ArchiveStore>) -> BundleLoader {
        BundleLoader::new(store, PathBuf::from("/content"), None)
    }

    fn bundle(name: &str) -> BundleDescriptor {
        let registry = testing::registry();
        DependencyResolver::new(&registry).resolve_bundle(name).unwrap()
    }

    #[tokio::test]
    async fn missing_dependency_still_reaches_ready() {
        let store = Arc::new(MemoryStore::fixture());
        let loader = loader(store.clone());
        let mut cache = BundleCache::new();
        let (callback, events) = testing::recorder();
        let mut sink = EventSink::new(1, callback, false);

        let outcome = loader
            .load_chain(&mut cache, &bundle("B_main"), &mut sink, &CancellationToken::new(), false)
            .await;

        let ChainOutcome::Ready { tally, .. } = outcome else {
            panic!("expected Ready");
        };
        assert_eq!(tally, DependencyTally { ready: 0, missing: 1, skipped: 0, total: 1 });
        assert_eq!(
            testing::statuses(&events.lock()),
            vec![
                LoadStatus::BundleLoading,
                LoadStatus::BundleLoaded,
                LoadStatus::DependencyNotFound,
                LoadStatus::BundleReady,
            ]
        );
        assert!(!sink.is_finished());
        assert_eq!(cache.reference_count("B_main"), Some(1));
    }

    #[tokio::test]
    async fn cached_dependencies_are_skipped_and_excluded_from_total() {
        let store = Arc::new(MemoryStore::fixture());
        let loader = loader(store.clone());
        let mut cache = BundleCache::new();
        let cancel = CancellationToken::new();

        let (callback, _) = testing::recorder();
        let mut sink = EventSink::new(1, callback, false);
        loader.load_chain(&mut cache, &bundle("B_main"), &mut sink, &cancel, true).await;

        let (callback, events) = testing::recorder();
        let mut sink = EventSink::new(2, callback, false);
        let outcome = loader.load_chain(&mut cache, &bundle("B_fx"), &mut sink, &cancel, true).await;

        let ChainOutcome::Ready { tally, .. } = outcome else {
            panic!("expected Ready");
        };
        assert_eq!(tally, DependencyTally { ready: 0, missing: 1, skipped: 1, total: 1 });
        assert_eq!(
            testing::statuses(&events.lock()),
            vec![
                LoadStatus::BundleLoading,
                LoadStatus::BundleLoaded,
                LoadStatus::DependencySkipped,
                LoadStatus::DependencyNotFound,
                LoadStatus::BundleReady,
            ]
        );
        assert!(sink.is_finished());
        assert_eq!(cache.reference_count("B_main"), Some(2));
        assert_eq!(store.opens_of("B_main"), 1);
    }

    #[tokio::test]
    async fn corrupt_dependency_counts_as_missing() {
        let store = Arc::new(MemoryStore::fixture());
        let loader = loader(store.clone());
        let mut cache = BundleCache::new();
        let (callback, events) = testing::recorder();
        let mut sink = EventSink::new(1, callback, false);
        let target = BundleDescriptor::new("B_main", "main").with_dependency(BundleDescriptor::new("B_broken", "broken"));

        let outcome = loader
            .load_chain(&mut cache, &target, &mut sink, &CancellationToken::new(), true)
            .await;

        let ChainOutcome::Ready { tally, .. } = outcome else {
            panic!("expected Ready");
        };
        assert_eq!(tally, DependencyTally { ready: 0, missing: 1, skipped: 0, total: 1 });
        let events = events.lock();
        assert_eq!(
            testing::statuses(&events),
            vec![
                LoadStatus::BundleLoading,
                LoadStatus::BundleLoaded,
                LoadStatus::DependencyLoading,
                LoadStatus::DependencyLoadError,
                LoadStatus::BundleReady,
            ]
        );
        let failed = events.iter().find(|e| e.status == LoadStatus::DependencyLoadError).unwrap();
        assert!(!failed.terminal);
        assert!(events.last().unwrap().terminal);
        assert_eq!(store.opens_of("B_broken"), 1);
        assert!(!cache.contains("B_broken"));
    }

    #[tokio::test]
    async fn second_load_skips_target() {
        let store = Arc::new(MemoryStore::fixture());
        let loader = loader(store.clone());
        let mut cache = BundleCache::new();
        let cancel = CancellationToken::new();

        for id in 0..2 {
            let (callback, _) = testing::recorder();
            let mut sink = EventSink::new(id, callback, false);
            loader.load_chain(&mut cache, &bundle("B_main"), &mut sink, &cancel, true).await;
        }

        assert_eq!(store.opens_of("B_main"), 1);
        assert_eq!(cache.reference_count("B_main"), Some(2));
    }

    #[tokio::test]
    async fn corrupt_target_aborts() {
        let store = Arc::new(MemoryStore::fixture());
        let loader = loader(store);
        let mut cache = BundleCache::new();
        let (callback, events) = testing::recorder();
        let mut sink = EventSink::new(1, callback, false);

        let outcome = loader
            .load_chain(&mut cache, &bundle("B_broken"), &mut sink, &CancellationToken::new(), false)
            .await;

        assert!(matches!(outcome, ChainOutcome::Aborted));
        let events = events.lock();
        let last = events.last().unwrap();
        assert_eq!(last.status, LoadStatus::BundleLoadError);
        assert!(last.terminal);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn missing_target_is_terminal_not_found() {
        let store = Arc::new(MemoryStore::new());
        let loader = loader(store.clone());
        let mut cache = BundleCache::new();
        let (callback, events) = testing::recorder();
        let mut sink = EventSink::new(1, callback, false);

        let outcome = loader
            .load_one(&mut cache, &bundle("B_fx"), BundleRole::Target, &mut sink, &CancellationToken::new())
            .await;

        assert_eq!(outcome.state(), BundleState::NotFoundOnDisk);
        assert_eq!(store.opens_of("B_fx"), 0);
        assert_eq!(testing::statuses(&events.lock()), vec![LoadStatus::BundleNotFound]);
        assert!(sink.is_finished());
    }

    #[tokio::test]
    async fn stalled_open_times_out() {
        let store = Arc::new(GatedStore::new(Arc::new(MemoryStore::fixture())));
        let loader = BundleLoader::new(store, PathBuf::from("/content"), Some(Duration::from_millis(20)));
        let mut cache = BundleCache::new();
        let (callback, events) = testing::recorder();
        let mut sink = EventSink::new(1, callback, false);

        let outcome = loader
            .load_one(&mut cache, &bundle("B_main"), BundleRole::Dependency, &mut sink, &CancellationToken::new())
            .await;

        assert_eq!(outcome.state(), BundleState::OpenError);
        let events = events.lock();
        let last = events.last().unwrap();
        assert_eq!(last.status, LoadStatus::DependencyLoadError);
        assert!(last.message.as_deref().unwrap().contains("timed out"));
        assert!(!last.terminal);
    }

    #[tokio::test]
    async fn cancellation_during_open() {
        let store = Arc::new(GatedStore::new(Arc::new(MemoryStore::fixture())));
        let loader = loader(store);
        let mut cache = BundleCache::new();
        let (callback, events) = testing::recorder();
        let mut sink = EventSink::new(1, callback, false);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = loader.load_chain(&mut cache, &bundle("B_main"), &mut sink, &cancel, true).await;

        assert!(matches!(outcome, ChainOutcome::Aborted));
        assert_eq!(events.lock().last().unwrap().status, LoadStatus::Cancelled);
        assert!(cache.is_empty());
    }
}
