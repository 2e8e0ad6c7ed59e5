use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::archive::AssetObject;
use crate::instantiate::Instance;
use crate::scene::ActiveScene;

/// Every status a load request can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStatus {
    // Target bundle
    BundleLoading,
    BundleLoaded,
    BundleSkipped,
    BundleNotFound,
    BundleLoadError,

    // Dependency bundles (non-fatal)
    DependencyLoading,
    DependencyLoaded,
    DependencySkipped,
    DependencyNotFound,
    DependencyLoadError,

    /// Target bundle open; carries the dependency tally
    BundleReady,

    AssetLoading,
    AssetLoaded,
    AssetNotFound,
    AssetLoadingError,

    Instantiating,
    Instantiated,
    InstantiatingError,

    /// A fill for the same asset is already in flight
    Caching,

    SceneLoading,
    SceneLoaded,
    SceneNotFound,
    SceneLoadingError,
    AlreadyLoaded,

    Cancelled,
}

impl LoadStatus {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            LoadStatus::BundleNotFound
                | LoadStatus::BundleLoadError
                | LoadStatus::DependencyNotFound
                | LoadStatus::DependencyLoadError
                | LoadStatus::AssetNotFound
                | LoadStatus::AssetLoadingError
                | LoadStatus::InstantiatingError
                | LoadStatus::SceneNotFound
                | LoadStatus::SceneLoadingError
        )
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Counts reported with `BundleReady`. Cache-skipped dependencies are
/// tracked separately and never count towards `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependencyTally {
    pub ready: usize,
    pub missing: usize,
    pub skipped: usize,
    pub total: usize,
}

impl DependencyTally {
    pub(crate) fn record_ready(&mut self) {
        self.ready += 1;
        self.total += 1;
    }

    pub(crate) fn record_missing(&mut self) {
        self.missing += 1;
        self.total += 1;
    }

    pub(crate) fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    /// Every non-skipped dependency opened.
    pub fn is_complete(&self) -> bool {
        self.missing == 0
    }
}

/// Content delivered with a terminal success status.
#[derive(Debug, Clone)]
pub enum Payload {
    Asset(Arc<AssetObject>),
    Instance(Arc<Instance>),
    Scene(Arc<ActiveScene>),
}

impl Payload {
    pub fn as_asset(&self) -> Option<&Arc<AssetObject>> {
        match self {
            Payload::Asset(asset) => Some(asset),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Arc<Instance>> {
        match self {
            Payload::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_scene(&self) -> Option<&Arc<ActiveScene>> {
        match self {
            Payload::Scene(scene) => Some(scene),
            _ => None,
        }
    }
}

/// One status report delivered to a load callback.
#[derive(Debug, Clone)]
pub struct LoadEvent {
    pub status: LoadStatus,
    /// Bundle name for bundle events, asset or scene name otherwise
    pub name: String,
    /// Fraction in `0.0..=1.0`
    pub progress: f32,
    pub payload: Option<Payload>,
    pub tally: Option<DependencyTally>,
    pub message: Option<String>,
    /// Last event of the request
    pub terminal: bool,
}

impl LoadEvent {
    pub fn new(status: LoadStatus, name: impl Into<String>, progress: f32) -> Self {
        Self {
            status,
            name: name.into(),
            progress: progress.clamp(0.0, 1.0),
            payload: None,
            tally: None,
            message: None,
            terminal: false,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_tally(mut self, tally: DependencyTally) -> Self {
        self.tally = Some(tally);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub(crate) fn finished(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn asset(&self) -> Option<&Arc<AssetObject>> {
        self.payload.as_ref().and_then(Payload::as_asset)
    }
}

/// Callback receiving every event of one request.
pub type LoadCallback = Box<dyn FnMut(LoadEvent) + Send + 'static>;

/// Invoke `callback`, containing any panic it raises.
pub(crate) fn deliver(operation: u64, callback: &mut LoadCallback, event: LoadEvent) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
        warn!("Load callback for operation #{} panicked", operation);
    }
}

/// Run a host-supplied hook, turning a panic into an error.
pub(crate) fn contain<T>(hook: &str, f: impl FnOnce() -> Result<T, String>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(format!("{} panicked: {}", hook, panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Delivers events for one operation to its callback.
///
/// A panicking callback is contained and logged so it cannot take the
/// queue consumer down with it.
pub(crate) struct EventSink {
    operation: u64,
    callback: LoadCallback,
    log_progress: bool,
    finished: bool,
}

impl EventSink {
    pub(crate) fn new(operation: u64, callback: LoadCallback, log_progress: bool) -> Self {
        Self {
            operation,
            callback,
            log_progress,
            finished: false,
        }
    }

    pub(crate) fn emit(&mut self, event: LoadEvent) {
        if self.finished {
            warn!(
                "Operation #{} emitted {} after its terminal event",
                self.operation, event.status
            );
            return;
        }
        if self.log_progress {
            debug!(
                "#{} {} {} {:.0}%",
                self.operation,
                event.status,
                event.name,
                event.progress * 100.0
            );
        }
        self.finished = event.terminal;
        deliver(self.operation, &mut self.callback, event);
    }

    /// Emit the request's last event.
    pub(crate) fn finish(&mut self, event: LoadEvent) {
        self.emit(event.finished());
    }

    pub(crate) fn emit_or_finish(&mut self, event: LoadEvent, terminal: bool) {
        if terminal {
            self.finish(event);
        } else {
            self.emit(event);
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }
}
