use contentdb_core::ContentError;

/// Errors raised by the loader facade itself. Per-request failures are
/// reported through load events instead.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("failed to start load runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("load queue is closed")]
    QueueClosed,

    #[error(transparent)]
    Content(#[from] ContentError),
}
