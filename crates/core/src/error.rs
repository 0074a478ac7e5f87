//! Error types for the packetizer library.

/// Errors that can occur while packetizing a byte stream.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Source**: [`InvalidSource`](Self::InvalidSource) — no byte source attached;
///   [`Io`](Self::Io) — the source failed irrecoverably (or was closed).
/// - **Dispatcher**: [`NotStarted`](Self::NotStarted),
///   [`DispatcherStopped`](Self::DispatcherStopped),
///   [`WorkerPanicked`](Self::WorkerPanicked).
/// - **Facade**: [`SourceBusy`](Self::SourceBusy).
/// - **Config**: [`InvalidConfig`](Self::InvalidConfig).
///
/// Transient read failures never show up here; they are retried in place.
/// End-of-stream is not an error either, see [`Frame::end_of_stream`](crate::Frame::end_of_stream).
#[derive(Debug, thiserror::Error)]
pub enum PacketizerError {
    /// Structural I/O failure of the byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame pull was attempted with no byte source attached.
    #[error("byte source is not attached")]
    InvalidSource,

    /// The streaming worker currently owns the byte source.
    #[error("byte source is owned by the running dispatcher")]
    SourceBusy,

    /// [`StreamDispatcher::start`](crate::StreamDispatcher::start) was called after stop.
    #[error("dispatcher already stopped")]
    DispatcherStopped,

    /// [`StreamDispatcher::wait`](crate::StreamDispatcher::wait) was called before start.
    #[error("dispatcher not started")]
    NotStarted,

    /// The worker thread panicked before it could report an outcome.
    #[error("dispatcher worker panicked")]
    WorkerPanicked,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Convenience alias for `Result<T, PacketizerError>`.
pub type Result<T> = std::result::Result<T, PacketizerError>;
