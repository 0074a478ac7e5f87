//! Byte sources feeding the packetizer.
//!
//! The packetizer never touches a platform stream directly. It pulls from a
//! [`ByteSource`], a small capability interface with three operations:
//!
//! - **read one byte** — used by the streaming dispatcher to build chunks.
//! - **read into a buffer** — used by the frame assembler; returns as soon
//!   as *some* bytes are available (short read) instead of filling the buffer.
//! - **close** — callable from another thread to unblock a pending read.
//!
//! Two implementations ship with the crate:
//!
//! - [`pipe`] ([`PipeWriter`], [`PipeReader`]): in-memory pipe, the encoder
//!   side writes and the packetizer side reads.
//! - [`ReadSource`]: adapter over any [`std::io::Read`], fed into a pipe by
//!   a background thread so that close never waits on the inner reader.

pub mod pipe;
pub mod reader;

use std::io;

pub use pipe::{PipeReader, PipeWriter, pipe};
pub use reader::ReadSource;

/// A blocking, closable stream of bytes.
///
/// `Ok(None)` from either read is the end-marker: the source will never
/// yield another byte. Reads must not be issued from two threads at once.
/// The methods take `&self` so that [`close`](Self::close) can reach a
/// source shared with a worker blocked inside a read.
pub trait ByteSource: Send + Sync {
    /// Read a single byte, blocking until one is available or the stream ends.
    fn read_byte(&self) -> io::Result<Option<u8>>;

    /// Read up to `buf.len()` bytes, blocking only until at least one byte is
    /// available. Returns the count placed at the start of `buf`.
    ///
    /// Returns `Ok(Some(0))` only for an empty `buf`.
    fn read_into(&self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    /// Close the source. Pending and future reads fail with
    /// [`io::ErrorKind::BrokenPipe`]. Idempotent.
    fn close(&self);

    /// Whether [`close`](Self::close) has been called.
    fn is_closed(&self) -> bool;
}

/// Whether a read error is worth retrying in place.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

/// Error returned by reads on a closed source.
pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "byte source closed")
}
