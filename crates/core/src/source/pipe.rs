use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::{ByteSource, closed_error};

/// Create a connected in-memory pipe.
///
/// Bytes written to the [`PipeWriter`] become readable from the
/// [`PipeReader`] in write order. Every byte written before a read is visible
/// to that read, so consecutive writes coalesce: two 500-byte writes are
/// returned by a single 1000-byte `read_into`.
///
/// The buffer is unbounded; writers never block.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(PipeState::default()),
        readable: Condvar::new(),
        writable: Condvar::new(),
    });
    (
        PipeWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

#[derive(Debug, Default)]
struct PipeState {
    buffer: VecDeque<u8>,
    writer_closed: bool,
    reader_closed: bool,
    /// Error reported by the writer, surfaced once the buffer drains.
    failure: Option<(io::ErrorKind, String)>,
}

impl PipeState {
    fn drained_failure(&self) -> Option<io::Error> {
        match &self.failure {
            Some((kind, message)) if self.buffer.is_empty() => {
                Some(io::Error::new(*kind, message.clone()))
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<PipeState>,
    readable: Condvar,
    /// Signalled when the reader consumes bytes or closes.
    writable: Condvar,
}

/// Producer half of a [`pipe`]. Dropping it ends the stream.
#[derive(Debug)]
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Append bytes to the pipe and wake a blocked reader.
    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        if state.reader_closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"));
        }
        if state.writer_closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe writer closed"));
        }
        state.buffer.extend(data);
        self.shared.readable.notify_all();
        Ok(())
    }

    /// End the stream with an error. Bytes already buffered stay readable;
    /// once they are drained every read fails with `err`'s kind and message.
    pub fn fail(&self, err: &io::Error) {
        let mut state = self.shared.state.lock();
        if !state.writer_closed {
            state.failure = Some((err.kind(), err.to_string()));
            state.writer_closed = true;
            self.shared.readable.notify_all();
            tracing::trace!(error = %err, "pipe writer failed");
        }
    }

    /// Whether the reader half has been closed.
    pub fn is_reader_closed(&self) -> bool {
        self.shared.state.lock().reader_closed
    }

    /// Block while `limit` or more bytes are buffered.
    ///
    /// Returns `false` once the reader has closed, `true` when there is room.
    pub fn wait_for_room(&self, limit: usize) -> bool {
        let mut state = self.shared.state.lock();
        while !state.reader_closed && state.buffer.len() >= limit {
            self.shared.writable.wait(&mut state);
        }
        !state.reader_closed
    }

    /// Signal end-of-stream. Bytes already buffered stay readable.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if !state.writer_closed {
            state.writer_closed = true;
            self.shared.readable.notify_all();
            tracing::trace!(buffered = state.buffer.len(), "pipe writer closed");
        }
    }
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer half of a [`pipe`].
#[derive(Debug)]
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Number of bytes written but not yet read.
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    /// Block until there is something to report: data, end-of-stream or close.
    fn wait_readable(&self) -> io::Result<MutexGuard<'_, PipeState>> {
        let mut state = self.shared.state.lock();
        loop {
            if state.reader_closed {
                return Err(closed_error());
            }
            if !state.buffer.is_empty() || state.writer_closed {
                return Ok(state);
            }
            self.shared.readable.wait(&mut state);
        }
    }
}

impl ByteSource for PipeReader {
    fn read_byte(&self) -> io::Result<Option<u8>> {
        let mut state = self.wait_readable()?;
        if let Some(err) = state.drained_failure() {
            return Err(err);
        }
        let byte = state.buffer.pop_front();
        self.shared.writable.notify_all();
        Ok(byte)
    }

    fn read_into(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        if buf.is_empty() {
            return Ok(Some(0));
        }
        let mut state = self.wait_readable()?;
        if let Some(err) = state.drained_failure() {
            return Err(err);
        }
        if state.buffer.is_empty() {
            return Ok(None);
        }
        let n = buf.len().min(state.buffer.len());
        for (slot, byte) in buf.iter_mut().zip(state.buffer.drain(..n)) {
            *slot = byte;
        }
        self.shared.writable.notify_all();
        Ok(Some(n))
    }

    fn close(&self) {
        let mut state = self.shared.state.lock();
        if !state.reader_closed {
            state.reader_closed = true;
            state.buffer.clear();
            self.shared.readable.notify_all();
            self.shared.writable.notify_all();
            tracing::trace!("pipe reader closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.shared.state.lock().reader_closed
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.close();
    }
}
