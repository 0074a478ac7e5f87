use std::io;
use std::sync::Arc;

use crate::error::{PacketizerError, Result};
use crate::frame::{ExactFrame, Frame};
use crate::source::{self, ByteSource};

/// Synchronous, pull-based frame reader.
///
/// Each call issues reads against the shared [`ByteSource`] and advances
/// its read position. Two modes:
///
/// - [`pull_frame`](Self::pull_frame): one short read of up to `capacity`
///   bytes, "best effort" — the frame holds whatever the source had ready.
/// - [`pull_exact_frame`](Self::pull_exact_frame): accumulate reads until
///   exactly `capacity` bytes are collected or the stream ends.
///
/// The assembler must not be used while another caller (such as a running
/// [`StreamDispatcher`](crate::StreamDispatcher)) reads the same source.
pub struct FrameAssembler {
    source: Option<Arc<dyn ByteSource>>,
    capacity: usize,
}

impl FrameAssembler {
    /// Create an assembler with no source attached.
    ///
    /// Fails with [`PacketizerError::InvalidConfig`] for a zero capacity,
    /// which could never make progress.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PacketizerError::InvalidConfig(
                "frame capacity must be non-zero",
            ));
        }
        Ok(Self {
            source: None,
            capacity,
        })
    }

    pub fn with_source(source: Arc<dyn ByteSource>, capacity: usize) -> Result<Self> {
        let mut assembler = Self::new(capacity)?;
        assembler.attach(source);
        Ok(assembler)
    }

    pub fn attach(&mut self, source: Arc<dyn ByteSource>) {
        self.source = Some(source);
    }

    /// Detach and return the current source, if any.
    pub fn detach(&mut self) -> Option<Arc<dyn ByteSource>> {
        self.source.take()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn source(&self) -> Result<&dyn ByteSource> {
        self.source.as_deref().ok_or(PacketizerError::InvalidSource)
    }

    /// Pull one frame with a single read of up to `capacity` bytes.
    ///
    /// Returns the end-of-stream sentinel once the source is exhausted, on
    /// every subsequent call as well.
    pub fn pull_frame(&self) -> Result<Frame> {
        let source = self.source()?;
        let mut data = vec![0u8; self.capacity];

        match read_retrying(source, &mut data)? {
            None => {
                tracing::debug!("source exhausted, returning end-of-stream frame");
                Ok(Frame::end_of_stream())
            }
            Some(n) => {
                data.truncate(n);
                tracing::trace!(len = n, capacity = self.capacity, "frame pulled");
                Ok(Frame::new(data))
            }
        }
    }

    /// Pull exactly `capacity` bytes.
    ///
    /// Each read asks only for the bytes still missing, so nothing past the
    /// frame boundary is consumed. If the source ends first, the bytes
    /// gathered so far come back as [`ExactFrame::EndedEarly`]. A zero-length
    /// read counts as the end of the stream.
    pub fn pull_exact_frame(&self) -> Result<ExactFrame> {
        let source = self.source()?;
        let mut data = vec![0u8; self.capacity];
        let mut filled = 0usize;
        let mut reads = 0usize;

        while filled < self.capacity {
            reads += 1;
            match read_retrying(source, &mut data[filled..])? {
                Some(n) if n > 0 => filled += n,
                _ => {
                    data.truncate(filled);
                    tracing::debug!(
                        filled,
                        capacity = self.capacity,
                        "stream ended before frame filled"
                    );
                    return Ok(ExactFrame::EndedEarly(data));
                }
            }
        }

        tracing::trace!(capacity = self.capacity, reads, "exact frame assembled");
        Ok(ExactFrame::Full(data))
    }
}

/// `read_into` with transient failures retried in place.
fn read_retrying(source: &dyn ByteSource, buf: &mut [u8]) -> io::Result<Option<usize>> {
    loop {
        match source.read_into(buf) {
            Err(e) if source::is_transient(&e) => {
                tracing::warn!(error = %e, "transient read error, retrying");
            }
            other => return other,
        }
    }
}
