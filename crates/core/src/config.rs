use crate::error::{PacketizerError, Result};

/// Size of a navigation data frame produced by the
/// [`FrameAssembler`](crate::FrameAssembler).
pub const FRAME_CAPACITY: usize = 1000;

/// Maximum payload size of a chunk forwarded by the
/// [`StreamDispatcher`](crate::StreamDispatcher).
pub const CHUNK_CAP: usize = 1000;

/// What the dispatcher does with a partially filled chunk when the source
/// reaches end-of-stream mid-chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EosPolicy {
    /// Deliver the partial chunk as a final, shorter message.
    #[default]
    Flush,
    /// Discard the partial chunk. Matches legacy head-unit proxies that
    /// never forwarded a trailing short chunk. Dropped bytes are counted in
    /// [`DispatchStats::bytes_dropped`](crate::DispatchStats::bytes_dropped).
    Drop,
}

/// Packetizer sizing and end-of-stream behavior.
#[derive(Debug, Clone)]
pub struct PacketizerConfig {
    /// Bytes per frame for `pull_frame` / `pull_exact_frame`.
    pub frame_capacity: usize,
    /// Maximum bytes per streamed chunk.
    pub chunk_cap: usize,
    /// Handling of a chunk cut short by end-of-stream.
    pub eos_policy: EosPolicy,
}

impl Default for PacketizerConfig {
    fn default() -> Self {
        Self {
            frame_capacity: FRAME_CAPACITY,
            chunk_cap: CHUNK_CAP,
            eos_policy: EosPolicy::default(),
        }
    }
}

impl PacketizerConfig {
    pub fn with_frame_capacity(mut self, frame_capacity: usize) -> Self {
        self.frame_capacity = frame_capacity;
        self
    }

    pub fn with_chunk_cap(mut self, chunk_cap: usize) -> Self {
        self.chunk_cap = chunk_cap;
        self
    }

    pub fn with_eos_policy(mut self, eos_policy: EosPolicy) -> Self {
        self.eos_policy = eos_policy;
        self
    }

    /// Reject zero-sized frames and chunks.
    pub fn validate(&self) -> Result<()> {
        if self.frame_capacity == 0 {
            return Err(PacketizerError::InvalidConfig("frame_capacity must be non-zero"));
        }
        if self.chunk_cap == 0 {
            return Err(PacketizerError::InvalidConfig("chunk_cap must be non-zero"));
        }
        Ok(())
    }
}
