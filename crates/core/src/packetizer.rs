use std::sync::Arc;

use crate::assembler::FrameAssembler;
use crate::config::PacketizerConfig;
use crate::dispatcher::{DispatchStats, DispatcherState, StreamDispatcher};
use crate::error::{PacketizerError, Result};
use crate::frame::{ExactFrame, Frame};
use crate::message::MessageSink;
use crate::source::ByteSource;

/// Packetizer for an H.264 encoder byte stream on the navigation channel.
///
/// Bundles a [`FrameAssembler`] and a [`StreamDispatcher`] over one byte
/// source. The stream is treated as opaque bytes; no NAL parsing happens
/// here.
///
/// The two halves must not read the source at the same time, so frame
/// pulls fail with [`PacketizerError::SourceBusy`] while the dispatcher is
/// running. After [`stop`](Self::stop) the source is closed and pulls fail
/// with [`PacketizerError::Io`].
pub struct H264Packetizer {
    config: PacketizerConfig,
    assembler: FrameAssembler,
    dispatcher: StreamDispatcher,
}

impl H264Packetizer {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        source: Arc<dyn ByteSource>,
        session_id: u8,
    ) -> Result<Self> {
        Self::with_config(sink, source, session_id, PacketizerConfig::default())
    }

    pub fn with_config(
        sink: Arc<dyn MessageSink>,
        source: Arc<dyn ByteSource>,
        session_id: u8,
        config: PacketizerConfig,
    ) -> Result<Self> {
        config.validate()?;
        tracing::debug!(
            session_id,
            frame_capacity = config.frame_capacity,
            chunk_cap = config.chunk_cap,
            "packetizer created"
        );
        Ok(Self {
            assembler: FrameAssembler::with_source(source.clone(), config.frame_capacity)?,
            dispatcher: StreamDispatcher::new(source, sink, session_id, &config),
            config,
        })
    }

    pub fn session_id(&self) -> u8 {
        self.dispatcher.session_id()
    }

    pub fn config(&self) -> &PacketizerConfig {
        &self.config
    }

    /// Start streaming chunks to the sink in the background.
    pub fn start(&self) -> Result<()> {
        self.dispatcher.start()
    }

    /// Stop streaming and close the source. Idempotent.
    pub fn stop(&self) -> DispatchStats {
        self.dispatcher.stop()
    }

    /// Block until streaming ends on its own.
    pub fn wait(&self) -> Result<DispatchStats> {
        self.dispatcher.wait()
    }

    pub fn state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// See [`FrameAssembler::pull_frame`].
    pub fn pull_frame(&self) -> Result<Frame> {
        self.ensure_source_free()?;
        self.assembler.pull_frame()
    }

    /// See [`FrameAssembler::pull_exact_frame`].
    pub fn pull_exact_frame(&self) -> Result<ExactFrame> {
        self.ensure_source_free()?;
        self.assembler.pull_exact_frame()
    }

    fn ensure_source_free(&self) -> Result<()> {
        if self.dispatcher.state() == DispatcherState::Running {
            return Err(PacketizerError::SourceBusy);
        }
        Ok(())
    }
}
