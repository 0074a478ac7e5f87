pub mod assembler;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod message;
pub mod packetizer;
pub mod source;

pub use assembler::FrameAssembler;
pub use config::{CHUNK_CAP, EosPolicy, FRAME_CAPACITY, PacketizerConfig};
pub use dispatcher::{DispatchStats, DispatcherState, StreamDispatcher};
pub use error::{PacketizerError, Result};
pub use frame::{ExactFrame, Frame};
pub use message::{MessageSink, OutboundMessage, SessionType};
pub use packetizer::H264Packetizer;
pub use source::{ByteSource, PipeReader, PipeWriter, ReadSource, pipe};
