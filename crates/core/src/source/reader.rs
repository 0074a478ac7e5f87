use std::io::{self, Read};
use std::thread;

use super::{ByteSource, PipeReader, PipeWriter, is_transient, pipe};

/// Bytes requested from the inner reader per call.
const FEED_CHUNK: usize = 8 * 1024;

/// Bytes the feeder may buffer ahead of the consumer.
const FEED_AHEAD: usize = 64 * 1024;

/// [`ByteSource`] over any [`std::io::Read`] (file, stdin, socket).
///
/// A feeder thread owns the inner reader and copies what it yields into an
/// in-memory [`pipe`]; reads are served from the pipe. Closing the source
/// closes the pipe, so a read blocked waiting for input returns
/// `BrokenPipe` right away even if the inner reader itself is still stuck.
/// The feeder notices on its next write and exits.
///
/// `Ok(0)` from the inner reader is end-of-stream. A structural error from
/// the inner reader is reported by reads once the bytes before it are
/// consumed; `Interrupted` and `TimedOut` are retried by the feeder.
#[derive(Debug)]
pub struct ReadSource {
    pipe: PipeReader,
}

impl ReadSource {
    /// Spawn the feeder thread for `inner`.
    pub fn new<R: Read + Send + 'static>(inner: R) -> io::Result<Self> {
        let (writer, pipe) = pipe();
        thread::Builder::new()
            .name("navstream-feeder".into())
            .spawn(move || feed(inner, writer))?;
        Ok(Self { pipe })
    }
}

fn feed<R: Read>(mut inner: R, writer: PipeWriter) {
    let mut buf = vec![0u8; FEED_CHUNK];
    let mut total = 0u64;

    while writer.wait_for_room(FEED_AHEAD) {
        match inner.read(&mut buf) {
            Ok(0) => {
                tracing::debug!(total, "read source reached end of stream");
                return;
            }
            Ok(n) => {
                if writer.send(&buf[..n]).is_err() {
                    break;
                }
                total += n as u64;
            }
            Err(e) if is_transient(&e) => {
                tracing::trace!(error = %e, "transient read error, retrying");
            }
            Err(e) => {
                tracing::debug!(error = %e, total, "read source failed");
                writer.fail(&e);
                return;
            }
        }
    }
    tracing::trace!(total, "read source closed, feeder exiting");
}

impl ByteSource for ReadSource {
    fn read_byte(&self) -> io::Result<Option<u8>> {
        self.pipe.read_byte()
    }

    fn read_into(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        self.pipe.read_into(buf)
    }

    fn close(&self) {
        self.pipe.close();
    }

    fn is_closed(&self) -> bool {
        self.pipe.is_closed()
    }
}
