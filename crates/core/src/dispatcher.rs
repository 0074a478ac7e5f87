//! Background streaming of a byte source into outbound messages.
//!
//! ## Lifecycle
//!
//! ```text
//! new()            -> Idle
//! start()          -> Running   (worker thread spawned)
//! stop()           -> Stopped   (source closed, worker joined)
//! end-of-stream    -> Stopped   (worker exits on its own)
//! structural error -> Stopped   (error returned from wait())
//! ```
//!
//! `Stopped` is terminal: the source has been closed and cannot be reused.
//!
//! ## Chunking
//!
//! The worker reads one byte at a time into a chunk local to the worker
//! thread. A chunk is forwarded as soon as it holds `chunk_cap` bytes. When
//! the source ends mid-chunk, the partial chunk is flushed or dropped
//! according to [`EosPolicy`]. Chunks reach the sink in read order.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::{EosPolicy, PacketizerConfig};
use crate::error::{PacketizerError, Result};
use crate::message::{MessageSink, OutboundMessage};
use crate::source::{self, ByteSource};

/// Externally visible dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Constructed, worker not started.
    Idle,
    /// Worker is draining the source.
    Running,
    /// Source closed and worker finished.
    Stopped,
}

/// Byte and message counters for one dispatcher.
///
/// Once the worker has exited, `bytes_delivered == bytes_read - bytes_dropped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages handed to the sink.
    pub messages: u64,
    /// Bytes pulled from the source into chunks.
    pub bytes_read: u64,
    /// Payload bytes handed to the sink.
    pub bytes_delivered: u64,
    /// Bytes read but never delivered (end-of-stream under
    /// [`EosPolicy::Drop`], or a chunk cut short by `stop()`).
    pub bytes_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    messages: AtomicU64,
    bytes_read: AtomicU64,
    bytes_delivered: AtomicU64,
    bytes_dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            messages: self.messages.load(Ordering::SeqCst),
            bytes_read: self.bytes_read.load(Ordering::SeqCst),
            bytes_delivered: self.bytes_delivered.load(Ordering::SeqCst),
            bytes_dropped: self.bytes_dropped.load(Ordering::SeqCst),
        }
    }
}

enum Phase {
    Idle,
    /// `None` while another caller is joining the worker.
    Running(Option<JoinHandle<Result<()>>>),
    Stopped,
}

/// How a chunk fill ended.
enum Fill {
    Full,
    EndOfStream,
    Cancelled,
}

/// State shared between the dispatcher handle and its worker thread.
struct Worker {
    source: Arc<dyn ByteSource>,
    sink: Arc<dyn MessageSink>,
    session_id: u8,
    chunk_cap: usize,
    eos_policy: EosPolicy,
    cancel: AtomicBool,
    counters: Counters,
}

impl Worker {
    /// Drain the source, then close it so that nothing reads it after the
    /// dispatcher reports `Stopped`.
    fn run(&self) -> Result<()> {
        tracing::debug!(session_id = self.session_id, "dispatch loop started");
        let result = self.pump();
        self.source.close();
        match &result {
            Ok(()) => tracing::debug!(
                session_id = self.session_id,
                messages = self.counters.messages.load(Ordering::SeqCst),
                "dispatch loop finished"
            ),
            Err(e) => tracing::error!(
                session_id = self.session_id,
                error = %e,
                "dispatch loop failed"
            ),
        }
        result
    }

    fn pump(&self) -> Result<()> {
        let mut chunk = Vec::with_capacity(self.chunk_cap);
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(());
            }

            match self.fill(&mut chunk)? {
                Fill::Full => self.forward(&mut chunk),
                Fill::EndOfStream => {
                    tracing::debug!(
                        session_id = self.session_id,
                        pending = chunk.len(),
                        "source exhausted"
                    );
                    if !chunk.is_empty() {
                        match self.eos_policy {
                            EosPolicy::Flush => self.forward(&mut chunk),
                            EosPolicy::Drop => {
                                tracing::warn!(
                                    session_id = self.session_id,
                                    dropped = chunk.len(),
                                    "partial chunk dropped at end of stream"
                                );
                                self.discard(&mut chunk);
                            }
                        }
                    }
                    return Ok(());
                }
                Fill::Cancelled => {
                    if !chunk.is_empty() {
                        tracing::debug!(
                            session_id = self.session_id,
                            discarded = chunk.len(),
                            "partial chunk discarded on stop"
                        );
                        self.discard(&mut chunk);
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Read bytes into `chunk` until it holds `chunk_cap` bytes or the
    /// stream ends.
    fn fill(&self, chunk: &mut Vec<u8>) -> Result<Fill> {
        while chunk.len() < self.chunk_cap {
            match self.next_byte() {
                Ok(Some(byte)) => chunk.push(byte),
                Ok(None) => return Ok(Fill::EndOfStream),
                Err(_) if self.cancel.load(Ordering::SeqCst) => return Ok(Fill::Cancelled),
                Err(e) => {
                    self.counters
                        .bytes_read
                        .fetch_add(chunk.len() as u64, Ordering::SeqCst);
                    self.counters
                        .bytes_dropped
                        .fetch_add(chunk.len() as u64, Ordering::SeqCst);
                    return Err(PacketizerError::Io(e));
                }
            }
        }
        Ok(Fill::Full)
    }

    /// `read_byte` with transient failures retried in place.
    fn next_byte(&self) -> io::Result<Option<u8>> {
        loop {
            match self.source.read_byte() {
                Err(e) if source::is_transient(&e) && !self.cancel.load(Ordering::SeqCst) => {
                    tracing::warn!(
                        session_id = self.session_id,
                        error = %e,
                        "transient read error, retrying"
                    );
                }
                other => return other,
            }
        }
    }

    fn forward(&self, chunk: &mut Vec<u8>) {
        let payload = std::mem::replace(chunk, Vec::with_capacity(self.chunk_cap));
        let len = payload.len() as u64;

        self.counters.bytes_read.fetch_add(len, Ordering::SeqCst);
        self.counters.bytes_delivered.fetch_add(len, Ordering::SeqCst);
        let seq = self.counters.messages.fetch_add(1, Ordering::SeqCst);

        tracing::trace!(session_id = self.session_id, seq, len, "chunk forwarded");
        self.sink
            .deliver(OutboundMessage::nav_data(self.session_id, payload));
    }

    fn discard(&self, chunk: &mut Vec<u8>) {
        let len = chunk.len() as u64;
        self.counters.bytes_read.fetch_add(len, Ordering::SeqCst);
        self.counters.bytes_dropped.fetch_add(len, Ordering::SeqCst);
        chunk.clear();
    }
}

/// Drains a [`ByteSource`] on a background thread, forwarding each chunk
/// of at most `chunk_cap` bytes to a [`MessageSink`].
///
/// Control operations may be called from any thread. One worker runs per
/// dispatcher; while it runs it is the only reader of the source.
pub struct StreamDispatcher {
    worker: Arc<Worker>,
    phase: Mutex<Phase>,
    stopped: Condvar,
}

impl StreamDispatcher {
    pub fn new(
        source: Arc<dyn ByteSource>,
        sink: Arc<dyn MessageSink>,
        session_id: u8,
        config: &PacketizerConfig,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                source,
                sink,
                session_id,
                chunk_cap: config.chunk_cap,
                eos_policy: config.eos_policy,
                cancel: AtomicBool::new(false),
                counters: Counters::default(),
            }),
            phase: Mutex::new(Phase::Idle),
            stopped: Condvar::new(),
        }
    }

    pub fn session_id(&self) -> u8 {
        self.worker.session_id
    }

    /// Spawn the worker. No-op if it is already running.
    ///
    /// Fails with [`PacketizerError::DispatcherStopped`] once the dispatcher
    /// has stopped or a `stop()` is in progress, including after the worker
    /// exited on its own.
    pub fn start(&self) -> Result<()> {
        let mut phase = self.phase.lock();
        match &*phase {
            Phase::Idle => {}
            Phase::Running(Some(handle)) if handle.is_finished() => {
                return Err(PacketizerError::DispatcherStopped);
            }
            Phase::Running(_) if self.worker.cancel.load(Ordering::SeqCst) => {
                return Err(PacketizerError::DispatcherStopped);
            }
            Phase::Running(_) => return Ok(()),
            Phase::Stopped => return Err(PacketizerError::DispatcherStopped),
        }

        let worker = self.worker.clone();
        let handle = thread::Builder::new()
            .name(format!("navstream-{}", self.worker.session_id))
            .spawn(move || worker.run())?;
        *phase = Phase::Running(Some(handle));

        tracing::info!(
            session_id = self.worker.session_id,
            chunk_cap = self.worker.chunk_cap,
            eos_policy = ?self.worker.eos_policy,
            "dispatcher started"
        );
        Ok(())
    }

    /// Cancel the worker, close the source and wait for the worker to exit.
    ///
    /// Idempotent and safe to call before [`start`](Self::start). Closing the
    /// source unblocks a worker waiting inside a read. Returns the final
    /// counters.
    pub fn stop(&self) -> DispatchStats {
        let phase = self.phase.lock();
        match &*phase {
            Phase::Stopped => return self.stats(),
            Phase::Idle | Phase::Running(_) => {}
        }

        self.worker.cancel.store(true, Ordering::SeqCst);
        self.worker.source.close();

        match self.join(phase) {
            Ok(()) => {}
            Err(PacketizerError::WorkerPanicked) => {
                tracing::error!(
                    session_id = self.worker.session_id,
                    "dispatcher worker panicked"
                );
            }
            Err(e) => {
                tracing::debug!(
                    session_id = self.worker.session_id,
                    error = %e,
                    "worker had already failed before stop"
                );
            }
        }

        let stats = self.stats();
        tracing::info!(
            session_id = self.worker.session_id,
            messages = stats.messages,
            bytes_delivered = stats.bytes_delivered,
            bytes_dropped = stats.bytes_dropped,
            "dispatcher stopped"
        );
        stats
    }

    /// Block until the worker exits on its own (end-of-stream or failure).
    ///
    /// A structural I/O failure of the source is returned as
    /// [`PacketizerError::Io`].
    pub fn wait(&self) -> Result<DispatchStats> {
        let phase = self.phase.lock();
        match &*phase {
            Phase::Idle => return Err(PacketizerError::NotStarted),
            Phase::Stopped => return Ok(self.stats()),
            Phase::Running(_) => {}
        }
        self.join(phase)?;
        Ok(self.stats())
    }

    pub fn state(&self) -> DispatcherState {
        match &*self.phase.lock() {
            Phase::Idle => DispatcherState::Idle,
            Phase::Running(Some(handle)) if handle.is_finished() => DispatcherState::Stopped,
            Phase::Running(_) => DispatcherState::Running,
            Phase::Stopped => DispatcherState::Stopped,
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.worker.counters.snapshot()
    }

    /// Join the worker (or wait for whoever is joining it) and move to `Stopped`.
    fn join(&self, mut phase: MutexGuard<'_, Phase>) -> Result<()> {
        let handle = match &mut *phase {
            Phase::Running(handle) => handle.take(),
            Phase::Idle => None,
            Phase::Stopped => return Ok(()),
        };

        let Some(handle) = handle else {
            if matches!(*phase, Phase::Idle) {
                *phase = Phase::Stopped;
                self.worker.source.close();
                return Ok(());
            }
            while !matches!(*phase, Phase::Stopped) {
                self.stopped.wait(&mut phase);
            }
            return Ok(());
        };

        let joined = MutexGuard::unlocked(&mut phase, || handle.join());

        *phase = Phase::Stopped;
        self.worker.source.close();
        self.stopped.notify_all();

        joined.unwrap_or(Err(PacketizerError::WorkerPanicked))
    }
}

impl Drop for StreamDispatcher {
    fn drop(&mut self) {
        if matches!(self.state(), DispatcherState::Running) {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::source::pipe;

    /// Replays a fixed sequence of `read_byte` results, then reports end-of-stream.
    struct ScriptedSource {
        script: Mutex<VecDeque<io::Result<Option<u8>>>>,
        closed: AtomicBool,
    }

    impl ScriptedSource {
        fn new(script: Vec<io::Result<Option<u8>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                closed: AtomicBool::new(false),
            }
        }
    }

    impl ByteSource for ScriptedSource {
        fn read_byte(&self) -> io::Result<Option<u8>> {
            self.script.lock().pop_front().unwrap_or(Ok(None))
        }

        fn read_into(&self, _buf: &mut [u8]) -> io::Result<Option<usize>> {
            unimplemented!()
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    /// Blocks every read until the test sends a byte or drops the gate.
    /// Ignores `close`, like a reader stuck inside a device call.
    struct GatedSource {
        gate: Mutex<mpsc::Receiver<u8>>,
    }

    impl ByteSource for GatedSource {
        fn read_byte(&self) -> io::Result<Option<u8>> {
            Ok(self.gate.lock().recv().ok())
        }

        fn read_into(&self, _buf: &mut [u8]) -> io::Result<Option<usize>> {
            unimplemented!()
        }

        fn close(&self) {}

        fn is_closed(&self) -> bool {
            false
        }
    }

    fn channel_sink() -> (Arc<dyn MessageSink>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel();
        let sink: Arc<dyn MessageSink> = Arc::new(move |message: OutboundMessage| {
            let _ = tx.send(message);
        });
        (sink, rx)
    }

    fn small_chunks() -> PacketizerConfig {
        PacketizerConfig::default().with_chunk_cap(4)
    }

    #[test]
    fn forwards_full_chunks_in_order() {
        let (writer, reader) = pipe();
        let (sink, rx) = channel_sink();
        let dispatcher = StreamDispatcher::new(Arc::new(reader), sink, 3, &small_chunks());

        dispatcher.start().unwrap();
        writer.send(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.payload, vec![1, 2, 3, 4]);
        assert_eq!(second.payload, vec![5, 6, 7, 8]);
        assert_eq!(first.session_id, 3);

        let stats = dispatcher.stop();
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.bytes_delivered, 8);
    }

    #[test]
    fn flush_policy_delivers_trailing_chunk() {
        let (writer, reader) = pipe();
        let (sink, rx) = channel_sink();
        let dispatcher = StreamDispatcher::new(Arc::new(reader), sink, 1, &small_chunks());

        writer.send(&[1, 2, 3, 4, 5, 6]).unwrap();
        drop(writer);
        dispatcher.start().unwrap();

        let stats = dispatcher.wait().unwrap();
        let payloads: Vec<_> = rx.try_iter().map(|m| m.payload).collect();
        assert_eq!(payloads, vec![vec![1, 2, 3, 4], vec![5, 6]]);
        assert_eq!(stats.bytes_read, 6);
        assert_eq!(stats.bytes_dropped, 0);
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }

    #[test]
    fn drop_policy_counts_lost_bytes() {
        let (writer, reader) = pipe();
        let (sink, rx) = channel_sink();
        let config = small_chunks().with_eos_policy(EosPolicy::Drop);
        let dispatcher = StreamDispatcher::new(Arc::new(reader), sink, 1, &config);

        writer.send(&[1, 2, 3, 4, 5, 6]).unwrap();
        drop(writer);
        dispatcher.start().unwrap();

        let stats = dispatcher.wait().unwrap();
        let payloads: Vec<_> = rx.try_iter().map(|m| m.payload).collect();
        assert_eq!(payloads, vec![vec![1, 2, 3, 4]]);
        assert_eq!(stats.bytes_read, 6);
        assert_eq!(stats.bytes_delivered, 4);
        assert_eq!(stats.bytes_dropped, 2);
    }

    #[test]
    fn empty_stream_sends_nothing() {
        let (writer, reader) = pipe();
        let (sink, rx) = channel_sink();
        let dispatcher = StreamDispatcher::new(Arc::new(reader), sink, 1, &small_chunks());

        drop(writer);
        dispatcher.start().unwrap();
        assert_eq!(dispatcher.wait().unwrap(), DispatchStats::default());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stop_before_start_is_terminal() {
        let (_writer, reader) = pipe();
        let reader = Arc::new(reader);
        let (sink, _rx) = channel_sink();
        let dispatcher = StreamDispatcher::new(reader.clone(), sink, 1, &small_chunks());

        dispatcher.stop();
        dispatcher.stop();

        assert!(reader.is_closed());
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
        assert!(matches!(
            dispatcher.start(),
            Err(PacketizerError::DispatcherStopped)
        ));
    }

    #[test]
    fn start_twice_is_noop() {
        let (_writer, reader) = pipe();
        let (sink, _rx) = channel_sink();
        let dispatcher = StreamDispatcher::new(Arc::new(reader), sink, 1, &small_chunks());

        dispatcher.start().unwrap();
        dispatcher.start().unwrap();
        assert_eq!(dispatcher.state(), DispatcherState::Running);
        dispatcher.stop();
    }

    #[test]
    fn wait_before_start_fails() {
        let (_writer, reader) = pipe();
        let (sink, _rx) = channel_sink();
        let dispatcher = StreamDispatcher::new(Arc::new(reader), sink, 1, &small_chunks());
        assert!(matches!(dispatcher.wait(), Err(PacketizerError::NotStarted)));
    }

    #[test]
    fn stop_discards_partial_chunk() {
        let (writer, reader) = pipe();
        let (sink, rx) = channel_sink();
        let dispatcher = StreamDispatcher::new(Arc::new(reader), sink, 1, &small_chunks());

        dispatcher.start().unwrap();
        writer.send(&[1, 2]).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let stats = dispatcher.stop();
        assert!(rx.try_recv().is_err());
        assert_eq!(stats.bytes_delivered, 0);
        assert_eq!(stats.bytes_read, stats.bytes_dropped);
    }

    #[test]
    fn transient_errors_retry_and_structural_errors_end_the_run() {
        let source = ScriptedSource::new(vec![
            Ok(Some(0)),
            Ok(Some(1)),
            Err(io::Error::from(io::ErrorKind::Interrupted)),
            Ok(Some(2)),
            Err(io::Error::other("boom")),
        ]);
        let source = Arc::new(source);
        let (sink, rx) = channel_sink();
        let config = PacketizerConfig::default().with_chunk_cap(2);
        let dispatcher = StreamDispatcher::new(source.clone(), sink, 1, &config);

        dispatcher.start().unwrap();
        match dispatcher.wait() {
            Err(PacketizerError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::Other),
            other => panic!("expected structural read error, got {other:?}"),
        }

        let payloads: Vec<_> = rx.try_iter().map(|m| m.payload).collect();
        assert_eq!(payloads, vec![vec![0, 1]]);
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
        assert!(source.is_closed());
        assert_eq!(
            dispatcher.stats(),
            DispatchStats {
                messages: 1,
                bytes_read: 3,
                bytes_delivered: 2,
                bytes_dropped: 1,
            }
        );
    }

    #[test]
    fn start_during_stop_fails() {
        let (gate, rx) = mpsc::channel::<u8>();
        let source = Arc::new(GatedSource {
            gate: Mutex::new(rx),
        });
        let (sink, _rx) = channel_sink();
        let dispatcher = Arc::new(StreamDispatcher::new(source, sink, 1, &small_chunks()));
        dispatcher.start().unwrap();

        let stopper = {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || dispatcher.stop())
        };
        while !dispatcher.worker.cancel.load(Ordering::SeqCst) {
            thread::yield_now();
        }

        assert!(matches!(
            dispatcher.start(),
            Err(PacketizerError::DispatcherStopped)
        ));

        drop(gate);
        stopper.join().unwrap();
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }

    #[test]
    fn source_closed_once_worker_exits() {
        let (writer, reader) = pipe();
        let reader = Arc::new(reader);
        let (sink, _rx) = channel_sink();
        let dispatcher = StreamDispatcher::new(reader.clone(), sink, 1, &small_chunks());

        drop(writer);
        dispatcher.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while dispatcher.state() != DispatcherState::Stopped {
            assert!(Instant::now() < deadline, "worker did not exit");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(reader.is_closed());
    }
}
