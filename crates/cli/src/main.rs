use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use clap::{Parser, ValueEnum};
use navstream::{
    ByteSource, CHUNK_CAP, EosPolicy, FRAME_CAPACITY, FrameAssembler, MessageSink,
    OutboundMessage, PacketizerConfig, ReadSource, StreamDispatcher,
};

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Stream chunks to a sink in the background
    Stream,
    /// Pull frames synchronously until end of stream
    Frames,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Flush,
    Drop,
}

impl From<Policy> for EosPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Flush => EosPolicy::Flush,
            Policy::Drop => EosPolicy::Drop,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "navstream",
    about = "Packetize an encoder byte stream into navigation data messages"
)]
struct Args {
    /// Input file (reads stdin when omitted)
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// Session id stamped on every message
    #[arg(long, short, default_value_t = 0)]
    session_id: u8,

    /// Maximum bytes per streamed chunk
    #[arg(long, default_value_t = CHUNK_CAP)]
    chunk_cap: usize,

    /// Bytes per pulled frame
    #[arg(long, default_value_t = FRAME_CAPACITY)]
    frame_capacity: usize,

    /// What to do with a partial chunk at end of stream
    #[arg(long, value_enum, default_value = "flush")]
    eos_policy: Policy,

    #[arg(long, short, value_enum, default_value = "stream")]
    mode: Mode,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("navstream: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> navstream::Result<()> {
    let config = PacketizerConfig::default()
        .with_chunk_cap(args.chunk_cap)
        .with_frame_capacity(args.frame_capacity)
        .with_eos_policy(args.eos_policy.into());
    config.validate()?;

    let input: Box<dyn Read + Send> = match &args.input {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(io::stdin()),
    };
    let source: Arc<dyn ByteSource> = Arc::new(ReadSource::new(input)?);

    match args.mode {
        Mode::Stream => stream(source, args.session_id, &config),
        Mode::Frames => frames(source, &config),
    }
}

fn stream(
    source: Arc<dyn ByteSource>,
    session_id: u8,
    config: &PacketizerConfig,
) -> navstream::Result<()> {
    let (tx, rx) = mpsc::channel::<OutboundMessage>();
    let sink: Arc<dyn MessageSink> = Arc::new(move |message: OutboundMessage| {
        let _ = tx.send(message);
    });

    let consumer = thread::spawn(move || {
        let mut largest = 0usize;
        for message in rx {
            tracing::debug!(
                session_id = message.session_id,
                session_type = ?message.session_type,
                len = message.payload.len(),
                "message"
            );
            largest = largest.max(message.payload.len());
        }
        largest
    });

    let dispatcher = StreamDispatcher::new(source, sink, session_id, config);
    dispatcher.start()?;
    let stats = dispatcher.wait();
    drop(dispatcher);
    let largest = consumer.join().unwrap_or_default();
    let stats = stats?;

    println!(
        "{} messages, {} bytes delivered, {} bytes dropped, largest payload {}",
        stats.messages, stats.bytes_delivered, stats.bytes_dropped, largest
    );
    Ok(())
}

fn frames(source: Arc<dyn ByteSource>, config: &PacketizerConfig) -> navstream::Result<()> {
    let assembler = FrameAssembler::with_source(source.clone(), config.frame_capacity)?;
    let mut count = 0u64;
    let mut total = 0u64;

    loop {
        let frame = assembler.pull_frame()?;
        if frame.is_end_of_stream() {
            break;
        }
        tracing::debug!(seq = count, len = frame.len(), "frame");
        count += 1;
        total += frame.len() as u64;
    }
    source.close();

    println!("{} frames, {} bytes", count, total);
    Ok(())
}
