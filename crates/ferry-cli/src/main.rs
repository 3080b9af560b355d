//! ferry CLI
//!
//! Fingerprints files and runs loopback transfers between two in-process
//! peers through the full transfer layer.

mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;

use ferry_core::hash::hash_reader;
use ferry_core::{
    ChannelObserver, Direction, FileControl, FileSink, FileTransfers, LoopbackNetwork,
    LoopbackTransport, OutgoingFile, PeerId, TransferEvent, TransferHandle, TransferId,
    TransferState,
};

use config::Config;
use progress::{TransferProgress, format_bytes, format_speed};

/// ferry - peer-to-peer file transfer
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the BLAKE3 fingerprint of a file
    Hash {
        /// File to fingerprint
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Transfer a file between two in-process peers
    Simulate {
        /// File to send
        #[arg(short, long)]
        file: PathBuf,

        /// Where the receiving peer writes the file
        #[arg(short, long, default_value = "ferry.out")]
        output: PathBuf,

        /// Receiver pauses once this many bytes arrived, then resumes
        #[arg(long)]
        pause_at: Option<u64>,

        /// Keep an existing partial output and continue after its last byte
        #[arg(long)]
        resume: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load_or_default()?,
    };
    config.validate()?;

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt().with_env_filter(level).init();

    match cli.command {
        Commands::Hash { file } => hash_file(file)?,
        Commands::Simulate {
            file,
            output,
            pause_at,
            resume,
        } => {
            simulate(file, output, pause_at, resume, &config).await?;
        }
    }

    Ok(())
}

fn hash_file(file: PathBuf) -> anyhow::Result<()> {
    let size = std::fs::metadata(&file)
        .with_context(|| format!("File not found: {}", file.display()))?
        .len();
    let fingerprint = hash_reader(File::open(&file)?)?;
    println!("{}  {} ({})", fingerprint, file.display(), format_bytes(size));
    Ok(())
}

/// One simulated node
struct Peer {
    transport: std::sync::Arc<LoopbackTransport>,
    service: FileTransfers<LoopbackTransport>,
}

impl Peer {
    /// Feed everything the transport delivered into the service
    fn pump(&mut self) -> usize {
        let events = self.transport.poll();
        let count = events.len();
        for event in events {
            if let Err(e) = self.service.dispatch(event) {
                tracing::debug!("Dispatch on {} failed: {}", peer_name(&self.transport.local()), e);
            }
        }
        count
    }
}

fn peer_name(peer: &PeerId) -> String {
    hex::encode(&peer[..4])
}

/// Progress of the receiving side, driven by observer events
struct Download {
    output: PathBuf,
    total_size: u64,
    resume_from: u64,
    pause_at: Option<u64>,
    paused_rounds: Option<u32>,
    handle: Option<TransferHandle>,
    received: u64,
    outcome: Option<TransferState>,
    progress: Option<TransferProgress>,
}

async fn simulate(
    file: PathBuf,
    output: PathBuf,
    pause_at: Option<u64>,
    resume: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let fingerprint = hash_reader(File::open(&file).with_context(|| {
        format!("File not found: {}", file.display())
    })?)?;
    let outgoing =
        OutgoingFile::from_path(&file)?.with_transfer_id(TransferId::from(fingerprint));
    let total_size = outgoing.total_size;

    let sender_id: PeerId = *ferry_core::hash(b"ferry simulated sender").as_bytes();
    let receiver_id: PeerId = *ferry_core::hash(b"ferry simulated receiver").as_bytes();
    let network = LoopbackNetwork::new(sender_id, receiver_id)
        .with_chunk_size(config.simulate.request_size);
    let (sender_transport, receiver_transport) = network.endpoints();

    let mut sender = Peer {
        service: FileTransfers::new(sender_transport.clone(), config.transfer.clone())?,
        transport: sender_transport,
    };
    sender.service.subscribe(|event: &TransferEvent| {
        if let TransferEvent::StateChanged { previous, state, .. } = event {
            tracing::debug!("Sender transfer {} -> {}", previous, state);
        }
    });

    let mut receiver = Peer {
        service: FileTransfers::new(receiver_transport.clone(), config.transfer.clone())?,
        transport: receiver_transport,
    };
    let (observer, mut events) = ChannelObserver::new(config.transfer.event_queue_capacity);
    receiver.service.subscribe(observer);

    let resume_from = if resume && output.exists() {
        std::fs::metadata(&output)?.len().min(total_size)
    } else {
        0
    };

    println!("File:     {}", file.display());
    println!("Size:     {}", format_bytes(total_size));
    println!("Id:       {}", fingerprint);
    println!("Output:   {}", output.display());
    if resume_from > 0 {
        println!("Resuming: at {}", format_bytes(resume_from));
    }

    let handle = sender.service.send(receiver_id, outgoing)?;
    tracing::debug!("Sending as handle {}", handle);

    let mut download = Download {
        output: output.clone(),
        total_size,
        resume_from,
        pause_at,
        paused_rounds: None,
        handle: None,
        received: resume_from,
        outcome: None,
        progress: None,
    };
    let started = Instant::now();

    while download.outcome.is_none() {
        let moved = receiver.pump() + sender.pump();
        handle_events(&mut events, &mut receiver, &sender_id, &mut download, config)?;

        if moved == 0 && network.is_idle() && download.paused_rounds.is_none() {
            anyhow::bail!("Transfer stalled at {} bytes", download.received);
        }
        tokio::task::yield_now().await;
    }

    let elapsed = started.elapsed().as_secs_f64();
    let moved = download.received - download.resume_from;
    match download.outcome {
        Some(TransferState::Completed) => {
            let check = hash_reader(File::open(&output)?)?;
            if check != fingerprint {
                anyhow::bail!("Output fingerprint mismatch: {check}");
            }
            println!(
                "{} {} in {:.2}s ({})",
                style("Transfer complete:").green().bold(),
                format_bytes(moved),
                elapsed,
                format_speed(if elapsed > 0.0 { moved as f64 / elapsed } else { 0.0 })
            );
            Ok(())
        }
        other => anyhow::bail!("Transfer ended in state {:?}", other),
    }
}

/// React to receiver-side events the way a client UI would
fn handle_events(
    events: &mut mpsc::Receiver<TransferEvent>,
    receiver: &mut Peer,
    sender_id: &PeerId,
    download: &mut Download,
    config: &Config,
) -> anyhow::Result<()> {
    while let Ok(event) = events.try_recv() {
        match event {
            TransferEvent::TransferCreated {
                peer,
                handle,
                direction: Direction::Incoming,
                total_size,
                filename,
                ..
            } if peer == *sender_id => {
                let sink = if download.resume_from > 0 {
                    let (sink, _) = FileSink::open_resume(&download.output)?;
                    receiver.service.seek(peer, handle, download.resume_from)?;
                    sink
                } else {
                    FileSink::create(&download.output)?
                };
                receiver.service.accept(peer, handle, Box::new(sink))?;

                download.progress = Some(TransferProgress::new(
                    total_size,
                    filename.as_str(),
                    download.resume_from,
                ));
                download.handle = Some(handle);
            }
            TransferEvent::ChunkReceived { offset, data, .. } => {
                download.received = offset + data.len() as u64;
                if let Some(progress) = &download.progress {
                    progress.update(download.received);
                }
                let reached = download.pause_at.is_some_and(|at| download.received >= at);
                if reached && download.received < download.total_size {
                    download.pause_at = None;
                    if let Some(handle) = download.handle {
                        receiver.service.control(*sender_id, handle, FileControl::Pause)?;
                        download.paused_rounds = Some(0);
                        if let Some(progress) = &download.progress {
                            progress.paused();
                        }
                    }
                }
            }
            TransferEvent::StateChanged { state, .. } if state.is_terminal() => {
                if let Some(progress) = &download.progress {
                    progress.finish(state, &download.output);
                }
                download.outcome = Some(state);
            }
            _ => {}
        }
    }

    if let (Some(rounds), Some(handle)) = (download.paused_rounds, download.handle) {
        if rounds >= config.simulate.pause_rounds {
            receiver.service.control(*sender_id, handle, FileControl::Resume)?;
            download.paused_rounds = None;
            if let Some(progress) = &download.progress {
                progress.resumed();
            }
        } else {
            download.paused_rounds = Some(rounds + 1);
        }
    }
    Ok(())
}
