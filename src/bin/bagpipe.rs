// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! # Bagpipe CLI
//!
//! Inspect bag files and smoke-test the record/replay pipeline.
//!
//! ## Usage
//!
//! ```sh
//! # Show file information
//! bagpipe info recording.mcap
//!
//! # List topics
//! bagpipe topics recording.mcap
//!
//! # Record synthetic traffic through the loopback transport, then
//! # replay it and verify delivery
//! bagpipe loopback --config bag.yaml --messages 200
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bagpipe::config::BagConfig;
use bagpipe::transport::{MemoryTransport, TransportFactory};
use bagpipe::{BagReader, Player, Recorder};

/// Bagpipe - topic recording and playback toolkit
#[derive(Parser)]
#[command(name = "bagpipe")]
#[command(about = "Record and replay pub/sub topic streams as MCAP bags", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show channels, schemas and statistics of a bag file
    Info {
        /// Bag file to inspect
        file: PathBuf,
    },

    /// List the topics stored in a bag file
    Topics {
        /// Bag file to inspect
        file: PathBuf,
    },

    /// Record synthetic messages over the in-process transport, then
    /// replay the bag and check every payload comes back
    Loopback {
        /// Configuration file (YAML, same layout as the library config)
        #[arg(short, long)]
        config: PathBuf,

        /// Messages to publish per topic
        #[arg(short, long, default_value_t = 100)]
        messages: u32,

        /// Gap between published messages in milliseconds
        #[arg(long, default_value_t = 2)]
        interval_ms: u64,
    },
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Info { file } => info(&file),
        Commands::Topics { file } => topics(&file),
        Commands::Loopback {
            config,
            messages,
            interval_ms,
        } => loopback(&config, messages, interval_ms),
    }
}

fn info(file: &PathBuf) -> Result<()> {
    let reader = BagReader::open(&file.display().to_string())
        .with_context(|| format!("opening {}", file.display()))?;

    println!("File: {}", file.display());
    if let Some(stats) = reader.statistics() {
        println!("Messages: {}", stats.message_count);
        println!("Chunks:   {}", stats.chunk_count);
        if stats.message_count > 0 {
            let duration_ms =
                stats.message_end_time.saturating_sub(stats.message_start_time) / 1_000_000;
            println!("Duration: {duration_ms} ms");
        }
    } else {
        println!("Messages: unknown (no summary, metadata from scan)");
    }

    println!("Channels:");
    let mut channels: Vec<_> = reader.channels().into_iter().collect();
    channels.sort_by_key(|(id, _)| *id);
    for (id, channel) in channels {
        println!(
            "  [{id}] {} ({}, schema {})",
            channel.topic, channel.encoding, channel.schema_id
        );
    }
    Ok(())
}

fn topics(file: &PathBuf) -> Result<()> {
    let reader = BagReader::open(&file.display().to_string())
        .with_context(|| format!("opening {}", file.display()))?;
    let mut topics = reader.topics();
    topics.sort();
    for topic in topics {
        println!("{topic}");
    }
    Ok(())
}

fn loopback(config_path: &PathBuf, messages: u32, interval_ms: u64) -> Result<()> {
    let raw = std::fs::read_to_string(config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let config: BagConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing {}", config_path.display()))?;
    if config.recorder.topics.is_empty() {
        bail!("configuration has no topics");
    }

    let transport = Arc::new(MemoryTransport::new());

    // Phase 1: record synthetic traffic.
    let recorder = Recorder::new(config.clone(), transport.clone());
    recorder
        .start()
        .context("starting recorder")?;

    let mut publishers = Vec::new();
    for spec in &config.recorder.topics {
        let publisher = transport
            .create_publisher(&spec.name)
            .context("creating publisher")?;
        publishers.push(publisher);
    }

    let mut expected = 0u64;
    for round in 0..messages {
        for publisher in &publishers {
            let payload = format!("{}#{round}", publisher.topic_name());
            if publisher.publish(payload.as_bytes()) {
                expected += 1;
            }
        }
        std::thread::sleep(Duration::from_millis(interval_ms));
    }

    // Give the dispatcher time to flush into the buffer before stopping.
    std::thread::sleep(Duration::from_millis(100));
    recorder.stop();
    let recorded = recorder.total_messages();
    let bag_path = config.recorder.output_path.clone();
    println!("recorded {recorded}/{expected} messages");

    // Phase 2: replay the newest bag and count deliveries.
    let input = newest_bag(&bag_path, &config.recorder.output_format)?;
    println!("replaying {input}");

    let delivered = Arc::new(AtomicU64::new(0));
    let mut subscriptions = Vec::new();
    for spec in &config.recorder.topics {
        let counter = Arc::clone(&delivered);
        let subscription = transport
            .create_subscriber(&spec.name, Arc::new(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            }))
            .context("creating subscriber")?;
        subscriptions.push(subscription);
    }

    let mut player_config = config.player.clone();
    player_config.input_path = input;
    let player = Player::new(player_config, transport.clone());
    player.start().context("starting player")?;
    while player.state() != bagpipe::PlayerState::Stopped {
        std::thread::sleep(Duration::from_millis(20));
    }
    player.stop();
    std::thread::sleep(Duration::from_millis(100));

    let delivered = delivered.load(Ordering::Acquire);
    println!("delivered {delivered}/{recorded} messages");
    if delivered < recorded {
        bail!("loopback lost {} messages", recorded - delivered);
    }
    Ok(())
}

/// Newest bag file in the output directory.
fn newest_bag(output_dir: &str, extension: &str) -> Result<String> {
    let dir = if output_dir.is_empty() {
        "./bags"
    } else {
        output_dir
    };
    let mut candidates: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {dir}"))? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            let modified = entry.metadata()?.modified()?;
            candidates.push((modified, path));
        }
    }
    candidates.sort();
    let newest = candidates
        .pop()
        .map(|(_, path)| path.display().to_string())
        .with_context(|| format!("no .{extension} files in {dir}"))?;
    Ok(newest)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(error) = run() {
        eprintln!("Error: {error:#}");
        process::exit(1);
    }
}
