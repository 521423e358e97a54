// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! # Bagpipe
//!
//! Topic recording and playback for pub/sub byte streams.
//!
//! A [`Recorder`] subscribes to a configured set of topics on a live
//! transport, captures every payload through a bounded back-pressured
//! buffer, and writes a self-describing MCAP bag: protobuf descriptor
//! closures are embedded so recordings decode without any external
//! context. A [`Player`] streams a bag back onto the transport,
//! reproducing the original inter-message timing scaled by a playback
//! rate.
//!
//! The transport itself is abstract: implement
//! [`transport::TransportFactory`] for your middleware, or use the
//! bundled [`transport::MemoryTransport`] loopback.
//!
//! ## Example: record and replay
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use bagpipe::config::BagConfig;
//! use bagpipe::transport::MemoryTransport;
//! use bagpipe::{Player, Recorder};
//!
//! let transport = Arc::new(MemoryTransport::new());
//! let config = BagConfig::default();
//!
//! let recorder = Recorder::new(config.clone(), transport.clone());
//! recorder.start()?;
//! // ... traffic flows ...
//! recorder.stop();
//!
//! let player = Player::new(config.player, transport);
//! player.start()?;
//! # Ok(())
//! # }
//! ```

// Core types: data model and errors
pub mod core;

pub use core::{BagError, FileInfo, Message, Result, TopicConfig};

// Configuration records
pub mod config;

// Bounded capture buffer
pub mod buffer;

pub use buffer::MessageBuffer;

// Schema parsing and descriptor registry
pub mod schema;

pub use schema::SchemaRegistry;

// MCAP container I/O
pub mod container;

// Writing side: storage with rotation
pub mod storage;

pub use storage::Storage;

// Reading side: bag read sessions
pub mod reader;

pub use reader::{BagReader, ChannelSummary};

// Session state machines
pub mod player;
pub mod recorder;

pub use player::{Player, PlayerState};
pub use recorder::{Recorder, RecorderState};

// Transport ports and the loopback adapter
pub mod transport;
