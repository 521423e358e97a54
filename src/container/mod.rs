// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Self-describing columnar container (MCAP format).
//!
//! The writer produces chunked, optionally compressed files with a
//! summary section; the reader restores metadata from the summary (or a
//! fallback scan) and streams messages in log-time order. Everything
//! above this module treats payloads as opaque bytes.

pub mod reader;
pub mod records;
pub mod writer;

pub use reader::{ContainerReader, MessageIter};
pub use records::{ChannelRecord, ChunkIndex, LogRecord, SchemaRecord, Statistics};
pub use writer::{ContainerOptions, ContainerWriter};
