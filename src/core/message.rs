// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Core data model shared by the recorder and player.
//!
//! A [`Message`] is the immutable unit of capture: opaque payload bytes
//! plus the metadata needed to file it into a container. Payloads are
//! never parsed during capture; typed serialization lives entirely in
//! the transport adapter.

use chrono::Local;

/// Default message encoding for captured payloads.
pub const DEFAULT_ENCODING: &str = "protobuf";

/// An immutable captured record.
///
/// Created in a subscription callback, transferred by `Arc` through the
/// buffer, written once by the drain thread, then released.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Topic the payload arrived on
    pub topic: String,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
    /// Capture timestamp, microseconds since the Unix epoch,
    /// assigned at buffer push
    pub timestamp_us: i64,
    /// Arrival order within the recorder session, assigned at buffer push
    pub sequence: u64,
    /// Name of the type describing the payload
    pub schema_name: String,
    /// Payload encoding
    pub encoding: String,
}

impl Message {
    /// Create a message with the default encoding and an unset sequence.
    pub fn new(topic: impl Into<String>, payload: Vec<u8>, timestamp_us: i64) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp_us,
            sequence: 0,
            schema_name: String::new(),
            encoding: DEFAULT_ENCODING.to_string(),
        }
    }

    /// Capture timestamp widened to nanoseconds, as stored in the container.
    pub fn timestamp_ns(&self) -> u64 {
        (self.timestamp_us.max(0) as u64) * 1000
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Binding of a topic to its schema source, plus the container ids the
/// writer assigns during registration.
///
/// `schema_id` and `channel_id` are `None` until the topic has been
/// registered into an open file. After a rotation the writer reassigns
/// `schema_id` for the new file; `channel_id` is stable for the session.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicConfig {
    /// Topic name, unique key
    pub topic_name: String,
    /// Fully qualified message type (e.g. "sensors.msg.Imu")
    pub type_name: String,
    /// Schema source file, relative to a registry search path
    pub schema_file: String,
    /// Payload encoding
    pub encoding: String,
    /// Schema id in the current output file
    pub schema_id: Option<u16>,
    /// Channel id, stable across rotations
    pub channel_id: Option<u16>,
}

impl TopicConfig {
    /// Create an unregistered topic binding.
    pub fn new(
        topic_name: impl Into<String>,
        type_name: impl Into<String>,
        schema_file: impl Into<String>,
    ) -> Self {
        Self {
            topic_name: topic_name.into(),
            type_name: type_name.into(),
            schema_file: schema_file.into(),
            encoding: DEFAULT_ENCODING.to_string(),
            schema_id: None,
            channel_id: None,
        }
    }
}

/// Storage container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BagFormat {
    /// MCAP container
    #[default]
    Mcap,
}

impl BagFormat {
    /// Conventional file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            BagFormat::Mcap => "mcap",
        }
    }
}

impl std::fmt::Display for BagFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BagFormat::Mcap => write!(f, "MCAP"),
        }
    }
}

/// Bookkeeping for one output file generation.
///
/// `bytes_written` is a payload-based lower bound maintained by the
/// writer and consulted for rotation; container framing overhead is not
/// counted.
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    /// Resolved path of the open file (empty before open)
    pub path: String,
    /// Estimated bytes written so far
    pub bytes_written: u64,
    /// Whether the file is currently open
    pub is_open: bool,
    /// File basename prefix
    pub prefix: String,
    /// File extension, without the dot
    pub extension: String,
    /// Output directory (empty selects the default)
    pub output_dir: String,
    /// Container format
    pub format: BagFormat,
}

impl FileInfo {
    /// Start a fresh generation with the same naming parameters.
    pub fn next_generation(&self) -> Self {
        Self {
            path: String::new(),
            bytes_written: 0,
            is_open: false,
            prefix: self.prefix.clone(),
            extension: self.extension.clone(),
            output_dir: self.output_dir.clone(),
            format: self.format,
        }
    }
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn now_us() -> i64 {
    Local::now().timestamp_micros()
}

/// A unique-per-second file name: `<prefix>_YYYY_MM_DD-HH_MM_SS.<ext>`
/// using local time.
pub fn timestamped_filename(prefix: &str, extension: &str) -> String {
    let stamp = Local::now().format("%Y_%m_%d-%H_%M_%S");
    format!("{prefix}_{stamp}.{extension}")
}
