// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Core types: the captured-message data model and the error taxonomy.

pub mod error;
pub mod message;

pub use error::{BagError, Result};
pub use message::{
    now_us, timestamped_filename, BagFormat, FileInfo, Message, TopicConfig, DEFAULT_ENCODING,
};
