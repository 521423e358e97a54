// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Bag reading session: open, enumerate, stream.

use std::collections::HashMap;

use tracing::info;

use crate::container::{ContainerReader, MessageIter, Statistics};
use crate::core::{BagError, Result};

/// Channel metadata exposed to playback consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSummary {
    /// Topic the channel is bound to
    pub topic: String,
    /// Message payload encoding
    pub encoding: String,
    /// Schema id within the file
    pub schema_id: u16,
}

/// A read session over one bag file.
///
/// Metadata comes from the container summary, falling back to a full
/// scan when the summary is missing or corrupt. The message stream is
/// single-pass; call [`messages`](Self::messages) again to restart it.
pub struct BagReader {
    path: String,
    inner: Option<ContainerReader>,
}

impl BagReader {
    /// Open a bag file and load its metadata.
    pub fn open(path: &str) -> Result<Self> {
        let mut inner = ContainerReader::open(path)?;
        inner.read_summary(true)?;
        info!(
            path,
            channels = inner.channels().len(),
            chunks = inner.chunk_count(),
            "bag opened for reading"
        );
        Ok(Self {
            path: path.to_string(),
            inner: Some(inner),
        })
    }

    /// Topics present in the file.
    pub fn topics(&self) -> Vec<String> {
        self.inner
            .as_ref()
            .map(|reader| {
                reader
                    .channels()
                    .values()
                    .map(|channel| channel.topic.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Channel table keyed by channel id.
    pub fn channels(&self) -> HashMap<u16, ChannelSummary> {
        self.inner
            .as_ref()
            .map(|reader| {
                reader
                    .channels()
                    .iter()
                    .map(|(&id, channel)| {
                        (
                            id,
                            ChannelSummary {
                                topic: channel.topic.clone(),
                                encoding: channel.message_encoding.clone(),
                                schema_id: channel.schema_id,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// File statistics, when the summary carried them.
    pub fn statistics(&self) -> Option<&Statistics> {
        self.inner.as_ref().and_then(ContainerReader::statistics)
    }

    /// Start (or restart) the lazy log-time-ordered message stream.
    pub fn messages(&self) -> Result<MessageIter<'_>> {
        let inner = self
            .inner
            .as_ref()
            .ok_or_else(|| BagError::reader_open(&self.path, "reader is closed"))?;
        Ok(inner.messages())
    }

    /// Check whether the reader is open.
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Release the underlying file. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.inner = None;
    }
}
