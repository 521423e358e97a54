// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Record-level definitions for the MCAP container format.
//!
//! Opcodes and the magic sequence follow the
//! [MCAP specification](https://mcap.dev/spec); keeping them in one
//! place prevents writer/reader opcode drift.

use std::collections::BTreeMap;

/// File magic, present at both ends of the file.
pub const MAGIC: [u8; 8] = [0x89, 0x4D, 0x43, 0x41, 0x50, 0x30, 0x0D, 0x0A];

/// Header record, first record after the magic.
pub const OP_HEADER: u8 = 0x01;
/// Footer record, carries the summary offset.
pub const OP_FOOTER: u8 = 0x02;
/// Schema record.
pub const OP_SCHEMA: u8 = 0x03;
/// Channel record.
pub const OP_CHANNEL: u8 = 0x04;
/// Message record, only ever inside chunks in files we produce.
pub const OP_MESSAGE: u8 = 0x05;
/// Chunk record wrapping compressed message records.
pub const OP_CHUNK: u8 = 0x06;
/// Chunk index record in the summary section.
pub const OP_CHUNK_INDEX: u8 = 0x08;
/// Statistics record in the summary section.
pub const OP_STATISTICS: u8 = 0x0B;
/// Data-end record separating data and summary sections.
pub const OP_DATA_END: u8 = 0x0F;

/// Compression identifier strings stored in chunk records.
pub const COMPRESSION_NONE: &str = "";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";

/// A schema definition as stored in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRecord {
    /// Schema id, 1-based (0 means "no schema" in the format)
    pub id: u16,
    /// Fully qualified type name
    pub name: String,
    /// Schema encoding (e.g. "protobuf")
    pub encoding: String,
    /// Serialized descriptor blob
    pub data: Vec<u8>,
}

/// A topic-to-schema binding as stored in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    /// Channel id
    pub id: u16,
    /// Referenced schema id
    pub schema_id: u16,
    /// Topic name
    pub topic: String,
    /// Message payload encoding
    pub message_encoding: String,
    /// Free-form metadata
    pub metadata: BTreeMap<String, String>,
}

/// One stored message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogRecord {
    /// Channel the message belongs to
    pub channel_id: u16,
    /// Arrival sequence from the recording session
    pub sequence: u32,
    /// Capture time, nanoseconds
    pub log_time_ns: u64,
    /// Publish time, nanoseconds
    pub publish_time_ns: u64,
    /// Payload bytes
    pub data: Vec<u8>,
}

/// Location and time bounds of one chunk, kept in the summary so
/// readers can order and lazily decompress chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkIndex {
    /// Earliest message log time in the chunk
    pub message_start_time: u64,
    /// Latest message log time in the chunk
    pub message_end_time: u64,
    /// Offset of the chunk record from file start
    pub chunk_start_offset: u64,
    /// Total chunk record length
    pub chunk_length: u64,
    /// Compression identifier ("", "lz4", "zstd")
    pub compression: String,
    /// Compressed payload size
    pub compressed_size: u64,
    /// Uncompressed payload size
    pub uncompressed_size: u64,
}

/// File-level statistics from the summary section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    /// Total messages in the file
    pub message_count: u64,
    /// Number of schemas
    pub schema_count: u16,
    /// Number of channels
    pub channel_count: u32,
    /// Number of chunks
    pub chunk_count: u32,
    /// Earliest message log time
    pub message_start_time: u64,
    /// Latest message log time
    pub message_end_time: u64,
    /// Per-channel message counts
    pub channel_message_counts: BTreeMap<u16, u64>,
}

/// Bounds-checked little-endian cursor over a byte slice.
pub struct RecordCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// Failure while decoding a record region.
#[derive(Debug, Clone)]
pub struct CursorError {
    /// Offset at which the read failed
    pub pos: usize,
    /// Bytes requested
    pub wanted: usize,
}

impl std::fmt::Display for CursorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "truncated record: {} bytes at offset {}", self.wanted, self.pos)
    }
}

pub type CursorResult<T> = std::result::Result<T, CursorError>;

impl<'a> RecordCursor<'a> {
    /// Wrap a slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, len: usize) -> CursorResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(CursorError {
                pos: self.pos,
                wanted: len,
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> CursorResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> CursorResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> CursorResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> CursorResult<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a u32-length-prefixed byte region.
    pub fn read_bytes(&mut self) -> CursorResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Read a u32-length-prefixed UTF-8 string (lossy).
    pub fn read_string(&mut self) -> CursorResult<String> {
        Ok(String::from_utf8_lossy(self.read_bytes()?).into_owned())
    }

    /// Read `len` raw bytes.
    pub fn read_raw(&mut self, len: usize) -> CursorResult<&'a [u8]> {
        self.take(len)
    }
}

/// Serialized length of a length-prefixed string.
pub fn string_len(s: &str) -> u64 {
    4 + s.len() as u64
}

/// Serialized length of a string-to-string map, including its own
/// byte-length prefix.
pub fn metadata_len(metadata: &BTreeMap<String, String>) -> u64 {
    4 + metadata
        .iter()
        .map(|(k, v)| string_len(k) + string_len(v))
        .sum::<u64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_reads_in_order() {
        let mut buf = Vec::new();
        buf.push(0x05u8);
        buf.extend_from_slice(&7u16.to_le_bytes());
        buf.extend_from_slice(&42u32.to_le_bytes());
        buf.extend_from_slice(&1_000_000u64.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(b"abc");

        let mut cursor = RecordCursor::new(&buf);
        assert_eq!(cursor.read_u8().unwrap(), 0x05);
        assert_eq!(cursor.read_u16().unwrap(), 7);
        assert_eq!(cursor.read_u32().unwrap(), 42);
        assert_eq!(cursor.read_u64().unwrap(), 1_000_000);
        assert_eq!(cursor.read_string().unwrap(), "abc");
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_cursor_rejects_truncated_reads() {
        let buf = [0u8; 3];
        let mut cursor = RecordCursor::new(&buf);
        assert!(cursor.read_u64().is_err());

        let err = RecordCursor::new(&buf).read_u32().unwrap_err();
        assert_eq!(err.wanted, 4);
    }

    #[test]
    fn test_metadata_len_accounts_for_prefixes() {
        let mut metadata = BTreeMap::new();
        metadata.insert("k".to_string(), "val".to_string());
        // 4 (map len) + 4 + 1 + 4 + 3
        assert_eq!(metadata_len(&metadata), 16);
        assert_eq!(metadata_len(&BTreeMap::new()), 4);
    }
}
