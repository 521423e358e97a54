// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! MCAP container reader.
//!
//! The file is memory-mapped; metadata comes from the summary section
//! via the footer, with a full data-section scan as fallback when the
//! summary is missing or damaged. Message iteration decompresses chunks
//! lazily and merges them by log time, so the stream is log-time
//! ascending even when chunk time ranges overlap. Ties keep chunk
//! order, which is unspecified to consumers.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::{debug, warn};

use crate::container::records::{
    ChannelRecord, ChunkIndex, LogRecord, RecordCursor, SchemaRecord, Statistics, MAGIC,
    OP_CHANNEL, OP_CHUNK, OP_CHUNK_INDEX, OP_DATA_END, OP_FOOTER, OP_MESSAGE, OP_SCHEMA,
    OP_STATISTICS,
};
use crate::core::{BagError, Result};

/// Opcode + u64 length prefix on every record.
const RECORD_PREFIX: usize = 9;

/// Footer body: summary_start + summary_offset_start + crc.
const FOOTER_BODY: usize = 20;

/// Read-only view over one container file.
pub struct ContainerReader {
    path: String,
    mmap: Mmap,
    schemas: HashMap<u16, SchemaRecord>,
    channels: HashMap<u16, ChannelRecord>,
    chunk_indexes: Vec<ChunkIndex>,
    statistics: Option<Statistics>,
}

impl ContainerReader {
    /// Open and memory-map a container file, verifying both magics.
    /// Call [`read_summary`](Self::read_summary) before using metadata.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().display().to_string();
        let file =
            File::open(path.as_ref()).map_err(|e| BagError::reader_open(&path_str, e.to_string()))?;
        // Safety: the mapping is read-only and the file is not expected
        // to be truncated while a reader holds it.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| BagError::reader_open(&path_str, e.to_string()))?;

        if mmap.len() < MAGIC.len() * 2 + RECORD_PREFIX
            || mmap[..MAGIC.len()] != MAGIC
            || mmap[mmap.len() - MAGIC.len()..] != MAGIC
        {
            return Err(BagError::reader_open(&path_str, "not a container file"));
        }

        Ok(Self {
            path: path_str,
            mmap,
            schemas: HashMap::new(),
            channels: HashMap::new(),
            chunk_indexes: Vec::new(),
            statistics: None,
        })
    }

    /// Load channels, schemas, chunk locations and statistics.
    ///
    /// Reads the summary section referenced by the footer; when it is
    /// absent or unreadable and `allow_fallback_scan` is set, the data
    /// section is scanned instead (statistics stay unavailable in that
    /// case).
    pub fn read_summary(&mut self, allow_fallback_scan: bool) -> Result<()> {
        match self.try_read_summary() {
            Ok(()) => Ok(()),
            Err(error) if allow_fallback_scan => {
                warn!(
                    path = %self.path,
                    reason = %error,
                    "summary unreadable, scanning data section"
                );
                self.scan_data_section()
            }
            Err(error) => Err(error),
        }
    }

    fn try_read_summary(&mut self) -> Result<()> {
        if self.mmap.len() < MAGIC.len() * 2 + RECORD_PREFIX + FOOTER_BODY {
            return Err(BagError::decode("footer", "file too short for a footer"));
        }
        let footer_offset = self.mmap.len() - MAGIC.len() - FOOTER_BODY - RECORD_PREFIX;
        let mut cursor = RecordCursor::new(&self.mmap[footer_offset..self.mmap.len() - MAGIC.len()]);

        let opcode = cursor.read_u8().map_err(|e| self.decode_err("footer", e))?;
        let length = cursor.read_u64().map_err(|e| self.decode_err("footer", e))?;
        if opcode != OP_FOOTER || length != FOOTER_BODY as u64 {
            return Err(BagError::decode("footer", "footer record not found"));
        }
        let summary_start = cursor
            .read_u64()
            .map_err(|e| self.decode_err("footer", e))? as usize;
        if summary_start == 0 {
            return Err(BagError::decode("footer", "file has no summary section"));
        }
        if summary_start >= footer_offset {
            return Err(BagError::decode("footer", "summary offset out of range"));
        }

        self.parse_records(summary_start, footer_offset, true)?;
        debug!(
            path = %self.path,
            channels = self.channels.len(),
            chunks = self.chunk_indexes.len(),
            "summary loaded"
        );
        Ok(())
    }

    /// Sequential walk over the data section, rebuilding metadata that
    /// the summary would normally provide.
    fn scan_data_section(&mut self) -> Result<()> {
        self.schemas.clear();
        self.channels.clear();
        self.chunk_indexes.clear();
        self.statistics = None;
        let end = self.mmap.len() - MAGIC.len();
        self.parse_records(MAGIC.len(), end, false)
    }

    /// Walk top-level records in `[start, end)`.
    ///
    /// In summary mode chunk indexes come from chunk-index records; in
    /// scan mode they are reconstructed from the chunk records
    /// themselves.
    fn parse_records(&mut self, start: usize, end: usize, summary_mode: bool) -> Result<()> {
        let mut pos = start;
        while pos + RECORD_PREFIX <= end {
            let opcode = self.mmap[pos];
            let mut prefix = RecordCursor::new(&self.mmap[pos + 1..pos + RECORD_PREFIX]);
            let length = prefix
                .read_u64()
                .map_err(|e| self.decode_err("record prefix", e))? as usize;
            let body_start = pos + RECORD_PREFIX;
            let body_end = body_start + length;
            if body_end > end {
                return Err(BagError::decode(
                    format!("record at {pos}"),
                    "record exceeds file bounds",
                ));
            }
            let body = &self.mmap[body_start..body_end];

            match opcode {
                OP_SCHEMA => {
                    let schema = parse_schema(body).map_err(|e| self.decode_err("schema", e))?;
                    self.schemas.insert(schema.id, schema);
                }
                OP_CHANNEL => {
                    let channel =
                        parse_channel(body).map_err(|e| self.decode_err("channel", e))?;
                    self.channels.insert(channel.id, channel);
                }
                OP_STATISTICS if summary_mode => {
                    self.statistics = Some(
                        parse_statistics(body).map_err(|e| self.decode_err("statistics", e))?,
                    );
                }
                OP_CHUNK_INDEX if summary_mode => {
                    let index = parse_chunk_index(body)
                        .map_err(|e| self.decode_err("chunk index", e))?;
                    self.chunk_indexes.push(index);
                }
                OP_CHUNK if !summary_mode => {
                    let index = parse_chunk_header(body, pos as u64, length as u64)
                        .map_err(|e| self.decode_err("chunk", e))?;
                    self.chunk_indexes.push(index);
                }
                OP_DATA_END if !summary_mode => break,
                OP_FOOTER => break,
                _ => {}
            }
            pos = body_end;
        }
        Ok(())
    }

    fn decode_err(
        &self,
        context: &str,
        error: crate::container::records::CursorError,
    ) -> BagError {
        BagError::decode(context, error.to_string())
    }

    /// File path this reader was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Channel table, by channel id.
    pub fn channels(&self) -> &HashMap<u16, ChannelRecord> {
        &self.channels
    }

    /// Schema table, by schema id.
    pub fn schemas(&self) -> &HashMap<u16, SchemaRecord> {
        &self.schemas
    }

    /// File statistics, when the summary provided them.
    pub fn statistics(&self) -> Option<&Statistics> {
        self.statistics.as_ref()
    }

    /// Number of chunks known.
    pub fn chunk_count(&self) -> usize {
        self.chunk_indexes.len()
    }

    /// Lazy iterator over stored messages in log-time ascending order.
    ///
    /// Single-pass and not thread-safe; call again after exhaustion to
    /// restart from the beginning.
    pub fn messages(&self) -> MessageIter<'_> {
        let mut order: Vec<usize> = (0..self.chunk_indexes.len()).collect();
        order.sort_by_key(|&i| self.chunk_indexes[i].message_start_time);
        MessageIter {
            reader: self,
            order,
            next_pending: 0,
            cursors: Vec::new(),
            heap: BinaryHeap::new(),
            failed: false,
        }
    }

    /// Decompress one chunk's record region.
    fn chunk_payload(&self, index: &ChunkIndex) -> Result<Vec<u8>> {
        let body_start = index.chunk_start_offset as usize + RECORD_PREFIX;
        let body_end = index.chunk_start_offset as usize + index.chunk_length as usize;
        if body_end > self.mmap.len() || body_start > body_end {
            return Err(BagError::decode("chunk", "chunk bounds exceed file"));
        }
        let mut cursor = RecordCursor::new(&self.mmap[body_start..body_end]);
        // start + end + uncompressed size + crc
        cursor.read_u64().map_err(|e| self.decode_err("chunk", e))?;
        cursor.read_u64().map_err(|e| self.decode_err("chunk", e))?;
        let uncompressed_size =
            cursor.read_u64().map_err(|e| self.decode_err("chunk", e))? as usize;
        cursor.read_u32().map_err(|e| self.decode_err("chunk", e))?;
        let compression = cursor
            .read_string()
            .map_err(|e| self.decode_err("chunk", e))?;
        let compressed_size =
            cursor.read_u64().map_err(|e| self.decode_err("chunk", e))? as usize;
        let payload = cursor
            .read_raw(compressed_size)
            .map_err(|e| self.decode_err("chunk", e))?;

        match compression.as_str() {
            "" | "none" => Ok(payload.to_vec()),
            "lz4" => lz4_flex::decompress(payload, uncompressed_size)
                .map_err(|e| BagError::decode("chunk", format!("lz4 decompression failed: {e}"))),
            "zstd" => zstd::bulk::decompress(payload, uncompressed_size)
                .map_err(|e| BagError::decode("chunk", format!("zstd decompression failed: {e}"))),
            other => Err(BagError::decode(
                "chunk",
                format!("unsupported compression '{other}'"),
            )),
        }
    }
}

struct ChunkCursor {
    records: Vec<LogRecord>,
}

/// Iterator that lazily merges chunks by log time.
pub struct MessageIter<'a> {
    reader: &'a ContainerReader,
    /// Chunk positions sorted by start time
    order: Vec<usize>,
    /// Next chunk in `order` not yet decompressed
    next_pending: usize,
    cursors: Vec<ChunkCursor>,
    /// Min-heap of (log_time, cursor, record index)
    heap: BinaryHeap<Reverse<(u64, usize, usize)>>,
    failed: bool,
}

impl<'a> MessageIter<'a> {
    fn activate_next(&mut self) -> Result<()> {
        let chunk = &self.reader.chunk_indexes[self.order[self.next_pending]];
        self.next_pending += 1;

        let payload = self.reader.chunk_payload(chunk)?;
        let records = parse_chunk_messages(&payload)?;
        if let Some(first) = records.first() {
            self.heap
                .push(Reverse((first.log_time_ns, self.cursors.len(), 0)));
        }
        self.cursors.push(ChunkCursor { records });
        Ok(())
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        // Admit every chunk whose time range could precede the current
        // head before emitting anything.
        while self.next_pending < self.order.len() {
            let upcoming =
                self.reader.chunk_indexes[self.order[self.next_pending]].message_start_time;
            match self.heap.peek() {
                Some(Reverse((head, _, _))) if upcoming > *head => break,
                _ => {
                    if let Err(error) = self.activate_next() {
                        self.failed = true;
                        return Some(Err(error));
                    }
                }
            }
        }

        let Reverse((_, cursor_idx, record_idx)) = self.heap.pop()?;
        let cursor = &mut self.cursors[cursor_idx];
        let record = std::mem::take(&mut cursor.records[record_idx]);
        if record_idx + 1 < cursor.records.len() {
            let next_time = cursor.records[record_idx + 1].log_time_ns;
            self.heap
                .push(Reverse((next_time, cursor_idx, record_idx + 1)));
        }
        Some(Ok(record))
    }
}

fn parse_schema(body: &[u8]) -> std::result::Result<SchemaRecord, super::records::CursorError> {
    let mut cursor = RecordCursor::new(body);
    let id = cursor.read_u16()?;
    let name = cursor.read_string()?;
    let encoding = cursor.read_string()?;
    let data = cursor.read_bytes()?.to_vec();
    Ok(SchemaRecord {
        id,
        name,
        encoding,
        data,
    })
}

fn parse_channel(body: &[u8]) -> std::result::Result<ChannelRecord, super::records::CursorError> {
    let mut cursor = RecordCursor::new(body);
    let id = cursor.read_u16()?;
    let schema_id = cursor.read_u16()?;
    let topic = cursor.read_string()?;
    let message_encoding = cursor.read_string()?;

    let mut metadata = std::collections::BTreeMap::new();
    let entries_len = cursor.read_u32()? as usize;
    let entries_end = cursor.position() + entries_len;
    while cursor.position() < entries_end {
        let key = cursor.read_string()?;
        let value = cursor.read_string()?;
        metadata.insert(key, value);
    }

    Ok(ChannelRecord {
        id,
        schema_id,
        topic,
        message_encoding,
        metadata,
    })
}

fn parse_statistics(body: &[u8]) -> std::result::Result<Statistics, super::records::CursorError> {
    let mut cursor = RecordCursor::new(body);
    let message_count = cursor.read_u64()?;
    let schema_count = cursor.read_u16()?;
    let channel_count = cursor.read_u32()?;
    cursor.read_u32()?; // attachments
    cursor.read_u32()?; // metadata records
    let chunk_count = cursor.read_u32()?;
    let message_start_time = cursor.read_u64()?;
    let message_end_time = cursor.read_u64()?;

    let mut channel_message_counts = std::collections::BTreeMap::new();
    let map_len = cursor.read_u32()? as usize;
    let map_end = cursor.position() + map_len;
    while cursor.position() < map_end {
        let channel_id = cursor.read_u16()?;
        let count = cursor.read_u64()?;
        channel_message_counts.insert(channel_id, count);
    }

    Ok(Statistics {
        message_count,
        schema_count,
        channel_count,
        chunk_count,
        message_start_time,
        message_end_time,
        channel_message_counts,
    })
}

fn parse_chunk_index(
    body: &[u8],
) -> std::result::Result<ChunkIndex, super::records::CursorError> {
    let mut cursor = RecordCursor::new(body);
    let message_start_time = cursor.read_u64()?;
    let message_end_time = cursor.read_u64()?;
    let chunk_start_offset = cursor.read_u64()?;
    let chunk_length = cursor.read_u64()?;
    let offsets_len = cursor.read_u32()? as usize;
    cursor.read_raw(offsets_len)?;
    cursor.read_u64()?; // message index length
    let compression = cursor.read_string()?;
    let compressed_size = cursor.read_u64()?;
    let uncompressed_size = cursor.read_u64()?;
    Ok(ChunkIndex {
        message_start_time,
        message_end_time,
        chunk_start_offset,
        chunk_length,
        compression,
        compressed_size,
        uncompressed_size,
    })
}

/// Rebuild a chunk index entry from the chunk record itself (fallback
/// scan path). `offset` is the chunk record's position in the file.
fn parse_chunk_header(
    body: &[u8],
    offset: u64,
    body_len: u64,
) -> std::result::Result<ChunkIndex, super::records::CursorError> {
    let mut cursor = RecordCursor::new(body);
    let message_start_time = cursor.read_u64()?;
    let message_end_time = cursor.read_u64()?;
    let uncompressed_size = cursor.read_u64()?;
    cursor.read_u32()?; // crc
    let compression = cursor.read_string()?;
    let compressed_size = cursor.read_u64()?;
    Ok(ChunkIndex {
        message_start_time,
        message_end_time,
        chunk_start_offset: offset,
        chunk_length: RECORD_PREFIX as u64 + body_len,
        compression,
        compressed_size,
        uncompressed_size,
    })
}

/// Decode every message record inside a decompressed chunk region.
fn parse_chunk_messages(payload: &[u8]) -> Result<Vec<LogRecord>> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos + RECORD_PREFIX <= payload.len() {
        let opcode = payload[pos];
        let mut prefix = RecordCursor::new(&payload[pos + 1..pos + RECORD_PREFIX]);
        let length = prefix
            .read_u64()
            .map_err(|e| BagError::decode("chunk record", e.to_string()))?
            as usize;
        let body_start = pos + RECORD_PREFIX;
        let body_end = body_start + length;
        if body_end > payload.len() {
            return Err(BagError::decode(
                "chunk record",
                "record exceeds chunk bounds",
            ));
        }
        if opcode == OP_MESSAGE {
            let mut cursor = RecordCursor::new(&payload[body_start..body_end]);
            let channel_id = cursor
                .read_u16()
                .map_err(|e| BagError::decode("message", e.to_string()))?;
            let sequence = cursor
                .read_u32()
                .map_err(|e| BagError::decode("message", e.to_string()))?;
            let log_time_ns = cursor
                .read_u64()
                .map_err(|e| BagError::decode("message", e.to_string()))?;
            let publish_time_ns = cursor
                .read_u64()
                .map_err(|e| BagError::decode("message", e.to_string()))?;
            let data = cursor
                .read_raw(cursor.remaining())
                .map_err(|e| BagError::decode("message", e.to_string()))?
                .to_vec();
            records.push(LogRecord {
                channel_id,
                sequence,
                log_time_ns,
                publish_time_ns,
                data,
            });
        }
        pos = body_end;
    }
    Ok(records)
}
