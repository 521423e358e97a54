// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! MCAP container writer.
//!
//! Messages are buffered into chunks and compressed per the configured
//! options; schema and channel records go to the data section as they
//! are registered and are repeated in the summary section, together
//! with statistics and chunk indexes, so readers can restore the full
//! channel table without scanning the data section.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::debug;

use crate::config::CompressionType;
use crate::container::records::{
    metadata_len, string_len, ChannelRecord, ChunkIndex, LogRecord, SchemaRecord, COMPRESSION_LZ4,
    COMPRESSION_NONE, COMPRESSION_ZSTD, MAGIC, OP_CHANNEL, OP_CHUNK, OP_CHUNK_INDEX, OP_DATA_END,
    OP_FOOTER, OP_HEADER, OP_MESSAGE, OP_SCHEMA, OP_STATISTICS,
};
use crate::core::{BagError, Result};

/// Library identifier stored in the header record.
const LIBRARY: &str = concat!("bagpipe ", env!("CARGO_PKG_VERSION"));

/// Container writer options, passed through from the storage config.
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    /// Chunk compression algorithm
    pub compression: CompressionType,
    /// Compression level (zstd only)
    pub level: i32,
    /// Target uncompressed chunk size in bytes
    pub chunk_size: u64,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            compression: CompressionType::None,
            level: 0,
            chunk_size: 1024 * 1024,
        }
    }
}

/// Streaming writer for one container file.
pub struct ContainerWriter {
    out: BufWriter<File>,
    position: u64,
    options: ContainerOptions,

    // summary copies
    schemas: Vec<SchemaRecord>,
    channels: Vec<ChannelRecord>,
    chunk_indexes: Vec<ChunkIndex>,

    // chunk under construction
    chunk: Vec<u8>,
    chunk_message_start: u64,
    chunk_message_end: u64,

    // statistics
    message_count: u64,
    channel_message_counts: BTreeMap<u16, u64>,
    file_message_start: u64,
    file_message_end: u64,

    finished: bool,
}

impl ContainerWriter {
    /// Create the file and write the leading magic and header record.
    pub fn create<P: AsRef<Path>>(path: P, options: ContainerOptions) -> Result<Self> {
        let path_str = path.as_ref().display().to_string();
        let file = File::create(path.as_ref())
            .map_err(|e| BagError::open(&path_str, e.to_string()))?;

        let mut writer = Self {
            out: BufWriter::new(file),
            position: 0,
            options,
            schemas: Vec::new(),
            channels: Vec::new(),
            chunk_indexes: Vec::new(),
            chunk: Vec::new(),
            chunk_message_start: u64::MAX,
            chunk_message_end: 0,
            message_count: 0,
            channel_message_counts: BTreeMap::new(),
            file_message_start: u64::MAX,
            file_message_end: 0,
            finished: false,
        };
        writer.write_header()?;
        Ok(writer)
    }

    fn write_header(&mut self) -> Result<()> {
        self.write_bytes(&MAGIC)?;
        self.write_u8(OP_HEADER)?;
        // profile (empty) + library
        self.write_u64(string_len("") + string_len(LIBRARY))?;
        self.write_str("")?;
        self.write_str(LIBRARY)?;
        Ok(())
    }

    /// Register a schema. Ids are caller-assigned; the record is written
    /// to the data section immediately and repeated in the summary.
    pub fn add_schema(&mut self, schema: SchemaRecord) -> Result<()> {
        self.flush_chunk()?;
        self.write_schema_record(&schema)?;
        self.schemas.push(schema);
        Ok(())
    }

    /// Register a channel. Must reference a schema id registered into
    /// this file; channels precede the chunks that carry their messages.
    pub fn add_channel(&mut self, channel: ChannelRecord) -> Result<()> {
        self.flush_chunk()?;
        self.write_channel_record(&channel)?;
        self.channel_message_counts.entry(channel.id).or_insert(0);
        self.channels.push(channel);
        Ok(())
    }

    /// Append one message to the chunk under construction, flushing it
    /// as a compressed chunk record once it reaches the target size.
    pub fn write(&mut self, record: &LogRecord) -> Result<()> {
        self.chunk_message_start = self.chunk_message_start.min(record.log_time_ns);
        self.chunk_message_end = self.chunk_message_end.max(record.log_time_ns);
        self.file_message_start = self.file_message_start.min(record.log_time_ns);
        self.file_message_end = self.file_message_end.max(record.log_time_ns);

        let record_len = 2 + 4 + 8 + 8 + record.data.len() as u64;
        self.chunk.write_u8(OP_MESSAGE)?;
        self.chunk.write_u64::<LittleEndian>(record_len)?;
        self.chunk.write_u16::<LittleEndian>(record.channel_id)?;
        self.chunk.write_u32::<LittleEndian>(record.sequence)?;
        self.chunk.write_u64::<LittleEndian>(record.log_time_ns)?;
        self.chunk
            .write_u64::<LittleEndian>(record.publish_time_ns)?;
        self.chunk.extend_from_slice(&record.data);

        self.message_count += 1;
        *self
            .channel_message_counts
            .entry(record.channel_id)
            .or_insert(0) += 1;

        if self.chunk.len() as u64 >= self.options.chunk_size {
            self.flush_chunk()?;
        }
        Ok(())
    }

    /// Messages written so far.
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Chunks flushed so far.
    pub fn chunk_count(&self) -> usize {
        self.chunk_indexes.len()
    }

    fn flush_chunk(&mut self) -> Result<()> {
        if self.chunk.is_empty() {
            return Ok(());
        }

        let uncompressed_size = self.chunk.len() as u64;
        let (compression, payload) = match self.options.compression {
            CompressionType::None => (COMPRESSION_NONE, std::mem::take(&mut self.chunk)),
            CompressionType::Lz4 => {
                let compressed = lz4_flex::compress(&self.chunk);
                self.chunk.clear();
                (COMPRESSION_LZ4, compressed)
            }
            CompressionType::Zstd => {
                let compressed = zstd::bulk::compress(&self.chunk, self.options.level)
                    .map_err(|e| BagError::write("", format!("zstd compression failed: {e}")))?;
                self.chunk.clear();
                (COMPRESSION_ZSTD, compressed)
            }
        };

        let chunk_start_offset = self.position;
        let compressed_size = payload.len() as u64;

        self.write_u8(OP_CHUNK)?;
        // start + end + uncompressed_size + crc + compression + compressed_size + payload
        let record_len =
            8 + 8 + 8 + 4 + string_len(compression) + 8 + compressed_size;
        self.write_u64(record_len)?;
        self.write_u64(self.chunk_message_start)?;
        self.write_u64(self.chunk_message_end)?;
        self.write_u64(uncompressed_size)?;
        self.write_u32(0)?; // no CRC
        self.write_str(compression)?;
        self.write_u64(compressed_size)?;
        self.write_bytes(&payload)?;

        self.chunk_indexes.push(ChunkIndex {
            message_start_time: self.chunk_message_start,
            message_end_time: self.chunk_message_end,
            chunk_start_offset,
            chunk_length: self.position - chunk_start_offset,
            compression: compression.to_string(),
            compressed_size,
            uncompressed_size,
        });

        self.chunk_message_start = u64::MAX;
        self.chunk_message_end = 0;
        Ok(())
    }

    /// Flush the open chunk, write the summary section and footer, and
    /// close out the file. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.flush_chunk()?;

        self.write_u8(OP_DATA_END)?;
        self.write_u64(4)?;
        self.write_u32(0)?; // data section CRC, not computed

        let summary_start = self.position;

        let schemas = std::mem::take(&mut self.schemas);
        for schema in &schemas {
            self.write_schema_record(schema)?;
        }
        let channels = std::mem::take(&mut self.channels);
        for channel in &channels {
            self.write_channel_record(channel)?;
        }
        self.write_statistics(&schemas, &channels)?;
        let chunk_indexes = std::mem::take(&mut self.chunk_indexes);
        for index in &chunk_indexes {
            self.write_chunk_index(index)?;
        }
        self.schemas = schemas;
        self.channels = channels;
        self.chunk_indexes = chunk_indexes;

        self.write_u8(OP_FOOTER)?;
        self.write_u64(20)?;
        self.write_u64(summary_start)?;
        self.write_u64(0)?; // no summary-offset section
        self.write_u32(0)?; // no summary CRC
        self.write_bytes(&MAGIC)?;

        self.out.flush()?;
        self.finished = true;
        debug!(
            messages = self.message_count,
            chunks = self.chunk_indexes.len(),
            channels = self.channels.len(),
            "container finished"
        );
        Ok(())
    }

    fn write_schema_record(&mut self, schema: &SchemaRecord) -> Result<()> {
        self.write_u8(OP_SCHEMA)?;
        let record_len = 2
            + string_len(&schema.name)
            + string_len(&schema.encoding)
            + 4
            + schema.data.len() as u64;
        self.write_u64(record_len)?;
        self.write_u16(schema.id)?;
        self.write_str(&schema.name)?;
        self.write_str(&schema.encoding)?;
        self.write_u32(schema.data.len() as u32)?;
        self.write_bytes(&schema.data)?;
        Ok(())
    }

    fn write_channel_record(&mut self, channel: &ChannelRecord) -> Result<()> {
        self.write_u8(OP_CHANNEL)?;
        let record_len = 2
            + 2
            + string_len(&channel.topic)
            + string_len(&channel.message_encoding)
            + metadata_len(&channel.metadata);
        self.write_u64(record_len)?;
        self.write_u16(channel.id)?;
        self.write_u16(channel.schema_id)?;
        self.write_str(&channel.topic)?;
        self.write_str(&channel.message_encoding)?;

        let entries_len: u64 = channel
            .metadata
            .iter()
            .map(|(k, v)| string_len(k) + string_len(v))
            .sum();
        self.write_u32(entries_len as u32)?;
        for (key, value) in &channel.metadata {
            self.write_str(key)?;
            self.write_str(value)?;
        }
        Ok(())
    }

    fn write_statistics(
        &mut self,
        schemas: &[SchemaRecord],
        channels: &[ChannelRecord],
    ) -> Result<()> {
        self.write_u8(OP_STATISTICS)?;
        let map_len = self.channel_message_counts.len() as u64 * (2 + 8);
        let record_len = 8 + 2 + 4 + 4 + 4 + 4 + 8 + 8 + 4 + map_len;
        self.write_u64(record_len)?;
        self.write_u64(self.message_count)?;
        self.write_u16(schemas.len() as u16)?;
        self.write_u32(channels.len() as u32)?;
        self.write_u32(0)?; // attachments
        self.write_u32(0)?; // metadata records
        self.write_u32(self.chunk_indexes.len() as u32)?;
        let (start, end) = if self.message_count > 0 {
            (self.file_message_start, self.file_message_end)
        } else {
            (0, 0)
        };
        self.write_u64(start)?;
        self.write_u64(end)?;
        self.write_u32(map_len as u32)?;
        let counts: Vec<(u16, u64)> = self
            .channel_message_counts
            .iter()
            .map(|(&id, &count)| (id, count))
            .collect();
        for (channel_id, count) in counts {
            self.write_u16(channel_id)?;
            self.write_u64(count)?;
        }
        Ok(())
    }

    fn write_chunk_index(&mut self, index: &ChunkIndex) -> Result<()> {
        self.write_u8(OP_CHUNK_INDEX)?;
        // seven u64 fields + empty message-index map + compression string
        let record_len = 8 * 7 + 4 + string_len(&index.compression);
        self.write_u64(record_len)?;
        self.write_u64(index.message_start_time)?;
        self.write_u64(index.message_end_time)?;
        self.write_u64(index.chunk_start_offset)?;
        self.write_u64(index.chunk_length)?;
        self.write_u32(0)?; // message index offsets, none written
        self.write_u64(0)?; // message index length
        self.write_str(&index.compression)?;
        self.write_u64(index.compressed_size)?;
        self.write_u64(index.uncompressed_size)?;
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.out.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    fn write_str(&mut self, value: &str) -> Result<()> {
        self.write_u32(value.len() as u32)?;
        self.write_bytes(value.as_bytes())
    }
}
