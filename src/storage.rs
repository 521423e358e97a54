// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Storage: owns the active container file.
//!
//! Registers topics (schema + channel records) into the file, writes
//! captured messages, and rotates to a freshly named file when the size
//! threshold is crossed. One mutex serializes registration, writes and
//! rotation; `file_size` is a payload-based lower bound that undercounts
//! container framing and is used both as the rotation trigger and the
//! user-visible metric.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::config::StorageConfig;
use crate::container::{
    ChannelRecord, ContainerOptions, ContainerWriter, LogRecord, SchemaRecord,
};
use crate::core::{timestamped_filename, BagError, FileInfo, Message, Result, TopicConfig};
use crate::schema::SchemaRegistry;

/// Directory used when no output path is configured.
const DEFAULT_OUTPUT_DIR: &str = "./bags";

/// Estimated container framing per message record.
const RECORD_OVERHEAD: u64 = 30;

struct StorageState {
    writer: Option<ContainerWriter>,
    file_info: FileInfo,
    topics: HashMap<String, TopicConfig>,
    next_schema_id: u16,
    next_channel_id: u16,
}

/// Container-file owner for one recording session.
pub struct Storage {
    config: StorageConfig,
    registry: SchemaRegistry,
    state: Mutex<StorageState>,
}

impl Storage {
    /// Create a storage backend; the schema registry is seeded with the
    /// configured search paths.
    pub fn new(config: StorageConfig) -> Self {
        let registry = SchemaRegistry::new(&config.schema_search_paths);
        Self {
            config,
            registry,
            state: Mutex::new(StorageState {
                writer: None,
                file_info: FileInfo::default(),
                topics: HashMap::new(),
                next_schema_id: 1,
                next_channel_id: 0,
            }),
        }
    }

    /// Access the embedded schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    fn writer_options(&self) -> ContainerOptions {
        ContainerOptions {
            compression: self.config.compression_type,
            level: self.config.compression_level,
            chunk_size: self.config.chunk_size,
        }
    }

    /// Resolve the output path for a file generation per the naming
    /// scheme: a fixed `<prefix>.<ext>` under the default directory when
    /// no output path is set, otherwise a local-time stamped name with
    /// `_1`, `_2`, … suffixes on same-second collisions.
    fn resolve_path(file_info: &FileInfo) -> PathBuf {
        if file_info.output_dir.is_empty() {
            return Path::new(DEFAULT_OUTPUT_DIR)
                .join(format!("{}.{}", file_info.prefix, file_info.extension));
        }

        let dir = Path::new(&file_info.output_dir);
        let name = timestamped_filename(&file_info.prefix, &file_info.extension);
        let mut candidate = dir.join(&name);
        let stem = name
            .strip_suffix(&format!(".{}", file_info.extension))
            .unwrap_or(&name)
            .to_string();
        let mut attempt = 1;
        while candidate.exists() {
            candidate = dir.join(format!("{}_{}.{}", stem, attempt, file_info.extension));
            attempt += 1;
        }
        candidate
    }

    fn create_writer(&self, file_info: &mut FileInfo) -> Result<ContainerWriter> {
        let path = Self::resolve_path(file_info);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BagError::path(parent.display().to_string(), e.to_string()))?;
        }
        let writer = ContainerWriter::create(&path, self.writer_options())?;
        file_info.path = path.display().to_string();
        file_info.bytes_written = 0;
        file_info.is_open = true;
        Ok(writer)
    }

    /// Open a fresh output file. Fails with `AlreadyOpen` when a file is
    /// active; topic registrations and id counters start over.
    pub fn open(&self, mut file_info: FileInfo) -> Result<()> {
        let mut state = self.lock()?;
        if state.file_info.is_open {
            return Err(BagError::AlreadyOpen {
                path: state.file_info.path.clone(),
            });
        }

        let writer = self.create_writer(&mut file_info)?;
        info!(path = %file_info.path, "bag file opened");

        state.writer = Some(writer);
        state.file_info = file_info;
        state.topics.clear();
        state.next_schema_id = 1;
        state.next_channel_id = 0;
        Ok(())
    }

    /// Register a topic into the open file: resolve its descriptor set,
    /// allocate ids, and emit the schema and channel records. The topic
    /// must be registered before its first message is written.
    pub fn register_topic(&self, topic: &mut TopicConfig) -> Result<()> {
        // Schema work happens outside the file lock; the registry has
        // its own.
        if !self.registry.import(&topic.schema_file) {
            let error = self
                .registry
                .errors()
                .last()
                .map(|e| e.to_error())
                .unwrap_or_else(|| BagError::import(&topic.schema_file, 0, 0, "import failed"));
            return Err(error);
        }
        let descriptor = self.registry.descriptor_set(&topic.type_name)?;

        let mut state = self.lock()?;
        register_into_file(&mut state, topic, descriptor)?;
        info!(
            topic = %topic.topic_name,
            type_name = %topic.type_name,
            channel_id = ?topic.channel_id,
            "topic registered"
        );
        Ok(())
    }

    /// Write one message, then rotate if the size threshold was crossed.
    pub fn write(&self, message: &Message) -> Result<()> {
        let mut state = self.lock()?;
        write_into_file(&mut state, message)?;
        self.maybe_rotate(&mut state)
    }

    /// Write a batch. Individual failures are logged and skipped; the
    /// result is an aggregate error unless every message succeeded.
    /// Rotation failures abort immediately and are fatal to the session.
    pub fn write_batch(&self, messages: &[std::sync::Arc<Message>]) -> Result<()> {
        let mut state = self.lock()?;
        let mut failed = 0usize;
        for message in messages {
            if let Err(error) = write_into_file(&mut state, message) {
                warn!(topic = %message.topic, error = %error, "message dropped");
                failed += 1;
                continue;
            }
            self.maybe_rotate(&mut state)?;
        }
        if failed > 0 {
            return Err(BagError::write(
                "",
                format!("{failed}/{} messages failed", messages.len()),
            ));
        }
        Ok(())
    }

    fn maybe_rotate(&self, state: &mut StorageState) -> Result<()> {
        if !self.config.split_by_size
            || state.file_info.bytes_written < self.config.max_file_size
        {
            return Ok(());
        }

        info!(
            path = %state.file_info.path,
            bytes = state.file_info.bytes_written,
            limit = self.config.max_file_size,
            "size threshold crossed, rotating"
        );

        if let Some(writer) = state.writer.as_mut() {
            writer
                .finish()
                .map_err(|e| BagError::rotation(e.to_string()))?;
        }
        state.writer = None;
        state.file_info.is_open = false;

        let mut next_info = state.file_info.next_generation();
        let writer = self
            .create_writer(&mut next_info)
            .map_err(|e| BagError::rotation(e.to_string()))?;
        state.writer = Some(writer);
        state.file_info = next_info;

        // Every topic is re-registered into the new file; channel ids
        // are preserved, schema ids restart at 1.
        state.next_schema_id = 1;
        let mut topics: Vec<TopicConfig> = state.topics.values().cloned().collect();
        topics.sort_by_key(|t| t.channel_id);
        for topic in &mut topics {
            let descriptor = self
                .registry
                .descriptor_set(&topic.type_name)
                .map_err(|e| BagError::rotation(e.to_string()))?;
            register_into_file(state, topic, descriptor)
                .map_err(|e| BagError::rotation(e.to_string()))?;
        }
        Ok(())
    }

    /// Finish and release the active file. Safe to call repeatedly.
    pub fn close(&self) {
        let mut state = match self.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if !state.file_info.is_open {
            return;
        }
        if let Some(writer) = state.writer.as_mut() {
            if let Err(error) = writer.finish() {
                error!(path = %state.file_info.path, error = %error, "failed to finalize bag file");
            }
        }
        state.writer = None;
        state.file_info.is_open = false;
        state.file_info.bytes_written = 0;
        info!(path = %state.file_info.path, "bag file closed");
    }

    /// Estimated size of the current file.
    pub fn file_size(&self) -> u64 {
        self.lock()
            .map(|state| state.file_info.bytes_written)
            .unwrap_or(0)
    }

    /// Path of the current file, if one is open.
    pub fn current_path(&self) -> Option<String> {
        self.lock().ok().and_then(|state| {
            state
                .file_info
                .is_open
                .then(|| state.file_info.path.clone())
        })
    }

    /// Check whether a file is open.
    pub fn is_open(&self) -> bool {
        self.lock().map(|state| state.file_info.is_open).unwrap_or(false)
    }

    /// Registered topic names.
    pub fn topics(&self) -> Vec<String> {
        self.lock()
            .map(|state| state.topics.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StorageState>> {
        self.state
            .lock()
            .map_err(|_| BagError::write("", "storage lock poisoned"))
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.close();
    }
}

fn register_into_file(
    state: &mut StorageState,
    topic: &mut TopicConfig,
    descriptor: Vec<u8>,
) -> Result<()> {
    let writer = state
        .writer
        .as_mut()
        .ok_or_else(|| BagError::write(&topic.topic_name, "storage is not open"))?;

    let schema_id = state.next_schema_id;
    state.next_schema_id += 1;
    let channel_id = match topic.channel_id {
        Some(id) => id,
        None => {
            let id = state.next_channel_id;
            state.next_channel_id += 1;
            id
        }
    };

    writer.add_schema(SchemaRecord {
        id: schema_id,
        name: topic.type_name.clone(),
        encoding: topic.encoding.clone(),
        data: descriptor,
    })?;

    let mut metadata = std::collections::BTreeMap::new();
    metadata.insert("message_type".to_string(), topic.type_name.clone());
    writer.add_channel(ChannelRecord {
        id: channel_id,
        schema_id,
        topic: topic.topic_name.clone(),
        message_encoding: topic.encoding.clone(),
        metadata,
    })?;

    topic.schema_id = Some(schema_id);
    topic.channel_id = Some(channel_id);
    state.topics.insert(topic.topic_name.clone(), topic.clone());
    Ok(())
}

fn write_into_file(state: &mut StorageState, message: &Message) -> Result<()> {
    if !state.file_info.is_open {
        return Err(BagError::write(&message.topic, "storage is not open"));
    }
    let channel_id = state
        .topics
        .get(&message.topic)
        .and_then(|t| t.channel_id)
        .ok_or_else(|| BagError::write(&message.topic, "topic is not registered"))?;

    let writer = state
        .writer
        .as_mut()
        .ok_or_else(|| BagError::write(&message.topic, "storage is not open"))?;

    let timestamp_ns = message.timestamp_ns();
    writer.write(&LogRecord {
        channel_id,
        sequence: message.sequence as u32,
        log_time_ns: timestamp_ns,
        publish_time_ns: timestamp_ns,
        data: message.payload.clone(),
    })?;

    state.file_info.bytes_written += message.payload.len() as u64 + RECORD_OVERHEAD;
    Ok(())
}
