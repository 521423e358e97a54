// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Configuration records for the recorder and player.
//!
//! These are plain data carriers: the engine never reads configuration
//! files itself. The serde derives exist so front ends (the bundled CLI
//! loads YAML) can fill them in; defaults match a sensible unattended
//! recording setup.

use serde::{Deserialize, Serialize};

use crate::core::TopicConfig;

/// Chunk compression applied by the container writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// Store chunks uncompressed
    #[default]
    None,
    /// LZ4 block compression
    Lz4,
    /// Zstandard compression
    Zstd,
}

/// One topic to record: name, payload type, and the schema source that
/// defines the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSpec {
    /// Topic name on the transport
    pub name: String,
    /// Fully qualified message type
    #[serde(rename = "type")]
    pub type_name: String,
    /// Schema source file, relative to a search path
    pub schema_file: String,
}

impl TopicSpec {
    /// Expand into the mutable registration record the writer works on.
    pub fn to_topic_config(&self) -> TopicConfig {
        TopicConfig::new(&self.name, &self.type_name, &self.schema_file)
    }
}

/// Recorder output and subscription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Target directory; empty selects `./bags/<prefix>.<ext>`
    #[serde(default)]
    pub output_path: String,
    /// File basename prefix
    #[serde(default = "default_prefix")]
    pub filename_prefix: String,
    /// File extension
    #[serde(default = "default_format")]
    pub output_format: String,
    /// Topics to subscribe and record
    #[serde(default)]
    pub topics: Vec<TopicSpec>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_path: String::new(),
            filename_prefix: default_prefix(),
            output_format: default_format(),
            topics: Vec::new(),
        }
    }
}

/// Container and drain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Chunk compression algorithm
    #[serde(default)]
    pub compression_type: CompressionType,
    /// Compression level, meaning depends on the algorithm
    #[serde(default)]
    pub compression_level: i32,
    /// Target uncompressed chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Messages per drain batch
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,
    /// Rotation threshold in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Rotate the output file when `max_file_size` is crossed
    #[serde(default = "default_true")]
    pub split_by_size: bool,
    /// Directory roots for schema source lookup
    #[serde(default)]
    pub schema_search_paths: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression_type: CompressionType::None,
            compression_level: 0,
            chunk_size: default_chunk_size(),
            write_batch_size: default_write_batch_size(),
            max_file_size: default_max_file_size(),
            split_by_size: true,
            schema_search_paths: Vec::new(),
        }
    }
}

/// Capture buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Bounded queue capacity in messages
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

/// Playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Bag file to replay
    #[serde(default)]
    pub input_path: String,
    /// Rewind and continue at end of file
    #[serde(default)]
    pub loop_playback: bool,
    /// Real-time multiplier, must be positive
    #[serde(default = "default_rate")]
    pub playback_rate: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            input_path: String::new(),
            loop_playback: false,
            playback_rate: default_rate(),
        }
    }
}

/// Everything one process needs, bundled for config-file front ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BagConfig {
    /// Recorder section
    #[serde(default)]
    pub recorder: RecorderConfig,
    /// Storage section
    #[serde(default)]
    pub storage: StorageConfig,
    /// Buffer section
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Player section
    #[serde(default)]
    pub player: PlayerConfig,
}

fn default_prefix() -> String {
    "bag".to_string()
}

fn default_format() -> String {
    "mcap".to_string()
}

fn default_chunk_size() -> u64 {
    1024 * 1024
}

fn default_write_batch_size() -> usize {
    1000
}

fn default_max_file_size() -> u64 {
    1024 * 1024 * 1024
}

fn default_buffer_size() -> usize {
    10_000
}

fn default_rate() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_defaults() {
        let cfg = StorageConfig::default();
        assert_eq!(cfg.compression_type, CompressionType::None);
        assert_eq!(cfg.chunk_size, 1024 * 1024);
        assert_eq!(cfg.write_batch_size, 1000);
        assert!(cfg.split_by_size);
    }

    #[test]
    fn test_player_defaults() {
        let cfg = PlayerConfig::default();
        assert!(!cfg.loop_playback);
        assert_eq!(cfg.playback_rate, 1.0);
    }

    #[test]
    fn test_topic_spec_expansion() {
        let spec = TopicSpec {
            name: "/odom".to_string(),
            type_name: "nav.Odometry".to_string(),
            schema_file: "nav.proto".to_string(),
        };
        let topic = spec.to_topic_config();
        assert_eq!(topic.topic_name, "/odom");
        assert_eq!(topic.type_name, "nav.Odometry");
        assert!(topic.channel_id.is_none());
    }

    #[test]
    fn test_compression_type_from_yaml() {
        let cfg: StorageConfig =
            serde_yaml::from_str("compression_type: zstd\ncompression_level: 3\n").unwrap();
        assert_eq!(cfg.compression_type, CompressionType::Zstd);
        assert_eq!(cfg.compression_level, 3);
    }

    #[test]
    fn test_bag_config_sections_default_independently() {
        let cfg: BagConfig = serde_yaml::from_str("player:\n  loop_playback: true\n").unwrap();
        assert!(cfg.player.loop_playback);
        assert_eq!(cfg.buffer.buffer_size, 10_000);
    }
}
