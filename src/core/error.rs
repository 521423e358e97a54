// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Error types for the record/replay engine.
//!
//! One enum covers the whole pipeline: configuration validation, schema
//! resolution, container I/O, buffering, and transport publication.
//! Setup errors abort `start()`; steady-state errors are counted and
//! logged by the session owners without tearing anything down, except
//! `RotationFailed` which is always fatal.

use std::fmt;

/// Errors that can occur while recording or replaying a bag.
#[derive(Debug, Clone)]
pub enum BagError {
    /// Configuration rejected before any work started
    ConfigInvalid {
        /// What was wrong with the configuration
        reason: String,
    },

    /// A fully qualified type name could not be resolved by the registry
    TypeNotFound {
        /// Type name that was not found
        type_name: String,
    },

    /// A schema source file failed to parse
    ImportFailed {
        /// Schema file (relative to a search path)
        file: String,
        /// 1-based line of the first error
        line: usize,
        /// 1-based column of the first error
        column: usize,
        /// Parser message
        message: String,
    },

    /// Output container could not be opened
    OpenFailed {
        /// Target path
        path: String,
        /// Underlying reason
        reason: String,
    },

    /// Open was called while a file is already open
    AlreadyOpen {
        /// Path of the file currently open
        path: String,
    },

    /// Output path could not be derived or created
    PathInvalid {
        /// Offending path
        path: String,
        /// Underlying reason
        reason: String,
    },

    /// A message could not be written to the container
    WriteFailed {
        /// Topic of the dropped message
        topic: String,
        /// Underlying reason
        reason: String,
    },

    /// Closing/reopening during a size split failed; the session must stop
    RotationFailed {
        /// Underlying reason
        reason: String,
    },

    /// Push or pop on a buffer that has been stopped
    BufferStopped,

    /// A bounded buffer wait expired
    BufferTimeout {
        /// Topic being pushed when the wait expired
        topic: String,
    },

    /// Input container could not be opened or its summary read
    ReaderOpenFailed {
        /// Input path
        path: String,
        /// Underlying reason
        reason: String,
    },

    /// A record in the input container could not be decoded
    ReaderDecodeFailed {
        /// Position or record context
        context: String,
        /// Underlying reason
        reason: String,
    },

    /// The transport factory could not produce a subscriber or publisher
    TransportUnavailable {
        /// Topic the endpoint was requested for
        topic: String,
        /// Underlying reason
        reason: String,
    },

    /// The transport rejected a payload during replay
    PublishFailed {
        /// Topic the payload was destined for
        topic: String,
    },
}

impl BagError {
    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        BagError::ConfigInvalid {
            reason: reason.into(),
        }
    }

    /// Create a "type not found" error.
    pub fn type_not_found(type_name: impl Into<String>) -> Self {
        BagError::TypeNotFound {
            type_name: type_name.into(),
        }
    }

    /// Create an import error.
    pub fn import(
        file: impl Into<String>,
        line: usize,
        column: usize,
        message: impl Into<String>,
    ) -> Self {
        BagError::ImportFailed {
            file: file.into(),
            line,
            column,
            message: message.into(),
        }
    }

    /// Create an open error.
    pub fn open(path: impl Into<String>, reason: impl Into<String>) -> Self {
        BagError::OpenFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a path error.
    pub fn path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        BagError::PathInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a write error.
    pub fn write(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        BagError::WriteFailed {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Create a rotation error.
    pub fn rotation(reason: impl Into<String>) -> Self {
        BagError::RotationFailed {
            reason: reason.into(),
        }
    }

    /// Create a reader open error.
    pub fn reader_open(path: impl Into<String>, reason: impl Into<String>) -> Self {
        BagError::ReaderOpenFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a reader decode error.
    pub fn decode(context: impl Into<String>, reason: impl Into<String>) -> Self {
        BagError::ReaderDecodeFailed {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        BagError::TransportUnavailable {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that must tear the session down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BagError::RotationFailed { .. })
    }

    /// Get structured fields for logging.
    pub fn log_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            BagError::ConfigInvalid { reason } => vec![("reason", reason.clone())],
            BagError::TypeNotFound { type_name } => vec![("type", type_name.clone())],
            BagError::ImportFailed {
                file,
                line,
                column,
                message,
            } => vec![
                ("file", file.clone()),
                ("line", line.to_string()),
                ("column", column.to_string()),
                ("message", message.clone()),
            ],
            BagError::OpenFailed { path, reason } | BagError::PathInvalid { path, reason } => {
                vec![("path", path.clone()), ("reason", reason.clone())]
            }
            BagError::AlreadyOpen { path } => vec![("path", path.clone())],
            BagError::WriteFailed { topic, reason } => {
                vec![("topic", topic.clone()), ("reason", reason.clone())]
            }
            BagError::RotationFailed { reason } => vec![("reason", reason.clone())],
            BagError::BufferStopped => vec![],
            BagError::BufferTimeout { topic } => vec![("topic", topic.clone())],
            BagError::ReaderOpenFailed { path, reason } => {
                vec![("path", path.clone()), ("reason", reason.clone())]
            }
            BagError::ReaderDecodeFailed { context, reason } => {
                vec![("context", context.clone()), ("reason", reason.clone())]
            }
            BagError::TransportUnavailable { topic, reason } => {
                vec![("topic", topic.clone()), ("reason", reason.clone())]
            }
            BagError::PublishFailed { topic } => vec![("topic", topic.clone())],
        }
    }
}

impl fmt::Display for BagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BagError::ConfigInvalid { reason } => {
                write!(f, "Invalid configuration: {reason}")
            }
            BagError::TypeNotFound { type_name } => {
                write!(f, "Type not found: '{type_name}'")
            }
            BagError::ImportFailed {
                file,
                line,
                column,
                message,
            } => write!(f, "Schema import failed: {file}:{line}:{column}: {message}"),
            BagError::OpenFailed { path, reason } => {
                write!(f, "Failed to open '{path}': {reason}")
            }
            BagError::AlreadyOpen { path } => {
                write!(f, "A bag file is already open: '{path}'")
            }
            BagError::PathInvalid { path, reason } => {
                write!(f, "Invalid output path '{path}': {reason}")
            }
            BagError::WriteFailed { topic, reason } => {
                write!(f, "Failed to write message on '{topic}': {reason}")
            }
            BagError::RotationFailed { reason } => {
                write!(f, "File rotation failed: {reason}")
            }
            BagError::BufferStopped => write!(f, "Buffer is stopped"),
            BagError::BufferTimeout { topic } => {
                write!(f, "Buffer full, push timed out on '{topic}'")
            }
            BagError::ReaderOpenFailed { path, reason } => {
                write!(f, "Failed to open '{path}' for reading: {reason}")
            }
            BagError::ReaderDecodeFailed { context, reason } => {
                write!(f, "Failed to decode record ({context}): {reason}")
            }
            BagError::TransportUnavailable { topic, reason } => {
                write!(f, "Transport endpoint unavailable for '{topic}': {reason}")
            }
            BagError::PublishFailed { topic } => {
                write!(f, "Publish rejected on '{topic}'")
            }
        }
    }
}

impl std::error::Error for BagError {}

impl From<std::io::Error> for BagError {
    fn from(err: std::io::Error) -> Self {
        BagError::WriteFailed {
            topic: String::new(),
            reason: err.to_string(),
        }
    }
}

/// Result type for bagpipe operations.
pub type Result<T> = std::result::Result<T, BagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = BagError::config("no topics");
        assert!(matches!(err, BagError::ConfigInvalid { .. }));
        assert_eq!(err.to_string(), "Invalid configuration: no topics");
    }

    #[test]
    fn test_type_not_found_display() {
        let err = BagError::type_not_found("pkg.Missing");
        assert_eq!(err.to_string(), "Type not found: 'pkg.Missing'");
    }

    #[test]
    fn test_import_error_carries_position() {
        let err = BagError::import("sensors.proto", 12, 3, "expected field number");
        assert_eq!(
            err.to_string(),
            "Schema import failed: sensors.proto:12:3: expected field number"
        );
        let fields = err.log_fields();
        assert_eq!(fields[1], ("line", "12".to_string()));
        assert_eq!(fields[2], ("column", "3".to_string()));
    }

    #[test]
    fn test_rotation_is_fatal() {
        assert!(BagError::rotation("disk full").is_fatal());
        assert!(!BagError::write("/t", "short write").is_fatal());
        assert!(!BagError::BufferStopped.is_fatal());
    }

    #[test]
    fn test_buffer_timeout_fields() {
        let err = BagError::BufferTimeout {
            topic: "/imu".to_string(),
        };
        assert_eq!(err.log_fields(), vec![("topic", "/imu".to_string())]);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "pipe closed");
        let err: BagError = io_err.into();
        assert!(matches!(err, BagError::WriteFailed { .. }));
    }

    #[test]
    fn test_error_clone() {
        let err = BagError::open("/tmp/x.mcap", "permission denied");
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
