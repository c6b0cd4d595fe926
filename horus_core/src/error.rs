//! Unified error handling for the teleoperation recorder
//!
//! This module provides a centralized error type for the entire system,
//! ensuring consistent error handling and surfacing across all components.

use thiserror::Error;

/// Main error type for recorder operations
#[derive(Debug, Error)]
pub enum HorusError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Device-file permission is missing or wrong (§7 PermissionMissing)
    #[error("permission missing on '{device}': {message} (fix: {fix_hint})")]
    PermissionMissing {
        device: String,
        message: String,
        fix_hint: String,
    },

    /// A dataflow node failed to open its device on start (§4.B NodeStartupFailure)
    #[error("node '{node}' failed to start: {message}")]
    NodeStartupFailure { node: String, message: String },

    /// Three consecutive read/write errors within 1s (§4.B NodeCommunicationFailure)
    #[error("node '{node}' lost communication: {message}")]
    NodeCommunicationFailure { node: String, message: String },

    /// The mapper has not yet received a first leader sample (§4.D, benign)
    #[error("mapping baseline not yet established")]
    BaselineNotEstablished,

    /// Deviation exceeded the emergency threshold on at least one joint (§4.D)
    #[error("emergency stop: joint {joint_index} deviated {deviation_deg:.1} deg (limit {limit_deg:.1})")]
    EmergencyStop {
        joint_index: usize,
        deviation_deg: f64,
        limit_deg: f64,
    },

    /// A follower/leader position read failed (§4.D PositionReadFailure)
    #[error("position read failed on '{bus}': {message}")]
    PositionReadFailure { bus: String, message: String },

    /// Episode buffer/columnar schema mismatch (§4.F EpisodeValidationError)
    #[error("episode {episode_index} failed validation: {message}")]
    EpisodeValidationError { episode_index: u64, message: String },

    /// Image flush wait exceeded its dynamic deadline (§4.F ImageFlushTimeout)
    #[error("episode {episode_index} image flush timed out after {waited_secs:.1}s")]
    ImageFlushTimeout {
        episode_index: u64,
        waited_secs: f64,
    },

    /// Video encoder failed, including a failed hardware->software fallback (§4.F EncoderError)
    #[error("encoder error for episode {episode_index}, camera '{camera}': {message}")]
    EncoderError {
        episode_index: u64,
        camera: String,
        message: String,
    },

    /// The startup connection probe to cloud/edge failed (§4.I ConnectionProbeFailed)
    #[error("connection probe failed after {elapsed_secs:.1}s: {message}")]
    ConnectionProbeFailed { elapsed_secs: f64, message: String },

    /// Upload to cloud/edge failed (§4.I UploadFailed)
    #[error("upload failed: {message}")]
    UploadFailed { message: String },

    /// Training never reached COMPLETED before the session deadline (§4.I TrainingTimeout)
    #[error("training timed out after {elapsed_mins} minutes for repo '{repo_id}'")]
    TrainingTimeout { repo_id: String, elapsed_mins: u64 },

    /// SFTP model retrieval failed (§4.I DownloadFailed)
    #[error("model download failed for repo '{repo_id}': {message}")]
    DownloadFailed { repo_id: String, message: String },

    /// HTTP client/transport errors from the training service
    #[error("HTTP error: {0}")]
    Http(String),

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timeout errors not covered by a more specific variant
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Resource not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Parse errors
    #[error("Parse error: {0}")]
    ParseError(String),

    /// External command execution errors (video encoder, tar, ssh exec)
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// Generic internal errors (use sparingly)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using HorusError
pub type HorusResult<T> = Result<T, HorusError>;

impl From<serde_json::Error> for HorusError {
    fn from(err: serde_json::Error) -> Self {
        HorusError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for HorusError {
    fn from(err: bincode::Error) -> Self {
        HorusError::Serialization(format!("columnar codec error: {}", err))
    }
}

impl From<std::num::ParseIntError> for HorusError {
    fn from(err: std::num::ParseIntError) -> Self {
        HorusError::ParseError(format!("integer parse error: {}", err))
    }
}

impl From<std::num::ParseFloatError> for HorusError {
    fn from(err: std::num::ParseFloatError) -> Self {
        HorusError::ParseError(format!("float parse error: {}", err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for HorusError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        HorusError::Internal("lock poisoned".to_string())
    }
}

impl From<reqwest::Error> for HorusError {
    fn from(err: reqwest::Error) -> Self {
        HorusError::Http(err.to_string())
    }
}

impl From<ssh2::Error> for HorusError {
    fn from(err: ssh2::Error) -> Self {
        HorusError::Internal(format!("ssh error: {}", err))
    }
}

impl From<&str> for HorusError {
    fn from(msg: &str) -> Self {
        HorusError::Internal(msg.to_string())
    }
}

impl From<String> for HorusError {
    fn from(msg: String) -> Self {
        HorusError::Internal(msg)
    }
}

impl HorusError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        HorusError::Config(msg.into())
    }

    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        HorusError::NotFound(resource.into())
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        HorusError::InvalidInput(msg.into())
    }

    /// Whether this error kind is always fatal to the current recording session,
    /// per the recovery policy table in §7.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            HorusError::EmergencyStop { .. }
                | HorusError::PermissionMissing { .. }
                | HorusError::NodeStartupFailure { .. }
        )
    }
}
