//! Error types for runstore
//!
//! Every failure names the offending key or location. Low-level failures
//! (I/O, Arrow/Parquet, serde, bincode) are translated into this taxonomy at
//! the backend boundary and never surface as raw platform errors.

use std::fmt::Display;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Runstore error types
#[derive(Error, Debug)]
pub enum Error {
    /// Missing location, group, value or key (recoverable, caller decides)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Name collision when creating a node
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Write would change an established type, shape or dtype
    #[error("Schema conflict at `{key}`: {message}\nExisting data is left unchanged")]
    SchemaConflict {
        /// Offending key (path)
        key: String,
        /// What disagreed
        message: String,
    },

    /// Appended frame disagrees with the trajectory's frame shape/dtype
    #[error("Shape mismatch at `{key}`: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Trajectory key (path)
        key: String,
        /// Established frame layout
        expected: String,
        /// Layout of the rejected frame
        actual: String,
    },

    /// Stored contents are unreadable or have an incompatible format version
    #[error("Format error in `{location}`: {message}")]
    Format {
        /// Storage location
        location: String,
        /// Details
        message: String,
    },

    /// Run metadata is missing, unreadable or unsupported; resume is impossible
    #[error("Corrupted run state in `{location}`: {message}\nThe location was not modified")]
    CorruptedState {
        /// Storage location
        location: String,
        /// Details
        message: String,
    },

    /// State-machine precondition violated
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Illegal child name
    #[error("Invalid name `{0}`: names must be non-empty, must not contain `/` and must not start with `__`")]
    InvalidName(String),

    /// Mutation attempted through a read-only handle
    #[error("Access denied: {0} (storage opened read-only)")]
    AccessDenied(String),

    /// Unknown or ill-typed model parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Any other storage failure (translated I/O error)
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Translate an I/O failure at `location` into the taxonomy.
    ///
    /// `NotFound`/`AlreadyExists` keep their meaning, everything else becomes
    /// [`Error::Storage`] with the location and a readable message.
    pub fn io(location: impl Display, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(location.to_string()),
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists(location.to_string()),
            _ => Self::Storage(format!("{location}: {err}")),
        }
    }

    /// Build a [`Error::Format`] error.
    pub fn format(location: impl Display, message: impl Display) -> Self {
        Self::Format {
            location: location.to_string(),
            message: message.to_string(),
        }
    }

    /// Build a [`Error::CorruptedState`] error.
    pub fn corrupted(location: impl Display, message: impl Display) -> Self {
        Self::CorruptedState {
            location: location.to_string(),
            message: message.to_string(),
        }
    }

    /// Build a [`Error::SchemaConflict`] error.
    pub fn schema_conflict(key: impl Display, message: impl Display) -> Self {
        Self::SchemaConflict {
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    /// Process exit code for a front end propagating this error.
    ///
    /// `2` for state-machine errors, `3` for unreadable storage, `1` otherwise.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidState(_) => 2,
            Self::CorruptedState { .. } | Self::Format { .. } => 3,
            _ => 1,
        }
    }
}
