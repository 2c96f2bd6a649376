//! Error types and result types for repository operations.
//!
//! Every fallible operation returns [`ShelterResult<T>`]. Argument errors are raised before any
//! backend round trip; backend failures are logged by the repository and then returned, so a
//! caller can always tell "nothing matched" apart from "the backend failed".

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when working with the shelter collection.
#[derive(Error, Debug)]
pub enum ShelterError {
    /// The session could not be established or the liveness probe failed.
    ///
    /// Only produced while connecting; the repository is never handed out in this case.
    #[error("Connection failed: {0}")]
    Connection(String),
    /// Caller-supplied arguments do not have the documented shape.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// A unique index rejected the write.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    /// A multi-record insert stopped part way through.
    ///
    /// `committed` lists the record numbers that were stored before the failure; they are not
    /// rolled back.
    #[error("Insert interrupted after {} record(s): {reason}", committed.len())]
    PartialInsert {
        committed: Vec<i64>,
        reason: String,
    },
    /// Serialization/deserialization error when converting between BSON and JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ShelterError {
    /// Shorthand for [`ShelterError::InvalidArgument`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        ShelterError::InvalidArgument(reason.into())
    }

    /// Whether this error came from the backend rather than from argument validation.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            ShelterError::Backend(_)
                | ShelterError::DuplicateKey(_)
                | ShelterError::PartialInsert { .. }
        )
    }
}

/// A specialized `Result` type for repository operations.
pub type ShelterResult<T> = Result<T, ShelterError>;

impl From<BsonError> for ShelterError {
    fn from(err: BsonError) -> Self {
        ShelterError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for ShelterError {
    fn from(err: SerdeJsonError) -> Self {
        ShelterError::Serialization(err.to_string())
    }
}
