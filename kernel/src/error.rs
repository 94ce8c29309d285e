//! Error types for the slate kernel.

use crate::Version;

/// Convenience alias used throughout this crate.
pub type SlateResult<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A storage capability call failed.
    #[error("IO failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A JSON payload could not be parsed at all. Unparsable *commit* content
    /// is reported as [`Error::CorruptLog`] by the callers that know which
    /// commit they were reading.
    #[error("Malformed JSON: {0}")]
    MalformedJson(serde_json::Error),

    /// No slate table exists at the given location.
    #[error("No table found at {0}")]
    TableNotFound(String),

    /// The transaction log is internally inconsistent: a missing or duplicate
    /// version, or an entry that cannot be parsed.
    #[error("Corrupt transaction log: {0}")]
    CorruptLog(String),

    /// The log declares a reader protocol this kernel does not implement.
    #[error("Unsupported reader protocol: {0}")]
    UnsupportedProtocol(String),

    /// The requested version does not exist in the log.
    #[error("Version {0} not found in transaction log")]
    VersionNotFound(Version),

    /// A scan projection referenced a column the table schema does not have.
    #[error("Invalid projection: {0}")]
    InvalidProjection(String),

    /// A closed scan-data iterator was used again. Caller programming error;
    /// not recoverable within that iterator's lifetime.
    #[error("Scan data iterator used after close")]
    UseAfterClose,

    /// A deletion vector descriptor pointed at a bitmap that does not exist.
    #[error("Deletion vector not found: {0}")]
    DeletionVectorNotFound(String),

    /// A deletion vector bitmap could not be decoded, or disagrees with its
    /// descriptor or the file it covers.
    #[error("Malformed deletion vector: {0}")]
    MalformedDeletionVector(String),

    /// The table root is not a location this engine can serve.
    #[error("Invalid table location: {0}")]
    InvalidTableLocation(String),

    /// Required data was absent (e.g. a row count needed to size a selection
    /// vector).
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Generic slate kernel error: {0}")]
    Generic(String),
}

impl Error {
    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }

    pub fn corrupt_log(msg: impl ToString) -> Self {
        Self::CorruptLog(msg.to_string())
    }

    pub fn unsupported_protocol(msg: impl ToString) -> Self {
        Self::UnsupportedProtocol(msg.to_string())
    }

    pub fn invalid_projection(msg: impl ToString) -> Self {
        Self::InvalidProjection(msg.to_string())
    }

    pub fn malformed_dv(msg: impl ToString) -> Self {
        Self::MalformedDeletionVector(msg.to_string())
    }

    pub fn missing_data(msg: impl ToString) -> Self {
        Self::MissingData(msg.to_string())
    }
}
