//! Error taxonomy for the ingestion pipeline.
//!
//! Every failure a caller can observe maps to one [`IngestError`] variant, so
//! callers (and tests) can tell configuration mistakes, transient IPC problems,
//! data-quality breaches and state errors apart without string matching.
//!
//! Collaborator traits (persisters, auditors, process factories) keep returning
//! [`anyhow::Result`]; their failures are either swallowed and logged (usage and
//! count persistence) or wrapped into [`IngestError::NativeProcess`].

use crate::counts::DataCounts;
use crate::status::QualityBreach;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IngestError>;

/// All the ways ingestion can fail.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Invalid job configuration, detected before any data is written.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A field the analysis needs is not present in the input header.
    #[error("field '{field}' is configured but missing from the input header")]
    MissingField { field: String },

    /// The JSON input could not be parsed.
    #[error("malformed JSON input: {0}")]
    MalformedJson(String),

    /// The input was flagged as gzip but could not be decompressed.
    #[error("gzip decompression error: {0}")]
    GzipDecompression(String),

    /// A date transform was used in a way that can never yield a timestamp.
    #[error("{0}")]
    ParseTimestamp(String),

    /// The proportion of bad records crossed a configured threshold.
    #[error("data upload failed: {breach}")]
    DataUpload {
        counts: Box<DataCounts>,
        breach: QualityBreach,
    },

    /// The native process could not be written to or stopped responding.
    #[error("native process error for job '{job_id}': {message}")]
    NativeProcess { job_id: String, message: String },

    /// An operation that needs an open job was attempted on a closed one.
    #[error("job '{job_id}' is not running")]
    ClosedJob { job_id: String },

    /// `open_job` was called for a job that is already open.
    #[error("job '{job_id}' is already open")]
    JobAlreadyOpen { job_id: String },

    /// The job lock could not be acquired in time.
    #[error("job '{job_id}' is in use: {message}")]
    JobInUse { job_id: String, message: String },

    /// The named pipe never appeared within the connect timeout.
    #[error("named pipe {} was not found within {timeout_ms} ms", path.display())]
    PipeNotFound { path: PathBuf, timeout_ms: u128 },

    /// The path exists but is not a named pipe.
    #[error("{} exists but is not a named pipe", path.display())]
    NotAPipe { path: PathBuf },

    /// Any other operating system level I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),

    #[cfg(feature = "io-csv")]
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl IngestError {
    pub(crate) fn native(job_id: &str, message: impl Into<String>) -> Self {
        IngestError::NativeProcess {
            job_id: job_id.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        IngestError::Config(message.into())
    }

    /// The counts attached to a data-upload failure, if this is one.
    #[must_use]
    pub fn data_counts(&self) -> Option<&DataCounts> {
        match self {
            IngestError::DataUpload { counts, .. } => Some(&**counts),
            _ => None,
        }
    }
}
