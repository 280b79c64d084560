//! # Anomaly Ingest
//!
//! The data ingestion side of an anomaly-detection engine. Raw job data
//! arrives as CSV or JSON, possibly gzipped; this crate decodes it, derives
//! and normalises the fields the analysis needs, and streams the result as
//! length-encoded records into a native analytics process over named pipes.
//!
//! ## Key Features
//!
//! - **Job lifecycle** - open, upload, flush and close jobs, one operation per
//!   job at a time under a fair lock
//! - **Input formats** - delimited text and JSON object streams (optional via
//!   feature flags), gzip content encoding
//! - **Transforms** - concatenation, case folding, regex extraction, splitting
//!   and exclusion, ordered by their field dependencies, plus date parsing
//! - **Data quality** - unparseable dates, out-of-order records and missing
//!   fields are counted and uploads fail past configurable limits
//! - **Usage accounting** - bytes, fields and records reported periodically
//!
//! ## Quick Start
//!
//! ```
//! use anomaly_ingest::*;
//! use anomaly_ingest::testing::{MemoryProcessFactory, StaticJobConfigs};
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut job = JobConfig::new("web");
//! job.data_description.time_format = "yyyy-MM-dd HH:mm:ss".to_string();
//! job.analysis.analysis_fields = vec!["status".into()];
//!
//! let factory = Arc::new(MemoryProcessFactory::new());
//! let processor = DataProcessor::builder(
//!     Arc::new(StaticJobConfigs::new([job])),
//!     factory.clone(),
//! )
//! .build();
//!
//! processor.open_job("web", false)?;
//! let data = "time,status\n\
//!     2014-05-01 10:00:00,200\n\
//!     2014-05-01 10:00:05,200\n\
//!     not-a-date,500\n\
//!     2014-05-01 10:00:09,404\n\
//!     2014-05-01 10:00:12,200\n";
//! let counts = processor
//!     .process_data("web", data.as_bytes(), DataLoadParams::default(), &AtomicBool::new(false))?
//!     .into_result()?;
//! assert_eq!(counts.processed_record_count, 4);
//! assert_eq!(counts.invalid_date_count, 1);
//!
//! processor.flush_job("web", &InterimResultsParams::default())?;
//! processor.close_job("web")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! An upload flows through these stages:
//! 1. [`io::compression`] undoes the content encoding and [`io::counting`]
//!    measures the decoded bytes
//! 2. an [`io::RecordSource`] splits the stream into records
//! 3. the [`transform`] chain derives output fields and the record time
//! 4. the [`writer`] drops bad records, counts everything through [`status`]
//!    and [`usage`], and writes the rest to the [`process`]
//! 5. the [`wire`] format frames records on the native process's input
//!
//! ## Module Overview
//!
//! - [`pipeline`] - `DataProcessor`, the per-job communicator and request parameters
//! - [`config`] - process settings and job configuration
//! - [`process`] - the native process contract, control messages and flush acknowledgements
//! - [`pipe`] - connecting to named pipes
//! - [`lock`] - fair per-job locking
//! - [`persistence`] - where usage, counts and audit messages go
//! - [`testing`] - in-memory processes and recording collaborators

pub mod config;
pub mod counts;
pub mod error;
pub mod io;
pub mod lock;
pub mod persistence;
pub mod pipe;
pub mod pipeline;
pub mod process;
pub mod status;
pub mod testing;
pub mod transform;
pub mod usage;
pub mod wire;
pub mod writer;

// General re-exports
pub use config::{DataDescription, DataFormat, IngestSettings, JobConfig, QualityThresholds};
pub use counts::DataCounts;
pub use error::{IngestError, Result};
pub use io::ContentEncoding;
pub use pipeline::{
    DataLoadParams, DataProcessor, InterimResultsParams, JobState, TimeRange, UploadOutcome,
};
pub use process::{NativeProcess, NativeProcessFactory, NamedPipeProcessFactory};
pub use status::{BreachKind, QualityBreach};
pub use transform::{TransformConfig, TransformKind};
