//! Testing utilities for ingestion pipelines.
//!
//! Everything here stands in for a part of the surrounding system so that a
//! [`DataProcessor`](crate::pipeline::DataProcessor) can be driven end to end
//! in a test:
//!
//! - **Fixtures**: recording persisters and auditors, a static job
//!   configuration store, and sample data,
//! - **Mock I/O**: in-memory native processes whose input can be decoded back
//!   into frames, temporary directories for pipes, and gzip helpers.
//!
//! # Quick Start
//!
//! ```
//! use anomaly_ingest::config::JobConfig;
//! use anomaly_ingest::pipeline::{DataProcessor, params::DataLoadParams};
//! use anomaly_ingest::testing::*;
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut job = JobConfig::new("job");
//! job.analysis.analysis_fields = vec!["value".into()];
//! let factory = Arc::new(MemoryProcessFactory::new());
//! let processor = DataProcessor::builder(
//!     Arc::new(StaticJobConfigs::new([job])),
//!     factory.clone(),
//! )
//! .build();
//!
//! processor.open_job("job", false)?;
//! processor.process_data(
//!     "job",
//!     "time,value\n1400000000,1\n".as_bytes(),
//!     DataLoadParams::default(),
//!     &AtomicBool::new(false),
//! )?;
//!
//! let frames = factory.frames("job")?;
//! assert_eq!(frames[0], ["time", "value", "."]);
//! assert_eq!(frames[1], ["1400000000", "1", ""]);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod mock_io;

pub use fixtures::*;
pub use mock_io::*;
