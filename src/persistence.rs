//! Collaborators the pipeline reports to.
//!
//! None of these are implemented here beyond logging defaults: the storage of
//! usage and counts, the audit trail and the source of job configurations all
//! belong to the surrounding system. Failures from a persister are logged and
//! never abort an upload.

use crate::config::JobConfig;
use crate::counts::DataCounts;
use anyhow::Result;
use log::{info, warn};

/// Stores periodic usage reports.
pub trait UsagePersister: Send + Sync {
    /// Record usage accumulated since the previous report.
    ///
    /// # Errors
    ///
    /// Any error is logged by the caller and otherwise ignored.
    fn persist_usage(&self, job_id: &str, bytes: u64, fields: u64, records: u64) -> Result<()>;
}

/// Stores the running totals of a job.
pub trait DataCountsPersister: Send + Sync {
    /// # Errors
    ///
    /// Any error is logged by the caller and otherwise ignored.
    fn persist_data_counts(&self, job_id: &str, counts: &DataCounts) -> Result<()>;
}

/// One-way notifications about a job.
pub trait Auditor: Send + Sync {
    fn info(&self, job_id: &str, message: &str);

    fn warning(&self, job_id: &str, message: &str);
}

/// Supplies job configurations, read-only.
pub trait JobConfigProvider: Send + Sync {
    /// Look up the configuration of `job_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is unknown or cannot be loaded.
    fn job_config(&self, job_id: &str) -> Result<JobConfig>;
}

/// Persister and auditor that only write to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl UsagePersister for LogSink {
    fn persist_usage(&self, job_id: &str, bytes: u64, fields: u64, records: u64) -> Result<()> {
        info!("[{job_id}] usage: {bytes} bytes, {fields} fields, {records} records");
        Ok(())
    }
}

impl DataCountsPersister for LogSink {
    fn persist_data_counts(&self, job_id: &str, counts: &DataCounts) -> Result<()> {
        info!(
            "[{job_id}] counts: {} records processed, {} input bytes",
            counts.processed_record_count, counts.input_bytes
        );
        Ok(())
    }
}

impl Auditor for LogSink {
    fn info(&self, job_id: &str, message: &str) {
        info!("[{job_id}] {message}");
    }

    fn warning(&self, job_id: &str, message: &str) {
        warn!("[{job_id}] {message}");
    }
}
