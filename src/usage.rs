//! Periodic usage accounting.
//!
//! [`UsageReporter`] keeps a window of bytes, fields and records read since
//! the last report. There is no timer thread: every [`add_bytes_read`] call
//! checks whether the report interval has passed and, if so, reports
//! synchronously on the streaming thread.
//!
//! A report always empties the window, whether or not the persister accepted
//! it; a persistence failure is logged and the next window starts from zero.
//!
//! [`add_bytes_read`]: UsageReporter::add_bytes_read

use crate::persistence::UsagePersister;
use log::{info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct UsageReporter {
    job_id: String,
    persister: Arc<dyn UsagePersister>,
    interval: Duration,
    last_report: Instant,
    bytes_read_since_last_report: u64,
    fields_read_since_last_report: u64,
    records_read_since_last_report: u64,
}

impl std::fmt::Debug for UsageReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageReporter")
            .field("job_id", &self.job_id)
            .field("interval", &self.interval)
            .field("bytes", &self.bytes_read_since_last_report)
            .field("fields", &self.fields_read_since_last_report)
            .field("records", &self.records_read_since_last_report)
            .finish_non_exhaustive()
    }
}

impl UsageReporter {
    pub fn new(
        job_id: impl Into<String>,
        persister: Arc<dyn UsagePersister>,
        interval: Duration,
    ) -> Self {
        Self::starting_at(job_id, persister, interval, Instant::now())
    }

    /// A reporter whose first window opened at `start`.
    pub fn starting_at(
        job_id: impl Into<String>,
        persister: Arc<dyn UsagePersister>,
        interval: Duration,
        start: Instant,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            persister,
            interval,
            last_report: start,
            bytes_read_since_last_report: 0,
            fields_read_since_last_report: 0,
            records_read_since_last_report: 0,
        }
    }

    pub fn add_bytes_read(&mut self, bytes: u64) {
        self.add_bytes_read_at(bytes, Instant::now());
    }

    /// Add `bytes` to the window and report if the interval elapsed by `now`.
    pub fn add_bytes_read_at(&mut self, bytes: u64, now: Instant) {
        self.bytes_read_since_last_report += bytes;
        if now.saturating_duration_since(self.last_report) > self.interval {
            self.report_usage(now);
        }
    }

    /// Count one record of `fields` fields.
    pub fn add_fields_records_read(&mut self, fields: u64) {
        self.fields_read_since_last_report += fields;
        self.records_read_since_last_report += 1;
    }

    /// Log and persist the current window, then start a new one at `now`.
    pub fn report_usage(&mut self, now: Instant) {
        let kib = self.bytes_read_since_last_report as f64 / 1024.0;
        info!(
            "[{}] {kib:.1} KiB, {} fields and {} records read since last report",
            self.job_id, self.fields_read_since_last_report, self.records_read_since_last_report
        );

        if let Err(e) = self.persister.persist_usage(
            &self.job_id,
            self.bytes_read_since_last_report,
            self.fields_read_since_last_report,
            self.records_read_since_last_report,
        ) {
            warn!("[{}] failed to persist usage: {e:#}", self.job_id);
        }

        self.bytes_read_since_last_report = 0;
        self.fields_read_since_last_report = 0;
        self.records_read_since_last_report = 0;
        self.last_report = now;
    }

    #[must_use]
    pub fn bytes_read_since_last_report(&self) -> u64 {
        self.bytes_read_since_last_report
    }

    #[must_use]
    pub fn fields_read_since_last_report(&self) -> u64 {
        self.fields_read_since_last_report
    }

    #[must_use]
    pub fn records_read_since_last_report(&self) -> u64 {
        self.records_read_since_last_report
    }

    #[must_use]
    pub fn last_report(&self) -> Instant {
        self.last_report
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}
