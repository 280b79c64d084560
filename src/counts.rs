//! Per-job record counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cumulative counts describing what a job has been sent.
///
/// All counters only ever grow; a fresh value is started for every upload
/// (incremental counts) alongside the running totals kept for the job.
/// `input_record_count` is not stored: it is always
/// `processed + invalid date + out of order`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCounts {
    pub job_id: String,
    pub processed_record_count: u64,
    pub processed_field_count: u64,
    pub input_bytes: u64,
    pub input_field_count: u64,
    pub invalid_date_count: u64,
    pub missing_field_count: u64,
    pub out_of_order_timestamp_count: u64,
    pub earliest_record_timestamp: Option<DateTime<Utc>>,
    pub latest_record_timestamp: Option<DateTime<Utc>>,
    pub last_data_time: Option<DateTime<Utc>>,
}

impl DataCounts {
    #[must_use]
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Self::default()
        }
    }

    /// Every record read from the input, whether or not it was written.
    #[must_use]
    pub fn input_record_count(&self) -> u64 {
        self.processed_record_count + self.invalid_date_count + self.out_of_order_timestamp_count
    }

    /// Record a successfully written record with its timestamp in epoch milliseconds.
    pub(crate) fn record_written(&mut self, input_fields: u64, analysed_fields: u64, epoch_ms: i64) {
        self.processed_record_count += 1;
        self.input_field_count += input_fields;
        self.processed_field_count += analysed_fields;

        let Some(ts) = DateTime::<Utc>::from_timestamp_millis(epoch_ms) else {
            return;
        };
        // Records within the latency window may arrive out of order.
        self.earliest_record_timestamp = Some(self.earliest_record_timestamp.map_or(ts, |t| t.min(ts)));
        self.latest_record_timestamp = Some(self.latest_record_timestamp.map_or(ts, |t| t.max(ts)));
    }

    /// Latest record timestamp in epoch milliseconds.
    #[must_use]
    pub fn latest_record_time_ms(&self) -> Option<i64> {
        self.latest_record_timestamp.map(|t| t.timestamp_millis())
    }

    /// True when no counter has moved since the counts were created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_record_count() == 0
            && self.input_bytes == 0
            && self.input_field_count == 0
            && self.missing_field_count == 0
    }
}
