//! Record-level bookkeeping and data-quality thresholds.
//!
//! A [`StatusReporter`] lives as long as its job. It keeps two sets of
//! [`DataCounts`]: the running totals for the job and the incremental counts
//! of the current upload, restarted by
//! [`start_new_incremental_count`](StatusReporter::start_new_incremental_count).
//! Every byte and record also flows into the job's [`UsageReporter`].
//!
//! Progress is logged at growing intervals: every 100 records up to 1 000,
//! every 1 000 up to 20 000 and every 10 000 after that. The
//! [`QualityThresholds`] are checked at each of these points, against the
//! counts of the current upload.

use crate::config::QualityThresholds;
use crate::counts::DataCounts;
use crate::persistence::DataCountsPersister;
use crate::usage::UsageReporter;
use chrono::Utc;
use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Which proportion crossed its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreachKind {
    DateParseErrors,
    OutOfOrderRecords,
    MissingFields,
}

/// A data-quality threshold that was exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityBreach {
    pub kind: BreachKind,
    pub count: u64,
    pub total: u64,
    pub percent: u64,
    pub max_percent: u64,
}

impl fmt::Display for QualityBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            BreachKind::DateParseErrors => "records with unparseable dates",
            BreachKind::OutOfOrderRecords => "records out of time order",
            BreachKind::MissingFields => "fields missing",
        };
        write!(
            f,
            "{}% {what} ({} of {}) exceeds the limit of {}%",
            self.percent, self.count, self.total, self.max_percent
        )
    }
}

/// `Err` as soon as a threshold is crossed.
pub type QualityResult = std::result::Result<(), QualityBreach>;

/// True when progress should be logged after `total` records.
#[must_use]
pub fn is_reporting_boundary(total: u64) -> bool {
    let step = if total <= 1_000 {
        100
    } else if total <= 20_000 {
        1_000
    } else {
        10_000
    };
    total > 0 && total % step == 0
}

pub struct StatusReporter {
    job_id: String,
    usage: UsageReporter,
    thresholds: QualityThresholds,
    persister: Arc<dyn DataCountsPersister>,
    running_total: DataCounts,
    incremental: DataCounts,
}

impl fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusReporter")
            .field("job_id", &self.job_id)
            .field("thresholds", &self.thresholds)
            .field("running_total", &self.running_total)
            .field("incremental", &self.incremental)
            .finish_non_exhaustive()
    }
}

impl StatusReporter {
    /// `running_total` carries the counts of earlier uploads, if any.
    pub fn new(
        job_id: impl Into<String>,
        usage: UsageReporter,
        thresholds: QualityThresholds,
        persister: Arc<dyn DataCountsPersister>,
        running_total: DataCounts,
    ) -> Self {
        let job_id = job_id.into();
        Self {
            incremental: DataCounts::new(job_id.clone()),
            running_total: DataCounts {
                job_id: job_id.clone(),
                ..running_total
            },
            job_id,
            usage,
            thresholds,
            persister,
        }
    }

    /// Count a record that was sent to the native process.
    ///
    /// `input_fields` is the number of fields read for the record and
    /// `analysed_fields` the number the analysis consumes.
    ///
    /// # Errors
    ///
    /// Returns the breach if this record lands on a reporting boundary and a
    /// threshold is exceeded.
    pub fn report_record_written(
        &mut self,
        input_fields: u64,
        analysed_fields: u64,
        epoch_ms: i64,
    ) -> QualityResult {
        self.usage.add_fields_records_read(input_fields);
        self.running_total
            .record_written(input_fields, analysed_fields, epoch_ms);
        self.incremental
            .record_written(input_fields, analysed_fields, epoch_ms);
        self.on_record()
    }

    /// Count a record dropped because its date could not be parsed.
    ///
    /// # Errors
    ///
    /// See [`report_record_written`](Self::report_record_written).
    pub fn report_date_parse_error(&mut self, input_fields: u64) -> QualityResult {
        self.usage.add_fields_records_read(input_fields);
        for counts in [&mut self.running_total, &mut self.incremental] {
            counts.invalid_date_count += 1;
            counts.input_field_count += input_fields;
        }
        self.on_record()
    }

    /// Count a record dropped because it was older than the latest one.
    ///
    /// # Errors
    ///
    /// See [`report_record_written`](Self::report_record_written).
    pub fn report_out_of_order_record(&mut self, input_fields: u64) -> QualityResult {
        self.usage.add_fields_records_read(input_fields);
        for counts in [&mut self.running_total, &mut self.incremental] {
            counts.out_of_order_timestamp_count += 1;
            counts.input_field_count += input_fields;
        }
        self.on_record()
    }

    pub fn report_missing_fields(&mut self, missing: u64) {
        self.running_total.missing_field_count += missing;
        self.incremental.missing_field_count += missing;
    }

    pub fn report_bytes_read(&mut self, bytes: u64) {
        self.running_total.input_bytes += bytes;
        self.incremental.input_bytes += bytes;
        self.usage.add_bytes_read(bytes);
    }

    /// Compare the current upload's counts with the thresholds.
    ///
    /// # Errors
    ///
    /// Returns the first breached threshold, date errors first.
    pub fn check_thresholds(&self) -> QualityResult {
        let counts = &self.incremental;
        let total = counts.input_record_count();
        if total == 0 {
            return Ok(());
        }
        check(
            BreachKind::DateParseErrors,
            counts.invalid_date_count,
            total,
            self.thresholds.max_percent_date_parse_errors,
        )?;
        check(
            BreachKind::OutOfOrderRecords,
            counts.out_of_order_timestamp_count,
            total,
            self.thresholds.max_percent_out_of_order_errors,
        )?;
        check(
            BreachKind::MissingFields,
            counts.missing_field_count,
            counts.input_field_count + counts.missing_field_count,
            self.thresholds.max_percent_missing_fields,
        )
    }

    /// Begin counting a new upload.
    pub fn start_new_incremental_count(&mut self) {
        self.incremental = DataCounts::new(self.job_id.clone());
    }

    /// Wrap up an upload: report usage and persist the running totals.
    pub fn finish_reporting(&mut self) {
        if self.incremental.processed_record_count > 0 {
            let now = Some(Utc::now());
            self.incremental.last_data_time = now;
            self.running_total.last_data_time = now;
        }
        self.usage.report_usage(Instant::now());
        self.persist_counts();
    }

    #[must_use]
    pub fn incremental_stats(&self) -> &DataCounts {
        &self.incremental
    }

    #[must_use]
    pub fn running_total_stats(&self) -> &DataCounts {
        &self.running_total
    }

    #[must_use]
    pub fn usage(&self) -> &UsageReporter {
        &self.usage
    }

    /// Report what is left of the usage window and persist the final totals.
    pub fn close(mut self) -> DataCounts {
        if self.usage.bytes_read_since_last_report() > 0
            || self.usage.records_read_since_last_report() > 0
        {
            self.usage.report_usage(Instant::now());
        }
        self.persist_counts();
        self.running_total
    }

    fn on_record(&mut self) -> QualityResult {
        let total = self.incremental.input_record_count();
        if !is_reporting_boundary(total) {
            return Ok(());
        }
        info!(
            "[{}] {total} records read: {} written, {} invalid dates, {} out of order, {} missing fields",
            self.job_id,
            self.incremental.processed_record_count,
            self.incremental.invalid_date_count,
            self.incremental.out_of_order_timestamp_count,
            self.incremental.missing_field_count
        );
        self.check_thresholds()
    }

    fn persist_counts(&self) {
        if let Err(e) = self
            .persister
            .persist_data_counts(&self.job_id, &self.running_total)
        {
            warn!("[{}] failed to persist data counts: {e:#}", self.job_id);
        }
    }
}

fn check(kind: BreachKind, count: u64, total: u64, max_percent: u64) -> QualityResult {
    if total == 0 {
        return Ok(());
    }
    let percent = count * 100 / total;
    if percent > max_percent {
        return Err(QualityBreach {
            kind,
            count,
            total,
            percent,
            max_percent,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporting_boundaries() {
        let boundaries: Vec<u64> = (1..=30_000).filter(|&t| is_reporting_boundary(t)).collect();
        assert_eq!(&boundaries[..3], &[100, 200, 300]);
        assert!(boundaries.contains(&1_000));
        assert!(!boundaries.contains(&1_100));
        assert!(boundaries.contains(&2_000));
        assert!(boundaries.contains(&20_000));
        assert!(!boundaries.contains(&21_000));
        assert!(boundaries.contains(&30_000));
        assert!(!is_reporting_boundary(0));
    }

    #[test]
    fn test_check_is_strictly_greater() {
        assert!(check(BreachKind::DateParseErrors, 10, 100, 10).is_ok());
        let breach = check(BreachKind::DateParseErrors, 11, 100, 10).unwrap_err();
        assert_eq!(breach.percent, 11);
        assert_eq!(
            breach.to_string(),
            "11% records with unparseable dates (11 of 100) exceeds the limit of 10%"
        );
    }
}
