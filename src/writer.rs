//! Moves one upload's records into the native process.
//!
//! For each record, in input order:
//!
//! 1. stop if the upload was cancelled (only ever between records),
//! 2. read it and account the decoded bytes,
//! 3. count fields the chain needs but the record lacks,
//! 4. run the transform chain; a bad date drops the record and is counted,
//! 5. drop and count records older than the latest one minus the latency,
//! 6. write the output fields and count the record.
//!
//! Counting may cross a data-quality threshold, which ends the upload with a
//! [`WriteOutcome::Breach`]. Whatever was written before stays written.

use crate::error::{IngestError, Result};
use crate::io::{ByteCounter, DecodeFailure, RecordSource};
use crate::process::NativeProcess;
use crate::status::{QualityBreach, StatusReporter};
use crate::transform::{TransformChain, TransformPlan, TransformResult};
use log::{debug, trace};
use std::sync::atomic::{AtomicBool, Ordering};

/// How an upload's record loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Completed,
    Cancelled,
    Breach(QualityBreach),
}

pub struct DataToProcessWriter<'a> {
    job_id: &'a str,
    plan: &'a TransformPlan,
    process: &'a mut dyn NativeProcess,
    status: &'a mut StatusReporter,
}

impl<'a> DataToProcessWriter<'a> {
    pub fn new(
        job_id: &'a str,
        plan: &'a TransformPlan,
        process: &'a mut dyn NativeProcess,
        status: &'a mut StatusReporter,
    ) -> Self {
        Self {
            job_id,
            plan,
            process,
            status,
        }
    }

    /// Write every record of `source`.
    ///
    /// `bytes` counts the decoded input and `decode` reports failures of the
    /// compressed layer underneath `source`.
    ///
    /// # Errors
    ///
    /// - [`IngestError::MissingField`] if the input header lacks a needed field,
    /// - [`IngestError::MalformedJson`], [`IngestError::Csv`] or
    ///   [`IngestError::GzipDecompression`] if the input cannot be read,
    /// - [`IngestError::NativeProcess`] if a record cannot be written.
    pub fn write(
        &mut self,
        source: &mut dyn RecordSource,
        bytes: &mut ByteCounter,
        decode: &DecodeFailure,
        cancelled: &AtomicBool,
    ) -> Result<WriteOutcome> {
        let mut chain =
            TransformChain::build(source.header(), self.plan).map_err(|e| decode.classify(e))?;
        let mut arrays = chain.new_arrays();
        let mut present = vec![false; arrays.input.len()];
        let latency_ms = i64::try_from(self.plan.latency_secs())
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        let fields_per_record = (self.plan.output_fields().len() - 1) as u64;
        let mut latest = self.status.running_total_stats().latest_record_time_ms();

        loop {
            if cancelled.load(Ordering::Relaxed) {
                debug!("[{}] upload cancelled", self.job_id);
                return Ok(WriteOutcome::Cancelled);
            }

            let fields_read = match source.next_record(&mut arrays.input, &mut present) {
                Ok(Some(n)) => n,
                Ok(None) => break,
                Err(e) => return Err(decode.classify(e)),
            };
            self.status.report_bytes_read(bytes.take_delta());

            let missing = chain
                .used_inputs()
                .iter()
                .filter(|&&i| !present[i])
                .count() as u64;
            if missing > 0 {
                self.status.report_missing_fields(missing);
            }

            let counted = match chain.apply(&mut arrays) {
                Ok(TransformResult::Exclude) => {
                    trace!("[{}] record excluded by transform", self.job_id);
                    continue;
                }
                Ok(_) => {
                    let epoch_ms = chain.epoch_ms();
                    match latest {
                        Some(l) if epoch_ms < l.saturating_sub(latency_ms) => {
                            debug!(
                                "[{}] record at {epoch_ms} ms is older than the latest at {l} ms",
                                self.job_id
                            );
                            self.status.report_out_of_order_record(fields_read)
                        }
                        _ => {
                            self.process.write_record(&arrays.output).map_err(|e| {
                                IngestError::native(self.job_id, format!("cannot write record: {e}"))
                            })?;
                            latest = Some(latest.map_or(epoch_ms, |l| l.max(epoch_ms)));
                            self.status.report_record_written(
                                fields_read,
                                fields_per_record.saturating_sub(missing),
                                epoch_ms,
                            )
                        }
                    }
                }
                Err(IngestError::ParseTimestamp(message)) => {
                    debug!("[{}] {message}", self.job_id);
                    self.status.report_date_parse_error(fields_read)
                }
                Err(e) => return Err(e),
            };
            if let Err(breach) = counted {
                return Ok(WriteOutcome::Breach(breach));
            }
        }

        self.status.report_bytes_read(bytes.take_delta());
        Ok(match self.status.check_thresholds() {
            Ok(()) => WriteOutcome::Completed,
            Err(breach) => WriteOutcome::Breach(breach),
        })
    }
}
