//! Everything that belongs to one open job.

use super::UploadOutcome;
use super::params::{DataLoadParams, InterimResultsParams};
use crate::config::JobConfig;
use crate::counts::DataCounts;
use crate::error::{IngestError, Result};
use crate::io::{self, CountingReader, compression};
use crate::process::NativeProcess;
use crate::status::StatusReporter;
use crate::transform::TransformPlan;
use crate::writer::{DataToProcessWriter, WriteOutcome};
use log::{debug, info};
use std::io::Read;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// The native process, transform plan and counters of an open job.
pub struct JobCommunicator {
    job: JobConfig,
    plan: TransformPlan,
    process: Box<dyn NativeProcess>,
    status: StatusReporter,
    flush_ack_timeout: Duration,
}

impl JobCommunicator {
    /// Send the header to `process`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::NativeProcess`] if the header cannot be written.
    pub fn open(
        job: JobConfig,
        plan: TransformPlan,
        mut process: Box<dyn NativeProcess>,
        status: StatusReporter,
        flush_ack_timeout: Duration,
    ) -> Result<Self> {
        process
            .write_record(plan.output_fields())
            .and_then(|()| process.flush_stream())
            .map_err(|e| IngestError::native(&job.job_id, format!("cannot write header: {e}")))?;
        debug!("[{}] header: {:?}", job.job_id, plan.output_fields());
        Ok(Self {
            job,
            plan,
            process,
            status,
            flush_ack_timeout,
        })
    }

    /// Stream one upload into the native process.
    ///
    /// Usage and counts are reported whether or not the upload succeeds.
    ///
    /// # Errors
    ///
    /// See [`DataProcessor::process_data`](super::DataProcessor::process_data).
    pub fn write_data<R: Read>(
        &mut self,
        input: R,
        params: &DataLoadParams,
        cancelled: &AtomicBool,
    ) -> Result<UploadOutcome> {
        self.status.start_new_incremental_count();
        let outcome = self.stream(input, params, cancelled);
        self.status.finish_reporting();

        let counts = self.status.incremental_stats().clone();
        Ok(match outcome? {
            WriteOutcome::Completed => UploadOutcome::Completed(counts),
            WriteOutcome::Cancelled => UploadOutcome::Cancelled(counts),
            WriteOutcome::Breach(breach) => UploadOutcome::DataQualityExceeded { counts, breach },
        })
    }

    fn stream<R: Read>(
        &mut self,
        input: R,
        params: &DataLoadParams,
        cancelled: &AtomicBool,
    ) -> Result<WriteOutcome> {
        let job_id = self.job.job_id.as_str();
        if let Some(range) = params.reset_range {
            info!("[{job_id}] resetting buckets {} to {}", range.start, range.end);
            self.process
                .write_reset_buckets(range)
                .map_err(|e| IngestError::native(job_id, format!("cannot reset buckets: {e}")))?;
        }

        let (decoded, failure) = compression::decode(input, params.content_encoding)?;
        let (counted, mut bytes) = CountingReader::new(decoded);
        let mut source = io::record_source(
            counted,
            &self.job.data_description,
            self.plan.input_fields(),
        )
        .map_err(|e| failure.classify(e))?;

        let outcome = DataToProcessWriter::new(
            job_id,
            &self.plan,
            self.process.as_mut(),
            &mut self.status,
        )
        .write(source.as_mut(), &mut bytes, &failure, cancelled)?;

        self.process
            .flush_stream()
            .map_err(|e| IngestError::native(job_id, format!("cannot flush records: {e}")))?;
        Ok(outcome)
    }

    /// Flush the native process and wait for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::NativeProcess`] if the flush cannot be sent or
    /// is not acknowledged in time.
    pub fn flush(&mut self, params: &InterimResultsParams) -> Result<()> {
        let job_id = self.job.job_id.as_str();
        let flush_id = self
            .process
            .flush_job(params)
            .map_err(|e| IngestError::native(job_id, format!("cannot flush: {e}")))?;
        if !self
            .process
            .wait_for_flush_ack(&flush_id, self.flush_ack_timeout)
        {
            return Err(IngestError::native(
                job_id,
                format!(
                    "flush {flush_id} was not acknowledged within {} s",
                    self.flush_ack_timeout.as_secs()
                ),
            ));
        }
        debug!("[{job_id}] flush {flush_id} complete");
        Ok(())
    }

    /// Close the native process input and hand back the job's final counts.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::NativeProcess`] if the last frames cannot be
    /// flushed. The counts are persisted either way.
    pub fn close(mut self) -> Result<DataCounts> {
        let closed = self.process.close();
        let totals = self.status.close();
        closed.map_err(|e| IngestError::native(&self.job.job_id, format!("cannot close: {e}")))?;
        Ok(totals)
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.process.is_alive()
    }

    #[must_use]
    pub fn job(&self) -> &JobConfig {
        &self.job
    }

    #[must_use]
    pub fn running_totals(&self) -> &DataCounts {
        self.status.running_total_stats()
    }
}
