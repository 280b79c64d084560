//! Job lifecycle and uploads.
//!
//! [`DataProcessor`] is the entry point. It owns one [`JobCommunicator`] per
//! open job and enforces the lifecycle:
//!
//! ```text
//! Closed --open_job--> Opening --> Open --close_job--> Closing --> Closed
//!                                  |  ^
//!                        flush_job |  | acknowledged
//!                                  v  |
//!                                Flushing
//! ```
//!
//! A job whose native process stops accepting input moves to `Failed`; only
//! `close_job` (or a new `open_job`) is accepted from there.
//!
//! Every operation on a job runs under the job's fair lock, so uploads and
//! flushes for one job never interleave on the wire. Different jobs proceed
//! independently.
//!
//! # Example
//!
//! ```
//! use anomaly_ingest::config::{IngestSettings, JobConfig};
//! use anomaly_ingest::pipeline::{DataProcessor, JobState, params::DataLoadParams};
//! use anomaly_ingest::process::BlackHoleProcessFactory;
//! use anomaly_ingest::testing::StaticJobConfigs;
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut job = JobConfig::new("farequote");
//! job.analysis.analysis_fields = vec!["responsetime".into()];
//!
//! let processor = DataProcessor::builder(
//!     Arc::new(StaticJobConfigs::new([job])),
//!     Arc::new(BlackHoleProcessFactory),
//! )
//! .settings(IngestSettings::default())
//! .build();
//!
//! processor.open_job("farequote", false)?;
//! let data = "time,responsetime\n1400000000,12.5\n1400000060,11.0\n";
//! let counts = processor
//!     .process_data("farequote", data.as_bytes(), DataLoadParams::default(), &AtomicBool::new(false))?
//!     .into_result()?;
//! assert_eq!(counts.processed_record_count, 2);
//!
//! processor.close_job("farequote")?;
//! assert_eq!(processor.job_state("farequote"), JobState::Closed);
//! # Ok(())
//! # }
//! ```

pub mod communicator;
pub mod params;

pub use communicator::JobCommunicator;
pub use params::{DataLoadParams, InterimResultsParams, TimeRange};

use crate::config::IngestSettings;
use crate::counts::DataCounts;
use crate::error::{IngestError, Result};
use crate::lock::JobLocks;
use crate::persistence::{
    Auditor, DataCountsPersister, JobConfigProvider, LogSink, UsagePersister,
};
use crate::process::NativeProcessFactory;
use crate::status::{QualityBreach, StatusReporter};
use crate::usage::UsageReporter;
use log::{error, info};
use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Closed,
    Opening,
    Open,
    Flushing,
    Closing,
    Failed,
}

impl JobState {
    /// Whether the job accepts uploads and flushes.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, JobState::Open | JobState::Flushing)
    }
}

/// Result of an upload that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// All records were read.
    Completed(DataCounts),
    /// The upload stopped early at the caller's request.
    Cancelled(DataCounts),
    /// Too many records were bad; records before the breach were written.
    DataQualityExceeded {
        counts: DataCounts,
        breach: QualityBreach,
    },
}

impl UploadOutcome {
    /// Counts of this upload, whatever the outcome.
    #[must_use]
    pub fn counts(&self) -> &DataCounts {
        match self {
            UploadOutcome::Completed(counts)
            | UploadOutcome::Cancelled(counts)
            | UploadOutcome::DataQualityExceeded { counts, .. } => counts,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, UploadOutcome::Completed(_))
    }

    /// The counts, or [`IngestError::DataUpload`] for a quality breach.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::DataUpload`] carrying the counts when a
    /// threshold was exceeded.
    pub fn into_result(self) -> Result<DataCounts> {
        match self {
            UploadOutcome::Completed(counts) | UploadOutcome::Cancelled(counts) => Ok(counts),
            UploadOutcome::DataQualityExceeded { counts, breach } => Err(IngestError::DataUpload {
                counts: Box::new(counts),
                breach,
            }),
        }
    }
}

struct JobEntry {
    state: JobState,
    communicator: Option<Arc<Mutex<JobCommunicator>>>,
}

/// Opens jobs, streams their data and closes them again.
pub struct DataProcessor {
    settings: IngestSettings,
    configs: Arc<dyn JobConfigProvider>,
    factory: Arc<dyn NativeProcessFactory>,
    usage_persister: Arc<dyn UsagePersister>,
    counts_persister: Arc<dyn DataCountsPersister>,
    auditor: Arc<dyn Auditor>,
    locks: JobLocks,
    jobs: Mutex<HashMap<String, JobEntry>>,
}

/// Builder for [`DataProcessor`]; collaborators default to [`LogSink`].
pub struct DataProcessorBuilder {
    settings: IngestSettings,
    configs: Arc<dyn JobConfigProvider>,
    factory: Arc<dyn NativeProcessFactory>,
    usage_persister: Arc<dyn UsagePersister>,
    counts_persister: Arc<dyn DataCountsPersister>,
    auditor: Arc<dyn Auditor>,
}

impl DataProcessorBuilder {
    #[must_use]
    pub fn settings(mut self, settings: IngestSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn usage_persister(mut self, persister: Arc<dyn UsagePersister>) -> Self {
        self.usage_persister = persister;
        self
    }

    #[must_use]
    pub fn counts_persister(mut self, persister: Arc<dyn DataCountsPersister>) -> Self {
        self.counts_persister = persister;
        self
    }

    #[must_use]
    pub fn auditor(mut self, auditor: Arc<dyn Auditor>) -> Self {
        self.auditor = auditor;
        self
    }

    #[must_use]
    pub fn build(self) -> DataProcessor {
        DataProcessor {
            locks: JobLocks::new(self.settings.job_lock_timeout()),
            settings: self.settings,
            configs: self.configs,
            factory: self.factory,
            usage_persister: self.usage_persister,
            counts_persister: self.counts_persister,
            auditor: self.auditor,
            jobs: Mutex::new(HashMap::new()),
        }
    }
}

impl DataProcessor {
    #[must_use]
    pub fn builder(
        configs: Arc<dyn JobConfigProvider>,
        factory: Arc<dyn NativeProcessFactory>,
    ) -> DataProcessorBuilder {
        DataProcessorBuilder {
            settings: IngestSettings::default(),
            configs,
            factory,
            usage_persister: Arc::new(LogSink),
            counts_persister: Arc::new(LogSink),
            auditor: Arc::new(LogSink),
        }
    }

    /// Open `job_id`: validate its configuration, connect to its native
    /// process and send the header.
    ///
    /// `ignore_downtime` is passed to the process factory; the gap between
    /// the job's last data and its next upload is then not treated as missing
    /// data.
    ///
    /// # Errors
    ///
    /// - [`IngestError::JobAlreadyOpen`] if the job is not closed,
    /// - [`IngestError::Config`] or [`IngestError::ParseTimestamp`] if its
    ///   configuration is invalid,
    /// - [`IngestError::PipeNotFound`], [`IngestError::NotAPipe`] or
    ///   [`IngestError::NativeProcess`] if the process cannot be reached.
    pub fn open_job(&self, job_id: &str, ignore_downtime: bool) -> Result<()> {
        let _guard = self.locks.lock(job_id)?;
        {
            let mut jobs = self.jobs();
            let state = jobs.get(job_id).map_or(JobState::Closed, |e| e.state);
            if !matches!(state, JobState::Closed | JobState::Failed) {
                return Err(IngestError::JobAlreadyOpen {
                    job_id: job_id.to_string(),
                });
            }
            jobs.insert(
                job_id.to_string(),
                JobEntry {
                    state: JobState::Opening,
                    communicator: None,
                },
            );
        }

        match self.connect(job_id, ignore_downtime) {
            Ok(communicator) => {
                self.set_entry(job_id, JobState::Open, Some(communicator));
                info!("[{job_id}] job opened");
                self.auditor.info(job_id, "Job opened");
                Ok(())
            }
            Err(e) => {
                self.jobs().remove(job_id);
                error!("[{job_id}] cannot open job: {e}");
                self.auditor.warning(job_id, &format!("Job failed to open: {e}"));
                Err(e)
            }
        }
    }

    fn connect(&self, job_id: &str, ignore_downtime: bool) -> Result<Arc<Mutex<JobCommunicator>>> {
        let job = self
            .configs
            .job_config(job_id)
            .map_err(|e| IngestError::config(format!("cannot load job '{job_id}': {e:#}")))?;
        let plan = job.validate()?;
        let process = self
            .factory
            .create(&job, ignore_downtime)
            .map_err(|e| match e.downcast::<IngestError>() {
                Ok(e) => e,
                Err(e) => IngestError::native(job_id, format!("{e:#}")),
            })?;

        let usage = UsageReporter::new(
            job_id,
            Arc::clone(&self.usage_persister),
            self.settings.usage_report_interval(),
        );
        let status = StatusReporter::new(
            job_id,
            usage,
            self.settings.thresholds,
            Arc::clone(&self.counts_persister),
            DataCounts::new(job_id),
        );
        let communicator = JobCommunicator::open(
            job,
            plan,
            process,
            status,
            self.settings.flush_ack_timeout(),
        )?;
        Ok(Arc::new(Mutex::new(communicator)))
    }

    /// Stream `input` into the open job `job_id`.
    ///
    /// Blocks until the input is exhausted, `cancelled` is set, or a
    /// data-quality threshold is crossed; the [`UploadOutcome`] tells which.
    ///
    /// # Errors
    ///
    /// - [`IngestError::ClosedJob`] if the job is not open; nothing is written,
    /// - [`IngestError::JobInUse`] if another operation holds the job too long,
    /// - [`IngestError::MissingField`], [`IngestError::MalformedJson`],
    ///   [`IngestError::GzipDecompression`] or [`IngestError::Csv`] for bad input,
    /// - [`IngestError::NativeProcess`] if the process stops accepting data;
    ///   the job then moves to [`JobState::Failed`].
    pub fn process_data<R: Read>(
        &self,
        job_id: &str,
        input: R,
        params: DataLoadParams,
        cancelled: &AtomicBool,
    ) -> Result<UploadOutcome> {
        let _guard = self.locks.lock(job_id)?;
        let communicator = self.running_communicator(job_id)?;
        let mut communicator = lock(&communicator);

        let result = communicator.write_data(input, &params, cancelled);
        if !communicator.is_alive() {
            self.mark_failed(job_id);
        }
        if let Ok(outcome) = &result {
            let counts = outcome.counts();
            info!(
                "[{job_id}] upload finished: {} records written, {} bytes read",
                counts.processed_record_count, counts.input_bytes
            );
        }
        result
    }

    /// Ask the native process to flush, optionally calculating interim
    /// results or advancing time first, and wait for the acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ClosedJob`] if the job is not open and
    /// [`IngestError::NativeProcess`] if the flush fails or times out.
    pub fn flush_job(&self, job_id: &str, params: &InterimResultsParams) -> Result<()> {
        let _guard = self.locks.lock(job_id)?;
        let communicator = self.running_communicator(job_id)?;
        self.set_state(job_id, JobState::Flushing);

        let mut communicator = lock(&communicator);
        let result = communicator.flush(params);
        if communicator.is_alive() {
            self.set_state(job_id, JobState::Open);
        } else {
            self.mark_failed(job_id);
        }
        result
    }

    /// Close `job_id`, releasing its native process and returning the job's
    /// final running totals.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ClosedJob`] if the job is not open and
    /// [`IngestError::NativeProcess`] if the final flush fails; the job is
    /// closed in either case.
    pub fn close_job(&self, job_id: &str) -> Result<DataCounts> {
        let guard = self.locks.lock(job_id)?;
        let communicator = {
            let mut jobs = self.jobs();
            match jobs.get_mut(job_id) {
                Some(entry) if matches!(entry.state, JobState::Open | JobState::Failed) => {
                    entry.state = JobState::Closing;
                    entry.communicator.take()
                }
                _ => {
                    return Err(IngestError::ClosedJob {
                        job_id: job_id.to_string(),
                    });
                }
            }
        };

        let result = match communicator.map(Arc::try_unwrap) {
            Some(Ok(communicator)) => communicator
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .close(),
            _ => Ok(DataCounts::new(job_id)),
        };
        self.jobs().remove(job_id);
        drop(guard);
        self.locks.remove_idle(job_id);
        info!("[{job_id}] job closed");
        self.auditor.info(job_id, "Job closed");
        result
    }

    /// Current lifecycle state; unknown jobs are `Closed`.
    #[must_use]
    pub fn job_state(&self, job_id: &str) -> JobState {
        self.jobs()
            .get(job_id)
            .map_or(JobState::Closed, |entry| entry.state)
    }

    /// Ids of jobs accepting data, sorted.
    #[must_use]
    pub fn running_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .jobs()
            .iter()
            .filter(|(_, entry)| entry.state.is_running())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    fn running_communicator(&self, job_id: &str) -> Result<Arc<Mutex<JobCommunicator>>> {
        self.jobs()
            .get(job_id)
            .filter(|entry| entry.state == JobState::Open)
            .and_then(|entry| entry.communicator.clone())
            .ok_or_else(|| IngestError::ClosedJob {
                job_id: job_id.to_string(),
            })
    }

    fn mark_failed(&self, job_id: &str) {
        error!("[{job_id}] native process is no longer accepting data");
        self.auditor
            .warning(job_id, "Native process failed; the job must be closed");
        self.set_state(job_id, JobState::Failed);
    }

    fn set_state(&self, job_id: &str, state: JobState) {
        if let Some(entry) = self.jobs().get_mut(job_id) {
            entry.state = state;
        }
    }

    fn set_entry(
        &self,
        job_id: &str,
        state: JobState,
        communicator: Option<Arc<Mutex<JobCommunicator>>>,
    ) {
        self.jobs().insert(
            job_id.to_string(),
            JobEntry {
                state,
                communicator,
            },
        );
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock(communicator: &Mutex<JobCommunicator>) -> MutexGuard<'_, JobCommunicator> {
    communicator.lock().unwrap_or_else(PoisonError::into_inner)
}
