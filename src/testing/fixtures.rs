//! Collaborators that record what they are told, and sample data.

use crate::config::JobConfig;
use crate::counts::DataCounts;
use crate::persistence::{Auditor, DataCountsPersister, JobConfigProvider, UsagePersister};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One call to [`UsagePersister::persist_usage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageReport {
    pub bytes: u64,
    pub fields: u64,
    pub records: u64,
}

/// Keeps every usage report and counts snapshot it receives.
#[derive(Debug, Default)]
pub struct RecordingPersister {
    usage: Mutex<Vec<(String, UsageReport)>>,
    counts: Mutex<Vec<DataCounts>>,
}

impl RecordingPersister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn usage_reports(&self) -> Vec<(String, UsageReport)> {
        lock(&self.usage).clone()
    }

    #[must_use]
    pub fn persisted_counts(&self) -> Vec<DataCounts> {
        lock(&self.counts).clone()
    }

    /// The most recently persisted counts of `job_id`.
    #[must_use]
    pub fn latest_counts(&self, job_id: &str) -> Option<DataCounts> {
        lock(&self.counts)
            .iter()
            .rev()
            .find(|c| c.job_id == job_id)
            .cloned()
    }
}

impl UsagePersister for RecordingPersister {
    fn persist_usage(&self, job_id: &str, bytes: u64, fields: u64, records: u64) -> anyhow::Result<()> {
        lock(&self.usage).push((
            job_id.to_string(),
            UsageReport {
                bytes,
                fields,
                records,
            },
        ));
        Ok(())
    }
}

impl DataCountsPersister for RecordingPersister {
    fn persist_data_counts(&self, _job_id: &str, counts: &DataCounts) -> anyhow::Result<()> {
        lock(&self.counts).push(counts.clone());
        Ok(())
    }
}

/// A persister whose store is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingPersister;

impl UsagePersister for FailingPersister {
    fn persist_usage(&self, _: &str, _: u64, _: u64, _: u64) -> anyhow::Result<()> {
        anyhow::bail!("usage store unavailable")
    }
}

impl DataCountsPersister for FailingPersister {
    fn persist_data_counts(&self, _: &str, _: &DataCounts) -> anyhow::Result<()> {
        anyhow::bail!("counts store unavailable")
    }
}

/// Severity of an audit message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Info,
    Warning,
}

#[derive(Debug, Default)]
pub struct RecordingAuditor {
    messages: Mutex<Vec<(AuditLevel, String, String)>>,
}

impl RecordingAuditor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages for `job_id`, oldest first.
    #[must_use]
    pub fn messages(&self, job_id: &str) -> Vec<(AuditLevel, String)> {
        lock(&self.messages)
            .iter()
            .filter(|(_, id, _)| id == job_id)
            .map(|(level, _, message)| (*level, message.clone()))
            .collect()
    }

    #[must_use]
    pub fn warnings(&self, job_id: &str) -> Vec<String> {
        self.messages(job_id)
            .into_iter()
            .filter(|(level, _)| *level == AuditLevel::Warning)
            .map(|(_, message)| message)
            .collect()
    }
}

impl Auditor for RecordingAuditor {
    fn info(&self, job_id: &str, message: &str) {
        lock(&self.messages).push((AuditLevel::Info, job_id.to_string(), message.to_string()));
    }

    fn warning(&self, job_id: &str, message: &str) {
        lock(&self.messages).push((AuditLevel::Warning, job_id.to_string(), message.to_string()));
    }
}

/// A fixed set of job configurations.
#[derive(Debug, Default)]
pub struct StaticJobConfigs {
    jobs: HashMap<String, JobConfig>,
}

impl StaticJobConfigs {
    #[must_use]
    pub fn new(jobs: impl IntoIterator<Item = JobConfig>) -> Self {
        Self {
            jobs: jobs
                .into_iter()
                .map(|job| (job.job_id.clone(), job))
                .collect(),
        }
    }
}

impl JobConfigProvider for StaticJobConfigs {
    fn job_config(&self, job_id: &str) -> anyhow::Result<JobConfig> {
        self.jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such job '{job_id}'"))
    }
}

/// A job analysing `responsetime` by `airline`, timed by epoch seconds in
/// `time`.
#[must_use]
pub fn farequote_job(job_id: &str) -> JobConfig {
    let mut job = JobConfig::new(job_id);
    job.analysis.analysis_fields = vec!["airline".to_string(), "responsetime".to_string()];
    job
}

/// `records` CSV lines of [`farequote_job`] data, one minute apart.
///
/// ```
/// use anomaly_ingest::testing::farequote_csv;
///
/// let csv = farequote_csv(2);
/// assert_eq!(csv.lines().count(), 3);
/// ```
#[must_use]
pub fn farequote_csv(records: usize) -> String {
    const AIRLINES: [&str; 4] = ["AAL", "JZA", "UAL", "DAL"];
    let mut csv = String::from("time,airline,responsetime,sourcetype\n");
    for i in 0..records {
        csv.push_str(&format!(
            "{},{},{}.{},farequote\n",
            1_359_331_200 + i * 60,
            AIRLINES[i % AIRLINES.len()],
            100 + i % 37,
            i % 10
        ));
    }
    csv
}
