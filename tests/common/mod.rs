#![allow(dead_code)]

use anomaly_ingest::config::{IngestSettings, JobConfig};
use anomaly_ingest::pipeline::DataProcessor;
use anomaly_ingest::testing::{
    MemoryProcessFactory, RecordingAuditor, RecordingPersister, StaticJobConfigs,
};
use std::sync::Arc;

/// Route `log` output through the test harness; safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A processor over in-memory processes, with its collaborators exposed.
pub struct Harness {
    pub processor: DataProcessor,
    pub factory: Arc<MemoryProcessFactory>,
    pub persister: Arc<RecordingPersister>,
    pub auditor: Arc<RecordingAuditor>,
}

pub fn harness(jobs: impl IntoIterator<Item = JobConfig>) -> Harness {
    harness_with(jobs, IngestSettings::default(), MemoryProcessFactory::new())
}

pub fn harness_with(
    jobs: impl IntoIterator<Item = JobConfig>,
    settings: IngestSettings,
    factory: MemoryProcessFactory,
) -> Harness {
    init_logging();
    let factory = Arc::new(factory);
    let persister = Arc::new(RecordingPersister::new());
    let auditor = Arc::new(RecordingAuditor::new());
    let processor = DataProcessor::builder(Arc::new(StaticJobConfigs::new(jobs)), factory.clone())
        .settings(settings)
        .usage_persister(persister.clone())
        .counts_persister(persister.clone())
        .auditor(auditor.clone())
        .build();
    Harness {
        processor,
        factory,
        persister,
        auditor,
    }
}

/// A job analysing `value`, timed by epoch seconds in `time`.
pub fn value_job(job_id: &str) -> JobConfig {
    let mut job = JobConfig::new(job_id);
    job.analysis.analysis_fields = vec!["value".to_string()];
    job
}

/// Data frames only: drops the header and control messages.
pub fn data_frames(frames: &[Vec<String>]) -> Vec<Vec<String>> {
    frames
        .iter()
        .skip(1)
        .filter(|f| f.last().is_some_and(String::is_empty))
        .cloned()
        .collect()
}
