mod common;

use anomaly_ingest::config::IngestSettings;
use anomaly_ingest::testing::{AuditLevel, MemoryProcessFactory, farequote_csv, farequote_job};
use anomaly_ingest::{
    DataLoadParams, IngestError, InterimResultsParams, JobState, TimeRange, UploadOutcome,
};
use anyhow::Result;
use common::{data_frames, harness, harness_with, value_job};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn upload(h: &common::Harness, job_id: &str, data: &str) -> anomaly_ingest::Result<UploadOutcome> {
    h.processor.process_data(
        job_id,
        data.as_bytes(),
        DataLoadParams::default(),
        &AtomicBool::new(false),
    )
}

#[test]
fn test_open_upload_close() -> Result<()> {
    let h = harness([farequote_job("farequote")]);
    h.processor.open_job("farequote", false)?;
    assert_eq!(h.processor.job_state("farequote"), JobState::Open);
    assert_eq!(h.processor.running_jobs(), ["farequote"]);

    let counts = upload(&h, "farequote", &farequote_csv(10))?.into_result()?;
    assert_eq!(counts.processed_record_count, 10);
    assert_eq!(counts.processed_field_count, 30);
    assert_eq!(counts.input_field_count, 40);
    assert_eq!(counts.invalid_date_count, 0);
    assert_eq!(
        counts.earliest_record_timestamp.map(|t| t.timestamp()),
        Some(1_359_331_200)
    );
    assert_eq!(
        counts.latest_record_timestamp.map(|t| t.timestamp()),
        Some(1_359_331_200 + 9 * 60)
    );
    assert!(counts.last_data_time.is_some());

    let frames = h.factory.frames("farequote")?;
    assert_eq!(frames[0], ["time", "airline", "responsetime", "."]);
    let data = data_frames(&frames);
    assert_eq!(data.len(), 10);
    assert_eq!(data[0], ["1359331200", "AAL", "100.0", ""]);

    let totals = h.processor.close_job("farequote")?;
    assert_eq!(totals.processed_record_count, 10);
    assert_eq!(h.processor.job_state("farequote"), JobState::Closed);
    assert!(h.processor.running_jobs().is_empty());

    let audit = h.auditor.messages("farequote");
    assert_eq!(audit.first(), Some(&(AuditLevel::Info, "Job opened".to_string())));
    assert_eq!(audit.last(), Some(&(AuditLevel::Info, "Job closed".to_string())));
    Ok(())
}

#[test]
fn test_header_is_written_once_per_job() -> Result<()> {
    let h = harness([value_job("job")]);
    h.processor.open_job("job", false)?;
    upload(&h, "job", "time,value\n1400000000,1\n")?;
    upload(&h, "job", "time,value\n1400000060,2\n")?;

    let frames = h.factory.frames("job")?;
    let headers = frames.iter().filter(|f| f[2] == ".").count();
    assert_eq!(headers, 1);
    assert_eq!(
        data_frames(&frames),
        [["1400000000", "1", ""], ["1400000060", "2", ""]]
    );
    Ok(())
}

#[test]
fn test_running_totals_span_uploads() -> Result<()> {
    let h = harness([value_job("job")]);
    h.processor.open_job("job", false)?;
    let first = upload(&h, "job", "time,value\n1400000000,1\n1400000060,2\n")?.into_result()?;
    let second = upload(&h, "job", "time,value\n1400000120,3\n")?.into_result()?;
    assert_eq!(first.processed_record_count, 2);
    assert_eq!(second.processed_record_count, 1);

    let persisted = h.persister.latest_counts("job").expect("counts persisted");
    assert_eq!(persisted.processed_record_count, 3);

    let totals = h.processor.close_job("job")?;
    assert_eq!(totals.processed_record_count, 3);
    assert_eq!(totals.input_bytes, first.input_bytes + second.input_bytes);
    Ok(())
}

#[test]
fn test_upload_to_closed_job_writes_nothing() {
    let h = harness([value_job("job")]);
    let err = upload(&h, "job", "time,value\n1400000000,1\n").unwrap_err();
    assert!(matches!(err, IngestError::ClosedJob { ref job_id } if job_id == "job"));
    assert!(h.factory.input("job").is_empty());

    let err = h
        .processor
        .flush_job("job", &InterimResultsParams::default())
        .unwrap_err();
    assert!(matches!(err, IngestError::ClosedJob { .. }));
    assert!(matches!(
        h.processor.close_job("job"),
        Err(IngestError::ClosedJob { .. })
    ));
}

#[test]
fn test_open_twice_is_rejected() -> Result<()> {
    let h = harness([value_job("job")]);
    h.processor.open_job("job", false)?;
    let err = h.processor.open_job("job", true).unwrap_err();
    assert!(matches!(err, IngestError::JobAlreadyOpen { .. }));
    assert_eq!(h.processor.job_state("job"), JobState::Open);
    Ok(())
}

#[test]
fn test_unknown_job_cannot_open() {
    let h = harness([value_job("job")]);
    let err = h.processor.open_job("other", false).unwrap_err();
    assert!(matches!(err, IngestError::Config(_)));
    assert_eq!(h.processor.job_state("other"), JobState::Closed);
}

#[test]
fn test_invalid_config_cannot_open() {
    let mut job = value_job("job");
    job.data_description.time_format = "yyyy-MM-dd".to_string();
    let h = harness([job]);
    assert!(h.processor.open_job("job", false).is_err());
    assert_eq!(h.processor.job_state("job"), JobState::Closed);
    assert!(h.factory.input("job").is_empty());
}

#[test]
fn test_process_start_failure_is_audited() {
    let h = harness_with(
        [value_job("job")],
        IngestSettings::default(),
        MemoryProcessFactory::failing("autodetect binary not found"),
    );
    let err = h.processor.open_job("job", false).unwrap_err();
    match err {
        IngestError::NativeProcess { job_id, message } => {
            assert_eq!(job_id, "job");
            assert!(message.contains("autodetect binary not found"));
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(h.auditor.warnings("job").len(), 1);
    assert_eq!(h.processor.job_state("job"), JobState::Closed);
}

#[test]
fn test_flush_writes_control_messages() -> Result<()> {
    let h = harness([value_job("job")]);
    h.processor.open_job("job", false)?;
    upload(&h, "job", "time,value\n1400000000,1\n")?;

    let params = InterimResultsParams::builder()
        .calc_interim(true)
        .for_time_range("1400000000", "1400003600")
        .build()?;
    h.processor.flush_job("job", &params)?;
    h.processor.flush_job("job", &InterimResultsParams::default())?;
    assert_eq!(h.processor.job_state("job"), JobState::Open);

    let frames = h.factory.frames("job")?;
    let controls: Vec<&str> = frames[1..]
        .iter()
        .map(|f| f[2].as_str())
        .filter(|m| !m.is_empty() && !m.starts_with(' '))
        .collect();
    assert_eq!(controls, ["i1400000000 1400003600", "f1", "f2"]);
    Ok(())
}

#[test]
fn test_reset_buckets_precede_data() -> Result<()> {
    let h = harness([value_job("job")]);
    h.processor.open_job("job", false)?;
    h.processor.process_data(
        "job",
        "time,value\n1400000000,1\n".as_bytes(),
        DataLoadParams::default().with_reset(TimeRange::new(1_399_996_400, 1_400_000_000)?),
        &AtomicBool::new(false),
    )?;

    let frames = h.factory.frames("job")?;
    assert_eq!(frames[1], ["", "", "r1399996400 1400000000"]);
    assert_eq!(frames[2], ["1400000000", "1", ""]);
    Ok(())
}

#[test]
fn test_cancelled_upload_stops_before_first_record() -> Result<()> {
    let h = harness([value_job("job")]);
    h.processor.open_job("job", false)?;
    let outcome = h.processor.process_data(
        "job",
        "time,value\n1400000000,1\n".as_bytes(),
        DataLoadParams::default(),
        &AtomicBool::new(true),
    )?;
    assert!(matches!(outcome, UploadOutcome::Cancelled(_)));
    assert_eq!(outcome.counts().processed_record_count, 0);
    assert!(data_frames(&h.factory.frames("job")?).is_empty());
    Ok(())
}

/// Hands out `chunk` bytes per read and raises `cancel` on read number
/// `cancel_on`.
struct CancellingReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    reads: usize,
    cancel_on: usize,
    cancel: Arc<AtomicBool>,
}

impl Read for CancellingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads += 1;
        if self.reads == self.cancel_on {
            self.cancel.store(true, Ordering::Relaxed);
        }
        let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[test]
fn test_cancelled_mid_upload_keeps_whole_records() -> Result<()> {
    let h = harness([value_job("job")]);
    h.processor.open_job("job", false)?;

    let mut data = String::from("time,value\n");
    for i in 0..500 {
        data.push_str(&format!("{},{i}\n", 1_400_000_000 + i));
    }
    let cancel = Arc::new(AtomicBool::new(false));
    let reader = CancellingReader {
        data: data.into_bytes(),
        pos: 0,
        chunk: 64,
        reads: 0,
        cancel_on: 2,
        cancel: Arc::clone(&cancel),
    };
    let outcome = h
        .processor
        .process_data("job", reader, DataLoadParams::default(), &cancel)?;

    assert!(matches!(outcome, UploadOutcome::Cancelled(_)));
    let processed = outcome.counts().processed_record_count;
    assert!(processed > 0 && processed < 500, "processed {processed}");

    let frames = h.factory.frames("job")?;
    assert!(frames.iter().all(|frame| frame.len() == frames[0].len()));
    assert_eq!(data_frames(&frames).len() as u64, processed);

    // The job stays usable.
    let counts = upload(&h, "job", "time,value\n1400009999,1\n")?.into_result()?;
    assert_eq!(counts.processed_record_count, 1);
    Ok(())
}

#[test]
fn test_unbounded_timeouts_do_not_overflow() -> Result<()> {
    let mut settings = IngestSettings::default();
    settings.job_lock_timeout_secs = u64::MAX;
    settings.flush_ack_timeout_secs = u64::MAX;
    let h = harness_with([value_job("job")], settings, MemoryProcessFactory::new());

    h.processor.open_job("job", false)?;
    upload(&h, "job", "time,value\n1400000000,1\n")?.into_result()?;
    h.processor.flush_job("job", &InterimResultsParams::default())?;
    h.processor.close_job("job")?;
    Ok(())
}

#[test]
fn test_dead_process_fails_the_job() -> Result<()> {
    let h = harness_with(
        [value_job("job")],
        IngestSettings::default(),
        MemoryProcessFactory::with_limit(1024),
    );
    h.processor.open_job("job", false)?;

    let mut data = String::from("time,value\n");
    for i in 0..2_000 {
        data.push_str(&format!("{},{i}\n", 1_400_000_000 + i));
    }
    let err = upload(&h, "job", &data).unwrap_err();
    assert!(matches!(err, IngestError::NativeProcess { .. }));
    assert_eq!(h.processor.job_state("job"), JobState::Failed);
    assert!(!h.auditor.warnings("job").is_empty());

    assert!(matches!(
        upload(&h, "job", "time,value\n1400009999,1\n"),
        Err(IngestError::ClosedJob { .. })
    ));
    let _ = h.processor.close_job("job");
    assert_eq!(h.processor.job_state("job"), JobState::Closed);

    // A failed job can be opened again.
    h.processor.open_job("job", false)?;
    assert_eq!(h.processor.job_state("job"), JobState::Open);
    Ok(())
}

#[test]
fn test_operations_on_one_job_are_exclusive() -> Result<()> {
    let mut settings = IngestSettings::default();
    settings.job_lock_timeout_secs = 30;
    let mut job = value_job("job");
    // Every thread sends the same times.
    job.analysis.latency_secs = 3_600;
    let h = Arc::new(harness_with(
        [job],
        settings,
        MemoryProcessFactory::new(),
    ));
    h.processor.open_job("job", false)?;

    let threads = 4;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let h = Arc::clone(&h);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> anomaly_ingest::Result<u64> {
                let mut data = String::from("time,value\n");
                for i in 0..200 {
                    data.push_str(&format!("{},{t}\n", 1_400_000_000 + i));
                }
                barrier.wait();
                let counts = upload(&h, "job", &data)?.counts().clone();
                h.processor.flush_job("job", &InterimResultsParams::default())?;
                Ok(counts.processed_record_count + counts.out_of_order_timestamp_count)
            })
        })
        .collect();
    for handle in handles {
        let seen = handle.join().expect("upload thread panicked")?;
        assert_eq!(seen, 200);
    }

    // Uploads never interleave: each upload's 200 records arrive as one block.
    let values: Vec<String> = data_frames(&h.factory.frames("job")?)
        .into_iter()
        .map(|frame| frame[1].clone())
        .collect();
    assert_eq!(values.len(), threads * 200);
    for block in values.chunks(200) {
        assert!(block.iter().all(|v| v == &block[0]), "interleaved block {block:?}");
    }
    Ok(())
}

#[test]
fn test_lock_timeout_reports_job_in_use() -> Result<()> {
    use anomaly_ingest::lock::JobLocks;

    let locks = JobLocks::new(Duration::from_millis(50));
    let _held = locks.lock("job")?;
    let err = locks.lock("job").err().expect("second lock should time out");
    assert!(matches!(err, IngestError::JobInUse { ref job_id, .. } if job_id == "job"));
    // Other jobs are unaffected.
    let _other = locks.lock("other")?;
    Ok(())
}
