mod common;

use anomaly_ingest::config::{DataFormat, IngestSettings};
use anomaly_ingest::testing::MemoryProcessFactory;
use anomaly_ingest::{ContentEncoding, DataLoadParams, IngestError, JobConfig, UploadOutcome};
use anyhow::Result;
use common::{Harness, data_frames, harness, harness_with, value_job};
use std::sync::atomic::AtomicBool;

fn open_and_upload(h: &Harness, data: &[u8], params: DataLoadParams) -> anomaly_ingest::Result<UploadOutcome> {
    h.processor.open_job("job", false)?;
    h.processor
        .process_data("job", data, params, &AtomicBool::new(false))
}

fn json_job() -> JobConfig {
    let mut job = JobConfig::new("job");
    job.data_description.format = DataFormat::Json;
    job.data_description.time_field = "timestamp".to_string();
    job.analysis.analysis_fields = vec!["host.name".to_string(), "bytes".to_string()];
    job
}

#[test]
fn test_csv_missing_header_field() -> Result<()> {
    let h = harness([value_job("job")]);
    let err = open_and_upload(&h, b"time,other\n1400000000,1\n", DataLoadParams::default())
        .unwrap_err();
    assert!(matches!(err, IngestError::MissingField { ref field } if field == "value"));
    assert_eq!(
        err.to_string(),
        "field 'value' is configured but missing from the input header"
    );
    // The job stays usable.
    let counts = h
        .processor
        .process_data(
            "job",
            "time,value\n1400000000,1\n".as_bytes(),
            DataLoadParams::default(),
            &AtomicBool::new(false),
        )?
        .into_result()?;
    assert_eq!(counts.processed_record_count, 1);
    Ok(())
}

#[test]
fn test_csv_extra_columns_and_order() -> Result<()> {
    let h = harness([value_job("job")]);
    let data = "host,value,time,ignored\nweb1,7,1400000000,x\n";
    open_and_upload(&h, data.as_bytes(), DataLoadParams::default())?;
    let frames = h.factory.frames("job")?;
    assert_eq!(data_frames(&frames), [["1400000000", "7", ""]]);
    Ok(())
}

#[test]
fn test_csv_custom_delimiter() -> Result<()> {
    let mut job = value_job("job");
    job.data_description.field_delimiter = '\t';
    let h = harness([job]);
    open_and_upload(&h, b"time\tvalue\n1400000000\ta,b\n", DataLoadParams::default())?;
    assert_eq!(data_frames(&h.factory.frames("job")?), [["1400000000", "a,b", ""]]);
    Ok(())
}

#[test]
fn test_json_objects_are_flattened() -> Result<()> {
    let h = harness([json_job()]);
    let data = r#"
        {"timestamp": 1400000000, "host": {"name": "web1"}, "bytes": 512}
        {"timestamp": 1400000060, "host": {"name": "web2", "ip": "10.0.0.2"}, "bytes": null}
    "#;
    let counts = open_and_upload(&h, data.as_bytes(), DataLoadParams::default())?.into_result()?;
    assert_eq!(counts.processed_record_count, 2);
    assert_eq!(counts.missing_field_count, 1);
    assert_eq!(counts.input_field_count, 3 + 3);

    let frames = h.factory.frames("job")?;
    assert_eq!(frames[0], ["timestamp", "bytes", "host.name", "."]);
    assert_eq!(
        data_frames(&frames),
        [
            ["1400000000", "512", "web1", ""],
            ["1400000060", "", "web2", ""]
        ]
    );
    Ok(())
}

#[test]
fn test_malformed_json() -> Result<()> {
    let h = harness([json_job()]);
    let data = r#"{"timestamp": 1400000000, "host": {"name": "web1"}, "bytes": 1} {"timestamp": 14"#;
    let err = open_and_upload(&h, data.as_bytes(), DataLoadParams::default()).unwrap_err();
    assert!(matches!(err, IngestError::MalformedJson(_)), "got {err}");
    Ok(())
}

#[test]
fn test_json_array_is_not_a_record() {
    let h = harness([json_job()]);
    let err = open_and_upload(&h, b"[1, 2]", DataLoadParams::default()).unwrap_err();
    match err {
        IngestError::MalformedJson(message) => {
            assert_eq!(message, "expected a JSON object but found an array");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[cfg(feature = "compression-gzip")]
mod gzip {
    use super::*;
    use anomaly_ingest::testing::gzip;

    #[test]
    fn test_gzip_upload() -> Result<()> {
        let h = harness([value_job("job")]);
        let plain = "time,value\n1400000000,1\n1400000060,2\n";
        let counts = open_and_upload(&h, &gzip(plain.as_bytes())?, DataLoadParams::gzip())?
            .into_result()?;
        assert_eq!(counts.processed_record_count, 2);
        // Bytes are counted after decompression.
        assert_eq!(counts.input_bytes, plain.len() as u64);
        Ok(())
    }

    #[test]
    fn test_plain_body_flagged_as_gzip() {
        let h = harness([value_job("job")]);
        let err = open_and_upload(&h, b"time,value\n1400000000,1\n", DataLoadParams::gzip())
            .unwrap_err();
        assert!(matches!(err, IngestError::GzipDecompression(_)), "got {err}");
    }

    #[test]
    fn test_corrupt_gzip_stream() -> Result<()> {
        let h = harness([value_job("job")]);
        let mut plain = String::from("time,value\n");
        for i in 0..500 {
            plain.push_str(&format!("{},{i}\n", 1_400_000_000 + i));
        }
        let compressed = gzip(plain.as_bytes())?;
        let truncated = &compressed[..compressed.len() / 2];
        let err = open_and_upload(&h, truncated, DataLoadParams::gzip()).unwrap_err();
        assert!(matches!(err, IngestError::GzipDecompression(_)), "got {err}");
        Ok(())
    }

    #[test]
    fn test_gzip_header_value() -> Result<()> {
        assert_eq!(ContentEncoding::from_header(Some("GZIP"))?, ContentEncoding::Gzip);
        assert_eq!(ContentEncoding::from_header(None)?, ContentEncoding::Identity);
        assert!(ContentEncoding::from_header(Some("br")).is_err());
        Ok(())
    }
}

#[test]
fn test_custom_settings_do_not_affect_parsing() -> Result<()> {
    let settings = IngestSettings::from_toml_str("usage_report_interval_secs = 1")?;
    let h = harness_with([value_job("job")], settings, MemoryProcessFactory::new());
    let counts = open_and_upload(&h, b"time,value\n1400000000,1\n", DataLoadParams::default())?
        .into_result()?;
    assert_eq!(counts.processed_record_count, 1);
    Ok(())
}
