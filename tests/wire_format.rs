use anomaly_ingest::process::ControlMessageWriter;
use anomaly_ingest::testing::decode_frames;
use anomaly_ingest::wire::{CONTROL_FIELD_NAME, LengthEncodedReader, LengthEncodedWriter};
use anomaly_ingest::{InterimResultsParams, TimeRange};
use anyhow::Result;
use std::io;

fn encode(records: &[Vec<&str>]) -> Result<Vec<u8>> {
    let mut writer = LengthEncodedWriter::new(Vec::new());
    for record in records {
        writer.write_record(record)?;
    }
    Ok(writer.into_inner())
}

#[test]
fn test_header_bytes_are_big_endian() -> Result<()> {
    let bytes = encode(&[vec!["ab", "."]])?;
    assert_eq!(
        bytes,
        [0, 0, 0, 2, 0, 0, 0, 2, b'a', b'b', 0, 0, 0, 1, b'.']
    );
    Ok(())
}

#[test]
fn test_zero_field_frames() -> Result<()> {
    let bytes = encode(&[vec![], vec![]])?;
    assert_eq!(bytes, [0, 0, 0, 0, 0, 0, 0, 0]);
    let frames = decode_frames(&bytes)?;
    assert_eq!(frames, vec![Vec::<String>::new(), Vec::new()]);
    Ok(())
}

#[test]
fn test_awkward_text_survives() -> Result<()> {
    let records = vec![
        vec!["time", "msg", CONTROL_FIELD_NAME],
        vec!["1", "", ""],
        vec!["2", "línea\nnueva, \"quoted\"\t\0", ""],
        vec!["3", "日本語 🚀", ""],
    ];
    let frames = decode_frames(&encode(&records)?)?;
    assert_eq!(frames, records);
    Ok(())
}

#[test]
fn test_length_counts_bytes_not_chars() -> Result<()> {
    let bytes = encode(&[vec!["é"]])?;
    assert_eq!(&bytes[4..8], &[0, 0, 0, 2]);
    Ok(())
}

#[test]
fn test_field_count_is_fixed_by_header() -> Result<()> {
    let mut writer = LengthEncodedWriter::new(Vec::new());
    writer.write_record(&["time", "value", "."])?;
    let err = writer.write_record(&["1", "2"]).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    Ok(())
}

#[test]
fn test_truncated_stream_is_an_error() -> Result<()> {
    let bytes = encode(&[vec!["time", "value"]])?;
    let mut reader = LengthEncodedReader::new(&bytes[..bytes.len() - 1]);
    let err = reader.read_record().unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    Ok(())
}

#[test]
fn test_control_messages_after_header() -> Result<()> {
    let mut writer = LengthEncodedWriter::new(Vec::new());
    writer.write_record(&["time", "value", CONTROL_FIELD_NAME])?;

    let params = InterimResultsParams::builder()
        .calc_interim(true)
        .advance_time("1400000300")
        .build()?;
    let mut control = ControlMessageWriter::new(&mut writer);
    control.write_reset_buckets_message(TimeRange::new(100, 200)?)?;
    control.write_calc_interim_message(&params)?;
    control.write_flush_message("7")?;

    let frames = decode_frames(&writer.into_inner())?;
    let messages: Vec<&str> = frames[1..].iter().map(|f| f[2].as_str()).collect();
    assert_eq!(messages[..4], ["r100 200", "i", "t1400000300", "f7"]);
    assert_eq!(messages[4].len(), 8192);
    assert!(messages[4].chars().all(|c| c == ' '));
    for frame in &frames[1..] {
        assert_eq!(frame[..2], ["", ""]);
    }
    Ok(())
}

#[test]
fn test_control_message_needs_header() {
    let mut writer = LengthEncodedWriter::new(Vec::new());
    let err = ControlMessageWriter::new(&mut writer)
        .write_flush_message("1")
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
}
