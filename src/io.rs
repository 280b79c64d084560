//! Decoding upload bodies into records.
//!
//! An upload is a byte stream, possibly gzip encoded, holding either delimited
//! text with a header row or a stream of JSON objects. This module turns it
//! into records of strings for the transform chain:
//!
//! - [`compression`] checks and strips the gzip layer,
//! - [`counting`] measures the decoded bytes for the usage reports,
//! - [`csv`] and [`json`] implement [`RecordSource`] for each format.

pub mod compression;
pub mod counting;

#[cfg_attr(docsrs, doc(cfg(feature = "io-csv")))]
#[cfg(feature = "io-csv")]
pub mod csv;

#[cfg_attr(docsrs, doc(cfg(feature = "io-json")))]
#[cfg(feature = "io-json")]
pub mod json;

pub use compression::{ContentEncoding, DecodeFailure};
pub use counting::{ByteCounter, CountingReader};

use crate::config::{DataDescription, DataFormat};
use crate::error::{IngestError, Result};
use std::io::Read;

/// A stream of records sharing one header.
pub trait RecordSource {
    /// Field names, in the order [`next_record`](Self::next_record) fills them.
    fn header(&self) -> &[String];

    /// Read the next record into `input`, one slot per header field.
    ///
    /// Slots with no value are set empty and flagged `false` in `present`.
    /// Returns the number of fields the record actually held, or `None` at the
    /// end of the stream.
    ///
    /// # Errors
    ///
    /// Returns an error when the stream is malformed or cannot be read.
    fn next_record(&mut self, input: &mut [String], present: &mut [bool]) -> Result<Option<u64>>;
}

/// Open the record source for `description`.
///
/// `wanted_fields` names the fields a JSON source extracts from each object;
/// delimited input takes its header from the first row instead.
///
/// # Errors
///
/// Returns an error if the header row cannot be read or the format is not
/// compiled in.
pub fn record_source<'a, R: Read + 'a>(
    reader: R,
    description: &DataDescription,
    wanted_fields: &[String],
) -> Result<Box<dyn RecordSource + 'a>> {
    match description.format {
        #[cfg(feature = "io-csv")]
        DataFormat::Delimited => Ok(Box::new(csv::CsvRecordSource::new(reader, description)?)),
        #[cfg(feature = "io-json")]
        DataFormat::Json => Ok(Box::new(json::JsonRecordSource::new(
            reader,
            wanted_fields.to_vec(),
        ))),
        #[allow(unreachable_patterns)]
        other => {
            let _ = (reader, wanted_fields);
            Err(IngestError::config(format!(
                "input format {other:?} is not enabled in this build"
            )))
        }
    }
}
