//! Delimited text input.
//!
//! The first row is the header. Rows may be shorter or longer than the
//! header: missing trailing fields are read as empty and flagged absent, extra
//! fields are ignored.

use super::RecordSource;
use crate::config::DataDescription;
use crate::error::{IngestError, Result};
use csv::{ReaderBuilder, StringRecord};
use std::io::Read;

/// Reads delimited records with the `csv` crate.
pub struct CsvRecordSource<R: Read> {
    reader: csv::Reader<R>,
    header: Vec<String>,
    record: StringRecord,
}

impl<R: Read> CsvRecordSource<R> {
    /// Read the header row of `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if the delimiter or quote is not a
    /// single byte, and [`IngestError::Csv`] if the header cannot be read.
    pub fn new(reader: R, description: &DataDescription) -> Result<Self> {
        let delimiter = single_byte("field delimiter", description.field_delimiter)?;
        let quote = single_byte("quote character", description.quote_character)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(delimiter)
            .quote(quote)
            .from_reader(reader);
        let header = reader.headers()?.iter().map(str::to_string).collect();
        Ok(Self {
            reader,
            header,
            record: StringRecord::new(),
        })
    }
}

impl<R: Read> RecordSource for CsvRecordSource<R> {
    fn header(&self) -> &[String] {
        &self.header
    }

    fn next_record(&mut self, input: &mut [String], present: &mut [bool]) -> Result<Option<u64>> {
        if !self.reader.read_record(&mut self.record)? {
            return Ok(None);
        }
        for (i, (slot, flag)) in input.iter_mut().zip(present.iter_mut()).enumerate() {
            slot.clear();
            match self.record.get(i) {
                Some(value) => {
                    slot.push_str(value);
                    *flag = true;
                }
                None => *flag = false,
            }
        }
        Ok(Some(self.record.len() as u64))
    }
}

fn single_byte(what: &str, c: char) -> Result<u8> {
    u8::try_from(c)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| IngestError::config(format!("{what} '{c}' must be a single ASCII character")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_rows_flag_missing_fields() {
        let data = "time,airline,value\n1,AAL,3\n2,UAL\n";
        let mut src = CsvRecordSource::new(data.as_bytes(), &DataDescription::default()).unwrap();
        assert_eq!(src.header(), &["time", "airline", "value"]);

        let mut input = vec![String::new(); 3];
        let mut present = vec![false; 3];
        assert_eq!(src.next_record(&mut input, &mut present).unwrap(), Some(3));
        assert_eq!(present, vec![true, true, true]);

        assert_eq!(src.next_record(&mut input, &mut present).unwrap(), Some(2));
        assert_eq!(input, vec!["2", "UAL", ""]);
        assert_eq!(present, vec![true, true, false]);

        assert_eq!(src.next_record(&mut input, &mut present).unwrap(), None);
    }

    #[test]
    fn test_custom_delimiter_and_quote() {
        let description = DataDescription {
            field_delimiter: '|',
            quote_character: '\'',
            ..DataDescription::default()
        };
        let data = "time|msg\n1|'a|b'\n";
        let mut src = CsvRecordSource::new(data.as_bytes(), &description).unwrap();
        let mut input = vec![String::new(); 2];
        let mut present = vec![false; 2];
        src.next_record(&mut input, &mut present).unwrap();
        assert_eq!(input, vec!["1", "a|b"]);
    }

    #[test]
    fn test_non_ascii_delimiter_rejected() {
        let description = DataDescription {
            field_delimiter: '→',
            ..DataDescription::default()
        };
        assert!(CsvRecordSource::new("".as_bytes(), &description).is_err());
    }
}
