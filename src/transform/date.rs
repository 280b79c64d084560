//! Timestamp normalisation.
//!
//! The native process expects the first field of every record to hold the
//! record time as whole epoch seconds. [`DateTransform`] reads the configured
//! time field, converts it according to the job's [`DateFormat`], writes the
//! seconds and remembers the epoch in milliseconds for the ordering checks
//! done by the writer.

use super::{Transform, TransformArrays, TransformIndex, TransformResult, TimePattern};
use crate::error::{IngestError, Result};

/// How the time field is encoded in the input.
#[derive(Debug, Clone)]
pub enum DateFormat {
    /// Seconds since the epoch, possibly fractional.
    Epoch,
    /// Milliseconds since the epoch, possibly fractional.
    EpochMs,
    /// A date/time pattern.
    Pattern(TimePattern),
}

impl DateFormat {
    pub const EPOCH: &'static str = "epoch";
    pub const EPOCH_MS: &'static str = "epoch_ms";

    /// Interpret a configured time format.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if `format` is neither `epoch`,
    /// `epoch_ms` nor a usable pattern.
    pub fn from_config(format: &str) -> Result<Self> {
        match format {
            Self::EPOCH => Ok(DateFormat::Epoch),
            Self::EPOCH_MS => Ok(DateFormat::EpochMs),
            "" => Err(IngestError::config("time format must not be empty")),
            pattern => Ok(DateFormat::Pattern(TimePattern::compile(pattern)?)),
        }
    }

    /// Convert `value` to epoch milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ParseTimestamp`] describing the value that could
    /// not be converted.
    pub fn to_epoch_ms(&self, value: &str) -> Result<i64> {
        match self {
            DateFormat::Epoch => parse_epoch(value).map(|v| (v * 1000.0) as i64),
            DateFormat::EpochMs => parse_epoch(value).map(|v| v as i64),
            DateFormat::Pattern(pattern) => pattern.parse_epoch_ms(value).ok_or_else(|| {
                IngestError::ParseTimestamp(format!(
                    "Cannot parse date '{value}' with format '{}'",
                    pattern.pattern()
                ))
            }),
        }
    }

    /// Convert `value` to whole epoch seconds, truncating toward zero.
    ///
    /// # Errors
    ///
    /// See [`DateFormat::to_epoch_ms`].
    pub fn to_epoch_secs(&self, value: &str) -> Result<i64> {
        match self {
            DateFormat::Epoch => parse_epoch(value).map(|v| v as i64),
            DateFormat::EpochMs => parse_epoch(value).map(|v| (v / 1000.0) as i64),
            DateFormat::Pattern(_) => self.to_epoch_ms(value).map(|ms| ms / 1000),
        }
    }
}

fn parse_epoch(value: &str) -> Result<f64> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(IngestError::ParseTimestamp(format!(
            "Cannot parse timestamp '{value}' as epoch value"
        ))),
    }
}

/// Converts the time field to epoch seconds.
#[derive(Debug, Clone)]
pub struct DateTransform {
    format: DateFormat,
    reads: [TransformIndex; 1],
    writes: [TransformIndex; 1],
    epoch_ms: i64,
}

impl DateTransform {
    /// Build a date transform.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ParseTimestamp`] unless exactly one read index and
    /// one write index are given.
    pub fn new(
        format: DateFormat,
        reads: &[TransformIndex],
        writes: &[TransformIndex],
    ) -> Result<Self> {
        match (reads, writes) {
            ([read], [write]) => Ok(Self {
                format,
                reads: [*read],
                writes: [*write],
                epoch_ms: 0,
            }),
            ([], _) => Err(IngestError::ParseTimestamp(
                "date transform has no field to read".to_string(),
            )),
            (_, []) => Err(IngestError::ParseTimestamp(
                "date transform has no field to write".to_string(),
            )),
            _ => Err(IngestError::ParseTimestamp(format!(
                "date transform needs exactly one input and one output, got {} and {}",
                reads.len(),
                writes.len()
            ))),
        }
    }

    /// Pattern based transform reading `read` and writing `write`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if the pattern cannot yield a timestamp.
    pub fn pattern(pattern: &str, read: TransformIndex, write: TransformIndex) -> Result<Self> {
        Self::new(
            DateFormat::Pattern(TimePattern::compile(pattern)?),
            &[read],
            &[write],
        )
    }

    /// Numeric transform; `is_millisecond` selects between `epoch_ms` and `epoch`.
    #[must_use]
    pub fn epoch(is_millisecond: bool, read: TransformIndex, write: TransformIndex) -> Self {
        let format = if is_millisecond {
            DateFormat::EpochMs
        } else {
            DateFormat::Epoch
        };
        Self {
            format,
            reads: [read],
            writes: [write],
            epoch_ms: 0,
        }
    }

    /// Epoch milliseconds of the last record successfully transformed.
    #[must_use]
    pub fn epoch_ms(&self) -> i64 {
        self.epoch_ms
    }

    #[must_use]
    pub fn format(&self) -> &DateFormat {
        &self.format
    }
}

impl Transform for DateTransform {
    fn apply(&mut self, arrays: &mut TransformArrays) -> Result<TransformResult> {
        let value = arrays.get(self.reads[0]).ok_or_else(|| {
            IngestError::ParseTimestamp("Cannot parse null string".to_string())
        })?;

        let epoch_ms = self.format.to_epoch_ms(value)?;
        let epoch_secs = self.format.to_epoch_secs(value)?;
        self.epoch_ms = epoch_ms;
        arrays.set(self.writes[0], epoch_secs.to_string());
        Ok(TransformResult::Ok)
    }

    fn read_indexes(&self) -> &[TransformIndex] {
        &self.reads
    }

    fn write_indexes(&self) -> &[TransformIndex] {
        &self.writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrays_with(value: &str) -> TransformArrays {
        let mut arrays = TransformArrays::new(1, 0, 1);
        arrays.input[0] = value.to_string();
        arrays
    }

    #[test]
    fn test_pattern_transform() {
        let mut tr = DateTransform::pattern(
            "yyyy-MM-dd HH:mm:ss.SSSXXX",
            TransformIndex::input(0),
            TransformIndex::output(0),
        )
        .unwrap();
        let mut arrays = arrays_with("2014-01-01 13:42:56.500Z");

        assert_eq!(tr.apply(&mut arrays).unwrap(), TransformResult::Ok);
        assert_eq!(tr.epoch_ms(), 1_388_583_776_500);
        assert_eq!(arrays.output[0], "1388583776");
    }

    #[test]
    fn test_pattern_transform_bad_value() {
        let mut tr = DateTransform::pattern(
            "yyyy-MM-dd HH:mm:ss",
            TransformIndex::input(0),
            TransformIndex::output(0),
        )
        .unwrap();
        let err = tr.apply(&mut arrays_with("yesterday")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot parse date 'yesterday' with format 'yyyy-MM-dd HH:mm:ss'"
        );
    }

    #[test]
    fn test_epoch_seconds() {
        let mut tr = DateTransform::epoch(false, TransformIndex::input(0), TransformIndex::output(0));
        let mut arrays = arrays_with("1000");
        tr.apply(&mut arrays).unwrap();
        assert_eq!(arrays.output[0], "1000");
        assert_eq!(tr.epoch_ms(), 1_000_000);
    }

    #[test]
    fn test_epoch_millis_truncates() {
        let mut tr = DateTransform::epoch(true, TransformIndex::input(0), TransformIndex::output(0));
        let mut arrays = arrays_with("1000");
        tr.apply(&mut arrays).unwrap();
        assert_eq!(arrays.output[0], "1");

        let mut arrays = arrays_with("1999.9");
        tr.apply(&mut arrays).unwrap();
        assert_eq!(arrays.output[0], "1");
        assert_eq!(tr.epoch_ms(), 1999);
    }

    #[test]
    fn test_epoch_invalid() {
        let mut tr = DateTransform::epoch(false, TransformIndex::input(0), TransformIndex::output(0));
        let err = tr.apply(&mut arrays_with("invalid")).unwrap_err();
        assert_eq!(err.to_string(), "Cannot parse timestamp 'invalid' as epoch value");
    }

    #[test]
    fn test_index_arity_is_checked() {
        let err = DateTransform::new(DateFormat::Epoch, &[], &[TransformIndex::output(0)]);
        assert!(matches!(err, Err(IngestError::ParseTimestamp(_))));

        let err = DateTransform::new(
            DateFormat::Epoch,
            &[TransformIndex::input(0), TransformIndex::input(1)],
            &[TransformIndex::output(0)],
        );
        assert!(matches!(err, Err(IngestError::ParseTimestamp(_))));
    }

    #[test]
    fn test_missing_read_slot() {
        let mut tr = DateTransform::epoch(false, TransformIndex::input(5), TransformIndex::output(0));
        let err = tr.apply(&mut arrays_with("1")).unwrap_err();
        assert!(matches!(err, IngestError::ParseTimestamp(_)));
    }
}
