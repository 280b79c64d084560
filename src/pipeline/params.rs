//! Parameters of uploads and flushes.

use crate::error::{IngestError, Result};
use crate::io::ContentEncoding;
use chrono::DateTime;

/// A span of time in epoch seconds, start inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    /// Build a range, rejecting one that ends before it starts.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if `end < start`.
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if end < start {
            return Err(IngestError::config(format!(
                "time range end {end} is before its start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse both ends with [`parse_time`].
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if either end cannot be parsed or the
    /// range is inverted.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_time("start", start)?, parse_time("end", end)?)
    }
}

/// Parse a time given either as epoch seconds or as an RFC 3339 timestamp.
///
/// # Errors
///
/// Returns [`IngestError::Config`] naming `what` when `value` is neither.
pub fn parse_time(what: &str, value: &str) -> Result<i64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return Ok(secs);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp())
        .map_err(|_| {
            IngestError::config(format!(
                "{what} time '{value}' is neither epoch seconds nor an RFC 3339 timestamp"
            ))
        })
}

/// How to treat one upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataLoadParams {
    pub content_encoding: ContentEncoding,
    /// Buckets in this range are reset before the data is written.
    pub reset_range: Option<TimeRange>,
}

impl DataLoadParams {
    #[must_use]
    pub fn gzip() -> Self {
        Self {
            content_encoding: ContentEncoding::Gzip,
            reset_range: None,
        }
    }

    #[must_use]
    pub fn with_reset(mut self, range: TimeRange) -> Self {
        self.reset_range = Some(range);
        self
    }
}

/// What a flush asks the native process to do first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterimResultsParams {
    calc_interim: bool,
    range: Option<TimeRange>,
    advance_time: Option<i64>,
}

impl InterimResultsParams {
    #[must_use]
    pub fn builder() -> InterimResultsParamsBuilder {
        InterimResultsParamsBuilder::default()
    }

    #[must_use]
    pub fn should_calculate_interim(&self) -> bool {
        self.calc_interim
    }

    #[must_use]
    pub fn range(&self) -> Option<TimeRange> {
        self.range
    }

    #[must_use]
    pub fn advance_time(&self) -> Option<i64> {
        self.advance_time
    }
}

/// Builds [`InterimResultsParams`], validating the combination on
/// [`build`](InterimResultsParamsBuilder::build).
#[derive(Debug, Clone, Default)]
pub struct InterimResultsParamsBuilder {
    calc_interim: bool,
    start: Option<String>,
    end: Option<String>,
    advance_time: Option<String>,
}

impl InterimResultsParamsBuilder {
    #[must_use]
    pub fn calc_interim(mut self, calc_interim: bool) -> Self {
        self.calc_interim = calc_interim;
        self
    }

    #[must_use]
    pub fn for_time_range(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into()).filter(|s: &String| !s.is_empty());
        self.end = Some(end.into()).filter(|s: &String| !s.is_empty());
        self
    }

    #[must_use]
    pub fn advance_time(mut self, time: impl Into<String>) -> Self {
        self.advance_time = Some(time.into()).filter(|s: &String| !s.is_empty());
        self
    }

    /// # Errors
    ///
    /// Returns [`IngestError::Config`] when a range is given without
    /// `calc_interim`, only one end of the range is given, or a time cannot
    /// be parsed.
    pub fn build(self) -> Result<InterimResultsParams> {
        let range = match (self.start, self.end) {
            (None, None) => None,
            (Some(start), Some(end)) => Some(TimeRange::parse(&start, &end)?),
            (Some(_), None) => {
                return Err(IngestError::config("interim results range has a start but no end"));
            }
            (None, Some(_)) => {
                return Err(IngestError::config("interim results range has an end but no start"));
            }
        };
        if range.is_some() && !self.calc_interim {
            return Err(IngestError::config(
                "a time range can only be given when calculating interim results",
            ));
        }
        let advance_time = self
            .advance_time
            .map(|t| parse_time("advance", &t))
            .transpose()?;
        Ok(InterimResultsParams {
            calc_interim: self.calc_interim,
            range,
            advance_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("start", "1400000000").unwrap(), 1_400_000_000);
        assert_eq!(parse_time("start", "1970-01-01T00:01:00Z").unwrap(), 60);
        assert!(parse_time("start", "yesterday").is_err());
    }

    #[test]
    fn test_builder_validation() {
        let params = InterimResultsParams::builder()
            .calc_interim(true)
            .for_time_range("100", "200")
            .build()
            .unwrap();
        assert_eq!(params.range(), Some(TimeRange { start: 100, end: 200 }));

        assert!(InterimResultsParams::builder()
            .for_time_range("100", "200")
            .build()
            .is_err());
        assert!(InterimResultsParams::builder()
            .calc_interim(true)
            .for_time_range("100", "")
            .build()
            .is_err());
        assert!(InterimResultsParams::builder()
            .calc_interim(true)
            .for_time_range("200", "100")
            .build()
            .is_err());

        let params = InterimResultsParams::builder()
            .advance_time("1970-01-01T00:00:10Z")
            .build()
            .unwrap();
        assert_eq!(params.advance_time(), Some(10));
        assert!(!params.should_calculate_interim());
    }
}
