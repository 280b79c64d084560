//! Settings and per-job configuration.
//!
//! Two layers of configuration feed the pipeline:
//!
//! - [`IngestSettings`] are process-wide tuning knobs (report cadence, pipe
//!   connect timeout, data-quality thresholds). They are plain values threaded
//!   through constructors and can be loaded from TOML.
//! - [`JobConfig`] describes one job: how its input is encoded, which fields the
//!   analysis needs and which transforms derive them. It is read-only to this
//!   crate and is validated when the job opens.
//!
//! # Example
//!
//! ```
//! use anomaly_ingest::config::IngestSettings;
//!
//! let settings = IngestSettings::from_toml_str(r#"
//!     usage_report_interval_secs = 60
//!
//!     [thresholds]
//!     max_percent_date_parse_errors = 10
//! "#).unwrap();
//!
//! assert_eq!(settings.usage_report_interval_secs, 60);
//! assert_eq!(settings.thresholds.max_percent_out_of_order_errors, 25);
//! ```

use crate::error::{IngestError, Result};
use crate::transform::{DateFormat, TransformConfig, TransformPlan};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Process-wide ingestion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Seconds between two persisted usage reports.
    pub usage_report_interval_secs: u64,
    /// Upper bound on waiting for the native process to create its pipes.
    pub pipe_connect_timeout_secs: u64,
    /// Pause between two pipe connect attempts.
    pub pipe_retry_interval_ms: u64,
    /// How long a flush waits for the native process to acknowledge it.
    pub flush_ack_timeout_secs: u64,
    /// How long an operation waits for another operation on the same job.
    pub job_lock_timeout_secs: u64,
    pub thresholds: QualityThresholds,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            usage_report_interval_secs: Self::DEFAULT_USAGE_REPORT_INTERVAL_SECS,
            pipe_connect_timeout_secs: 10,
            pipe_retry_interval_ms: 50,
            flush_ack_timeout_secs: 30,
            job_lock_timeout_secs: 600,
            thresholds: QualityThresholds::default(),
        }
    }
}

impl IngestSettings {
    pub const DEFAULT_USAGE_REPORT_INTERVAL_SECS: u64 = 300;

    /// Parse settings from a TOML document; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if the document is not valid TOML or has
    /// values of the wrong type.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| IngestError::config(format!("cannot parse settings: {e}")))
    }

    /// Load settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Ok(Self::from_toml_str(&text)?)
    }

    #[must_use]
    pub fn usage_report_interval(&self) -> Duration {
        Duration::from_secs(self.usage_report_interval_secs)
    }

    #[must_use]
    pub fn pipe_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.pipe_connect_timeout_secs)
    }

    #[must_use]
    pub fn pipe_retry_interval(&self) -> Duration {
        Duration::from_millis(self.pipe_retry_interval_ms)
    }

    #[must_use]
    pub fn flush_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_ack_timeout_secs)
    }

    #[must_use]
    pub fn job_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.job_lock_timeout_secs)
    }
}

/// Proportional limits on bad records, as whole percentages.
///
/// An upload fails once the percentage of affected records is strictly greater
/// than the limit, so `10` tolerates 10 bad records in 100 but not 11.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub max_percent_date_parse_errors: u64,
    pub max_percent_out_of_order_errors: u64,
    /// Percentage of expected fields that were absent. 100 disables the check.
    pub max_percent_missing_fields: u64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            max_percent_date_parse_errors: 25,
            max_percent_out_of_order_errors: 25,
            max_percent_missing_fields: 100,
        }
    }
}

/// Encoding of the records in an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    /// Delimited text with a header row.
    #[default]
    Delimited,
    /// A stream of JSON objects.
    Json,
}

/// How the input records are laid out and where their timestamp lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataDescription {
    pub format: DataFormat,
    pub time_field: String,
    /// `epoch`, `epoch_ms` or a date/time pattern such as `yyyy-MM-dd HH:mm:ss`.
    pub time_format: String,
    pub field_delimiter: char,
    pub quote_character: char,
}

impl Default for DataDescription {
    fn default() -> Self {
        Self {
            format: DataFormat::Delimited,
            time_field: "time".to_string(),
            time_format: DateFormat::EPOCH.to_string(),
            field_delimiter: ',',
            quote_character: '"',
        }
    }
}

/// The fields the analysis consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub analysis_fields: Vec<String>,
    /// Records may arrive this many seconds late before they count as out of order.
    pub latency_secs: u64,
}

/// Everything the pipeline needs to know about one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub job_id: String,
    pub data_description: DataDescription,
    pub analysis: AnalysisConfig,
    pub transforms: Vec<TransformConfig>,
}

impl JobConfig {
    #[must_use]
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Self::default()
        }
    }

    /// Check that this configuration can ever produce records.
    ///
    /// Compiles the time format, verifies each transform and orders them by
    /// their dependencies, so every configuration error surfaces before the
    /// job opens.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] or [`IngestError::ParseTimestamp`].
    pub fn validate(&self) -> Result<TransformPlan> {
        if self.job_id.is_empty() {
            return Err(IngestError::config("job id must not be empty"));
        }
        if self.data_description.time_field.is_empty() {
            return Err(IngestError::config("time field must not be empty"));
        }
        TransformPlan::new(self)
    }
}
