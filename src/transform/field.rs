//! Configurable field transforms and the registry of transform kinds.

use super::matcher;
use super::{Transform, TransformArrays, TransformIndex, TransformResult};
use crate::error::{IngestError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A transform as it appears in a job configuration.
///
/// ```
/// use anomaly_ingest::transform::TransformConfig;
///
/// let tc = TransformConfig::new("concat")
///     .with_inputs(["host", "metric"])
///     .with_outputs(["host_metric"])
///     .with_arguments(["."]);
/// assert_eq!(tc.inputs.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub transform: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub arguments: Vec<String>,
}

impl TransformConfig {
    #[must_use]
    pub fn new(transform: impl Into<String>) -> Self {
        Self {
            transform: transform.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }
}

/// Every transform kind a job may configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    Concat,
    Uppercase,
    Lowercase,
    Trim,
    Extract,
    Split,
    Exclude,
}

/// How many of something a transform kind accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    const fn exactly(n: usize) -> Self {
        Self { min: n, max: Some(n) }
    }

    const fn at_least(n: usize) -> Self {
        Self { min: n, max: None }
    }

    const fn between(min: usize, max: usize) -> Self {
        Self { min, max: Some(max) }
    }

    fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.is_none_or(|max| n <= max)
    }
}

impl TransformKind {
    const ALL: [TransformKind; 7] = [
        TransformKind::Concat,
        TransformKind::Uppercase,
        TransformKind::Lowercase,
        TransformKind::Trim,
        TransformKind::Extract,
        TransformKind::Split,
        TransformKind::Exclude,
    ];

    /// Look a kind up by its configured name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            TransformKind::Concat => "concat",
            TransformKind::Uppercase => "uppercase",
            TransformKind::Lowercase => "lowercase",
            TransformKind::Trim => "trim",
            TransformKind::Extract => "extract",
            TransformKind::Split => "split",
            TransformKind::Exclude => "exclude",
        }
    }

    #[must_use]
    pub const fn inputs(self) -> Arity {
        match self {
            TransformKind::Concat => Arity::at_least(1),
            _ => Arity::exactly(1),
        }
    }

    #[must_use]
    pub const fn outputs(self) -> Arity {
        match self {
            TransformKind::Concat
            | TransformKind::Uppercase
            | TransformKind::Lowercase
            | TransformKind::Trim => Arity::exactly(1),
            TransformKind::Extract | TransformKind::Split => Arity::at_least(1),
            TransformKind::Exclude => Arity::exactly(0),
        }
    }

    #[must_use]
    pub const fn arguments(self) -> Arity {
        match self {
            TransformKind::Concat => Arity::between(0, 1),
            TransformKind::Uppercase | TransformKind::Lowercase | TransformKind::Trim => {
                Arity::exactly(0)
            }
            TransformKind::Extract | TransformKind::Split | TransformKind::Exclude => {
                Arity::exactly(1)
            }
        }
    }

    /// Check `config` against this kind and compile it.
    ///
    /// Single-output kinds default their output name to the kind's name.
    /// The returned config has its outputs filled in.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] when the number of inputs, outputs or
    /// arguments is wrong or a regex argument does not compile.
    pub fn verify(self, config: &TransformConfig) -> Result<(TransformConfig, FieldOp)> {
        let mut config = config.clone();
        if config.outputs.is_empty() && self.outputs() == Arity::exactly(1) {
            config.outputs.push(self.name().to_string());
        }

        let name = self.name();
        check_arity(name, "inputs", self.inputs(), config.inputs.len())?;
        check_arity(name, "outputs", self.outputs(), config.outputs.len())?;
        check_arity(name, "arguments", self.arguments(), config.arguments.len())?;
        if config.inputs.iter().chain(&config.outputs).any(String::is_empty) {
            return Err(IngestError::config(format!(
                "transform '{name}' has an empty field name"
            )));
        }

        let op = match self {
            TransformKind::Concat => FieldOp::Concat {
                delimiter: config.arguments.first().cloned().unwrap_or_default(),
            },
            TransformKind::Uppercase => FieldOp::Uppercase,
            TransformKind::Lowercase => FieldOp::Lowercase,
            TransformKind::Trim => FieldOp::Trim,
            TransformKind::Extract => {
                let re = compile_regex(name, &config.arguments[0])?;
                let groups = re.captures_len() - 1;
                if groups != config.outputs.len() {
                    return Err(IngestError::config(format!(
                        "transform 'extract' regex '{}' has {groups} capture groups but {} outputs",
                        config.arguments[0],
                        config.outputs.len()
                    )));
                }
                FieldOp::Extract(re)
            }
            TransformKind::Split => FieldOp::Split(compile_regex(name, &config.arguments[0])?),
            TransformKind::Exclude => {
                FieldOp::Exclude(compile_regex(name, &config.arguments[0])?)
            }
        };
        Ok((config, op))
    }
}

fn check_arity(name: &str, what: &str, arity: Arity, got: usize) -> Result<()> {
    if arity.accepts(got) {
        return Ok(());
    }
    let expected = match arity.max {
        Some(max) if max == arity.min => format!("{max}"),
        Some(max) => format!("{} to {max}", arity.min),
        None => format!("at least {}", arity.min),
    };
    Err(IngestError::config(format!(
        "transform '{name}' expects {expected} {what} but {got} were configured"
    )))
}

fn compile_regex(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        IngestError::config(format!("transform '{name}' has invalid regex '{pattern}': {e}"))
    })
}

/// The operation a [`FieldTransform`] performs.
#[derive(Debug, Clone)]
pub enum FieldOp {
    Concat { delimiter: String },
    Uppercase,
    Lowercase,
    Trim,
    Extract(Regex),
    Split(Regex),
    Exclude(Regex),
}

/// A configured transform bound to concrete array positions.
#[derive(Debug, Clone)]
pub struct FieldTransform {
    op: FieldOp,
    reads: Vec<TransformIndex>,
    writes: Vec<TransformIndex>,
}

impl FieldTransform {
    #[must_use]
    pub fn new(op: FieldOp, reads: Vec<TransformIndex>, writes: Vec<TransformIndex>) -> Self {
        Self { op, reads, writes }
    }

    #[must_use]
    pub fn op(&self) -> &FieldOp {
        &self.op
    }

    fn first_input<'a>(&self, arrays: &'a TransformArrays) -> Option<&'a str> {
        self.reads.first().and_then(|idx| arrays.get(*idx))
    }

    fn write_single(&self, arrays: &mut TransformArrays, value: String) -> TransformResult {
        match self.writes.first() {
            Some(idx) => {
                arrays.set(*idx, value);
                TransformResult::Ok
            }
            None => TransformResult::Fail,
        }
    }
}

impl Transform for FieldTransform {
    fn apply(&mut self, arrays: &mut TransformArrays) -> Result<TransformResult> {
        if let FieldOp::Concat { delimiter } = &self.op {
            let joined = self
                .reads
                .iter()
                .map(|idx| arrays.get(*idx).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(delimiter.as_str());
            return Ok(self.write_single(arrays, joined));
        }

        let Some(value) = self.first_input(arrays).map(str::to_owned) else {
            return Ok(TransformResult::Fail);
        };
        let result = match &self.op {
            FieldOp::Concat { .. } => TransformResult::Ok,
            FieldOp::Uppercase => self.write_single(arrays, value.to_uppercase()),
            FieldOp::Lowercase => self.write_single(arrays, value.to_lowercase()),
            FieldOp::Trim => self.write_single(arrays, value.trim().to_string()),
            FieldOp::Extract(re) => matcher::extract(re, &value, &self.writes, arrays),
            FieldOp::Split(re) => matcher::split(re, &value, &self.writes, arrays),
            FieldOp::Exclude(re) => matcher::exclude(re, &value),
        };
        Ok(result)
    }

    fn read_indexes(&self) -> &[TransformIndex] {
        &self.reads
    }

    fn write_indexes(&self) -> &[TransformIndex] {
        &self.writes
    }
}
