//! Resolving a job's transforms against an input header.
//!
//! [`TransformPlan`] is built once per job from its [`JobConfig`]; it checks
//! every transform and fixes the order they run in. [`TransformChain`] binds a
//! plan to the header of one upload, turning field names into
//! [`TransformIndex`]es.
//!
//! Per record the chain:
//!
//! 1. copies analysis fields straight from the input to their output slot,
//! 2. runs the field transforms in dependency order,
//! 3. runs the date transform, which writes the first output slot.

use super::{
    DateFormat, DateTransform, FieldOp, FieldTransform, Transform, TransformArrays,
    TransformConfig, TransformIndex, TransformKind, TransformResult,
};
use crate::config::JobConfig;
use crate::error::{IngestError, Result};
use crate::wire::CONTROL_FIELD_NAME;
use std::collections::{BTreeSet, HashMap, HashSet};

/// The validated, ordered transforms of a job and the fields they need.
#[derive(Debug, Clone)]
pub struct TransformPlan {
    time_field: String,
    date_format: DateFormat,
    latency_secs: u64,
    transforms: Vec<(TransformConfig, FieldOp)>,
    input_fields: Vec<String>,
    output_fields: Vec<String>,
}

impl TransformPlan {
    /// Validate `job` and order its transforms.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] for an unusable time format, an unknown
    /// transform, wrong transform arity, a field produced twice, a transform
    /// writing its own input or a dependency cycle.
    pub fn new(job: &JobConfig) -> Result<Self> {
        let time_field = job.data_description.time_field.clone();
        let date_format = DateFormat::from_config(&job.data_description.time_format)?;

        let mut verified = Vec::with_capacity(job.transforms.len());
        for tc in &job.transforms {
            let kind = TransformKind::from_name(&tc.transform).ok_or_else(|| {
                IngestError::config(format!("unknown transform '{}'", tc.transform))
            })?;
            verified.push(kind.verify(tc)?);
        }

        let mut producer: HashMap<&str, usize> = HashMap::new();
        for (i, (tc, _)) in verified.iter().enumerate() {
            for out in &tc.outputs {
                if tc.inputs.contains(out) {
                    return Err(IngestError::config(format!(
                        "transform '{}' cannot write its own input '{out}'",
                        tc.transform
                    )));
                }
                if producer.insert(out.as_str(), i).is_some() {
                    return Err(IngestError::config(format!(
                        "field '{out}' is produced by more than one transform"
                    )));
                }
            }
        }

        let order = dependency_order(&verified, &producer)?;
        let produced: HashSet<String> = producer.keys().map(|s| (*s).to_string()).collect();
        let mut slots: Vec<Option<(TransformConfig, FieldOp)>> =
            verified.into_iter().map(Some).collect();
        let transforms: Vec<(TransformConfig, FieldOp)> =
            order.into_iter().filter_map(|i| slots[i].take()).collect();

        let analysis: Vec<String> = job
            .analysis
            .analysis_fields
            .iter()
            .filter(|f| **f != time_field)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut output_fields = Vec::with_capacity(analysis.len() + 2);
        output_fields.push(time_field.clone());
        output_fields.extend(analysis.iter().cloned());
        output_fields.push(CONTROL_FIELD_NAME.to_string());

        let mut input_fields = Vec::new();
        let wanted = std::iter::once(&time_field)
            .chain(&analysis)
            .chain(transforms.iter().flat_map(|(tc, _)| &tc.inputs));
        for name in wanted {
            if !produced.contains(name) && !input_fields.contains(name) {
                input_fields.push(name.clone());
            }
        }

        Ok(Self {
            time_field,
            date_format,
            latency_secs: job.analysis.latency_secs,
            transforms,
            input_fields,
            output_fields,
        })
    }

    #[must_use]
    pub fn time_field(&self) -> &str {
        &self.time_field
    }

    #[must_use]
    pub fn date_format(&self) -> &DateFormat {
        &self.date_format
    }

    #[must_use]
    pub fn latency_secs(&self) -> u64 {
        self.latency_secs
    }

    /// Fields that must be present in the input, time field first.
    #[must_use]
    pub fn input_fields(&self) -> &[String] {
        &self.input_fields
    }

    /// The header sent to the native process.
    #[must_use]
    pub fn output_fields(&self) -> &[String] {
        &self.output_fields
    }

    /// Transform configurations in the order they run.
    pub fn transforms(&self) -> impl Iterator<Item = &TransformConfig> {
        self.transforms.iter().map(|(tc, _)| tc)
    }
}

/// Stable topological order: among the transforms whose dependencies are
/// placed, the earliest configured runs first.
fn dependency_order(
    verified: &[(TransformConfig, FieldOp)],
    producer: &HashMap<&str, usize>,
) -> Result<Vec<usize>> {
    let deps: Vec<HashSet<usize>> = verified
        .iter()
        .map(|(tc, _)| {
            tc.inputs
                .iter()
                .filter_map(|input| producer.get(input.as_str()).copied())
                .collect()
        })
        .collect();

    let mut placed = vec![false; verified.len()];
    let mut order = Vec::with_capacity(verified.len());
    while order.len() < verified.len() {
        let next = (0..verified.len())
            .find(|&i| !placed[i] && deps[i].iter().all(|&d| placed[d]))
            .ok_or_else(|| IngestError::config("transforms have a circular dependency"))?;
        placed[next] = true;
        order.push(next);
    }
    Ok(order)
}

/// A [`TransformPlan`] bound to the header of one upload.
#[derive(Debug, Clone)]
pub struct TransformChain {
    input_len: usize,
    scratch_len: usize,
    output_len: usize,
    copies: Vec<(usize, usize)>,
    transforms: Vec<FieldTransform>,
    date: DateTransform,
    used_inputs: Vec<usize>,
}

impl TransformChain {
    /// Resolve `plan` against `header`.
    ///
    /// When a header names a field twice the first occurrence is used.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::MissingField`] for the first required field the
    /// header lacks.
    pub fn build(header: &[String], plan: &TransformPlan) -> Result<Self> {
        let mut locations: HashMap<String, TransformIndex> = HashMap::new();
        for (i, name) in header.iter().enumerate() {
            locations
                .entry(name.clone())
                .or_insert(TransformIndex::input(i));
        }
        if let Some(missing) = plan
            .input_fields
            .iter()
            .find(|f| !locations.contains_key(f.as_str()))
        {
            return Err(IngestError::MissingField {
                field: missing.clone(),
            });
        }

        let output_len = plan.output_fields.len();
        let output_slots: HashMap<&str, usize> = plan
            .output_fields
            .iter()
            .enumerate()
            .take(output_len - 1)
            .skip(1)
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut scratch_len = 0;
        let mut transforms = Vec::with_capacity(plan.transforms.len());
        for (tc, op) in &plan.transforms {
            let reads = tc
                .inputs
                .iter()
                .map(|name| resolve(&locations, name))
                .collect::<Result<Vec<_>>>()?;
            let mut writes = Vec::with_capacity(tc.outputs.len());
            for name in &tc.outputs {
                let idx = match output_slots.get(name.as_str()) {
                    Some(&slot) => TransformIndex::output(slot),
                    None => {
                        scratch_len += 1;
                        TransformIndex::scratch(scratch_len - 1)
                    }
                };
                locations.insert(name.clone(), idx);
                writes.push(idx);
            }
            transforms.push(FieldTransform::new(op.clone(), reads, writes));
        }

        let date = DateTransform::new(
            plan.date_format.clone(),
            &[resolve(&locations, &plan.time_field)?],
            &[TransformIndex::output(0)],
        )?;

        let mut copies = Vec::new();
        for (name, &slot) in &output_slots {
            if let TransformIndex {
                array: super::ArrayKind::Input,
                index,
            } = resolve(&locations, name)?
            {
                copies.push((index, slot));
            }
        }
        copies.sort_unstable_by_key(|&(_, slot)| slot);

        let used_inputs = transforms
            .iter()
            .flat_map(|t| t.read_indexes().iter())
            .chain(date.read_indexes())
            .filter(|idx| idx.array == super::ArrayKind::Input)
            .map(|idx| idx.index)
            .chain(copies.iter().map(|&(input, _)| input))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(Self {
            input_len: header.len(),
            scratch_len,
            output_len,
            copies,
            transforms,
            date,
            used_inputs,
        })
    }

    /// Fresh arrays sized for this chain.
    #[must_use]
    pub fn new_arrays(&self) -> TransformArrays {
        TransformArrays::new(self.input_len, self.scratch_len, self.output_len)
    }

    /// Header positions read by any transform or copy, ascending.
    #[must_use]
    pub fn used_inputs(&self) -> &[usize] {
        &self.used_inputs
    }

    /// Epoch milliseconds of the last record whose date was transformed.
    #[must_use]
    pub fn epoch_ms(&self) -> i64 {
        self.date.epoch_ms()
    }

    /// Run every transform over one record.
    ///
    /// `Exclude` stops the chain immediately. A field transform that fails
    /// leaves its outputs empty and the chain carries on.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ParseTimestamp`] when the time field cannot be
    /// converted.
    pub fn apply(&mut self, arrays: &mut TransformArrays) -> Result<TransformResult> {
        arrays.clear_derived();
        for &(input, output) in &self.copies {
            let value = arrays.input.get(input).cloned().unwrap_or_default();
            arrays.output[output] = value;
        }

        let mut result = TransformResult::Ok;
        for transform in &mut self.transforms {
            match transform.apply(arrays)? {
                TransformResult::Exclude => return Ok(TransformResult::Exclude),
                TransformResult::Fail => result = TransformResult::Fail,
                TransformResult::Ok => {}
            }
        }
        self.date.apply(arrays)?;
        Ok(result)
    }
}

fn resolve(locations: &HashMap<String, TransformIndex>, name: &str) -> Result<TransformIndex> {
    locations
        .get(name)
        .copied()
        .ok_or_else(|| IngestError::MissingField {
            field: name.to_string(),
        })
}
