//! Per-record field transforms.
//!
//! Before a record is encoded for the native process it is copied through a
//! set of parallel scratch arrays:
//!
//! - **input** holds the raw fields as read from CSV or JSON,
//! - **scratch** holds values derived by one transform for use by another,
//! - **output** holds the fields in the order of the job's header.
//!
//! A transform reads from [`TransformIndex`]es and writes to others. The
//! indexes are resolved once per upload against the input header (see
//! [`TransformChain::build`]) and never change for the rest of the upload.
//!
//! Two families of transforms exist:
//!
//! - [`DateTransform`] turns the time field into epoch seconds. There is exactly
//!   one per job and it always writes the first output field.
//! - [`FieldTransform`]s are configured per job ([`TransformConfig`]) and are
//!   looked up by name through [`TransformKind::from_name`].
//!
//! Both implement the [`Transform`] capability trait; dispatch between the
//! concrete variants happens through closed enums rather than trait objects.

pub mod chain;
pub mod date;
pub mod field;
pub mod matcher;
pub mod time_pattern;

pub use chain::{TransformChain, TransformPlan};
pub use date::{DateFormat, DateTransform};
pub use field::{FieldOp, FieldTransform, TransformConfig, TransformKind};
pub use time_pattern::TimePattern;

use crate::error::Result;

/// Which scratch array a [`TransformIndex`] points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    Input,
    Scratch,
    Output,
}

/// A position in one of the scratch arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransformIndex {
    pub array: ArrayKind,
    pub index: usize,
}

impl TransformIndex {
    #[must_use]
    pub const fn new(array: ArrayKind, index: usize) -> Self {
        Self { array, index }
    }

    #[must_use]
    pub const fn input(index: usize) -> Self {
        Self::new(ArrayKind::Input, index)
    }

    #[must_use]
    pub const fn scratch(index: usize) -> Self {
        Self::new(ArrayKind::Scratch, index)
    }

    #[must_use]
    pub const fn output(index: usize) -> Self {
        Self::new(ArrayKind::Output, index)
    }
}

/// Outcome of applying one transform to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformResult {
    Ok,
    /// The transform could not produce its outputs; the record is still written.
    Fail,
    /// The record must be dropped.
    Exclude,
}

/// The three arrays a record moves through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformArrays {
    pub input: Vec<String>,
    pub scratch: Vec<String>,
    pub output: Vec<String>,
}

impl TransformArrays {
    #[must_use]
    pub fn new(input_len: usize, scratch_len: usize, output_len: usize) -> Self {
        Self {
            input: vec![String::new(); input_len],
            scratch: vec![String::new(); scratch_len],
            output: vec![String::new(); output_len],
        }
    }

    /// Read the value at `idx`, or `None` if it is out of range.
    #[must_use]
    pub fn get(&self, idx: TransformIndex) -> Option<&str> {
        self.array(idx.array).get(idx.index).map(String::as_str)
    }

    /// Overwrite the value at `idx`. Out of range writes are ignored.
    pub fn set(&mut self, idx: TransformIndex, value: impl Into<String>) {
        if let Some(slot) = self.array_mut(idx.array).get_mut(idx.index) {
            *slot = value.into();
        }
    }

    /// Clear derived values left over from the previous record.
    pub fn clear_derived(&mut self) {
        self.scratch.iter_mut().for_each(String::clear);
        self.output.iter_mut().for_each(String::clear);
    }

    fn array(&self, kind: ArrayKind) -> &Vec<String> {
        match kind {
            ArrayKind::Input => &self.input,
            ArrayKind::Scratch => &self.scratch,
            ArrayKind::Output => &self.output,
        }
    }

    fn array_mut(&mut self, kind: ArrayKind) -> &mut Vec<String> {
        match kind {
            ArrayKind::Input => &mut self.input,
            ArrayKind::Scratch => &mut self.scratch,
            ArrayKind::Output => &mut self.output,
        }
    }
}

/// Capability shared by every transform.
pub trait Transform {
    /// Apply the transform to one record's arrays in place.
    ///
    /// # Errors
    ///
    /// Only date transforms fail with an error, when the timestamp cannot be
    /// parsed; other transforms report problems through [`TransformResult`].
    fn apply(&mut self, arrays: &mut TransformArrays) -> Result<TransformResult>;

    fn read_indexes(&self) -> &[TransformIndex];

    fn write_indexes(&self) -> &[TransformIndex];
}
