//! Regex backed transform operations.

use super::{TransformArrays, TransformIndex, TransformResult};
use regex::Regex;

/// Copy the capture groups of the first match into `writes`, in group order.
///
/// A value that does not match fails the transform and leaves the outputs
/// untouched. Groups that did not participate in the match are written empty.
pub fn extract(
    re: &Regex,
    value: &str,
    writes: &[TransformIndex],
    arrays: &mut TransformArrays,
) -> TransformResult {
    let Some(caps) = re.captures(value) else {
        return TransformResult::Fail;
    };
    for (group, idx) in caps.iter().skip(1).zip(writes) {
        arrays.set(*idx, group.map_or("", |m| m.as_str()));
    }
    TransformResult::Ok
}

/// Split `value` on `re` and copy the pieces into `writes`.
///
/// Extra pieces are dropped; outputs without a piece are left empty.
pub fn split(
    re: &Regex,
    value: &str,
    writes: &[TransformIndex],
    arrays: &mut TransformArrays,
) -> TransformResult {
    let mut pieces = re.split(value);
    for idx in writes {
        arrays.set(*idx, pieces.next().unwrap_or_default());
    }
    TransformResult::Ok
}

/// Drop the record if `value` matches anywhere.
#[must_use]
pub fn exclude(re: &Regex, value: &str) -> TransformResult {
    if re.is_match(value) {
        TransformResult::Exclude
    } else {
        TransformResult::Ok
    }
}
