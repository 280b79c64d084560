//! JSON object input.
//!
//! The body is a stream of JSON objects, one after another with any
//! whitespace between them. Each object is flattened before fields are picked
//! out of it:
//!
//! - nested objects join their keys with `.`, so `{"a":{"b":1}}` yields `a.b`,
//! - arrays of scalars are joined with `,`,
//! - `null` counts as absent.

use super::RecordSource;
use crate::error::{IngestError, Result};
use serde_json::{Deserializer, Map, Value};
use std::collections::HashMap;
use std::io::{BufReader, Read};

type ValueStream<'de, R> =
    serde_json::StreamDeserializer<'de, serde_json::de::IoRead<BufReader<R>>, Value>;

/// Reads JSON objects with `serde_json`.
pub struct JsonRecordSource<R: Read> {
    values: ValueStream<'static, R>,
    fields: Vec<String>,
    flat: HashMap<String, String>,
}

impl<R: Read> JsonRecordSource<R> {
    /// Extract `fields` from each object of `reader`.
    pub fn new(reader: R, fields: Vec<String>) -> Self {
        Self {
            values: Deserializer::from_reader(BufReader::new(reader)).into_iter::<Value>(),
            fields,
            flat: HashMap::new(),
        }
    }
}

impl<R: Read> RecordSource for JsonRecordSource<R> {
    fn header(&self) -> &[String] {
        &self.fields
    }

    fn next_record(&mut self, input: &mut [String], present: &mut [bool]) -> Result<Option<u64>> {
        let value = match self.values.next() {
            None => return Ok(None),
            Some(Ok(value)) => value,
            Some(Err(e)) if e.is_io() => return Err(std::io::Error::from(e).into()),
            Some(Err(e)) => return Err(IngestError::MalformedJson(e.to_string())),
        };
        let object = match value {
            Value::Object(object) => object,
            other => {
                return Err(IngestError::MalformedJson(format!(
                    "expected a JSON object but found {}",
                    kind(&other)
                )));
            }
        };

        self.flat.clear();
        flatten("", object, &mut self.flat);
        for ((slot, flag), name) in input.iter_mut().zip(present.iter_mut()).zip(&self.fields) {
            slot.clear();
            match self.flat.get(name) {
                Some(value) => {
                    slot.push_str(value);
                    *flag = true;
                }
                None => *flag = false,
            }
        }
        Ok(Some(self.flat.len() as u64))
    }
}

fn flatten(prefix: &str, object: Map<String, Value>, out: &mut HashMap<String, String>) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Null => {}
            Value::Object(nested) => flatten(&name, nested, out),
            Value::Array(items) => {
                let joined = items
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(scalar_text)
                    .collect::<Vec<_>>()
                    .join(",");
                out.insert(name, joined);
            }
            scalar => {
                out.insert(name, scalar_text(&scalar));
            }
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
