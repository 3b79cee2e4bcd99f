use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::trace;

use super::FieldMap;

/// A vendor record exactly as decoded from the response body.
pub type RawRecord = Map<String, Value>;

/// A flattened record: canonical dotted field name → scalar value.
pub type FlatRecord = Map<String, Value>;

/// Converts nested vendor records into flat records with canonical keys.
#[derive(Clone, Debug)]
pub struct RecordFlattener {
    field_map: Arc<FieldMap>,
}

impl RecordFlattener {
    pub fn new(field_map: Arc<FieldMap>) -> Self {
        Self { field_map }
    }

    /// Flattens `record` into dotted paths and renames each path.
    ///
    /// Nested objects extend the path with `.`; numbers, strings and booleans
    /// are written under their canonical name, the last write winning when two
    /// paths map to the same name. Arrays and nulls are dropped.
    ///
    /// The walk is iterative; nesting depth is bounded by the heap, not the
    /// call stack.
    pub fn flatten(&self, record: &RawRecord) -> FlatRecord {
        let mut flat = FlatRecord::new();
        let mut pending: Vec<(String, &RawRecord)> = vec![(String::new(), record)];

        while let Some((prefix, object)) = pending.pop() {
            for (key, value) in object {
                let path = format!("{prefix}{key}");
                match value {
                    Value::Object(nested) => pending.push((format!("{path}."), nested)),
                    Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                        let name = self.field_map.canonical(&path).to_string();
                        flat.insert(name, value.clone());
                    }
                    Value::Array(_) | Value::Null => {
                        trace!(field = %path, "Dropping non-scalar field");
                    }
                }
            }
        }

        flat
    }
}
