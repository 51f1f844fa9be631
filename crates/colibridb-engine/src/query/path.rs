//! Dotted-path resolution over nested documents.
//!
//! Paths like `stats.views` or `orders.0.total` walk objects by field name
//! and arrays by numeric index. A non-numeric segment against an array
//! switches to traversal mode: the remaining path is resolved against every
//! element and the non-absent results are collected into a synthetic array
//! (flattening one level when a sub-result is itself an array). That
//! synthetic array is what gives filters their any-element semantics over
//! nested collections.

use colibridb_common::{Document, Value};

/// Result of resolving a path: either a value (owned copy) or nothing.
///
/// Absent is distinct from `Value::Null` — a field explicitly set to null
/// resolves to `Found(Null)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Absent,
    Found(Value),
}

impl Resolved {
    pub fn is_absent(&self) -> bool {
        matches!(self, Resolved::Absent)
    }

    pub fn found(&self) -> Option<&Value> {
        match self {
            Resolved::Found(v) => Some(v),
            Resolved::Absent => None,
        }
    }
}

/// Resolve a dotted path against a document.
pub fn resolve(doc: &Document, path: &str) -> Resolved {
    // Fast path: plain field name
    if !path.contains('.') {
        return match doc.get(path) {
            Some(v) => Resolved::Found(v.clone()),
            None => Resolved::Absent,
        };
    }

    let segments: Vec<&str> = path.split('.').collect();
    match doc.get(segments[0]) {
        Some(v) => resolve_value(v, &segments[1..]),
        None => Resolved::Absent,
    }
}

/// Resolve the remaining segments against an arbitrary value.
fn resolve_value(value: &Value, segments: &[&str]) -> Resolved {
    if segments.is_empty() {
        return Resolved::Found(value.clone());
    }

    let segment = segments[0];
    match value {
        Value::Object(obj) => match obj.get(segment) {
            Some(v) => resolve_value(v, &segments[1..]),
            None => Resolved::Absent,
        },
        Value::Array(arr) => {
            if let Ok(index) = segment.parse::<usize>() {
                // Numeric segment: positional descent, absent when out of bounds.
                return match arr.get(index) {
                    Some(v) => resolve_value(v, &segments[1..]),
                    None => Resolved::Absent,
                };
            }

            // Traversal mode: apply the remaining path (including this
            // segment) to every element and collect the hits.
            let mut collected = Vec::new();
            for element in arr {
                match resolve_value(element, segments) {
                    Resolved::Found(Value::Array(mut nested)) => collected.append(&mut nested),
                    Resolved::Found(v) => collected.push(v),
                    Resolved::Absent => {}
                }
            }

            if collected.is_empty() {
                Resolved::Absent
            } else {
                Resolved::Found(Value::Array(collected))
            }
        }
        // Scalar mid-path
        _ => Resolved::Absent,
    }
}
