//! Secondary composite indexes.
//!
//! An index is keyed by an ordered tuple of field paths, each with a
//! declared direction. Directions are reserved for future ordered traversal;
//! equality lookup ignores them. The structure is an ordered map from
//! composite key tuples to lists of positions in the collection's data
//! vector. Documents missing any indexed field are simply absent from the
//! index.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use colibridb_common::{ColibriError, Document, Result, Value};

use crate::query::path::{Resolved, resolve};

// Index spec

/// Declared shape of a composite index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    /// Field paths with direction (1 ascending, -1 descending)
    pub fields: Vec<(String, i8)>,
}

impl IndexSpec {
    /// Decode a spec document: `{name?, fields: {path: ±1, ...}}`.
    ///
    /// A missing name is derived from the fields (`score_-1_name_1` style).
    pub fn parse(raw: &Value) -> Result<IndexSpec> {
        let obj = raw.as_object().ok_or_else(|| {
            ColibriError::Validation(format!(
                "index spec must be an object, got {}",
                raw.type_name()
            ))
        })?;

        let field_map = obj
            .get("fields")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                ColibriError::Validation("index spec requires a 'fields' object".into())
            })?;
        if field_map.is_empty() {
            return Err(ColibriError::Validation(
                "index spec requires at least one field".into(),
            ));
        }

        let mut fields = Vec::with_capacity(field_map.len());
        for (path, direction) in field_map {
            match direction.as_f64() {
                Some(d) if d == 1.0 => fields.push((path.clone(), 1)),
                Some(d) if d == -1.0 => fields.push((path.clone(), -1)),
                _ => {
                    return Err(ColibriError::Validation(format!(
                        "index direction for '{path}' must be 1 or -1"
                    )));
                }
            }
        }

        let name = match obj.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => fields
                .iter()
                .map(|(path, dir)| format!("{path}_{dir}"))
                .collect::<Vec<_>>()
                .join("_"),
        };

        Ok(IndexSpec { name, fields })
    }
}

// Composite keys

/// One component of a composite key, ordered by type rank then value.
///
/// Container values key by their canonical JSON text: deterministic,
/// ordered, and exact-match capable without a custom deep Ord.
#[derive(Debug, Clone, PartialEq)]
enum KeyPart {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Container(String),
}

impl Eq for KeyPart {}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        fn rank(part: &KeyPart) -> u8 {
            match part {
                KeyPart::Null => 0,
                KeyPart::Bool(_) => 1,
                KeyPart::Number(_) => 2,
                KeyPart::String(_) => 3,
                KeyPart::Container(_) => 4,
            }
        }

        match (self, other) {
            (KeyPart::Bool(a), KeyPart::Bool(b)) => a.cmp(b),
            (KeyPart::Number(a), KeyPart::Number(b)) => a.total_cmp(b),
            (KeyPart::String(a), KeyPart::String(b)) => a.cmp(b),
            (KeyPart::Container(a), KeyPart::Container(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl KeyPart {
    fn from_value(value: &Value) -> KeyPart {
        match value {
            Value::Null => KeyPart::Null,
            Value::Bool(b) => KeyPart::Bool(*b),
            Value::Number(n) => KeyPart::Number(*n),
            Value::String(s) => KeyPart::String(s.clone()),
            container => KeyPart::Container(
                serde_json::to_string(container).unwrap_or_default(),
            ),
        }
    }
}

/// Composite key tuple, ordered lexicographically across its parts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexKey(Vec<KeyPart>);

// Secondary index

pub struct SecondaryIndex {
    pub spec: IndexSpec,
    map: BTreeMap<IndexKey, Vec<usize>>,
}

impl SecondaryIndex {
    /// Create an index and populate it from the current data vector.
    pub fn build(spec: IndexSpec, data: &[Document]) -> SecondaryIndex {
        let mut index = SecondaryIndex {
            spec,
            map: BTreeMap::new(),
        };
        for (position, doc) in data.iter().enumerate() {
            index.insert_doc(position, doc);
        }
        index
    }

    /// Composite key for a document; None when any indexed field is absent.
    fn key_for(&self, doc: &Document) -> Option<IndexKey> {
        let mut parts = Vec::with_capacity(self.spec.fields.len());
        for (path, _direction) in &self.spec.fields {
            match resolve(doc, path) {
                Resolved::Found(value) => parts.push(KeyPart::from_value(&value)),
                Resolved::Absent => return None,
            }
        }
        Some(IndexKey(parts))
    }

    /// Register a document at a position.
    pub fn insert_doc(&mut self, position: usize, doc: &Document) {
        if let Some(key) = self.key_for(doc) {
            self.map.entry(key).or_default().push(position);
        }
    }

    /// Unregister a document previously at a position.
    ///
    /// The document handed in must be the version the index last saw.
    pub fn remove_doc(&mut self, position: usize, doc: &Document) {
        if let Some(key) = self.key_for(doc) {
            if let Some(positions) = self.map.get_mut(&key) {
                positions.retain(|&p| p != position);
                if positions.is_empty() {
                    self.map.remove(&key);
                }
            }
        }
    }

    /// Discard and rebuild from scratch.
    pub fn rebuild(&mut self, data: &[Document]) {
        self.map.clear();
        for (position, doc) in data.iter().enumerate() {
            self.insert_doc(position, doc);
        }
    }

    /// Positions for an exact composite-value match.
    pub fn lookup(&self, values: &[Value]) -> &[usize] {
        if values.len() != self.spec.fields.len() {
            return &[];
        }
        let key = IndexKey(values.iter().map(KeyPart::from_value).collect());
        self.map.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Every (position) entry currently registered, for invariant checks.
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.map.values().flat_map(|positions| positions.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: serde_json::Value) -> Document {
        Value::from_json(json).into_object().unwrap()
    }

    fn spec(json: serde_json::Value) -> IndexSpec {
        IndexSpec::parse(&Value::from_json(json)).unwrap()
    }

    #[test]
    fn spec_parsing_and_derived_name() {
        let s = spec(serde_json::json!({"fields": {"score": -1, "name": 1}}));
        assert_eq!(s.name, "score_-1_name_1");
        assert_eq!(s.fields, vec![("score".to_string(), -1), ("name".to_string(), 1)]);

        let named = spec(serde_json::json!({"name": "by_score", "fields": {"score": 1}}));
        assert_eq!(named.name, "by_score");

        assert!(IndexSpec::parse(&Value::from_json(serde_json::json!({}))).is_err());
        assert!(
            IndexSpec::parse(&Value::from_json(serde_json::json!({"fields": {"a": 2}}))).is_err()
        );
    }

    #[test]
    fn build_skips_documents_missing_fields() {
        let data = vec![
            doc(serde_json::json!({"city": "Kigali", "zip": 1})),
            doc(serde_json::json!({"city": "Kigali"})),
            doc(serde_json::json!({"zip": 2})),
        ];
        let index = SecondaryIndex::build(spec(serde_json::json!({"fields": {"city": 1, "zip": 1}})), &data);
        assert_eq!(index.positions().count(), 1);
        assert_eq!(
            index
                .lookup(&[Value::String("Kigali".into()), Value::Number(1.0)])
                .to_vec(),
            vec![0]
        );
    }

    #[test]
    fn duplicate_keys_share_an_entry() {
        let data = vec![
            doc(serde_json::json!({"city": "Huye"})),
            doc(serde_json::json!({"city": "Huye"})),
        ];
        let index = SecondaryIndex::build(spec(serde_json::json!({"fields": {"city": 1}})), &data);
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup(&[Value::String("Huye".into())]).to_vec(), vec![0, 1]);
    }

    #[test]
    fn insert_and_remove_round_trip() {
        let mut index = SecondaryIndex::build(spec(serde_json::json!({"fields": {"k": 1}})), &[]);
        let d = doc(serde_json::json!({"k": 7}));
        index.insert_doc(0, &d);
        assert_eq!(index.lookup(&[Value::Number(7.0)]).to_vec(), vec![0]);
        index.remove_doc(0, &d);
        assert!(index.is_empty());
    }

    #[test]
    fn null_valued_field_is_still_defined() {
        let data = vec![doc(serde_json::json!({"k": null}))];
        let index = SecondaryIndex::build(spec(serde_json::json!({"fields": {"k": 1}})), &data);
        assert_eq!(index.lookup(&[Value::Null]).to_vec(), vec![0]);
    }
}
