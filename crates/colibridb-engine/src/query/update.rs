//! Update-operator interpretation.
//!
//! An update spec is either an operator document (`$set`, `$unset`, `$inc`,
//! `$push`, `$addToSet`, `$pull`) or a plain document, which is shorthand
//! for `{$set: doc}`. Per-field keys may be dotted; `$set`-family operators
//! create intermediate objects on demand, the removal operators never do.

use tracing::warn;

use colibridb_common::{ColibriError, Document, Result, Value};

/// Decoded update specification.
#[derive(Debug, Clone)]
pub struct UpdateDoc {
    ops: Vec<UpdateOp>,
}

#[derive(Debug, Clone)]
enum UpdateOp {
    Set(String, Value),
    Unset(String),
    Inc(String, f64),
    Push(String, Value),
    AddToSet(String, Value),
    Pull(String, Value),
}

impl UpdateDoc {
    /// Decode a raw update spec.
    ///
    /// A document whose top-level keys all start with `$` is an operator
    /// form; anything else is treated as a whole-document `$set`. Unknown
    /// `$` operators are skipped with a warning.
    pub fn parse(raw: &Value) -> Result<UpdateDoc> {
        let obj = raw.as_object().ok_or_else(|| {
            ColibriError::Validation(format!(
                "update spec must be an object, got {}",
                raw.type_name()
            ))
        })?;

        let operator_form = !obj.is_empty() && obj.keys().all(|k| k.starts_with('$'));
        let mut ops = Vec::new();

        if !operator_form {
            for (field, value) in obj {
                push_set(&mut ops, field, value.clone());
            }
            return Ok(UpdateDoc { ops });
        }

        for (op, payload) in obj {
            let fields = match payload.as_object() {
                Some(fields) => fields,
                None => {
                    return Err(ColibriError::Validation(format!(
                        "{op} expects an object of field paths"
                    )));
                }
            };

            match op.as_str() {
                "$set" => {
                    for (field, value) in fields {
                        push_set(&mut ops, field, value.clone());
                    }
                }
                "$unset" => {
                    for field in fields.keys() {
                        if is_reserved_id(field) {
                            warn!(field = %field, "refusing to unset the id field");
                            continue;
                        }
                        ops.push(UpdateOp::Unset(field.clone()));
                    }
                }
                "$inc" => {
                    for (field, value) in fields {
                        match value.as_f64() {
                            Some(n) => ops.push(UpdateOp::Inc(field.clone(), n)),
                            None => {
                                return Err(ColibriError::Validation(format!(
                                    "$inc on '{field}' requires a numeric amount"
                                )));
                            }
                        }
                    }
                }
                "$push" => {
                    for (field, value) in fields {
                        ops.push(UpdateOp::Push(field.clone(), value.clone()));
                    }
                }
                "$addToSet" => {
                    for (field, value) in fields {
                        ops.push(UpdateOp::AddToSet(field.clone(), value.clone()));
                    }
                }
                "$pull" => {
                    for (field, value) in fields {
                        ops.push(UpdateOp::Pull(field.clone(), value.clone()));
                    }
                }
                other => {
                    warn!(operator = %other, "ignoring unknown update operator");
                }
            }
        }

        Ok(UpdateDoc { ops })
    }

    /// Apply the update to a document and stamp `updatedAt`.
    pub fn apply(&self, doc: &mut Document, now: &str) {
        for op in &self.ops {
            match op {
                UpdateOp::Set(path, value) => {
                    set_at_path(doc, path, value.clone());
                }
                UpdateOp::Unset(path) => {
                    unset_at_path(doc, path);
                }
                UpdateOp::Inc(path, amount) => {
                    let current = leaf_number(doc, path);
                    set_at_path(doc, path, Value::Number(current + amount));
                }
                UpdateOp::Push(path, value) => {
                    with_array(doc, path, |arr| arr.push(value.clone()));
                }
                UpdateOp::AddToSet(path, value) => {
                    let additions = each_values(value);
                    with_array(doc, path, |arr| {
                        for item in additions {
                            if !arr.contains(&item) {
                                arr.push(item);
                            }
                        }
                    });
                }
                UpdateOp::Pull(path, value) => {
                    pull_at_path(doc, path, value);
                }
            }
        }

        doc.insert("updatedAt".to_string(), Value::String(now.to_string()));
    }
}

fn push_set(ops: &mut Vec<UpdateOp>, field: &str, value: Value) {
    if is_reserved_id(field) {
        warn!(field = %field, "refusing to overwrite the id field");
        return;
    }
    ops.push(UpdateOp::Set(field.to_string(), value));
}

/// The primary key cannot be re-pointed through update operators.
fn is_reserved_id(path: &str) -> bool {
    path == "id"
}

/// `{$each: [..]}` expansion for $addToSet.
fn each_values(value: &Value) -> Vec<Value> {
    if let Some(obj) = value.as_object() {
        if obj.len() == 1 {
            if let Some(Value::Array(items)) = obj.get("$each") {
                return items.clone();
            }
        }
    }
    vec![value.clone()]
}

// Dotted-path mutation

/// Walk to the container holding the final path segment.
///
/// With `create` set, missing intermediate objects are created; an existing
/// non-container mid-path aborts the walk either way. Arrays mid-path are
/// traversed by numeric index only.
fn descend<'a>(doc: &'a mut Document, path: &str, create: bool) -> Option<(&'a mut Value, String)> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop()?.to_string();

    // Wrap the root map so the walk is uniform over Values.
    let mut current: &mut Value = {
        if segments.is_empty() {
            return None; // handled by the single-segment fast paths
        }
        let head = segments.remove(0);
        if create && !doc.contains_key(head) {
            doc.insert(head.to_string(), Value::Object(Document::new()));
        }
        doc.get_mut(head)?
    };

    for segment in segments {
        current = match current {
            Value::Object(obj) => {
                if create && !obj.contains_key(segment) {
                    obj.insert(segment.to_string(), Value::Object(Document::new()));
                }
                obj.get_mut(segment)?
            }
            Value::Array(arr) => {
                let index: usize = segment.parse().ok()?;
                arr.get_mut(index)?
            }
            _ => return None,
        };
    }

    Some((current, last))
}

fn set_at_path(doc: &mut Document, path: &str, value: Value) {
    if !path.contains('.') {
        doc.insert(path.to_string(), value);
        return;
    }

    if let Some((container, last)) = descend(doc, path, true) {
        match container {
            Value::Object(obj) => {
                obj.insert(last, value);
            }
            Value::Array(arr) => {
                if let Ok(index) = last.parse::<usize>() {
                    if let Some(slot) = arr.get_mut(index) {
                        *slot = value;
                    }
                }
            }
            _ => {}
        }
    }
}

fn unset_at_path(doc: &mut Document, path: &str) {
    if !path.contains('.') {
        doc.shift_remove(path);
        return;
    }

    if let Some((container, last)) = descend(doc, path, false) {
        if let Value::Object(obj) = container {
            obj.shift_remove(&last);
        }
    }
}

/// Current numeric value at a path; missing or non-numeric reads as 0.
fn leaf_number(doc: &mut Document, path: &str) -> f64 {
    let value = if !path.contains('.') {
        doc.get(path)
    } else {
        match descend(doc, path, false) {
            Some((Value::Object(obj), last)) => obj.get(&last),
            Some((Value::Array(arr), last)) => last.parse::<usize>().ok().and_then(|i| arr.get(i)),
            _ => None,
        }
    };
    value.and_then(Value::as_f64).unwrap_or(0.0)
}

/// Run a closure against the array at a path, initializing a fresh array
/// when the leaf is missing or not an array.
fn with_array(doc: &mut Document, path: &str, mutate: impl FnOnce(&mut Vec<Value>)) {
    if !path.contains('.') {
        let slot = doc
            .entry(path.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !matches!(slot, Value::Array(_)) {
            *slot = Value::Array(Vec::new());
        }
        if let Value::Array(arr) = slot {
            mutate(arr);
        }
        return;
    }

    if let Some((container, last)) = descend(doc, path, true) {
        if let Value::Object(obj) = container {
            let slot = obj
                .entry(last)
                .or_insert_with(|| Value::Array(Vec::new()));
            if !matches!(slot, Value::Array(_)) {
                *slot = Value::Array(Vec::new());
            }
            if let Value::Array(arr) = slot {
                mutate(arr);
            }
        }
    }
}

fn pull_at_path(doc: &mut Document, path: &str, target: &Value) {
    let leaf: Option<&mut Value> = if !path.contains('.') {
        doc.get_mut(path)
    } else {
        match descend(doc, path, false) {
            Some((Value::Object(obj), last)) => obj.get_mut(&last),
            Some((Value::Array(arr), last)) => {
                last.parse::<usize>().ok().and_then(move |i| arr.get_mut(i))
            }
            _ => None,
        }
    };

    if let Some(Value::Array(arr)) = leaf {
        // {$in: [..]} removes every listed value
        if let Some(obj) = target.as_object() {
            if obj.len() == 1 {
                if let Some(Value::Array(targets)) = obj.get("$in") {
                    arr.retain(|el| !targets.contains(el));
                    return;
                }
            }
        }
        arr.retain(|el| el != target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2024-01-01T00:00:00.000Z";

    fn doc(json: serde_json::Value) -> Document {
        Value::from_json(json).into_object().unwrap()
    }

    fn apply(update: serde_json::Value, mut document: Document) -> Document {
        let update = UpdateDoc::parse(&Value::from_json(update)).expect("update parses");
        update.apply(&mut document, NOW);
        document
    }

    #[test]
    fn plain_document_is_set_shorthand() {
        let out = apply(
            serde_json::json!({"name": "Bob"}),
            doc(serde_json::json!({"name": "Alice", "age": 30})),
        );
        assert_eq!(out["name"], Value::String("Bob".into()));
        assert_eq!(out["age"], Value::Number(30.0));
        assert_eq!(out["updatedAt"], Value::String(NOW.into()));
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let out = apply(
            serde_json::json!({"$set": {"stats.views": 50, "a.b.c": 1}}),
            doc(serde_json::json!({"stats": {"views": 10, "likes": 3}})),
        );
        assert_eq!(out["stats"]["views"], Value::Number(50.0));
        assert_eq!(out["stats"]["likes"], Value::Number(3.0));
        assert_eq!(out["a"]["b"]["c"], Value::Number(1.0));
    }

    #[test]
    fn set_does_not_clobber_scalar_mid_path() {
        let out = apply(
            serde_json::json!({"$set": {"a.b": 1}}),
            doc(serde_json::json!({"a": 42})),
        );
        assert_eq!(out["a"], Value::Number(42.0));
    }

    #[test]
    fn set_skips_id() {
        let out = apply(
            serde_json::json!({"$set": {"id": "evil", "name": "x"}}),
            doc(serde_json::json!({"id": "u1", "name": "Alice"})),
        );
        assert_eq!(out["id"], Value::String("u1".into()));
        assert_eq!(out["name"], Value::String("x".into()));
    }

    #[test]
    fn unset_removes_leaves_without_creating() {
        let out = apply(
            serde_json::json!({"$unset": {"stats.views": 1, "ghost.leaf": 1, "top": 1}}),
            doc(serde_json::json!({"stats": {"views": 10}, "top": true})),
        );
        assert!(out["stats"].as_object().unwrap().get("views").is_none());
        assert!(out.get("top").is_none());
        assert!(out.get("ghost").is_none());
    }

    #[test]
    fn inc_treats_missing_and_non_numeric_as_zero() {
        let out = apply(
            serde_json::json!({"$inc": {"hits": 5, "label": 2, "deep.count": -1}}),
            doc(serde_json::json!({"label": "oops"})),
        );
        assert_eq!(out["hits"], Value::Number(5.0));
        assert_eq!(out["label"], Value::Number(2.0));
        assert_eq!(out["deep"]["count"], Value::Number(-1.0));
    }

    #[test]
    fn inc_requires_numeric_amount() {
        let err = UpdateDoc::parse(&Value::from_json(serde_json::json!({"$inc": {"n": "x"}})))
            .unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn push_initializes_and_appends() {
        let out = apply(
            serde_json::json!({"$push": {"tags": "vip", "label": "first"}}),
            doc(serde_json::json!({"tags": ["new"], "label": "scalar"})),
        );
        assert_eq!(
            out["tags"],
            Value::Array(vec![Value::String("new".into()), Value::String("vip".into())])
        );
        // Non-array leaf is re-initialized before the push
        assert_eq!(out["label"], Value::Array(vec![Value::String("first".into())]));
    }

    #[test]
    fn add_to_set_deduplicates() {
        let out = apply(
            serde_json::json!({"$addToSet": {"tags": "vip"}}),
            doc(serde_json::json!({"tags": ["vip", "new"]})),
        );
        assert_eq!(out["tags"].as_array().unwrap().len(), 2);

        let out = apply(
            serde_json::json!({"$addToSet": {"tags": {"$each": ["a", "new", "b"]}}}),
            out,
        );
        let tags = out["tags"].as_array().unwrap();
        assert_eq!(tags.len(), 4);
    }

    #[test]
    fn pull_removes_matching_elements() {
        let out = apply(
            serde_json::json!({"$pull": {"nums": 2}}),
            doc(serde_json::json!({"nums": [1, 2, 3, 2]})),
        );
        assert_eq!(
            out["nums"],
            Value::Array(vec![Value::Number(1.0), Value::Number(3.0)])
        );

        let out = apply(serde_json::json!({"$pull": {"nums": {"$in": [1, 3]}}}), out);
        assert!(out["nums"].as_array().unwrap().is_empty());
    }

    #[test]
    fn unknown_operators_are_ignored() {
        let out = apply(
            serde_json::json!({"$rename": {"a": "b"}, "$set": {"c": 1}}),
            doc(serde_json::json!({"a": 1})),
        );
        assert_eq!(out["a"], Value::Number(1.0));
        assert_eq!(out["c"], Value::Number(1.0));
    }

    #[test]
    fn non_object_spec_is_rejected() {
        let err = UpdateDoc::parse(&Value::from_json(serde_json::json!([1, 2]))).unwrap_err();
        assert_eq!(err.code(), 400);
    }
}
