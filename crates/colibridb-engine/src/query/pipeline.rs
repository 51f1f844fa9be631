//! Result-shaping pipeline: sort, skip, limit, projection.
//!
//! The stage order is fixed by the read path: filter -> sort -> skip ->
//! limit -> project. Each stage operates on owned copies; callers hand in
//! cloned documents and stored state is never aliased.

use tracing::warn;

use colibridb_common::{ColibriError, Document, Result, Value};

use super::path::{Resolved, resolve};

/// Decoded limit: a count or everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    All,
    Count(usize),
}

/// Decode a skip value: a non-negative integer, defaulting to 0.
pub fn parse_skip(raw: Option<&Value>) -> Result<usize> {
    match raw {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
        Some(other) => Err(ColibriError::Validation(format!(
            "skip must be a non-negative integer, got {other}"
        ))),
    }
}

/// Decode a limit value: a non-negative integer or the literal `"all"`.
pub fn parse_limit(raw: Option<&Value>) -> Result<Limit> {
    match raw {
        None | Some(Value::Null) => Ok(Limit::All),
        Some(Value::String(s)) if s == "all" => Ok(Limit::All),
        Some(Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => Ok(Limit::Count(*n as usize)),
        Some(other) => Err(ColibriError::Validation(format!(
            "limit must be a non-negative integer or \"all\", got {other}"
        ))),
    }
}

/// Apply skip then limit in place.
pub fn apply_window(docs: &mut Vec<Document>, skip: usize, limit: Limit) {
    if skip > 0 {
        if skip >= docs.len() {
            docs.clear();
        } else {
            docs.drain(..skip);
        }
    }
    if let Limit::Count(n) = limit {
        docs.truncate(n);
    }
}

// Sort

/// Sort documents by an ordered `{path: ±1}` mapping.
///
/// Comparison is lexicographic across the listed keys, resolving each path
/// per document; absent sorts before any present value. The cross-type
/// order is the canonical type-rank order, stable between runs.
pub fn sort_documents(docs: &mut [Document], sort: &Value) -> Result<()> {
    let spec = sort.as_object().ok_or_else(|| {
        ColibriError::Validation(format!("sort must be an object, got {}", sort.type_name()))
    })?;

    let mut keys: Vec<(&str, i8)> = Vec::with_capacity(spec.len());
    for (path, direction) in spec {
        match direction.as_f64() {
            Some(d) if d == 1.0 => keys.push((path, 1)),
            Some(d) if d == -1.0 => keys.push((path, -1)),
            _ => {
                return Err(ColibriError::Validation(format!(
                    "sort direction for '{path}' must be 1 or -1"
                )));
            }
        }
    }

    docs.sort_by(|a, b| {
        for (path, direction) in &keys {
            let left = resolve(a, path);
            let right = resolve(b, path);
            let ord = match (&left, &right) {
                (Resolved::Absent, Resolved::Absent) => std::cmp::Ordering::Equal,
                (Resolved::Absent, Resolved::Found(_)) => std::cmp::Ordering::Less,
                (Resolved::Found(_), Resolved::Absent) => std::cmp::Ordering::Greater,
                (Resolved::Found(l), Resolved::Found(r)) => l.canonical_cmp(r),
            };
            let ord = if *direction < 0 { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });

    Ok(())
}

// Projection

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProjectionMode {
    Include,
    Exclude,
}

/// Apply a projection to a result set.
///
/// Values of 1/true include, 0/false exclude; anything else is a validation
/// error. Mixing the two modes is unsupported: the documents are returned
/// untouched with a warning.
pub fn project(docs: Vec<Document>, projection: &Value) -> Result<Vec<Document>> {
    let spec = projection.as_object().ok_or_else(|| {
        ColibriError::Validation(format!(
            "projection must be an object, got {}",
            projection.type_name()
        ))
    })?;

    if spec.is_empty() {
        return Ok(docs);
    }

    let mut mode: Option<ProjectionMode> = None;
    for (path, flag) in spec {
        let field_mode = match flag {
            Value::Bool(true) => ProjectionMode::Include,
            Value::Bool(false) => ProjectionMode::Exclude,
            Value::Number(n) if *n == 1.0 => ProjectionMode::Include,
            Value::Number(n) if *n == 0.0 => ProjectionMode::Exclude,
            other => {
                return Err(ColibriError::Validation(format!(
                    "projection value for '{path}' must be 0/1 or a boolean, got {other}"
                )));
            }
        };
        match mode {
            None => mode = Some(field_mode),
            Some(m) if m == field_mode => {}
            Some(_) => {
                warn!("mixed include/exclude projection is unsupported; returning full documents");
                return Ok(docs);
            }
        }
    }

    let mode = match mode {
        Some(m) => m,
        None => return Ok(docs),
    };

    let out = docs
        .into_iter()
        .map(|doc| match mode {
            ProjectionMode::Include => include_fields(&doc, spec.keys()),
            ProjectionMode::Exclude => exclude_fields(doc, spec.keys()),
        })
        .collect();
    Ok(out)
}

/// Inclusion: a fresh document with exactly the named fields. Dotted paths
/// come back as flat keys equal to the dotted path.
fn include_fields<'a>(doc: &Document, paths: impl Iterator<Item = &'a String>) -> Document {
    let mut out = Document::new();
    for path in paths {
        if let Resolved::Found(value) = resolve(doc, path) {
            out.insert(path.clone(), value);
        }
    }
    out
}

/// Exclusion: a deep copy with the named leaves removed. Dotted paths
/// delete the leaf only, walking objects.
fn exclude_fields<'a>(mut doc: Document, paths: impl Iterator<Item = &'a String>) -> Document {
    for path in paths {
        if !path.contains('.') {
            doc.shift_remove(path.as_str());
            continue;
        }

        let segments: Vec<&str> = path.split('.').collect();
        let mut current: Option<&mut Value> = doc.get_mut(segments[0]);
        for segment in &segments[1..segments.len() - 1] {
            current = match current {
                Some(Value::Object(obj)) => obj.get_mut(*segment),
                _ => None,
            };
        }
        if let Some(Value::Object(obj)) = current {
            obj.shift_remove(segments[segments.len() - 1]);
        }
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: serde_json::Value) -> Document {
        Value::from_json(json).into_object().unwrap()
    }

    fn docs(items: Vec<serde_json::Value>) -> Vec<Document> {
        items.into_iter().map(doc).collect()
    }

    #[test]
    fn skip_and_limit_window() {
        let mut d = docs(vec![
            serde_json::json!({"n": 1}),
            serde_json::json!({"n": 2}),
            serde_json::json!({"n": 3}),
        ]);
        apply_window(&mut d, 1, Limit::Count(1));
        assert_eq!(d.len(), 1);
        assert_eq!(d[0]["n"], Value::Number(2.0));

        let mut d = docs(vec![serde_json::json!({"n": 1})]);
        apply_window(&mut d, 5, Limit::All);
        assert!(d.is_empty());
    }

    #[test]
    fn limit_all_literal_and_validation() {
        assert_eq!(parse_limit(Some(&Value::String("all".into()))).unwrap(), Limit::All);
        assert_eq!(parse_limit(Some(&Value::Number(3.0))).unwrap(), Limit::Count(3));
        assert_eq!(parse_limit(None).unwrap(), Limit::All);
        assert!(parse_limit(Some(&Value::Number(-1.0))).is_err());
        assert!(parse_limit(Some(&Value::String("some".into()))).is_err());
        assert!(parse_skip(Some(&Value::Number(-2.0))).is_err());
    }

    #[test]
    fn sort_by_multiple_keys_and_direction() {
        let mut d = docs(vec![
            serde_json::json!({"a": 1, "b": "x"}),
            serde_json::json!({"a": 0, "b": "z"}),
            serde_json::json!({"a": 1, "b": "y"}),
        ]);
        sort_documents(&mut d, &Value::from_json(serde_json::json!({"a": 1, "b": -1}))).unwrap();
        let order: Vec<(f64, &str)> = d
            .iter()
            .map(|doc| (doc["a"].as_f64().unwrap(), doc["b"].as_str().unwrap()))
            .collect();
        assert_eq!(order, vec![(0.0, "z"), (1.0, "y"), (1.0, "x")]);
    }

    #[test]
    fn sort_absent_before_present() {
        let mut d = docs(vec![
            serde_json::json!({"a": 5}),
            serde_json::json!({"b": 1}),
        ]);
        sort_documents(&mut d, &Value::from_json(serde_json::json!({"a": 1}))).unwrap();
        assert!(d[0].get("a").is_none());
    }

    #[test]
    fn sort_rejects_bad_direction() {
        let mut d = docs(vec![]);
        let err =
            sort_documents(&mut d, &Value::from_json(serde_json::json!({"a": 2}))).unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn include_projection_flattens_dotted_paths() {
        let d = docs(vec![serde_json::json!({
            "id": "x", "name": "Alice", "stats": {"views": 9}, "extra": true
        })]);
        let out = project(d, &Value::from_json(serde_json::json!({"name": 1, "stats.views": 1})))
            .unwrap();
        let keys: Vec<&str> = out[0].keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["name", "stats.views"]);
        assert_eq!(out[0]["stats.views"], Value::Number(9.0));
    }

    #[test]
    fn exclude_projection_removes_leaves() {
        let d = docs(vec![serde_json::json!({
            "id": "x", "secret": 1, "stats": {"views": 9, "likes": 2}
        })]);
        let out = project(
            d,
            &Value::from_json(serde_json::json!({"secret": 0, "stats.likes": 0})),
        )
        .unwrap();
        assert!(out[0].get("secret").is_none());
        assert!(out[0]["stats"].as_object().unwrap().get("likes").is_none());
        assert_eq!(out[0]["stats"]["views"], Value::Number(9.0));
    }

    #[test]
    fn mixed_projection_returns_untouched() {
        let d = docs(vec![serde_json::json!({"a": 1, "b": 2})]);
        let out = project(d, &Value::from_json(serde_json::json!({"a": 1, "b": 0}))).unwrap();
        assert_eq!(out[0].len(), 2);
    }

    #[test]
    fn invalid_projection_value_is_rejected() {
        let d = docs(vec![]);
        let err = project(d, &Value::from_json(serde_json::json!({"a": "yes"}))).unwrap_err();
        assert_eq!(err.code(), 400);
    }
}
