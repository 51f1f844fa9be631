//! Filter decoding and evaluation.
//!
//! A raw filter document is decoded once into a [`Filter`] tree — logical
//! connectives over per-field predicates — so matching a candidate document
//! is a walk over pre-parsed operators instead of repeated key-prefix
//! sniffing. Evaluation is a pure function of (document, filter).

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use tracing::warn;

use colibridb_common::{ColibriError, Document, Result, Value};

use super::path::{Resolved, resolve};

// Filter tree

/// Decoded filter tree.
#[derive(Debug, Clone)]
pub enum Filter {
    /// All branches match (also the decoded form of a multi-key filter).
    And(Vec<Filter>),
    /// At least one branch matches.
    Or(Vec<Filter>),
    /// No branch matches.
    Nor(Vec<Filter>),
    /// The branch does not match.
    Not(Box<Filter>),
    /// A per-field operator map, e.g. `score: {$gte: 1000}`.
    Field { path: String, predicates: Vec<Predicate> },
    /// Direct value comparison, e.g. `tags: "vip"`.
    Equality { path: String, value: Value },
}

/// One decoded per-field operator.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
    Mod { divisor: f64, remainder: f64 },
    Not(Vec<Predicate>),
    /// Malformed operator payload; never matches.
    Never,
}

impl Filter {
    /// Decode a raw filter value into a filter tree.
    ///
    /// The top level must be an object (anything else is a validation
    /// error). Unknown `$` operators inside per-field maps are skipped with
    /// a warning; malformed payloads decode to [`Predicate::Never`].
    pub fn parse(raw: &Value) -> Result<Filter> {
        let obj = raw.as_object().ok_or_else(|| {
            ColibriError::Validation(format!("filter must be an object, got {}", raw.type_name()))
        })?;
        Self::parse_object(obj)
    }

    fn parse_object(obj: &Document) -> Result<Filter> {
        let mut branches = Vec::with_capacity(obj.len());

        for (key, value) in obj {
            match key.as_str() {
                "$and" => branches.push(Filter::And(Self::parse_list(key, value)?)),
                "$or" => branches.push(Filter::Or(Self::parse_list(key, value)?)),
                "$nor" => branches.push(Filter::Nor(Self::parse_list(key, value)?)),
                "$not" => branches.push(Filter::Not(Box::new(Filter::parse(value)?))),
                _ if key.starts_with('$') => {
                    warn!(operator = %key, "ignoring unknown top-level filter operator");
                }
                path => branches.push(Self::parse_field(path, value)),
            }
        }

        // An empty filter matches everything: And([]) is vacuously true.
        Ok(if branches.len() == 1 {
            branches.swap_remove(0)
        } else {
            Filter::And(branches)
        })
    }

    fn parse_list(op: &str, value: &Value) -> Result<Vec<Filter>> {
        let items = value.as_array().ok_or_else(|| {
            ColibriError::Validation(format!("{op} expects an array of filters"))
        })?;
        items.iter().map(Filter::parse).collect()
    }

    fn parse_field(path: &str, value: &Value) -> Filter {
        if let Some(map) = value.as_object() {
            if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) {
                return Filter::Field {
                    path: path.to_string(),
                    predicates: parse_operator_map(map),
                };
            }
        }
        Filter::Equality {
            path: path.to_string(),
            value: value.clone(),
        }
    }

    /// Match a document against this filter.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::And(branches) => branches.iter().all(|f| f.matches(doc)),
            Filter::Or(branches) => branches.iter().any(|f| f.matches(doc)),
            Filter::Nor(branches) => !branches.iter().any(|f| f.matches(doc)),
            Filter::Not(inner) => !inner.matches(doc),
            Filter::Field { path, predicates } => {
                let resolved = resolve(doc, path);
                predicates.iter().all(|p| p.eval(&resolved))
            }
            Filter::Equality { path, value } => match resolve(doc, path) {
                Resolved::Found(Value::Array(elements)) => elements.contains(value),
                Resolved::Found(actual) => actual == *value,
                // A missing field only value-matches an explicit null.
                Resolved::Absent => value.is_null(),
            },
        }
    }
}

// Operator map decoding

fn parse_operator_map(map: &Document) -> Vec<Predicate> {
    let mut predicates = Vec::with_capacity(map.len());

    for (op, payload) in map {
        match op.as_str() {
            "$eq" => predicates.push(Predicate::Eq(payload.clone())),
            "$ne" => predicates.push(Predicate::Ne(payload.clone())),
            "$gt" => predicates.push(Predicate::Gt(payload.clone())),
            "$gte" => predicates.push(Predicate::Gte(payload.clone())),
            "$lt" => predicates.push(Predicate::Lt(payload.clone())),
            "$lte" => predicates.push(Predicate::Lte(payload.clone())),
            "$in" => predicates.push(parse_membership(payload, Predicate::In)),
            "$nin" => predicates.push(parse_membership(payload, Predicate::Nin)),
            "$exists" => match payload.as_bool() {
                Some(flag) => predicates.push(Predicate::Exists(flag)),
                None => predicates.push(Predicate::Never),
            },
            "$regex" => predicates.push(parse_regex(payload, map.get("$options"))),
            "$options" => {} // consumed by $regex
            "$mod" => predicates.push(parse_mod(payload)),
            "$not" => match payload.as_object() {
                Some(inner) if inner.keys().all(|k| k.starts_with('$')) => {
                    predicates.push(Predicate::Not(parse_operator_map(inner)));
                }
                _ => predicates.push(Predicate::Never),
            },
            other => {
                warn!(operator = %other, "ignoring unknown field operator");
            }
        }
    }

    predicates
}

fn parse_membership(payload: &Value, build: fn(Vec<Value>) -> Predicate) -> Predicate {
    match payload.as_array() {
        Some(items) => build(items.clone()),
        None => Predicate::Never,
    }
}

fn parse_regex(payload: &Value, options: Option<&Value>) -> Predicate {
    let pattern = match payload.as_str() {
        Some(p) => p,
        None => return Predicate::Never,
    };

    let mut builder = RegexBuilder::new(pattern);
    if let Some(flags) = options.and_then(|v| v.as_str()) {
        for flag in flags.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                _ => &mut builder,
            };
        }
    }

    match builder.build() {
        Ok(re) => Predicate::Regex(re),
        Err(_) => Predicate::Never,
    }
}

fn parse_mod(payload: &Value) -> Predicate {
    if let Some(pair) = payload.as_array() {
        if let [divisor, remainder] = pair.as_slice() {
            if let (Some(d), Some(r)) = (divisor.as_f64(), remainder.as_f64()) {
                if d != 0.0 {
                    return Predicate::Mod { divisor: d, remainder: r };
                }
            }
        }
    }
    Predicate::Never
}

// Predicate evaluation

impl Predicate {
    /// Evaluate against a resolved field value.
    ///
    /// Array-valued fields use any-element semantics for positive operators
    /// and every-element semantics for the negated ones (`$ne`, `$nin`).
    /// Against an absent field only `$ne` and `$exists: false` hold.
    pub fn eval(&self, resolved: &Resolved) -> bool {
        let value = match resolved {
            Resolved::Absent => {
                return match self {
                    Predicate::Ne(_) => true,
                    Predicate::Exists(expected) => !expected,
                    _ => false,
                };
            }
            Resolved::Found(v) => v,
        };

        match self {
            Predicate::Exists(expected) => *expected,
            Predicate::Ne(target) => match value {
                Value::Array(elements) => elements.iter().all(|el| el != target),
                scalar => scalar != target,
            },
            Predicate::Nin(list) => match value {
                Value::Array(elements) => elements.iter().all(|el| !list.contains(el)),
                scalar => !list.contains(scalar),
            },
            Predicate::Not(inner) => !inner.iter().all(|p| p.eval(resolved)),
            _ => match value {
                Value::Array(elements) => elements.iter().any(|el| self.eval_scalar(el)),
                scalar => self.eval_scalar(scalar),
            },
        }
    }

    fn eval_scalar(&self, value: &Value) -> bool {
        match self {
            Predicate::Eq(target) => value == target,
            Predicate::Gt(target) => value.same_type_cmp(target) == Some(Ordering::Greater),
            Predicate::Gte(target) => matches!(
                value.same_type_cmp(target),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            Predicate::Lt(target) => value.same_type_cmp(target) == Some(Ordering::Less),
            Predicate::Lte(target) => matches!(
                value.same_type_cmp(target),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ),
            Predicate::In(list) => list.contains(value),
            Predicate::Regex(re) => match value {
                Value::String(s) => re.is_match(s),
                Value::Number(_) | Value::Bool(_) => re.is_match(&value.to_string()),
                _ => false,
            },
            Predicate::Mod { divisor, remainder } => match value.as_f64() {
                Some(n) => n % divisor == *remainder,
                None => false,
            },
            Predicate::Never => false,
            // Handled in eval()
            Predicate::Ne(_) | Predicate::Nin(_) | Predicate::Exists(_) | Predicate::Not(_) => {
                false
            }
        }
    }
}
