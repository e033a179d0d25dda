// Rich query selectors
//
// A Mango-style subset evaluated against JSON documents:
//   {"selector": {...}, "limit": N, "skip": N, "use_index": ...}
//
// SAFETY INVARIANTS:
// 1. Parsing is total: any shape outside the supported subset is an
//    InvalidQuery error, never a silent match-all
// 2. A field that is absent never satisfies a comparison operator
// 3. Comparisons across JSON types are false, never an error

use crate::error::{LedgerError, LedgerResult};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// One parsed query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub selector: Selector,
    pub limit: Option<usize>,
    pub skip: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    And(Vec<Selector>),
    Or(Vec<Selector>),
    Not(Box<Selector>),
    Field { path: Vec<String>, condition: Condition },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    All(Vec<Condition>),
}

fn invalid(msg: impl Into<String>) -> LedgerError {
    LedgerError::InvalidQuery(msg.into())
}

// ==================== PARSING ====================

impl Query {
    pub fn parse(text: &str) -> LedgerResult<Self> {
        let root: Value =
            serde_json::from_str(text).map_err(|e| invalid(format!("query is not JSON: {}", e)))?;
        let root = root
            .as_object()
            .ok_or_else(|| invalid("query must be a JSON object"))?;

        let mut selector = None;
        let mut limit = None;
        let mut skip = 0;
        for (key, value) in root {
            match key.as_str() {
                "selector" => selector = Some(Selector::parse(value)?),
                "limit" => limit = Some(parse_count("limit", value)?),
                "skip" => skip = parse_count("skip", value)?,
                // Index hints only matter to an indexing backend.
                "use_index" => {}
                other => return Err(invalid(format!("unsupported query field {:?}", other))),
            }
        }

        Ok(Query {
            selector: selector.ok_or_else(|| invalid("query has no \"selector\""))?,
            limit,
            skip,
        })
    }

    /// Apply skip and limit to documents that already matched.
    pub fn window<T>(&self, matched: impl Iterator<Item = T>) -> Vec<T> {
        let matched = matched.skip(self.skip);
        match self.limit {
            Some(limit) => matched.take(limit).collect(),
            None => matched.collect(),
        }
    }
}

fn parse_count(field: &str, value: &Value) -> LedgerResult<usize> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| invalid(format!("{} must be a non-negative integer", field)))
}

impl Selector {
    pub fn parse(value: &Value) -> LedgerResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| invalid("selector must be a JSON object"))?;

        let mut clauses = Vec::with_capacity(object.len());
        for (key, value) in object {
            clauses.push(match key.as_str() {
                "$and" => Selector::And(parse_selector_list(key, value)?),
                "$or" => Selector::Or(parse_selector_list(key, value)?),
                "$not" => Selector::Not(Box::new(Selector::parse(value)?)),
                op if op.starts_with('$') => {
                    return Err(invalid(format!("unsupported combination operator {:?}", op)))
                }
                field => Selector::Field {
                    path: parse_path(field)?,
                    condition: Condition::parse(value)?,
                },
            });
        }

        Ok(if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            Selector::And(clauses)
        })
    }

    /// Does `doc` satisfy this selector?
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Selector::And(all) => all.iter().all(|s| s.matches(doc)),
            Selector::Or(any) => any.iter().any(|s| s.matches(doc)),
            Selector::Not(inner) => !inner.matches(doc),
            Selector::Field { path, condition } => condition.test(lookup(doc, path)),
        }
    }
}

fn parse_selector_list(op: &str, value: &Value) -> LedgerResult<Vec<Selector>> {
    let items = value
        .as_array()
        .ok_or_else(|| invalid(format!("{} expects an array of selectors", op)))?;
    if items.is_empty() {
        return Err(invalid(format!("{} needs at least one selector", op)));
    }
    items.iter().map(Selector::parse).collect()
}

fn parse_path(field: &str) -> LedgerResult<Vec<String>> {
    let path: Vec<String> = field.split('.').map(str::to_string).collect();
    if path.iter().any(String::is_empty) {
        return Err(invalid(format!("malformed field path {:?}", field)));
    }
    Ok(path)
}

fn is_operator_object(map: &Map<String, Value>) -> LedgerResult<bool> {
    let operators = map.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        Ok(false)
    } else if operators == map.len() {
        Ok(true)
    } else {
        Err(invalid("field condition mixes operators and plain fields"))
    }
}

impl Condition {
    pub fn parse(value: &Value) -> LedgerResult<Self> {
        let map = match value {
            Value::Object(map) if is_operator_object(map)? => map,
            // Implicit equality, including against whole objects.
            other => return Ok(Condition::Eq(other.clone())),
        };

        let mut conditions = Vec::with_capacity(map.len());
        for (op, arg) in map {
            conditions.push(match op.as_str() {
                "$eq" => Condition::Eq(arg.clone()),
                "$ne" => Condition::Ne(arg.clone()),
                "$gt" => Condition::Gt(arg.clone()),
                "$gte" => Condition::Gte(arg.clone()),
                "$lt" => Condition::Lt(arg.clone()),
                "$lte" => Condition::Lte(arg.clone()),
                "$in" => Condition::In(parse_array(op, arg)?),
                "$nin" => Condition::Nin(parse_array(op, arg)?),
                "$exists" => Condition::Exists(
                    arg.as_bool()
                        .ok_or_else(|| invalid("$exists expects a boolean"))?,
                ),
                other => return Err(invalid(format!("unsupported field operator {:?}", other))),
            });
        }

        Ok(if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Condition::All(conditions)
        })
    }

    /// `field` is `None` when the path does not resolve.
    pub fn test(&self, field: Option<&Value>) -> bool {
        match self {
            Condition::Exists(expected) => field.is_some() == *expected,
            Condition::All(all) => all.iter().all(|c| c.test(field)),
            _ => match field {
                None => false,
                Some(actual) => self.test_present(actual),
            },
        }
    }

    fn test_present(&self, actual: &Value) -> bool {
        match self {
            Condition::Eq(v) => json_eq(actual, v),
            Condition::Ne(v) => !json_eq(actual, v),
            Condition::Gt(v) => json_cmp(actual, v) == Some(Ordering::Greater),
            Condition::Gte(v) => matches!(json_cmp(actual, v), Some(Ordering::Greater | Ordering::Equal)),
            Condition::Lt(v) => json_cmp(actual, v) == Some(Ordering::Less),
            Condition::Lte(v) => matches!(json_cmp(actual, v), Some(Ordering::Less | Ordering::Equal)),
            Condition::In(vs) => vs.iter().any(|v| json_eq(actual, v)),
            Condition::Nin(vs) => !vs.iter().any(|v| json_eq(actual, v)),
            Condition::Exists(_) | Condition::All(_) => self.test(Some(actual)),
        }
    }
}

fn parse_array(op: &str, value: &Value) -> LedgerResult<Vec<Value>> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| invalid(format!("{} expects an array", op)))
}

// ==================== EVALUATION ====================

fn lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |node, segment| node.as_object()?.get(segment))
}

/// Numbers compare by value, so `4` equals `4.0`.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn json_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
