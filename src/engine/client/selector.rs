//! Mango selector evaluation for the local store

use serde_json::{Map, Value};
use std::cmp::Ordering;

use regex::Regex;

use super::{ClientResult, Doc, MangoQuery, SortDirection};
use crate::engine::error::ClientError;

/// Resolve a dotted field path (`address.city`) inside a document
pub fn lookup<'a>(doc: &'a Doc, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Check whether a document satisfies a selector
pub fn matches(selector: &Value, doc: &Doc) -> ClientResult<bool> {
    let conditions = match selector {
        Value::Object(map) => map,
        Value::Null => return Ok(true),
        _ => return Err(invalid("Selector must be a JSON object")),
    };

    for (key, condition) in conditions {
        let ok = match key.as_str() {
            "$and" => all_of(condition, doc)?,
            "$or" => any_of(condition, doc)?,
            "$nor" => !any_of(condition, doc)?,
            "$not" => !matches(condition, doc)?,
            op if op.starts_with('$') => {
                return Err(invalid(&format!("Invalid operator: {}", op)));
            }
            field => field_matches(lookup(doc, field), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }

    Ok(true)
}

fn all_of(condition: &Value, doc: &Doc) -> ClientResult<bool> {
    for sub in as_array(condition)? {
        if !matches(sub, doc)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_of(condition: &Value, doc: &Doc) -> ClientResult<bool> {
    for sub in as_array(condition)? {
        if matches(sub, doc)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn as_array(condition: &Value) -> ClientResult<&Vec<Value>> {
    condition
        .as_array()
        .ok_or_else(|| invalid("Combination operators expect an array"))
}

fn field_matches(value: Option<&Value>, condition: &Value) -> ClientResult<bool> {
    match condition {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => operators_match(value, ops),
        expected => Ok(value == Some(expected)),
    }
}

fn operators_match(value: Option<&Value>, ops: &Map<String, Value>) -> ClientResult<bool> {
    for (op, operand) in ops {
        let ok = match (op.as_str(), value) {
            ("$exists", val) => val.is_some() == operand.as_bool().unwrap_or(true),
            ("$not", val) => !field_matches(val, operand)?,
            (_, None) => false,
            ("$eq", Some(actual)) => actual == operand,
            ("$ne", Some(actual)) => actual != operand,
            ("$gt", Some(actual)) => compare_values(actual, operand) == Some(Ordering::Greater),
            ("$gte", Some(actual)) => {
                matches!(compare_values(actual, operand), Some(Ordering::Greater | Ordering::Equal))
            }
            ("$lt", Some(actual)) => compare_values(actual, operand) == Some(Ordering::Less),
            ("$lte", Some(actual)) => {
                matches!(compare_values(actual, operand), Some(Ordering::Less | Ordering::Equal))
            }
            ("$in", Some(actual)) => as_array(operand)?.contains(actual),
            ("$nin", Some(actual)) => !as_array(operand)?.contains(actual),
            ("$regex", Some(Value::String(s))) => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| invalid("$regex expects a string"))?;
                Regex::new(pattern)
                    .map_err(|e| invalid(&format!("Invalid regex: {}", e)))?
                    .is_match(s)
            }
            ("$regex", Some(_)) => false,
            (other, Some(_)) => return Err(invalid(&format!("Invalid operator: {}", other))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Compare two JSON values of the same kind
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64()?;
            let b = b.as_f64()?;
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Every field a selector refers to
pub fn selector_fields(selector: &Value) -> Vec<String> {
    let mut fields = Vec::new();
    collect_fields(selector, &mut fields);
    fields
}

fn collect_fields(selector: &Value, out: &mut Vec<String>) {
    let Value::Object(map) = selector else {
        return;
    };
    for (key, condition) in map {
        if key.starts_with('$') {
            match condition {
                Value::Array(subs) => subs.iter().for_each(|s| collect_fields(s, out)),
                other => collect_fields(other, out),
            }
        } else if !out.contains(key) {
            out.push(key.clone());
        }
    }
}

/// Apply sort, skip, limit and projection to already-filtered documents
pub fn shape(query: &MangoQuery, mut docs: Vec<Doc>) -> Vec<Doc> {
    if let Some(sort) = &query.sort {
        docs.sort_by(|a, b| {
            for field in sort {
                let ordering = match (lookup(a, field.field()), lookup(b, field.field())) {
                    (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                let ordering = match field.direction() {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let docs = docs.into_iter().skip(query.skip.unwrap_or(0));
    let docs: Vec<Doc> = match query.limit {
        Some(n) => docs.take(n).collect(),
        None => docs.collect(),
    };

    match &query.fields {
        Some(fields) if !fields.is_empty() => docs.into_iter().map(|d| project(&d, fields)).collect(),
        _ => docs,
    }
}

fn project(doc: &Doc, fields: &[String]) -> Doc {
    let mut out = Map::new();
    for field in fields {
        if let Some(value) = lookup(doc, field) {
            insert_path(&mut out, field, value.clone());
        }
    }
    out
}

/// Place `value` at a dotted path, creating the intermediate objects
fn insert_path(out: &mut Doc, path: &str, value: Value) {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut current = out;
    for part in parents.into_iter().flat_map(|p| p.split('.')) {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(leaf.to_string(), value);
}

fn invalid(reason: &str) -> ClientError {
    ClientError::with_status(400, "invalid_operator", reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Doc {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_implicit_equality_and_operators() {
        let d = doc(json!({"name": "Alice", "age": 30, "address": {"city": "Porto"}}));

        assert!(matches(&json!({"name": "Alice"}), &d).unwrap());
        assert!(!matches(&json!({"name": "Bob"}), &d).unwrap());
        assert!(matches(&json!({"age": {"$gte": 30, "$lt": 40}}), &d).unwrap());
        assert!(matches(&json!({"address.city": {"$eq": "Porto"}}), &d).unwrap());
        assert!(matches(&json!({"email": {"$exists": false}}), &d).unwrap());
        assert!(matches(&json!({"name": {"$in": ["Alice", "Carol"]}}), &d).unwrap());
        assert!(matches(&json!({"name": {"$regex": "^Al"}}), &d).unwrap());
        assert!(matches(&json!({"$or": [{"age": 1}, {"age": 30}]}), &d).unwrap());
        assert!(!matches(&json!({"$and": [{"age": 30}, {"name": "Bob"}]}), &d).unwrap());
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let d = doc(json!({"age": 30}));
        let err = matches(&json!({"age": {"$near": 3}}), &d).unwrap_err();
        assert_eq!(err.status, Some(400));
    }

    #[test]
    fn test_shape_sort_skip_limit() {
        let docs = vec![
            doc(json!({"name": "Alice", "age": 30})),
            doc(json!({"name": "Bob", "age": 25})),
            doc(json!({"name": "Charlie", "age": 35})),
        ];

        let query = MangoQuery::new(json!({}))
            .sort("age", SortDirection::Desc)
            .skip(1)
            .limit(1)
            .fields(&["name"]);
        let out = shape(&query, docs);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0], doc(json!({"name": "Alice"})));
    }

    #[test]
    fn test_dotted_fields_project_nested_values() {
        let docs = vec![doc(json!({
            "name": "n",
            "age": 4,
            "address": {"city": "x", "zip": 1, "geo": {"lat": 1.5, "lng": 2.5}}
        }))];

        let query = MangoQuery::new(json!({}))
            .fields(&["address.city", "address.geo.lat", "name", "missing.path"]);
        let out = shape(&query, docs);

        assert_eq!(
            out[0],
            doc(json!({"address": {"city": "x", "geo": {"lat": 1.5}}, "name": "n"}))
        );
    }

    #[test]
    fn test_selector_fields() {
        let mut fields = selector_fields(&json!({"??table": "user", "$or": [{"age": 1}, {"name": "x"}]}));
        fields.sort();
        assert_eq!(fields, vec!["??table", "age", "name"]);
    }
}
