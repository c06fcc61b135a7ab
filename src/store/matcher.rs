//! Evaluation of the filter and update documents soft-delete writes produce.
//!
//! Filters support field equality, dotted paths into embedded documents,
//! `$and`/`$or`, and the `$exists`, `$eq`, `$ne`, `$in` and `$nin` operators.
//! Updates support `$set` and `$unset`.

use serde_json::{Map, Value};

use super::{CollectionError, Record};

/// Resolve a dotted `path` inside `record`.
#[must_use]
pub fn lookup<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = record.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Whether `record` satisfies every clause of `filter`.
pub fn matches(record: &Record, filter: &Record) -> Result<bool, CollectionError> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(record, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(record, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            operator if operator.starts_with('$') => {
                return Err(CollectionError::UnsupportedOperator(operator.to_string()));
            }
            path => matches_condition(lookup(record, path), condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(operator: &str, condition: &'a Value) -> Result<Vec<&'a Record>, CollectionError> {
    let invalid = || CollectionError::UnsupportedOperator(format!("{operator} expects an array of documents"));
    condition
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|clause| clause.as_object().ok_or_else(invalid))
        .collect()
}

fn is_operator_document(condition: &Map<String, Value>) -> bool {
    !condition.is_empty() && condition.keys().all(|k| k.starts_with('$'))
}

fn matches_condition(value: Option<&Value>, condition: &Value) -> Result<bool, CollectionError> {
    let operators = match condition {
        Value::Object(operators) if is_operator_document(operators) => operators,
        expected => return Ok(value == Some(expected)),
    };

    for (operator, argument) in operators {
        let satisfied = match operator.as_str() {
            "$exists" => {
                let wanted = argument.as_bool().ok_or_else(|| {
                    CollectionError::UnsupportedOperator("$exists expects a boolean".to_string())
                })?;
                value.is_some() == wanted
            }
            "$eq" => value == Some(argument),
            "$ne" => value != Some(argument),
            "$in" => {
                let options = candidates(operator, argument)?;
                value.is_some_and(|v| options.contains(v))
            }
            "$nin" => {
                let options = candidates(operator, argument)?;
                !value.is_some_and(|v| options.contains(v))
            }
            other => return Err(CollectionError::UnsupportedOperator(other.to_string())),
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn candidates<'a>(operator: &str, argument: &'a Value) -> Result<&'a Vec<Value>, CollectionError> {
    argument
        .as_array()
        .ok_or_else(|| CollectionError::UnsupportedOperator(format!("{operator} expects an array")))
}

/// Apply a `$set`/`$unset` update to `record`. Returns whether anything changed.
pub fn apply_update(record: &mut Record, update: &Record) -> Result<bool, CollectionError> {
    if update.is_empty() {
        return Err(CollectionError::InvalidUpdate("update document is empty".to_string()));
    }

    let mut modified = false;
    for (operator, fields) in update {
        let fields = fields.as_object().ok_or_else(|| {
            CollectionError::InvalidUpdate(format!("{operator} expects a document"))
        })?;
        match operator.as_str() {
            "$set" => {
                for (path, value) in fields {
                    modified |= set_path(record, path, value.clone())?;
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    modified |= unset_path(record, path);
                }
            }
            other => {
                return Err(CollectionError::InvalidUpdate(format!(
                    "unsupported update operator {other}"
                )));
            }
        }
    }
    Ok(modified)
}

fn set_path(record: &mut Record, path: &str, value: Value) -> Result<bool, CollectionError> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut target = record;
    if let Some(parents) = parents {
        for segment in parents.split('.') {
            let entry = target
                .entry(segment)
                .or_insert_with(|| Value::Object(Map::new()));
            target = match entry {
                Value::Object(embedded) => embedded,
                _ => {
                    return Err(CollectionError::InvalidUpdate(format!(
                        "cannot set {path}: {segment} is not a document"
                    )));
                }
            };
        }
    }

    if target.get(leaf) == Some(&value) {
        return Ok(false);
    }
    target.insert(leaf.to_string(), value);
    Ok(true)
}

fn unset_path(record: &mut Record, path: &str) -> bool {
    let Some((parents, leaf)) = path.rsplit_once('.') else {
        return record.remove(path).is_some();
    };

    let mut target = record;
    for segment in parents.split('.') {
        match target.get_mut(segment) {
            Some(Value::Object(embedded)) => target = embedded,
            _ => return false,
        }
    }
    target.remove(leaf).is_some()
}

#[cfg(test)]
#[path = "matcher_tests.rs"]
mod tests;
