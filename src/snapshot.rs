use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::LoadError;
use crate::models::RecordSet;

pub fn load(path: &Path) -> Result<RecordSet, LoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records = from_json_str(&raw)?;
    tracing::info!(
        path = %path.display(),
        enrollments = records.enrollments.len(),
        courses = records.courses.len(),
        "snapshot loaded"
    );
    Ok(records)
}

/// Parses a snapshot object. Missing or non-array sections become empty lists
/// and elements that do not fit the record shape are dropped.
pub fn from_json_str(raw: &str) -> Result<RecordSet, LoadError> {
    let value: Value = serde_json::from_str(raw)?;
    let sections = match value {
        Value::Object(sections) => sections,
        other => return Err(LoadError::NotAnObject(kind_of(&other))),
    };

    Ok(RecordSet {
        enrollments: section(&sections, "enrollments"),
        courses: section(&sections, "courses"),
        assessments: section(&sections, "assessments"),
        grades: section(&sections, "grades"),
        program_outcomes: section(&sections, "program_outcomes"),
        po_achievements: section(&sections, "po_achievements"),
    })
}

fn section<T: DeserializeOwned>(sections: &Map<String, Value>, key: &str) -> Vec<T> {
    let items = match sections.get(key) {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) => return Vec::new(),
        Some(other) => {
            tracing::warn!(section = key, found = kind_of(other), "expected an array, using empty list");
            return Vec::new();
        }
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(position, item)| match serde_json::from_value::<T>(item.clone()) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(section = key, position, error = %err, "skipping malformed record");
                None
            }
        })
        .collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
