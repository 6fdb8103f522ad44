//! Reads knowledge records from tabular input.
//!
//! Three layouts are accepted:
//! - CSV with a header row, chosen by a `.csv` extension
//! - a JSON array of objects
//! - JSON Lines, one object per line (blank lines ignored)
//!
//! Each object or CSV row is one record. String-valued fields contribute
//! text in column order; numbers, booleans, nulls and nested values are
//! skipped. CSV cells are typed first: empty cells are null, and cells that
//! read as a number or `true`/`false` are not text. Rows are labelled
//! `Row N` (1-based) unless they carry an `id` field, whose value then
//! becomes the label and is excluded from the text.

use std::path::Path;

use serde_json::{Map, Number, Value};

use crate::error::{RecordError, RecordResult};
use crate::types::KnowledgeRecord;

/// Field whose value, when present, labels the record instead of `Row N`.
pub const ID_FIELD: &str = "id";

/// Loads all records from `path`.
pub fn load_records(path: &Path) -> RecordResult<Vec<KnowledgeRecord>> {
    let content = std::fs::read_to_string(path).map_err(|source| RecordError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let records = parse_records(&content, path)?;
    tracing::info!(count = records.len(), path = %path.display(), "loaded knowledge records");
    Ok(records)
}

/// Parses records from already-read content.
///
/// `origin` selects CSV parsing by its extension and names the input in
/// errors.
pub fn parse_records(content: &str, origin: &Path) -> RecordResult<Vec<KnowledgeRecord>> {
    let is_csv = origin
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        parse_csv(content, origin)
    } else if content.trim_start().starts_with('[') {
        parse_array(content, origin)
    } else {
        parse_lines(content, origin)
    }
}

fn parse_array(content: &str, origin: &Path) -> RecordResult<Vec<KnowledgeRecord>> {
    let rows: Vec<Value> = serde_json::from_str(content).map_err(|e| RecordError::Parse {
        path: origin.to_path_buf(),
        line: e.line(),
        reason: e.to_string(),
    })?;

    rows.into_iter()
        .enumerate()
        .map(|(index, row)| match row {
            Value::Object(map) => Ok(record_from_object(index, map)),
            _ => Err(RecordError::NotAnObject {
                path: origin.to_path_buf(),
                index: index + 1,
            }),
        })
        .collect()
}

fn parse_lines(content: &str, origin: &Path) -> RecordResult<Vec<KnowledgeRecord>> {
    let mut records = Vec::new();
    for (line_idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: Value = serde_json::from_str(line).map_err(|e| RecordError::Parse {
            path: origin.to_path_buf(),
            line: line_idx + 1,
            reason: e.to_string(),
        })?;
        match row {
            Value::Object(map) => records.push(record_from_object(records.len(), map)),
            _ => {
                return Err(RecordError::NotAnObject {
                    path: origin.to_path_buf(),
                    index: records.len() + 1,
                });
            }
        }
    }
    Ok(records)
}

fn parse_csv(content: &str, origin: &Path) -> RecordResult<Vec<KnowledgeRecord>> {
    let csv_error = |e: csv::Error| RecordError::Parse {
        path: origin.to_path_buf(),
        line: e.position().map_or(0, |pos| pos.line() as usize),
        reason: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(content.as_bytes());
    let headers = reader.headers().map_err(csv_error)?.clone();

    reader
        .records()
        .enumerate()
        .map(|(index, row)| {
            let row = row.map_err(csv_error)?;
            let map = headers
                .iter()
                .zip(row.iter())
                .map(|(name, cell)| (name.to_string(), typed_cell(cell)))
                .collect();
            Ok(record_from_object(index, map))
        })
        .collect()
}

/// Reads a CSV cell the way a dataframe loader would type it.
fn typed_cell(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        // NaN and infinities have no JSON number
        return Number::from_f64(float).map_or(Value::Null, Value::Number);
    }
    if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(trimmed.eq_ignore_ascii_case("true"));
    }
    Value::String(cell.to_string())
}

fn record_from_object(index: usize, map: Map<String, Value>) -> KnowledgeRecord {
    let source = match map.get(ID_FIELD) {
        Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
        Some(Value::Number(id)) => id.to_string(),
        _ => format!("Row {}", index + 1),
    };

    map.into_iter()
        .filter(|(name, _)| name != ID_FIELD)
        .fold(KnowledgeRecord::new(source), |record, (name, value)| {
            match value {
                Value::String(text) => record.with_field(name, text),
                _ => record,
            }
        })
}
