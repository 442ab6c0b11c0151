//! Row → search document encoding.
//!
//! Rows arrive as JSON objects (one key per column). The encoder turns each
//! into an index document and joins them into the newline-delimited bulk
//! format accepted by `bulk_upsert`.
//!
//! # Integer precision
//!
//! The search engine parses numbers as IEEE doubles, which only represent
//! integers exactly up to ±(2^53 − 1). Two rules keep digits intact:
//!
//! | Value | Column mapped to `string` | Any other column |
//! |-------|---------------------------|------------------|
//! | number within ±(2^53 − 1) | exact digit string | number, unchanged |
//! | integer outside ±(2^53 − 1) | exact digit string | exact digit string |
//!
//! The out-of-range rule also applies inside nested arrays and objects.
//! Rows must be parsed with `serde_json`'s `arbitrary_precision` feature
//! (enabled by this crate) so that the digits survive parsing in the first
//! place.

use std::collections::HashSet;

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::models::ColumnInfo;
use crate::schema::FieldType;
use crate::type_map::map_type;

/// Largest integer an IEEE double represents exactly.
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("row {position} is not a JSON object (found {found})")]
    NotAnObject { position: usize, found: &'static str },

    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Converts source rows into index documents.
#[derive(Debug, Clone)]
pub struct DocumentEncoder {
    id_column: String,
    string_columns: HashSet<String>,
}

impl DocumentEncoder {
    pub fn new(id_column: impl Into<String>) -> Self {
        Self {
            id_column: id_column.into(),
            string_columns: HashSet::new(),
        }
    }

    /// Use described columns as type hints: any column whose native type
    /// maps to a `string` field has its numbers emitted as strings.
    pub fn with_columns(mut self, columns: &[ColumnInfo]) -> Self {
        self.string_columns = columns
            .iter()
            .filter(|c| map_type(&c.data_type) == FieldType::String)
            .map(|c| c.name.clone())
            .collect();
        self
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Encode one row. The id column is emitted first, as a string `id`.
    /// When it is missing or null the row's own `id` column is used, also as
    /// a string; a row with neither lets the engine assign an id.
    pub fn encode_row(&self, row: &Map<String, Value>) -> Map<String, Value> {
        let mut doc = Map::with_capacity(row.len() + 1);
        if let Some(id) = row.get(&self.id_column).and_then(id_string) {
            doc.insert("id".to_string(), Value::String(id));
        }
        for (column, value) in row {
            if column == "id" {
                if !doc.contains_key("id") {
                    if let Some(id) = id_string(value) {
                        doc.insert("id".to_string(), Value::String(id));
                    }
                }
                continue;
            }
            let encoded = if self.string_columns.contains(column) {
                stringify_number(value).unwrap_or_else(|| preserve_large_integers(value))
            } else {
                preserve_large_integers(value)
            };
            doc.insert(column.clone(), encoded);
        }
        doc
    }

    /// Encode a batch. Fails on the first row that is not an object, before
    /// anything is built.
    pub fn encode_rows(&self, rows: &[Value]) -> Result<Vec<Map<String, Value>>, EncodeError> {
        let objects = rows
            .iter()
            .enumerate()
            .map(|(position, row)| {
                row.as_object().ok_or(EncodeError::NotAnObject {
                    position,
                    found: value_kind(row),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(objects.into_iter().map(|row| self.encode_row(row)).collect())
    }

    /// Encode rows straight to the newline-delimited bulk format.
    pub fn encode_jsonl(&self, rows: &[Value]) -> Result<String, EncodeError> {
        to_jsonl(&self.encode_rows(rows)?)
    }
}

/// One serialized document per line, no trailing newline.
pub fn to_jsonl(docs: &[Map<String, Value>]) -> Result<String, EncodeError> {
    let lines = docs
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

/// Name of a JSON value's type, for error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn stringify_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => Some(Value::String(n.to_string())),
        _ => None,
    }
}

fn preserve_large_integers(value: &Value) -> Value {
    match value {
        Value::Number(n) if exceeds_safe_integer(n) => Value::String(n.to_string()),
        Value::Array(items) => Value::Array(items.iter().map(preserve_large_integers).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), preserve_large_integers(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn exceeds_safe_integer(n: &Number) -> bool {
    if let Some(i) = n.as_i64() {
        return i.unsigned_abs() > MAX_SAFE_INTEGER;
    }
    if let Some(u) = n.as_u64() {
        return u > MAX_SAFE_INTEGER;
    }
    // Integer literal too wide for 64 bits; only reachable with
    // arbitrary_precision, where to_string() yields the source digits.
    is_integer_literal(n)
}

fn is_integer_literal(n: &Number) -> bool {
    let text = n.to_string();
    let digits = text.strip_prefix('-').unwrap_or(&text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HUGE: &str = "123456789012345678901234567890";

    fn rows(text: &str) -> Vec<Value> {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn huge_bigint_keeps_exact_digits() {
        let columns = vec![ColumnInfo::new("id", "integer"), ColumnInfo::new("big", "bigint")];
        let encoder = DocumentEncoder::new("id").with_columns(&columns);
        let input = rows(&format!(r#"[{{"id": 1, "big": {HUGE}}}]"#));

        let docs = encoder.encode_rows(&input).unwrap();
        assert_eq!(docs[0]["big"], Value::String(HUGE.into()));

        let jsonl = encoder.encode_jsonl(&input).unwrap();
        assert!(jsonl.contains(&format!(r#""big":"{HUGE}""#)), "{jsonl}");
    }

    #[test]
    fn huge_integers_are_strings_without_column_hints() {
        let encoder = DocumentEncoder::new("id");
        let input = rows(&format!(
            r#"[{{"id": "a", "n": {HUGE}, "nested": {{"xs": [1, -{HUGE}]}}}}]"#
        ));
        let doc = &encoder.encode_rows(&input).unwrap()[0];
        assert_eq!(doc["n"], json!(HUGE));
        assert_eq!(doc["nested"]["xs"][0], json!(1));
        assert_eq!(doc["nested"]["xs"][1], json!(format!("-{HUGE}")));
    }

    #[test]
    fn safe_range_boundary() {
        let encoder = DocumentEncoder::new("id");
        let input = rows(r#"[{"a": 9007199254740991, "b": 9007199254740992, "c": -9007199254740992}]"#);
        let doc = &encoder.encode_rows(&input).unwrap()[0];
        assert!(doc["a"].is_number());
        assert_eq!(doc["b"], json!("9007199254740992"));
        assert_eq!(doc["c"], json!("-9007199254740992"));
    }

    #[test]
    fn string_columns_stringify_small_numbers() {
        let columns = vec![ColumnInfo::new("code", "bigint"), ColumnInfo::new("qty", "int4")];
        let encoder = DocumentEncoder::new("id").with_columns(&columns);
        let doc = encoder.encode_row(json!({ "code": 42, "qty": 7 }).as_object().unwrap());
        assert_eq!(doc["code"], json!("42"));
        assert_eq!(doc["qty"], json!(7));
    }

    #[test]
    fn floats_pass_through() {
        let encoder = DocumentEncoder::new("id");
        let doc = encoder.encode_row(json!({ "score": 1.5 }).as_object().unwrap());
        assert_eq!(doc["score"], json!(1.5));
    }

    #[test]
    fn id_is_always_a_string_and_first() {
        let encoder = DocumentEncoder::new("id");
        let doc = encoder.encode_row(json!({ "title": "x", "id": 17 }).as_object().unwrap());
        assert_eq!(doc.keys().next().map(String::as_str), Some("id"));
        assert_eq!(doc["id"], json!("17"));
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn custom_id_column() {
        let encoder = DocumentEncoder::new("user_id");
        let doc = encoder.encode_row(json!({ "user_id": 5, "name": "n" }).as_object().unwrap());
        assert_eq!(doc["id"], json!("5"));
        assert_eq!(doc["user_id"], json!(5));
    }

    #[test]
    fn row_id_backs_up_a_missing_custom_id_as_a_string() {
        let encoder = DocumentEncoder::new("user_id");
        let missing = encoder.encode_row(json!({ "id": 9, "name": "n" }).as_object().unwrap());
        assert_eq!(missing["id"], json!("9"));

        let null = encoder.encode_row(json!({ "user_id": null, "id": 10 }).as_object().unwrap());
        assert_eq!(null["id"], json!("10"));
        assert_eq!(null["user_id"], json!(null));

        let neither = encoder.encode_row(json!({ "user_id": null, "id": null }).as_object().unwrap());
        assert!(neither.get("id").is_none());
    }

    #[test]
    fn null_id_is_left_to_the_engine() {
        let encoder = DocumentEncoder::new("id");
        let doc = encoder.encode_row(json!({ "id": null, "t": 1 }).as_object().unwrap());
        assert!(doc.get("id").is_none());
        assert_eq!(doc["t"], json!(1));
    }

    #[test]
    fn non_object_rows_fail_fast() {
        let encoder = DocumentEncoder::new("id");
        let err = encoder
            .encode_rows(&[json!({ "id": 1 }), json!([1, 2])])
            .unwrap_err();
        assert!(matches!(
            err,
            EncodeError::NotAnObject { position: 1, found: "array" }
        ));
    }

    #[test]
    fn jsonl_has_one_line_per_document() {
        let encoder = DocumentEncoder::new("id");
        let jsonl = encoder
            .encode_jsonl(&[json!({ "id": 1 }), json!({ "id": 2 })])
            .unwrap();
        assert_eq!(jsonl, "{\"id\":\"1\"}\n{\"id\":\"2\"}");
        assert_eq!(encoder.encode_jsonl(&[]).unwrap(), "");
    }
}
