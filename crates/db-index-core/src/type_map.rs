//! Native column type → search field type mapping.
//!
//! [`map_type`] is total: every input produces one of the [`FieldType`]s
//! below, and anything unrecognised degrades to [`FieldType::String`] so an
//! unmapped type never blocks schema creation.
//!
//! Rules are checked in order, first match wins:
//!
//! | Rule | Match | Result |
//! |------|-------|--------|
//! | 1 | contains `bigint` | `string` |
//! | 2 | equals `integer`, `int`, `int4` | `int32` |
//! | 3 | contains `double`, `real`, `numeric`, `decimal`, `float` | `float` |
//! | 4 | equals `boolean`, `bool` | `bool` |
//! | 5 | contains `timestamp`, `date`, `time` | `string` |
//! | 6 | contains `text`, `char`, `uuid`, `json` | `string` |
//! | 7 | anything else | `string` |
//!
//! `bigint` maps to `string` because some drivers hand 64-bit and wider
//! integers back as text, and the index must keep the exact digits.

use crate::schema::FieldType;

const INT32_NAMES: &[&str] = &["integer", "int", "int4"];
const FLOAT_MARKERS: &[&str] = &["double", "real", "numeric", "decimal", "float"];
const BOOL_NAMES: &[&str] = &["boolean", "bool"];
const TEMPORAL_MARKERS: &[&str] = &["timestamp", "date", "time"];
const TEXT_MARKERS: &[&str] = &["text", "char", "uuid", "json"];

/// Map a native column type string (case-insensitive) to a search field type.
pub fn map_type(native: &str) -> FieldType {
    let t = native.trim().to_lowercase();
    let contains_any = |markers: &[&str]| markers.iter().any(|m| t.contains(m));

    if t.contains("bigint") {
        return FieldType::String;
    }
    if INT32_NAMES.contains(&t.as_str()) {
        return FieldType::Int32;
    }
    if contains_any(FLOAT_MARKERS) {
        return FieldType::Float;
    }
    if BOOL_NAMES.contains(&t.as_str()) {
        return FieldType::Bool;
    }
    if contains_any(TEMPORAL_MARKERS) || contains_any(TEXT_MARKERS) {
        return FieldType::String;
    }
    FieldType::String
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bigint_maps_to_string() {
        assert_eq!(map_type("bigint"), FieldType::String);
        assert_eq!(map_type("BIGINT"), FieldType::String);
        assert_eq!(map_type("bigint unsigned"), FieldType::String);
    }

    #[test]
    fn int32_family_is_exact_match() {
        assert_eq!(map_type("integer"), FieldType::Int32);
        assert_eq!(map_type("INT"), FieldType::Int32);
        assert_eq!(map_type("int4"), FieldType::Int32);
        // smallint is neither an exact int32 name nor a float marker
        assert_eq!(map_type("smallint"), FieldType::String);
    }

    #[test]
    fn floating_and_decimal_types() {
        for t in [
            "double precision",
            "real",
            "numeric",
            "decimal(10,2)",
            "float8",
        ] {
            assert_eq!(map_type(t), FieldType::Float, "{t}");
        }
    }

    #[test]
    fn booleans() {
        assert_eq!(map_type("boolean"), FieldType::Bool);
        assert_eq!(map_type("Bool"), FieldType::Bool);
    }

    #[test]
    fn temporal_and_text_types_are_strings() {
        for t in [
            "timestamp with time zone",
            "date",
            "time without time zone",
            "text",
            "character varying",
            "uuid",
            "jsonb",
        ] {
            assert_eq!(map_type(t), FieldType::String, "{t}");
        }
    }

    #[test]
    fn unknown_types_fall_back_to_string() {
        assert_eq!(map_type(""), FieldType::String);
        assert_eq!(map_type("tsvector"), FieldType::String);
        assert_eq!(map_type("geometry(Point,4326)"), FieldType::String);
    }

    #[test]
    fn mapping_is_deterministic() {
        for t in ["bigint", "int4", "real", "bool", "mystery"] {
            assert_eq!(map_type(t), map_type(t));
        }
    }
}
