//! Flat wire representation of index schemas.
//!
//! These are the JSON shapes the search engine accepts on collection
//! creation and returns on retrieval. Conversion to and from
//! [`FieldDefinition`] is where the `embed` UI type is rewritten to
//! `float[]` + `embed` metadata and recovered again.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{EmbedConfig, FieldDefinition, FieldFlags, FieldKind, FieldType, SchemaError, DEFAULT_NUM_DIM};

fn default_true() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// `embed` annotation of a `float[]` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEmbed {
    #[serde(default)]
    pub from: Vec<String>,
    #[serde(default)]
    pub model_config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_dim: Option<u32>,
}

/// One field as sent to / received from the search engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub facet: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub index: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<bool>,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub store: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub infix: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<WireEmbed>,
}

/// Collection (index) schema as accepted by `create_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<WireField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sorting_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_nested_fields: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub token_separators: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols_to_index: Vec<String>,
}

impl EmbedConfig {
    fn to_wire(&self) -> WireEmbed {
        WireEmbed {
            from: self.from.clone(),
            model_config: self
                .model_config
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
            num_dim: Some(self.num_dim),
        }
    }

    fn from_wire(wire: WireEmbed) -> Self {
        let model_config: BTreeMap<String, String> = wire
            .model_config
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect();
        Self {
            from: wire.from,
            model_config,
            num_dim: wire.num_dim.unwrap_or(DEFAULT_NUM_DIM),
        }
    }
}

impl FieldDefinition {
    /// Flatten into the engine's field shape. Embedding fields become
    /// `float[]` with an `embed` annotation.
    pub fn to_wire(&self) -> WireField {
        let embed = self.embed_config().map(EmbedConfig::to_wire);
        WireField {
            name: self.name.clone(),
            field_type: self.wire_type().as_str().to_string(),
            facet: self.flags.facet,
            optional: self.flags.optional,
            index: self.flags.index,
            sort: self.flags.sort,
            store: self.flags.store,
            locale: self.flags.locale.clone().filter(|l| !l.is_empty()),
            infix: self.flags.infix,
            embed,
        }
    }

    /// Recover the editable view. A `float[]` field carrying `embed`
    /// metadata comes back as an embedding field.
    pub fn from_wire(wire: WireField) -> Result<Self, SchemaError> {
        let field_type: FieldType = wire.field_type.parse()?;
        let kind = match (field_type, wire.embed) {
            (FieldType::FloatArray, Some(embed)) => FieldKind::Embed(EmbedConfig::from_wire(embed)),
            (t, _) => FieldKind::Plain(t),
        };
        Ok(Self {
            name: wire.name,
            kind,
            flags: FieldFlags {
                facet: wire.facet,
                optional: wire.optional,
                index: wire.index,
                sort: wire.sort,
                store: wire.store,
                locale: wire.locale.filter(|l| !l.is_empty()),
                infix: wire.infix,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn embed_field() -> FieldDefinition {
        let mut cfg = EmbedConfig {
            from: vec!["title".into(), "body".into()],
            num_dim: 256,
            ..EmbedConfig::default()
        };
        cfg.add_model_config("api_key", "x").unwrap();
        FieldDefinition::embed("embedding", cfg)
    }

    #[test]
    fn embed_field_serializes_as_float_array() {
        let wire = embed_field().to_wire();
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["type"], json!("float[]"));
        assert_eq!(json["embed"]["from"], json!(["title", "body"]));
        assert_eq!(json["embed"]["model_config"], json!({ "api_key": "x" }));
        assert_eq!(json["embed"]["num_dim"], json!(256));
    }

    #[test]
    fn embed_round_trip_is_lossless() {
        let original = embed_field();
        let text = serde_json::to_string(&original.to_wire()).unwrap();
        let decoded: WireField = serde_json::from_str(&text).unwrap();
        let back = FieldDefinition::from_wire(decoded).unwrap();

        assert_eq!(back.ui_type(), "embed");
        let cfg = back.embed_config().unwrap();
        assert_eq!(cfg.from, vec!["title".to_string(), "body".to_string()]);
        assert_eq!(cfg.model_config.get("api_key").map(String::as_str), Some("x"));
        assert_eq!(cfg.num_dim, 256);
        assert_eq!(back, original);
    }

    #[test]
    fn plain_float_array_stays_plain() {
        let wire: WireField =
            serde_json::from_value(json!({ "name": "scores", "type": "float[]" })).unwrap();
        let field = FieldDefinition::from_wire(wire).unwrap();
        assert_eq!(field.kind, FieldKind::Plain(FieldType::FloatArray));
        assert_eq!(field.ui_type(), "float[]");
    }

    #[test]
    fn missing_num_dim_defaults() {
        let wire: WireField = serde_json::from_value(json!({
            "name": "v",
            "type": "float[]",
            "embed": { "from": ["a"], "model_config": { "model_name": "m", "dims": 3 } }
        }))
        .unwrap();
        let cfg = FieldDefinition::from_wire(wire)
            .unwrap()
            .embed_config()
            .cloned()
            .unwrap();
        assert_eq!(cfg.num_dim, DEFAULT_NUM_DIM);
        assert_eq!(cfg.model_config.get("dims").map(String::as_str), Some("3"));
    }

    #[test]
    fn default_flags_are_omitted_on_the_wire() {
        let wire: WireField = serde_json::from_str(
            r#"{"name":"title","type":"string","facet":true,"index":false,"stem":true}"#,
        )
        .unwrap();
        let field = FieldDefinition::from_wire(wire).unwrap();
        assert!(field.flags.facet);
        assert!(!field.flags.index);
        let json = serde_json::to_value(field.to_wire()).unwrap();
        assert_eq!(json["index"], json!(false));
        assert!(json.get("store").is_none());
        assert!(json.get("infix").is_none());
    }

    #[test]
    fn unknown_wire_type_is_an_error() {
        let wire: WireField =
            serde_json::from_value(json!({ "name": "x", "type": "string*" })).unwrap();
        assert!(matches!(
            FieldDefinition::from_wire(wire),
            Err(SchemaError::UnknownType(_))
        ));
    }
}
