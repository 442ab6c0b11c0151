//! Search-index field schema.
//!
//! A [`FieldDefinition`] is the editable view of one index field. Its
//! [`FieldKind`] is either a plain [`FieldType`] or an embedding field
//! carrying a strongly-typed [`EmbedConfig`]. The search engine has no
//! `embed` type: on the wire an embedding field is a `float[]` field with an
//! `embed` annotation. [`wire`] holds that flat representation and the
//! bidirectional mapping between the two views.
//!
//! ```text
//!   FieldKind::Embed(EmbedConfig)  ──to_wire──▶  { "type": "float[]", "embed": {..} }
//!                                  ◀─from_wire──
//! ```
//!
//! [`IndexSchema`] is the ordered, name-unique collection submitted to
//! `create_index`; [`FieldEditor`] is the index-addressed add/edit/remove
//! surface used while authoring one.

pub mod editor;
pub mod wire;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub use editor::{FieldEditor, IndexSchema};
pub use wire::{CollectionSchema, WireEmbed, WireField};

/// Default embedding dimensionality when none is configured.
pub const DEFAULT_NUM_DIM: u32 = 512;

/// UI-level name of the synthetic embedding field type.
pub const EMBED_TYPE: &str = "embed";

/// Errors raised while building, editing, or decoding a field schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("field name must not be empty")]
    EmptyName,

    #[error("index name must not be empty")]
    EmptyIndexName,

    #[error("unknown field type: '{0}'")]
    UnknownType(String),

    #[error("field '{0}' is defined more than once")]
    DuplicateField(String),

    #[error("model_config key '{0}' already exists")]
    DuplicateModelConfigKey(String),

    #[error("model_config key and value must not be empty")]
    EmptyModelConfigEntry,

    #[error("position {index} is out of range for {len} entries")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("embedding field '{0}' has no source fields")]
    EmptyEmbedSource(String),

    #[error("default_sorting_field '{0}' is not a field of the schema")]
    UnknownSortingField(String),
}

/// Wire-level field types accepted by the search engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Int32,
    Int64,
    Float,
    Bool,
    StringArray,
    Int32Array,
    Int64Array,
    FloatArray,
    BoolArray,
    Geopoint,
    Object,
    ObjectArray,
    Image,
}

impl FieldType {
    pub const ALL: [FieldType; 14] = [
        FieldType::String,
        FieldType::Int32,
        FieldType::Int64,
        FieldType::Float,
        FieldType::Bool,
        FieldType::StringArray,
        FieldType::Int32Array,
        FieldType::Int64Array,
        FieldType::FloatArray,
        FieldType::BoolArray,
        FieldType::Geopoint,
        FieldType::Object,
        FieldType::ObjectArray,
        FieldType::Image,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::StringArray => "string[]",
            FieldType::Int32Array => "int32[]",
            FieldType::Int64Array => "int64[]",
            FieldType::FloatArray => "float[]",
            FieldType::BoolArray => "bool[]",
            FieldType::Geopoint => "geopoint",
            FieldType::Object => "object",
            FieldType::ObjectArray => "object[]",
            FieldType::Image => "image",
        }
    }

    /// Short human description, shown next to the type when editing.
    pub fn description(&self) -> &'static str {
        match self {
            FieldType::String => "Text, full-text searchable",
            FieldType::Int32 => "32-bit integer, sortable and facetable",
            FieldType::Int64 => "64-bit integer, sortable and facetable",
            FieldType::Float => "Floating point number, sortable and facetable",
            FieldType::Bool => "Boolean, facetable",
            FieldType::StringArray => "Multiple text values",
            FieldType::Int32Array => "Multiple 32-bit integers",
            FieldType::Int64Array => "Multiple 64-bit integers",
            FieldType::FloatArray => "Multiple floating point numbers",
            FieldType::BoolArray => "Multiple booleans",
            FieldType::Geopoint => "Latitude/longitude pair for geo search",
            FieldType::Object => "Nested object",
            FieldType::ObjectArray => "Array of nested objects",
            FieldType::Image => "Image reference for image search",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SchemaError::UnknownType(s.to_string()))
    }
}

/// Generation metadata of an embedding field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedConfig {
    /// Ordered source field names the embedding is computed from.
    pub from: Vec<String>,
    /// Model parameters (model name, api key, ...). Keys are unique.
    pub model_config: BTreeMap<String, String>,
    pub num_dim: u32,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            from: Vec::new(),
            model_config: BTreeMap::new(),
            num_dim: DEFAULT_NUM_DIM,
        }
    }
}

impl EmbedConfig {
    /// Append an empty source-field slot to be filled in later.
    pub fn add_source_field(&mut self) -> usize {
        self.from.push(String::new());
        self.from.len() - 1
    }

    pub fn set_source_field(&mut self, index: usize, name: impl Into<String>) -> Result<(), SchemaError> {
        let len = self.from.len();
        let slot = self
            .from
            .get_mut(index)
            .ok_or(SchemaError::IndexOutOfRange { index, len })?;
        *slot = name.into();
        Ok(())
    }

    pub fn remove_source_field(&mut self, index: usize) -> Result<String, SchemaError> {
        if index >= self.from.len() {
            return Err(SchemaError::IndexOutOfRange {
                index,
                len: self.from.len(),
            });
        }
        Ok(self.from.remove(index))
    }

    /// Add a model parameter. Existing keys are never overwritten.
    pub fn add_model_config(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), SchemaError> {
        let key = key.into();
        let value = value.into();
        if key.trim().is_empty() || value.trim().is_empty() {
            return Err(SchemaError::EmptyModelConfigEntry);
        }
        if self.model_config.contains_key(&key) {
            return Err(SchemaError::DuplicateModelConfigKey(key));
        }
        self.model_config.insert(key, value);
        Ok(())
    }

    pub fn remove_model_config(&mut self, key: &str) -> Option<String> {
        self.model_config.remove(key)
    }

    /// Source field names with unfilled placeholders dropped.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.from
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

/// Either a plain wire type or an embedding field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Plain(FieldType),
    Embed(EmbedConfig),
}

/// Indexing flags of a field. Defaults match the search engine's defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFlags {
    pub facet: bool,
    pub optional: bool,
    pub index: bool,
    /// `None` leaves sortability to the engine's per-type default.
    pub sort: Option<bool>,
    pub store: bool,
    pub locale: Option<String>,
    pub infix: bool,
}

impl Default for FieldFlags {
    fn default() -> Self {
        Self {
            facet: false,
            optional: false,
            index: true,
            sort: None,
            store: true,
            locale: None,
            infix: false,
        }
    }
}

/// One field of an index schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    pub flags: FieldFlags,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Plain(field_type),
            flags: FieldFlags::default(),
        }
    }

    pub fn embed(name: impl Into<String>, config: EmbedConfig) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Embed(config),
            flags: FieldFlags::default(),
        }
    }

    /// Build a field from a UI type name: any wire type, or `"embed"`.
    pub fn from_ui_type(name: impl Into<String>, ui_type: &str) -> Result<Self, SchemaError> {
        if ui_type == EMBED_TYPE {
            return Ok(Self::embed(name, EmbedConfig::default()));
        }
        Ok(Self::new(name, ui_type.parse()?))
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.flags.optional = optional;
        self
    }

    pub fn facet(mut self, facet: bool) -> Self {
        self.flags.facet = facet;
        self
    }

    pub fn sort(mut self, sort: bool) -> Self {
        self.flags.sort = Some(sort);
        self
    }

    /// Type name as shown to a schema author (`"embed"` for embedding fields).
    pub fn ui_type(&self) -> &'static str {
        match &self.kind {
            FieldKind::Plain(t) => t.as_str(),
            FieldKind::Embed(_) => EMBED_TYPE,
        }
    }

    /// Type name as sent to the search engine.
    pub fn wire_type(&self) -> FieldType {
        match &self.kind {
            FieldKind::Plain(t) => *t,
            FieldKind::Embed(_) => FieldType::FloatArray,
        }
    }

    pub fn embed_config(&self) -> Option<&EmbedConfig> {
        match &self.kind {
            FieldKind::Embed(cfg) => Some(cfg),
            FieldKind::Plain(_) => None,
        }
    }

    pub fn embed_config_mut(&mut self) -> Option<&mut EmbedConfig> {
        match &mut self.kind {
            FieldKind::Embed(cfg) => Some(cfg),
            FieldKind::Plain(_) => None,
        }
    }

    /// Checks applied before a field is saved into a schema.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyName);
        }
        Ok(())
    }
}
