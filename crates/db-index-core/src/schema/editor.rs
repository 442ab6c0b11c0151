//! Index schema authoring.
//!
//! [`FieldEditor`] is a position-addressed list used while a schema is being
//! written: `add` appends, `edit` replaces at a position, `remove` deletes at
//! a position and shifts later fields down. [`IndexSchema`] is the finished,
//! name-unique result that converts to the wire [`CollectionSchema`].

use std::collections::HashSet;

use crate::models::ColumnInfo;
use crate::type_map::map_type;

use super::{CollectionSchema, FieldDefinition, SchemaError};

/// Ordered list of field definitions being authored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldEditor {
    fields: Vec<FieldDefinition>,
}

impl FieldEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start editing an existing schema's fields.
    pub fn from_schema(schema: &IndexSchema) -> Self {
        Self {
            fields: schema.fields.clone(),
        }
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FieldDefinition> {
        self.fields.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut FieldDefinition> {
        self.fields.get_mut(index)
    }

    /// Append a field and return its position. A field whose name is
    /// already present replaces that definition in place.
    pub fn add(&mut self, field: FieldDefinition) -> Result<usize, SchemaError> {
        field.validate()?;
        if let Some(pos) = self.position(&field.name) {
            self.fields[pos] = field;
            return Ok(pos);
        }
        self.fields.push(field);
        Ok(self.fields.len() - 1)
    }

    /// Replace the field at `index`. Renaming onto another field's name is
    /// rejected.
    pub fn edit(&mut self, index: usize, field: FieldDefinition) -> Result<(), SchemaError> {
        field.validate()?;
        let len = self.fields.len();
        if index >= len {
            return Err(SchemaError::IndexOutOfRange { index, len });
        }
        if let Some(pos) = self.position(&field.name) {
            if pos != index {
                return Err(SchemaError::DuplicateField(field.name));
            }
        }
        self.fields[index] = field;
        Ok(())
    }

    /// Remove the field at `index`; later fields move down by one.
    pub fn remove(&mut self, index: usize) -> Result<FieldDefinition, SchemaError> {
        let len = self.fields.len();
        if index >= len {
            return Err(SchemaError::IndexOutOfRange { index, len });
        }
        Ok(self.fields.remove(index))
    }

    /// Finish editing and produce a validated schema.
    pub fn into_schema(self, name: impl Into<String>) -> Result<IndexSchema, SchemaError> {
        let mut schema = IndexSchema::new(name);
        for field in self.fields {
            schema.upsert_field(field)?;
        }
        schema.validate()?;
        Ok(schema)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A named, ordered, name-unique set of fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    fields: Vec<FieldDefinition>,
    pub default_sorting_field: Option<String>,
    pub enable_nested_fields: Option<bool>,
}

impl IndexSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            default_sorting_field: None,
            enable_nested_fields: None,
        }
    }

    /// Derive a schema from a described table. Every column except
    /// `id_column` becomes a field typed by [`map_type`]; nullable columns
    /// are optional.
    pub fn from_columns(name: impl Into<String>, columns: &[ColumnInfo], id_column: &str) -> Self {
        let mut schema = Self::new(name);
        for col in columns.iter().filter(|c| c.name != id_column) {
            let field = FieldDefinition::new(col.name.clone(), map_type(&col.data_type))
                .optional(col.nullable);
            schema.insert_or_replace(field);
        }
        schema
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Insert a field, replacing any existing definition with the same name
    /// at its current position.
    pub fn upsert_field(&mut self, field: FieldDefinition) -> Result<(), SchemaError> {
        field.validate()?;
        self.insert_or_replace(field);
        Ok(())
    }

    /// Checks applied before the schema is submitted to the search engine.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyIndexName);
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            field.validate()?;
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            if let Some(cfg) = field.embed_config() {
                if cfg.sources().next().is_none() {
                    return Err(SchemaError::EmptyEmbedSource(field.name.clone()));
                }
            }
        }
        if let Some(sort) = &self.default_sorting_field {
            if !seen.contains(sort.as_str()) {
                return Err(SchemaError::UnknownSortingField(sort.clone()));
            }
        }
        Ok(())
    }

    /// Validate and convert to the engine's collection shape. Blank embed
    /// source placeholders are dropped.
    pub fn to_wire(&self) -> Result<CollectionSchema, SchemaError> {
        self.validate()?;
        let fields = self
            .fields
            .iter()
            .map(|f| {
                let mut wire = f.to_wire();
                if let Some(embed) = wire.embed.as_mut() {
                    embed.from.retain(|s| !s.trim().is_empty());
                }
                wire
            })
            .collect();
        Ok(CollectionSchema {
            name: self.name.clone(),
            fields,
            default_sorting_field: self.default_sorting_field.clone(),
            enable_nested_fields: self.enable_nested_fields,
            token_separators: Vec::new(),
            symbols_to_index: Vec::new(),
        })
    }

    /// Load an engine schema for editing. Repeated names collapse to the
    /// last definition.
    pub fn from_wire(wire: CollectionSchema) -> Result<Self, SchemaError> {
        let mut schema = Self::new(wire.name);
        for field in wire.fields {
            schema.insert_or_replace(FieldDefinition::from_wire(field)?);
        }
        schema.default_sorting_field = wire.default_sorting_field.filter(|s| !s.is_empty());
        schema.enable_nested_fields = wire.enable_nested_fields;
        Ok(schema)
    }

    fn insert_or_replace(&mut self, field: FieldDefinition) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EmbedConfig, FieldType};

    fn names(fields: &[FieldDefinition]) -> Vec<&str> {
        fields.iter().map(|f| f.name.as_str()).collect()
    }

    fn editor_with(names: &[&str]) -> FieldEditor {
        let mut editor = FieldEditor::new();
        for n in names {
            editor.add(FieldDefinition::new(*n, FieldType::String)).unwrap();
        }
        editor
    }

    #[test]
    fn add_appends_in_order() {
        let editor = editor_with(&["a", "b", "c"]);
        assert_eq!(names(editor.fields()), vec!["a", "b", "c"]);
    }

    #[test]
    fn add_existing_name_replaces_in_place() {
        let mut editor = editor_with(&["a", "b", "c"]);
        let pos = editor
            .add(FieldDefinition::new("b", FieldType::Int32))
            .unwrap();
        assert_eq!(pos, 1);
        assert_eq!(editor.len(), 3);
        assert_eq!(editor.get(1).unwrap().wire_type(), FieldType::Int32);
    }

    #[test]
    fn remove_preserves_relative_order() {
        for i in 0..5 {
            let mut editor = editor_with(&["a", "b", "c", "d", "e"]);
            let mut expected = vec!["a", "b", "c", "d", "e"];
            let removed = editor.remove(i).unwrap();
            assert_eq!(removed.name, expected.remove(i));
            assert_eq!(names(editor.fields()), expected);
        }
    }

    #[test]
    fn remove_out_of_range() {
        let mut editor = editor_with(&["a"]);
        assert_eq!(
            editor.remove(1),
            Err(SchemaError::IndexOutOfRange { index: 1, len: 1 })
        );
    }

    #[test]
    fn edit_replaces_by_position() {
        let mut editor = editor_with(&["a", "b"]);
        editor
            .edit(0, FieldDefinition::new("title", FieldType::String).facet(true))
            .unwrap();
        assert_eq!(names(editor.fields()), vec!["title", "b"]);
        assert!(editor.get(0).unwrap().flags.facet);

        // keeping the same name at the same position is fine
        editor
            .edit(1, FieldDefinition::new("b", FieldType::Bool))
            .unwrap();
    }

    #[test]
    fn edit_onto_another_name_is_rejected() {
        let mut editor = editor_with(&["a", "b"]);
        let err = editor
            .edit(0, FieldDefinition::new("b", FieldType::String))
            .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateField("b".into()));
        assert_eq!(names(editor.fields()), vec!["a", "b"]);
    }

    #[test]
    fn empty_names_are_rejected() {
        let mut editor = FieldEditor::new();
        assert_eq!(
            editor.add(FieldDefinition::new("", FieldType::String)),
            Err(SchemaError::EmptyName)
        );
        assert!(editor.is_empty());
    }

    #[test]
    fn embed_without_sources_fails_schema_validation() {
        let mut editor = FieldEditor::new();
        let mut field = FieldDefinition::from_ui_type("embedding", "embed").unwrap();
        field.embed_config_mut().unwrap().add_source_field();
        editor.add(field).unwrap();
        assert_eq!(
            editor.clone().into_schema("docs"),
            Err(SchemaError::EmptyEmbedSource("embedding".into()))
        );

        editor
            .get_mut(0)
            .and_then(FieldDefinition::embed_config_mut)
            .unwrap()
            .set_source_field(0, "title")
            .unwrap();
        editor.add(FieldDefinition::new("title", FieldType::String)).unwrap();
        assert!(editor.into_schema("docs").is_ok());
    }

    #[test]
    fn schema_wire_round_trip_keeps_embed_fields() {
        let mut cfg = EmbedConfig::default();
        cfg.from = vec!["title".into(), String::new()];
        cfg.add_model_config("model_name", "ts/all-MiniLM-L12-v2")
            .unwrap();
        let mut schema = IndexSchema::new("articles");
        schema
            .upsert_field(FieldDefinition::new("title", FieldType::String))
            .unwrap();
        schema
            .upsert_field(FieldDefinition::new("views", FieldType::Int32).sort(true))
            .unwrap();
        schema
            .upsert_field(FieldDefinition::embed("embedding", cfg))
            .unwrap();
        schema.default_sorting_field = Some("views".into());

        let wire = schema.to_wire().unwrap();
        assert_eq!(wire.fields[2].field_type, "float[]");
        assert_eq!(wire.fields[2].embed.as_ref().unwrap().from, vec!["title"]);

        let back = IndexSchema::from_wire(wire).unwrap();
        assert_eq!(names(back.fields()), vec!["title", "views", "embedding"]);
        assert_eq!(back.field("embedding").unwrap().ui_type(), "embed");
        assert_eq!(back.default_sorting_field.as_deref(), Some("views"));
    }

    #[test]
    fn unknown_sorting_field_is_rejected() {
        let mut schema = IndexSchema::new("x");
        schema
            .upsert_field(FieldDefinition::new("a", FieldType::Int32))
            .unwrap();
        schema.default_sorting_field = Some("b".into());
        assert_eq!(
            schema.to_wire(),
            Err(SchemaError::UnknownSortingField("b".into()))
        );
    }

    #[test]
    fn redefining_a_name_replaces() {
        let mut schema = IndexSchema::new("x");
        schema
            .upsert_field(FieldDefinition::new("a", FieldType::Int32))
            .unwrap();
        schema
            .upsert_field(FieldDefinition::new("a", FieldType::Float))
            .unwrap();
        assert_eq!(schema.fields().len(), 1);
        assert_eq!(schema.field("a").unwrap().wire_type(), FieldType::Float);
    }

    #[test]
    fn derives_fields_from_columns() {
        let mut id = ColumnInfo::new("id", "bigint");
        id.nullable = false;
        let mut title = ColumnInfo::new("title", "text");
        title.nullable = false;
        let columns = vec![
            id,
            title,
            ColumnInfo::new("views", "integer"),
            ColumnInfo::new("score", "double precision"),
            ColumnInfo::new("big", "bigint"),
        ];
        let schema = IndexSchema::from_columns("items", &columns, "id");
        assert_eq!(names(schema.fields()), vec!["title", "views", "score", "big"]);
        assert!(!schema.field("title").unwrap().flags.optional);
        assert!(schema.field("views").unwrap().flags.optional);
        assert_eq!(schema.field("views").unwrap().wire_type(), FieldType::Int32);
        assert_eq!(schema.field("score").unwrap().wire_type(), FieldType::Float);
        assert_eq!(schema.field("big").unwrap().wire_type(), FieldType::String);
    }
}
