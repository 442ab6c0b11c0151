//! # db-index core
//!
//! Shared, I/O-free logic for db-index: native column type mapping,
//! search-index field schemas (including embedding fields), row-to-document
//! encoding, and the search index abstraction.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Everything that
//! talks to a database or a search cluster lives in the `db-index` package.

pub mod document;
pub mod index;
pub mod models;
pub mod schema;
pub mod type_map;

pub use document::{DocumentEncoder, EncodeError};
pub use index::{IndexError, SearchIndex};
pub use models::{ColumnInfo, TableInfo, TableKind};
pub use schema::{FieldDefinition, FieldEditor, FieldType, IndexSchema, SchemaError};
pub use type_map::map_type;
