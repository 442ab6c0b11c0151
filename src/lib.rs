//! # db-index
//!
//! Register relational data sources, inspect their schemas, and push their
//! tables into a full-text / vector search index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Data sources │──▶│  Connector   │──▶│   Ingest     │
//! │ (JSON store) │   │  registry    │   │  pipeline    │
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                           │                  │ bulk upsert
//!                    ┌──────▼───────┐   ┌──────▼───────┐
//!                    │  Postgres /  │   │  Typesense   │
//!                    │   SQLite     │   │   cluster    │
//!                    └──────────────┘   └──────────────┘
//! ```
//!
//! Type mapping, field schemas, document encoding and the search index
//! trait live in the I/O-free `db-index-core` crate.
//!
//! ## Quick Start
//!
//! ```bash
//! dbi source add --name shop --engine postgresql --host localhost \
//!     --database shop --username app --password secret
//! dbi tables shop
//! dbi index create --from-table shop:products --name products
//! dbi import shop products products
//! dbi search products "lamp" --query-by title
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Data-source configs and engine types |
//! | [`plugin`] | Database plugin trait and shared helpers |
//! | [`plugin_postgres`] | PostgreSQL plugin |
//! | [`plugin_sqlite`] | SQLite plugin |
//! | [`registry`] | Live connector cache |
//! | [`config_store`] | Data-source persistence |
//! | [`sources`] | Data-source lifecycle |
//! | [`typesense`] | Typesense search index client |
//! | [`ingest`] | Table and file import |

pub mod config;
pub mod config_store;
pub mod ingest;
pub mod models;
pub mod plugin;
pub mod plugin_postgres;
pub mod plugin_sqlite;
pub mod registry;
pub mod sources;
pub mod typesense;
