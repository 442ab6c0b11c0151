//! # db-index CLI (`dbi`)
//!
//! Manage data sources, inspect their tables, and sync tables into a
//! Typesense search index.
//!
//! ## Usage
//!
//! ```bash
//! dbi --config ./config/dbi.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dbi source add\|list\|show\|update\|remove\|test\|engines` | Manage data sources |
//! | `dbi tables <source>` | List tables and views |
//! | `dbi describe <source> <table>` | Show a table's columns |
//! | `dbi query <source> <sql>` | Run a parameterized query |
//! | `dbi execute <source> <sql>` | Run a statement, report affected rows |
//! | `dbi index create\|list\|show\|delete\|truncate\|update\|stats` | Manage search indexes |
//! | `dbi index create-many\|delete-many` | Batch index management |
//! | `dbi import <source> <table> <index>` | Import a table into an index |
//! | `dbi import-file <index> <file>` | Import a JSONL file into an index |
//! | `dbi search <index> <q> --query-by a,b` | Search an index |
//! | `dbi health` | Check the search cluster |
//! | `dbi map-type <native-type>` | Show the index type for a column type |
//!
//! Results are printed to stdout as JSON. Logs go to stderr and are
//! filtered by `RUST_LOG`, falling back to `[logging] level`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use db_index::config::{self, Config};
use db_index::config_store::JsonFileStore;
use db_index::ingest;
use db_index::models::{DataSourceDraft, EngineType, SslMode};
use db_index::registry::ConnectorRegistry;
use db_index::sources::SourceService;
use db_index::typesense::TypesenseClient;
use db_index_core::index::{BatchResult, SearchIndex, SearchQuery};
use db_index_core::schema::CollectionSchema;
use db_index_core::{map_type, IndexSchema};

/// db-index CLI: sync relational tables into a search index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dbi.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dbi",
    about = "db-index: register databases and sync their tables into a search index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dbi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered data sources.
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// List tables and views of a data source.
    Tables {
        /// Source id or name.
        source: String,
    },

    /// Show the columns of a table.
    Describe {
        source: String,
        /// Table name, optionally `schema.table`.
        table: String,
    },

    /// Run a query and print its rows.
    Query {
        source: String,
        sql: String,
        /// Positional parameter as a JSON value. Repeat for each placeholder.
        #[arg(long = "param")]
        params: Vec<String>,
    },

    /// Run a statement and print the number of affected rows.
    Execute {
        source: String,
        sql: String,
        #[arg(long = "param")]
        params: Vec<String>,
    },

    /// Manage search indexes.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Import every row of a table into an index (upsert by id).
    Import {
        source: String,
        table: String,
        index: String,
        /// Column copied into each document's `id`. Defaults to `[import] id_column`.
        #[arg(long)]
        id_column: Option<String>,
    },

    /// Import a newline-delimited JSON file into an index (upsert by id).
    ImportFile { index: String, file: PathBuf },

    /// Search an index.
    Search {
        index: String,
        q: String,
        /// Comma-separated fields to search in.
        #[arg(long, value_delimiter = ',', required = true)]
        query_by: Vec<String>,
        #[arg(long)]
        filter_by: Option<String>,
        #[arg(long)]
        sort_by: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        per_page: u32,
    },

    /// Check that the search cluster is healthy.
    Health,

    /// Show the index field type a native column type maps to.
    MapType { native: String },
}

#[derive(Subcommand)]
enum SourceAction {
    /// Register a source. Its connection is tested before it is saved.
    Add(SourceArgs),
    List,
    Show { source: String },
    /// Replace every setting of a source. The id is kept.
    Update {
        source: String,
        #[command(flatten)]
        args: SourceArgs,
    },
    Remove { source: String },
    /// Connect to a source and disconnect again.
    Test { source: String },
    /// List the engines that can be connected to.
    Engines,
}

#[derive(Args)]
struct SourceArgs {
    #[arg(long)]
    name: String,
    #[arg(long, value_enum)]
    engine: EngineType,
    #[arg(long, default_value = "")]
    host: String,
    /// Defaults to the engine's conventional port.
    #[arg(long)]
    port: Option<u16>,
    #[arg(long, default_value = "")]
    database: String,
    #[arg(long, default_value = "")]
    username: String,
    #[arg(long, default_value = "")]
    password: String,
    #[arg(long)]
    ssl: bool,
    #[arg(long, value_enum)]
    ssl_mode: Option<SslMode>,
    /// PostgreSQL schema.
    #[arg(long)]
    schema: Option<String>,
    /// Database file (SQLite).
    #[arg(long)]
    file: Option<String>,
    /// Connection timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

impl SourceArgs {
    fn into_draft(self) -> DataSourceDraft {
        DataSourceDraft {
            port: self
                .port
                .or_else(|| self.engine.default_port())
                .unwrap_or(0),
            name: self.name,
            engine: self.engine,
            host: self.host,
            database: self.database,
            username: self.username,
            password: self.password,
            ssl: self.ssl,
            ssl_mode: self.ssl_mode,
            schema: self.schema,
            file_path: self.file,
            connection_timeout: self.timeout,
        }
    }
}

#[derive(Subcommand)]
enum IndexAction {
    /// Create an index from a schema file or from a table's columns.
    Create {
        /// JSON collection schema.
        #[arg(long, conflicts_with = "from_table")]
        schema: Option<PathBuf>,
        /// `SOURCE:TABLE` to derive fields from.
        #[arg(long, requires = "name")]
        from_table: Option<String>,
        /// Index name, required with `--from-table`.
        #[arg(long)]
        name: Option<String>,
    },
    List,
    Show { name: String },
    Delete { name: String },
    /// Delete every document, keeping the schema.
    Truncate { name: String },
    /// Replace an index's schema. Its documents are dropped.
    Update {
        name: String,
        #[arg(long)]
        schema: PathBuf,
    },
    /// Create one index per schema file, reporting each outcome.
    CreateMany {
        #[arg(required = true)]
        schemas: Vec<PathBuf>,
    },
    /// Delete several indexes, reporting each outcome.
    DeleteMany {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Show an index's schema and document count.
    Stats { name: String },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_params(raw: &[String]) -> Result<Vec<Value>> {
    raw.iter()
        .map(|p| {
            serde_json::from_str(p).with_context(|| format!("--param is not valid JSON: {p}"))
        })
        .collect()
}

/// Print per-index results; fail if any index failed.
fn report_batch(results: &[BatchResult]) -> Result<()> {
    print_json(&json!({ "results": results }))?;
    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        bail!("{failed} of {} indexes failed", results.len());
    }
    Ok(())
}

/// Read a collection schema file and run it through field validation.
fn read_schema_file(path: &Path) -> Result<CollectionSchema> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file: {}", path.display()))?;
    let wire: CollectionSchema = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse schema file: {}", path.display()))?;
    let token_separators = wire.token_separators.clone();
    let symbols_to_index = wire.symbols_to_index.clone();
    let mut schema = IndexSchema::from_wire(wire)?.to_wire()?;
    schema.token_separators = token_separators;
    schema.symbols_to_index = symbols_to_index;
    Ok(schema)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.command {
        // Commands that don't require config
        Commands::MapType { .. } | Commands::Source {
            action: SourceAction::Engines,
        } => config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal()),
        _ => config::load_config(&cli.config)?,
    };
    init_tracing(&cfg.logging.level);

    let registry = Arc::new(ConnectorRegistry::with_builtins());
    let store = Arc::new(JsonFileStore::new(&cfg.store.path));
    let sources = SourceService::new(store, Arc::clone(&registry));

    let result = run(cli.command, &cfg, &registry, &sources).await;
    registry.disconnect_all().await;
    result
}

async fn run(
    command: Commands,
    cfg: &Config,
    registry: &ConnectorRegistry,
    sources: &SourceService,
) -> Result<()> {
    match command {
        Commands::Source { action } => match action {
            SourceAction::Add(args) => {
                let created = sources.create(args.into_draft()).await?;
                print_json(&created.redacted())?;
            }
            SourceAction::List => {
                let all: Vec<_> = sources.list()?.iter().map(|c| c.redacted()).collect();
                print_json(&all)?;
            }
            SourceAction::Show { source } => {
                print_json(&sources.resolve(&source)?.redacted())?;
            }
            SourceAction::Update { source, args } => {
                let id = sources.resolve(&source)?.id;
                let updated = sources.update(&id, args.into_draft()).await?;
                print_json(&updated.redacted())?;
            }
            SourceAction::Remove { source } => {
                let id = sources.resolve(&source)?.id;
                let removed = sources.delete(&id).await?;
                print_json(&json!({ "removed": removed.id }))?;
            }
            SourceAction::Test { source } => {
                let report = sources.test(&source).await?;
                print_json(&report)?;
                if !report.success {
                    bail!("connection test failed");
                }
            }
            SourceAction::Engines => {
                let engines: Vec<_> = registry.engines().iter().map(|e| e.as_str()).collect();
                print_json(&engines)?;
            }
        },

        Commands::Tables { source } => {
            let (_, plugin) = sources.connector(&source)?;
            print_json(&plugin.list_tables().await?)?;
        }

        Commands::Describe { source, table } => {
            let (_, plugin) = sources.connector(&source)?;
            print_json(&plugin.describe_table(&table).await?)?;
        }

        Commands::Query {
            source,
            sql,
            params,
        } => {
            let params = parse_params(&params)?;
            let (_, plugin) = sources.connector(&source)?;
            print_json(&plugin.query(&sql, &params).await?)?;
        }

        Commands::Execute {
            source,
            sql,
            params,
        } => {
            let params = parse_params(&params)?;
            let (_, plugin) = sources.connector(&source)?;
            print_json(&plugin.execute(&sql, &params).await?)?;
        }

        Commands::Index { action } => {
            let search = TypesenseClient::new(&cfg.search)?;
            run_index(action, cfg, sources, &search).await?;
        }

        Commands::Import {
            source,
            table,
            index,
            id_column,
        } => {
            let search = TypesenseClient::new(&cfg.search)?;
            let (_, plugin) = sources.connector(&source)?;
            let id_column = id_column.unwrap_or_else(|| cfg.import.id_column.clone());
            let report =
                ingest::import_table(plugin.as_ref(), &search, &table, &index, &id_column).await?;
            print_json(&report)?;
        }

        Commands::ImportFile { index, file } => {
            let search = TypesenseClient::new(&cfg.search)?;
            let report = ingest::import_jsonl_file(&search, &index, &file).await?;
            print_json(&report)?;
        }

        Commands::Search {
            index,
            q,
            query_by,
            filter_by,
            sort_by,
            page,
            per_page,
        } => {
            let search = TypesenseClient::new(&cfg.search)?;
            let query = SearchQuery {
                filter_by,
                sort_by,
                page,
                per_page,
                ..SearchQuery::new(q, query_by)
            };
            print_json(&search.search(&index, &query).await?)?;
        }

        Commands::Health => {
            let search = TypesenseClient::new(&cfg.search)?;
            let ok = search.health().await?;
            print_json(&json!({ "ok": ok }))?;
            if !ok {
                bail!("search cluster reports unhealthy");
            }
        }

        Commands::MapType { native } => {
            let ty = map_type(&native);
            print_json(&json!({
                "native": native,
                "type": ty.as_str(),
                "description": ty.description(),
            }))?;
        }
    }
    Ok(())
}

async fn run_index(
    action: IndexAction,
    cfg: &Config,
    sources: &SourceService,
    search: &dyn SearchIndex,
) -> Result<()> {
    match action {
        IndexAction::Create {
            schema,
            from_table,
            name,
        } => {
            let schema = match (schema, from_table) {
                (Some(path), None) => {
                    let mut schema = read_schema_file(&path)?;
                    if let Some(name) = name {
                        schema.name = name;
                    }
                    schema
                }
                (None, Some(target)) => {
                    let Some((source, table)) = target.split_once(':') else {
                        bail!("--from-table expects SOURCE:TABLE, got '{target}'");
                    };
                    let name = name.context("--name is required with --from-table")?;
                    let (_, plugin) = sources.connector(source)?;
                    let columns = plugin.describe_table(table).await?;
                    IndexSchema::from_columns(name, &columns.data, &cfg.import.id_column)
                        .to_wire()?
                }
                _ => bail!("index create needs exactly one of --schema or --from-table"),
            };
            print_json(&search.create_index(&schema).await?)?;
        }
        IndexAction::List => print_json(&search.list_indexes().await?)?,
        IndexAction::Show { name } => print_json(&search.retrieve_index(&name).await?)?,
        IndexAction::Delete { name } => {
            search.delete_index(&name).await?;
            print_json(&json!({ "deleted": name }))?;
        }
        IndexAction::Truncate { name } => {
            let removed = search.truncate(&name).await?;
            print_json(&json!({ "index": name, "removed": removed }))?;
        }
        IndexAction::Update { name, schema } => {
            let schema = read_schema_file(&schema)?;
            print_json(&search.update_index(&name, &schema).await?)?;
        }
        IndexAction::CreateMany { schemas } => {
            let schemas = schemas
                .iter()
                .map(|path| read_schema_file(path))
                .collect::<Result<Vec<_>>>()?;
            report_batch(&search.create_many(&schemas).await)?;
        }
        IndexAction::DeleteMany { names } => {
            report_batch(&search.delete_many(&names).await)?;
        }
        IndexAction::Stats { name } => print_json(&search.stats(&name).await?)?,
    }
    Ok(())
}
