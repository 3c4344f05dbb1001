//! The `lode` binary: a thin shell over the engine.
//!
//! Exit codes: 0 success, 1 user error, 2 configuration error,
//! 3 internal error.

mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use lode_core::models::{SearchRequest, Tag, UpsertRequest};
use lode_core::{Cancellable, CancellationToken, LodeError, RootConfig};
use lode_search::{open_cache, MultiNodeSearch, Node, OpenMode};

use output::Format;

const DEFAULT_CONFIG_PATH: &str = "lode.config.json";

#[derive(Debug, Parser)]
#[command(name = "lode")]
#[command(version)]
#[command(about = "Local knowledge store with hybrid full-text and vector search")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store or update a content record.
    Put {
        /// The content body.
        content: String,
        /// Existing id to update in place.
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Comma-separated key:value pairs.
        #[arg(long)]
        tags: Option<String>,
        /// Advisory MIME type.
        #[arg(long, default_value = "")]
        mime: String,
        /// Target node (defaults to the first configured node).
        #[arg(long)]
        node: Option<String>,
    },
    /// Print one record.
    Get {
        #[arg(long)]
        id: String,
        /// Include the full content body.
        #[arg(long)]
        full: bool,
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
        #[arg(long)]
        node: Option<String>,
    },
    /// Print a page of records.
    List {
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = 20)]
        take: usize,
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
        #[arg(long)]
        node: Option<String>,
    },
    /// Remove a record. Succeeds even when the id is absent.
    Delete {
        #[arg(long)]
        id: String,
        #[arg(long)]
        node: Option<String>,
    },
    /// Run a hybrid search query (JSON iff it starts with '{').
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 0.3)]
        min_relevance: f64,
        /// Comma-separated node ids ('*' for all).
        #[arg(long)]
        nodes: Option<String>,
        /// Comma-separated node ids to skip.
        #[arg(long)]
        exclude_nodes: Option<String>,
        /// Check the query without executing it.
        #[arg(long)]
        validate_only: bool,
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// List configured nodes.
    Nodes {
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// Print the effective configuration.
    Config {
        #[arg(long)]
        show_nodes: bool,
        #[arg(long)]
        show_cache: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(classify(&error))
        }
    }
}

/// Map failures to the documented exit codes.
fn classify(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<LodeError>() {
        Some(LodeError::InvalidConfiguration { .. }) => 2,
        Some(
            LodeError::NotFound { .. }
            | LodeError::InvalidArgument { .. }
            | LodeError::QuerySyntax { .. }
            | LodeError::QueryTooComplex { .. }
            | LodeError::NodeNotFound { .. }
            | LodeError::NodeAccessDenied { .. },
        ) => 1,
        Some(_) => 3,
        None => 3,
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> anyhow::Result<()> {
    match cli.command {
        Command::Put {
            content,
            id,
            title,
            description,
            tags,
            mime,
            node,
        } => {
            let config = load_or_create_config(&cli.config)?;
            let target = open_write_node(&config, node.as_deref())?;
            let request = UpsertRequest {
                id,
                title,
                description,
                content,
                mime_type: mime,
                tags: match tags.as_deref() {
                    Some(raw) => Tag::parse_list(raw)?,
                    None => Vec::new(),
                },
                source_url: None,
            };
            let outcome = target.upsert(request, cancel).await?;
            output::print(&outcome, Format::Json)?;
            Ok(())
        }

        Command::Get {
            id,
            full,
            format,
            node,
        } => {
            let config = load_config(&cli.config)?;
            // A node whose database was never written holds nothing.
            let target = match open_read_node(&config, node.as_deref()) {
                Ok(target) => target,
                Err(e) if is_uninitialized(&e) => {
                    return Err(LodeError::not_found(format!("content '{id}'")).into())
                }
                Err(e) => return Err(e),
            };
            let mut record = target.get(&id)?;
            if !full {
                record.content = truncate_preview(&record.content);
            }
            output::print(&record, format)?;
            Ok(())
        }

        Command::List {
            skip,
            take,
            format,
            node,
        } => {
            let config = load_config(&cli.config)?;
            // An uninitialized node lists as empty, not as an error.
            let page = match open_read_node(&config, node.as_deref()) {
                Ok(target) => target.list(skip, take)?,
                Err(e) if is_uninitialized(&e) => Vec::new(),
                Err(e) => return Err(e),
            };
            output::print(&page, format)?;
            Ok(())
        }

        Command::Delete { id, node } => {
            let config = load_or_create_config(&cli.config)?;
            let target = open_write_node(&config, node.as_deref())?;
            let outcome = target.delete(&id, cancel).await?;
            output::print(&outcome, Format::Json)?;
            Ok(())
        }

        Command::Search {
            query,
            limit,
            offset,
            min_relevance,
            nodes,
            exclude_nodes,
            validate_only,
            format,
        } => {
            let config = load_config(&cli.config)?;
            let service = MultiNodeSearch::from_config(&config, OpenMode::Read);

            if validate_only {
                let report = service.validate(&query);
                output::print(&report, format)?;
                return Ok(());
            }

            let request = SearchRequest {
                query,
                limit,
                offset,
                min_relevance,
                nodes: nodes.as_deref().map(split_list),
                exclude_nodes: exclude_nodes.as_deref().map(split_list).unwrap_or_default(),
            };
            let response = service.search(&request, cancel).await?;
            output::print(&response, format)?;
            Ok(())
        }

        Command::Nodes { format } => {
            let config = load_config(&cli.config)?;
            let service = MultiNodeSearch::from_config(&config, OpenMode::Read);
            let health = service.status();
            let rows: Vec<serde_json::Value> = config
                .nodes
                .iter()
                .map(|node_config| {
                    let status = health
                        .iter()
                        .find(|(id, _)| id == &node_config.id)
                        .and_then(|(_, err)| err.clone());
                    serde_json::json!({
                        "id": node_config.id,
                        "access": node_config.access.to_string(),
                        "weight": node_config.weight,
                        "indexes": node_config
                            .search_indexes
                            .iter()
                            .map(|i| serde_json::json!({
                                "id": i.id,
                                "type": i.kind,
                                "weight": i.weight,
                                "required": i.required,
                            }))
                            .collect::<Vec<_>>(),
                        "status": status.unwrap_or_else(|| "ok".to_string()),
                    })
                })
                .collect();
            output::print(&rows, format)?;
            Ok(())
        }

        Command::Config {
            show_nodes,
            show_cache,
        } => {
            let config = load_config(&cli.config)?;
            let value = serde_json::to_value(&config)
                .context("serialize configuration")?;
            let filtered = match (show_nodes, show_cache) {
                (true, false) => value.get("nodes").cloned().unwrap_or_default(),
                (false, true) => value.get("embeddingsCache").cloned().unwrap_or_default(),
                _ => value,
            };
            output::print(&filtered, Format::Json)?;
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<RootConfig> {
    Ok(RootConfig::load(path)?)
}

/// Write commands recreate a missing config file with the starter
/// layout rooted next to it.
fn load_or_create_config(path: &Path) -> anyhow::Result<RootConfig> {
    if !path.exists() {
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join("lode-data");
        let starter = RootConfig::starter(&base);
        starter.save(path)?;
        debug!(path = %path.display(), "wrote starter configuration");
    }
    load_config(path)
}

fn resolve_node_config<'a>(
    config: &'a RootConfig,
    node: Option<&str>,
) -> Result<&'a lode_core::NodeConfig, LodeError> {
    match node {
        Some(id) => config
            .node(id)
            .ok_or_else(|| LodeError::NodeNotFound { id: id.to_string() }),
        None => Ok(config.first_node()),
    }
}

fn open_write_node(config: &RootConfig, node: Option<&str>) -> anyhow::Result<Node> {
    let node_config = resolve_node_config(config, node)?;
    let cache = open_cache(config, OpenMode::Write);
    Ok(Node::open(node_config, cache, OpenMode::Write)?)
}

fn open_read_node(config: &RootConfig, node: Option<&str>) -> anyhow::Result<Node> {
    let node_config = resolve_node_config(config, node)?;
    let cache = open_cache(config, OpenMode::Read);
    Ok(Node::open(node_config, cache, OpenMode::Read)?)
}

/// Read-mode open failures on a never-written database.
fn is_uninitialized(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<LodeError>(),
        Some(LodeError::IndexUnavailable { .. })
    )
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `get` without `--full` shows a bounded preview.
fn truncate_preview(content: &str) -> String {
    const PREVIEW_CHARS: usize = 400;
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
    preview.push('…');
    preview
}
