//! # Audit Context CLI (`actx`)
//!
//! Composition root: loads configuration, opens one [`Engine`], runs a
//! command, and closes the database pool.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `actx init` | Create the database, schema, and index directory |
//! | `actx ingest <path>...` | Ingest PDF/DOCX files (directories are walked) |
//! | `actx retrieve "<query>"` | Top-k citations for a query |
//! | `actx documents` | List ingested documents |
//! | `actx embed <text>...` | Embed texts through the gateway |
//! | `actx generate --system S <msg>...` | Generate text through the gateway |
//! | `actx check` | Report index ↔ metadata drift |
//! | `actx repair` | Embed and map chunks left without vectors |
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); command output goes to stdout.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walkdir::WalkDir;

use audit_context::config::load_config;
use audit_context::ingest::IngestOutcome;
use audit_context::models::{ChatMessage, DocType, UploadMeta};
use audit_context::Engine;

/// Audit Context: document ingestion and cited retrieval.
#[derive(Parser)]
#[command(name = "actx", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/actx.toml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and vector index location.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest files or directories of `.pdf` / `.docx` files.
    ///
    /// Re-ingesting identical bytes returns the existing document id.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Organizational unit the documents came from.
        #[arg(long)]
        source_unit: Option<String>,

        /// Audit year.
        #[arg(long)]
        year: Option<i64>,

        /// Tags as a JSON value, e.g. '{"area": "treasury"}'.
        #[arg(long)]
        tags: Option<String>,
    },

    /// Retrieve the closest chunks for a query, with citations.
    Retrieve {
        query: String,

        /// Number of results (defaults to `retrieval.default_k`).
        #[arg(short, long)]
        k: Option<usize>,

        /// Print citations as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List ingested documents, newest first.
    Documents,

    /// Embed texts and print the vectors as JSON.
    Embed {
        #[arg(required = true)]
        texts: Vec<String>,
    },

    /// Generate text from a system prompt and user messages.
    Generate {
        #[arg(long, default_value = "You are an audit assistant.")]
        system: String,

        #[arg(required = true)]
        messages: Vec<String>,
    },

    /// Check consistency between the vector index and the metadata store.
    Check,

    /// Embed and map chunks that have no vector.
    Repair,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = load_config(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    let engine = Engine::open(&config).await.context("opening engine")?;

    let result = dispatch(&engine, cli.command).await;
    engine.close().await;
    result
}

async fn dispatch(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {
            println!("Database initialized at {}", engine.config.db.path.display());
            println!("Vector index at {}", engine.index.path().display());
        }
        Commands::Ingest {
            paths,
            source_unit,
            year,
            tags,
        } => {
            let tags = tags
                .map(|t| serde_json::from_str::<serde_json::Value>(&t))
                .transpose()
                .context("--tags must be valid JSON")?;
            let meta = UploadMeta {
                source_unit,
                year,
                tags,
            };
            ingest_paths(engine, &paths, &meta).await?;
        }
        Commands::Retrieve { query, k, json } => {
            let k = k.unwrap_or(engine.config.retrieval.default_k);
            let citations = engine.retriever.retrieve(&query, k).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&citations)?);
            } else if citations.is_empty() {
                println!("No results.");
            } else {
                for (rank, c) in citations.iter().enumerate() {
                    let page = c
                        .page
                        .map(|p| format!("p. {}", p))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{}. {} ({}) chunk {} [distance {:.4}]",
                        rank + 1,
                        c.filename,
                        page,
                        c.chunk_id,
                        c.distance
                    );
                    println!("   {}", c.snippet.replace('\n', " "));
                }
            }
        }
        Commands::Documents => {
            let docs = engine.store.list_documents().await?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for doc in docs {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    doc.id,
                    doc.doc_type.as_str(),
                    doc.filename,
                    doc.source_unit.as_deref().unwrap_or("-"),
                    doc.year.map(|y| y.to_string()).unwrap_or_else(|| "-".to_string()),
                );
            }
        }
        Commands::Embed { texts } => {
            let vectors = engine.embeddings.embed(&texts).await?;
            println!("{}", serde_json::to_string(&vectors)?);
        }
        Commands::Generate { system, messages } => {
            let messages: Vec<ChatMessage> = messages.into_iter().map(ChatMessage::user).collect();
            let text = engine.generation.generate(&system, &messages).await?;
            println!("{}", text);
        }
        Commands::Check => {
            let report = engine.check().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_consistent() {
                bail!("index and metadata store are inconsistent; run `actx repair`");
            }
        }
        Commands::Repair => {
            let repaired = engine.ingestor.repair().await?;
            println!("Repaired {} chunk(s).", repaired);
        }
    }
    Ok(())
}

async fn ingest_paths(engine: &Engine, paths: &[PathBuf], meta: &UploadMeta) -> Result<()> {
    let mut failures = 0usize;

    for path in collect_files(paths)? {
        match ingest_file(engine, &path, meta.clone()).await {
            Ok(IngestOutcome::Created(id)) => println!("created\t{}\t{}", id, path.display()),
            Ok(IngestOutcome::Duplicate(id)) => println!("duplicate\t{}\t{}", id, path.display()),
            Err(e) => {
                failures += 1;
                error!(path = %path.display(), "{:#}", e);
            }
        }
    }

    if failures > 0 {
        bail!("{} file(s) failed to ingest", failures);
    }
    Ok(())
}

async fn ingest_file(engine: &Engine, path: &Path, meta: UploadMeta) -> Result<IngestOutcome> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid file name: {}", path.display()))?;
    Ok(engine.ingestor.ingest(&bytes, filename, meta).await?)
}

/// Expand directories into their supported files; explicit files pass through
/// so unsupported suffixes are reported rather than silently skipped.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walking {}", path.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let supported = DocType::from_filename(&entry.file_name().to_string_lossy()).is_ok();
            if supported {
                files.push(entry.into_path());
            } else {
                warn!(path = %entry.path().display(), "skipping unsupported file");
            }
        }
    }

    Ok(files)
}
