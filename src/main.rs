//! # Chat Dumpster CLI (`dumpster`)
//!
//! The `dumpster` binary ingests chat-export archives and inspects the
//! resulting dumpsters.
//!
//! ## Usage
//!
//! ```bash
//! dumpster --config ./config/dumpster.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dumpster ingest <archive>` | Run the full pipeline on a ZIP export |
//! | `dumpster dump <file> <dir>` | Split a conversations file into chat files |
//! | `dumpster resolve <name> <pointer>` | Find the media file behind a pointer |
//! | `dumpster validate <name>` | Check a dumpster's structure |
//! | `dumpster stats <name>` | Summarize a dumpster |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_dumpster::assets::{AssetIndex, AssetLookup, AssetResolver, LookupCache, ASSETS_FILE};
use chat_dumpster::config::{self, Config};
use chat_dumpster::dump::{dump_conversations, DumpOptions};
use chat_dumpster::models::{ArchiveSource, AssetPointer};
use chat_dumpster::pipeline::{sanitize_dumpster_name, IngestOptions, IngestResult, Pipeline};
use chat_dumpster::progress::ProgressMode;
use chat_dumpster::stats;
use chat_dumpster::validate::{validate_dumpster, MEDIA_DIR};

/// Chat Dumpster: turn chat-export archives into browsable dumpsters.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "dumpster",
    about = "Chat Dumpster: ingest chat-export archives into per-conversation files and media",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dumpster.toml")]
    config: PathBuf,

    /// Debug-level logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Progress output on stderr. Defaults to `human` when stderr is a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest an export archive into a new dumpster.
    ///
    /// Validates the archive against the configured limits, extracts it to
    /// a scratch directory, writes one file per conversation, resolves media
    /// pointers and copies the media they reference.
    Ingest {
        /// Path to the ZIP archive.
        archive: PathBuf,

        /// Dumpster name. Defaults to the archive's file stem.
        #[arg(long)]
        name: Option<String>,

        /// Ingest into an existing dumpster.
        #[arg(long)]
        overwrite: bool,

        /// Print the full result as JSON on stdout.
        #[arg(long)]
        json: bool,
    },

    /// Split a conversations file into one chat file per conversation.
    Dump {
        /// The conversations JSON array.
        source: PathBuf,

        /// Output directory for chat files.
        out_dir: PathBuf,

        /// Replace chat files left by earlier runs.
        #[arg(long)]
        overwrite: bool,

        /// Delete the source file after a successful dump.
        #[arg(long)]
        remove_original: bool,
    },

    /// Resolve an asset pointer inside an existing dumpster.
    Resolve {
        name: String,

        /// A `file-service://` or `sediment://` pointer.
        pointer: String,
    },

    /// Validate an existing dumpster. Exits non-zero when invalid.
    Validate { name: String },

    /// Show chat, media and asset counts for a dumpster.
    Stats { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "chat_dumpster=debug,dumpster=debug"
    } else {
        "chat_dumpster=info,dumpster=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cfg = config::load_config_or_default(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Ingest {
            archive,
            name,
            overwrite,
            json,
        } => {
            let name = match name {
                Some(name) => name,
                None => archive
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .context("cannot derive a dumpster name from the archive path; pass --name")?,
            };
            let reporter = progress.reporter();
            let mut pipeline = Pipeline::new(&cfg, reporter.as_ref());
            let options = IngestOptions {
                overwrite,
                verbose: cli.verbose,
            };
            let result = pipeline
                .run(ArchiveSource::Path(archive), &name, &options)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_ingest_summary(&result);
            }
        }
        Commands::Dump {
            source,
            out_dir,
            overwrite,
            remove_original,
        } => {
            tokio::fs::create_dir_all(&out_dir).await?;
            let options = DumpOptions {
                overwrite,
                preserve_original: !remove_original,
            };
            let outcome = dump_conversations(&source, &out_dir, options).await?;
            let s = &outcome.stats;
            println!("dump {}", source.display());
            println!("  conversations: {}", s.total);
            println!("  written: {}", s.processed);
            println!("  collisions resolved: {}", s.collisions_resolved);
            println!("  duplicates skipped: {}", s.skipped_duplicates);
            println!("  errors: {}", s.errors);
            println!("ok");
        }
        Commands::Resolve { name, pointer } => {
            run_resolve(&cfg, &name, &pointer).await?;
        }
        Commands::Validate { name } => {
            let dir = dumpster_dir(&cfg, &name)?;
            let report = validate_dumpster(&dir).await;
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            for error in &report.errors {
                println!("error: {}", error);
            }
            if !report.is_valid {
                bail!("dumpster '{}' is invalid", name);
            }
            println!("ok");
        }
        Commands::Stats { name } => {
            stats::run_stats(&cfg, &sanitize_dumpster_name(&name)?)?;
        }
    }

    Ok(())
}

fn dumpster_dir(cfg: &Config, name: &str) -> Result<PathBuf> {
    let dir = cfg.dumpster.dumpster_dir(&sanitize_dumpster_name(name)?);
    if !dir.is_dir() {
        bail!("no dumpster named '{}' at {}", name, dir.display());
    }
    Ok(dir)
}

async fn run_resolve(cfg: &Config, name: &str, pointer: &str) -> Result<()> {
    let dir = dumpster_dir(cfg, name)?;
    let parsed = AssetPointer::parse(pointer)
        .with_context(|| format!("not an asset pointer: '{}'", pointer))?;
    let index = load_assets(&dir.join(ASSETS_FILE)).await?;
    let media_root = dir.join(MEDIA_DIR);

    let mut cache = LookupCache::new(cfg.assets.cache_capacity);
    let mut resolver = AssetResolver::new(&media_root, &index, &mut cache);
    match resolver.resolve(&parsed, "unknown") {
        AssetLookup::Found(path) => {
            info!("{} resolved", parsed);
            println!("{}", media_root.join(path).display());
            Ok(())
        }
        AssetLookup::Missing(_) => bail!("no media for {} in dumpster '{}'", parsed, name),
    }
}

async fn load_assets(path: &Path) -> Result<AssetIndex> {
    match AssetIndex::load(path).await {
        Ok(index) => Ok(index),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AssetIndex::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn print_ingest_summary(result: &IngestResult) {
    let s = &result.stats;
    println!("ingest {}", result.dumpster_name);
    println!("  dumpster: {}", result.dumpster_dir.display());
    println!(
        "  conversations: {} attempted, {} written, {} errors",
        s.processing_stats.attempted, s.processing_stats.processed, s.processing_stats.errors
    );
    println!(
        "  duplicates skipped: {}, collisions resolved: {}",
        result.dump.skipped_duplicates, result.dump.collisions_resolved
    );
    println!("  chats: {}", s.chats);
    println!("  media files: {}", s.media_files);
    println!("  assets: {}", s.assets);
    if !result.missing_assets.is_empty() {
        println!("  missing assets: {}", result.missing_assets.len());
    }
    if !result.media_failures.is_empty() {
        println!("  media failures: {}", result.media_failures.len());
    }
    for warning in &result.warnings {
        println!("  warning: {}", warning);
    }
    println!("ok");
}
