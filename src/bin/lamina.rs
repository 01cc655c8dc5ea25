//! lamina CLI tool
//!
//! Batch maintenance of a layered reference corpus.
//!
//! ## Commands
//!
//! - `merge <ENTITY>|--all`: merge layers into canonical records and materialize them
//! - `audit --all|--category NAME`: schema drift, group consistency and quality scores
//! - `sync-groups --all`: propagate shared fields inside groups
//! - `validate-manifests [ROOT]`: reachability and link integrity of the manifest tree
//! - `build-manifests`: create missing grouping nodes
//! - `ingest <BATCH>`: apply a batch of extraction units to the record files
//! - `run`: merge, sync-groups, audit and validate-manifests together
//! - `init`: write the default `lamina.toml`
//!
//! Exit status is 0 on a passing verdict, 1 when issues reach `report.fail_on`, and 2 when the
//! run aborted. The last line on stdout is always a JSON object.

use clap::{ArgGroup, Parser, Subcommand};
use lamina_core::{
    commands::{execute_and_summarize, Op, Selection},
    config::{ConfigProvider, LaminaConfig, TomlConfigProvider},
    corpus::RunContext,
    issue::Verdict,
    properties::EntityId,
    store::FsStore,
    LaminaError,
};
use std::{path::PathBuf, process::ExitCode};

#[derive(Parser)]
#[command(name = "lamina")]
#[command(author, version, about = "Merge, audit and validate a layered reference corpus", long_about = None)]
struct Cli {
    /// Corpus root directory
    #[arg(long, default_value = ".")]
    corpus: PathBuf,

    /// Configuration file (defaults to lamina.toml in the corpus root)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the full JSON run summary to this file
    #[arg(long)]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge one entity, or every entity, into canonical records
    #[command(group(ArgGroup::new("target").required(true).args(["entity", "all"])))]
    Merge {
        entity: Option<String>,
        #[arg(long)]
        all: bool,
        /// Compute everything, write nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Audit schema drift, group consistency and quality
    #[command(group(ArgGroup::new("target").required(true).args(["category", "all"])))]
    Audit {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        all: bool,
    },

    /// Discover groups and synchronize their shared fields
    SyncGroups {
        #[arg(long, required = true)]
        all: bool,
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the manifest tree
    ValidateManifests {
        /// Root manifest, relative to the corpus root
        root: Option<String>,
    },

    /// Create grouping nodes for values without one
    BuildManifests {
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply a YAML batch of extraction units
    Ingest {
        batch: PathBuf,
    },

    /// Full pipeline
    Run {
        #[arg(long)]
        dry_run: bool,
    },

    /// Write the default configuration file
    Init,
}

fn fatal(error: &LaminaError) -> ExitCode {
    tracing::error!("{error}");
    let line = serde_json::json!({
        "verdict": "error",
        "error": error.to_string(),
    });
    println!("{line}");
    ExitCode::from(2)
}

fn run(cli: Cli) -> Result<Verdict, LaminaError> {
    let provider = match cli.config.clone() {
        Some(path) => TomlConfigProvider::new(path),
        None => TomlConfigProvider::for_corpus(&cli.corpus),
    };

    let op = match cli.command {
        Commands::Init => {
            provider.store(&LaminaConfig::default())?;
            tracing::info!("wrote {:?}", provider.path());
            println!("{}", serde_json::json!({ "verdict": "pass", "issues": 0 }));
            return Ok(Verdict::Pass);
        }
        Commands::Merge {
            entity, dry_run, ..
        } => Op::Merge {
            target: match entity {
                Some(id) => Selection::Entity(EntityId::new(&id)),
                None => Selection::All,
            },
            dry_run,
        },
        Commands::Audit { category, .. } => Op::Audit {
            target: match category {
                Some(name) => Selection::Category(name),
                None => Selection::All,
            },
        },
        Commands::SyncGroups { dry_run, .. } => Op::SyncGroups { dry_run },
        Commands::ValidateManifests { root } => Op::ValidateManifests { root },
        Commands::BuildManifests { dry_run } => Op::BuildManifests { dry_run },
        Commands::Ingest { batch } => Op::Ingest {
            content: std::fs::read_to_string(&batch)?,
            batch: batch.display().to_string(),
        },
        Commands::Run { dry_run } => Op::Run { dry_run },
    };

    let config = provider.load()?;
    let store = FsStore::new(&cli.corpus)?;
    let mut ctx = RunContext::load(Box::new(store), config)?;
    let summary = execute_and_summarize(&op, &mut ctx)?;

    if let Some(path) = cli.report.as_ref() {
        std::fs::write(path, summary.to_json()?)?;
        tracing::info!("report written to {:?}", path);
    }
    for (kind, count) in summary.by_type.iter() {
        tracing::info!("{kind}: {count}");
    }
    println!("{}", summary.verdict_line()?);
    Ok(summary.verdict)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(Verdict::Pass) => ExitCode::SUCCESS,
        Ok(Verdict::Fail) => ExitCode::from(1),
        Err(e) => fatal(&e),
    }
}
