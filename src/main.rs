use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use covmanager::browse::Facade;
use covmanager::cli;
use covmanager::config::Config;
use covmanager::jobs::JobRunner;
use covmanager::model::{CollectionFilter, NewCollection};
use covmanager::store::CoverageStore;

/// covmanager — Store coverage collections, then browse, diff and aggregate them.
#[derive(Parser)]
#[command(name = "covmanager", version, about)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a coverage file as a new collection.
    Ingest {
        /// Path to the coverage file.
        file: PathBuf,

        /// Repository the coverage was collected for.
        #[arg(long)]
        repository: String,

        /// Revision the coverage was collected at. Taken from the file's git
        /// block when omitted (coveralls only).
        #[arg(long, default_value = "")]
        revision: String,

        #[arg(long, default_value = "")]
        branch: String,

        /// Client (e.g. the CI job) that produced the file.
        #[arg(long, default_value = "")]
        client: String,

        /// Tool that collected the coverage. May be repeated.
        #[arg(long = "tool")]
        tools: Vec<String>,

        #[arg(long, default_value = "")]
        description: String,

        /// Override format detection (coveralls, lcov).
        #[arg(long)]
        format: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// List stored collections, newest first.
    Collections {
        #[arg(long)]
        repository: Option<String>,

        #[arg(long)]
        branch: Option<String>,

        #[arg(long)]
        tool: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 50)]
        per_page: u32,

        #[arg(long)]
        json: bool,
    },

    /// Browse a collection's coverage tree.
    Browse {
        /// Collection id.
        id: i64,

        /// Path inside the tree ('' or '/' for the root).
        #[arg(default_value = "")]
        path: String,

        #[arg(long)]
        json: bool,
    },

    /// Compare a collection against a baseline collection.
    Diff {
        /// Baseline collection id. Without it every line counts as added.
        #[arg(long)]
        baseline: Option<i64>,

        /// Target collection id.
        target: i64,

        #[arg(default_value = "")]
        path: String,

        #[arg(long)]
        json: bool,
    },

    /// Merge several collections into one coverage tree.
    Aggregate {
        /// Collection ids.
        #[arg(required = true)]
        ids: Vec<i64>,

        /// Path to browse. Not used with --save.
        #[arg(long, default_value = "", conflicts_with = "save")]
        path: String,

        /// Store the merged coverage as a new collection.
        #[arg(long)]
        save: bool,

        /// Description for the saved collection.
        #[arg(long, requires = "save")]
        description: Option<String>,

        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("covmanager=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    let store = Arc::new(config.open_store().context("Failed to open database")?);
    let shared: Arc<dyn CoverageStore> = store.clone();
    let runner = JobRunner::new(shared, config.runner_config())?;
    let facade = Facade::new(&runner);
    let timeout = config.wait_timeout();

    let out = match cli.command {
        Commands::Ingest {
            file,
            repository,
            revision,
            branch,
            client,
            tools,
            description,
            format,
            json,
        } => {
            let meta = NewCollection {
                repository,
                revision,
                branch,
                client,
                tools: tools.into_iter().collect::<BTreeSet<_>>(),
                description,
            };
            cli::cmd_ingest(&store, &file, format.as_deref(), meta, json)?
        }
        Commands::Collections {
            repository,
            branch,
            tool,
            page,
            per_page,
            json,
        } => {
            let filter = CollectionFilter {
                repository,
                branch,
                tool,
            };
            cli::cmd_collections(&facade, &filter, page, per_page, json)?
        }
        Commands::Browse { id, path, json } => cli::cmd_browse(&facade, id, &path, timeout, json)?,
        Commands::Diff {
            baseline,
            target,
            path,
            json,
        } => cli::cmd_diff(&facade, baseline, target, &path, timeout, json)?,
        Commands::Aggregate {
            ids,
            path,
            save,
            description,
            json,
        } => {
            if save {
                cli::cmd_save_aggregate(
                    &store,
                    &facade,
                    &ids,
                    description.as_deref(),
                    timeout,
                    json,
                )?
            } else {
                cli::cmd_aggregate(&facade, &ids, &path, timeout, json)?
            }
        }
    };
    print!("{out}");
    Ok(())
}
