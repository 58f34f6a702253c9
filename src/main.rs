//! Binary entry point for andamento.
//!
//! This binary provides the CLI interface for the tribunal movement query
//! engine: ad-hoc queries, novelty triage and the HTTP server.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print macros in the main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use andamento::config::AndamentoConfig;
use andamento::executor::{FixtureFetcher, MovementFetcher};
use andamento::observability::{self, LogFormat};
use andamento::services::MovementQueryService;
use andamento::storage::SqliteStore;
use andamento::{api, QueryOptions};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Andamento - tribunal movement query orchestration for CNJ processes.
#[derive(Parser)]
#[command(name = "andamento")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Override the data directory.
    #[arg(long, global = true, env = "ANDAMENTO_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Query movements for one process number.
    Query {
        /// The CNJ process number, loosely formatted.
        number: String,

        /// Skip the cache tiers.
        #[arg(long)]
        no_cache: bool,

        /// Do not create novelty records for new movements.
        #[arg(long)]
        no_novelty: bool,

        /// Do not persist fetched movements.
        #[arg(long)]
        no_persist: bool,
    },

    /// Query a batch of process numbers.
    Batch {
        /// Process numbers, loosely formatted.
        #[arg(required = true)]
        numbers: Vec<String>,
    },

    /// List movements stored for a process.
    Movements {
        /// The CNJ process number.
        number: String,
    },

    /// List unread novelties.
    Novelties {
        /// Maximum records to return.
        #[arg(short, long, default_value_t = andamento::services::DEFAULT_UNREAD_LIMIT)]
        limit: usize,
    },

    /// Mark novelties as read.
    MarkRead {
        /// Novelty ids to acknowledge.
        ids: Vec<String>,

        /// Acknowledge every unread novelty.
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },

    /// Show engine statistics.
    Stats,

    /// Force the novelty-expiry sweep and cache eviction.
    Cleanup,

    /// Serve the HTTP API.
    Serve {
        /// Bind address.
        #[arg(short, long)]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let format = if cli.json_logs { LogFormat::Json } else { LogFormat::Text };
    observability::init(format, cli.verbose);

    let mut config = AndamentoConfig::from_env();
    if let Some(data_dir) = cli.data_dir.clone() {
        config.data_dir = data_dir;
    }

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli, config: AndamentoConfig) -> anyhow::Result<()> {
    let service = build_service(&config)?;

    match cli.command {
        Commands::Query {
            number,
            no_cache,
            no_novelty,
            no_persist,
        } => {
            let options = QueryOptions {
                use_cache: !no_cache,
                novelty_detection: !no_novelty,
                persist: !no_persist,
            };
            let result = service.query_one(&number, options).await;
            print_json(&result)?;
        },
        Commands::Batch { numbers } => {
            let result = service.query_batch(&numbers).await;
            print_json(&result)?;
        },
        Commands::Movements { number } => {
            let movements = service.stored_movements(&number)?;
            print_json(&movements)?;
        },
        Commands::Novelties { limit } => {
            let novelties = service.unread_novelties(limit)?;
            print_json(&novelties)?;
        },
        Commands::MarkRead { ids, all } => {
            let flipped = if all {
                service.mark_all_novelties_read()?
            } else {
                service.mark_novelties_read(&ids)?
            };
            println!("{flipped} novelties marked read");
        },
        Commands::Stats => {
            let stats = service.statistics()?;
            print_json(&stats)?;
        },
        Commands::Cleanup => {
            let report = service.run_cleanup()?;
            print_json(&report)?;
        },
        Commands::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| config.http_addr.clone());
            serve(service, &addr).await?;
        },
    }

    Ok(())
}

/// Wires the engine from configuration.
///
/// The fetch capability is fixture-backed: wire-level tribunal clients are
/// injected by embedders of the library; the CLI reads JSON files from the
/// fixtures directory (`<data_dir>/fixtures` unless overridden).
fn build_service(config: &AndamentoConfig) -> anyhow::Result<MovementQueryService> {
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(SqliteStore::open(config.db_path())?);

    let fixtures = config
        .fixtures_dir
        .clone()
        .unwrap_or_else(|| config.data_dir.join("fixtures"));
    let fetcher: Arc<dyn MovementFetcher> = Arc::new(FixtureFetcher::new(fixtures));

    Ok(MovementQueryService::builder(fetcher, store)
        .with_request_timeout(config.request_timeout)
        .with_cache_ttls(
            config.cache_fresh_ttl,
            config.cache_stale_ttl,
            config.cache_persistent_ttl_secs,
        )
        .with_novelty_ttl_secs(config.novelty_ttl_secs)
        .build())
}

async fn serve(service: MovementQueryService, addr: &str) -> anyhow::Result<()> {
    service.start_maintenance();
    let app = api::router(service.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    service.shutdown();
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
