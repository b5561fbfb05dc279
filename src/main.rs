use anyhow::{bail, Context};
use chrono::Local;
use clap::{Parser, Subcommand};
use dextrader::api::JupiterClient;
use dextrader::credentials::{CredentialResolver, WalletKeyMap};
use dextrader::execution::{prepare, BatchOrchestrator, RetryController, RetryPolicy, RpcRelay};
use dextrader::journal::ResultJournal;
use dextrader::loader::{load_trade_batch, select_latest_trade_file, TokenRegistry};
use dextrader::settings::Settings;
use dextrader::TradeBatch;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONFIG: &str = "dextrader.toml";

#[derive(Parser)]
#[command(name = "dextrader", version, about = "Execute a sheet of DEX swaps, one trade at a time")]
struct Cli {
    /// TOML config file (default: dextrader.toml, optional)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute the trade sheet
    Run {
        /// Trade sheet or earlier results file; defaults to the latest sheet in paths.trades_dir
        #[arg(long, short)]
        input: Option<PathBuf>,
    },
    /// Check config, sheet, token metadata and credentials without trading
    Validate {
        #[arg(long, short)]
        input: Option<PathBuf>,
    },
}

// ============================================================================
// Startup
// ============================================================================

/// Everything loaded before the first trade. Any failure here aborts the run.
struct Preflight {
    batch: TradeBatch,
    tokens: TokenRegistry,
    wallets: WalletKeyMap,
}

async fn preflight(settings: &Settings, input: Option<PathBuf>) -> anyhow::Result<Preflight> {
    let sheet = match input {
        Some(path) => path,
        None => select_latest_trade_file(
            &settings.paths.trades_dir,
            &settings.paths.trade_file_prefix,
        )
        .context("Failed to locate a trade sheet")?,
    };

    let batch = load_trade_batch(&sheet)
        .with_context(|| format!("Failed to load trade sheet {}", sheet.display()))?;
    tracing::info!("📋 Loaded {} trades from {}", batch.len(), sheet.display());

    let tokens = TokenRegistry::load(&settings.paths.token_metadata).with_context(|| {
        format!(
            "Failed to load token metadata {}",
            settings.paths.token_metadata.display()
        )
    })?;

    let wallets = CredentialResolver::from_config(&settings.secrets)?
        .resolve()
        .await
        .context("Failed to resolve wallet credentials")?;

    Ok(Preflight {
        batch,
        tokens,
        wallets,
    })
}

// ============================================================================
// Commands
// ============================================================================

async fn run(settings: Settings, input: Option<PathBuf>) -> anyhow::Result<()> {
    let Preflight {
        mut batch,
        tokens,
        wallets,
    } = preflight(&settings, input).await?;

    let quotes = JupiterClient::new(
        settings.quote.base_url.clone(),
        Duration::from_secs(settings.quote.timeout_secs),
        settings.quote.requests_per_minute,
    )?;
    let relay = RpcRelay::new(&settings.rpc)?;
    let journal = ResultJournal::create(&settings.paths.results_dir, Local::now())
        .context("Failed to prepare results directory")?;
    tracing::info!(run_id = %journal.run_id(), "📝 Results: {}", journal.results_path().display());
    tracing::info!("📝 Audit log: {}", journal.log().path().display());

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("\n⚠️  Received Ctrl+C, finishing current trade then stopping...");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let orchestrator = BatchOrchestrator::new(
        quotes,
        relay,
        wallets,
        tokens,
        RetryController::new(RetryPolicy::from(&settings.retry)),
        journal,
    )
    .with_default_delay(settings.default_delay())
    .with_shutdown(shutdown);

    let summary = orchestrator
        .run(&mut batch)
        .await
        .context("Batch aborted: results file could not be written")?;

    tracing::info!(
        "🏁 Done: {} succeeded, {} failed, {} skipped, {} pending, {} audit write failures",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.pending,
        summary.audit_write_failures
    );
    Ok(())
}

async fn validate(settings: Settings, input: Option<PathBuf>) -> anyhow::Result<()> {
    let Preflight {
        batch,
        tokens,
        wallets,
    } = preflight(&settings, input).await?;

    let mut problems = 0;
    for (index, record) in batch.records.iter().enumerate() {
        if let Err(e) = prepare(record, &wallets, &tokens) {
            problems += 1;
            tracing::error!(wallet = %record.label(), "❌ Trade {}: {}", index + 1, e);
        }
    }

    if problems > 0 {
        bail!("{} of {} trades would fail", problems, batch.len());
    }
    tracing::info!("✅ All {} trades are ready to execute", batch.len());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let (config_path, required) = match &cli.config {
        Some(path) => (path.as_path(), true),
        None => (Path::new(DEFAULT_CONFIG), false),
    };
    let settings = Settings::load(config_path, required)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    tracing::debug!("{:?}", settings);

    tracing::info!("🚀 dextrader starting");

    match cli.command {
        Command::Run { input } => run(settings, input).await,
        Command::Validate { input } => validate(settings, input).await,
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dextrader=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
