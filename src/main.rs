use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use curvebot::api::{CurveClient, RelayClient};
use curvebot::config::BotConfig;
use curvebot::db::PostgresLedgerStore;
use curvebot::execution::LedgerSnapshot;
use curvebot::models::Side;
use curvebot::persistence::{JsonFileStore, LedgerStore, RedisLedgerStore};
use curvebot::plan::{BotContext, Collaborators, Plan, PlanRunner};
use curvebot::Result;

#[derive(Parser)]
#[command(name = "curvebot", about = "Leveraged positions on bonding-curve markets")]
struct Cli {
    /// Config file (defaults to ./curvebot.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a JSON trade plan step by step
    Run { plan: PathBuf },
    /// List open positions from the persisted ledger
    Positions {
        #[arg(long)]
        side: Option<Side>,
    },
    /// Show the most recent trade history entries
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BotConfig::load(cli.config.as_deref())?;
    setup_logging();

    let store = open_store(&config).await?;

    match cli.command {
        Command::Run { plan } => run_plan(&config, store, plan).await,
        Command::Positions { side } => show_positions(store.as_ref(), side).await,
        Command::History { limit } => show_history(store.as_ref(), limit).await,
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("curvebot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Postgres when configured, then Redis, then the local JSON file
async fn open_store(config: &BotConfig) -> Result<Arc<dyn LedgerStore>> {
    if let Some(database_url) = &config.database_url {
        let store = PostgresLedgerStore::new(database_url, &config.wallet).await?;
        return Ok(Arc::new(store));
    }

    if let Some(redis_url) = &config.redis_url {
        let store = RedisLedgerStore::new(redis_url, &config.wallet).await?;
        tracing::info!("Ledger persisted to Redis at {}", redis_url);
        return Ok(Arc::new(store));
    }

    tracing::info!("Ledger persisted to {}", config.ledger_path);
    Ok(Arc::new(JsonFileStore::new(&config.ledger_path)))
}

async fn run_plan(config: &BotConfig, store: Arc<dyn LedgerStore>, path: PathBuf) -> Result<()> {
    let plan = Plan::load(&path).await?;

    let curve = Arc::new(CurveClient::new(&config.quote_api_url, config.rate_limit_rpm)?);
    let relay = Arc::new(RelayClient::new(
        &config.relay_api_url,
        config.relay_api_key.clone(),
        &config.wallet,
        config.rate_limit_rpm,
        config.confirm_timeout(),
    )?);

    let ctx = BotContext::start(Collaborators::new(curve, relay), config.policy(), Some(store)).await?;

    let runner = PlanRunner::new();
    let stop = runner.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing current step");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let report = runner.run(&ctx, &plan).await;
    ctx.shutdown().await?;

    println!(
        "{} succeeded, {} failed, {} skipped",
        report.succeeded(),
        report.failed(),
        report.skipped
    );
    for step in &report.steps {
        match &step.result {
            Ok(outcome) => println!("  [{}] ok    {}", step.index + 1, serde_json::to_string(outcome)?),
            Err(e) => println!("  [{}] error {}", step.index + 1, e),
        }
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(format!("plan {} did not complete", path.display()).into())
    }
}

async fn load_snapshot(store: &dyn LedgerStore) -> Result<LedgerSnapshot> {
    Ok(store.load().await?.unwrap_or_default())
}

async fn show_positions(store: &dyn LedgerStore, side: Option<Side>) -> Result<()> {
    let snapshot = load_snapshot(store).await?;
    let positions: Vec<_> = snapshot
        .positions
        .iter()
        .filter(|p| side.map_or(true, |s| p.side == s))
        .collect();

    if positions.is_empty() {
        println!("No open positions");
        return Ok(());
    }

    for p in positions {
        println!(
            "{:<5} {:<20} size={} margin={} stop={} lev={:.2} opened={}",
            p.side,
            p.order_ref,
            p.size,
            p.margin,
            p.close_price,
            p.leverage,
            p.opened_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn show_history(store: &dyn LedgerStore, limit: usize) -> Result<()> {
    let snapshot = load_snapshot(store).await?;

    for entry in snapshot.history.iter().rev().take(limit) {
        println!(
            "{} {:?} {:<10} {:>6}ms {}{}",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            entry.status,
            serde_json::to_string(&entry.kind)?.trim_matches('"'),
            entry.duration_ms,
            entry.description,
            entry
                .error
                .as_deref()
                .map(|e| format!(" ({})", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}
