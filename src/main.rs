//! Process entry point: loads configuration, wires the exchange core to
//! the scheduler and the dashboard collaborator, and runs until signaled
//! (spec.md section 6: "the process runs until signaled; no specific exit
//! codes defined by the core").

use anyhow::{Context, Result};
use clap::Parser;
use matchbook_exchange::clock::{Clock, WallClock};
use matchbook_exchange::config::Config;
use matchbook_exchange::dashboard::{self, AppState};
use matchbook_exchange::exchange::state::Exchange;
use matchbook_exchange::market_data::RestMarketDataClient;
use matchbook_exchange::scheduler::Scheduler;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "exchange", about = "Simulated equities exchange")]
struct Cli {
    /// YAML configuration file (spec.md section 6).
    #[arg(long, env = "EXCHANGE_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Directory for rotating log files and the market-data cache/counter.
    /// Omit to log to stdout only (SPEC_FULL.md section A).
    #[arg(long, env = "EXCHANGE_LOGS_DIR")]
    logs_dir: Option<PathBuf>,

    /// Base URL of the market-data intraday HTTP endpoint.
    #[arg(long, env = "MARKET_DATA_BASE_URL", default_value = "https://example.invalid/market-data")]
    market_data_base_url: String,

    /// HTTP bind address for the dashboard collaborator.
    #[arg(long, env = "EXCHANGE_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    http_addr: String,
}

fn init_tracing(logs_dir: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("EXCHANGE_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("exchange=info,tower_http=info"));

    match logs_dir {
        Some(dir) => {
            let _ = std::fs::create_dir_all(dir);
            let file_appender = tracing_appender::rolling::daily(dir, "exchange.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(non_blocking)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.logs_dir.as_ref());

    let config = Config::load(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;
    info!(symbols = ?config.symbol_keys(), "configuration loaded");

    let clock: Arc<dyn Clock> = Arc::new(WallClock);
    let now = clock.now();

    let exchange = Arc::new(Exchange::new(config.max_daily_loss, config.max_order_rate, now));

    let logs_dir = cli.logs_dir.clone().unwrap_or_else(|| PathBuf::from("logs"));
    let market_data = Arc::new(
        RestMarketDataClient::new(cli.market_data_base_url.clone(), config.api_key.clone(), logs_dir)
            .context("constructing market-data client")?,
    );

    let scheduler = Arc::new(Scheduler::new(
        exchange.clone(),
        clock.clone(),
        market_data,
        Duration::from_secs(config.scheduler_tick_secs),
        config.heartbeat_interval_secs,
    ));

    let symbols = config.symbol_keys();
    let scheduler_task = {
        let scheduler = scheduler.clone();
        let symbols = symbols.clone();
        tokio::spawn(async move { scheduler.run(symbols).await })
    };

    let selected_symbol = symbols.first().cloned().unwrap_or_default();
    let app_state = Arc::new(AppState {
        exchange: exchange.clone(),
        scheduler: scheduler.clone(),
        selected_symbol: Mutex::new(selected_symbol),
    });
    let router = dashboard::router(app_state);

    let listener = tokio::net::TcpListener::bind(&cli.http_addr)
        .await
        .with_context(|| format!("binding dashboard HTTP listener on {}", cli.http_addr))?;
    info!(addr = %cli.http_addr, "dashboard listening");

    let dashboard_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "dashboard server exited");
        }
    });

    tokio::select! {
        _ = scheduler_task => {}
        _ = dashboard_task => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}
