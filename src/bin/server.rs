//! Deskflow coordinator server — the multi-tenant trading-workflow
//! coordinator's HTTP surface. Wires the persistence, brokerage, and
//! agent-invocation adapters to the five application-layer components and
//! serves the four coordinator endpoints over `axum`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn, Level};
use tracing_subscriber::prelude::*;

use deskflow::application::{AnalysisCoordinator, AutoTradeChecker, RebalanceCoordinator, ScheduleRunner, StaleSweeper, TradeExecutor};
use deskflow::config::Config;
use deskflow::domain::ports::RoleLimitResolver;
use deskflow::infrastructure::alpaca::AlpacaBroker;
use deskflow::infrastructure::agents::HttpAgentInvoker;
use deskflow::infrastructure::observability::Metrics;
use deskflow::infrastructure::persistence::{Database, SqliteStore};
use deskflow::interfaces::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("deskflow coordinator {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let database = Database::new(&config.service.database_url).await?;
    let store: Arc<SqliteStore> = Arc::new(SqliteStore::new(database));

    let metrics = Arc::new(Metrics::new()?);
    let broker = Arc::new(AlpacaBroker::new());
    let agent_base_url = std::env::var("AGENT_SERVICE_BASE_URL").unwrap_or_else(|_| "http://localhost:9000".to_string());
    let invoker = Arc::new(HttpAgentInvoker::new(agent_base_url));

    let trade_executor = Arc::new(TradeExecutor::new(
        store.clone(),
        store.clone(),
        broker.clone(),
        config.service.broker_poll_interval,
        config.service.broker_poll_timeout,
    ));

    let auto_trade = Arc::new(AutoTradeChecker::new(store.clone(), store.clone(), trade_executor.clone(), config.service.max_parallel_rebalance_fanout));

    let analysis = Arc::new(AnalysisCoordinator::new(
        store.clone(),
        store.clone(),
        invoker.clone(),
        store.clone(),
        store.clone(),
        auto_trade.clone(),
        config.service.default_max_debate_rounds,
    ));

    let rebalance = Arc::new(RebalanceCoordinator::new(store.clone(), invoker.clone(), store.clone(), broker.clone(), analysis.clone(), auto_trade.clone()));

    // The two coordinators reference each other; this closes the cycle.
    analysis.set_rebalance_notifier(rebalance.clone());

    let stale_sweeper = Arc::new(StaleSweeper::new(
        store.clone(),
        analysis.clone(),
        metrics.clone(),
        config.service.stale_threshold.as_secs() as i64,
        config.service.max_reactivation_attempts,
    ));

    let schedule_runner = Arc::new(ScheduleRunner::new(
        store.clone(),
        store.clone(),
        rebalance.clone(),
        metrics.clone(),
        config.service.schedule_window_ahead.as_secs() as i64 / 60,
        config.service.schedule_grace.as_secs() as i64 / 60,
    ));

    tokio::spawn(stale_sweeper.clone().run_forever(config.service.stale_sweep_interval));
    tokio::spawn(schedule_runner.run_forever(config.service.schedule_poll_interval));
    tokio::spawn(run_role_sweep_forever(store.clone(), config.service.role_sweep_interval));

    if config.observability.enabled {
        tokio::spawn(serve_metrics(metrics.clone(), config.observability.bind_address.clone(), config.observability.port));
    }

    let app_state = Arc::new(AppState {
        analysis,
        rebalance,
        trade_executor,
        stale_sweeper,
        store: store.clone(),
        api_settings: store,
        service_bearer_token: config.service.service_bearer_token.clone(),
        stale_threshold_seconds: config.service.stale_threshold.as_secs() as i64,
    });

    let listener = tokio::net::TcpListener::bind(&config.service.bind_address).await?;
    info!(addr = %config.service.bind_address, "coordinator listening");

    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Periodic role/quota sweep (§4.3): drops expired role assignments and
/// disables schedule rules and near-limit-analysis flags that outlived the
/// access granting them.
async fn run_role_sweep_forever(store: Arc<SqliteStore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match store.sweep().await {
            Ok(outcome) => {
                if outcome.schedules_disabled > 0 || outcome.near_limit_flags_disabled > 0 {
                    info!(
                        schedules_disabled = outcome.schedules_disabled,
                        near_limit_flags_disabled = outcome.near_limit_flags_disabled,
                        "role sweep disabled stale grants"
                    );
                }
            }
            Err(e) => warn!("role sweep failed: {e}"),
        }
    }
}

/// Serves `GET /metrics` on its own listener (AMBIENT, separate from the
/// coordinator's bearer-authenticated HTTP surface) so a scrape doesn't need
/// a service credential.
async fn serve_metrics(metrics: Arc<Metrics>, bind_address: String, port: u16) {
    let app = axum::Router::new()
        .route("/metrics", axum::routing::get(move || { let metrics = metrics.clone(); async move { metrics.render() } }));

    let addr = format!("{bind_address}:{port}");
    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            info!(addr = %addr, "metrics endpoint listening");
            if let Err(e) = axum::serve(listener, app).await {
                warn!("metrics server exited: {e}");
            }
        }
        Err(e) => warn!("failed to bind metrics listener on {addr}: {e}"),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining connections...");
    tokio::time::sleep(Duration::from_millis(100)).await;
}
