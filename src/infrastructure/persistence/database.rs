use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_runs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                rebalance_request_id TEXT,
                ticker TEXT NOT NULL,
                analysis_date TEXT NOT NULL,
                status TEXT NOT NULL,
                decision TEXT NOT NULL,
                confidence INTEGER NOT NULL,
                full_analysis TEXT NOT NULL,
                agent_insights TEXT NOT NULL,
                metadata TEXT NOT NULL,
                workflow_steps TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create analysis_runs table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_analysis_runs_user ON analysis_runs (user_id);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create analysis_runs user index")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_analysis_runs_rebalance ON analysis_runs (rebalance_request_id);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create analysis_runs rebalance index")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_analysis_runs_stale ON analysis_runs (status, updated_at);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create analysis_runs stale index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rebalance_runs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                target_allocations TEXT NOT NULL,
                portfolio_snapshot TEXT NOT NULL,
                constraints TEXT NOT NULL,
                watchlist TEXT NOT NULL,
                selected_stocks TEXT NOT NULL,
                analysis_ids TEXT NOT NULL,
                total_stocks INTEGER NOT NULL,
                stocks_analyzed INTEGER NOT NULL,
                workflow_steps TEXT NOT NULL,
                opportunity_evaluation TEXT,
                rebalance_plan TEXT,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create rebalance_runs table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_rebalance_runs_user ON rebalance_runs (user_id);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create rebalance_runs user index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_orders (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                ticker TEXT NOT NULL,
                action TEXT NOT NULL,
                shares TEXT NOT NULL,
                dollar_amount TEXT NOT NULL,
                status TEXT NOT NULL,
                analysis_id TEXT,
                rebalance_request_id TEXT,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trade_orders table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trade_orders_user_ticker ON trade_orders (user_id, ticker);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trade_orders dedup index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schedule_rules (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                interval_value INTEGER NOT NULL,
                interval_unit TEXT NOT NULL,
                time_of_day_minutes INTEGER NOT NULL,
                timezone TEXT NOT NULL,
                selected_tickers TEXT NOT NULL,
                include_watchlist INTEGER NOT NULL,
                day_of_week TEXT NOT NULL,
                last_executed_at TEXT,
                constraints TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create schedule_rules table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_schedule_rules_enabled ON schedule_rules (enabled, last_executed_at);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create schedule_rules index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS role_assignments (
                user_id TEXT NOT NULL,
                role_name TEXT NOT NULL,
                priority INTEGER NOT NULL,
                expires_at TEXT,
                PRIMARY KEY (user_id, role_name)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create role_assignments table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS role_limits (
                role_name TEXT PRIMARY KEY,
                max_parallel_analysis INTEGER NOT NULL,
                max_rebalance_stocks INTEGER NOT NULL,
                schedule_resolution TEXT NOT NULL,
                rebalance_access INTEGER NOT NULL,
                opportunity_agent_access INTEGER NOT NULL,
                enable_live_trading INTEGER NOT NULL,
                enable_auto_trading INTEGER NOT NULL,
                max_debate_rounds INTEGER NOT NULL,
                near_limit_analysis_access INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create role_limits table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_api_settings (
                user_id TEXT PRIMARY KEY,
                alpaca_key_id TEXT,
                alpaca_secret_key TEXT,
                paper_trading INTEGER NOT NULL,
                auto_execute_trades INTEGER NOT NULL DEFAULT 0,
                auto_near_limit_analysis INTEGER NOT NULL DEFAULT 0,
                ai_provider TEXT,
                ai_provider_settings TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create user_api_settings table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
