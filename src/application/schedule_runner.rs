//! Schedule runner (C8): periodically fires due ScheduleRules into new
//! rebalances. Watchlist expansion is an external collaborator's concern
//! (Non-goal: quote fetching); `selected_tickers` is used as-is.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::application::rebalance_coordinator::RebalanceCoordinator;
use crate::domain::errors::CoordinatorResult;
use crate::domain::ports::{ApiSettingsStore, BrokerCredentials, WorkflowStore};
use crate::infrastructure::observability::Metrics;

const LIVE_BASE_URL: &str = "https://api.alpaca.markets";
const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";

pub struct ScheduleRunner {
    store: Arc<dyn WorkflowStore>,
    api_settings: Arc<dyn ApiSettingsStore>,
    rebalance: Arc<RebalanceCoordinator>,
    metrics: Arc<Metrics>,
    window_ahead_minutes: i64,
    grace_minutes: i64,
}

impl ScheduleRunner {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        api_settings: Arc<dyn ApiSettingsStore>,
        rebalance: Arc<RebalanceCoordinator>,
        metrics: Arc<Metrics>,
        window_ahead_minutes: i64,
        grace_minutes: i64,
    ) -> Self {
        Self { store, api_settings, rebalance, metrics, window_ahead_minutes, grace_minutes }
    }

    pub async fn run_forever(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                warn!("schedule poll failed: {e}");
            }
        }
    }

    pub async fn poll_once(&self) -> CoordinatorResult<()> {
        let due = self.store.list_due_schedules(self.window_ahead_minutes, self.grace_minutes).await?;
        for rule in due {
            let result = self.fire(&rule).await;
            match result {
                Ok(rebalance_id) => {
                    self.store.mark_schedule_executed(rule.id, true, Some(rebalance_id), None).await?;
                    info!(schedule_id = %rule.id, %rebalance_id, "schedule fired");
                    self.metrics.inc_schedule_fired("fired");
                }
                Err(e) => {
                    warn!(schedule_id = %rule.id, "schedule failed to fire: {e}");
                    self.store.mark_schedule_executed(rule.id, false, None, Some(e.to_string())).await?;
                    self.metrics.inc_schedule_fired("failed");
                }
            }
        }
        Ok(())
    }

    async fn fire(&self, rule: &crate::domain::models::ScheduleRule) -> CoordinatorResult<uuid::Uuid> {
        let settings = self.api_settings.get_api_settings(rule.user_id).await?;
        let key_id = settings.alpaca_key_id.unwrap_or_default();
        let secret_key = settings.alpaca_secret_key.unwrap_or_default();
        let creds = BrokerCredentials {
            key_id,
            secret_key,
            base_url: if settings.paper_trading { PAPER_BASE_URL.to_string() } else { LIVE_BASE_URL.to_string() },
        };
        self.rebalance.start(rule.user_id, rule.selected_tickers.clone(), rule.constraints.clone(), &creds).await
    }
}
