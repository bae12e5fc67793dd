//! Auto-trade checker (C10): after a rebalance or analysis decides, executes
//! every pending TradeOrder for that source automatically when the user has
//! opted in.

use std::sync::Arc;

use uuid::Uuid;

use crate::application::trade_executor::{TradeAction, TradeExecutor};
use crate::domain::errors::CoordinatorResult;
use crate::domain::ports::{ApiSettingsStore, TradeOrderSource, TradeOrderStore};

pub struct AutoTradeOutcome {
    pub enabled: bool,
    pub orders_executed: u32,
    pub errors: Vec<String>,
}

pub struct AutoTradeChecker {
    trade_orders: Arc<dyn TradeOrderStore>,
    api_settings: Arc<dyn ApiSettingsStore>,
    executor: Arc<TradeExecutor>,
    max_parallel: usize,
}

impl AutoTradeChecker {
    pub fn new(trade_orders: Arc<dyn TradeOrderStore>, api_settings: Arc<dyn ApiSettingsStore>, executor: Arc<TradeExecutor>, max_parallel: usize) -> Self {
        Self { trade_orders, api_settings, executor, max_parallel: max_parallel.max(1) }
    }

    pub async fn run(&self, source: TradeOrderSource) -> CoordinatorResult<AutoTradeOutcome> {
        let pending = self.trade_orders.list_pending_for_source(source).await?;
        if pending.is_empty() {
            return Ok(AutoTradeOutcome { enabled: false, orders_executed: 0, errors: Vec::new() });
        }

        // All pending orders for one rebalance/analysis source share a user.
        let user_id = pending[0].user_id;
        let settings = self.api_settings.get_api_settings(user_id).await?;
        if !settings.auto_execute_trades {
            return Ok(AutoTradeOutcome { enabled: false, orders_executed: 0, errors: Vec::new() });
        }

        let mut executed = 0u32;
        let mut errors = Vec::new();
        for chunk in pending.chunks(self.max_parallel) {
            let results = futures::future::join_all(chunk.iter().map(|order| {
                let executor = self.executor.clone();
                let order_id = order.id;
                let owner = order.user_id;
                async move { executor.execute(order_id, TradeAction::Approve, owner, true).await }
            }))
            .await;

            for result in results {
                match result {
                    Ok(outcome) if outcome.success => executed += 1,
                    Ok(outcome) => errors.push(outcome.error.unwrap_or_else(|| "unknown auto-trade failure".to_string())),
                    Err(e) => errors.push(e.to_string()),
                }
            }
        }

        Ok(AutoTradeOutcome { enabled: true, orders_executed: executed, errors })
    }
}
