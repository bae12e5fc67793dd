//! Shared handler state: one `Arc` per coordinator/store, cloned cheaply
//! into every axum handler via `State<Arc<AppState>>`.

use std::sync::Arc;

use crate::application::{AnalysisCoordinator, RebalanceCoordinator, StaleSweeper, TradeExecutor};
use crate::domain::ports::{ApiSettingsStore, WorkflowStore};

pub struct AppState {
    pub analysis: Arc<AnalysisCoordinator>,
    pub rebalance: Arc<RebalanceCoordinator>,
    pub trade_executor: Arc<TradeExecutor>,
    pub stale_sweeper: Arc<StaleSweeper>,
    pub store: Arc<dyn WorkflowStore>,
    pub api_settings: Arc<dyn ApiSettingsStore>,
    /// Pre-shared bearer trusted as a service-to-service caller (§6).
    pub service_bearer_token: String,
    pub stale_threshold_seconds: i64,
}
