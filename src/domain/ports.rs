//! Port traits (hexagonal seams) the coordinators program against. Each has
//! exactly one production implementation under `infrastructure`, following
//! the teacher's repository-trait-plus-impl split.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::CoordinatorResult;
use crate::domain::models::{
    AgentStep, AnalysisMetadata, AnalysisRun, PhaseName, RebalanceRun, RebalanceStepKey, ScheduleRule,
    TradeOrder, TradeOrderMetadata, UserApiSettings, UserQuotas,
};
use crate::domain::status::{AgentStepStatus, AnalysisStatus, Decision, RebalanceStatus, TradeOrderStatus};

/// A patch applied atomically alongside a conditional status transition.
/// Fields left `None` are untouched.
#[derive(Debug, Clone, Default)]
pub struct AnalysisPatch {
    pub decision: Option<Decision>,
    pub confidence: Option<u8>,
    pub full_analysis: Option<serde_json::Value>,
    pub agent_insight: Option<(String, serde_json::Value)>,
    pub metadata: Option<AnalysisMetadata>,
    pub workflow_steps: Option<Vec<crate::domain::models::Phase>>,
}

#[derive(Debug, Clone, Default)]
pub struct RebalancePatch {
    pub status_message: Option<String>,
    pub metadata: Option<crate::domain::models::RebalanceMetadata>,
    pub opportunity_evaluation: Option<serde_json::Value>,
    pub rebalance_plan: Option<serde_json::Value>,
    pub selected_stocks: Option<Vec<String>>,
    pub analysis_ids: Option<Vec<Uuid>>,
    pub total_stocks: Option<u32>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeOrderSource {
    Analysis(Uuid),
    Rebalance(Uuid),
    Manual,
}

/// C2 — authoritative persistence of AnalysisRun/RebalanceRun rows and their
/// per-agent workflow-step sub-documents, with atomic conditional updates.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn insert_analysis(&self, run: &AnalysisRun) -> CoordinatorResult<()>;
    async fn get_analysis(&self, id: Uuid, user_id: Uuid) -> CoordinatorResult<AnalysisRun>;
    async fn get_analysis_any(&self, id: Uuid) -> CoordinatorResult<AnalysisRun>;

    async fn conditional_update_analysis_status(
        &self,
        id: Uuid,
        expected: AnalysisStatus,
        next: AnalysisStatus,
        patch: AnalysisPatch,
    ) -> CoordinatorResult<()>;

    /// Cancellation always wins; no expected-status precondition.
    async fn cancel_analysis(&self, id: Uuid) -> CoordinatorResult<()>;

    async fn set_agent_step_status(
        &self,
        analysis_id: Uuid,
        phase: PhaseName,
        agent_display_name: &str,
        new_status: AgentStepStatus,
        progress: Option<u8>,
    ) -> CoordinatorResult<AgentStep>;

    async fn insert_rebalance(&self, run: &RebalanceRun) -> CoordinatorResult<()>;
    async fn get_rebalance(&self, id: Uuid, user_id: Uuid) -> CoordinatorResult<RebalanceRun>;
    async fn get_rebalance_any(&self, id: Uuid) -> CoordinatorResult<RebalanceRun>;

    async fn update_rebalance_status(
        &self,
        id: Uuid,
        next: RebalanceStatus,
        patch: RebalancePatch,
    ) -> CoordinatorResult<()>;

    /// Three-tier fallback write used by error callbacks: full → simple → minimal.
    async fn set_rebalance_error(&self, id: Uuid, message: &str, metadata: Option<serde_json::Value>) -> CoordinatorResult<()>;

    async fn cancel_rebalance(&self, id: Uuid) -> CoordinatorResult<()>;

    async fn set_rebalance_step(
        &self,
        rebalance_id: Uuid,
        step: RebalanceStepKey,
        status: AgentStepStatus,
        detail: serde_json::Value,
    ) -> CoordinatorResult<()>;

    async fn increment_stocks_analyzed(&self, rebalance_id: Uuid) -> CoordinatorResult<(u32, u32)>;

    async fn list_child_analyses(&self, rebalance_id: Uuid) -> CoordinatorResult<Vec<AnalysisRun>>;

    async fn admit_next_pending_child(&self, rebalance_id: Uuid, quota: u32) -> CoordinatorResult<Option<AnalysisRun>>;

    async fn find_stale_running(&self, threshold_seconds: i64) -> CoordinatorResult<Vec<AnalysisRun>>;

    async fn list_due_schedules(&self, window_ahead_minutes: i64, grace_minutes: i64) -> CoordinatorResult<Vec<ScheduleRule>>;

    async fn mark_schedule_executed(
        &self,
        schedule_id: Uuid,
        success: bool,
        rebalance_id: Option<Uuid>,
        error: Option<String>,
    ) -> CoordinatorResult<()>;
}

/// C2 sub-surface for TradeOrder rows; kept separate so callers that only
/// execute trades do not need the whole workflow surface.
#[async_trait]
pub trait TradeOrderStore: Send + Sync {
    async fn insert_trade_order(&self, order: &TradeOrder) -> CoordinatorResult<()>;
    async fn get_trade_order(&self, id: Uuid) -> CoordinatorResult<TradeOrder>;
    async fn find_sibling_decided(&self, user_id: Uuid, ticker: &str, source: TradeOrderSource) -> CoordinatorResult<Option<TradeOrder>>;
    async fn cleanup_duplicates(&self, user_id: Uuid, ticker: &str, source: TradeOrderSource, keep: Uuid) -> CoordinatorResult<()>;
    async fn update_trade_order_status(&self, id: Uuid, status: TradeOrderStatus, metadata: TradeOrderMetadata) -> CoordinatorResult<()>;
    async fn update_trade_order_broker_fields(&self, id: Uuid, alpaca_order: crate::domain::models::AlpacaOrderMeta) -> CoordinatorResult<()>;
    async fn list_pending_for_source(&self, source: TradeOrderSource) -> CoordinatorResult<Vec<TradeOrder>>;
}

/// C3 — resolves a user's effective quotas from their highest-priority role.
#[async_trait]
pub trait RoleLimitResolver: Send + Sync {
    async fn get_user_quotas(&self, user_id: Uuid) -> CoordinatorResult<UserQuotas>;
    async fn sweep(&self) -> CoordinatorResult<RoleSweepOutcome>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoleSweepOutcome {
    pub schedules_disabled: u32,
    pub near_limit_flags_disabled: u32,
}

/// (SUPPLEMENT) Read-only access to the brokerage-key / AI-provider settings
/// document referenced by C4's payload and C9's key-loading step.
#[async_trait]
pub trait ApiSettingsStore: Send + Sync {
    async fn get_api_settings(&self, user_id: Uuid) -> CoordinatorResult<UserApiSettings>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPayload {
    pub analysis_id: Uuid,
    pub ticker: String,
    pub user_id: Uuid,
    pub phase: PhaseName,
    pub api_settings: serde_json::Value,
    pub analysis_context: serde_json::Value,
}

/// C4 — fire-and-forget remote invocation of a named agent.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, agent_name: &str, payload: AgentPayload) -> CoordinatorResult<()>;
}

#[derive(Debug, Clone)]
pub struct BrokerCredentials {
    pub key_id: String,
    pub secret_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AssetInfo {
    pub symbol: String,
    pub tradable: bool,
    pub fractionable: bool,
    pub asset_class: String,
}

#[derive(Debug, Clone)]
pub struct BrokerOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub time_in_force: TimeInForce,
    pub client_order_id: String,
    pub qty: Option<Decimal>,
    pub notional: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    Gtc,
    Day,
}

impl TimeInForce {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeInForce::Gtc => "gtc",
            TimeInForce::Day => "day",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerOrderAck {
    pub id: String,
    pub status: String,
    pub already_closed: bool,
}

#[derive(Debug, Clone)]
pub struct BrokerOrderSnapshot {
    pub id: String,
    pub status: String,
    pub filled_qty: Option<Decimal>,
    pub filled_avg_price: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub qty: Decimal,
    pub unrealized_plpc: Decimal,
}

/// C9's brokerage seam: symbol lookup, order submission/cancellation,
/// position-close, and status polling.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn resolve_asset(&self, creds: &BrokerCredentials, candidate: &str) -> CoordinatorResult<Option<AssetInfo>>;
    async fn submit_order(&self, creds: &BrokerCredentials, req: BrokerOrderRequest) -> CoordinatorResult<BrokerOrderAck>;
    async fn get_order(&self, creds: &BrokerCredentials, order_id: &str) -> CoordinatorResult<BrokerOrderSnapshot>;
    async fn close_position(&self, creds: &BrokerCredentials, symbol: &str) -> CoordinatorResult<BrokerOrderAck>;
    async fn get_position_quantity(&self, creds: &BrokerCredentials, symbol: &str) -> CoordinatorResult<Option<Decimal>>;

    /// Full position snapshot, used by the rebalance coordinator's threshold
    /// check (§4.6.1) to compute per-position drift.
    async fn list_positions(&self, creds: &BrokerCredentials) -> CoordinatorResult<Vec<PositionSnapshot>>;
}
