//! Core entities shared by every coordinator component (spec data model, §3).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::status::{AgentStepStatus, AnalysisStatus, Decision, RebalanceStatus, TradeOrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Analysis,
    Research,
    Trading,
    Risk,
    Portfolio,
}

impl PhaseName {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseName::Analysis => "analysis",
            PhaseName::Research => "research",
            PhaseName::Trading => "trading",
            PhaseName::Risk => "risk",
            PhaseName::Portfolio => "portfolio",
        }
    }

    pub const ORDER: [PhaseName; 5] = [
        PhaseName::Analysis,
        PhaseName::Research,
        PhaseName::Trading,
        PhaseName::Risk,
        PhaseName::Portfolio,
    ];

    pub fn next(self) -> Option<PhaseName> {
        let idx = Self::ORDER.iter().position(|p| *p == self)?;
        Self::ORDER.get(idx + 1).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub name: String,
    pub function_name: Option<String>,
    pub status: AgentStepStatus,
    pub progress: u8,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub name: PhaseName,
    pub agents: Vec<AgentStep>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    #[serde(default)]
    pub reactivation_attempts: u32,
    #[serde(default)]
    pub max_reactivations_reached: bool,
    #[serde(default)]
    pub error_reason: Option<String>,
    /// Current debate round inside the research phase; starts at 1.
    #[serde(default = "default_round")]
    pub current_round: u32,
    #[serde(default)]
    pub auto_trade_enabled: bool,
    #[serde(default)]
    pub orders_auto_executed: u32,
    #[serde(default)]
    pub auto_trade_errors: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_round() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: Uuid,
    pub user_id: Uuid,
    pub rebalance_request_id: Option<Uuid>,
    pub ticker: String,
    pub analysis_date: DateTime<Utc>,
    pub status: AnalysisStatus,
    pub decision: Decision,
    pub confidence: u8,
    pub full_analysis: serde_json::Value,
    pub agent_insights: HashMap<String, serde_json::Value>,
    pub metadata: AnalysisMetadata,
    pub workflow_steps: Vec<Phase>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRun {
    pub fn phase(&self, name: PhaseName) -> Option<&Phase> {
        self.workflow_steps.iter().find(|p| p.name == name)
    }

    pub fn phase_mut(&mut self, name: PhaseName) -> Option<&mut Phase> {
        self.workflow_steps.iter_mut().find(|p| p.name == name)
    }

    pub fn all_agents_finished(&self) -> bool {
        self.workflow_steps.iter().all(|phase| {
            phase
                .agents
                .iter()
                .all(|a| matches!(a.status, AgentStepStatus::Completed | AgentStepStatus::Skipped))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConstraints {
    #[serde(default)]
    pub skip_threshold_check: bool,
    #[serde(default)]
    pub skip_opportunity_agent: bool,
    pub rebalance_threshold: Decimal,
    pub min_position_pct: Decimal,
    pub max_position_pct: Decimal,
    #[serde(default)]
    pub auto_execute: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceStepKey {
    ThresholdCheck,
    OpportunityAnalysis,
    ParallelAnalysis,
    PortfolioManager,
}

impl RebalanceStepKey {
    pub fn as_str(self) -> &'static str {
        match self {
            RebalanceStepKey::ThresholdCheck => "threshold_check",
            RebalanceStepKey::OpportunityAnalysis => "opportunity_analysis",
            RebalanceStepKey::ParallelAnalysis => "parallel_analysis",
            RebalanceStepKey::PortfolioManager => "portfolio_manager",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceStepState {
    pub status: AgentStepStatus,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RebalanceMetadata {
    #[serde(default)]
    pub role_limit_applied: bool,
    #[serde(default)]
    pub excluded_tickers: Vec<String>,
    #[serde(default)]
    pub auto_trade_enabled: bool,
    #[serde(default)]
    pub orders_auto_executed: u32,
    #[serde(default)]
    pub auto_trade_errors: Vec<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceRun {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: RebalanceStatus,
    pub target_allocations: serde_json::Value,
    pub portfolio_snapshot: serde_json::Value,
    pub constraints: RebalanceConstraints,
    /// The originally requested ticker set, persisted so an opportunity-error
    /// retry can re-enter the threshold check without re-deriving it.
    pub watchlist: Vec<String>,
    pub selected_stocks: Vec<String>,
    pub analysis_ids: Vec<Uuid>,
    pub total_stocks: u32,
    pub stocks_analyzed: u32,
    pub workflow_steps: HashMap<String, RebalanceStepState>,
    pub opportunity_evaluation: Option<serde_json::Value>,
    pub rebalance_plan: Option<serde_json::Value>,
    pub metadata: RebalanceMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RebalanceRun {
    pub fn step(&self, key: RebalanceStepKey) -> Option<&RebalanceStepState> {
        self.workflow_steps.get(key.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolResolution {
    pub order_symbol: String,
    pub position_symbol: String,
    pub is_crypto: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlpacaOrderMeta {
    pub id: Option<String>,
    pub status: Option<String>,
    pub filled_qty: Option<Decimal>,
    pub filled_avg_price: Option<Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeOrderMetadata {
    pub before_position: Option<Decimal>,
    pub after_position: Option<Decimal>,
    pub changes: Option<serde_json::Value>,
    pub symbol_resolution: Option<SymbolResolution>,
    pub alpaca_order: Option<AlpacaOrderMeta>,
    pub use_close_endpoint: Option<bool>,
    pub should_close_position: Option<bool>,
    pub is_full_position_closure: Option<bool>,
    pub prior_decision: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ticker: String,
    pub action: Decision,
    pub shares: Decimal,
    pub dollar_amount: Decimal,
    pub status: TradeOrderStatus,
    pub analysis_id: Option<Uuid>,
    pub rebalance_request_id: Option<Uuid>,
    pub metadata: TradeOrderMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradeOrder {
    /// Dedup key from the three-field rule in the design notes: partial-share
    /// merging across sources is explicitly not implemented.
    pub fn dedup_key(&self) -> (Uuid, String, &'static str, Option<Uuid>) {
        match (self.analysis_id, self.rebalance_request_id) {
            (Some(a), _) => (self.user_id, self.ticker.clone(), "analysis", Some(a)),
            (None, Some(r)) => (self.user_id, self.ticker.clone(), "rebalance", Some(r)),
            (None, None) => (self.user_id, self.ticker.clone(), "manual", None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ScheduleResolution {
    Day,
    Week,
    Month,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuotas {
    pub max_parallel_analysis: u32,
    pub max_rebalance_stocks: u32,
    pub schedule_resolution: HashSet<ScheduleResolution>,
    pub rebalance_access: bool,
    pub opportunity_agent_access: bool,
    pub enable_live_trading: bool,
    pub enable_auto_trading: bool,
    pub max_debate_rounds: u32,
    pub near_limit_analysis_access: bool,
}

impl Default for UserQuotas {
    fn default() -> Self {
        Self {
            max_parallel_analysis: 1,
            max_rebalance_stocks: 5,
            schedule_resolution: HashSet::from([ScheduleResolution::Month]),
            rebalance_access: false,
            opportunity_agent_access: false,
            enable_live_trading: false,
            enable_auto_trading: false,
            max_debate_rounds: 2,
            near_limit_analysis_access: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Days,
    Weeks,
    Months,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub enabled: bool,
    pub interval_value: u32,
    pub interval_unit: IntervalUnit,
    /// Minutes since midnight; invariant enforced at the store boundary: must be :00 or :30.
    pub time_of_day_minutes: u32,
    pub timezone: String,
    pub selected_tickers: Vec<String>,
    pub include_watchlist: bool,
    pub day_of_week: Vec<u8>,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub constraints: RebalanceConstraints,
}

/// (SUPPLEMENT) brokerage credentials and AI-provider settings referenced by
/// C4's `apiSettings` payload field and C9's key-loading step. Read-only to
/// the coordinator; owned and written by the user-facing settings surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserApiSettings {
    pub user_id: Uuid,
    pub alpaca_key_id: Option<String>,
    pub alpaca_secret_key: Option<String>,
    pub paper_trading: bool,
    pub auto_execute_trades: bool,
    /// Mirrors `auto_execute_trades` but gates the near-limit analysis flow;
    /// the periodic role sweep clears it once the user's role no longer
    /// grants `near_limit_analysis_access`.
    pub auto_near_limit_analysis: bool,
    pub ai_provider: Option<String>,
    pub ai_provider_settings: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_ordering_is_fixed() {
        assert_eq!(PhaseName::Analysis.next(), Some(PhaseName::Research));
        assert_eq!(PhaseName::Research.next(), Some(PhaseName::Trading));
        assert_eq!(PhaseName::Trading.next(), Some(PhaseName::Risk));
        assert_eq!(PhaseName::Risk.next(), Some(PhaseName::Portfolio));
        assert_eq!(PhaseName::Portfolio.next(), None);
    }

    #[test]
    fn dedup_key_prefers_analysis_over_rebalance() {
        let order = TradeOrder {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            ticker: "AAPL".into(),
            action: Decision::Buy,
            shares: Decimal::new(10, 0),
            dollar_amount: Decimal::ZERO,
            status: TradeOrderStatus::Pending,
            analysis_id: Some(Uuid::new_v4()),
            rebalance_request_id: Some(Uuid::new_v4()),
            metadata: TradeOrderMetadata::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(order.dedup_key().2, "analysis");
    }
}
