//! Rebalance coordinator (C6): drives a RebalanceRun through threshold
//! checking, optional opportunity selection, fan-out of child analyses under
//! a parallelism cap, and completion accounting.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::application::analysis_coordinator::{AnalysisCoordinator, RebalanceNotifier};
use crate::application::auto_trade_checker::AutoTradeChecker;
use crate::domain::errors::{CoordinatorError, CoordinatorResult};
use crate::domain::models::{PhaseName, RebalanceConstraints, RebalanceMetadata, RebalanceRun, RebalanceStepKey};
use crate::domain::ports::{AgentInvoker, AgentPayload, Broker, BrokerCredentials, RebalancePatch, RoleLimitResolver, TradeOrderSource, WorkflowStore};
use crate::domain::status::{AgentStepStatus, RebalanceStatus};

pub struct RebalanceCoordinator {
    store: Arc<dyn WorkflowStore>,
    invoker: Arc<dyn AgentInvoker>,
    roles: Arc<dyn RoleLimitResolver>,
    broker: Arc<dyn Broker>,
    analysis: Arc<AnalysisCoordinator>,
    auto_trade: Arc<AutoTradeChecker>,
}

impl RebalanceCoordinator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        invoker: Arc<dyn AgentInvoker>,
        roles: Arc<dyn RoleLimitResolver>,
        broker: Arc<dyn Broker>,
        analysis: Arc<AnalysisCoordinator>,
        auto_trade: Arc<AutoTradeChecker>,
    ) -> Self {
        Self { store, invoker, roles, broker, analysis, auto_trade }
    }

    pub async fn start(
        &self,
        user_id: Uuid,
        tickers: Vec<String>,
        constraints: RebalanceConstraints,
        creds: &BrokerCredentials,
    ) -> CoordinatorResult<Uuid> {
        let now = Utc::now();
        let run = RebalanceRun {
            id: Uuid::new_v4(),
            user_id,
            status: RebalanceStatus::Running,
            target_allocations: serde_json::json!({}),
            portfolio_snapshot: serde_json::json!({}),
            constraints: constraints.clone(),
            watchlist: tickers.clone(),
            selected_stocks: Vec::new(),
            analysis_ids: Vec::new(),
            total_stocks: 0,
            stocks_analyzed: 0,
            workflow_steps: Default::default(),
            opportunity_evaluation: None,
            rebalance_plan: None,
            metadata: RebalanceMetadata::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.store.insert_rebalance(&run).await?;
        self.run_threshold_check(run.id, user_id, tickers, &constraints, creds).await?;
        Ok(run.id)
    }

    /// §4.6.1's threshold check and its two continuations — fan out
    /// immediately (triggered, or `skip_threshold_check`) or hand off to the
    /// opportunity-selection agent. Shared by `start()` and the
    /// opportunity-error retry path in `retry()`, which re-enters here
    /// against the run's persisted `watchlist` instead of re-deriving it.
    async fn run_threshold_check(
        &self,
        rebalance_id: Uuid,
        user_id: Uuid,
        tickers: Vec<String>,
        constraints: &RebalanceConstraints,
        creds: &BrokerCredentials,
    ) -> CoordinatorResult<()> {
        if constraints.skip_threshold_check {
            self.mark_step(rebalance_id, RebalanceStepKey::ThresholdCheck, AgentStepStatus::Skipped, serde_json::json!({"reason": "skip_threshold_check"})).await?;
            self.mark_step(rebalance_id, RebalanceStepKey::OpportunityAnalysis, AgentStepStatus::Skipped, serde_json::json!({})).await?;
            return self.fan_out(rebalance_id, tickers).await;
        }

        let max_drift = self.compute_max_drift(creds).await?;
        let triggered = max_drift >= constraints.rebalance_threshold;
        self.mark_step(
            rebalance_id,
            RebalanceStepKey::ThresholdCheck,
            AgentStepStatus::Completed,
            serde_json::json!({"maxDrift": max_drift, "triggered": triggered}),
        )
        .await?;

        if triggered {
            self.mark_step(
                rebalance_id,
                RebalanceStepKey::OpportunityAnalysis,
                AgentStepStatus::Completed,
                serde_json::json!({"source": "threshold_check", "selected": tickers}),
            )
            .await?;
            return self.fan_out(rebalance_id, tickers).await;
        }

        if constraints.skip_opportunity_agent {
            return self
                .store
                .update_rebalance_status(
                    rebalance_id,
                    RebalanceStatus::Completed,
                    RebalancePatch { completed_at: Some(Utc::now()), ..Default::default() },
                )
                .await;
        }

        self.mark_step(rebalance_id, RebalanceStepKey::OpportunityAnalysis, AgentStepStatus::Running, serde_json::json!({"watchlist": tickers})).await?;
        self.invoker
            .invoke(
                "opportunitySelector",
                AgentPayload {
                    analysis_id: rebalance_id,
                    ticker: String::new(),
                    user_id,
                    phase: PhaseName::Portfolio,
                    api_settings: serde_json::json!({}),
                    analysis_context: serde_json::json!({"watchlist": tickers}),
                },
            )
            .await
    }

    /// Callback once the opportunity-selection agent responds; empty
    /// `selected` terminates the rebalance with no action needed.
    pub async fn opportunity_selected(&self, rebalance_id: Uuid, selected: Vec<String>) -> CoordinatorResult<()> {
        if selected.is_empty() {
            self.mark_step(rebalance_id, RebalanceStepKey::OpportunityAnalysis, AgentStepStatus::Completed, serde_json::json!({"selected": []})).await?;
            self.store
                .update_rebalance_status(
                    rebalance_id,
                    RebalanceStatus::Completed,
                    RebalancePatch { completed_at: Some(Utc::now()), ..Default::default() },
                )
                .await?;
            return Ok(());
        }
        self.mark_step(
            rebalance_id,
            RebalanceStepKey::OpportunityAnalysis,
            AgentStepStatus::Completed,
            serde_json::json!({"selected": selected}),
        )
        .await?;
        self.fan_out(rebalance_id, selected).await
    }

    async fn fan_out(&self, rebalance_id: Uuid, tickers: Vec<String>) -> CoordinatorResult<()> {
        let run = self.store.get_rebalance_any(rebalance_id).await?;
        let quotas = self.roles.get_user_quotas(run.user_id).await?;
        let cap = quotas.max_rebalance_stocks as usize;

        let excluded: Vec<String> = tickers.iter().skip(cap).cloned().collect();
        let selected: Vec<String> = tickers.into_iter().take(cap).collect();

        let mut metadata = run.metadata.clone();
        if !excluded.is_empty() {
            metadata.role_limit_applied = true;
            metadata.excluded_tickers = excluded;
        }

        let mut analysis_ids = Vec::with_capacity(selected.len());
        for ticker in &selected {
            let child = self.analysis.build_analysis_run(run.user_id, ticker.clone(), Some(rebalance_id)).await?;
            self.store.insert_analysis(&child).await?;
            analysis_ids.push(child.id);
        }

        self.store
            .update_rebalance_status(
                rebalance_id,
                RebalanceStatus::Running,
                RebalancePatch {
                    metadata: Some(metadata),
                    selected_stocks: Some(selected),
                    analysis_ids: Some(analysis_ids.clone()),
                    total_stocks: Some(analysis_ids.len() as u32),
                    ..Default::default()
                },
            )
            .await?;

        self.mark_step(
            rebalance_id,
            RebalanceStepKey::ParallelAnalysis,
            AgentStepStatus::Running,
            serde_json::json!({"total": analysis_ids.len()}),
        )
        .await?;

        let quota = quotas.max_parallel_analysis.max(1);
        for _ in 0..quota {
            match self.store.admit_next_pending_child(rebalance_id, quota).await? {
                Some(child) => self.analysis.start(child.id).await?,
                None => break,
            }
        }
        Ok(())
    }

    pub async fn on_analysis_completed(&self, rebalance_id: Uuid, _analysis_id: Uuid, _ticker: &str, _success: bool, _error: Option<String>) -> CoordinatorResult<()> {
        let (analyzed, total) = self.store.increment_stocks_analyzed(rebalance_id).await?;
        let children = self.store.list_child_analyses(rebalance_id).await?;

        let quotas = self.roles.get_user_quotas(self.store.get_rebalance_any(rebalance_id).await?.user_id).await?;
        if children.iter().any(|c| c.status.as_str() == "pending") {
            if let Some(child) = self.store.admit_next_pending_child(rebalance_id, quotas.max_parallel_analysis.max(1)).await? {
                self.analysis.start(child.id).await?;
            }
        }

        let all_finished = children.iter().all(|c| c.status.is_finished());
        if !all_finished || analyzed < total {
            return Ok(());
        }

        let succeeded = children.iter().filter(|c| c.status.as_str() == "completed").count();
        if succeeded == 0 {
            return self
                .store
                .set_rebalance_error(rebalance_id, "all child analyses failed or were cancelled", None)
                .await;
        }

        self.dispatch_portfolio_manager(rebalance_id).await
    }

    async fn dispatch_portfolio_manager(&self, rebalance_id: Uuid) -> CoordinatorResult<()> {
        self.mark_step(rebalance_id, RebalanceStepKey::PortfolioManager, AgentStepStatus::Running, serde_json::json!({})).await?;
        let run = self.store.get_rebalance_any(rebalance_id).await?;
        self.invoker
            .invoke(
                "rebalancePortfolioManager",
                AgentPayload {
                    analysis_id: rebalance_id,
                    ticker: String::new(),
                    user_id: run.user_id,
                    phase: PhaseName::Portfolio,
                    api_settings: serde_json::json!({}),
                    analysis_context: serde_json::json!({"analysisIds": run.analysis_ids}),
                },
            )
            .await
    }

    pub async fn complete(&self, rebalance_id: Uuid, rebalance_plan: serde_json::Value) -> CoordinatorResult<()> {
        self.mark_step(rebalance_id, RebalanceStepKey::PortfolioManager, AgentStepStatus::Completed, serde_json::json!({})).await?;
        self.store
            .update_rebalance_status(
                rebalance_id,
                RebalanceStatus::Completed,
                RebalancePatch { rebalance_plan: Some(rebalance_plan), completed_at: Some(Utc::now()), ..Default::default() },
            )
            .await?;

        let outcome = self.auto_trade.run(TradeOrderSource::Rebalance(rebalance_id)).await?;
        let run = self.store.get_rebalance_any(rebalance_id).await?;
        let mut metadata = run.metadata.clone();
        metadata.auto_trade_enabled = outcome.enabled;
        metadata.orders_auto_executed = outcome.orders_executed;
        metadata.auto_trade_errors = outcome.errors;
        self.store
            .update_rebalance_status(rebalance_id, RebalanceStatus::Completed, RebalancePatch { metadata: Some(metadata), ..Default::default() })
            .await
    }

    pub async fn retry(&self, rebalance_id: Uuid, user_id: Uuid, creds: &BrokerCredentials) -> CoordinatorResult<()> {
        let run = self.store.get_rebalance(rebalance_id, user_id).await?;
        if run.status != RebalanceStatus::Error {
            return Err(CoordinatorError::PreconditionFailed(format!("rebalance {rebalance_id} is not in error")));
        }

        if run.step(RebalanceStepKey::OpportunityAnalysis).is_some_and(|s| s.status == AgentStepStatus::Error) {
            self.store.update_rebalance_status(rebalance_id, RebalanceStatus::Running, RebalancePatch::default()).await?;
            return self.run_threshold_check(rebalance_id, run.user_id, run.watchlist.clone(), &run.constraints, creds).await;
        }

        let children = self.store.list_child_analyses(rebalance_id).await?;
        let failed: Vec<_> = children.into_iter().filter(|c| c.status.as_str() == "error").collect();
        if !failed.is_empty() {
            self.store.update_rebalance_status(rebalance_id, RebalanceStatus::Running, RebalancePatch::default()).await?;
            for child in failed {
                self.analysis.retry(child.id, user_id).await?;
            }
            return Ok(());
        }

        if run.step(RebalanceStepKey::PortfolioManager).is_some_and(|s| s.status == AgentStepStatus::Error) {
            self.store.update_rebalance_status(rebalance_id, RebalanceStatus::Running, RebalancePatch::default()).await?;
            return self.dispatch_portfolio_manager(rebalance_id).await;
        }

        Err(CoordinatorError::Fatal(format!("rebalance {rebalance_id} has no retryable failure step")))
    }

    pub async fn cancel(&self, rebalance_id: Uuid, _user_id: Uuid) -> CoordinatorResult<()> {
        self.store.cancel_rebalance(rebalance_id).await
    }

    /// The opportunity-selection agent signalled failure; never loops back.
    pub async fn opportunity_error(&self, rebalance_id: Uuid, message: &str) -> CoordinatorResult<()> {
        let _ = self.mark_step(rebalance_id, RebalanceStepKey::OpportunityAnalysis, AgentStepStatus::Error, serde_json::json!({"error": message})).await;
        self.store.set_rebalance_error(rebalance_id, message, None).await
    }

    /// A generic rebalance-side failure not tied to a specific step.
    pub async fn rebalance_error(&self, rebalance_id: Uuid, message: &str) -> CoordinatorResult<()> {
        self.store.set_rebalance_error(rebalance_id, message, None).await
    }

    async fn mark_step(&self, rebalance_id: Uuid, step: RebalanceStepKey, status: AgentStepStatus, detail: serde_json::Value) -> CoordinatorResult<()> {
        self.store.set_rebalance_step(rebalance_id, step, status, detail).await
    }

    async fn compute_max_drift(&self, creds: &BrokerCredentials) -> CoordinatorResult<Decimal> {
        let positions = self.broker.list_positions(creds).await?;
        Ok(positions
            .iter()
            .map(|p| p.unrealized_plpc.abs() * Decimal::ONE_HUNDRED)
            .max()
            .unwrap_or(Decimal::ZERO))
    }
}

#[async_trait]
impl RebalanceNotifier for RebalanceCoordinator {
    async fn analysis_completed(&self, rebalance_id: Uuid, analysis_id: Uuid, ticker: &str, success: bool, error: Option<String>) -> CoordinatorResult<()> {
        self.on_analysis_completed(rebalance_id, analysis_id, ticker, success, error).await
    }
}
