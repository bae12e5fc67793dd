//! Analysis coordinator (C5): drives a single AnalysisRun through its fixed
//! phase/agent sequence (§4.5.1), one dispatch at a time, reacting to
//! `onAgentCompleted` callbacks rather than blocking on agent work.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::application::auto_trade_checker::AutoTradeChecker;
use crate::domain::agent_table::{agents_for_phase, is_critical, AgentDef};
use crate::domain::errors::{CoordinatorError, CoordinatorResult};
use crate::domain::models::{AgentStep, AnalysisMetadata, AnalysisRun, Phase, PhaseName, TradeOrder, TradeOrderMetadata};
use crate::domain::ports::{AgentInvoker, AgentPayload, AnalysisPatch, ApiSettingsStore, RoleLimitResolver, TradeOrderSource, TradeOrderStore, WorkflowStore};
use crate::domain::status::{AgentStepStatus, AnalysisStatus, Decision, TradeOrderStatus};

/// Notified when an analysis that belongs to a rebalance finishes, instead
/// of generating its own TradeOrder and finalising independently.
#[async_trait]
pub trait RebalanceNotifier: Send + Sync {
    async fn analysis_completed(
        &self,
        rebalance_id: Uuid,
        analysis_id: Uuid,
        ticker: &str,
        success: bool,
        error: Option<String>,
    ) -> CoordinatorResult<()>;
}

pub struct AnalysisCoordinator {
    store: Arc<dyn WorkflowStore>,
    trade_orders: Arc<dyn TradeOrderStore>,
    invoker: Arc<dyn AgentInvoker>,
    api_settings: Arc<dyn ApiSettingsStore>,
    roles: Arc<dyn RoleLimitResolver>,
    auto_trade: Arc<AutoTradeChecker>,
    /// Set once during wiring in `main`, after the rebalance coordinator
    /// exists — the two coordinators reference each other and neither can be
    /// built first.
    rebalance_notifier: tokio::sync::OnceCell<Arc<dyn RebalanceNotifier>>,
    default_max_debate_rounds: u32,
}

impl AnalysisCoordinator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        trade_orders: Arc<dyn TradeOrderStore>,
        invoker: Arc<dyn AgentInvoker>,
        api_settings: Arc<dyn ApiSettingsStore>,
        roles: Arc<dyn RoleLimitResolver>,
        auto_trade: Arc<AutoTradeChecker>,
        default_max_debate_rounds: u32,
    ) -> Self {
        Self {
            store,
            trade_orders,
            invoker,
            api_settings,
            roles,
            auto_trade,
            rebalance_notifier: tokio::sync::OnceCell::new(),
            default_max_debate_rounds,
        }
    }

    pub fn set_rebalance_notifier(&self, notifier: Arc<dyn RebalanceNotifier>) {
        let _ = self.rebalance_notifier.set(notifier);
    }

    fn notifier(&self) -> CoordinatorResult<&Arc<dyn RebalanceNotifier>> {
        self.rebalance_notifier
            .get()
            .ok_or_else(|| CoordinatorError::Fatal("rebalance notifier not wired".into()))
    }

    /// Builds a fully-initialised AnalysisRun row; used both by a standalone
    /// creation path and by the rebalance coordinator's fan-out (§4.6.2).
    pub async fn build_analysis_run(
        &self,
        user_id: Uuid,
        ticker: String,
        rebalance_request_id: Option<Uuid>,
    ) -> CoordinatorResult<AnalysisRun> {
        let quotas = self.roles.get_user_quotas(user_id).await?;
        let debate_rounds = quotas.max_debate_rounds.min(self.default_max_debate_rounds).max(1);
        let in_rebalance = rebalance_request_id.is_some();
        let now = Utc::now();

        let workflow_steps = PhaseName::ORDER
            .iter()
            .map(|&phase| Phase {
                name: phase,
                agents: agents_for_phase(phase, debate_rounds, in_rebalance)
                    .into_iter()
                    .map(|def| AgentStep {
                        name: def.display_name,
                        function_name: Some(def.function_name),
                        status: AgentStepStatus::Pending,
                        progress: 0,
                        updated_at: now,
                    })
                    .collect(),
            })
            .collect();

        Ok(AnalysisRun {
            id: Uuid::new_v4(),
            user_id,
            rebalance_request_id,
            ticker,
            analysis_date: now,
            status: AnalysisStatus::Pending,
            decision: Decision::Pending,
            confidence: 0,
            full_analysis: serde_json::json!({}),
            agent_insights: Default::default(),
            metadata: AnalysisMetadata::default(),
            workflow_steps,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn start(&self, analysis_id: Uuid) -> CoordinatorResult<()> {
        let run = self.store.get_analysis_any(analysis_id).await?;
        self.store
            .conditional_update_analysis_status(analysis_id, AnalysisStatus::Pending, AnalysisStatus::Running, AnalysisPatch::default())
            .await?;
        let first = next_pending_step(&run).ok_or_else(|| CoordinatorError::Fatal("analysis has no agent steps".into()))?;
        self.dispatch(&run, first.0, &first.1).await
    }

    async fn dispatch(&self, run: &AnalysisRun, phase: PhaseName, agent: &AgentDef) -> CoordinatorResult<()> {
        self.store
            .set_agent_step_status(run.id, phase, &agent.display_name, AgentStepStatus::Running, Some(0))
            .await?;

        let api_settings = match self.api_settings.get_api_settings(run.user_id).await {
            Ok(settings) => serde_json::to_value(settings).unwrap_or_default(),
            Err(_) => serde_json::json!({}),
        };

        let payload = AgentPayload {
            analysis_id: run.id,
            ticker: run.ticker.clone(),
            user_id: run.user_id,
            phase,
            api_settings,
            analysis_context: serde_json::json!({
                "currentRound": run.metadata.current_round,
                "fullAnalysis": run.full_analysis,
                "agentInsights": run.agent_insights,
            }),
        };

        self.invoker.invoke(&agent.function_name, payload).await
    }

    pub async fn on_agent_completed(
        &self,
        analysis_id: Uuid,
        phase: PhaseName,
        agent_name: &str,
        success: bool,
        insight: Option<serde_json::Value>,
    ) -> CoordinatorResult<()> {
        let step_status = if success { AgentStepStatus::Completed } else { AgentStepStatus::Error };
        self.store.set_agent_step_status(analysis_id, phase, agent_name, step_status, Some(100)).await?;

        let agent_insight = insight.map(|v| (agent_name.to_string(), v));

        let run = self.store.get_analysis_any(analysis_id).await?;

        if !success && is_critical(phase, agent_name, run.rebalance_request_id.is_some()) {
            return self.fail_run(&run, format!("critical agent {agent_name} failed")).await;
        }

        if agent_name.starts_with("Bear (round") {
            let mut metadata = run.metadata.clone();
            metadata.current_round += 1;
            self.store
                .conditional_update_analysis_status(
                    analysis_id,
                    AnalysisStatus::Running,
                    AnalysisStatus::Running,
                    AnalysisPatch { metadata: Some(metadata), agent_insight, ..Default::default() },
                )
                .await?;
        } else if let Some(insight) = agent_insight {
            self.store
                .conditional_update_analysis_status(
                    analysis_id,
                    AnalysisStatus::Running,
                    AnalysisStatus::Running,
                    AnalysisPatch { agent_insight: Some(insight), ..Default::default() },
                )
                .await?;
        }

        let run = self.store.get_analysis_any(analysis_id).await?;

        if phase == PhaseName::Risk && agent_name == "Risk Manager" {
            return self.handle_risk_manager_completion(&run).await;
        }

        match next_pending_step(&run) {
            Some((next_phase, next_agent)) => self.dispatch(&run, next_phase, &next_agent).await,
            None => self.finalize(&run).await,
        }
    }

    async fn handle_risk_manager_completion(&self, run: &AnalysisRun) -> CoordinatorResult<()> {
        if run.rebalance_request_id.is_some() {
            // Portfolio phase is skipped inside a rebalance; notify the parent directly.
            return self.finalize(run).await;
        }
        match next_pending_step(run) {
            Some((phase, agent)) => self.dispatch(run, phase, &agent).await,
            None => self.finalize(run).await,
        }
    }

    async fn finalize(&self, run: &AnalysisRun) -> CoordinatorResult<()> {
        let risk_insight = run.agent_insights.get("Risk Manager").cloned();
        let decision = risk_insight
            .as_ref()
            .and_then(|v| v.get("decision"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Decision>().ok())
            .unwrap_or(Decision::Hold);
        let confidence = risk_insight
            .as_ref()
            .and_then(|v| v.get("confidence"))
            .and_then(|v| v.as_u64())
            .map(|v| v.min(100) as u8)
            .unwrap_or(0);

        self.store
            .conditional_update_analysis_status(
                run.id,
                AnalysisStatus::Running,
                AnalysisStatus::Completed,
                AnalysisPatch { decision: Some(decision), confidence: Some(confidence), ..Default::default() },
            )
            .await?;

        if let Some(rebalance_id) = run.rebalance_request_id {
            return self.notifier()?.analysis_completed(rebalance_id, run.id, &run.ticker, true, None).await;
        }

        if decision != Decision::Hold {
            let portfolio_insight = run.agent_insights.get("Analysis Portfolio Manager");
            let shares = portfolio_insight.and_then(|v| v.get("shares")).and_then(|v| v.as_str()).and_then(|s| s.parse().ok());
            let dollar_amount = portfolio_insight.and_then(|v| v.get("dollarAmount")).and_then(|v| v.as_str()).and_then(|s| s.parse().ok());

            let order = TradeOrder {
                id: Uuid::new_v4(),
                user_id: run.user_id,
                ticker: run.ticker.clone(),
                action: decision,
                shares: shares.unwrap_or_default(),
                dollar_amount: dollar_amount.unwrap_or_default(),
                status: TradeOrderStatus::Pending,
                analysis_id: Some(run.id),
                rebalance_request_id: None,
                metadata: TradeOrderMetadata { prior_decision: Some(decision.as_str().to_string()), ..Default::default() },
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            self.trade_orders.insert_trade_order(&order).await?;

            let outcome = self.auto_trade.run(TradeOrderSource::Analysis(run.id)).await?;
            let mut metadata = run.metadata.clone();
            metadata.auto_trade_enabled = outcome.enabled;
            metadata.orders_auto_executed = outcome.orders_executed;
            metadata.auto_trade_errors = outcome.errors;
            self.store
                .conditional_update_analysis_status(
                    run.id,
                    AnalysisStatus::Completed,
                    AnalysisStatus::Completed,
                    AnalysisPatch { metadata: Some(metadata), ..Default::default() },
                )
                .await?;
        }
        Ok(())
    }

    async fn fail_run(&self, run: &AnalysisRun, reason: String) -> CoordinatorResult<()> {
        let mut metadata = run.metadata.clone();
        metadata.error_reason = Some(reason);
        self.store
            .conditional_update_analysis_status(
                run.id,
                AnalysisStatus::Running,
                AnalysisStatus::Error,
                AnalysisPatch { metadata: Some(metadata), ..Default::default() },
            )
            .await?;
        if let Some(rebalance_id) = run.rebalance_request_id {
            self.notifier()?
                .analysis_completed(rebalance_id, run.id, &run.ticker, false, run.metadata.error_reason.clone())
                .await?;
        }
        Ok(())
    }

    pub async fn retry(&self, analysis_id: Uuid, _user_id: Uuid) -> CoordinatorResult<()> {
        let run = self.store.get_analysis_any(analysis_id).await?;
        if run.status != AnalysisStatus::Error {
            return Err(CoordinatorError::PreconditionFailed(format!("analysis {analysis_id} is not in error")));
        }

        let failing = find_failing_agent(&run).ok_or_else(|| CoordinatorError::Fatal("no failing agent found to retry".into()))?;

        self.store
            .set_agent_step_status(analysis_id, failing.0, &failing.1.display_name, AgentStepStatus::Pending, Some(0))
            .await?;

        let mut metadata = run.metadata.clone();
        metadata.reactivation_attempts = 0;
        metadata.error_reason = None;
        metadata.max_reactivations_reached = false;

        self.store
            .conditional_update_analysis_status(
                analysis_id,
                AnalysisStatus::Error,
                AnalysisStatus::Running,
                AnalysisPatch { metadata: Some(metadata), ..Default::default() },
            )
            .await?;

        let run = self.store.get_analysis_any(analysis_id).await?;
        self.dispatch(&run, failing.0, &failing.1).await
    }

    pub async fn reactivate(&self, analysis_id: Uuid, _user_id: Uuid, force: bool, stale_threshold_secs: i64) -> CoordinatorResult<()> {
        let run = self.store.get_analysis_any(analysis_id).await?;
        if run.status != AnalysisStatus::Running {
            return Err(CoordinatorError::PreconditionFailed(format!("analysis {analysis_id} is not running")));
        }
        let age = (Utc::now() - run.updated_at).num_seconds();
        if !force && age < stale_threshold_secs {
            return Err(CoordinatorError::PreconditionFailed(format!("analysis {analysis_id} is not stale")));
        }

        if run.all_agents_finished() {
            return self.finalize(&run).await;
        }

        let target = stuck_running_agent(&run).or_else(|| next_pending_step(&run));
        let Some((phase, agent)) = target else {
            return self.finalize(&run).await;
        };

        self.store.set_agent_step_status(analysis_id, phase, &agent.display_name, AgentStepStatus::Pending, Some(0)).await?;
        let run = self.store.get_analysis_any(analysis_id).await?;
        self.dispatch(&run, phase, &agent).await
    }

    pub async fn cancel(&self, analysis_id: Uuid, _user_id: Uuid) -> CoordinatorResult<()> {
        self.store.cancel_analysis(analysis_id).await
    }
}

fn next_pending_step(run: &AnalysisRun) -> Option<(PhaseName, AgentDef)> {
    let in_rebalance = run.rebalance_request_id.is_some();
    for phase in PhaseName::ORDER {
        let Some(p) = run.phase(phase) else { continue };
        for agent in &p.agents {
            if agent.status == AgentStepStatus::Pending {
                return Some((
                    phase,
                    AgentDef {
                        display_name: agent.name.clone(),
                        function_name: agent.function_name.clone().unwrap_or_default(),
                        phase,
                        is_critical: is_critical(phase, &agent.name, in_rebalance),
                    },
                ));
            }
        }
    }
    None
}

fn stuck_running_agent(run: &AnalysisRun) -> Option<(PhaseName, AgentDef)> {
    let in_rebalance = run.rebalance_request_id.is_some();
    for phase in PhaseName::ORDER {
        let Some(p) = run.phase(phase) else { continue };
        for agent in &p.agents {
            if agent.status == AgentStepStatus::Running && !run.agent_insights.contains_key(&agent.name) {
                return Some((
                    phase,
                    AgentDef {
                        display_name: agent.name.clone(),
                        function_name: agent.function_name.clone().unwrap_or_default(),
                        phase,
                        is_critical: is_critical(phase, &agent.name, in_rebalance),
                    },
                ));
            }
        }
    }
    None
}

/// Critical failure takes priority over optional.
fn find_failing_agent(run: &AnalysisRun) -> Option<(PhaseName, AgentDef)> {
    let in_rebalance = run.rebalance_request_id.is_some();
    let mut first_optional = None;
    for phase in PhaseName::ORDER {
        let Some(p) = run.phase(phase) else { continue };
        for agent in &p.agents {
            if agent.status != AgentStepStatus::Error {
                continue;
            }
            let def = AgentDef {
                display_name: agent.name.clone(),
                function_name: agent.function_name.clone().unwrap_or_default(),
                phase,
                is_critical: is_critical(phase, &agent.name, in_rebalance),
            };
            if def.is_critical {
                return Some((phase, def));
            }
            if first_optional.is_none() {
                first_optional = Some((phase, def));
            }
        }
    }
    first_optional
}
