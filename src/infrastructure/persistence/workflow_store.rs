//! SQLite-backed `WorkflowStore`: analysis/rebalance rows, their per-agent
//! workflow-step sub-documents, and the conditional updates both
//! coordinators rely on to serialize concurrent completions.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::errors::{CoordinatorError, CoordinatorResult};
use crate::domain::models::{
    AgentStep, AnalysisRun, IntervalUnit, PhaseName, RebalanceMetadata, RebalanceRun, RebalanceStepState, ScheduleRule,
};
use crate::domain::ports::{AnalysisPatch, RebalancePatch, WorkflowStore};
use crate::domain::status::{AgentStepStatus, AnalysisStatus, RebalanceStatus};
use crate::infrastructure::persistence::codec::{timestamp_from_text, timestamp_to_text, to_json};
use crate::infrastructure::persistence::sqlite_store::{
    SqliteStore, analysis_bind_values, rebalance_bind_values, row_to_analysis, row_to_rebalance, row_to_schedule,
};

fn not_found(what: &str, id: Uuid) -> CoordinatorError {
    CoordinatorError::NotFound(format!("{what} {id} not found"))
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn insert_analysis(&self, run: &AnalysisRun) -> CoordinatorResult<()> {
        let v = analysis_bind_values(run)?;
        sqlx::query(
            r#"
            INSERT INTO analysis_runs
                (id, user_id, rebalance_request_id, ticker, analysis_date, status, decision,
                 confidence, full_analysis, agent_insights, metadata, workflow_steps, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(v.id)
        .bind(v.user_id)
        .bind(v.rebalance_request_id)
        .bind(v.ticker)
        .bind(v.analysis_date)
        .bind(v.status)
        .bind(v.decision)
        .bind(v.confidence)
        .bind(v.full_analysis)
        .bind(v.agent_insights)
        .bind(v.metadata)
        .bind(v.workflow_steps)
        .bind(v.created_at)
        .bind(v.updated_at)
        .execute(&self.db.pool)
        .await
        .map_err(|e| CoordinatorError::Other(e.into()))?;
        Ok(())
    }

    async fn get_analysis(&self, id: Uuid, user_id: Uuid) -> CoordinatorResult<AnalysisRun> {
        let row = sqlx::query("SELECT * FROM analysis_runs WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?
            .ok_or_else(|| not_found("analysis", id))?;
        row_to_analysis(&row).map_err(CoordinatorError::Other)
    }

    async fn get_analysis_any(&self, id: Uuid) -> CoordinatorResult<AnalysisRun> {
        let row = sqlx::query("SELECT * FROM analysis_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?
            .ok_or_else(|| not_found("analysis", id))?;
        row_to_analysis(&row).map_err(CoordinatorError::Other)
    }

    async fn conditional_update_analysis_status(
        &self,
        id: Uuid,
        expected: AnalysisStatus,
        next: AnalysisStatus,
        patch: AnalysisPatch,
    ) -> CoordinatorResult<()> {
        let mut current = self.get_analysis_any(id).await?;
        if current.status.as_str() != expected.as_str() {
            return Err(CoordinatorError::PreconditionFailed(format!(
                "analysis {id} expected status {} but found {}",
                expected.as_str(),
                current.status.as_str()
            )));
        }

        if let Some(decision) = patch.decision {
            current.decision = decision;
        }
        if let Some(confidence) = patch.confidence {
            current.confidence = confidence;
        }
        if let Some(full_analysis) = patch.full_analysis {
            current.full_analysis = full_analysis;
        }
        if let Some((agent, insight)) = patch.agent_insight {
            current.agent_insights.insert(agent, insight);
        }
        if let Some(metadata) = patch.metadata {
            current.metadata = metadata;
        }
        if let Some(workflow_steps) = patch.workflow_steps {
            current.workflow_steps = workflow_steps;
        }
        current.status = next;
        current.updated_at = Utc::now();

        let v = analysis_bind_values(&current).map_err(CoordinatorError::Other)?;
        let result = sqlx::query(
            r#"
            UPDATE analysis_runs
            SET status = ?, decision = ?, confidence = ?, full_analysis = ?, agent_insights = ?,
                metadata = ?, workflow_steps = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(v.status)
        .bind(v.decision)
        .bind(v.confidence)
        .bind(v.full_analysis)
        .bind(v.agent_insights)
        .bind(v.metadata)
        .bind(v.workflow_steps)
        .bind(v.updated_at)
        .bind(v.id)
        .bind(expected.as_str())
        .execute(&self.db.pool)
        .await
        .map_err(|e| CoordinatorError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(CoordinatorError::PreconditionFailed(format!(
                "analysis {id} status changed concurrently before the write landed"
            )));
        }
        Ok(())
    }

    async fn cancel_analysis(&self, id: Uuid) -> CoordinatorResult<()> {
        let result = sqlx::query("UPDATE analysis_runs SET status = 'cancelled', updated_at = ? WHERE id = ?")
            .bind(timestamp_to_text(Utc::now()))
            .bind(id.to_string())
            .execute(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(not_found("analysis", id));
        }
        Ok(())
    }

    async fn set_agent_step_status(
        &self,
        analysis_id: Uuid,
        phase: PhaseName,
        agent_display_name: &str,
        new_status: AgentStepStatus,
        progress: Option<u8>,
    ) -> CoordinatorResult<AgentStep> {
        // `updated_at` doubles as an optimistic-lock token: the WHERE clause
        // below only commits if nobody else wrote this row since our read,
        // so two concurrent onAgentCompleted callbacks for the same analysis
        // can't clobber each other's step transition.
        for _ in 0..5 {
            let mut run = self.get_analysis_any(analysis_id).await?;
            let expected_updated_at = timestamp_to_text(run.updated_at);
            let now = Utc::now();
            let updated = {
                let phase_entry = run
                    .phase_mut(phase)
                    .ok_or_else(|| CoordinatorError::NotFound(format!("phase {} not present on analysis {analysis_id}", phase.as_str())))?;
                let agent = phase_entry
                    .agents
                    .iter_mut()
                    .find(|a| a.name == agent_display_name)
                    .ok_or_else(|| {
                        CoordinatorError::NotFound(format!("agent {agent_display_name} not present in phase {}", phase.as_str()))
                    })?;
                agent.status = new_status;
                if let Some(p) = progress {
                    agent.progress = p;
                }
                agent.updated_at = now;
                agent.clone()
            };
            run.updated_at = now;

            let workflow_steps_json = to_json(&run.workflow_steps).map_err(CoordinatorError::Other)?;
            let result = sqlx::query("UPDATE analysis_runs SET workflow_steps = ?, updated_at = ? WHERE id = ? AND updated_at = ?")
                .bind(workflow_steps_json)
                .bind(timestamp_to_text(now))
                .bind(analysis_id.to_string())
                .bind(expected_updated_at)
                .execute(&self.db.pool)
                .await
                .map_err(|e| CoordinatorError::Other(e.into()))?;

            if result.rows_affected() == 1 {
                return Ok(updated);
            }
        }

        Err(CoordinatorError::PreconditionFailed(format!("analysis {analysis_id} step update lost the concurrent-write race")))
    }

    async fn insert_rebalance(&self, run: &RebalanceRun) -> CoordinatorResult<()> {
        let v = rebalance_bind_values(run).map_err(CoordinatorError::Other)?;
        sqlx::query(
            r#"
            INSERT INTO rebalance_runs
                (id, user_id, status, target_allocations, portfolio_snapshot, constraints, watchlist, selected_stocks,
                 analysis_ids, total_stocks, stocks_analyzed, workflow_steps, opportunity_evaluation,
                 rebalance_plan, metadata, created_at, updated_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(v.id)
        .bind(v.user_id)
        .bind(v.status)
        .bind(v.target_allocations)
        .bind(v.portfolio_snapshot)
        .bind(v.constraints)
        .bind(v.watchlist)
        .bind(v.selected_stocks)
        .bind(v.analysis_ids)
        .bind(v.total_stocks)
        .bind(v.stocks_analyzed)
        .bind(v.workflow_steps)
        .bind(v.opportunity_evaluation)
        .bind(v.rebalance_plan)
        .bind(v.metadata)
        .bind(v.created_at)
        .bind(v.updated_at)
        .bind(v.completed_at)
        .execute(&self.db.pool)
        .await
        .map_err(|e| CoordinatorError::Other(e.into()))?;
        Ok(())
    }

    async fn get_rebalance(&self, id: Uuid, user_id: Uuid) -> CoordinatorResult<RebalanceRun> {
        let row = sqlx::query("SELECT * FROM rebalance_runs WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?
            .ok_or_else(|| not_found("rebalance", id))?;
        row_to_rebalance(&row).map_err(CoordinatorError::Other)
    }

    async fn get_rebalance_any(&self, id: Uuid) -> CoordinatorResult<RebalanceRun> {
        let row = sqlx::query("SELECT * FROM rebalance_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?
            .ok_or_else(|| not_found("rebalance", id))?;
        row_to_rebalance(&row).map_err(CoordinatorError::Other)
    }

    async fn update_rebalance_status(&self, id: Uuid, next: RebalanceStatus, patch: RebalancePatch) -> CoordinatorResult<()> {
        let mut current = self.get_rebalance_any(id).await?;
        if let Some(message) = patch.status_message {
            current.metadata.error_message = Some(message);
        }
        if let Some(metadata) = patch.metadata {
            current.metadata = metadata;
        }
        if let Some(eval) = patch.opportunity_evaluation {
            current.opportunity_evaluation = Some(eval);
        }
        if let Some(plan) = patch.rebalance_plan {
            current.rebalance_plan = Some(plan);
        }
        if let Some(selected) = patch.selected_stocks {
            current.selected_stocks = selected;
        }
        if let Some(ids) = patch.analysis_ids {
            current.analysis_ids = ids;
        }
        if let Some(total) = patch.total_stocks {
            current.total_stocks = total;
        }
        if let Some(completed_at) = patch.completed_at {
            current.completed_at = Some(completed_at);
        }
        current.status = next;
        current.updated_at = Utc::now();

        let v = rebalance_bind_values(&current).map_err(CoordinatorError::Other)?;
        sqlx::query(
            r#"
            UPDATE rebalance_runs
            SET status = ?, selected_stocks = ?, analysis_ids = ?, total_stocks = ?, workflow_steps = ?,
                opportunity_evaluation = ?, rebalance_plan = ?, metadata = ?, updated_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(v.status)
        .bind(v.selected_stocks)
        .bind(v.analysis_ids)
        .bind(v.total_stocks)
        .bind(v.workflow_steps)
        .bind(v.opportunity_evaluation)
        .bind(v.rebalance_plan)
        .bind(v.metadata)
        .bind(v.updated_at)
        .bind(v.completed_at)
        .bind(v.id)
        .execute(&self.db.pool)
        .await
        .map_err(|e| CoordinatorError::Other(e.into()))?;
        Ok(())
    }

    async fn set_rebalance_error(&self, id: Uuid, message: &str, metadata: Option<serde_json::Value>) -> CoordinatorResult<()> {
        let now = timestamp_to_text(Utc::now());

        let full_attempt = async {
            let mut current = self.get_rebalance_any(id).await.ok()?;
            current.status = RebalanceStatus::Error;
            current.metadata.error_message = Some(message.to_string());
            if let Some(extra) = metadata.clone() {
                current.metadata.auto_trade_errors.push(extra.to_string());
            }
            current.updated_at = Utc::now();
            let v = rebalance_bind_values(&current).ok()?;
            sqlx::query("UPDATE rebalance_runs SET status = ?, metadata = ?, updated_at = ? WHERE id = ?")
                .bind(v.status)
                .bind(v.metadata)
                .bind(v.updated_at)
                .bind(v.id)
                .execute(&self.db.pool)
                .await
                .ok()
        }
        .await;
        if full_attempt.is_some() {
            return Ok(());
        }

        let simple_metadata = to_json(&RebalanceMetadata {
            error_message: Some(message.to_string()),
            ..Default::default()
        });
        if let Ok(simple_metadata) = simple_metadata {
            let simple_attempt = sqlx::query("UPDATE rebalance_runs SET status = 'error', metadata = ?, updated_at = ? WHERE id = ?")
                .bind(simple_metadata)
                .bind(&now)
                .bind(id.to_string())
                .execute(&self.db.pool)
                .await;
            if simple_attempt.is_ok_and(|r| r.rows_affected() > 0) {
                return Ok(());
            }
        }

        let minimal = sqlx::query("UPDATE rebalance_runs SET status = 'error', updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id.to_string())
            .execute(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?;
        if minimal.rows_affected() == 0 {
            return Err(not_found("rebalance", id));
        }
        Ok(())
    }

    async fn cancel_rebalance(&self, id: Uuid) -> CoordinatorResult<()> {
        let result = sqlx::query("UPDATE rebalance_runs SET status = 'cancelled', updated_at = ? WHERE id = ?")
            .bind(timestamp_to_text(Utc::now()))
            .bind(id.to_string())
            .execute(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(not_found("rebalance", id));
        }
        Ok(())
    }

    async fn set_rebalance_step(
        &self,
        rebalance_id: Uuid,
        step: crate::domain::models::RebalanceStepKey,
        status: AgentStepStatus,
        detail: serde_json::Value,
    ) -> CoordinatorResult<()> {
        let mut run = self.get_rebalance_any(rebalance_id).await?;
        let now = Utc::now();
        run.workflow_steps.insert(
            step.as_str().to_string(),
            RebalanceStepState { status, detail, updated_at: now },
        );
        run.updated_at = now;
        let workflow_steps_json = to_json(&run.workflow_steps).map_err(CoordinatorError::Other)?;
        sqlx::query("UPDATE rebalance_runs SET workflow_steps = ?, updated_at = ? WHERE id = ?")
            .bind(workflow_steps_json)
            .bind(timestamp_to_text(now))
            .bind(rebalance_id.to_string())
            .execute(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?;
        Ok(())
    }

    async fn increment_stocks_analyzed(&self, rebalance_id: Uuid) -> CoordinatorResult<(u32, u32)> {
        let row = sqlx::query(
            "UPDATE rebalance_runs SET stocks_analyzed = stocks_analyzed + 1, updated_at = ? WHERE id = ? RETURNING stocks_analyzed, total_stocks",
        )
        .bind(timestamp_to_text(Utc::now()))
        .bind(rebalance_id.to_string())
        .fetch_optional(&self.db.pool)
        .await
        .map_err(|e| CoordinatorError::Other(e.into()))?
        .ok_or_else(|| not_found("rebalance", rebalance_id))?;
        let analyzed: i64 = row.try_get("stocks_analyzed").map_err(|e| CoordinatorError::Other(e.into()))?;
        let total: i64 = row.try_get("total_stocks").map_err(|e| CoordinatorError::Other(e.into()))?;
        Ok((analyzed as u32, total as u32))
    }

    async fn list_child_analyses(&self, rebalance_id: Uuid) -> CoordinatorResult<Vec<AnalysisRun>> {
        let rows = sqlx::query("SELECT * FROM analysis_runs WHERE rebalance_request_id = ? ORDER BY created_at")
            .bind(rebalance_id.to_string())
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?;
        rows.iter()
            .map(|r| row_to_analysis(r).map_err(CoordinatorError::Other))
            .collect()
    }

    async fn admit_next_pending_child(&self, rebalance_id: Uuid, quota: u32) -> CoordinatorResult<Option<AnalysisRun>> {
        // The running-count check and the pending-row claim are one
        // statement so SQLite evaluates both against the same snapshot;
        // two concurrent admissions can't both read "under quota" and then
        // both claim a row, which a separate SELECT-then-UPDATE would allow.
        let row = sqlx::query(
            r#"
            UPDATE analysis_runs
            SET status = 'running', updated_at = ?
            WHERE id = (
                SELECT id FROM analysis_runs
                WHERE rebalance_request_id = ? AND status = 'pending'
                ORDER BY created_at LIMIT 1
            )
            AND (
                SELECT COUNT(*) FROM analysis_runs WHERE rebalance_request_id = ? AND status = 'running'
            ) < ?
            RETURNING *
            "#,
        )
        .bind(timestamp_to_text(Utc::now()))
        .bind(rebalance_id.to_string())
        .bind(rebalance_id.to_string())
        .bind(quota as i64)
        .fetch_optional(&self.db.pool)
        .await
        .map_err(|e| CoordinatorError::Other(e.into()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(row_to_analysis(&row).map_err(CoordinatorError::Other)?))
    }

    async fn find_stale_running(&self, threshold_seconds: i64) -> CoordinatorResult<Vec<AnalysisRun>> {
        let cutoff = timestamp_to_text(Utc::now() - Duration::seconds(threshold_seconds));
        let rows = sqlx::query("SELECT * FROM analysis_runs WHERE status = 'running' AND updated_at <= ?")
            .bind(cutoff)
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?;
        rows.iter()
            .map(|r| row_to_analysis(r).map_err(CoordinatorError::Other))
            .collect()
    }

    async fn list_due_schedules(&self, window_ahead_minutes: i64, grace_minutes: i64) -> CoordinatorResult<Vec<ScheduleRule>> {
        let rows = sqlx::query("SELECT * FROM schedule_rules WHERE enabled = 1")
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?;
        let now = Utc::now();
        let window_start = now - Duration::minutes(grace_minutes);
        let window_end = now + Duration::minutes(window_ahead_minutes);

        let mut due = Vec::new();
        for row in &rows {
            let rule = row_to_schedule(row).map_err(CoordinatorError::Other)?;
            let next = next_due_at(&rule, now);
            if next >= window_start && next <= window_end {
                due.push(rule);
            }
        }
        Ok(due)
    }

    async fn mark_schedule_executed(
        &self,
        schedule_id: Uuid,
        success: bool,
        rebalance_id: Option<Uuid>,
        error: Option<String>,
    ) -> CoordinatorResult<()> {
        if !success {
            tracing::warn!(%schedule_id, ?rebalance_id, ?error, "schedule run failed");
        }
        let result = sqlx::query("UPDATE schedule_rules SET last_executed_at = ? WHERE id = ?")
            .bind(timestamp_to_text(Utc::now()))
            .bind(schedule_id.to_string())
            .execute(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(not_found("schedule", schedule_id));
        }
        Ok(())
    }
}

fn interval_duration(rule: &ScheduleRule) -> Duration {
    let n = rule.interval_value as i64;
    match rule.interval_unit {
        IntervalUnit::Days => Duration::days(n),
        IntervalUnit::Weeks => Duration::days(n * 7),
        IntervalUnit::Months => Duration::days(n * 30),
    }
}

fn snap_time_of_day(at: DateTime<Utc>, minutes: u32) -> DateTime<Utc> {
    let hh = (minutes / 60) as u32;
    let mm = (minutes % 60) as u32;
    at.date_naive()
        .and_hms_opt(hh, mm, 0)
        .expect("time_of_day_minutes invariant keeps this in range")
        .and_utc()
}

/// Approximates the rule's next fire time in UTC; `timezone` is carried for
/// display but not consulted here since the stack has no tz database crate.
fn next_due_at(rule: &ScheduleRule, now: DateTime<Utc>) -> DateTime<Utc> {
    let base = match rule.last_executed_at {
        None => snap_time_of_day(now, rule.time_of_day_minutes),
        Some(last) => snap_time_of_day(last + interval_duration(rule), rule.time_of_day_minutes),
    };

    if rule.day_of_week.is_empty() {
        return base;
    }

    let mut candidate = base;
    for _ in 0..8 {
        let dow = candidate.weekday().num_days_from_sunday() as u8;
        if rule.day_of_week.contains(&dow) {
            return candidate;
        }
        candidate += Duration::days(1);
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RebalanceConstraints;
    use rust_decimal_macros::dec;

    fn base_rule() -> ScheduleRule {
        ScheduleRule {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            enabled: true,
            interval_value: 1,
            interval_unit: IntervalUnit::Weeks,
            time_of_day_minutes: 9 * 60 + 30,
            timezone: "UTC".into(),
            selected_tickers: vec![],
            include_watchlist: true,
            day_of_week: vec![1, 3, 5],
            last_executed_at: None,
            constraints: RebalanceConstraints {
                skip_threshold_check: false,
                skip_opportunity_agent: false,
                rebalance_threshold: dec!(0.05),
                min_position_pct: dec!(0.01),
                max_position_pct: dec!(0.25),
                auto_execute: false,
            },
        }
    }

    #[test]
    fn next_due_lands_on_a_permitted_weekday() {
        let rule = base_rule();
        let now = Utc::now();
        let due = next_due_at(&rule, now);
        let dow = due.weekday().num_days_from_sunday() as u8;
        assert!(rule.day_of_week.contains(&dow));
    }

    #[test]
    fn next_due_advances_past_last_run() {
        let mut rule = base_rule();
        rule.day_of_week.clear();
        rule.last_executed_at = Some(Utc::now());
        let due = next_due_at(&rule, Utc::now());
        assert!(due > rule.last_executed_at.unwrap());
    }
}
