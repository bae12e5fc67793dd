//! Shared row-mapping helpers for the repository impls. Every nested
//! document column is stored as JSON text and round-tripped through
//! `serde_json`; every decimal column is stored as TEXT via
//! `Decimal::to_string()` so precision never passes through a float.

use anyhow::{Context, Result};
use sqlx::{Row, sqlite::SqliteRow};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::models::{
    AnalysisMetadata, AnalysisRun, Phase, RebalanceConstraints, RebalanceMetadata, RebalanceRun,
    RebalanceStepState, ScheduleRule, TradeOrder, TradeOrderMetadata,
};
use crate::domain::status::{AnalysisStatus, Decision, RebalanceStatus, TradeOrderStatus};
use crate::infrastructure::persistence::codec::{
    decimal_from_text, decimal_to_text, from_json, timestamp_from_text, timestamp_to_text, to_json,
};
use crate::infrastructure::persistence::database::Database;

/// Backs every port trait implemented in this module; one pool, shared.
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

pub(crate) fn row_to_analysis(row: &SqliteRow) -> Result<AnalysisRun> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let rebalance_request_id: Option<String> = row.try_get("rebalance_request_id")?;
    let status: String = row.try_get("status")?;
    let decision: String = row.try_get("decision")?;
    let confidence: i64 = row.try_get("confidence")?;
    let full_analysis: String = row.try_get("full_analysis")?;
    let agent_insights: String = row.try_get("agent_insights")?;
    let metadata: String = row.try_get("metadata")?;
    let workflow_steps: String = row.try_get("workflow_steps")?;
    let analysis_date: String = row.try_get("analysis_date")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(AnalysisRun {
        id: Uuid::parse_str(&id)?,
        user_id: Uuid::parse_str(&user_id)?,
        rebalance_request_id: rebalance_request_id.map(|v| Uuid::parse_str(&v)).transpose()?,
        ticker: row.try_get("ticker")?,
        analysis_date: timestamp_from_text(&analysis_date)?,
        status: AnalysisStatus::from_str(&status)?,
        decision: Decision::from_str(&decision)?,
        confidence: confidence as u8,
        full_analysis: from_json(&full_analysis)?,
        agent_insights: from_json::<HashMap<String, serde_json::Value>>(&agent_insights)?,
        metadata: from_json::<AnalysisMetadata>(&metadata)?,
        workflow_steps: from_json::<Vec<Phase>>(&workflow_steps)?,
        created_at: timestamp_from_text(&created_at)?,
        updated_at: timestamp_from_text(&updated_at)?,
    })
}

pub(crate) fn analysis_bind_values(run: &AnalysisRun) -> Result<AnalysisBindValues> {
    Ok(AnalysisBindValues {
        id: run.id.to_string(),
        user_id: run.user_id.to_string(),
        rebalance_request_id: run.rebalance_request_id.map(|v| v.to_string()),
        ticker: run.ticker.clone(),
        analysis_date: timestamp_to_text(run.analysis_date),
        status: run.status.as_str().to_string(),
        decision: run.decision.as_str().to_string(),
        confidence: run.confidence as i64,
        full_analysis: to_json(&run.full_analysis)?,
        agent_insights: to_json(&run.agent_insights)?,
        metadata: to_json(&run.metadata)?,
        workflow_steps: to_json(&run.workflow_steps)?,
        created_at: timestamp_to_text(run.created_at),
        updated_at: timestamp_to_text(run.updated_at),
    })
}

pub(crate) struct AnalysisBindValues {
    pub id: String,
    pub user_id: String,
    pub rebalance_request_id: Option<String>,
    pub ticker: String,
    pub analysis_date: String,
    pub status: String,
    pub decision: String,
    pub confidence: i64,
    pub full_analysis: String,
    pub agent_insights: String,
    pub metadata: String,
    pub workflow_steps: String,
    pub created_at: String,
    pub updated_at: String,
}

pub(crate) fn row_to_rebalance(row: &SqliteRow) -> Result<RebalanceRun> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let status: String = row.try_get("status")?;
    let target_allocations: String = row.try_get("target_allocations")?;
    let portfolio_snapshot: String = row.try_get("portfolio_snapshot")?;
    let constraints: String = row.try_get("constraints")?;
    let watchlist: String = row.try_get("watchlist")?;
    let selected_stocks: String = row.try_get("selected_stocks")?;
    let analysis_ids: String = row.try_get("analysis_ids")?;
    let total_stocks: i64 = row.try_get("total_stocks")?;
    let stocks_analyzed: i64 = row.try_get("stocks_analyzed")?;
    let workflow_steps: String = row.try_get("workflow_steps")?;
    let opportunity_evaluation: Option<String> = row.try_get("opportunity_evaluation")?;
    let rebalance_plan: Option<String> = row.try_get("rebalance_plan")?;
    let metadata: String = row.try_get("metadata")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    let analysis_id_strs: Vec<String> = from_json(&analysis_ids)?;
    let analysis_ids = analysis_id_strs
        .into_iter()
        .map(|v| Uuid::parse_str(&v).context("invalid analysis id in rebalance row"))
        .collect::<Result<Vec<_>>>()?;

    Ok(RebalanceRun {
        id: Uuid::parse_str(&id)?,
        user_id: Uuid::parse_str(&user_id)?,
        status: RebalanceStatus::from_str(&status)?,
        target_allocations: from_json(&target_allocations)?,
        portfolio_snapshot: from_json(&portfolio_snapshot)?,
        constraints: from_json::<RebalanceConstraints>(&constraints)?,
        watchlist: from_json(&watchlist)?,
        selected_stocks: from_json(&selected_stocks)?,
        analysis_ids,
        total_stocks: total_stocks as u32,
        stocks_analyzed: stocks_analyzed as u32,
        workflow_steps: from_json::<HashMap<String, RebalanceStepState>>(&workflow_steps)?,
        opportunity_evaluation: opportunity_evaluation.map(|v| from_json(&v)).transpose()?,
        rebalance_plan: rebalance_plan.map(|v| from_json(&v)).transpose()?,
        metadata: from_json::<RebalanceMetadata>(&metadata)?,
        created_at: timestamp_from_text(&created_at)?,
        updated_at: timestamp_from_text(&updated_at)?,
        completed_at: completed_at.map(|v| timestamp_from_text(&v)).transpose()?,
    })
}

pub(crate) fn rebalance_bind_values(run: &RebalanceRun) -> Result<RebalanceBindValues> {
    let analysis_ids: Vec<String> = run.analysis_ids.iter().map(|v| v.to_string()).collect();
    Ok(RebalanceBindValues {
        id: run.id.to_string(),
        user_id: run.user_id.to_string(),
        status: run.status.as_str().to_string(),
        target_allocations: to_json(&run.target_allocations)?,
        portfolio_snapshot: to_json(&run.portfolio_snapshot)?,
        constraints: to_json(&run.constraints)?,
        watchlist: to_json(&run.watchlist)?,
        selected_stocks: to_json(&run.selected_stocks)?,
        analysis_ids: to_json(&analysis_ids)?,
        total_stocks: run.total_stocks as i64,
        stocks_analyzed: run.stocks_analyzed as i64,
        workflow_steps: to_json(&run.workflow_steps)?,
        opportunity_evaluation: run.opportunity_evaluation.as_ref().map(to_json).transpose()?,
        rebalance_plan: run.rebalance_plan.as_ref().map(to_json).transpose()?,
        metadata: to_json(&run.metadata)?,
        created_at: timestamp_to_text(run.created_at),
        updated_at: timestamp_to_text(run.updated_at),
        completed_at: run.completed_at.map(timestamp_to_text),
    })
}

pub(crate) struct RebalanceBindValues {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub target_allocations: String,
    pub portfolio_snapshot: String,
    pub constraints: String,
    pub watchlist: String,
    pub selected_stocks: String,
    pub analysis_ids: String,
    pub total_stocks: i64,
    pub stocks_analyzed: i64,
    pub workflow_steps: String,
    pub opportunity_evaluation: Option<String>,
    pub rebalance_plan: Option<String>,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

pub(crate) fn row_to_trade_order(row: &SqliteRow) -> Result<TradeOrder> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let action: String = row.try_get("action")?;
    let shares: String = row.try_get("shares")?;
    let dollar_amount: String = row.try_get("dollar_amount")?;
    let status: String = row.try_get("status")?;
    let analysis_id: Option<String> = row.try_get("analysis_id")?;
    let rebalance_request_id: Option<String> = row.try_get("rebalance_request_id")?;
    let metadata: String = row.try_get("metadata")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(TradeOrder {
        id: Uuid::parse_str(&id)?,
        user_id: Uuid::parse_str(&user_id)?,
        ticker: row.try_get("ticker")?,
        action: Decision::from_str(&action)?,
        shares: decimal_from_text(&shares)?,
        dollar_amount: decimal_from_text(&dollar_amount)?,
        status: TradeOrderStatus::from_str(&status)?,
        analysis_id: analysis_id.map(|v| Uuid::parse_str(&v)).transpose()?,
        rebalance_request_id: rebalance_request_id.map(|v| Uuid::parse_str(&v)).transpose()?,
        metadata: from_json::<TradeOrderMetadata>(&metadata)?,
        created_at: timestamp_from_text(&created_at)?,
        updated_at: timestamp_from_text(&updated_at)?,
    })
}

pub(crate) fn trade_order_bind_values(order: &TradeOrder) -> Result<TradeOrderBindValues> {
    Ok(TradeOrderBindValues {
        id: order.id.to_string(),
        user_id: order.user_id.to_string(),
        ticker: order.ticker.clone(),
        action: order.action.as_str().to_string(),
        shares: decimal_to_text(order.shares),
        dollar_amount: decimal_to_text(order.dollar_amount),
        status: order.status.as_str().to_string(),
        analysis_id: order.analysis_id.map(|v| v.to_string()),
        rebalance_request_id: order.rebalance_request_id.map(|v| v.to_string()),
        metadata: to_json(&order.metadata)?,
        created_at: timestamp_to_text(order.created_at),
        updated_at: timestamp_to_text(order.updated_at),
    })
}

pub(crate) struct TradeOrderBindValues {
    pub id: String,
    pub user_id: String,
    pub ticker: String,
    pub action: String,
    pub shares: String,
    pub dollar_amount: String,
    pub status: String,
    pub analysis_id: Option<String>,
    pub rebalance_request_id: Option<String>,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

pub(crate) fn row_to_schedule(row: &SqliteRow) -> Result<ScheduleRule> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let enabled: i64 = row.try_get("enabled")?;
    let interval_value: i64 = row.try_get("interval_value")?;
    let interval_unit: String = row.try_get("interval_unit")?;
    let time_of_day_minutes: i64 = row.try_get("time_of_day_minutes")?;
    let selected_tickers: String = row.try_get("selected_tickers")?;
    let include_watchlist: i64 = row.try_get("include_watchlist")?;
    let day_of_week: String = row.try_get("day_of_week")?;
    let last_executed_at: Option<String> = row.try_get("last_executed_at")?;
    let constraints: String = row.try_get("constraints")?;

    Ok(ScheduleRule {
        id: Uuid::parse_str(&id)?,
        user_id: Uuid::parse_str(&user_id)?,
        enabled: enabled != 0,
        interval_value: interval_value as u32,
        interval_unit: from_json(&format!("\"{interval_unit}\""))?,
        time_of_day_minutes: time_of_day_minutes as u32,
        timezone: row.try_get("timezone")?,
        selected_tickers: from_json(&selected_tickers)?,
        include_watchlist: include_watchlist != 0,
        day_of_week: from_json(&day_of_week)?,
        last_executed_at: last_executed_at.map(|v| timestamp_from_text(&v)).transpose()?,
        constraints: from_json::<RebalanceConstraints>(&constraints)?,
    })
}
