//! `/rebalance-coordinator` — `start-rebalance | analysis-completed |
//! complete-rebalance | opportunity-completed | opportunity-error |
//! rebalance-error | retry-rebalance` (§6).

use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::errors::CoordinatorError;
use crate::domain::models::RebalanceConstraints;
use crate::domain::ports::BrokerCredentials;
use crate::interfaces::auth::Caller;
use crate::interfaces::respond::respond;
use crate::interfaces::state::AppState;

const LIVE_BASE_URL: &str = "https://api.alpaca.markets";
const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum RebalanceAction {
    StartRebalance {
        tickers: Vec<String>,
        constraints: RebalanceConstraints,
        #[serde(default, rename = "userId")]
        user_id: Option<Uuid>,
    },
    AnalysisCompleted {
        #[serde(rename = "rebalanceId")]
        rebalance_id: Uuid,
        #[serde(rename = "analysisId")]
        analysis_id: Uuid,
        ticker: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    CompleteRebalance {
        #[serde(rename = "rebalanceId")]
        rebalance_id: Uuid,
        #[serde(rename = "rebalancePlan")]
        rebalance_plan: serde_json::Value,
    },
    OpportunityCompleted {
        #[serde(rename = "rebalanceId")]
        rebalance_id: Uuid,
        #[serde(default)]
        selected: Vec<String>,
    },
    OpportunityError {
        #[serde(rename = "rebalanceId")]
        rebalance_id: Uuid,
        message: String,
    },
    RebalanceError {
        #[serde(rename = "rebalanceId")]
        rebalance_id: Uuid,
        message: String,
    },
    RetryRebalance {
        #[serde(rename = "rebalanceId")]
        rebalance_id: Uuid,
        #[serde(default, rename = "userId")]
        user_id: Option<Uuid>,
    },
}

pub async fn handle(State(state): State<Arc<AppState>>, Extension(caller): Extension<Caller>, Json(action): Json<RebalanceAction>) -> Response {
    let result = dispatch(&state, caller, action).await;
    respond(result)
}

async fn dispatch(state: &AppState, caller: Caller, action: RebalanceAction) -> Result<serde_json::Value, CoordinatorError> {
    match action {
        RebalanceAction::StartRebalance { tickers, constraints, user_id } => {
            let user_id = caller.resolve(user_id)?;
            let creds = broker_creds_for(state, user_id).await?;
            let rebalance_id = state.rebalance.start(user_id, tickers, constraints, &creds).await?;
            Ok(serde_json::json!({ "rebalanceId": rebalance_id }))
        }
        RebalanceAction::AnalysisCompleted { rebalance_id, analysis_id, ticker, success, error } => {
            require_service(&caller)?;
            state.rebalance.on_analysis_completed(rebalance_id, analysis_id, &ticker, success, error).await?;
            Ok(serde_json::json!({}))
        }
        RebalanceAction::CompleteRebalance { rebalance_id, rebalance_plan } => {
            require_service(&caller)?;
            state.rebalance.complete(rebalance_id, rebalance_plan).await?;
            Ok(serde_json::json!({}))
        }
        RebalanceAction::OpportunityCompleted { rebalance_id, selected } => {
            require_service(&caller)?;
            state.rebalance.opportunity_selected(rebalance_id, selected).await?;
            Ok(serde_json::json!({}))
        }
        RebalanceAction::OpportunityError { rebalance_id, message } => {
            require_service(&caller)?;
            state.rebalance.opportunity_error(rebalance_id, &message).await?;
            Ok(serde_json::json!({}))
        }
        RebalanceAction::RebalanceError { rebalance_id, message } => {
            require_service(&caller)?;
            state.rebalance.rebalance_error(rebalance_id, &message).await?;
            Ok(serde_json::json!({}))
        }
        RebalanceAction::RetryRebalance { rebalance_id, user_id } => {
            let user_id = caller.resolve(user_id)?;
            let creds = broker_creds_for(state, user_id).await?;
            state.rebalance.retry(rebalance_id, user_id, &creds).await?;
            Ok(serde_json::json!({}))
        }
    }
}

fn require_service(caller: &Caller) -> Result<(), CoordinatorError> {
    if caller.is_service() {
        Ok(())
    } else {
        Err(CoordinatorError::Unauthorized("this callback is service-only".into()))
    }
}

async fn broker_creds_for(state: &AppState, user_id: Uuid) -> Result<BrokerCredentials, CoordinatorError> {
    let settings = state.api_settings.get_api_settings(user_id).await?;
    let key_id = settings.alpaca_key_id.ok_or_else(|| CoordinatorError::Fatal("user has no brokerage key configured".into()))?;
    let secret_key = settings.alpaca_secret_key.ok_or_else(|| CoordinatorError::Fatal("user has no brokerage secret configured".into()))?;
    Ok(BrokerCredentials {
        key_id,
        secret_key,
        base_url: if settings.paper_trading { PAPER_BASE_URL.to_string() } else { LIVE_BASE_URL.to_string() },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_tag_is_kebab_case_on_the_wire() {
        let start: RebalanceAction = serde_json::from_value(serde_json::json!({
            "action": "start-rebalance",
            "tickers": ["AAPL", "MSFT"],
            "constraints": {
                "rebalance_threshold": "0.05",
                "min_position_pct": "0.02",
                "max_position_pct": "0.25",
            },
            "userId": Uuid::nil(),
        }))
        .expect("start-rebalance must deserialize under its kebab-case tag");
        assert!(matches!(start, RebalanceAction::StartRebalance { .. }));

        let retry: RebalanceAction = serde_json::from_value(serde_json::json!({
            "action": "retry-rebalance",
            "rebalanceId": Uuid::nil(),
        }))
        .expect("retry-rebalance must deserialize under its kebab-case tag");
        assert!(matches!(retry, RebalanceAction::RetryRebalance { .. }));

        let err: RebalanceAction = serde_json::from_value(serde_json::json!({
            "action": "opportunity-error",
            "rebalanceId": Uuid::nil(),
            "message": "no candidates",
        }))
        .expect("opportunity-error must deserialize under its kebab-case tag");
        assert!(matches!(err, RebalanceAction::OpportunityError { .. }));
    }
}
