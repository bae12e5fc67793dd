//! `/analysis-coordinator` — `start | onAgentCompleted | retry | reactivate | cancel` (§6).

use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::errors::CoordinatorError;
use crate::domain::models::PhaseName;
use crate::interfaces::auth::Caller;
use crate::interfaces::respond::respond;
use crate::interfaces::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum AnalysisAction {
    Start {
        ticker: String,
        #[serde(default)]
        user_id: Option<Uuid>,
    },
    OnAgentCompleted {
        analysis_id: Uuid,
        phase: PhaseName,
        agent: String,
        success: bool,
        #[serde(default)]
        insight: Option<serde_json::Value>,
    },
    Retry {
        analysis_id: Uuid,
        #[serde(default)]
        user_id: Option<Uuid>,
    },
    Reactivate {
        analysis_id: Uuid,
        #[serde(default)]
        user_id: Option<Uuid>,
        /// User-initiated reactivations bypass the staleness check by default.
        #[serde(default = "default_manual_force")]
        force: bool,
    },
    Cancel {
        analysis_id: Uuid,
        #[serde(default)]
        user_id: Option<Uuid>,
    },
}

fn default_manual_force() -> bool {
    true
}

pub async fn handle(State(state): State<Arc<AppState>>, Extension(caller): Extension<Caller>, Json(action): Json<AnalysisAction>) -> Response {
    let result = dispatch(&state, caller, action).await;
    respond(result)
}

async fn dispatch(state: &AppState, caller: Caller, action: AnalysisAction) -> Result<serde_json::Value, CoordinatorError> {
    match action {
        AnalysisAction::Start { ticker, user_id } => {
            let user_id = caller.resolve(user_id)?;
            let run = state.analysis.build_analysis_run(user_id, ticker, None).await?;
            state.store.insert_analysis(&run).await?;
            state.analysis.start(run.id).await?;
            Ok(serde_json::json!({ "analysisId": run.id }))
        }
        AnalysisAction::OnAgentCompleted { analysis_id, phase, agent, success, insight } => {
            // onAgentCompleted is always agent-to-coordinator, never user-facing.
            if !caller.is_service() {
                return Err(CoordinatorError::Unauthorized("onAgentCompleted is service-only".into()));
            }
            state.analysis.on_agent_completed(analysis_id, phase, &agent, success, insight).await?;
            Ok(serde_json::json!({}))
        }
        AnalysisAction::Retry { analysis_id, user_id } => {
            let user_id = caller.resolve(user_id)?;
            state.analysis.retry(analysis_id, user_id).await?;
            Ok(serde_json::json!({}))
        }
        AnalysisAction::Reactivate { analysis_id, user_id, force } => {
            let user_id = caller.resolve(user_id)?;
            state.analysis.reactivate(analysis_id, user_id, force, state.stale_threshold_seconds).await?;
            Ok(serde_json::json!({}))
        }
        AnalysisAction::Cancel { analysis_id, user_id } => {
            let user_id = caller.resolve(user_id)?;
            state.analysis.cancel(analysis_id, user_id).await?;
            Ok(serde_json::json!({}))
        }
    }
}
