//! `/execute-trade` — `{tradeActionId, action, userId?, isServerCall?}` (§6).

use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::application::trade_executor::TradeAction;
use crate::domain::errors::CoordinatorError;
use crate::interfaces::auth::Caller;
use crate::interfaces::respond::respond;
use crate::interfaces::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTradeRequest {
    trade_action_id: Uuid,
    action: TradeActionWire,
    #[serde(default)]
    user_id: Option<Uuid>,
    #[serde(default)]
    is_server_call: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TradeActionWire {
    Approve,
    Reject,
}

pub async fn handle(State(state): State<Arc<AppState>>, Extension(caller): Extension<Caller>, Json(req): Json<ExecuteTradeRequest>) -> Response {
    let result = dispatch(&state, caller, req).await;
    respond(result)
}

async fn dispatch(state: &AppState, caller: Caller, req: ExecuteTradeRequest) -> Result<serde_json::Value, CoordinatorError> {
    // A server-to-server call trusts the supplied userId outright; otherwise
    // the bearer caller must be the order's own user (checked inside `execute`).
    let user_id = if req.is_server_call && caller.is_service() {
        req.user_id.ok_or_else(|| CoordinatorError::Unauthorized("server call must supply userId".into()))?
    } else {
        caller.resolve(req.user_id)?
    };

    let action = match req.action {
        TradeActionWire::Approve => TradeAction::Approve,
        TradeActionWire::Reject => TradeAction::Reject,
    };

    let outcome = state.trade_executor.execute(req.trade_action_id, action, user_id, req.is_server_call && caller.is_service()).await?;
    serde_json::to_value(outcome).map_err(|e| CoordinatorError::Other(e.into()))
}
