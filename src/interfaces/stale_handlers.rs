//! `/detect-stale-analysis` — service-only, no request body (§6).

use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::Extension;

use crate::domain::errors::CoordinatorError;
use crate::interfaces::auth::Caller;
use crate::interfaces::respond::respond;
use crate::interfaces::state::AppState;

pub async fn handle(State(state): State<Arc<AppState>>, Extension(caller): Extension<Caller>) -> Response {
    let result = async {
        if !caller.is_service() {
            return Err(CoordinatorError::Unauthorized("detect-stale-analysis is service-only".into()));
        }
        state.stale_sweeper.sweep_once().await?;
        Ok(serde_json::json!({}))
    }
    .await;
    respond(result)
}
