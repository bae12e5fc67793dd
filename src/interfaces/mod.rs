//! HTTP surface (§6): one `Router` per coordinator endpoint, a bearer-auth
//! middleware layer, and `tower-http` tracing/CORS — the pack's `axum` web
//! stack, matching `other_examples`' `app_state.rs`/`http_api-state.rs` shape.

pub mod analysis_handlers;
pub mod auth;
pub mod rebalance_handlers;
pub mod respond;
pub mod stale_handlers;
pub mod state;
pub mod trade_handlers;

use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/analysis-coordinator", post(analysis_handlers::handle))
        .route("/rebalance-coordinator", post(rebalance_handlers::handle))
        .route("/detect-stale-analysis", post(stale_handlers::handle))
        .route("/execute-trade", post(trade_handlers::handle))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth::authenticate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
