//! Maps a `CoordinatorResult` to the always-200-on-known-error JSON envelope
//! (spec §7): only an unmapped `CoordinatorError::Other` escalates to 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::errors::{CoordinatorError, CoordinatorResult};

pub fn respond<T: Serialize>(result: CoordinatorResult<T>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(serde_json::json!({ "success": true, "data": body }))).into_response(),
        Err(err) => {
            let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(err.to_response_body())).into_response()
        }
    }
}
