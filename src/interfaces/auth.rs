//! Bearer-token authentication (§6): the pre-shared service token is trusted
//! to supply any `userId`; a per-user bearer (the user's own id) must match
//! whatever `userId` the request body names.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::domain::errors::CoordinatorError;
use crate::interfaces::state::AppState;

#[derive(Debug, Clone, Copy)]
pub enum Caller {
    Service,
    User(Uuid),
}

impl Caller {
    pub fn is_service(&self) -> bool {
        matches!(self, Caller::Service)
    }

    /// Resolves the effective acting user: a service caller must name one
    /// explicitly, a user caller may only act as themselves.
    pub fn resolve(&self, requested: Option<Uuid>) -> Result<Uuid, CoordinatorError> {
        match (self, requested) {
            (Caller::Service, Some(user_id)) => Ok(user_id),
            (Caller::Service, None) => Err(CoordinatorError::Unauthorized("service caller must supply userId".into())),
            (Caller::User(caller_id), Some(user_id)) if user_id != *caller_id => {
                Err(CoordinatorError::Unauthorized("userId does not match bearer caller".into()))
            }
            (Caller::User(caller_id), _) => Ok(*caller_id),
        }
    }
}

pub async fn authenticate(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return unauthorized("missing bearer token");
    };

    let caller = if !state.service_bearer_token.is_empty() && token == state.service_bearer_token {
        Caller::Service
    } else if let Ok(user_id) = token.parse::<Uuid>() {
        Caller::User(user_id)
    } else {
        return unauthorized("bearer token is neither the service token nor a user id");
    };

    req.extensions_mut().insert(caller);
    next.run(req).await
}

fn unauthorized(message: &str) -> Response {
    let body = CoordinatorError::Unauthorized(message.to_string()).to_response_body();
    (StatusCode::OK, Json(body)).into_response()
}
