//! Coordinator-wide error kinds (spec §7), expressed as a single enum so
//! every axum handler can map a known variant to an HTTP 200 JSON envelope
//! and let anything else fall through to a 500.

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("agent failure: {0}")]
    AgentFailure(String),

    #[error("broker rejected order: {0}")]
    BrokerRejected(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoordinatorError {
    pub fn status_code(&self) -> u16 {
        match self {
            CoordinatorError::NotFound(_) => 200,
            CoordinatorError::Unauthorized(_) => 200,
            CoordinatorError::PreconditionFailed(_) => 200,
            CoordinatorError::AgentFailure(_) => 200,
            CoordinatorError::BrokerRejected(_) => 200,
            CoordinatorError::Transient(_) => 200,
            CoordinatorError::Fatal(_) => 200,
            CoordinatorError::Other(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::NotFound(_) => "not_found",
            CoordinatorError::Unauthorized(_) => "unauthorized",
            CoordinatorError::PreconditionFailed(_) => "precondition_failed",
            CoordinatorError::AgentFailure(_) => "agent_failure",
            CoordinatorError::BrokerRejected(_) => "broker_rejected",
            CoordinatorError::Transient(_) => "transient",
            CoordinatorError::Fatal(_) => "fatal",
            CoordinatorError::Other(_) => "internal",
        }
    }

    pub fn to_response_body(&self) -> ErrorBody {
        ErrorBody {
            success: false,
            error: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub message: String,
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
