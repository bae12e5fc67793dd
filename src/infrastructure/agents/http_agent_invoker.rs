//! Fire-and-forget HTTP dispatch to a named agent (C4). The reqwest-retry
//! middleware already retries transport failures; this adds an outer
//! jittered backoff around non-2xx application responses, the same
//! belt-and-suspenders shape as the teacher's `CircuitBreaker`-wrapped
//! background poller.

use async_trait::async_trait;
use rand::Rng;
use reqwest_middleware::ClientWithMiddleware;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::errors::{CoordinatorError, CoordinatorResult};
use crate::domain::ports::{AgentInvoker, AgentPayload};
use crate::infrastructure::core::HttpClientFactory;

pub struct HttpAgentInvoker {
    client: ClientWithMiddleware,
    base_url: String,
    retries: u32,
}

impl HttpAgentInvoker {
    pub fn new(base_url: String) -> Self {
        Self { client: HttpClientFactory::create_client(), base_url, retries: 2 }
    }
}

#[async_trait]
impl AgentInvoker for HttpAgentInvoker {
    async fn invoke(&self, agent_name: &str, payload: AgentPayload) -> CoordinatorResult<()> {
        let url = format!("{}/agents/{}/invoke", self.base_url, agent_name);
        let mut attempt = 0u32;

        loop {
            let result = self.client.post(&url).json(&payload).send().await;
            match result {
                Ok(response) if response.status().is_success() => {
                    info!(agent = agent_name, analysis_id = %payload.analysis_id, "agent dispatched");
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    warn!(agent = agent_name, %status, attempt, "agent dispatch rejected: {body}");
                }
                Err(err) => {
                    warn!(agent = agent_name, attempt, "agent dispatch transport error: {err}");
                }
            }

            if attempt >= self.retries {
                return Err(CoordinatorError::AgentFailure(format!(
                    "agent {agent_name} did not accept dispatch after {} attempts",
                    attempt + 1
                )));
            }
            attempt += 1;
            let jitter_ms = rand::rng().random_range(0..250);
            let backoff = Duration::from_millis(200 * 2u64.pow(attempt) + jitter_ms);
            tokio::time::sleep(backoff).await;
        }
    }
}
