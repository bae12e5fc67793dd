//! Stale-analysis sweeper (C7): periodically reactivates AnalysisRuns stuck
//! in `running` past the configured threshold, up to a retry cap.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::application::analysis_coordinator::AnalysisCoordinator;
use crate::domain::errors::CoordinatorResult;
use crate::domain::models::AnalysisMetadata;
use crate::domain::ports::{AnalysisPatch, WorkflowStore};
use crate::domain::status::AnalysisStatus;
use crate::infrastructure::observability::Metrics;

pub struct StaleSweeper {
    store: Arc<dyn WorkflowStore>,
    analysis: Arc<AnalysisCoordinator>,
    metrics: Arc<Metrics>,
    threshold_seconds: i64,
    max_reactivation_attempts: u32,
}

impl StaleSweeper {
    pub fn new(store: Arc<dyn WorkflowStore>, analysis: Arc<AnalysisCoordinator>, metrics: Arc<Metrics>, threshold_seconds: i64, max_reactivation_attempts: u32) -> Self {
        Self { store, analysis, metrics, threshold_seconds, max_reactivation_attempts }
    }

    pub async fn run_forever(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                warn!("stale sweep failed: {e}");
            }
        }
    }

    pub async fn sweep_once(&self) -> CoordinatorResult<()> {
        let stale = self.store.find_stale_running(self.threshold_seconds).await?;
        for run in stale {
            let current = self.store.get_analysis_any(run.id).await?;
            if current.status != AnalysisStatus::Running {
                continue; // raced with a concurrent transition
            }

            if current.metadata.reactivation_attempts >= self.max_reactivation_attempts {
                let mut metadata = current.metadata.clone();
                metadata.max_reactivations_reached = true;
                metadata.error_reason = Some("stale analysis exceeded max reactivation attempts".to_string());
                self.store
                    .conditional_update_analysis_status(
                        run.id,
                        AnalysisStatus::Running,
                        AnalysisStatus::Error,
                        AnalysisPatch { metadata: Some(metadata), ..Default::default() },
                    )
                    .await?;
                self.metrics.inc_stale_reactivation("max_attempts_reached");
                continue;
            }

            let mut metadata = current.metadata.clone();
            metadata.reactivation_attempts += 1;
            let attempts = metadata.reactivation_attempts;
            self.store
                .conditional_update_analysis_status(
                    run.id,
                    AnalysisStatus::Running,
                    AnalysisStatus::Running,
                    AnalysisPatch { metadata: Some(metadata), ..Default::default() },
                )
                .await?;

            match self.analysis.reactivate(run.id, run.user_id, true, self.threshold_seconds).await {
                Ok(()) => {
                    info!(analysis_id = %run.id, attempts, "reactivated stale analysis");
                    self.metrics.inc_stale_reactivation("reactivated");
                }
                Err(e) => {
                    warn!(analysis_id = %run.id, "failed to reactivate stale analysis: {e}");
                    let failure_metadata = AnalysisMetadata { reactivation_attempts: attempts, error_reason: Some(format!("reactivation failed: {e}")), ..current.metadata.clone() };
                    let _ = self
                        .store
                        .conditional_update_analysis_status(
                            run.id,
                            AnalysisStatus::Running,
                            AnalysisStatus::Error,
                            AnalysisPatch { metadata: Some(failure_metadata), ..Default::default() },
                        )
                        .await;
                    self.metrics.inc_stale_reactivation("reactivation_failed");
                }
            }
        }
        Ok(())
    }
}
