use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

const BATCH_FAILED: &str = "Failed to generate predictions";

/// Outcome of one bulk prediction run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub attempted: usize,
    pub generated: usize,
    /// Ids of the matches whose prediction failed.
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub state: BatchState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub report: Option<BatchReport>,
    pub error: Option<String>,
}

impl Default for BatchStatus {
    fn default() -> Self {
        Self {
            state: BatchState::Idle,
            started_at: None,
            finished_at: None,
            report: None,
            error: None,
        }
    }
}

/// Handle on the background prediction batch. Cloning shares the same status.
///
/// The trigger returns as soon as the task is spawned; callers poll
/// [`BatchTracker::status`] to learn how it ended.
#[derive(Clone, Default)]
pub struct BatchTracker {
    status: Arc<RwLock<BatchStatus>>,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn status(&self) -> BatchStatus {
        self.status.read().await.clone()
    }

    /// Spawn `job` unless a batch is already running. Returns whether a new
    /// batch was started.
    pub async fn start<F>(&self, job: F) -> bool
    where
        F: Future<Output = Result<BatchReport>> + Send + 'static,
    {
        {
            let mut status = self.status.write().await;
            if status.state == BatchState::Running {
                return false;
            }
            *status = BatchStatus {
                state: BatchState::Running,
                started_at: Some(Utc::now()),
                ..BatchStatus::default()
            };
        }

        let shared = Arc::clone(&self.status);
        tokio::spawn(async move {
            // the job runs in its own task so a panic still lands in a terminal state
            let outcome = tokio::spawn(job).await;
            let mut status = shared.write().await;
            status.finished_at = Some(Utc::now());
            match outcome {
                Ok(Ok(report)) => {
                    tracing::info!(
                        "Prediction batch finished: {}/{} generated, {} failed",
                        report.generated,
                        report.attempted,
                        report.failed.len()
                    );
                    status.state = BatchState::Completed;
                    status.report = Some(report);
                }
                Ok(Err(e)) => {
                    tracing::error!("Prediction batch failed: {}", e);
                    status.state = BatchState::Failed;
                    status.error = Some(BATCH_FAILED.to_string());
                }
                Err(e) => {
                    tracing::error!("Prediction batch aborted: {}", e);
                    status.state = BatchState::Failed;
                    status.error = Some(BATCH_FAILED.to_string());
                }
            }
        });

        true
    }
}
