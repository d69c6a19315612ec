use chrono::{DateTime, Utc};
use simopt_core::overseer::OverseerStatus;
use simopt_core::runner::RunSummary;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

pub struct AppState {
    pub run_id: Uuid,
    pub model_name: String,
    pub started_at: DateTime<Utc>,
    /// Latest scheduler snapshot, pushed by the overseer.
    pub status: watch::Receiver<OverseerStatus>,
    /// Set once the coordinator has finished.
    pub summary: RwLock<Option<RunSummary>>,
}

impl AppState {
    pub fn new(model_name: impl Into<String>, status: watch::Receiver<OverseerStatus>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            model_name: model_name.into(),
            started_at: Utc::now(),
            status,
            summary: RwLock::new(None),
        }
    }

    pub async fn finish(&self, summary: RunSummary) {
        *self.summary.write().await = Some(summary);
    }
}
