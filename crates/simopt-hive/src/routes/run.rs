use crate::error::{AppError, AppResult};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use simopt_core::message::Rank;
use simopt_core::overseer::{OverseerStatus, WorkerSnapshot};
use simopt_core::runner::RunSummary;
use std::sync::Arc;

pub async fn status(State(state): State<Arc<AppState>>) -> Json<OverseerStatus> {
    Json(state.status.borrow().clone())
}

pub async fn worker(
    State(state): State<Arc<AppState>>,
    Path(rank): Path<Rank>,
) -> AppResult<Json<WorkerSnapshot>> {
    state
        .status
        .borrow()
        .workers
        .iter()
        .find(|w| w.rank == rank)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("worker {}", rank)))
}

pub async fn summary(State(state): State<Arc<AppState>>) -> AppResult<Json<RunSummary>> {
    state
        .summary
        .read()
        .await
        .clone()
        .map(Json)
        .ok_or(AppError::Pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use simopt_core::optimizer::TerminationCondition;
    use simopt_core::runner::RunnerStats;
    use tokio::sync::watch;

    fn state() -> (Arc<AppState>, watch::Sender<OverseerStatus>) {
        let (tx, rx) = watch::channel(OverseerStatus::default());
        (Arc::new(AppState::new("test", rx)), tx)
    }

    #[tokio::test]
    async fn test_status_reflects_latest_snapshot() {
        let (state, tx) = state();
        tx.send_replace(OverseerStatus {
            dispatched: 4,
            received: 1,
            ..Default::default()
        });

        let Json(status) = status(State(state)).await;
        assert_eq!(status.dispatched, 4);
        assert_eq!(status.received, 1);
    }

    #[tokio::test]
    async fn test_unknown_worker_is_not_found() {
        let (state, tx) = state();
        tx.send_replace(OverseerStatus {
            workers: vec![WorkerSnapshot {
                rank: 1,
                busy: true,
                case_id: None,
                busy_secs: Some(0.5),
                assignments: 2,
            }],
            ..Default::default()
        });

        let Json(known) = worker(State(state.clone()), Path(1)).await.unwrap();
        assert_eq!(known.assignments, 2);
        assert!(matches!(
            worker(State(state), Path(7)).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_summary_waits_for_finish() {
        let (state, _tx) = state();
        assert!(matches!(
            summary(State(state.clone())).await,
            Err(AppError::Pending)
        ));

        state
            .finish(RunSummary {
                stats: RunnerStats::default(),
                termination: TerminationCondition::MaxEvalsReached,
                iterations: 3,
                best_case: None,
                best_variables: Default::default(),
            })
            .await;
        let Json(done) = summary(State(state)).await.unwrap();
        assert_eq!(done.iterations, 3);
    }
}
