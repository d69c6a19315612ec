use crate::case::{Case, ErrorMessage, EvalStatus};
use crate::error::EngineResult;
use crate::evaluator::{EvalFailure, Evaluator, TimeoutPolicy};
use crate::message::{Message, Phase, ProtocolError, Tag, COORDINATOR};
use crate::model::VariableContainer;
use crate::transport::{Mailbox, RecvFilter, Transport};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub succeeded: usize,
    pub invalid: usize,
    pub timed_out: usize,
}

impl WorkerReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.invalid + self.timed_out
    }
}

/// Remote side of the protocol: one case at a time, one result per case.
pub struct Worker<T: Transport, E: Evaluator + 'static> {
    mailbox: Mailbox<T>,
    model: VariableContainer,
    evaluator: Arc<E>,
    timeouts: TimeoutPolicy,
    report: WorkerReport,
}

impl<T: Transport, E: Evaluator + 'static> Worker<T, E> {
    /// `model` must be built locally; its ids are replaced during
    /// [`Worker::synchronize_model`].
    pub fn new(
        transport: T,
        model: VariableContainer,
        evaluator: Arc<E>,
        timeout_factor: f64,
    ) -> Self {
        Self {
            mailbox: Mailbox::new(transport),
            model,
            evaluator,
            timeouts: TimeoutPolicy::new(timeout_factor),
            report: WorkerReport::default(),
        }
    }

    pub fn rank(&self) -> usize {
        self.mailbox.rank()
    }

    pub fn model(&self) -> &VariableContainer {
        &self.model
    }

    /// Waits for the coordinator's MODEL_SYNC and re-keys the local model.
    /// Any other tag from the coordinator at this point is a protocol error.
    pub async fn synchronize_model(&mut self) -> EngineResult<()> {
        let env = self.mailbox.recv(RecvFilter::from(COORDINATOR)).await?;
        let mso = env.into_model_sync()?;
        self.model.apply_sync(&mso)
    }

    /// Next assignment, or `None` once the coordinator sent TERMINATE.
    pub async fn receive_unevaluated(&mut self) -> EngineResult<Option<Case>> {
        let message = self
            .mailbox
            .recv_message(RecvFilter::from(COORDINATOR), Phase::Assignment)
            .await?;
        match message.tag {
            Tag::Terminate => Ok(None),
            tag => message.case.map(Some).ok_or_else(|| {
                ProtocolError::MissingPayload {
                    tag,
                    sender: message.source,
                }
                .into()
            }),
        }
    }

    /// Evaluates one case and returns the result message for the
    /// coordinator. Evaluator failures, panics included, become
    /// CASE_EVAL_INVALID or CASE_EVAL_TIMEOUT.
    pub async fn evaluate(&mut self, mut case: Case) -> EngineResult<Message> {
        let rank = self.rank();
        // Unknown ids mean the models diverged; that is not a case failure.
        let mut model = self.model.clone();
        model.apply_case(&case)?;

        let timeout = self.timeouts.timeout();
        let evaluator = Arc::clone(&self.evaluator);
        let started = Instant::now();
        let job_case = case.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            evaluator.evaluate(&job_case, &model, timeout)
        })
        .await
        .unwrap_or_else(|join_err| {
            error!("Evaluator panicked on case {}: {}", case.id().short(), join_err);
            Err(EvalFailure::invalid(ErrorMessage::Unknown, join_err.to_string()))
        });

        let message = match outcome {
            Ok(evaluation) => {
                case.set_objective_value(evaluation.objective);
                case.timing = evaluation.timing;
                case.state.eval = EvalStatus::Done;
                case.state.err_msg = ErrorMessage::NoError;
                self.timeouts.record(&evaluation.timing);
                self.report.succeeded += 1;
                debug!(
                    "Case {} = {} in {:.2?}",
                    case.id().short(),
                    evaluation.objective,
                    started.elapsed()
                );
                Message::new(Tag::CaseEvalSuccess, Some(case), rank, COORDINATOR)
            }
            Err(EvalFailure::Invalid { cause, detail }) => {
                warn!("❌ Case {} invalid: {}", case.id().short(), detail);
                case.state.eval = EvalStatus::Failed;
                case.state.err_msg = cause;
                self.report.invalid += 1;
                Message::new(Tag::CaseEvalInvalid, Some(case), rank, COORDINATOR)
            }
            Err(EvalFailure::TimedOut) => {
                warn!("⏱️ Case {} timed out after {:?}", case.id().short(), timeout);
                self.report.timed_out += 1;
                Message::new(Tag::CaseEvalTimeout, None, rank, COORDINATOR)
            }
        };
        Ok(message)
    }

    /// Full worker session: sync, serve assignments, acknowledge TERMINATE.
    pub async fn run(mut self) -> EngineResult<WorkerReport> {
        self.synchronize_model().await?;
        info!("👷 Worker rank {} ready", self.rank());

        while let Some(case) = self.receive_unevaluated().await? {
            let result = self.evaluate(case).await?;
            self.mailbox.send_message(result).await?;
        }

        let rank = self.rank();
        self.mailbox
            .send_message(Message::terminate(rank, COORDINATOR))
            .await?;
        info!(
            "👋 Worker rank {} done after {} cases",
            rank,
            self.report.total()
        );
        Ok(self.report)
    }
}
