use super::{CaseLog, EnsembleHelper, RunSummary, RunnerStats, Sentinel};
use crate::bookkeeper::Bookkeeper;
use crate::case::{Case, ErrorMessage, EvalStatus};
use crate::config::Config;
use crate::error::{EngineError, EngineResult, RegistryError};
use crate::evaluator::Evaluator;
use crate::model::{ModelDefinition, VariableContainer};
use crate::optimizer::{Optimizer, Session};
use crate::overseer::{Completion, EvaluatedCase, Overseer};
use crate::transport::{ChannelTransport, Transport};
use crate::worker::{Worker, WorkerReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

/// Inputs of a [`Coordinator`]; `CoordinatorParams::builder()...build()`
/// yields the coordinator directly.
#[derive(TypedBuilder)]
#[builder(build_method(into = Coordinator<O, T>))]
pub struct CoordinatorParams<O: Optimizer, T: Transport> {
    pub optimizer: O,
    pub overseer: Overseer<T>,
    pub model: VariableContainer,
    pub config: Config,
}

/// Rank 0 of a distributed run: owns the registry and drives the overseer.
pub struct Coordinator<O: Optimizer, T: Transport> {
    session: Session<O>,
    overseer: Overseer<T>,
    model: VariableContainer,
    bookkeeper: Bookkeeper,
    sentinel: Sentinel,
    stats: RunnerStats,
    log: Option<CaseLog>,
    ensemble: Option<EnsembleHelper>,
}

impl<O: Optimizer, T: Transport> From<CoordinatorParams<O, T>> for Coordinator<O, T> {
    fn from(p: CoordinatorParams<O, T>) -> Self {
        Self {
            session: Session::new(p.optimizer),
            overseer: p.overseer,
            model: p.model,
            bookkeeper: Bookkeeper::new(p.config.runtime.bookkeeper_tolerance),
            sentinel: Sentinel::new(&p.config.runtime, p.config.search.direction),
            stats: RunnerStats::default(),
            log: None,
            ensemble: None,
        }
    }
}

impl<O: Optimizer, T: Transport> Coordinator<O, T> {
    pub fn with_case_log(mut self, log: CaseLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Dispatches one copy of each case per realization of `ensemble`.
    pub fn with_ensemble(mut self, ensemble: EnsembleHelper) -> Self {
        self.ensemble = Some(ensemble);
        self
    }

    pub fn overseer(&self) -> &Overseer<T> {
        &self.overseer
    }

    pub fn session(&self) -> &Session<O> {
        &self.session
    }

    /// Hands a finished case back to the session and the case log.
    fn submit(&mut self, case: Case) -> EngineResult<()> {
        let id = case.id();
        self.stats.record(case.state.eval);
        self.session.submit_evaluated_case(case)?;
        let stored = self.session.handler().case(&id);
        if let (Some(log), Some(stored)) = (self.log.as_mut(), stored) {
            log.record(stored)?;
        }
        Ok(())
    }

    fn settle(&mut self, evaluated: EvaluatedCase) -> EngineResult<()> {
        let case = match evaluated.completion {
            Completion::Success(mut case) => {
                case.state.eval = EvalStatus::Done;
                case
            }
            Completion::Invalid(mut case) => {
                let cause = case.state.err_msg;
                self.sentinel.apply(&mut case, EvalStatus::Failed, cause);
                case
            }
            Completion::Timeout { case_id } => {
                let dispatched = self
                    .ensemble
                    .as_ref()
                    .and_then(|e| e.busy_case(&case_id))
                    .or_else(|| self.session.handler().case(&case_id));
                let mut case = dispatched
                    .cloned()
                    .ok_or(RegistryError::UnknownCase(case_id))?;
                self.sentinel
                    .apply(&mut case, EvalStatus::TimedOut, ErrorMessage::NoError);
                case
            }
        };
        debug!(
            "Rank {} returned case {} ({})",
            evaluated.worker,
            case.id().short(),
            case.state.eval
        );

        let released = match self.ensemble.as_mut() {
            Some(ensemble) if ensemble.is_busy_with(&case.id()) => {
                ensemble.submit_realization(&case)?;
                if !ensemble.is_case_done() {
                    return Ok(());
                }
                ensemble.take_evaluated_case()?
            }
            _ => case,
        };
        let mut case = released;
        self.sentinel.apply_if_unscored(&mut case);
        self.submit(case)
    }

    /// One pass of the scheduling policy.
    async fn step(&mut self) -> EngineResult<()> {
        if self.ensemble.is_some() {
            return self.step_ensemble().await;
        }
        let queued = self.session.nr_queued_cases();
        if queued > 0 && self.overseer.free_worker_count() > 0 {
            let Some(mut case) = self.session.get_case_for_evaluation()? else {
                return Ok(());
            };
            if self
                .bookkeeper
                .is_evaluated(self.session.handler(), &mut case, true)
            {
                debug!("Case {} bookkept", case.id().short());
                return self.submit(case);
            }
            self.overseer.assign(case, None).await?;
        } else if queued > 0 || self.overseer.busy_worker_count() > 0 {
            let evaluated = self.overseer.receive_evaluated().await?;
            self.settle(evaluated)?;
        } else {
            self.session.request_iteration()?;
        }
        Ok(())
    }

    /// Scheduling with an ensemble: the active case's realizations go out
    /// first, and the next case is only pulled once the active one has been
    /// released.
    async fn step_ensemble(&mut self) -> EngineResult<()> {
        let Some(ensemble) = self.ensemble.as_mut() else {
            return Ok(());
        };
        if ensemble.is_case_available_for_eval() && self.overseer.free_worker_count() > 0 {
            let case = ensemble.next_realization_case()?;
            self.overseer.assign(case, None).await?;
        } else if ensemble.is_active() {
            let evaluated = self.overseer.receive_evaluated().await?;
            self.settle(evaluated)?;
        } else if self.session.nr_queued_cases() > 0 {
            let Some(mut case) = self.session.get_case_for_evaluation()? else {
                return Ok(());
            };
            if self
                .bookkeeper
                .is_evaluated(self.session.handler(), &mut case, true)
            {
                debug!("Case {} bookkept", case.id().short());
                return self.submit(case);
            }
            ensemble.set_active_case(case)?;
        } else {
            self.session.request_iteration()?;
        }
        Ok(())
    }

    /// Model broadcast, scheduling loop, termination handshake.
    pub async fn run(mut self) -> EngineResult<RunSummary> {
        let mso = self.model.sync_object();
        self.overseer.broadcast_model(&mso).await?;

        info!(
            "🚀 Distributed run starting with {} workers",
            self.overseer.worker_count()
        );
        while !self.session.is_finished() {
            self.step().await?;
        }
        info!("Optimizer finished: {}", self.session.termination());

        self.overseer.terminate_all().await?;
        let late = self.overseer.confirm_all_terminated().await?;
        if !late.is_empty() {
            warn!("{} results arrived after the optimizer finished", late.len());
        }
        for evaluated in late {
            self.settle(evaluated)?;
        }

        let summary = RunSummary::collect(&self.session, &self.model, self.stats)?;
        info!("🏁 Distributed run finished: {}", summary.stats);
        Ok(summary)
    }
}

/// Coordinator plus `workers` in-process worker tasks over channels. Each
/// worker builds its own model from `definition` and synchronizes it.
pub async fn run_local<O, E, F>(
    definition: &ModelDefinition,
    config: &Config,
    workers: usize,
    evaluator: Arc<E>,
    build_optimizer: F,
) -> EngineResult<RunSummary>
where
    O: Optimizer,
    E: Evaluator + 'static,
    F: FnOnce(&VariableContainer) -> O,
{
    if workers == 0 {
        return Err(EngineError::Validation(
            "a distributed run needs at least one worker".to_string(),
        ));
    }

    let mut mesh = ChannelTransport::mesh(workers + 1).into_iter();
    let coordinator_end = mesh
        .next()
        .ok_or_else(|| EngineError::Transport("empty mesh".to_string()))?;

    let mut pool = JoinSet::new();
    for transport in mesh {
        let model = VariableContainer::from_definition(definition)?;
        let worker = Worker::new(
            transport,
            model,
            Arc::clone(&evaluator),
            config.runtime.simulation_timeout,
        );
        pool.spawn(worker.run());
    }

    let model = VariableContainer::from_definition(definition)?;
    let optimizer = build_optimizer(&model);
    let overseer = Overseer::new(
        coordinator_end,
        Duration::from_millis(config.runtime.simulator_delay_ms),
    );
    let case_log = match &config.runtime.case_log {
        Some(path) => Some(CaseLog::create(path)?),
        None => None,
    };

    let coordinator: Coordinator<O, ChannelTransport> = CoordinatorParams::builder()
        .optimizer(optimizer)
        .overseer(overseer)
        .model(model)
        .config(config.clone())
        .build();
    let coordinator = match case_log {
        Some(log) => coordinator.with_case_log(log),
        None => coordinator,
    };
    let coordinator = match EnsembleHelper::from_settings(&config.runtime)? {
        Some(ensemble) => coordinator.with_ensemble(ensemble),
        None => coordinator,
    };

    // A worker that fails would leave the coordinator waiting for its result.
    let run = coordinator.run();
    tokio::pin!(run);
    let summary = loop {
        tokio::select! {
            summary = &mut run => break summary?,
            Some(joined) = pool.join_next() => check_worker(joined)?,
        }
    };
    while let Some(joined) = pool.join_next().await {
        check_worker(joined)?;
    }
    Ok(summary)
}

fn check_worker(
    joined: Result<EngineResult<WorkerReport>, tokio::task::JoinError>,
) -> EngineResult<()> {
    match joined {
        Ok(Ok(report)) => {
            debug!("Worker finished after {} cases", report.total());
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(e) => Err(EngineError::Worker(e.to_string())),
    }
}
