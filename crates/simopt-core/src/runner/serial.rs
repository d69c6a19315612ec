use super::{CaseLog, EnsembleHelper, RunSummary, RunnerStats, Sentinel};
use crate::bookkeeper::Bookkeeper;
use crate::case::{Case, ErrorMessage, EvalStatus};
use crate::config::{Direction, RuntimeSettings};
use crate::error::EngineResult;
use crate::evaluator::{EvalFailure, Evaluator, TimeoutPolicy};
use crate::model::VariableContainer;
use crate::optimizer::{Optimizer, Session};
use tracing::{debug, info, warn};

/// Single-process runner: one case at a time, evaluated in the caller's
/// thread.
pub struct SerialRunner<O: Optimizer, E: Evaluator> {
    session: Session<O>,
    model: VariableContainer,
    evaluator: E,
    bookkeeper: Bookkeeper,
    sentinel: Sentinel,
    timeouts: TimeoutPolicy,
    stats: RunnerStats,
    log: Option<CaseLog>,
    ensemble: Option<EnsembleHelper>,
}

impl<O: Optimizer, E: Evaluator> SerialRunner<O, E> {
    pub fn new(
        optimizer: O,
        model: VariableContainer,
        evaluator: E,
        settings: &RuntimeSettings,
        direction: Direction,
    ) -> Self {
        Self {
            session: Session::new(optimizer),
            model,
            evaluator,
            bookkeeper: Bookkeeper::new(settings.bookkeeper_tolerance),
            sentinel: Sentinel::new(settings, direction),
            timeouts: TimeoutPolicy::new(settings.simulation_timeout),
            stats: RunnerStats::default(),
            log: None,
            ensemble: None,
        }
    }

    pub fn with_case_log(mut self, log: CaseLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Evaluates every case once per realization of `ensemble`.
    pub fn with_ensemble(mut self, ensemble: EnsembleHelper) -> Self {
        self.ensemble = Some(ensemble);
        self
    }

    pub fn session(&self) -> &Session<O> {
        &self.session
    }

    /// Runs the simulator on `case` and records the outcome in it.
    fn simulate(&mut self, case: &mut Case) -> EngineResult<()> {
        self.model.apply_case(case)?;
        let timeout = self.timeouts.timeout();
        match self.evaluator.evaluate(case, &self.model, timeout) {
            Ok(evaluation) => {
                case.set_objective_value(evaluation.objective);
                case.timing = evaluation.timing;
                case.state.eval = EvalStatus::Done;
                self.timeouts.record(&evaluation.timing);
            }
            Err(EvalFailure::Invalid { cause, detail }) => {
                warn!("❌ Case {} invalid: {}", case.id().short(), detail);
                self.sentinel.apply(case, EvalStatus::Failed, cause);
            }
            Err(EvalFailure::TimedOut) => {
                warn!("⏱️ Case {} timed out after {:?}", case.id().short(), timeout);
                self.sentinel
                    .apply(case, EvalStatus::TimedOut, ErrorMessage::NoError);
            }
        }
        Ok(())
    }

    /// Simulates every realization of `case`, then replaces it with the
    /// aggregated result.
    fn simulate_ensemble(&mut self, case: &mut Case) -> EngineResult<()> {
        let Some(mut ensemble) = self.ensemble.take() else {
            return self.simulate(case);
        };
        ensemble.set_active_case(case.clone())?;
        while ensemble.is_case_available_for_eval() {
            let mut realization = ensemble.next_realization_case()?;
            self.simulate(&mut realization)?;
            ensemble.submit_realization(&realization)?;
        }
        *case = ensemble.take_evaluated_case()?;
        self.sentinel.apply_if_unscored(case);
        self.ensemble = Some(ensemble);
        Ok(())
    }

    pub fn run(mut self) -> EngineResult<RunSummary> {
        info!("🚀 Serial run starting");
        while !self.session.is_finished() {
            let Some(mut case) = self.session.get_case_for_evaluation()? else {
                break;
            };

            if self
                .bookkeeper
                .is_evaluated(self.session.handler(), &mut case, true)
            {
                debug!("Case {} bookkept", case.id().short());
            } else if self.ensemble.is_some() {
                self.simulate_ensemble(&mut case)?;
            } else {
                self.simulate(&mut case)?;
            }

            let id = case.id();
            self.stats.record(case.state.eval);
            self.session.submit_evaluated_case(case)?;
            let stored = self.session.handler().case(&id);
            if let (Some(log), Some(stored)) = (self.log.as_mut(), stored) {
                log.record(stored)?;
            }
        }

        let summary = RunSummary::collect(&self.session, &self.model, self.stats)?;
        info!(
            "🏁 Serial run finished ({}): {}",
            summary.termination, summary.stats
        );
        Ok(summary)
    }
}
