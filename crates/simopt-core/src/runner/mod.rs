pub mod case_log;
pub mod distributed;
pub mod ensemble;
pub mod serial;

pub use self::case_log::CaseLog;
pub use self::distributed::{run_local, Coordinator};
pub use self::ensemble::EnsembleHelper;
pub use self::serial::SerialRunner;

use crate::case::{Case, ErrorMessage, EvalStatus, VariableValue};
use crate::config::{Direction, RuntimeSettings};
use crate::error::EngineResult;
use crate::model::VariableContainer;
use crate::optimizer::{Optimizer, Session, TerminationCondition};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub simulated: usize,
    pub bookkept: usize,
    pub invalid: usize,
    pub timed_out: usize,
}

impl RunnerStats {
    pub fn total(&self) -> usize {
        self.simulated + self.bookkept + self.invalid + self.timed_out
    }

    pub fn record(&mut self, status: EvalStatus) {
        match status {
            EvalStatus::Bookkept => self.bookkept += 1,
            EvalStatus::Failed => self.invalid += 1,
            EvalStatus::TimedOut => self.timed_out += 1,
            _ => self.simulated += 1,
        }
    }
}

impl fmt::Display for RunnerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} simulated, {} bookkept, {} invalid, {} timed out",
            self.simulated, self.bookkept, self.invalid, self.timed_out
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stats: RunnerStats,
    pub termination: TerminationCondition,
    pub iterations: usize,
    pub best_case: Option<Case>,
    /// The best case's values under their display names.
    pub best_variables: BTreeMap<String, VariableValue>,
}

impl RunSummary {
    fn collect<O: Optimizer>(
        session: &Session<O>,
        model: &VariableContainer,
        stats: RunnerStats,
    ) -> EngineResult<Self> {
        let best_case = session.best_case();
        let best_variables = match &best_case {
            Some(case) => model.named_values(case)?,
            None => BTreeMap::new(),
        };
        Ok(Self {
            stats,
            termination: session.termination(),
            iterations: session.iterations(),
            best_case,
            best_variables,
        })
    }

    pub fn best_objective(&self) -> Option<f64> {
        self.best_case.as_ref().and_then(|c| c.objective_value().ok())
    }
}

/// Objective handling for cases that did not produce a value.
#[derive(Debug, Clone, Copy)]
pub struct Sentinel {
    value: f64,
}

impl Sentinel {
    pub fn new(settings: &RuntimeSettings, direction: Direction) -> Self {
        Self {
            value: direction.sentinel(settings.sentinel_value),
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Marks `case` failed with `status` and gives it the sentinel objective.
    pub fn apply(&self, case: &mut Case, status: EvalStatus, cause: ErrorMessage) {
        case.set_objective_value(self.value);
        case.state.eval = status;
        if status == EvalStatus::Failed && cause == ErrorMessage::NoError {
            case.state.err_msg = ErrorMessage::Unknown;
        } else {
            case.state.err_msg = cause;
        }
    }

    /// Gives a released ensemble case the sentinel when none of its
    /// realizations produced a value.
    pub fn apply_if_unscored(&self, case: &mut Case) {
        if !case.has_objective_value() {
            let (status, cause) = (case.state.eval, case.state.err_msg);
            self.apply(case, status, cause);
        }
    }
}
