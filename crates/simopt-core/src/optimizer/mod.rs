pub mod compass;

pub use self::compass::CompassSearch;

use crate::case::Case;
use crate::error::{EngineError, EngineResult};
use crate::registry::CaseHandler;
use serde::Serialize;
use strum_macros::Display;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TerminationCondition {
    NotFinished,
    MaxEvalsReached,
    MinimumStepLengthReached,
    MaxIterationsReached,
}

/// A search strategy that proposes cases and learns from their results.
pub trait Optimizer: Send {
    /// Generates the next batch of cases into `handler`'s queue.
    fn iterate(&mut self, handler: &mut CaseHandler) -> EngineResult<()>;

    /// Called once for every case that leaves flight, in completion order.
    fn handle_evaluated_case(&mut self, case: &Case);

    fn is_finished(&self) -> TerminationCondition;

    fn tentative_best_case(&self) -> Option<&Case>;

    /// Asynchronous optimizers accept new results at any time; synchronous
    /// ones only iterate once every dispatched case has returned.
    fn is_async(&self) -> bool {
        false
    }
}

/// An optimizer together with the registry it feeds.
pub struct Session<O: Optimizer> {
    optimizer: O,
    handler: CaseHandler,
    iterations: usize,
}

impl<O: Optimizer> Session<O> {
    pub fn new(optimizer: O) -> Self {
        Self {
            optimizer,
            handler: CaseHandler::new(),
            iterations: 0,
        }
    }

    /// Lets the optimizer propose a new batch, then starts a new checkpoint.
    ///
    /// An iteration that leaves nothing queued or in flight while the
    /// optimizer still reports `NotFinished` can never make progress, so it
    /// fails with [`EngineError::Stalled`].
    pub fn request_iteration(&mut self) -> EngineResult<()> {
        self.optimizer.iterate(&mut self.handler)?;
        self.handler.clear_checkpoint();
        self.iterations += 1;
        debug!(
            "Iteration {} queued {} cases",
            self.iterations,
            self.handler.nr_queued()
        );
        let idle = self.handler.nr_queued() == 0 && self.handler.nr_in_flight() == 0;
        if idle && !self.is_finished() {
            return Err(EngineError::Stalled {
                iteration: self.iterations,
            });
        }
        Ok(())
    }

    /// Next queued case, iterating first when the queue is empty. `None`
    /// once the optimizer has finished.
    pub fn get_case_for_evaluation(&mut self) -> EngineResult<Option<Case>> {
        if self.handler.nr_queued() == 0 {
            self.request_iteration()?;
        }
        if self.handler.nr_queued() == 0 {
            return Ok(None);
        }
        Ok(Some(self.handler.next_for_evaluation()?))
    }

    /// Records the outcome of an in-flight case and reports it to the optimizer.
    pub fn submit_evaluated_case(&mut self, case: Case) -> EngineResult<()> {
        let id = case.id();
        self.handler.update_case(&case)?;
        self.handler.mark_evaluated(id)?;
        if let Some(stored) = self.handler.case(&id) {
            self.optimizer.handle_evaluated_case(stored);
        }
        Ok(())
    }

    pub fn nr_queued_cases(&self) -> usize {
        self.handler.nr_queued()
    }

    pub fn is_finished(&self) -> bool {
        self.termination() != TerminationCondition::NotFinished
    }

    pub fn termination(&self) -> TerminationCondition {
        self.optimizer.is_finished()
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn handler(&self) -> &CaseHandler {
        &self.handler
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn best_case(&self) -> Option<Case> {
        self.optimizer.tentative_best_case().cloned()
    }
}
