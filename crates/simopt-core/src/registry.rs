use crate::case::{Case, EvalStatus, QueueStatus};
use crate::error::RegistryError;
use crate::token::Token;
use fnv::FnvHashMap;
use std::collections::VecDeque;
use tracing::debug;

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Owner of every case created during a run.
///
/// Each registered id lives in exactly one of the queue, the in-flight list
/// or the completed list. Cases are never removed.
#[derive(Debug, Default)]
pub struct CaseHandler {
    cases: FnvHashMap<Token, Case>,
    queue: VecDeque<Token>,
    in_flight: Vec<Token>,
    completed: Vec<Token>,
    completed_since_checkpoint: Vec<Token>,
}

impl CaseHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, mut case: Case) -> RegistryResult<()> {
        let id = case.id();
        if self.cases.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        case.state.queue = QueueStatus::Queued;
        self.cases.insert(id, case);
        self.queue.push_back(id);
        Ok(())
    }

    /// Enqueues in iteration order. Stops at the first duplicate id; cases
    /// before it stay queued.
    pub fn enqueue_many<I: IntoIterator<Item = Case>>(&mut self, cases: I) -> RegistryResult<()> {
        for case in cases {
            self.enqueue(case)?;
        }
        Ok(())
    }

    /// Pops the queue head and marks it in flight. The registry keeps its own
    /// copy; the returned value is the one sent out for evaluation.
    pub fn next_for_evaluation(&mut self) -> RegistryResult<Case> {
        let id = self.queue.pop_front().ok_or(RegistryError::EmptyQueue)?;
        self.in_flight.push(id);
        let case = self
            .cases
            .get_mut(&id)
            .ok_or(RegistryError::UnknownCase(id))?;
        case.state.queue = QueueStatus::InFlight;
        case.state.eval = EvalStatus::Current;
        debug!("Case {} dispatched from queue", id.short());
        Ok(case.clone())
    }

    /// Stores the outcome carried by `case` over the registry copy. The case
    /// must be in flight; its variable values are left untouched.
    pub fn update_case(&mut self, case: &Case) -> RegistryResult<()> {
        let id = case.id();
        if !self.in_flight.contains(&id) {
            return Err(RegistryError::NotInFlight(id));
        }
        let stored = self
            .cases
            .get_mut(&id)
            .ok_or(RegistryError::UnknownCase(id))?;
        if let Ok(v) = case.objective_value() {
            stored.set_objective_value(v);
        }
        stored.timing = case.timing;
        stored.state.eval = case.state.eval;
        stored.state.cons = case.state.cons;
        stored.state.err_msg = case.state.err_msg;
        Ok(())
    }

    pub fn mark_evaluated(&mut self, id: Token) -> RegistryResult<()> {
        let pos = self
            .in_flight
            .iter()
            .position(|x| *x == id)
            .ok_or(RegistryError::NotInFlight(id))?;
        self.in_flight.remove(pos);
        self.completed.push(id);
        self.completed_since_checkpoint.push(id);
        if let Some(case) = self.cases.get_mut(&id) {
            case.state.queue = QueueStatus::Retired;
            if !case.state.eval.is_terminal() {
                case.state.eval = EvalStatus::Done;
            }
        }
        Ok(())
    }

    pub fn clear_checkpoint(&mut self) {
        self.completed_since_checkpoint.clear();
    }

    pub fn case(&self, id: &Token) -> Option<&Case> {
        self.cases.get(id)
    }

    pub fn contains(&self, id: &Token) -> bool {
        self.cases.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn nr_queued(&self) -> usize {
        self.queue.len()
    }

    pub fn nr_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn nr_completed(&self) -> usize {
        self.completed.len()
    }

    pub fn queued_ids(&self) -> Vec<Token> {
        self.queue.iter().copied().collect()
    }

    pub fn in_flight_ids(&self) -> Vec<Token> {
        self.in_flight.clone()
    }

    pub fn completed_ids(&self) -> Vec<Token> {
        self.completed.clone()
    }

    pub fn completed_since_checkpoint_ids(&self) -> Vec<Token> {
        self.completed_since_checkpoint.clone()
    }

    fn resolve<'a>(&'a self, ids: impl Iterator<Item = &'a Token>) -> Vec<&'a Case> {
        ids.filter_map(|id| self.cases.get(id)).collect()
    }

    pub fn queued_cases(&self) -> Vec<&Case> {
        self.resolve(self.queue.iter())
    }

    pub fn in_flight_cases(&self) -> Vec<&Case> {
        self.resolve(self.in_flight.iter())
    }

    pub fn completed_cases(&self) -> Vec<&Case> {
        self.resolve(self.completed.iter())
    }

    pub fn completed_since_checkpoint(&self) -> Vec<&Case> {
        self.resolve(self.completed_since_checkpoint.iter())
    }
}
