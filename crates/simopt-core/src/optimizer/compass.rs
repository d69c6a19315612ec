use super::{Optimizer, TerminationCondition};
use crate::case::{Case, Sign};
use crate::config::{Direction, SearchParams};
use crate::error::EngineResult;
use crate::registry::CaseHandler;
use crate::token::Token;
use tracing::{debug, info};

/// Pattern search along the coordinate axes.
///
/// Each iteration evaluates `best ± step` for every real and integer
/// variable. When an iteration fails to move the incumbent the step shrinks
/// by the contraction factor.
pub struct CompassSearch {
    params: SearchParams,
    base: Case,
    axes: Vec<Token>,
    step: f64,
    iteration: usize,
    evaluations: usize,
    max_iterations: Option<usize>,
    best: Option<Case>,
}

impl CompassSearch {
    pub fn new(base: Case, params: &SearchParams) -> Self {
        let axes = base
            .integer_variables()
            .keys()
            .chain(base.real_variables().keys())
            .copied()
            .collect();
        Self {
            step: params.initial_step_length,
            params: params.clone(),
            base,
            axes,
            iteration: 0,
            evaluations: 0,
            max_iterations: None,
            best: None,
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn step_length(&self) -> f64 {
        self.step
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn direction(&self) -> Direction {
        self.params.direction
    }

    fn improved_last_iteration(&self, handler: &CaseHandler) -> bool {
        match &self.best {
            Some(best) => handler
                .completed_since_checkpoint()
                .iter()
                .any(|c| c.id() == best.id()),
            None => false,
        }
    }

    fn trial_points(&self, center: &Case) -> Vec<Case> {
        self.axes
            .iter()
            .flat_map(|key| {
                let is_integer = center.integer_variables().contains_key(key);
                if is_integer && self.step.round() == 0.0 {
                    return Vec::new();
                }
                center.perturb(*key, Sign::PlusMinus, self.step)
            })
            .collect()
    }
}

impl Optimizer for CompassSearch {
    fn iterate(&mut self, handler: &mut CaseHandler) -> EngineResult<()> {
        if self.iteration == 0 {
            info!("🧭 Compass search starting from base case");
            handler.enqueue(self.base.clone())?;
            self.iteration += 1;
            return Ok(());
        }

        if !self.improved_last_iteration(handler) {
            self.step *= self.params.contraction_factor;
            debug!("No improvement, step contracted to {}", self.step);
        }
        self.iteration += 1;

        let center = self.best.as_ref().unwrap_or(&self.base).clone();
        let mut trials = Vec::new();
        while self.is_finished() == TerminationCondition::NotFinished {
            trials = self.trial_points(&center);
            if !trials.is_empty() {
                break;
            }
            // integer axes vanish once the step rounds to zero
            self.step *= self.params.contraction_factor;
        }
        if trials.is_empty() {
            return Ok(());
        }
        debug!(
            "Iteration {}: {} trial points at step {}",
            self.iteration,
            trials.len(),
            self.step
        );
        handler.enqueue_many(trials)?;
        Ok(())
    }

    fn handle_evaluated_case(&mut self, case: &Case) {
        self.evaluations += 1;
        let Ok(value) = case.objective_value() else {
            return;
        };
        let better = match self.best.as_ref().and_then(|b| b.objective_value().ok()) {
            Some(incumbent) => self.params.direction.improves(value, incumbent),
            None => true,
        };
        if better {
            info!("⭐ New best objective {} (case {})", value, case.id().short());
            self.best = Some(case.clone());
        }
    }

    fn is_finished(&self) -> TerminationCondition {
        if self.evaluations >= self.params.max_evaluations {
            TerminationCondition::MaxEvalsReached
        } else if self.step < self.params.minimum_step_length {
            TerminationCondition::MinimumStepLengthReached
        } else if self.max_iterations.is_some_and(|m| self.iteration > m) {
            TerminationCondition::MaxIterationsReached
        } else {
            TerminationCondition::NotFinished
        }
    }

    fn tentative_best_case(&self) -> Option<&Case> {
        self.best.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn base(x: f64) -> (Token, Case) {
        let key = Token::generate();
        let case = Case::new(BTreeMap::new(), BTreeMap::new(), BTreeMap::from([(key, x)]));
        (key, case)
    }

    #[test]
    fn test_first_iteration_queues_base_case() {
        let (_, case) = base(1.0);
        let id = case.id();
        let mut search = CompassSearch::new(case, &SearchParams::default());
        let mut handler = CaseHandler::new();
        search.iterate(&mut handler).unwrap();
        assert_eq!(handler.queued_ids(), vec![id]);
    }

    #[test]
    fn test_unsuccessful_iteration_contracts() {
        let (key, case) = base(1.0);
        let mut search = CompassSearch::new(case, &SearchParams::default());
        let mut handler = CaseHandler::new();

        search.iterate(&mut handler).unwrap();
        let mut c = handler.next_for_evaluation().unwrap();
        c.set_objective_value(1.0);
        handler.update_case(&c).unwrap();
        handler.mark_evaluated(c.id()).unwrap();
        search.handle_evaluated_case(handler.case(&c.id()).unwrap());

        // the base case became the incumbent, so the step is kept
        search.iterate(&mut handler).unwrap();
        handler.clear_checkpoint();
        assert_eq!(search.step_length(), 1.0);
        assert_eq!(handler.nr_queued(), 2);

        let values: Vec<f64> = handler
            .queued_cases()
            .iter()
            .map(|c| c.real_variables()[&key])
            .collect();
        assert_eq!(values, vec![2.0, 0.0]);

        // nothing evaluated since the checkpoint
        search.iterate(&mut handler).unwrap();
        assert_eq!(search.step_length(), 0.5);
    }

    #[test]
    fn test_integer_only_search_contracts_past_zero_step() {
        let key = Token::generate();
        let case = Case::new(BTreeMap::new(), BTreeMap::from([(key, 4)]), BTreeMap::new());
        let params = SearchParams {
            initial_step_length: 0.4,
            ..Default::default()
        };
        let mut search = CompassSearch::new(case, &params);
        let mut handler = CaseHandler::new();
        search.iterate(&mut handler).unwrap();
        let c = handler.next_for_evaluation().unwrap();
        handler.mark_evaluated(c.id()).unwrap();
        handler.clear_checkpoint();

        // 0.4 rounds to zero, so no integer trial exists until the step is exhausted
        search.iterate(&mut handler).unwrap();
        assert_eq!(handler.nr_queued(), 0);
        assert_eq!(
            search.is_finished(),
            TerminationCondition::MinimumStepLengthReached
        );
    }

    #[test]
    fn test_minimize_prefers_lower() {
        let (_, case) = base(0.0);
        let params = SearchParams {
            direction: Direction::Minimize,
            ..Default::default()
        };
        let mut search = CompassSearch::new(case.clone(), &params);
        let mut a = case.sibling();
        a.set_objective_value(5.0);
        let mut b = case.sibling();
        b.set_objective_value(3.0);
        search.handle_evaluated_case(&a);
        search.handle_evaluated_case(&b);
        assert_eq!(search.tentative_best_case().unwrap().id(), b.id());
    }
}
