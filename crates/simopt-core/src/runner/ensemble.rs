use crate::case::{Case, ErrorMessage, EvalStatus};
use crate::config::RuntimeSettings;
use crate::error::EnsembleError;
use crate::token::Token;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Fans one case out over every ensemble realization and folds the results
/// back into that case, scored by the mean objective.
///
/// One case is active at a time. Realization copies get fresh ids so they
/// can be dispatched and tracked like any other case; the active case keeps
/// its id and is released by [`take_evaluated_case`](Self::take_evaluated_case)
/// once every copy has come back.
#[derive(Debug)]
pub struct EnsembleHelper {
    realizations: Vec<String>,
    active: Option<Case>,
    /// Aliases still to dispatch, popped from the back.
    queue: Vec<String>,
    busy: BTreeMap<Token, Case>,
    objectives: BTreeMap<String, f64>,
    last_failure: Option<(EvalStatus, ErrorMessage)>,
    started: Instant,
}

impl EnsembleHelper {
    pub fn new(realizations: Vec<String>) -> Result<Self, EnsembleError> {
        if realizations.is_empty() {
            return Err(EnsembleError::NoRealizations);
        }
        if let Some(dup) = realizations.iter().duplicates().next() {
            return Err(EnsembleError::DuplicateRealization(dup.clone()));
        }
        Ok(Self {
            realizations,
            active: None,
            queue: Vec::new(),
            busy: BTreeMap::new(),
            objectives: BTreeMap::new(),
            last_failure: None,
            started: Instant::now(),
        })
    }

    /// `None` when the settings name no realizations.
    pub fn from_settings(settings: &RuntimeSettings) -> Result<Option<Self>, EnsembleError> {
        if settings.realizations.is_empty() {
            return Ok(None);
        }
        Self::new(settings.realizations.clone()).map(Some)
    }

    pub fn realizations(&self) -> &[String] {
        &self.realizations
    }

    /// Makes `case` the active case and queues one copy per realization.
    pub fn set_active_case(&mut self, case: Case) -> Result<(), EnsembleError> {
        if let Some(active) = &self.active {
            return Err(EnsembleError::StillActive(active.id()));
        }
        debug!(
            "🎲 Case {} fans out over {} realizations",
            case.id().short(),
            self.realizations.len()
        );
        self.queue = self.realizations.iter().rev().cloned().collect();
        self.objectives.clear();
        self.last_failure = None;
        self.started = Instant::now();
        self.active = Some(case);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Every realization of the active case has been submitted.
    pub fn is_case_done(&self) -> bool {
        self.queue.is_empty() && self.busy.is_empty()
    }

    pub fn is_case_available_for_eval(&self) -> bool {
        self.active.is_some() && !self.queue.is_empty()
    }

    pub fn nr_queued(&self) -> usize {
        self.queue.len()
    }

    pub fn nr_busy(&self) -> usize {
        self.busy.len()
    }

    /// A copy of the active case tagged with the next realization.
    pub fn next_realization_case(&mut self) -> Result<Case, EnsembleError> {
        let Some(active) = &self.active else {
            return Err(EnsembleError::NoActiveCase);
        };
        let alias = self.queue.pop().ok_or(EnsembleError::NothingQueued)?;
        let mut case = active.sibling();
        case.set_ensemble_realization(alias);
        self.busy.insert(case.id(), case.clone());
        Ok(case)
    }

    pub fn is_busy_with(&self, id: &Token) -> bool {
        self.busy.contains_key(id)
    }

    /// The dispatched copy with this id, as it was handed out.
    pub fn busy_case(&self, id: &Token) -> Option<&Case> {
        self.busy.get(id)
    }

    /// Records the outcome of one realization. Only successful evaluations
    /// count towards the mean.
    pub fn submit_realization(&mut self, case: &Case) -> Result<(), EnsembleError> {
        self.busy
            .remove(&case.id())
            .ok_or(EnsembleError::NotBusy(case.id()))?;
        let alias = case.ensemble_realization().to_string();
        match (case.state.eval, case.objective_value()) {
            (EvalStatus::Done, Ok(value)) => {
                self.objectives.insert(alias, value);
            }
            (status, _) => {
                warn!("Realization {} ended {}, left out of the mean", alias, status);
                self.last_failure = Some((status, case.state.err_msg));
            }
        }
        Ok(())
    }

    /// Objectives collected for the active (or last released) case.
    pub fn realization_objectives(&self) -> &BTreeMap<String, f64> {
        &self.objectives
    }

    /// Releases the active case once every realization is in.
    ///
    /// The case gets the mean over the successful realizations. When none
    /// succeeded it carries the last failure's status and no objective.
    pub fn take_evaluated_case(&mut self) -> Result<Case, EnsembleError> {
        let Some(active) = &self.active else {
            return Err(EnsembleError::NoActiveCase);
        };
        if !self.is_case_done() {
            return Err(EnsembleError::CaseNotDone(active.id()));
        }
        let Some(mut case) = self.active.take() else {
            return Err(EnsembleError::NoActiveCase);
        };
        case.timing.sim_time = self.started.elapsed().as_secs();

        if self.objectives.is_empty() {
            let (status, cause) = self
                .last_failure
                .unwrap_or((EvalStatus::Failed, ErrorMessage::Unknown));
            case.state.eval = status;
            case.state.err_msg = cause;
            warn!("No realization of case {} succeeded", case.id().short());
            return Ok(case);
        }

        let mean = self.objectives.values().sum::<f64>() / self.objectives.len() as f64;
        case.set_objective_value(mean);
        case.state.eval = EvalStatus::Done;
        info!(
            "🎲 Case {} scored {} over {} realizations",
            case.id().short(),
            mean,
            self.objectives.len()
        );
        Ok(case)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper() -> EnsembleHelper {
        EnsembleHelper::new(vec!["R1".into(), "R2".into(), "R3".into()]).unwrap()
    }

    fn case() -> Case {
        let key = Token::generate();
        Case::new(BTreeMap::new(), BTreeMap::new(), BTreeMap::from([(key, 1.0)]))
    }

    fn finish(mut c: Case, value: f64) -> Case {
        c.set_objective_value(value);
        c.state.eval = EvalStatus::Done;
        c
    }

    #[test]
    fn test_rejects_empty_and_duplicate_aliases() {
        assert_eq!(
            EnsembleHelper::new(Vec::new()).unwrap_err(),
            EnsembleError::NoRealizations
        );
        assert_eq!(
            EnsembleHelper::new(vec!["A".into(), "A".into()]).unwrap_err(),
            EnsembleError::DuplicateRealization("A".into())
        );
    }

    #[test]
    fn test_fans_out_in_listed_order() {
        let mut ens = helper();
        let active = case();
        ens.set_active_case(active.clone()).unwrap();

        let copies: Vec<Case> = (0..3).map(|_| ens.next_realization_case().unwrap()).collect();
        let tags: Vec<&str> = copies.iter().map(|c| c.ensemble_realization()).collect();
        assert_eq!(tags, vec!["R1", "R2", "R3"]);
        for c in &copies {
            assert_ne!(c.id(), active.id());
            assert!(c.equals(&active, 0.0));
        }
        assert_eq!(ens.nr_busy(), 3);
        assert!(!ens.is_case_available_for_eval());
        assert_eq!(
            ens.next_realization_case().unwrap_err(),
            EnsembleError::NothingQueued
        );
    }

    #[test]
    fn test_releases_mean_only_when_all_are_in() {
        let mut ens = helper();
        let active = case();
        ens.set_active_case(active.clone()).unwrap();
        let copies: Vec<Case> = (0..3).map(|_| ens.next_realization_case().unwrap()).collect();

        ens.submit_realization(&finish(copies[0].clone(), 1.0)).unwrap();
        ens.submit_realization(&finish(copies[1].clone(), 2.0)).unwrap();
        assert_eq!(
            ens.take_evaluated_case().unwrap_err(),
            EnsembleError::CaseNotDone(active.id())
        );
        ens.submit_realization(&finish(copies[2].clone(), 6.0)).unwrap();

        let released = ens.take_evaluated_case().unwrap();
        assert_eq!(released.id(), active.id());
        assert_eq!(released.objective_value().unwrap(), 3.0);
        assert_eq!(released.state.eval, EvalStatus::Done);
        assert_eq!(released.ensemble_realization(), "");
        assert_eq!(ens.realization_objectives()["R3"], 6.0);
        assert!(!ens.is_active());
    }

    #[test]
    fn test_failed_realizations_are_left_out() {
        let mut ens = helper();
        ens.set_active_case(case()).unwrap();
        let mut copies: Vec<Case> = (0..3).map(|_| ens.next_realization_case().unwrap()).collect();

        copies[1].state.eval = EvalStatus::TimedOut;
        ens.submit_realization(&copies[1]).unwrap();
        ens.submit_realization(&finish(copies[0].clone(), 4.0)).unwrap();
        ens.submit_realization(&finish(copies[2].clone(), 8.0)).unwrap();

        let released = ens.take_evaluated_case().unwrap();
        assert_eq!(released.objective_value().unwrap(), 6.0);
        assert!(!ens.realization_objectives().contains_key("R2"));
    }

    #[test]
    fn test_all_failed_leaves_case_unscored() {
        let mut ens = EnsembleHelper::new(vec!["R1".into()]).unwrap();
        ens.set_active_case(case()).unwrap();
        let mut copy = ens.next_realization_case().unwrap();
        copy.state.eval = EvalStatus::Failed;
        copy.state.err_msg = ErrorMessage::SimulationError;
        ens.submit_realization(&copy).unwrap();

        let released = ens.take_evaluated_case().unwrap();
        assert!(!released.has_objective_value());
        assert_eq!(released.state.eval, EvalStatus::Failed);
        assert_eq!(released.state.err_msg, ErrorMessage::SimulationError);
    }

    #[test]
    fn test_one_active_case_at_a_time() {
        let mut ens = helper();
        let first = case();
        ens.set_active_case(first.clone()).unwrap();
        assert_eq!(
            ens.set_active_case(case()).unwrap_err(),
            EnsembleError::StillActive(first.id())
        );
    }

    #[test]
    fn test_unknown_copy_is_rejected() {
        let mut ens = helper();
        ens.set_active_case(case()).unwrap();
        let stranger = case();
        assert_eq!(
            ens.submit_realization(&stranger).unwrap_err(),
            EnsembleError::NotBusy(stranger.id())
        );
    }
}
