use crate::case::{Case, EvalStatus};
use crate::registry::CaseHandler;
use rayon::prelude::*;
use tracing::debug;

/// Deduplication against the registry's completed cases.
///
/// Cases still queued or in flight are not consulted, so two equal cases
/// dispatched back to back are both evaluated.
#[derive(Debug, Clone, Copy)]
pub struct Bookkeeper {
    tolerance: f64,
}

impl Bookkeeper {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.max(0.0),
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// First completed case, in completion order, that is value-equal to
    /// `case`, carries an objective value and belongs to the same ensemble
    /// realization.
    pub fn find_match<'a>(&self, registry: &'a CaseHandler, case: &Case) -> Option<&'a Case> {
        let completed = registry.completed_cases();
        completed
            .par_iter()
            .find_first(|c| {
                c.id() != case.id()
                    && c.has_objective_value()
                    && c.ensemble_realization() == case.ensemble_realization()
                    && c.equals(case, self.tolerance)
            })
            .copied()
    }

    /// Whether an equivalent case was already evaluated. With
    /// `also_copy_value` the match's objective is copied into `case` and the
    /// case is marked bookkept; otherwise `case` is left untouched.
    pub fn is_evaluated(
        &self,
        registry: &CaseHandler,
        case: &mut Case,
        also_copy_value: bool,
    ) -> bool {
        let Some(hit) = self.find_match(registry, case) else {
            return false;
        };
        if also_copy_value {
            // find_match only returns cases holding a value
            if let Ok(value) = hit.objective_value() {
                case.set_objective_value(value);
                case.state.eval = EvalStatus::Bookkept;
                case.state.err_msg = hit.state.err_msg;
            }
        }
        debug!(
            "📒 Case {} matches evaluated case {}",
            case.id().short(),
            hit.id().short()
        );
        true
    }
}
