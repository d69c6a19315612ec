#![allow(dead_code)]

use simopt_core::case::{Case, ErrorMessage, Timing, VariableValue};
use simopt_core::evaluator::{EvalFailure, Evaluation};
use simopt_core::model::{ModelDefinition, VariableContainer, VariableDefinition};
use simopt_core::registry::CaseHandler;
use simopt_core::token::Token;
use std::collections::BTreeMap;
use std::time::Duration;

/// Two real controls and one integer segment count.
pub fn definition() -> ModelDefinition {
    ModelDefinition {
        name: "two_well".to_string(),
        variables: vec![
            VariableDefinition {
                name: "BHP#PROD".to_string(),
                value: VariableValue::Real(0.0),
            },
            VariableDefinition {
                name: "BHP#INJ".to_string(),
                value: VariableValue::Real(0.0),
            },
            VariableDefinition {
                name: "SEG#PROD".to_string(),
                value: VariableValue::Integer(2),
            },
        ],
    }
}

pub fn model() -> VariableContainer {
    VariableContainer::from_definition(&definition()).unwrap()
}

/// Builder for ad-hoc cases over explicit keys.
#[derive(Default)]
pub struct CaseBuilder {
    binary: BTreeMap<Token, bool>,
    integer: BTreeMap<Token, i64>,
    real: BTreeMap<Token, f64>,
    objective: Option<f64>,
    realization: Option<String>,
}

impl CaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn real(mut self, key: Token, value: f64) -> Self {
        self.real.insert(key, value);
        self
    }

    pub fn integer(mut self, key: Token, value: i64) -> Self {
        self.integer.insert(key, value);
        self
    }

    pub fn binary(mut self, key: Token, value: bool) -> Self {
        self.binary.insert(key, value);
        self
    }

    pub fn objective(mut self, value: f64) -> Self {
        self.objective = Some(value);
        self
    }

    pub fn realization(mut self, tag: &str) -> Self {
        self.realization = Some(tag.to_string());
        self
    }

    pub fn build(self) -> Case {
        let mut case = Case::new(self.binary, self.integer, self.real);
        if let Some(v) = self.objective {
            case.set_objective_value(v);
        }
        if let Some(tag) = self.realization {
            case.set_ensemble_realization(tag);
        }
        case
    }
}

/// Runs `case` through the registry as an evaluated case.
pub fn complete(handler: &mut CaseHandler, case: Case) -> Token {
    let id = case.id();
    handler.enqueue(case).unwrap();
    let current = handler.next_for_evaluation().unwrap();
    assert_eq!(current.id(), id, "helper expects an empty queue");
    handler.update_case(&current).unwrap();
    handler.mark_evaluated(id).unwrap();
    id
}

fn real_named(model: &VariableContainer, name: &str) -> f64 {
    model
        .iter()
        .find(|v| v.name == name)
        .map(|v| v.value.as_f64())
        .unwrap_or(f64::NAN)
}

/// Concave bowl peaking at BHP#PROD = 3, BHP#INJ = -1. Reads the model, not
/// the case, so it only works on synchronized ids.
pub fn bowl(
    _case: &Case,
    model: &VariableContainer,
    _timeout: Duration,
) -> Result<Evaluation, EvalFailure> {
    let x = real_named(model, "BHP#PROD");
    let y = real_named(model, "BHP#INJ");
    Ok(Evaluation {
        objective: -((x - 3.0).powi(2) + (y + 1.0).powi(2)),
        timing: Timing {
            wic_time: 1,
            sim_time: 1,
        },
    })
}

/// Fails every case whose BHP#PROD is negative.
pub fn reject_negative(
    case: &Case,
    model: &VariableContainer,
    timeout: Duration,
) -> Result<Evaluation, EvalFailure> {
    if real_named(model, "BHP#PROD") < 0.0 {
        return Err(EvalFailure::invalid(
            ErrorMessage::SimulationError,
            "negative producer pressure",
        ));
    }
    bowl(case, model, timeout)
}

/// Times out every case whose BHP#INJ is positive.
pub fn stall_positive_injector(
    case: &Case,
    model: &VariableContainer,
    timeout: Duration,
) -> Result<Evaluation, EvalFailure> {
    if real_named(model, "BHP#INJ") > 0.0 {
        return Err(EvalFailure::TimedOut);
    }
    bowl(case, model, timeout)
}
