use crate::token::Token;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaseError {
    #[error("Case {case}: variable {variable} does not exist in this case")]
    UnknownVariable { case: Token, variable: Token },

    #[error("Case {case}: objective value has not been set")]
    ObjectiveUnset { case: Token },
}

pub type CaseResult<T> = Result<T, CaseError>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Binary,
    Integer,
    Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum VariableValue {
    Binary(bool),
    Integer(i64),
    Real(f64),
}

impl VariableValue {
    pub fn kind(&self) -> VariableKind {
        match self {
            Self::Binary(_) => VariableKind::Binary,
            Self::Integer(_) => VariableKind::Integer,
            Self::Real(_) => VariableKind::Real,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Binary(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Integer(i) => i as f64,
            Self::Real(r) => r,
        }
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Real(r) => write!(f, "{}", r),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvalStatus {
    #[default]
    NotStarted,
    Current,
    Done,
    Bookkept,
    Failed,
    TimedOut,
}

impl EvalStatus {
    /// Terminal statuses are the ones a case can be retired with.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NotStarted | Self::Current)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConsStatus {
    #[default]
    Unchecked,
    Feasible,
    Infeasible,
    Projected,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueueStatus {
    #[default]
    Unassigned,
    Queued,
    InFlight,
    Retired,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorMessage {
    #[default]
    NoError,
    SimulationError,
    WellIndexError,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaseState {
    pub eval: EvalStatus,
    pub cons: ConsStatus,
    pub queue: QueueStatus,
    pub err_msg: ErrorMessage,
}

/// Wall-clock seconds spent computing well indices and simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timing {
    pub wic_time: u64,
    pub sim_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
    PlusMinus,
}

impl Sign {
    fn offsets(self, magnitude: f64) -> Vec<f64> {
        match self {
            Self::Plus => vec![magnitude],
            Self::Minus => vec![-magnitude],
            Self::PlusMinus => vec![magnitude, -magnitude],
        }
    }
}

/// One candidate assignment of optimization variables plus its evaluation outcome.
///
/// The id is fixed at construction. The three variable maps never gain or lose
/// keys after construction; only their values change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    id: Token,
    #[serde(default)]
    objective_value: Option<f64>,
    #[serde(default)]
    binary_variables: BTreeMap<Token, bool>,
    #[serde(default)]
    integer_variables: BTreeMap<Token, i64>,
    #[serde(default)]
    real_variables: BTreeMap<Token, f64>,
    #[serde(default)]
    ensemble_realization: String,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub state: CaseState,
}

impl Case {
    pub fn new(
        binary_variables: BTreeMap<Token, bool>,
        integer_variables: BTreeMap<Token, i64>,
        real_variables: BTreeMap<Token, f64>,
    ) -> Self {
        Self {
            id: Token::generate(),
            objective_value: None,
            binary_variables,
            integer_variables,
            real_variables,
            ensemble_realization: String::new(),
            timing: Timing::default(),
            state: CaseState::default(),
        }
    }

    /// Copies the variable values into a new case with a fresh id and reset
    /// evaluation state.
    pub fn sibling(&self) -> Self {
        let mut c = Self::new(
            self.binary_variables.clone(),
            self.integer_variables.clone(),
            self.real_variables.clone(),
        );
        c.ensemble_realization = self.ensemble_realization.clone();
        c
    }

    pub fn id(&self) -> Token {
        self.id
    }

    pub fn binary_variables(&self) -> &BTreeMap<Token, bool> {
        &self.binary_variables
    }

    pub fn integer_variables(&self) -> &BTreeMap<Token, i64> {
        &self.integer_variables
    }

    pub fn real_variables(&self) -> &BTreeMap<Token, f64> {
        &self.real_variables
    }

    pub fn variable_count(&self) -> usize {
        self.binary_variables.len() + self.integer_variables.len() + self.real_variables.len()
    }

    pub fn value(&self, key: &Token) -> Option<VariableValue> {
        if let Some(v) = self.binary_variables.get(key) {
            return Some(VariableValue::Binary(*v));
        }
        if let Some(v) = self.integer_variables.get(key) {
            return Some(VariableValue::Integer(*v));
        }
        self.real_variables.get(key).map(|v| VariableValue::Real(*v))
    }

    pub fn ensemble_realization(&self) -> &str {
        &self.ensemble_realization
    }

    pub fn set_ensemble_realization(&mut self, tag: impl Into<String>) {
        self.ensemble_realization = tag.into();
    }

    /// Value equality within `tolerance` on every variable.
    ///
    /// Both cases must carry the same three key sets. Booleans count as 0/1,
    /// so they only differ by slack when the tolerance is at least 1.
    pub fn equals(&self, other: &Case, tolerance: f64) -> bool {
        fn within<T: Copy>(
            a: &BTreeMap<Token, T>,
            b: &BTreeMap<Token, T>,
            tolerance: f64,
            as_f64: impl Fn(T) -> f64,
        ) -> bool {
            a.len() == b.len()
                && a.iter().all(|(k, va)| match b.get(k) {
                    Some(vb) => (as_f64(*va) - as_f64(*vb)).abs() <= tolerance,
                    None => false,
                })
        }

        within(
            &self.binary_variables,
            &other.binary_variables,
            tolerance,
            |b| if b { 1.0 } else { 0.0 },
        ) && within(
            &self.integer_variables,
            &other.integer_variables,
            tolerance,
            |i| i as f64,
        ) && within(&self.real_variables, &other.real_variables, tolerance, |r| r)
    }

    pub fn set_value(&mut self, key: Token, value: VariableValue) -> CaseResult<()> {
        match value {
            VariableValue::Binary(v) => self.set_binary(key, v),
            VariableValue::Integer(v) => self.set_integer(key, v),
            VariableValue::Real(v) => self.set_real(key, v),
        }
    }

    pub fn set_binary(&mut self, key: Token, value: bool) -> CaseResult<()> {
        let case = self.id;
        match self.binary_variables.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(CaseError::UnknownVariable {
                case,
                variable: key,
            }),
        }
    }

    pub fn set_integer(&mut self, key: Token, value: i64) -> CaseResult<()> {
        let case = self.id;
        match self.integer_variables.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(CaseError::UnknownVariable {
                case,
                variable: key,
            }),
        }
    }

    pub fn set_real(&mut self, key: Token, value: f64) -> CaseResult<()> {
        let case = self.id;
        match self.real_variables.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(CaseError::UnknownVariable {
                case,
                variable: key,
            }),
        }
    }

    pub fn objective_value(&self) -> CaseResult<f64> {
        self.objective_value
            .ok_or(CaseError::ObjectiveUnset { case: self.id })
    }

    pub fn has_objective_value(&self) -> bool {
        self.objective_value.is_some()
    }

    pub fn set_objective_value(&mut self, value: f64) {
        self.objective_value = Some(value);
    }

    /// Siblings with one numeric variable moved by `magnitude`.
    ///
    /// Integer variables move by the rounded magnitude; a magnitude that
    /// rounds to zero, or a move that would overflow, yields no sibling.
    /// Binary and unknown variables produce no siblings.
    pub fn perturb(&self, key: Token, sign: Sign, magnitude: f64) -> Vec<Case> {
        if let Some(&base) = self.integer_variables.get(&key) {
            let step = magnitude.round() as i64;
            if step == 0 {
                return Vec::new();
            }
            return sign
                .offsets(1.0)
                .into_iter()
                .filter_map(|dir| {
                    let value = step
                        .checked_mul(dir as i64)
                        .and_then(|d| base.checked_add(d))?;
                    let mut c = self.sibling();
                    c.integer_variables.insert(key, value);
                    Some(c)
                })
                .collect();
        }
        if let Some(&base) = self.real_variables.get(&key) {
            return sign
                .offsets(magnitude)
                .into_iter()
                .map(|offset| {
                    let mut c = self.sibling();
                    c.real_variables.insert(key, base + offset);
                    c
                })
                .collect();
        }
        Vec::new()
    }
}

impl fmt::Display for Case {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Case {}", self.id)?;
        let join = |vals: Vec<String>| vals.join(" ");
        writeln!(
            f,
            "  binary:  {}",
            join(self.binary_variables.values().map(|v| v.to_string()).collect())
        )?;
        writeln!(
            f,
            "  integer: {}",
            join(self.integer_variables.values().map(|v| v.to_string()).collect())
        )?;
        writeln!(
            f,
            "  real:    {}",
            join(self.real_variables.values().map(|v| v.to_string()).collect())
        )?;
        match self.objective_value {
            Some(v) => writeln!(f, "  objective: {}", v)?,
            None => writeln!(f, "  objective: <unset>")?,
        }
        write!(
            f,
            "  status: {} / {} ({})",
            self.state.eval, self.state.queue, self.state.err_msg
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_real(value: f64) -> (Token, Case) {
        let key = Token::generate();
        let case = Case::new(
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::from([(key, value)]),
        );
        (key, case)
    }

    #[test]
    fn test_set_value_rejects_new_keys() {
        let (key, mut case) = single_real(1.0);
        assert!(case.set_real(key, 3.0).is_ok());
        assert_eq!(case.real_variables()[&key], 3.0);

        let stranger = Token::generate();
        let err = case.set_value(stranger, VariableValue::Real(1.0)).unwrap_err();
        assert_eq!(
            err,
            CaseError::UnknownVariable {
                case: case.id(),
                variable: stranger
            }
        );
        assert_eq!(case.variable_count(), 1);
    }

    #[test]
    fn test_objective_unset_is_an_error() {
        let (_, mut case) = single_real(1.0);
        assert!(matches!(
            case.objective_value(),
            Err(CaseError::ObjectiveUnset { .. })
        ));
        case.set_objective_value(42.0);
        assert_eq!(case.objective_value().unwrap(), 42.0);
    }

    #[test]
    fn test_perturb_plus_minus_creates_two_fresh_cases() {
        let (key, mut case) = single_real(2.0);
        case.set_objective_value(9.0);
        case.state.eval = EvalStatus::Done;

        let siblings = case.perturb(key, Sign::PlusMinus, 0.5);
        assert_eq!(siblings.len(), 2);
        assert_eq!(siblings[0].real_variables()[&key], 2.5);
        assert_eq!(siblings[1].real_variables()[&key], 1.5);
        for s in &siblings {
            assert_ne!(s.id(), case.id());
            assert!(!s.has_objective_value());
            assert_eq!(s.state, CaseState::default());
        }
    }

    #[test]
    fn test_perturb_binary_yields_nothing() {
        let key = Token::generate();
        let case = Case::new(
            BTreeMap::from([(key, true)]),
            BTreeMap::new(),
            BTreeMap::new(),
        );
        assert!(case.perturb(key, Sign::Plus, 1.0).is_empty());
    }

    fn single_integer(value: i64) -> (Token, Case) {
        let key = Token::generate();
        let case = Case::new(
            BTreeMap::new(),
            BTreeMap::from([(key, value)]),
            BTreeMap::new(),
        );
        (key, case)
    }

    #[test]
    fn test_perturb_integer_rounds_step() {
        let (key, case) = single_integer(5);
        let siblings = case.perturb(key, Sign::PlusMinus, 1.6);
        let values: Vec<i64> = siblings.iter().map(|c| c.integer_variables()[&key]).collect();
        assert_eq!(values, vec![7, 3]);
    }

    #[test]
    fn test_perturb_integer_zero_step_yields_nothing() {
        let (key, case) = single_integer(5);
        assert!(case.perturb(key, Sign::PlusMinus, 0.4).is_empty());
    }

    #[test]
    fn test_perturb_integer_skips_overflowing_direction() {
        let (key, case) = single_integer(i64::MAX - 1);
        let siblings = case.perturb(key, Sign::PlusMinus, 2.0);
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].integer_variables()[&key], i64::MAX - 3);
    }

    #[test]
    fn test_equals_requires_same_keys() {
        let (_, a) = single_real(1.0);
        let (_, b) = single_real(1.0);
        assert!(!a.equals(&b, 10.0));
        assert!(a.equals(&a.sibling(), 0.0));
    }

    #[test]
    fn test_json_round_trip_keeps_identity() {
        let flag = Token::generate();
        let segment = Token::generate();
        let rate = Token::generate();
        let mut case = Case::new(
            BTreeMap::from([(flag, true)]),
            BTreeMap::from([(segment, -3)]),
            BTreeMap::from([(rate, 1250.5)]),
        );
        case.set_objective_value(-0.125);
        case.timing = Timing {
            wic_time: 2,
            sim_time: 40,
        };
        case.state.eval = EvalStatus::Failed;
        case.state.err_msg = ErrorMessage::WellIndexError;

        let json = serde_json::to_string(&case).unwrap();
        assert!(json.contains("\"well_index_error\""));
        let back: Case = serde_json::from_str(&json).unwrap();
        assert_eq!(back, case);
        assert_eq!(back.id(), case.id());
    }
}
