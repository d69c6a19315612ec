use crate::config::ConfigError;
use simopt_protocol::case::CaseError;
use simopt_protocol::message::{ProtocolError, Rank};
use simopt_protocol::token::Token;
use thiserror::Error;

/// Misuse of the case registry by its caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("next_for_evaluation called on an empty queue")]
    EmptyQueue,

    #[error("Case {0} is not in flight")]
    NotInFlight(Token),

    #[error("Case {0} is already registered")]
    Duplicate(Token),

    #[error("Case {0} is not registered")]
    UnknownCase(Token),
}

/// Misuse of an [`EnsembleHelper`](crate::runner::EnsembleHelper).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnsembleError {
    #[error("An ensemble needs at least one realization")]
    NoRealizations,

    #[error("Realization {0} is listed twice")]
    DuplicateRealization(String),

    #[error("Case {0} is still active")]
    StillActive(Token),

    #[error("No case is active")]
    NoActiveCase,

    #[error("Case {0} still has realizations queued or being evaluated")]
    CaseNotDone(Token),

    #[error("No realization is waiting to be evaluated")]
    NothingQueued,

    #[error("Case {0} is not a realization being evaluated")]
    NotBusy(Token),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),

    #[error("Protocol Error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Case Error: {0}")]
    Case(#[from] CaseError),

    #[error("Registry Error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Ensemble Error: {0}")]
    Ensemble(#[from] EnsembleError),

    #[error("Model Definition Error: {0}")]
    Model(String),

    #[error("Model Synchronization Error: {0}")]
    ModelSync(String),

    #[error("Optimizer proposed no cases at iteration {iteration} and is not finished")]
    Stalled { iteration: usize },

    #[error("No idle worker available")]
    NoFreeWorker,

    #[error("Workers were already told to terminate")]
    Terminated,

    #[error("Rank {worker} sent a result it was not asked for (case {case:?})")]
    UnexpectedResult { worker: Rank, case: Option<Token> },

    #[error("Rank {0} disconnected")]
    Disconnected(Rank),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Validation Error: {0}")]
    Validation(String),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
