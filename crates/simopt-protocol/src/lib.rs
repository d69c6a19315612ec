pub mod case;
pub mod config;
pub mod message;
pub mod sync;
pub mod token;

pub use case::{Case, CaseError, EvalStatus, ErrorMessage, VariableKind, VariableValue};
pub use message::{Envelope, Message, Phase, ProtocolError, Rank, Tag};
pub use sync::ModelSyncObject;
pub use token::Token;
