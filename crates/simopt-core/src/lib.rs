// Re-export the wire types so they are reachable as simopt_core::*
pub use simopt_protocol::case;
pub use simopt_protocol::config;
pub use simopt_protocol::message;
pub use simopt_protocol::sync;
pub use simopt_protocol::token;

pub mod bookkeeper;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod optimizer;
pub mod overseer;
pub mod registry;
pub mod runner;
pub mod transport;
pub mod worker;
