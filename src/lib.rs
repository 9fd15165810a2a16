//! Ensemble - ask several LLMs at once, measure how much they agree, and
//! synthesize one consensus answer.

pub mod analysis;
pub mod config;
pub mod consensus;
pub mod ensemble;
pub mod error;
pub mod llm;
pub mod session;

mod guard;

pub use config::Config;
pub use error::{EnsembleError, Result};
pub use session::{EnsembleSession, SessionSnapshot};
