//! LLM provider clients, model catalog and client registry

mod anthropic;
mod backend;
mod catalog;
mod mock;
mod openai;
mod provider;
mod registry;
mod wire;

pub use anthropic::*;
pub use backend::*;
pub use catalog::*;
pub use mock::*;
pub use openai::*;
pub use provider::*;
pub use registry::*;
