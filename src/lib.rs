pub mod cancel;
pub mod config;
pub mod consts;
pub mod delay;
pub mod error;
pub mod events;
pub mod gateway;
pub mod model;
pub mod orchestrator;

pub use error::{Error, Phase, Result, Step};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
