pub mod config;
pub mod derivatives;
pub mod engine;
pub mod error;
pub mod model;
pub mod physics;
pub mod utils;

pub use config::SimulatorConfig;
pub use engine::{EngineState, Handle, SimulationEngine};
pub use error::{Result, SimError};
