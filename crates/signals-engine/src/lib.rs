pub mod config;
pub mod error;
pub mod orchestrator;
pub mod preferences;
pub mod ranking;
pub mod toplist;
pub mod unit;
pub mod universe;

pub use config::AppConfig;
pub use error::EngineError;
pub use orchestrator::{Health, Orchestrator};
pub use universe::Universe;
