pub mod config;
pub mod data;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod feasibility;
pub mod model;
pub mod server;
pub mod solver;

pub use config::ServerConfig;
pub use error::{ConfigError, SchedulingError};
