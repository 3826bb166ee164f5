pub mod config;
pub mod error;
pub mod error_utils;
pub mod sink;
pub mod types;

pub use config::EngineConfig;
pub use error::*;
pub use error_utils::*;
pub use sink::ResultSink;
pub use types::*;
