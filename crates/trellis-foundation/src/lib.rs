//! Trellis Foundation
//!
//! Concrete building blocks on top of `trellis-kernel`: graph definitions,
//! the dispatch engine with fork/join, the resume protocol, context merge
//! strategies, a JSON state serializer and an in-memory suspension store.

// config module
pub mod config;
pub use config::{ConfigError, ConfigResult, EngineConfig, LoggingConfig};

// logging module
pub mod logging;
pub use logging::init_logging;

// workflow module
pub mod workflow;

pub use trellis_kernel as kernel;
