//! # alcfix Utilities
//!
//! Logging setup shared by the alcfix binaries, built on `tracing`.

pub mod logging;

pub use logging::{
    init_logging, init_logging_with_level, init_with_config, LogFormat, LogGuard, LogLevel, LoggingConfig,
    LoggingError,
};
pub use tracing::{debug, error, info, trace, warn};
