//! Errors that are allowed to stop a run.
//!
//! Everything that goes wrong while probing a single port or host is folded
//! into the result model instead (a closed port, an unknown OS, an unavailable
//! hop count). Only the failures below ever reach the caller.
use thiserror::Error;

/// Fatal errors raised before or outside of probing.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The target could not be turned into any address.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The port specification string could not be parsed.
    #[error("Port range error: {0}")]
    PortRangeError(String),

    /// The configuration file exists but could not be parsed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Writing the report failed.
    #[error("Output error: {0}")]
    OutputError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for operations that can fail fatally.
pub type ScanResult<T> = Result<T, ScanError>;
