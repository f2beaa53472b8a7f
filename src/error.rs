//! Error types for the replay pipeline
//!
//! The order book and its manager never fail; errors only come from the
//! edges (capture files, configuration, output).

use thiserror::Error;

/// Replay pipeline errors
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid capture file: {0}")]
    Capture(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ReplayError {
    fn from(err: serde_json::Error) -> Self {
        ReplayError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for ReplayError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        ReplayError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for ReplayError {
    fn from(err: config::ConfigError) -> Self {
        ReplayError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReplayError>;
