//! Error types for identifiers and settings.

use thiserror::Error;

/// Errors raised while parsing an info-hash or source key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("expected 40 hex characters, got {0}")]
    Length(usize),

    #[error("invalid hex in identifier: {0}")]
    Hex(String),
}

/// Errors raised while loading or validating credit mining settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration: {0}")]
    Duration(String),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
