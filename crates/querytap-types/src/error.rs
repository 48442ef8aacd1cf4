//! Configuration error type shared across querytap crates.

/// Errors raised while loading or validating the run configuration.
///
/// All variants are fatal: configuration problems are surfaced before a
/// browser is ever launched, and the process exits with a descriptive
/// message and a non-zero status.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required configuration key {key} is not set")]
    MissingKey { key: &'static str },

    #[error("configuration key {key} has invalid value `{value}`: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid URL in {key}: {reason}")]
    InvalidUrl { key: &'static str, reason: String },
}
