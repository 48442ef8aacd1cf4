//! Core types shared across all querytap crates.
//!
//! Defines the run configuration, portal credentials, captured network
//! events, the shared capture buffer, and run outcomes used by the browser
//! driver, capture engine, and CLI.

pub mod config;
pub mod credentials;
pub mod error;
pub mod event;
pub mod outcome;

pub use config::{
    CaptureConfig, CapturePolicyKind, CaptureTimings, DEFAULT_ANALYTICS_URL, DEFAULT_OUTPUT_FILENAME,
    DEFAULT_PORTAL_URL,
};
pub use credentials::Credentials;
pub use error::ConfigError;
pub use event::{CaptureBuffer, CapturedEvent, Direction};
pub use outcome::{LaunchMode, RunOutcome};
