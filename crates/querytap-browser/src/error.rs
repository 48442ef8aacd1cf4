//! Error types for the querytap-browser crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while driving the browser session.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// No usable browser binary was found on this system.
    #[error("no Chrome or Chromium binary found on this system")]
    NoBrowserFound,

    /// The browser process could not be spawned.
    #[error("failed to launch browser: {reason}")]
    LaunchFailed { reason: String },

    /// The DevTools HTTP endpoint never became reachable after launch.
    #[error("DevTools endpoint not ready after {duration:?}")]
    EndpointNotReady { duration: Duration },

    /// Failed to establish a WebSocket connection to a DevTools target.
    #[error("failed to connect to DevTools target at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A CDP command returned an error response.
    #[error("CDP error {code}: {message}")]
    CdpError {
        code: i64,
        message: String,
        data: Option<String>,
    },

    /// A CDP command timed out waiting for its response.
    #[error("CDP command '{method}' timed out after {duration:?}")]
    Timeout { method: String, duration: Duration },

    /// A protocol-level error (serialization, unexpected message shape,
    /// dropped connection).
    #[error("CDP protocol error: {detail}")]
    Protocol { detail: String },

    /// The requested DOM element was not found.
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    /// The browser reported a navigation failure (e.g. DNS resolution).
    #[error("navigation failed: {reason}")]
    NavigationFailed { reason: String },

    /// The navigation ready condition did not hold within its bound.
    #[error("navigation not ready after {duration:?}")]
    NavigationTimeout { duration: Duration },

    /// JavaScript evaluation threw in the page context.
    #[error("JavaScript exception: {message}")]
    JsException { message: String },

    /// A DevTools HTTP endpoint request failed.
    #[error("DevTools HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}
