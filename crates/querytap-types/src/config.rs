//! Run configuration loaded from the environment.
//!
//! [`CaptureConfig`] is the single configuration surface for a capture run:
//! portal credentials, the capture policy, every timing constant, the
//! endpoint filter, and the output artifact path. All values have named,
//! documented defaults; the historical per-script magic numbers (15s, 30s,
//! 45s, 120s wait windows) collapse into [`CaptureTimings`].
//!
//! Configuration is environment-style key/value. Required keys missing at
//! startup produce a [`ConfigError`] naming the key; the process exits with
//! a descriptive message and a non-zero status before any browser launches.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::credentials::Credentials;
use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default login entry point of the portal.
pub const DEFAULT_PORTAL_URL: &str = "https://portal.visionretail.net/login";

/// Default analytics area hosting the embedded report surfaces.
pub const DEFAULT_ANALYTICS_URL: &str = "https://app.powerbi.com/";

/// Fixed, documented artifact filename consumed by the downstream parser.
pub const DEFAULT_OUTPUT_FILENAME: &str = "captured-queries.json";

/// Backend-endpoint substrings whose traffic is buffered: the report
/// query-execution path and the dedicated-capacity API host.
const DEFAULT_QUERY_ENDPOINTS: &[&str] = &["/public/reports/querydata", "pbidedicated.windows.net"];

/// URL substrings identifying an embedded report surface.
const DEFAULT_SURFACE_MARKERS: &[&str] = &["app.powerbi.com", "powerbi", "reportEmbed"];

/// Case-insensitive substrings confirming the post-login dashboard rendered.
const DEFAULT_DASHBOARD_MARKERS: &[&str] = &["dashboard", "analytics", "reports", "sign out"];

/// Case-insensitive labels identifying the login submit control.
const DEFAULT_SUBMIT_LABELS: &[&str] = &["continue", "log in", "sign in", "login"];

// Environment keys.
const KEY_ENTITY_ID: &str = "QUERYTAP_ENTITY_ID";
const KEY_USERNAME: &str = "QUERYTAP_USERNAME";
const KEY_PASSWORD: &str = "QUERYTAP_PASSWORD";
const KEY_PORTAL_URL: &str = "QUERYTAP_PORTAL_URL";
const KEY_ANALYTICS_URL: &str = "QUERYTAP_ANALYTICS_URL";
const KEY_WAIT_WINDOW_MS: &str = "QUERYTAP_WAIT_WINDOW_MS";
const KEY_POLICY: &str = "QUERYTAP_POLICY";
const KEY_OUTPUT: &str = "QUERYTAP_OUTPUT";
const KEY_BROWSER: &str = "QUERYTAP_BROWSER";
const KEY_HEADFUL: &str = "QUERYTAP_HEADFUL";
const KEY_WRITE_EMPTY: &str = "QUERYTAP_WRITE_EMPTY";

// ---------------------------------------------------------------------------
// Capture policy selection
// ---------------------------------------------------------------------------

/// Which completion policy governs the capture window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePolicyKind {
    /// Sleep for the full window, then stop regardless of buffer contents.
    FixedWindow,
    /// Cycle-counted wait with an early exit once the buffer is non-empty,
    /// followed by a single headless-to-headful escalation when nothing was
    /// captured.
    Cyclic,
}

impl CapturePolicyKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(CapturePolicyKind::FixedWindow),
            "cyclic" => Ok(CapturePolicyKind::Cyclic),
            _ => Err(ConfigError::InvalidValue {
                key: KEY_POLICY,
                value: value.to_string(),
                reason: "expected `fixed` or `cyclic`".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Timing constants
// ---------------------------------------------------------------------------

/// Every bounded wait in one place.
///
/// Timeouts are per-operation, not cumulative; total-run bounding is left to
/// an operator-level watchdog.
#[derive(Debug, Clone)]
pub struct CaptureTimings {
    /// How long to wait for the DevTools endpoint after spawning the browser.
    pub launch_timeout: Duration,
    /// Bound on each navigation's ready condition.
    pub navigation_timeout: Duration,
    /// Quiet period that counts as network quiescence after a navigation.
    pub network_quiescence: Duration,
    /// Bound on each login input element becoming actionable.
    pub element_timeout: Duration,
    /// Bound on the post-submit navigation/dashboard confirmation.
    pub confirm_timeout: Duration,
    /// Whole-flow login attempts before surfacing `LoginFailed`.
    pub login_attempts: u32,
    /// Bounded polling budget for report-surface discovery.
    pub discovery_attempts: u32,
    /// Delay between discovery attempts.
    pub discovery_delay: Duration,
    /// Monitoring window of the fixed-window policy.
    pub fixed_window: Duration,
    /// Cycle budget of the cyclic policy.
    pub capture_cycles: u32,
    /// Per-cycle delay of the cyclic policy.
    pub cycle_delay: Duration,
    /// Interval between element/predicate polls.
    pub poll_interval: Duration,
}

impl Default for CaptureTimings {
    fn default() -> Self {
        Self {
            launch_timeout: Duration::from_secs(20),
            navigation_timeout: Duration::from_secs(45),
            network_quiescence: Duration::from_secs(2),
            element_timeout: Duration::from_secs(30),
            confirm_timeout: Duration::from_secs(120),
            login_attempts: 3,
            discovery_attempts: 10,
            discovery_delay: Duration::from_secs(3),
            fixed_window: Duration::from_secs(120),
            capture_cycles: 10,
            cycle_delay: Duration::from_secs(15),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl CaptureTimings {
    /// Apply the optional `QUERYTAP_WAIT_WINDOW_MS` override.
    ///
    /// The fixed window becomes the given duration; the cyclic policy keeps
    /// its per-cycle delay and recomputes the cycle budget to cover the same
    /// window (rounded up, at least one cycle).
    pub fn with_wait_window(mut self, window: Duration) -> Self {
        self.fixed_window = window;
        let delay_ms = self.cycle_delay.as_millis().max(1);
        let cycles = window.as_millis().div_ceil(delay_ms);
        self.capture_cycles = u32::try_from(cycles).unwrap_or(u32::MAX).max(1);
        self
    }
}

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Complete configuration for one capture run.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Portal credentials and entry URLs.
    pub credentials: Credentials,
    /// Completion policy for the capture window.
    pub policy: CapturePolicyKind,
    /// All timing constants.
    pub timings: CaptureTimings,
    /// Where the JSON artifact is written.
    pub output_path: PathBuf,
    /// Optional browser binary override; discovery runs otherwise.
    pub browser_path: Option<PathBuf>,
    /// Start headful instead of headless (disables escalation, which only
    /// applies to headless starts).
    pub headful: bool,
    /// Whether an empty capture still writes an (empty) artifact.
    pub write_empty_artifact: bool,
    /// Backend-endpoint substrings whose traffic is buffered.
    pub query_endpoints: Vec<String>,
    /// URL substrings identifying an embedded report surface.
    pub surface_markers: Vec<String>,
    /// Substrings confirming the post-login dashboard rendered.
    pub dashboard_markers: Vec<String>,
    /// Labels identifying the login submit control.
    pub submit_labels: Vec<String>,
}

impl CaptureConfig {
    /// Load and validate configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load and validate configuration through an arbitrary key lookup.
    ///
    /// Split out from [`from_env`](Self::from_env) so tests can supply
    /// key/value maps without mutating process-global state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let entity_id = required(&lookup, KEY_ENTITY_ID)?;
        let username = required(&lookup, KEY_USERNAME)?;
        let password = required(&lookup, KEY_PASSWORD)?;

        let portal_url = lookup(KEY_PORTAL_URL).unwrap_or_else(|| DEFAULT_PORTAL_URL.to_string());
        validate_portal_url(KEY_PORTAL_URL, &portal_url)?;
        let analytics_url =
            lookup(KEY_ANALYTICS_URL).unwrap_or_else(|| DEFAULT_ANALYTICS_URL.to_string());
        validate_portal_url(KEY_ANALYTICS_URL, &analytics_url)?;

        let policy = match lookup(KEY_POLICY) {
            Some(raw) => CapturePolicyKind::parse(&raw)?,
            None => CapturePolicyKind::Cyclic,
        };

        let mut timings = CaptureTimings::default();
        if let Some(raw) = lookup(KEY_WAIT_WINDOW_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: KEY_WAIT_WINDOW_MS,
                value: raw.clone(),
                reason: "expected a positive integer millisecond count".to_string(),
            })?;
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    key: KEY_WAIT_WINDOW_MS,
                    value: raw,
                    reason: "wait window must be non-zero".to_string(),
                });
            }
            timings = timings.with_wait_window(Duration::from_millis(ms));
        }

        let output_path = lookup(KEY_OUTPUT)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILENAME));
        let browser_path = lookup(KEY_BROWSER).map(PathBuf::from);
        let headful = lookup(KEY_HEADFUL).map(|v| parse_bool(&v)).unwrap_or(false);
        let write_empty_artifact = lookup(KEY_WRITE_EMPTY)
            .map(|v| parse_bool(&v))
            .unwrap_or(true);

        Ok(Self {
            credentials: Credentials {
                entity_id,
                username,
                password,
                portal_url,
                analytics_url,
            },
            policy,
            timings,
            output_path,
            browser_path,
            headful,
            write_empty_artifact,
            query_endpoints: to_owned(DEFAULT_QUERY_ENDPOINTS),
            surface_markers: to_owned(DEFAULT_SURFACE_MARKERS),
            dashboard_markers: to_owned(DEFAULT_DASHBOARD_MARKERS),
            submit_labels: to_owned(DEFAULT_SUBMIT_LABELS),
        })
    }
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<String, ConfigError> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingKey { key }),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn to_owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

/// Validate a configured URL: must parse, must be http(s), must have a host.
///
/// Anything else is rejected up front rather than handed to the browser.
fn validate_portal_url(key: &'static str, raw: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUrl {
        key,
        reason: e.to_string(),
    })?;
    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(ConfigError::InvalidUrl {
            key,
            reason: format!("scheme `{scheme}` is not allowed; only http and https are permitted"),
        });
    }
    if parsed.host_str().is_none() {
        return Err(ConfigError::InvalidUrl {
            key,
            reason: "URL has no host".to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
