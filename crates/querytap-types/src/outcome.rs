//! Run outcomes and browser launch modes.

use std::fmt;

/// How the browser session is launched.
///
/// A headless session is cheaper and the default; some report surfaces
/// render (and therefore emit query traffic) only in a headful browser, so
/// the capture engine may escalate from `Headless` to `Headful` once per
/// run when nothing was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Headless,
    Headful,
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchMode::Headless => write!(f, "headless"),
            LaunchMode::Headful => write!(f, "headful"),
        }
    }
}

/// Terminal result of a capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The login sequencer exhausted its retry budget.
    LoginFailed,
    /// The run completed but no matching traffic was observed, even after
    /// escalation. Reportable, not fatal.
    CaptureEmpty,
    /// At least one matching event was captured and persisted.
    CaptureSucceeded,
}

impl RunOutcome {
    /// Process exit code for this outcome.
    ///
    /// Completion -- including an empty capture -- exits 0; only a login
    /// failure after the retry budget is a non-zero outcome here.
    /// (Configuration and persistence failures exit non-zero before/after
    /// an outcome exists.)
    pub fn exit_code(self) -> u8 {
        match self {
            RunOutcome::LoginFailed => 1,
            RunOutcome::CaptureEmpty | RunOutcome::CaptureSucceeded => 0,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::LoginFailed => write!(f, "login failed"),
            RunOutcome::CaptureEmpty => write!(f, "capture empty"),
            RunOutcome::CaptureSucceeded => write!(f, "capture succeeded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(RunOutcome::CaptureSucceeded.exit_code(), 0);
        assert_eq!(RunOutcome::CaptureEmpty.exit_code(), 0);
        assert_eq!(RunOutcome::LoginFailed.exit_code(), 1);
    }

    #[test]
    fn launch_mode_display() {
        assert_eq!(LaunchMode::Headless.to_string(), "headless");
        assert_eq!(LaunchMode::Headful.to_string(), "headful");
    }
}
