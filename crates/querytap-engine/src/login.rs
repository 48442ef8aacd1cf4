//! Login sequencer: a five-step state machine with a whole-flow retry budget.
//!
//! The flow is strictly forward: entity-id entry, credential entry, submit,
//! navigation confirmation, dashboard confirmation. Any step can fail with
//! a typed error (element missing, no submit control, navigation or
//! confirmation timeout); a failure sends the whole flow back to `Start`
//! for a fresh attempt, up to the configured budget. No state is carried
//! between attempts. Only after the budget is exhausted does `LoginFailed`
//! surface to the caller.
//!
//! The sequencer drives an abstract [`LoginSurface`] so the state machine
//! and its retry accounting are testable with scripted fakes; the
//! browser-backed implementation lives in `runtime`.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use querytap_browser::BrowserError;

// ---------------------------------------------------------------------------
// States and errors
// ---------------------------------------------------------------------------

/// Progress of one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Start,
    EntityEntered,
    CredentialsEntered,
    Submitted,
    NavigationConfirmed,
    DashboardConfirmed,
    Failed,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginState::Start => "start",
            LoginState::EntityEntered => "entity-entered",
            LoginState::CredentialsEntered => "credentials-entered",
            LoginState::Submitted => "submitted",
            LoginState::NavigationConfirmed => "navigation-confirmed",
            LoginState::DashboardConfirmed => "dashboard-confirmed",
            LoginState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// The credential inputs of the login form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginField {
    EntityId,
    Username,
    Password,
}

impl LoginField {
    /// The state an attempt is in when this field's element goes missing.
    pub fn failure_state(self) -> LoginState {
        match self {
            LoginField::EntityId => LoginState::Start,
            LoginField::Username | LoginField::Password => LoginState::EntityEntered,
        }
    }
}

/// Failures of a single login attempt. All are recoverable within the
/// retry budget; the sequencer surfaces only `LoginFailed` (as
/// [`crate::EngineError::LoginFailed`]) once the budget is spent.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("required element not found in state {state}")]
    ElementNotFound { state: LoginState },

    #[error("no submit control matched the known labels or fallbacks")]
    NoSubmitControl,

    #[error("navigation after submit did not complete")]
    NavigationTimeout,

    #[error("dashboard content not confirmed after login")]
    LoginNotConfirmed,

    #[error("browser failure during login: {0}")]
    Browser(#[from] BrowserError),
}

// ---------------------------------------------------------------------------
// LoginSurface
// ---------------------------------------------------------------------------

/// The operations one login attempt is composed of.
///
/// Implementations own their selectors, keyword lists, and per-step
/// timeouts; the sequencer owns ordering, state accounting, and retries.
#[async_trait]
pub trait LoginSurface: Send {
    /// Navigate to the portal's login entry point.
    async fn open_login(&mut self) -> Result<(), LoginError>;

    /// Wait for the field's input to become actionable, then inject the
    /// value.
    async fn fill_field(&mut self, field: LoginField, value: &str) -> Result<(), LoginError>;

    /// Locate and press the submit control.
    async fn press_submit(&mut self) -> Result<(), LoginError>;

    /// Await the post-submit navigation.
    async fn await_navigation(&mut self) -> Result<(), LoginError>;

    /// Confirm dashboard content rendered.
    async fn confirm_dashboard(&mut self) -> Result<(), LoginError>;
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

/// Credential values injected during an attempt.
#[derive(Debug, Clone)]
pub struct LoginValues {
    pub entity_id: String,
    pub username: String,
    pub password: String,
}

/// Drives [`LoginSurface`] attempts until one confirms the dashboard or
/// the budget is exhausted.
pub struct LoginSequencer {
    values: LoginValues,
    attempts: u32,
}

impl LoginSequencer {
    pub fn new(values: LoginValues, attempts: u32) -> Self {
        Self {
            values,
            attempts: attempts.max(1),
        }
    }

    /// Run the login flow. Returns the number of attempts used on success;
    /// `Err` carries the last attempt's failure once the budget is spent.
    pub async fn run(&self, surface: &mut impl LoginSurface) -> Result<u32, LoginError> {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            tracing::info!(attempt, budget = self.attempts, "starting login attempt");
            match self.attempt(surface).await {
                Ok(()) => {
                    tracing::info!(attempt, "login confirmed");
                    return Ok(attempt);
                }
                Err(error) => {
                    tracing::warn!(attempt, %error, "login attempt failed");
                    last_error = Some(error);
                }
            }
        }

        tracing::error!(attempts = self.attempts, "login retry budget exhausted");
        Err(last_error.unwrap_or(LoginError::LoginNotConfirmed))
    }

    /// One strictly-forward pass through the state machine.
    async fn attempt(&self, surface: &mut impl LoginSurface) -> Result<(), LoginError> {
        let mut state = LoginState::Start;
        tracing::debug!(%state, "opening login page");
        surface.open_login().await?;

        surface
            .fill_field(LoginField::EntityId, &self.values.entity_id)
            .await?;
        state = LoginState::EntityEntered;
        tracing::debug!(%state, "entity id entered");

        surface
            .fill_field(LoginField::Username, &self.values.username)
            .await?;
        surface
            .fill_field(LoginField::Password, &self.values.password)
            .await?;
        state = LoginState::CredentialsEntered;
        tracing::debug!(%state, "credentials entered");

        surface.press_submit().await?;
        state = LoginState::Submitted;
        tracing::debug!(%state, "login submitted");

        surface.await_navigation().await?;
        state = LoginState::NavigationConfirmed;
        tracing::debug!(%state, "navigation confirmed");

        surface.confirm_dashboard().await?;
        state = LoginState::DashboardConfirmed;
        tracing::debug!(%state, "dashboard confirmed");
        Ok(())
    }
}

/// Case-insensitive check whether rendered text contains any marker.
pub fn contains_any_marker(text: &str, markers: &[String]) -> bool {
    let lower = text.to_ascii_lowercase();
    markers
        .iter()
        .any(|marker| !marker.is_empty() && lower.contains(&marker.to_ascii_lowercase()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Scripted surface: fails the submit step for the first `failures`
    /// attempts, then succeeds; records every call.
    struct ScriptedSurface {
        failures: u32,
        opens: u32,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedSurface {
        fn failing(failures: u32) -> Self {
            Self {
                failures,
                opens: 0,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    #[async_trait]
    impl LoginSurface for ScriptedSurface {
        async fn open_login(&mut self) -> Result<(), LoginError> {
            self.opens += 1;
            self.record("open");
            Ok(())
        }

        async fn fill_field(&mut self, field: LoginField, _value: &str) -> Result<(), LoginError> {
            self.record(&format!("fill:{field:?}"));
            Ok(())
        }

        async fn press_submit(&mut self) -> Result<(), LoginError> {
            self.record("submit");
            if self.opens <= self.failures {
                return Err(LoginError::NoSubmitControl);
            }
            Ok(())
        }

        async fn await_navigation(&mut self) -> Result<(), LoginError> {
            self.record("navigation");
            Ok(())
        }

        async fn confirm_dashboard(&mut self) -> Result<(), LoginError> {
            self.record("dashboard");
            Ok(())
        }
    }

    fn values() -> LoginValues {
        LoginValues {
            entity_id: "4711".into(),
            username: "ops@example.com".into(),
            password: "secret".into(),
        }
    }

    #[tokio::test]
    async fn succeeds_first_attempt() {
        let mut surface = ScriptedSurface::failing(0);
        let sequencer = LoginSequencer::new(values(), 3);
        let attempts = sequencer.run(&mut surface).await.unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(surface.opens, 1);
    }

    #[tokio::test]
    async fn retries_exactly_k_plus_one_times() {
        for failures in [1u32, 2] {
            let mut surface = ScriptedSurface::failing(failures);
            let sequencer = LoginSequencer::new(values(), 3);
            let attempts = sequencer.run(&mut surface).await.unwrap();
            assert_eq!(attempts, failures + 1);
            assert_eq!(surface.opens, failures + 1);
        }
    }

    #[tokio::test]
    async fn exhausts_budget_after_exactly_three_attempts() {
        let mut surface = ScriptedSurface::failing(u32::MAX);
        let sequencer = LoginSequencer::new(values(), 3);
        let err = sequencer.run(&mut surface).await.unwrap_err();
        assert!(matches!(err, LoginError::NoSubmitControl));
        // No more, no fewer.
        assert_eq!(surface.opens, 3);
    }

    #[tokio::test]
    async fn each_attempt_restarts_from_the_beginning() {
        let mut surface = ScriptedSurface::failing(1);
        let sequencer = LoginSequencer::new(values(), 3);
        sequencer.run(&mut surface).await.unwrap();

        let calls = surface.calls.lock().unwrap().clone();
        // Two full passes up to submit; the second continues through
        // navigation and dashboard confirmation.
        let expected = vec![
            "open",
            "fill:EntityId",
            "fill:Username",
            "fill:Password",
            "submit",
            "open",
            "fill:EntityId",
            "fill:Username",
            "fill:Password",
            "submit",
            "navigation",
            "dashboard",
        ];
        assert_eq!(calls, expected);
    }

    #[tokio::test]
    async fn confirmation_failure_is_retried_too() {
        struct UnconfirmedOnce {
            attempts: u32,
        }

        #[async_trait]
        impl LoginSurface for UnconfirmedOnce {
            async fn open_login(&mut self) -> Result<(), LoginError> {
                self.attempts += 1;
                Ok(())
            }
            async fn fill_field(
                &mut self,
                _field: LoginField,
                _value: &str,
            ) -> Result<(), LoginError> {
                Ok(())
            }
            async fn press_submit(&mut self) -> Result<(), LoginError> {
                Ok(())
            }
            async fn await_navigation(&mut self) -> Result<(), LoginError> {
                Ok(())
            }
            async fn confirm_dashboard(&mut self) -> Result<(), LoginError> {
                if self.attempts == 1 {
                    Err(LoginError::LoginNotConfirmed)
                } else {
                    Ok(())
                }
            }
        }

        let mut surface = UnconfirmedOnce { attempts: 0 };
        let sequencer = LoginSequencer::new(values(), 3);
        assert_eq!(sequencer.run(&mut surface).await.unwrap(), 2);
    }

    #[test]
    fn field_failure_states() {
        assert_eq!(LoginField::EntityId.failure_state(), LoginState::Start);
        assert_eq!(
            LoginField::Username.failure_state(),
            LoginState::EntityEntered
        );
        assert_eq!(
            LoginField::Password.failure_state(),
            LoginState::EntityEntered
        );
    }

    #[test]
    fn marker_matching() {
        let markers = vec!["dashboard".to_string(), "sign out".to_string()];
        assert!(contains_any_marker("Welcome to your Dashboard", &markers));
        assert!(contains_any_marker("... Sign Out ...", &markers));
        assert!(!contains_any_marker("Please log in", &markers));
        assert!(!contains_any_marker("", &markers));
    }

    #[test]
    fn state_display_names() {
        assert_eq!(LoginState::Start.to_string(), "start");
        assert_eq!(
            LoginState::DashboardConfirmed.to_string(),
            "dashboard-confirmed"
        );
        assert_eq!(LoginState::Failed.to_string(), "failed");
    }
}
