//! Top-level engine error taxonomy.

use thiserror::Error;

use crate::sink::PersistenceError;

/// Failures that end a capture run.
///
/// Recoverable conditions (a failed login attempt, a missed discovery
/// attempt) are handled inside their owning component; what reaches this
/// enum has already exhausted its local retry budget. Anything not in the
/// taxonomy is fatal rather than retried.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The login sequencer spent its whole retry budget.
    #[error("login failed after {attempts} attempts")]
    LoginFailed { attempts: u32 },

    /// A browser-level failure outside the login flow's retry scope.
    #[error(transparent)]
    Browser(#[from] querytap_browser::BrowserError),

    /// The capture artifact could not be written.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
