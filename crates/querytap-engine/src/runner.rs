//! Top-level run driver.
//!
//! One logical run is: login, discover surfaces, arm listeners, wait out
//! the capture policy, detach, close. The driver owns two guarantees the
//! rest of the engine relies on:
//!
//! - `close()` runs exactly once per session on every exit path -- success,
//!   login failure, empty capture, or an unexpected error. An orphaned
//!   browser process is a correctness violation.
//! - Escalation is a value, not recursion: an empty headless capture under
//!   the cyclic policy yields [`RunSignal::Relaunch`], and the driver loop
//!   honors at most one relaunch before settling on `CaptureEmpty`.

use std::future::Future;

use async_trait::async_trait;

use querytap_types::{CaptureBuffer, LaunchMode, RunOutcome};

use crate::discovery::DiscoveredTarget;
use crate::error::EngineError;
use crate::policy::{wait_for_capture, CapturePolicy};

// ---------------------------------------------------------------------------
// CaptureSession
// ---------------------------------------------------------------------------

/// One launched session as the run driver sees it.
///
/// The browser-backed implementation lives in `runtime`; tests drive the
/// runner with scripted fakes.
#[async_trait]
pub trait CaptureSession: Send {
    /// The mode this session was launched in.
    fn mode(&self) -> LaunchMode;

    /// Run the full login sequence, including its retry budget. Returns
    /// the number of attempts used; `EngineError::LoginFailed` after the
    /// budget is spent.
    async fn login(&mut self) -> Result<u32, EngineError>;

    /// Bounded-polling discovery of embedded report surfaces. An empty
    /// result is non-fatal.
    async fn discover(&mut self) -> Result<Vec<DiscoveredTarget>, EngineError>;

    /// Attach capture listeners (primary context plus discovered targets)
    /// writing into `buffer`.
    async fn arm_listeners(
        &mut self,
        targets: &[DiscoveredTarget],
        buffer: &CaptureBuffer,
    ) -> Result<(), EngineError>;

    /// Detach all listeners; must run before `close`.
    async fn detach_listeners(&mut self);

    /// Idempotent session teardown.
    async fn close(&mut self);
}

// ---------------------------------------------------------------------------
// One session run
// ---------------------------------------------------------------------------

/// What a single session run asks the driver loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSignal {
    /// The run is over with this outcome.
    Complete(RunOutcome),
    /// Tear down and run again in the given mode (escalation).
    Relaunch(LaunchMode),
}

/// Drive one session through the full capture flow.
///
/// Whatever happens inside, listeners are detached and the session is
/// closed before this returns.
pub async fn run_session<S: CaptureSession>(
    session: &mut S,
    policy: &CapturePolicy,
    buffer: &CaptureBuffer,
) -> Result<RunSignal, EngineError> {
    let result = run_steps(session, policy, buffer).await;
    session.detach_listeners().await;
    session.close().await;
    result
}

async fn run_steps<S: CaptureSession>(
    session: &mut S,
    policy: &CapturePolicy,
    buffer: &CaptureBuffer,
) -> Result<RunSignal, EngineError> {
    session.login().await?;

    let targets = session.discover().await?;
    session.arm_listeners(&targets, buffer).await?;

    let wait = wait_for_capture(policy, buffer).await;
    tracing::debug!(?wait, captured = buffer.len(), "capture window finished");

    if !buffer.is_empty() {
        return Ok(RunSignal::Complete(RunOutcome::CaptureSucceeded));
    }
    if policy.escalates() && session.mode() == LaunchMode::Headless {
        return Ok(RunSignal::Relaunch(LaunchMode::Headful));
    }
    Ok(RunSignal::Complete(RunOutcome::CaptureEmpty))
}

// ---------------------------------------------------------------------------
// Driver loop
// ---------------------------------------------------------------------------

/// Run the capture flow, honoring at most one escalation relaunch.
///
/// `launch` is called once per session (twice when escalation fires). A
/// login failure after the retry budget becomes `RunOutcome::LoginFailed`
/// rather than an error -- it is a reportable terminal outcome with its own
/// exit code.
pub async fn drive<S, F, Fut>(
    mut launch: F,
    initial_mode: LaunchMode,
    policy: &CapturePolicy,
    buffer: &CaptureBuffer,
) -> Result<RunOutcome, EngineError>
where
    S: CaptureSession,
    F: FnMut(LaunchMode) -> Fut,
    Fut: Future<Output = Result<S, EngineError>>,
{
    let mut mode = initial_mode;
    let mut escalated = false;

    loop {
        let mut session = launch(mode).await?;
        match run_session(&mut session, policy, buffer).await {
            Err(EngineError::LoginFailed { attempts }) => {
                tracing::error!(attempts, "run ended: login failed");
                return Ok(RunOutcome::LoginFailed);
            }
            Err(error) => return Err(error),
            Ok(RunSignal::Complete(outcome)) => {
                tracing::info!(%outcome, "run complete");
                return Ok(outcome);
            }
            Ok(RunSignal::Relaunch(next)) => {
                if escalated {
                    // The escalation budget is one; a second signal can only
                    // mean the escalated run was also empty.
                    tracing::warn!("relaunch requested after escalation; treating as empty");
                    return Ok(RunOutcome::CaptureEmpty);
                }
                escalated = true;
                tracing::warn!(from = %mode, to = %next, "no traffic captured; escalating");
                mode = next;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
