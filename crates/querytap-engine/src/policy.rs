//! Capture policy: when to stop waiting for traffic.
//!
//! Two policies, selected by configuration. The fixed window sleeps the
//! whole monitoring duration and stops regardless of buffer contents. The
//! cyclic policy waits in fixed-delay cycles and exits early as soon as
//! anything has been buffered; it is the escalation-capable variant -- the
//! run driver relaunches a headless session headful once when a cyclic
//! wait ends with an empty buffer.

use std::time::Duration;

use querytap_types::{CaptureBuffer, CaptureConfig, CapturePolicyKind};

/// A concrete capture-window policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturePolicy {
    /// Sleep `window`, then stop.
    FixedWindow { window: Duration },
    /// Up to `cycles` cycles of `delay`, exiting early on a non-empty buffer.
    Cyclic { cycles: u32, delay: Duration },
}

impl CapturePolicy {
    /// Build the configured policy from the consolidated timing surface.
    pub fn from_config(config: &CaptureConfig) -> Self {
        match config.policy {
            CapturePolicyKind::FixedWindow => CapturePolicy::FixedWindow {
                window: config.timings.fixed_window,
            },
            CapturePolicyKind::Cyclic => CapturePolicy::Cyclic {
                cycles: config.timings.capture_cycles,
                delay: config.timings.cycle_delay,
            },
        }
    }

    /// Whether an empty capture under this policy triggers the
    /// headless-to-headful escalation.
    pub fn escalates(&self) -> bool {
        matches!(self, CapturePolicy::Cyclic { .. })
    }
}

/// How the capture window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The fixed window elapsed (buffer may or may not hold events).
    WindowElapsed,
    /// The cyclic wait saw a non-empty buffer after `cycle` cycles.
    EarlyExit { cycle: u32 },
    /// All cycles completed with an empty buffer.
    CyclesExhausted,
}

/// Run the capture window against the shared buffer.
pub async fn wait_for_capture(policy: &CapturePolicy, buffer: &CaptureBuffer) -> WaitResult {
    match *policy {
        CapturePolicy::FixedWindow { window } => {
            tracing::info!(?window, "monitoring traffic for the fixed window");
            tokio::time::sleep(window).await;
            tracing::info!(captured = buffer.len(), "fixed window elapsed");
            WaitResult::WindowElapsed
        }
        CapturePolicy::Cyclic { cycles, delay } => {
            for cycle in 1..=cycles.max(1) {
                tracing::info!(cycle, cycles, captured = buffer.len(), "capture cycle");
                tokio::time::sleep(delay).await;
                if !buffer.is_empty() {
                    tracing::info!(cycle, captured = buffer.len(), "traffic observed; exiting wait early");
                    return WaitResult::EarlyExit { cycle };
                }
            }
            tracing::warn!(cycles, "capture cycles exhausted with an empty buffer");
            WaitResult::CyclesExhausted
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
