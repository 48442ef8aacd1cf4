//! Bounded-polling discovery of embedded report surfaces.
//!
//! Report surfaces render late and unpredictably, so discovery polls: each
//! attempt enumerates the current candidate URLs (nested frame sources and
//! live DevTools targets) and filters them against the surface markers.
//! The first non-empty result returns immediately -- the remaining budget
//! is never waited out. An exhausted budget is non-fatal: the run proceeds
//! against the primary context alone.

use std::time::Duration;

use async_trait::async_trait;

use crate::filter::UrlFilter;

/// An embedded report surface found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTarget {
    /// URL identifying the surface's execution context.
    pub identifier: String,
    /// Which polling attempt produced it (1-based).
    pub discovered_at_attempt: u32,
}

/// Enumerates the current candidate surface URLs.
///
/// A scan error is treated as an empty attempt, not a run failure: the
/// document may simply not be ready yet.
#[async_trait]
pub trait SurfaceScanner: Send {
    async fn scan(&mut self) -> Result<Vec<String>, querytap_browser::BrowserError>;
}

/// Poll `scanner` up to `max_attempts` times, `delay` apart, returning all
/// matches from the first attempt that produces any.
pub async fn discover_targets(
    scanner: &mut impl SurfaceScanner,
    filter: &UrlFilter,
    max_attempts: u32,
    delay: Duration,
) -> Vec<DiscoveredTarget> {
    for attempt in 1..=max_attempts.max(1) {
        let candidates = match scanner.scan().await {
            Ok(candidates) => candidates,
            Err(error) => {
                tracing::warn!(attempt, %error, "surface scan failed; treating as empty");
                Vec::new()
            }
        };

        let matches: Vec<DiscoveredTarget> = candidates
            .into_iter()
            .filter(|url| filter.matches(url))
            .map(|url| DiscoveredTarget {
                identifier: url,
                discovered_at_attempt: attempt,
            })
            .collect();

        if !matches.is_empty() {
            tracing::info!(
                attempt,
                count = matches.len(),
                "embedded report surface(s) discovered"
            );
            return matches;
        }

        tracing::debug!(attempt, max_attempts, "no report surface yet");
        if attempt < max_attempts {
            tokio::time::sleep(delay).await;
        }
    }

    tracing::warn!(
        max_attempts,
        "surface discovery budget exhausted; continuing with primary context only"
    );
    Vec::new()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
