//! Browser session lifecycle.
//!
//! A [`Session`] owns exactly one browser process launched with a DevTools
//! port on loopback and an isolated temporary profile. It exposes the live
//! target list (pages, frames, workers -- the execution contexts that can
//! emit network traffic) and connects [`Page`] drivers to them.
//!
//! `close` is idempotent and must run on every exit path; an orphaned
//! browser process is a correctness violation, not merely untidy. The
//! `Drop` implementation is a backstop only -- the run driver closes
//! explicitly.

use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::{Child, Command};

use querytap_types::LaunchMode;

use crate::error::BrowserError;
use crate::page::Page;

/// Interval between DevTools endpoint readiness probes after launch.
const ENDPOINT_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Target listing
// ---------------------------------------------------------------------------

/// One entry from the DevTools `/json/list` target listing.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    /// DevTools target identifier.
    pub id: String,
    /// Target kind: "page", "iframe", "service_worker", ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Current document title.
    #[serde(default)]
    pub title: String,
    /// Current document URL.
    #[serde(default)]
    pub url: String,
    /// WebSocket endpoint for attaching; absent when another client holds it.
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One browser process and its DevTools endpoint.
pub struct Session {
    mode: LaunchMode,
    port: u16,
    child: Option<Child>,
    /// Removed from disk when the session is dropped.
    profile_dir: Option<tempfile::TempDir>,
    http: reqwest::Client,
}

impl Session {
    /// Launch a browser in the given mode and wait for its DevTools
    /// endpoint to come up.
    pub async fn launch(
        binary: &Path,
        mode: LaunchMode,
        launch_timeout: Duration,
    ) -> Result<Self, BrowserError> {
        let port = pick_free_port()?;
        let profile_dir = tempfile::tempdir().map_err(|e| BrowserError::LaunchFailed {
            reason: format!("failed to create profile directory: {e}"),
        })?;

        let args = build_launch_args(mode, port, profile_dir.path());
        tracing::info!(
            binary = %binary.display(),
            %mode,
            port,
            "launching browser"
        );

        let child = Command::new(binary)
            .args(&args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrowserError::LaunchFailed {
                reason: format!("failed to spawn {}: {e}", binary.display()),
            })?;

        let session = Self {
            mode,
            port,
            child: Some(child),
            profile_dir: Some(profile_dir),
            http: reqwest::Client::new(),
        };
        session.wait_for_endpoint(launch_timeout).await?;
        tracing::info!(port, "DevTools endpoint ready");
        Ok(session)
    }

    /// The mode this session was launched in.
    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    /// DevTools port on loopback.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Poll `/json/version` until the endpoint answers or the bound expires.
    async fn wait_for_endpoint(&self, timeout: Duration) -> Result<(), BrowserError> {
        let url = format!("http://127.0.0.1:{}/json/version", self.port);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.http.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::EndpointNotReady { duration: timeout });
            }
            tokio::time::sleep(ENDPOINT_POLL_INTERVAL).await;
        }
    }

    /// List the browser's live targets (execution contexts).
    pub async fn targets(&self) -> Result<Vec<TargetInfo>, BrowserError> {
        let url = format!("http://127.0.0.1:{}/json/list", self.port);
        let targets: Vec<TargetInfo> = self.http.get(&url).send().await?.json().await?;
        Ok(targets)
    }

    /// Connect a [`Page`] driver to the first page target.
    pub async fn primary_page(&self) -> Result<Page, BrowserError> {
        let targets = self.targets().await?;
        let target = targets
            .iter()
            .find(|t| t.kind == "page" && t.web_socket_debugger_url.is_some())
            .ok_or_else(|| BrowserError::Protocol {
                detail: "no attachable page target in DevTools listing".to_string(),
            })?;
        self.attach(target).await
    }

    /// Connect a [`Page`] driver to a specific target.
    pub async fn attach(&self, target: &TargetInfo) -> Result<Page, BrowserError> {
        let ws_url = target
            .web_socket_debugger_url
            .as_deref()
            .ok_or_else(|| BrowserError::ConnectionFailed {
                url: target.url.clone(),
                reason: "target has no WebSocket debugger URL".to_string(),
            })?;
        Page::connect(ws_url).await
    }

    /// Tear down the browser process. Idempotent: the first call kills the
    /// process and discards the profile directory; later calls are no-ops.
    pub async fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.kill().await {
                Ok(()) => tracing::info!(port = self.port, "browser session closed"),
                Err(e) => tracing::warn!(error = %e, "failed to kill browser process"),
            }
        }
        // Dropping the TempDir removes the profile from disk.
        self.profile_dir.take();
    }

    /// Whether `close` has already run.
    pub fn is_closed(&self) -> bool {
        self.child.is_none()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            tracing::warn!("session dropped without close; killing browser process");
            let _ = child.start_kill();
        }
    }
}

// ---------------------------------------------------------------------------
// Launch plumbing
// ---------------------------------------------------------------------------

/// Bind-and-release an ephemeral loopback port for the DevTools endpoint.
fn pick_free_port() -> Result<u16, BrowserError> {
    let listener = TcpListener::bind("127.0.0.1:0").map_err(|e| BrowserError::LaunchFailed {
        reason: format!("failed to reserve DevTools port: {e}"),
    })?;
    let port = listener
        .local_addr()
        .map_err(|e| BrowserError::LaunchFailed {
            reason: format!("failed to read reserved port: {e}"),
        })?
        .port();
    Ok(port)
}

/// Browser command-line for a capture session.
pub fn build_launch_args(mode: LaunchMode, port: u16, profile_dir: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={port}"),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-popup-blocking".to_string(),
    ];
    if mode == LaunchMode::Headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }
    args.push("about:blank".to_string());
    args
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_args_headless() {
        let args = build_launch_args(LaunchMode::Headless, 9333, Path::new("/tmp/profile-x"));
        assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile-x".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));
    }

    #[test]
    fn launch_args_headful_omit_headless_flags() {
        let args = build_launch_args(LaunchMode::Headful, 9333, Path::new("/tmp/profile-x"));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert!(!args.contains(&"--disable-gpu".to_string()));
    }

    #[test]
    fn pick_free_port_returns_usable_port() {
        let port = pick_free_port().unwrap();
        assert_ne!(port, 0);
    }

    #[test]
    fn target_listing_parses() {
        let json = r#"[
            {
                "id": "F8B2C",
                "type": "page",
                "title": "Portal",
                "url": "https://portal.example.com/home",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9333/devtools/page/F8B2C"
            },
            {
                "id": "A10",
                "type": "iframe",
                "url": "https://app.powerbi.com/reportEmbed?reportId=1"
            }
        ]"#;
        let targets: Vec<TargetInfo> = serde_json::from_str(json).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].kind, "page");
        assert!(targets[0].web_socket_debugger_url.is_some());
        assert_eq!(targets[1].kind, "iframe");
        assert!(targets[1].web_socket_debugger_url.is_none());
        assert_eq!(targets[1].title, "");
    }
}
