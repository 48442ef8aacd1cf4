//! Chrome/Chromium binary location.
//!
//! The capture engine launches its own browser process, so it needs a
//! binary. A configured path always wins; otherwise the well-known install
//! locations for the current platform are probed in order and the first
//! candidate that exists and answers `--version` is used.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::BrowserError;

/// Well-known Chrome/Chromium binary paths for the current platform.
pub fn platform_candidate_paths() -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    }

    #[cfg(target_os = "linux")]
    {
        &[
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium-browser",
            "/usr/bin/chromium",
            "/snap/bin/chromium",
        ]
    }

    #[cfg(target_os = "windows")]
    {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        &[]
    }
}

/// Extract the dotted version number from `chrome --version` output
/// (e.g. "Google Chrome 120.0.6099.109" -> "120.0.6099.109").
pub fn parse_browser_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .rev()
        .find(|token| {
            token.contains('.') && token.chars().all(|c| c.is_ascii_digit() || c == '.')
        })
        .map(str::to_string)
}

/// Probe a binary by running `--version`; returns the parsed version when
/// the output contains one.
fn probe_version(path: &Path) -> Option<String> {
    let output = Command::new(path).arg("--version").output().ok()?;
    parse_browser_version(&String::from_utf8_lossy(&output.stdout))
}

/// Locate the browser binary to launch.
///
/// A configured path takes priority and is an error if it does not exist
/// (a misconfiguration should fail loudly, not silently fall back). Without
/// one, the platform candidates are scanned and the first existing binary
/// wins. The selected path and version are logged for the run record.
pub fn locate_browser(configured: Option<&Path>) -> Result<PathBuf, BrowserError> {
    if let Some(path) = configured {
        if !path.exists() {
            return Err(BrowserError::LaunchFailed {
                reason: format!("configured browser binary does not exist: {}", path.display()),
            });
        }
        tracing::info!(
            path = %path.display(),
            version = ?probe_version(path),
            "using configured browser binary"
        );
        return Ok(path.to_path_buf());
    }

    for candidate in platform_candidate_paths() {
        let path = Path::new(candidate);
        if !path.exists() {
            continue;
        }
        tracing::info!(
            path = %path.display(),
            version = ?probe_version(path),
            "selected browser binary"
        );
        return Ok(path.to_path_buf());
    }

    Err(BrowserError::NoBrowserFound)
}
