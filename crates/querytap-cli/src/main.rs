//! querytap -- log into the analytics portal, find the embedded report
//! surface, and capture the query traffic it emits.
//!
//! Configuration comes from `QUERYTAP_*` environment variables; the flags
//! below override individual keys for one-off runs. Exit codes: 0 on
//! completion (including an empty capture), 2 on configuration errors,
//! 1 on login failure after retries or a persistence failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use querytap_engine::{drive, BrowserCaptureSession, CapturePolicy, EngineError, PersistenceSink};
use querytap_types::{CaptureBuffer, CaptureConfig, ConfigError, LaunchMode, RunOutcome};

/// Capture embedded analytics query traffic from the portal.
#[derive(Parser, Debug)]
#[command(name = "querytap", version, about)]
struct Cli {
    /// Start the browser headful instead of headless
    #[arg(long)]
    headful: bool,

    /// Capture policy: fixed or cyclic
    #[arg(long)]
    policy: Option<String>,

    /// Override the capture wait window, in milliseconds
    #[arg(long)]
    wait_window_ms: Option<u64>,

    /// Artifact path (default: captured-queries.json)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Browser binary to launch (default: auto-discovered)
    #[arg(long)]
    browser: Option<PathBuf>,
}

/// Resolve configuration: CLI flags override environment keys.
fn build_config(cli: &Cli) -> Result<CaptureConfig, ConfigError> {
    CaptureConfig::from_lookup(|key| {
        let flag = match key {
            "QUERYTAP_HEADFUL" if cli.headful => Some("true".to_string()),
            "QUERYTAP_POLICY" => cli.policy.clone(),
            "QUERYTAP_WAIT_WINDOW_MS" => cli.wait_window_ms.map(|ms| ms.to_string()),
            "QUERYTAP_OUTPUT" => cli.output.as_ref().map(|p| p.display().to_string()),
            "QUERYTAP_BROWSER" => cli.browser.as_ref().map(|p| p.display().to_string()),
            _ => None,
        };
        flag.or_else(|| std::env::var(key).ok())
    })
}

async fn run(config: CaptureConfig) -> Result<RunOutcome, EngineError> {
    let buffer = CaptureBuffer::new();
    let policy = CapturePolicy::from_config(&config);
    let initial_mode = if config.headful {
        LaunchMode::Headful
    } else {
        LaunchMode::Headless
    };

    let outcome = drive(
        |mode| BrowserCaptureSession::launch(&config, mode),
        initial_mode,
        &policy,
        &buffer,
    )
    .await;

    // The buffer is persisted exactly once at run end, whatever the outcome.
    let sink = PersistenceSink::new(&config.output_path, config.write_empty_artifact);
    let events = buffer.snapshot();
    match outcome {
        Ok(outcome) => {
            sink.persist(&events)?;
            Ok(outcome)
        }
        Err(error) => {
            // The run is already failing; a persistence failure here is
            // logged but must not mask the original error.
            if let Err(persist_error) = sink.persist(&events) {
                tracing::error!(%persist_error, "failed to persist buffer on failure path");
            }
            Err(error)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            return ExitCode::from(2);
        }
    };

    tracing::info!(
        portal = %config.credentials.portal_url,
        policy = ?config.policy,
        output = %config.output_path.display(),
        "starting capture run"
    );

    match run(config).await {
        Ok(outcome) => {
            tracing::info!(%outcome, "capture run finished");
            ExitCode::from(outcome.exit_code())
        }
        Err(error) => {
            eprintln!("capture run failed: {error}");
            ExitCode::from(1)
        }
    }
}
