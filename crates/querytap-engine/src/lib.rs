//! querytap capture engine.
//!
//! The state-machine core of the system:
//!
//! - **`login`**: the five-step login sequencer with its whole-flow retry
//!   budget, driven over an abstract [`LoginSurface`].
//! - **`locator`**: ordered matcher strategies for the selector-uncertain
//!   submit control.
//! - **`discovery`**: bounded polling for embedded report surfaces with
//!   early return on the first hit.
//! - **`listener`**: network-event capture with the backend-endpoint URL
//!   filter, feeding the shared append-only buffer.
//! - **`policy`**: the fixed-window and cyclic capture policies.
//! - **`sink`**: atomic, idempotent persistence of the capture buffer.
//! - **`runner`**: the top-level driver guaranteeing one `close()` per
//!   session and owning the single headless-to-headful escalation.
//! - **`runtime`**: the only module that wires these onto a live browser.

pub mod discovery;
pub mod error;
pub mod filter;
pub mod listener;
pub mod locator;
pub mod login;
pub mod policy;
pub mod runner;
pub mod runtime;
pub mod sink;

pub use discovery::{discover_targets, DiscoveredTarget, SurfaceScanner};
pub use error::EngineError;
pub use filter::UrlFilter;
pub use listener::CaptureListener;
pub use locator::{ControlLocator, MatcherStrategy};
pub use login::{LoginError, LoginField, LoginSequencer, LoginState, LoginSurface, LoginValues};
pub use policy::{wait_for_capture, CapturePolicy, WaitResult};
pub use runner::{drive, run_session, CaptureSession, RunSignal};
pub use runtime::BrowserCaptureSession;
pub use sink::{PersistenceError, PersistenceSink};
