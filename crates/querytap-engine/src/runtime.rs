//! Wiring of the engine onto the live browser.
//!
//! Everything above this module is driven through traits
//! ([`LoginSurface`](crate::login::LoginSurface),
//! [`SurfaceScanner`](crate::discovery::SurfaceScanner),
//! [`CaptureSession`](crate::runner::CaptureSession)) so the state machines
//! stay testable; this module is the one place those traits meet
//! `querytap-browser`.

use async_trait::async_trait;
use tokio::sync::broadcast;

use querytap_browser::{chrome, BrowserError, CdpEvent, Page, ReadyCondition, Session};
use querytap_types::{CaptureBuffer, CaptureConfig, LaunchMode};

use crate::discovery::{discover_targets, DiscoveredTarget, SurfaceScanner};
use crate::error::EngineError;
use crate::filter::UrlFilter;
use crate::listener::CaptureListener;
use crate::locator::ControlLocator;
use crate::login::{contains_any_marker, LoginError, LoginField, LoginSequencer, LoginSurface, LoginValues};

// ---------------------------------------------------------------------------
// Login field selectors
// ---------------------------------------------------------------------------

/// Candidate selectors per login field, tried in order on every poll. The
/// portal's login markup has shifted across revisions; these cover the
/// variants seen so far.
fn field_selectors(field: LoginField) -> &'static [&'static str] {
    match field {
        LoginField::EntityId => &[
            r#"input[name="entityId"]"#,
            "#entityId",
            r#"input[name="storeNumber"]"#,
        ],
        LoginField::Username => &[
            r#"input[type="email"]"#,
            r#"input[name="username"]"#,
            "#username",
        ],
        LoginField::Password => &[r#"input[type="password"]"#, "#password"],
    }
}

// ---------------------------------------------------------------------------
// PortalLoginSurface
// ---------------------------------------------------------------------------

/// [`LoginSurface`] over a live portal page.
pub struct PortalLoginSurface {
    page: Page,
    config: CaptureConfig,
    /// Subscription taken just before submit so a fast navigation event
    /// cannot be missed.
    pending_nav: Option<broadcast::Receiver<CdpEvent>>,
}

impl PortalLoginSurface {
    pub fn new(page: Page, config: CaptureConfig) -> Self {
        Self {
            page,
            config,
            pending_nav: None,
        }
    }

    async fn dashboard_rendered(&self) -> Result<bool, BrowserError> {
        let text = self.page.body_text().await?;
        Ok(contains_any_marker(&text, &self.config.dashboard_markers))
    }
}

#[async_trait]
impl LoginSurface for PortalLoginSurface {
    async fn open_login(&mut self) -> Result<(), LoginError> {
        self.page
            .navigate(
                &self.config.credentials.portal_url,
                ReadyCondition::DomReady,
                self.config.timings.navigation_timeout,
            )
            .await?;
        Ok(())
    }

    async fn fill_field(&mut self, field: LoginField, value: &str) -> Result<(), LoginError> {
        let selectors: Vec<String> = field_selectors(field)
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let matched = self
            .page
            .wait_for_any_selector(&selectors, self.config.timings.element_timeout)
            .await
            .map_err(|error| match error {
                BrowserError::ElementNotFound { .. } => LoginError::ElementNotFound {
                    state: field.failure_state(),
                },
                other => LoginError::Browser(other),
            })?;
        self.page.type_text(&matched, value).await?;
        Ok(())
    }

    async fn press_submit(&mut self) -> Result<(), LoginError> {
        let controls = self.page.list_controls().await?;
        let locator = ControlLocator::submit(&self.config.submit_labels);
        let hit = locator.find(&controls).ok_or(LoginError::NoSubmitControl)?;
        tracing::debug!(index = hit.index, label = %hit.text, kind = %hit.kind, "pressing submit control");

        // Subscribe before the click so the resulting navigation is caught.
        self.pending_nav = Some(self.page.subscribe());
        self.page.click_control(hit.index).await?;
        Ok(())
    }

    async fn await_navigation(&mut self) -> Result<(), LoginError> {
        let events = self
            .pending_nav
            .take()
            .unwrap_or_else(|| self.page.subscribe());

        let wait = self
            .page
            .wait_ready(
                events,
                ReadyCondition::DomReady,
                self.config.timings.confirm_timeout,
            )
            .await;
        match wait {
            Ok(()) => Ok(()),
            // Single-page portals swap views without a load event; the
            // dashboard check decides whether that was actually a failure.
            Err(BrowserError::NavigationTimeout { .. }) => {
                if self.dashboard_rendered().await? {
                    Ok(())
                } else {
                    Err(LoginError::NavigationTimeout)
                }
            }
            Err(other) => Err(LoginError::Browser(other)),
        }
    }

    async fn confirm_dashboard(&mut self) -> Result<(), LoginError> {
        let predicate = marker_predicate(&self.config.dashboard_markers);
        self.page
            .wait_ready(
                self.page.subscribe(),
                ReadyCondition::Predicate(predicate),
                self.config.timings.confirm_timeout,
            )
            .await
            .map_err(|error| match error {
                BrowserError::NavigationTimeout { .. } => LoginError::LoginNotConfirmed,
                other => LoginError::Browser(other),
            })
    }
}

/// JavaScript predicate: does the rendered body text contain any marker?
fn marker_predicate(markers: &[String]) -> String {
    let needles: Vec<String> = markers
        .iter()
        .filter(|m| !m.is_empty())
        .map(|m| format!("'{}'", m.to_ascii_lowercase().replace('\\', "\\\\").replace('\'', "\\'")))
        .collect();
    format!(
        "(() => {{ const t = (document.body ? document.body.innerText : '').toLowerCase(); \
         return [{}].some(m => t.includes(m)); }})()",
        needles.join(", ")
    )
}

// ---------------------------------------------------------------------------
// BrowserScanner
// ---------------------------------------------------------------------------

/// [`SurfaceScanner`] merging live DevTools targets with the primary
/// document's nested frame sources.
struct BrowserScanner<'a> {
    session: &'a Session,
    page: &'a Page,
}

#[async_trait]
impl SurfaceScanner for BrowserScanner<'_> {
    async fn scan(&mut self) -> Result<Vec<String>, BrowserError> {
        let mut candidates: Vec<String> = self
            .session
            .targets()
            .await?
            .into_iter()
            .map(|t| t.url)
            .collect();
        candidates.extend(self.page.frame_urls().await?);
        Ok(candidates)
    }
}

// ---------------------------------------------------------------------------
// BrowserCaptureSession
// ---------------------------------------------------------------------------

/// [`CaptureSession`](crate::runner::CaptureSession) over a live browser.
pub struct BrowserCaptureSession {
    config: CaptureConfig,
    session: Session,
    primary: Page,
    /// Pages attached to discovered targets; must outlive their listeners.
    attached: Vec<Page>,
    listeners: Vec<CaptureListener>,
}

impl BrowserCaptureSession {
    /// Locate a browser binary, launch it in `mode`, and attach to the
    /// primary page.
    pub async fn launch(config: &CaptureConfig, mode: LaunchMode) -> Result<Self, EngineError> {
        let binary = chrome::locate_browser(config.browser_path.as_deref())
            .map_err(EngineError::Browser)?;
        let mut session = Session::launch(&binary, mode, config.timings.launch_timeout).await?;

        let primary = match session.primary_page().await {
            Ok(page) => page,
            Err(error) => {
                // The launch guarantee holds even when attachment fails.
                session.close().await;
                return Err(error.into());
            }
        };

        Ok(Self {
            config: config.clone(),
            session,
            primary,
            attached: Vec::new(),
            listeners: Vec::new(),
        })
    }
}

#[async_trait]
impl crate::runner::CaptureSession for BrowserCaptureSession {
    fn mode(&self) -> LaunchMode {
        self.session.mode()
    }

    async fn login(&mut self) -> Result<u32, EngineError> {
        let values = LoginValues {
            entity_id: self.config.credentials.entity_id.clone(),
            username: self.config.credentials.username.clone(),
            password: self.config.credentials.password.clone(),
        };
        let sequencer = LoginSequencer::new(values, self.config.timings.login_attempts);
        let mut surface = PortalLoginSurface::new(self.primary.clone(), self.config.clone());

        match sequencer.run(&mut surface).await {
            Ok(attempts) => Ok(attempts),
            Err(error) => {
                tracing::error!(%error, "login sequencer exhausted its budget");
                Err(EngineError::LoginFailed {
                    attempts: self.config.timings.login_attempts,
                })
            }
        }
    }

    async fn discover(&mut self) -> Result<Vec<DiscoveredTarget>, EngineError> {
        // Move to the analytics area that hosts the embedded surfaces. The
        // destination lazy-loads, so wait for the network to settle rather
        // than for a load event. Failure is non-fatal: the post-login page
        // may already host the surfaces.
        if let Err(error) = self
            .primary
            .navigate(
                &self.config.credentials.analytics_url,
                ReadyCondition::NetworkQuiescent(self.config.timings.network_quiescence),
                self.config.timings.navigation_timeout,
            )
            .await
        {
            tracing::warn!(
                url = %self.config.credentials.analytics_url,
                %error,
                "analytics navigation did not settle; discovering in place"
            );
        }

        let filter = UrlFilter::new(self.config.surface_markers.clone());
        let mut scanner = BrowserScanner {
            session: &self.session,
            page: &self.primary,
        };
        Ok(discover_targets(
            &mut scanner,
            &filter,
            self.config.timings.discovery_attempts,
            self.config.timings.discovery_delay,
        )
        .await)
    }

    async fn arm_listeners(
        &mut self,
        targets: &[DiscoveredTarget],
        buffer: &CaptureBuffer,
    ) -> Result<(), EngineError> {
        let filter = UrlFilter::new(self.config.query_endpoints.clone());

        // The primary context always gets a listener; in-process frames'
        // traffic surfaces here too.
        self.listeners.push(CaptureListener::attach(
            "primary",
            self.primary.subscribe(),
            Some(self.primary.client()),
            filter.clone(),
            buffer.clone(),
        ));

        // Discovered surfaces with their own DevTools target get a
        // dedicated listener each.
        let live_targets = self.session.targets().await?;
        for target in targets {
            let Some(info) = live_targets
                .iter()
                .find(|t| t.url == target.identifier && t.web_socket_debugger_url.is_some())
            else {
                tracing::debug!(
                    url = %target.identifier,
                    "surface has no standalone target; primary listener covers it"
                );
                continue;
            };
            let page = self.session.attach(info).await?;
            self.listeners.push(CaptureListener::attach(
                format!("surface:{}", info.id),
                page.subscribe(),
                Some(page.client()),
                filter.clone(),
                buffer.clone(),
            ));
            self.attached.push(page);
        }

        tracing::info!(listeners = self.listeners.len(), "capture listeners armed");
        Ok(())
    }

    async fn detach_listeners(&mut self) {
        for listener in self.listeners.drain(..) {
            listener.detach().await;
        }
        self.attached.clear();
    }

    async fn close(&mut self) {
        self.session.close().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
