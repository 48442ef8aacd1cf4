//! High-level page driver over the CDP client.
//!
//! A [`Page`] is one attached execution context. It provides the
//! primitives the capture engine composes: navigation with a selectable
//! ready condition, bounded element waits, credential injection, clicking,
//! rendered-text inspection, and frame enumeration.
//!
//! All waits are bounded; a primitive either completes, times out with a
//! typed error, or surfaces the underlying protocol failure.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::cdp::{CdpClient, CdpEvent};
use crate::error::BrowserError;

/// Interval between element-presence and predicate polls.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Opaque handle to a DOM node, as returned by CDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub i64);

/// When a navigation counts as complete.
///
/// Chosen per navigation: a static login page is done at the load event,
/// while a dashboard that lazy-loads embedded surfaces needs network
/// quiescence or an explicit predicate.
#[derive(Debug, Clone)]
pub enum ReadyCondition {
    /// The page fired its load event.
    DomReady,
    /// No network activity for the given quiet period.
    NetworkQuiescent(Duration),
    /// A JavaScript expression polled until it evaluates truthy.
    Predicate(String),
}

/// A clickable control as seen in the rendered page, in document order.
///
/// Gathered in one pass so the engine's control locator can run its
/// matcher strategies over a stable candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDescription {
    /// Position within the gathered candidate list.
    pub index: usize,
    /// Visible label text (innerText or value), trimmed.
    pub text: String,
    /// ARIA role attribute, when present.
    pub role: String,
    /// Element kind: tag name, or `input:{type}` for inputs.
    pub kind: String,
}

/// CSS selector gathering the clickable-control candidates.
const CONTROL_SELECTOR: &str =
    r#"button, input[type="submit"], input[type="button"], [role="button"], a"#;

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// One attached execution context. Clones share the same CDP client.
#[derive(Clone)]
pub struct Page {
    client: Arc<CdpClient>,
}

impl Page {
    /// Attach to a DevTools target and enable the domains the engine needs.
    ///
    /// `Network` is enabled eagerly so capture listeners can subscribe to
    /// an already-flowing event stream.
    pub async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        let client = CdpClient::connect(ws_url).await?;
        client.enable_domain("Page").await?;
        client.enable_domain("DOM").await?;
        client.enable_domain("Runtime").await?;
        client.enable_domain("Network").await?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Shared handle to the underlying CDP client.
    pub fn client(&self) -> Arc<CdpClient> {
        Arc::clone(&self.client)
    }

    /// Subscribe to this context's CDP event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.client.subscribe()
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    /// Navigate and wait for the ready condition within `timeout`.
    ///
    /// The event subscription is taken before `Page.navigate` is sent, so a
    /// fast load event cannot slip past the wait.
    pub async fn navigate(
        &self,
        url: &str,
        ready: ReadyCondition,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let events = self.client.subscribe();

        let result = self
            .client
            .send_command("Page.navigate", serde_json::json!({ "url": url }))
            .await?;
        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(BrowserError::NavigationFailed {
                reason: error_text.to_string(),
            });
        }

        self.wait_ready(events, ready, timeout).await
    }

    /// Wait for a ready condition against an existing event subscription.
    pub async fn wait_ready(
        &self,
        events: broadcast::Receiver<CdpEvent>,
        ready: ReadyCondition,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        match ready {
            ReadyCondition::DomReady => self.wait_for_load_event(events, timeout).await,
            ReadyCondition::NetworkQuiescent(quiet) => {
                self.wait_for_quiescence(events, quiet, timeout).await
            }
            ReadyCondition::Predicate(expression) => {
                self.wait_for_predicate(&expression, timeout).await
            }
        }
    }

    async fn wait_for_load_event(
        &self,
        mut events: broadcast::Receiver<CdpEvent>,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(BrowserError::NavigationTimeout { duration: timeout });
            }
            match tokio::time::timeout(remaining, events.recv()).await {
                Ok(Ok(event)) if event.method == "Page.loadEventFired" => return Ok(()),
                Ok(Ok(_)) => {} // unrelated event, keep waiting
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    // The load event may be among the skipped ones; fall back
                    // to a readyState check rather than waiting forever.
                    tracing::warn!(skipped, "event subscriber lagged during load wait");
                    if self.is_document_complete().await? {
                        return Ok(());
                    }
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(BrowserError::Protocol {
                        detail: "event stream closed while waiting for page load".to_string(),
                    });
                }
                Err(_) => return Err(BrowserError::NavigationTimeout { duration: timeout }),
            }
        }
    }

    async fn wait_for_quiescence(
        &self,
        mut events: broadcast::Receiver<CdpEvent>,
        quiet: Duration,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::NavigationTimeout { duration: timeout });
            }
            match tokio::time::timeout(quiet, events.recv()).await {
                // Quiet period elapsed with no event at all: done.
                Err(_) => return Ok(()),
                // Network activity resets the quiet period.
                Ok(Ok(event)) if event.method.starts_with("Network.") => {}
                // Non-network events do not count as activity.
                Ok(Ok(_)) => {}
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "event subscriber lagged during quiescence wait");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(BrowserError::Protocol {
                        detail: "event stream closed while waiting for quiescence".to_string(),
                    });
                }
            }
        }
    }

    async fn wait_for_predicate(
        &self,
        expression: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if is_truthy(&self.evaluate(expression).await?) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::NavigationTimeout { duration: timeout });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn is_document_complete(&self) -> Result<bool, BrowserError> {
        let value = self.evaluate("document.readyState === 'complete'").await?;
        Ok(is_truthy(&value))
    }

    // -----------------------------------------------------------------------
    // JavaScript evaluation
    // -----------------------------------------------------------------------

    /// Evaluate a JavaScript expression in the page context.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        let result = self
            .client
            .send_command(
                "Runtime.evaluate",
                serde_json::json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let message = exception
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|d| d.as_str())
                .or_else(|| exception.get("text").and_then(|t| t.as_str()))
                .unwrap_or("unknown exception")
                .to_string();
            return Err(BrowserError::JsException { message });
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    // -----------------------------------------------------------------------
    // DOM queries and element waits
    // -----------------------------------------------------------------------

    async fn document_root(&self) -> Result<i64, BrowserError> {
        let result = self
            .client
            .send_command("DOM.getDocument", serde_json::json!({}))
            .await?;
        result
            .get("root")
            .and_then(|r| r.get("nodeId"))
            .and_then(|n| n.as_i64())
            .ok_or_else(|| BrowserError::Protocol {
                detail: "DOM.getDocument did not return a root nodeId".to_string(),
            })
    }

    /// Find a single element; `Ok(None)` when nothing matches.
    pub async fn query_selector(&self, selector: &str) -> Result<Option<NodeId>, BrowserError> {
        let root = self.document_root().await?;
        let result = self
            .client
            .send_command(
                "DOM.querySelector",
                serde_json::json!({ "nodeId": root, "selector": selector }),
            )
            .await?;
        let node_id = result.get("nodeId").and_then(|n| n.as_i64()).unwrap_or(0);
        Ok((node_id != 0).then_some(NodeId(node_id)))
    }

    /// Poll an ordered list of candidate selectors until one matches.
    ///
    /// Login pages differ across portal revisions, so each input is
    /// described by several selectors tried in order on every poll. Returns
    /// the first selector that matched.
    pub async fn wait_for_any_selector(
        &self,
        selectors: &[String],
        timeout: Duration,
    ) -> Result<String, BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for selector in selectors {
                if self.query_selector(selector).await?.is_some() {
                    return Ok(selector.clone());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::ElementNotFound {
                    selector: selectors.join(", "),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    // -----------------------------------------------------------------------
    // Element interaction
    // -----------------------------------------------------------------------

    /// Type text into the element matching `selector`.
    ///
    /// Focuses the element, then dispatches per-character key events so
    /// framework change-listeners fire as they would for real input.
    pub async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let node_id = self
            .query_selector(selector)
            .await?
            .ok_or_else(|| BrowserError::ElementNotFound {
                selector: selector.to_string(),
            })?;

        self.client
            .send_command("DOM.focus", serde_json::json!({ "nodeId": node_id.0 }))
            .await?;

        for ch in text.chars() {
            let ch_str = ch.to_string();
            for event_type in ["keyDown", "keyUp"] {
                self.client
                    .send_command(
                        "Input.dispatchKeyEvent",
                        serde_json::json!({
                            "type": event_type,
                            "text": ch_str,
                            "unmodifiedText": ch_str,
                            "key": ch_str,
                        }),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Click the element matching `selector` with real mouse events at the
    /// element's center.
    pub async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let node_id = self
            .query_selector(selector)
            .await?
            .ok_or_else(|| BrowserError::ElementNotFound {
                selector: selector.to_string(),
            })?;

        let result = self
            .client
            .send_command("DOM.getBoxModel", serde_json::json!({ "nodeId": node_id.0 }))
            .await?;
        let quad: Vec<f64> = result
            .get("model")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_f64()).collect())
            .unwrap_or_default();
        let (cx, cy) = center_of_quad(&quad).ok_or_else(|| BrowserError::Protocol {
            detail: format!("no usable box model for {selector}"),
        })?;

        for event_type in ["mousePressed", "mouseReleased"] {
            self.client
                .send_command(
                    "Input.dispatchMouseEvent",
                    serde_json::json!({
                        "type": event_type,
                        "x": cx,
                        "y": cy,
                        "button": "left",
                        "clickCount": 1,
                    }),
                )
                .await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Control gathering (for the engine's control locator)
    // -----------------------------------------------------------------------

    /// Gather the rendered clickable controls in document order.
    pub async fn list_controls(&self) -> Result<Vec<ControlDescription>, BrowserError> {
        let expression = format!(
            r#"(() => {{
                const els = Array.from(document.querySelectorAll('{CONTROL_SELECTOR}'));
                return els.map((el, i) => ({{
                    index: i,
                    text: (el.innerText || el.value || '').trim(),
                    role: el.getAttribute('role') || '',
                    kind: el.tagName === 'INPUT'
                        ? 'input:' + (el.getAttribute('type') || 'text')
                        : el.tagName.toLowerCase(),
                }}));
            }})()"#
        );
        let value = self.evaluate(&expression).await?;
        Ok(parse_controls(&value))
    }

    /// Click the `index`-th control from the same gathering pass.
    pub async fn click_control(&self, index: usize) -> Result<(), BrowserError> {
        let expression = format!(
            r#"(() => {{
                const els = Array.from(document.querySelectorAll('{CONTROL_SELECTOR}'));
                if (!els[{index}]) return false;
                els[{index}].click();
                return true;
            }})()"#
        );
        let value = self.evaluate(&expression).await?;
        if is_truthy(&value) {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound {
                selector: format!("control #{index}"),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Page content
    // -----------------------------------------------------------------------

    /// Visible text of the rendered document body.
    pub async fn body_text(&self) -> Result<String, BrowserError> {
        let value = self
            .evaluate("document.body ? document.body.innerText : ''")
            .await?;
        Ok(value.as_str().unwrap_or("").to_string())
    }

    /// Current page URL.
    pub async fn current_url(&self) -> Result<String, BrowserError> {
        let value = self.evaluate("window.location.href").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol {
                detail: "location.href evaluation did not return a string".to_string(),
            })
    }

    /// URLs of all nested frames in the current document.
    pub async fn frame_urls(&self) -> Result<Vec<String>, BrowserError> {
        let value = self
            .evaluate(
                "Array.from(document.querySelectorAll('iframe')).map(f => f.src).filter(Boolean)",
            )
            .await?;
        Ok(value
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// JavaScript truthiness of an evaluated value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Center point of a content quad (8 coordinates), or `None` if degenerate.
pub fn center_of_quad(quad: &[f64]) -> Option<(f64, f64)> {
    if quad.len() < 8 {
        return None;
    }
    let xs: Vec<f64> = quad.iter().step_by(2).copied().collect();
    let ys: Vec<f64> = quad.iter().skip(1).step_by(2).copied().collect();
    let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_x <= min_x || max_y <= min_y {
        return None;
    }
    Some(((min_x + max_x) / 2.0, (min_y + max_y) / 2.0))
}

/// Parse the control-gathering expression's return value.
pub fn parse_controls(value: &Value) -> Vec<ControlDescription> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    Some(ControlDescription {
                        index: item.get("index")?.as_u64()? as usize,
                        text: item.get("text")?.as_str()?.to_string(),
                        role: item.get("role")?.as_str()?.to_string(),
                        kind: item.get("kind")?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
