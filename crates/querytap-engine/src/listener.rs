//! Capture listener: network-event observation on one execution context.
//!
//! A listener consumes a CDP event subscription, converts request/response
//! events into [`CapturedEvent`] records, applies the backend-endpoint URL
//! filter, best-effort fetches response bodies, and appends matches to the
//! shared [`CaptureBuffer`]. Non-matching traffic is logged at trace level
//! and discarded.
//!
//! Any number of listeners (primary context plus one per discovered
//! surface) write into the same buffer; the buffer serializes appends, so
//! insertion order is observation order. Detach is explicit and must happen
//! before the owning context is torn down.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;

use querytap_browser::{CdpClient, CdpEvent};
use querytap_types::{CaptureBuffer, CapturedEvent, Direction};

use crate::filter::UrlFilter;

// ---------------------------------------------------------------------------
// Event conversion (pure)
// ---------------------------------------------------------------------------

/// A network event converted into a capture record, plus the request ID
/// needed to fetch a response body.
#[derive(Debug, Clone)]
pub struct Observation {
    pub event: CapturedEvent,
    /// Set for responses; used for the best-effort body fetch.
    pub response_request_id: Option<String>,
}

/// Convert a CDP network event into an observation. Returns `None` for
/// event types the capture does not record.
pub fn observation_from_cdp(event: &CdpEvent) -> Option<Observation> {
    match event.method.as_str() {
        "Network.requestWillBeSent" => {
            let request = event.params.get("request")?;
            let url = request.get("url")?.as_str()?.to_string();
            let method = request
                .get("method")
                .and_then(|m| m.as_str())
                .map(str::to_string);
            let authorization = header_value(request.get("headers"), "authorization");
            let body = request
                .get("postData")
                .and_then(|d| d.as_str())
                .map(parse_body);
            Some(Observation {
                event: CapturedEvent {
                    direction: Direction::Request,
                    url,
                    method,
                    status: None,
                    authorization,
                    body,
                    timestamp: Utc::now(),
                },
                response_request_id: None,
            })
        }
        "Network.responseReceived" => {
            let response = event.params.get("response")?;
            let url = response.get("url")?.as_str()?.to_string();
            let status = response
                .get("status")
                .and_then(|s| s.as_u64())
                .and_then(|s| u16::try_from(s).ok());
            let request_id = event
                .params
                .get("requestId")
                .and_then(|id| id.as_str())
                .map(str::to_string);
            Some(Observation {
                event: CapturedEvent {
                    direction: Direction::Response,
                    url,
                    method: None,
                    status,
                    authorization: None,
                    body: None,
                    timestamp: Utc::now(),
                },
                response_request_id: request_id,
            })
        }
        _ => None,
    }
}

/// Case-insensitive header lookup on a CDP headers object.
fn header_value(headers: Option<&Value>, name: &str) -> Option<String> {
    let headers = headers?.as_object()?;
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, value)| value.as_str())
        .map(str::to_string)
}

/// Parse a body string: JSON where possible, raw string otherwise.
pub fn parse_body(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

// ---------------------------------------------------------------------------
// CaptureListener
// ---------------------------------------------------------------------------

/// A running listener attached to one execution context.
pub struct CaptureListener {
    label: String,
    task: tokio::task::JoinHandle<()>,
}

impl CaptureListener {
    /// Attach to an event subscription and start buffering matches.
    ///
    /// `body_source` is the context's CDP client, used for the best-effort
    /// `Network.getResponseBody` fetch; pass `None` when bodies are not
    /// retrievable (the record is still captured without one).
    pub fn attach(
        label: impl Into<String>,
        mut events: broadcast::Receiver<CdpEvent>,
        body_source: Option<Arc<CdpClient>>,
        filter: UrlFilter,
        buffer: CaptureBuffer,
    ) -> Self {
        let label = label.into();
        let task_label = label.clone();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if !event.method.starts_with("Network.") {
                            continue;
                        }
                        let Some(mut observation) = observation_from_cdp(&event) else {
                            continue;
                        };
                        if !filter.matches(&observation.event.url) {
                            tracing::trace!(
                                listener = %task_label,
                                url = %observation.event.url,
                                "discarding non-matching traffic"
                            );
                            continue;
                        }

                        if let (Some(client), Some(request_id)) =
                            (body_source.as_ref(), observation.response_request_id.as_deref())
                        {
                            observation.event.body = fetch_response_body(client, request_id).await;
                        }

                        tracing::debug!(
                            listener = %task_label,
                            direction = ?observation.event.direction,
                            url = %observation.event.url,
                            "captured matching event"
                        );
                        buffer.push(observation.event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            listener = %task_label,
                            skipped,
                            "listener lagged; events dropped by the fan-out"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!(listener = %task_label, "event stream closed");
                        break;
                    }
                }
            }
        });

        Self { label, task }
    }

    /// Stop consuming and wait for the listener task to finish. Must be
    /// called before the owning context closes.
    pub async fn detach(self) {
        self.task.abort();
        let _ = self.task.await;
        tracing::debug!(listener = %self.label, "capture listener detached");
    }
}

/// Best-effort `Network.getResponseBody`. Bodies are frequently not yet
/// available (or evicted) when the response event arrives; failure only
/// costs the body, never the record.
async fn fetch_response_body(client: &Arc<CdpClient>, request_id: &str) -> Option<Value> {
    let result = client
        .send_command(
            "Network.getResponseBody",
            serde_json::json!({ "requestId": request_id }),
        )
        .await;
    match result {
        Ok(value) => {
            let body = value.get("body")?.as_str()?;
            let base64_encoded = value
                .get("base64Encoded")
                .and_then(|b| b.as_bool())
                .unwrap_or(false);
            if base64_encoded {
                let bytes = B64.decode(body).ok()?;
                let text = String::from_utf8(bytes).ok()?;
                Some(parse_body(&text))
            } else {
                Some(parse_body(body))
            }
        }
        Err(error) => {
            tracing::debug!(request_id, %error, "response body not retrievable");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request_event(url: &str, body: Option<&str>) -> CdpEvent {
        let mut request = serde_json::json!({
            "url": url,
            "method": "POST",
            "headers": { "Authorization": "Bearer eyJ0es...", "Content-Type": "application/json" },
        });
        if let Some(body) = body {
            request["postData"] = Value::String(body.to_string());
        }
        CdpEvent {
            method: "Network.requestWillBeSent".to_string(),
            params: serde_json::json!({ "requestId": "1000.1", "request": request }),
        }
    }

    fn response_event(url: &str, status: u16) -> CdpEvent {
        CdpEvent {
            method: "Network.responseReceived".to_string(),
            params: serde_json::json!({
                "requestId": "1000.1",
                "response": { "url": url, "status": status },
            }),
        }
    }

    /// Wait until the buffer reaches `len` or a real-time deadline passes.
    async fn wait_for_len(buffer: &CaptureBuffer, len: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while buffer.len() < len {
            assert!(
                std::time::Instant::now() < deadline,
                "buffer never reached {len} events (has {})",
                buffer.len()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn endpoint_filter() -> UrlFilter {
        UrlFilter::new(["/public/reports/querydata"])
    }

    // -- Conversion ---------------------------------------------------------

    #[test]
    fn request_conversion_extracts_metadata_and_body() {
        let event = request_event(
            "https://x.example/public/reports/querydata",
            Some(r#"{"queries":[{"Query":{"Commands":[]}}]}"#),
        );
        let obs = observation_from_cdp(&event).unwrap();
        assert_eq!(obs.event.direction, Direction::Request);
        assert_eq!(obs.event.method.as_deref(), Some("POST"));
        assert_eq!(obs.event.authorization.as_deref(), Some("Bearer eyJ0es..."));
        assert!(obs.event.body.as_ref().unwrap()["queries"].is_array());
        assert!(obs.response_request_id.is_none());
    }

    #[test]
    fn unparseable_request_body_is_kept_raw() {
        let event = request_event("https://x.example/q", Some("a=1&b=2"));
        let obs = observation_from_cdp(&event).unwrap();
        assert_eq!(
            obs.event.body,
            Some(Value::String("a=1&b=2".to_string()))
        );
    }

    #[test]
    fn response_conversion_extracts_status_and_request_id() {
        let event = response_event("https://x.example/public/reports/querydata", 200);
        let obs = observation_from_cdp(&event).unwrap();
        assert_eq!(obs.event.direction, Direction::Response);
        assert_eq!(obs.event.status, Some(200));
        assert_eq!(obs.response_request_id.as_deref(), Some("1000.1"));
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let event = CdpEvent {
            method: "Network.loadingFinished".to_string(),
            params: serde_json::json!({ "requestId": "1000.1" }),
        };
        assert!(observation_from_cdp(&event).is_none());

        let event = CdpEvent {
            method: "Page.loadEventFired".to_string(),
            params: Value::Null,
        };
        assert!(observation_from_cdp(&event).is_none());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = serde_json::json!({ "AUTHORIZATION": "Bearer t" });
        assert_eq!(
            header_value(Some(&headers), "authorization").as_deref(),
            Some("Bearer t")
        );
        assert!(header_value(Some(&headers), "cookie").is_none());
        assert!(header_value(None, "authorization").is_none());
    }

    // -- Listener -----------------------------------------------------------

    #[tokio::test]
    async fn listener_buffers_only_matching_traffic_in_order() {
        let (tx, rx) = broadcast::channel(64);
        let buffer = CaptureBuffer::new();
        let listener = CaptureListener::attach(
            "primary",
            rx,
            None,
            endpoint_filter(),
            buffer.clone(),
        );

        tx.send(request_event("https://x.example/public/reports/querydata?n=1", None))
            .unwrap();
        tx.send(request_event("https://x.example/telemetry", None))
            .unwrap();
        tx.send(response_event("https://x.example/public/reports/querydata?n=1", 200))
            .unwrap();
        tx.send(request_event("https://cdn.example/app.js", None))
            .unwrap();
        tx.send(request_event("https://x.example/public/reports/querydata?n=2", None))
            .unwrap();

        wait_for_len(&buffer, 3).await;
        listener.detach().await;

        let events = buffer.snapshot();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].url, "https://x.example/public/reports/querydata?n=1");
        assert_eq!(events[0].direction, Direction::Request);
        assert_eq!(events[1].direction, Direction::Response);
        assert_eq!(events[2].url, "https://x.example/public/reports/querydata?n=2");
    }

    #[tokio::test]
    async fn two_listeners_share_one_buffer_in_arrival_order() {
        let (tx_a, rx_a) = broadcast::channel(64);
        let (tx_b, rx_b) = broadcast::channel(64);
        let buffer = CaptureBuffer::new();
        let listener_a =
            CaptureListener::attach("primary", rx_a, None, endpoint_filter(), buffer.clone());
        let listener_b =
            CaptureListener::attach("surface-1", rx_b, None, endpoint_filter(), buffer.clone());

        // Interleave: a match on A, noise on B, a match on B, noise on A,
        // a duplicate match on B. Sequence the sends so arrival order is
        // deterministic.
        tx_a.send(request_event("https://x.example/public/reports/querydata?src=a", None))
            .unwrap();
        wait_for_len(&buffer, 1).await;
        tx_b.send(request_event("https://x.example/static/logo.png", None))
            .unwrap();
        tx_b.send(request_event("https://x.example/public/reports/querydata?src=b", None))
            .unwrap();
        wait_for_len(&buffer, 2).await;
        tx_a.send(request_event("https://x.example/heartbeat", None))
            .unwrap();
        tx_b.send(request_event("https://x.example/public/reports/querydata?src=b", None))
            .unwrap();
        wait_for_len(&buffer, 3).await;

        listener_a.detach().await;
        listener_b.detach().await;

        let events = buffer.snapshot();
        assert_eq!(events.len(), 3);
        assert!(events[0].url.ends_with("src=a"));
        assert!(events[1].url.ends_with("src=b"));
        // Genuine duplicate observation preserved.
        assert!(events[2].url.ends_with("src=b"));
    }

    #[tokio::test]
    async fn detach_stops_consumption() {
        let (tx, rx) = broadcast::channel(64);
        let buffer = CaptureBuffer::new();
        let listener =
            CaptureListener::attach("primary", rx, None, endpoint_filter(), buffer.clone());

        tx.send(request_event("https://x.example/public/reports/querydata", None))
            .unwrap();
        wait_for_len(&buffer, 1).await;
        listener.detach().await;

        // Events sent after detach never land.
        let _ = tx.send(request_event("https://x.example/public/reports/querydata", None));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(buffer.len(), 1);
    }
}
