//! Low-level CDP (Chrome DevTools Protocol) WebSocket client.
//!
//! Connects to one DevTools target and provides JSON-RPC command/response
//! correlation plus an event fan-out. Commands are sent with
//! auto-incrementing IDs; responses are routed back to the awaiting caller.
//! Events are published on a broadcast channel so that independent
//! consumers -- a navigation wait and a capture listener on the same page --
//! each see the full event stream without contending for one receiver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::BrowserError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>>;

/// Buffered events per subscriber before the oldest are dropped. A page
/// under load emits Network events far faster than a wait loop polls, so
/// the window is generous.
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Default per-command response timeout.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A CDP event received from the browser.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// The event method name (e.g. "Network.requestWillBeSent").
    pub method: String,
    /// The event parameters.
    pub params: Value,
}

/// A CDP command sent to the browser.
#[derive(Debug, Clone, serde::Serialize)]
struct CdpCommand {
    id: u64,
    method: String,
    params: Value,
}

/// A CDP response correlated back to a sent command.
#[derive(Debug, Clone)]
pub struct CdpResponse {
    /// The command ID this response correlates to.
    pub id: u64,
    /// The result value on success.
    pub result: Option<Value>,
    /// The error object on failure.
    pub error: Option<CdpResponseError>,
}

/// Error object in a CDP response.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CdpResponseError {
    pub code: i64,
    pub message: String,
    pub data: Option<String>,
}

// ---------------------------------------------------------------------------
// CdpClient
// ---------------------------------------------------------------------------

/// CDP client bound to one DevTools WebSocket target.
///
/// Cheap to share behind an `Arc`: commands go through `&self`, and any
/// number of consumers can [`subscribe`](Self::subscribe) to the event
/// stream independently.
pub struct CdpClient {
    /// Auto-incrementing command ID counter.
    next_id: AtomicU64,
    /// Pending commands awaiting responses: id -> oneshot sender.
    pending: Pending,
    /// WebSocket write half.
    writer: Mutex<WsSink>,
    /// Event fan-out; subscribers each receive every event.
    event_tx: broadcast::Sender<CdpEvent>,
    /// Background reader task, aborted when the client is dropped.
    reader_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a DevTools WebSocket endpoint
    /// (`ws://127.0.0.1:{port}/devtools/page/{target_id}`).
    pub async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| BrowserError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            })?;

        let (writer, reader) = ws_stream.split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let reader_handle = tokio::spawn(Self::read_loop(
            reader,
            Arc::clone(&pending),
            event_tx.clone(),
        ));

        tracing::debug!(url = ws_url, "CDP WebSocket connection established");

        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            writer: Mutex::new(writer),
            event_tx,
            reader_handle,
        })
    }

    /// Subscribe to the event stream. Each subscriber sees every event from
    /// the point of subscription onward; a slow subscriber that falls a full
    /// channel capacity behind loses the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.event_tx.subscribe()
    }

    /// Send a CDP command and wait for its response with the default timeout.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.send_command_with_timeout(method, params, COMMAND_TIMEOUT)
            .await
    }

    /// Send a CDP command with an explicit response timeout.
    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cmd = CdpCommand {
            id,
            method: method.to_string(),
            params,
        };
        let json = serde_json::to_string(&cmd).map_err(|e| BrowserError::Protocol {
            detail: format!("failed to serialize command: {e}"),
        })?;

        tracing::trace!(id, method, "sending CDP command");

        // Register before sending so the response cannot race the insert.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        {
            let mut writer = self.writer.lock().await;
            writer
                .send(Message::Text(json.into()))
                .await
                .map_err(|e| BrowserError::Protocol {
                    detail: format!("failed to send WebSocket message: {e}"),
                })?;
        }

        let response = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| BrowserError::Timeout {
                method: method.to_string(),
                duration: timeout,
            })?
            .map_err(|_| BrowserError::Protocol {
                detail: "response channel closed unexpectedly".to_string(),
            })?;

        if let Some(err) = response.error {
            return Err(BrowserError::CdpError {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Enable a CDP domain (`Page`, `DOM`, `Runtime`, `Network`, ...).
    ///
    /// Domains must be enabled before they emit events.
    pub async fn enable_domain(&self, domain: &str) -> Result<(), BrowserError> {
        self.send_command(&format!("{domain}.enable"), serde_json::json!({}))
            .await?;
        Ok(())
    }

    /// Background task routing WebSocket messages: frames with an `id` are
    /// command responses, frames with a `method` (and no `id`) are events.
    async fn read_loop(mut reader: WsSource, pending: Pending, event_tx: broadcast::Sender<CdpEvent>) {
        while let Some(msg_result) = reader.next().await {
            let msg = match msg_result {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket read error, stopping reader");
                    break;
                }
            };

            let text = match msg {
                Message::Text(t) => t.to_string(),
                Message::Binary(b) => match String::from_utf8(b.to_vec()) {
                    Ok(s) => s,
                    Err(_) => continue,
                },
                Message::Close(_) => {
                    tracing::debug!("WebSocket closed by remote");
                    break;
                }
                _ => continue,
            };

            let json: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse CDP message as JSON");
                    continue;
                }
            };

            if let Some(response) = parse_cdp_response(&json) {
                let mut pending_guard = pending.lock().await;
                if let Some(tx) = pending_guard.remove(&response.id) {
                    let _ = tx.send(response);
                } else {
                    tracing::trace!(id = response.id, "response for unknown command ID");
                }
            } else if let Some(event) = parse_cdp_event(&json) {
                // No subscribers is fine; the event is simply dropped.
                let _ = event_tx.send(event);
            }
        }

        // Connection gone: fail all pending commands so callers unblock.
        let mut pending_guard = pending.lock().await;
        for (id, tx) in pending_guard.drain() {
            let _ = tx.send(CdpResponse {
                id,
                result: None,
                error: Some(CdpResponseError {
                    code: -1,
                    message: "WebSocket connection closed".to_string(),
                    data: None,
                }),
            });
        }
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Protocol helpers
// ---------------------------------------------------------------------------

/// Parse a CDP frame as a command response. Responses carry an `id`.
pub fn parse_cdp_response(json: &Value) -> Option<CdpResponse> {
    let id = json.get("id")?.as_u64()?;
    Some(CdpResponse {
        id,
        result: json.get("result").cloned(),
        error: json
            .get("error")
            .and_then(|e| serde_json::from_value(e.clone()).ok()),
    })
}

/// Parse a CDP frame as an event. Events carry a `method` but no `id`.
pub fn parse_cdp_event(json: &Value) -> Option<CdpEvent> {
    if json.get("id").is_some() {
        return None;
    }
    let method = json.get("method")?.as_str()?.to_string();
    let params = json.get("params").cloned().unwrap_or(Value::Null);
    Some(CdpEvent { method, params })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serialization() {
        let cmd = CdpCommand {
            id: 7,
            method: "Runtime.evaluate".to_string(),
            params: serde_json::json!({ "expression": "1 + 1", "returnByValue": true }),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "Runtime.evaluate");
        assert_eq!(json["params"]["expression"], "1 + 1");
    }

    #[test]
    fn parse_response_success() {
        let json = serde_json::json!({
            "id": 1,
            "result": { "frameId": "abc123" }
        });
        let resp = parse_cdp_response(&json).unwrap();
        assert_eq!(resp.id, 1);
        assert!(resp.error.is_none());
        assert_eq!(resp.result.unwrap()["frameId"], "abc123");
    }

    #[test]
    fn parse_response_error() {
        let json = serde_json::json!({
            "id": 2,
            "error": { "code": -32602, "message": "Invalid params", "data": "missing url" }
        });
        let resp = parse_cdp_response(&json).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32602);
        assert_eq!(err.message, "Invalid params");
        assert_eq!(err.data.as_deref(), Some("missing url"));
    }

    #[test]
    fn parse_response_requires_id() {
        let json = serde_json::json!({ "method": "Page.loadEventFired", "params": {} });
        assert!(parse_cdp_response(&json).is_none());
    }

    #[test]
    fn parse_event_valid() {
        let json = serde_json::json!({
            "method": "Network.requestWillBeSent",
            "params": { "requestId": "1000.1" }
        });
        let event = parse_cdp_event(&json).unwrap();
        assert_eq!(event.method, "Network.requestWillBeSent");
        assert_eq!(event.params["requestId"], "1000.1");
    }

    #[test]
    fn parse_event_rejects_response_frames() {
        let json = serde_json::json!({ "id": 1, "method": "Page.navigate", "result": {} });
        assert!(parse_cdp_event(&json).is_none());
    }

    #[test]
    fn parse_event_without_params() {
        let json = serde_json::json!({ "method": "Page.domContentEventFired" });
        let event = parse_cdp_event(&json).unwrap();
        assert_eq!(event.params, Value::Null);
    }

    #[tokio::test]
    async fn broadcast_fan_out_delivers_to_all_subscribers() {
        let (event_tx, _) = broadcast::channel::<CdpEvent>(16);
        let mut rx_a = event_tx.subscribe();
        let mut rx_b = event_tx.subscribe();

        event_tx
            .send(CdpEvent {
                method: "Page.loadEventFired".to_string(),
                params: Value::Null,
            })
            .unwrap();

        assert_eq!(rx_a.recv().await.unwrap().method, "Page.loadEventFired");
        assert_eq!(rx_b.recv().await.unwrap().method, "Page.loadEventFired");
    }
}
