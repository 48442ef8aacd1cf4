//! Captured network events and the shared capture buffer.
//!
//! A [`CapturedEvent`] is one observed request or response that matched the
//! backend-endpoint filter. Events are appended to a [`CaptureBuffer`] in
//! observation order; the buffer is append-only for the duration of a run
//! and read exactly once, when it is handed to the persistence sink.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CapturedEvent
// ---------------------------------------------------------------------------

/// Whether an event was observed on the request or the response side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

/// One observed network event that matched the endpoint filter.
///
/// The serialized form of these records is the engine's sole output
/// interface: the downstream parser reads the JSON array element-by-element
/// and inspects `body` (a JSON value when the payload parsed, a raw string
/// otherwise) when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedEvent {
    /// Request or response.
    pub direction: Direction,
    /// Full URL of the observed traffic.
    pub url: String,
    /// HTTP method (requests only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// HTTP status code (responses only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Value of the Authorization header, when the request carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
    /// Request or response body: parsed JSON where possible, raw string
    /// otherwise. Absent when no body was observable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// When the event was observed.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CaptureBuffer
// ---------------------------------------------------------------------------

/// Ordered, append-only buffer of captured events.
///
/// Multiple capture listeners may be attached concurrently (one per
/// discovered target plus the primary context) and all write into the same
/// buffer; appends are serialized through a mutex so insertion order equals
/// observation order. Duplicates observed across contexts are preserved --
/// the buffer never deduplicates or reorders.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CaptureBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event, preserving arrival order.
    pub fn push(&self, event: CapturedEvent) {
        let mut events = self.inner.lock().expect("capture buffer lock poisoned");
        events.push(event);
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("capture buffer lock poisoned").len()
    }

    /// True when nothing has been captured yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone out the buffered events in insertion order.
    ///
    /// Used once at run end to hand the buffer to the persistence sink.
    pub fn snapshot(&self) -> Vec<CapturedEvent> {
        self.inner
            .lock()
            .expect("capture buffer lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(url: &str, direction: Direction) -> CapturedEvent {
        CapturedEvent {
            direction,
            url: url.to_string(),
            method: None,
            status: None,
            authorization: None,
            body: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn buffer_preserves_insertion_order() {
        let buffer = CaptureBuffer::new();
        buffer.push(event("https://a.example/1", Direction::Request));
        buffer.push(event("https://a.example/2", Direction::Response));
        buffer.push(event("https://a.example/1", Direction::Request)); // duplicate kept

        let events = buffer.snapshot();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].url, "https://a.example/1");
        assert_eq!(events[1].url, "https://a.example/2");
        assert_eq!(events[2].url, "https://a.example/1");
    }

    #[test]
    fn buffer_is_shared_across_clones() {
        let buffer = CaptureBuffer::new();
        let writer = buffer.clone();
        writer.push(event("https://a.example/q", Direction::Request));
        assert_eq!(buffer.len(), 1);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn concurrent_appends_all_land() {
        let buffer = CaptureBuffer::new();
        let mut handles = Vec::new();
        for t in 0..4 {
            let writer = buffer.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    writer.push(event(&format!("https://x.example/{t}/{i}"), Direction::Request));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buffer.len(), 200);
    }

    #[test]
    fn event_serialization_omits_absent_fields() {
        let ev = event("https://a.example/q", Direction::Request);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["direction"], "request");
        assert_eq!(json["url"], "https://a.example/q");
        assert!(json.get("method").is_none());
        assert!(json.get("status").is_none());
        assert!(json.get("authorization").is_none());
        assert!(json.get("body").is_none());
    }

    #[test]
    fn event_serialization_keeps_body_value() {
        let mut ev = event("https://a.example/q", Direction::Request);
        ev.method = Some("POST".into());
        ev.body = Some(serde_json::json!({"queries": [{"Query": {}}]}));
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["method"], "POST");
        assert!(json["body"]["queries"].is_array());
    }
}
