//! Persistence sink: the capture buffer's only way to disk.
//!
//! The buffer is serialized once, at run end, regardless of outcome. The
//! write is atomic from the caller's perspective: the artifact is written
//! to a temporary sibling file and renamed into place, so a crash mid-write
//! never leaves a truncated artifact. Serialization is a pure function of
//! the buffer -- the same events always produce byte-identical output.

use std::path::{Path, PathBuf};

use thiserror::Error;

use querytap_types::CapturedEvent;

/// Errors writing the capture artifact. Always fatal: the run's entire
/// purpose is this file.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to serialize capture buffer: {0}")]
    Serialize(String),

    #[error("failed to write artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Writes the capture buffer to the configured artifact path.
#[derive(Debug, Clone)]
pub struct PersistenceSink {
    path: PathBuf,
    write_empty: bool,
}

impl PersistenceSink {
    pub fn new(path: impl Into<PathBuf>, write_empty: bool) -> Self {
        Self {
            path: path.into(),
            write_empty,
        }
    }

    /// The artifact path this sink writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize the buffer. Pure: output depends only on the events.
    pub fn serialize(events: &[CapturedEvent]) -> Result<String, PersistenceError> {
        let mut json = serde_json::to_string_pretty(events)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;
        json.push('\n');
        Ok(json)
    }

    /// Write the artifact exactly once, at run end.
    ///
    /// Returns the written path, or `None` when the buffer is empty and the
    /// configuration says not to write an empty artifact. The empty case is
    /// reported with its own diagnostic either way.
    pub fn persist(&self, events: &[CapturedEvent]) -> Result<Option<PathBuf>, PersistenceError> {
        if events.is_empty() {
            if !self.write_empty {
                tracing::warn!(
                    path = %self.path.display(),
                    "no events captured; skipping artifact write per configuration"
                );
                return Ok(None);
            }
            tracing::warn!(
                path = %self.path.display(),
                "no events captured; writing empty artifact"
            );
        }

        let json = Self::serialize(events)?;
        self.write_atomic(json.as_bytes())?;

        tracing::info!(
            path = %self.path.display(),
            events = events.len(),
            "capture artifact written"
        );
        Ok(Some(self.path.clone()))
    }

    /// Write to a temporary sibling, then rename into place.
    fn write_atomic(&self, contents: &[u8]) -> Result<(), PersistenceError> {
        let io_err = |source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, contents).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use querytap_types::Direction;

    fn events() -> Vec<CapturedEvent> {
        // Fixed timestamps so serialization is reproducible across calls.
        let ts = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();
        vec![
            CapturedEvent {
                direction: Direction::Request,
                url: "https://x.example/public/reports/querydata".to_string(),
                method: Some("POST".to_string()),
                status: None,
                authorization: Some("Bearer t".to_string()),
                body: Some(serde_json::json!({ "queries": [] })),
                timestamp: ts,
            },
            CapturedEvent {
                direction: Direction::Response,
                url: "https://x.example/public/reports/querydata".to_string(),
                method: None,
                status: Some(200),
                authorization: None,
                body: None,
                timestamp: ts,
            },
        ]
    }

    #[test]
    fn persists_a_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captured-queries.json");
        let sink = PersistenceSink::new(&path, true);

        let written = sink.persist(&events()).unwrap();
        assert_eq!(written, Some(path.clone()));

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["direction"], "request");
        assert_eq!(parsed[1]["status"], 200);
    }

    #[test]
    fn serialization_is_idempotent() {
        let events = events();
        let first = PersistenceSink::serialize(&events).unwrap();
        let second = PersistenceSink::serialize(&events).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn persisting_twice_produces_byte_identical_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captured-queries.json");
        let sink = PersistenceSink::new(&path, true);
        let events = events();

        sink.persist(&events).unwrap();
        let first = std::fs::read(&path).unwrap();
        sink.persist(&events).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn no_temporary_file_survives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captured-queries.json");
        PersistenceSink::new(&path, true).persist(&events()).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["captured-queries.json".to_string()]);
    }

    #[test]
    fn empty_buffer_writes_empty_artifact_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captured-queries.json");
        let written = PersistenceSink::new(&path, true).persist(&[]).unwrap();
        assert_eq!(written, Some(path.clone()));

        let parsed: Vec<serde_json::Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn empty_buffer_skips_write_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captured-queries.json");
        let written = PersistenceSink::new(&path, false).persist(&[]).unwrap();
        assert_eq!(written, None);
        assert!(!path.exists());
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs/today/captured-queries.json");
        PersistenceSink::new(&path, true).persist(&events()).unwrap();
        assert!(path.exists());
    }
}
