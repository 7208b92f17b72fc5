use crate::models::PositionSide;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Tracker I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed tracker file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Whether new entries may be placed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    OkToTrade,
    StopLossTriggered,
}

/// The per-symbol tracker document
///
/// ```json
/// {"status": "ok_to_trade", "last_side": "long", "stop_loss_ids": ["1001"]}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerState {
    pub status: TradeStatus,
    pub last_side: Option<PositionSide>,
    #[serde(default)]
    pub stop_loss_ids: Vec<String>,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            status: TradeStatus::OkToTrade,
            last_side: None,
            stop_loss_ids: Vec::new(),
        }
    }
}

impl TrackerState {
    pub fn is_ok_to_trade(&self) -> bool {
        self.status == TradeStatus::OkToTrade
    }

    /// True if `order_id` is one of the recorded stop-losses
    pub fn is_stop_loss(&self, order_id: &str) -> bool {
        self.stop_loss_ids.iter().any(|id| id == order_id)
    }
}

/// JSON file holding the tracker document
///
/// No locking: two overlapping invocations for the same symbol can clobber
/// each other's writes.
#[derive(Debug, Clone)]
pub struct TrackerStore {
    path: PathBuf,
}

impl TrackerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the tracker, creating it with default values on first run
    pub fn load_or_create(&self) -> Result<TrackerState, TrackerError> {
        if !self.path.exists() {
            let state = TrackerState::default();
            self.save(&state)?;
            tracing::info!("Created tracker file {}", self.path.display());
            return Ok(state);
        }
        self.load()
    }

    pub fn load(&self) -> Result<TrackerState, TrackerError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| self.io_error(source))?;
        serde_json::from_str(&raw).map_err(|source| TrackerError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the tracker document
    pub fn save(&self, state: &TrackerState) -> Result<(), TrackerError> {
        let json = serde_json::to_string(state).map_err(|source| TrackerError::Parse {
            path: self.path.clone(),
            source,
        })?;

        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|source| self.io_error(source))?;
        std::fs::rename(&tmp, &self.path).map_err(|source| self.io_error(source))?;

        tracing::debug!("Tracker saved: {:?}", state);
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> TrackerError {
        TrackerError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> TrackerStore {
        TrackerStore::new(dir.path().join("tracker_SOL-USDT-USDT.json"))
    }

    #[test]
    fn test_created_with_defaults_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(!store.path().exists());

        let state = store.load_or_create().unwrap();
        assert_eq!(state, TrackerState::default());
        assert!(store.path().exists());

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"status": "ok_to_trade", "last_side": null, "stop_loss_ids": []})
        );
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let state = TrackerState {
            status: TradeStatus::StopLossTriggered,
            last_side: Some(PositionSide::Short),
            stop_loss_ids: vec!["1001".to_string(), "1002".to_string()],
        };
        store.save(&state).unwrap();

        assert_eq!(store.load().unwrap(), state);
        assert_eq!(store.load_or_create().unwrap(), state);
    }

    #[test]
    fn test_reads_document_without_stop_loss_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), r#"{"status": "ok_to_trade", "last_side": "long"}"#).unwrap();

        let state = store.load().unwrap();
        assert!(state.is_ok_to_trade());
        assert_eq!(state.last_side, Some(PositionSide::Long));
        assert!(state.stop_loss_ids.is_empty());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{not json").unwrap();

        assert!(matches!(store.load(), Err(TrackerError::Parse { .. })));
    }

    #[test]
    fn test_stop_loss_lookup() {
        let state = TrackerState {
            stop_loss_ids: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        assert!(state.is_stop_loss("b"));
        assert!(!state.is_stop_loss("x"));
        assert!(!TrackerState::default().is_stop_loss("a"));
    }
}
