// gatewarden/src/snapshot.rs
//
// Pluggable persistence for Markov baseline state. The format is opaque
// bytes; the only guarantee is that one snapshot is self-consistent.

use std::path::PathBuf;

use crate::error::EngineError;
use crate::markov::tracker::MarkovSnapshot;

pub trait MarkovSnapshotStore: Send + Sync {
    fn save(&self, snapshot: &MarkovSnapshot) -> Result<(), EngineError>;
    fn load(&self) -> Result<Option<MarkovSnapshot>, EngineError>;
}

/// File-backed store — one snapshot file, atomically replaced via rename.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MarkovSnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &MarkovSnapshot) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec(snapshot)
            .map_err(|e| EngineError::Snapshot(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(|e| EngineError::Snapshot(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| EngineError::Snapshot(e.to_string()))?;
        Ok(())
    }

    fn load(&self) -> Result<Option<MarkovSnapshot>, EngineError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::Snapshot(e.to_string())),
        };
        let snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Snapshot(e.to_string()))?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarkovConfig;
    use crate::markov::MarkovTracker;
    use chrono::Utc;

    #[test]
    fn roundtrip_through_file() {
        let dir = std::env::temp_dir().join("gatewarden-snapshot-test");
        std::fs::create_dir_all(&dir).unwrap();
        let store = FileSnapshotStore::new(dir.join("markov.snapshot"));

        let tracker = MarkovTracker::new(MarkovConfig::default());
        let now = Utc::now();
        for p in ["/a", "/b", "/c"] {
            tracker.record_transition("h", p, now, false, false, false, None);
        }
        tracker.flush_cohort_updates();

        store.save(&tracker.snapshot()).unwrap();
        let loaded = store.load().unwrap().unwrap();

        let restored = MarkovTracker::new(MarkovConfig::default());
        restored.restore(loaded);
        assert_eq!(restored.stats().cohort_count, 1);
    }

    #[test]
    fn missing_file_loads_none() {
        let store = FileSnapshotStore::new("/nonexistent/gatewarden.snapshot");
        assert!(store.load().unwrap().is_none());
    }
}
