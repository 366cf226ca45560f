//! Metadata Store (§3 "Event" persistence, §6 `/movies.json`): one JSON
//! sidecar per device under `target_dir`, holding the event/movie index,
//! rather than a SQL database.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieRecord {
    pub event_id: String,
    pub filename: String,
    pub container: String,
    pub start_unix: i64,
    pub duration_secs: f64,
    pub size_bytes: u64,
    #[serde(default)]
    pub frame_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct DeviceIndex {
    movies: Vec<MovieRecord>,
}

/// Per-process handle to every camera's movie index, each independently
/// locked so one camera's writer never blocks another's reader (§5).
pub struct MetadataStore {
    root: PathBuf,
    indexes: Mutex<HashMap<u32, DeviceIndex>>,
}

impl MetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MetadataStore {
            root: root.into(),
            indexes: Mutex::new(HashMap::new()),
        }
    }

    fn sidecar_path(&self, device_id: u32) -> PathBuf {
        self.root.join(format!("{device_id}")).join("movies.json")
    }

    fn load_index(&self, device_id: u32) -> DeviceIndex {
        let path = self.sidecar_path(device_id);
        std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    pub fn record_movie(&self, device_id: u32, record: MovieRecord) -> std::io::Result<()> {
        let mut guard = self.indexes.lock().unwrap();
        let index = guard.entry(device_id).or_insert_with(|| self.load_index(device_id));
        index.movies.push(record);
        let path = self.sidecar_path(device_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(index)?;
        std::fs::write(path, text)
    }

    pub fn movies(&self, device_id: u32) -> Vec<MovieRecord> {
        let mut guard = self.indexes.lock().unwrap();
        let index = guard.entry(device_id).or_insert_with(|| self.load_index(device_id));
        index.movies.clone()
    }

    pub fn movie_path(&self, device_id: u32, filename: &str) -> Option<PathBuf> {
        let movies = self.movies(device_id);
        movies
            .iter()
            .find(|m| m.filename == filename)
            .map(|m| self.root.join(format!("{device_id}")).join(&m.filename))
    }

    /// Directory a recorded movie's bytes should be written under, matching
    /// `movie_path`'s layout (`root/{device_id}/`).
    pub fn movie_dir(&self, device_id: u32) -> PathBuf {
        self.root.join(format!("{device_id}"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_list_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        store
            .record_movie(
                1,
                MovieRecord {
                    event_id: "20260101000000".into(),
                    filename: "20260101000000.mp4".into(),
                    container: "mp4".into(),
                    start_unix: 0,
                    duration_secs: 5.0,
                    size_bytes: 1024,
                    frame_count: 42,
                },
            )
            .unwrap();
        let movies = store.movies(1);
        assert_eq!(movies.len(), 1);
        assert_eq!(movies[0].filename, "20260101000000.mp4");
    }

    #[test]
    fn unknown_device_has_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        assert!(store.movies(99).is_empty());
    }
}
