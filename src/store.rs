// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use serde_json::Value;
use tracing::warn;

/// Persistent storage for small JSON records keyed by string. Used for the
/// archive charset records, the cloud catalog, and user playlists.
pub trait Store: Send + Sync {
    /// Gets the value stored under the given key, or None if the key has never
    /// been written or its contents are unreadable.
    fn get(&self, key: &str) -> Option<Value>;

    /// Stores the value under the given key, replacing any previous value.
    fn set(&self, key: &str, value: &Value) -> Result<(), io::Error>;

    /// Returns the time the key was last written, or None if the key has never
    /// been written.
    fn last_modified(&self, key: &str) -> Option<SystemTime>;
}

/// A store that keeps one JSON file per key inside a state directory.
pub struct FileStore {
    /// The directory holding the record files.
    dir: PathBuf,
}

impl FileStore {
    /// Creates a file store rooted at the given directory, creating the
    /// directory if needed.
    pub fn new(dir: PathBuf) -> Result<FileStore, io::Error> {
        fs::create_dir_all(&dir)?;
        Ok(FileStore { dir })
    }

    /// The file backing a key.
    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        let path = self.record_path(key);
        let contents = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    key,
                    err = e.to_string(),
                    "Ignoring unreadable store record."
                );
                None
            }
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), io::Error> {
        let serialized = serde_json::to_string_pretty(value)?;
        fs::write(self.record_path(key), serialized)
    }

    fn last_modified(&self, key: &str) -> Option<SystemTime> {
        fs::metadata(self.record_path(key))
            .and_then(|metadata| metadata.modified())
            .ok()
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use serde_json::json;

    use super::{FileStore, Store};

    #[test]
    fn test_get_set_roundtrip() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let store = FileStore::new(tempdir.path().join("state"))?;

        assert!(store.get("catalog").is_none());
        assert!(store.last_modified("catalog").is_none());

        let value = json!({"entries": ["one", "two"]});
        store.set("catalog", &value)?;

        assert_eq!(Some(value), store.get("catalog"));
        assert!(store.last_modified("catalog").is_some());

        // Overwrites replace the previous value.
        let replacement = json!([1, 2, 3]);
        store.set("catalog", &replacement)?;
        assert_eq!(Some(replacement), store.get("catalog"));

        Ok(())
    }

    #[test]
    fn test_unreadable_record() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let store = FileStore::new(tempdir.path().to_path_buf())?;

        std::fs::write(tempdir.path().join("broken.json"), "{not json")?;
        assert!(store.get("broken").is_none());
        // The file exists, so it still has a modification time.
        assert!(store.last_modified("broken").is_some());

        Ok(())
    }
}
