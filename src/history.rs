//! Per-network failure history.
//!
//! Records which credentials have already failed against each network so a
//! later run can skip them. The file is a single JSON object keyed by network
//! name, each value a JSON array of credential strings:
//!
//! ```json
//! { "HomeNet": ["hunter2", "letmein"] }
//! ```
//!
//! Reads never fail: a missing file, an unparsable file or a malformed value
//! for one network all read as "nothing recorded". Every mutation is written
//! through to disk (temp file + rename) before the call returns.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::WifiAutoConnectError;

type Entries = BTreeMap<String, Value>;

/// Durable set of known-bad credentials per network.
pub trait FailureHistory: Send + Sync {
    /// Credentials recorded as failed for `network`; empty if none or unreadable.
    fn get(&self, network: &str) -> HashSet<String>;

    /// Record `credential` as failed for `network`. Adding twice is a no-op.
    fn add(&self, network: &str, credential: &str) -> Result<()>;

    /// Forget everything recorded for `network`.
    fn clear(&self, network: &str) -> Result<()>;

    /// Number of recorded failures per network, sorted by network name.
    fn summary(&self) -> Vec<(String, usize)>;
}

/// [`FailureHistory`] backed by a JSON file.
pub struct FileHistoryStore {
    path: PathBuf,
    // Serializes read-modify-write cycles across callers.
    lock: Mutex<()>,
}

impl FileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Entries {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Entries::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read failure history, treating as empty");
                return Entries::new();
            }
        };

        if content.trim().is_empty() {
            return Entries::new();
        }

        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failure history is corrupt, treating as empty");
                Entries::new()
            }
        }
    }

    fn write_entries(&self, entries: &Entries) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create history directory: {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(entries).context("Failed to serialize failure history")?;

        let tmp = self.path.with_extension("json.tmp");
        write_synced(&tmp, content.as_bytes())
            .map_err(|e| WifiAutoConnectError::HistoryWrite(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| WifiAutoConnectError::HistoryWrite(format!("{}: {}", self.path.display(), e)))?;

        Ok(())
    }
}

/// Write `bytes` to `path` and flush them to the device before returning.
///
/// The rename that follows only replaces the live file once the new contents
/// are durable.
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Decode one network's stored value.
///
/// Accepts a JSON array of strings, or a string that itself contains such an
/// array (the shape produced by key-value stores that only hold strings).
fn decode_set(network: &str, value: &Value) -> BTreeSet<String> {
    let decoded = match value {
        Value::String(raw) => serde_json::from_str::<Vec<String>>(raw).ok(),
        other => serde_json::from_value::<Vec<String>>(other.clone()).ok(),
    };

    match decoded {
        Some(credentials) => credentials.into_iter().collect(),
        None => {
            debug!(network, "ignoring malformed failure history entry");
            BTreeSet::new()
        }
    }
}

fn encode_set(set: &BTreeSet<String>) -> Value {
    Value::Array(set.iter().cloned().map(Value::String).collect())
}

impl FailureHistory for FileHistoryStore {
    fn get(&self, network: &str) -> HashSet<String> {
        let _guard = self.lock.lock();
        self.read_entries()
            .get(network)
            .map(|value| decode_set(network, value).into_iter().collect())
            .unwrap_or_default()
    }

    fn add(&self, network: &str, credential: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries();

        let mut set = entries
            .get(network)
            .map(|value| decode_set(network, value))
            .unwrap_or_default();
        if !set.insert(credential.to_string()) {
            return Ok(());
        }

        entries.insert(network.to_string(), encode_set(&set));
        self.write_entries(&entries)
    }

    fn clear(&self, network: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries();

        if entries.remove(network).is_none() {
            return Ok(());
        }

        self.write_entries(&entries)
    }

    fn summary(&self) -> Vec<(String, usize)> {
        let _guard = self.lock.lock();
        self.read_entries()
            .iter()
            .map(|(network, value)| (network.clone(), decode_set(network, value).len()))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> FileHistoryStore {
        FileHistoryStore::new(dir.path().join("nested").join("history.json"))
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.get("HomeNet").is_empty());
        assert!(store.summary().is_empty());
    }

    #[test]
    fn add_is_idempotent_and_persisted() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.add("HomeNet", "a").unwrap();
        store.add("HomeNet", "a").unwrap();
        store.add("HomeNet", "b").unwrap();

        let reopened = store_in(&dir);
        let expected: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(reopened.get("HomeNet"), expected);
        assert!(reopened.get("homenet").is_empty());
    }

    #[test]
    fn clear_removes_only_that_network() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.add("HomeNet", "a").unwrap();
        store.add("Net2", "x").unwrap();
        store.clear("HomeNet").unwrap();
        store.clear("NeverSeen").unwrap();

        assert!(store.get("HomeNet").is_empty());
        assert_eq!(store.get("Net2").len(), 1);
        assert_eq!(store.summary(), vec![("Net2".to_string(), 1)]);
    }

    #[test]
    fn corrupt_file_reads_empty_and_is_replaced_on_write() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        assert!(store.get("HomeNet").is_empty());

        store.add("HomeNet", "a").unwrap();
        assert_eq!(store.get("HomeNet").len(), 1);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn leftover_temp_file_is_overwritten_not_appended() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let tmp = store.path().with_extension("json.tmp");
        fs::create_dir_all(tmp.parent().unwrap()).unwrap();
        fs::write(&tmp, "garbage from an interrupted write that is longer than the new file").unwrap();

        store.add("HomeNet", "a").unwrap();

        assert!(!tmp.exists());
        let on_disk: BTreeMap<String, Vec<String>> =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk["HomeNet"], ["a"]);
    }

    #[test]
    fn malformed_value_only_affects_its_network() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{ "Broken": 42, "Mixed": ["a", 1], "Legacy": "[\"p1\",\"p2\"]", "Good": ["x"] }"#,
        )
        .unwrap();

        assert!(store.get("Broken").is_empty());
        assert!(store.get("Mixed").is_empty());
        assert_eq!(store.get("Legacy").len(), 2);
        assert_eq!(store.get("Good").len(), 1);

        store.add("Broken", "fresh").unwrap();
        assert_eq!(store.get("Broken").len(), 1);
        assert_eq!(store.get("Good").len(), 1);
    }
}
