use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::config::ScanConfig;
use crate::records::{
    FailureRecord, PageId, StoredFailure, StoredSuccess, SuccessRecord, Summary,
};

pub mod keys {
    use crate::records::PageId;

    pub const CONFIG: &str = "hudiyun_scanner_config";
    pub const RUNNING: &str = "hudiyun_scanner_running";
    pub const CURSOR: &str = "hudiyun_scanner_current_pid";
    pub const SUCCESS: &str = "hudiyun_scanner_success";
    pub const FAILED: &str = "hudiyun_scanner_failed";

    pub fn retry(id: PageId) -> String {
        format!("hudiyun_scanner_retry_{id}")
    }
}

/// Durable string key/value storage that survives page navigations
///
/// Reads never fail: an unreadable entry is reported as absent. Writes must
/// be durable once they return, the next navigation may end the process.
pub trait KvStore {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

impl<T: KvStore + ?Sized> KvStore for &T {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// A JSON object on disk, re-read on every access
///
/// Re-reading lets a second process (`pidscan pause`) flip the running flag
/// under a scan in progress.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Couldn't create {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored entries, empty when the file doesn't exist yet
    fn load(&self) -> Result<BTreeMap<String, String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Couldn't read {}", self.path.display()))
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt store {}", self.path.display()))
    }

    /// Writes every entry through a fresh temp file renamed over the store
    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Couldn't create temp file in {}", dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, entries)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Couldn't replace {}", self.path.display()))?;
        Ok(())
    }

    /// Read-modify-write, refused over a file that doesn't parse
    fn update(&self, change: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> Result<()> {
        let mut entries = self.load()?;
        if change(&mut entries) {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.load() {
            Ok(mut entries) => entries.remove(key),
            Err(e) => {
                log::warn!("{e:#}");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|entries| entries.remove(key).is_some())
    }
}

/// Typed view of the scanner's persisted state
#[derive(Debug, Clone)]
pub struct ScanStore<S> {
    kv: S,
}

impl<S: KvStore> ScanStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub fn inner(&self) -> &S {
        &self.kv
    }

    fn load_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.kv.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring corrupt entry {key}: {e}");
                None
            }
        }
    }

    fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.kv.set(key, &serde_json::to_string(value)?)
    }

    // Configuration

    pub fn config(&self) -> ScanConfig {
        self.load_json(keys::CONFIG).unwrap_or_default()
    }

    pub fn save_config(&self, config: &ScanConfig) -> Result<()> {
        self.save_json(keys::CONFIG, config)
    }

    /// Stores `config`, moving the cursor back to its start when the range
    /// or the interval changed
    pub fn update_config(&self, config: &ScanConfig) -> Result<()> {
        let reset = self.config().resets_cursor(config);
        self.save_config(config)?;
        if reset {
            self.rewind(config.start_id)?;
        }
        Ok(())
    }

    // Scan state

    pub fn is_running(&self) -> bool {
        self.kv.get(keys::RUNNING).as_deref() == Some("true")
    }

    pub fn set_running(&self, running: bool) -> Result<()> {
        self.kv.set(keys::RUNNING, if running { "true" } else { "false" })
    }

    /// Stops the scan at its next decision point
    ///
    /// The page being evaluated is still finished and the cursor moves past
    /// it, no further navigation is issued.
    pub fn pause(&self) -> Result<()> {
        self.set_running(false)?;
        log::info!("Scan paused at id {}", self.cursor());
        Ok(())
    }

    /// The id to process next, never below the configured start
    pub fn cursor(&self) -> PageId {
        let start = self.config().start_id;
        self.kv
            .get(keys::CURSOR)
            .and_then(|raw| match raw.trim().parse::<PageId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    log::warn!("Ignoring corrupt cursor {raw:?}: {e}");
                    None
                }
            })
            .filter(|id| *id >= start)
            .unwrap_or(start)
    }

    pub fn set_cursor(&self, id: PageId) -> Result<()> {
        self.kv.set(keys::CURSOR, &id.to_string())
    }

    /// Moves the cursor back to `start`, dropping the retry flag of the id
    /// that was in flight
    fn rewind(&self, start: PageId) -> Result<()> {
        self.clear_retry_flag(self.cursor())?;
        self.set_cursor(start)
    }

    // Results

    pub fn successes(&self) -> Vec<SuccessRecord> {
        self.load_json::<Vec<StoredSuccess>>(keys::SUCCESS)
            .unwrap_or_default()
            .into_iter()
            .map(SuccessRecord::from)
            .collect()
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        self.load_json::<Vec<StoredFailure>>(keys::FAILED)
            .unwrap_or_default()
            .into_iter()
            .map(FailureRecord::from)
            .collect()
    }

    pub fn sorted_successes(&self) -> Vec<SuccessRecord> {
        let mut records = self.successes();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn sorted_failures(&self) -> Vec<FailureRecord> {
        let mut records = self.failures();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn has_success(&self, id: PageId) -> bool {
        self.successes().iter().any(|r| r.id == id)
    }

    pub fn has_failure(&self, id: PageId) -> bool {
        self.failures().iter().any(|r| r.id == id)
    }

    /// Appends `record` unless its id is already recorded in either list
    pub fn record_success(&self, record: SuccessRecord) -> Result<bool> {
        let mut records = self.successes();
        if records.iter().any(|r| r.id == record.id) || self.has_failure(record.id) {
            return Ok(false);
        }
        records.push(record);
        self.save_json(keys::SUCCESS, &records)?;
        Ok(true)
    }

    /// Appends `record` unless its id is already recorded in either list
    pub fn record_failure(&self, record: FailureRecord) -> Result<bool> {
        let mut records = self.failures();
        if records.iter().any(|r| r.id == record.id) || self.has_success(record.id) {
            return Ok(false);
        }
        records.push(record);
        self.save_json(keys::FAILED, &records)?;
        Ok(true)
    }

    /// Empties the success list and rewinds the cursor for a full rescan
    pub fn clear_successes(&self) -> Result<()> {
        self.save_json::<[SuccessRecord]>(keys::SUCCESS, &[])?;
        self.rewind(self.config().start_id)
    }

    pub fn clear_failures(&self) -> Result<()> {
        self.save_json::<[FailureRecord]>(keys::FAILED, &[])
    }

    pub fn summary(&self) -> Summary {
        Summary {
            successes: self.successes().len(),
            failures: self.failures().len(),
        }
    }

    /// One `id title price` line per success, ascending by id
    pub fn success_text(&self) -> String {
        self.sorted_successes()
            .iter()
            .map(SuccessRecord::to_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    // Retry flags

    pub fn retry_flag(&self, id: PageId) -> bool {
        self.kv.get(&keys::retry(id)).as_deref() == Some("true")
    }

    pub fn set_retry_flag(&self, id: PageId) -> Result<()> {
        self.kv.set(&keys::retry(id), "true")
    }

    pub fn clear_retry_flag(&self, id: PageId) -> Result<()> {
        self.kv.remove(&keys::retry(id))
    }
}
