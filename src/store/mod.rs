//! Alarm persistence
//!
//! [`AlarmStore`] is the durable keyed record store. [`AlarmBook`] is the
//! in-memory working set the scheduler and ringer operate on: every change
//! lands in memory first and is written through to the store afterwards.
//! Write failures are logged and never undo the in-memory change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::alarm::{Alarm, AlarmId};
use crate::error::{StoreError, StoreResult};

/// Durable collection of alarms keyed by id
pub trait AlarmStore {
    /// Load every stored alarm
    fn get_all(&self) -> StoreResult<Vec<Alarm>>;

    /// Insert or replace an alarm
    fn put(&mut self, alarm: &Alarm) -> StoreResult<()>;

    /// Remove an alarm; removing a missing id is not an error
    fn delete(&mut self, id: &AlarmId) -> StoreResult<()>;
}

/// In-memory store
///
/// Clones share the same records, so a test can keep a handle and inspect
/// what the ringer persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<BTreeMap<AlarmId, Alarm>>>,
    failing: Arc<Mutex<bool>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record by id
    pub fn get(&self, id: &AlarmId) -> Option<Alarm> {
        self.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Make every following write fail, to exercise degraded persistence
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.failing.lock() {
            *flag = failing;
        }
    }

    fn is_failing(&self) -> bool {
        self.failing.lock().map(|flag| *flag).unwrap_or(false)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<AlarmId, Alarm>> {
        // A poisoned map is still a consistent map for our purposes
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AlarmStore for MemoryStore {
    fn get_all(&self) -> StoreResult<Vec<Alarm>> {
        Ok(self.lock().values().cloned().collect())
    }

    fn put(&mut self, alarm: &Alarm) -> StoreResult<()> {
        if self.is_failing() {
            return Err(StoreError::Unavailable("memory store write rejected".into()));
        }
        self.lock().insert(alarm.id.clone(), alarm.clone());
        Ok(())
    }

    fn delete(&mut self, id: &AlarmId) -> StoreResult<()> {
        if self.is_failing() {
            return Err(StoreError::Unavailable("memory store write rejected".into()));
        }
        self.lock().remove(id);
        Ok(())
    }
}

/// On-disk layout of the alarm file
#[derive(Debug, Default, Serialize, Deserialize)]
struct AlarmFile {
    #[serde(default)]
    alarms: Vec<Alarm>,
}

/// TOML file backed store
///
/// The file is the only copy: every read goes to disk and every change is a
/// read-modify-write, so another process editing the same file (the one-shot
/// CLI next to a running daemon) never has its records overwritten. Writes go
/// through a temporary file and a rename, so a crash mid-write leaves the
/// previous version intact.
#[derive(Debug)]
pub struct TomlAlarmStore {
    path: PathBuf,
}

impl TomlAlarmStore {
    /// Open the store at `path`, starting empty if the file does not exist
    ///
    /// Fails when the file exists but cannot be parsed; it is never replaced.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let store = Self { path: path.into() };
        let count = store.read_records()?.len();
        info!(path = %store.path.display(), count, "Alarm store opened");
        Ok(store)
    }

    /// Default location inside a data directory
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("alarms.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_records(&self) -> StoreResult<BTreeMap<AlarmId, Alarm>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        let file: AlarmFile = toml::from_str(&content)?;
        Ok(file
            .alarms
            .into_iter()
            .map(|alarm| (alarm.id.clone(), alarm))
            .collect())
    }

    fn write_records(&self, records: &BTreeMap<AlarmId, Alarm>) -> StoreResult<()> {
        let file = AlarmFile {
            alarms: records.values().cloned().collect(),
        };
        let content = toml::to_string_pretty(&file)?;

        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;

        debug!(path = %self.path.display(), count = records.len(), "Alarm file written");
        Ok(())
    }
}

impl AlarmStore for TomlAlarmStore {
    fn get_all(&self) -> StoreResult<Vec<Alarm>> {
        Ok(self.read_records()?.into_values().collect())
    }

    fn put(&mut self, alarm: &Alarm) -> StoreResult<()> {
        let mut records = self.read_records()?;
        records.insert(alarm.id.clone(), alarm.clone());
        self.write_records(&records)
    }

    fn delete(&mut self, id: &AlarmId) -> StoreResult<()> {
        let mut records = self.read_records()?;
        if records.remove(id).is_some() {
            self.write_records(&records)?;
        }
        Ok(())
    }
}

/// In-memory working set of alarms backed by a store
pub struct AlarmBook {
    store: Box<dyn AlarmStore>,
    alarms: Vec<Alarm>,
}

impl AlarmBook {
    /// Load all alarms from `store`
    ///
    /// A store that fails to load yields an empty book; the failure is logged
    /// and the store is still used for later writes.
    pub fn load(store: Box<dyn AlarmStore>) -> Self {
        let mut alarms = match store.get_all() {
            Ok(alarms) => alarms,
            Err(e) => {
                error!(error = %e, "Failed to load alarms, starting with an empty list");
                Vec::new()
            }
        };
        sort_alarms(&mut alarms);
        info!(count = alarms.len(), "Alarms loaded");
        Self { store, alarms }
    }

    /// Re-read the store, picking up changes made by another process
    ///
    /// Returns `true` when the working set changed. On a read failure the
    /// current set is kept.
    pub fn reload(&mut self) -> bool {
        let mut alarms = match self.store.get_all() {
            Ok(alarms) => alarms,
            Err(e) => {
                warn!(error = %e, "Failed to reload alarms, keeping the current list");
                return false;
            }
        };
        sort_alarms(&mut alarms);
        if alarms == self.alarms {
            return false;
        }
        info!(before = self.alarms.len(), after = alarms.len(), "Alarms reloaded");
        self.alarms = alarms;
        true
    }

    pub fn alarms(&self) -> &[Alarm] {
        &self.alarms
    }

    pub fn get(&self, id: &AlarmId) -> Option<&Alarm> {
        self.alarms.iter().find(|a| &a.id == id)
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    /// Insert or replace an alarm, then write it through
    pub fn upsert(&mut self, alarm: Alarm) {
        match self.alarms.iter_mut().find(|a| a.id == alarm.id) {
            Some(existing) => *existing = alarm.clone(),
            None => self.alarms.push(alarm.clone()),
        }
        if let Err(e) = self.store.put(&alarm) {
            warn!(alarm_id = %alarm.id, error = %e, "Failed to persist alarm");
        }
    }

    /// Remove an alarm, then write the deletion through
    ///
    /// Returns the removed alarm if it was present in memory.
    pub fn remove(&mut self, id: &AlarmId) -> Option<Alarm> {
        let removed = self
            .alarms
            .iter()
            .position(|a| &a.id == id)
            .map(|idx| self.alarms.remove(idx));
        if let Err(e) = self.store.delete(id) {
            warn!(alarm_id = %id, error = %e, "Failed to delete alarm from store");
        }
        removed
    }
}

fn sort_alarms(alarms: &mut [Alarm]) {
    alarms.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
}

impl std::fmt::Debug for AlarmBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmBook")
            .field("alarms", &self.alarms)
            .finish_non_exhaustive()
    }
}
