use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::key::{PresetKey, PresetKind, KEY_PREFIX};
use super::PresetError;
use crate::device::Controls;

/// Key holding the selected target's template name (raw string, not JSON).
pub const SELECTED_TARGET_KEY: &str = "PRESET:MUSIC<SELECTED_TARGET>";

/// Durable string-keyed substrate under the preset store.
///
/// Reads never cache: each call observes the latest committed state.
pub trait KvStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> io::Result<()>;
    fn remove(&mut self, key: &str) -> io::Result<()>;
    fn keys(&self) -> Vec<String>;
}

/// In-process substrate, lost on exit.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> io::Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> io::Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Substrate backed by one JSON object file.
///
/// The file is re-read on every access so edits by other processes show up
/// on the next call. Writes go to a temp file that is renamed over the original.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Default location: ~/.local/share/subtune/presets.json
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("subtune")
            .join("presets.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> BTreeMap<String, String> {
        match self.read_entries() {
            Ok(Some(entries)) => entries,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                BTreeMap::new()
            }
        }
    }

    /// Current entries, `Ok(None)` if the file exists but is not a JSON object of strings.
    fn read_entries(&self) -> io::Result<Option<BTreeMap<String, String>>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Some(BTreeMap::new())),
            Err(e) => return Err(e),
        };
        match serde_json::from_str(&contents) {
            Ok(entries) => Ok(Some(entries)),
            Err(e) => {
                warn!("Ignoring unparseable store {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    /// Entries to modify and write back. An unparseable file is renamed to
    /// `<name>.bad` first so its contents survive the rewrite. Read errors
    /// are returned and the file is left untouched.
    fn load_for_update(&self) -> io::Result<BTreeMap<String, String>> {
        if let Some(entries) = self.read_entries()? {
            return Ok(entries);
        }
        let bad = self.quarantine_path();
        std::fs::rename(&self.path, &bad)?;
        warn!("Moved unparseable store aside to {}", bad.display());
        Ok(BTreeMap::new())
    }

    fn quarantine_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".bad");
        PathBuf::from(name)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> io::Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.load().remove(key)
    }

    fn set(&mut self, key: &str, value: String) -> io::Result<()> {
        let mut entries = self.load_for_update()?;
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    fn remove(&mut self, key: &str) -> io::Result<()> {
        let mut entries = self.load_for_update()?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.load().into_keys().collect()
    }
}

/// A saved parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetRecord {
    pub title: String,
    pub controls: Controls,
}

impl PresetRecord {
    pub fn new(title: impl Into<String>, controls: Controls) -> Self {
        Self {
            title: title.into(),
            controls,
        }
    }

    /// The HOME record written on first run.
    pub fn default_home() -> Self {
        Self::new("Home", Controls::DEFAULT)
    }
}

/// Typed access to preset records over a [`KvStore`].
pub struct PresetStore<S> {
    kv: S,
}

impl<S: KvStore> PresetStore<S> {
    /// Wrap a substrate, creating the HOME record if it does not exist yet.
    pub fn open(kv: S) -> Result<Self, PresetError> {
        let mut store = Self { kv };
        if store.get(&PresetKey::Home).is_none() {
            info!("Initializing HOME preset with defaults");
            store.set(&PresetKey::Home, &PresetRecord::default_home())?;
        }
        Ok(store)
    }

    /// Stored record, or `None` if absent or unparseable.
    pub fn get(&self, key: &PresetKey) -> Option<PresetRecord> {
        let encoded = key.encode();
        let raw = self.kv.get(&encoded)?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Treating corrupt record {} as absent: {}", encoded, e);
                None
            }
        }
    }

    /// Replace the whole record under `key`.
    pub fn set(&mut self, key: &PresetKey, record: &PresetRecord) -> Result<(), PresetError> {
        let encoded = key.encode();
        let value = serde_json::to_string(record).map_err(io::Error::from)?;
        self.kv.set(&encoded, value)?;
        debug!("Stored {} = {}", encoded, record.controls);
        Ok(())
    }

    pub fn remove(&mut self, key: &PresetKey) -> Result<(), PresetError> {
        self.kv.remove(&key.encode())?;
        debug!("Removed {}", key);
        Ok(())
    }

    /// Names of every stored template, sorted.
    pub fn list_template_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .kv
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(KEY_PREFIX))
            .filter_map(|k| match PresetKey::decode(&k)? {
                PresetKey::Template { name } => Some(name),
                _ => None,
            })
            .collect();
        names.sort();
        names
    }

    pub fn selected_target(&self) -> Option<String> {
        self.kv.get(SELECTED_TARGET_KEY).filter(|n| !n.is_empty())
    }

    pub fn set_selected_target(&mut self, name: Option<&str>) -> Result<(), PresetError> {
        match name {
            Some(name) => self.kv.set(SELECTED_TARGET_KEY, name.to_string())?,
            None => self.kv.remove(SELECTED_TARGET_KEY)?,
        }
        Ok(())
    }

    /// Number of stored presets of `kind`, for status output.
    pub fn count(&self, kind: PresetKind) -> usize {
        self.kv
            .keys()
            .iter()
            .filter_map(|k| PresetKey::decode(k))
            .filter(|k| k.kind() == kind)
            .count()
    }

    pub fn substrate(&self) -> &S {
        &self.kv
    }

    #[cfg(test)]
    pub fn substrate_mut(&mut self) -> &mut S {
        &mut self.kv
    }
}
