//! Config entries: the finished wizard records, persisted to a JSON file.

use crate::model::{ConfigData, MonthlyRecent};
use crate::DOMAIN;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const OPTION_MONTHLY_HISTORY: &str = "monthly_history";

const STORE_VERSION: u32 = 1;
const ENTRY_VERSION: u32 = 1;
const REDACTED: &str = "**REDACTED**";

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("an entry for {0} already exists")]
    AlreadyConfigured(String),
    #[error("no entry with id {0}")]
    UnknownEntry(String),
    #[error("cannot access entries file: {0}")]
    Io(#[from] io::Error),
    #[error("malformed entries file: {0}")]
    Format(#[from] serde_json::Error),
}

fn empty_options() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub domain: String,
    pub version: u32,
    pub title: String,
    pub data: ConfigData,
    #[serde(default = "empty_options")]
    pub options: Value,
}

impl ConfigEntry {
    pub fn new(title: String, data: ConfigData) -> Self {
        ConfigEntry {
            entry_id: uuid::Uuid::new_v4().simple().to_string(),
            domain: DOMAIN.to_string(),
            version: ENTRY_VERSION,
            title,
            data,
            options: empty_options(),
        }
    }

    /// One entry per meter.
    pub fn unique_id(&self) -> String {
        format!("{}_{}", DOMAIN, self.data.meter_id)
    }

    /// History imported through the options flow, if any.
    pub fn monthly_history(&self) -> Option<MonthlyRecent> {
        self.options
            .get(OPTION_MONTHLY_HISTORY)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn redacted(&self) -> Self {
        let mut entry = self.clone();
        entry.data.password = REDACTED.to_string();
        entry
    }
}

#[derive(Deserialize)]
struct StoreFile {
    version: u32,
    entries: Vec<ConfigEntry>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    entries: &'a [ConfigEntry],
}

pub struct ConfigEntries {
    path: PathBuf,
    entries: Vec<ConfigEntry>,
}

impl ConfigEntries {
    /// Read the entries file. A missing file is an empty store.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EntryError> {
        let path = path.as_ref().to_path_buf();

        let entries = match fs::read_to_string(&path) {
            Ok(content) => {
                let file = serde_json::from_str::<StoreFile>(&content)?;
                log::debug!(
                    "loaded {} entries (store version {}) from {}",
                    file.entries.len(),
                    file.version,
                    path.display()
                );
                file.entries
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("no entries file at {}, starting empty", path.display());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(ConfigEntries { path, entries })
    }

    /// Write through a temporary file so a crash never leaves a truncated store.
    fn save(&self) -> Result<(), EntryError> {
        let content = serde_json::to_string_pretty(&StoreFileRef {
            version: STORE_VERSION,
            entries: &self.entries,
        })?;
        let tmp = self.path.with_extension("tmp");

        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    pub fn get(&self, entry_id: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|e| e.entry_id == entry_id)
    }

    pub fn add(&mut self, title: String, data: ConfigData) -> Result<ConfigEntry, EntryError> {
        let entry = ConfigEntry::new(title, data);
        let unique_id = entry.unique_id();

        if self.entries.iter().any(|e| e.unique_id() == unique_id) {
            return Err(EntryError::AlreadyConfigured(unique_id));
        }

        self.entries.push(entry.clone());
        if let Err(e) = self.save() {
            self.entries.pop();
            return Err(e);
        }

        log::info!("created entry {} ({})", entry.entry_id, unique_id);
        Ok(entry)
    }

    pub fn remove(&mut self, entry_id: &str) -> Result<ConfigEntry, EntryError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.entry_id == entry_id)
            .ok_or_else(|| EntryError::UnknownEntry(entry_id.to_owned()))?;

        let entry = self.entries.remove(index);
        if let Err(e) = self.save() {
            self.entries.insert(index, entry);
            return Err(e);
        }

        log::info!("removed entry {}", entry_id);
        Ok(entry)
    }

    pub fn update_options(
        &mut self,
        entry_id: &str,
        options: Value,
    ) -> Result<ConfigEntry, EntryError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.entry_id == entry_id)
            .ok_or_else(|| EntryError::UnknownEntry(entry_id.to_owned()))?;

        let previous = std::mem::replace(&mut entry.options, options);
        let updated = entry.clone();

        if let Err(e) = self.save() {
            if let Some(entry) = self.entries.iter_mut().find(|e| e.entry_id == entry_id) {
                entry.options = previous;
            }
            return Err(e);
        }

        Ok(updated)
    }
}
