//! Completion State Store
//!
//! Persists which step codes have completed for which unit, so that a new
//! invocation resumes instead of restarting. The record is loaded once when a
//! run starts and written back when it ends, including when it ends early.
//!
//! # File Format
//!
//! A JSON object mapping unit keys to the concatenation of completed codes:
//!
//! ```text
//! { "qt4": "dupcbi", "qt4_egg": "ce" }
//! ```
//!
//! The format is internal to this tool and not stable across versions. A
//! missing or unreadable file yields an empty record.

use crate::error::Result;
use crate::steps::StepCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Unit key → completed step codes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletionRecord {
    units: BTreeMap<String, String>,
}

impl CompletionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `code` has been recorded for `unit`
    pub fn is_done(&self, unit: &str, code: StepCode) -> bool {
        self.units
            .get(unit)
            .is_some_and(|codes| codes.contains(code.as_char()))
    }

    /// Record `code` for `unit`. Returns false if it was already recorded.
    pub fn mark_done(&mut self, unit: &str, code: StepCode) -> bool {
        let codes = self.units.entry(unit.to_string()).or_default();
        if codes.contains(code.as_char()) {
            return false;
        }
        codes.push(code.as_char());
        true
    }

    /// Completed codes for `unit`, in completion order
    pub fn done_steps(&self, unit: &str) -> &str {
        self.units.get(unit).map(String::as_str).unwrap_or("")
    }

    /// Iterate over (unit key, completed codes)
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.units.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.units.values().all(String::is_empty)
    }
}

/// The completion record bound to its file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    record: CompletionRecord,
}

impl StateStore {
    /// Name of the state file inside the working root
    pub const FILE_NAME: &'static str = "proc_flags.json";

    /// Load the record at `path`.
    ///
    /// Never fails: a missing file starts a fresh record and a corrupt one is
    /// reported and replaced by an empty record.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let record = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<CompletionRecord>(&text) {
                Ok(record) => {
                    debug!("Loaded completion record from {}", path.display());
                    record
                }
                Err(e) => {
                    warn!(
                        "Ignoring corrupt completion record {}: {}",
                        path.display(),
                        e
                    );
                    CompletionRecord::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No completion record at {}, starting fresh", path.display());
                CompletionRecord::new()
            }
            Err(e) => {
                warn!(
                    "Cannot read completion record {}: {}",
                    path.display(),
                    e
                );
                CompletionRecord::new()
            }
        };
        Self { path, record }
    }

    /// Create a store with a preset record (nothing is read from disk)
    pub fn with_record(path: impl Into<PathBuf>, record: CompletionRecord) -> Self {
        Self {
            path: path.into(),
            record,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &CompletionRecord {
        &self.record
    }

    pub fn is_done(&self, unit: &str, code: StepCode) -> bool {
        self.record.is_done(unit, code)
    }

    pub fn mark_done(&mut self, unit: &str, code: StepCode) -> bool {
        self.record.mark_done(unit, code)
    }

    /// Write the whole record to disk.
    ///
    /// The file is written next to its destination and renamed over it, so a
    /// crash mid-write leaves the previous record intact.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.record)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Saved completion record to {}", self.path.display());
        Ok(())
    }
}

/// Scoped ownership of a [`StateStore`] for the duration of one run.
///
/// The record is loaded when the session opens. `close` saves it and reports
/// errors; a session dropped without `close` (early return, unwinding panic)
/// still saves, logging any failure.
#[derive(Debug)]
pub struct StateSession {
    store: StateStore,
    saved: bool,
}

impl StateSession {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            store: StateStore::load(path),
            saved: false,
        }
    }

    /// Save the record and end the session
    pub fn close(mut self) -> Result<()> {
        self.saved = true;
        self.store.save()
    }
}

impl Deref for StateSession {
    type Target = StateStore;

    fn deref(&self) -> &StateStore {
        &self.store
    }
}

impl DerefMut for StateSession {
    fn deref_mut(&mut self) -> &mut StateStore {
        &mut self.store
    }
}

impl Drop for StateSession {
    fn drop(&mut self) {
        if self.saved {
            return;
        }
        if let Err(e) = self.store.save() {
            error!(
                "Failed to save completion record {}: {}",
                self.store.path().display(),
                e
            );
        }
    }
}
