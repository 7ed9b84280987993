#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use tidyup_core::{
    CleaningEngine, EngineSettings, Error, JunkTarget, RegistryBackend, RegistryRow,
    StartOptions,
};

pub const RUN_KEY: &str = r"HKCU\Software\Microsoft\Windows\CurrentVersion\Run";
pub const RECENT_DOCS_KEY: &str =
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Explorer\RecentDocs";

pub fn settings(root: &Path) -> EngineSettings {
    EngineSettings {
        backup_dir: root.join("backups"),
        ..EngineSettings::default()
    }
}

pub fn options(mode: &str, dry_run: bool) -> StartOptions {
    StartOptions {
        mode: Some(mode.to_string()),
        dry_run: Some(dry_run),
        ..StartOptions::default()
    }
}

pub fn row(key: &str, name: &str, value_type: &str, data: &str) -> RegistryRow {
    RegistryRow {
        key: key.to_string(),
        value_name: name.to_string(),
        value_type: value_type.to_string(),
        data: data.to_string(),
    }
}

/// Writes `count` files of `size` bytes named `<prefix><n>.tmp` into `dir`.
pub fn write_files(dir: &Path, prefix: &str, count: usize, size: usize) {
    fs::create_dir_all(dir).unwrap();
    for n in 0..count {
        fs::write(dir.join(format!("{}{}.tmp", prefix, n)), vec![b'x'; size]).unwrap();
    }
}

/// In-memory registry. Rows live in a flat list keyed by their `key` field.
#[derive(Default)]
pub struct FakeRegistry {
    pub rows: Mutex<Vec<RegistryRow>>,
    pub unavailable: bool,
    pub deny_delete: bool,
    pub panic_on_query: bool,
    /// Queries for this key fail with a backend error.
    pub fail_query_for: Option<String>,
    pub gate: Mutex<Option<Gate>>,
}

struct Gate {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl FakeRegistry {
    pub fn with_rows(rows: Vec<RegistryRow>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    /// Makes the first query block. The returned receiver fires once the run is
    /// parked inside the query; sending on the returned sender lets it continue.
    pub fn gated(rows: Vec<RegistryRow>) -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let registry = Self {
            gate: Mutex::new(Some(Gate {
                entered: entered_tx,
                release: release_rx,
            })),
            ..Self::with_rows(rows)
        };
        (registry, entered_rx, release_tx)
    }

    pub fn has_value(&self, key: &str, name: &str) -> bool {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .any(|row| row.key == key && row.value_name == name)
    }
}

impl RegistryBackend for FakeRegistry {
    fn available(&self) -> bool {
        !self.unavailable
    }

    fn query_key(&self, key: &str) -> Result<Vec<RegistryRow>, Error> {
        if self.panic_on_query {
            panic!("registry backend exploded");
        }
        if self.fail_query_for.as_deref() == Some(key) {
            return Err(Error::Registry(
                "ERROR: The system was unable to find the specified registry key or value."
                    .to_string(),
            ));
        }
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.send(()).unwrap();
            gate.release.recv().unwrap();
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.key == key)
            .cloned()
            .collect())
    }

    fn delete_value(&self, key: &str, value_name: &str) -> Result<(), Error> {
        if self.deny_delete {
            return Err(Error::Registry("ERROR: Access is denied.".to_string()));
        }
        self.rows
            .lock()
            .unwrap()
            .retain(|row| !(row.key == key && row.value_name == value_name));
        Ok(())
    }
}

/// Engine whose junk table is a single `user-temp` target at `junk_root`.
pub fn junk_engine(root: &Path, junk_root: &Path) -> CleaningEngine {
    CleaningEngine::builder(settings(root))
        .junk_targets(vec![JunkTarget::new("user-temp", junk_root)])
        .duplicate_roots(Vec::new())
        .registry_backend(Arc::new(FakeRegistry::default()))
        .build()
}

pub fn registry_engine(root: &Path, registry: Arc<FakeRegistry>) -> CleaningEngine {
    CleaningEngine::builder(settings(root))
        .junk_targets(Vec::new())
        .duplicate_roots(Vec::new())
        .registry_backend(registry)
        .build()
}
