use crate::error::Error;
use crate::model::{BackupEntry, BackupMeta, LogEntry, ResultsList};
use chrono::{DateTime, Local, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The persisted snapshot document. Written whole, read whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub id: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub meta: BackupMeta,
    #[serde(default)]
    pub snapshot: ResultsList,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

/// Header fields only; used when listing so snapshots are not materialized.
#[derive(Deserialize)]
struct DocumentHeader {
    id: String,
    time: DateTime<Utc>,
    #[serde(default)]
    meta: BackupMeta,
}

/// Directory of `<id>.json` snapshot documents.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a new document and returns its descriptor. Existing documents
    /// are never overwritten: a clashing id gets a numeric suffix.
    pub fn create(
        &self,
        meta: BackupMeta,
        snapshot: ResultsList,
        logs: Vec<LogEntry>,
    ) -> Result<BackupEntry, Error> {
        fs::create_dir_all(&self.dir)?;

        let time = Utc::now();
        let id = self.claim_id(&time.with_timezone(&Local))?;
        let path = self.document_path(&id);
        let document = BackupDocument {
            id: id.clone(),
            time,
            meta: meta.clone(),
            snapshot,
            logs,
        };
        if let Err(err) = write_document(&path, &document) {
            let _ = fs::remove_file(&path);
            return Err(err);
        }
        debug!("Wrote backup document {}", path.display());

        Ok(BackupEntry {
            id,
            time,
            path,
            meta,
        })
    }

    /// Merges `known` records with the documents on disk. Disk wins when both
    /// carry the same id. Sorted oldest first.
    pub fn list(&self, known: &[BackupEntry]) -> Vec<BackupEntry> {
        let mut by_id: IndexMap<String, BackupEntry> = known
            .iter()
            .map(|entry| (entry.id.clone(), entry.clone()))
            .collect();

        for entry in self.scan_disk() {
            by_id.insert(entry.id.clone(), entry);
        }

        let mut entries: Vec<BackupEntry> = by_id.into_values().collect();
        entries.sort_by(|a, b| a.time.cmp(&b.time));
        entries
    }

    pub fn load(&self, entry: &BackupEntry) -> Result<BackupDocument, Error> {
        let raw = fs::read_to_string(&entry.path)?;
        let document: BackupDocument = serde_json::from_str(&raw)?;
        Ok(document)
    }

    fn scan_disk(&self) -> Vec<BackupEntry> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("No backup directory at {}: {}", self.dir.display(), err);
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_json = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            if !is_json {
                continue;
            }
            // claimed but not yet written
            if entry.metadata().map(|meta| meta.len() == 0).unwrap_or(false) {
                continue;
            }

            let header = fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|raw| serde_json::from_str::<DocumentHeader>(&raw).map_err(Error::from));
            match header {
                Ok(header) if !header.id.is_empty() => found.push(BackupEntry {
                    id: header.id,
                    time: header.time,
                    path,
                    meta: header.meta,
                }),
                Ok(_) => debug!("Ignoring backup without id: {}", path.display()),
                Err(err) => warn!("Ignoring unreadable backup {}: {}", path.display(), err),
            }
        }
        found
    }

    fn document_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Reserves `<id>.json` by creating it empty with `create_new`. Two
    /// writers in the same second never end up with the same id.
    fn claim_id(&self, now: &DateTime<Local>) -> Result<String, Error> {
        let base = format!("backup-{}", now.format("%Y%m%d-%H%M%S"));
        let mut attempt = 1usize;
        loop {
            let id = if attempt == 1 {
                base.clone()
            } else {
                format!("{}-{}", base, attempt)
            };
            let claimed = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.document_path(&id));
            match claimed {
                Ok(_) => return Ok(id),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Writes to a sibling temp file first so a crash never leaves a half-written document.
fn write_document(path: &Path, document: &BackupDocument) -> Result<(), Error> {
    let json = serde_json::to_string_pretty(document)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileAction, FileFinding, LogLevel};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn sample_results() -> ResultsList {
        ResultsList {
            files: vec![FileFinding {
                path: PathBuf::from("/tmp/cache/a.bin"),
                size_kb: 12,
                category: "user-cache".to_string(),
                action: FileAction::WouldDelete,
                ok: true,
                error: None,
            }],
            ..ResultsList::default()
        }
    }

    fn note(text: &str) -> BackupMeta {
        let mut meta = BackupMeta::new();
        meta.insert("note".to_string(), serde_json::Value::from(text));
        meta
    }

    #[test]
    fn test_create_then_load() {
        let tmp = tempdir().unwrap();
        let store = BackupStore::new(tmp.path().join("backups"));
        let logs = vec![LogEntry {
            time: Utc::now(),
            level: LogLevel::Ok,
            message: "done".to_string(),
            meta: BTreeMap::new(),
        }];

        let entry = store.create(note("first"), sample_results(), logs.clone()).unwrap();
        assert!(entry.id.starts_with("backup-"));
        assert!(entry.path.exists());
        assert_eq!(entry.meta["note"], "first");

        let document = store.load(&entry).unwrap();
        assert_eq!(document.id, entry.id);
        assert_eq!(document.time, entry.time);
        assert_eq!(document.snapshot, sample_results());
        assert_eq!(document.logs, logs);
    }

    #[test]
    fn test_same_second_ids_do_not_overwrite() {
        let tmp = tempdir().unwrap();
        let store = BackupStore::new(tmp.path());
        let a = store.create(note("a"), ResultsList::default(), Vec::new()).unwrap();
        let b = store.create(note("b"), ResultsList::default(), Vec::new()).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.load(&a).unwrap().meta["note"], "a");
        assert_eq!(store.load(&b).unwrap().meta["note"], "b");
    }

    #[test]
    fn test_concurrent_creates_get_distinct_ids() {
        let tmp = tempdir().unwrap();
        let store = BackupStore::new(tmp.path());
        let entries: Vec<BackupEntry> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|n| {
                    let store = store.clone();
                    scope.spawn(move || {
                        store
                            .create(note(&n.to_string()), sample_results(), Vec::new())
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        let mut ids: Vec<&str> = entries.iter().map(|entry| entry.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(store.list(&[]).len(), 8);
        for entry in &entries {
            let document = store.load(entry).unwrap();
            assert_eq!(document.id, entry.id);
            assert_eq!(document.meta, entry.meta);
        }
    }

    #[test]
    fn test_list_merges_and_disk_wins() {
        let tmp = tempdir().unwrap();
        let store = BackupStore::new(tmp.path());
        let on_disk = store.create(note("disk"), ResultsList::default(), Vec::new()).unwrap();

        let mut stale = on_disk.clone();
        stale.meta = note("memory");
        let memory_only = BackupEntry {
            id: "backup-19990101-000000".to_string(),
            time: on_disk.time - chrono::Duration::days(1),
            path: tmp.path().join("elsewhere.json"),
            meta: BackupMeta::new(),
        };

        let listed = store.list(&[stale, memory_only.clone()]);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], memory_only);
        assert_eq!(listed[1].id, on_disk.id);
        assert_eq!(listed[1].meta["note"], "disk");
    }

    #[test]
    fn test_list_skips_corrupt_and_foreign_files() {
        let tmp = tempdir().unwrap();
        let store = BackupStore::new(tmp.path());
        fs::write(tmp.path().join("broken.json"), "{ not json").unwrap();
        fs::write(tmp.path().join("readme.txt"), "hello").unwrap();
        fs::write(tmp.path().join("noid.json"), r#"{"id":"","time":"2024-01-01T00:00:00Z"}"#)
            .unwrap();
        let entry = store.create(BackupMeta::new(), ResultsList::default(), Vec::new()).unwrap();

        let listed = store.list(&[]);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, entry.id);
    }

    #[test]
    fn test_list_without_directory_returns_known() {
        let tmp = tempdir().unwrap();
        let store = BackupStore::new(tmp.path().join("missing"));
        assert!(store.list(&[]).is_empty());
    }

    #[test]
    fn test_load_corrupt_document_fails() {
        let tmp = tempdir().unwrap();
        let store = BackupStore::new(tmp.path());
        let entry = store.create(BackupMeta::new(), sample_results(), Vec::new()).unwrap();
        fs::write(&entry.path, "{\"id\": 5").unwrap();
        assert!(matches!(store.load(&entry), Err(Error::Json(_))));
    }
}
