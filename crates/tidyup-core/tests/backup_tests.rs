mod common;

use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

use common::{junk_engine, options, row, settings, write_files, FakeRegistry, RUN_KEY};
use tidyup_core::events::BackupAction;
use tidyup_core::model::BackupMeta;
use tidyup_core::{CleaningEngine, EngineEvent, EventKind, LogLevel, RestoreOutcome};

fn note(text: &str) -> BackupMeta {
    let mut meta = BackupMeta::new();
    meta.insert("note".to_string(), serde_json::Value::from(text));
    meta
}

#[test]
fn test_backup_round_trip_restores_results() {
    let tmp = tempdir().unwrap();
    let junk = tmp.path().join("junk");
    write_files(&junk, "snap", 3, 1500);

    let engine = junk_engine(tmp.path(), &junk);
    let actions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&actions);
    let _sub = engine.on(EventKind::Backup, move |event| {
        if let EngineEvent::Backup(backup) = event {
            sink.lock().unwrap().push((backup.action, backup.entry.id.clone()));
        }
    });

    engine.start(options("full", true));
    engine.wait();
    let before = engine.results_list();
    assert_eq!(before.files.len(), 3);

    let entry = engine.create_backup(note("before cleanup")).unwrap();
    assert!(entry.id.starts_with("backup-"));
    assert!(entry.path.starts_with(engine.backup_dir()));
    assert!(entry.path.exists());
    assert_eq!(entry.meta["note"], "before cleanup");
    assert_eq!(entry.meta["dryRunDefault"], true);
    assert_eq!(engine.status().counts.backups, 1);

    // an apply run replaces the findings and removes the files
    engine.start(options("full", false));
    engine.wait();
    assert!(!engine.status().dry_run);
    assert!(!junk.join("snap0.tmp").exists());

    let outcome = engine.restore_backup(&entry.id);
    assert_eq!(
        outcome,
        RestoreOutcome::Restored {
            entry: entry.clone()
        }
    );

    let after = engine.results_list();
    assert_eq!(after.files, before.files);
    assert_eq!(after.duplicates, before.duplicates);
    assert_eq!(after.registry, before.registry);
    let status = engine.status();
    assert!(status.dry_run);
    assert_eq!(status.status_message, "idle");

    assert_eq!(
        *actions.lock().unwrap(),
        vec![
            (BackupAction::Created, entry.id.clone()),
            (BackupAction::Restored, entry.id.clone()),
        ]
    );
    assert!(engine
        .logs()
        .iter()
        .any(|log| log.message == format!("backup restored {}", entry.id)));
}

#[cfg(target_os = "linux")]
#[test]
fn test_backup_survives_non_utf8_file_name() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let tmp = tempdir().unwrap();
    let junk = tmp.path().join("junk");
    fs::create_dir_all(&junk).unwrap();
    let odd = junk.join(OsStr::from_bytes(b"bad\xffname.tmp"));
    fs::write(&odd, vec![b'x'; 700]).unwrap();

    let engine = junk_engine(tmp.path(), &junk);
    engine.start(options("full", true));
    engine.wait();
    assert_eq!(engine.results_list().files.len(), 1);

    let entry = engine.create_backup(note("odd name")).unwrap();

    // a fresh engine has to read the document back from disk
    let fresh = junk_engine(tmp.path(), &junk);
    let outcome = fresh.restore_backup(&entry.id);
    assert!(matches!(outcome, RestoreOutcome::Restored { .. }));
    let files = fresh.results_list().files;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path.to_string_lossy(), odd.to_string_lossy());
    assert!(files[0].path.to_string_lossy().contains('\u{fffd}'));
}

#[test]
fn test_list_backups_reads_directory() {
    let tmp = tempdir().unwrap();
    let engine = junk_engine(tmp.path(), &tmp.path().join("none"));
    assert!(engine.list_backups().is_empty());

    let entry = engine.create_backup(note("first")).unwrap();

    // a second engine over the same directory sees the document
    let other = junk_engine(tmp.path(), &tmp.path().join("none"));
    let listed = other.list_backups();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, entry.id);
    assert_eq!(listed[0].path, entry.path);
    assert_eq!(listed[0].meta["note"], "first");
    assert_eq!(listed[0].meta["dryRunDefault"], true);
    assert!(other.restore_backup(&entry.id).is_ok());
}

#[test]
fn test_restore_unknown_id_fails() {
    let tmp = tempdir().unwrap();
    let engine = junk_engine(tmp.path(), &tmp.path().join("none"));

    match engine.restore_backup("backup-19990101-000000") {
        RestoreOutcome::Failed { error } => {
            assert!(error.contains("backup not found"));
            assert!(error.contains("backup-19990101-000000"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    let last = engine.logs().pop().unwrap();
    assert_eq!(last.level, LogLevel::Error);
}

#[test]
fn test_restore_corrupt_document_leaves_state() {
    let tmp = tempdir().unwrap();
    let junk = tmp.path().join("junk");
    write_files(&junk, "c", 2, 10);

    let engine = junk_engine(tmp.path(), &junk);
    let entry = engine.create_backup(BackupMeta::new()).unwrap();

    engine.start(options("full", true));
    engine.wait();
    let before = engine.results_list();
    fs::write(&entry.path, "{ not json").unwrap();

    let outcome = engine.restore_backup(&entry.id);
    assert!(!outcome.is_ok());
    assert_eq!(engine.results_list(), before);
    assert!(engine
        .logs()
        .iter()
        .any(|log| log.level == LogLevel::Error && log.message.starts_with("restore failed")));
}

#[test]
fn test_restore_refused_during_run() {
    let tmp = tempdir().unwrap();
    let (registry, entered, release) =
        FakeRegistry::gated(vec![row(RUN_KEY, "Ghost", "REG_SZ", r"C:\Missing\ghost.exe")]);
    let engine = CleaningEngine::builder(settings(tmp.path()))
        .junk_targets(Vec::new())
        .duplicate_roots(Vec::new())
        .registry_backend(Arc::new(registry))
        .build();
    let entry = engine.create_backup(BackupMeta::new()).unwrap();

    engine.start(options("registry", true));
    entered.recv().unwrap();
    let outcome = engine.restore_backup(&entry.id);
    release.send(()).unwrap();
    engine.wait();

    assert_eq!(
        outcome,
        RestoreOutcome::Failed {
            error: "run in progress".to_string()
        }
    );
    assert_eq!(engine.results_list().registry.len(), 1);
}

#[test]
fn test_backup_failure_is_reported() {
    let tmp = tempdir().unwrap();
    let blocker = tmp.path().join("backups");
    // a plain file where the directory should be
    fs::write(&blocker, b"").unwrap();

    let engine = junk_engine(tmp.path(), &tmp.path().join("none"));
    assert!(engine.create_backup(BackupMeta::new()).is_err());
    assert_eq!(engine.status().counts.backups, 0);
    assert!(engine
        .logs()
        .iter()
        .any(|log| log.level == LogLevel::Error && log.message.starts_with("backup failed")));
}
