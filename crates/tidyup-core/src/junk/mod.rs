pub mod targets;

pub use targets::{
    default_duplicate_roots, default_junk_table, resolve_targets, JunkTarget,
    DUPLICATE_EXTENSIONS,
};

use crate::engine::RunContext;
use crate::error::Error;
use crate::events::Phase;
use crate::model::{to_kb, truncate_text, FileAction, FileFinding, LogLevel};
use crate::scanner::{FileEntry, TreeWalker, WalkOptions};
use glob::{Pattern, PatternError};
use std::collections::BTreeMap;
use std::fs;
use std::io;

const DEFAULT_MAX_FILES: usize = 6000;
const MIN_MAX_FILES: usize = 100;
const DEFAULT_MAX_DEPTH: usize = 6;

fn walk_options(
    target: &JunkTarget,
    max_files: usize,
    max_depth: usize,
    ignore: &[Pattern],
) -> Result<WalkOptions, PatternError> {
    let name_pattern = target
        .name_pattern
        .as_deref()
        .map(Pattern::new)
        .transpose()?;
    let path_pattern = target
        .path_pattern
        .as_deref()
        .map(Pattern::new)
        .transpose()?;
    Ok(WalkOptions {
        max_depth: target.max_depth.unwrap_or(max_depth),
        max_files,
        name_pattern,
        path_pattern,
        ignore: ignore.to_vec(),
        ..WalkOptions::default()
    }
    .with_extensions(&target.include_ext))
}

/// Applies the deletion policy to one file. Never fails: a delete error is
/// reported on the finding. A file already gone counts as deleted.
pub fn remediate(file: &FileEntry, category: &str, dry_run: bool) -> FileFinding {
    let (action, error) = if dry_run {
        (FileAction::WouldDelete, None)
    } else {
        match fs::remove_file(&file.path) {
            Ok(()) => (FileAction::Deleted, None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => (FileAction::Deleted, None),
            Err(err) => (FileAction::Skip, Some(truncate_text(&err.to_string(), 200))),
        }
    };

    FileFinding {
        path: file.path.clone(),
        size_kb: to_kb(file.size),
        category: category.to_string(),
        ok: error.is_none(),
        action,
        error,
    }
}

/// Walks every resolved target in order and records one finding per file.
pub fn scan_junk(ctx: &RunContext, targets: &[JunkTarget]) -> Result<(), Error> {
    let config = ctx.config();
    let max_files = config.max_files.unwrap_or(DEFAULT_MAX_FILES).max(MIN_MAX_FILES);
    let max_depth = config.max_depth.unwrap_or(DEFAULT_MAX_DEPTH).max(1);
    let dry_run = ctx.dry_run();

    ctx.log(
        LogLevel::Info,
        format!(
            "junk scan started: targets={} dryRun={}",
            targets.len(),
            dry_run
        ),
    );

    let mut scanned = 0usize;
    for (index, target) in targets.iter().enumerate() {
        if ctx.is_cancelled() {
            return Ok(());
        }
        let base = index * 85 / targets.len().max(1);
        ctx.set_progress_with(base, Phase::Junk, Some(target.category.clone()), None);

        let options = match walk_options(target, max_files, max_depth, ctx.ignore_patterns()) {
            Ok(options) => options,
            Err(err) => {
                ctx.log(
                    LogLevel::Warn,
                    format!("skipping target {}: {}", target.root.display(), err),
                );
                continue;
            }
        };

        let walker = TreeWalker::new(&target.root, options, ctx.cancel_token().clone());
        for file in walker {
            if ctx.is_cancelled() {
                return Ok(());
            }
            scanned += 1;

            let finding = remediate(&file, &target.category, dry_run);
            let shown = truncate_text(&finding.path.to_string_lossy(), 140);
            match &finding.error {
                Some(error) => ctx.log(LogLevel::Warn, format!("skip {} ({})", shown, error)),
                None => ctx.log_with(
                    LogLevel::Info,
                    format!("{} {} ({}KB)", finding.action.as_str(), shown, finding.size_kb),
                    BTreeMap::from([("category".to_string(), target.category.clone())]),
                ),
            }
            ctx.record_file(finding);

            let pct = (base + scanned * 7 / max_files).min(92);
            ctx.set_progress_with(pct, Phase::Junk, None, Some(scanned));
        }
    }

    ctx.set_progress_with(94, Phase::Junk, None, Some(scanned));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn entry(path: PathBuf, size: u64) -> FileEntry {
        FileEntry {
            path,
            size,
            modified: None,
        }
    }

    #[test]
    fn test_remediate_dry_run_keeps_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("old.log");
        fs::write(&path, vec![0u8; 2048]).unwrap();

        let finding = remediate(&entry(path.clone(), 2048), "user-temp", true);
        assert_eq!(finding.action, FileAction::WouldDelete);
        assert!(finding.ok);
        assert_eq!(finding.size_kb, 2);
        assert!(path.exists());
    }

    #[test]
    fn test_remediate_apply_deletes() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("old.log");
        fs::write(&path, b"junk").unwrap();

        let finding = remediate(&entry(path.clone(), 4), "user-temp", false);
        assert_eq!(finding.action, FileAction::Deleted);
        assert!(finding.ok);
        assert!(!path.exists());
    }

    #[test]
    fn test_remediate_missing_file_counts_as_deleted() {
        let tmp = tempdir().unwrap();
        let finding = remediate(&entry(tmp.path().join("gone.tmp"), 10), "user-temp", false);
        assert_eq!(finding.action, FileAction::Deleted);
        assert!(finding.ok);
    }

    #[test]
    fn test_remediate_failure_is_recorded() {
        let tmp = tempdir().unwrap();
        // a directory cannot be removed with remove_file
        let dir = tmp.path().join("locked");
        fs::create_dir(&dir).unwrap();

        let finding = remediate(&entry(dir.clone(), 10), "user-temp", false);
        assert_eq!(finding.action, FileAction::Skip);
        assert!(!finding.ok);
        assert!(finding.error.is_some());
        assert!(dir.exists());
    }

    #[test]
    fn test_walk_options_from_target() {
        let target = JunkTarget::new("thumbnail-cache", "/cache")
            .with_name_pattern("thumbcache_*.db")
            .with_max_depth(0);
        let options = walk_options(&target, 500, 6, &[]).unwrap();
        assert_eq!(options.max_depth, 0);
        assert_eq!(options.max_files, 500);
        assert!(options.name_pattern.is_some());
        assert!(options.include_ext.is_empty());

        assert!(options.path_pattern.is_none());

        let bad = JunkTarget::new("x", "/x").with_name_pattern("[");
        assert!(walk_options(&bad, 500, 6, &[]).is_err());
        let bad = JunkTarget::new("x", "/x").with_path_pattern("*/[");
        assert!(walk_options(&bad, 500, 6, &[]).is_err());
    }
}
