use crate::cancel::CancelToken;
use crate::engine::RunContext;
use crate::error::Error;
use crate::events::Phase;
use crate::hasher::{fingerprint_file, HashAlgorithm};
use crate::junk::DUPLICATE_EXTENSIONS;
use crate::model::{to_kb, truncate_text, DuplicateGroup, DuplicateMember, LogLevel};
use crate::scanner::{FileEntry, TreeWalker, WalkOptions};
use indexmap::IndexMap;
use rayon::prelude::*;
use std::io;
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_MAX_FILES: usize = 5000;
const MIN_MAX_FILES: usize = 200;
const DEFAULT_MAX_DEPTH: usize = 6;
/// Files smaller than this are not worth reporting.
pub const MIN_DUPLICATE_SIZE: u64 = 1024;

/// Fingerprints every file of one size bucket in parallel. Results keep the
/// bucket's order. Once `cancel` fires, remaining files report `Interrupted`.
pub fn fingerprint_bucket(
    files: &[FileEntry],
    algorithm: HashAlgorithm,
    cancel: &CancelToken,
) -> Vec<io::Result<String>> {
    files
        .par_iter()
        .map(|file| {
            if cancel.is_cancelled() {
                Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled"))
            } else {
                fingerprint_file(&file.path, algorithm)
            }
        })
        .collect()
}

fn build_group(fingerprint: String, size: u64, members: Vec<FileEntry>) -> DuplicateGroup {
    let suggested_keep = members[0].path.clone();
    DuplicateGroup {
        fingerprint,
        size_bytes: size,
        members: members
            .into_iter()
            .map(|file| DuplicateMember {
                path: file.path,
                size_kb: to_kb(file.size),
            })
            .collect(),
        suggested_keep,
    }
}

/// Two-pass duplicate search: bucket by exact size, then fingerprint only the
/// buckets holding two or more files. A group is recorded once its bucket is
/// fully hashed; the first member seen is the suggested keeper.
pub fn scan_duplicates(ctx: &RunContext, roots: &[PathBuf]) -> Result<(), Error> {
    let config = ctx.config();
    let max_files = config.max_files.unwrap_or(DEFAULT_MAX_FILES).max(MIN_MAX_FILES);
    let max_depth = config.max_depth.unwrap_or(DEFAULT_MAX_DEPTH).max(1);

    ctx.log(
        LogLevel::Info,
        format!(
            "duplicate scan started: roots={} dryRun={}",
            roots.len(),
            ctx.dry_run()
        ),
    );

    let mut by_size: IndexMap<u64, Vec<FileEntry>> = IndexMap::new();
    let mut scanned = 0usize;
    for root in roots {
        if ctx.is_cancelled() {
            return Ok(());
        }
        let options = WalkOptions {
            max_depth,
            max_files,
            min_size: MIN_DUPLICATE_SIZE,
            ignore: ctx.ignore_patterns().to_vec(),
            ..WalkOptions::default()
        }
        .with_extensions(DUPLICATE_EXTENSIONS);

        for file in TreeWalker::new(root, options, ctx.cancel_token().clone()) {
            if ctx.is_cancelled() {
                return Ok(());
            }
            scanned += 1;
            by_size.entry(file.size).or_default().push(file);
            if scanned % 50 == 0 {
                ctx.set_progress_with(
                    (scanned * 70 / max_files).min(70),
                    Phase::DuplicateIndex,
                    None,
                    Some(scanned),
                );
            }
        }
    }

    let candidates: Vec<(u64, Vec<FileEntry>)> = by_size
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .collect();
    debug!(
        "Indexed {} files, {} size buckets need hashing",
        scanned,
        candidates.len()
    );

    let algorithm = ctx.settings().hash_algorithm;
    let mut hashed = 0usize;
    let mut group_count = 0usize;
    for (size, files) in candidates {
        if ctx.is_cancelled() {
            return Ok(());
        }
        let fingerprints = fingerprint_bucket(&files, algorithm, ctx.cancel_token());
        if ctx.is_cancelled() {
            // bucket may be partially hashed; never publish partial groups
            return Ok(());
        }

        let mut by_fingerprint: IndexMap<String, Vec<FileEntry>> = IndexMap::new();
        for (file, fingerprint) in files.into_iter().zip(fingerprints) {
            match fingerprint {
                Ok(fingerprint) => {
                    hashed += 1;
                    by_fingerprint.entry(fingerprint).or_default().push(file);
                }
                Err(err) => ctx.log(
                    LogLevel::Warn,
                    format!(
                        "hash failed {} ({})",
                        truncate_text(&file.path.to_string_lossy(), 140),
                        err
                    ),
                ),
            }
        }
        ctx.set_progress_with(
            (70 + hashed * 25 / scanned.max(1)).min(95),
            Phase::DuplicateHash,
            None,
            Some(hashed),
        );

        for (fingerprint, members) in by_fingerprint {
            if members.len() < 2 {
                continue;
            }
            let group = build_group(fingerprint, size, members);
            group_count += 1;
            ctx.log(
                LogLevel::Info,
                format!(
                    "duplicate group found: {} ({} files)",
                    group.fingerprint,
                    group.members.len()
                ),
            );
            ctx.record_duplicate(group);
        }
    }

    ctx.log(
        LogLevel::Info,
        format!("duplicate scan finished: {} group(s)", group_count),
    );
    ctx.set_progress_with(98, Phase::Duplicate, None, Some(group_count));
    Ok(())
}
