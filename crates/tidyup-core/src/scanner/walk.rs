use crate::cancel::CancelToken;
use crate::limiter::Limiter;
use glob::{MatchOptions, Pattern};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::trace;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// A regular file produced by the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Directories deeper than this (root = 0) are not entered.
    pub max_depth: usize,
    /// Upper bound on file entries examined, counted before size/extension filters.
    pub max_files: usize,
    pub min_size: u64,
    pub max_size_bytes: u64,
    /// Lowercase extensions with leading dot, e.g. `.dmp`. Empty means any.
    pub include_ext: HashSet<String>,
    /// Glob matched against the file name only.
    pub name_pattern: Option<Pattern>,
    /// Glob matched against the path relative to the walk root.
    pub path_pattern: Option<Pattern>,
    /// Globs matched against full paths; hits are skipped, directories included.
    pub ignore: Vec<Pattern>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            max_depth: 6,
            max_files: 6000,
            min_size: 1,
            max_size_bytes: DEFAULT_MAX_FILE_SIZE,
            include_ext: HashSet::new(),
            name_pattern: None,
            path_pattern: None,
            ignore: Vec::new(),
        }
    }
}

impl WalkOptions {
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.include_ext = extensions
            .into_iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .collect();
        self
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: !cfg!(windows),
        ..MatchOptions::default()
    }
}

struct Frame {
    entries: fs::ReadDir,
    depth: usize,
}

/// Depth-first directory walk driven by an explicit stack of open directories.
///
/// Unreadable directories and entries are skipped. Symlinks and special files
/// are never followed or yielded, so link cycles cannot trap the walk. The
/// sequence ends early when the cancel token fires or the file limit is used up.
pub struct TreeWalker {
    root: PathBuf,
    options: WalkOptions,
    cancel: CancelToken,
    limiter: Limiter,
    stack: Vec<Frame>,
    finished: bool,
}

impl TreeWalker {
    pub fn new(root: impl AsRef<Path>, options: WalkOptions, cancel: CancelToken) -> Self {
        let limiter = Limiter::new(options.max_files);
        let mut walker = Self {
            root: root.as_ref().to_path_buf(),
            options,
            cancel,
            limiter,
            stack: Vec::new(),
            finished: false,
        };
        let root = walker.root.clone();
        walker.enter(&root, 0);
        walker
    }

    fn enter(&mut self, dir: &Path, depth: usize) {
        if depth > self.options.max_depth || self.is_ignored(dir) {
            return;
        }
        match fs::read_dir(dir) {
            Ok(entries) => self.stack.push(Frame { entries, depth }),
            Err(err) => trace!("Skipping unreadable directory {}: {}", dir.display(), err),
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.options
            .ignore
            .iter()
            .any(|pattern| pattern.matches_path_with(path, match_options()))
    }

    fn finish(&mut self) {
        self.finished = true;
        self.stack.clear();
    }

    fn admit(&self, path: PathBuf, metadata: fs::Metadata) -> Option<FileEntry> {
        let size = metadata.len();
        if size < self.options.min_size || size > self.options.max_size_bytes {
            return None;
        }

        if !self.options.include_ext.is_empty() {
            let ext = path
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy().to_ascii_lowercase()))?;
            if !self.options.include_ext.contains(&ext) {
                return None;
            }
        }

        if let Some(pattern) = &self.options.name_pattern {
            let name = path.file_name()?.to_string_lossy();
            if !pattern.matches_with(&name, match_options()) {
                return None;
            }
        }

        if let Some(pattern) = &self.options.path_pattern {
            let relative = path.strip_prefix(&self.root).ok()?;
            if !pattern.matches_path_with(relative, match_options()) {
                return None;
            }
        }

        if self.is_ignored(&path) {
            return None;
        }

        Some(FileEntry {
            path,
            size,
            modified: metadata.modified().ok(),
        })
    }
}

impl Iterator for TreeWalker {
    type Item = FileEntry;

    fn next(&mut self) -> Option<FileEntry> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.finish();
                return None;
            }

            let frame = match self.stack.last_mut() {
                Some(frame) => frame,
                None => {
                    self.finished = true;
                    return None;
                }
            };
            let depth = frame.depth;
            let entry = match frame.entries.next() {
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    trace!("Skipping unreadable entry: {}", err);
                    continue;
                }
                None => {
                    self.stack.pop();
                    continue;
                }
            };

            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    trace!("Skipping {}: {}", path.display(), err);
                    continue;
                }
            };

            if file_type.is_dir() {
                self.enter(&path, depth + 1);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            if !self.limiter.try_acquire() {
                self.finish();
                return None;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    trace!("Skipping {}: {}", path.display(), err);
                    continue;
                }
            };
            if let Some(file) = self.admit(path, metadata) {
                return Some(file);
            }
        }
    }
}
