use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Free-form metadata attached to a backup.
pub type BackupMeta = serde_json::Map<String, serde_json::Value>;

/// Which scan strategy a run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Full,
    Dump,
    Duplicate,
    Registry,
}

impl RunMode {
    pub const ALL: [RunMode; 4] = [
        RunMode::Full,
        RunMode::Dump,
        RunMode::Duplicate,
        RunMode::Registry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Full => "full",
            RunMode::Dump => "dump",
            RunMode::Duplicate => "duplicate",
            RunMode::Registry => "registry",
        }
    }

    /// Case-insensitive lookup against the mode whitelist.
    pub fn from_name(name: &str) -> Option<RunMode> {
        let name = name.trim().to_ascii_lowercase();
        RunMode::ALL.into_iter().find(|mode| mode.as_str() == name)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied, unvalidated options for `CleaningEngine::start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartOptions {
    pub mode: Option<String>,
    pub dry_run: Option<bool>,
    pub max_files: Option<usize>,
    pub max_depth: Option<usize>,
    pub keep_previous_results: bool,
    pub privacy_traces: bool,
    pub paths: Vec<PathBuf>,
}

/// Validated configuration of one run. Fixed for the run's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub mode: RunMode,
    pub dry_run: bool,
    pub max_files: Option<usize>,
    pub max_depth: Option<usize>,
    pub keep_previous_results: bool,
    pub privacy_traces: bool,
    pub paths: Vec<PathBuf>,
}

impl RunConfig {
    /// Unknown modes fall back to `full`; anything but an explicit `false`
    /// keeps the run in dry-run.
    pub fn from_options(options: &StartOptions) -> Self {
        let mode = options
            .mode
            .as_deref()
            .and_then(RunMode::from_name)
            .unwrap_or_default();

        Self {
            mode,
            dry_run: options.dry_run != Some(false),
            max_files: options.max_files,
            max_depth: options.max_depth,
            keep_previous_results: options.keep_previous_results,
            privacy_traces: options.privacy_traces,
            paths: options.paths.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileAction {
    WouldDelete,
    Deleted,
    Skip,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::WouldDelete => "would-delete",
            FileAction::Deleted => "deleted",
            FileAction::Skip => "skip",
        }
    }
}

/// Writes a path as a string, replacing bytes that are not valid UTF-8.
fn lossy_path<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}

/// One junk file examined by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFinding {
    #[serde(serialize_with = "lossy_path")]
    pub path: PathBuf,
    #[serde(rename = "sizeKB")]
    pub size_kb: u64,
    pub category: String,
    pub action: FileAction,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateMember {
    #[serde(serialize_with = "lossy_path")]
    pub path: PathBuf,
    #[serde(rename = "sizeKB")]
    pub size_kb: u64,
}

/// Files sharing one exact size and one content fingerprint. Always two or more members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    /// `"<algorithm>:<hex digest>"`
    pub fingerprint: String,
    pub size_bytes: u64,
    pub members: Vec<DuplicateMember>,
    #[serde(serialize_with = "lossy_path")]
    pub suggested_keep: PathBuf,
}

impl DuplicateGroup {
    /// Bytes that would be freed by keeping only `suggested_keep`.
    pub fn wasted_bytes(&self) -> u64 {
        self.size_bytes * (self.members.len() as u64).saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryAction {
    WouldFix,
    Fixed,
    FailedFix,
    WouldClear,
    Cleared,
    FailedClear,
}

/// A registry value flagged by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryIssue {
    pub key: String,
    pub value_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub reason: String,
    pub action: RegistryAction,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Ok,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub files: usize,
    pub duplicates: usize,
    pub registry: usize,
    pub backups: usize,
}

/// Outcome of a finished run, kept as `lastRun` and published as the `done` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub time: DateTime<Utc>,
    pub mode: RunMode,
    pub dry_run: bool,
    pub status: String,
    pub files: usize,
    pub duplicates: usize,
    pub registry: usize,
    #[serde(rename = "reclaimedKB")]
    pub reclaimed_kb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub running: bool,
    pub progress: u8,
    pub total: u8,
    pub mode: RunMode,
    pub dry_run: bool,
    pub status_message: String,
    pub last_run: Option<RunSummary>,
    pub counts: RunCounts,
}

/// Descriptor of one persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub id: String,
    pub time: DateTime<Utc>,
    #[serde(serialize_with = "lossy_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub meta: BackupMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsList {
    pub files: Vec<FileFinding>,
    pub duplicates: Vec<DuplicateGroup>,
    pub registry: Vec<RegistryIssue>,
    pub backups: Vec<BackupEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    Restored { entry: BackupEntry },
    Failed { error: String },
}

impl RestoreOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, RestoreOutcome::Restored { .. })
    }
}

/// Kilobytes rounded to nearest, as shown in findings.
pub fn to_kb(bytes: u64) -> u64 {
    (bytes + 512) / 1024
}

/// Shortens `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate_text(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3).max(1);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_whitelist_defaults_to_full() {
        let options = StartOptions {
            mode: Some("turbo".to_string()),
            ..Default::default()
        };
        assert_eq!(RunConfig::from_options(&options).mode, RunMode::Full);

        let options = StartOptions {
            mode: Some(" Duplicate ".to_string()),
            ..Default::default()
        };
        assert_eq!(RunConfig::from_options(&options).mode, RunMode::Duplicate);
    }

    #[test]
    fn test_dry_run_unless_explicitly_false() {
        let mut options = StartOptions::default();
        assert!(RunConfig::from_options(&options).dry_run);
        options.dry_run = Some(true);
        assert!(RunConfig::from_options(&options).dry_run);
        options.dry_run = Some(false);
        assert!(!RunConfig::from_options(&options).dry_run);
    }

    #[test]
    fn test_to_kb_rounds() {
        assert_eq!(to_kb(0), 0);
        assert_eq!(to_kb(511), 0);
        assert_eq!(to_kb(512), 1);
        assert_eq!(to_kb(4096), 4);
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("abcdefghij", 6), "abc...");
    }

    #[test]
    fn test_finding_wire_names() {
        let finding = FileFinding {
            path: PathBuf::from("/tmp/a.log"),
            size_kb: 3,
            category: "user-temp".to_string(),
            action: FileAction::WouldDelete,
            ok: true,
            error: None,
        };
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["sizeKB"], 3);
        assert_eq!(json["action"], "would-delete");
        assert!(json.get("error").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_serializes_lossily() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let finding = FileFinding {
            path: PathBuf::from(OsStr::from_bytes(b"/tmp/bad\xffname.tmp")),
            size_kb: 1,
            category: "user-temp".to_string(),
            action: FileAction::WouldDelete,
            ok: true,
            error: None,
        };
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["path"], "/tmp/bad\u{fffd}name.tmp");
    }
}
