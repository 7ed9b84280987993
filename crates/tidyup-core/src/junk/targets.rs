use crate::model::RunMode;
use crate::platform::SpecialDirs;
use std::path::PathBuf;

/// One junk location: every regular file under `root` that passes the
/// extension and name filters belongs to `category`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunkTarget {
    pub category: String,
    pub root: PathBuf,
    /// Lowercase extensions with leading dot. Empty means any.
    pub include_ext: Vec<String>,
    /// Glob applied to the file name, e.g. `thumbcache_*.db`.
    pub name_pattern: Option<String>,
    /// Glob applied to the path below `root`, e.g. `*/cache2/**`.
    pub path_pattern: Option<String>,
    /// Replaces the run's depth limit for this target.
    pub max_depth: Option<usize>,
    /// Part of the crash-dump subset scanned by `dump` runs.
    pub dump_only: bool,
}

impl JunkTarget {
    pub fn new(category: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            category: category.to_string(),
            root: root.into(),
            include_ext: Vec::new(),
            name_pattern: None,
            path_pattern: None,
            max_depth: None,
            dump_only: false,
        }
    }

    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.include_ext = extensions.iter().map(|ext| ext.to_ascii_lowercase()).collect();
        self
    }

    pub fn with_name_pattern(mut self, pattern: &str) -> Self {
        self.name_pattern = Some(pattern.to_string());
        self
    }

    pub fn with_path_pattern(mut self, pattern: &str) -> Self {
        self.path_pattern = Some(pattern.to_string());
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn as_dump(mut self) -> Self {
        self.dump_only = true;
        self
    }

    fn same_scan(&self, other: &JunkTarget) -> bool {
        self.root == other.root
            && self.include_ext == other.include_ext
            && self.name_pattern == other.name_pattern
            && self.path_pattern == other.path_pattern
            && self.max_depth == other.max_depth
    }
}

const DUMP_EXTENSIONS: &[&str] = &[".dmp", ".mdmp", ".hdmp"];
const ERROR_REPORT_EXTENSIONS: &[&str] = &[".wer", ".dmp", ".mdmp", ".hdmp"];

/// Extensions considered by duplicate detection.
pub const DUPLICATE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".webp", ".raw", ".cr2", ".nef", // images
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".txt", ".rtf", ".odt", // documents
    ".mp3", ".wav", ".flac", ".aac", ".m4a", ".ogg", ".wma", // audio
    ".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".webm", // video
    ".zip", ".rar", ".7z", ".tar", ".gz", ".bz2", ".iso", // archives
    ".exe", ".msi", ".dll", ".sys", ".bat", ".cmd", ".ps1", // executables
];

pub fn windows_table(dirs: &SpecialDirs) -> Vec<JunkTarget> {
    let windir = &dirs.windir;
    let local = &dirs.local_app_data;
    let roaming = &dirs.app_data;
    let explorer = local.join("Microsoft").join("Windows").join("Explorer");

    vec![
        JunkTarget::new("windows-temp", windir.join("Temp")),
        JunkTarget::new("windows-temp", windir.join("Prefetch")),
        JunkTarget::new("windows-temp", windir.join("SoftwareDistribution").join("Download")),
        JunkTarget::new("windows-logs", windir.join("Logs")).with_extensions(&[".log"]),
        JunkTarget::new("windows-logs", windir.join("System32").join("LogFiles")),
        JunkTarget::new("user-temp", &dirs.temp),
        JunkTarget::new("user-temp", local.join("Temp")),
        JunkTarget::new("recent", roaming.join("Microsoft").join("Windows").join("Recent")),
        JunkTarget::new("thumbnail-cache", &explorer).with_name_pattern("thumbcache_*.db"),
        JunkTarget::new("thumbnail-cache", &explorer).with_name_pattern("iconcache_*.db"),
        JunkTarget::new(
            "browser-cache",
            local.join("Google").join("Chrome").join("User Data").join("Default").join("Cache"),
        ),
        JunkTarget::new(
            "browser-cache",
            local.join("Google").join("Chrome").join("User Data").join("Default").join("Code Cache"),
        ),
        JunkTarget::new(
            "browser-cache",
            local.join("Microsoft").join("Edge").join("User Data").join("Default").join("Cache"),
        ),
        JunkTarget::new("browser-cache", roaming.join("Mozilla").join("Firefox").join("Profiles"))
            .with_path_pattern("*/cache2/**"),
        JunkTarget::new(
            "browser-cache",
            roaming.join("Opera Software").join("Opera Stable").join("Cache"),
        ),
        JunkTarget::new("app-cache", roaming.join("discord").join("Cache")),
        JunkTarget::new("app-cache", roaming.join("Slack").join("Cache")),
        JunkTarget::new(
            "app-cache",
            roaming.join("Telegram Desktop").join("tdata").join("user_data").join("cache"),
        ),
        JunkTarget::new("app-cache", roaming.join("Zoom").join("data")),
        JunkTarget::new("app-cache", local.join("NVIDIA").join("GLCache")),
        JunkTarget::new("app-cache", "C:/Program Files (x86)/Steam/appcache"),
        JunkTarget::new(
            "app-cache",
            roaming.join("Adobe").join("Common").join("Media Cache"),
        ),
        // installer extraction folders left behind by GPU and chipset drivers
        JunkTarget::new("driver-leftovers", "C:/NVIDIA"),
        JunkTarget::new("driver-leftovers", "C:/AMD"),
        JunkTarget::new("driver-leftovers", "C:/Intel"),
        JunkTarget::new("telemetry", windir.join("System32").join("SleepStudy")),
        JunkTarget::new(
            "telemetry",
            dirs.program_data
                .join("Microsoft")
                .join("Diagnosis")
                .join("ETLLogs")
                .join("AutoLogger"),
        )
        .with_extensions(&[".etl"]),
        JunkTarget::new("recycle-bin", "C:/$Recycle.Bin"),
        JunkTarget::new("memory-dump", windir.join("Minidump"))
            .with_extensions(DUMP_EXTENSIONS)
            .with_max_depth(2)
            .as_dump(),
        JunkTarget::new("memory-dump", windir)
            .with_name_pattern("*.dmp")
            .with_max_depth(0)
            .as_dump(),
        JunkTarget::new("memory-dump", local.join("CrashDumps"))
            .with_extensions(DUMP_EXTENSIONS)
            .as_dump(),
        JunkTarget::new("error-report", local.join("Microsoft").join("Windows").join("WER"))
            .with_extensions(ERROR_REPORT_EXTENSIONS)
            .as_dump(),
        JunkTarget::new(
            "error-report",
            dirs.program_data.join("Microsoft").join("Windows").join("WER"),
        )
        .with_extensions(ERROR_REPORT_EXTENSIONS)
        .as_dump(),
    ]
}

pub fn unix_table(dirs: &SpecialDirs) -> Vec<JunkTarget> {
    let mut table = vec![
        JunkTarget::new("user-temp", &dirs.temp),
        JunkTarget::new("user-temp", "/var/tmp"),
        JunkTarget::new("user-cache", &dirs.cache),
        JunkTarget::new("recycle-bin", dirs.data.join("Trash").join("files")),
        JunkTarget::new("memory-dump", "/var/crash")
            .with_extensions(&[".crash", ".dmp", ".core"])
            .with_max_depth(2)
            .as_dump(),
    ];

    if cfg!(target_os = "macos") {
        let library = dirs.home.join("Library");
        table.push(JunkTarget::new("user-cache", library.join("Caches")));
        table.push(
            JunkTarget::new("error-report", library.join("Logs").join("DiagnosticReports"))
                .with_extensions(&[".crash", ".ips", ".diag"])
                .as_dump(),
        );
    }

    table
}

/// The junk table for the host platform.
pub fn default_junk_table(dirs: &SpecialDirs) -> Vec<JunkTarget> {
    if cfg!(windows) {
        windows_table(dirs)
    } else {
        unix_table(dirs)
    }
}

/// Picks the targets a run of `mode` scans: the crash-dump subset for `dump`,
/// everything otherwise. Targets whose root is not an existing directory are
/// dropped, as are repeats of an earlier identical scan.
pub fn resolve_targets(table: &[JunkTarget], mode: RunMode) -> Vec<JunkTarget> {
    let mut resolved: Vec<JunkTarget> = Vec::new();
    for target in table {
        if mode == RunMode::Dump && !target.dump_only {
            continue;
        }
        if !target.root.is_dir() {
            continue;
        }
        if resolved.iter().any(|kept| kept.same_scan(target)) {
            continue;
        }
        resolved.push(target.clone());
    }
    resolved
}

pub fn default_duplicate_roots(dirs: &SpecialDirs) -> Vec<PathBuf> {
    ["Desktop", "Documents", "Downloads", "Pictures", "Videos", "Music"]
        .iter()
        .map(|name| dirs.home.join(name))
        .collect()
}
