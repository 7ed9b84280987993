pub mod reg_cli;

pub use reg_cli::{parse_reg_rows, CommandOutput, CommandRunner, RegCli, SystemCommandRunner};

use crate::engine::RunContext;
use crate::error::Error;
use crate::events::Phase;
use crate::model::{truncate_text, LogLevel, RegistryAction, RegistryIssue};
use crate::platform::expand_env;
use std::path::Path;

/// One value line from a registry key listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRow {
    pub key: String,
    pub value_name: String,
    pub value_type: String,
    pub data: String,
}

/// Read and delete access to registry values.
pub trait RegistryBackend: Send + Sync {
    /// False on hosts without a registry; scans are skipped there.
    fn available(&self) -> bool;
    fn query_key(&self, key: &str) -> Result<Vec<RegistryRow>, Error>;
    fn delete_value(&self, key: &str, value_name: &str) -> Result<(), Error>;
}

pub const AUTOSTART_KEYS: &[&str] = &[
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Run",
    r"HKLM\Software\Microsoft\Windows\CurrentVersion\Run",
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\RunOnce",
    r"HKLM\Software\Microsoft\Windows\CurrentVersion\RunOnce",
];

pub const PRIVACY_KEYS: &[&str] = &[
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Explorer\RecentDocs",
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Explorer\RunMRU",
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Explorer\TypedPaths",
    r"HKCU\Software\Microsoft\Internet Explorer\TypedURLs",
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Applets\Paint\Recent File List",
];

const ERROR_DETAIL_LIMIT: usize = 200;

/// Leading executable of a command line: the quoted prefix when the line
/// starts with a quote, otherwise everything up to the first whitespace.
pub fn parse_exec_path(command: &str) -> String {
    let command = command.trim();
    if let Some(rest) = command.strip_prefix('"') {
        return match rest.find('"') {
            Some(end) if end > 0 => rest[..end].to_string(),
            _ => command.to_string(),
        };
    }
    command
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Drive-letter (`C:\`) and UNC (`\\host`) paths, plus absolute host paths.
pub fn looks_like_filesystem_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    let drive = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && bytes[2] == b'\\';
    drive || path.starts_with(r"\\") || (!path.is_empty() && Path::new(path).is_absolute())
}

fn is_string_value(value_type: &str) -> bool {
    value_type.eq_ignore_ascii_case("REG_SZ") || value_type.eq_ignore_ascii_case("REG_EXPAND_SZ")
}

fn error_detail(err: &Error) -> String {
    let detail = match err {
        Error::Registry(detail) => detail.clone(),
        other => other.to_string(),
    };
    truncate_text(&detail, ERROR_DETAIL_LIMIT)
}

/// Flags autostart values whose executable no longer exists and, outside
/// dry-run, deletes them.
pub fn scan_autostart(ctx: &RunContext) -> Result<(), Error> {
    let registry = ctx.registry();
    if !registry.available() {
        ctx.log(LogLevel::Warn, "registry scan skipped: Windows only");
        ctx.set_progress(98, Phase::Registry);
        return Ok(());
    }

    let dry_run = ctx.dry_run();
    let mut issues = 0usize;
    for (index, key) in AUTOSTART_KEYS.iter().enumerate() {
        if ctx.is_cancelled() {
            return Ok(());
        }
        let queried = registry.query_key(key);
        ctx.set_progress_with(
            ((index + 1) * 85 / AUTOSTART_KEYS.len()).min(85),
            Phase::RegistryQuery,
            Some(key.to_string()),
            None,
        );
        let rows = match queried {
            Ok(rows) => rows,
            Err(err) => {
                ctx.log(
                    LogLevel::Warn,
                    format!("registry query failed: {} ({})", key, error_detail(&err)),
                );
                continue;
            }
        };

        for row in rows {
            if ctx.is_cancelled() {
                return Ok(());
            }
            if !is_string_value(&row.value_type) {
                continue;
            }
            let target = parse_exec_path(&expand_env(&row.data, ctx.env()));
            if !looks_like_filesystem_path(&target) || Path::new(&target).exists() {
                continue;
            }

            let (action, error) = if dry_run {
                (RegistryAction::WouldFix, None)
            } else {
                match registry.delete_value(&row.key, &row.value_name) {
                    Ok(()) => (RegistryAction::Fixed, None),
                    Err(err) => (RegistryAction::FailedFix, Some(error_detail(&err))),
                }
            };

            let value_path = format!("{}\\{}", row.key, row.value_name);
            match action {
                RegistryAction::Fixed => {
                    ctx.log(LogLevel::Ok, format!("registry fixed: {}", value_path))
                }
                RegistryAction::FailedFix => ctx.log(
                    LogLevel::Warn,
                    format!(
                        "registry fix failed: {} ({})",
                        value_path,
                        error.as_deref().unwrap_or_default()
                    ),
                ),
                _ => ctx.log(
                    LogLevel::Warn,
                    format!(
                        "registry issue: {} -> {}",
                        value_path,
                        truncate_text(&target, 120)
                    ),
                ),
            }

            issues += 1;
            ctx.record_registry(RegistryIssue {
                key: row.key,
                value_name: row.value_name,
                target: Some(target),
                reason: "target path not found".to_string(),
                ok: error.is_none(),
                action,
                error,
            });
        }
    }

    ctx.log(
        LogLevel::Info,
        format!("registry scan finished: {} issue(s)", issues),
    );
    ctx.set_progress(98, Phase::Registry);
    Ok(())
}

/// Clears the values under the MRU and recent-document keys.
pub fn clear_privacy_traces(ctx: &RunContext) -> Result<(), Error> {
    let registry = ctx.registry();
    if !registry.available() {
        ctx.log(LogLevel::Warn, "privacy scan skipped: Windows only");
        return Ok(());
    }

    let dry_run = ctx.dry_run();
    ctx.log(
        LogLevel::Info,
        format!(
            "privacy scan started: keys={} dryRun={}",
            PRIVACY_KEYS.len(),
            dry_run
        ),
    );
    for (index, key) in PRIVACY_KEYS.iter().enumerate() {
        if ctx.is_cancelled() {
            return Ok(());
        }
        let rows = match registry.query_key(key) {
            Ok(rows) => rows,
            Err(err) => {
                ctx.log(
                    LogLevel::Warn,
                    format!("registry query failed: {} ({})", key, error_detail(&err)),
                );
                continue;
            }
        };

        for row in rows.into_iter().filter(|row| row.value_name != "(Default)") {
            if ctx.is_cancelled() {
                return Ok(());
            }
            let (action, error) = if dry_run {
                (RegistryAction::WouldClear, None)
            } else {
                match registry.delete_value(&row.key, &row.value_name) {
                    Ok(()) => (RegistryAction::Cleared, None),
                    Err(err) => (RegistryAction::FailedClear, Some(error_detail(&err))),
                }
            };

            let value_path = format!("{}\\{}", row.key, row.value_name);
            match (&action, &error) {
                (_, Some(detail)) => ctx.log(
                    LogLevel::Error,
                    format!(
                        "registry clear failed: {} ({})",
                        value_path,
                        truncate_text(detail, 120)
                    ),
                ),
                (RegistryAction::Cleared, None) => {
                    ctx.log(LogLevel::Ok, format!("registry cleared: {}", value_path))
                }
                _ => ctx.log(
                    LogLevel::Warn,
                    format!("registry would-clear: {}", value_path),
                ),
            }

            ctx.record_registry(RegistryIssue {
                key: row.key,
                value_name: row.value_name,
                target: None,
                reason: "privacy trace".to_string(),
                ok: error.is_none(),
                action,
                error,
            });
        }

        ctx.set_progress_with(
            92 + (index + 1) * 7 / PRIVACY_KEYS.len(),
            Phase::Privacy,
            Some(key.to_string()),
            None,
        );
    }
    Ok(())
}
