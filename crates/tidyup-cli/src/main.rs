mod commands;
mod logging;
mod progress;

use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, ScanArgs};
use dotenv::dotenv;
use progress::CliReporter;
use tidyup_core::model::{BackupMeta, FileAction, RegistryAction};
use tidyup_core::{CleaningEngine, EngineSettings, ResultsList, RestoreOutcome, StartOptions};
use tracing::{error, info, warn};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    let settings = match tidyup_core::config::load_configuration_from(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let outcome = match args.command {
        Some(Commands::Scan(scan)) => run_scan(settings, &scan),
        Some(Commands::Backups) => run_list_backups(settings),
        Some(Commands::Restore { id }) => run_restore(settings, &id),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", settings);
            Ok(())
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = outcome {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn run_scan(settings: EngineSettings, scan: &ScanArgs) -> anyhow::Result<()> {
    let engine = CleaningEngine::new(settings);
    let reporter = Arc::new(CliReporter::new());
    let subscriptions = CliReporter::attach(&reporter, &engine);

    let started = engine.start(StartOptions {
        mode: Some(scan.mode.clone()),
        dry_run: Some(!scan.apply),
        max_files: scan.max_files,
        max_depth: scan.max_depth,
        keep_previous_results: false,
        privacy_traces: scan.privacy,
        paths: scan.paths.clone(),
    });
    info!(
        "Running {} scan ({})",
        started.mode.to_string().cyan(),
        if started.dry_run {
            "dry run".green()
        } else {
            "applying changes".red()
        }
    );
    engine.wait();
    for subscription in subscriptions {
        subscription.unsubscribe();
    }

    let status = engine.status();
    let results = engine.results_list();
    if scan.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results(&results);
    }

    if let Some(summary) = &status.last_run {
        info!(
            "{} files ({} KB), {} duplicate groups, {} registry issues",
            format!("{}", summary.files).yellow(),
            format!("{}", summary.reclaimed_kb).yellow(),
            format!("{}", summary.duplicates).red(),
            format!("{}", summary.registry).cyan(),
        );
    }

    if scan.backup {
        let mut meta = BackupMeta::new();
        meta.insert("mode".to_string(), serde_json::Value::from(status.mode.as_str()));
        if let Some(note) = &scan.note {
            meta.insert("note".to_string(), serde_json::Value::from(note.as_str()));
        }
        let entry = engine
            .create_backup(meta)
            .context("could not store the results snapshot")?;
        info!("Snapshot {} written to {}", entry.id.green(), entry.path.display());
    }

    if status.status_message == "stopped" {
        bail!("scan did not complete; see the log for details");
    }
    Ok(())
}

fn run_list_backups(settings: EngineSettings) -> anyhow::Result<()> {
    let engine = CleaningEngine::new(settings);
    let backups = engine.list_backups();
    if backups.is_empty() {
        info!("No snapshots in {}", engine.backup_dir().display());
        return Ok(());
    }
    for entry in backups {
        let note = entry
            .meta
            .get("note")
            .and_then(|value| value.as_str())
            .unwrap_or_default();
        println!(
            "{}  {}  {}",
            entry.id.green(),
            entry.time.format("%Y-%m-%d %H:%M:%S"),
            note.dimmed()
        );
    }
    Ok(())
}

fn run_restore(settings: EngineSettings, id: &str) -> anyhow::Result<()> {
    let engine = CleaningEngine::new(settings);
    match engine.restore_backup(id) {
        RestoreOutcome::Restored { entry } => {
            info!("Restored snapshot {}", entry.id.green());
            print_results(&engine.results_list());
            Ok(())
        }
        RestoreOutcome::Failed { error } => bail!("restore failed: {}", error),
    }
}

fn print_results(results: &ResultsList) {
    for finding in &results.files {
        let action = match finding.action {
            FileAction::WouldDelete => finding.action.as_str().yellow(),
            FileAction::Deleted => finding.action.as_str().green(),
            FileAction::Skip => finding.action.as_str().red(),
        };
        println!(
            "{:<13} {:>8} KB  {:<18} {}",
            action,
            finding.size_kb,
            finding.category,
            finding.path.display()
        );
    }

    for group in &results.duplicates {
        println!(
            "{} {} files, {} bytes wasted",
            group.fingerprint.cyan(),
            group.members.len(),
            group.wasted_bytes()
        );
        for member in &group.members {
            let marker = if member.path == group.suggested_keep {
                "keep".green()
            } else {
                "    ".normal()
            };
            println!("  {} {}", marker, member.path.display());
        }
    }

    for issue in &results.registry {
        let line = format!(
            "{}\\{} {}",
            issue.key,
            issue.value_name,
            issue.target.as_deref().unwrap_or(&issue.reason)
        );
        match issue.action {
            RegistryAction::Fixed | RegistryAction::Cleared => println!("{}", line.green()),
            RegistryAction::FailedFix | RegistryAction::FailedClear => warn!(
                "{} ({})",
                line,
                issue.error.as_deref().unwrap_or_default()
            ),
            RegistryAction::WouldFix | RegistryAction::WouldClear => {
                println!("{}", line.yellow())
            }
        }
    }
}
