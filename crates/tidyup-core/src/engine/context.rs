use super::{push_bounded, EngineInner};
use crate::cancel::CancelToken;
use crate::config::EngineSettings;
use crate::events::{EngineEvent, Phase, ProgressEvent};
use crate::model::{
    DuplicateGroup, FileFinding, LogEntry, LogLevel, RegistryIssue, RunConfig, RunSummary,
};
use crate::platform::Environment;
use crate::registry::RegistryBackend;
use chrono::Utc;
use glob::Pattern;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything one run needs, handed by reference to each scan strategy.
///
/// Strategies reach engine state only through the context. Buffers are
/// trimmed to their configured limits on every push, and events are published
/// after the state lock is released.
#[derive(Clone)]
pub struct RunContext {
    inner: Arc<EngineInner>,
    config: RunConfig,
    cancel: CancelToken,
    ignore: Vec<Pattern>,
}

impl RunContext {
    pub(super) fn new(
        inner: Arc<EngineInner>,
        config: RunConfig,
        cancel: CancelToken,
        ignore: Vec<Pattern>,
    ) -> Self {
        Self {
            inner,
            config,
            cancel,
            ignore,
        }
    }

    pub(super) fn engine(&self) -> &EngineInner {
        &self.inner
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn dry_run(&self) -> bool {
        self.config.dry_run
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn env(&self) -> &dyn Environment {
        self.inner.env.as_ref()
    }

    pub fn registry(&self) -> &dyn RegistryBackend {
        self.inner.registry.as_ref()
    }

    pub fn ignore_patterns(&self) -> &[Pattern] {
        &self.ignore
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.inner.log_with(level, message.into(), BTreeMap::new());
    }

    pub fn log_with(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        meta: BTreeMap<String, String>,
    ) {
        self.inner.log_with(level, message.into(), meta);
    }

    pub fn set_progress(&self, value: usize, phase: Phase) {
        self.set_progress_with(value, phase, None, None);
    }

    /// Clamps to 100 and never lowers the run's progress.
    pub fn set_progress_with(
        &self,
        value: usize,
        phase: Phase,
        category: Option<String>,
        processed: Option<usize>,
    ) {
        let progress = {
            let mut state = self.inner.lock_state();
            let next = value.min(100) as u8;
            state.progress = state.progress.max(next);
            state.progress
        };
        self.inner.bus.emit(&EngineEvent::Progress(ProgressEvent {
            progress,
            total: 100,
            mode: self.config.mode,
            dry_run: self.config.dry_run,
            phase,
            category,
            processed,
        }));
    }

    pub fn record_file(&self, finding: FileFinding) {
        {
            let mut state = self.inner.lock_state();
            push_bounded(&mut state.files, finding.clone(), self.inner.settings.file_limit);
        }
        self.inner.bus.emit(&EngineEvent::FileFound(finding));
    }

    pub fn record_duplicate(&self, group: DuplicateGroup) {
        {
            let mut state = self.inner.lock_state();
            push_bounded(
                &mut state.duplicates,
                group.clone(),
                self.inner.settings.duplicate_limit,
            );
        }
        self.inner.bus.emit(&EngineEvent::DuplicateFound(group));
    }

    pub fn record_registry(&self, issue: RegistryIssue) {
        {
            let mut state = self.inner.lock_state();
            push_bounded(
                &mut state.registry,
                issue.clone(),
                self.inner.settings.registry_limit,
            );
        }
        self.inner.bus.emit(&EngineEvent::RegistryIssue(issue));
    }

    /// Settles the run to idle, stores the summary as `lastRun` and publishes it.
    pub(super) fn finish(&self, stopped: bool) {
        let (summary, entry) = {
            let mut state = self.inner.lock_state();
            state.running = false;
            state.status_message = if stopped { "stopped" } else { "idle" }.to_string();

            let summary = RunSummary {
                time: Utc::now(),
                mode: self.config.mode,
                dry_run: self.config.dry_run,
                status: state.status_message.clone(),
                files: state.files.len(),
                duplicates: state.duplicates.len(),
                registry: state.registry.len(),
                reclaimed_kb: state.files.iter().map(|finding| finding.size_kb).sum(),
            };
            state.last_run = Some(summary.clone());

            let entry = LogEntry {
                time: summary.time,
                level: LogLevel::Ok,
                message: format!(
                    "run finished: mode={} dryRun={} files={} dup={} reg={}",
                    summary.mode,
                    summary.dry_run,
                    summary.files,
                    summary.duplicates,
                    summary.registry
                ),
                meta: BTreeMap::new(),
            };
            push_bounded(&mut state.logs, entry.clone(), self.inner.settings.log_limit);
            (summary, entry)
        };

        self.inner.settled.notify_all();
        super::trace_entry(&entry);
        self.inner.bus.emit(&EngineEvent::Done(summary));
        self.inner.bus.emit(&EngineEvent::Log(entry));
    }
}
