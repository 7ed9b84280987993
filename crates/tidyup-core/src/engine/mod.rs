mod context;

pub use context::RunContext;

use crate::backup::BackupStore;
use crate::cancel::CancelToken;
use crate::config::{non_overlapping_directories, EngineSettings};
use crate::dedupe;
use crate::error::Error;
use crate::events::{
    self, BackupAction, BackupEvent, EngineEvent, EventBus, EventKind, Phase, Subscription,
};
use crate::junk::{
    self, default_duplicate_roots, default_junk_table, resolve_targets, JunkTarget,
};
use crate::model::{
    BackupEntry, BackupMeta, DuplicateGroup, FileFinding, LogEntry, LogLevel, RegistryIssue,
    RestoreOutcome, ResultsList, RunConfig, RunCounts, RunMode, RunStatus, RunSummary,
    StartOptions,
};
use crate::platform::{expand_env, Environment, SpecialDirs, SystemEnvironment};
use crate::registry::{self, RegCli, RegistryBackend};
use chrono::Utc;
use glob::Pattern;
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Appends `item`, dropping the oldest entries beyond `limit`.
pub(crate) fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, limit: usize) {
    buffer.push_back(item);
    while buffer.len() > limit {
        buffer.pop_front();
    }
}

fn bounded<T>(items: Vec<T>, limit: usize) -> VecDeque<T> {
    let skip = items.len().saturating_sub(limit);
    items.into_iter().skip(skip).collect()
}

fn trace_entry(entry: &LogEntry) {
    match entry.level {
        LogLevel::Info | LogLevel::Ok => info!("{}", entry.message),
        LogLevel::Warn => warn!("{}", entry.message),
        LogLevel::Error => error!("{}", entry.message),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct EngineState {
    running: bool,
    progress: u8,
    mode: RunMode,
    dry_run: bool,
    status_message: String,
    last_run: Option<RunSummary>,
    cancel: CancelToken,
    files: VecDeque<FileFinding>,
    duplicates: VecDeque<DuplicateGroup>,
    registry: VecDeque<RegistryIssue>,
    backups: VecDeque<BackupEntry>,
    logs: VecDeque<LogEntry>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            running: false,
            progress: 0,
            mode: RunMode::default(),
            dry_run: true,
            status_message: "idle".to_string(),
            last_run: None,
            cancel: CancelToken::new(),
            files: VecDeque::new(),
            duplicates: VecDeque::new(),
            registry: VecDeque::new(),
            backups: VecDeque::new(),
            logs: VecDeque::new(),
        }
    }

    fn snapshot(&self) -> RunStatus {
        RunStatus {
            running: self.running,
            progress: self.progress,
            total: 100,
            mode: self.mode,
            dry_run: self.dry_run,
            status_message: self.status_message.clone(),
            last_run: self.last_run.clone(),
            counts: RunCounts {
                files: self.files.len(),
                duplicates: self.duplicates.len(),
                registry: self.registry.len(),
                backups: self.backups.len(),
            },
        }
    }

    fn results(&self) -> ResultsList {
        ResultsList {
            files: self.files.iter().cloned().collect(),
            duplicates: self.duplicates.iter().cloned().collect(),
            registry: self.registry.iter().cloned().collect(),
            backups: self.backups.iter().cloned().collect(),
        }
    }
}

struct EngineInner {
    settings: EngineSettings,
    bus: EventBus,
    store: BackupStore,
    registry: Arc<dyn RegistryBackend>,
    env: Arc<dyn Environment>,
    junk_targets: Option<Vec<JunkTarget>>,
    duplicate_roots: Option<Vec<PathBuf>>,
    state: Mutex<EngineState>,
    /// Signalled whenever a run settles.
    settled: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EngineInner {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.log_with(level, message.into(), BTreeMap::new());
    }

    fn log_with(&self, level: LogLevel, message: String, meta: BTreeMap<String, String>) {
        let entry = LogEntry {
            time: Utc::now(),
            level,
            message,
            meta,
        };
        trace_entry(&entry);
        {
            let mut state = self.lock_state();
            push_bounded(&mut state.logs, entry.clone(), self.settings.log_limit);
        }
        self.bus.emit(&EngineEvent::Log(entry));
    }

    fn ignore_patterns(&self) -> Vec<Pattern> {
        let mut patterns = Vec::new();
        for raw in &self.settings.ignore_patterns {
            match Pattern::new(raw) {
                Ok(pattern) => patterns.push(pattern),
                Err(err) => self.log(
                    LogLevel::Warn,
                    format!("ignoring invalid ignore pattern {:?}: {}", raw, err),
                ),
            }
        }
        patterns
    }

    fn special_dirs(&self) -> SpecialDirs {
        SpecialDirs::from_env(self.env.as_ref())
    }

    fn junk_targets_for(&self, mode: RunMode) -> Vec<JunkTarget> {
        match &self.junk_targets {
            Some(table) => resolve_targets(table, mode),
            None => resolve_targets(&default_junk_table(&self.special_dirs()), mode),
        }
    }

    /// Per-run paths first, then the configured roots, reduced to existing,
    /// non-overlapping directories.
    fn duplicate_roots_for(&self, config: &RunConfig) -> Vec<PathBuf> {
        let mut roots = config.paths.clone();
        match &self.duplicate_roots {
            Some(fixed) => roots.extend(fixed.iter().cloned()),
            None => roots.extend(default_duplicate_roots(&self.special_dirs())),
        }
        roots.extend(
            self.settings
                .duplicate_roots
                .iter()
                .map(|root| PathBuf::from(expand_env(root, self.env.as_ref()))),
        );

        non_overlapping_directories(roots)
            .into_iter()
            .filter(|root| root.is_dir())
            .collect()
    }
}

fn run_strategies(ctx: &RunContext) -> Result<(), Error> {
    let inner = ctx.engine();
    let config = ctx.config();
    match config.mode {
        RunMode::Duplicate => {
            let roots = inner.duplicate_roots_for(config);
            debug!("Duplicate roots: {:?}", roots);
            dedupe::scan_duplicates(ctx, &roots)
        }
        RunMode::Registry => registry::scan_autostart(ctx),
        RunMode::Full | RunMode::Dump => {
            let targets = inner.junk_targets_for(config.mode);
            debug!("Resolved {} junk targets", targets.len());
            junk::scan_junk(ctx, &targets)?;
            if config.mode == RunMode::Full && config.privacy_traces && !ctx.is_cancelled() {
                registry::clear_privacy_traces(ctx)?;
            }
            Ok(())
        }
    }
}

fn run_dispatch(ctx: RunContext) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_strategies(&ctx)));
    let stopped = match outcome {
        Ok(Ok(())) if ctx.is_cancelled() => true,
        Ok(Ok(())) => {
            ctx.set_progress(100, Phase::Complete);
            false
        }
        Ok(Err(err)) => {
            ctx.log(LogLevel::Error, format!("run crashed: {}", err));
            true
        }
        Err(payload) => {
            ctx.log(
                LogLevel::Error,
                format!("run crashed: {}", panic_message(payload.as_ref())),
            );
            true
        }
    };
    ctx.finish(stopped);
}

/// Configures a `CleaningEngine`. The defaults talk to the real host: the
/// process environment, the `reg` tool and the platform junk table.
pub struct EngineBuilder {
    settings: EngineSettings,
    registry: Option<Arc<dyn RegistryBackend>>,
    env: Option<Arc<dyn Environment>>,
    junk_targets: Option<Vec<JunkTarget>>,
    duplicate_roots: Option<Vec<PathBuf>>,
}

impl EngineBuilder {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            registry: None,
            env: None,
            junk_targets: None,
            duplicate_roots: None,
        }
    }

    pub fn registry_backend(mut self, backend: Arc<dyn RegistryBackend>) -> Self {
        self.registry = Some(backend);
        self
    }

    pub fn environment(mut self, env: Arc<dyn Environment>) -> Self {
        self.env = Some(env);
        self
    }

    /// Replaces the platform junk table.
    pub fn junk_targets(mut self, targets: Vec<JunkTarget>) -> Self {
        self.junk_targets = Some(targets);
        self
    }

    /// Replaces the home-folder duplicate roots. Configured and per-run roots still apply.
    pub fn duplicate_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.duplicate_roots = Some(roots);
        self
    }

    pub fn build(self) -> CleaningEngine {
        let store = BackupStore::new(&self.settings.backup_dir);
        let inner = EngineInner {
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(RegCli::system()) as Arc<dyn RegistryBackend>),
            env: self
                .env
                .unwrap_or_else(|| Arc::new(SystemEnvironment) as Arc<dyn Environment>),
            junk_targets: self.junk_targets,
            duplicate_roots: self.duplicate_roots,
            bus: EventBus::new(),
            store,
            state: Mutex::new(EngineState::new()),
            settled: Condvar::new(),
            workers: Mutex::new(Vec::new()),
            settings: self.settings,
        };
        CleaningEngine {
            inner: Arc::new(inner),
        }
    }
}

/// The cleaning engine: one run at a time, executed on a background thread.
///
/// Every method returns promptly. Progress, findings and log lines are
/// published on the event bus while the run is active; `wait` blocks until
/// the run has settled.
#[derive(Clone)]
pub struct CleaningEngine {
    inner: Arc<EngineInner>,
}

impl CleaningEngine {
    pub fn new(settings: EngineSettings) -> Self {
        EngineBuilder::new(settings).build()
    }

    pub fn builder(settings: EngineSettings) -> EngineBuilder {
        EngineBuilder::new(settings)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn backup_dir(&self) -> &Path {
        self.inner.store.dir()
    }

    /// Begins a run unless one is already active, in which case the active
    /// run's status is returned untouched.
    pub fn start(&self, options: StartOptions) -> RunStatus {
        let config = RunConfig::from_options(&options);
        let (cancel, status) = {
            let mut state = self.inner.lock_state();
            if state.running {
                debug!("Start ignored: a {} run is active", state.mode);
                return state.snapshot();
            }
            state.running = true;
            state.progress = 0;
            state.mode = config.mode;
            state.dry_run = config.dry_run;
            state.status_message = format!("scanning:{}", config.mode);
            state.cancel = CancelToken::new();
            if !config.keep_previous_results {
                state.files.clear();
                state.duplicates.clear();
                state.registry.clear();
            }
            (state.cancel.clone(), state.snapshot())
        };

        self.inner.log(
            LogLevel::Info,
            format!("run started: mode={} dryRun={}", config.mode, config.dry_run),
        );

        let ctx = RunContext::new(
            Arc::clone(&self.inner),
            config,
            cancel,
            self.inner.ignore_patterns(),
        );
        let fallback = ctx.clone();
        let spawned = thread::Builder::new()
            .name(format!("tidyup-{}", ctx.config().mode))
            .spawn(move || run_dispatch(ctx));

        match spawned {
            Ok(handle) => {
                let mut workers = self.inner.lock_workers();
                workers.retain(|worker| !worker.is_finished());
                workers.push(handle);
            }
            Err(err) => {
                fallback.log(LogLevel::Error, format!("run crashed: {}", err));
                fallback.finish(true);
            }
        }

        status
    }

    /// Requests cancellation. The run settles to `stopped` at its next checkpoint.
    pub fn stop(&self) -> RunStatus {
        let status = {
            let mut state = self.inner.lock_state();
            if !state.running {
                return state.snapshot();
            }
            state.cancel.cancel();
            state.status_message = "stopping".to_string();
            state.snapshot()
        };
        self.inner.log(LogLevel::Warn, "stop requested");
        status
    }

    pub fn status(&self) -> RunStatus {
        self.inner.lock_state().snapshot()
    }

    pub fn results_list(&self) -> ResultsList {
        self.inner.lock_state().results()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.lock_state().logs.iter().cloned().collect()
    }

    /// Blocks until no run is active, including runs started while waiting.
    /// Returns at once when called from inside an event handler.
    pub fn wait(&self) {
        if events::is_dispatching() {
            debug!("wait() called from an event handler; not blocking");
            return;
        }
        loop {
            let workers = mem::take(&mut *self.inner.lock_workers());
            if !workers.is_empty() {
                for worker in workers {
                    if worker.join().is_err() {
                        warn!("Run thread ended with a panic");
                    }
                }
                continue;
            }

            // Another waiter may own the handles; settle on the state instead.
            let state = self.inner.lock_state();
            if !state.running {
                return;
            }
            drop(
                self.inner
                    .settled
                    .wait_while(state, |state| state.running)
                    .unwrap_or_else(PoisonError::into_inner),
            );
        }
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.inner.bus.on(kind, handler)
    }

    /// Persists the current results and the tail of the log.
    pub fn create_backup(&self, meta: BackupMeta) -> Result<BackupEntry, Error> {
        let mut meta = meta;
        meta.insert("dryRunDefault".to_string(), serde_json::Value::Bool(true));

        let (snapshot, logs) = {
            let state = self.inner.lock_state();
            let skip = state.logs.len().saturating_sub(self.inner.settings.backup_log_tail);
            let logs: Vec<LogEntry> = state.logs.iter().skip(skip).cloned().collect();
            (state.results(), logs)
        };

        let entry = match self.inner.store.create(meta, snapshot, logs) {
            Ok(entry) => entry,
            Err(err) => {
                self.inner
                    .log(LogLevel::Error, format!("backup failed: {}", err));
                return Err(err);
            }
        };

        {
            let mut state = self.inner.lock_state();
            push_bounded(
                &mut state.backups,
                entry.clone(),
                self.inner.settings.backup_limit,
            );
        }
        self.inner.bus.emit(&EngineEvent::Backup(BackupEvent {
            action: BackupAction::Created,
            entry: entry.clone(),
        }));
        self.inner
            .log(LogLevel::Ok, format!("backup created {}", entry.id));
        Ok(entry)
    }

    pub fn list_backups(&self) -> Vec<BackupEntry> {
        let known: Vec<BackupEntry> = self.inner.lock_state().backups.iter().cloned().collect();
        self.inner.store.list(&known)
    }

    /// Replaces the result buffers with a stored snapshot and forces dry-run.
    /// Refused while a run is active.
    pub fn restore_backup(&self, id: &str) -> RestoreOutcome {
        if self.inner.lock_state().running {
            self.inner
                .log(LogLevel::Warn, format!("restore refused during run: {}", id));
            return RestoreOutcome::Failed {
                error: "run in progress".to_string(),
            };
        }

        let entry = match self.list_backups().into_iter().find(|entry| entry.id == id) {
            Some(entry) => entry,
            None => {
                let err = Error::BackupNotFound(id.to_string());
                self.inner.log(LogLevel::Error, err.to_string());
                return RestoreOutcome::Failed {
                    error: err.to_string(),
                };
            }
        };

        let document = match self.inner.store.load(&entry) {
            Ok(document) => document,
            Err(err) => {
                self.inner
                    .log(LogLevel::Error, format!("restore failed {}: {}", id, err));
                return RestoreOutcome::Failed {
                    error: err.to_string(),
                };
            }
        };

        {
            let mut state = self.inner.lock_state();
            if state.running {
                return RestoreOutcome::Failed {
                    error: "run in progress".to_string(),
                };
            }
            let settings = &self.inner.settings;
            let snapshot = document.snapshot;
            state.files = bounded(snapshot.files, settings.file_limit);
            state.duplicates = bounded(snapshot.duplicates, settings.duplicate_limit);
            state.registry = bounded(snapshot.registry, settings.registry_limit);
            state.dry_run = true;
            state.status_message = "idle".to_string();
        }

        self.inner.bus.emit(&EngineEvent::Backup(BackupEvent {
            action: BackupAction::Restored,
            entry: entry.clone(),
        }));
        self.inner
            .log(LogLevel::Ok, format!("backup restored {}", id));
        RestoreOutcome::Restored { entry }
    }
}
