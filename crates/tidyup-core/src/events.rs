use crate::model::{
    BackupEntry, DuplicateGroup, FileFinding, LogEntry, RegistryIssue, RunMode, RunSummary,
};
use serde::Serialize;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Progress,
    Log,
    Done,
    FileFound,
    DuplicateFound,
    RegistryIssue,
    Backup,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::Log => "log",
            EventKind::Done => "done",
            EventKind::FileFound => "fileFound",
            EventKind::DuplicateFound => "duplicateFound",
            EventKind::RegistryIssue => "registryIssue",
            EventKind::Backup => "backup",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage of a run that a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Junk,
    DuplicateIndex,
    DuplicateHash,
    Duplicate,
    RegistryQuery,
    Registry,
    Privacy,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub progress: u8,
    pub total: u8,
    pub mode: RunMode,
    pub dry_run: bool,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupAction {
    Created,
    Restored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupEvent {
    pub action: BackupAction,
    pub entry: BackupEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum EngineEvent {
    Progress(ProgressEvent),
    Log(LogEntry),
    Done(RunSummary),
    FileFound(FileFinding),
    DuplicateFound(DuplicateGroup),
    RegistryIssue(RegistryIssue),
    Backup(BackupEvent),
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::Progress(_) => EventKind::Progress,
            EngineEvent::Log(_) => EventKind::Log,
            EngineEvent::Done(_) => EventKind::Done,
            EngineEvent::FileFound(_) => EventKind::FileFound,
            EngineEvent::DuplicateFound(_) => EventKind::DuplicateFound,
            EngineEvent::RegistryIssue(_) => EventKind::RegistryIssue,
            EngineEvent::Backup(_) => EventKind::Backup,
        }
    }
}

type Handler = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

thread_local! {
    static DISPATCHING: Cell<bool> = Cell::new(false);
}

/// True while the current thread is running an event handler.
pub(crate) fn is_dispatching() -> bool {
    DISPATCHING.with(Cell::get)
}

struct Listener {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener>>,
}

/// Synchronous fan-out of engine events.
///
/// Handlers run on the emitting thread in subscription order. A panicking
/// handler is logged and skipped; it never reaches the emitter.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener {
                id,
                kind,
                handler: Arc::new(handler),
            });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn emit(&self, event: &EngineEvent) {
        let kind = event.kind();
        // Snapshot so handlers may subscribe or unsubscribe while being called.
        let handlers: Vec<Handler> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|listener| listener.kind == kind)
            .map(|listener| Arc::clone(&listener.handler))
            .collect();

        let outer = DISPATCHING.with(|flag| flag.replace(true));
        for handler in handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!("{} handler panicked", kind);
            }
        }
        DISPATCHING.with(|flag| flag.set(outer));
    }
}

/// Handle returned by `EventBus::on`. Dropping it keeps the handler registered.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|listener| listener.id != self.id);
        }
    }
}
