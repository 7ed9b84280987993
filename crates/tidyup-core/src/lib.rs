pub mod backup;
pub mod cancel;
pub mod config;
pub mod dedupe;
pub mod engine;
pub mod error;
pub mod events;
pub mod hasher;
pub mod junk;
pub mod limiter;
pub mod model;
pub mod platform;
pub mod registry;
pub mod scanner;

pub use backup::BackupStore;
pub use cancel::CancelToken;
pub use config::EngineSettings;
pub use engine::{CleaningEngine, EngineBuilder, RunContext};
pub use error::Error;
pub use events::{EngineEvent, EventBus, EventKind, Subscription};
pub use junk::JunkTarget;
pub use model::{
    BackupEntry, DuplicateGroup, FileFinding, LogEntry, LogLevel, RegistryIssue, ResultsList,
    RestoreOutcome, RunConfig, RunMode, RunStatus, StartOptions,
};
pub use registry::{RegistryBackend, RegistryRow};
