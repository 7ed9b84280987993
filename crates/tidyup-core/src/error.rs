use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("{0}")]
    Other(String),
}
