use thiserror::Error;

/// Error taxonomy for the backup / recovery subsystem.
///
/// `Configuration` is raised before any side effect; `Integrity` aborts a
/// recovery before any restore step runs; `ExternalTool` carries the captured
/// diagnostic output of a failed dump/restore subprocess.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("External tool error: {0}")]
    ExternalTool(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;
