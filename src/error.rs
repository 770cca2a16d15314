use std::path::PathBuf;

use crate::VaultPath;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vault root does not exist: {0}")]
    VaultNotFound(PathBuf),

    #[error("invalid vault path: {0}")]
    InvalidVaultPath(String),

    #[error("path is outside vault: {0}")]
    PathOutsideVault(PathBuf),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed header block. Batch callers skip the file.
    #[error("header parse error{}: {message}", .path.as_ref().map(|p| format!(" in {p}")).unwrap_or_default())]
    Parse {
        path: Option<VaultPath>,
        message: String,
    },

    #[error("{path} is a {found}, not a {expected}")]
    WrongKind {
        path: VaultPath,
        expected: String,
        found: String,
    },

    #[error("schema field '{field}' is missing and has no default")]
    MissingDefault { field: String },

    #[error("document already exists: {0}")]
    AlreadyExists(VaultPath),

    #[error("document not found: {0}")]
    NotFound(VaultPath),

    #[error("store did not index revision {revision} of {path} in time")]
    StoreTimeout { path: VaultPath, revision: u64 },

    #[error("config toml parse error: {0}")]
    ConfigToml(String),

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            path: None,
            message: message.into(),
        }
    }

    /// Attaches a path to errors that were raised without one.
    pub(crate) fn at(self, path: &VaultPath) -> Self {
        match self {
            Self::Parse { path: None, message } => Self::Parse {
                path: Some(path.clone()),
                message,
            },
            other => other,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
