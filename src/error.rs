//! Error type shared by every part of the crate.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The path is missing or could not be opened. Watchers retry these
    /// indefinitely.
    #[error("File {} is unavailable: {source}", .path.display())]
    FileUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A read, seek or stat failed on a file that was already open.
    #[error("I/O failure on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Subscriber channel is closed or full")]
    Delivery,
    #[error("Log `{0}` is already being watched")]
    DuplicateLog(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn unavailable(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::FileUnavailable {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
