//! Filesystem events used to cut a watcher's poll wait short.
//!
//! The watched file may not exist yet, or may be replaced by rotation, so the
//! watch is placed on its parent directory and events are filtered by file
//! name. This assumes the parent directory itself exists.

use std::ffi::OsString;
use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::Watcher;
use tokio::sync::Notify;

pub(crate) struct PathWake {
    _inner: notify::RecommendedWatcher,
    directory: PathBuf,
    wake: Arc<Notify>,
}

impl Debug for PathWake {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("PathWake")
            .field("directory", &self.directory)
            .finish()
    }
}

impl PathWake {
    /// Starts watching the directory containing `path`.
    pub(crate) fn new(path: &Path) -> notify::Result<Self> {
        let file_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| notify::Error::generic("Path has no file name"))?;
        let directory = parent_directory(path);

        let wake = Arc::new(Notify::new());
        let wake_tx = Arc::clone(&wake);
        let mut inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // Errors are not interesting here; the poll loop notices anything
            // that matters on its own.
            if let Ok(event) = res {
                if event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()))
                {
                    wake_tx.notify_one();
                }
            }
        })?;
        inner.watch(&directory, notify::RecursiveMode::NonRecursive)?;

        Ok(PathWake {
            _inner: inner,
            directory,
            wake,
        })
    }

    /// Resolves after the next event naming the file. An event that arrives
    /// while nobody is waiting is kept for the next call.
    pub(crate) async fn notified(&self) {
        self.wake.notified().await
    }
}

fn parent_directory(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if parent != Path::new("") => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
