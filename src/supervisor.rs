//! Wiring watchers, backlog and subscribers together.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::task::JoinHandle;

use crate::backlog::read_backlog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fanout::{FanoutRegistry, Subscriber};
use crate::message::Message;
use crate::watcher::{TailWatcher, WatchSettings, MAX_LINE_BYTES};

struct WatchedFile {
    path: PathBuf,
    task: JoinHandle<()>,
}

/// Owns one [`TailWatcher`] task per watched file and the
/// [`FanoutRegistry`] they publish into.
///
/// Watcher tasks are spawned on the current tokio runtime, so registering
/// a file must happen from within one. Dropping the supervisor (or calling
/// [`shutdown`](Supervisor::shutdown)) aborts every watcher and drops every
/// subscriber.
#[derive(Debug)]
pub struct Supervisor {
    registry: FanoutRegistry,
    settings: WatchSettings,
    backlog_lines: usize,
    files: BTreeMap<String, WatchedFile>,
}

impl std::fmt::Debug for WatchedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("WatchedFile")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(settings: WatchSettings, backlog_lines: usize) -> Self {
        Supervisor {
            registry: FanoutRegistry::new(),
            settings,
            backlog_lines,
            files: BTreeMap::new(),
        }
    }

    /// Builds a supervisor and starts a watcher for every configured log.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut supervisor = Supervisor::new(config.watch_settings(), config.backlog_lines);
        for (log_id, path) in &config.logs {
            supervisor.register_watched_file(log_id, path)?;
        }
        Ok(supervisor)
    }

    pub fn registry(&self) -> &FanoutRegistry {
        &self.registry
    }

    /// Ids and paths of the watched files, ordered by id.
    pub fn watched_files(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.files
            .iter()
            .map(|(log_id, file)| (log_id.as_str(), file.path.as_path()))
    }

    /// Starts tailing `path`, publishing its lines under `log_id`.
    pub fn register_watched_file(
        &mut self,
        log_id: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<()> {
        let log_id = log_id.into();
        if self.files.contains_key(&log_id) {
            return Err(Error::DuplicateLog(log_id));
        }

        let path = path.into();
        let watcher = TailWatcher::new(
            log_id.clone(),
            path.clone(),
            self.registry.clone(),
            self.settings.clone(),
        );
        let task = tokio::spawn(watcher.run());

        self.files.insert(log_id, WatchedFile { path, task });
        Ok(())
    }

    /// The backlog a new subscriber receives: the last few lines of each
    /// watched file, each prefixed with `[<log_id>] `.
    pub async fn historical(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (log_id, file) in &self.files {
            for line in read_backlog(file.path.clone(), self.backlog_lines).await {
                lines.push(format!("[{}] {}", log_id, line));
            }
        }
        lines
    }

    /// Sends the backlog to `subscriber`, then registers it for live lines.
    ///
    /// If the backlog cannot be delivered the subscriber is not registered.
    pub async fn on_subscriber_connected(&self, subscriber: &Subscriber) -> Result<()> {
        let historical = Message::historical(self.historical().await);
        self.registry.send_to(subscriber, &historical)?;

        self.registry.subscribe(subscriber);
        tracing::debug!(
            subscriber = %subscriber.id(),
            subscribers = self.registry.len(),
            "Subscriber connected"
        );
        Ok(())
    }

    /// Stops every watcher and drops every subscriber.
    pub fn shutdown(&mut self) {
        for (log_id, file) in std::mem::take(&mut self.files) {
            tracing::debug!(log_id = %log_id, "Stopping watcher");
            file.task.abort();
        }
        self.registry.clear();
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
