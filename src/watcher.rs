//! Following a single log file across rotation, truncation and deletion.

use std::fmt;
use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{metadata, File};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};

use crate::backlog::decode_line;
use crate::error::Error;
use crate::fanout::FanoutRegistry;
use crate::wake::PathWake;

/// Timing knobs shared by every watcher.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WatchSettings {
    /// How long to wait before looking at the file again when nothing new
    /// was found, or while it is missing.
    pub poll_interval: Duration,
    /// Ceiling for the delay after repeated failures. The delay starts at
    /// `poll_interval` and doubles per consecutive failure.
    pub max_backoff: Duration,
    /// Also wake up on filesystem events for the file, instead of relying
    /// on the poll interval alone.
    pub fs_events: bool,
    /// Longest line held back while waiting for its newline. A fragment that
    /// reaches this size is published as it is, and the rest of the line
    /// follows as further messages.
    pub max_line_bytes: usize,
}

/// Default for [`WatchSettings::max_line_bytes`].
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

impl Default for WatchSettings {
    fn default() -> Self {
        WatchSettings {
            poll_interval: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            fs_events: true,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

/// Device and inode of an open file. Two paths with the same identity are
/// the same file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Identity {
    dev: u64,
    ino: u64,
}

impl Identity {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Identity {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    // Without inodes, rotation is only noticed through deletion or
    // truncation.
    #[cfg(not(unix))]
    fn of(_meta: &Metadata) -> Self {
        Identity { dev: 0, ino: 0 }
    }
}

/// Where to start reading the next time the file is opened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Reopen {
    /// Never opened before: skip existing content.
    First,
    /// The previous file was rotated away or deleted: read the new one from
    /// the start.
    Rotated,
    /// Closed after an I/O failure: pick up where we left off if the same
    /// file is still there.
    Resume { identity: Identity, offset: u64 },
}

struct OpenFile {
    reader: BufReader<File>,
    identity: Identity,
    /// Position of the next unread byte.
    offset: u64,
    /// First opened in the middle of a line: drop what is left of it.
    skip_partial: bool,
}

enum State {
    Seeking(Reopen),
    Following(OpenFile),
    Backoff(Reopen),
}

impl State {
    fn reopen(&self) -> Reopen {
        match self {
            State::Seeking(reopen) | State::Backoff(reopen) => *reopen,
            State::Following(open) => Reopen::Resume {
                identity: open.identity,
                offset: open.offset,
            },
        }
    }
}

/// Coarse view of what a watcher is doing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchState {
    /// No file open; waiting for the path to exist.
    Seeking,
    /// File open and being read.
    Following,
    /// Paused after a failure.
    Backoff,
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self {
            State::Seeking(reopen) => write!(f, "Seeking({:?})", reopen),
            State::Following(open) => write!(
                f,
                "Following({:?}, offset {})",
                open.identity, open.offset
            ),
            State::Backoff(reopen) => write!(f, "Backoff({:?})", reopen),
        }
    }
}

/// Outcome of one poll cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Tick {
    /// The file was (re)opened.
    Opened,
    /// A complete line was consumed. It was published if non-blank.
    Line,
    /// Open, but no complete line is available yet.
    Idle,
    /// The path does not exist.
    Missing,
    /// The file was rotated away or deleted and has been closed.
    Lost,
    /// Something failed; wait this long before the next cycle.
    Backoff(Duration),
}

enum Advance {
    Line(String),
    Skipped,
    Pending,
    Rotated,
    Vanished,
}

#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Backoff {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Tails one file and publishes each newly appended line to a
/// [`FanoutRegistry`], tagged with the watcher's log id.
///
/// Existing content is skipped when the file is first opened. After a
/// rotation (the path now names a different file) or a deletion, the next
/// file at the path is read from its beginning. If the file shrinks in place
/// it is read again from offset 0. A line is only published once its
/// terminating newline has been written.
///
/// Errors never stop a watcher: they are logged and retried with a capped
/// exponential backoff.
pub struct TailWatcher {
    log_id: String,
    path: PathBuf,
    registry: FanoutRegistry,
    settings: WatchSettings,
    state: State,
    backoff: Backoff,
    /// Set once the missing path has been logged, until it reappears.
    reported_missing: bool,
    line: Vec<u8>,
}

impl fmt::Debug for TailWatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("TailWatcher")
            .field("log_id", &self.log_id)
            .field("path", &self.path)
            .field("state", &self.state)
            .finish()
    }
}

impl TailWatcher {
    pub fn new(
        log_id: impl Into<String>,
        path: impl Into<PathBuf>,
        registry: FanoutRegistry,
        settings: WatchSettings,
    ) -> Self {
        let backoff = Backoff::new(settings.poll_interval, settings.max_backoff);
        TailWatcher {
            log_id: log_id.into(),
            path: path.into(),
            registry,
            settings,
            state: State::Seeking(Reopen::First),
            backoff,
            reported_missing: false,
            line: Vec::new(),
        }
    }

    pub fn log_id(&self) -> &str {
        &self.log_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> WatchState {
        match self.state {
            State::Seeking(_) => WatchState::Seeking,
            State::Following(_) => WatchState::Following,
            State::Backoff(_) => WatchState::Backoff,
        }
    }

    /// Tails the file forever. Only returns by being dropped or aborted.
    pub async fn run(mut self) {
        tracing::info!(log_id = %self.log_id, path = %self.path.display(), "Watching log file");

        let wake = if self.settings.fs_events {
            match PathWake::new(&self.path) {
                Ok(wake) => Some(wake),
                Err(e) => {
                    tracing::debug!(
                        path = %self.path.display(),
                        error = %e,
                        "Filesystem events unavailable, polling only"
                    );
                    None
                }
            }
        } else {
            None
        };

        loop {
            let pause = match self.poll_once().await {
                Tick::Opened | Tick::Line | Tick::Lost => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Tick::Idle | Tick::Missing => self.settings.poll_interval,
                Tick::Backoff(delay) => delay,
            };

            match &wake {
                Some(wake) => {
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = wake.notified() => {}
                    }
                }
                None => tokio::time::sleep(pause).await,
            }
        }
    }

    /// Runs a single cycle of the state machine without waiting.
    pub(crate) async fn poll_once(&mut self) -> Tick {
        let advanced = match &mut self.state {
            State::Following(open) => open
                .advance(&self.path, &mut self.line, self.settings.max_line_bytes)
                .await
                .map(Some),
            State::Seeking(_) | State::Backoff(_) => Ok(None),
        };
        let result = match advanced {
            Ok(Some(advance)) => Ok(self.handle_advance(advance)),
            Ok(None) => {
                let reopen = self.state.reopen();
                self.open(reopen).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(tick) => {
                // Reopening alone is not progress: a file that opens but
                // cannot be read must still back off.
                if matches!(tick, Tick::Line | Tick::Idle | Tick::Missing) {
                    self.backoff.reset();
                }
                tick
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                tracing::warn!(
                    log_id = %self.log_id,
                    error = %e,
                    retry_in = ?delay,
                    "Tailing failed, backing off"
                );
                // Dropping the previous state closes any open handle.
                self.state = State::Backoff(self.state.reopen());
                Tick::Backoff(delay)
            }
        }
    }

    async fn open(&mut self, reopen: Reopen) -> Result<Tick, Error> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !self.reported_missing {
                    tracing::info!(path = %self.path.display(), "Waiting for file to appear");
                    self.reported_missing = true;
                }
                self.state = State::Seeking(reopen);
                return Ok(Tick::Missing);
            }
            Err(e) => return Err(Error::unavailable(&self.path, e)),
        };
        self.reported_missing = false;

        let meta = file
            .metadata()
            .await
            .map_err(|e| Error::unavailable(&self.path, e))?;
        let identity = Identity::of(&meta);
        let size = meta.len();

        let mut skip_partial = false;
        let offset = match reopen {
            Reopen::First => {
                tracing::info!(
                    path = %self.path.display(),
                    "First open, skipping existing content"
                );
                if size > 0 {
                    let mut last = [0u8; 1];
                    file.seek(SeekFrom::Start(size - 1))
                        .await
                        .map_err(|e| Error::io(&self.path, e))?;
                    file.read_exact(&mut last)
                        .await
                        .map_err(|e| Error::io(&self.path, e))?;
                    skip_partial = last[0] != b'\n';
                }
                size
            }
            Reopen::Rotated => {
                tracing::info!(path = %self.path.display(), "Reading new file from the start");
                0
            }
            Reopen::Resume {
                identity: previous,
                offset,
            } if previous == identity && offset <= size => offset,
            Reopen::Resume { .. } => 0,
        };

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::io(&self.path, e))?;

        self.state = State::Following(OpenFile {
            reader: BufReader::new(file),
            identity,
            offset,
            skip_partial,
        });

        Ok(Tick::Opened)
    }

    fn handle_advance(&mut self, advance: Advance) -> Tick {
        match advance {
            Advance::Line(text) => {
                if !text.is_empty() {
                    self.registry.publish(&self.log_id, &text);
                }
                Tick::Line
            }
            Advance::Skipped => Tick::Line,
            Advance::Pending => Tick::Idle,
            Advance::Rotated => {
                tracing::info!(path = %self.path.display(), "Rotation detected");
                self.state = State::Seeking(Reopen::Rotated);
                Tick::Lost
            }
            Advance::Vanished => {
                tracing::info!(path = %self.path.display(), "File disappeared");
                self.state = State::Seeking(Reopen::Rotated);
                Tick::Lost
            }
        }
    }
}

impl OpenFile {
    async fn advance(
        &mut self,
        path: &Path,
        line: &mut Vec<u8>,
        max_line_bytes: usize,
    ) -> Result<Advance, Error> {
        let meta = match metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Advance::Vanished),
            Err(e) => return Err(Error::io(path, e)),
        };

        if Identity::of(&meta) != self.identity {
            return Ok(Advance::Rotated);
        }

        if meta.len() < self.offset {
            tracing::info!(path = %path.display(), "File truncated, reading from the start");
            self.seek(path, 0).await?;
            self.skip_partial = false;
        }

        let limit = max_line_bytes.max(1);
        line.clear();
        let read = (&mut self.reader)
            .take(limit as u64)
            .read_until(b'\n', line)
            .await
            .map_err(|e| Error::io(path, e))?;

        if read == 0 {
            return Ok(Advance::Pending);
        }

        let terminated = line.last() == Some(&b'\n');
        if !terminated && read < limit {
            // The writer has not finished this line. Rewind so the whole
            // line is read again once its newline shows up. The fragment is
            // re-read every poll, which `max_line_bytes` bounds.
            let offset = self.offset;
            self.seek(path, offset).await?;
            return Ok(Advance::Pending);
        }
        if !terminated {
            tracing::warn!(
                path = %path.display(),
                max_line_bytes = limit,
                "Line too long, splitting it"
            );
        }

        self.offset += read as u64;
        if self.skip_partial {
            if terminated {
                self.skip_partial = false;
            }
            return Ok(Advance::Skipped);
        }
        Ok(Advance::Line(decode_line(line)))
    }

    async fn seek(&mut self, path: &Path, offset: u64) -> Result<(), Error> {
        self.reader
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::io(path, e))?;
        self.offset = offset;
        Ok(())
    }
}
