//! Which files to watch, and how often.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::watcher::{WatchSettings, MAX_LINE_BYTES};

/// Process configuration, usually read from a TOML file:
///
/// ```toml
/// poll_interval_ms = 250
/// max_backoff_ms = 5000
/// backlog_lines = 5
/// fs_events = true
/// max_line_bytes = 1048576
///
/// [logs]
/// app = "/var/log/app.log"
/// nginx = "/var/log/nginx/access.log"
/// ```
///
/// Everything except `[logs]` is optional.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Lines of history per file sent to each new subscriber.
    #[serde(default = "default_backlog_lines")]
    pub backlog_lines: usize,
    #[serde(default = "default_fs_events")]
    pub fs_events: bool,
    /// Longest line held back while waiting for its newline.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Log id to file path.
    pub logs: BTreeMap<String, PathBuf>,
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_backlog_lines() -> usize {
    5
}

fn default_fs_events() -> bool {
    true
}

fn default_max_line_bytes() -> usize {
    MAX_LINE_BYTES
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&raw)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_backoff_ms < self.poll_interval_ms {
            return Err(Error::InvalidConfig(
                "max_backoff_ms must not be below poll_interval_ms".to_string(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(Error::InvalidConfig(
                "max_line_bytes must be greater than zero".to_string(),
            ));
        }
        if self.logs.is_empty() {
            return Err(Error::InvalidConfig("no logs configured".to_string()));
        }
        if let Some(log_id) = self.logs.keys().find(|id| id.trim().is_empty()) {
            return Err(Error::InvalidConfig(format!("invalid log id `{}`", log_id)));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            poll_interval: self.poll_interval(),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            fs_events: self.fs_events,
            max_line_bytes: self.max_line_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str(
            r#"
            [logs]
            app = "/var/log/app.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.backlog_lines, 5);
        assert_eq!(config.watch_settings(), WatchSettings::default());
        assert_eq!(config.logs["app"], PathBuf::from("/var/log/app.log"));
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml_str(
            r#"
            poll_interval_ms = 50
            max_backoff_ms = 400
            backlog_lines = 10
            fs_events = false
            max_line_bytes = 4096

            [logs]
            nginx = "/var/log/nginx/access.log"
            app = "app.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.backlog_lines, 10);
        assert_eq!(
            config.watch_settings(),
            WatchSettings {
                poll_interval: Duration::from_millis(50),
                max_backoff: Duration::from_millis(400),
                fs_events: false,
                max_line_bytes: 4096,
            }
        );
        assert_eq!(
            config.logs.keys().collect::<Vec<_>>(),
            vec!["app", "nginx"]
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        let no_logs = Config::from_toml_str("[logs]\n");
        assert!(matches!(no_logs, Err(Error::InvalidConfig(_))));

        let zero_poll = Config::from_toml_str("poll_interval_ms = 0\n[logs]\na = \"a.log\"\n");
        assert!(matches!(zero_poll, Err(Error::InvalidConfig(_))));

        let low_cap = Config::from_toml_str(
            "poll_interval_ms = 500\nmax_backoff_ms = 100\n[logs]\na = \"a.log\"\n",
        );
        assert!(matches!(low_cap, Err(Error::InvalidConfig(_))));

        let no_line = Config::from_toml_str("max_line_bytes = 0\n[logs]\na = \"a.log\"\n");
        assert!(matches!(no_line, Err(Error::InvalidConfig(_))));

        let unknown = Config::from_toml_str("colour = \"red\"\n[logs]\na = \"a.log\"\n");
        assert!(matches!(unknown, Err(Error::ConfigParse(_))));

        let missing = Config::load("/definitely/not/here.toml");
        assert!(matches!(missing, Err(Error::Io { .. })));
    }
}
