//! Tails a set of files and prints every message a subscriber would receive,
//! in its JSON wire form.
//!
//! Usage:
//!     tailf /path/to/config.toml
//!     tailf app=/path/to/app.log nginx=/path/to/access.log ...
//!
//! The files could be present or not, but assume some data will eventually
//! be written to them in order to generate lines. Set `RUST_LOG=tailfan=debug`
//! to see what the watchers are doing.

use std::collections::BTreeMap;
use std::path::PathBuf;

use futures_util::stream::StreamExt;
use tailfan::{fanout, Config, Supervisor, WatchSettings};

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tailfan=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let supervisor = match args.as_slice() {
        [] => return Err("usage: tailf <config.toml> | <log_id>=<path>...".into()),
        [config] if !config.contains('=') => Supervisor::from_config(&Config::load(config)?)?,
        pairs => {
            let mut logs = BTreeMap::new();
            for pair in pairs {
                let (log_id, path) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("expected <log_id>=<path>, got `{}`", pair))?;
                logs.insert(log_id.to_string(), PathBuf::from(path));
            }

            let mut supervisor = Supervisor::new(WatchSettings::default(), 5);
            for (log_id, path) in logs {
                supervisor.register_watched_file(log_id, path)?;
            }
            supervisor
        }
    };

    let (subscriber, mut subscription) = fanout::channel();
    supervisor.on_subscriber_connected(&subscriber).await?;

    while let Some(message) = subscription.next().await {
        println!("{}", message.to_json()?);
    }

    Ok(())
}
