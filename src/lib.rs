//! Rotation-aware tailing of (namely log) files, with fanout of new lines to
//! a changing set of subscribers.
//!
//! Each watched file gets a [`TailWatcher`] that polls it, survives rotation,
//! truncation and temporary deletion, and publishes every newly appended line
//! to a shared [`FanoutRegistry`]. New subscribers first receive a backlog of
//! recent lines, read backwards from the end of each file by
//! [`backlog::last_lines`], and then every live line.
//!
//! ## Example
//!
//! ```no_run
//! use tailfan::{fanout, Message, Supervisor, WatchSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tailfan::Error> {
//!     let mut supervisor = Supervisor::new(WatchSettings::default(), 5);
//!
//!     // Register some files to be tailed, whether they currently exist or not.
//!     supervisor.register_watched_file("app", "some/file.log")?;
//!     supervisor.register_watched_file("nginx", "/some/other/file.log")?;
//!
//!     // Attach a subscriber: one `Historical` message, then `Realtime` ones.
//!     let (subscriber, mut subscription) = fanout::channel();
//!     supervisor.on_subscriber_connected(&subscriber).await?;
//!
//!     while let Some(message) = subscription.recv().await {
//!         if let Message::Realtime { log_id, text } = message {
//!             println!("{}: {}", log_id, text);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Caveats
//!
//! Delivery is best-effort. A subscriber whose channel fails a send is
//! dropped without retry, and lines published while no one is subscribed are
//! not kept. Rotation is detected through device and inode numbers, so on
//! non-unix platforms only deletion and truncation are noticed.

pub mod backlog;
pub mod config;
mod error;
pub mod fanout;
mod message;
mod supervisor;
mod wake;
mod watcher;

pub use config::Config;
pub use error::{Error, Result};
pub use fanout::{Channel, FanoutRegistry, Subscriber, SubscriberId, Subscription};
pub use message::Message;
pub use supervisor::Supervisor;
pub use watcher::{TailWatcher, WatchSettings, WatchState};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
