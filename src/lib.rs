//! WiFi Auto Connect Library
//!
//! Tries an ordered list of candidate passwords against one WiFi network, one
//! bounded attempt at a time, and remembers which passwords failed so later
//! runs skip them.
//!
//! # Modules
//!
//! - [`config`] - Configuration file handling (timeouts, strategy, paths)
//! - [`connection`] - NetworkManager backend used by the strategies
//! - [`coordinator`] - The trial state machine driving a session to completion
//! - [`credentials`] - Loading candidate passwords from a text file
//! - [`error`] - Custom error types for the library
//! - [`history`] - Persistent per-network record of failed passwords
//! - [`interface`] - WiFi interface discovery
//! - [`scan`] - WiFi network scanning
//! - [`session`] - State of a single trial run
//! - [`status`] - Progress events and sinks
//! - [`strategy`] - Callback and poll connection strategies
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use wifi_autoconnect::{
//!     coordinator, ChannelSink, CallbackStrategy, FileHistoryStore, NmcliBackend, TrialSettings,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let backend = Arc::new(NmcliBackend::new("wlan1"));
//! let (sink, mut events) = ChannelSink::new();
//! let handle = coordinator::spawn(
//!     Arc::new(CallbackStrategy::new(backend)),
//!     Arc::new(FileHistoryStore::new("/tmp/history.json")),
//!     Arc::new(sink),
//!     TrialSettings::default(),
//! );
//!
//! let credentials = vec!["hunter2".to_string(), "letmein".to_string()];
//! if let Some(epoch) = handle.start_trial("HomeNet", credentials).await? {
//!     let state = handle.wait_finished(epoch).await;
//!     println!("finished: {:?}", state);
//! }
//! while let Ok(event) = events.try_recv() {
//!     println!("{}", event);
//! }
//! # Ok(())
//! # }
//! ```

/// Configuration module for application settings.
/// Reads the TOML config file; a missing file means defaults.
pub mod config;

/// NetworkManager (`nmcli`) implementation of the platform capabilities.
pub mod connection;

/// The credential trial state machine.
pub mod coordinator;

/// Candidate credential loading.
pub mod credentials;

/// Error module defining custom error types for the library.
/// Uses `thiserror` for ergonomic error handling.
pub mod error;

/// Durable per-network failure history.
pub mod history;

/// Interface module for WiFi adapter discovery.
pub mod interface;

mod nmcli;

/// Scan module for discovering available WiFi networks.
pub mod scan;

/// Session module holding the progress of a single trial run.
/// Tracks which credentials are still pending and where the cursor is.
pub mod session;

/// Status module for user-facing progress events.
/// Events go to a [`status::StatusSink`], typically a channel read by the CLI.
pub mod status;

/// Connection strategies and the platform seams they are built on.
pub mod strategy;

pub use connection::{ConnectionStatus, NmcliBackend};
pub use coordinator::{CoordinatorHandle, Snapshot, TrialSettings, TrialState};
pub use error::WifiAutoConnectError;
pub use history::{FailureHistory, FileHistoryStore};
pub use interface::{list_wifi_interfaces, resolve_interface, WifiInterface};
pub use scan::{scan_networks, Network};
pub use session::TrialSession;
pub use status::{ChannelSink, StatusEvent, StatusSink};
pub use strategy::{
    AttemptOutcome, CallbackStrategy, ConnectionStrategy, PollStrategy, StrategyKind,
};
