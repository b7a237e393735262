//! Connection strategies.
//!
//! A [`ConnectionStrategy`] performs exactly one bounded attempt to join a
//! network with a single credential. Two variants exist, chosen once at
//! startup from what the platform supports:
//!
//! - [`CallbackStrategy`]: issues an activation request and waits for the
//!   platform to signal that the network became available or unavailable.
//! - [`PollStrategy`]: fires a best-effort connect, waits until the deadline
//!   (measured from the start of the attempt), then checks the active
//!   connection once. It cannot tell a connection that
//!   is still negotiating from one that failed, so a late association is
//!   reported as a failure. Only used where callbacks are unavailable.

use anyhow::Result;
use async_trait::async_trait;
use clap::ValueEnum;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

pub mod callback;
pub mod poll;

pub use callback::CallbackStrategy;
pub use poll::PollStrategy;

/// Result of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed,
    TimedOut,
}

/// Platform signal delivered to a [`CallbackStrategy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkSignal {
    Available,
    Unavailable(String),
}

#[async_trait]
pub trait ConnectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Try `credential` against `network`, resolving within `deadline`.
    async fn attempt(&self, network: &str, credential: &str, deadline: Duration) -> AttemptOutcome;
}

/// Platform capability behind [`CallbackStrategy`].
pub trait NetworkRequester: Send + Sync {
    /// Start an activation request and report its result on `signals`.
    ///
    /// The request must be torn down once `signals` is closed.
    fn request_network(
        &self,
        network: &str,
        credential: &str,
        deadline: Duration,
        signals: mpsc::Sender<NetworkSignal>,
    );
}

/// Platform capability behind [`PollStrategy`].
#[async_trait]
pub trait ConnectionPoller: Send + Sync {
    /// Fire a connect request without waiting for it to complete.
    async fn begin_connect(&self, network: &str, credential: &str) -> Result<()>;

    /// SSID of the network the interface is fully connected to, if any.
    ///
    /// This is the network name the radio reports, not the name of the saved
    /// profile that was activated.
    async fn active_network(&self) -> Result<Option<String>>;

    /// Tear down a connect request that is no longer wanted.
    ///
    /// Called when an attempt ends without success or is dropped before it
    /// finishes, so the platform cannot complete the association later with a
    /// credential the caller has already moved past. Must not block.
    fn abandon(&self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Use callbacks when the platform supports them, polling otherwise.
    #[default]
    Auto,
    Callback,
    Poll,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Auto => write!(f, "auto"),
            StrategyKind::Callback => write!(f, "callback"),
            StrategyKind::Poll => write!(f, "poll"),
        }
    }
}

impl StrategyKind {
    /// Collapse `Auto` into a concrete variant given the platform capability.
    pub fn resolve(self, supports_callbacks: bool) -> StrategyKind {
        match self {
            StrategyKind::Auto if supports_callbacks => StrategyKind::Callback,
            StrategyKind::Auto => StrategyKind::Poll,
            other => other,
        }
    }
}

/// Build the strategy for `kind` over a backend offering both capabilities.
///
/// # Arguments
/// * `kind` - Requested strategy; `Auto` defers to `supports_callbacks`
/// * `supports_callbacks` - Whether the platform can signal activation results
/// * `backend` - Shared platform backend
///
/// # Returns
/// A [`CallbackStrategy`] or [`PollStrategy`] behind a trait object. The
/// choice is logged and never revisited for the lifetime of the strategy.
pub fn build_strategy<B>(kind: StrategyKind, supports_callbacks: bool, backend: Arc<B>) -> Arc<dyn ConnectionStrategy>
where
    B: NetworkRequester + ConnectionPoller + 'static,
{
    let strategy: Arc<dyn ConnectionStrategy> = match kind.resolve(supports_callbacks) {
        StrategyKind::Poll => Arc::new(PollStrategy::new(backend)),
        _ => Arc::new(CallbackStrategy::new(backend)),
    };
    info!(requested = %kind, selected = strategy.name(), "connection strategy selected");
    strategy
}
