//! Human-readable progress events.
//!
//! The coordinator pushes a [`StatusEvent`] for every user-visible step of a
//! trial. Sinks are fire-and-forget: `publish` returns nothing and must never
//! block the caller.

use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// A trial was requested without a network or without credentials.
    MissingInput,
    /// Every candidate is already recorded as failed for this network.
    AllAlreadyTried { network: String },
    /// Some candidates were skipped because history marks them failed.
    Skipped { network: String, count: usize },
    /// An attempt is about to be dispatched.
    Trying { network: String, position: usize, total: usize },
    Connected { network: String, position: usize },
    Exhausted { network: String },
    /// The session was stopped before reaching a terminal state.
    Stopped { network: String },
}

impl StatusEvent {
    /// Whether this event ends a session.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            StatusEvent::MissingInput
                | StatusEvent::AllAlreadyTried { .. }
                | StatusEvent::Connected { .. }
                | StatusEvent::Exhausted { .. }
                | StatusEvent::Stopped { .. }
        )
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::MissingInput => write!(f, "missing network or credentials"),
            StatusEvent::AllAlreadyTried { network } => write!(
                f,
                "all credentials already tried for {}; add new ones to the list",
                network
            ),
            StatusEvent::Skipped { network, count } => {
                write!(f, "skipped {} already-tried credentials for {}", count, network)
            }
            StatusEvent::Trying { network, position, total } => {
                write!(f, "trying credential {}/{} on {}", position, total, network)
            }
            StatusEvent::Connected { network, position } => {
                write!(f, "connected to {}; credential {} is correct", network, position)
            }
            StatusEvent::Exhausted { network } => write!(f, "no credential worked for {}", network),
            StatusEvent::Stopped { network } => write!(f, "stopped trial on {}", network),
        }
    }
}

/// One-way observer for status events.
pub trait StatusSink: Send + Sync {
    /// Deliver `event`. Called from the coordinator task; must not block.
    fn publish(&self, event: &StatusEvent);
}

/// Forwards events into an unbounded channel.
///
/// A dropped receiver is not an error; events are simply lost.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelSink {
    /// Create a sink together with the receiver that observes it.
    ///
    /// # Example
    /// ```
    /// use wifi_autoconnect::{ChannelSink, StatusEvent, StatusSink};
    ///
    /// let (sink, mut events) = ChannelSink::new();
    /// sink.publish(&StatusEvent::MissingInput);
    /// assert_eq!(events.try_recv().unwrap(), StatusEvent::MissingInput);
    /// ```
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelSink {
    fn publish(&self, event: &StatusEvent) {
        let _ = self.tx.send(event.clone());
    }
}
