use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use super::{AttemptOutcome, ConnectionStrategy, NetworkRequester, NetworkSignal};

/// Request/callback connection strategy.
///
/// Resolves on the first signal from the requester or on the deadline,
/// whichever comes first. Only the first signal is read; the channel is then
/// dropped, which also tells the requester to tear the request down.
pub struct CallbackStrategy<R> {
    requester: Arc<R>,
}

impl<R> CallbackStrategy<R> {
    pub fn new(requester: Arc<R>) -> Self {
        Self { requester }
    }
}

#[async_trait]
impl<R> ConnectionStrategy for CallbackStrategy<R>
where
    R: NetworkRequester + 'static,
{
    fn name(&self) -> &'static str {
        "callback"
    }

    async fn attempt(&self, network: &str, credential: &str, deadline: Duration) -> AttemptOutcome {
        let (tx, mut rx) = mpsc::channel(4);
        self.requester.request_network(network, credential, deadline, tx);

        match timeout(deadline, rx.recv()).await {
            Ok(Some(NetworkSignal::Available)) => AttemptOutcome::Success,
            Ok(Some(NetworkSignal::Unavailable(reason))) => {
                debug!(network, %reason, "network unavailable");
                AttemptOutcome::Failed
            }
            Ok(None) => {
                debug!(network, "requester closed without signalling");
                AttemptOutcome::Failed
            }
            Err(_) => AttemptOutcome::TimedOut,
        }
    }
}
