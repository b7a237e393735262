use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, warn};

use super::{AttemptOutcome, ConnectionPoller, ConnectionStrategy};

/// Upper bound on the single status query made at the deadline. Kept below
/// the coordinator's grace period so the query always gets to answer.
const STATUS_QUERY_TIMEOUT: Duration = Duration::from_millis(400);

/// Legacy connect-then-poll strategy.
///
/// Inspects the connection exactly once, `deadline` after the attempt
/// started. Time spent issuing the connect request counts against the
/// deadline, so a slow request shortens the wait instead of pushing the
/// poll past it. An association that completes after the poll is reported
/// as [`AttemptOutcome::Failed`]; this is a limit of the capability, not of
/// the timing chosen here.
///
/// Any attempt that does not end in success (including one dropped midway)
/// calls [`ConnectionPoller::abandon`] so the platform stops trying the
/// credential in the background.
pub struct PollStrategy<P> {
    poller: Arc<P>,
}

impl<P> PollStrategy<P> {
    pub fn new(poller: Arc<P>) -> Self {
        Self { poller }
    }
}

/// Abandons the pending connect request unless disarmed.
struct AbandonOnDrop<'a, P: ConnectionPoller> {
    poller: &'a P,
    armed: bool,
}

impl<P: ConnectionPoller> AbandonOnDrop<'_, P> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<P: ConnectionPoller> Drop for AbandonOnDrop<'_, P> {
    fn drop(&mut self) {
        if self.armed {
            self.poller.abandon();
        }
    }
}

#[async_trait]
impl<P> ConnectionStrategy for PollStrategy<P>
where
    P: ConnectionPoller + 'static,
{
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn attempt(&self, network: &str, credential: &str, deadline: Duration) -> AttemptOutcome {
        let started = Instant::now();
        let poll_at = started + deadline;
        let mut guard = AbandonOnDrop {
            poller: self.poller.as_ref(),
            armed: true,
        };

        match timeout_at(poll_at, self.poller.begin_connect(network, credential)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(network, error = %e, "connect request failed");
                return AttemptOutcome::Failed;
            }
            Err(_) => {
                warn!(network, "connect request still pending at the deadline");
                return AttemptOutcome::TimedOut;
            }
        }
        debug!(network, setup_ms = started.elapsed().as_millis() as u64, "connect request issued");

        sleep_until(poll_at).await;

        let outcome = match timeout(STATUS_QUERY_TIMEOUT, self.poller.active_network()).await {
            Ok(Ok(Some(active))) if active == network => AttemptOutcome::Success,
            Ok(Ok(active)) => {
                debug!(network, active = ?active, "not connected to requested network at poll time");
                AttemptOutcome::Failed
            }
            Ok(Err(e)) => {
                warn!(network, error = %e, "connection status query failed");
                AttemptOutcome::Failed
            }
            Err(_) => {
                warn!(network, "connection status query did not answer in time");
                AttemptOutcome::Failed
            }
        };

        if outcome == AttemptOutcome::Success {
            guard.disarm();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Connects to `network` only for `good_credential`, `connect_after` the
    /// request has been issued. Issuing the request itself takes `setup`.
    struct FakeRadio {
        good_credential: &'static str,
        connect_after: Duration,
        setup: Duration,
        fail_requests: bool,
        requested: Mutex<Option<(String, String, Instant)>>,
        abandoned: AtomicUsize,
    }

    impl FakeRadio {
        fn new(good_credential: &'static str, connect_after: Duration) -> Self {
            Self {
                good_credential,
                connect_after,
                setup: Duration::ZERO,
                fail_requests: false,
                requested: Mutex::new(None),
                abandoned: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ConnectionPoller for FakeRadio {
        async fn begin_connect(&self, network: &str, credential: &str) -> Result<()> {
            if self.fail_requests {
                return Err(anyhow!("device busy"));
            }
            tokio::time::sleep(self.setup).await;
            *self.requested.lock() = Some((network.to_string(), credential.to_string(), Instant::now()));
            Ok(())
        }

        async fn active_network(&self) -> Result<Option<String>> {
            let requested = self.requested.lock().clone();
            Ok(requested.and_then(|(network, credential, at)| {
                (credential == self.good_credential && at.elapsed() >= self.connect_after).then_some(network)
            }))
        }

        fn abandon(&self) {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().take();
        }
    }

    const DEADLINE: Duration = Duration::from_millis(3000);

    #[tokio::test(start_paused = true)]
    async fn matching_network_after_deadline_is_success() {
        let radio = Arc::new(FakeRadio::new("right", Duration::from_millis(1200)));
        let s = PollStrategy::new(radio.clone());

        let started = Instant::now();
        assert_eq!(s.attempt("HomeNet", "right", DEADLINE).await, AttemptOutcome::Success);
        assert!(started.elapsed() >= DEADLINE);
        assert!(started.elapsed() < DEADLINE + Duration::from_millis(5));
        assert_eq!(radio.abandoned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_connect_request_does_not_push_the_poll_past_the_deadline() {
        let mut radio = FakeRadio::new("right", Duration::from_millis(1200));
        radio.setup = Duration::from_millis(600);
        let s = PollStrategy::new(Arc::new(radio));

        let started = Instant::now();
        assert_eq!(s.attempt("HomeNet", "right", DEADLINE).await, AttemptOutcome::Success);
        assert!(started.elapsed() < DEADLINE + Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_request_outliving_the_deadline_times_out() {
        let mut radio = FakeRadio::new("right", Duration::ZERO);
        radio.setup = DEADLINE * 2;
        let radio = Arc::new(radio);
        let s = PollStrategy::new(radio.clone());

        let started = Instant::now();
        assert_eq!(s.attempt("HomeNet", "right", DEADLINE).await, AttemptOutcome::TimedOut);
        assert_eq!(started.elapsed(), DEADLINE);
        assert_eq!(radio.abandoned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_credential_is_failure_and_abandoned() {
        let radio = Arc::new(FakeRadio::new("right", Duration::from_millis(100)));
        let s = PollStrategy::new(radio.clone());

        assert_eq!(s.attempt("HomeNet", "wrong", DEADLINE).await, AttemptOutcome::Failed);
        assert_eq!(radio.abandoned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_association_is_misreported_as_failure() {
        let s = PollStrategy::new(Arc::new(FakeRadio::new("right", Duration::from_millis(3100))));
        assert_eq!(s.attempt("HomeNet", "right", DEADLINE).await, AttemptOutcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_attempt_abandons_the_request() {
        let radio = Arc::new(FakeRadio::new("right", Duration::ZERO));
        let s = PollStrategy::new(radio.clone());

        let cut_short = tokio::time::timeout(Duration::from_millis(1000), s.attempt("HomeNet", "right", DEADLINE)).await;
        assert!(cut_short.is_err());
        assert_eq!(radio.abandoned.load(Ordering::SeqCst), 1);
        assert_eq!(radio.active_network().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_request_fails_without_waiting() {
        let mut radio = FakeRadio::new("right", Duration::ZERO);
        radio.fail_requests = true;
        let s = PollStrategy::new(Arc::new(radio));

        let started = Instant::now();
        assert_eq!(s.attempt("HomeNet", "right", DEADLINE).await, AttemptOutcome::Failed);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
