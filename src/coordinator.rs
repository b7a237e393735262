//! Credential trial coordinator.
//!
//! The coordinator owns the active [`TrialSession`] and moves it through
//!
//! ```text
//! Idle -> Filtering -> Attempting(i) -> Connected
//!                          |    ^    \-> Exhausted
//!                          \----/ (failed / timed out)
//! ```
//!
//! All transitions run on one tokio task. Attempts run on spawned tasks and
//! report back over an internal channel tagged with the session epoch and
//! the pending index they were issued for; a report that does not match the
//! live session is dropped. Starting a new trial cancels the current one.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::history::FailureHistory;
use crate::session::TrialSession;
use crate::status::{StatusEvent, StatusSink};
use crate::strategy::{AttemptOutcome, ConnectionStrategy};

/// Slack on top of the attempt deadline before the coordinator gives up on
/// a strategy itself.
const ATTEMPT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialSettings {
    /// Deadline handed to the strategy for every attempt.
    pub attempt_timeout: Duration,
    /// Pause before each attempt.
    pub settle_delay: Duration,
}

impl Default for TrialSettings {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(crate::config::DEFAULT_ATTEMPT_TIMEOUT_MS),
            settle_delay: Duration::from_millis(crate::config::DEFAULT_SETTLE_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    Idle,
    Filtering,
    /// `index` counts within the pending list, `position` within the original list.
    Attempting { index: usize, position: usize, total: usize },
    Connected { position: usize },
    Exhausted,
}

impl TrialState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrialState::Connected { .. } | TrialState::Exhausted)
    }
}

/// Current state together with the session it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub epoch: u64,
    pub state: TrialState,
}

enum Command {
    Start {
        network: String,
        credentials: Vec<String>,
        reply: oneshot::Sender<Option<u64>>,
    },
    Stop,
}

#[derive(Debug)]
struct AttemptReport {
    epoch: u64,
    index: usize,
    outcome: AttemptOutcome,
}

/// Handle to a running coordinator task.
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Start a trial, superseding any running one.
    ///
    /// Returns the session epoch, or `None` when the network or the credential
    /// list is empty (reported to the sink, no session is created).
    pub async fn start_trial(&self, network: impl Into<String>, credentials: Vec<String>) -> Result<Option<u64>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Start {
                network: network.into(),
                credentials,
                reply,
            })
            .map_err(|_| anyhow!("coordinator is not running"))?;

        rx.await.map_err(|_| anyhow!("coordinator stopped before accepting the trial"))
    }

    /// Cancel the running trial, if any.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.snapshots.borrow()
    }

    /// Wait until session `epoch` ends and return its final state.
    ///
    /// A session that is stopped or superseded ends in [`TrialState::Idle`].
    pub async fn wait_finished(&self, epoch: u64) -> TrialState {
        let mut snapshots = self.snapshots.clone();
        let result = snapshots
            .wait_for(|s| s.epoch != epoch || s.state.is_terminal() || s.state == TrialState::Idle)
            .await
            .map(|s| *s);

        match result {
            Ok(snapshot) if snapshot.epoch == epoch => snapshot.state,
            _ => TrialState::Idle,
        }
    }

    /// Cancel any trial and wait for the coordinator task to exit.
    pub async fn shutdown(self) {
        drop(self.commands);
        let _ = self.task.await;
    }
}

struct ActiveSession {
    session: TrialSession,
    cancel: CancellationToken,
}

struct Coordinator {
    strategy: Arc<dyn ConnectionStrategy>,
    history: Arc<dyn FailureHistory>,
    sink: Arc<dyn StatusSink>,
    settings: TrialSettings,
    epoch: u64,
    active: Option<ActiveSession>,
    snapshots: watch::Sender<Snapshot>,
    reports_tx: mpsc::UnboundedSender<AttemptReport>,
}

/// Spawn the coordinator task on the current tokio runtime.
///
/// # Arguments
/// * `strategy` - Performs each bounded attempt; chosen once by the caller
/// * `history` - Failure history consulted at start and updated per outcome
/// * `sink` - Receives every [`StatusEvent`]
/// * `settings` - Attempt deadline and settle delay
///
/// # Returns
/// A [`CoordinatorHandle`]. Dropping it (or calling
/// [`CoordinatorHandle::shutdown`]) cancels any running trial.
pub fn spawn(
    strategy: Arc<dyn ConnectionStrategy>,
    history: Arc<dyn FailureHistory>,
    sink: Arc<dyn StatusSink>,
    settings: TrialSettings,
) -> CoordinatorHandle {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (reports_tx, reports_rx) = mpsc::unbounded_channel();
    let (snapshots_tx, snapshots_rx) = watch::channel(Snapshot {
        epoch: 0,
        state: TrialState::Idle,
    });

    let coordinator = Coordinator {
        strategy,
        history,
        sink,
        settings,
        epoch: 0,
        active: None,
        snapshots: snapshots_tx,
        reports_tx,
    };
    let task = tokio::spawn(coordinator.run(commands_rx, reports_rx));

    CoordinatorHandle {
        commands: commands_tx,
        snapshots: snapshots_rx,
        task,
    }
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut reports: mpsc::UnboundedReceiver<AttemptReport>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start { network, credentials, reply }) => {
                        let epoch = self.start(network, credentials);
                        let _ = reply.send(epoch);
                    }
                    Some(Command::Stop) => self.stop(),
                    None => break,
                },
                Some(report) = reports.recv() => self.handle_report(report),
            }
        }

        self.stop();
        debug!("coordinator exiting");
    }

    fn set_state(&self, state: TrialState) {
        self.snapshots.send_replace(Snapshot {
            epoch: self.epoch,
            state,
        });
    }

    fn publish(&self, event: StatusEvent) {
        if event.is_final() {
            info!(status = %event);
        } else {
            debug!(status = %event);
        }
        self.sink.publish(&event);
    }

    fn start(&mut self, network: String, credentials: Vec<String>) -> Option<u64> {
        self.cancel_active();
        self.epoch += 1;

        if network.is_empty() || credentials.is_empty() {
            self.publish(StatusEvent::MissingInput);
            self.set_state(TrialState::Idle);
            return None;
        }

        self.set_state(TrialState::Filtering);
        let failed = self.history.get(&network);
        let session = TrialSession::new(self.epoch, network, credentials, &failed);
        info!(
            epoch = self.epoch,
            network = session.network(),
            total = session.total(),
            pending = session.pending_len(),
            "trial started"
        );

        if session.is_exhausted() {
            self.publish(StatusEvent::AllAlreadyTried {
                network: session.network().to_string(),
            });
            self.set_state(TrialState::Exhausted);
            return Some(self.epoch);
        }

        if session.skipped() > 0 {
            self.publish(StatusEvent::Skipped {
                network: session.network().to_string(),
                count: session.skipped(),
            });
        }

        self.active = Some(ActiveSession {
            session,
            cancel: CancellationToken::new(),
        });
        self.dispatch();
        Some(self.epoch)
    }

    /// Issue the attempt for the session's current credential.
    fn dispatch(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        let session = &active.session;
        let (Some(credential), Some(position)) = (session.current(), session.current_position()) else {
            return;
        };

        let network = session.network().to_string();
        let credential = credential.to_string();
        let index = session.cursor();
        let total = session.total();
        let epoch = session.epoch();
        let cancel = active.cancel.clone();

        self.publish(StatusEvent::Trying {
            network: network.clone(),
            position,
            total,
        });
        self.set_state(TrialState::Attempting { index, position, total });

        let strategy = Arc::clone(&self.strategy);
        let reports = self.reports_tx.clone();
        let TrialSettings {
            attempt_timeout,
            settle_delay,
        } = self.settings;

        tokio::spawn(async move {
            let attempt = async {
                sleep(settle_delay).await;
                debug!(epoch, index, strategy = strategy.name(), "dispatching attempt");
                timeout(
                    attempt_timeout + ATTEMPT_GRACE,
                    strategy.attempt(&network, &credential, attempt_timeout),
                )
                .await
                .unwrap_or(AttemptOutcome::TimedOut)
            };

            let outcome = tokio::select! {
                outcome = attempt => outcome,
                _ = cancel.cancelled() => {
                    debug!(epoch, index, "attempt cancelled");
                    return;
                }
            };

            let _ = reports.send(AttemptReport { epoch, index, outcome });
        });
    }

    fn handle_report(&mut self, report: AttemptReport) {
        let Some(active) = self.active.as_mut() else {
            debug!(epoch = report.epoch, "discarding outcome: no active session");
            return;
        };
        let session = &mut active.session;

        if report.epoch != session.epoch() {
            debug!(epoch = report.epoch, current = session.epoch(), "discarding outcome from superseded session");
            return;
        }
        if session.is_connected() || report.index != session.cursor() {
            debug!(epoch = report.epoch, index = report.index, "discarding duplicate outcome");
            return;
        }

        let network = session.network().to_string();
        let position = session.current_position().unwrap_or_default();
        let credential = session.current().map(str::to_string).unwrap_or_default();

        match report.outcome {
            AttemptOutcome::Success => {
                if !session.mark_connected() {
                    debug!(epoch = report.epoch, "discarding success for a session already connected");
                    return;
                }
                info!(network = %network, position, elapsed_ms = session.elapsed().as_millis() as u64, "connected");

                if let Err(e) = self.history.clear(&network) {
                    warn!(network = %network, error = %e, "failed to clear failure history");
                }
                self.publish(StatusEvent::Connected { network, position });
                self.set_state(TrialState::Connected { position });
                self.active = None;
            }
            AttemptOutcome::Failed | AttemptOutcome::TimedOut => {
                debug!(network = %network, position, outcome = ?report.outcome, "credential rejected");
                let more = session.advance();
                let elapsed = session.elapsed();

                if let Err(e) = self.history.add(&network, &credential) {
                    warn!(network = %network, error = %e, "failed to record failed credential");
                }

                if more {
                    self.dispatch();
                } else {
                    info!(network = %network, elapsed_ms = elapsed.as_millis() as u64, "all credentials failed");
                    self.publish(StatusEvent::Exhausted { network });
                    self.set_state(TrialState::Exhausted);
                    self.active = None;
                }
            }
        }
    }

    /// Cancel the active session without touching history.
    fn cancel_active(&mut self) -> Option<String> {
        let active = self.active.take()?;
        active.cancel.cancel();
        debug!(epoch = active.session.epoch(), "session cancelled");
        Some(active.session.network().to_string())
    }

    fn stop(&mut self) {
        if let Some(network) = self.cancel_active() {
            self.publish(StatusEvent::Stopped { network });
            self.set_state(TrialState::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::FileHistoryStore;
    use crate::status::ChannelSink;
    use async_trait::async_trait;

    struct NeverResolves;

    #[async_trait]
    impl ConnectionStrategy for NeverResolves {
        fn name(&self) -> &'static str {
            "never"
        }

        async fn attempt(&self, _: &str, _: &str, _: Duration) -> AttemptOutcome {
            std::future::pending().await
        }
    }

    fn coordinator(dir: &tempfile::TempDir) -> (Coordinator, Arc<FileHistoryStore>, mpsc::UnboundedReceiver<AttemptReport>) {
        let history = Arc::new(FileHistoryStore::new(dir.path().join("history.json")));
        let (sink, _events) = ChannelSink::new();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (snapshots, _) = watch::channel(Snapshot {
            epoch: 0,
            state: TrialState::Idle,
        });

        let coordinator = Coordinator {
            strategy: Arc::new(NeverResolves),
            history: history.clone(),
            sink: Arc::new(sink),
            settings: TrialSettings::default(),
            epoch: 0,
            active: None,
            snapshots,
            reports_tx,
        };
        (coordinator, history, reports_rx)
    }

    fn creds(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn stale_outcome_does_not_touch_new_session_or_history() {
        let dir = tempfile::tempdir().unwrap();
        let (mut coordinator, history, _reports) = coordinator(&dir);

        let first = coordinator.start("HomeNet".into(), creds(&["a", "b"])).unwrap();
        let second = coordinator.start("Net2".into(), creds(&["x", "y"])).unwrap();
        assert_ne!(first, second);

        coordinator.handle_report(AttemptReport {
            epoch: first,
            index: 0,
            outcome: AttemptOutcome::Failed,
        });
        coordinator.handle_report(AttemptReport {
            epoch: first,
            index: 0,
            outcome: AttemptOutcome::Success,
        });

        let session = &coordinator.active.as_ref().unwrap().session;
        assert_eq!(session.epoch(), second);
        assert_eq!(session.cursor(), 0);
        assert!(!session.is_connected());
        assert!(history.get("HomeNet").is_empty());
        assert!(history.get("Net2").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_outcome_for_resolved_attempt_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut coordinator, history, _reports) = coordinator(&dir);

        let epoch = coordinator.start("HomeNet".into(), creds(&["a", "b", "c"])).unwrap();
        let failed = AttemptReport {
            epoch,
            index: 0,
            outcome: AttemptOutcome::Failed,
        };
        coordinator.handle_report(failed);
        coordinator.handle_report(AttemptReport {
            epoch,
            index: 0,
            outcome: AttemptOutcome::TimedOut,
        });

        let session = &coordinator.active.as_ref().unwrap().session;
        assert_eq!(session.cursor(), 1);
        assert_eq!(history.get("HomeNet").len(), 1);
        assert_eq!(
            *coordinator.snapshots.borrow(),
            Snapshot {
                epoch,
                state: TrialState::Attempting {
                    index: 1,
                    position: 2,
                    total: 3
                }
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn outcome_after_connected_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut coordinator, history, _reports) = coordinator(&dir);
        history.add("HomeNet", "zzz").unwrap();

        let epoch = coordinator.start("HomeNet".into(), creds(&["a", "b"])).unwrap();
        coordinator.handle_report(AttemptReport {
            epoch,
            index: 0,
            outcome: AttemptOutcome::Success,
        });
        assert!(coordinator.active.is_none());
        assert!(history.get("HomeNet").is_empty());

        coordinator.handle_report(AttemptReport {
            epoch,
            index: 0,
            outcome: AttemptOutcome::Failed,
        });
        assert!(history.get("HomeNet").is_empty());
        assert_eq!(coordinator.snapshots.borrow().state, TrialState::Connected { position: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_creates_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let (mut coordinator, _history, _reports) = coordinator(&dir);

        assert_eq!(coordinator.start(String::new(), creds(&["a"])), None);
        assert_eq!(coordinator.start("HomeNet".into(), Vec::new()), None);
        assert!(coordinator.active.is_none());
        assert_eq!(coordinator.snapshots.borrow().state, TrialState::Idle);
    }
}
