//! Progress of a single trial run.
//!
//! A [`TrialSession`] is created when a trial starts and is owned by the
//! coordinator until the trial ends. Credentials already recorded as failed
//! are removed once, at creation; later failures in the same run only move
//! the cursor.

use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Indices of `candidates` that are not in `failed`, in original order.
///
/// # Arguments
/// * `candidates` - The full credential list as supplied
/// * `failed` - Credentials already recorded as failed for the network
///
/// # Returns
/// Positions into `candidates`, ascending. A duplicate candidate keeps one
/// entry per occurrence.
pub fn filter_pending(candidates: &[String], failed: &HashSet<String>) -> Vec<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, credential)| !failed.contains(*credential))
        .map(|(index, _)| index)
        .collect()
}

/// State of one trial run against a single network.
///
/// `pending` holds positions into `candidates` so progress can always be
/// reported against the full list the user supplied.
#[derive(Debug)]
pub struct TrialSession {
    epoch: u64,
    network: String,
    candidates: Vec<String>,
    pending: Vec<usize>,
    cursor: usize,
    connected: bool,
    started_at: Instant,
}

impl TrialSession {
    /// Start a session for `network`.
    ///
    /// # Arguments
    /// * `epoch` - Identifier distinguishing this run from earlier ones
    /// * `network` - SSID under trial
    /// * `candidates` - Credentials in the order they were supplied
    /// * `failed` - History for `network`; matching candidates are skipped
    pub fn new(epoch: u64, network: String, candidates: Vec<String>, failed: &HashSet<String>) -> Self {
        let pending = filter_pending(&candidates, failed);
        Self {
            epoch,
            network,
            candidates,
            pending,
            cursor: 0,
            connected: false,
            started_at: Instant::now(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn total(&self) -> usize {
        self.candidates.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Candidates excluded up front because history already marks them failed.
    pub fn skipped(&self) -> usize {
        self.candidates.len() - self.pending.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// No credential is left to try and none connected.
    pub fn is_exhausted(&self) -> bool {
        !self.connected && self.cursor >= self.pending.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// The credential under trial, or `None` once the session is finished.
    pub fn current(&self) -> Option<&str> {
        if self.connected {
            return None;
        }
        self.pending
            .get(self.cursor)
            .map(|&index| self.candidates[index].as_str())
    }

    /// 1-based position of the current credential in the original list.
    pub fn current_position(&self) -> Option<usize> {
        self.pending.get(self.cursor).map(|&index| index + 1)
    }

    /// Move past a failed credential. Returns `false` when nothing is left.
    pub fn advance(&mut self) -> bool {
        if self.connected || self.cursor >= self.pending.len() {
            return false;
        }
        self.cursor += 1;
        self.cursor < self.pending.len()
    }

    /// Latch the session as connected. Returns `false` if it already was.
    pub fn mark_connected(&mut self) -> bool {
        if self.connected {
            return false;
        }
        self.connected = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn positions_refer_to_original_list() {
        let mut session = TrialSession::new(1, "Net2".into(), strings(&["x", "y", "z"]), &set(&["x"]));

        assert_eq!(session.skipped(), 1);
        assert_eq!(session.current(), Some("y"));
        assert_eq!(session.current_position(), Some(2));

        assert!(session.advance());
        assert_eq!(session.current(), Some("z"));
        assert_eq!(session.current_position(), Some(3));

        assert!(!session.advance());
        assert!(session.is_exhausted());
        assert_eq!(session.current(), None);
        assert!(!session.advance());
        assert_eq!(session.cursor(), 2);
    }

    #[test]
    fn duplicates_are_tried_at_their_own_position() {
        let session = TrialSession::new(1, "Net".into(), strings(&["a", "b", "a"]), &set(&["b"]));
        assert_eq!(session.pending, vec![0, 2]);
    }

    #[test]
    fn connected_latches_once_and_stops_progress() {
        let mut session = TrialSession::new(1, "Net".into(), strings(&["a", "b"]), &HashSet::new());

        assert!(session.mark_connected());
        assert!(!session.mark_connected());
        assert!(!session.advance());
        assert_eq!(session.current(), None);
        assert!(!session.is_exhausted());
    }

    #[test]
    fn fully_filtered_session_is_exhausted_immediately() {
        let session = TrialSession::new(1, "HomeNet".into(), strings(&["a", "b"]), &set(&["a", "b"]));
        assert_eq!(session.pending_len(), 0);
        assert!(session.is_exhausted());
    }

    proptest! {
        #[test]
        fn filter_preserves_order_and_removes_exactly_failed(
            candidates in prop::collection::vec("[a-d]{1,2}", 0..20),
            failed in prop::collection::hash_set("[a-d]{1,2}", 0..8),
        ) {
            let pending = filter_pending(&candidates, &failed);

            prop_assert!(pending.windows(2).all(|w| w[0] < w[1]));
            for (index, credential) in candidates.iter().enumerate() {
                prop_assert_eq!(pending.contains(&index), !failed.contains(credential));
            }
        }
    }
}
