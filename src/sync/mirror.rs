//! Local mirror of the authoritative state.
//!
//! Resolved actions carry explicit sequence numbers. Out-of-order arrivals
//! wait in a reorder buffer until the gap closes; duplicates are dropped.
//! A full snapshot is ground truth: it replaces the mirror outright and
//! discards anything buffered at or below its sequence number.
//!
//! States arrive as this peer's view, with the opponent's hidden zones
//! withheld. The view is checked against its own hash; the authoritative
//! hash is carried alongside so both peers can compare positions.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::hash::hash_to_hex;
use crate::game::state::{GameState, Side};
use crate::network::protocol::{ResolvedAction, SyncSnapshot};

/// Mirror failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MirrorError {
    /// The received view does not hash to what the authority announced.
    #[error("state hash mismatch at seq {seq}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Sequence number.
        seq: u64,
        /// Announced hash.
        expected: String,
        /// Locally computed hash.
        actual: String,
    },
}

/// Peer-side state mirror.
#[derive(Debug, Default)]
pub struct Mirror {
    state: Option<GameState>,
    state_hash: Option<String>,
    committed_seq: u64,
    delivered_seq: u64,
    pending: BTreeMap<u64, ResolvedAction>,
    side: Option<Side>,
}

impl Mirror {
    /// Empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed state.
    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    /// Authoritative hash of the committed state.
    pub fn state_hash(&self) -> Option<&str> {
        self.state_hash.as_deref()
    }

    /// Sequence number of the committed state.
    pub fn committed_seq(&self) -> u64 {
        self.committed_seq
    }

    /// Highest sequence number handed out for playback.
    pub fn delivered_seq(&self) -> u64 {
        self.delivered_seq
    }

    /// Our side, once known.
    pub fn side(&self) -> Option<Side> {
        self.side
    }

    /// Set our side.
    pub fn set_side(&mut self, side: Side) {
        self.side = Some(side);
    }

    /// Buffered out-of-order actions.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Forget everything (new match).
    pub fn reset(&mut self) {
        let side = self.side;
        *self = Self::default();
        self.side = side;
    }

    /// Accept a resolved action. Returns the actions now playable, in order.
    pub fn push(&mut self, resolved: ResolvedAction) -> Vec<ResolvedAction> {
        if resolved.seq <= self.delivered_seq {
            debug!(seq = resolved.seq, "Dropping duplicate");
            return Vec::new();
        }
        self.pending.insert(resolved.seq, resolved);
        self.drain_ready()
    }

    fn drain_ready(&mut self) -> Vec<ResolvedAction> {
        let mut ready = Vec::new();
        while let Some(next) = self.pending.remove(&(self.delivered_seq + 1)) {
            self.delivered_seq = next.seq;
            ready.push(next);
        }
        ready
    }

    /// Commit a played action's snapshot after checking its hash.
    pub fn commit(&mut self, resolved: &ResolvedAction) -> Result<(), MirrorError> {
        self.install(resolved.seq, &resolved.state, &resolved.view_hash, &resolved.state_hash)
    }

    /// Replace the mirror with a full snapshot. Returns buffered actions
    /// that directly follow it.
    pub fn apply_snapshot(&mut self, snapshot: &SyncSnapshot) -> Result<Vec<ResolvedAction>, MirrorError> {
        self.install(snapshot.seq, &snapshot.state, &snapshot.view_hash, &snapshot.state_hash)?;
        self.side = Some(snapshot.side);
        self.delivered_seq = self.delivered_seq.max(snapshot.seq);
        let seq = snapshot.seq;
        self.pending.retain(|s, _| *s > seq);
        Ok(self.drain_ready())
    }

    fn install(&mut self, seq: u64, state: &GameState, expected: &str, state_hash: &str) -> Result<(), MirrorError> {
        let actual = hash_to_hex(&state.compute_hash());
        if actual != expected {
            warn!(seq, "Snapshot hash mismatch");
            return Err(MirrorError::HashMismatch { seq, expected: expected.to_string(), actual });
        }
        if seq < self.committed_seq {
            return Ok(());
        }
        self.state = Some(state.clone());
        self.state_hash = Some(state_hash.to_string());
        self.committed_seq = seq;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RulesConfig;
    use crate::game::action::Action;

    fn state(turn: u32) -> GameState {
        let mut s = GameState::new([1; 16], 5, RulesConfig::default(), Side::A);
        s.turn = turn;
        s
    }

    fn resolved(seq: u64) -> ResolvedAction {
        let state = state(seq as u32);
        ResolvedAction {
            match_id: "m".into(),
            seq,
            actor: Side::A,
            action: Action::EndPhase,
            events: Vec::new(),
            animation_sequence: Vec::new(),
            view_hash: hash_to_hex(&state.compute_hash()),
            state_hash: format!("{seq:064x}"),
            state,
            is_my_action: false,
            start_at_server_ms: 0,
            server_time: 0,
        }
    }

    fn seqs(v: &[ResolvedAction]) -> Vec<u64> {
        v.iter().map(|r| r.seq).collect()
    }

    #[test]
    fn test_reorder_buffer() {
        let mut m = Mirror::new();
        assert!(m.push(resolved(2)).is_empty());
        assert!(m.push(resolved(3)).is_empty());
        assert_eq!(m.pending_len(), 2);
        assert_eq!(seqs(&m.push(resolved(1))), vec![1, 2, 3]);
        assert!(m.push(resolved(2)).is_empty());
        assert_eq!(m.delivered_seq(), 3);
    }

    #[test]
    fn test_commit_checks_hash() {
        let mut m = Mirror::new();
        let good = resolved(1);
        m.commit(&good).unwrap();
        assert_eq!(m.committed_seq(), 1);
        assert_eq!(m.state().map(|s| s.turn), Some(1));
        assert_eq!(m.state_hash(), Some(format!("{:064x}", 1).as_str()));

        let mut bad = resolved(2);
        bad.view_hash = "00".into();
        assert!(matches!(m.commit(&bad), Err(MirrorError::HashMismatch { seq: 2, .. })));
        assert_eq!(m.committed_seq(), 1);
    }

    #[test]
    fn test_snapshot_is_ground_truth_across_gap() {
        let mut m = Mirror::new();
        m.push(resolved(1));
        m.push(resolved(4));
        m.push(resolved(6));
        let s = state(5);
        let snapshot = SyncSnapshot {
            match_id: "m".into(),
            seq: 5,
            side: Side::B,
            opponent_id: String::new(),
            view_hash: hash_to_hex(&s.compute_hash()),
            state_hash: "55".repeat(32),
            state: s,
            server_time: 0,
        };
        let ready = m.apply_snapshot(&snapshot).unwrap();
        assert_eq!(seqs(&ready), vec![6]);
        assert_eq!(m.committed_seq(), 5);
        assert_eq!(m.side(), Some(Side::B));
        assert_eq!(m.pending_len(), 0);
    }
}
