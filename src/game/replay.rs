//! Match Log and Replay
//!
//! A match is fully determined by its seed, rules, manifests, the opening
//! override and the ordered list of accepted actions and verdicts. The log
//! records exactly that; replaying it must land on the same state hash.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::config::RulesConfig;
use crate::core::hash::{hash_to_hex, StateHash};
use crate::game::action::{initialize_match, process_action, Action, ActionError, DeckManifest};
use crate::game::card::CardCatalog;
use crate::game::events::GameOverReason;
use crate::game::state::{GameState, Side};

/// One accepted step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LogEntry {
    /// An accepted action.
    Action {
        /// Acting side.
        side: Side,
        /// The action.
        action: Action,
    },
    /// A result imposed from outside the rules (timeout, abandonment).
    Verdict {
        /// Winner.
        winner: Side,
        /// Reason.
        reason: GameOverReason,
    },
}

/// Everything needed to reproduce a match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchLog {
    /// Match id.
    pub match_id: [u8; 16],
    /// RNG seed.
    pub seed: u64,
    /// Rules in force.
    pub rules: RulesConfig,
    /// Opening side override, if one was given.
    pub first_side: Option<Side>,
    /// Manifests for side A and side B.
    pub manifests: [DeckManifest; 2],
    /// Accepted steps in order.
    pub entries: Vec<LogEntry>,
    /// Hex state hash after the last entry, if recorded.
    pub final_hash: Option<String>,
}

/// Replay failures.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Setup from the manifests failed.
    #[error("setup failed: {0}")]
    Setup(ActionError),
    /// A logged action was rejected on replay.
    #[error("entry {index} rejected: {source}")]
    Rejected {
        /// Entry index.
        index: usize,
        /// Rejection.
        source: ActionError,
    },
    /// Replay ended on a different state.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Recorded hash.
        expected: String,
        /// Replayed hash.
        actual: String,
    },
    /// Log could not be parsed.
    #[error("log parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl MatchLog {
    /// Start a log for a new match.
    pub fn new(
        match_id: [u8; 16],
        seed: u64,
        rules: RulesConfig,
        first_side: Option<Side>,
        manifests: [DeckManifest; 2],
    ) -> Self {
        Self {
            match_id,
            seed,
            rules,
            first_side,
            manifests,
            entries: Vec::new(),
            final_hash: None,
        }
    }

    /// Record an accepted action.
    pub fn record_action(&mut self, side: Side, action: Action) {
        self.entries.push(LogEntry::Action { side, action });
    }

    /// Record an imposed result.
    pub fn record_verdict(&mut self, winner: Side, reason: GameOverReason) {
        self.entries.push(LogEntry::Verdict { winner, reason });
    }

    /// Stamp the final hash.
    pub fn seal(&mut self, hash: &StateHash) {
        self.final_hash = Some(hash_to_hex(hash));
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, ReplayError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Rebuild the state a log describes.
pub fn replay(log: &MatchLog, catalog: &dyn CardCatalog) -> Result<GameState, ReplayError> {
    let mut state = GameState::new(log.match_id, log.seed, log.rules.clone(), Side::A);
    let [a, b] = &log.manifests;
    initialize_match(&mut state, catalog, [a, b], log.first_side).map_err(ReplayError::Setup)?;

    for (index, entry) in log.entries.iter().enumerate() {
        match entry {
            LogEntry::Action { side, action } => {
                process_action(&mut state, *side, action)
                    .map_err(|source| ReplayError::Rejected { index, source })?;
            }
            LogEntry::Verdict { winner, reason } => {
                state.declare_winner(*winner, *reason);
                state.take_events();
            }
        }
    }
    Ok(state)
}

/// Replay and compare against the recorded hash. Returns the replayed hash.
pub fn verify(log: &MatchLog, catalog: &dyn CardCatalog) -> Result<StateHash, ReplayError> {
    let state = replay(log, catalog)?;
    let hash = state.compute_hash();
    if let Some(expected) = &log.final_hash {
        let actual = hash_to_hex(&hash);
        if &actual != expected {
            return Err(ReplayError::HashMismatch { expected: expected.clone(), actual });
        }
    }
    Ok(hash)
}
