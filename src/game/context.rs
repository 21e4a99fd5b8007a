//! Match Context
//!
//! One match's state, its namespaced view of the event bus and its log.
//! The authority keeps one context per live match keyed by match id; there
//! is no process-wide game instance.

use std::sync::Arc;

use tracing::{debug, info};

use crate::core::config::RulesConfig;
use crate::core::hash::{hash_to_hex, StateHash};
use crate::core::rng::derive_match_seed;
use crate::game::action::{initialize_match, process_action, Action, ActionError, ActionOutcome, DeckManifest};
use crate::game::bus::EventBus;
use crate::game::card::CardCatalog;
use crate::game::events::{GameEvent, GameOverReason};
use crate::game::replay::MatchLog;
use crate::game::state::{GameState, Side};

/// Live match: state, bus, log.
pub struct MatchContext {
    match_id: [u8; 16],
    seed: u64,
    rules: RulesConfig,
    state: GameState,
    bus: EventBus<GameEvent>,
    catalog: Arc<dyn CardCatalog>,
    log: Option<MatchLog>,
}

impl MatchContext {
    /// Create an unstarted context. The seed is derived from the match id and
    /// both player ids; handlers see this match's events under
    /// `match:<hex id>:` on `bus`.
    pub fn new(
        match_id: [u8; 16],
        player_ids: [[u8; 16]; 2],
        rules: RulesConfig,
        catalog: Arc<dyn CardCatalog>,
        bus: &EventBus<GameEvent>,
    ) -> Self {
        let seed = derive_match_seed(&match_id, &player_ids);
        let bus = bus.namespace(&format!("match:{}", hex::encode(match_id)));
        Self {
            match_id,
            seed,
            state: GameState::new(match_id, seed, rules.clone(), Side::A),
            rules,
            bus,
            catalog,
            log: None,
        }
    }

    /// Match id.
    pub fn match_id(&self) -> [u8; 16] {
        self.match_id
    }

    /// Current state.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// This match's bus view.
    pub fn bus(&self) -> &EventBus<GameEvent> {
        &self.bus
    }

    /// Log of everything accepted so far.
    pub fn log(&self) -> Option<&MatchLog> {
        self.log.as_ref()
    }

    /// Whether `start` has succeeded.
    pub fn is_started(&self) -> bool {
        self.log.is_some()
    }

    /// Current state hash.
    pub fn state_hash(&self) -> StateHash {
        self.state.compute_hash()
    }

    /// Current state hash, hex.
    pub fn state_hash_hex(&self) -> String {
        hash_to_hex(&self.state_hash())
    }

    /// Deal from both manifests and start the first turn. Restarting resets
    /// the state (used for rematches).
    pub fn start(&mut self, manifests: [DeckManifest; 2], first_side: Option<Side>) -> Result<ActionOutcome, ActionError> {
        let mut state = GameState::new(self.match_id, self.seed, self.rules.clone(), Side::A);
        let [a, b] = &manifests;
        let outcome = initialize_match(&mut state, self.catalog.as_ref(), [a, b], first_side)?;

        self.state = state;
        self.log = Some(MatchLog::new(self.match_id, self.seed, self.rules.clone(), first_side, manifests));
        info!(
            match_id = %hex::encode(self.match_id),
            first = ?self.state.first_side,
            "Match started"
        );
        self.publish(&outcome.events);
        Ok(outcome)
    }

    /// Validate and resolve one action.
    pub fn apply(&mut self, side: Side, action: &Action) -> Result<ActionOutcome, ActionError> {
        let Some(log) = self.log.as_mut() else {
            return Err(ActionError::MatchNotStarted);
        };
        let outcome = process_action(&mut self.state, side, action)?;
        log.record_action(side, action.clone());
        if outcome.game_over.is_some() {
            log.seal(&self.state.compute_hash());
        }
        debug!(side = ?side, action = action.kind(), events = outcome.events.len(), "Applied");
        self.publish(&outcome.events);
        Ok(outcome)
    }

    /// Impose a result (timeout forfeit, abandonment).
    pub fn impose_result(&mut self, winner: Side, reason: GameOverReason) -> Result<ActionOutcome, ActionError> {
        let Some(log) = self.log.as_mut() else {
            return Err(ActionError::MatchNotStarted);
        };
        if self.state.is_over() {
            return Err(ActionError::GameOver);
        }
        self.state.declare_winner(winner, reason);
        log.record_verdict(winner, reason);
        log.seal(&self.state.compute_hash());
        let events = self.state.take_events();
        let outcome = ActionOutcome {
            animation: crate::game::animation::build_sequence(&events),
            events,
            game_over: self.state.game_over,
        };
        self.publish(&outcome.events);
        Ok(outcome)
    }

    fn publish(&self, events: &[GameEvent]) {
        for event in events {
            self.bus.emit(event.name(), event.clone());
        }
    }
}
