//! Match Session Management
//!
//! A session owns one live match: the two seats, the match context, the
//! broadcast sequence counter, the turn timer and the reconnect window.
//! Every mutation goes through `&mut MatchSession`, so a match has exactly
//! one writer and its actions resolve strictly in order.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::core::clock::SharedClock;
use crate::core::config::RulesConfig;
use crate::core::hash::hash_to_hex;
use crate::game::action::{Action, ActionError, ActionOutcome, DeckManifest};
use crate::game::bus::EventBus;
use crate::game::card::CardCatalog;
use crate::game::context::MatchContext;
use crate::game::events::{GameEvent, GameOverReason};
use crate::game::state::Side;
use crate::network::protocol::{
    match_id_string, MatchId, PlayerId, ResolvedAction, ServerMessage, SyncSnapshot,
};

/// Session identifier (same as the match id).
pub type SessionId = MatchId;

/// Session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Paired, waiting for both deck manifests.
    AwaitingManifests,
    /// Game in progress.
    Playing,
    /// Game decided; rematch possible.
    Finished,
    /// Done, ready for removal.
    Closed,
}

/// Seat connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected.
    Connected,
    /// Dropped at `since_ms`; may rejoin within the grace window.
    Disconnected {
        /// Authority time of the drop.
        since_ms: u64,
    },
    /// Left for good.
    Left,
}

/// Session configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Time a side has to finish its turn.
    pub turn_time_limit: Duration,
    /// Timeouts a side may accumulate before forfeiting.
    pub max_timeouts: u32,
    /// How long a dropped seat is held.
    pub reconnect_grace: Duration,
    /// Lower bound on the playback lead time.
    pub min_lead: Duration,
    /// Upper bound on the playback lead time.
    pub max_lead: Duration,
    /// Added on top of half the worst RTT.
    pub lead_margin: Duration,
    /// Timer loop period.
    pub timer_interval: Duration,
    /// How long a finished session waits for a rematch.
    pub rematch_window: Duration,
    /// Gameplay constants.
    pub rules: RulesConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            turn_time_limit: Duration::from_secs(60),
            max_timeouts: 3,
            reconnect_grace: Duration::from_secs(30),
            min_lead: Duration::from_millis(100),
            max_lead: Duration::from_millis(1000),
            lead_margin: Duration::from_millis(50),
            timer_interval: Duration::from_secs(1),
            rematch_window: Duration::from_secs(60),
            rules: RulesConfig::default(),
        }
    }
}

/// One seat.
#[derive(Debug)]
pub struct SessionPlayer {
    /// Player id.
    pub player_id: PlayerId,
    /// Side this seat plays.
    pub side: Side,
    /// Connection state.
    pub connection: ConnectionState,
    /// Outbound channel while connected.
    pub sender: Option<mpsc::Sender<ServerMessage>>,
    /// Last reported RTT.
    pub rtt_ms: u64,
    /// Turn timeouts so far this game.
    pub timeouts: u32,
    /// Asked for a rematch.
    pub wants_rematch: bool,
}

impl SessionPlayer {
    fn new(player_id: PlayerId, side: Side, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            player_id,
            side,
            connection: ConnectionState::Connected,
            sender: Some(sender),
            rtt_ms: 0,
            timeouts: 0,
            wants_rematch: false,
        }
    }

    /// Whether the seat is connected.
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Player is not seated in this match.
    #[error("Player not in match")]
    NotInMatch,
    /// No such match.
    #[error("Match not found")]
    MatchNotFound,
    /// Player is already waiting for an opponent.
    #[error("Already queued")]
    AlreadyQueued,
    /// Player is already seated somewhere.
    #[error("Already in a match")]
    AlreadyInMatch,
    /// A manifest is still missing.
    #[error("Deck manifest missing")]
    MissingManifest,
    /// The rules refused the action.
    #[error("Action rejected: {0}")]
    Rejected(#[from] ActionError),
    /// The grace window elapsed or the seat was given up.
    #[error("Reconnect window expired")]
    ReconnectExpired,
    /// Rematches need a finished game.
    #[error("Game not finished")]
    NotFinished,
    /// Accept without a pending request.
    #[error("No rematch pending")]
    NoRematchPending,
    /// Session is closed.
    #[error("Session closed")]
    Closed,
}

/// A match session.
pub struct MatchSession {
    /// Session/match id.
    pub id: SessionId,
    /// Configuration.
    pub config: SessionConfig,
    state: SessionState,
    context: MatchContext,
    players: [SessionPlayer; 2],
    manifests: [Option<DeckManifest>; 2],
    seq: u64,
    turn_marker: Option<(Side, u32)>,
    turn_started_ms: u64,
    finished_at_ms: Option<u64>,
    clock: SharedClock,
}

impl MatchSession {
    /// Seat two players. The first seat plays side A.
    pub fn new(
        id: SessionId,
        seats: [(PlayerId, mpsc::Sender<ServerMessage>); 2],
        config: SessionConfig,
        catalog: Arc<dyn CardCatalog>,
        bus: &EventBus<GameEvent>,
        clock: SharedClock,
    ) -> Self {
        let [(a_id, a_tx), (b_id, b_tx)] = seats;
        let context = MatchContext::new(
            id,
            [*a_id.as_bytes(), *b_id.as_bytes()],
            config.rules.clone(),
            catalog,
            bus,
        );
        Self {
            id,
            config,
            state: SessionState::AwaitingManifests,
            context,
            players: [
                SessionPlayer::new(a_id, Side::A, a_tx),
                SessionPlayer::new(b_id, Side::B, b_tx),
            ],
            manifests: [None, None],
            seq: 0,
            turn_marker: None,
            turn_started_ms: 0,
            finished_at_ms: None,
            clock,
        }
    }

    /// Current lifecycle state.
    pub fn get_state(&self) -> SessionState {
        self.state
    }

    /// Match context.
    pub fn context(&self) -> &MatchContext {
        &self.context
    }

    /// Last broadcast sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Seat for a side.
    pub fn player(&self, side: Side) -> &SessionPlayer {
        &self.players[side.index()]
    }

    /// Side a player sits on.
    pub fn side_of(&self, player_id: &PlayerId) -> Option<Side> {
        self.players.iter().find(|p| p.player_id == *player_id).map(|p| p.side)
    }

    fn require_side(&self, player_id: &PlayerId) -> Result<Side, SessionError> {
        self.side_of(player_id).ok_or(SessionError::NotInMatch)
    }

    /// Record the RTT a peer reported in its ping.
    pub fn record_rtt(&mut self, player_id: &PlayerId, rtt_ms: u64) {
        if let Some(side) = self.side_of(player_id) {
            self.players[side.index()].rtt_ms = rtt_ms;
        }
    }

    /// Playback lead: half the worst connected RTT plus margin, clamped.
    pub fn lead_time_ms(&self) -> u64 {
        let worst = self
            .players
            .iter()
            .filter(|p| p.is_connected())
            .map(|p| p.rtt_ms)
            .max()
            .unwrap_or(0);
        let lead = worst / 2 + self.config.lead_margin.as_millis() as u64;
        lead.clamp(
            self.config.min_lead.as_millis() as u64,
            self.config.max_lead.as_millis() as u64,
        )
    }

    /// Store a side's manifest. Returns true once both are present.
    pub fn submit_manifest(&mut self, side: Side, manifest: DeckManifest) -> bool {
        self.manifests[side.index()] = Some(manifest);
        self.manifests.iter().all(Option::is_some)
    }

    fn manifest_pair(&self) -> Result<[DeckManifest; 2], SessionError> {
        match &self.manifests {
            [Some(a), Some(b)] => Ok([a.clone(), b.clone()]),
            _ => Err(SessionError::MissingManifest),
        }
    }

    /// Deal and start the game. `actor` is the side whose join completed
    /// the pairing.
    pub async fn begin(&mut self, actor: Side) -> Result<(), SessionError> {
        if self.state != SessionState::AwaitingManifests {
            return Err(SessionError::Rejected(ActionError::GameOver));
        }
        let manifests = self.manifest_pair()?;
        let outcome = self.context.start(manifests, None)?;
        self.state = SessionState::Playing;
        info!(match_id = %match_id_string(&self.id), "Session playing");
        self.publish(actor, Action::Join, outcome);
        Ok(())
    }

    /// Handle an intent from a seated player.
    ///
    /// Refusals are reported to the submitter as `actionError` and returned.
    pub async fn handle_action(
        &mut self,
        player_id: &PlayerId,
        action: Action,
        manifest: Option<DeckManifest>,
    ) -> Result<u64, SessionError> {
        let side = self.require_side(player_id)?;

        if self.state == SessionState::AwaitingManifests {
            let ready = match manifest {
                Some(m) => self.submit_manifest(side, m),
                None => self.manifests.iter().all(Option::is_some),
            };
            if !ready {
                if action == Action::Join {
                    return Ok(self.seq);
                }
                return self.reject(side, ActionError::MatchNotStarted);
            }
            self.begin(side).await?;
            if action == Action::Join {
                return Ok(self.seq);
            }
        }

        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }

        match self.context.apply(side, &action) {
            Ok(outcome) => {
                debug!(side = ?side, action = action.kind(), "Action accepted");
                self.publish(side, action, outcome);
                Ok(self.seq)
            }
            Err(e) => self.reject(side, e),
        }
    }

    fn reject(&mut self, side: Side, error: ActionError) -> Result<u64, SessionError> {
        debug!(side = ?side, code = error.code(), "Action rejected");
        self.send_to(side, ServerMessage::ActionError {
            error: error.to_string(),
            code: error.code().to_string(),
        });
        Err(SessionError::Rejected(error))
    }

    fn publish(&mut self, actor: Side, action: Action, outcome: ActionOutcome) {
        self.seq += 1;
        let now = self.clock.now_ms();
        let start_at = now + self.lead_time_ms();
        let state_hash = self.context.state_hash_hex();
        let match_id = match_id_string(&self.id);

        for side in Side::ALL {
            let view = self.context.state().view_for(side);
            let msg = ServerMessage::Resolved(ResolvedAction {
                match_id: match_id.clone(),
                seq: self.seq,
                actor,
                action: action.clone(),
                events: outcome.events.clone(),
                animation_sequence: outcome.animation.clone(),
                view_hash: hash_to_hex(&view.compute_hash()),
                state: view,
                state_hash: state_hash.clone(),
                is_my_action: side == actor,
                start_at_server_ms: start_at,
                server_time: now,
            });
            self.send_to(side, msg);
        }

        self.sync_turn_timer(now);
        if let Some(over) = outcome.game_over {
            self.finish(over.winner, over.reason);
        }
    }

    /// Broadcast an imposed result as a fresh snapshot.
    fn publish_verdict(&mut self, outcome: ActionOutcome) {
        self.seq += 1;
        for side in Side::ALL {
            let snapshot = self.snapshot_for(side);
            self.send_to(side, ServerMessage::Sync(snapshot));
        }
        if let Some(over) = outcome.game_over {
            self.finish(over.winner, over.reason);
        }
    }

    fn finish(&mut self, winner: Side, reason: GameOverReason) {
        self.state = SessionState::Finished;
        self.finished_at_ms = Some(self.clock.now_ms());
        info!(
            match_id = %match_id_string(&self.id),
            winner = ?winner,
            reason = ?reason,
            "Game decided"
        );
        for side in Side::ALL {
            self.send_to(side, ServerMessage::GameEnd {
                winner,
                reason,
                you_won: side == winner,
            });
        }
    }

    /// Close the session and tell whoever is still connected.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        let msg = ServerMessage::MatchEnd {
            match_id: match_id_string(&self.id),
            final_state_hash: self.context.state_hash_hex(),
        };
        self.broadcast(msg);
        info!(match_id = %match_id_string(&self.id), "Session closed");
    }

    fn sync_turn_timer(&mut self, now: u64) {
        let state = self.context.state();
        let marker = (state.active, state.turn);
        if self.turn_marker != Some(marker) {
            self.turn_marker = Some(marker);
            self.turn_started_ms = now;
        }
    }

    /// Milliseconds left on the active side's clock.
    pub fn turn_remaining_ms(&self) -> u64 {
        let limit = self.config.turn_time_limit.as_millis() as u64;
        let elapsed = self.clock.now_ms().saturating_sub(self.turn_started_ms);
        limit.saturating_sub(elapsed)
    }

    /// Run the turn clock. On expiry the active side's turn is ended for it;
    /// the timeout that reaches the limit forfeits. Returns true on expiry.
    pub async fn check_turn_timer(&mut self) -> Result<bool, SessionError> {
        if self.state != SessionState::Playing {
            return Ok(false);
        }
        let active = self.context.state().active;
        let remaining = self.turn_remaining_ms();
        if remaining > 0 {
            let timeouts = self.players[active.index()].timeouts;
            self.broadcast(ServerMessage::TurnTimer {
                side: active,
                remaining_ms: remaining,
                timeouts,
            });
            return Ok(false);
        }

        let seat = &mut self.players[active.index()];
        seat.timeouts += 1;
        let timeouts = seat.timeouts;
        warn!(side = ?active, timeouts, "Turn timed out");

        if timeouts >= self.config.max_timeouts {
            let outcome = self.context.impose_result(active.opponent(), GameOverReason::Timeout)?;
            self.publish_verdict(outcome);
        } else {
            let outcome = self.context.apply(active, &Action::EndTurn)?;
            self.publish(active, Action::EndTurn, outcome);
        }
        Ok(true)
    }

    /// Drop a seat's connection and start its grace window.
    ///
    /// `connection` is the channel of the socket that went away. Once the
    /// seat has been resumed on another socket the old one no longer owns
    /// it, and its disconnect is ignored.
    pub async fn mark_disconnected(
        &mut self,
        player_id: &PlayerId,
        connection: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), SessionError> {
        let side = self.require_side(player_id)?;
        match &self.players[side.index()].sender {
            Some(current) if current.same_channel(connection) => {}
            Some(_) => {
                debug!(side = ?side, "Ignoring disconnect from a replaced connection");
                return Ok(());
            }
            None => return Ok(()),
        }
        info!(side = ?side, "Player disconnected");
        self.drop_connection(side);
        Ok(())
    }

    /// Whether a seat may be resumed.
    pub fn can_reconnect(&self, player_id: &PlayerId) -> bool {
        let Some(side) = self.side_of(player_id) else {
            return false;
        };
        if self.state == SessionState::Closed {
            return false;
        }
        match self.players[side.index()].connection {
            ConnectionState::Connected => true,
            ConnectionState::Disconnected { since_ms } => {
                let grace = self.config.reconnect_grace.as_millis() as u64;
                self.clock.now_ms().saturating_sub(since_ms) <= grace
            }
            ConnectionState::Left => false,
        }
    }

    /// Resume a seat on a new connection and send it the current snapshot.
    pub async fn reconnect_player(
        &mut self,
        player_id: &PlayerId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<SyncSnapshot, SessionError> {
        if !self.can_reconnect(player_id) {
            return Err(SessionError::ReconnectExpired);
        }
        let side = self.require_side(player_id)?;
        let seat = &mut self.players[side.index()];
        let was_away = !seat.is_connected();
        seat.connection = ConnectionState::Connected;
        seat.sender = Some(sender);

        let snapshot = self.snapshot_for(side);
        self.send_to(side, ServerMessage::Sync(snapshot.clone()));
        if was_away {
            info!(side = ?side, "Player reconnected");
            self.send_to(side.opponent(), ServerMessage::OpponentReconnected);
        }
        Ok(snapshot)
    }

    /// Settle seats whose grace window ran out. Returns true if anything
    /// changed.
    pub async fn check_reconnect_timeouts(&mut self) -> Result<bool, SessionError> {
        let now = self.clock.now_ms();
        let grace = self.config.reconnect_grace.as_millis() as u64;
        let expired: Vec<Side> = self
            .players
            .iter()
            .filter(|p| match p.connection {
                ConnectionState::Disconnected { since_ms } => now.saturating_sub(since_ms) > grace,
                _ => false,
            })
            .map(|p| p.side)
            .collect();

        if expired.is_empty() {
            return Ok(false);
        }

        for side in &expired {
            self.players[side.index()].connection = ConnectionState::Left;
            warn!(side = ?side, "Reconnect window expired");
        }

        if self.state == SessionState::Playing && expired.len() == 1 {
            let loser = expired[0];
            let outcome = self.context.impose_result(loser.opponent(), GameOverReason::Abandoned)?;
            self.publish_verdict(outcome);
        }

        if self.state != SessionState::Finished || !self.players.iter().any(SessionPlayer::is_connected) {
            self.close().await;
        }
        Ok(true)
    }

    /// Leave the match. An unfinished game is forfeited; the session closes.
    pub async fn leave(&mut self, player_id: &PlayerId) -> Result<(), SessionError> {
        let side = self.require_side(player_id)?;
        if self.state == SessionState::Playing {
            let outcome = self.context.impose_result(side.opponent(), GameOverReason::Forfeit)?;
            self.publish_verdict(outcome);
        }
        let seat = &mut self.players[side.index()];
        seat.connection = ConnectionState::Left;
        seat.sender = None;
        self.send_to(side.opponent(), ServerMessage::OpponentLeft);
        self.close().await;
        Ok(())
    }

    /// Ask for a rematch. Starts it when the opponent already asked.
    pub async fn request_rematch(&mut self, player_id: &PlayerId) -> Result<(), SessionError> {
        let side = self.require_side(player_id)?;
        if self.state != SessionState::Finished {
            return Err(SessionError::NotFinished);
        }
        self.players[side.index()].wants_rematch = true;
        if self.players[side.opponent().index()].wants_rematch {
            return self.start_rematch(side).await;
        }
        self.send_to(side.opponent(), ServerMessage::RematchRequested);
        Ok(())
    }

    /// Accept the opponent's pending rematch request.
    pub async fn accept_rematch(&mut self, player_id: &PlayerId) -> Result<(), SessionError> {
        let side = self.require_side(player_id)?;
        if self.state != SessionState::Finished {
            return Err(SessionError::NotFinished);
        }
        if !self.players[side.opponent().index()].wants_rematch {
            return Err(SessionError::NoRematchPending);
        }
        self.players[side.index()].wants_rematch = true;
        self.start_rematch(side).await
    }

    async fn start_rematch(&mut self, actor: Side) -> Result<(), SessionError> {
        let first = self.context.state().first_side.opponent();
        let manifests = self.manifest_pair()?;
        let outcome = self.context.start(manifests, Some(first))?;

        for seat in &mut self.players {
            seat.timeouts = 0;
            seat.wants_rematch = false;
        }
        self.state = SessionState::Playing;
        self.finished_at_ms = None;
        self.turn_marker = None;
        info!(match_id = %match_id_string(&self.id), first = ?first, "Rematch starting");

        self.broadcast(ServerMessage::RematchStarting { match_id: match_id_string(&self.id) });
        self.publish(actor, Action::Join, outcome);
        Ok(())
    }

    /// Whether a finished game's rematch window has passed.
    pub fn rematch_window_elapsed(&self) -> bool {
        match self.finished_at_ms {
            Some(at) => {
                let window = self.config.rematch_window.as_millis() as u64;
                self.clock.now_ms().saturating_sub(at) > window
            }
            None => false,
        }
    }

    /// One timer step: turn clock, reconnect windows, rematch window.
    pub async fn tick(&mut self) -> Result<(), SessionError> {
        self.check_turn_timer().await?;
        self.check_reconnect_timeouts().await?;
        if self.state == SessionState::Finished && self.rematch_window_elapsed() {
            self.close().await;
        }
        Ok(())
    }

    /// Snapshot for a side, showing only what that side may see.
    pub fn snapshot_for(&self, side: Side) -> SyncSnapshot {
        let view = self.context.state().view_for(side);
        SyncSnapshot {
            match_id: match_id_string(&self.id),
            seq: self.seq,
            side,
            opponent_id: self.players[side.opponent().index()].player_id.to_uuid_string(),
            view_hash: hash_to_hex(&view.compute_hash()),
            state: view,
            state_hash: self.context.state_hash_hex(),
            server_time: self.clock.now_ms(),
        }
    }

    /// Queue a message for a seat without waiting. A seat whose channel is
    /// full or gone loses its connection and must rejoin for a snapshot.
    fn send_to(&mut self, side: Side, msg: ServerMessage) {
        let Some(sender) = &self.players[side.index()].sender else {
            return;
        };
        match sender.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(side = ?side, "Outbound queue full; dropping connection");
                self.drop_connection(side);
            }
            Err(TrySendError::Closed(_)) => {
                debug!(side = ?side, "Outbound channel closed");
                self.drop_connection(side);
            }
        }
    }

    fn drop_connection(&mut self, side: Side) {
        let now = self.clock.now_ms();
        let seat = &mut self.players[side.index()];
        seat.sender = None;
        if seat.connection != ConnectionState::Connected {
            return;
        }
        seat.connection = ConnectionState::Disconnected { since_ms: now };
        if matches!(self.state, SessionState::Playing | SessionState::AwaitingManifests) {
            let grace_ms = self.config.reconnect_grace.as_millis() as u64;
            if let Some(opponent) = &self.players[side.opponent().index()].sender {
                let _ = opponent.try_send(ServerMessage::OpponentDisconnected { grace_ms });
            }
        }
    }

    /// Send to every connected seat.
    pub fn broadcast(&mut self, msg: ServerMessage) {
        for side in Side::ALL {
            self.send_to(side, msg.clone());
        }
    }
}

/// Matchmaking queue entry.
struct QueueEntry {
    player_id: PlayerId,
    manifest: DeckManifest,
    sender: mpsc::Sender<ServerMessage>,
}

/// Owns every live session and the matchmaking queue.
pub struct SessionManager {
    sessions: RwLock<BTreeMap<SessionId, Arc<RwLock<MatchSession>>>>,
    player_sessions: RwLock<BTreeMap<PlayerId, SessionId>>,
    queue: RwLock<VecDeque<QueueEntry>>,
    config: SessionConfig,
    catalog: Arc<dyn CardCatalog>,
    bus: EventBus<GameEvent>,
    clock: SharedClock,
}

impl SessionManager {
    /// Create a new session manager.
    pub fn new(config: SessionConfig, catalog: Arc<dyn CardCatalog>, clock: SharedClock) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            player_sessions: RwLock::new(BTreeMap::new()),
            queue: RwLock::new(VecDeque::new()),
            config,
            bus: EventBus::with_clock(clock.clone()),
            catalog,
            clock,
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Process-wide bus; each match publishes under its own namespace.
    pub fn bus(&self) -> &EventBus<GameEvent> {
        &self.bus
    }

    /// Create a session for two players. Starts the game right away when
    /// both manifests are known.
    pub async fn create_session(
        &self,
        seats: [(PlayerId, mpsc::Sender<ServerMessage>, Option<DeckManifest>); 2],
    ) -> Result<SessionId, SessionError> {
        let id = *uuid::Uuid::new_v4().as_bytes();
        let [(a, a_tx, a_manifest), (b, b_tx, b_manifest)] = seats;

        let mut session = MatchSession::new(
            id,
            [(a, a_tx), (b, b_tx)],
            self.config.clone(),
            Arc::clone(&self.catalog),
            &self.bus,
            self.clock.clone(),
        );

        let turn_seconds = self.config.turn_time_limit.as_secs() as u32;
        for side in Side::ALL {
            let opponent = session.player(side.opponent()).player_id;
            session
                .send_to(side, ServerMessage::MatchFound {
                    match_id: match_id_string(&id),
                    side,
                    opponent_id: opponent.to_uuid_string(),
                    turn_seconds,
                });
        }

        let mut ready = false;
        if let Some(m) = a_manifest {
            ready = session.submit_manifest(Side::A, m);
        }
        if let Some(m) = b_manifest {
            ready = session.submit_manifest(Side::B, m);
        }
        if ready {
            session.begin(Side::B).await?;
        }

        self.sessions.write().await.insert(id, Arc::new(RwLock::new(session)));
        self.register_player(a, id).await;
        self.register_player(b, id).await;
        info!(match_id = %match_id_string(&id), "Created session");
        Ok(id)
    }

    /// Queue a player. Returns their 1-based queue position.
    pub async fn enqueue(
        &self,
        player_id: PlayerId,
        manifest: DeckManifest,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<usize, SessionError> {
        if self.player_sessions.read().await.contains_key(&player_id) {
            return Err(SessionError::AlreadyInMatch);
        }
        let mut queue = self.queue.write().await;
        if queue.iter().any(|e| e.player_id == player_id) {
            return Err(SessionError::AlreadyQueued);
        }
        queue.push_back(QueueEntry { player_id, manifest, sender });
        debug!(player = %player_id.to_uuid_string(), "Queued");
        Ok(queue.len())
    }

    /// Remove a player from the queue.
    pub async fn dequeue(&self, player_id: &PlayerId) -> bool {
        let mut queue = self.queue.write().await;
        let before = queue.len();
        queue.retain(|e| e.player_id != *player_id);
        queue.len() != before
    }

    /// Pair queued players in arrival order.
    pub async fn pair_queued(&self) -> Vec<SessionId> {
        let pairs = {
            let mut queue = self.queue.write().await;
            queue.retain(|e| !e.sender.is_closed());
            let mut pairs = Vec::new();
            while queue.len() >= 2 {
                if let (Some(a), Some(b)) = (queue.pop_front(), queue.pop_front()) {
                    pairs.push((a, b));
                }
            }
            pairs
        };

        let mut created = Vec::new();
        for (a, b) in pairs {
            let seats = [
                (a.player_id, a.sender, Some(a.manifest)),
                (b.player_id, b.sender, Some(b.manifest)),
            ];
            match self.create_session(seats).await {
                Ok(id) => created.push(id),
                Err(e) => warn!("Failed to create session: {}", e),
            }
        }
        created
    }

    /// Queue length.
    pub async fn queue_len(&self) -> usize {
        self.queue.read().await.len()
    }

    /// Get a session.
    pub async fn get_session(&self, id: &SessionId) -> Option<Arc<RwLock<MatchSession>>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Session a player is seated in.
    pub async fn get_player_session(&self, player_id: &PlayerId) -> Option<SessionId> {
        self.player_sessions.read().await.get(player_id).copied()
    }

    /// Register player to session.
    pub async fn register_player(&self, player_id: PlayerId, session_id: SessionId) {
        self.player_sessions.write().await.insert(player_id, session_id);
    }

    /// Unregister player.
    pub async fn unregister_player(&self, player_id: &PlayerId) {
        self.player_sessions.write().await.remove(player_id);
    }

    /// Remove session and its player registrations.
    pub async fn remove_session(&self, id: &SessionId) {
        self.sessions.write().await.remove(id);
        self.player_sessions.write().await.retain(|_, sid| sid != id);
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove closed sessions.
    pub async fn cleanup(&self) {
        let sessions: Vec<_> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (*id, Arc::clone(s)))
            .collect();

        for (id, session) in sessions {
            if session.read().await.get_state() == SessionState::Closed {
                self.remove_session(&id).await;
            }
        }
    }
}
