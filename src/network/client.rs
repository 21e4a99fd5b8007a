//! Peer Client
//!
//! The peer half of the protocol: connects to the authority, says hello,
//! keeps the clock estimate fresh with pings, plays resolved actions at their
//! scheduled instant through an [`Animator`] and keeps a [`Mirror`] of the
//! authoritative state. When the connection drops it retries with bounded
//! backoff and resumes the match with `rejoin`.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, instrument, warn};

use crate::core::clock::SharedClock;
use crate::game::action::{Action, DeckManifest};
use crate::game::events::GameOverReason;
use crate::game::state::Side;
use crate::network::protocol::{ClientMessage, PlayerId, ResolvedAction, ServerMessage};
use crate::sync::backoff::{Backoff, ReconnectPolicy};
use crate::sync::clock::ClockSync;
use crate::sync::mirror::Mirror;
use crate::sync::playback::{perform, plan, Animator};
use crate::sync::schedule::{decide, PlaybackDecision, ScheduleConfig};

/// Peer configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Authority WebSocket URL.
    pub url: String,
    /// Our player id.
    pub player_id: PlayerId,
    /// Bearer token, empty when the authority runs open.
    pub token: String,
    /// Reported in hello.
    pub client_version: String,
    /// Clock sample period.
    pub ping_interval: Duration,
    /// Playback thresholds.
    pub schedule: ScheduleConfig,
    /// Reconnect policy.
    pub reconnect: ReconnectPolicy,
    /// Buffered out-of-order actions before asking for a snapshot.
    pub max_pending: usize,
}

impl ClientConfig {
    /// Defaults for a given authority and player.
    pub fn new(url: impl Into<String>, player_id: PlayerId) -> Self {
        Self {
            url: url.into(),
            player_id,
            token: String::new(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            ping_interval: Duration::from_secs(2),
            schedule: ScheduleConfig::default(),
            reconnect: ReconnectPolicy::default(),
            max_pending: 32,
        }
    }
}

/// Requests from the embedding application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    /// Queue for a match.
    FindMatch(DeckManifest),
    /// Leave the queue.
    CancelFind,
    /// Submit an action in the current match.
    Action {
        /// The action.
        action: Action,
        /// Deck manifest, on the first action of a match.
        manifest: Option<DeckManifest>,
    },
    /// Ask for a rematch.
    RematchRequest,
    /// Accept a rematch.
    RematchAccept,
    /// Leave the current match.
    Leave,
    /// Close the connection and stop.
    Close,
}

/// Notifications to the embedding application.
#[derive(Clone, Debug, PartialEq)]
pub enum PeerEvent {
    /// Hello accepted.
    Welcomed,
    /// Paired.
    MatchFound {
        /// Match id.
        match_id: String,
        /// Our side.
        side: Side,
    },
    /// The mirror advanced.
    StateUpdated {
        /// Sequence number.
        seq: u64,
        /// Committed state hash.
        state_hash: String,
        /// Side to act.
        active: Side,
        /// Whether the action was animated.
        animated: bool,
    },
    /// Our action was refused.
    Rejected {
        /// Stable code.
        code: String,
        /// Message.
        error: String,
    },
    /// The mirror diverged; a snapshot was requested.
    Desynced {
        /// Offending sequence number.
        seq: u64,
    },
    /// The game was decided.
    GameEnded {
        /// Winner.
        winner: Side,
        /// Reason.
        reason: GameOverReason,
        /// Whether we won.
        you_won: bool,
    },
    /// Any other authority message worth surfacing.
    Notice(ServerMessage),
    /// Connection lost; retrying.
    Disconnected {
        /// Retry attempt number.
        attempt: u32,
    },
}

/// Peer errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// WebSocket failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// Encoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Gave up reconnecting.
    #[error("Reconnect attempts exhausted after {attempts}")]
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
}

enum ConnectionEnd {
    Closed,
    Lost,
}

/// The peer.
pub struct PeerClient<A: Animator> {
    config: ClientConfig,
    animator: A,
    clock: SharedClock,
    sync: ClockSync,
    mirror: Mirror,
    match_id: Option<String>,
    events: mpsc::Sender<PeerEvent>,
}

impl<A: Animator> PeerClient<A> {
    /// Create a peer. Notifications go to `events`.
    pub fn new(config: ClientConfig, animator: A, clock: SharedClock, events: mpsc::Sender<PeerEvent>) -> Self {
        Self {
            config,
            animator,
            clock,
            sync: ClockSync::new(),
            mirror: Mirror::new(),
            match_id: None,
            events,
        }
    }

    /// State mirror.
    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    /// Clock estimate.
    pub fn clock_sync(&self) -> &ClockSync {
        &self.sync
    }

    /// Current match, if any.
    pub fn match_id(&self) -> Option<&str> {
        self.match_id.as_deref()
    }

    /// Renderer.
    pub fn animator(&self) -> &A {
        &self.animator
    }

    async fn emit(&self, event: PeerEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }

    fn hello(&self) -> ClientMessage {
        ClientMessage::Hello {
            player_id: self.config.player_id.to_uuid_string(),
            token: self.config.token.clone(),
            client_version: self.config.client_version.clone(),
        }
    }

    fn ping(&self) -> ClientMessage {
        ClientMessage::Ping { client_time: self.clock.now_ms(), rtt_ms: self.sync.rtt_ms() }
    }

    fn rejoin(&self) -> Option<ClientMessage> {
        self.match_id.clone().map(|match_id| ClientMessage::Rejoin { match_id })
    }

    /// Translate an application command. `None` when it needs a match and
    /// there is none.
    pub fn outgoing(&self, command: ClientCommand) -> Option<ClientMessage> {
        let msg = match command {
            ClientCommand::FindMatch(manifest) => ClientMessage::FindMatch { manifest },
            ClientCommand::CancelFind => ClientMessage::CancelFind,
            ClientCommand::Action { action, manifest } => ClientMessage::Action {
                match_id: self.match_id.clone()?,
                player_id: self.config.player_id.to_uuid_string(),
                action,
                manifest,
            },
            ClientCommand::RematchRequest => ClientMessage::RematchRequest,
            ClientCommand::RematchAccept => ClientMessage::RematchAccept,
            ClientCommand::Leave => ClientMessage::Leave,
            ClientCommand::Close => return None,
        };
        Some(msg)
    }

    /// Handle one authority message. Returns messages to send back.
    pub async fn handle_message(&mut self, msg: ServerMessage) -> Vec<ClientMessage> {
        match msg {
            ServerMessage::Welcome { .. } => {
                self.emit(PeerEvent::Welcomed).await;
                self.rejoin().into_iter().collect()
            }
            ServerMessage::Pong { client_time, server_time } => {
                let offset = self.sync.record_pong(client_time, server_time, self.clock.now_ms());
                debug!(offset, median = self.sync.offset_ms(), "Clock sample");
                Vec::new()
            }
            ServerMessage::MatchFound { match_id, side, .. } => {
                self.mirror.reset();
                self.mirror.set_side(side);
                self.match_id = Some(match_id.clone());
                info!(match_id = %match_id, side = ?side, "Match found");
                self.emit(PeerEvent::MatchFound { match_id, side }).await;
                Vec::new()
            }
            ServerMessage::Resolved(resolved) => {
                let ready = self.mirror.push(resolved);
                let mut replies = self.play_all(ready).await;
                if replies.is_empty() && self.mirror.pending_len() > self.config.max_pending {
                    warn!(pending = self.mirror.pending_len(), "Gap not closing; requesting snapshot");
                    replies.extend(self.rejoin());
                }
                replies
            }
            ServerMessage::Sync(snapshot) => {
                self.match_id = Some(snapshot.match_id.clone());
                match self.mirror.apply_snapshot(&snapshot) {
                    Ok(ready) => {
                        self.emit_state(snapshot.seq, false).await;
                        self.play_all(ready).await
                    }
                    Err(e) => {
                        warn!("Snapshot rejected: {}", e);
                        self.emit(PeerEvent::Desynced { seq: snapshot.seq }).await;
                        Vec::new()
                    }
                }
            }
            ServerMessage::ActionError { error, code } => {
                self.emit(PeerEvent::Rejected { code, error }).await;
                Vec::new()
            }
            ServerMessage::GameEnd { winner, reason, you_won } => {
                self.emit(PeerEvent::GameEnded { winner, reason, you_won }).await;
                Vec::new()
            }
            end @ ServerMessage::MatchEnd { .. } => {
                self.match_id = None;
                self.emit(PeerEvent::Notice(end)).await;
                Vec::new()
            }
            other => {
                self.emit(PeerEvent::Notice(other)).await;
                Vec::new()
            }
        }
    }

    async fn emit_state(&self, seq: u64, animated: bool) {
        if let (Some(state), Some(hash)) = (self.mirror.state(), self.mirror.state_hash()) {
            let event = PeerEvent::StateUpdated {
                seq,
                state_hash: hash.to_string(),
                active: state.active,
                animated,
            };
            self.emit(event).await;
        }
    }

    async fn play_all(&mut self, ready: Vec<ResolvedAction>) -> Vec<ClientMessage> {
        for resolved in ready {
            let decision = decide(
                &self.config.schedule,
                &self.sync,
                resolved.start_at_server_ms,
                self.clock.now_ms(),
            );
            let animated = !matches!(decision, PlaybackDecision::Skip { .. });
            let steps = plan(&resolved.animation_sequence, decision);

            let mirror = &mut self.mirror;
            let mut committed = Ok(());
            perform(&steps, &mut self.animator, || committed = mirror.commit(&resolved)).await;

            if let Err(e) = committed {
                warn!("Desync: {}", e);
                self.emit(PeerEvent::Desynced { seq: resolved.seq }).await;
                return self.rejoin().into_iter().collect();
            }
            self.emit_state(resolved.seq, animated).await;
        }
        Vec::new()
    }

    /// Connect and run until closed or reconnects run out.
    #[instrument(skip_all, fields(player = %self.config.player_id.to_uuid_string()))]
    pub async fn run(&mut self, mut commands: mpsc::Receiver<ClientCommand>) -> Result<(), ClientError> {
        let mut backoff = Backoff::new(self.config.reconnect.clone());
        loop {
            match self.run_connection(&mut commands, &mut backoff).await {
                Ok(ConnectionEnd::Closed) => return Ok(()),
                Ok(ConnectionEnd::Lost) => {}
                Err(e) => warn!("Connection failed: {}", e),
            }
            let Some(delay) = backoff.next_delay() else {
                return Err(ClientError::ReconnectExhausted { attempts: backoff.attempts() });
            };
            self.emit(PeerEvent::Disconnected { attempt: backoff.attempts() }).await;
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_connection(
        &mut self,
        commands: &mut mpsc::Receiver<ClientCommand>,
        backoff: &mut Backoff,
    ) -> Result<ConnectionEnd, ClientError> {
        let (ws_stream, _) = connect_async(self.config.url.as_str()).await?;
        backoff.reset();
        info!(url = %self.config.url, "Connected");

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(64);
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let _ = out_tx.send(self.hello()).await;
        let mut ticker = interval(self.config.ping_interval);

        let end = loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let msg = match ServerMessage::from_json(&text) {
                                Ok(m) => m,
                                Err(e) => {
                                    debug!("Unparseable message: {}", e);
                                    continue;
                                }
                            };
                            for reply in self.handle_message(msg).await {
                                let _ = out_tx.send(reply).await;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break ConnectionEnd::Lost,
                        Some(Err(e)) => {
                            warn!("WebSocket error: {}", e);
                            break ConnectionEnd::Lost;
                        }
                        _ => {}
                    }
                }
                _ = ticker.tick() => {
                    let _ = out_tx.send(self.ping()).await;
                }
                command = commands.recv() => {
                    match command {
                        None | Some(ClientCommand::Close) => break ConnectionEnd::Closed,
                        Some(command) => match self.outgoing(command) {
                            Some(msg) => {
                                let _ = out_tx.send(msg).await;
                            }
                            None => {
                                self.emit(PeerEvent::Rejected {
                                    code: "MATCH_NOT_STARTED".into(),
                                    error: "no current match".into(),
                                })
                                .await;
                            }
                        },
                    }
                }
            }
        };

        drop(out_tx);
        let _ = writer.await;
        Ok(end)
    }
}
