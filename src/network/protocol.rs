//! Protocol Messages
//!
//! Wire format between peers and the authority over WebSocket. Every message
//! is a JSON text frame tagged by `type`; field names are camelCase. Match
//! and player ids travel as UUID strings.

use serde::{Serialize, Deserialize};

use crate::game::action::{Action, DeckManifest};
use crate::game::animation::AnimationCommand;
use crate::game::events::{GameEvent, GameOverReason};
use crate::game::state::{GameState, Side};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Player identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(pub [u8; 16]);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Random id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().into_bytes())
    }

    /// Parse a UUID string (hyphenated or simple hex).
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(|u| Self(*u.as_bytes()))
    }

    /// UUID string form.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Match identifier (raw UUID bytes).
pub type MatchId = [u8; 16];

/// UUID string form of a match id.
pub fn match_id_string(id: &MatchId) -> String {
    uuid::Uuid::from_bytes(*id).to_string()
}

/// Parse a match id.
pub fn parse_match_id(s: &str) -> Option<MatchId> {
    uuid::Uuid::parse_str(s).ok().map(|u| *u.as_bytes())
}

// =============================================================================
// PEER -> AUTHORITY MESSAGES
// =============================================================================

/// Messages sent from a peer to the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Identify (and authenticate when tokens are required).
    Hello {
        /// UUID string.
        player_id: String,
        /// Bearer token; ignored when authentication is disabled.
        #[serde(default)]
        token: String,
        /// Client build.
        client_version: String,
    },

    /// Enter the matchmaking queue with a deck.
    FindMatch { manifest: DeckManifest },

    /// Leave the matchmaking queue.
    CancelFind,

    /// Submit an intent. The first action of a match may carry the manifest.
    Action {
        match_id: String,
        player_id: String,
        action: Action,
        #[serde(default)]
        manifest: Option<DeckManifest>,
    },

    /// Clock sample request. `rtt_ms` is the sender's current smoothed RTT.
    Ping {
        client_time: u64,
        #[serde(default)]
        rtt_ms: Option<u64>,
    },

    /// Resume a match after reconnecting.
    Rejoin { match_id: String },

    /// Ask for a rematch after the game ended.
    RematchRequest,

    /// Accept the opponent's rematch request.
    RematchAccept,

    /// Leave the current match.
    Leave,
}

// =============================================================================
// AUTHORITY -> PEER MESSAGES
// =============================================================================

/// Messages sent from the authority to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Hello accepted.
    Welcome {
        player_id: String,
        server_version: String,
        server_time: u64,
    },

    /// Waiting in the matchmaking queue.
    Queued { position: u32 },

    /// Paired with an opponent.
    MatchFound {
        match_id: String,
        side: Side,
        opponent_id: String,
        turn_seconds: u32,
    },

    /// An action was accepted and resolved.
    Resolved(ResolvedAction),

    /// Clock sample response.
    Pong { client_time: u64, server_time: u64 },

    /// An action was refused.
    ActionError { error: String, code: String },

    /// The opponent dropped; they have `grace_ms` to return.
    OpponentDisconnected { grace_ms: u64 },

    /// The opponent is back.
    OpponentReconnected,

    /// Full state for a (re)joining peer.
    Sync(SyncSnapshot),

    /// Turn countdown.
    TurnTimer {
        side: Side,
        remaining_ms: u64,
        timeouts: u32,
    },

    /// The game was decided.
    GameEnd {
        winner: Side,
        reason: GameOverReason,
        you_won: bool,
    },

    /// The match session is closed.
    MatchEnd {
        match_id: String,
        final_state_hash: String,
    },

    /// The opponent asked for a rematch.
    RematchRequested,

    /// Both accepted; a new game starts with swapped sides.
    RematchStarting { match_id: String },

    /// The opponent left the match.
    OpponentLeft,

    /// Request-level failure.
    Error(ServerError),

    /// The server is going away.
    Shutdown { reason: String },
}

/// Broadcast for one accepted action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAction {
    /// Match id.
    pub match_id: String,
    /// Strictly increasing per match.
    pub seq: u64,
    /// Acting side.
    pub actor: Side,
    /// The action.
    pub action: Action,
    /// Domain events.
    pub events: Vec<GameEvent>,
    /// Playback commands.
    pub animation_sequence: Vec<AnimationCommand>,
    /// The receiver's view of the state after the action.
    pub state: GameState,
    /// Hex SHA-256 of `state` as sent.
    pub view_hash: String,
    /// Hex SHA-256 of the authoritative state; identical for both peers.
    pub state_hash: String,
    /// Whether the receiver submitted this action.
    pub is_my_action: bool,
    /// Authority time at which both peers should start playback.
    pub start_at_server_ms: u64,
    /// Authority time when the message was built.
    pub server_time: u64,
}

/// Full snapshot for resynchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    /// Match id.
    pub match_id: String,
    /// Last applied sequence number.
    pub seq: u64,
    /// Receiver's side.
    pub side: Side,
    /// Opponent's player id.
    pub opponent_id: String,
    /// The receiver's view of the current state.
    pub state: GameState,
    /// Hex SHA-256 of `state` as sent.
    pub view_hash: String,
    /// Hex SHA-256 of the authoritative state.
    pub state_hash: String,
    /// Authority time.
    pub server_time: u64,
}

/// Request-level error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Message requires a prior hello.
    NotAuthenticated,
    /// Token expired.
    TokenExpired,
    /// Token malformed or wrongly signed.
    InvalidToken,
    /// Message could not be parsed or has bad ids.
    InvalidMessage,
    /// Match does not exist.
    MatchNotFound,
    /// Already queued or playing.
    AlreadyInMatch,
    /// Not part of the match.
    NotInMatch,
    /// Too many connections.
    ServerOverloaded,
    /// Client too old or too new.
    VersionMismatch,
    /// Unexpected failure.
    InternalError,
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { code, message: message.into() })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RulesConfig;

    #[test]
    fn test_action_intent_shape() {
        let json = r#"{
            "type": "action",
            "matchId": "6f2c7f4e-2f0e-4f57-9a3e-1f7c3e1b9a10",
            "playerId": "0b7d1c2a-6d0e-4a8e-8f58-1d5c9a9b1e77",
            "action": {"type": "summon", "cardId": 12, "col": 1, "row": 2},
            "manifest": {"deck": ["emberling"], "kindling": ["kindle_wisp"]}
        }"#;
        let msg = ClientMessage::from_json(json).unwrap();
        match msg {
            ClientMessage::Action { action, manifest, match_id, .. } => {
                assert_eq!(action, Action::Summon { card_id: 12, col: 1, row: 2 });
                let manifest = manifest.unwrap();
                assert_eq!(manifest.deck, vec!["emberling".to_string()]);
                assert!(manifest.hand.is_empty());
                assert!(parse_match_id(&match_id).is_some());
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_ping_pong_shape() {
        let ping = ClientMessage::from_json(r#"{"type":"ping","clientTime":1000}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping { client_time: 1000, rtt_ms: None });

        let pong = ServerMessage::Pong { client_time: 1000, server_time: 1050 };
        let json: serde_json::Value = serde_json::from_str(&pong.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "pong");
        assert_eq!(json["serverTime"], 1050);
    }

    #[test]
    fn test_resolved_roundtrip() {
        let state = GameState::new([5; 16], 11, RulesConfig::default(), Side::B);
        let msg = ServerMessage::Resolved(ResolvedAction {
            match_id: match_id_string(&[5; 16]),
            seq: 3,
            actor: Side::B,
            action: Action::EndPhase,
            events: Vec::new(),
            animation_sequence: vec![AnimationCommand::Message { text: "hi".into() }],
            view_hash: crate::core::hash::hash_to_hex(&state.compute_hash()),
            state_hash: "ab".repeat(32),
            state,
            is_my_action: true,
            start_at_server_ms: 2_000,
            server_time: 1_900,
        });

        let json = msg.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "resolved");
        assert_eq!(value["startAtServerMs"], 2_000);
        assert_eq!(value["animationSequence"][0]["type"], "message");
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_action_error_shape() {
        let msg = ServerMessage::ActionError { error: "slot occupied".into(), code: "SLOT_OCCUPIED".into() };
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"actionError""#));
        assert!(json.contains("SLOT_OCCUPIED"));
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::error(ErrorCode::AuthFailed, "Invalid token");
        let json = msg.to_json().unwrap();
        assert!(json.contains("authFailed"));
    }

    #[test]
    fn test_player_id_uuid_forms() {
        let id = PlayerId::random();
        let s = id.to_uuid_string();
        assert_eq!(PlayerId::from_uuid_str(&s), Some(id));
        assert_eq!(PlayerId::from_uuid_str(&hex::encode(id.0)), Some(id));
        assert!(PlayerId::from_uuid_str("not-a-uuid").is_none());
    }
}
