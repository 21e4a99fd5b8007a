//! Network Layer
//!
//! WebSocket authority and peer for live matches.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod auth;
pub mod client;
pub mod protocol;
pub mod session;
pub mod server;

pub use auth::{player_for_subject, AuthError, HelloGate};
pub use client::{ClientCommand, ClientConfig, ClientError, PeerClient, PeerEvent};
pub use protocol::{ClientMessage, PlayerId, ResolvedAction, ServerMessage, SyncSnapshot};
pub use session::{MatchSession, SessionConfig, SessionError, SessionId, SessionManager, SessionState};
pub use server::{GameServer, GameServerError, ServerConfig};
