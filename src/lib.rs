//! # Cryptid Duel Server
//!
//! Authoritative battle simulation and peer synchronization for Cryptid Duel,
//! a two-player turn-based creature battler on a 2x3 grid per side.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRYPTID DUEL SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Seeded Xorshift128+ (shuffles, coin flip) │
//! │  ├── hash.rs     - State hashing for desync detection        │
//! │  ├── config.rs   - Rules constants                           │
//! │  └── clock.rs    - Wall clock seam                           │
//! │                                                              │
//! │  game/           - Battle rules (deterministic)              │
//! │  ├── card.rs     - Card schema and catalog                   │
//! │  ├── state.rs    - Field, hands, pyre, mutation primitives   │
//! │  ├── combat.rs   - Attack validation and damage pipeline     │
//! │  ├── turn.rs     - Phases, turn start/end, traps             │
//! │  ├── action.rs   - Player intents                            │
//! │  ├── bus.rs      - Namespaced event bus                      │
//! │  ├── animation.rs- Renderer command sequences                │
//! │  ├── context.rs  - Per-match context                         │
//! │  └── replay.rs   - Match log and replay                      │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── server.rs   - WebSocket authority                       │
//! │  ├── session.rs  - Match sessions, timers, matchmaking       │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── auth.rs     - Token verification                        │
//! │  └── client.rs   - WebSocket peer                            │
//! │                                                              │
//! │  sync/           - Peer playback (non-deterministic)         │
//! │  ├── clock.rs    - Offset estimation                         │
//! │  ├── schedule.rs - Deadline decisions                        │
//! │  ├── playback.rs - Animator seam and playback plans          │
//! │  ├── mirror.rs   - Ordered state mirror                      │
//! │  └── backoff.rs  - Reconnect backoff                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules never read the wall clock and draw all
//! randomness from the match's seeded RNG. Given the same seed, manifests
//! and actions, a match replays to the same state hash.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod sync;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use game::{Action, ActionError, GameState, MatchContext, Side};
pub use network::{GameServer, PlayerId, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
