//! Deterministic primitives and shared configuration.
//!
//! Nothing in here knows about cards or networking.

pub mod clock;
pub mod config;
pub mod hash;
pub mod rng;

// Re-export core types
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::RulesConfig;
pub use hash::{compute_state_hash, StateHash};
pub use rng::DeterministicRng;
