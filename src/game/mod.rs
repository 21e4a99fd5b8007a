//! Game Logic Module
//!
//! The authoritative battle simulation. Nothing here touches sockets or the
//! wall clock; given the same seed, manifests and actions it always lands on
//! the same state.
//!
//! ## Module Structure
//!
//! - `card`: Card schema, ability flags, catalog lookups
//! - `state`: Battlefield, hands, resources, mutation primitives
//! - `events`: Domain events produced while resolving
//! - `bus`: Named publish/subscribe with per-match namespaces
//! - `combat`: Attack validation, damage pipeline, intent/commit
//! - `turn`: Phase and turn state machine, traps
//! - `action`: Player intents and their validation
//! - `animation`: Renderer command sequence built from events
//! - `context`: Per-match context (state + bus + log)
//! - `replay`: Match log and deterministic replay

pub mod card;
pub mod state;
pub mod events;
pub mod bus;
pub mod combat;
pub mod turn;
pub mod action;
pub mod animation;
pub mod context;
pub mod replay;

// Re-export key types
pub use action::{Action, ActionError, ActionOutcome, DeckManifest};
pub use animation::AnimationCommand;
pub use bus::{BusEvent, EventBus, Subscription};
pub use card::{CardCatalog, CardData, CardId, CardKind, InMemoryCatalog};
pub use combat::{AttackIntent, AttackRejection, CombatEngine};
pub use context::MatchContext;
pub use events::{GameEvent, GameEventData, GameOverReason};
pub use replay::MatchLog;
pub use state::{Combatant, CombatantRef, GameState, Phase, Side};
pub use turn::TurnProcessor;
