//! Peer Synchronization
//!
//! Everything a peer needs to show the authority's match at the same moment
//! as its opponent: clock offset estimation, deadline scheduling, ordered
//! playback against a renderer, the sequence-ordered state mirror and
//! reconnect backoff. Like `network/`, this layer is non-deterministic.

pub mod backoff;
pub mod clock;
pub mod mirror;
pub mod playback;
pub mod schedule;

pub use backoff::{Backoff, ReconnectPolicy};
pub use clock::ClockSync;
pub use mirror::{Mirror, MirrorError};
pub use playback::{Animator, PlaybackPlan, PlaybackStep, SnapshotOrder};
pub use schedule::{PlaybackDecision, ScheduleConfig};
