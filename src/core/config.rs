//! Gameplay rules configuration.

use serde::{Serialize, Deserialize};

/// Deaths a side may suffer before losing.
pub const DEFAULT_DEATH_THRESHOLD: u32 = 10;

/// Damage dealt by one burn tick at end of turn.
///
/// Burn and bleed both tick for one point; see DESIGN.md for why the burn
/// value is 1 rather than 2.
pub const DEFAULT_BURN_TICK_DAMAGE: i32 = 1;

/// Damage dealt by one bleed tick at end of turn.
pub const DEFAULT_BLEED_TICK_DAMAGE: i32 = 1;

/// Tunable rules shared by the authority and the replay verifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RulesConfig {
    /// Cumulative death count at which a side loses.
    pub death_threshold: u32,
    /// Damage per burn tick.
    pub burn_tick_damage: i32,
    /// Damage per bleed tick.
    pub bleed_tick_damage: i32,
    /// Turns a paralyze application lasts when no duration is given.
    pub paralyze_default_turns: u32,
    /// Pyre each side starts with.
    pub starting_pyre: u32,
    /// Pyre gained at the start of each of a side's turns.
    pub pyre_per_turn: u32,
    /// Cards dealt from the main deck when the match initializes.
    pub starting_hand_size: usize,
    /// Hand limit; draws beyond it are discarded.
    pub max_hand_size: usize,
    /// Number of trap slots per side.
    pub trap_slots: usize,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            death_threshold: DEFAULT_DEATH_THRESHOLD,
            burn_tick_damage: DEFAULT_BURN_TICK_DAMAGE,
            bleed_tick_damage: DEFAULT_BLEED_TICK_DAMAGE,
            paralyze_default_turns: 1,
            starting_pyre: 0,
            pyre_per_turn: 1,
            starting_hand_size: 5,
            max_hand_size: 10,
            trap_slots: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let rules: RulesConfig = serde_json::from_str(r#"{"deathThreshold": 6}"#).unwrap();
        assert_eq!(rules.death_threshold, 6);
        assert_eq!(rules.burn_tick_damage, DEFAULT_BURN_TICK_DAMAGE);
        assert_eq!(rules.trap_slots, 2);
    }
}
