//! Game Events
//!
//! Domain occurrences produced while an action resolves. The state collects
//! them in order; the match context publishes them on the event bus and the
//! session ships them to both peers alongside the animation sequence.

use serde::{Serialize, Deserialize};

use crate::game::card::{AilmentKind, CardId, CardKind};
use crate::game::state::{CombatantRef, Phase, Side};

/// Where a point of damage came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DamageSource {
    /// Direct attack.
    Attack,
    /// Cleave onto the other column of the row.
    Cleave,
    /// Destroyer overkill into the support.
    Overkill,
    /// End-of-turn burn tick.
    Burn,
    /// End-of-turn bleed tick.
    Bleed,
    /// Burst spell.
    Spell,
    /// Sprung trap.
    Trap,
}

/// Why a match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameOverReason {
    /// Death threshold reached.
    Deaths,
    /// A side conceded.
    Forfeit,
    /// Too many turn timeouts.
    Timeout,
    /// Disconnected past the grace window.
    Abandoned,
}

/// Event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GameEventData {
    /// A creature entered the field.
    Summoned {
        cryptid: CombatantRef,
        from_kindling: bool,
    },
    /// A creature now occupies a combat slot.
    EnteredCombat { cryptid: CombatantRef },
    /// A creature now occupies a support slot.
    EnteredSupport { cryptid: CombatantRef },
    /// A cryptid evolved in place.
    Evolved {
        from: CombatantRef,
        into: CombatantRef,
        chain: u32,
    },
    /// An attack was declared and resolved.
    Attacked {
        attacker: CombatantRef,
        target: CombatantRef,
        damage: i32,
    },
    /// HP lost.
    Damaged {
        target: CombatantRef,
        amount: i32,
        source: DamageSource,
        hp_after: i32,
    },
    /// HP restored.
    Healed {
        target: CombatantRef,
        amount: i32,
        hp_after: i32,
    },
    /// A protection charge absorbed a hit.
    ProtectionBlocked {
        target: CombatantRef,
        charges_left: u32,
    },
    /// An ailment landed.
    AilmentApplied {
        target: CombatantRef,
        ailment: AilmentKind,
        stacks: u32,
    },
    /// The target was immune.
    AilmentBlocked {
        target: CombatantRef,
        ailment: AilmentKind,
    },
    /// An ailment ran out.
    AilmentExpired {
        target: CombatantRef,
        ailment: AilmentKind,
    },
    /// A creature died.
    Died {
        victim: CombatantRef,
        killer: Option<Side>,
        death_value: u32,
        deaths_total: u32,
    },
    /// A support moved into the vacated combat slot.
    Promoted { cryptid: CombatantRef, row: u8 },
    /// Pyre changed.
    PyreChanged { side: Side, old: u32, new: u32 },
    /// A card moved from a deck or pool to hand.
    CardDrawn {
        side: Side,
        card_id: CardId,
        from_kindling: bool,
    },
    /// Drew from an empty deck.
    EmptyDeckPenalty { side: Side },
    /// A non-creature card resolved from hand.
    CardPlayed {
        side: Side,
        card_id: CardId,
        key: String,
        kind: CardKind,
        target: Option<CombatantRef>,
    },
    /// A trap was set face down.
    TrapSet { side: Side, slot: u8, row: u8 },
    /// A trap fired.
    TrapTriggered {
        side: Side,
        slot: u8,
        key: String,
        name: String,
        target: Option<CombatantRef>,
    },
    /// Phase transition.
    PhaseChanged { side: Side, from: Phase, to: Phase },
    /// A side's turn began.
    TurnStarted { side: Side, turn: u32 },
    /// A side's turn ended.
    TurnEnded { side: Side },
    /// The match is decided.
    GameOver { winner: Side, reason: GameOverReason },
}

impl GameEventData {
    /// Bus event name.
    pub fn name(&self) -> &'static str {
        match self {
            GameEventData::Summoned { .. } => "summon",
            GameEventData::EnteredCombat { .. } => "enterCombat",
            GameEventData::EnteredSupport { .. } => "enterSupport",
            GameEventData::Evolved { .. } => "evolve",
            GameEventData::Attacked { .. } => "attack",
            GameEventData::Damaged { .. } => "damage",
            GameEventData::Healed { .. } => "heal",
            GameEventData::ProtectionBlocked { .. } => "protectionBlock",
            GameEventData::AilmentApplied { .. } => "ailmentApplied",
            GameEventData::AilmentBlocked { .. } => "ailmentBlocked",
            GameEventData::AilmentExpired { .. } => "ailmentExpired",
            GameEventData::Died { .. } => "death",
            GameEventData::Promoted { .. } => "promotion",
            GameEventData::PyreChanged { .. } => "pyreChange",
            GameEventData::CardDrawn { .. } => "draw",
            GameEventData::EmptyDeckPenalty { .. } => "emptyDeck",
            GameEventData::CardPlayed { .. } => "cardPlayed",
            GameEventData::TrapSet { .. } => "trapSet",
            GameEventData::TrapTriggered { .. } => "trapTrigger",
            GameEventData::PhaseChanged { .. } => "phaseChange",
            GameEventData::TurnStarted { .. } => "turnStart",
            GameEventData::TurnEnded { .. } => "turnEnd",
            GameEventData::GameOver { .. } => "gameOver",
        }
    }
}

/// An event stamped with the turn it happened on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Turn number.
    pub turn: u32,
    /// Payload.
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(turn: u32, data: GameEventData) -> Self {
        Self { turn, data }
    }

    /// Bus event name.
    pub fn name(&self) -> &'static str {
        self.data.name()
    }
}
