//! Battle State
//!
//! The single source of truth for one match: both battlefields, hands,
//! kindling pools, decks, pyre, traps, turn and phase counters, death
//! counters. Everything here is a plain query or a narrow mutation primitive;
//! the state knows nothing about sockets or rendering. Every mutation records
//! what happened as a [`GameEvent`] in `pending_events`, which the match
//! context drains and publishes.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::config::RulesConfig;
use crate::core::hash::{compute_state_hash, StateHash, StateHasher};
use crate::core::rng::DeterministicRng;
use crate::game::card::{Abilities, AilmentKind, CardData, CardId, CardInstance, CardKind};
use crate::game::events::{DamageSource, GameEvent, GameEventData, GameOverReason};

/// Rows per column.
pub const ROWS: usize = 3;

/// Columns per side.
pub const COLS: usize = 2;

// =============================================================================
// SIDES AND POSITIONS
// =============================================================================

/// One of the two seats in a match.
///
/// Column roles are mirrored: side A fights from column 1 and is supported
/// from column 0; side B fights from column 0 and is supported from column 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// First seat.
    A,
    /// Second seat.
    B,
}

impl Side {
    /// Both sides, in index order.
    pub const ALL: [Side; 2] = [Side::A, Side::B];

    /// The other side.
    #[inline]
    pub fn opponent(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    /// Array index.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Column this side fights from.
    #[inline]
    pub fn combat_col(self) -> u8 {
        match self {
            Side::A => 1,
            Side::B => 0,
        }
    }

    /// Column this side supports from.
    #[inline]
    pub fn support_col(self) -> u8 {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

/// Check a (col, row) pair.
#[inline]
pub fn in_bounds(col: u8, row: u8) -> bool {
    (col as usize) < COLS && (row as usize) < ROWS
}

/// Identity snapshot of a combatant, self-contained for the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatantRef {
    /// Instance id.
    pub instance_id: CardId,
    /// Catalog key.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Owner.
    pub owner: Side,
    /// Column.
    pub col: u8,
    /// Row.
    pub row: u8,
}

// =============================================================================
// PHASES
// =============================================================================

/// Turn phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// First spell window.
    Conjure1,
    /// Summoning window.
    Deploy,
    /// Second spell window.
    Conjure2,
    /// Attacks.
    Combat,
    /// End of turn.
    End,
}

impl Phase {
    /// Fixed linear successor. `End` wraps to `Conjure1` (of the other side).
    pub fn next(self) -> Phase {
        match self {
            Phase::Conjure1 => Phase::Deploy,
            Phase::Deploy => Phase::Conjure2,
            Phase::Conjure2 => Phase::Combat,
            Phase::Combat => Phase::End,
            Phase::End => Phase::Conjure1,
        }
    }

    /// Either spell window.
    pub fn is_conjure(self) -> bool {
        matches!(self, Phase::Conjure1 | Phase::Conjure2)
    }
}

// =============================================================================
// COMBATANTS
// =============================================================================

/// Ailment and protection counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ailments {
    /// Burn turns remaining.
    pub burn: u32,
    /// Bleed turns remaining.
    pub bleed: u32,
    /// Cannot attack while set.
    pub paralyzed: bool,
    /// Turns of paralysis remaining.
    pub paralyze_turns: u32,
    /// Calamity countdown.
    pub calamity: u32,
    /// Set once calamity has ever been applied; arms the countdown death.
    pub calamity_armed: bool,
    /// Curse tokens (each is -1 attack, one decays per turn start).
    pub curse: u32,
    /// Protection charges.
    pub protection: u32,
}

impl Ailments {
    /// Any harmful status present.
    pub fn any(&self) -> bool {
        self.burn > 0 || self.bleed > 0 || self.paralyzed || self.calamity > 0 || self.curse > 0
    }

    /// Remove every harmful status, keeping protection.
    pub fn cleanse(&mut self) {
        *self = Ailments {
            protection: self.protection,
            ..Ailments::default()
        };
    }
}

/// A card instance on the battlefield.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combatant {
    /// Instance id (same id the card had in hand).
    pub id: CardId,
    /// Catalog snapshot of the top card.
    pub card: CardData,
    /// Owner.
    pub owner: Side,
    /// Column.
    pub col: u8,
    /// Row.
    pub row: u8,
    /// Base attack from the catalog.
    pub base_atk: i32,
    /// Base hit points from the catalog.
    pub base_hp: i32,
    /// Current attack (base plus permanent buffs).
    pub current_atk: i32,
    /// Current hit points.
    pub current_hp: i32,
    /// Max hit points (base plus permanent buffs).
    pub max_hp: i32,
    /// Ability flags.
    pub abilities: Abilities,
    /// Status counters.
    pub ailments: Ailments,
    /// Exhausted this turn.
    pub tapped: bool,
    /// Eligible to attack.
    pub can_attack: bool,
    /// Entered the field this turn.
    pub just_summoned: bool,
    /// Attacked at least once this turn.
    pub attacked_this_turn: bool,
    /// One-shot grant to attack without tapping.
    pub attack_again: bool,
    /// Latch target; attacks must go to this instance.
    pub latched_to: Option<CardId>,
    /// Length of the evolution chain (1 for an unevolved card).
    pub evolution_chain: u32,
}

impl Combatant {
    /// Fresh combatant from a card: zeroed ailments, current = base, cannot attack.
    pub fn from_card(card: CardInstance, owner: Side, col: u8, row: u8) -> Self {
        let data = card.data;
        Self {
            id: card.id,
            owner,
            col,
            row,
            base_atk: data.atk,
            base_hp: data.hp,
            current_atk: data.atk,
            current_hp: data.hp,
            max_hp: data.hp,
            abilities: data.abilities.clone(),
            ailments: Ailments {
                protection: data.abilities.protection,
                ..Ailments::default()
            },
            tapped: false,
            can_attack: false,
            just_summoned: true,
            attacked_this_turn: false,
            attack_again: false,
            latched_to: None,
            evolution_chain: 1,
            card: data,
        }
    }

    /// Catalog key.
    pub fn key(&self) -> &str {
        &self.card.key
    }

    /// Identity snapshot.
    pub fn to_ref(&self) -> CombatantRef {
        CombatantRef {
            instance_id: self.id,
            key: self.card.key.clone(),
            name: self.card.name.clone(),
            owner: self.owner,
            col: self.col,
            row: self.row,
        }
    }

    /// Occupies its owner's combat column.
    pub fn in_combat(&self) -> bool {
        self.col == self.owner.combat_col()
    }
}

// =============================================================================
// PER-SIDE STATE
// =============================================================================

/// A face-down trap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapSlot {
    /// The card.
    pub card: CardInstance,
    /// Row it guards.
    pub row: u8,
}

/// Flags reset at the owning side's turn start.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnFlags {
    /// A kindling was played.
    pub kindling_played: bool,
    /// A pyre card was played.
    pub pyre_spell_played: bool,
    /// Pyre burn was used.
    pub pyre_burn_used: bool,
}

/// Everything one side owns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideState {
    /// `field[col][row]`.
    pub field: [[Option<Combatant>; ROWS]; COLS],
    /// Hand, in draw order.
    pub hand: Vec<CardInstance>,
    /// Kindling pool; the top is the last element.
    pub kindling_pool: Vec<CardInstance>,
    /// Main deck; the top is the last element.
    pub deck: Vec<CardInstance>,
    /// Spent cards.
    pub discard: Vec<CardInstance>,
    /// Spendable resource.
    pub pyre: u32,
    /// Cumulative death value.
    pub deaths: u32,
    /// Trap slots.
    pub traps: Vec<Option<TrapSlot>>,
    /// Per-turn flags.
    pub flags: TurnFlags,
    /// Set on a recipient's view when the piles above were withheld.
    #[serde(default)]
    pub concealed: Option<Concealed>,
}

/// What a recipient still learns about an opponent's withheld zones.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concealed {
    /// Cards in hand.
    pub hand: u32,
    /// Cards left in the kindling pool.
    pub kindling: u32,
    /// Cards left in the deck.
    pub deck: u32,
    /// Guarded row of each trap slot; the trap itself stays face down.
    pub trap_rows: Vec<Option<u8>>,
}

impl SideState {
    fn new(rules: &RulesConfig) -> Self {
        Self {
            field: Default::default(),
            hand: Vec::new(),
            kindling_pool: Vec::new(),
            deck: Vec::new(),
            discard: Vec::new(),
            pyre: rules.starting_pyre,
            deaths: 0,
            traps: vec![None; rules.trap_slots],
            flags: TurnFlags::default(),
            concealed: None,
        }
    }

    /// Cards in hand, including withheld ones.
    pub fn hand_count(&self) -> usize {
        self.concealed.as_ref().map_or(self.hand.len(), |c| c.hand as usize)
    }

    /// Cards left in the deck, including withheld ones.
    pub fn deck_count(&self) -> usize {
        self.concealed.as_ref().map_or(self.deck.len(), |c| c.deck as usize)
    }

    fn conceal(&mut self) {
        self.concealed = Some(Concealed {
            hand: self.hand.len() as u32,
            kindling: self.kindling_pool.len() as u32,
            deck: self.deck.len() as u32,
            trap_rows: self.traps.iter().map(|t| t.as_ref().map(|t| t.row)).collect(),
        });
        self.hand.clear();
        self.kindling_pool.clear();
        self.deck.clear();
        for trap in self.traps.iter_mut() {
            *trap = None;
        }
    }

    /// Occupied slots in (col, row) order.
    pub fn combatants(&self) -> impl Iterator<Item = &Combatant> {
        self.field.iter().flat_map(|col| col.iter().flatten())
    }
}

// =============================================================================
// OUTCOMES AND ERRORS
// =============================================================================

/// Result of `apply_ailment`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AilmentOutcome {
    /// The ailment landed.
    pub applied: bool,
    /// The target was immune.
    pub blocked: bool,
}

/// Result of `kill_cryptid`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KillOutcome {
    /// False when the instance was already gone.
    pub killed: bool,
    /// Support moved into the vacated slot.
    pub promoted: Option<CombatantRef>,
    /// Death counter increment.
    pub death_value: u32,
}

/// Options for `kill_cryptid`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KillOptions {
    /// Leave the combat slot empty.
    pub suppress_promotion: bool,
}

/// Result of `modify_pyre`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PyreChange {
    /// Before.
    pub old: u32,
    /// After.
    pub new: u32,
}

/// Decided match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOver {
    /// Winning side.
    pub winner: Side,
    /// Why.
    pub reason: GameOverReason,
}

/// State primitive failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Slot already holds a combatant.
    #[error("slot occupied")]
    SlotOccupied,
    /// Column or row out of range.
    #[error("invalid slot")]
    InvalidSlot,
    /// Slot is empty.
    #[error("slot empty")]
    SlotEmpty,
    /// Card cannot be placed on the field.
    #[error("card is not a creature")]
    NotACreature,
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Complete state of one match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Match identifier.
    pub match_id: [u8; 16],
    /// Seed the RNG was built from.
    pub rng_seed: u64,
    /// Deterministic RNG.
    pub rng: DeterministicRng,
    /// Rules in force.
    pub rules: RulesConfig,
    /// Per-side state, indexed by [`Side::index`].
    pub sides: [SideState; 2],
    /// Side whose turn it is.
    pub active: Side,
    /// Side that opened the match; its turn starts bump the turn counter.
    pub first_side: Side,
    /// Current phase.
    pub phase: Phase,
    /// Turn counter.
    pub turn: u32,
    /// Next card instance id.
    pub next_instance_id: CardId,
    /// Set once the match is decided.
    pub game_over: Option<GameOver>,
    /// Events recorded since the last drain.
    #[serde(skip)]
    pub pending_events: Vec<GameEvent>,
}

impl GameState {
    /// Create an empty battle. Decks are dealt by the action layer.
    pub fn new(match_id: [u8; 16], rng_seed: u64, rules: RulesConfig, first_side: Side) -> Self {
        Self {
            match_id,
            rng_seed,
            rng: DeterministicRng::new(rng_seed),
            sides: [SideState::new(&rules), SideState::new(&rules)],
            rules,
            active: first_side,
            first_side,
            phase: Phase::Conjure1,
            turn: 0,
            next_instance_id: 1,
            game_over: None,
            pending_events: Vec::new(),
        }
    }

    /// Per-side state.
    #[inline]
    pub fn side(&self, side: Side) -> &SideState {
        &self.sides[side.index()]
    }

    /// Per-side state, mutable.
    #[inline]
    pub fn side_mut(&mut self, side: Side) -> &mut SideState {
        &mut self.sides[side.index()]
    }

    /// Wrap catalog data in a fresh instance id.
    pub fn instantiate(&mut self, data: CardData) -> CardInstance {
        let id = self.next_instance_id;
        self.next_instance_id += 1;
        CardInstance { id, data }
    }

    // -------------------------------------------------------------------------
    // Field queries
    // -------------------------------------------------------------------------

    /// Occupant of a slot.
    pub fn get_field_cryptid(&self, owner: Side, col: u8, row: u8) -> Option<&Combatant> {
        if !in_bounds(col, row) {
            return None;
        }
        self.side(owner).field[col as usize][row as usize].as_ref()
    }

    /// Occupant of a slot, mutable.
    pub fn get_field_cryptid_mut(&mut self, owner: Side, col: u8, row: u8) -> Option<&mut Combatant> {
        if !in_bounds(col, row) {
            return None;
        }
        self.side_mut(owner).field[col as usize][row as usize].as_mut()
    }

    /// Replace a slot's occupant, returning the previous one. Position fields
    /// of the incoming combatant are rewritten to match the slot.
    pub fn set_field_cryptid(
        &mut self,
        owner: Side,
        col: u8,
        row: u8,
        cryptid: Option<Combatant>,
    ) -> Result<Option<Combatant>, StateError> {
        if !in_bounds(col, row) {
            return Err(StateError::InvalidSlot);
        }
        let incoming = cryptid.map(|mut c| {
            c.owner = owner;
            c.col = col;
            c.row = row;
            c
        });
        let slot = &mut self.side_mut(owner).field[col as usize][row as usize];
        Ok(std::mem::replace(slot, incoming))
    }

    /// Combat-column occupant of a row.
    pub fn get_combatant(&self, owner: Side, row: u8) -> Option<&Combatant> {
        self.get_field_cryptid(owner, owner.combat_col(), row)
    }

    /// Support-column occupant of a row.
    pub fn get_support(&self, owner: Side, row: u8) -> Option<&Combatant> {
        self.get_field_cryptid(owner, owner.support_col(), row)
    }

    /// Support standing behind a combatant, if the combatant is in combat.
    pub fn support_of(&self, cryptid: &Combatant) -> Option<&Combatant> {
        if cryptid.in_combat() {
            self.get_support(cryptid.owner, cryptid.row)
        } else {
            None
        }
    }

    /// Opposing combat-column occupant on the same row.
    pub fn opposing_combatant(&self, owner: Side, row: u8) -> Option<&Combatant> {
        self.get_combatant(owner.opponent(), row)
    }

    /// Whether the support on `owner`'s row is negated by the opposing combatant.
    pub fn is_support_negated(&self, owner: Side, row: u8) -> bool {
        self.opposing_combatant(owner, row)
            .map(|c| c.abilities.negates_enemy_support)
            .unwrap_or(false)
    }

    /// Support that contributes to the combatant in `owner`'s row, if any.
    pub fn active_support(&self, owner: Side, row: u8) -> Option<&Combatant> {
        if self.is_support_negated(owner, row) {
            return None;
        }
        self.get_support(owner, row)
    }

    /// Locate an instance on the field.
    pub fn find_instance(&self, id: CardId) -> Option<(Side, u8, u8)> {
        Side::ALL.iter().find_map(|&side| {
            self.side(side)
                .combatants()
                .find(|c| c.id == id)
                .map(|c| (side, c.col, c.row))
        })
    }

    /// Combatant by instance id.
    pub fn combatant(&self, id: CardId) -> Option<&Combatant> {
        let (side, col, row) = self.find_instance(id)?;
        self.get_field_cryptid(side, col, row)
    }

    /// Combatant by instance id, mutable.
    pub fn combatant_mut(&mut self, id: CardId) -> Option<&mut Combatant> {
        let (side, col, row) = self.find_instance(id)?;
        self.get_field_cryptid_mut(side, col, row)
    }

    /// Attack after debuffs. Curse tokens subtract one point each. The
    /// support's attack is not included; combat adds it as its own step.
    pub fn get_effective_atk(&self, cryptid: &Combatant) -> i32 {
        (cryptid.current_atk - cryptid.ailments.curse as i32).max(0)
    }

    /// HP including an un-negated support's HP for combat-column occupants.
    pub fn get_effective_hp(&self, cryptid: &Combatant) -> i32 {
        let support_hp = if cryptid.in_combat() {
            self.active_support(cryptid.owner, cryptid.row)
                .map(|s| s.current_hp)
                .unwrap_or(0)
        } else {
            0
        };
        cryptid.current_hp + support_hp
    }

    // -------------------------------------------------------------------------
    // Resources
    // -------------------------------------------------------------------------

    /// Add or remove pyre, clamped at zero.
    pub fn modify_pyre(&mut self, owner: Side, amount: i32) -> PyreChange {
        let old = self.side(owner).pyre;
        let new = (old as i64 + amount as i64).max(0).min(u32::MAX as i64) as u32;
        self.side_mut(owner).pyre = new;
        if new != old {
            self.push(GameEventData::PyreChanged { side: owner, old, new });
        }
        PyreChange { old, new }
    }

    /// Draw the top main-deck card. `None` when the deck is empty.
    pub fn draw_card(&mut self, owner: Side) -> Option<CardId> {
        let card = self.side_mut(owner).deck.pop()?;
        Some(self.put_in_hand(owner, card, false))
    }

    /// Draw the top kindling card. `None` when the pool is empty.
    pub fn draw_kindling(&mut self, owner: Side) -> Option<CardId> {
        let card = self.side_mut(owner).kindling_pool.pop()?;
        Some(self.put_in_hand(owner, card, true))
    }

    fn put_in_hand(&mut self, owner: Side, card: CardInstance, from_kindling: bool) -> CardId {
        let id = card.id;
        let max = self.rules.max_hand_size;
        let side = self.side_mut(owner);
        if side.hand.len() >= max {
            side.discard.push(card);
        } else {
            side.hand.push(card);
        }
        self.push(GameEventData::CardDrawn { side: owner, card_id: id, from_kindling });
        id
    }

    /// Card in hand by id.
    pub fn hand_card(&self, owner: Side, id: CardId) -> Option<&CardInstance> {
        self.side(owner).hand.iter().find(|c| c.id == id)
    }

    /// Remove a card from hand.
    pub fn take_from_hand(&mut self, owner: Side, id: CardId) -> Option<CardInstance> {
        let hand = &mut self.side_mut(owner).hand;
        let pos = hand.iter().position(|c| c.id == id)?;
        Some(hand.remove(pos))
    }

    // -------------------------------------------------------------------------
    // Summoning
    // -------------------------------------------------------------------------

    /// Place a creature into an empty slot.
    pub fn summon_cryptid(
        &mut self,
        owner: Side,
        col: u8,
        row: u8,
        card: CardInstance,
    ) -> Result<CombatantRef, StateError> {
        if !in_bounds(col, row) {
            return Err(StateError::InvalidSlot);
        }
        if !card.data.is_creature() {
            return Err(StateError::NotACreature);
        }
        if self.get_field_cryptid(owner, col, row).is_some() {
            return Err(StateError::SlotOccupied);
        }

        let from_kindling = card.data.kind == CardKind::Kindling;
        let cryptid = Combatant::from_card(card, owner, col, row);
        let cref = cryptid.to_ref();
        let in_combat = cryptid.in_combat();
        self.set_field_cryptid(owner, col, row, Some(cryptid))?;

        self.push(GameEventData::Summoned { cryptid: cref.clone(), from_kindling });
        if in_combat {
            self.push(GameEventData::EnteredCombat { cryptid: cref.clone() });
        } else {
            self.push(GameEventData::EnteredSupport { cryptid: cref.clone() });
        }
        Ok(cref)
    }

    /// Evolve the occupant of a slot into `card`. Stats reset to the new
    /// card, ailments and readiness carry over, the chain grows by one.
    pub fn evolve_cryptid(
        &mut self,
        owner: Side,
        col: u8,
        row: u8,
        card: CardInstance,
    ) -> Result<CombatantRef, StateError> {
        let previous = self
            .get_field_cryptid(owner, col, row)
            .cloned()
            .ok_or(StateError::SlotEmpty)?;

        let mut evolved = Combatant::from_card(card, owner, col, row);
        evolved.ailments = previous.ailments.clone();
        evolved.ailments.protection += evolved.card.abilities.protection;
        evolved.tapped = previous.tapped;
        evolved.can_attack = previous.can_attack;
        evolved.just_summoned = previous.just_summoned;
        evolved.attacked_this_turn = previous.attacked_this_turn;
        evolved.evolution_chain = previous.evolution_chain + 1;

        let into = evolved.to_ref();
        let chain = evolved.evolution_chain;
        let old_card = CardInstance { id: previous.id, data: previous.card.clone() };
        self.set_field_cryptid(owner, col, row, Some(evolved))?;
        self.side_mut(owner).discard.push(old_card);

        self.push(GameEventData::Evolved { from: previous.to_ref(), into: into.clone(), chain });
        Ok(into)
    }

    // -------------------------------------------------------------------------
    // Damage, healing, ailments
    // -------------------------------------------------------------------------

    /// Subtract HP. Does not kill; returns the remaining HP.
    pub fn deal_damage(&mut self, id: CardId, amount: i32, source: DamageSource) -> Option<i32> {
        let amount = amount.max(0);
        let cryptid = self.combatant_mut(id)?;
        cryptid.current_hp -= amount;
        let hp_after = cryptid.current_hp;
        let target = cryptid.to_ref();
        if amount > 0 {
            self.push(GameEventData::Damaged { target, amount, source, hp_after });
        }
        Some(hp_after)
    }

    /// Restore HP up to max. Returns the amount actually healed.
    pub fn heal(&mut self, id: CardId, amount: i32) -> Option<i32> {
        let cryptid = self.combatant_mut(id)?;
        let before = cryptid.current_hp;
        cryptid.current_hp = (cryptid.current_hp + amount.max(0)).min(cryptid.max_hp);
        let healed = cryptid.current_hp - before;
        let hp_after = cryptid.current_hp;
        let target = cryptid.to_ref();
        if healed > 0 {
            self.push(GameEventData::Healed { target, amount: healed, hp_after });
        }
        Some(healed)
    }

    /// Apply an ailment. Immune targets report `blocked`; paralyze is a flag
    /// with a duration, the rest accumulate.
    pub fn apply_ailment(&mut self, id: CardId, kind: AilmentKind, stacks: u32) -> AilmentOutcome {
        let default_paralyze = self.rules.paralyze_default_turns;
        let Some(cryptid) = self.combatant_mut(id) else {
            return AilmentOutcome::default();
        };
        let target = cryptid.to_ref();

        if cryptid.abilities.ailment_immune {
            self.push(GameEventData::AilmentBlocked { target, ailment: kind });
            return AilmentOutcome { applied: false, blocked: true };
        }

        let ailments = &mut cryptid.ailments;
        let stacks = match kind {
            AilmentKind::Paralyze => {
                let turns = if stacks == 0 { default_paralyze } else { stacks };
                ailments.paralyzed = true;
                ailments.paralyze_turns = ailments.paralyze_turns.max(turns);
                cryptid.tapped = true;
                turns
            }
            AilmentKind::Burn => {
                ailments.burn += stacks;
                stacks
            }
            AilmentKind::Bleed => {
                ailments.bleed += stacks;
                stacks
            }
            AilmentKind::Calamity => {
                ailments.calamity += stacks;
                ailments.calamity_armed = true;
                stacks
            }
            AilmentKind::Curse => {
                ailments.curse += stacks;
                stacks
            }
        };

        self.push(GameEventData::AilmentApplied { target, ailment: kind, stacks });
        AilmentOutcome { applied: true, blocked: false }
    }

    // -------------------------------------------------------------------------
    // Death and promotion
    // -------------------------------------------------------------------------

    /// Remove a combatant, credit the death, promote its support.
    ///
    /// Idempotent: an instance that is no longer on the field is a no-op.
    pub fn kill_cryptid(&mut self, id: CardId, killer: Option<Side>, opts: KillOptions) -> KillOutcome {
        let Some((owner, col, row)) = self.find_instance(id) else {
            return KillOutcome::default();
        };
        let Ok(Some(victim)) = self.set_field_cryptid(owner, col, row, None) else {
            return KillOutcome::default();
        };

        let death_value = victim.evolution_chain.max(1);
        let side = self.side_mut(owner);
        side.deaths += death_value;
        let deaths_total = side.deaths;
        side.discard.push(CardInstance { id: victim.id, data: victim.card.clone() });

        // Any latch onto the dead instance is released.
        for s in Side::ALL {
            for column in self.side_mut(s).field.iter_mut() {
                for c in column.iter_mut().flatten() {
                    if c.latched_to == Some(id) {
                        c.latched_to = None;
                    }
                }
            }
        }

        self.push(GameEventData::Died {
            victim: victim.to_ref(),
            killer,
            death_value,
            deaths_total,
        });

        let promoted = if victim.in_combat() && !opts.suppress_promotion {
            self.promote_support(owner, row)
        } else {
            None
        };

        self.evaluate_game_over();

        KillOutcome { killed: true, promoted, death_value }
    }

    /// Move the support of a row into its empty combat slot. The promoted
    /// combatant is untapped and may attack this turn.
    pub fn promote_support(&mut self, owner: Side, row: u8) -> Option<CombatantRef> {
        if self.get_combatant(owner, row).is_some() {
            return None;
        }
        let support_col = owner.support_col();
        let mut support = self.set_field_cryptid(owner, support_col, row, None).ok()??;
        support.tapped = false;
        support.can_attack = true;
        support.just_summoned = false;
        support.attacked_this_turn = false;

        let combat_col = owner.combat_col();
        if self.set_field_cryptid(owner, combat_col, row, Some(support)).is_err() {
            return None;
        }
        let cref = self.get_combatant(owner, row)?.to_ref();
        self.push(GameEventData::Promoted { cryptid: cref.clone(), row });
        self.push(GameEventData::EnteredCombat { cryptid: cref.clone() });
        Some(cref)
    }

    /// Record a winner once a side reaches the death threshold. When both
    /// reach it together the side not taking its turn wins.
    pub fn evaluate_game_over(&mut self) -> Option<GameOver> {
        if self.game_over.is_some() {
            return self.game_over;
        }
        let threshold = self.rules.death_threshold;
        let a_out = self.side(Side::A).deaths >= threshold;
        let b_out = self.side(Side::B).deaths >= threshold;
        let winner = match (a_out, b_out) {
            (true, true) => Some(self.active.opponent()),
            (true, false) => Some(Side::B),
            (false, true) => Some(Side::A),
            (false, false) => None,
        }?;
        Some(self.declare_winner(winner, GameOverReason::Deaths))
    }

    /// Force a result (forfeit, timeout, abandonment).
    pub fn declare_winner(&mut self, winner: Side, reason: GameOverReason) -> GameOver {
        if let Some(existing) = self.game_over {
            return existing;
        }
        let result = GameOver { winner, reason };
        self.game_over = Some(result);
        self.push(GameEventData::GameOver { winner, reason });
        result
    }

    /// Whether the match is decided.
    pub fn is_over(&self) -> bool {
        self.game_over.is_some()
    }

    // -------------------------------------------------------------------------
    // Turn-boundary primitives
    // -------------------------------------------------------------------------

    /// Untap and refresh every combatant of a side. Paralyzed combatants stay
    /// tapped for the turn their paralysis wears off.
    pub fn untap_all(&mut self, owner: Side) {
        for column in self.side_mut(owner).field.iter_mut() {
            for c in column.iter_mut().flatten() {
                c.tapped = c.ailments.paralyzed;
                c.can_attack = true;
                c.just_summoned = false;
                c.attacked_this_turn = false;
                c.attack_again = false;
            }
        }
    }

    /// Start-of-turn decay: paralysis and curse lose one turn each.
    pub fn tick_start_ailments(&mut self, owner: Side) {
        let mut expired = Vec::new();
        for column in self.side_mut(owner).field.iter_mut() {
            for c in column.iter_mut().flatten() {
                if c.ailments.paralyzed {
                    c.ailments.paralyze_turns = c.ailments.paralyze_turns.saturating_sub(1);
                    if c.ailments.paralyze_turns == 0 {
                        c.ailments.paralyzed = false;
                        expired.push((c.to_ref(), AilmentKind::Paralyze));
                    }
                }
                if c.ailments.curse > 0 {
                    c.ailments.curse -= 1;
                    if c.ailments.curse == 0 {
                        expired.push((c.to_ref(), AilmentKind::Curse));
                    }
                }
            }
        }
        for (target, ailment) in expired {
            self.push(GameEventData::AilmentExpired { target, ailment });
        }
    }

    /// End-of-turn ticks: burn and bleed damage, calamity countdown.
    /// Returns the instances that must die, in field order.
    pub fn tick_end_ailments(&mut self, owner: Side) -> Vec<CardId> {
        let burn_damage = self.rules.burn_tick_damage;
        let bleed_damage = self.rules.bleed_tick_damage;
        let ids: Vec<CardId> = self.side(owner).combatants().map(|c| c.id).collect();
        let mut doomed = Vec::new();

        for id in ids {
            let Some(c) = self.combatant(id) else { continue };
            let burning = c.ailments.burn > 0;
            let bleeding = c.ailments.bleed > 0;

            if burning {
                self.deal_damage(id, burn_damage, DamageSource::Burn);
            }
            if bleeding {
                self.deal_damage(id, bleed_damage, DamageSource::Bleed);
            }

            let mut expired = Vec::new();
            let mut calamity_death = false;
            if let Some(c) = self.combatant_mut(id) {
                if burning {
                    c.ailments.burn -= 1;
                    if c.ailments.burn == 0 {
                        expired.push(AilmentKind::Burn);
                    }
                }
                if bleeding {
                    c.ailments.bleed -= 1;
                    if c.ailments.bleed == 0 {
                        expired.push(AilmentKind::Bleed);
                    }
                }
                if c.ailments.calamity > 0 {
                    c.ailments.calamity -= 1;
                    if c.ailments.calamity == 0 && c.ailments.calamity_armed {
                        calamity_death = true;
                    }
                }
                let target = c.to_ref();
                let dead = c.current_hp <= 0 || calamity_death;
                for ailment in expired {
                    self.push(GameEventData::AilmentExpired { target: target.clone(), ailment });
                }
                if dead {
                    doomed.push(id);
                }
            }
        }
        doomed
    }

    /// Reset a side's per-turn flags.
    pub fn reset_turn_flags(&mut self, owner: Side) {
        self.side_mut(owner).flags = TurnFlags::default();
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Record an event.
    pub fn push(&mut self, data: GameEventData) {
        let turn = self.turn;
        self.pending_events.push(GameEvent::new(turn, data));
    }

    /// Take pending events (consumes them).
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending_events)
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// The state as `viewer` may see it. The opponent's hand, kindling
    /// pool, deck and trap cards are reduced to counts, and the RNG is
    /// withheld from both sides so upcoming draws and rolls stay unknown.
    pub fn view_for(&self, viewer: Side) -> GameState {
        let mut view = self.clone();
        view.pending_events.clear();
        view.side_mut(viewer.opponent()).conceal();
        view.rng_seed = 0;
        view.rng.set_state([0, 0]);
        view
    }

    /// Compact binary snapshot.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Restore from a binary snapshot.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Canonical hash of everything that affects play.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.turn, self.rng_seed, |h| {
            h.update_u8(self.active as u8);
            h.update_u8(self.first_side as u8);
            h.update_u8(self.phase as u8);
            h.update_u32(self.next_instance_id);
            let rng = self.rng.state();
            h.update_u64(rng[0]);
            h.update_u64(rng[1]);
            match self.game_over {
                Some(g) => {
                    h.update_u8(1);
                    h.update_u8(g.winner as u8);
                    h.update_u8(g.reason as u8);
                }
                None => h.update_u8(0),
            }
            for side in &self.sides {
                hash_side(h, side);
            }
        })
    }
}

fn hash_side(h: &mut StateHasher, side: &SideState) {
    h.update_u32(side.pyre);
    h.update_u32(side.deaths);
    h.update_bool(side.flags.kindling_played);
    h.update_bool(side.flags.pyre_spell_played);
    h.update_bool(side.flags.pyre_burn_used);
    for pile in [&side.hand, &side.kindling_pool, &side.deck, &side.discard] {
        h.update_u32(pile.len() as u32);
        for card in pile.iter() {
            h.update_u32(card.id);
            h.update_str(&card.data.key);
        }
    }
    for trap in &side.traps {
        h.update_opt_u32(trap.as_ref().map(|t| t.card.id));
        h.update_opt_u32(trap.as_ref().map(|t| t.row as u32));
    }
    for column in &side.field {
        for slot in column {
            match slot {
                Some(c) => {
                    h.update_u8(1);
                    hash_combatant(h, c);
                }
                None => h.update_u8(0),
            }
        }
    }
    // Absent on authoritative states, so their hash is unaffected.
    if let Some(c) = &side.concealed {
        h.update_u32(c.hand);
        h.update_u32(c.kindling);
        h.update_u32(c.deck);
        for row in &c.trap_rows {
            h.update_opt_u32(row.map(u32::from));
        }
    }
}

fn hash_combatant(h: &mut StateHasher, c: &Combatant) {
    h.update_u32(c.id);
    h.update_str(&c.card.key);
    h.update_i32(c.current_atk);
    h.update_i32(c.current_hp);
    h.update_i32(c.max_hp);
    h.update_u32(c.ailments.burn);
    h.update_u32(c.ailments.bleed);
    h.update_bool(c.ailments.paralyzed);
    h.update_u32(c.ailments.paralyze_turns);
    h.update_u32(c.ailments.calamity);
    h.update_bool(c.ailments.calamity_armed);
    h.update_u32(c.ailments.curse);
    h.update_u32(c.ailments.protection);
    h.update_bool(c.tapped);
    h.update_bool(c.can_attack);
    h.update_bool(c.just_summoned);
    h.update_bool(c.attacked_this_turn);
    h.update_bool(c.attack_again);
    h.update_opt_u32(c.latched_to);
    h.update_u32(c.evolution_chain);
}

// =============================================================================
// TESTS
// =============================================================================
