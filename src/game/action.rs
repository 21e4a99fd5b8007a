//! Player Actions
//!
//! Everything a peer can ask the authority to do, the validation taxonomy
//! for refusing it, and [`process_action`], which validates completely before
//! touching the state and then resolves the action through the state, combat
//! engine and turn processor.

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::debug;

use crate::game::animation::{build_sequence, AnimationCommand};
use crate::game::card::{CardCatalog, CardData, CardId, CardKind, SpellEffect, SpellTarget, TrapTrigger};
use crate::game::combat::{apply_combat_result, AttackRejection, CombatEngine};
use crate::game::events::{DamageSource, GameEvent, GameEventData, GameOverReason};
use crate::game::state::{in_bounds, GameOver, GameState, KillOptions, Phase, Side, StateError, TrapSlot, ROWS};
use crate::game::turn::{fire_traps, TurnProcessor};

/// Card keys a player brings to a match.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckManifest {
    /// Main deck keys.
    pub deck: Vec<String>,
    /// Explicit opening hand. When empty the opening hand is dealt from the
    /// shuffled deck.
    #[serde(default)]
    pub hand: Vec<String>,
    /// Kindling pool keys.
    #[serde(default)]
    pub kindling: Vec<String>,
}

/// Player intent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    /// Seat announcement; carries no state change.
    Join,
    /// Summon a cryptid from hand.
    Summon { card_id: CardId, col: u8, row: u8 },
    /// Summon a kindling from hand (free, once per turn).
    PlayKindling { card_id: CardId, col: u8, row: u8 },
    /// Evolve an own cryptid in place.
    Evolve { card_id: CardId, col: u8, row: u8 },
    /// Attack an enemy slot.
    Attack {
        attacker_id: CardId,
        target_owner: Side,
        target_col: u8,
        target_row: u8,
    },
    /// Cast a burst at a combatant.
    CastBurst {
        card_id: CardId,
        target_owner: Side,
        col: u8,
        row: u8,
    },
    /// Attach an aura to an own combatant.
    AttachAura { card_id: CardId, col: u8, row: u8 },
    /// Play a pyre card.
    PlayPyre { card_id: CardId },
    /// Convert deaths into pyre (once per turn).
    PyreBurn,
    /// Set a trap face down guarding a row.
    SetTrap { card_id: CardId, row: u8 },
    /// Advance one phase.
    EndPhase,
    /// Advance until the turn passes.
    EndTurn,
    /// Concede.
    Forfeit,
}

impl Action {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Join => "join",
            Action::Summon { .. } => "summon",
            Action::PlayKindling { .. } => "playKindling",
            Action::Evolve { .. } => "evolve",
            Action::Attack { .. } => "attack",
            Action::CastBurst { .. } => "castBurst",
            Action::AttachAura { .. } => "attachAura",
            Action::PlayPyre { .. } => "playPyre",
            Action::PyreBurn => "pyreBurn",
            Action::SetTrap { .. } => "setTrap",
            Action::EndPhase => "endPhase",
            Action::EndTurn => "endTurn",
            Action::Forfeit => "forfeit",
        }
    }
}

/// Reasons an action is refused. A refused action changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// The match has not been initialized.
    #[error("match not started")]
    MatchNotStarted,
    /// The match is already decided.
    #[error("game is over")]
    GameOver,
    /// Only the active side may act.
    #[error("not your turn")]
    NotYourTurn,
    /// Action not allowed in this phase.
    #[error("{action} not allowed during {phase:?}")]
    WrongPhase {
        /// Action kind.
        action: &'static str,
        /// Current phase.
        phase: Phase,
    },
    /// Card id not in the acting side's hand.
    #[error("card {0} not in hand")]
    CardNotInHand(CardId),
    /// Card category does not fit the action.
    #[error("card {0} cannot be used this way")]
    WrongCardKind(CardId),
    /// Not enough pyre.
    #[error("need {need} pyre, have {have}")]
    InsufficientPyre {
        /// Cost.
        need: u32,
        /// Available.
        have: u32,
    },
    /// A cost or pyre gain too large to apply.
    #[error("pyre amount {0} out of range")]
    PyreOutOfRange(u32),
    /// Slot out of range.
    #[error("invalid slot")]
    InvalidSlot,
    /// Slot already occupied.
    #[error("slot occupied")]
    SlotOccupied,
    /// Slot is empty.
    #[error("slot empty")]
    SlotEmpty,
    /// A kindling was already played this turn.
    #[error("kindling already played this turn")]
    KindlingAlreadyPlayed,
    /// A pyre card was already played this turn.
    #[error("pyre card already played this turn")]
    PyreAlreadyPlayed,
    /// Pyre burn already used this turn.
    #[error("pyre burn already used this turn")]
    PyreBurnUsed,
    /// Pyre burn needs at least one death.
    #[error("no deaths to burn")]
    NoDeaths,
    /// Evolution card does not match the occupant.
    #[error("invalid evolution")]
    InvalidEvolution,
    /// Spell target missing or on the wrong side.
    #[error("invalid target")]
    InvalidTarget,
    /// Every trap slot is in use.
    #[error("trap slots full")]
    TrapSlotsFull,
    /// Attack refused.
    #[error("attack rejected: {0}")]
    Attack(#[from] AttackRejection),
    /// Manifest names a card the catalog does not know.
    #[error("unknown card {0}")]
    UnknownCard(String),
    /// Manifest is malformed.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
}

impl ActionError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::MatchNotStarted => "MATCH_NOT_STARTED",
            ActionError::GameOver => "GAME_OVER",
            ActionError::NotYourTurn => "NOT_YOUR_TURN",
            ActionError::WrongPhase { .. } => "WRONG_PHASE",
            ActionError::CardNotInHand(_) => "CARD_NOT_IN_HAND",
            ActionError::WrongCardKind(_) => "WRONG_CARD_KIND",
            ActionError::InsufficientPyre { .. } => "INSUFFICIENT_PYRE",
            ActionError::PyreOutOfRange(_) => "PYRE_OUT_OF_RANGE",
            ActionError::InvalidSlot => "INVALID_SLOT",
            ActionError::SlotOccupied => "SLOT_OCCUPIED",
            ActionError::SlotEmpty => "SLOT_EMPTY",
            ActionError::KindlingAlreadyPlayed => "KINDLING_ALREADY_PLAYED",
            ActionError::PyreAlreadyPlayed => "PYRE_ALREADY_PLAYED",
            ActionError::PyreBurnUsed => "PYRE_BURN_USED",
            ActionError::NoDeaths => "NO_DEATHS",
            ActionError::InvalidEvolution => "INVALID_EVOLUTION",
            ActionError::InvalidTarget => "INVALID_TARGET",
            ActionError::TrapSlotsFull => "TRAP_SLOTS_FULL",
            ActionError::Attack(reason) => reason.code(),
            ActionError::UnknownCard(_) => "UNKNOWN_CARD",
            ActionError::InvalidManifest(_) => "INVALID_MANIFEST",
        }
    }
}

impl From<StateError> for ActionError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::SlotOccupied => ActionError::SlotOccupied,
            StateError::InvalidSlot => ActionError::InvalidSlot,
            StateError::SlotEmpty => ActionError::SlotEmpty,
            StateError::NotACreature => ActionError::InvalidSlot,
        }
    }
}

/// What a resolved action produced.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    /// Domain events in order.
    pub events: Vec<GameEvent>,
    /// Animation sequence derived from the events.
    pub animation: Vec<AnimationCommand>,
    /// Set when this action decided the match.
    pub game_over: Option<GameOver>,
}

impl ActionOutcome {
    fn from_events(events: Vec<GameEvent>, game_over: Option<GameOver>) -> Self {
        let animation = build_sequence(&events);
        Self { events, animation, game_over }
    }
}

// =============================================================================
// MATCH SETUP
// =============================================================================

fn resolve_keys(catalog: &dyn CardCatalog, keys: &[String], kindling: bool) -> Result<Vec<CardData>, ActionError> {
    keys.iter()
        .map(|key| {
            let card = catalog.get(key).ok_or_else(|| ActionError::UnknownCard(key.clone()))?;
            let is_kindling = card.kind == CardKind::Kindling;
            if is_kindling != kindling {
                return Err(ActionError::InvalidManifest(format!(
                    "{key} does not belong in the {}",
                    if kindling { "kindling pool" } else { "deck" }
                )));
            }
            Ok(card.clone())
        })
        .collect()
}

/// Deal both sides from their manifests, pick the opening side and start the
/// first turn.
///
/// The opening coin is always drawn so the RNG stream is the same whether or
/// not `first_side` overrides it. Both manifests are fully validated before
/// the state changes.
pub fn initialize_match(
    state: &mut GameState,
    catalog: &dyn CardCatalog,
    manifests: [&DeckManifest; 2],
    first_side: Option<Side>,
) -> Result<ActionOutcome, ActionError> {
    let mut resolved = Vec::with_capacity(2);
    for manifest in manifests {
        if manifest.deck.is_empty() && manifest.hand.is_empty() {
            return Err(ActionError::InvalidManifest("empty deck".into()));
        }
        let deck = resolve_keys(catalog, &manifest.deck, false)?;
        let hand = resolve_keys(catalog, &manifest.hand, false)?;
        let kindling = resolve_keys(catalog, &manifest.kindling, true)?;
        resolved.push((deck, hand, kindling));
    }

    for (side, (deck, hand, kindling)) in Side::ALL.into_iter().zip(resolved) {
        for data in hand {
            let card = state.instantiate(data);
            state.side_mut(side).hand.push(card);
        }
        let mut pool: Vec<_> = kindling.into_iter().map(|d| state.instantiate(d)).collect();
        let mut cards: Vec<_> = deck.into_iter().map(|d| state.instantiate(d)).collect();
        state.rng.shuffle(&mut pool);
        state.rng.shuffle(&mut cards);
        let s = state.side_mut(side);
        s.kindling_pool = pool;
        s.deck = cards;
    }

    let coin = if state.rng.coin_flip() { Side::A } else { Side::B };
    let first = first_side.unwrap_or(coin);
    state.first_side = first;
    state.active = first;

    for (side, manifest) in Side::ALL.into_iter().zip(manifests) {
        if manifest.hand.is_empty() {
            for _ in 0..state.rules.starting_hand_size {
                if state.draw_card(side).is_none() {
                    break;
                }
            }
        }
    }

    TurnProcessor::begin_match(state);
    let events = state.take_events();
    Ok(ActionOutcome::from_events(events, state.game_over))
}

// =============================================================================
// ACTION PROCESSING
// =============================================================================

/// Validate and resolve one action for `side`.
pub fn process_action(state: &mut GameState, side: Side, action: &Action) -> Result<ActionOutcome, ActionError> {
    if state.is_over() {
        return Err(ActionError::GameOver);
    }

    match action {
        Action::Join => {}
        Action::Forfeit => {
            state.declare_winner(side.opponent(), GameOverReason::Forfeit);
        }
        _ => {
            if state.active != side {
                return Err(ActionError::NotYourTurn);
            }
            resolve(state, side, action)?;
        }
    }

    debug!(side = ?side, action = action.kind(), "Action resolved");
    let events = state.take_events();
    Ok(ActionOutcome::from_events(events, state.game_over))
}

fn require_phase(state: &GameState, action: &Action, ok: bool) -> Result<(), ActionError> {
    if ok {
        Ok(())
    } else {
        Err(ActionError::WrongPhase { action: action.kind(), phase: state.phase })
    }
}

fn hand_card<'a>(state: &'a GameState, side: Side, id: CardId, kind: CardKind) -> Result<&'a CardData, ActionError> {
    let card = state.hand_card(side, id).ok_or(ActionError::CardNotInHand(id))?;
    if card.data.kind != kind {
        return Err(ActionError::WrongCardKind(id));
    }
    Ok(&card.data)
}

fn pyre_amount(amount: u32) -> Result<i32, ActionError> {
    i32::try_from(amount).map_err(|_| ActionError::PyreOutOfRange(amount))
}

/// Check the side can pay `need`; returns the amount to deduct.
fn require_pyre(state: &GameState, side: Side, need: u32) -> Result<i32, ActionError> {
    let cost = pyre_amount(need)?;
    let have = state.side(side).pyre;
    if have < need {
        return Err(ActionError::InsufficientPyre { need, have });
    }
    Ok(cost)
}

fn require_empty_slot(state: &GameState, side: Side, col: u8, row: u8) -> Result<(), ActionError> {
    if !in_bounds(col, row) {
        return Err(ActionError::InvalidSlot);
    }
    if state.get_field_cryptid(side, col, row).is_some() {
        return Err(ActionError::SlotOccupied);
    }
    Ok(())
}

fn pay(state: &mut GameState, side: Side, cost: i32) {
    if cost > 0 {
        state.modify_pyre(side, -cost);
    }
}

fn resolve(state: &mut GameState, side: Side, action: &Action) -> Result<(), ActionError> {
    let phase = state.phase;
    match *action {
        Action::Join | Action::Forfeit => Ok(()),

        Action::Summon { card_id, col, row } => {
            require_phase(state, action, phase == Phase::Deploy)?;
            let cost = hand_card(state, side, card_id, CardKind::Cryptid)?.cost;
            let cost = require_pyre(state, side, cost)?;
            require_empty_slot(state, side, col, row)?;
            summon_from_hand(state, side, card_id, col, row, cost)
        }

        Action::PlayKindling { card_id, col, row } => {
            require_phase(state, action, phase == Phase::Deploy)?;
            hand_card(state, side, card_id, CardKind::Kindling)?;
            if state.side(side).flags.kindling_played {
                return Err(ActionError::KindlingAlreadyPlayed);
            }
            require_empty_slot(state, side, col, row)?;
            state.side_mut(side).flags.kindling_played = true;
            summon_from_hand(state, side, card_id, col, row, 0)
        }

        Action::Evolve { card_id, col, row } => {
            require_phase(state, action, phase == Phase::Deploy)?;
            let card = hand_card(state, side, card_id, CardKind::Cryptid)?;
            let cost = card.cost;
            let parent = card.evolves_from.clone().ok_or(ActionError::InvalidEvolution)?;
            if !in_bounds(col, row) {
                return Err(ActionError::InvalidSlot);
            }
            let occupant = state.get_field_cryptid(side, col, row).ok_or(ActionError::SlotEmpty)?;
            if occupant.key() != parent {
                return Err(ActionError::InvalidEvolution);
            }
            let cost = require_pyre(state, side, cost)?;

            pay(state, side, cost);
            let card = state.take_from_hand(side, card_id).ok_or(ActionError::CardNotInHand(card_id))?;
            state.evolve_cryptid(side, col, row, card)?;
            Ok(())
        }

        Action::Attack { attacker_id, target_owner, target_col, target_row } => {
            require_phase(state, action, phase == Phase::Combat)?;
            match state.combatant(attacker_id) {
                Some(c) if c.owner == side => {}
                _ => return Err(AttackRejection::NoAttacker.into()),
            }
            CombatEngine::new(state).resolve_attack(attacker_id, target_owner, target_col, target_row)?;

            fire_traps(state, side.opponent(), TrapTrigger::EnemyAttack, Some(attacker_id));
            if state.is_over() {
                return Ok(());
            }
            // Traps may have killed or disabled the attacker; the attack then fizzles.
            match CombatEngine::new(state).resolve_attack(attacker_id, target_owner, target_col, target_row) {
                Ok(intent) => {
                    apply_combat_result(state, &intent);
                }
                Err(reason) => debug!(?reason, "Attack fizzled after trap"),
            }
            Ok(())
        }

        Action::CastBurst { card_id, target_owner, col, row } => {
            require_phase(state, action, phase.is_conjure())?;
            let card = hand_card(state, side, card_id, CardKind::Burst)?;
            let (cost, target_rule) = (card.cost, card.target);
            let cost = require_pyre(state, side, cost)?;
            let side_ok = match target_rule {
                SpellTarget::Ally => target_owner == side,
                SpellTarget::Enemy => target_owner != side,
                SpellTarget::Any => true,
            };
            let target_id = state
                .get_field_cryptid(target_owner, col, row)
                .filter(|_| side_ok)
                .map(|c| c.id)
                .ok_or(ActionError::InvalidTarget)?;
            cast_spell(state, side, card_id, cost, target_id)
        }

        Action::AttachAura { card_id, col, row } => {
            require_phase(state, action, phase.is_conjure())?;
            let cost = hand_card(state, side, card_id, CardKind::Aura)?.cost;
            let cost = require_pyre(state, side, cost)?;
            let target_id = state
                .get_field_cryptid(side, col, row)
                .map(|c| c.id)
                .ok_or(ActionError::InvalidTarget)?;
            cast_spell(state, side, card_id, cost, target_id)
        }

        Action::PlayPyre { card_id } => {
            require_phase(state, action, phase.is_conjure())?;
            let gain = pyre_amount(hand_card(state, side, card_id, CardKind::Pyre)?.pyre_gain)?;
            if state.side(side).flags.pyre_spell_played {
                return Err(ActionError::PyreAlreadyPlayed);
            }
            let card = state.take_from_hand(side, card_id).ok_or(ActionError::CardNotInHand(card_id))?;
            state.side_mut(side).flags.pyre_spell_played = true;
            push_card_played(state, side, &card.data, card.id, None);
            state.side_mut(side).discard.push(card);
            state.modify_pyre(side, gain);
            Ok(())
        }

        Action::PyreBurn => {
            require_phase(state, action, phase.is_conjure())?;
            let s = state.side(side);
            if s.flags.pyre_burn_used {
                return Err(ActionError::PyreBurnUsed);
            }
            if s.deaths == 0 {
                return Err(ActionError::NoDeaths);
            }
            let gain = s.deaths as i32;
            state.side_mut(side).flags.pyre_burn_used = true;
            state.modify_pyre(side, gain);
            Ok(())
        }

        Action::SetTrap { card_id, row } => {
            require_phase(state, action, phase.is_conjure())?;
            let cost = hand_card(state, side, card_id, CardKind::Trap)?.cost;
            if row as usize >= ROWS {
                return Err(ActionError::InvalidSlot);
            }
            let cost = require_pyre(state, side, cost)?;
            let slot = state
                .side(side)
                .traps
                .iter()
                .position(Option::is_none)
                .ok_or(ActionError::TrapSlotsFull)?;

            pay(state, side, cost);
            let card = state.take_from_hand(side, card_id).ok_or(ActionError::CardNotInHand(card_id))?;
            state.side_mut(side).traps[slot] = Some(TrapSlot { card, row });
            state.push(GameEventData::TrapSet { side, slot: slot as u8, row });
            Ok(())
        }

        Action::EndPhase => {
            TurnProcessor::advance_phase(state);
            Ok(())
        }

        Action::EndTurn => {
            TurnProcessor::end_turn(state);
            Ok(())
        }
    }
}

fn summon_from_hand(
    state: &mut GameState,
    side: Side,
    card_id: CardId,
    col: u8,
    row: u8,
    cost: i32,
) -> Result<(), ActionError> {
    pay(state, side, cost);
    let card = state.take_from_hand(side, card_id).ok_or(ActionError::CardNotInHand(card_id))?;
    let summoned = state.summon_cryptid(side, col, row, card)?;
    fire_traps(state, side.opponent(), TrapTrigger::EnemySummon, Some(summoned.instance_id));
    Ok(())
}

fn push_card_played(state: &mut GameState, side: Side, data: &CardData, card_id: CardId, target: Option<CardId>) {
    let target = target.and_then(|id| state.combatant(id)).map(|c| c.to_ref());
    state.push(GameEventData::CardPlayed {
        side,
        card_id,
        key: data.key.clone(),
        kind: data.kind,
        target,
    });
}

fn cast_spell(state: &mut GameState, side: Side, card_id: CardId, cost: i32, target_id: CardId) -> Result<(), ActionError> {
    pay(state, side, cost);
    let card = state.take_from_hand(side, card_id).ok_or(ActionError::CardNotInHand(card_id))?;
    push_card_played(state, side, &card.data, card.id, Some(target_id));

    for effect in &card.data.effects {
        if state.combatant(target_id).is_none() {
            break;
        }
        apply_spell_effect(state, side, target_id, effect);
    }
    state.side_mut(side).discard.push(card);
    Ok(())
}

/// Apply one burst or aura effect to a combatant.
pub fn apply_spell_effect(state: &mut GameState, caster: Side, target_id: CardId, effect: &SpellEffect) {
    match *effect {
        SpellEffect::Damage { amount } => {
            if let Some(hp) = state.deal_damage(target_id, amount, DamageSource::Spell) {
                if hp <= 0 {
                    state.kill_cryptid(target_id, Some(caster), KillOptions::default());
                }
            }
        }
        SpellEffect::Heal { amount } => {
            state.heal(target_id, amount);
        }
        SpellEffect::Ailment(grant) => {
            state.apply_ailment(target_id, grant.kind, grant.stacks);
        }
        SpellEffect::Protect { charges } => {
            if let Some(c) = state.combatant_mut(target_id) {
                c.ailments.protection += charges;
            }
        }
        SpellEffect::Cleanse => {
            if let Some(c) = state.combatant_mut(target_id) {
                c.ailments.cleanse();
            }
        }
        SpellEffect::Buff { atk, hp } => {
            if let Some(c) = state.combatant_mut(target_id) {
                c.current_atk = (c.current_atk + atk).max(0);
                c.max_hp += hp;
                c.current_hp += hp;
            }
            if let Some(c) = state.combatant(target_id) {
                if c.current_hp <= 0 {
                    state.kill_cryptid(target_id, Some(caster), KillOptions::default());
                }
            }
        }
        SpellEffect::GrantAttackAgain => {
            if let Some(c) = state.combatant_mut(target_id) {
                c.attack_again = true;
            }
        }
    }
}
