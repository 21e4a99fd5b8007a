//! Turn Processor
//!
//! Phase and turn state machine, plus trap resolution. Phases run
//! `conjure1 -> deploy -> conjure2 -> combat -> end`; leaving `end` hands the
//! turn to the other side at `conjure1`. Entering `end` runs the end-of-turn
//! ticks; starting a turn runs the start-of-turn refresh.

use tracing::debug;

use crate::game::card::{CardId, TrapEffect, TrapTrigger};
use crate::game::events::{DamageSource, GameEventData};
use crate::game::state::{CombatantRef, GameOver, GameState, KillOptions, Phase, Side};

/// Stateless driver over a [`GameState`].
pub struct TurnProcessor;

impl TurnProcessor {
    /// Open the match: the first side's first turn.
    pub fn begin_match(state: &mut GameState) {
        let first = state.first_side;
        Self::process_start_turn(state, first);
    }

    /// Start-of-turn processing for `owner`.
    pub fn process_start_turn(state: &mut GameState, owner: Side) {
        if owner == state.first_side {
            state.turn += 1;
        }
        state.active = owner;
        state.phase = Phase::Conjure1;
        let turn = state.turn;
        state.push(GameEventData::TurnStarted { side: owner, turn });

        state.untap_all(owner);
        state.tick_start_ailments(owner);
        state.reset_turn_flags(owner);

        let income = state.rules.pyre_per_turn as i32;
        if income > 0 {
            state.modify_pyre(owner, income);
        }

        if !state.side(owner).kindling_pool.is_empty() {
            state.draw_kindling(owner);
        }
        if state.draw_card(owner).is_none() {
            state.push(GameEventData::EmptyDeckPenalty { side: owner });
            state.modify_pyre(owner, -1);
        }
        debug!(side = ?owner, turn, "Turn started");
    }

    /// End-of-turn processing for `owner`: burn and bleed ticks, calamity,
    /// then the opponent's end-of-turn traps.
    pub fn process_end_turn(state: &mut GameState, owner: Side) {
        let doomed = state.tick_end_ailments(owner);
        for id in doomed {
            state.kill_cryptid(id, None, KillOptions::default());
        }
        if !state.is_over() {
            fire_traps(state, owner.opponent(), TrapTrigger::EnemyTurnEnd, None);
        }
        state.push(GameEventData::TurnEnded { side: owner });
    }

    /// Move a row's support into its empty combat slot.
    pub fn process_promotion(state: &mut GameState, owner: Side, row: u8) -> Option<CombatantRef> {
        state.promote_support(owner, row)
    }

    /// Death-threshold check.
    pub fn check_game_over(state: &mut GameState) -> Option<GameOver> {
        state.evaluate_game_over()
    }

    /// Advance one phase. Leaving `end` passes the turn.
    pub fn advance_phase(state: &mut GameState) -> Phase {
        if state.is_over() {
            return state.phase;
        }
        let side = state.active;
        let from = state.phase;
        let to = from.next();
        state.push(GameEventData::PhaseChanged { side, from, to });

        if from == Phase::End {
            Self::process_start_turn(state, side.opponent());
        } else {
            state.phase = to;
            if to == Phase::End {
                Self::process_end_turn(state, side);
            }
        }
        state.phase
    }

    /// Advance until the turn passes to the opponent or the match ends.
    pub fn end_turn(state: &mut GameState) {
        let side = state.active;
        while state.active == side && !state.is_over() {
            Self::advance_phase(state);
        }
    }
}

/// Fire every trap owned by `owner` that matches `trigger`.
///
/// `subject` is the enemy combatant that sprang the trap (attacker or
/// summoned creature). Row-bound triggers only fire for traps guarding the
/// subject's row. End-of-turn traps target the enemy combatant on their row.
/// Returns the number of traps fired.
pub fn fire_traps(state: &mut GameState, owner: Side, trigger: TrapTrigger, subject: Option<CardId>) -> usize {
    let subject_row = subject.and_then(|id| state.combatant(id)).map(|c| c.row);
    let mut fired = 0;

    for slot in 0..state.side(owner).traps.len() {
        if state.is_over() {
            break;
        }
        let Some(trap) = state.side(owner).traps[slot].clone() else { continue };
        let Some(spec) = trap.card.data.trap.clone() else { continue };
        if spec.trigger != trigger {
            continue;
        }

        let target_id = match trigger {
            TrapTrigger::EnemyAttack | TrapTrigger::EnemySummon => {
                if subject_row != Some(trap.row) {
                    continue;
                }
                subject
            }
            TrapTrigger::EnemyTurnEnd => state.get_combatant(owner.opponent(), trap.row).map(|c| c.id),
        };
        // A subject that died to an earlier trap no longer springs this one.
        if target_id.is_some() && target_id.and_then(|id| state.combatant(id)).is_none() {
            continue;
        }

        state.side_mut(owner).traps[slot] = None;
        let target = target_id.and_then(|id| state.combatant(id)).map(|c| c.to_ref());
        state.push(GameEventData::TrapTriggered {
            side: owner,
            slot: slot as u8,
            key: trap.card.data.key.clone(),
            name: trap.card.data.name.clone(),
            target,
        });

        match spec.effect {
            TrapEffect::Damage { amount } => {
                if let Some(id) = target_id {
                    if let Some(hp) = state.deal_damage(id, amount, DamageSource::Trap) {
                        if hp <= 0 {
                            state.kill_cryptid(id, Some(owner), KillOptions::default());
                        }
                    }
                }
            }
            TrapEffect::Ailment(grant) => {
                if let Some(id) = target_id {
                    state.apply_ailment(id, grant.kind, grant.stacks);
                }
            }
            TrapEffect::GainPyre { amount } => {
                state.modify_pyre(owner, amount as i32);
            }
        }

        state.side_mut(owner).discard.push(trap.card);
        fired += 1;
    }
    fired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::card::{AilmentGrant, AilmentKind, CardData, CardKind, TrapSpec};
    use crate::game::state::tests::{creature, new_state, place};
    use crate::game::state::TrapSlot;

    fn trap_card(key: &str, trigger: TrapTrigger, effect: TrapEffect) -> CardData {
        let mut card = creature(key, 0, 0);
        card.kind = CardKind::Trap;
        card.trap = Some(TrapSpec { trigger, effect });
        card
    }

    fn fill_deck(state: &mut GameState, side: Side, n: usize) {
        for i in 0..n {
            let card = state.instantiate(creature(&format!("filler{i}"), 1, 1));
            state.side_mut(side).deck.push(card);
        }
    }

    #[test]
    fn test_turn_counter_increments_on_first_side_only() {
        let mut state = new_state();
        fill_deck(&mut state, Side::A, 5);
        fill_deck(&mut state, Side::B, 5);
        TurnProcessor::begin_match(&mut state);
        assert_eq!(state.turn, 1);
        assert_eq!(state.active, Side::A);

        TurnProcessor::end_turn(&mut state);
        assert_eq!(state.active, Side::B);
        assert_eq!(state.turn, 1);
        assert_eq!(state.phase, Phase::Conjure1);

        TurnProcessor::end_turn(&mut state);
        assert_eq!(state.active, Side::A);
        assert_eq!(state.turn, 2);
    }

    #[test]
    fn test_phase_sequence() {
        let mut state = new_state();
        fill_deck(&mut state, Side::A, 2);
        fill_deck(&mut state, Side::B, 2);
        TurnProcessor::begin_match(&mut state);
        let phases: Vec<Phase> = (0..5).map(|_| TurnProcessor::advance_phase(&mut state)).collect();
        assert_eq!(
            phases,
            vec![Phase::Deploy, Phase::Conjure2, Phase::Combat, Phase::End, Phase::Conjure1]
        );
        assert_eq!(state.active, Side::B);
    }

    #[test]
    fn test_start_turn_draws_and_gains_pyre() {
        let mut state = new_state();
        fill_deck(&mut state, Side::A, 3);
        let kindling = state.instantiate(creature("spark", 1, 1));
        state.side_mut(Side::A).kindling_pool.push(kindling);

        TurnProcessor::process_start_turn(&mut state, Side::A);
        let side = state.side(Side::A);
        assert_eq!(side.hand.len(), 2);
        assert_eq!(side.deck.len(), 2);
        assert!(side.kindling_pool.is_empty());
        assert_eq!(side.pyre, 1);
    }

    #[test]
    fn test_empty_deck_costs_pyre() {
        let mut state = new_state();
        state.side_mut(Side::B).pyre = 3;
        TurnProcessor::process_start_turn(&mut state, Side::B);
        // +1 income, -1 penalty
        assert_eq!(state.side(Side::B).pyre, 3);
        assert!(state.take_events().iter().any(|e| e.name() == "emptyDeck"));
    }

    #[test]
    fn test_start_turn_refreshes_and_keeps_paralyzed_tapped() {
        let mut state = new_state();
        fill_deck(&mut state, Side::A, 2);
        let fresh = place(&mut state, Side::A, 1, 0, creature("fresh", 1, 3));
        let stunned = place(&mut state, Side::A, 1, 1, creature("stunned", 1, 3));
        state.apply_ailment(stunned, AilmentKind::Paralyze, 1);
        state.apply_ailment(fresh, AilmentKind::Curse, 1);

        TurnProcessor::process_start_turn(&mut state, Side::A);
        let f = state.combatant(fresh).unwrap();
        assert!(f.can_attack && !f.just_summoned && !f.tapped);
        assert_eq!(f.ailments.curse, 0);

        let s = state.combatant(stunned).unwrap();
        assert!(s.tapped);
        assert!(!s.ailments.paralyzed);

        TurnProcessor::process_start_turn(&mut state, Side::A);
        assert!(!state.combatant(stunned).unwrap().tapped);
    }

    #[test]
    fn test_end_turn_burn_kills_and_promotes() {
        let mut state = new_state();
        let front = place(&mut state, Side::A, 1, 0, creature("front", 1, 1));
        let back = place(&mut state, Side::A, 0, 0, creature("back", 1, 3));
        state.apply_ailment(front, AilmentKind::Burn, 1);

        TurnProcessor::process_end_turn(&mut state, Side::A);
        assert!(state.combatant(front).is_none());
        assert_eq!(state.get_combatant(Side::A, 0).map(|c| c.id), Some(back));
        assert_eq!(state.side(Side::A).deaths, 1);
    }

    #[test]
    fn test_enemy_turn_end_trap_fires_once() {
        let mut state = new_state();
        let victim = place(&mut state, Side::A, 1, 2, creature("victim", 1, 5));
        let card = state.instantiate(trap_card(
            "ember_snare",
            TrapTrigger::EnemyTurnEnd,
            TrapEffect::Ailment(AilmentGrant { kind: AilmentKind::Burn, stacks: 2 }),
        ));
        state.side_mut(Side::B).traps[0] = Some(TrapSlot { card, row: 2 });

        TurnProcessor::process_end_turn(&mut state, Side::A);
        assert_eq!(state.combatant(victim).unwrap().ailments.burn, 2);
        assert!(state.side(Side::B).traps[0].is_none());
        assert_eq!(state.side(Side::B).discard.len(), 1);

        TurnProcessor::process_end_turn(&mut state, Side::A);
        assert_eq!(state.combatant(victim).unwrap().ailments.burn, 1);
    }

    #[test]
    fn test_attack_trap_only_fires_on_its_row() {
        let mut state = new_state();
        let attacker = place(&mut state, Side::A, 1, 1, creature("attacker", 2, 2));
        let card = state.instantiate(trap_card("pit", TrapTrigger::EnemyAttack, TrapEffect::Damage { amount: 2 }));
        state.side_mut(Side::B).traps[1] = Some(TrapSlot { card, row: 0 });

        assert_eq!(fire_traps(&mut state, Side::B, TrapTrigger::EnemyAttack, Some(attacker)), 0);

        state.side_mut(Side::B).traps[1].as_mut().unwrap().row = 1;
        assert_eq!(fire_traps(&mut state, Side::B, TrapTrigger::EnemyAttack, Some(attacker)), 1);
        assert!(state.combatant(attacker).is_none());
        assert_eq!(state.side(Side::A).deaths, 1);
    }

    #[test]
    fn test_no_phase_change_after_game_over() {
        let mut state = new_state();
        state.side_mut(Side::A).deaths = 10;
        state.evaluate_game_over();
        let phase = state.phase;
        assert_eq!(TurnProcessor::advance_phase(&mut state), phase);
    }
}
