//! Combat Engine
//!
//! Attack resolution is split in two. [`CombatEngine`] borrows the state
//! immutably and produces an [`AttackIntent`] describing everything the
//! attack would do; [`apply_combat_result`] commits an intent. A rejected or
//! discarded intent leaves the state untouched.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::card::{AilmentGrant, CardId};
use crate::game::events::{DamageSource, GameEventData};
use crate::game::state::{Combatant, CombatantRef, GameState, KillOptions, KillOutcome, Side};

/// Why an attack was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttackRejection {
    /// Attacker not on the field.
    #[error("attacker not found")]
    NoAttacker,
    /// Nothing at the target slot.
    #[error("target not found")]
    NoTarget,
    /// Attacker and target share an owner.
    #[error("cannot attack own combatant")]
    SameTeam,
    /// Attacker is in its support column.
    #[error("attacker is not in the combat column")]
    AttackerNotInCombat,
    /// Attacker is tapped.
    #[error("attacker is tapped")]
    AttackerTapped,
    /// Attacker is paralyzed.
    #[error("attacker is paralyzed")]
    AttackerParalyzed,
    /// Attacker entered this turn or already attacked.
    #[error("attacker cannot attack")]
    AttackerCannotAttack,
    /// Attacker is latched onto a different target.
    #[error("attacker must attack its latch target")]
    MustAttackLatchTarget,
    /// Target is a support behind an occupied combat slot.
    #[error("target is shielded")]
    TargetShielded,
}

impl AttackRejection {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            AttackRejection::NoAttacker => "NO_ATTACKER",
            AttackRejection::NoTarget => "NO_TARGET",
            AttackRejection::SameTeam => "SAME_TEAM",
            AttackRejection::AttackerNotInCombat => "ATTACKER_NOT_IN_COMBAT",
            AttackRejection::AttackerTapped => "ATTACKER_TAPPED",
            AttackRejection::AttackerParalyzed => "ATTACKER_PARALYZED",
            AttackRejection::AttackerCannotAttack => "ATTACKER_CANNOT_ATTACK",
            AttackRejection::MustAttackLatchTarget => "MUST_ATTACK_LATCH_TARGET",
            AttackRejection::TargetShielded => "TARGET_SHIELDED",
        }
    }
}

/// One named step of the damage pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageModifier {
    /// Step name.
    pub name: String,
    /// Running total after this step.
    pub total: i32,
}

/// Full damage computation for one hit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageBreakdown {
    /// Damage that lands.
    pub final_damage: i32,
    /// Steps in the order they were applied.
    pub modifiers: Vec<DamageModifier>,
    /// A protection charge absorbed the hit.
    pub blocked: bool,
}

impl DamageBreakdown {
    fn step(&mut self, name: &str, total: i32) {
        self.modifiers.push(DamageModifier { name: name.to_string(), total });
        self.final_damage = total;
    }

    /// Running total after the named step, if it was applied.
    pub fn total_after(&self, name: &str) -> Option<i32> {
        self.modifiers.iter().find(|m| m.name == name).map(|m| m.total)
    }
}

/// How the attacker is spent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Exhaustion {
    /// Tapped and marked as having attacked.
    Tapped,
    /// Marked as having attacked, stays untapped.
    Marked,
    /// An attack-again grant was consumed; stays ready.
    GrantConsumed,
}

/// A mutation the intent commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StateChange {
    /// HP delta (negative is damage).
    Hp {
        /// Instance.
        id: CardId,
        /// Delta.
        delta: i32,
        /// Damage source for negative deltas.
        source: DamageSource,
    },
    /// One protection charge spent.
    ConsumeProtection {
        /// Instance.
        id: CardId,
    },
    /// Attacker readiness after the attack.
    Exhaust {
        /// Instance.
        id: CardId,
        /// Mode.
        mode: Exhaustion,
    },
    /// Attacker latches onto the target.
    Latch {
        /// Attacker.
        id: CardId,
        /// Target.
        target: CardId,
    },
}

/// Descriptive effect of an attack, in resolution order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CombatEffect {
    /// Damage landed.
    Damage {
        /// Who took it.
        target: CombatantRef,
        /// Amount.
        amount: i32,
        /// Attack, cleave or overkill.
        source: DamageSource,
    },
    /// Protection absorbed a hit.
    Blocked {
        /// Who was protected.
        target: CombatantRef,
    },
    /// On-hit ailment.
    Ailment {
        /// Who receives it.
        target: CombatantRef,
        /// What.
        grant: AilmentGrant,
    },
    /// Attacker healed by lifesteal.
    Lifesteal {
        /// The attacker.
        attacker: CombatantRef,
        /// HP restored.
        amount: i32,
    },
}

/// Everything an attack would do, computed without mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackIntent {
    /// Attacker snapshot.
    pub attacker: CombatantRef,
    /// Target snapshot.
    pub target: CombatantRef,
    /// Damage on the primary target.
    pub damage: DamageBreakdown,
    /// Effects in order.
    pub effects: Vec<CombatEffect>,
    /// Instances that die, in kill order.
    pub deaths: Vec<CardId>,
    /// Mutations to commit.
    pub state_changes: Vec<StateChange>,
}

/// Per-call attack resolver over a borrowed state.
pub struct CombatEngine<'a> {
    state: &'a GameState,
}

impl<'a> CombatEngine<'a> {
    /// Borrow the state for one resolution.
    pub fn new(state: &'a GameState) -> Self {
        Self { state }
    }

    /// Check whether `attacker_id` may attack `target_id`.
    pub fn validate_attack(&self, attacker_id: CardId, target_id: CardId) -> Result<(), AttackRejection> {
        let attacker = self.state.combatant(attacker_id).ok_or(AttackRejection::NoAttacker)?;
        let target = self.state.combatant(target_id).ok_or(AttackRejection::NoTarget)?;
        self.check(attacker, target)
    }

    fn check(&self, attacker: &Combatant, target: &Combatant) -> Result<(), AttackRejection> {
        if attacker.owner == target.owner {
            return Err(AttackRejection::SameTeam);
        }
        if !attacker.in_combat() {
            return Err(AttackRejection::AttackerNotInCombat);
        }
        if attacker.ailments.paralyzed {
            return Err(AttackRejection::AttackerParalyzed);
        }
        if attacker.tapped {
            return Err(AttackRejection::AttackerTapped);
        }
        let ready = attacker.can_attack && !attacker.just_summoned;
        if !(ready || attacker.attack_again) || attacker.attacked_this_turn {
            return Err(AttackRejection::AttackerCannotAttack);
        }
        if let Some(latched) = attacker.latched_to {
            if latched != target.id && self.state.combatant(latched).is_some() {
                return Err(AttackRejection::MustAttackLatchTarget);
            }
        }
        if !target.in_combat() && self.state.get_combatant(target.owner, target.row).is_some() {
            return Err(AttackRejection::TargetShielded);
        }
        Ok(())
    }

    /// Damage `attacker` would deal to `target`, every step recorded.
    ///
    /// Order: base effective attack, support attack, conditional bonuses,
    /// tapped doubling, bleed doubling, flat reduction, protection, warding
    /// support, clamp.
    pub fn calculate_damage(&self, attacker: &Combatant, target: &Combatant) -> DamageBreakdown {
        let mut out = DamageBreakdown::default();
        let abilities = &attacker.abilities;
        let focus = abilities.focus;

        let mut dmg = self.state.get_effective_atk(attacker);
        out.step("base", dmg);

        if attacker.in_combat() {
            if let Some(support) = self.state.active_support(attacker.owner, attacker.row) {
                dmg += support.current_atk;
                out.step("support", dmg);
            }
        }

        if abilities.bonus_vs_paralyzed != 0 && target.ailments.paralyzed {
            dmg += abilities.bonus_vs_paralyzed;
            out.step("bonusVsParalyzed", dmg);
        }
        if abilities.bonus_vs_ailment != 0 && target.ailments.any() {
            dmg += abilities.bonus_vs_ailment;
            out.step("bonusVsAilment", dmg);
        }
        if abilities.bonus_vs_burning != 0 && target.ailments.burn > 0 {
            dmg += abilities.bonus_vs_burning;
            out.step("bonusVsBurning", dmg);
        }

        if abilities.double_damage_vs_tapped && target.tapped {
            dmg *= 2;
            out.step("doubleVsTapped", dmg);
        }
        if target.ailments.bleed > 0 {
            dmg *= 2;
            out.step("bleeding", dmg);
        }

        if target.abilities.damage_reduction > 0 && !focus {
            dmg -= target.abilities.damage_reduction;
            out.step("damageReduction", dmg);
        }

        if target.ailments.protection > 0 && !focus {
            dmg = 0;
            out.blocked = true;
            out.step("protection", dmg);
        }

        if !out.blocked && dmg > 0 {
            if let Some(warden) = self.state.support_of(target) {
                let negated = self.state.is_support_negated(target.owner, target.row);
                if warden.abilities.warding_support && !negated {
                    dmg = if attacker.ailments.any() { dmg / 2 } else { dmg - 1 };
                    out.step("wardingSupport", dmg);
                }
            }
        }

        out.step("clamp", dmg.max(0));
        out
    }

    /// Build the intent for `attacker_id` attacking the slot at
    /// (`target_owner`, `col`, `row`).
    pub fn resolve_attack(
        &self,
        attacker_id: CardId,
        target_owner: Side,
        col: u8,
        row: u8,
    ) -> Result<AttackIntent, AttackRejection> {
        let attacker = self.state.combatant(attacker_id).ok_or(AttackRejection::NoAttacker)?;
        let target = self
            .state
            .get_field_cryptid(target_owner, col, row)
            .ok_or(AttackRejection::NoTarget)?;
        self.check(attacker, target)?;

        let mut effects = Vec::new();
        let mut changes = Vec::new();
        // Projected HP of everyone touched by this attack.
        let mut hp: BTreeMap<CardId, i32> = BTreeMap::new();
        let mut hit = |who: &Combatant,
                       amount: i32,
                       source: DamageSource,
                       effects: &mut Vec<CombatEffect>,
                       changes: &mut Vec<StateChange>| {
            let entry = hp.entry(who.id).or_insert(who.current_hp);
            *entry -= amount;
            if amount > 0 {
                effects.push(CombatEffect::Damage { target: who.to_ref(), amount, source });
                changes.push(StateChange::Hp { id: who.id, delta: -amount, source });
            }
            *entry
        };

        let damage = self.calculate_damage(attacker, target);
        if damage.blocked {
            effects.push(CombatEffect::Blocked { target: target.to_ref() });
            changes.push(StateChange::ConsumeProtection { id: target.id });
        }
        let target_hp = hit(target, damage.final_damage, DamageSource::Attack, &mut effects, &mut changes);

        let mut secondary_deaths = Vec::new();

        // Destroyer carries overkill into the target's support.
        if attacker.abilities.destroyer && target_hp < 0 {
            if let Some(support) = self.state.support_of(target) {
                let support_hp = hit(support, -target_hp, DamageSource::Overkill, &mut effects, &mut changes);
                if support_hp <= 0 {
                    secondary_deaths.push(support.id);
                }
            }
        }

        // Cleave lands on the other occupant of the target's row.
        if attacker.abilities.cleave {
            let other_col = if target.col == 0 { 1 } else { 0 };
            if let Some(other) = self.state.get_field_cryptid(target.owner, other_col, target.row) {
                let cleave = self.calculate_damage(attacker, other);
                if cleave.blocked {
                    effects.push(CombatEffect::Blocked { target: other.to_ref() });
                    changes.push(StateChange::ConsumeProtection { id: other.id });
                }
                let other_hp = hit(other, cleave.final_damage, DamageSource::Cleave, &mut effects, &mut changes);
                if other_hp <= 0 && !secondary_deaths.contains(&other.id) {
                    secondary_deaths.push(other.id);
                }
            }
        }

        let target_dies = target_hp <= 0;

        if !damage.blocked && !target_dies && damage.final_damage > 0 {
            for grant in &attacker.abilities.on_hit {
                effects.push(CombatEffect::Ailment { target: target.to_ref(), grant: *grant });
            }
        }

        if attacker.abilities.lifesteal && damage.final_damage > 0 {
            let healed = damage.final_damage.min(attacker.max_hp - attacker.current_hp).max(0);
            if healed > 0 {
                effects.push(CombatEffect::Lifesteal { attacker: attacker.to_ref(), amount: healed });
                changes.push(StateChange::Hp { id: attacker.id, delta: healed, source: DamageSource::Attack });
            }
        }

        let mode = if attacker.attack_again {
            Exhaustion::GrantConsumed
        } else if attacker.abilities.no_tap || attacker.abilities.focus {
            Exhaustion::Marked
        } else {
            Exhaustion::Tapped
        };
        changes.push(StateChange::Exhaust { id: attacker.id, mode });

        if attacker.abilities.latch && !target_dies {
            changes.push(StateChange::Latch { id: attacker.id, target: target.id });
        }

        // Supports die before the combatant they back so a dead support is
        // never promoted.
        let mut deaths = secondary_deaths;
        if target_dies {
            deaths.push(target.id);
        }

        Ok(AttackIntent {
            attacker: attacker.to_ref(),
            target: target.to_ref(),
            damage,
            effects,
            deaths,
            state_changes: changes,
        })
    }
}

/// Commit an intent: state changes, then ailments, then deaths.
pub fn apply_combat_result(state: &mut GameState, intent: &AttackIntent) -> Vec<KillOutcome> {
    state.push(GameEventData::Attacked {
        attacker: intent.attacker.clone(),
        target: intent.target.clone(),
        damage: intent.damage.final_damage,
    });

    for change in &intent.state_changes {
        match *change {
            StateChange::Hp { id, delta, source } => {
                if delta < 0 {
                    state.deal_damage(id, -delta, source);
                } else {
                    state.heal(id, delta);
                }
            }
            StateChange::ConsumeProtection { id } => {
                if let Some(c) = state.combatant_mut(id) {
                    c.ailments.protection = c.ailments.protection.saturating_sub(1);
                    let charges_left = c.ailments.protection;
                    let target = c.to_ref();
                    state.push(GameEventData::ProtectionBlocked { target, charges_left });
                }
            }
            StateChange::Exhaust { id, mode } => {
                if let Some(c) = state.combatant_mut(id) {
                    match mode {
                        Exhaustion::Tapped => {
                            c.tapped = true;
                            c.attacked_this_turn = true;
                        }
                        Exhaustion::Marked => c.attacked_this_turn = true,
                        Exhaustion::GrantConsumed => c.attack_again = false,
                    }
                }
            }
            StateChange::Latch { id, target } => {
                if let Some(c) = state.combatant_mut(id) {
                    c.latched_to = Some(target);
                }
            }
        }
    }

    for effect in &intent.effects {
        if let CombatEffect::Ailment { target, grant } = effect {
            state.apply_ailment(target.instance_id, grant.kind, grant.stacks);
        }
    }

    intent
        .deaths
        .iter()
        .map(|&id| state.kill_cryptid(id, Some(intent.attacker.owner), KillOptions::default()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::card::AilmentKind;
    use crate::game::state::tests::{creature, new_state, place};

    fn ready(state: &mut GameState, id: CardId) {
        let c = state.combatant_mut(id).unwrap();
        c.just_summoned = false;
        c.can_attack = true;
    }

    #[test]
    fn test_basic_attack() {
        let mut state = new_state();
        let attacker = place(&mut state, Side::A, 1, 0, creature("a", 3, 4));
        let target = place(&mut state, Side::B, 0, 0, creature("t", 1, 5));
        ready(&mut state, attacker);

        let intent = CombatEngine::new(&state).resolve_attack(attacker, Side::B, 0, 0).unwrap();
        assert_eq!(intent.damage.final_damage, 3);
        assert!(intent.deaths.is_empty());

        apply_combat_result(&mut state, &intent);
        assert_eq!(state.combatant(target).unwrap().current_hp, 2);
        assert!(state.combatant(attacker).unwrap().tapped);
    }

    #[test]
    fn test_resolve_does_not_mutate() {
        let mut state = new_state();
        let attacker = place(&mut state, Side::A, 1, 0, creature("a", 3, 4));
        place(&mut state, Side::B, 0, 0, creature("t", 1, 5));
        ready(&mut state, attacker);
        let before = state.compute_hash();
        let _ = CombatEngine::new(&state).resolve_attack(attacker, Side::B, 0, 0).unwrap();
        assert_eq!(state.compute_hash(), before);
    }

    #[test]
    fn test_lethal_attack_promotes_support() {
        let mut state = new_state();
        let attacker = place(&mut state, Side::A, 1, 1, creature("a", 3, 4));
        let target = place(&mut state, Side::B, 0, 1, creature("t", 1, 2));
        let support = place(&mut state, Side::B, 1, 1, creature("s", 1, 3));
        ready(&mut state, attacker);
        state.combatant_mut(support).unwrap().tapped = true;

        let intent = CombatEngine::new(&state).resolve_attack(attacker, Side::B, 0, 1).unwrap();
        assert_eq!(intent.deaths, vec![target]);
        let outcomes = apply_combat_result(&mut state, &intent);

        assert_eq!(outcomes[0].promoted.as_ref().map(|p| p.instance_id), Some(support));
        let promoted = state.get_combatant(Side::B, 1).unwrap();
        assert_eq!(promoted.id, support);
        assert!(!promoted.tapped);
        assert!(promoted.can_attack);
        assert_eq!(state.side(Side::B).deaths, 1);
    }

    #[test]
    fn test_protection_blocks_and_consumes_charge() {
        let mut state = new_state();
        let attacker = place(&mut state, Side::A, 1, 0, creature("a", 3, 4));
        let target = place(&mut state, Side::B, 0, 0, creature("t", 1, 2));
        ready(&mut state, attacker);
        state.combatant_mut(target).unwrap().ailments.protection = 1;

        let intent = CombatEngine::new(&state).resolve_attack(attacker, Side::B, 0, 0).unwrap();
        assert!(intent.damage.blocked);
        assert_eq!(intent.damage.final_damage, 0);
        assert!(intent.deaths.is_empty());

        apply_combat_result(&mut state, &intent);
        let t = state.combatant(target).unwrap();
        assert_eq!(t.ailments.protection, 0);
        assert_eq!(t.current_hp, 2);
    }

    #[test]
    fn test_damage_order_doubles_then_reduces() {
        let mut state = new_state();
        let mut striker = creature("a", 2, 4);
        striker.abilities.double_damage_vs_tapped = true;
        striker.abilities.bonus_vs_ailment = 1;
        let attacker = place(&mut state, Side::A, 1, 0, striker);
        let mut armored = creature("t", 1, 30);
        armored.abilities.damage_reduction = 2;
        let target = place(&mut state, Side::B, 0, 0, armored);
        ready(&mut state, attacker);
        state.combatant_mut(target).unwrap().tapped = true;
        state.apply_ailment(target, AilmentKind::Bleed, 1);

        let engine = CombatEngine::new(&state);
        let a = state.combatant(attacker).unwrap();
        let t = state.combatant(target).unwrap();
        let breakdown = engine.calculate_damage(a, t);
        // (2 + 1) x2 x2 - 2
        assert_eq!(breakdown.final_damage, 10);
        let names: Vec<_> = breakdown.modifiers.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["base", "bonusVsAilment", "doubleVsTapped", "bleeding", "damageReduction", "clamp"]
        );
    }

    #[test]
    fn test_focus_ignores_reduction_and_protection() {
        let mut state = new_state();
        let mut oracle = creature("a", 3, 4);
        oracle.abilities.focus = true;
        let attacker = place(&mut state, Side::A, 1, 0, oracle);
        let mut armored = creature("t", 1, 10);
        armored.abilities.damage_reduction = 2;
        armored.abilities.protection = 1;
        let target = place(&mut state, Side::B, 0, 0, armored);
        ready(&mut state, attacker);

        let intent = CombatEngine::new(&state).resolve_attack(attacker, Side::B, 0, 0).unwrap();
        assert_eq!(intent.damage.final_damage, 3);
        assert!(!intent.damage.blocked);

        apply_combat_result(&mut state, &intent);
        let a = state.combatant(attacker).unwrap();
        assert!(!a.tapped);
        assert!(a.attacked_this_turn);
        assert_eq!(state.combatant(target).unwrap().ailments.protection, 1);
    }

    #[test]
    fn test_support_attack_added_unless_negated() {
        let mut state = new_state();
        let attacker = place(&mut state, Side::A, 1, 2, creature("a", 2, 4));
        place(&mut state, Side::A, 0, 2, creature("s", 3, 2));
        let target = place(&mut state, Side::B, 0, 2, creature("t", 1, 20));
        ready(&mut state, attacker);

        let engine = CombatEngine::new(&state);
        let dmg = engine
            .calculate_damage(state.combatant(attacker).unwrap(), state.combatant(target).unwrap())
            .final_damage;
        assert_eq!(dmg, 5);

        state.combatant_mut(target).unwrap().abilities.negates_enemy_support = true;
        let engine = CombatEngine::new(&state);
        let dmg = engine
            .calculate_damage(state.combatant(attacker).unwrap(), state.combatant(target).unwrap())
            .final_damage;
        assert_eq!(dmg, 2);
    }

    #[test]
    fn test_warding_support_halves_afflicted_attacker() {
        let mut state = new_state();
        let attacker = place(&mut state, Side::A, 1, 0, creature("a", 5, 4));
        let target = place(&mut state, Side::B, 0, 0, creature("t", 1, 20));
        let mut warden = creature("w", 0, 3);
        warden.abilities.warding_support = true;
        place(&mut state, Side::B, 1, 0, warden);
        ready(&mut state, attacker);

        let dmg = |state: &GameState| {
            CombatEngine::new(state)
                .calculate_damage(state.combatant(attacker).unwrap(), state.combatant(target).unwrap())
                .final_damage
        };
        assert_eq!(dmg(&state), 4);
        state.apply_ailment(attacker, AilmentKind::Burn, 1);
        assert_eq!(dmg(&state), 2);
    }

    #[test]
    fn test_validation_reasons() {
        let mut state = new_state();
        let attacker = place(&mut state, Side::A, 1, 0, creature("a", 3, 4));
        let ally = place(&mut state, Side::A, 1, 1, creature("b", 1, 1));
        let back = place(&mut state, Side::A, 0, 2, creature("c", 1, 1));
        let target = place(&mut state, Side::B, 0, 0, creature("t", 1, 5));
        let shielded = place(&mut state, Side::B, 1, 0, creature("s", 1, 5));

        let engine = CombatEngine::new(&state);
        assert_eq!(engine.validate_attack(999, target), Err(AttackRejection::NoAttacker));
        assert_eq!(engine.validate_attack(attacker, 999), Err(AttackRejection::NoTarget));
        assert_eq!(engine.validate_attack(attacker, ally), Err(AttackRejection::SameTeam));
        assert_eq!(engine.validate_attack(back, target), Err(AttackRejection::AttackerNotInCombat));
        assert_eq!(engine.validate_attack(attacker, target), Err(AttackRejection::AttackerCannotAttack));

        ready(&mut state, attacker);
        let engine = CombatEngine::new(&state);
        assert_eq!(engine.validate_attack(attacker, shielded), Err(AttackRejection::TargetShielded));
        assert_eq!(engine.validate_attack(attacker, target), Ok(()));

        state.apply_ailment(attacker, AilmentKind::Paralyze, 1);
        let engine = CombatEngine::new(&state);
        assert_eq!(engine.validate_attack(attacker, target), Err(AttackRejection::AttackerParalyzed));

        let c = state.combatant_mut(attacker).unwrap();
        c.ailments.paralyzed = false;
        assert_eq!(
            CombatEngine::new(&state).validate_attack(attacker, target),
            Err(AttackRejection::AttackerTapped)
        );
        assert_eq!(AttackRejection::TargetShielded.code(), "TARGET_SHIELDED");
    }

    #[test]
    fn test_latch_restricts_targets() {
        let mut state = new_state();
        let mut leech = creature("a", 1, 4);
        leech.abilities.latch = true;
        leech.abilities.no_tap = true;
        let attacker = place(&mut state, Side::A, 1, 0, leech);
        let first = place(&mut state, Side::B, 0, 0, creature("t", 1, 9));
        let second = place(&mut state, Side::B, 0, 1, creature("u", 1, 9));
        ready(&mut state, attacker);

        let intent = CombatEngine::new(&state).resolve_attack(attacker, Side::B, 0, 0).unwrap();
        apply_combat_result(&mut state, &intent);
        let c = state.combatant_mut(attacker).unwrap();
        assert_eq!(c.latched_to, Some(first));
        c.attacked_this_turn = false;

        assert_eq!(
            CombatEngine::new(&state).validate_attack(attacker, second),
            Err(AttackRejection::MustAttackLatchTarget)
        );
    }

    #[test]
    fn test_attack_again_grant_is_consumed_instead_of_tapping() {
        let mut state = new_state();
        let attacker = place(&mut state, Side::A, 1, 0, creature("a", 1, 4));
        place(&mut state, Side::B, 0, 0, creature("t", 1, 9));
        ready(&mut state, attacker);
        state.combatant_mut(attacker).unwrap().attack_again = true;

        let intent = CombatEngine::new(&state).resolve_attack(attacker, Side::B, 0, 0).unwrap();
        apply_combat_result(&mut state, &intent);
        let c = state.combatant(attacker).unwrap();
        assert!(!c.tapped);
        assert!(!c.attack_again);

        let intent = CombatEngine::new(&state).resolve_attack(attacker, Side::B, 0, 0).unwrap();
        apply_combat_result(&mut state, &intent);
        assert!(state.combatant(attacker).unwrap().tapped);
    }

    #[test]
    fn test_attack_again_grant_overrides_cannot_attack() {
        let mut state = new_state();
        let attacker = place(&mut state, Side::A, 1, 0, creature("a", 1, 4));
        let target = place(&mut state, Side::B, 0, 0, creature("t", 1, 9));
        {
            let c = state.combatant_mut(attacker).unwrap();
            c.can_attack = false;
            c.just_summoned = true;
        }
        assert_eq!(
            CombatEngine::new(&state).validate_attack(attacker, target),
            Err(AttackRejection::AttackerCannotAttack)
        );

        state.combatant_mut(attacker).unwrap().attack_again = true;
        assert_eq!(CombatEngine::new(&state).validate_attack(attacker, target), Ok(()));

        let intent = CombatEngine::new(&state).resolve_attack(attacker, Side::B, 0, 0).unwrap();
        apply_combat_result(&mut state, &intent);
        assert!(!state.combatant(attacker).unwrap().attack_again);
        assert_eq!(
            CombatEngine::new(&state).validate_attack(attacker, target),
            Err(AttackRejection::AttackerCannotAttack)
        );
    }

    #[test]
    fn test_on_hit_ailment_and_lifesteal() {
        let mut state = new_state();
        let mut newt = creature("a", 2, 5);
        newt.abilities.lifesteal = true;
        newt.abilities.on_hit = vec![AilmentGrant { kind: AilmentKind::Burn, stacks: 2 }];
        let attacker = place(&mut state, Side::A, 1, 0, newt);
        let target = place(&mut state, Side::B, 0, 0, creature("t", 1, 9));
        ready(&mut state, attacker);
        state.combatant_mut(attacker).unwrap().current_hp = 4;

        let intent = CombatEngine::new(&state).resolve_attack(attacker, Side::B, 0, 0).unwrap();
        apply_combat_result(&mut state, &intent);
        assert_eq!(state.combatant(target).unwrap().ailments.burn, 2);
        assert_eq!(state.combatant(attacker).unwrap().current_hp, 5);
    }

    #[test]
    fn test_destroyer_overkill_kills_support_without_promotion() {
        let mut state = new_state();
        let mut brute = creature("a", 6, 5);
        brute.abilities.destroyer = true;
        let attacker = place(&mut state, Side::A, 1, 0, brute);
        let target = place(&mut state, Side::B, 0, 0, creature("t", 1, 2));
        let support = place(&mut state, Side::B, 1, 0, creature("s", 1, 3));
        ready(&mut state, attacker);

        let intent = CombatEngine::new(&state).resolve_attack(attacker, Side::B, 0, 0).unwrap();
        assert_eq!(intent.deaths, vec![support, target]);
        let outcomes = apply_combat_result(&mut state, &intent);
        assert!(outcomes.iter().all(|o| o.promoted.is_none()));
        assert!(state.get_combatant(Side::B, 0).is_none());
        assert_eq!(state.side(Side::B).deaths, 2);
    }

    #[test]
    fn test_cleave_hits_other_occupant() {
        let mut state = new_state();
        let mut stag = creature("a", 2, 5);
        stag.abilities.cleave = true;
        let attacker = place(&mut state, Side::A, 1, 0, stag);
        let target = place(&mut state, Side::B, 0, 0, creature("t", 1, 9));
        let support = place(&mut state, Side::B, 1, 0, creature("s", 0, 9));
        ready(&mut state, attacker);

        let intent = CombatEngine::new(&state).resolve_attack(attacker, Side::B, 0, 0).unwrap();
        apply_combat_result(&mut state, &intent);
        assert_eq!(state.combatant(target).unwrap().current_hp, 7);
        assert_eq!(state.combatant(support).unwrap().current_hp, 7);
    }
}
