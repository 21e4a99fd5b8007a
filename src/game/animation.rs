//! Animation Sequence
//!
//! Renderer-facing commands derived from the domain events of one action.
//! Each command carries everything needed to play it (names, positions,
//! amounts) so a peer never has to look anything up in its own mirror while
//! the sequence is running.

use serde::{Serialize, Deserialize};

use crate::game::card::AilmentKind;
use crate::game::events::{DamageSource, GameEvent, GameEventData};
use crate::game::state::{CombatantRef, Side};

/// One renderer instruction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AnimationCommand {
    /// A creature appears.
    Summon { cryptid: CombatantRef, from_kindling: bool },
    /// Attacker lunges at target.
    AttackMove { attacker: CombatantRef, target: CombatantRef },
    /// Damage number and HP bar update.
    Damage {
        target: CombatantRef,
        amount: i32,
        hp_after: i32,
        source: DamageSource,
    },
    /// Heal number and HP bar update.
    Heal { target: CombatantRef, amount: i32, hp_after: i32 },
    /// Death effect and removal.
    Death { victim: CombatantRef },
    /// Status icon change.
    StatusApply { target: CombatantRef, ailment: AilmentKind, stacks: u32 },
    /// Support slides forward into combat.
    Promotion { cryptid: CombatantRef, from_col: u8, to_col: u8, row: u8 },
    /// Face-down card placed.
    TrapSet { side: Side, slot: u8, row: u8 },
    /// Trap revealed.
    TrapTrigger { side: Side, key: String, name: String, target: Option<CombatantRef> },
    /// Pyre counter change.
    PyreChange { side: Side, old: u32, new: u32 },
    /// Banner text.
    Message { text: String },
    /// Commands played at the same time.
    Parallel { commands: Vec<AnimationCommand> },
}

impl AnimationCommand {
    /// Command name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            AnimationCommand::Summon { .. } => "summon",
            AnimationCommand::AttackMove { .. } => "attackMove",
            AnimationCommand::Damage { .. } => "damage",
            AnimationCommand::Heal { .. } => "heal",
            AnimationCommand::Death { .. } => "death",
            AnimationCommand::StatusApply { .. } => "statusApply",
            AnimationCommand::Promotion { .. } => "promotion",
            AnimationCommand::TrapSet { .. } => "trapSet",
            AnimationCommand::TrapTrigger { .. } => "trapTrigger",
            AnimationCommand::PyreChange { .. } => "pyreChange",
            AnimationCommand::Message { .. } => "message",
            AnimationCommand::Parallel { .. } => "parallel",
        }
    }

    /// Whether this command, or any nested one, matches `pred`.
    pub fn any(&self, pred: &impl Fn(&AnimationCommand) -> bool) -> bool {
        match self {
            AnimationCommand::Parallel { commands } => commands.iter().any(|c| c.any(pred)),
            other => pred(other),
        }
    }
}

fn side_label(side: Side) -> &'static str {
    match side {
        Side::A => "Side A",
        Side::B => "Side B",
    }
}

fn command_for(event: &GameEvent) -> Option<AnimationCommand> {
    let cmd = match &event.data {
        GameEventData::Summoned { cryptid, from_kindling } => AnimationCommand::Summon {
            cryptid: cryptid.clone(),
            from_kindling: *from_kindling,
        },
        GameEventData::Attacked { attacker, target, .. } => AnimationCommand::AttackMove {
            attacker: attacker.clone(),
            target: target.clone(),
        },
        GameEventData::Damaged { target, amount, source, hp_after } => AnimationCommand::Damage {
            target: target.clone(),
            amount: *amount,
            hp_after: *hp_after,
            source: *source,
        },
        GameEventData::Healed { target, amount, hp_after } => AnimationCommand::Heal {
            target: target.clone(),
            amount: *amount,
            hp_after: *hp_after,
        },
        GameEventData::Died { victim, .. } => AnimationCommand::Death { victim: victim.clone() },
        GameEventData::AilmentApplied { target, ailment, stacks } => AnimationCommand::StatusApply {
            target: target.clone(),
            ailment: *ailment,
            stacks: *stacks,
        },
        GameEventData::Promoted { cryptid, row } => AnimationCommand::Promotion {
            cryptid: cryptid.clone(),
            from_col: cryptid.owner.support_col(),
            to_col: cryptid.owner.combat_col(),
            row: *row,
        },
        GameEventData::TrapSet { side, slot, row } => AnimationCommand::TrapSet {
            side: *side,
            slot: *slot,
            row: *row,
        },
        GameEventData::TrapTriggered { side, key, name, target, .. } => AnimationCommand::TrapTrigger {
            side: *side,
            key: key.clone(),
            name: name.clone(),
            target: target.clone(),
        },
        GameEventData::PyreChanged { side, old, new } => AnimationCommand::PyreChange {
            side: *side,
            old: *old,
            new: *new,
        },
        GameEventData::ProtectionBlocked { target, .. } => AnimationCommand::Message {
            text: format!("{} is protected", target.name),
        },
        GameEventData::AilmentBlocked { target, .. } => AnimationCommand::Message {
            text: format!("{} is immune", target.name),
        },
        GameEventData::EmptyDeckPenalty { side } => AnimationCommand::Message {
            text: format!("{} draws from an empty deck", side_label(*side)),
        },
        GameEventData::TurnStarted { side, turn } => AnimationCommand::Message {
            text: format!("Turn {turn}: {}", side_label(*side)),
        },
        GameEventData::GameOver { winner, .. } => AnimationCommand::Message {
            text: format!("{} wins", side_label(*winner)),
        },
        _ => return None,
    };
    Some(cmd)
}

/// Turn an action's events into a playback sequence.
///
/// Back-to-back damage commands (a hit plus its cleave or overkill) and
/// back-to-back deaths play in parallel.
pub fn build_sequence(events: &[GameEvent]) -> Vec<AnimationCommand> {
    let mut out: Vec<AnimationCommand> = Vec::new();
    let mut group: Vec<AnimationCommand> = Vec::new();

    fn flush(out: &mut Vec<AnimationCommand>, group: &mut Vec<AnimationCommand>) {
        match group.len() {
            0 => {}
            1 => out.extend(group.drain(..)),
            _ => out.push(AnimationCommand::Parallel { commands: std::mem::take(group) }),
        }
    }

    for cmd in events.iter().filter_map(command_for) {
        let groupable = matches!(cmd, AnimationCommand::Damage { .. } | AnimationCommand::Death { .. });
        let same_kind = group.first().map(|g| g.name() == cmd.name()).unwrap_or(true);
        if groupable && same_kind {
            group.push(cmd);
            continue;
        }
        flush(&mut out, &mut group);
        if groupable {
            group.push(cmd);
        } else {
            out.push(cmd);
        }
    }
    flush(&mut out, &mut group);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cref(id: u32, owner: Side, col: u8) -> CombatantRef {
        CombatantRef {
            instance_id: id,
            key: format!("c{id}"),
            name: format!("C{id}"),
            owner,
            col,
            row: 0,
        }
    }

    fn ev(data: GameEventData) -> GameEvent {
        GameEvent::new(1, data)
    }

    #[test]
    fn test_attack_sequence_groups_simultaneous_hits() {
        let attacker = cref(1, Side::A, 1);
        let target = cref(2, Side::B, 0);
        let support = cref(3, Side::B, 1);
        let events = vec![
            ev(GameEventData::Attacked { attacker: attacker.clone(), target: target.clone(), damage: 3 }),
            ev(GameEventData::Damaged { target: target.clone(), amount: 3, source: DamageSource::Attack, hp_after: 0 }),
            ev(GameEventData::Damaged { target: support.clone(), amount: 3, source: DamageSource::Cleave, hp_after: 1 }),
            ev(GameEventData::Died { victim: target.clone(), killer: Some(Side::A), death_value: 1, deaths_total: 1 }),
            ev(GameEventData::Promoted { cryptid: support.clone(), row: 0 }),
            ev(GameEventData::EnteredCombat { cryptid: support.clone() }),
        ];

        let seq = build_sequence(&events);
        let names: Vec<_> = seq.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["attackMove", "parallel", "death", "promotion"]);
        match &seq[3] {
            AnimationCommand::Promotion { from_col, to_col, .. } => {
                assert_eq!((*from_col, *to_col), (1, 0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_untracked_events_are_skipped() {
        let events = vec![ev(GameEventData::CardDrawn { side: Side::A, card_id: 1, from_kindling: false })];
        assert!(build_sequence(&events).is_empty());
    }

    #[test]
    fn test_wire_shape() {
        let cmd = AnimationCommand::PyreChange { side: Side::B, old: 2, new: 1 };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "pyreChange");
        assert_eq!(json["side"], "b");

        let nested = AnimationCommand::Parallel { commands: vec![cmd] };
        let json = serde_json::to_value(&nested).unwrap();
        assert_eq!(json["commands"][0]["type"], "pyreChange");
        assert!(nested.any(&|c| c.name() == "pyreChange"));
    }
}
