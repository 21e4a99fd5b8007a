//! Animation playback.
//!
//! The renderer sits behind [`Animator`]: it is handed one command at a time
//! and answers with how long that command takes on screen. The playback plan
//! decides where the authoritative snapshot lands relative to the commands.
//! A summon whose arrival already triggered damage or a death must be on the
//! board before those hits are drawn, so its snapshot goes first; everything
//! else animates against the old board and commits the snapshot afterwards.

use std::time::Duration;

use tracing::debug;

use crate::game::animation::AnimationCommand;
use crate::sync::schedule::PlaybackDecision;

/// Renderer seam.
pub trait Animator: Send {
    /// Start one command; return its duration.
    fn play(&mut self, command: &AnimationCommand) -> Duration;
}

/// Where the snapshot is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotOrder {
    /// Snapshot, then commands.
    SnapshotFirst,
    /// Commands, then snapshot.
    AnimateFirst,
}

/// One step of a plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackStep {
    /// Commit the authoritative snapshot.
    ApplySnapshot,
    /// Play a command (a `parallel` one plays its children together).
    Animate(AnimationCommand),
}

/// Ordered playback for one resolved action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackPlan {
    /// Wait before the first step.
    pub delay: Duration,
    /// Steps. Always contains exactly one `ApplySnapshot`.
    pub steps: Vec<PlaybackStep>,
}

fn is_hit(cmd: &AnimationCommand) -> bool {
    matches!(cmd, AnimationCommand::Damage { .. } | AnimationCommand::Death { .. })
}

/// Snapshot placement for a command sequence.
pub fn snapshot_order(commands: &[AnimationCommand]) -> SnapshotOrder {
    let summons = commands
        .iter()
        .any(|c| c.any(&|c| matches!(c, AnimationCommand::Summon { .. })));
    let hits = commands.iter().any(|c| c.any(&is_hit));
    if summons && hits {
        SnapshotOrder::SnapshotFirst
    } else {
        SnapshotOrder::AnimateFirst
    }
}

/// Build the plan for a sequence under a scheduling decision.
pub fn plan(commands: &[AnimationCommand], decision: PlaybackDecision) -> PlaybackPlan {
    let delay = match decision {
        PlaybackDecision::Schedule { delay } => delay,
        PlaybackDecision::PlayNow { .. } => Duration::ZERO,
        PlaybackDecision::Skip { late_ms } => {
            debug!(late_ms, "Skipping animation");
            return PlaybackPlan { delay: Duration::ZERO, steps: vec![PlaybackStep::ApplySnapshot] };
        }
    };

    let animate = commands.iter().cloned().map(PlaybackStep::Animate);
    let steps = match snapshot_order(commands) {
        SnapshotOrder::SnapshotFirst => std::iter::once(PlaybackStep::ApplySnapshot).chain(animate).collect(),
        SnapshotOrder::AnimateFirst => animate.chain(std::iter::once(PlaybackStep::ApplySnapshot)).collect(),
    };
    PlaybackPlan { delay, steps }
}

/// Hand a command to the animator. Parallel children start together and
/// the group lasts as long as its longest child.
pub fn play_command<A: Animator + ?Sized>(animator: &mut A, command: &AnimationCommand) -> Duration {
    match command {
        AnimationCommand::Parallel { commands } => commands
            .iter()
            .map(|c| play_command(animator, c))
            .max()
            .unwrap_or(Duration::ZERO),
        other => animator.play(other),
    }
}

/// Run a plan. `apply_snapshot` is called exactly once, at its step.
/// Returns the total animation time.
pub async fn perform<A, F>(plan: &PlaybackPlan, animator: &mut A, apply_snapshot: F) -> Duration
where
    A: Animator + ?Sized,
    F: FnOnce(),
{
    if !plan.delay.is_zero() {
        tokio::time::sleep(plan.delay).await;
    }
    let mut apply = Some(apply_snapshot);
    let mut total = Duration::ZERO;
    for step in &plan.steps {
        match step {
            PlaybackStep::ApplySnapshot => {
                if let Some(f) = apply.take() {
                    f();
                }
            }
            PlaybackStep::Animate(cmd) => {
                let d = play_command(animator, cmd);
                total += d;
                if !d.is_zero() {
                    tokio::time::sleep(d).await;
                }
            }
        }
    }
    total
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::game::events::DamageSource;
    use crate::game::state::{CombatantRef, Side};

    /// Records every command it is given.
    #[derive(Default)]
    pub(crate) struct RecordingAnimator {
        pub played: Vec<String>,
        pub per_command: Duration,
    }

    impl Animator for RecordingAnimator {
        fn play(&mut self, command: &AnimationCommand) -> Duration {
            self.played.push(command.name().to_string());
            self.per_command
        }
    }

    fn cref(id: u32) -> CombatantRef {
        CombatantRef { instance_id: id, key: "k".into(), name: "K".into(), owner: Side::A, col: 1, row: 0 }
    }

    fn summon() -> AnimationCommand {
        AnimationCommand::Summon { cryptid: cref(1), from_kindling: false }
    }

    fn damage() -> AnimationCommand {
        AnimationCommand::Damage { target: cref(2), amount: 2, hp_after: 1, source: DamageSource::Trap }
    }

    #[test]
    fn test_summon_with_trap_damage_snapshots_first() {
        let cmds = vec![summon(), damage()];
        assert_eq!(snapshot_order(&cmds), SnapshotOrder::SnapshotFirst);
        let p = plan(&cmds, PlaybackDecision::PlayNow { late_ms: 0 });
        assert_eq!(p.steps[0], PlaybackStep::ApplySnapshot);
    }

    #[test]
    fn test_attack_animates_first() {
        let cmds = vec![
            AnimationCommand::AttackMove { attacker: cref(1), target: cref(2) },
            damage(),
        ];
        let p = plan(&cmds, PlaybackDecision::Schedule { delay: Duration::from_millis(80) });
        assert_eq!(p.delay, Duration::from_millis(80));
        assert_eq!(p.steps.last(), Some(&PlaybackStep::ApplySnapshot));
        assert_eq!(p.steps.len(), 3);
    }

    #[test]
    fn test_skip_only_applies_snapshot() {
        let p = plan(&[summon(), damage()], PlaybackDecision::Skip { late_ms: 800 });
        assert_eq!(p.steps, vec![PlaybackStep::ApplySnapshot]);
    }

    #[test]
    fn test_parallel_lasts_as_long_as_longest() {
        let mut animator = RecordingAnimator { per_command: Duration::from_millis(5), ..Default::default() };
        let group = AnimationCommand::Parallel { commands: vec![damage(), damage()] };
        assert_eq!(play_command(&mut animator, &group), Duration::from_millis(5));
        assert_eq!(animator.played, vec!["damage", "damage"]);
    }

    #[tokio::test]
    async fn test_perform_applies_snapshot_once_in_order() {
        let mut animator = RecordingAnimator::default();
        let p = plan(&[summon(), damage()], PlaybackDecision::PlayNow { late_ms: 0 });
        let mut applied = 0;
        perform(&p, &mut animator, || applied += 1).await;
        assert_eq!(applied, 1);
        assert_eq!(animator.played, vec!["summon", "damage"]);
    }
}
