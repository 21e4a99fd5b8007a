//! Match flow tests
//!
//! Whole matches driven through the public API: the rules engine behind a
//! match context, replay verification of its log, and the session layer
//! pairing queued players and streaming resolved actions to their mirrors.

use std::sync::Arc;

use tokio::sync::mpsc;

use cryptid_duel::core::clock::{ManualClock, SharedClock};
use cryptid_duel::core::config::RulesConfig;
use cryptid_duel::game::card::{CardId, InMemoryCatalog};
use cryptid_duel::game::replay::verify;
use cryptid_duel::game::{Action, DeckManifest, EventBus, GameOverReason, MatchContext, Phase, Side};
use cryptid_duel::network::protocol::{PlayerId, ServerMessage};
use cryptid_duel::network::session::{SessionConfig, SessionManager, SessionState};
use cryptid_duel::sync::Mirror;

fn manifest(hand: &[&str]) -> DeckManifest {
    DeckManifest {
        deck: vec!["emberling".into(); 8],
        hand: hand.iter().map(|s| s.to_string()).collect(),
        kindling: Vec::new(),
    }
}

fn context(rules: RulesConfig) -> MatchContext {
    let bus = EventBus::new();
    MatchContext::new(
        [3; 16],
        [[1; 16], [2; 16]],
        rules,
        Arc::new(InMemoryCatalog::starter()),
        &bus,
    )
}

fn in_hand(ctx: &MatchContext, side: Side, key: &str) -> CardId {
    ctx.state()
        .side(side)
        .hand
        .iter()
        .find(|c| c.data.key == key)
        .map(|c| c.id)
        .unwrap_or_else(|| panic!("{key} not in hand"))
}

fn advance_to(ctx: &mut MatchContext, side: Side, phase: Phase) {
    while ctx.state().phase != phase {
        ctx.apply(side, &Action::EndPhase).unwrap();
    }
}

/// A summons a stag, B answers with an emberling, A's stag kills it.
fn play_opening(ctx: &mut MatchContext) -> CardId {
    ctx.start([manifest(&["hollow_stag"]), manifest(&["emberling"])], Some(Side::A))
        .unwrap();
    assert_eq!(ctx.state().active, Side::A);

    advance_to(ctx, Side::A, Phase::Deploy);
    let stag = in_hand(ctx, Side::A, "hollow_stag");
    ctx.apply(Side::A, &Action::Summon { card_id: stag, col: 1, row: 0 }).unwrap();
    ctx.apply(Side::A, &Action::EndTurn).unwrap();

    assert_eq!(ctx.state().active, Side::B);
    advance_to(ctx, Side::B, Phase::Deploy);
    let ember = in_hand(ctx, Side::B, "emberling");
    ctx.apply(Side::B, &Action::Summon { card_id: ember, col: 0, row: 0 }).unwrap();
    ctx.apply(Side::B, &Action::EndTurn).unwrap();

    advance_to(ctx, Side::A, Phase::Combat);
    stag
}

#[test]
fn test_summon_attack_and_kill() {
    let mut ctx = context(RulesConfig::default());
    let stag = play_opening(&mut ctx);

    let attack = Action::Attack { attacker_id: stag, target_owner: Side::B, target_col: 0, target_row: 0 };
    let outcome = ctx.apply(Side::A, &attack).unwrap();

    assert!(outcome.game_over.is_none());
    assert!(ctx.state().get_combatant(Side::B, 0).is_none());
    assert_eq!(ctx.state().side(Side::B).deaths, 1);
    assert!(ctx.state().combatant(stag).unwrap().tapped);
    assert!(outcome.events.iter().any(|e| e.name() == "attack"));
    assert!(!outcome.animation.is_empty());
}

#[test]
fn test_death_threshold_ends_match() {
    let rules = RulesConfig { death_threshold: 1, ..Default::default() };
    let mut ctx = context(rules);
    let stag = play_opening(&mut ctx);

    let attack = Action::Attack { attacker_id: stag, target_owner: Side::B, target_col: 0, target_row: 0 };
    let over = ctx.apply(Side::A, &attack).unwrap().game_over.expect("match should be over");
    assert_eq!(over.winner, Side::A);
    assert_eq!(over.reason, GameOverReason::Deaths);

    assert_eq!(ctx.apply(Side::B, &Action::EndTurn).unwrap_err().code(), "GAME_OVER");
}

#[test]
fn test_rejected_action_changes_nothing() {
    let mut ctx = context(RulesConfig::default());
    ctx.start([manifest(&["ridge_brute"]), manifest(&[])], Some(Side::A)).unwrap();
    advance_to(&mut ctx, Side::A, Phase::Deploy);

    let before = ctx.state_hash_hex();
    let brute = in_hand(&ctx, Side::A, "ridge_brute");
    let err = ctx.apply(Side::A, &Action::Summon { card_id: brute, col: 1, row: 2 }).unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_PYRE");
    assert_eq!(ctx.state_hash_hex(), before);

    let err = ctx.apply(Side::B, &Action::EndTurn).unwrap_err();
    assert_eq!(err.code(), "NOT_YOUR_TURN");
    assert_eq!(ctx.state_hash_hex(), before);
}

#[test]
fn test_forfeit_and_replay_verify() {
    let mut ctx = context(RulesConfig::default());
    let stag = play_opening(&mut ctx);
    ctx.apply(Side::A, &Action::Attack { attacker_id: stag, target_owner: Side::B, target_col: 0, target_row: 0 })
        .unwrap();
    ctx.apply(Side::A, &Action::EndTurn).unwrap();

    let over = ctx.apply(Side::B, &Action::Forfeit).unwrap().game_over.unwrap();
    assert_eq!(over.winner, Side::A);
    assert_eq!(over.reason, GameOverReason::Forfeit);

    let mut log = ctx.log().unwrap().clone();
    log.seal(&ctx.state_hash());
    let json = log.to_json().unwrap();
    let parsed = cryptid_duel::game::MatchLog::from_json(&json).unwrap();
    assert_eq!(verify(&parsed, &InMemoryCatalog::starter()).unwrap(), ctx.state_hash());
}

// =============================================================================
// SESSION FLOW
// =============================================================================

fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

/// Feed resolved actions and snapshots into a mirror, committing in order.
fn mirror_all(mirror: &mut Mirror, msgs: Vec<ServerMessage>) {
    for msg in msgs {
        match msg {
            ServerMessage::Resolved(resolved) => {
                for ready in mirror.push(resolved) {
                    mirror.commit(&ready).unwrap();
                }
            }
            ServerMessage::Sync(snapshot) => {
                for ready in mirror.apply_snapshot(&snapshot).unwrap() {
                    mirror.commit(&ready).unwrap();
                }
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_queued_players_play_to_forfeit_with_mirrors_in_step() {
    let clock = Arc::new(ManualClock::new(50_000));
    let shared: SharedClock = clock.clone();
    let manager = SessionManager::new(SessionConfig::default(), Arc::new(InMemoryCatalog::starter()), shared);

    let (a_tx, mut a_rx) = mpsc::channel(256);
    let (b_tx, mut b_rx) = mpsc::channel(256);
    let a = PlayerId::new([1; 16]);
    let b = PlayerId::new([2; 16]);
    assert_eq!(manager.enqueue(a, manifest(&[]), a_tx).await.unwrap(), 1);
    assert_eq!(manager.enqueue(b, manifest(&[]), b_tx).await.unwrap(), 2);

    let created = manager.pair_queued().await;
    assert_eq!(created.len(), 1);
    assert_eq!(manager.queue_len().await, 0);
    let id = created[0];
    assert_eq!(manager.get_player_session(&a).await, Some(id));

    let session = manager.get_session(&id).await.unwrap();
    assert_eq!(session.read().await.get_state(), SessionState::Playing);

    let mut mirrors = [Mirror::new(), Mirror::new()];
    let a_msgs = drain(&mut a_rx);
    assert!(matches!(&a_msgs[0], ServerMessage::MatchFound { side: Side::A, .. }));
    mirror_all(&mut mirrors[0], a_msgs);
    mirror_all(&mut mirrors[1], drain(&mut b_rx));

    for _ in 0..4 {
        let mut s = session.write().await;
        let active = s.context().state().active;
        let player = s.player(active).player_id;
        s.handle_action(&player, Action::EndTurn, None).await.unwrap();
    }
    mirror_all(&mut mirrors[0], drain(&mut a_rx));
    mirror_all(&mut mirrors[1], drain(&mut b_rx));

    let (hash, seq) = {
        let s = session.read().await;
        (s.context().state_hash_hex(), s.seq())
    };
    for mirror in &mirrors {
        assert_eq!(mirror.committed_seq(), seq);
        assert_eq!(mirror.state_hash(), Some(hash.as_str()));
    }

    session.write().await.handle_action(&b, Action::Forfeit, None).await.unwrap();
    let a_msgs = drain(&mut a_rx);
    assert!(a_msgs.iter().any(|m| matches!(
        m,
        ServerMessage::GameEnd { winner: Side::A, you_won: true, .. }
    )));
    assert_eq!(session.read().await.get_state(), SessionState::Finished);
}
