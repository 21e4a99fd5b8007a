//! Peer synchronization tests
//!
//! Clock estimation, deadline decisions and playback ordering as a peer sees
//! them, a peer fed directly from a match session, and two peers playing
//! over real WebSockets against a running authority.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use cryptid_duel::core::clock::{ManualClock, SharedClock};
use cryptid_duel::game::card::InMemoryCatalog;
use cryptid_duel::game::events::DamageSource;
use cryptid_duel::game::state::CombatantRef;
use cryptid_duel::game::{Action, AnimationCommand, DeckManifest, EventBus, Side};
use cryptid_duel::network::client::{ClientCommand, ClientConfig, PeerClient, PeerEvent};
use cryptid_duel::network::protocol::{match_id_string, ClientMessage, PlayerId, ServerMessage};
use cryptid_duel::network::server::{GameServer, ServerConfig};
use cryptid_duel::network::session::{MatchSession, SessionConfig};
use cryptid_duel::sync::playback::{plan, snapshot_order};
use cryptid_duel::sync::schedule::decide;
use cryptid_duel::sync::{Animator, ClockSync, PlaybackDecision, PlaybackStep, ScheduleConfig, SnapshotOrder};

/// Renderer that finishes every command instantly.
#[derive(Default)]
struct Instant;

impl Animator for Instant {
    fn play(&mut self, _command: &AnimationCommand) -> Duration {
        Duration::ZERO
    }
}

fn manifest() -> DeckManifest {
    DeckManifest {
        deck: vec!["emberling".into(); 10],
        hand: Vec::new(),
        kindling: vec!["kindle_wisp".into(); 2],
    }
}

fn cref(key: &str, owner: Side) -> CombatantRef {
    CombatantRef {
        instance_id: 1,
        key: key.into(),
        name: key.into(),
        owner,
        col: owner.combat_col(),
        row: 0,
    }
}

#[test]
fn test_pong_offset_and_late_action_is_skipped() {
    let mut sync = ClockSync::new();
    // sent at 1000, server stamped 1050, back at 1040: rtt 40, offset 30
    assert_eq!(sync.record_pong(1_000, 1_050, 1_040), 30);
    assert_eq!(sync.rtt_ms(), Some(40));

    let config = ScheduleConfig::default();
    // due at server 2_030 = local 2_000; now is 2_800
    assert_eq!(decide(&config, &sync, 2_030, 2_800), PlaybackDecision::Skip { late_ms: 800 });
    assert_eq!(decide(&config, &sync, 2_030, 2_200), PlaybackDecision::PlayNow { late_ms: 200 });
    assert_eq!(
        decide(&config, &sync, 2_030, 1_700),
        PlaybackDecision::Schedule { delay: Duration::from_millis(300) }
    );
}

#[test]
fn test_summon_with_damage_applies_snapshot_first() {
    let summon = AnimationCommand::Summon { cryptid: cref("emberling", Side::A), from_kindling: false };
    let hit = AnimationCommand::Damage {
        target: cref("emberling", Side::A),
        amount: 2,
        hp_after: 1,
        source: DamageSource::Trap,
    };
    let both = vec![summon.clone(), AnimationCommand::Parallel { commands: vec![hit.clone()] }];
    assert_eq!(snapshot_order(&both), SnapshotOrder::SnapshotFirst);
    let p = plan(&both, PlaybackDecision::PlayNow { late_ms: 0 });
    assert_eq!(p.steps[0], PlaybackStep::ApplySnapshot);

    let just_hit = vec![hit];
    let p = plan(&just_hit, PlaybackDecision::PlayNow { late_ms: 0 });
    assert_eq!(p.steps.last(), Some(&PlaybackStep::ApplySnapshot));

    let skipped = plan(&both, PlaybackDecision::Skip { late_ms: 900 });
    assert_eq!(skipped.steps, vec![PlaybackStep::ApplySnapshot]);
}

#[tokio::test]
async fn test_peer_follows_session_out_of_order() {
    let clock = Arc::new(ManualClock::new(20_000));
    let shared: SharedClock = clock.clone();
    let (a_tx, mut a_rx) = mpsc::channel(256);
    let (b_tx, _b_rx) = mpsc::channel(256);
    let a = PlayerId::new([1; 16]);
    let b = PlayerId::new([2; 16]);
    let bus = EventBus::new();
    let mut session = MatchSession::new(
        [5; 16],
        [(a, a_tx), (b, b_tx)],
        SessionConfig::default(),
        Arc::new(InMemoryCatalog::starter()),
        &bus,
        shared.clone(),
    );
    session.handle_action(&a, Action::Join, Some(manifest())).await.unwrap();
    session.handle_action(&b, Action::Join, Some(manifest())).await.unwrap();
    for _ in 0..3 {
        let active = session.context().state().active;
        let player = session.player(active).player_id;
        session.handle_action(&player, Action::EndTurn, None).await.unwrap();
    }

    let mut resolved = Vec::new();
    while let Ok(msg) = a_rx.try_recv() {
        if let ServerMessage::Resolved(_) = msg {
            resolved.push(msg);
        }
    }
    assert_eq!(resolved.len(), 4);

    // The peer's clock is already past every deadline but within lateness.
    clock.advance(150);
    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut peer = PeerClient::new(ClientConfig::new("ws://unused", a), Instant::default(), shared, events_tx);

    resolved.swap(1, 3);
    for msg in resolved {
        assert!(peer.handle_message(msg).await.is_empty());
    }
    assert_eq!(peer.mirror().committed_seq(), session.seq());
    assert_eq!(peer.mirror().state_hash(), Some(session.context().state_hash_hex().as_str()));

    let mut seqs = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        if let PeerEvent::StateUpdated { seq, animated, .. } = event {
            assert!(animated);
            seqs.push(seq);
        }
    }
    assert_eq!(seqs, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_tampered_snapshot_asks_for_rejoin() {
    let clock: SharedClock = Arc::new(ManualClock::new(0));
    let (a_tx, mut a_rx) = mpsc::channel(64);
    let (b_tx, _b_rx) = mpsc::channel(64);
    let a = PlayerId::new([1; 16]);
    let b = PlayerId::new([2; 16]);
    let bus = EventBus::new();
    let mut session = MatchSession::new(
        [6; 16],
        [(a, a_tx), (b, b_tx)],
        SessionConfig::default(),
        Arc::new(InMemoryCatalog::starter()),
        &bus,
        clock.clone(),
    );
    session.handle_action(&a, Action::Join, Some(manifest())).await.unwrap();
    session.handle_action(&b, Action::Join, Some(manifest())).await.unwrap();

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut peer = PeerClient::new(ClientConfig::new("ws://unused", a), Instant::default(), clock, events_tx);
    peer.handle_message(ServerMessage::MatchFound {
        match_id: match_id_string(&[6; 16]),
        side: Side::A,
        opponent_id: b.to_uuid_string(),
        turn_seconds: 60,
    })
    .await;

    let mut tampered = None;
    while let Ok(msg) = a_rx.try_recv() {
        match msg {
            ServerMessage::Resolved(mut r) => {
                r.state.turn += 1;
                tampered = Some(ServerMessage::Resolved(r));
            }
            other => {
                peer.handle_message(other).await;
            }
        }
    }
    let replies = peer.handle_message(tampered.unwrap()).await;
    assert!(matches!(&replies[..], [ClientMessage::Rejoin { .. }]));
    assert!(peer.mirror().state().is_none());

    let mut desynced = false;
    while let Ok(event) = events_rx.try_recv() {
        desynced |= matches!(event, PeerEvent::Desynced { seq: 1 });
    }
    assert!(desynced);
}

async fn next_state(rx: &mut mpsc::Receiver<PeerEvent>) -> (u64, String) {
    loop {
        match rx.recv().await {
            Some(PeerEvent::StateUpdated { seq, state_hash, .. }) => return (seq, state_hash),
            Some(_) => continue,
            None => panic!("peer stopped"),
        }
    }
}

#[tokio::test]
async fn test_two_peers_agree_over_websocket() {
    let config = ServerConfig {
        matchmaking_interval: Duration::from_millis(20),
        ..Default::default()
    };
    let server = Arc::new(GameServer::new(config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(listener).await })
    };

    let mut peers = Vec::new();
    for n in 1..=2u8 {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let config = ClientConfig::new(url.clone(), PlayerId::new([n; 16]));
        let clock = cryptid_duel::core::clock::system_clock();
        let mut peer = PeerClient::new(config, Instant::default(), clock, events_tx);
        let task = tokio::spawn(async move { peer.run(cmd_rx).await });
        cmd_tx.send(ClientCommand::FindMatch(manifest())).await.unwrap();
        peers.push((cmd_tx, events_rx, task));
    }

    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        let mut first = Vec::new();
        for (_, events, _) in peers.iter_mut() {
            first.push(next_state(events).await);
        }
        first
    })
    .await
    .expect("peers never saw the opening state");

    assert_eq!(outcome[0].0, 1);
    assert_eq!(outcome[0], outcome[1]);
    assert_eq!(server.session_count().await, 1);

    for (cmd_tx, _, task) in peers {
        cmd_tx.send(ClientCommand::Close).await.unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    }
    server.shutdown();
    let _ = serving.await;
}
