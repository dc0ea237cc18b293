//! End-to-end session scenarios over the in-memory transport.

use movesync_shared::{
    error::SessionError,
    event::{EntityDespawned, EntitySpawned},
    input::{NoInput, ScriptedInput},
    loopback::LoopbackNetwork,
    math::Vec2,
    net::PeerId,
    physics::OpenWorld,
    placement::spawn_position,
    session::SessionState,
};
use movesync_tests::{init_tracing, loopback_session, settle, tick_loopback, tracked_ids, DT};

#[test]
fn host_then_join_tracks_both_entities() {
    init_tracing();
    let net = LoopbackNetwork::new();
    let mut host = loopback_session(&net);
    let mut client = loopback_session(&net);

    host.host(8910).expect("host");
    assert_eq!(tracked_ids(&host), vec![1]);
    assert_eq!(
        host.entity(PeerId(1)).map(|e| e.position()),
        Some(Vec2::new(50.0, 80.0))
    );

    client.join("127.0.0.1", 8910).expect("join");
    settle(&mut [&mut host, &mut client]);

    assert_eq!(client.state(), SessionState::Joined);
    assert_eq!(client.local_id(), Some(PeerId(2)));
    assert_eq!(tracked_ids(&host), vec![1, 2]);
    assert_eq!(tracked_ids(&client), vec![1, 2]);
    for s in [&host, &client] {
        assert_eq!(
            s.entity(PeerId(2)).map(|e| e.position()),
            Some(Vec2::new(100.0, 160.0))
        );
    }

    // Each side owns exactly its own entity.
    assert!(host.entity(PeerId(1)).is_some_and(|e| e.is_authority()));
    assert!(host.entity(PeerId(2)).is_some_and(|e| !e.is_authority()));
    assert!(client.entity(PeerId(2)).is_some_and(|e| e.is_authority()));
    assert!(client.entity(PeerId(1)).is_some_and(|e| !e.is_authority()));

    let spawned = client.notices_mut().drain::<EntitySpawned>();
    assert_eq!(spawned.len(), 2);
}

#[test]
fn disconnect_converges_to_host_only() {
    let net = LoopbackNetwork::new();
    let mut host = loopback_session(&net);
    let mut client = loopback_session(&net);
    host.host(8910).expect("host");
    client.join("127.0.0.1", 8910).expect("join");
    settle(&mut [&mut host, &mut client]);

    client.leave();
    settle(&mut [&mut host, &mut client]);

    assert_eq!(tracked_ids(&host), vec![1]);
    assert!(tracked_ids(&client).is_empty());
    assert_eq!(client.state(), SessionState::Disconnected);
    assert_eq!(
        host.notices_mut().drain::<EntityDespawned>(),
        vec![EntityDespawned { peer: PeerId(2) }]
    );
}

#[test]
fn late_joiner_catches_up_and_everyone_sees_it() {
    let net = LoopbackNetwork::new();
    let mut host = loopback_session(&net);
    let mut b = loopback_session(&net);
    let mut c = loopback_session(&net);

    host.host(7000).expect("host");
    b.join("local", 7000).expect("join b");
    settle(&mut [&mut host, &mut b]);
    assert_eq!(tracked_ids(&b), vec![1, 2]);

    c.join("local", 7000).expect("join c");
    settle(&mut [&mut host, &mut b, &mut c]);

    for s in [&host, &b, &c] {
        assert_eq!(tracked_ids(s), vec![1, 2, 3]);
    }
    assert_eq!(
        c.entity(PeerId(2)).map(|e| e.position()),
        Some(spawn_position(PeerId(2)))
    );
}

#[test]
fn host_leaving_ends_the_session_for_clients() {
    let net = LoopbackNetwork::new();
    let mut host = loopback_session(&net);
    let mut b = loopback_session(&net);
    let mut c = loopback_session(&net);
    host.host(7000).expect("host");
    b.join("local", 7000).expect("join b");
    c.join("local", 7000).expect("join c");
    settle(&mut [&mut host, &mut b, &mut c]);

    host.leave();
    settle(&mut [&mut b, &mut c]);

    for s in [&mut b, &mut c] {
        assert_eq!(s.state(), SessionState::Disconnected);
        assert!(tracked_ids(&*s).is_empty());
        assert_eq!(
            s.notices_mut().drain::<SessionError>(),
            vec![SessionError::AuthorityLost]
        );
    }

    // A client can start over as host on the same network.
    b.host(7000).expect("rehost");
    assert_eq!(tracked_ids(&b), vec![1]);
}

#[test]
fn join_without_listener_reports_connection_error() {
    let net = LoopbackNetwork::new();
    let mut client = loopback_session(&net);
    client.join("127.0.0.1", 9999).expect("attempt starts");
    assert_eq!(client.state(), SessionState::Joining);

    client.pump_events();
    assert_eq!(client.state(), SessionState::Disconnected);
    let errors = client.notices_mut().drain::<SessionError>();
    assert!(matches!(errors.as_slice(), [SessionError::Connection { .. }]));
}

/// Runs host and client with the host holding "right" for a second, then
/// idling. Returns (host's view of 1, client's view of 1, client's view of 2).
fn run_movement(net: &LoopbackNetwork) -> (Vec2, Vec2, Vec2) {
    let mut host = loopback_session(net);
    let mut client = loopback_session(net);
    host.host(8910).expect("host");
    client.join("127.0.0.1", 8910).expect("join");
    settle(&mut [&mut host, &mut client]);

    let mut world = OpenWorld;
    let mut right = ScriptedInput::constant(Vec2::new(1.0, 0.0));
    for _ in 0..60 {
        host.tick(DT, &mut right, &mut world);
        client.tick(DT, &mut NoInput, &mut world);
    }
    tick_loopback(&mut [&mut host, &mut client], 120, &mut NoInput);

    let pos = |s: &movesync_tests::LoopbackSession, p: u32| {
        s.entity(PeerId(p)).map(|e| e.position()).unwrap_or(Vec2::ZERO)
    };
    (pos(&host, 1), pos(&client, 1), pos(&client, 2))
}

#[test]
fn replica_follows_authoritative_movement() {
    let (authoritative, replica, idle) = run_movement(&LoopbackNetwork::new());

    assert!(authoritative.x > 150.0, "host entity moved: {authoritative:?}");
    assert!((authoritative.y - 80.0).abs() < 1e-3);
    assert!(
        replica.distance(authoritative) < 0.5,
        "replica {replica:?} vs authority {authoritative:?}"
    );
    assert_eq!(idle, Vec2::new(100.0, 160.0));
}

#[test]
fn identical_runs_end_identically() {
    let a = run_movement(&LoopbackNetwork::new());
    let b = run_movement(&LoopbackNetwork::new());
    assert_eq!(a, b);
}

#[test]
fn replica_holds_spawn_position_without_snapshots() {
    let net = LoopbackNetwork::new();
    let mut host = loopback_session(&net);
    let mut client = loopback_session(&net);
    host.host(8910).expect("host");
    client.join("127.0.0.1", 8910).expect("join");
    settle(&mut [&mut host, &mut client]);

    net.set_drop_unreliable(true);
    let mut world = OpenWorld;
    let mut right = ScriptedInput::constant(Vec2::new(1.0, 0.0));
    for _ in 0..30 {
        host.tick(DT, &mut right, &mut world);
        client.tick(DT, &mut NoInput, &mut world);
    }

    assert_eq!(
        client.entity(PeerId(1)).map(|e| e.position()),
        Some(Vec2::new(50.0, 80.0))
    );
    assert!(host
        .entity(PeerId(1))
        .is_some_and(|e| e.position().x > 50.0));
}
