//! Helpers shared by the integration tests.

use std::time::Duration;

use movesync_net::SocketTransport;
use movesync_shared::{
    config::SessionConfig,
    input::InputSource,
    loopback::{LoopbackNetwork, LoopbackTransport},
    physics::OpenWorld,
    session::SessionController,
    transport::Transport,
};

pub const DT: f32 = 1.0 / 60.0;

pub type LoopbackSession = SessionController<LoopbackTransport>;
pub type SocketSession = SessionController<SocketTransport>;

/// Installs a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Ids of every tracked entity, ascending.
pub fn tracked_ids<T: Transport>(session: &SessionController<T>) -> Vec<u32> {
    session.registry().ids().into_iter().map(|p| p.0).collect()
}

pub fn loopback_session(net: &LoopbackNetwork) -> LoopbackSession {
    SessionController::new(net.endpoint(), SessionConfig::default())
}

/// Pumps every session a few rounds so relayed events settle.
pub fn settle(sessions: &mut [&mut LoopbackSession]) {
    for _ in 0..4 {
        for s in sessions.iter_mut() {
            s.pump_events();
        }
    }
}

/// Ticks every session `ticks` times, all reading the same input.
pub fn tick_loopback(
    sessions: &mut [&mut LoopbackSession],
    ticks: usize,
    input: &mut dyn InputSource,
) {
    let mut world = OpenWorld;
    for _ in 0..ticks {
        for s in sessions.iter_mut() {
            s.tick(DT, input, &mut world);
        }
    }
}

pub fn socket_session() -> SocketSession {
    let cfg = SessionConfig {
        connect_timeout_ms: 2_000,
        ..SessionConfig::default()
    };
    SessionController::new(SocketTransport::new(&cfg), cfg)
}

/// Ticks the socket sessions in real time until `done` holds or `timeout`
/// elapses.
pub async fn pump_until<F>(
    sessions: &mut [&mut SocketSession],
    input: &mut dyn InputSource,
    timeout: Duration,
    mut done: F,
) -> anyhow::Result<()>
where
    F: FnMut(&[&mut SocketSession]) -> bool,
{
    let mut world = OpenWorld;
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        for s in sessions.iter_mut() {
            s.tick(DT, input, &mut world);
        }
        if done(sessions) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            let ids: Vec<Vec<u32>> = sessions.iter().map(|s| tracked_ids(&**s)).collect();
            anyhow::bail!("condition not met within {timeout:?}; tracked ids {ids:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
