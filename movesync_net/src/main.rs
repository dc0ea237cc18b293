//! Peer binary.
//!
//! Usage:
//!   cargo run -p movesync_net -- host [--port 8910] [--bot]
//!   cargo run -p movesync_net -- join [--address 127.0.0.1] [--port 8910] [--bot]
//!
//! Other flags: `--tick-hz N`, `--config path.json` (applied first; flags
//! override it).
//!
//! Console commands:
//!   status              - Show session state and tracked entities
//!   move <dir>          - Hold left, right, up or down (ignored with --bot)
//!   stop                - Release every direction
//!   leave               - Leave the session (stay running)
//!   host [port]         - Host again after leaving
//!   join [addr] [port]  - Join again after leaving
//!   quit                - Leave and exit

use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use movesync_net::{
    input::{KeyState, WanderInput},
    transport::SocketTransport,
};
use movesync_shared::{
    config::SessionConfig,
    error::SessionError,
    event::{EntityDespawned, EntitySpawned},
    math::{Rect, Vec2},
    physics::Arena,
    session::{SessionController, SessionState},
};
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};
use tracing::{error, info, warn};

type Session = SessionController<SocketTransport>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Host,
    Join,
}

#[derive(Debug)]
struct Args {
    mode: Mode,
    config: Option<PathBuf>,
    address: Option<String>,
    port: Option<u16>,
    tick_hz: Option<u32>,
    bot: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mode = match args.first().map(String::as_str) {
        Some("host") => Mode::Host,
        Some("join") => Mode::Join,
        other => anyhow::bail!("expected `host` or `join`, got {other:?}"),
    };

    let mut parsed = Args {
        mode,
        config: None,
        address: None,
        port: None,
        tick_hz: None,
        bot: false,
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--config", Some(v)) => parsed.config = Some(PathBuf::from(v)),
            ("--address", Some(v)) => parsed.address = Some(v.clone()),
            ("--port", Some(v)) => parsed.port = Some(v.parse().context("parse --port")?),
            ("--tick-hz", Some(v)) => {
                parsed.tick_hz = Some(v.parse().context("parse --tick-hz")?)
            }
            ("--bot", _) => {
                parsed.bot = true;
                i += 1;
                continue;
            }
            (flag, _) => anyhow::bail!("unknown or incomplete argument `{flag}`"),
        }
        i += 2;
    }
    Ok(parsed)
}

impl Args {
    fn resolve_config(&self) -> anyhow::Result<SessionConfig> {
        let mut cfg = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("read config {}", path.display()))?;
                SessionConfig::from_json_str(&text)
                    .with_context(|| format!("parse config {}", path.display()))?
            }
            None => SessionConfig::default(),
        };
        if let Some(address) = &self.address {
            cfg.address = address.clone();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(tick_hz) = self.tick_hz {
            cfg.tick_hz = tick_hz;
        }
        Ok(cfg)
    }
}

/// Play area the demo runs in; every spawn position lies inside it.
fn demo_arena() -> Arena {
    Arena::new(
        Rect::new(Vec2::new(-64.0, -64.0), Vec2::new(464.0, 464.0)),
        Vec2::new(16.0, 16.0),
    )
}

enum Flow {
    Continue,
    Quit,
}

fn exec_console(
    session: &mut Session,
    keys: &mut KeyState,
    line: &str,
) -> (Flow, Vec<String>) {
    let mut parts = line.split_whitespace();
    let cmd = parts.next().unwrap_or_default();
    let mut out = Vec::new();

    match cmd {
        "status" => {
            out.push(format!(
                "state={:?} local_id={} ticks={}",
                session.state(),
                session
                    .local_id()
                    .map_or_else(|| "-".to_string(), |id| id.to_string()),
                session.ticks()
            ));
            for (peer, entity) in session.registry().iter() {
                let pos = entity.position();
                out.push(format!(
                    "  peer {peer}: {:?} at ({:.1}, {:.1})",
                    entity.role(),
                    pos.x,
                    pos.y
                ));
            }
        }
        "move" => match parts.next() {
            Some(dir) if keys.hold(dir) => {}
            _ => out.push("usage: move left|right|up|down".into()),
        },
        "stop" => keys.release_all(),
        "leave" => session.leave(),
        "host" => {
            let port = parts
                .next()
                .and_then(|p| p.parse().ok())
                .unwrap_or(session.config().port);
            if let Err(e) = session.host(port) {
                out.push(format!("Error: {e}"));
            }
        }
        "join" => {
            let address = parts
                .next()
                .map(str::to_string)
                .unwrap_or_else(|| session.config().address.clone());
            let port = parts
                .next()
                .and_then(|p| p.parse().ok())
                .unwrap_or(session.config().port);
            if let Err(e) = session.join(&address, port) {
                out.push(format!("Error: {e}"));
            }
        }
        "quit" | "exit" => {
            session.leave();
            return (Flow::Quit, out);
        }
        "help" => out.push(
            "commands: status, move <dir>, stop, leave, host [port], join [addr] [port], quit"
                .into(),
        ),
        other => out.push(format!("Unknown command: {other}")),
    }
    (Flow::Continue, out)
}

/// Logs queued notices. Returns `true` once the authority is gone; a failed
/// join only leaves the session disconnected so it can be retried.
fn report_notices(session: &mut Session) -> bool {
    let notices = session.notices_mut();
    for spawned in notices.drain::<EntitySpawned>() {
        info!(
            peer = %spawned.peer,
            x = spawned.position.x,
            y = spawned.position.y,
            authoritative = spawned.authoritative,
            "Entity appeared"
        );
    }
    for despawned in notices.drain::<EntityDespawned>() {
        info!(peer = %despawned.peer, "Entity removed");
    }

    let mut fatal = false;
    for err in notices.drain::<SessionError>() {
        match err {
            SessionError::AuthorityLost => {
                error!(error = %err, "Session ended");
                fatal = true;
            }
            SessionError::Connection { .. } => {
                warn!(error = %err, "Join failed; retry with `join [addr] [port]`")
            }
            SessionError::Transport { .. } => warn!(error = %err, "Transport problem"),
        }
    }
    fatal
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args()?;
    let cfg = args.resolve_config()?;
    info!(
        mode = ?args.mode,
        address = %cfg.address,
        port = cfg.port,
        tick_hz = cfg.tick_hz,
        bot = args.bot,
        "Starting peer"
    );

    let mut session = Session::new(SocketTransport::new(&cfg), cfg.clone());
    match args.mode {
        Mode::Host => session.host(cfg.port).context("host session")?,
        Mode::Join => session
            .join(&cfg.address, cfg.port)
            .context("join session")?,
    }

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Type 'status' for info, 'quit' to exit.");

    let mut keys = KeyState::default();
    let mut bot = args
        .bot
        .then(|| WanderInput::new(rand::random(), cfg.tick_hz.max(1)));
    let mut world = demo_arena();

    let dt = cfg.tick_dt();
    let tick_interval = Duration::from_secs_f32(dt);
    let status_every = u64::from(cfg.tick_hz.max(1)) * 5;
    let mut next_tick = Instant::now();

    'run: loop {
        while let Ok(line) = console_rx.try_recv() {
            let (flow, output) = exec_console(&mut session, &mut keys, &line);
            for line in output {
                println!("{line}");
            }
            if let Flow::Quit = flow {
                break 'run;
            }
        }

        match bot.as_mut() {
            Some(wander) => session.tick(dt, wander, &mut world),
            None => session.tick(dt, &mut keys, &mut world),
        }

        if report_notices(&mut session) {
            break;
        }

        if session.state() != SessionState::Disconnected && session.ticks() % status_every == 0 {
            info!(
                state = ?session.state(),
                entities = session.registry().len(),
                "Status"
            );
        }

        next_tick += tick_interval;
        let now = Instant::now();
        if next_tick < now {
            // Fell behind; don't try to catch up with a burst of ticks.
            next_tick = now;
        }
        time::sleep_until(next_tick).await;
    }

    session.leave();
    // Give the link tasks a moment to send their goodbye.
    time::sleep(Duration::from_millis(50)).await;
    info!("Shut down");
    Ok(())
}
