//! Session controller.
//!
//! Owns the transport and the peer registry for one participant and turns
//! transport events into entity lifecycle changes:
//! - The host is the authority. It alone decides spawns and despawns and
//!   broadcasts them over the reliable channel.
//! - Every participant mirrors those decisions into its own registry.
//! - Entities owned locally broadcast unreliable snapshots each tick; all
//!   others smooth toward what they receive.
//!
//! Everything runs on the caller's tick loop. Transport events are drained by
//! [`SessionController::pump_events`] and handled synchronously.

use tracing::{debug, error, info, trace, warn};

use crate::{
    config::SessionConfig,
    error::SessionError,
    event::{EntityDespawned, EntitySpawned, EventBus, TransportEvent},
    input::InputSource,
    math::Vec2,
    net::{Message, PeerId},
    physics::PhysicsWorld,
    placement::spawn_position,
    registry::PeerRegistry,
    replicator::{Entity, SnapshotOutcome},
    transport::Transport,
};

/// Connection state of the local participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport activity.
    Disconnected,
    /// Listening; we are the authority.
    Hosting,
    /// Join requested, waiting for the authority's answer.
    Joining,
    /// Joined; the authority assigned our id.
    Joined,
}

/// Drives replication for one participant.
pub struct SessionController<T: Transport> {
    transport: T,
    cfg: SessionConfig,
    state: SessionState,
    local_id: Option<PeerId>,
    registry: PeerRegistry,
    notices: EventBus,
    ticks: u64,
}

impl<T: Transport> SessionController<T> {
    pub fn new(transport: T, cfg: SessionConfig) -> Self {
        Self {
            transport,
            cfg,
            state: SessionState::Disconnected,
            local_id: None,
            registry: PeerRegistry::new(),
            notices: EventBus::default(),
            ticks: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_id(&self) -> Option<PeerId> {
        self.local_id
    }

    /// Whether this participant is the session authority.
    pub fn is_authority(&self) -> bool {
        self.state == SessionState::Hosting
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn entity(&self, peer: PeerId) -> Option<&Entity> {
        self.registry.get(peer)
    }

    /// Notices for the embedding app: [`EntitySpawned`], [`EntityDespawned`]
    /// and [`SessionError`].
    pub fn notices_mut(&mut self) -> &mut EventBus {
        &mut self.notices
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    /// Number of entity steps run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    fn fail(&mut self, err: SessionError) -> SessionError {
        self.notices.push(err.clone());
        err
    }

    /// Starts hosting on `port` and spawns our own entity right away.
    pub fn host(&mut self, port: u16) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            let err = SessionError::transport(format!("session already active ({:?})", self.state));
            warn!(port, state = ?self.state, "Host rejected");
            return Err(self.fail(err));
        }

        if let Err(err) = self.transport.listen(port) {
            error!(port, error = %err, "Failed to host");
            return Err(self.fail(err));
        }

        self.state = SessionState::Hosting;
        self.local_id = Some(PeerId::AUTHORITY);
        info!(port, "Hosting session");

        self.spawn_and_broadcast(PeerId::AUTHORITY);
        Ok(())
    }

    /// Starts joining `address:port`. Our entity appears once the authority's
    /// spawn broadcast arrives.
    pub fn join(&mut self, address: &str, port: u16) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            let err = SessionError::transport(format!("session already active ({:?})", self.state));
            warn!(%address, port, state = ?self.state, "Join rejected");
            return Err(self.fail(err));
        }

        if let Err(err) = self.transport.connect(address, port) {
            error!(%address, port, error = %err, "Failed to join");
            return Err(self.fail(err));
        }

        self.state = SessionState::Joining;
        info!(%address, port, "Joining session");
        Ok(())
    }

    /// Leaves the current session and drops every tracked entity.
    pub fn leave(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        info!(state = ?self.state, "Leaving session");
        self.transport.close();
        self.teardown();
    }

    fn teardown(&mut self) {
        for peer in self.registry.ids() {
            self.notices.push(EntityDespawned { peer });
        }
        let removed = self.registry.clear();
        if removed > 0 {
            debug!(removed, "Cleared all entities");
        }
        self.state = SessionState::Disconnected;
        self.local_id = None;
    }

    /// Drains and handles every pending transport event. Returns how many were
    /// handled.
    pub fn pump_events(&mut self) -> usize {
        let events = self.transport.poll_events();
        let n = events.len();
        for ev in events {
            self.handle_event(ev);
        }
        n
    }

    fn handle_event(&mut self, ev: TransportEvent) {
        match ev {
            TransportEvent::ConnectedToAuthority { local_id } => {
                info!(local_id = %local_id, "Connected to authority");
                self.state = SessionState::Joined;
                self.local_id = Some(local_id);
            }
            TransportEvent::PeerConnected(peer) => self.on_peer_connected(peer),
            TransportEvent::PeerDisconnected(peer) => self.on_peer_disconnected(peer),
            TransportEvent::ConnectionFailed { reason } => {
                error!(%reason, "Connection failed");
                self.transport.close();
                self.teardown();
                self.notices.push(SessionError::connection(reason));
            }
            TransportEvent::AuthorityDisconnected => {
                if self.is_authority() {
                    return;
                }
                warn!("Disconnected from authority");
                self.transport.close();
                self.teardown();
                self.notices.push(SessionError::AuthorityLost);
            }
            TransportEvent::Message { from, message } => {
                trace!(
                    from = %from,
                    kind = ?message.kind(),
                    subject = %message.subject(),
                    "Routing message"
                );
                self.route(from, message)
            }
        }
    }

    fn on_peer_connected(&mut self, peer: PeerId) {
        info!(peer = %peer, "Peer connected");
        if !self.is_authority() {
            return;
        }

        self.spawn_and_broadcast(peer);

        // Catch the newcomer up on everyone already present.
        let existing: Vec<(PeerId, Vec2)> = self
            .registry
            .iter()
            .filter(|(id, _)| *id != peer)
            .map(|(id, e)| (id, e.position()))
            .collect();
        for (id, position) in existing {
            self.transport
                .send_reliable_to(peer, &Message::Spawn { peer: id, position });
        }
    }

    fn on_peer_disconnected(&mut self, peer: PeerId) {
        info!(peer = %peer, "Peer disconnected");
        if !self.is_authority() {
            return;
        }

        self.transport
            .send_reliable_to_all(&Message::Despawn { peer });
        self.despawn(peer);
    }

    fn spawn_and_broadcast(&mut self, peer: PeerId) {
        let position = spawn_position(peer);
        self.transport
            .send_reliable_to_all(&Message::Spawn { peer, position });
        self.spawn(peer, position);
    }

    fn route(&mut self, from: PeerId, message: Message) {
        match message {
            Message::Spawn { peer, position } => {
                if !from.is_authority() {
                    warn!(from = %from, peer = %peer, "Ignoring spawn from non-authority");
                    return;
                }
                self.spawn(peer, position);
            }
            Message::Despawn { peer } => {
                if !from.is_authority() {
                    warn!(from = %from, peer = %peer, "Ignoring despawn from non-authority");
                    return;
                }
                self.despawn(peer);
            }
            Message::StateSnapshot {
                peer,
                seq,
                position,
                velocity,
            } => {
                if from != peer {
                    debug!(from = %from, peer = %peer, "Dropping snapshot from non-owner");
                    return;
                }
                let Some(entity) = self.registry.get_mut(peer) else {
                    trace!(peer = %peer, "Dropping snapshot for unknown entity");
                    return;
                };
                match entity.apply_snapshot(seq, position, velocity) {
                    SnapshotOutcome::Applied => {}
                    SnapshotOutcome::Stale => trace!(peer = %peer, seq, "Dropped stale snapshot"),
                    SnapshotOutcome::SelfEcho => {
                        trace!(peer = %peer, "Dropped echo of own snapshot")
                    }
                }
            }
        }
    }

    /// Creates the entity for `peer` unless one exists. Returns whether an
    /// entity was created.
    pub fn spawn(&mut self, peer: PeerId, position: Vec2) -> bool {
        if self.registry.contains(peer) {
            trace!(peer = %peer, "Spawn ignored, already present");
            return false;
        }

        let entity = Entity::new(peer, position, self.local_id);
        let authoritative = entity.is_authority();
        self.registry.insert(entity);
        self.notices.push(EntitySpawned {
            peer,
            position,
            authoritative,
        });
        info!(peer = %peer, x = position.x, y = position.y, authoritative, "Spawned entity");
        true
    }

    /// Removes the entity for `peer` if present. Returns whether one was
    /// removed.
    pub fn despawn(&mut self, peer: PeerId) -> bool {
        if self.registry.remove(peer).is_none() {
            return false;
        }
        self.notices.push(EntityDespawned { peer });
        info!(peer = %peer, "Despawned entity");
        true
    }

    /// Runs one physics tick for every entity. Authoritative entities read
    /// `input` and broadcast their new state.
    pub fn step_entities(
        &mut self,
        dt: f32,
        input: &mut dyn InputSource,
        world: &mut dyn PhysicsWorld,
    ) {
        let tuning = self.cfg.movement;
        for (_, entity) in self.registry.iter_mut() {
            let dir = if entity.is_authority() {
                input.direction()
            } else {
                Vec2::ZERO
            };
            if let Some(snapshot) = entity.tick(dir, dt, &tuning, world) {
                self.transport.send_unreliable_to_all(&snapshot);
            }
        }
        self.ticks += 1;
    }

    /// One full tick: handle pending events, then step entities.
    pub fn tick(&mut self, dt: f32, input: &mut dyn InputSource, world: &mut dyn PhysicsWorld) {
        self.pump_events();
        self.step_entities(dt, input, world);
    }
}
