//! Entity replication.
//!
//! Each entity is either driven locally (authority) or mirrored from the
//! network (replica). The role is chosen once at creation:
//! - Authority: input -> eased velocity -> `move_and_slide` -> snapshot out.
//! - Replica: snapshot in -> exponential smoothing toward the latest target.
//!
//! Replicas never extrapolate. Without new snapshots they settle on the last
//! target and stop.

use tracing::trace;

use crate::{
    config::MovementTuning,
    math::{Color, Vec2},
    net::{Message, PeerId},
    physics::PhysicsWorld,
    placement::color_for_peer,
};

/// Who drives an entity on this participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Authority,
    Replica,
}

/// Result of feeding a received snapshot to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Became the new interpolation target.
    Applied,
    /// Older than (or equal to) a snapshot already applied.
    Stale,
    /// The entity is ours; external state is never accepted for it.
    SelfEcho,
}

/// Latest state received for a replica.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetTarget {
    pub position: Vec2,
    pub velocity: Vec2,
}

/// One player's avatar.
#[derive(Debug, Clone)]
pub struct Entity {
    owner: PeerId,
    role: Role,
    position: Vec2,
    velocity: Vec2,
    target: NetTarget,
    last_applied_seq: Option<u64>,
    next_seq: u64,
}

/// Fraction of the remaining distance a replica covers in `dt` seconds.
///
/// Frame-rate independent: two steps of `dt/2` cover the same fraction as one
/// step of `dt`.
pub fn smoothing_alpha(rate: f32, dt: f32) -> f32 {
    1.0 - (-rate * dt).exp()
}

impl Entity {
    /// Creates the entity owned by `owner`. It is authoritative iff `owner` is
    /// the local peer.
    pub fn new(owner: PeerId, position: Vec2, local_id: Option<PeerId>) -> Self {
        let role = if local_id == Some(owner) {
            Role::Authority
        } else {
            Role::Replica
        };
        Self {
            owner,
            role,
            position,
            velocity: Vec2::ZERO,
            target: NetTarget {
                position,
                velocity: Vec2::ZERO,
            },
            last_applied_seq: None,
            next_seq: 0,
        }
    }

    pub fn owner(&self) -> PeerId {
        self.owner
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_authority(&self) -> bool {
        self.role == Role::Authority
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    /// Current interpolation target (equals the spawn state until a snapshot
    /// arrives).
    pub fn target(&self) -> NetTarget {
        self.target
    }

    pub fn color(&self) -> Color {
        color_for_peer(self.owner)
    }

    /// Advances an authoritative entity by one tick and returns the snapshot to
    /// broadcast.
    pub fn step_authority(
        &mut self,
        input: Vec2,
        dt: f32,
        tuning: &MovementTuning,
        world: &mut dyn PhysicsWorld,
    ) -> Message {
        let input = input.clamp_unit_axes().clamp_length(1.0);

        self.velocity = if input.is_zero() {
            self.velocity.move_toward(Vec2::ZERO, tuning.friction * dt)
        } else {
            self.velocity
                .move_toward(input * tuning.speed, tuning.acceleration * dt)
        };

        let motion = world.move_and_slide(self.position, self.velocity, dt);
        self.position = motion.position;
        self.velocity = motion.velocity;

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        Message::StateSnapshot {
            peer: self.owner,
            seq,
            position: self.position,
            velocity: self.velocity,
        }
    }

    /// Moves a replica's displayed state toward its target.
    pub fn smooth(&mut self, dt: f32, rate: f32) {
        let alpha = smoothing_alpha(rate, dt);
        self.position = self.position.lerp(self.target.position, alpha);
        self.velocity = self.velocity.lerp(self.target.velocity, alpha);
    }

    /// Runs the role-appropriate tick. Returns a snapshot only for authority.
    pub fn tick(
        &mut self,
        input: Vec2,
        dt: f32,
        tuning: &MovementTuning,
        world: &mut dyn PhysicsWorld,
    ) -> Option<Message> {
        match self.role {
            Role::Authority => Some(self.step_authority(input, dt, tuning, world)),
            Role::Replica => {
                self.smooth(dt, tuning.net_smoothing);
                None
            }
        }
    }

    /// Offers a received snapshot to this entity.
    pub fn apply_snapshot(&mut self, seq: u64, position: Vec2, velocity: Vec2) -> SnapshotOutcome {
        if self.is_authority() {
            return SnapshotOutcome::SelfEcho;
        }
        if self.last_applied_seq.is_some_and(|last| seq <= last) {
            trace!(peer = %self.owner, seq, "Stale snapshot");
            return SnapshotOutcome::Stale;
        }
        self.last_applied_seq = Some(seq);
        self.target = NetTarget { position, velocity };
        SnapshotOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::OpenWorld;

    const DT: f32 = 1.0 / 60.0;

    fn assert_close(a: Vec2, b: Vec2) {
        assert!(a.distance(b) < 1e-3, "{a:?} != {b:?}");
    }

    fn replica_at_origin() -> Entity {
        Entity::new(PeerId(2), Vec2::ZERO, Some(PeerId(1)))
    }

    #[test]
    fn role_follows_local_id() {
        assert!(Entity::new(PeerId(1), Vec2::ZERO, Some(PeerId(1))).is_authority());
        assert!(!Entity::new(PeerId(2), Vec2::ZERO, Some(PeerId(1))).is_authority());
        assert!(!Entity::new(PeerId(2), Vec2::ZERO, None).is_authority());
    }

    #[test]
    fn acceleration_is_move_toward_not_decay() {
        let tuning = MovementTuning::default();
        let mut e = Entity::new(PeerId(1), Vec2::ZERO, Some(PeerId(1)));

        e.step_authority(Vec2::new(1.0, 0.0), 0.1, &tuning, &mut OpenWorld);
        // 1200 * 0.1 = 120 per tick toward 220.
        assert_close(e.velocity(), Vec2::new(120.0, 0.0));
        e.step_authority(Vec2::new(1.0, 0.0), 0.1, &tuning, &mut OpenWorld);
        assert_close(e.velocity(), Vec2::new(220.0, 0.0));

        // Released: friction 120 per tick toward rest.
        e.step_authority(Vec2::ZERO, 0.1, &tuning, &mut OpenWorld);
        assert_close(e.velocity(), Vec2::new(100.0, 0.0));
        e.step_authority(Vec2::ZERO, 0.1, &tuning, &mut OpenWorld);
        assert_eq!(e.velocity(), Vec2::ZERO);
    }

    #[test]
    fn position_integrates_through_world() {
        let tuning = MovementTuning::default();
        let mut e = Entity::new(PeerId(1), Vec2::new(10.0, 10.0), Some(PeerId(1)));
        e.step_authority(Vec2::new(0.0, 1.0), 0.1, &tuning, &mut OpenWorld);
        assert_close(e.position(), Vec2::new(10.0, 22.0));
    }

    #[test]
    fn diagonal_input_is_normalized() {
        let tuning = MovementTuning {
            acceleration: 1.0e9,
            ..Default::default()
        };
        let mut e = Entity::new(PeerId(1), Vec2::ZERO, Some(PeerId(1)));
        e.step_authority(Vec2::new(3.0, 3.0), DT, &tuning, &mut OpenWorld);
        assert!((e.velocity().length() - tuning.speed).abs() < 1e-2);
    }

    #[test]
    fn authority_snapshots_carry_increasing_sequence() {
        let tuning = MovementTuning::default();
        let mut e = Entity::new(PeerId(3), Vec2::ZERO, Some(PeerId(3)));
        let seqs: Vec<u64> = (0..3)
            .map(|_| match e.step_authority(Vec2::ZERO, DT, &tuning, &mut OpenWorld) {
                Message::StateSnapshot { seq, peer, .. } => {
                    assert_eq!(peer, PeerId(3));
                    seq
                }
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn authority_ignores_echoed_snapshot() {
        let tuning = MovementTuning::default();
        let mut e = Entity::new(PeerId(1), Vec2::new(50.0, 80.0), Some(PeerId(1)));
        let snap = e.step_authority(Vec2::new(1.0, 0.0), DT, &tuning, &mut OpenWorld);
        let (pos, vel) = (e.position(), e.velocity());

        let Message::StateSnapshot { seq, .. } = snap else {
            panic!("expected snapshot");
        };
        let outcome = e.apply_snapshot(seq + 10, Vec2::new(-500.0, -500.0), Vec2::ZERO);
        assert_eq!(outcome, SnapshotOutcome::SelfEcho);
        assert_eq!(e.position(), pos);
        assert_eq!(e.velocity(), vel);
    }

    #[test]
    fn stale_snapshot_is_dropped() {
        let mut e = replica_at_origin();
        assert_eq!(
            e.apply_snapshot(5, Vec2::new(10.0, 0.0), Vec2::ZERO),
            SnapshotOutcome::Applied
        );
        assert_eq!(
            e.apply_snapshot(4, Vec2::new(-10.0, 0.0), Vec2::ZERO),
            SnapshotOutcome::Stale
        );
        assert_eq!(
            e.apply_snapshot(5, Vec2::new(-10.0, 0.0), Vec2::ZERO),
            SnapshotOutcome::Stale
        );
        assert_eq!(e.target().position, Vec2::new(10.0, 0.0));
    }

    #[test]
    fn replica_without_snapshots_stays_put() {
        let tuning = MovementTuning::default();
        let mut e = Entity::new(PeerId(2), Vec2::new(100.0, 160.0), Some(PeerId(1)));
        for _ in 0..30 {
            assert!(e.tick(Vec2::new(1.0, 1.0), DT, &tuning, &mut OpenWorld).is_none());
        }
        assert_eq!(e.position(), Vec2::new(100.0, 160.0));
    }

    #[test]
    fn smoothing_converges_monotonically_by_fixed_fraction() {
        let rate = 12.0;
        let target = Vec2::new(100.0, 0.0);
        let mut e = replica_at_origin();
        e.apply_snapshot(0, target, Vec2::ZERO);

        let alpha = smoothing_alpha(rate, DT);
        let mut prev = e.position().distance(target);
        for _ in 0..40 {
            e.smooth(DT, rate);
            let dist = e.position().distance(target);
            assert!(dist < prev);
            assert!((dist - prev * (1.0 - alpha)).abs() < 1e-3);
            prev = dist;
        }
        assert!(prev < 0.05);
    }

    #[test]
    fn smoothing_is_independent_of_dt_partitioning() {
        let rate = 12.0;
        let target = Vec2::new(100.0, -40.0);

        let mut whole = replica_at_origin();
        whole.apply_snapshot(0, target, Vec2::ZERO);
        whole.smooth(DT, rate);

        let mut halves = replica_at_origin();
        halves.apply_snapshot(0, target, Vec2::ZERO);
        halves.smooth(DT / 2.0, rate);
        halves.smooth(DT / 2.0, rate);

        assert!(whole.position().distance(halves.position()) < 1e-3);
    }
}
