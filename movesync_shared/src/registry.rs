//! Peer registry.
//!
//! Maps each peer id to the entity it owns. An id is present iff a spawn for it
//! has been processed and no despawn since. Keys iterate in ascending order so
//! every tick visits entities in the same sequence.

use std::collections::{btree_map::Entry, BTreeMap};

use crate::{net::PeerId, replicator::Entity};

/// Peer id -> owned entity.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    entities: BTreeMap<PeerId, Entity>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity under its owner. Returns `false` and keeps the
    /// existing entry if the owner is already registered.
    pub fn insert(&mut self, entity: Entity) -> bool {
        match self.entities.entry(entity.owner()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entity);
                true
            }
        }
    }

    /// Removes and returns the entity owned by `peer`.
    pub fn remove(&mut self, peer: PeerId) -> Option<Entity> {
        self.entities.remove(&peer)
    }

    pub fn get(&self, peer: PeerId) -> Option<&Entity> {
        self.entities.get(&peer)
    }

    pub fn get_mut(&mut self, peer: PeerId) -> Option<&mut Entity> {
        self.entities.get_mut(&peer)
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.entities.contains_key(&peer)
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<PeerId> {
        self.entities.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, &Entity)> {
        self.entities.iter().map(|(k, v)| (*k, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PeerId, &mut Entity)> {
        self.entities.iter_mut().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Drops every entity. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let n = self.entities.len();
        self.entities.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;

    fn entity(id: u32) -> Entity {
        Entity::new(PeerId(id), Vec2::ZERO, Some(PeerId(1)))
    }

    #[test]
    fn insert_is_first_writer_wins() {
        let mut reg = PeerRegistry::new();
        assert!(reg.insert(Entity::new(PeerId(2), Vec2::new(1.0, 1.0), None)));
        assert!(!reg.insert(Entity::new(PeerId(2), Vec2::new(9.0, 9.0), None)));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(PeerId(2)).unwrap().position(), Vec2::new(1.0, 1.0));
    }

    #[test]
    fn ids_are_sorted() {
        let mut reg = PeerRegistry::new();
        for id in [5, 1, 3] {
            reg.insert(entity(id));
        }
        assert_eq!(reg.ids(), vec![PeerId(1), PeerId(3), PeerId(5)]);
    }

    #[test]
    fn remove_and_clear() {
        let mut reg = PeerRegistry::new();
        reg.insert(entity(1));
        reg.insert(entity(2));
        assert!(reg.remove(PeerId(2)).is_some());
        assert!(reg.remove(PeerId(2)).is_none());
        assert!(!reg.contains(PeerId(2)));
        assert_eq!(reg.clear(), 1);
        assert!(reg.is_empty());
    }
}
