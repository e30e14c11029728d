use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use worldspace_common::{BlockPos, EntityId, LeaseHandle, WorldId};

/// Errors from world mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("position {0} is already occupied")]
    PositionOccupied(BlockPos),
    #[error("no entity {0} in this world")]
    UnknownEntity(EntityId),
}

/// What an entity is able to do. Only anchors may hold a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// A stateful object that can ask for cells to stay resident.
    Anchor,
    /// Any other position-addressed object.
    Prop,
}

/// An event record produced by every mutation to the world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorldEvent {
    /// Entity was spawned at the given position.
    Spawned {
        id: EntityId,
        position: BlockPos,
        kind: EntityKind,
    },
    /// Entity was despawned from `position`.
    Despawned {
        id: EntityId,
        position: BlockPos,
        kind: EntityKind,
    },
    /// Entity moved to a new block.
    Moved {
        id: EntityId,
        old: BlockPos,
        new: BlockPos,
    },
    /// The entity's lease back-reference changed.
    LeaseSlotChanged {
        id: EntityId,
        old: Option<LeaseHandle>,
        new: Option<LeaseHandle>,
    },
    /// Simulation advanced one tick.
    Stepped { tick: u64 },
}

/// Per-entity data stored in the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityData {
    pub position: BlockPos,
    pub kind: EntityKind,
    /// Handle of the lease currently held on this entity's behalf.
    /// Handles are only valid for the running session.
    #[serde(skip)]
    lease: Option<LeaseHandle>,
}

impl EntityData {
    pub fn lease(&self) -> Option<LeaseHandle> {
        self.lease
    }
}

/// The authoritative world state.
///
/// Entities are addressed both by id and by block position. Uses BTreeMap for
/// deterministic iteration order across all platforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "WorldRepr")]
pub struct World {
    id: WorldId,
    entities: BTreeMap<EntityId, EntityData>,
    /// Index rebuilt from `entities` on load.
    #[serde(skip_serializing)]
    positions: BTreeMap<BlockPos, EntityId>,
    tick: u64,
    /// Append-only event log of all mutations.
    #[serde(skip)]
    event_log: Vec<WorldEvent>,
}

#[derive(Deserialize)]
struct WorldRepr {
    id: WorldId,
    entities: BTreeMap<EntityId, EntityData>,
    tick: u64,
}

impl From<WorldRepr> for World {
    fn from(repr: WorldRepr) -> Self {
        let positions = repr
            .entities
            .iter()
            .map(|(id, data)| (data.position, *id))
            .collect();
        Self {
            id: repr.id,
            entities: repr.entities,
            positions,
            tick: repr.tick,
            event_log: Vec::new(),
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::with_id(WorldId::new())
    }
}

impl World {
    /// Create an empty world with a fresh id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty world with a specific id.
    pub fn with_id(id: WorldId) -> Self {
        Self {
            id,
            entities: BTreeMap::new(),
            positions: BTreeMap::new(),
            tick: 0,
            event_log: Vec::new(),
        }
    }

    pub fn id(&self) -> WorldId {
        self.id
    }

    /// Current simulation tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Number of entities in the world.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Read-only access to the event log.
    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }

    /// Read-only access to all entities.
    pub fn entities(&self) -> &BTreeMap<EntityId, EntityData> {
        &self.entities
    }

    /// Spawn a new entity at `position`. Returns its id.
    pub fn spawn(&mut self, kind: EntityKind, position: BlockPos) -> Result<EntityId, WorldError> {
        if self.positions.contains_key(&position) {
            return Err(WorldError::PositionOccupied(position));
        }
        let id = EntityId::new();
        self.positions.insert(position, id);
        self.entities.insert(
            id,
            EntityData {
                position,
                kind,
                lease: None,
            },
        );
        tracing::trace!(%id, %position, ?kind, "spawned entity");
        self.event_log.push(WorldEvent::Spawned { id, position, kind });
        Ok(id)
    }

    /// Remove an entity. Returns the data if it existed.
    ///
    /// The caller is responsible for releasing any lease the entity held first.
    pub fn despawn(&mut self, id: EntityId) -> Option<EntityData> {
        let data = self.entities.remove(&id)?;
        self.positions.remove(&data.position);
        self.event_log.push(WorldEvent::Despawned {
            id,
            position: data.position,
            kind: data.kind,
        });
        Some(data)
    }

    /// Get a reference to entity data.
    pub fn get(&self, id: EntityId) -> Option<&EntityData> {
        self.entities.get(&id)
    }

    /// The entity occupying `position`, if any.
    pub fn entity_at(&self, position: BlockPos) -> Option<EntityId> {
        self.positions.get(&position).copied()
    }

    pub fn position(&self, id: EntityId) -> Option<BlockPos> {
        self.entities.get(&id).map(|d| d.position)
    }

    /// Whether `id` names an entity that is able to hold a lease.
    pub fn can_hold_lease(&self, id: EntityId) -> bool {
        matches!(
            self.entities.get(&id),
            Some(EntityData {
                kind: EntityKind::Anchor,
                ..
            })
        )
    }

    /// The lease handle recorded on the entity, if any.
    pub fn lease_slot(&self, id: EntityId) -> Option<LeaseHandle> {
        self.entities.get(&id).and_then(|d| d.lease)
    }

    /// Overwrite the entity's lease back-reference. Returns the previous value.
    pub fn set_lease_slot(
        &mut self,
        id: EntityId,
        lease: Option<LeaseHandle>,
    ) -> Result<Option<LeaseHandle>, WorldError> {
        let data = self
            .entities
            .get_mut(&id)
            .ok_or(WorldError::UnknownEntity(id))?;
        let old = std::mem::replace(&mut data.lease, lease);
        if old != lease {
            self.event_log
                .push(WorldEvent::LeaseSlotChanged { id, old, new: lease });
        }
        Ok(old)
    }

    /// Move an entity to a new block and log the change.
    pub fn move_entity(&mut self, id: EntityId, new: BlockPos) -> Result<(), WorldError> {
        let old = self.position(id).ok_or(WorldError::UnknownEntity(id))?;
        if old == new {
            return Ok(());
        }
        if self.positions.contains_key(&new) {
            return Err(WorldError::PositionOccupied(new));
        }
        self.positions.remove(&old);
        self.positions.insert(new, id);
        if let Some(data) = self.entities.get_mut(&id) {
            data.position = new;
        }
        self.event_log.push(WorldEvent::Moved { id, old, new });
        Ok(())
    }

    /// Advance the simulation by one tick.
    pub fn step(&mut self) {
        self.tick += 1;
        self.event_log.push(WorldEvent::Stepped { tick: self.tick });
    }

    /// Compute a deterministic hash of the world state for comparison.
    /// Uses canonical (BTreeMap) iteration order. Lease slots are excluded.
    pub fn state_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
        let mix = |h: &mut u64, bytes: &[u8]| {
            for &b in bytes {
                *h ^= b as u64;
                *h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        mix(&mut h, self.id.0.as_bytes());
        mix(&mut h, &self.tick.to_le_bytes());
        for (id, data) in &self.entities {
            mix(&mut h, id.0.as_bytes());
            for c in data.position.0.to_array() {
                mix(&mut h, &c.to_le_bytes());
            }
            mix(&mut h, &[data.kind as u8]);
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_starts_empty() {
        let w = World::new();
        assert_eq!(w.tick(), 0);
        assert_eq!(w.entity_count(), 0);
    }

    #[test]
    fn spawn_and_despawn() {
        let mut w = World::new();
        let pos = BlockPos::new(4, 64, 4);
        let id = w.spawn(EntityKind::Anchor, pos).unwrap();
        assert_eq!(w.entity_count(), 1);
        assert_eq!(w.entity_at(pos), Some(id));

        let data = w.despawn(id);
        assert!(data.is_some());
        assert_eq!(w.entity_count(), 0);
        assert_eq!(w.entity_at(pos), None);
    }

    #[test]
    fn position_is_exclusive() {
        let mut w = World::new();
        let pos = BlockPos::new(0, 0, 0);
        w.spawn(EntityKind::Prop, pos).unwrap();
        assert_eq!(
            w.spawn(EntityKind::Anchor, pos),
            Err(WorldError::PositionOccupied(pos))
        );
    }

    #[test]
    fn only_anchors_hold_leases() {
        let mut w = World::new();
        let anchor = w.spawn(EntityKind::Anchor, BlockPos::new(1, 0, 0)).unwrap();
        let prop = w.spawn(EntityKind::Prop, BlockPos::new(2, 0, 0)).unwrap();
        assert!(w.can_hold_lease(anchor));
        assert!(!w.can_hold_lease(prop));
        assert!(!w.can_hold_lease(EntityId::new()));
    }

    #[test]
    fn lease_slot_set_and_clear() {
        let mut w = World::new();
        let id = w.spawn(EntityKind::Anchor, BlockPos::new(0, 0, 0)).unwrap();
        assert_eq!(w.set_lease_slot(id, Some(LeaseHandle(3))), Ok(None));
        assert_eq!(w.lease_slot(id), Some(LeaseHandle(3)));
        assert_eq!(w.set_lease_slot(id, None), Ok(Some(LeaseHandle(3))));
        assert_eq!(w.lease_slot(id), None);

        let missing = EntityId::new();
        assert_eq!(
            w.set_lease_slot(missing, None),
            Err(WorldError::UnknownEntity(missing))
        );
    }

    #[test]
    fn move_updates_position_index() {
        let mut w = World::new();
        let from = BlockPos::new(0, 0, 0);
        let to = BlockPos::new(32, 0, 0);
        let id = w.spawn(EntityKind::Anchor, from).unwrap();
        w.move_entity(id, to).unwrap();
        assert_eq!(w.entity_at(from), None);
        assert_eq!(w.entity_at(to), Some(id));
        assert_eq!(w.position(id), Some(to));
    }

    #[test]
    fn step_increments_tick() {
        let mut w = World::new();
        w.step();
        w.step();
        w.step();
        assert_eq!(w.tick(), 3);
    }

    #[test]
    fn events_are_recorded() {
        let mut w = World::new();
        let id = w.spawn(EntityKind::Anchor, BlockPos::new(0, 0, 0)).unwrap();
        w.set_lease_slot(id, Some(LeaseHandle(1))).unwrap();
        w.step();
        w.despawn(id);
        assert_eq!(w.events().len(), 4);
    }

    #[test]
    fn entities_iterate_in_id_order() {
        let mut w = World::new();
        for i in 0..100 {
            w.spawn(EntityKind::Prop, BlockPos::new(i, 0, 0)).unwrap();
        }
        let keys: Vec<EntityId> = w.entities().keys().copied().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
