use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use worldspace_common::{BlockPos, EntityId, LeaseHandle, WorldId};
use worldspace_kernel::{EntityData, World, WorldError};
use worldspace_stream::{GridService, LoadRegistration, PendingLease};

use crate::error::LeaseError;
use crate::lease::{Lease, LeaseState};
use crate::range::{CellRange, RangeForcer};
use crate::store::{AnchorMetadata, LeaseStore};

/// Lease manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Owner name leases are requested under and the load callback is registered for.
    pub owner: String,
    /// Emit a residency dump at `debug` level after every lease mutation.
    pub debug: bool,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            owner: "worldspace".into(),
            debug: false,
        }
    }
}

/// Outcome of one world-load reinstatement pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReinstateReport {
    /// Leases bound back to their anchor.
    pub reinstated: usize,
    /// Leases released because their anchor could not take them.
    pub orphaned: usize,
    /// Leases left alone because their payload is not an anchor payload.
    pub skipped: usize,
}

/// Owns every anchor lease and keeps the grid, the lease stores and the
/// anchors' lease slots in agreement.
///
/// All methods run on the world tick thread; nothing here blocks or locks.
pub struct LeaseManager {
    config: LeaseConfig,
    registration: Option<LoadRegistration>,
    stores: BTreeMap<WorldId, LeaseStore>,
    failures: BTreeMap<EntityId, LeaseError>,
}

impl LeaseManager {
    /// Create a manager and register it as the world-load callback for its owner.
    pub fn new(grid: &mut dyn GridService, config: LeaseConfig) -> Result<Self, LeaseError> {
        let registration = grid
            .register_load_callback(&config.owner)
            .map_err(LeaseError::Grid)?;
        tracing::debug!(owner = %config.owner, "lease manager registered");
        Ok(Self {
            config,
            registration: Some(registration),
            stores: BTreeMap::new(),
            failures: BTreeMap::new(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.config.owner
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// Allocate a fresh, empty lease bound to `world`.
    pub fn new_lease(&self, grid: &mut dyn GridService, world: WorldId) -> Result<Lease, LeaseError> {
        let handle = grid
            .request_lease(&self.config.owner, world)
            .map_err(|source| LeaseError::Allocation {
                owner: self.config.owner.clone(),
                world,
                source,
            })?;
        Ok(Lease::new(handle, world))
    }

    /// Make `range` (cell offsets around the anchor's cell) the anchor's forced
    /// residency, replacing whatever it had before.
    ///
    /// Returns the state of the anchor's lease afterwards. Failures leave the
    /// anchor without a fully forced range and are readable via [`Self::failure`].
    /// A range that runs off the grid is refused before anything is released.
    pub fn set_forced_range(
        &mut self,
        grid: &mut dyn GridService,
        world: &mut World,
        anchor: EntityId,
        range: CellRange,
    ) -> LeaseState {
        let world_id = world.id();
        let Some(position) = world
            .position(anchor)
            .filter(|_| world.can_hold_lease(anchor))
        else {
            tracing::warn!(%anchor, world = %world_id, "entity cannot hold a lease");
            self.failures.insert(anchor, LeaseError::NotAnAnchor(anchor));
            return LeaseState::Unbound;
        };

        let center = position.cell();
        if !range.fits_around(center) {
            let e = LeaseError::InvalidRange { range, center };
            tracing::warn!(%anchor, %position, world = %world_id, error = %e, "range refused");
            self.failures.insert(anchor, e);
            return self.state(world_id, anchor).unwrap_or(LeaseState::Unbound);
        }

        self.release_held(grid, world, anchor);

        let mut lease = match self.new_lease(grid, world_id) {
            Ok(lease) => lease,
            Err(e) => {
                tracing::warn!(
                    %anchor,
                    %position,
                    world = %world_id,
                    error = %e,
                    "unable to allocate a lease; remote dependents of this anchor may unload"
                );
                self.failures.insert(anchor, e);
                return LeaseState::Unbound;
            }
        };

        AnchorMetadata { position, range }.encode_into(lease.payload_mut());
        if let Err(e) = grid.write_payload(lease.handle(), lease.payload().clone()) {
            lease.release(grid);
            self.failures.insert(anchor, LeaseError::Grid(e));
            return LeaseState::Unbound;
        }

        let state = self.bind_and_force(grid, world, anchor, position, lease);
        self.trace_dump(world_id, anchor, "set_forced_range");
        state
    }

    /// Release the anchor's lease, if it has one.
    pub fn clear_forced_range(
        &mut self,
        grid: &mut dyn GridService,
        world: &mut World,
        anchor: EntityId,
    ) {
        if self.release_held(grid, world, anchor) {
            self.failures.remove(&anchor);
            self.trace_dump(world.id(), anchor, "clear_forced_range");
        }
    }

    /// Move an anchor and lay its current range around the new position.
    ///
    /// If that range runs off the grid at the new position the old lease is
    /// released rather than left forcing cells around the old one.
    pub fn move_anchor(
        &mut self,
        grid: &mut dyn GridService,
        world: &mut World,
        anchor: EntityId,
        to: BlockPos,
    ) -> Result<Option<LeaseState>, WorldError> {
        world.move_entity(anchor, to)?;
        let range = self
            .lease(world.id(), anchor)
            .and_then(|lease| AnchorMetadata::decode(lease.payload()).ok())
            .map(|meta| meta.range);
        let Some(range) = range else {
            return Ok(None);
        };
        if !range.fits_around(to.cell()) {
            self.release_held(grid, world, anchor);
        }
        Ok(Some(self.set_forced_range(grid, world, anchor, range)))
    }

    /// Remove an anchor from its world, releasing its lease first.
    pub fn remove_anchor(
        &mut self,
        grid: &mut dyn GridService,
        world: &mut World,
        anchor: EntityId,
    ) -> Option<EntityData> {
        self.release_held(grid, world, anchor);
        self.failures.remove(&anchor);
        world.despawn(anchor)
    }

    /// Rebind the leases a world saved to the anchors they belong to.
    ///
    /// Called once per world load with every pending lease for this owner.
    /// Payloads that are not anchor payloads are left held and untouched.
    /// Leases whose anchor is gone, is not an anchor, or already holds a lease
    /// are released on the spot.
    pub fn on_world_load(
        &mut self,
        grid: &mut dyn GridService,
        world: &mut World,
        pending: Vec<PendingLease>,
    ) -> ReinstateReport {
        let world_id = world.id();
        let _span =
            tracing::info_span!("lease_world_load", world = %world_id, records = pending.len())
                .entered();
        let mut report = ReinstateReport::default();

        for record in pending {
            let meta = match AnchorMetadata::decode(&record.payload) {
                Ok(meta) => meta,
                Err(reason) => {
                    tracing::trace!(lease = %record.handle, %reason, "leaving foreign lease alone");
                    report.skipped += 1;
                    continue;
                }
            };

            let Some(anchor) = self.free_anchor_at(world, meta.position) else {
                grid.release_lease(record.handle);
                let orphan = LeaseError::OrphanLease {
                    handle: record.handle,
                    position: meta.position,
                };
                tracing::warn!(world = %world_id, error = %orphan, "released orphan lease");
                report.orphaned += 1;
                continue;
            };

            let lease = Lease::reinstated(record.handle, world_id, record.payload);
            self.bind_and_force(grid, world, anchor, meta.position, lease);
            self.trace_dump(world_id, anchor, "reinstated");
            report.reinstated += 1;
        }

        tracing::info!(
            reinstated = report.reinstated,
            orphaned = report.orphaned,
            skipped = report.skipped,
            "lease reinstatement complete"
        );
        report
    }

    /// Forget a world the grid has unloaded. Its leases died with it, so the
    /// anchors' lease slots are cleared for the next load to fill.
    pub fn on_world_unload(&mut self, world: &mut World) -> usize {
        let Some(mut store) = self.stores.remove(&world.id()) else {
            return 0;
        };
        let anchors: Vec<EntityId> = store.drain().map(|(anchor, _)| anchor).collect();
        for anchor in &anchors {
            self.set_slot(world, *anchor, None);
        }
        tracing::debug!(world = %world.id(), leases = anchors.len(), "world leases forgotten");
        anchors.len()
    }

    /// Release every lease and give up the load-callback registration.
    pub fn shutdown(mut self, grid: &mut dyn GridService) {
        let mut released = 0;
        for store in self.stores.values_mut() {
            for (_, mut lease) in store.drain() {
                lease.release(grid);
                released += 1;
            }
        }
        if let Some(registration) = self.registration.take() {
            grid.unregister_load_callback(registration);
        }
        tracing::debug!(owner = %self.config.owner, released, "lease manager shut down");
    }

    /// The anchor's active lease in `world`.
    pub fn lease(&self, world: WorldId, anchor: EntityId) -> Option<&Lease> {
        self.stores.get(&world).and_then(|s| s.get(anchor))
    }

    /// State of the anchor's active lease, `None` when it holds none.
    pub fn state(&self, world: WorldId, anchor: EntityId) -> Option<LeaseState> {
        self.lease(world, anchor).map(Lease::state)
    }

    /// The most recent failure recorded for the anchor.
    pub fn failure(&self, anchor: EntityId) -> Option<&LeaseError> {
        self.failures.get(&anchor)
    }

    pub fn store(&self, world: WorldId) -> Option<&LeaseStore> {
        self.stores.get(&world)
    }

    /// Active leases across all worlds.
    pub fn lease_count(&self) -> usize {
        self.stores.values().map(LeaseStore::len).sum()
    }

    /// The anchor at `position` if it can take a reinstated lease right now.
    fn free_anchor_at(&self, world: &World, position: BlockPos) -> Option<EntityId> {
        world.entity_at(position).filter(|id| {
            world.can_hold_lease(*id)
                && world.lease_slot(*id).is_none()
                && self.lease(world.id(), *id).is_none()
        })
    }

    /// Store the lease, point the anchor at it and force its range.
    fn bind_and_force(
        &mut self,
        grid: &mut dyn GridService,
        world: &mut World,
        anchor: EntityId,
        position: BlockPos,
        mut lease: Lease,
    ) -> LeaseState {
        let world_id = world.id();
        let handle = lease.handle();
        let result = RangeForcer::force_range(grid, &mut lease, position);
        let state = lease.state();

        if let Some(mut displaced) = self
            .stores
            .entry(world_id)
            .or_default()
            .insert(anchor, lease)
        {
            displaced.release(grid);
        }
        self.set_slot(world, anchor, Some(handle));

        match result {
            Ok(cells) => {
                self.failures.remove(&anchor);
                tracing::debug!(%anchor, lease = %handle, cells, "anchor range forced");
            }
            Err(e) => {
                tracing::warn!(%anchor, lease = %handle, error = %e, "anchor range only partly forced");
                self.failures.insert(anchor, e);
            }
        }
        state
    }

    /// Release the anchor's lease if it has one. Returns whether it did.
    fn release_held(&mut self, grid: &mut dyn GridService, world: &mut World, anchor: EntityId) -> bool {
        let Some(mut lease) = self
            .stores
            .get_mut(&world.id())
            .and_then(|store| store.remove(anchor))
        else {
            return false;
        };
        lease.release(grid);
        self.set_slot(world, anchor, None);
        tracing::debug!(%anchor, lease = %lease.handle(), "lease released");
        true
    }

    fn set_slot(&self, world: &mut World, anchor: EntityId, lease: Option<LeaseHandle>) {
        if let Err(e) = world.set_lease_slot(anchor, lease) {
            tracing::debug!(%anchor, error = %e, "anchor gone; lease slot not updated");
        }
    }

    fn trace_dump(&self, world: WorldId, anchor: EntityId, label: &str) {
        if self.config.debug {
            tracing::debug!("{}", self.dump(world, anchor, label));
        }
    }
}
