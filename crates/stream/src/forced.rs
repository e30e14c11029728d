use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use worldspace_common::{CellCoord, LeaseHandle, LeasePayload, WorldId};

use crate::service::{GridError, GridService, LoadRegistration, PendingLease, SavedLease};

/// Grid service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceConfig {
    /// Maximum number of live leases a single owner may hold across all worlds.
    pub lease_quota: usize,
}

impl Default for ForceConfig {
    fn default() -> Self {
        Self { lease_quota: 200 }
    }
}

/// Counters for instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridStats {
    pub leases_issued: usize,
    pub leases_released: usize,
    pub allocation_refusals: usize,
    pub cells_forced: usize,
}

#[derive(Debug)]
struct LeaseEntry {
    owner: String,
    world: WorldId,
    cells: BTreeSet<CellCoord>,
    payload: LeasePayload,
}

/// Leases handed back on world load, grouped by the owner that registered for them.
#[derive(Debug, Default)]
pub struct LoadBatch {
    pub world: Option<WorldId>,
    pending: BTreeMap<String, Vec<PendingLease>>,
}

impl LoadBatch {
    /// Remove and return every pending lease for `owner`.
    pub fn take(&mut self, owner: &str) -> Vec<PendingLease> {
        self.pending.remove(owner).unwrap_or_default()
    }

    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// In-memory grid service that tracks forced residency per lease.
///
/// A cell stays resident while any lease in its world forces it; the count per
/// cell is the number of leases forcing it.
#[derive(Debug, Default)]
pub struct ForcedGrid {
    pub config: ForceConfig,
    leases: BTreeMap<LeaseHandle, LeaseEntry>,
    residency: BTreeMap<(WorldId, CellCoord), usize>,
    loaded_worlds: BTreeSet<WorldId>,
    registered: BTreeSet<String>,
    next_handle: u64,
    stats: GridStats,
}

impl ForcedGrid {
    pub fn new(config: ForceConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Bring `world` online and reissue the leases saved with it.
    ///
    /// Leases whose owner has no load callback registered are dropped, since
    /// nobody could ever bind them again.
    pub fn load_world(&mut self, world: WorldId, saved: Vec<SavedLease>) -> LoadBatch {
        let _span = tracing::info_span!("grid_load_world", %world).entered();
        self.loaded_worlds.insert(world);

        let mut batch = LoadBatch {
            world: Some(world),
            ..LoadBatch::default()
        };
        for lease in saved {
            if !self.registered.contains(&lease.owner) {
                tracing::debug!(owner = %lease.owner, "dropping saved lease for unregistered owner");
                continue;
            }
            let handle = self.issue(&lease.owner, world);
            if let Some(entry) = self.leases.get_mut(&handle) {
                entry.payload = lease.payload.clone();
            }
            batch
                .pending
                .entry(lease.owner)
                .or_default()
                .push(PendingLease {
                    handle,
                    payload: lease.payload,
                });
        }
        tracing::debug!(owners = batch.pending.len(), "world loaded");
        batch
    }

    /// Snapshot every lease in `world` for saving, in handle order.
    pub fn save_world(&self, world: WorldId) -> Vec<SavedLease> {
        self.leases
            .values()
            .filter(|e| e.world == world)
            .map(|e| SavedLease {
                owner: e.owner.clone(),
                payload: e.payload.clone(),
            })
            .collect()
    }

    /// Take `world` offline, dropping all of its leases. Returns how many were dropped.
    pub fn unload_world(&mut self, world: WorldId) -> usize {
        self.loaded_worlds.remove(&world);
        let handles: Vec<LeaseHandle> = self
            .leases
            .iter()
            .filter(|(_, e)| e.world == world)
            .map(|(h, _)| *h)
            .collect();
        for handle in &handles {
            self.release_lease(*handle);
        }
        tracing::debug!(%world, dropped = handles.len(), "world unloaded");
        handles.len()
    }

    /// Whether any lease keeps `cell` resident in `world`.
    pub fn is_forced(&self, world: WorldId, cell: CellCoord) -> bool {
        self.residency.contains_key(&(world, cell))
    }

    /// All cells forced in `world` by any lease.
    pub fn resident_cells(&self, world: WorldId) -> BTreeSet<CellCoord> {
        self.residency
            .keys()
            .filter(|(w, _)| *w == world)
            .map(|(_, c)| *c)
            .collect()
    }

    /// Live leases across all owners and worlds.
    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    /// Live leases held by `owner`.
    pub fn owner_lease_count(&self, owner: &str) -> usize {
        self.leases.values().filter(|e| e.owner == owner).count()
    }

    pub fn payload(&self, lease: LeaseHandle) -> Option<&LeasePayload> {
        self.leases.get(&lease).map(|e| &e.payload)
    }

    pub fn is_registered(&self, owner: &str) -> bool {
        self.registered.contains(owner)
    }

    pub fn stats(&self) -> &GridStats {
        &self.stats
    }

    fn issue(&mut self, owner: &str, world: WorldId) -> LeaseHandle {
        self.next_handle += 1;
        let handle = LeaseHandle(self.next_handle);
        self.leases.insert(
            handle,
            LeaseEntry {
                owner: owner.to_owned(),
                world,
                cells: BTreeSet::new(),
                payload: LeasePayload::new(),
            },
        );
        self.stats.leases_issued += 1;
        handle
    }
}

impl GridService for ForcedGrid {
    fn request_lease(&mut self, owner: &str, world: WorldId) -> Result<LeaseHandle, GridError> {
        if !self.loaded_worlds.contains(&world) {
            self.stats.allocation_refusals += 1;
            return Err(GridError::WorldUnavailable(world));
        }
        if self.owner_lease_count(owner) >= self.config.lease_quota {
            self.stats.allocation_refusals += 1;
            return Err(GridError::QuotaExhausted {
                owner: owner.to_owned(),
                limit: self.config.lease_quota,
            });
        }
        let handle = self.issue(owner, world);
        tracing::trace!(%handle, owner, %world, "lease issued");
        Ok(handle)
    }

    fn force_cell(&mut self, lease: LeaseHandle, cell: CellCoord) -> Result<(), GridError> {
        let entry = self
            .leases
            .get_mut(&lease)
            .ok_or(GridError::UnknownLease(lease))?;
        if !self.loaded_worlds.contains(&entry.world) {
            return Err(GridError::WorldUnavailable(entry.world));
        }
        if entry.cells.insert(cell) {
            *self.residency.entry((entry.world, cell)).or_insert(0) += 1;
            self.stats.cells_forced += 1;
        }
        Ok(())
    }

    fn cell_list(&self, lease: LeaseHandle) -> BTreeSet<CellCoord> {
        self.leases
            .get(&lease)
            .map(|e| e.cells.clone())
            .unwrap_or_default()
    }

    fn release_lease(&mut self, lease: LeaseHandle) {
        let Some(entry) = self.leases.remove(&lease) else {
            return;
        };
        for cell in &entry.cells {
            let key = (entry.world, *cell);
            if let Some(count) = self.residency.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    self.residency.remove(&key);
                }
            }
        }
        self.stats.leases_released += 1;
        tracing::trace!(%lease, cells = entry.cells.len(), "lease released");
    }

    fn world_available(&self, world: WorldId) -> bool {
        self.loaded_worlds.contains(&world)
    }

    fn write_payload(
        &mut self,
        lease: LeaseHandle,
        payload: LeasePayload,
    ) -> Result<(), GridError> {
        let entry = self
            .leases
            .get_mut(&lease)
            .ok_or(GridError::UnknownLease(lease))?;
        entry.payload = payload;
        Ok(())
    }

    fn register_load_callback(&mut self, owner: &str) -> Result<LoadRegistration, GridError> {
        if !self.registered.insert(owner.to_owned()) {
            return Err(GridError::AlreadyRegistered(owner.to_owned()));
        }
        tracing::debug!(owner, "load callback installed");
        Ok(LoadRegistration::new(owner))
    }

    fn unregister_load_callback(&mut self, registration: LoadRegistration) {
        self.registered.remove(registration.owner());
        tracing::debug!(owner = registration.owner(), "load callback removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with_world(quota: usize) -> (ForcedGrid, WorldId) {
        let mut grid = ForcedGrid::new(ForceConfig { lease_quota: quota });
        let world = WorldId::new();
        grid.load_world(world, Vec::new());
        (grid, world)
    }

    #[test]
    fn force_config_defaults() {
        assert_eq!(ForceConfig::default().lease_quota, 200);
    }

    #[test]
    fn quota_is_per_owner() {
        let (mut grid, world) = grid_with_world(2);
        grid.request_lease("gates", world).unwrap();
        grid.request_lease("gates", world).unwrap();
        assert_eq!(
            grid.request_lease("gates", world),
            Err(GridError::QuotaExhausted {
                owner: "gates".into(),
                limit: 2
            })
        );
        assert!(grid.request_lease("pumps", world).is_ok());
        assert_eq!(grid.stats().allocation_refusals, 1);
    }

    #[test]
    fn releasing_frees_quota() {
        let (mut grid, world) = grid_with_world(1);
        let lease = grid.request_lease("gates", world).unwrap();
        grid.release_lease(lease);
        assert!(grid.request_lease("gates", world).is_ok());
    }

    #[test]
    fn residency_is_shared_between_leases() {
        let (mut grid, world) = grid_with_world(10);
        let a = grid.request_lease("gates", world).unwrap();
        let b = grid.request_lease("gates", world).unwrap();
        let shared = CellCoord::new(1, 1);
        grid.force_cell(a, shared).unwrap();
        grid.force_cell(a, CellCoord::new(0, 0)).unwrap();
        grid.force_cell(b, shared).unwrap();

        grid.release_lease(a);
        assert!(grid.is_forced(world, shared));
        assert!(!grid.is_forced(world, CellCoord::new(0, 0)));
        assert!(grid.cell_list(a).is_empty());
        assert_eq!(grid.cell_list(b).len(), 1);
    }

    #[test]
    fn forcing_twice_counts_once() {
        let (mut grid, world) = grid_with_world(10);
        let a = grid.request_lease("gates", world).unwrap();
        grid.force_cell(a, CellCoord::new(3, 3)).unwrap();
        grid.force_cell(a, CellCoord::new(3, 3)).unwrap();
        grid.release_lease(a);
        assert!(grid.resident_cells(world).is_empty());
    }

    #[test]
    fn unloaded_world_refuses_work() {
        let (mut grid, world) = grid_with_world(10);
        let other = WorldId::new();
        assert_eq!(
            grid.request_lease("gates", other),
            Err(GridError::WorldUnavailable(other))
        );

        grid.request_lease("gates", world).unwrap();
        assert_eq!(grid.unload_world(world), 1);
        assert!(!grid.world_available(world));
        assert_eq!(grid.lease_count(), 0);
    }

    #[test]
    fn unknown_lease_errors() {
        let (mut grid, _world) = grid_with_world(10);
        let ghost = LeaseHandle(99);
        assert_eq!(
            grid.force_cell(ghost, CellCoord::new(0, 0)),
            Err(GridError::UnknownLease(ghost))
        );
        grid.release_lease(ghost);
        assert!(grid.cell_list(ghost).is_empty());
    }

    #[test]
    fn register_twice_is_rejected() {
        let mut grid = ForcedGrid::default();
        let reg = grid.register_load_callback("gates").unwrap();
        assert_eq!(
            grid.register_load_callback("gates"),
            Err(GridError::AlreadyRegistered("gates".into()))
        );
        grid.unregister_load_callback(reg);
        assert!(!grid.is_registered("gates"));
        assert!(grid.register_load_callback("gates").is_ok());
    }

    #[test]
    fn save_and_load_groups_by_registered_owner() {
        let (mut grid, world) = grid_with_world(10);
        let _reg = grid.register_load_callback("gates").unwrap();

        let mut payload = LeasePayload::new();
        payload.set_str("type", "anchor");
        let a = grid.request_lease("gates", world).unwrap();
        grid.write_payload(a, payload.clone()).unwrap();
        grid.force_cell(a, CellCoord::new(1, 2)).unwrap();
        grid.request_lease("strangers", world).unwrap();

        let saved = grid.save_world(world);
        assert_eq!(saved.len(), 2);
        grid.unload_world(world);

        let mut batch = grid.load_world(world, saved);
        let pending = batch.take("gates");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload, payload);
        assert!(batch.is_empty());
        // Reissued leases hold no cells until their owner forces them again.
        assert!(grid.cell_list(pending[0].handle).is_empty());
        assert_eq!(grid.payload(pending[0].handle), Some(&payload));
        assert_eq!(grid.lease_count(), 1);
    }
}
