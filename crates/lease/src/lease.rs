use std::collections::BTreeSet;
use worldspace_common::{CellCoord, LeaseHandle, LeasePayload, WorldId};
use worldspace_stream::GridService;

/// Lifecycle of one lease. `Released` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Allocated or reloaded, range not (fully) forced yet.
    Unbound,
    /// Every cell of the range is forced.
    RangeForced,
    /// Given back to the grid service.
    Released,
}

/// A claim on a set of grid cells, bound to one world for its whole life.
#[derive(Debug)]
pub struct Lease {
    handle: LeaseHandle,
    world: WorldId,
    forced_cells: BTreeSet<CellCoord>,
    payload: LeasePayload,
    state: LeaseState,
}

impl Lease {
    /// A freshly issued lease: empty payload, nothing forced.
    pub(crate) fn new(handle: LeaseHandle, world: WorldId) -> Self {
        Self::reinstated(handle, world, LeasePayload::new())
    }

    /// A lease handed back on world load, carrying its saved payload.
    pub(crate) fn reinstated(handle: LeaseHandle, world: WorldId, payload: LeasePayload) -> Self {
        Self {
            handle,
            world,
            forced_cells: BTreeSet::new(),
            payload,
            state: LeaseState::Unbound,
        }
    }

    pub fn handle(&self) -> LeaseHandle {
        self.handle
    }

    pub fn world(&self) -> WorldId {
        self.world
    }

    pub fn forced_cells(&self) -> &BTreeSet<CellCoord> {
        &self.forced_cells
    }

    pub fn payload(&self) -> &LeasePayload {
        &self.payload
    }

    pub fn state(&self) -> LeaseState {
        self.state
    }

    pub(crate) fn payload_mut(&mut self) -> &mut LeasePayload {
        &mut self.payload
    }

    pub(crate) fn record_forced(&mut self, cell: CellCoord) {
        debug_assert_ne!(self.state, LeaseState::Released);
        self.forced_cells.insert(cell);
    }

    pub(crate) fn mark_range_forced(&mut self) {
        debug_assert_ne!(self.state, LeaseState::Released);
        self.state = LeaseState::RangeForced;
    }

    /// Give the lease back to the grid, unforcing all of its cells.
    pub(crate) fn release(&mut self, grid: &mut dyn GridService) {
        if self.state == LeaseState::Released {
            return;
        }
        grid.release_lease(self.handle);
        self.forced_cells.clear();
        self.state = LeaseState::Released;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldspace_stream::{ForceConfig, ForcedGrid};

    #[test]
    fn new_lease_is_empty_and_unbound() {
        let lease = Lease::new(LeaseHandle(1), WorldId::new());
        assert!(lease.forced_cells().is_empty());
        assert!(lease.payload().is_empty());
        assert_eq!(lease.state(), LeaseState::Unbound);
    }

    #[test]
    fn release_is_terminal_and_idempotent() {
        let mut grid = ForcedGrid::new(ForceConfig::default());
        let world = WorldId::new();
        grid.load_world(world, Vec::new());
        let handle = grid.request_lease("gates", world).unwrap();
        grid.force_cell(handle, CellCoord::new(0, 0)).unwrap();

        let mut lease = Lease::new(handle, world);
        lease.record_forced(CellCoord::new(0, 0));
        lease.mark_range_forced();

        lease.release(&mut grid);
        assert_eq!(lease.state(), LeaseState::Released);
        assert!(lease.forced_cells().is_empty());
        assert!(!grid.is_forced(world, CellCoord::new(0, 0)));

        lease.release(&mut grid);
        assert_eq!(grid.stats().leases_released, 1);
    }
}
