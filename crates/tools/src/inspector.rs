use worldspace_common::{BlockPos, EntityId, LeaseHandle, WorldId};
use worldspace_kernel::{EntityKind, World};
use worldspace_lease::{LeaseManager, LeaseState};
use worldspace_stream::ForcedGrid;

/// Read-only view of forced residency across a world.
pub struct ResidencyInspector;

impl ResidencyInspector {
    /// Produce a summary of a world's forced residency.
    pub fn summary(world: &World, manager: &LeaseManager, grid: &ForcedGrid) -> ResidencySummary {
        let anchors: Vec<EntityId> = Self::anchors(world).collect();
        ResidencySummary {
            world: world.id(),
            tick: world.tick(),
            anchors: anchors.len(),
            anchors_with_lease: anchors
                .iter()
                .filter(|id| manager.lease(world.id(), **id).is_some())
                .count(),
            anchors_failing: anchors
                .iter()
                .filter(|id| manager.failure(**id).is_some())
                .count(),
            grid_leases: grid.lease_count(),
            resident_cells: grid.resident_cells(world.id()).len(),
        }
    }

    /// One line of detail per anchor, in entity id order.
    pub fn list_anchors(world: &World, manager: &LeaseManager) -> Vec<AnchorInfo> {
        Self::anchors(world)
            .filter_map(|id| {
                let position = world.position(id)?;
                let lease = manager.lease(world.id(), id);
                Some(AnchorInfo {
                    id,
                    position,
                    lease: lease.map(|l| l.handle()),
                    state: lease.map(|l| l.state()),
                    forced_cells: lease.map_or(0, |l| l.forced_cells().len()),
                    failure: manager.failure(id).map(|e| e.to_string()),
                })
            })
            .collect()
    }

    fn anchors(world: &World) -> impl Iterator<Item = EntityId> + '_ {
        world
            .entities()
            .iter()
            .filter(|(_, data)| data.kind == EntityKind::Anchor)
            .map(|(id, _)| *id)
    }
}

/// Summary of forced residency in one world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidencySummary {
    pub world: WorldId,
    pub tick: u64,
    pub anchors: usize,
    pub anchors_with_lease: usize,
    pub anchors_failing: usize,
    pub grid_leases: usize,
    pub resident_cells: usize,
}

impl std::fmt::Display for ResidencySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: tick={} anchors={} leased={} failing={} grid_leases={} resident_cells={}",
            self.world,
            self.tick,
            self.anchors,
            self.anchors_with_lease,
            self.anchors_failing,
            self.grid_leases,
            self.resident_cells
        )
    }
}

/// Detailed info about a single anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorInfo {
    pub id: EntityId,
    pub position: BlockPos,
    pub lease: Option<LeaseHandle>,
    pub state: Option<LeaseState>,
    pub forced_cells: usize,
    pub failure: Option<String>,
}

impl std::fmt::Display for AnchorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Anchor [{}] pos={}", self.id, self.position)?;
        match (self.lease, self.state) {
            (Some(lease), Some(state)) => {
                write!(f, " {lease} {state:?} cells={}", self.forced_cells)?
            }
            _ => write!(f, " no lease")?,
        }
        if let Some(failure) = &self.failure {
            write!(f, " failure=\"{failure}\"")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldspace_lease::{CellRange, LeaseConfig};
    use worldspace_stream::ForceConfig;

    fn setup() -> (ForcedGrid, World, LeaseManager) {
        let mut grid = ForcedGrid::new(ForceConfig { lease_quota: 1 });
        let world = World::new();
        grid.load_world(world.id(), Vec::new());
        let manager = LeaseManager::new(&mut grid, LeaseConfig::default()).unwrap();
        (grid, world, manager)
    }

    #[test]
    fn summary_empty_world() {
        let (grid, world, manager) = setup();
        let summary = ResidencyInspector::summary(&world, &manager, &grid);
        assert_eq!(summary.anchors, 0);
        assert_eq!(summary.resident_cells, 0);
    }

    #[test]
    fn summary_counts_leased_and_failing_anchors() {
        let (mut grid, mut world, mut manager) = setup();
        let a = world
            .spawn(EntityKind::Anchor, BlockPos::new(0, 0, 0))
            .unwrap();
        let b = world
            .spawn(EntityKind::Anchor, BlockPos::new(100, 0, 0))
            .unwrap();
        world.spawn(EntityKind::Prop, BlockPos::new(1, 0, 0)).unwrap();
        manager.set_forced_range(&mut grid, &mut world, a, CellRange::radius(1));
        // Quota of one is spent on `a`.
        manager.set_forced_range(&mut grid, &mut world, b, CellRange::radius(1));

        let summary = ResidencyInspector::summary(&world, &manager, &grid);
        assert_eq!(summary.anchors, 2);
        assert_eq!(summary.anchors_with_lease, 1);
        assert_eq!(summary.anchors_failing, 1);
        assert_eq!(summary.grid_leases, 1);
        assert_eq!(summary.resident_cells, 9);
        assert!(summary.to_string().contains("resident_cells=9"));
    }

    #[test]
    fn list_anchors_skips_props() {
        let (mut grid, mut world, mut manager) = setup();
        let a = world
            .spawn(EntityKind::Anchor, BlockPos::new(0, 0, 0))
            .unwrap();
        world.spawn(EntityKind::Prop, BlockPos::new(1, 0, 0)).unwrap();
        manager.set_forced_range(&mut grid, &mut world, a, CellRange::radius(0));

        let anchors = ResidencyInspector::list_anchors(&world, &manager);
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].id, a);
        assert_eq!(anchors[0].forced_cells, 1);
        assert_eq!(anchors[0].state, Some(LeaseState::RangeForced));
        assert!(anchors[0].to_string().contains("RangeForced cells=1"));
    }
}
