use serde::{Deserialize, Serialize};
use worldspace_common::{BlockPos, CellCoord};
use worldspace_stream::{GridError, GridService};

use crate::error::LeaseError;
use crate::lease::Lease;
use crate::store::AnchorMetadata;

/// Inclusive rectangle of cell offsets around an anchor's own cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRange {
    pub min_x: i32,
    pub min_z: i32,
    pub max_x: i32,
    pub max_z: i32,
}

impl CellRange {
    pub fn new(min_x: i32, min_z: i32, max_x: i32, max_z: i32) -> Self {
        Self {
            min_x,
            min_z,
            max_x,
            max_z,
        }
    }

    /// Square range reaching `radius` cells out from the center.
    pub fn radius(radius: i32) -> Self {
        Self::new(-radius, -radius, radius, radius)
    }

    /// Number of cells covered. Zero when a minimum exceeds its maximum.
    pub fn cell_count(&self) -> usize {
        let width = (self.max_x as i64 - self.min_x as i64 + 1).max(0);
        let depth = (self.max_z as i64 - self.min_z as i64 + 1).max(0);
        (width * depth) as usize
    }

    /// Whether every cell of the range laid around `center` is on the grid.
    pub fn fits_around(&self, center: CellCoord) -> bool {
        self.cell_count() == 0
            || (center.checked_offset(self.min_x, self.min_z).is_some()
                && center.checked_offset(self.max_x, self.max_z).is_some())
    }

    /// Every cell of the rectangle laid around `center`, x-major.
    ///
    /// Cells past the edge of the grid are left out; see [`Self::fits_around`].
    pub fn cells_around(&self, center: CellCoord) -> impl Iterator<Item = CellCoord> {
        let range = *self;
        (range.min_x..=range.max_x).flat_map(move |i| {
            (range.min_z..=range.max_z).filter_map(move |j| center.checked_offset(i, j))
        })
    }
}

/// Forces the cells a lease's payload describes.
pub struct RangeForcer;

impl RangeForcer {
    /// Force every cell of the lease's recorded range around `anchor_pos`.
    ///
    /// Stops at the first cell the grid cannot take because the lease's world
    /// went away; whatever was forced so far stays forced until the lease is
    /// replaced or released. Returns the number of cells forced.
    pub fn force_range(
        grid: &mut dyn GridService,
        lease: &mut Lease,
        anchor_pos: BlockPos,
    ) -> Result<usize, LeaseError> {
        let meta = AnchorMetadata::decode(lease.payload())?;
        let center = anchor_pos.cell();
        if !meta.range.fits_around(center) {
            return Err(LeaseError::InvalidRange {
                range: meta.range,
                center,
            });
        }
        let mut forced = 0;
        for cell in meta.range.cells_around(center) {
            if !grid.world_available(lease.world()) {
                return Err(LeaseError::WorldUnavailable(lease.world()));
            }
            match grid.force_cell(lease.handle(), cell) {
                Ok(()) => {}
                Err(GridError::WorldUnavailable(world)) => {
                    return Err(LeaseError::WorldUnavailable(world));
                }
                Err(e) => return Err(LeaseError::Grid(e)),
            }
            lease.record_forced(cell);
            forced += 1;
        }
        lease.mark_range_forced();
        tracing::trace!(
            lease = %lease.handle(),
            %center,
            cells = forced,
            "range forced"
        );
        Ok(forced)
    }
}
