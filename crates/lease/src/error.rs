use worldspace_common::{BlockPos, CellCoord, EntityId, LeaseHandle, PayloadError, WorldId};
use worldspace_stream::GridError;

use crate::range::CellRange;

/// Everything that can go wrong while forcing or reinstating a lease.
///
/// None of these are fatal. The manager records the latest one per anchor and
/// leaves the anchor without forced residency.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    #[error("grid refused a lease for `{owner}` in {world}: {source}")]
    Allocation {
        owner: String,
        world: WorldId,
        source: GridError,
    },
    #[error("{0} became unavailable while forcing cells")]
    WorldUnavailable(WorldId),
    #[error("lease metadata not recognized: {0}")]
    UnrecognizedMetadata(#[from] PayloadError),
    #[error("{handle} saved at {position} has no anchor to return to")]
    OrphanLease {
        handle: LeaseHandle,
        position: BlockPos,
    },
    #[error("range {range:?} around cell {center} runs off the grid")]
    InvalidRange { range: CellRange, center: CellCoord },
    #[error("entity {0} cannot hold a lease")]
    NotAnAnchor(EntityId),
    #[error("grid service error: {0}")]
    Grid(GridError),
}
