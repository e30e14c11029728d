use std::fmt;
use worldspace_common::{CellCoord, EntityId, LeaseHandle, WorldId};

use crate::error::LeaseError;
use crate::lease::LeaseState;
use crate::manager::LeaseManager;

/// Snapshot of one anchor's forced residency, for operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseDump {
    pub label: String,
    pub anchor: EntityId,
    pub lease: Option<LeaseSummary>,
    pub failure: Option<LeaseError>,
}

/// The parts of a lease worth printing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseSummary {
    pub handle: LeaseHandle,
    pub world: WorldId,
    pub state: LeaseState,
    pub cells: Vec<CellCoord>,
}

impl LeaseManager {
    /// Describe the anchor's lease and every cell it forces. Pure read.
    pub fn dump(&self, world: WorldId, anchor: EntityId, label: &str) -> LeaseDump {
        LeaseDump {
            label: label.to_owned(),
            anchor,
            lease: self.lease(world, anchor).map(|lease| LeaseSummary {
                handle: lease.handle(),
                world: lease.world(),
                state: lease.state(),
                cells: lease.forced_cells().iter().copied().collect(),
            }),
            failure: self.failure(anchor).cloned(),
        }
    }
}

impl fmt::Display for LeaseDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: forced residency of anchor {}", self.label, self.anchor)?;
        match &self.lease {
            None => write!(f, "lease = none")?,
            Some(lease) => {
                writeln!(
                    f,
                    "lease = {} in {} ({:?})",
                    lease.handle, lease.world, lease.state
                )?;
                write!(f, "forced cells ({}):", lease.cells.len())?;
                for cell in &lease.cells {
                    write!(f, " {cell}")?;
                }
            }
        }
        if let Some(failure) = &self.failure {
            write!(f, "\nlast failure = {failure}")?;
        }
        Ok(())
    }
}
