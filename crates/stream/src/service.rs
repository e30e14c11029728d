use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use worldspace_common::{CellCoord, LeaseHandle, LeasePayload, WorldId};

/// Errors reported by a grid service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("lease quota of {limit} exhausted for owner `{owner}`")]
    QuotaExhausted { owner: String, limit: usize },
    #[error("{0} is unavailable")]
    WorldUnavailable(WorldId),
    #[error("unknown {0}")]
    UnknownLease(LeaseHandle),
    #[error("owner `{0}` already has a load callback registered")]
    AlreadyRegistered(String),
    #[error("owner `{0}` has no load callback registered")]
    NotRegistered(String),
}

/// Proof that an owner is registered as a world-load callback.
///
/// Not cloneable: whoever holds it is the one subscriber for that owner, and
/// giving it back through [`GridService::unregister_load_callback`] ends the
/// registration.
#[derive(Debug, PartialEq, Eq)]
pub struct LoadRegistration {
    owner: String,
}

impl LoadRegistration {
    /// Issued by grid service implementations only.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

/// A lease as written to a world save: who owns it and what it carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedLease {
    pub owner: String,
    pub payload: LeasePayload,
}

/// A lease handed back to its owner when a world loads, not yet bound to anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLease {
    pub handle: LeaseHandle,
    pub payload: LeasePayload,
}

/// The world grid service as seen by lease owners.
///
/// The service decides how cells are streamed; owners only ask for leases,
/// force cells under them, and give them back.
pub trait GridService {
    /// Issue a new, empty lease for `owner` in `world`.
    fn request_lease(&mut self, owner: &str, world: WorldId) -> Result<LeaseHandle, GridError>;

    /// Keep `cell` resident for as long as `lease` lives.
    fn force_cell(&mut self, lease: LeaseHandle, cell: CellCoord) -> Result<(), GridError>;

    /// Cells currently forced under `lease`. Empty for unknown or released leases.
    fn cell_list(&self, lease: LeaseHandle) -> BTreeSet<CellCoord>;

    /// Release `lease` and every cell it forced. Unknown handles are ignored.
    fn release_lease(&mut self, lease: LeaseHandle);

    /// Whether `world` is loaded and accepting forces.
    fn world_available(&self, world: WorldId) -> bool;

    /// Replace the payload that will be saved with `lease`.
    fn write_payload(&mut self, lease: LeaseHandle, payload: LeasePayload)
    -> Result<(), GridError>;

    /// Subscribe `owner` to world-load events.
    fn register_load_callback(&mut self, owner: &str) -> Result<LoadRegistration, GridError>;

    /// End a subscription made with [`GridService::register_load_callback`].
    fn unregister_load_callback(&mut self, registration: LoadRegistration);
}
