//! Shared types for the worldspace engine.
//!
//! # Invariants
//! - Coordinates are integer and totally ordered so collections iterate
//!   deterministically.
//! - Lease payloads are flat key/value records with a canonical key order.

mod payload;
mod types;

pub use payload::{LeasePayload, PayloadError, PayloadValue};
pub use types::{BlockPos, CELL_SHIFT, CellCoord, EntityId, LeaseHandle, WorldId};
