//! Forced-load leases: keep rectangular cell ranges resident on behalf of anchors.
//!
//! # Invariants
//! - An anchor holds at most one lease; the per-world [`LeaseStore`] owns it and
//!   the anchor only keeps its handle.
//! - A lease's forced cells always equal the range in its payload laid around
//!   the anchor's cell. Changing the range replaces the lease outright.
//! - Lease payloads whose `type` is not [`ANCHOR_KIND`] are never touched.
//! - A reloaded lease that cannot find its anchor is released, never kept.
//! - No failure here panics; failures degrade to "no forced residency" and are
//!   visible through [`LeaseManager::failure`] and the logs.

mod diagnostics;
mod error;
mod lease;
mod manager;
mod range;
mod store;

pub use diagnostics::{LeaseDump, LeaseSummary};
pub use error::LeaseError;
pub use lease::{Lease, LeaseState};
pub use manager::{LeaseConfig, LeaseManager, ReinstateReport};
pub use range::{CellRange, RangeForcer};
pub use store::{ANCHOR_KIND, AnchorMetadata, LeaseStore};

pub fn crate_info() -> &'static str {
    "worldspace-lease v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("lease"));
    }
}
