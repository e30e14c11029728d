//! Streaming: the world grid service that keeps cells resident on behalf of leases.
//!
//! # Invariants
//! - A cell is resident while at least one live lease forces it.
//! - Releasing a lease unforces every cell it held, and nothing else.
//! - Each owner has at most `lease_quota` live leases.
//!
//! # Workaround
//! Residency is tracked as a reference count per cell rather than by actually
//! loading cell contents; the observer-driven streaming policy lives elsewhere.

mod forced;
mod service;

pub use forced::{ForceConfig, ForcedGrid, GridStats, LoadBatch};
pub use service::{GridError, GridService, LoadRegistration, PendingLease, SavedLease};

pub fn crate_info() -> &'static str {
    "worldspace-stream v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("stream"));
    }
}
