//! Developer Tooling: forced residency inspector.
//!
//! # Invariants
//! - Tools only read; they never force or release anything.

mod inspector;

pub use inspector::{AnchorInfo, ResidencyInspector, ResidencySummary};

pub fn crate_info() -> &'static str {
    "worldspace-tools v0.1.0"
}
