//! Persistence: world saves carrying the lease ledger, with integrity checking.
//!
//! # Invariants
//! - Lease payloads round-trip byte-for-byte through a save.
//! - A payload that cannot be decoded loads as an empty payload, never an error.
//! - Save files are hash-chained; tampering and schema drift fail closed.

mod codec;
mod store;

pub use codec::{decode_payload, encode_payload};
pub use store::{SaveChain, SaveLink, StoreError, WorldMeta, WorldSave, WorldStore};

pub fn crate_info() -> &'static str {
    "worldspace-persist v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("persist"));
    }
}
