//! World Kernel: authoritative world state, simulation stepping, mutation log.
//!
//! # Invariants
//! - At most one entity occupies a block position.
//! - All state mutations flow through explicit operations and are logged.
//! - An entity's lease slot is a non-owning handle; it is never persisted.

pub mod world;

pub use world::{EntityData, EntityKind, World, WorldError, WorldEvent};
