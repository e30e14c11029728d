use std::collections::BTreeMap;
use worldspace_common::{BlockPos, EntityId, LeaseHandle, LeasePayload, PayloadError};

use crate::lease::Lease;
use crate::range::CellRange;

/// Value of the `type` key that marks a lease as belonging to an anchor.
pub const ANCHOR_KIND: &str = "anchor";

const KEY_TYPE: &str = "type";
const KEY_X: &str = "xCoord";
const KEY_Y: &str = "yCoord";
const KEY_Z: &str = "zCoord";
const KEY_MIN_X: &str = "rangeMinX";
const KEY_MIN_Z: &str = "rangeMinZ";
const KEY_MAX_X: &str = "rangeMaxX";
const KEY_MAX_Z: &str = "rangeMaxZ";

/// The typed view of an anchor lease's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorMetadata {
    /// Anchor position when the range was last forced.
    pub position: BlockPos,
    pub range: CellRange,
}

impl AnchorMetadata {
    pub fn encode_into(&self, payload: &mut LeasePayload) {
        payload.set_str(KEY_TYPE, ANCHOR_KIND);
        payload.set_int(KEY_X, self.position.x());
        payload.set_int(KEY_Y, self.position.y());
        payload.set_int(KEY_Z, self.position.z());
        payload.set_int(KEY_MIN_X, self.range.min_x);
        payload.set_int(KEY_MIN_Z, self.range.min_z);
        payload.set_int(KEY_MAX_X, self.range.max_x);
        payload.set_int(KEY_MAX_Z, self.range.max_z);
    }

    /// Read the metadata back. Fails for payloads of any other kind, and for
    /// anchor payloads that are missing a key or hold a mistyped one.
    pub fn decode(payload: &LeasePayload) -> Result<Self, PayloadError> {
        payload.expect_str(KEY_TYPE, ANCHOR_KIND)?;
        Ok(Self {
            position: BlockPos::new(
                payload.get_int(KEY_X)?,
                payload.get_int(KEY_Y)?,
                payload.get_int(KEY_Z)?,
            ),
            range: CellRange {
                min_x: payload.get_int(KEY_MIN_X)?,
                min_z: payload.get_int(KEY_MIN_Z)?,
                max_x: payload.get_int(KEY_MAX_X)?,
                max_z: payload.get_int(KEY_MAX_Z)?,
            },
        })
    }
}

/// The leases of one world, keyed by the anchor they serve.
#[derive(Debug, Default)]
pub struct LeaseStore {
    leases: BTreeMap<EntityId, Lease>,
}

impl LeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, anchor: EntityId) -> Option<&Lease> {
        self.leases.get(&anchor)
    }

    pub fn contains(&self, anchor: EntityId) -> bool {
        self.leases.contains_key(&anchor)
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Lease)> {
        self.leases.iter().map(|(id, lease)| (*id, lease))
    }

    /// The anchor a handle is bound to, if any.
    pub fn holder_of(&self, handle: LeaseHandle) -> Option<EntityId> {
        self.iter()
            .find(|(_, lease)| lease.handle() == handle)
            .map(|(id, _)| id)
    }

    /// Bind `lease` to `anchor`. Returns the lease it displaced, which the
    /// caller must release.
    pub(crate) fn insert(&mut self, anchor: EntityId, lease: Lease) -> Option<Lease> {
        self.leases.insert(anchor, lease)
    }

    pub(crate) fn remove(&mut self, anchor: EntityId) -> Option<Lease> {
        self.leases.remove(&anchor)
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (EntityId, Lease)> + '_ {
        std::mem::take(&mut self.leases).into_iter()
    }
}
