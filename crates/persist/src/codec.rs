use worldspace_common::LeasePayload;

use crate::store::StoreError;

/// Encode a lease payload to CBOR bytes.
///
/// Payload keys are kept sorted, so equal payloads always give equal bytes.
pub fn encode_payload(payload: &LeasePayload) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(payload, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// Decode CBOR bytes produced by [`encode_payload`].
pub fn decode_payload(bytes: &[u8]) -> Result<LeasePayload, StoreError> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::CborDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor_payload() -> LeasePayload {
        let mut p = LeasePayload::new();
        p.set_str("type", "anchor");
        p.set_int("xCoord", 165);
        p.set_int("yCoord", 70);
        p.set_int("zCoord", 85);
        p.set_int("rangeMinX", -1);
        p.set_int("rangeMinZ", -1);
        p.set_int("rangeMaxX", 1);
        p.set_int("rangeMaxZ", 1);
        p
    }

    #[test]
    fn reencoding_is_byte_identical() {
        let bytes = encode_payload(&anchor_payload()).unwrap();
        let decoded = decode_payload(&bytes).unwrap();
        assert_eq!(decoded, anchor_payload());
        assert_eq!(encode_payload(&decoded).unwrap(), bytes);
    }

    #[test]
    fn insertion_order_does_not_change_bytes() {
        let mut reversed = LeasePayload::new();
        let forward = anchor_payload();
        let entries: Vec<_> = forward.iter().collect();
        for (key, value) in entries.into_iter().rev() {
            match value {
                worldspace_common::PayloadValue::Str(s) => reversed.set_str(key, s.clone()),
                worldspace_common::PayloadValue::Int(v) => reversed.set_int(key, *v),
            }
        }
        assert_eq!(
            encode_payload(&reversed).unwrap(),
            encode_payload(&forward).unwrap()
        );
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            decode_payload(&[0xff, 0x00, 0x13]),
            Err(StoreError::CborDecode(_))
        ));
    }

    #[test]
    fn empty_payload_roundtrips() {
        let bytes = encode_payload(&LeasePayload::new()).unwrap();
        assert!(decode_payload(&bytes).unwrap().is_empty());
    }
}
