//! Typewire frame codec (encode/decode)
//!
//! Frames are a 6-byte header followed by the JSON encoding of one value.

use std::io::Read;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tracing::{instrument, trace};

use super::metrics::{DiscardReason, FrameDirection, Metrics};
use super::{
    CorrelationId, Decoded, Envelope, FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE, Result,
    TypeCode, TypeRegistry,
};
use crate::protocol::Error;

/// Encode a registered value into a frame
///
/// # Format
///
/// ```text
/// [TYPE CODE (2)] [PAYLOAD LENGTH (4)] [JSON BODY (payload length)]
/// ```
///
/// # Errors
///
/// Returns [`Error::UnregisteredType`] if `T` was never registered. Nothing
/// is serialized in that case.
pub fn encode<T>(value: &T, registry: &TypeRegistry) -> Result<Bytes>
where
    T: Serialize + 'static,
{
    let code = registry.require_code::<T>()?;
    encode_with_code(value, code)
}

/// Encode a value under an already resolved type code, skipping the
/// registry lookup
pub fn encode_with_code<T>(value: &T, code: TypeCode) -> Result<Bytes>
where
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(value)?;
    frame(code, &body)
}

/// Wrap a registered value in an [`Envelope`] under `correlation_id` and
/// encode the envelope into a frame
///
/// # Errors
///
/// Returns [`Error::UnregisteredType`] if `T` was never registered.
pub fn encode_envelope<T>(
    value: &T,
    registry: &TypeRegistry,
    correlation_id: CorrelationId,
) -> Result<Bytes>
where
    T: Serialize + 'static,
{
    let (inner_type_code, inner_data) = inner_payload(value, registry)?;
    let envelope = Envelope::new(correlation_id, inner_type_code, inner_data);
    encode(&envelope, registry)
}

/// Resolve the code of `value` and encode it as envelope inner data.
pub(crate) fn inner_payload<T>(value: &T, registry: &TypeRegistry) -> Result<(TypeCode, String)>
where
    T: Serialize + 'static,
{
    let code = registry.require_code::<T>()?;
    Ok((code, serde_json::to_string(value)?))
}

fn frame(code: TypeCode, body: &[u8]) -> Result<Bytes> {
    let header = FrameHeader::for_body(code, body.len())?;

    let mut bytes = BytesMut::with_capacity(HEADER_SIZE + body.len());
    header.put(&mut bytes);
    bytes.extend_from_slice(body);

    Ok(bytes.freeze())
}

/// Read the next frame from `reader` and decode it with `registry`
///
/// Blocks until a full header and the full body it announces are available.
/// Partial reads are retried; a stream that ends mid-frame is an I/O error.
///
/// Returns `Ok(None)` when the frame was read completely but its type code is
/// unknown or its body does not decode. The stream stays in sync, so the
/// caller can keep reading.
///
/// # Errors
///
/// Returns [`Error::Io`] on any read failure, including end of stream, and
/// [`Error::PayloadTooLarge`] if the header announces more than
/// [`MAX_PAYLOAD_SIZE`] bytes.
pub fn read_next<R>(reader: &mut R, registry: &TypeRegistry) -> Result<Option<Decoded>>
where
    R: Read + ?Sized,
{
    read_next_limited(reader, registry, MAX_PAYLOAD_SIZE)
}

/// Like [`read_next`] with an explicit cap on the body size
#[instrument(level = "trace", skip(reader, registry))]
pub fn read_next_limited<R>(
    reader: &mut R,
    registry: &TypeRegistry,
    max_payload_len: usize,
) -> Result<Option<Decoded>>
where
    R: Read + ?Sized,
{
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = FrameHeader::from_bytes(&header_bytes)?;

    let payload_len = header.payload_len() as usize;
    if payload_len > max_payload_len {
        return Err(Error::PayloadTooLarge {
            size: payload_len,
            max: max_payload_len,
        });
    }

    let mut body = vec![0u8; payload_len];
    reader.read_exact(&mut body)?;
    Metrics::record_frame(FrameDirection::Received, HEADER_SIZE + payload_len);
    trace!(code = header.type_code(), payload_len, "read frame");

    let decoded = registry.decode(header.type_code(), &body);
    if decoded.is_none() {
        Metrics::record_discard(DiscardReason::Undecodable);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ENVELOPE_CODE;
    use serde::Deserialize;
    use std::io::Cursor;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        id: i64,
    }

    fn item(name: &str, id: i64) -> Item {
        Item {
            name: name.into(),
            id,
        }
    }

    fn registry() -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry.register::<Item>().unwrap();
        registry
    }

    #[test]
    fn test_encode_layout() {
        let registry = registry();
        let bytes = encode(&item("test", 1), &registry).unwrap();
        let body = br#"{"name":"test","id":1}"#;

        assert_eq!(&bytes[0..2], &[0x01, 0x00]);
        assert_eq!(&bytes[2..6], &(body.len() as u32).to_le_bytes());
        assert_eq!(&bytes[6..], body);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let registry = registry();
        let original = item("test", 1);
        let bytes = encode(&original, &registry).unwrap();

        let decoded = read_next(&mut Cursor::new(bytes), &registry)
            .unwrap()
            .unwrap();
        assert_eq!(decoded.downcast_ref::<Item>(), Some(&original));
    }

    #[test]
    fn test_encode_unregistered_type() {
        let registry = TypeRegistry::new();
        let result = encode(&item("test", 1), &registry);
        assert!(matches!(result, Err(Error::UnregisteredType { .. })));
    }

    #[test]
    fn test_encode_envelope() {
        let registry = registry();
        let bytes = encode_envelope(&item("test", 1), &registry, 1).unwrap();

        let header = FrameHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.type_code(), ENVELOPE_CODE);
        assert_eq!(header.payload_len() as usize, bytes.len() - HEADER_SIZE);

        let envelope: Envelope = serde_json::from_slice(&bytes[HEADER_SIZE..]).unwrap();
        assert_eq!(envelope.correlation_id(), 1);
        assert_eq!(envelope.inner_type_code(), 1);

        let inner: Item = serde_json::from_str(envelope.inner_data()).unwrap();
        assert_eq!(inner, item("test", 1));
    }

    #[test]
    fn test_encode_envelope_unregistered_type() {
        let registry = TypeRegistry::new();
        let result = encode_envelope(&item("test", 1), &registry, 1);
        assert!(matches!(result, Err(Error::UnregisteredType { .. })));
    }

    #[test]
    fn test_read_sequence_of_frames() {
        let registry = registry();
        let items = [item("test", 1), item("hellow, world", 2), item("😃", 3)];

        let mut stream = Vec::new();
        for value in &items {
            stream.extend_from_slice(&encode(value, &registry).unwrap());
        }

        let mut cursor = Cursor::new(stream);
        for expected in &items {
            let decoded = read_next(&mut cursor, &registry).unwrap().unwrap();
            assert_eq!(decoded.downcast_ref::<Item>(), Some(expected));
        }
        assert!(read_next(&mut cursor, &registry).unwrap_err().is_io());
    }

    #[test]
    fn test_read_unknown_type_is_none() {
        let bytes = encode(&item("test", 1), &registry()).unwrap();
        let empty = TypeRegistry::new();

        let decoded = read_next(&mut Cursor::new(bytes), &empty).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_read_skips_corrupt_body_and_continues() {
        let registry = registry();
        let mut stream = encode_with_code("not an item", 1).unwrap().to_vec();
        stream.extend_from_slice(&encode(&item("after", 2), &registry).unwrap());

        let mut cursor = Cursor::new(stream);
        assert!(read_next(&mut cursor, &registry).unwrap().is_none());
        let next = read_next(&mut cursor, &registry).unwrap().unwrap();
        assert_eq!(next.downcast_ref::<Item>(), Some(&item("after", 2)));
    }

    #[test]
    fn test_read_truncated_header() {
        let registry = registry();
        let result = read_next(&mut Cursor::new(vec![0x01, 0x00, 0x05]), &registry);
        assert!(result.unwrap_err().is_io());
    }

    #[test]
    fn test_read_truncated_body() {
        let registry = registry();
        let bytes = encode(&item("test", 1), &registry).unwrap();
        let truncated = bytes.slice(..bytes.len() - 3);

        let result = read_next(&mut Cursor::new(truncated), &registry);
        assert!(result.unwrap_err().is_io());
    }

    #[test]
    fn test_read_oversized_payload() {
        let registry = registry();
        let bytes = encode(&item("test", 1), &registry).unwrap();

        let result = read_next_limited(&mut Cursor::new(bytes), &registry, 4);
        assert!(matches!(
            result,
            Err(Error::PayloadTooLarge { max: 4, .. })
        ));
    }

    /// Reader that hands out at most one byte per call.
    struct Trickle<R>(R);

    impl<R: Read> Read for Trickle<R> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let end = buf.len().min(1);
            self.0.read(&mut buf[..end])
        }
    }

    #[test]
    fn test_read_tolerates_partial_reads() {
        let registry = registry();
        let bytes = encode(&item("trickle", 9), &registry).unwrap();

        let decoded = read_next(&mut Trickle(Cursor::new(bytes)), &registry)
            .unwrap()
            .unwrap();
        assert_eq!(decoded.downcast_ref::<Item>(), Some(&item("trickle", 9)));
    }

    // Property-based tests
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: any registered value survives encode then read_next
            #[test]
            fn prop_roundtrip_preserves_fields(name in ".*", id in any::<i64>()) {
                let registry = registry();
                let original = Item { name, id };
                let bytes = encode(&original, &registry).unwrap();

                let decoded = read_next(&mut Cursor::new(bytes), &registry).unwrap().unwrap();
                prop_assert_eq!(decoded.downcast_ref::<Item>(), Some(&original));
            }

            /// Property: the length field always matches the body byte length
            #[test]
            fn prop_length_matches_body(name in "\\PC*", id in any::<i64>()) {
                let registry = registry();
                let bytes = encode(&Item { name, id }, &registry).unwrap();

                let header = FrameHeader::from_bytes(&bytes).unwrap();
                prop_assert_eq!(header.payload_len() as usize, bytes.len() - HEADER_SIZE);
            }

            /// Property: envelopes frame exactly too, whatever the correlation id
            #[test]
            fn prop_envelope_length_matches_body(name in "\\PC*", correlation_id in any::<u16>()) {
                let registry = registry();
                let bytes = encode_envelope(&Item { name, id: 0 }, &registry, correlation_id).unwrap();

                let header = FrameHeader::from_bytes(&bytes).unwrap();
                prop_assert_eq!(header.type_code(), ENVELOPE_CODE);
                prop_assert_eq!(header.payload_len() as usize, bytes.len() - HEADER_SIZE);
            }
        }
    }
}
