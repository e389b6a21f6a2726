//! The value envelope collaborator. The client treats a stored value as an
//! opaque byte string; how a caller's in-memory value becomes those bytes
//! (and back) is delegated to a [`Serializer`] implementation the caller
//! supplies. This mirrors the teacher's `Compressor` collaborator pattern:
//! a pluggable trait with a trivial no-op default.

use crate::error::Error;

/// Encodes values to the bytes written on the wire, and decodes bytes read
/// from the wire back into values.
///
/// `decode(encode(v))` must equal `v` for any `v` the caller chooses to
/// store; the client does not otherwise interpret the bytes.
pub trait Serializer<V>: Clone {
    /// Encode a value into the bytes that will be framed onto the wire.
    fn encode(&self, value: &V) -> Result<Vec<u8>, Error>;
    /// Decode bytes read from the wire back into a value.
    fn decode(&self, bytes: Vec<u8>) -> Result<V, Error>;
}

/// The identity serializer: stores and returns raw bytes verbatim. This is
/// the default collaborator, provided so the client is usable without a
/// caller supplying a real serializer; it performs no actual encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBytes;

impl Serializer<Vec<u8>> for RawBytes {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, Error> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: Vec<u8>) -> Result<Vec<u8>, Error> {
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let s = RawBytes;
        let value = b"hello world".to_vec();
        let encoded = s.encode(&value).unwrap();
        assert_eq!(value, encoded);
        let decoded = s.decode(encoded).unwrap();
        assert_eq!(value, decoded);
    }
}
