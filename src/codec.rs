//! Codec Module
//!
//! How values are measured for the memory tier and turned into bytes for the
//! disk tier.

use crate::error::Result;

// == Codec ==
/// Encodes values for write-back and decodes them on a disk hit.
///
/// `decode(encode(v))` must equal `v`; the pool relies on a lossless round trip.
pub trait Codec: Send + Sync + 'static {
    type Value: Send + Sync + 'static;

    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Value>;

    /// Bytes the value occupies in memory, charged against the memory tier.
    fn size_of(&self, value: &Self::Value) -> usize;
}

/// Identity codec for raw byte buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Value = Vec<u8>;

    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn size_of(&self, value: &Vec<u8>) -> usize {
        value.len()
    }
}
