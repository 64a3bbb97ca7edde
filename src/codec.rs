//! Value codec
//!
//! The single encode/decode service used for records, WAL commands and the
//! SSTable index and bloom sections. Backed by bincode, so every type that
//! derives serde's traits round-trips through it.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encode a value to bytes
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a value from bytes
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Size of the encoded form without allocating it
pub fn encoded_size<T: Serialize + ?Sized>(value: &T) -> Result<usize> {
    Ok(bincode::serialized_size(value)? as usize)
}
