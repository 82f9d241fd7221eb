//! MessagePack encoding for values stored in the shared layer.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CacheError;

pub fn encode<V: Serialize>(value: &V) -> Result<Vec<u8>, CacheError> {
    rmp_serde::to_vec_named(value).map_err(|e| CacheError::Codec(e.to_string()))
}

pub fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V, CacheError> {
    rmp_serde::from_slice(bytes).map_err(|e| CacheError::Codec(e.to_string()))
}
