//! Binary encoding for session data and flash bags.
//!
//! An empty map always encodes to zero bytes, and zero bytes always decode to
//! an empty map, so untouched sessions cost nothing to store.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::Result;
use crate::models::value::Data;

fn encode_map<T: Serialize>(map: &T, is_empty: bool) -> Result<Vec<u8>> {
    if is_empty {
        return Ok(Vec::new());
    }
    Ok(bincode::serde::encode_to_vec(map, bincode::config::standard())?)
}

fn decode_map<T: DeserializeOwned + Default>(bytes: &[u8]) -> Result<T> {
    if bytes.is_empty() {
        return Ok(T::default());
    }
    let (map, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(map)
}

/// Encodes a session's data.
pub fn encode(data: &Data) -> Result<Vec<u8>> {
    encode_map(data, data.is_empty())
}

/// Decodes a session's data.
pub fn decode(bytes: &[u8]) -> Result<Data> {
    decode_map(bytes)
}

pub(crate) fn encode_flash(values: &crate::models::flash::FlashValues) -> Result<Vec<u8>> {
    encode_map(values, values.is_empty())
}

pub(crate) fn decode_flash(bytes: &[u8]) -> Result<crate::models::flash::FlashValues> {
    decode_map(bytes)
}
