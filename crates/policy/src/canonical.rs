//! Deterministic JSON form used for signatures and hash chains.

use serde::Serialize;

use crate::Result;

/// Serialize `value` as compact JSON with object keys in sorted order.
///
/// Going through [`serde_json::Value`] sorts keys because its map type is
/// ordered; struct field order therefore has no effect on the output.
pub fn to_canonical_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}
