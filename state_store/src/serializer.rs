use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Serialize};

pub trait JsonEncode {
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}

/// Rows are stored as JSON. Slower than a binary codec but directly
/// inspectable with `ldb` when debugging a store on disk.
pub struct JsonEncoder;

impl JsonEncode for JsonEncoder {
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| anyhow!("failed to serialize row: {}", e))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| anyhow!("failed to deserialize row: {}", e))
    }
}
