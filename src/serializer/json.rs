use serde_json::Value;

use crate::error::{RpcError, RpcResult};

use super::Serializer;

/// UTF-8 JSON text.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode(&self, data: &Value) -> RpcResult<Vec<u8>> {
        serde_json::to_vec(data).map_err(|e| RpcError::Serialization {
            message: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> RpcResult<Value> {
        serde_json::from_slice(bytes).map_err(|e| RpcError::Serialization {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_json_fails() {
        assert!(matches!(
            JsonSerializer.decode(b"{not json"),
            Err(RpcError::Serialization { .. })
        ));
    }
}
