use serde_json::Value;

use crate::error::{RpcError, RpcResult};

use super::Serializer;

/// MessagePack binary encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackSerializer;

impl Serializer for MsgPackSerializer {
    fn encode(&self, data: &Value) -> RpcResult<Vec<u8>> {
        rmp_serde::to_vec(data).map_err(|e| RpcError::Serialization {
            message: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> RpcResult<Value> {
        rmp_serde::from_slice(bytes).map_err(|e| RpcError::Serialization {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encoding_is_binary() {
        let bytes = MsgPackSerializer.encode(&json!({"id": 1})).unwrap();
        // fixmap with one entry
        assert_eq!(bytes[0], 0x81);
    }

    #[test]
    fn test_truncated_input_fails() {
        let bytes = MsgPackSerializer.encode(&json!({"id": 1})).unwrap();
        assert!(MsgPackSerializer.decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
