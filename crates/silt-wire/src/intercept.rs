//! Outbound message interceptor.
//!
//! Sits between the object layer and the messaging transport: encodes the
//! message body, refuses headers carrying nulls (the transport chokes on
//! them much later, masking the real problem), and enforces the configured
//! message size cap.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::decode::decode;
use crate::encode::encode;
use crate::error::{CodecError, Result};
use crate::registry::TypeRegistry;
use crate::value::WireValue;

/// Encoder/decoder pair bound to a type registry.
#[derive(Clone)]
pub struct Codec {
    registry: Arc<TypeRegistry>,
}

impl Codec {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Codec { registry }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn encode(&self, value: &WireValue) -> Result<Vec<u8>> {
        encode(value)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<WireValue> {
        decode(bytes, &self.registry)
    }
}

/// Default cap on an encoded outgoing message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 20_000_000;

pub struct EncodeInterceptor {
    codec: Codec,
    max_message_size: usize,
}

impl EncodeInterceptor {
    pub fn new(codec: Codec) -> Self {
        EncodeInterceptor {
            codec,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Encode an outgoing message, validating headers and the size cap.
    ///
    /// `MessageTooLarge` is recoverable: the operation fails but the
    /// connection stays usable.
    pub fn outgoing(
        &self,
        headers: &BTreeMap<String, WireValue>,
        message: &WireValue,
    ) -> Result<Vec<u8>> {
        let bytes = self.codec.encode(message)?;

        let null_keys: Vec<&str> = headers
            .iter()
            .filter(|(_, v)| v.is_nil())
            .map(|(k, _)| k.as_str())
            .collect();
        if !null_keys.is_empty() {
            return Err(CodecError::BadHeaders(null_keys.join(", ")));
        }

        if bytes.len() > self.max_message_size {
            return Err(CodecError::MessageTooLarge {
                size: bytes.len(),
                max: self.max_message_size,
            });
        }

        Ok(bytes)
    }

    /// Decode an incoming message body.
    pub fn incoming(&self, bytes: &[u8]) -> Result<WireValue> {
        self.codec.decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interceptor(max: usize) -> EncodeInterceptor {
        let codec = Codec::new(Arc::new(TypeRegistry::new()));
        EncodeInterceptor::new(codec).with_max_message_size(max)
    }

    #[test]
    fn outgoing_roundtrips_through_incoming() {
        let it = interceptor(DEFAULT_MAX_MESSAGE_SIZE);
        let msg = WireValue::list([WireValue::Int(1), WireValue::Str("x".into())]);
        let bytes = it.outgoing(&BTreeMap::new(), &msg).unwrap();
        assert_eq!(it.incoming(&bytes).unwrap(), msg);
    }

    #[test]
    fn null_headers_are_rejected() {
        let it = interceptor(DEFAULT_MAX_MESSAGE_SIZE);
        let mut headers = BTreeMap::new();
        headers.insert("reply-to".to_string(), WireValue::Nil);
        let err = it.outgoing(&headers, &WireValue::Int(1)).unwrap_err();
        assert!(matches!(err, CodecError::BadHeaders(keys) if keys == "reply-to"));
    }

    #[test]
    fn oversized_message_is_rejected() {
        let it = interceptor(8);
        let msg = WireValue::Str("0123456789abcdef".into());
        assert!(matches!(
            it.outgoing(&BTreeMap::new(), &msg),
            Err(CodecError::MessageTooLarge { max: 8, .. })
        ));
    }
}
