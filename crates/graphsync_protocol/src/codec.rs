//! JSON and CBOR codecs for protocol types.
//!
//! JSON is the canonical wire shape. CBOR carries the same serde data model
//! for transports that prefer a binary framing.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to JSON text.
pub fn to_json<T: Serialize>(value: &T) -> ProtocolResult<String> {
    serde_json::to_string(value).map_err(|e| ProtocolError::encoding_failed(e.to_string()))
}

/// Decodes a value from JSON text.
pub fn from_json<T: DeserializeOwned>(text: &str) -> ProtocolResult<T> {
    serde_json::from_str(text).map_err(|e| ProtocolError::decoding_failed(e.to_string()))
}

/// Encodes a value to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| ProtocolError::encoding_failed(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::decoding_failed(e.to_string()))
}

/// Types with a JSON wire encoding.
pub trait JsonEncode {
    /// Encodes to JSON text.
    fn encode_json(&self) -> ProtocolResult<String>;
}

/// Types with a JSON wire decoding.
pub trait JsonDecode: Sized {
    /// Decodes from JSON text.
    fn decode_json(text: &str) -> ProtocolResult<Self>;
}

/// Types with a CBOR encoding.
pub trait CborEncode {
    /// Encodes to CBOR bytes.
    fn encode_cbor(&self) -> ProtocolResult<Vec<u8>>;
}

/// Types with a CBOR decoding.
pub trait CborDecode: Sized {
    /// Decodes from CBOR bytes.
    fn decode_cbor(bytes: &[u8]) -> ProtocolResult<Self>;
}

impl<T: Serialize> JsonEncode for T {
    fn encode_json(&self) -> ProtocolResult<String> {
        to_json(self)
    }
}

impl<T: DeserializeOwned> JsonDecode for T {
    fn decode_json(text: &str) -> ProtocolResult<Self> {
        from_json(text)
    }
}

impl<T: Serialize> CborEncode for T {
    fn encode_cbor(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl<T: DeserializeOwned> CborDecode for T {
    fn decode_cbor(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}
