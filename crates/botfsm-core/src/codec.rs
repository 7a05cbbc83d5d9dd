//! Payload codec for the `data` column.
//!
//! Encodes FSM data into column text under one [`SerializingMethod`], chosen
//! at construction. MessagePack output is base64 encoded so both methods
//! store plain text.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;

use botfsm_types::config::SerializingMethod;
use botfsm_types::error::CodecError;

/// Serializes payloads to column text and back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadCodec {
    method: SerializingMethod,
}

impl PayloadCodec {
    pub fn new(method: SerializingMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> SerializingMethod {
        self.method
    }

    /// Encode a value to column text.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, CodecError> {
        match self.method {
            SerializingMethod::Json => {
                serde_json::to_string(value).map_err(|e| self.serialization(e))
            }
            SerializingMethod::MessagePack => {
                let bytes = rmp_serde::to_vec_named(value).map_err(|e| self.serialization(e))?;
                Ok(STANDARD.encode(bytes))
            }
        }
    }

    /// Decode column text. An absent or empty blob decodes to `None`.
    pub fn decode<T: DeserializeOwned>(&self, blob: Option<&str>) -> Result<Option<T>, CodecError> {
        let blob = match blob {
            Some(b) if !b.is_empty() => b,
            _ => return Ok(None),
        };

        let value = match self.method {
            SerializingMethod::Json => {
                serde_json::from_str(blob).map_err(|e| self.deserialization(e))?
            }
            SerializingMethod::MessagePack => {
                let bytes = STANDARD
                    .decode(blob)
                    .map_err(|e| self.deserialization(format!("invalid base64: {e}")))?;
                rmp_serde::from_slice(&bytes).map_err(|e| self.deserialization(e))?
            }
        };

        Ok(Some(value))
    }

    fn serialization(&self, e: impl ToString) -> CodecError {
        CodecError::Serialization {
            method: self.method.as_str(),
            message: e.to_string(),
        }
    }

    fn deserialization(&self, e: impl ToString) -> CodecError {
        CodecError::Deserialization {
            method: self.method.as_str(),
            message: e.to_string(),
        }
    }
}
