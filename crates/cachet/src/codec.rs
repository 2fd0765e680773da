//! Payload codecs: how typed values become opaque stored payloads.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;

/// Failure to encode or decode a payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CodecError {
    message: String,
}

impl CodecError {
    /// Create a codec error from a message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Converts values of `T` to and from stored payloads.
///
/// `type_id` is stored with every entry. A reader whose codec reports a
/// different id treats the entry as a type mismatch, so bump it whenever the
/// payload shape changes incompatibly (e.g. `"profile/v2"`).
pub trait PayloadCodec<T>: Send + Sync {
    /// Identifier of the logical type and version this codec handles
    fn type_id(&self) -> &str;

    /// Encode a value into a payload
    fn encode(&self, value: &T) -> Result<Value, CodecError>;

    /// Decode a payload produced by [`encode`](Self::encode)
    fn decode(&self, payload: &Value) -> Result<T, CodecError>;
}

/// serde-backed codec storing values as JSON
pub struct JsonCodec<T> {
    type_id: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Codec whose type id is the Rust type name of `T`
    #[must_use]
    pub fn new() -> Self {
        Self::with_type_id(std::any::type_name::<T>())
    }

    /// Codec with an explicit, stable type id
    #[must_use]
    pub fn with_type_id(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::with_type_id(self.type_id.clone())
    }
}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCodec")
            .field("type_id", &self.type_id)
            .finish()
    }
}

impl<T> PayloadCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn type_id(&self) -> &str {
        &self.type_id
    }

    fn encode(&self, value: &T) -> Result<Value, CodecError> {
        serde_json::to_value(value).map_err(|e| CodecError::new(e.to_string()))
    }

    fn decode(&self, payload: &Value) -> Result<T, CodecError> {
        T::deserialize(payload).map_err(|e| CodecError::new(e.to_string()))
    }
}
