//! Pluggable conversion between language-level values and [`Content`].
//!
//! A [`SerializerChain`] holds an ordered list of [`Serializer`] strategies.
//! Each strategy either handles a value ([`Fit::Applied`]) or declines it
//! ([`Fit::Declined`]) so the next one gets a chance. The default chain is:
//!
//! 1. caller-registered custom serializers, in registration order
//! 2. [`ByteSliceSerializer`] -- `Vec<u8>` / `Bytes` as `application/octet-stream`
//! 3. [`JsonSerializer`] -- any `serde` value as `application/json`
//! 4. [`NilSerializer`] -- absent values (`None`, `()`) as empty content
//!
//! Values are handed to strategies type-erased: [`Outgoing`] exposes the value
//! both as `&dyn Any` (for format-specific downcasts) and through its `serde`
//! JSON encoding. Decoding writes into a [`DecodeTarget`] slot the same way.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::content::{is_media_type, Content};

/// Media type written by [`JsonSerializer`].
pub const MEDIA_TYPE_JSON: &str = "application/json";
/// Media type written by [`ByteSliceSerializer`].
pub const MEDIA_TYPE_OCTET_STREAM: &str = "application/octet-stream";

const JSON_NULL: &[u8] = b"null";

// ---------------------------------------------------------------------------
// Strategy contract
// ---------------------------------------------------------------------------

/// Outcome of offering a value to one serializer strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fit<T> {
    /// The strategy handled the value.
    Applied(T),
    /// The strategy does not handle this value; try the next one.
    Declined,
}

/// Errors from the serializer chain.
#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    #[error("no serializer accepts {type_name}")]
    Incompatible { type_name: &'static str },
    #[error("cannot deserialize into a nil destination")]
    NilTarget,
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One strategy in a serializer chain.
///
/// Implementations must decline values they do not understand rather than
/// attempting a lossy conversion. An `Err` aborts the whole chain.
pub trait Serializer: Send + Sync + fmt::Debug {
    /// Encodes `value` into content, or declines it.
    ///
    /// # Errors
    ///
    /// Returns an error when the strategy accepts the value but fails to encode it.
    fn serialize(&self, value: &Outgoing<'_>) -> Result<Fit<Content>, SerializerError>;

    /// Decodes `content` into `target`, or declines it.
    ///
    /// # Errors
    ///
    /// Returns an error when the strategy accepts the content but fails to decode it.
    fn deserialize(
        &self,
        content: &Content,
        target: &mut dyn DecodeTarget,
    ) -> Result<Fit<()>, SerializerError>;
}

// ---------------------------------------------------------------------------
// Type-erased values
// ---------------------------------------------------------------------------

trait ToJson {
    fn to_json_vec(&self) -> serde_json::Result<Vec<u8>>;
}

impl<T: Serialize> ToJson for T {
    fn to_json_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// A value offered to the serializer chain.
pub struct Outgoing<'a> {
    type_name: &'static str,
    any: &'a dyn Any,
    json: &'a dyn ToJson,
}

impl<'a> Outgoing<'a> {
    #[must_use]
    pub fn new<T: Serialize + Any>(value: &'a T) -> Self {
        Self {
            type_name: type_name::<T>(),
            any: value,
            json: value,
        }
    }

    /// Name of the concrete value type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the value if it is of type `U`.
    #[must_use]
    pub fn downcast_ref<U: Any>(&self) -> Option<&'a U> {
        self.any.downcast_ref::<U>()
    }

    /// Encodes the value as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the value cannot be represented as JSON.
    pub fn to_json_vec(&self) -> serde_json::Result<Vec<u8>> {
        self.json.to_json_vec()
    }
}

impl fmt::Debug for Outgoing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outgoing")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Destination a serializer decodes into.
///
/// The destination is an `Option<T>` slot; strategies that know `T` write it
/// through [`DecodeTarget::slot`] (or the `put` helper), JSON-capable
/// strategies go through [`DecodeTarget::decode_json`].
pub trait DecodeTarget {
    /// Name of the destination type, for diagnostics.
    fn type_name(&self) -> &'static str;

    /// The underlying `Option<T>` slot.
    fn slot(&mut self) -> &mut dyn Any;

    /// Decodes JSON bytes into the slot.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if `data` does not decode into `T`.
    fn decode_json(&mut self, data: &[u8]) -> serde_json::Result<()>;

    /// Stores the "absent" value of `T` (`None`, `()`, JSON `null`).
    /// Returns `false` if `T` has no such value.
    fn decode_nil(&mut self) -> bool;
}

impl dyn DecodeTarget + '_ {
    /// Stores `value` if the destination type is exactly `U`.
    pub fn put<U: Any>(&mut self, value: U) -> bool {
        match self.slot().downcast_mut::<Option<U>>() {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }
}

/// Typed [`DecodeTarget`] backed by an `Option<T>`.
#[derive(Debug)]
pub struct Slot<T>(Option<T>);

impl<T> Slot<T> {
    #[must_use]
    pub fn new() -> Self {
        Self(None)
    }

    /// Returns the decoded value, if any strategy wrote one.
    #[must_use]
    pub fn into_inner(self) -> Option<T> {
        self.0
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + Any> DecodeTarget for Slot<T> {
    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn slot(&mut self) -> &mut dyn Any {
        &mut self.0
    }

    fn decode_json(&mut self, data: &[u8]) -> serde_json::Result<()> {
        self.0 = Some(serde_json::from_slice(data)?);
        Ok(())
    }

    fn decode_nil(&mut self) -> bool {
        match serde_json::from_slice::<T>(JSON_NULL) {
            Ok(value) => {
                self.0 = Some(value);
                true
            }
            Err(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in strategies
// ---------------------------------------------------------------------------

/// Passes `Vec<u8>` and `Bytes` through verbatim as `application/octet-stream`.
///
/// Decoding also fills an untyped `serde_json::Value` destination with an
/// array of byte values.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteSliceSerializer;

impl Serializer for ByteSliceSerializer {
    fn serialize(&self, value: &Outgoing<'_>) -> Result<Fit<Content>, SerializerError> {
        let data = if let Some(bytes) = value.downcast_ref::<Bytes>() {
            bytes.clone()
        } else if let Some(vec) = value.downcast_ref::<Vec<u8>>() {
            Bytes::copy_from_slice(vec)
        } else {
            return Ok(Fit::Declined);
        };
        Ok(Fit::Applied(Content::new(MEDIA_TYPE_OCTET_STREAM, data)))
    }

    fn deserialize(
        &self,
        content: &Content,
        target: &mut dyn DecodeTarget,
    ) -> Result<Fit<()>, SerializerError> {
        if !is_media_type(content.content_type(), MEDIA_TYPE_OCTET_STREAM) {
            return Ok(Fit::Declined);
        }
        let slot = target.slot();
        if let Some(slot) = slot.downcast_mut::<Option<Bytes>>() {
            *slot = Some(content.data.clone());
        } else if let Some(slot) = slot.downcast_mut::<Option<Vec<u8>>>() {
            *slot = Some(content.data.to_vec());
        } else if let Some(slot) = slot.downcast_mut::<Option<serde_json::Value>>() {
            // Untyped destination: one JSON number per byte.
            *slot = Some(serde_json::Value::from(content.data.to_vec()));
        } else {
            return Ok(Fit::Declined);
        }
        Ok(Fit::Applied(()))
    }
}

/// Encodes any non-null `serde` value as `application/json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Outgoing<'_>) -> Result<Fit<Content>, SerializerError> {
        let data = value.to_json_vec()?;
        if data == JSON_NULL {
            return Ok(Fit::Declined);
        }
        Ok(Fit::Applied(Content::new(MEDIA_TYPE_JSON, data)))
    }

    fn deserialize(
        &self,
        content: &Content,
        target: &mut dyn DecodeTarget,
    ) -> Result<Fit<()>, SerializerError> {
        if !is_media_type(content.content_type(), MEDIA_TYPE_JSON) {
            return Ok(Fit::Declined);
        }
        target.decode_json(&content.data)?;
        Ok(Fit::Applied(()))
    }
}

/// Maps absent values to empty content and back.
#[derive(Debug, Default, Clone, Copy)]
pub struct NilSerializer;

impl Serializer for NilSerializer {
    fn serialize(&self, value: &Outgoing<'_>) -> Result<Fit<Content>, SerializerError> {
        if value.to_json_vec()? == JSON_NULL {
            Ok(Fit::Applied(Content::default()))
        } else {
            Ok(Fit::Declined)
        }
    }

    fn deserialize(
        &self,
        content: &Content,
        target: &mut dyn DecodeTarget,
    ) -> Result<Fit<()>, SerializerError> {
        if content.is_nil() && target.decode_nil() {
            Ok(Fit::Applied(()))
        } else {
            Ok(Fit::Declined)
        }
    }
}

// ---------------------------------------------------------------------------
// SerializerChain
// ---------------------------------------------------------------------------

/// Ordered list of serializer strategies; the first one that applies wins.
///
/// Passed explicitly to handlers and clients; [`SerializerChain::default`] is
/// the built-in chain with no custom strategies.
#[derive(Debug, Clone)]
pub struct SerializerChain {
    serializers: Vec<Arc<dyn Serializer>>,
    custom_count: usize,
}

impl SerializerChain {
    /// The default chain: bytes, JSON, nil.
    #[must_use]
    pub fn new() -> Self {
        Self {
            serializers: vec![
                Arc::new(ByteSliceSerializer),
                Arc::new(JsonSerializer),
                Arc::new(NilSerializer),
            ],
            custom_count: 0,
        }
    }

    /// A chain made of exactly the given strategies, in order.
    #[must_use]
    pub fn from_serializers(serializers: Vec<Arc<dyn Serializer>>) -> Self {
        let custom_count = serializers.len();
        Self {
            serializers,
            custom_count,
        }
    }

    /// Registers a custom strategy ahead of the built-in ones and behind any
    /// previously registered custom strategy.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializers.insert(self.custom_count, serializer);
        self.custom_count += 1;
        self
    }

    /// Encodes a value with the first strategy that accepts it.
    ///
    /// # Errors
    ///
    /// Returns `SerializerError::Incompatible` if every strategy declines, or
    /// the error of the strategy that accepted the value and failed.
    pub fn serialize<T: Serialize + Any>(&self, value: &T) -> Result<Content, SerializerError> {
        match Serializer::serialize(self, &Outgoing::new(value))? {
            Fit::Applied(content) => Ok(content),
            Fit::Declined => Err(SerializerError::Incompatible {
                type_name: type_name::<T>(),
            }),
        }
    }

    /// Decodes content into a value of type `T`.
    ///
    /// `serde_json::Value` works as an untyped destination for JSON content,
    /// `Vec<u8>` / `Bytes` for octet-stream content.
    ///
    /// # Errors
    ///
    /// Returns `SerializerError::Incompatible` if every strategy declines, or
    /// the decoding error of the strategy that accepted the content.
    pub fn deserialize<T: DeserializeOwned + Any>(
        &self,
        content: &Content,
    ) -> Result<T, SerializerError> {
        let mut slot = Slot::<T>::new();
        self.deserialize_into(content, Some(&mut slot))?;
        slot.into_inner().ok_or(SerializerError::Incompatible {
            type_name: type_name::<T>(),
        })
    }

    /// Decodes content into a type-erased destination.
    ///
    /// # Errors
    ///
    /// Returns `SerializerError::NilTarget` when no destination is given,
    /// `SerializerError::Incompatible` if every strategy declines, or the
    /// decoding error of the strategy that accepted the content.
    pub fn deserialize_into(
        &self,
        content: &Content,
        target: Option<&mut dyn DecodeTarget>,
    ) -> Result<(), SerializerError> {
        let target = target.ok_or(SerializerError::NilTarget)?;
        match Serializer::deserialize(self, content, target)? {
            Fit::Applied(()) => Ok(()),
            Fit::Declined => Err(SerializerError::Incompatible {
                type_name: target.type_name(),
            }),
        }
    }
}

impl Default for SerializerChain {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer for SerializerChain {
    fn serialize(&self, value: &Outgoing<'_>) -> Result<Fit<Content>, SerializerError> {
        for serializer in &self.serializers {
            if let Fit::Applied(content) = serializer.serialize(value)? {
                return Ok(Fit::Applied(content));
            }
        }
        Ok(Fit::Declined)
    }

    fn deserialize(
        &self,
        content: &Content,
        target: &mut dyn DecodeTarget,
    ) -> Result<Fit<()>, SerializerError> {
        for serializer in &self.serializers {
            if let Fit::Applied(()) = serializer.deserialize(content, target)? {
                return Ok(Fit::Applied(()));
            }
        }
        Ok(Fit::Declined)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
