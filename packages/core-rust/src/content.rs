use std::collections::BTreeMap;

use bytes::Bytes;

/// Metadata key carrying the media type of the payload.
pub const CONTENT_TYPE_KEY: &str = "type";

/// Opaque payload envelope: metadata plus raw bytes.
///
/// This is the only shape that crosses the wire for operation input and
/// successful results. Metadata keys are lower-case and travel as
/// `content-<key>` HTTP headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Content {
    /// Ordered metadata. Carries at least `type` for non-empty payloads.
    pub header: BTreeMap<String, String>,
    /// Raw payload bytes.
    pub data: Bytes,
}

impl Content {
    /// Creates content with the given media type and payload.
    #[must_use]
    pub fn new(content_type: &str, data: impl Into<Bytes>) -> Self {
        let mut header = BTreeMap::new();
        header.insert(CONTENT_TYPE_KEY.to_string(), content_type.to_string());
        Self {
            header,
            data: data.into(),
        }
    }

    /// Returns the media type, if any.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header.get(CONTENT_TYPE_KEY).map(String::as_str)
    }

    /// Adds a metadata entry, lower-casing the key.
    #[must_use]
    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.header.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    /// Content produced for an absent value: no metadata, no payload.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.data.is_empty() && !self.header.contains_key(CONTENT_TYPE_KEY)
    }
}

/// True when `content_type` names the given media type, ignoring parameters
/// such as `; charset=utf-8` and ASCII case.
#[must_use]
pub fn is_media_type(content_type: Option<&str>, media_type: &str) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mt| mt.trim().eq_ignore_ascii_case(media_type))
}
