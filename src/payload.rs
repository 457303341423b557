//! Payload representation and content-type driven normalization.
//!
//! Transports usually deliver payloads as raw bytes. The [`PayloadNormalizer`]
//! turns byte payloads declared as textual (by their content type) into text,
//! so that expressions can navigate them (e.g. JSON documents).

use std::string::FromUtf8Error;

use tracing_error::SpanTrace;

use crate::{Message, Value};

/// Content type assumed when a message does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Content-type fragments that mark a payload as text.
pub const DEFAULT_TEXTUAL_MARKERS: [&str; 3] = ["text", "json", "x-spring-tuple"];

/// Message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw bytes as received from the wire.
    Bytes(Vec<u8>),
    /// Decoded text.
    Text(String),
    /// An already structured value.
    Structured(Value),
}

impl Payload {
    /// The payload as a value visible to expressions.
    pub fn to_value(&self) -> Value {
        match self {
            Payload::Bytes(b) => Value::Bytes(b.clone()),
            Payload::Text(t) => Value::String(t.clone()),
            Payload::Structured(v) => v.clone(),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value)
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Payload::Bytes(value.to_vec())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_owned())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Structured(value)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Structured(value.into())
    }
}

/// Converts textual byte payloads into text payloads.
///
/// A byte payload is considered textual when the message content type (or
/// the default content type when absent) contains one of the configured
/// markers. All other payloads are passed through unchanged.
#[derive(Debug, Clone)]
pub struct PayloadNormalizer {
    default_content_type: String,
    textual_markers: Vec<String>,
}

impl Default for PayloadNormalizer {
    fn default() -> Self {
        Self {
            default_content_type: DEFAULT_CONTENT_TYPE.to_owned(),
            textual_markers: DEFAULT_TEXTUAL_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl PayloadNormalizer {
    /// A normalizer with the default content type and textual markers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type assumed for messages without a content-type header.
    pub fn with_default_content_type(mut self, content_type: impl ToString) -> Self {
        self.default_content_type = content_type.to_string();
        self
    }

    /// Replace the set of content-type fragments considered textual.
    pub fn with_textual_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.textual_markers = markers.into_iter().map(|m| m.to_string()).collect();
        self
    }

    /// Whether a content type designates textual content.
    pub fn is_textual(&self, content_type: &str) -> bool {
        self.textual_markers
            .iter()
            .any(|marker| content_type.contains(marker.as_str()))
    }

    /// Normalize a message, decoding textual byte payloads as UTF-8.
    ///
    /// Headers are carried over unchanged. Invalid UTF-8 is reported as an
    /// error rather than replaced.
    pub fn normalize(&self, message: &Message) -> Result<Message, NormalizeError> {
        let Payload::Bytes(bytes) = &message.message else {
            return Ok(message.clone());
        };

        let content_type = message
            .headers
            .content_type()
            .unwrap_or_else(|| self.default_content_type.clone());

        if !self.is_textual(&content_type) {
            return Ok(message.clone());
        }

        let text =
            String::from_utf8(bytes.clone()).map_err(|e| NormalizeError::new(e, content_type))?;
        tracing::trace!(len = text.len(), "Decoded textual payload");

        Ok(Message {
            headers: message.headers.clone(),
            message: Payload::Text(text),
        })
    }
}

/// Error returned when a textual payload is not valid UTF-8.
#[derive(Debug)]
pub struct NormalizeError {
    context: SpanTrace,
    content_type: String,
    source: FromUtf8Error,
}

impl NormalizeError {
    fn new(source: FromUtf8Error, content_type: String) -> Self {
        Self {
            context: SpanTrace::capture(),
            content_type,
            source,
        }
    }

    /// The content type the payload was declared with.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Payload declared as {} is not valid UTF-8: {}",
            self.content_type, self.source
        )?;
        self.context.fmt(f)
    }
}

impl std::error::Error for NormalizeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::CONTENT_TYPE;

    fn bytes_message(bytes: &[u8], content_type: Option<&str>) -> Message {
        let message = Message::new(bytes);
        match content_type {
            Some(ct) => message.with_header(CONTENT_TYPE, ct),
            None => message,
        }
    }

    #[test]
    fn decodes_textual_content_types() {
        let normalizer = PayloadNormalizer::new();
        for ct in ["application/json", "text/plain", "application/x-spring-tuple"] {
            let message = bytes_message(b"{\"name\":\"Ada\"}", Some(ct));
            let normalized = normalizer.normalize(&message).unwrap();
            assert_eq!(normalized.message, Payload::from("{\"name\":\"Ada\"}"));
            assert_eq!(normalized.headers, message.headers);
        }
    }

    #[test]
    fn leaves_unknown_content_types_as_bytes() {
        let message = bytes_message(b"binarydata", Some("application/octet-stream"));
        let normalized = PayloadNormalizer::new().normalize(&message).unwrap();
        assert_eq!(normalized, message);
    }

    #[test]
    fn missing_content_type_uses_default() {
        let message = bytes_message(b"plain", None);
        let normalized = PayloadNormalizer::new().normalize(&message).unwrap();
        assert_eq!(normalized.message, Payload::from("plain"));

        let normalized = PayloadNormalizer::new()
            .with_default_content_type("application/octet-stream")
            .normalize(&message)
            .unwrap();
        assert!(matches!(normalized.message, Payload::Bytes(_)));
    }

    #[test]
    fn non_byte_payloads_are_untouched() {
        let message =
            Message::new(serde_json::json!({"a": 1})).with_header(CONTENT_TYPE, "text/plain");
        assert_eq!(PayloadNormalizer::new().normalize(&message).unwrap(), message);
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let message = bytes_message(&[0xff, 0xfe, 0x00], Some("text/plain"));
        let err = PayloadNormalizer::new().normalize(&message).unwrap_err();
        assert_eq!(err.content_type(), "text/plain");
    }

    #[test]
    fn custom_markers_replace_defaults() {
        let normalizer = PayloadNormalizer::new().with_textual_markers(["xml"]);
        assert!(normalizer.is_textual("application/xml"));
        assert!(!normalizer.is_textual("application/json"));
    }
}
