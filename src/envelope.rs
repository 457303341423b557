use crate::{Headers, Payload, Value};

/// Message container used by the enrichment pipeline.
///
/// `Envelope` bundles a message payload together with its associated headers.
/// It is intentionally generic and transport-agnostic; the enricher itself
/// works on [`Message`], the envelope of [`Headers`] and [`Payload`].
///
/// ## Design
///
/// - `H` represents message metadata (e.g. content type, correlation IDs,
///   routing hints)
/// - `M` represents the actual message payload
///
/// Envelopes are values: producing an enriched message builds a new envelope
/// and leaves the inbound one untouched.
///
/// ## Conversion
///
/// `Envelope` implements `From<(H, M)>` for ergonomic construction when headers
/// and payload are already available as a tuple.
///
/// ## Example
///
/// ```rust
/// use header_enricher::{Envelope, Message, Payload};
///
/// let message = Message::new(Payload::from("hello"))
///     .with_header("contentType", "text/plain");
///
/// // or, equivalently
/// let envelope: Envelope<_, _> = (message.headers.clone(), Payload::from("hello")).into();
/// assert_eq!(envelope, message);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<H, M> {
    /// Message metadata.
    pub headers: H,
    /// Message payload.
    pub message: M,
}

/// The envelope handled by the enricher.
pub type Message = Envelope<Headers, Payload>;

impl<H, M> From<(H, M)> for Envelope<H, M> {
    fn from(value: (H, M)) -> Self {
        Envelope {
            headers: value.0,
            message: value.1,
        }
    }
}

impl Message {
    /// Create a message with no headers.
    pub fn new(payload: impl Into<Payload>) -> Self {
        Envelope {
            headers: Headers::new(),
            message: payload.into(),
        }
    }

    /// Add a header, replacing any existing value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name, value);
        self
    }
}
