#![doc = include_str!("../README.md")]

pub mod config;
pub mod enricher;
pub mod envelope;
pub mod expression;
pub mod headers;
pub mod payload;
mod resolver;
pub mod transport;
mod value;

#[doc(inline)]
pub use envelope::{Envelope, Message};

#[doc(inline)]
pub use headers::Headers;

#[doc(inline)]
pub use payload::{Payload, PayloadNormalizer};

#[doc(inline)]
pub use value::{Value, Variables};

#[doc(inline)]
pub use resolver::HeaderValueResolver;

#[doc(inline)]
pub use enricher::{EnrichError, EnrichErrorKind, HeaderEnricher, NormalizationMode};

#[doc(inline)]
pub use config::{ConfigError, EnricherConfig};

#[doc(inline)]
pub use transport::layers::HeaderEnricherLayer;
