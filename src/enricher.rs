//! The header enrichment transformation.
//!
//! [`HeaderEnricher`] owns one [`HeaderValueResolver`] per configured header.
//! For every message it:
//!
//! 1. normalizes the payload (textual bytes become text),
//! 2. resolves every configured header, in configuration order, against the
//!    normalized payload and the inbound headers,
//! 3. merges the resolved values into a copy of the headers following the
//!    overwrite policy,
//! 4. returns a new message; the inbound message is never modified.
//!
//! Headers that resolve to no value are left out. Identity headers
//! ([`headers::IMMUTABLE`]) are never written.
//!
//! The enricher is immutable once built and can be shared (e.g. in an `Arc`)
//! by any number of concurrent callers.

use indexmap::IndexMap;
use serde::Deserialize;
use tracing_error::SpanTrace;

use crate::{
    Envelope, HeaderValueResolver, Message, Value, Variables,
    expression::{EvalError, EvaluationContext, ExpressionError},
    headers,
    payload::{NormalizeError, PayloadNormalizer},
};

/// Which payload the enriched message carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMode {
    /// The normalized payload is forwarded: a textual byte payload leaves the
    /// enricher as text, whether or not an expression looked at it.
    #[default]
    Forward,
    /// Expressions see the normalized payload, but the inbound payload is
    /// forwarded unchanged.
    Scratch,
}

/// Computes headers from expressions and merges them into messages.
#[derive(Debug, Clone, Default)]
pub struct HeaderEnricher {
    resolvers: IndexMap<String, HeaderValueResolver>,
    overwrite: bool,
    variables: Variables,
    normalizer: PayloadNormalizer,
    normalization: NormalizationMode,
}

impl HeaderEnricher {
    /// Create an enricher from `(header name, resolver)` pairs, kept in
    /// iteration order.
    pub fn new<I, K>(resolvers: I) -> Self
    where
        I: IntoIterator<Item = (K, HeaderValueResolver)>,
        K: Into<String>,
    {
        Self {
            resolvers: resolvers.into_iter().map(|(k, r)| (k.into(), r)).collect(),
            ..Self::default()
        }
    }

    /// Create an enricher from `(header name, expression)` pairs.
    ///
    /// Fails on the first expression that does not parse.
    pub fn from_expressions<I, K, E>(expressions: I) -> Result<Self, ExpressionError>
    where
        I: IntoIterator<Item = (K, E)>,
        K: Into<String>,
        E: AsRef<str>,
    {
        let resolvers = expressions
            .into_iter()
            .map(|(name, expr)| Ok((name, HeaderValueResolver::from_expression(expr.as_ref())?)))
            .collect::<Result<Vec<_>, ExpressionError>>()?;
        Ok(Self::new(resolvers))
    }

    /// Replace existing headers with computed values. Defaults to `false`.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Variables available to every expression as `#name`.
    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    /// Decides which byte payloads are decoded to text before evaluation.
    pub fn with_normalizer(mut self, normalizer: PayloadNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Which payload the enriched message carries. Defaults to
    /// [`NormalizationMode::Forward`].
    pub fn with_normalization(mut self, normalization: NormalizationMode) -> Self {
        self.normalization = normalization;
        self
    }

    /// Configured header names, in evaluation order.
    pub fn header_names(&self) -> impl Iterator<Item = &str> {
        self.resolvers.keys().map(String::as_str)
    }

    /// Enrich a message.
    ///
    /// Fails when the payload cannot be decoded or when an expression raises
    /// an error; no partial result is produced in either case.
    #[tracing::instrument(skip_all, fields(headers = self.resolvers.len()))]
    pub fn enrich(&self, message: &Message) -> Result<Message, EnrichError> {
        let working = self
            .normalizer
            .normalize(message)
            .map_err(EnrichError::normalization)?;

        let computed = {
            let context =
                EvaluationContext::new(&working.message, &working.headers, &self.variables);
            let mut computed: Vec<(&str, &HeaderValueResolver, Value)> = Vec::new();
            for (name, resolver) in &self.resolvers {
                match resolver.resolve_in(&context) {
                    Ok(Some(value)) => computed.push((name.as_str(), resolver, value)),
                    Ok(None) => tracing::debug!(header = %name, "Expression produced no value"),
                    Err(e) => return Err(EnrichError::evaluation(name, e)),
                }
            }
            computed
        };

        let Envelope {
            headers: mut merged,
            message: normalized,
        } = working;

        for (name, resolver, value) in computed {
            if headers::is_immutable(name) {
                tracing::warn!(header = %name, "Skipping write to read-only header");
                continue;
            }

            let overwrite = resolver.overwrite().unwrap_or(self.overwrite);
            if overwrite || !merged.contains(name) {
                tracing::debug!(header = %name, value = %value, "Setting header");
                merged.insert(name, value);
            } else {
                tracing::debug!(header = %name, "Keeping existing header");
            }
        }

        let payload = match self.normalization {
            NormalizationMode::Forward => normalized,
            NormalizationMode::Scratch => message.message.clone(),
        };

        Ok(Envelope {
            headers: merged,
            message: payload,
        })
    }
}

/// Error returned when a message cannot be enriched.
///
/// Each error captures:
/// - The failure kind
/// - A tracing span backtrace for improved diagnostics
#[derive(Debug)]
pub struct EnrichError {
    context: SpanTrace,
    kind: EnrichErrorKind,
}

/// Enrichment error kinds.
#[derive(Debug)]
pub enum EnrichErrorKind {
    /// The payload was declared textual but is not valid UTF-8.
    Normalization(NormalizeError),
    /// A header expression failed.
    Evaluation { header: String, source: EvalError },
}

impl EnrichError {
    fn normalization(err: NormalizeError) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: EnrichErrorKind::Normalization(err),
        }
    }

    fn evaluation(header: &str, err: EvalError) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: EnrichErrorKind::Evaluation {
                header: header.to_owned(),
                source: err,
            },
        }
    }

    /// What went wrong.
    pub fn kind(&self) -> &EnrichErrorKind {
        &self.kind
    }
}

impl std::fmt::Display for EnrichError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            EnrichErrorKind::Normalization(err) => writeln!(f, "Normalization error: {err}"),
            EnrichErrorKind::Evaluation { header, source } => {
                writeln!(f, "Evaluation error for header '{header}': {source}")
            }
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for EnrichError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            EnrichErrorKind::Normalization(err) => Some(err),
            EnrichErrorKind::Evaluation { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Payload,
        headers::{CONTENT_TYPE, ID},
    };

    fn username_enricher() -> HeaderEnricher {
        HeaderEnricher::from_expressions([("username", "payload.name")]).unwrap()
    }

    fn json_bytes(json: &str) -> Message {
        Message::new(json.as_bytes()).with_header(CONTENT_TYPE, "application/json")
    }

    #[test]
    fn enriches_json_byte_payload() {
        let message = json_bytes(r#"{"name":"Ada"}"#);
        let enriched = username_enricher().enrich(&message).unwrap();

        assert_eq!(enriched.headers.get("username"), Some(&Value::from("Ada")));
        assert_eq!(enriched.message, Payload::from(r#"{"name":"Ada"}"#));
        assert_eq!(
            enriched.headers.get(CONTENT_TYPE),
            Some(&Value::from("application/json"))
        );
    }

    #[test]
    fn headers_share_one_parsed_payload() {
        let enricher = HeaderEnricher::from_expressions([
            ("net", "payload.total-payload.discount"),
            ("orderId", "payload.id"),
            ("sameOrder", "payload.id == 9007199254740992"),
        ])
        .unwrap();
        let message = json_bytes(r#"{"total":10,"discount":3,"id":9007199254740993}"#);
        let enriched = enricher.enrich(&message).unwrap();

        assert_eq!(enriched.headers.get("net"), Some(&Value::Int(7)));
        assert_eq!(enriched.headers.get("orderId"), Some(&Value::Int(9007199254740993)));
        assert_eq!(enriched.headers.get("sameOrder"), Some(&Value::Bool(false)));
    }

    #[test]
    fn inbound_message_is_unchanged() {
        let message = json_bytes(r#"{"name":"Ada"}"#);
        let before = message.clone();
        username_enricher().enrich(&message).unwrap();
        assert_eq!(message, before);
    }

    #[test]
    fn binary_payload_yields_no_header() {
        let message = Message::new(&b"binarydata"[..])
            .with_header(CONTENT_TYPE, "application/octet-stream");
        let enriched = username_enricher().enrich(&message).unwrap();

        assert!(!enriched.headers.contains("username"));
        assert_eq!(enriched.message, Payload::Bytes(b"binarydata".to_vec()));
    }

    #[test]
    fn binary_payload_still_sees_headers() {
        let enricher =
            HeaderEnricher::from_expressions([("route", "headers.tenant + '/inbox'")]).unwrap();
        let message = Message::new(&b"\x00\x01"[..])
            .with_header(CONTENT_TYPE, "application/octet-stream")
            .with_header("tenant", "acme");
        let enriched = enricher.enrich(&message).unwrap();
        assert_eq!(enriched.headers.get("route"), Some(&Value::from("acme/inbox")));
    }

    #[test]
    fn no_value_headers_are_absent() {
        let enriched = username_enricher().enrich(&json_bytes("{}")).unwrap();
        assert!(!enriched.headers.contains("username"));
    }

    #[test]
    fn existing_header_kept_without_overwrite() {
        let enricher = HeaderEnricher::from_expressions([("priority", "'high'")]).unwrap();
        let message = json_bytes("{}").with_header("priority", "low");
        let enriched = enricher.enrich(&message).unwrap();
        assert_eq!(enriched.headers.get("priority"), Some(&Value::from("low")));
    }

    #[test]
    fn existing_header_replaced_with_overwrite() {
        let enricher = HeaderEnricher::from_expressions([("priority", "'high'")])
            .unwrap()
            .with_overwrite(true);
        let message = json_bytes("{}").with_header("priority", "low");
        let enriched = enricher.enrich(&message).unwrap();
        assert_eq!(enriched.headers.get("priority"), Some(&Value::from("high")));
    }

    #[test]
    fn per_header_overwrite_wins() {
        let enricher = HeaderEnricher::new([
            (
                "priority",
                HeaderValueResolver::from_expression("'high'")
                    .unwrap()
                    .with_overwrite(true),
            ),
            ("region", HeaderValueResolver::from_expression("'eu'").unwrap()),
        ]);
        let message = json_bytes("{}")
            .with_header("priority", "low")
            .with_header("region", "us");
        let enriched = enricher.enrich(&message).unwrap();
        assert_eq!(enriched.headers.get("priority"), Some(&Value::from("high")));
        assert_eq!(enriched.headers.get("region"), Some(&Value::from("us")));
    }

    #[test]
    fn identity_headers_are_never_overwritten() {
        let enricher = HeaderEnricher::from_expressions([(ID, "'forged'"), ("seen", "true")])
            .unwrap()
            .with_overwrite(true);
        let message = json_bytes("{}").with_header(ID, "original");
        let enriched = enricher.enrich(&message).unwrap();
        assert_eq!(enriched.headers.get(ID), Some(&Value::from("original")));
        assert_eq!(enriched.headers.get("seen"), Some(&Value::Bool(true)));
    }

    #[test]
    fn re_enrichment_is_idempotent() {
        let enricher = HeaderEnricher::from_expressions([
            ("username", "payload.name"),
            ("stamp", "payload.name + '-' + headers.size()"),
        ])
        .unwrap();
        let once = enricher.enrich(&json_bytes(r#"{"name":"Ada"}"#)).unwrap();
        let twice = enricher.enrich(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn resolvers_observe_inbound_headers() {
        let enricher = HeaderEnricher::from_expressions([
            ("a", "'x'"),
            ("b", "headers.a ?: 'unset'"),
        ])
        .unwrap();
        let enriched = enricher.enrich(&json_bytes("{}")).unwrap();
        assert_eq!(enriched.headers.get("b"), Some(&Value::from("unset")));
        assert_eq!(enricher.header_names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn evaluation_error_fails_the_message() {
        let enricher = HeaderEnricher::from_expressions([
            ("ok", "'fine'"),
            ("ratio", "payload.total / payload.count"),
        ])
        .unwrap();
        let err = enricher
            .enrich(&json_bytes(r#"{"total":10,"count":0}"#))
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            EnrichErrorKind::Evaluation { header, .. } if header == "ratio"
        ));
    }

    #[test]
    fn invalid_utf8_fails_the_message() {
        let message = Message::new(&[0xc3u8, 0x28][..]).with_header(CONTENT_TYPE, "text/plain");
        let err = username_enricher().enrich(&message).unwrap_err();
        assert!(matches!(err.kind(), EnrichErrorKind::Normalization(_)));
    }

    #[test]
    fn scratch_normalization_keeps_inbound_payload() {
        let enricher = username_enricher().with_normalization(NormalizationMode::Scratch);
        let message = json_bytes(r#"{"name":"Ada"}"#);
        let enriched = enricher.enrich(&message).unwrap();
        assert_eq!(enriched.headers.get("username"), Some(&Value::from("Ada")));
        assert_eq!(enriched.message, message.message);
    }

    #[test]
    fn variables_are_shared_by_all_expressions() {
        let enricher = HeaderEnricher::from_expressions([("region", "#region")])
            .unwrap()
            .with_variables(Variables::from([("region".to_owned(), Value::from("eu"))]));
        let enriched = enricher.enrich(&json_bytes("{}")).unwrap();
        assert_eq!(enriched.headers.get("region"), Some(&Value::from("eu")));
    }

    #[test]
    fn malformed_expression_fails_construction() {
        assert!(HeaderEnricher::from_expressions([("bad", "payload.")]).is_err());
    }

    #[test]
    fn concurrent_enrichment_shares_one_enricher() {
        let enricher = username_enricher();
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let enricher = &enricher;
                    s.spawn(move || {
                        let message = json_bytes(&format!(r#"{{"name":"user-{i}"}}"#));
                        enricher.enrich(&message).map(|m| m.headers.get("username").cloned())
                    })
                })
                .collect();
            for (i, handle) in handles.into_iter().enumerate() {
                let username = handle.join().unwrap().unwrap();
                assert_eq!(username, Some(Value::String(format!("user-{i}"))));
            }
        });
    }
}
