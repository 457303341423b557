//! Enricher configuration.
//!
//! The configuration is plain data deserialized with serde, usually from
//! TOML:
//!
//! ```toml
//! overwrite = false
//! default_content_type = "application/json"
//! textual_markers = ["text", "json", "x-spring-tuple"]
//! normalization = "forward"
//!
//! [variables]
//! region = "eu-west-1"
//!
//! [headers]
//! username = "payload.name"
//! priority = { expression = "payload.priority", default = "normal", overwrite = true }
//! source = { default = "billing" }
//! ```
//!
//! [`EnricherConfig::build`] validates the whole configuration and parses
//! every expression up front, so a malformed entry stops the process at
//! startup instead of failing messages later.

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing_error::SpanTrace;

use crate::{
    HeaderEnricher, HeaderValueResolver, Value, Variables,
    enricher::NormalizationMode,
    expression::ExpressionError,
    payload::{DEFAULT_CONTENT_TYPE, DEFAULT_TEXTUAL_MARKERS, PayloadNormalizer},
};

/// Root configuration of a header enricher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnricherConfig {
    /// Headers to compute, evaluated in the order they are declared.
    pub headers: IndexMap<String, HeaderSpec>,

    /// Replace headers already present on the message.
    pub overwrite: bool,

    /// Content type assumed when a message carries none.
    pub default_content_type: String,

    /// Content-type fragments that mark a byte payload as text.
    pub textual_markers: Vec<String>,

    /// Whether the normalized payload is forwarded.
    pub normalization: NormalizationMode,

    /// Values available to every expression as `#name`.
    pub variables: Variables,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            headers: IndexMap::new(),
            overwrite: false,
            default_content_type: DEFAULT_CONTENT_TYPE.to_owned(),
            textual_markers: DEFAULT_TEXTUAL_MARKERS.iter().map(|m| m.to_string()).collect(),
            normalization: NormalizationMode::default(),
            variables: Variables::new(),
        }
    }
}

/// One configured header: either a bare expression or a detailed entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum HeaderSpec {
    Expression(String),
    Detailed(HeaderDefinition),
}

/// Detailed header entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderDefinition {
    /// Expression computing the value.
    #[serde(default)]
    pub expression: Option<String>,

    /// Value used when the expression yields nothing, or the fixed value
    /// when no expression is given.
    #[serde(default)]
    pub default: Option<Value>,

    /// Per-header overwrite policy.
    #[serde(default)]
    pub overwrite: Option<bool>,
}

impl EnricherConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::new(ConfigErrorKind::Parse(e)))
    }

    /// Load a TOML configuration file.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(ConfigErrorKind::Io(e)))?;
        Self::from_toml_str(&content)
    }

    /// Check the configuration without building anything.
    ///
    /// Reports every problem found, not just the first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        for (name, spec) in &self.headers {
            if name.trim().is_empty() {
                problems.push("header name must not be empty".to_owned());
            }
            if let HeaderSpec::Detailed(HeaderDefinition {
                expression: None,
                default: None | Some(Value::Null),
                ..
            }) = spec
            {
                problems.push(format!("header '{name}' needs an expression or a default"));
            }
        }

        if self.textual_markers.iter().any(|m| m.is_empty()) {
            problems.push("textual markers must not be empty strings".to_owned());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::new(ConfigErrorKind::Invalid(problems)))
        }
    }

    /// Validate the configuration and build the enricher.
    pub fn build(&self) -> Result<HeaderEnricher, ConfigError> {
        self.validate()?;

        let resolvers = self
            .headers
            .iter()
            .map(|(name, spec)| Ok((name.clone(), resolver(name, spec)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let normalizer = PayloadNormalizer::new()
            .with_default_content_type(&self.default_content_type)
            .with_textual_markers(&self.textual_markers);

        tracing::info!(
            headers = resolvers.len(),
            overwrite = self.overwrite,
            "Header enricher configured"
        );

        Ok(HeaderEnricher::new(resolvers)
            .with_overwrite(self.overwrite)
            .with_normalizer(normalizer)
            .with_normalization(self.normalization)
            .with_variables(self.variables.clone()))
    }
}

fn resolver(name: &str, spec: &HeaderSpec) -> Result<HeaderValueResolver, ConfigError> {
    let parse = |expression: &str| {
        HeaderValueResolver::from_expression(expression).map_err(|e| {
            ConfigError::new(ConfigErrorKind::Expression {
                header: name.to_owned(),
                source: e,
            })
        })
    };

    match spec {
        HeaderSpec::Expression(expression) => parse(expression.as_str()),
        HeaderSpec::Detailed(definition) => {
            let mut resolver = match (&definition.expression, &definition.default) {
                (Some(expression), _) => parse(expression.as_str())?,
                (None, Some(value)) => HeaderValueResolver::fixed(value.clone()),
                (None, None) => {
                    return Err(ConfigError::new(ConfigErrorKind::Invalid(vec![format!(
                        "header '{name}' needs an expression or a default"
                    )])));
                }
            };
            if let (Some(_), Some(default)) = (&definition.expression, &definition.default) {
                resolver = resolver.with_default(default.clone());
            }
            if let Some(overwrite) = definition.overwrite {
                resolver = resolver.with_overwrite(overwrite);
            }
            Ok(resolver)
        }
    }
}

/// Error type for configuration loading and building.
#[derive(Debug)]
pub struct ConfigError {
    context: SpanTrace,
    kind: ConfigErrorKind,
}

/// Configuration error kinds.
#[derive(Debug)]
pub enum ConfigErrorKind {
    Io(std::io::Error),
    Parse(toml::de::Error),
    /// A header expression does not parse.
    Expression {
        header: String,
        source: ExpressionError,
    },
    /// Semantic problems, all of them.
    Invalid(Vec<String>),
}

impl ConfigError {
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind,
        }
    }

    /// What went wrong.
    pub fn kind(&self) -> &ConfigErrorKind {
        &self.kind
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ConfigErrorKind::Io(e) => writeln!(f, "IO error: {e}"),
            ConfigErrorKind::Parse(e) => writeln!(f, "Parse error: {e}"),
            ConfigErrorKind::Expression { header, source } => {
                writeln!(f, "Invalid expression for header '{header}': {source}")
            }
            ConfigErrorKind::Invalid(problems) => {
                writeln!(f, "Validation failed: {}", problems.join(", "))
            }
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ConfigErrorKind::Io(e) => Some(e),
            ConfigErrorKind::Parse(e) => Some(e),
            ConfigErrorKind::Expression { source, .. } => Some(source),
            ConfigErrorKind::Invalid(_) => None,
        }
    }
}
