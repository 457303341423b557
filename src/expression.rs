//! Header value expressions.
//!
//! An [`Expression`] is parsed once, at configuration time, and evaluated
//! for every message against an [`EvaluationContext`]. Parsing rejects
//! malformed expressions (syntax, unknown methods or functions, wrong
//! argument counts) so that a broken configuration fails at startup.
//!
//! ## Language
//!
//! - literals: `'text'`, `"text"`, `42`, `1.5`, `true`, `false`, `null`
//! - roots: `payload`, `headers`, `#variable`, `#root`
//! - navigation: `payload.user.name`, `headers['content-type']`,
//!   `payload.items[0]`, `payload?.user`
//! - operators: `?:` (elvis), `c ? a : b`, `or`/`||`, `and`/`&&`,
//!   `==`/`eq`, `!=`/`ne`, `<`, `<=`, `>`, `>=`, `+`, `-`, `*`, `/`, `%`,
//!   `!`/`not`, unary `-`
//! - methods: `toUpperCase()`, `toLowerCase()`, `trim()`, `length()`,
//!   `size()`, `toString()`, `contains(x)`, `startsWith(x)`, `endsWith(x)`,
//!   `substring(from[, to])`
//! - functions: `#jsonPath(value, '$.path[0].to.field')`
//!
//! Navigating into text parses it as JSON on demand, so `payload.name`
//! works on a JSON document received as text. Missing properties yield
//! no value rather than an error.
//!
//! `-` is always an operator: `payload.total-payload.discount` subtracts.
//! Names containing a dash are reached with brackets, as in
//! `headers['content-type']`.
//!
//! ## Example
//!
//! ```rust
//! use header_enricher::expression::{EvaluationContext, Expression};
//! use header_enricher::{Headers, Payload, Value, Variables};
//!
//! let expression: Expression = "payload.name.toUpperCase()".parse().unwrap();
//! let payload = Payload::from(r#"{"name":"Ada"}"#);
//! let headers = Headers::new();
//! let variables = Variables::new();
//! let context = EvaluationContext::new(&payload, &headers, &variables);
//!
//! assert_eq!(expression.evaluate(&context).unwrap(), Some(Value::from("ADA")));
//! ```

mod eval;
mod lexer;
mod parser;

use std::{
    str::FromStr,
    sync::{Arc, OnceLock},
};

use tracing_error::SpanTrace;

use crate::{Headers, Payload, Value, Variables};

use parser::Expr;

/// Everything an expression can observe while being evaluated.
///
/// Build one context per message and evaluate every expression against it:
/// a JSON text payload is parsed the first time an expression navigates into
/// it and reused afterwards.
#[derive(Debug, Clone)]
pub struct EvaluationContext<'a> {
    pub payload: &'a Payload,
    pub headers: &'a Headers,
    pub variables: &'a Variables,
    document: OnceLock<Option<Value>>,
}

impl<'a> EvaluationContext<'a> {
    /// Context for one message.
    pub fn new(payload: &'a Payload, headers: &'a Headers, variables: &'a Variables) -> Self {
        Self {
            payload,
            headers,
            variables,
            document: OnceLock::new(),
        }
    }

    /// The text payload parsed as a JSON object or array, if it is one.
    pub(crate) fn payload_document(&self) -> Option<&Value> {
        self.document
            .get_or_init(|| match self.payload {
                Payload::Text(text) => serde_json::from_str::<serde_json::Value>(text)
                    .ok()
                    .filter(|json| json.is_object() || json.is_array())
                    .map(Value::from),
                _ => None,
            })
            .as_ref()
    }
}

/// Computes a value from a message.
///
/// Implementations must be stateless between calls: the same evaluator is
/// shared by every in-flight message. `Ok(None)` means "no value".
pub trait Evaluator: std::fmt::Debug + Send + Sync {
    fn evaluate(&self, context: &EvaluationContext<'_>) -> Result<Option<Value>, EvalError>;
}

/// A parsed expression.
///
/// Cloning is cheap; clones share the parsed tree.
#[derive(Debug, Clone)]
pub struct Expression {
    source: Arc<str>,
    ast: Arc<Expr>,
}

impl Expression {
    /// Parse an expression.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let ast = parser::parse(source)?;
        Ok(Self {
            source: source.into(),
            ast: Arc::new(ast),
        })
    }

    /// The expression text as configured.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a message context. A `null` result is reported as
    /// no value.
    pub fn evaluate(&self, context: &EvaluationContext<'_>) -> Result<Option<Value>, EvalError> {
        let value = eval::evaluate(&self.ast, context)?;
        Ok((!value.is_null()).then_some(value))
    }
}

impl Evaluator for Expression {
    fn evaluate(&self, context: &EvaluationContext<'_>) -> Result<Option<Value>, EvalError> {
        Expression::evaluate(self, context)
    }
}

impl FromStr for Expression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::parse(s)
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Error returned when an expression cannot be parsed.
#[derive(Debug)]
pub struct ExpressionError {
    context: SpanTrace,
    kind: ExpressionErrorKind,
    expression: String,
    position: usize,
}

/// Expression parse error kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionErrorKind {
    UnexpectedChar(char),
    UnterminatedString,
    InvalidNumber(String),
    UnexpectedToken { expected: String, found: String },
    UnknownMethod(String),
    UnknownFunction(String),
    WrongArity {
        name: String,
        expected: usize,
        found: usize,
    },
}

impl ExpressionError {
    fn new(kind: ExpressionErrorKind, expression: &str, position: usize) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind,
            expression: expression.to_owned(),
            position,
        }
    }

    /// What went wrong.
    pub fn kind(&self) -> &ExpressionErrorKind {
        &self.kind
    }

    /// Byte offset of the error in the expression text.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The expression text that failed to parse.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl std::fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ExpressionErrorKind::UnexpectedChar(c) => write!(f, "Unexpected character '{c}'"),
            ExpressionErrorKind::UnterminatedString => write!(f, "Unterminated string literal"),
            ExpressionErrorKind::InvalidNumber(n) => write!(f, "Invalid number '{n}'"),
            ExpressionErrorKind::UnexpectedToken { expected, found } => {
                write!(f, "Expected {expected}, found {found}")
            }
            ExpressionErrorKind::UnknownMethod(m) => write!(f, "Unknown method '{m}'"),
            ExpressionErrorKind::UnknownFunction(name) => write!(f, "Unknown function '#{name}'"),
            ExpressionErrorKind::WrongArity {
                name,
                expected,
                found,
            } => write!(f, "'{name}' expects {expected} argument(s), got {found}"),
        }?;
        writeln!(f, " at position {} in `{}`", self.position, self.expression)?;
        self.context.fmt(f)
    }
}

impl std::error::Error for ExpressionError {}

/// Error raised while evaluating an expression against a message.
#[derive(Debug)]
pub struct EvalError {
    context: SpanTrace,
    kind: EvalErrorKind,
}

/// Evaluation error kinds.
#[derive(Debug)]
pub enum EvalErrorKind {
    /// An operation was applied to a value of the wrong type.
    TypeMismatch(String),
    DivisionByZero,
    Overflow,
    /// A method or function argument is out of range or malformed.
    InvalidArgument(String),
    /// Error raised by a custom [`Evaluator`].
    Custom(tower::BoxError),
}

impl EvalError {
    pub(crate) fn type_mismatch(message: impl Into<String>) -> Self {
        Self::from_kind(EvalErrorKind::TypeMismatch(message.into()))
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::from_kind(EvalErrorKind::InvalidArgument(message.into()))
    }

    /// Wrap an error raised by a custom evaluator.
    pub fn custom(err: impl Into<tower::BoxError>) -> Self {
        Self::from_kind(EvalErrorKind::Custom(err.into()))
    }

    pub(crate) fn from_kind(kind: EvalErrorKind) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind,
        }
    }

    /// What went wrong.
    pub fn kind(&self) -> &EvalErrorKind {
        &self.kind
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            EvalErrorKind::TypeMismatch(msg) => writeln!(f, "Type mismatch: {msg}"),
            EvalErrorKind::DivisionByZero => writeln!(f, "Division by zero"),
            EvalErrorKind::Overflow => writeln!(f, "Integer overflow"),
            EvalErrorKind::InvalidArgument(msg) => writeln!(f, "Invalid argument: {msg}"),
            EvalErrorKind::Custom(err) => writeln!(f, "Evaluator error: {err}"),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            EvalErrorKind::Custom(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
