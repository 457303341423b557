//! Per-header value resolution.

use std::sync::Arc;

use crate::{
    Message, Value, Variables,
    expression::{EvalError, EvaluationContext, Evaluator, Expression, ExpressionError},
};

/// Resolves the value of one configured header.
///
/// Wraps an optional [`Evaluator`] and an optional static default. A
/// resolver is built once from configuration and shared by every message; it
/// holds no per-message state.
#[derive(Debug, Clone)]
pub struct HeaderValueResolver {
    evaluator: Option<Arc<dyn Evaluator>>,
    default: Option<Value>,
    overwrite: Option<bool>,
}

impl HeaderValueResolver {
    /// Create a resolver around any evaluator.
    pub fn new(evaluator: impl Evaluator + 'static) -> Self {
        Self {
            evaluator: Some(Arc::new(evaluator)),
            default: None,
            overwrite: None,
        }
    }

    /// A resolver that always yields `value`, without evaluating anything.
    pub fn fixed(value: impl Into<Value>) -> Self {
        Self {
            evaluator: None,
            default: None,
            overwrite: None,
        }
        .with_default(value)
    }

    /// Parse `expression` and build a resolver for it.
    pub fn from_expression(expression: &str) -> Result<Self, ExpressionError> {
        Ok(Self::new(Expression::parse(expression)?))
    }

    /// Value used when the expression yields no value.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into()).filter(|v| !v.is_null());
        self
    }

    /// Overwrite policy for this header only, taking precedence over the
    /// enricher-wide setting.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = Some(overwrite);
        self
    }

    /// Per-header overwrite policy, if one was set.
    pub fn overwrite(&self) -> Option<bool> {
        self.overwrite
    }

    /// Resolve the header value for `message`.
    ///
    /// Returns `Ok(None)` when neither the expression nor the default
    /// produce a value; the header must then be left out of the message.
    pub fn resolve(
        &self,
        message: &Message,
        variables: &Variables,
    ) -> Result<Option<Value>, EvalError> {
        let context = EvaluationContext::new(&message.message, &message.headers, variables);
        self.resolve_in(&context)
    }

    /// Resolve against an existing context, shared by every header of the
    /// same message.
    pub fn resolve_in(&self, context: &EvaluationContext<'_>) -> Result<Option<Value>, EvalError> {
        let value = match &self.evaluator {
            Some(evaluator) => evaluator.evaluate(context)?,
            None => None,
        };
        Ok(value.or_else(|| self.default.clone()))
    }
}
