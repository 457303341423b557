use std::{cmp::Ordering, collections::BTreeMap};

use super::parser::{BinaryOp, Expr, Function, Method, UnaryOp};
use super::{EvalError, EvalErrorKind, EvaluationContext};
use crate::Value;

pub(super) fn evaluate(expr: &Expr, ctx: &EvaluationContext<'_>) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Identifier(name) => Ok(match name.as_str() {
            "payload" => ctx.payload.to_value(),
            "headers" => ctx.headers.to_value(),
            _ => Value::Null,
        }),
        Expr::Variable(name) => Ok(ctx.variables.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Root => Ok(Value::Map(BTreeMap::from([
            ("payload".to_owned(), ctx.payload.to_value()),
            ("headers".to_owned(), ctx.headers.to_value()),
        ]))),
        Expr::Property { target, name } => {
            // header lookups skip materializing the whole map
            if matches!(target.as_ref(), Expr::Identifier(root) if root == "headers") {
                return Ok(ctx.headers.get(name).cloned().unwrap_or(Value::Null));
            }
            let target = navigation_target(target, ctx)?;
            navigate(target, &Value::String(name.clone()))
        }
        Expr::Index { target, index } => {
            let target = navigation_target(target, ctx)?;
            let index = evaluate(index, ctx)?;
            navigate(target, &index)
        }
        Expr::Method {
            target,
            method,
            args,
        } => {
            let target = evaluate(target, ctx)?;
            let args = args
                .iter()
                .map(|arg| evaluate(arg, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            call_method(*method, target, &args)
        }
        Expr::Function { function, args } => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            call_function(*function, &args)
        }
        Expr::Unary { op, operand } => {
            let operand = evaluate(operand, ctx)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
                UnaryOp::Neg => match operand {
                    Value::Null => Ok(Value::Null),
                    Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(EvalError::type_mismatch(format!(
                        "cannot negate a {}",
                        other.type_name()
                    ))),
                },
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = evaluate(lhs, ctx)?;
            match op {
                BinaryOp::And if !lhs.is_truthy() => return Ok(Value::Bool(false)),
                BinaryOp::Or if lhs.is_truthy() => return Ok(Value::Bool(true)),
                _ => {}
            }
            let rhs = evaluate(rhs, ctx)?;
            binary(*op, lhs, rhs)
        }
        Expr::Ternary {
            condition,
            then,
            otherwise,
        } => {
            if evaluate(condition, ctx)?.is_truthy() {
                evaluate(then, ctx)
            } else {
                evaluate(otherwise, ctx)
            }
        }
        Expr::Elvis { value, fallback } => {
            let value = evaluate(value, ctx)?;
            match &value {
                Value::Null => evaluate(fallback, ctx),
                Value::String(s) if s.is_empty() => evaluate(fallback, ctx),
                _ => Ok(value),
            }
        }
    }
}

/// Steps into `payload` use the document cached on the context, so a JSON
/// text payload is parsed once however many expressions navigate it.
fn navigation_target(target: &Expr, ctx: &EvaluationContext<'_>) -> Result<Value, EvalError> {
    if matches!(target, Expr::Identifier(root) if root == "payload") {
        if let Some(document) = ctx.payload_document() {
            return Ok(document.clone());
        }
    }
    evaluate(target, ctx)
}

fn overflow() -> EvalError {
    EvalError::from_kind(EvalErrorKind::Overflow)
}

/// Step into `target` by property name or index.
///
/// Text is parsed as JSON on demand. Anything that cannot be navigated
/// into structurally (missing keys, null, non-JSON text, bytes) yields
/// `Null`; scalars that have no members at all are a type mismatch.
fn navigate(target: Value, key: &Value) -> Result<Value, EvalError> {
    match target {
        Value::Null => Ok(Value::Null),
        Value::Map(mut map) => Ok(match key {
            Value::String(k) => map.remove(k),
            Value::Int(i) => map.remove(&i.to_string()),
            _ => None,
        }
        .unwrap_or(Value::Null)),
        Value::List(mut list) => match key {
            Value::Int(i) => Ok(usize::try_from(*i)
                .ok()
                .filter(|i| *i < list.len())
                .map(|i| list.swap_remove(i))
                .unwrap_or(Value::Null)),
            other => Err(EvalError::type_mismatch(format!(
                "cannot index a list with a {}",
                other.type_name()
            ))),
        },
        Value::String(text) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
                navigate(Value::from(json), key)
            }
            _ => Ok(match key {
                Value::Int(i) => usize::try_from(*i)
                    .ok()
                    .and_then(|i| text.chars().nth(i))
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            }),
        },
        Value::Bytes(bytes) => Ok(match key {
            Value::Int(i) => usize::try_from(*i)
                .ok()
                .and_then(|i| bytes.get(i))
                .map(|b| Value::Int(i64::from(*b)))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }),
        scalar => Err(EvalError::type_mismatch(format!(
            "cannot access '{key}' on a {}",
            scalar.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(rhs.is_truthy())),
        BinaryOp::Eq => Ok(Value::Bool(equals(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!equals(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if lhs.is_null() || rhs.is_null() {
                return Ok(Value::Null);
            }
            let ordering = compare(&lhs, &rhs)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, lhs, rhs)
        }
    }
}

fn equals(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a == b,
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => lhs == rhs,
        },
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, EvalError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => a
                .partial_cmp(&b)
                .ok_or_else(|| EvalError::type_mismatch("cannot compare NaN")),
            _ => Err(EvalError::type_mismatch(format!(
                "cannot compare {} with {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

fn arithmetic(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }

    if op == BinaryOp::Add && (matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_)))
    {
        return Ok(Value::String(format!("{lhs}{rhs}")));
    }

    match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                    return Err(EvalError::from_kind(EvalErrorKind::DivisionByZero));
                }
                BinaryOp::Div => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result.map(Value::Int).ok_or_else(overflow)
        }
        _ => {
            let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
                return Err(EvalError::type_mismatch(format!(
                    "cannot apply {op:?} to {} and {}",
                    lhs.type_name(),
                    rhs.type_name()
                )));
            };
            if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0.0 {
                return Err(EvalError::from_kind(EvalErrorKind::DivisionByZero));
            }
            Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            }))
        }
    }
}

fn call_method(method: Method, target: Value, args: &[Value]) -> Result<Value, EvalError> {
    if target.is_null() {
        return Ok(Value::Null);
    }

    let text = |name: &'static str| {
        target.as_str().ok_or_else(|| {
            EvalError::type_mismatch(format!("{name}() is not defined on a {}", target.type_name()))
        })
    };
    let text_arg = |name: &'static str| {
        args[0].as_str().ok_or_else(|| {
            EvalError::invalid_argument(format!("{name}() expects a string argument"))
        })
    };

    match method {
        Method::ToUpperCase => Ok(text("toUpperCase")?.to_uppercase().into()),
        Method::ToLowerCase => Ok(text("toLowerCase")?.to_lowercase().into()),
        Method::Trim => Ok(text("trim")?.trim().into()),
        Method::ToString => Ok(target.to_string().into()),
        Method::Length | Method::Size => {
            let len = match &target {
                Value::String(s) => s.chars().count(),
                Value::List(l) => l.len(),
                Value::Map(m) => m.len(),
                Value::Bytes(b) => b.len(),
                other => {
                    return Err(EvalError::type_mismatch(format!(
                        "a {} has no length",
                        other.type_name()
                    )));
                }
            };
            i64::try_from(len).map(Value::Int).map_err(|_| overflow())
        }
        Method::Contains => Ok(Value::Bool(match &target {
            Value::String(s) => s.contains(text_arg("contains")?),
            Value::List(l) => l.iter().any(|v| equals(v, &args[0])),
            Value::Map(m) => m.contains_key(text_arg("contains")?),
            other => {
                return Err(EvalError::type_mismatch(format!(
                    "contains() is not defined on a {}",
                    other.type_name()
                )));
            }
        })),
        Method::StartsWith => {
            let prefix = text_arg("startsWith")?;
            Ok(Value::Bool(text("startsWith")?.starts_with(prefix)))
        }
        Method::EndsWith => {
            let suffix = text_arg("endsWith")?;
            Ok(Value::Bool(text("endsWith")?.ends_with(suffix)))
        }
        Method::Substring => {
            let chars: Vec<char> = text("substring")?.chars().collect();
            let bound = |v: &Value| {
                let index = match v {
                    Value::Int(i) => usize::try_from(*i).ok(),
                    _ => None,
                };
                index.filter(|i| *i <= chars.len()).ok_or_else(|| {
                    EvalError::invalid_argument(format!(
                        "substring() index {v} out of range for length {}",
                        chars.len()
                    ))
                })
            };
            let from = bound(&args[0])?;
            let to = args.get(1).map(bound).transpose()?.unwrap_or(chars.len());
            if from > to {
                return Err(EvalError::invalid_argument(format!(
                    "substring() start {from} is after end {to}"
                )));
            }
            Ok(Value::String(chars[from..to].iter().collect()))
        }
    }
}

fn call_function(function: Function, args: &[Value]) -> Result<Value, EvalError> {
    match function {
        Function::JsonPath => {
            let path = args[1]
                .as_str()
                .ok_or_else(|| EvalError::invalid_argument("#jsonPath() expects a string path"))?;
            let mut current = args[0].clone();
            for segment in json_path(path)? {
                current = navigate(current, &segment)?;
            }
            Ok(current)
        }
    }
}

/// Split a `$.a.b[0]['c']` path into navigation keys.
fn json_path(path: &str) -> Result<Vec<Value>, EvalError> {
    let invalid = || EvalError::invalid_argument(format!("invalid JSON path '{path}'"));
    let rest = path.strip_prefix('$').ok_or_else(invalid)?;
    let mut segments = Vec::new();
    let mut chars = rest.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n == '.' || n == '[' {
                        break;
                    }
                    name.push(n);
                    chars.next();
                }
                if name.is_empty() {
                    return Err(invalid());
                }
                segments.push(Value::String(name));
            }
            '[' => {
                let mut inner = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(n) => inner.push(n),
                        None => return Err(invalid()),
                    }
                }
                let inner = inner.trim();
                let quoted = inner
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
                match quoted {
                    Some(name) => segments.push(Value::String(name.to_owned())),
                    None => segments.push(Value::Int(inner.parse().map_err(|_| invalid())?)),
                }
            }
            _ => return Err(invalid()),
        }
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::super::Expression;
    use super::*;
    use crate::{Headers, Payload, Variables};

    struct Fixture {
        payload: Payload,
        headers: Headers,
        variables: Variables,
    }

    impl Fixture {
        fn new(payload: impl Into<Payload>) -> Self {
            Self {
                payload: payload.into(),
                headers: Headers::new(),
                variables: Variables::new(),
            }
        }

        fn eval(&self, source: &str) -> Result<Option<Value>, EvalError> {
            let ctx = EvaluationContext::new(&self.payload, &self.headers, &self.variables);
            Expression::parse(source).unwrap().evaluate(&ctx)
        }

        fn value(&self, source: &str) -> Value {
            self.eval(source).unwrap().unwrap_or(Value::Null)
        }
    }

    #[test]
    fn navigates_json_text() {
        let f = Fixture::new(r#"{"user":{"name":"Ada","roles":["admin","dev"]},"n":3}"#);
        assert_eq!(f.value("payload.user.name"), Value::from("Ada"));
        assert_eq!(f.value("payload.user.roles[1]"), Value::from("dev"));
        assert_eq!(f.value("payload['user']?.name"), Value::from("Ada"));
        assert_eq!(f.value("payload.n * 2"), Value::Int(6));
    }

    #[test]
    fn missing_properties_are_no_value() {
        let f = Fixture::new(r#"{"user":{}}"#);
        assert_eq!(f.eval("payload.user.name").unwrap(), None);
        assert_eq!(f.eval("payload.nope.deeper").unwrap(), None);
        assert_eq!(f.eval("payload.user.name.toUpperCase()").unwrap(), None);
        assert_eq!(f.eval("#missing").unwrap(), None);
        assert_eq!(f.eval("unknown").unwrap(), None);
    }

    #[test]
    fn bytes_and_plain_text_have_no_properties() {
        assert_eq!(Fixture::new(b"binarydata".to_vec()).eval("payload.name").unwrap(), None);
        assert_eq!(Fixture::new("just text").eval("payload.name").unwrap(), None);
    }

    #[test]
    fn property_on_number_is_a_type_mismatch() {
        let f = Fixture::new(r#"{"n":3}"#);
        let err = f.eval("payload.n.value").unwrap_err();
        assert!(matches!(err.kind(), EvalErrorKind::TypeMismatch(_)));
    }

    #[test]
    fn headers_and_variables() {
        let mut f = Fixture::new("x");
        f.headers.insert("content-type", "text/plain");
        f.headers.insert("priority", 5i64);
        f.variables.insert("region".into(), Value::from("eu"));
        assert_eq!(f.value("headers['content-type']"), Value::from("text/plain"));
        assert_eq!(f.value("headers.priority + 1"), Value::Int(6));
        assert_eq!(f.value("#region + '-' + payload"), Value::from("eu-x"));
        assert_eq!(f.value("#root.headers.priority"), Value::Int(5));
    }

    #[test]
    fn string_concatenation_and_arithmetic() {
        let f = Fixture::new("x");
        assert_eq!(f.value("'a' + 1"), Value::from("a1"));
        assert_eq!(f.value("7 / 2"), Value::Int(3));
        assert_eq!(f.value("7 % 4"), Value::Int(3));
        assert_eq!(f.value("1.5 + 1"), Value::Float(2.5));
        assert_eq!(f.value("-(2 - 5)"), Value::Int(3));
        assert_eq!(f.eval("payload.missing + 1").unwrap(), None);
    }

    #[test]
    fn unspaced_minus_subtracts() {
        let f = Fixture::new(r#"{"total":10,"discount":3}"#);
        assert_eq!(f.value("payload.total - payload.discount"), Value::Int(7));
        assert_eq!(f.value("payload.total-payload.discount"), Value::Int(7));
        assert_eq!(f.value("payload.total-1"), Value::Int(9));
    }

    #[test]
    fn arithmetic_errors() {
        let f = Fixture::new("x");
        assert!(matches!(f.eval("1 / 0").unwrap_err().kind(), EvalErrorKind::DivisionByZero));
        assert!(matches!(
            f.eval("9223372036854775807 + 1").unwrap_err().kind(),
            EvalErrorKind::Overflow
        ));
        assert!(matches!(f.eval("true * 2").unwrap_err().kind(), EvalErrorKind::TypeMismatch(_)));
    }

    #[test]
    fn comparisons_and_logic() {
        let f = Fixture::new(r#"{"age":42,"name":"Ada"}"#);
        assert_eq!(f.value("payload.age >= 18 and payload.name == 'Ada'"), Value::Bool(true));
        assert_eq!(f.value("payload.age lt 18 or not true"), Value::Bool(false));
        assert_eq!(f.value("2 == 2.0"), Value::Bool(true));
        assert_eq!(f.value("2 != 2.5"), Value::Bool(true));
        assert_eq!(f.value("'b' > 'a'"), Value::Bool(true));
        assert_eq!(f.value("payload.age > 40 ? 'senior' : 'junior'"), Value::from("senior"));
        assert!(f.eval("'a' < 1").is_err());
    }

    #[test]
    fn large_integers_compare_exactly() {
        let f = Fixture::new(r#"{"id":9007199254740993}"#);
        assert_eq!(f.value("9007199254740993 == 9007199254740992"), Value::Bool(false));
        assert_eq!(f.value("9007199254740993 != 9007199254740992"), Value::Bool(true));
        assert_eq!(f.value("payload.id == 9007199254740993"), Value::Bool(true));
        assert_eq!(f.value("payload.id == 9007199254740992"), Value::Bool(false));
    }

    #[test]
    fn and_short_circuits() {
        let f = Fixture::new("x");
        assert_eq!(f.value("false and 1 / 0 == 1"), Value::Bool(false));
        assert_eq!(f.value("true || 1 / 0 == 1"), Value::Bool(true));
    }

    #[test]
    fn elvis_falls_back_on_null_and_empty() {
        let f = Fixture::new(r#"{"a":"","b":"set"}"#);
        assert_eq!(f.value("payload.missing ?: 'dflt'"), Value::from("dflt"));
        assert_eq!(f.value("payload.a ?: 'dflt'"), Value::from("dflt"));
        assert_eq!(f.value("payload.b ?: 'dflt'"), Value::from("set"));
    }

    #[test]
    fn string_methods() {
        let f = Fixture::new(r#"{"name":"  Ada Lovelace "}"#);
        assert_eq!(f.value("payload.name.trim().toLowerCase()"), Value::from("ada lovelace"));
        assert_eq!(f.value("payload.name.trim().substring(0, 3)"), Value::from("Ada"));
        assert_eq!(f.value("payload.name.trim().substring(4)"), Value::from("Lovelace"));
        assert_eq!(f.value("payload.name.contains('Love')"), Value::Bool(true));
        assert_eq!(f.value("payload.name.trim().startsWith('Ada')"), Value::Bool(true));
        assert_eq!(f.value("payload.name.trim().endsWith('x')"), Value::Bool(false));
        assert_eq!(f.value("payload.name.length()"), Value::Int(15));
        assert!(f.eval("payload.name.substring(20)").is_err());
    }

    #[test]
    fn collection_methods() {
        let f = Fixture::new(r#"{"tags":["a","b"],"meta":{"k":1}}"#);
        assert_eq!(f.value("payload.tags.size()"), Value::Int(2));
        assert_eq!(f.value("payload.tags.contains('b')"), Value::Bool(true));
        assert_eq!(f.value("payload.meta.contains('k')"), Value::Bool(true));
        assert_eq!(f.value("payload.meta.k.toString()"), Value::from("1"));
        assert!(f.eval("payload.meta.k.toUpperCase()").is_err());
    }

    #[test]
    fn json_path_function() {
        let f = Fixture::new(r#"{"order":{"lines":[{"sku":"A-1"},{"sku":"B-2"}]}}"#);
        assert_eq!(f.value("#jsonPath(payload, '$.order.lines[1].sku')"), Value::from("B-2"));
        assert_eq!(
            f.value("#jsonPath(payload, \"$['order']['lines'][0]['sku']\")"),
            Value::from("A-1")
        );
        assert_eq!(f.eval("#jsonPath(payload, '$.order.missing')").unwrap(), None);
        assert!(matches!(
            f.eval("#jsonPath(payload, 'order')").unwrap_err().kind(),
            EvalErrorKind::InvalidArgument(_)
        ));
    }

    #[test]
    fn structured_payloads_navigate_directly() {
        let f = Fixture::new(serde_json::json!({"id": 7}));
        assert_eq!(f.value("payload.id"), Value::Int(7));
    }

    #[test]
    fn indexing_bytes_and_text() {
        assert_eq!(Fixture::new(b"AB".to_vec()).value("payload[1]"), Value::Int(66));
        assert_eq!(Fixture::new("hey").value("payload[0]"), Value::from("h"));
        assert_eq!(Fixture::new("hey").eval("payload[10]").unwrap(), None);
    }
}
