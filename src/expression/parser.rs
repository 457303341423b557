//! Recursive-descent parser producing the expression AST.
//!
//! Precedence, lowest first: ternary / elvis, `or`, `and`, equality,
//! relational, additive, multiplicative, unary, postfix navigation.

use super::lexer::{Token, tokenize};
use super::{ExpressionError, ExpressionErrorKind};
use crate::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    /// Bare identifier resolved against the message (`payload`, `headers`).
    Identifier(String),
    /// `#name` lookup in the variable bindings.
    Variable(String),
    /// `#root`, the message as a map.
    Root,
    Property {
        target: Box<Expr>,
        name: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Method {
        target: Box<Expr>,
        method: Method,
        args: Vec<Expr>,
    },
    Function {
        function: Function,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Elvis {
        value: Box<Expr>,
        fallback: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Method {
    ToUpperCase,
    ToLowerCase,
    Trim,
    Length,
    Size,
    ToString,
    Contains,
    StartsWith,
    EndsWith,
    Substring,
}

impl Method {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "toUpperCase" => Method::ToUpperCase,
            "toLowerCase" => Method::ToLowerCase,
            "trim" => Method::Trim,
            "length" => Method::Length,
            "size" => Method::Size,
            "toString" => Method::ToString,
            "contains" => Method::Contains,
            "startsWith" => Method::StartsWith,
            "endsWith" => Method::EndsWith,
            "substring" => Method::Substring,
            _ => return None,
        })
    }

    /// Accepted argument counts, inclusive.
    fn arity(self) -> (usize, usize) {
        match self {
            Method::ToUpperCase
            | Method::ToLowerCase
            | Method::Trim
            | Method::Length
            | Method::Size
            | Method::ToString => (0, 0),
            Method::Contains | Method::StartsWith | Method::EndsWith => (1, 1),
            Method::Substring => (1, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Function {
    JsonPath,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "jsonPath" => Some(Function::JsonPath),
            _ => None,
        }
    }

    fn arity(self) -> (usize, usize) {
        match self {
            Function::JsonPath => (2, 2),
        }
    }
}

pub(crate) fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
    };
    let expr = parser.expression()?;
    parser.expect(Token::Eof)?;
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].1
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].0.clone();
        if token != Token::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume a keyword operator such as `and` or `not`.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Token::Ident(name) if name == keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), ExpressionError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(&token.to_string()))
        }
    }

    fn error(&self, kind: ExpressionErrorKind, offset: usize) -> ExpressionError {
        ExpressionError::new(kind, self.source, offset)
    }

    fn unexpected(&self, expected: &str) -> ExpressionError {
        self.error(
            ExpressionErrorKind::UnexpectedToken {
                expected: expected.to_owned(),
                found: self.peek().to_string(),
            },
            self.offset(),
        )
    }

    fn unexpected_at(&self, found: Token, expected: &str, offset: usize) -> ExpressionError {
        self.error(
            ExpressionErrorKind::UnexpectedToken {
                expected: expected.to_owned(),
                found: found.to_string(),
            },
            offset,
        )
    }

    fn expression(&mut self) -> Result<Expr, ExpressionError> {
        let value = self.or()?;

        if self.eat(&Token::Elvis) {
            let fallback = self.expression()?;
            return Ok(Expr::Elvis {
                value: Box::new(value),
                fallback: Box::new(fallback),
            });
        }

        if self.eat(&Token::Question) {
            let then = self.expression()?;
            self.expect(Token::Colon)?;
            let otherwise = self.expression()?;
            return Ok(Expr::Ternary {
                condition: Box::new(value),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }

        Ok(value)
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.and()?;
        while self.eat(&Token::OrOr) || self.eat_keyword("or") {
            let rhs = self.and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.equality()?;
        while self.eat(&Token::AndAnd) || self.eat_keyword("and") {
            let rhs = self.equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.relational()?;
        loop {
            let op = if self.eat(&Token::EqEq) || self.eat_keyword("eq") {
                BinaryOp::Eq
            } else if self.eat(&Token::NotEq) || self.eat_keyword("ne") {
                BinaryOp::Ne
            } else {
                return Ok(lhs);
            };
            let rhs = self.relational()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn relational(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.additive()?;
        loop {
            let op = if self.eat(&Token::Lt) || self.eat_keyword("lt") {
                BinaryOp::Lt
            } else if self.eat(&Token::Le) || self.eat_keyword("le") {
                BinaryOp::Le
            } else if self.eat(&Token::Gt) || self.eat_keyword("gt") {
                BinaryOp::Gt
            } else if self.eat(&Token::Ge) || self.eat_keyword("ge") {
                BinaryOp::Ge
            } else {
                return Ok(lhs);
            };
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        let op = if self.eat(&Token::Bang) || self.eat_keyword("not") {
            UnaryOp::Not
        } else if self.eat(&Token::Minus) {
            UnaryOp::Neg
        } else {
            return self.postfix();
        };
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Token::Dot | Token::SafeDot => {
                    self.advance();
                    let offset = self.offset();
                    let name = match self.advance() {
                        Token::Ident(name) => name,
                        token => return Err(self.unexpected_at(token, "property name", offset)),
                    };
                    if self.eat(&Token::LParen) {
                        let method = Method::lookup(&name).ok_or_else(|| {
                            self.error(ExpressionErrorKind::UnknownMethod(name.clone()), offset)
                        })?;
                        let args = self.arguments(&name, method.arity(), offset)?;
                        expr = Expr::Method {
                            target: Box::new(expr),
                            method,
                            args,
                        };
                    } else {
                        expr = Expr::Property {
                            target: Box::new(expr),
                            name,
                        };
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Parse a parenthesized argument list; the opening parenthesis is
    /// already consumed.
    fn arguments(
        &mut self,
        name: &str,
        (min, max): (usize, usize),
        offset: usize,
    ) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.expression()?);
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(Token::Comma)?;
            }
        }
        if args.len() < min || args.len() > max {
            return Err(self.error(
                ExpressionErrorKind::WrongArity {
                    name: name.to_owned(),
                    expected: min,
                    found: args.len(),
                },
                offset,
            ));
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let offset = self.offset();
        match self.advance() {
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ => Expr::Identifier(name),
            }),
            Token::Hash => {
                let name_offset = self.offset();
                let name = match self.advance() {
                    Token::Ident(name) => name,
                    token => {
                        let expected = "variable or function name";
                        return Err(self.unexpected_at(token, expected, name_offset));
                    }
                };
                if self.eat(&Token::LParen) {
                    let function = Function::lookup(&name).ok_or_else(|| {
                        self.error(ExpressionErrorKind::UnknownFunction(name.clone()), name_offset)
                    })?;
                    let args = self.arguments(&name, function.arity(), name_offset)?;
                    Ok(Expr::Function { function, args })
                } else if name == "root" {
                    Ok(Expr::Root)
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Token::LParen => {
                let expr = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            token => Err(self.unexpected_at(token, "expression", offset)),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(target: Expr, name: &str) -> Expr {
        Expr::Property {
            target: Box::new(target),
            name: name.to_owned(),
        }
    }

    #[test]
    fn parses_property_paths() {
        assert_eq!(
            parse("payload.user.name").unwrap(),
            prop(prop(Expr::Identifier("payload".into()), "user"), "name")
        );
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse("1 + 2 * 3").unwrap();
        let Expr::Binary { op: BinaryOp::Add, rhs, .. } = expr else {
            panic!("expected addition at the root, got {expr:?}");
        };
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn keyword_operators() {
        let expr = parse("not a and b or c").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Or, .. }));
    }

    #[test]
    fn ternary_and_elvis() {
        assert!(matches!(parse("a ? 'x' : 'y'").unwrap(), Expr::Ternary { .. }));
        assert!(matches!(parse("a ?: 'x'").unwrap(), Expr::Elvis { .. }));
    }

    #[test]
    fn variables_functions_and_root() {
        assert_eq!(parse("#region").unwrap(), Expr::Variable("region".into()));
        assert_eq!(parse("#root").unwrap(), Expr::Root);
        assert!(matches!(
            parse("#jsonPath(payload, '$.a')").unwrap(),
            Expr::Function { function: Function::JsonPath, .. }
        ));
    }

    #[test]
    fn rejects_unknown_methods_at_parse_time() {
        let err = parse("payload.name.explode()").unwrap_err();
        assert!(matches!(err.kind(), ExpressionErrorKind::UnknownMethod(m) if m == "explode"));
    }

    #[test]
    fn rejects_unknown_functions() {
        let err = parse("#nope(1)").unwrap_err();
        assert!(matches!(err.kind(), ExpressionErrorKind::UnknownFunction(_)));
    }

    #[test]
    fn checks_arity() {
        let err = parse("payload.trim(1)").unwrap_err();
        assert!(matches!(err.kind(), ExpressionErrorKind::WrongArity { found: 1, .. }));
        assert!(parse("payload.substring(1)").is_ok());
        assert!(parse("payload.substring(1, 2)").is_ok());
    }

    #[test]
    fn rejects_trailing_tokens() {
        let err = parse("payload.name 'x'").unwrap_err();
        assert!(matches!(err.kind(), ExpressionErrorKind::UnexpectedToken { .. }));
        assert_eq!(err.position(), 13);
    }

    #[test]
    fn rejects_dangling_operator() {
        assert!(parse("1 +").is_err());
        assert!(parse("payload.").is_err());
        assert!(parse("").is_err());
    }
}
