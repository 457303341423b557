use super::{ExpressionError, ExpressionErrorKind};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Str(String),
    Int(i64),
    Float(f64),
    Ident(String),
    Hash,
    Dot,
    SafeDot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
    Elvis,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Token::Str(s) => return write!(f, "string '{s}'"),
            Token::Int(i) => return write!(f, "number {i}"),
            Token::Float(x) => return write!(f, "number {x}"),
            Token::Ident(name) => return write!(f, "'{name}'"),
            Token::Hash => "'#'",
            Token::Dot => "'.'",
            Token::SafeDot => "'?.'",
            Token::LBracket => "'['",
            Token::RBracket => "']'",
            Token::LParen => "'('",
            Token::RParen => "')'",
            Token::Comma => "','",
            Token::Question => "'?'",
            Token::Colon => "':'",
            Token::Elvis => "'?:'",
            Token::Plus => "'+'",
            Token::Minus => "'-'",
            Token::Star => "'*'",
            Token::Slash => "'/'",
            Token::Percent => "'%'",
            Token::Bang => "'!'",
            Token::EqEq => "'=='",
            Token::NotEq => "'!='",
            Token::Lt => "'<'",
            Token::Le => "'<='",
            Token::Gt => "'>'",
            Token::Ge => "'>='",
            Token::AndAnd => "'&&'",
            Token::OrOr => "'||'",
            Token::Eof => "end of expression",
        };
        f.write_str(s)
    }
}

/// Split an expression into tokens paired with their byte offset.
pub(crate) fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let token = match c {
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        // a doubled quote is an escaped quote
                        Some((_, q)) if q == c => {
                            if matches!(chars.peek(), Some(&(_, n)) if n == c) {
                                chars.next();
                                text.push(c);
                            } else {
                                break;
                            }
                        }
                        Some((_, ch)) => text.push(ch),
                        None => {
                            return Err(ExpressionError::new(
                                ExpressionErrorKind::UnterminatedString,
                                source,
                                pos,
                            ));
                        }
                    }
                }
                tokens.push((Token::Str(text), pos));
                continue;
            }
            c if c.is_ascii_digit() => {
                let mut end = pos;
                let mut is_float = false;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_digit() {
                        end = i + 1;
                        chars.next();
                    } else if d == '.' && !is_float && next_is_digit(source, i) {
                        is_float = true;
                        end = i + 1;
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &source[pos..end];
                let token = if is_float {
                    text.parse().map(Token::Float).ok()
                } else {
                    text.parse().map(Token::Int).ok()
                };
                let token = token.ok_or_else(|| {
                    let kind = ExpressionErrorKind::InvalidNumber(text.to_owned());
                    ExpressionError::new(kind, source, pos)
                })?;
                tokens.push((token, pos));
                continue;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut end = pos;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == '$' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Ident(source[pos..end].to_owned()), pos));
                continue;
            }
            _ => {
                chars.next();
                let next = chars.peek().map(|&(_, n)| n);
                let (token, width) = match (c, next) {
                    ('?', Some('.')) => (Token::SafeDot, 2),
                    ('?', Some(':')) => (Token::Elvis, 2),
                    ('=', Some('=')) => (Token::EqEq, 2),
                    ('!', Some('=')) => (Token::NotEq, 2),
                    ('<', Some('=')) => (Token::Le, 2),
                    ('>', Some('=')) => (Token::Ge, 2),
                    ('&', Some('&')) => (Token::AndAnd, 2),
                    ('|', Some('|')) => (Token::OrOr, 2),
                    ('?', _) => (Token::Question, 1),
                    (':', _) => (Token::Colon, 1),
                    ('#', _) => (Token::Hash, 1),
                    ('.', _) => (Token::Dot, 1),
                    ('[', _) => (Token::LBracket, 1),
                    (']', _) => (Token::RBracket, 1),
                    ('(', _) => (Token::LParen, 1),
                    (')', _) => (Token::RParen, 1),
                    (',', _) => (Token::Comma, 1),
                    ('+', _) => (Token::Plus, 1),
                    ('-', _) => (Token::Minus, 1),
                    ('*', _) => (Token::Star, 1),
                    ('/', _) => (Token::Slash, 1),
                    ('%', _) => (Token::Percent, 1),
                    ('!', _) => (Token::Bang, 1),
                    ('<', _) => (Token::Lt, 1),
                    ('>', _) => (Token::Gt, 1),
                    _ => {
                        return Err(ExpressionError::new(
                            ExpressionErrorKind::UnexpectedChar(c),
                            source,
                            pos,
                        ));
                    }
                };
                if width == 2 {
                    chars.next();
                }
                token
            }
        };
        tokens.push((token, pos));
    }

    tokens.push((Token::Eof, source.len()));
    Ok(tokens)
}

fn next_is_digit(source: &str, dot: usize) -> bool {
    source[dot + 1..].starts_with(|c: char| c.is_ascii_digit())
}
