//! Query language compiler
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr      := or
//! or        := and (("||" | "or") and)*
//! and       := unary (("&&" | "and") unary)*
//! unary     := "!" unary | "(" expr ")" | predicate
//! predicate := field op value
//! op        := "=" | "==" | "!=" | "=~" | "!~"
//! ```
//!
//! `field` is one of `cat`, `test`, `name`, `class`, `method`, `namespace`,
//! `id`, or any other word, which is taken as a property name. Values are bare
//! words or quoted strings where `\<quote>` and `\\` are the only escapes.

use thiserror::Error;
use tracing::debug;

use super::{TestFilter, ValueMatcher};

/// Query text that could not be compiled
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuerySyntaxError {
    #[error("unbalanced parenthesis '{token}' at position {position}")]
    UnbalancedParenthesis { token: String, position: usize },

    #[error("unknown operator '{token}' at position {position}")]
    UnknownOperator { token: String, position: usize },

    #[error("expected a comparison operator after '{token}' at position {position}")]
    MissingOperator { token: String, position: usize },

    #[error("operator '{token}' at position {position} is missing an operand")]
    DanglingOperator { token: String, position: usize },

    #[error("unterminated quoted literal {token} at position {position}")]
    UnterminatedLiteral { token: String, position: usize },

    #[error("unexpected '{token}' at position {position}")]
    UnexpectedToken { token: String, position: usize },

    #[error("invalid regular expression {token} at position {position}: {reason}")]
    InvalidRegex {
        token: String,
        position: usize,
        reason: String,
    },
}

impl QuerySyntaxError {
    /// The offending token as written in the query
    pub fn token(&self) -> &str {
        match self {
            QuerySyntaxError::UnbalancedParenthesis { token, .. }
            | QuerySyntaxError::UnknownOperator { token, .. }
            | QuerySyntaxError::MissingOperator { token, .. }
            | QuerySyntaxError::DanglingOperator { token, .. }
            | QuerySyntaxError::UnterminatedLiteral { token, .. }
            | QuerySyntaxError::UnexpectedToken { token, .. }
            | QuerySyntaxError::InvalidRegex { token, .. } => token,
        }
    }

    /// Byte offset of the offending token
    pub fn position(&self) -> usize {
        match self {
            QuerySyntaxError::UnbalancedParenthesis { position, .. }
            | QuerySyntaxError::UnknownOperator { position, .. }
            | QuerySyntaxError::MissingOperator { position, .. }
            | QuerySyntaxError::DanglingOperator { position, .. }
            | QuerySyntaxError::UnterminatedLiteral { position, .. }
            | QuerySyntaxError::UnexpectedToken { position, .. }
            | QuerySyntaxError::InvalidRegex { position, .. } => *position,
        }
    }
}

/// Compile query text into a filter.
///
/// Blank text compiles to [`TestFilter::Empty`]. An outermost negation is
/// marked top-level so explicit tests stay excluded.
pub fn compile(text: &str) -> Result<TestFilter, QuerySyntaxError> {
    if text.trim().is_empty() {
        return Ok(TestFilter::Empty);
    }

    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let filter = parser.parse_or()?;

    let trailing = parser.peek();
    match trailing.kind {
        TokenKind::Eof => {}
        TokenKind::RParen => {
            return Err(QuerySyntaxError::UnbalancedParenthesis {
                token: trailing.text.clone(),
                position: trailing.position,
            })
        }
        _ => return Err(trailing.unexpected()),
    }

    debug!("Compiled query '{}' into {}", text, filter);
    Ok(filter.into_top_level())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CompareOp {
    Equal,
    NotEqual,
    Match,
    NotMatch,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum TokenKind {
    Word(String),
    Quoted(String),
    Compare(CompareOp),
    And,
    Or,
    Bang,
    LParen,
    RParen,
    Eof,
}

#[derive(Clone, Debug)]
struct Token {
    kind: TokenKind,
    text: String,
    position: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    fn is_and(&self) -> bool {
        self.kind == TokenKind::And || self.is_keyword("and")
    }

    fn is_or(&self) -> bool {
        self.kind == TokenKind::Or || self.is_keyword("or")
    }

    fn unexpected(&self) -> QuerySyntaxError {
        let token = if self.kind == TokenKind::Eof {
            "end of query".to_string()
        } else {
            self.text.clone()
        };
        QuerySyntaxError::UnexpectedToken {
            token,
            position: self.position,
        }
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '=' | '!' | '&' | '|' | '\'' | '"')
}

fn tokenize(text: &str) -> Result<Vec<Token>, QuerySyntaxError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        match c {
            '(' => {
                chars.next();
                tokens.push(Token::new(TokenKind::LParen, "(", pos));
            }
            ')' => {
                chars.next();
                tokens.push(Token::new(TokenKind::RParen, ")", pos));
            }
            '&' | '|' => {
                chars.next();
                if chars.peek().map(|&(_, n)| n) != Some(c) {
                    return Err(QuerySyntaxError::UnknownOperator {
                        token: c.to_string(),
                        position: pos,
                    });
                }
                chars.next();
                let (kind, symbol) = if c == '&' {
                    (TokenKind::And, "&&")
                } else {
                    (TokenKind::Or, "||")
                };
                tokens.push(Token::new(kind, symbol, pos));
            }
            '=' => {
                chars.next();
                let (op, symbol) = match chars.peek().map(|&(_, n)| n) {
                    Some('=') => (CompareOp::Equal, "=="),
                    Some('~') => (CompareOp::Match, "=~"),
                    _ => (CompareOp::Equal, "="),
                };
                if symbol.len() == 2 {
                    chars.next();
                }
                tokens.push(Token::new(TokenKind::Compare(op), symbol, pos));
            }
            '!' => {
                chars.next();
                let token = match chars.peek().map(|&(_, n)| n) {
                    Some('=') => Token::new(TokenKind::Compare(CompareOp::NotEqual), "!=", pos),
                    Some('~') => Token::new(TokenKind::Compare(CompareOp::NotMatch), "!~", pos),
                    _ => Token::new(TokenKind::Bang, "!", pos),
                };
                if token.text.len() == 2 {
                    chars.next();
                }
                tokens.push(token);
            }
            '\'' | '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;

                while let Some((_, ch)) = chars.next() {
                    if ch == '\\' {
                        match chars.peek() {
                            Some(&(_, next)) if next == c || next == '\\' => {
                                value.push(next);
                                chars.next();
                            }
                            _ => value.push('\\'),
                        }
                    } else if ch == c {
                        closed = true;
                        break;
                    } else {
                        value.push(ch);
                    }
                }

                let end = chars.peek().map(|&(i, _)| i).unwrap_or(text.len());
                if !closed {
                    return Err(QuerySyntaxError::UnterminatedLiteral {
                        token: text[pos..end].to_string(),
                        position: pos,
                    });
                }
                tokens.push(Token::new(TokenKind::Quoted(value), &text[pos..end], pos));
            }
            _ => {
                let mut end = pos;
                while let Some(&(i, ch)) = chars.peek() {
                    if is_delimiter(ch) {
                        break;
                    }
                    end = i + ch.len_utf8();
                    chars.next();
                }
                let word = &text[pos..end];
                tokens.push(Token::new(TokenKind::Word(word.to_string()), word, pos));
            }
        }
    }

    tokens.push(Token::new(TokenKind::Eof, "", text.len()));
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    /// Fails when `op` is followed by something that cannot start an operand
    fn expect_operand(&self, op: &Token) -> Result<(), QuerySyntaxError> {
        let next = self.peek();
        let dangling = matches!(
            next.kind,
            TokenKind::Eof | TokenKind::RParen | TokenKind::And | TokenKind::Or
        ) || next.is_and()
            || next.is_or();

        if dangling {
            return Err(QuerySyntaxError::DanglingOperator {
                token: op.text.clone(),
                position: op.position,
            });
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<TestFilter, QuerySyntaxError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek().is_or() {
            let op = self.advance();
            self.expect_operand(&op)?;
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            TestFilter::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<TestFilter, QuerySyntaxError> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek().is_and() {
            let op = self.advance();
            self.expect_operand(&op)?;
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            TestFilter::And(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<TestFilter, QuerySyntaxError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Bang => {
                self.advance();
                self.expect_operand(&token)?;
                Ok(TestFilter::not(self.parse_unary()?))
            }
            TokenKind::LParen => {
                self.advance();
                if self.peek().kind == TokenKind::Eof {
                    return Err(QuerySyntaxError::UnbalancedParenthesis {
                        token: token.text,
                        position: token.position,
                    });
                }
                let inner = self.parse_or()?;
                if self.peek().kind != TokenKind::RParen {
                    return Err(QuerySyntaxError::UnbalancedParenthesis {
                        token: token.text,
                        position: token.position,
                    });
                }
                self.advance();
                Ok(inner)
            }
            TokenKind::RParen => Err(QuerySyntaxError::UnbalancedParenthesis {
                token: token.text,
                position: token.position,
            }),
            TokenKind::And | TokenKind::Or => Err(QuerySyntaxError::DanglingOperator {
                token: token.text,
                position: token.position,
            }),
            TokenKind::Word(_) => self.parse_predicate(),
            _ => Err(token.unexpected()),
        }
    }

    fn parse_predicate(&mut self) -> Result<TestFilter, QuerySyntaxError> {
        let field = self.advance();
        let op_token = self.peek().clone();

        let op = match op_token.kind {
            TokenKind::Compare(op) => {
                self.advance();
                op
            }
            TokenKind::Word(_) => {
                return Err(QuerySyntaxError::UnknownOperator {
                    token: op_token.text,
                    position: op_token.position,
                })
            }
            _ => {
                return Err(QuerySyntaxError::MissingOperator {
                    token: field.text,
                    position: field.position,
                })
            }
        };

        let value_token = self.peek().clone();
        let value = match &value_token.kind {
            TokenKind::Word(v) | TokenKind::Quoted(v) => v.clone(),
            _ => {
                return Err(QuerySyntaxError::DanglingOperator {
                    token: op_token.text,
                    position: op_token.position,
                })
            }
        };
        self.advance();

        let matcher = match op {
            CompareOp::Equal | CompareOp::NotEqual => ValueMatcher::literal(value),
            CompareOp::Match | CompareOp::NotMatch => {
                ValueMatcher::regex(value).map_err(|e| QuerySyntaxError::InvalidRegex {
                    token: value_token.text.clone(),
                    position: value_token.position,
                    reason: e.to_string(),
                })?
            }
        };

        let predicate = field_filter(&field.text, matcher);
        Ok(match op {
            CompareOp::NotEqual | CompareOp::NotMatch => TestFilter::not(predicate),
            CompareOp::Equal | CompareOp::Match => predicate,
        })
    }
}

fn field_filter(field: &str, matcher: ValueMatcher) -> TestFilter {
    match field {
        "cat" => TestFilter::Category(matcher),
        "test" => TestFilter::FullName(matcher),
        "name" => TestFilter::Name(matcher),
        "class" => TestFilter::Class(matcher),
        "method" => TestFilter::Method(matcher),
        "namespace" => TestFilter::Namespace(matcher),
        "id" => TestFilter::Id(matcher),
        property => TestFilter::Property {
            name: property.to_string(),
            matcher,
        },
    }
}
