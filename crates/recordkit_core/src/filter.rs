//! Where-clause and order-by parsing.
//!
//! Query text like `status = ? and total >= ?` is parsed into the engine's
//! filter AST. Values are only ever bound through positional `?`
//! placeholders, and every field name is checked against the entity's
//! registry before the query is built, so caller text never reaches a
//! statement unvalidated. The layer-managed columns `id`, `created` and
//! `changed` are always accepted; they are fixed identifiers, not caller
//! input.

use recordkit_engine::{CmpOp, Filter, Order};
use thiserror::Error;

use crate::registry::{FieldRegistry, RESERVED_FIELDS};

/// A structured where-clause or order-by parse failure.
#[derive(Debug, Error)]
pub enum FilterError {
    /// A character the lexer does not understand.
    #[error("unexpected character {ch:?} at offset {pos}")]
    UnexpectedChar {
        /// The offending character.
        ch: char,
        /// Byte offset in the input.
        pos: usize,
    },

    /// A token in the wrong place.
    #[error("unexpected {found:?} at offset {pos}")]
    UnexpectedToken {
        /// Token text as seen in the input.
        found: String,
        /// Byte offset in the input.
        pos: usize,
    },

    /// The clause ended mid-expression.
    #[error("unexpected end of clause")]
    UnexpectedEnd,

    /// A field not registered for the entity.
    #[error("{entity} has no field {field:?}")]
    UnknownField {
        /// Entity name.
        entity: &'static str,
        /// The unregistered field.
        field: String,
    },

    /// Placeholder count and supplied parameter count differ.
    #[error("clause has {placeholders} placeholders but {supplied} parameters were supplied")]
    ParamCount {
        /// Number of `?` placeholders in the clause.
        placeholders: usize,
        /// Number of parameters supplied by the caller.
        supplied: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Question,
    LParen,
    RParen,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

fn tokenize(text: &str) -> Result<Vec<Token>, FilterError> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let ch = bytes[i] as char;
        let pos = i;
        match ch {
            c if c.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            '?' => {
                tokens.push(Token {
                    kind: TokenKind::Question,
                    pos,
                });
                i += 1;
            }
            '(' => {
                tokens.push(Token {
                    kind: TokenKind::LParen,
                    pos,
                });
                i += 1;
            }
            ')' => {
                tokens.push(Token {
                    kind: TokenKind::RParen,
                    pos,
                });
                i += 1;
            }
            ',' => {
                tokens.push(Token {
                    kind: TokenKind::Comma,
                    pos,
                });
                i += 1;
            }
            '=' => {
                tokens.push(Token {
                    kind: TokenKind::Eq,
                    pos,
                });
                i += 1;
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token {
                        kind: TokenKind::Ne,
                        pos,
                    });
                    i += 2;
                } else {
                    return Err(FilterError::UnexpectedChar { ch: '!', pos });
                }
            }
            '<' => match bytes.get(i + 1) {
                Some(&b'=') => {
                    tokens.push(Token {
                        kind: TokenKind::Le,
                        pos,
                    });
                    i += 2;
                }
                Some(&b'>') => {
                    tokens.push(Token {
                        kind: TokenKind::Ne,
                        pos,
                    });
                    i += 2;
                }
                _ => {
                    tokens.push(Token {
                        kind: TokenKind::Lt,
                        pos,
                    });
                    i += 1;
                }
            },
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token {
                        kind: TokenKind::Ge,
                        pos,
                    });
                    i += 2;
                } else {
                    tokens.push(Token {
                        kind: TokenKind::Gt,
                        pos,
                    });
                    i += 1;
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(text[start..i].to_owned()),
                    pos,
                });
            }
            other => return Err(FilterError::UnexpectedChar { ch: other, pos }),
        }
    }
    Ok(tokens)
}

fn is_keyword(token: &TokenKind, word: &str) -> bool {
    matches!(token, TokenKind::Ident(s) if s.eq_ignore_ascii_case(word))
}

struct Parser<'a, T> {
    registry: &'a FieldRegistry<T>,
    tokens: Vec<Token>,
    index: usize,
    next_param: usize,
}

impl<'a, T> Parser<'a, T> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Result<Token, FilterError> {
        let token = self
            .tokens
            .get(self.index)
            .cloned()
            .ok_or(FilterError::UnexpectedEnd)?;
        self.index += 1;
        Ok(token)
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.peek().is_some_and(|t| is_keyword(&t.kind, word)) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), FilterError> {
        let token = self.next()?;
        if is_keyword(&token.kind, word) {
            Ok(())
        } else {
            Err(unexpected(&token))
        }
    }

    fn expect_placeholder(&mut self) -> Result<usize, FilterError> {
        let token = self.next()?;
        if token.kind == TokenKind::Question {
            let index = self.next_param;
            self.next_param += 1;
            Ok(index)
        } else {
            Err(unexpected(&token))
        }
    }

    fn validated_field(&self, token: &Token) -> Result<String, FilterError> {
        match &token.kind {
            TokenKind::Ident(name)
                if self.registry.contains(name) || RESERVED_FIELDS.contains(&name.as_str()) =>
            {
                Ok(name.clone())
            }
            TokenKind::Ident(name) => Err(FilterError::UnknownField {
                entity: self.registry.entity(),
                field: name.clone(),
            }),
            _ => Err(unexpected(token)),
        }
    }

    // or := and ("or" and)*
    fn or_expr(&mut self) -> Result<Filter, FilterError> {
        let mut parts = vec![self.and_expr()?];
        while self.eat_keyword("or") {
            parts.push(self.and_expr()?);
        }
        Ok(if parts.len() == 1 {
            parts.swap_remove(0)
        } else {
            Filter::Or(parts)
        })
    }

    // and := unary ("and" unary)*
    fn and_expr(&mut self) -> Result<Filter, FilterError> {
        let mut parts = vec![self.unary()?];
        while self.eat_keyword("and") {
            parts.push(self.unary()?);
        }
        Ok(if parts.len() == 1 {
            parts.swap_remove(0)
        } else {
            Filter::And(parts)
        })
    }

    // unary := "not" unary | primary
    fn unary(&mut self) -> Result<Filter, FilterError> {
        if self.eat_keyword("not") {
            Ok(Filter::Not(Box::new(self.unary()?)))
        } else {
            self.primary()
        }
    }

    // primary := "(" or ")" | field op "?" | field "like" "?"
    //          | field "is" ["not"] "null"
    fn primary(&mut self) -> Result<Filter, FilterError> {
        let token = self.next()?;
        if token.kind == TokenKind::LParen {
            let inner = self.or_expr()?;
            let close = self.next()?;
            return if close.kind == TokenKind::RParen {
                Ok(inner)
            } else {
                Err(unexpected(&close))
            };
        }

        let field = self.validated_field(&token)?;
        let op_token = self.next()?;
        let op = match &op_token.kind {
            TokenKind::Eq => CmpOp::Eq,
            TokenKind::Ne => CmpOp::Ne,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Le => CmpOp::Le,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::Ge => CmpOp::Ge,
            kind if is_keyword(kind, "like") => CmpOp::Like,
            kind if is_keyword(kind, "is") => {
                let negated = self.eat_keyword("not");
                self.expect_keyword("null")?;
                return Ok(Filter::IsNull { field, negated });
            }
            _ => return Err(unexpected(&op_token)),
        };
        let param = self.expect_placeholder()?;
        Ok(Filter::Cmp { field, op, param })
    }
}

fn unexpected(token: &Token) -> FilterError {
    let found = match &token.kind {
        TokenKind::Ident(s) => s.clone(),
        TokenKind::Question => "?".to_owned(),
        TokenKind::LParen => "(".to_owned(),
        TokenKind::RParen => ")".to_owned(),
        TokenKind::Comma => ",".to_owned(),
        TokenKind::Eq => "=".to_owned(),
        TokenKind::Ne => "!=".to_owned(),
        TokenKind::Lt => "<".to_owned(),
        TokenKind::Le => "<=".to_owned(),
        TokenKind::Gt => ">".to_owned(),
        TokenKind::Ge => ">=".to_owned(),
    };
    FilterError::UnexpectedToken {
        found,
        pos: token.pos,
    }
}

/// Parses a where-clause against an entity's registry.
///
/// `supplied` is the number of positional parameters the caller passed;
/// it must match the number of `?` placeholders in the clause.
pub fn parse_filter<T>(
    registry: &FieldRegistry<T>,
    clause: &str,
    supplied: usize,
) -> Result<Filter, FilterError> {
    let mut parser = Parser {
        registry,
        tokens: tokenize(clause)?,
        index: 0,
        next_param: 0,
    };
    let filter = parser.or_expr()?;
    if let Some(extra) = parser.peek() {
        return Err(unexpected(extra));
    }
    if parser.next_param != supplied {
        return Err(FilterError::ParamCount {
            placeholders: parser.next_param,
            supplied,
        });
    }
    Ok(filter)
}

/// Parses an order-by clause against an entity's registry.
///
/// A leading `order by` is accepted but not required (callers may pass
/// either `"name desc"` or `"order by name desc"`). Blank input yields no
/// ordering.
pub fn parse_order<T>(
    registry: &FieldRegistry<T>,
    clause: &str,
) -> Result<Vec<Order>, FilterError> {
    let mut parser = Parser {
        registry,
        tokens: tokenize(clause)?,
        index: 0,
        next_param: 0,
    };
    if parser.peek().is_none() {
        return Ok(Vec::new());
    }
    if parser.eat_keyword("order") {
        parser.expect_keyword("by")?;
    }
    let mut keys = Vec::new();
    loop {
        let token = parser.next()?;
        let field = parser.validated_field(&token)?;
        let descending = if parser.eat_keyword("desc") {
            true
        } else {
            // "asc" is the default and may be spelled out.
            parser.eat_keyword("asc");
            false
        };
        keys.push(Order { field, descending });
        match parser.peek() {
            None => break,
            Some(t) if t.kind == TokenKind::Comma => {
                parser.index += 1;
            }
            Some(t) => return Err(unexpected(t)),
        }
    }
    Ok(keys)
}
