// Filter expression parser
// Pratt parser over the token stream produced by `lexer::tokenize`

use thiserror::Error;

use crate::ast::{AssignOp, AstNode, BinaryOp, FuncDef, ObjectPatternEntry, Param, Pattern, StringPart};
use crate::lexer::{tokenize, Keyword, LexError, Span, StrPart, Token, TokenKind};
use crate::value::JValue;

/// Maximum nesting of sub-expressions accepted by the parser.
pub const MAX_NESTING: usize = 128;

/// Unary minus binds tighter than every binary operator.
const UNARY_BP: u8 = 95;

/// Object values stop at `,` but may contain anything tighter.
const OBJECT_VALUE_BP: u8 = 21;

/// Parser errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyntaxError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("unexpected {found} at {span}")]
    UnexpectedToken { found: String, span: Span },

    #[error("expected {expected}, found {found} at {span}")]
    Expected {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("unclosed '{delimiter}' opened at {span}")]
    Unclosed { delimiter: char, span: Span },

    #[error("reserved word '{word}' cannot be used as a name at {span}")]
    ReservedWord { word: String, span: Span },

    #[error("empty filter")]
    Empty,

    #[error("operator {op} is non-associative; use parentheses at {span}")]
    NonAssociative { op: String, span: Span },

    #[error("expression nested deeper than {limit} levels at {span}")]
    TooDeep { limit: usize, span: Span },

    #[error("'{feature}' is not supported at {span}")]
    Unsupported { feature: String, span: Span },
}

/// What an infix token builds.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Infix {
    Pipe,
    Comma,
    Alternative,
    Binary(BinaryOp),
    Assign(AssignOp),
}

impl Infix {
    fn is_comparison(&self) -> bool {
        matches!(
            self,
            Infix::Binary(
                BinaryOp::Equal
                    | BinaryOp::NotEqual
                    | BinaryOp::LessThan
                    | BinaryOp::LessThanOrEqual
                    | BinaryOp::GreaterThan
                    | BinaryOp::GreaterThanOrEqual
            )
        )
    }

    fn is_assignment(&self) -> bool {
        matches!(self, Infix::Assign(_))
    }
}

/// Parser for filter expressions using Pratt parsing
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    fn with_depth(tokens: Vec<Token>, depth: usize) -> Self {
        Parser {
            tokens,
            position: 0,
            depth,
        }
    }

    fn current(&self) -> &Token {
        // The stream always ends with Eof and we never advance past it.
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_kind(&self, offset: usize) -> &TokenKind {
        let idx = (self.position + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn span(&self) -> Span {
        self.current().span
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if token.kind != TokenKind::Eof {
            self.position += 1;
        }
        token
    }

    fn unexpected(&self) -> SyntaxError {
        SyntaxError::UnexpectedToken {
            found: self.kind().to_string(),
            span: self.span(),
        }
    }

    fn expected(&self, expected: &str) -> SyntaxError {
        SyntaxError::Expected {
            expected: expected.to_string(),
            found: self.kind().to_string(),
            span: self.span(),
        }
    }

    fn expect(&mut self, expected: TokenKind, description: &str) -> Result<(), SyntaxError> {
        if *self.kind() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.expected(description))
        }
    }

    /// Expect the token closing a delimiter opened at `open`.
    fn expect_closing(&mut self, closing: TokenKind, delimiter: char, open: Span) -> Result<(), SyntaxError> {
        if *self.kind() == closing {
            self.advance();
            Ok(())
        } else if *self.kind() == TokenKind::Eof {
            Err(SyntaxError::Unclosed { delimiter, span: open })
        } else {
            Err(self.expected(&closing.to_string()))
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<(), SyntaxError> {
        if *self.kind() == TokenKind::Keyword(kw) {
            self.advance();
            Ok(())
        } else {
            Err(self.expected(&format!("'{}'", kw.as_str())))
        }
    }

    /// Get the binding power (precedence) for the current token
    ///
    /// Returns (left_bp, right_bp); left > right means right-associative.
    fn binding_power(token: &TokenKind) -> Option<(u8, u8, Infix)> {
        Some(match token {
            TokenKind::Pipe => (11, 10, Infix::Pipe),
            TokenKind::Comma => (20, 21, Infix::Comma),
            TokenKind::Alternative => (31, 30, Infix::Alternative),
            TokenKind::Assign => (40, 41, Infix::Assign(AssignOp::Set)),
            TokenKind::UpdateAssign => (40, 41, Infix::Assign(AssignOp::Update)),
            TokenKind::AddAssign => (40, 41, Infix::Assign(AssignOp::Arithmetic(BinaryOp::Add))),
            TokenKind::SubAssign => (40, 41, Infix::Assign(AssignOp::Arithmetic(BinaryOp::Subtract))),
            TokenKind::MulAssign => (40, 41, Infix::Assign(AssignOp::Arithmetic(BinaryOp::Multiply))),
            TokenKind::DivAssign => (40, 41, Infix::Assign(AssignOp::Arithmetic(BinaryOp::Divide))),
            TokenKind::ModAssign => (40, 41, Infix::Assign(AssignOp::Arithmetic(BinaryOp::Modulo))),
            TokenKind::AltAssign => (40, 41, Infix::Assign(AssignOp::Alternative)),
            TokenKind::Keyword(Keyword::Or) => (50, 51, Infix::Binary(BinaryOp::Or)),
            TokenKind::Keyword(Keyword::And) => (60, 61, Infix::Binary(BinaryOp::And)),
            TokenKind::Eq => (70, 71, Infix::Binary(BinaryOp::Equal)),
            TokenKind::Ne => (70, 71, Infix::Binary(BinaryOp::NotEqual)),
            TokenKind::Lt => (70, 71, Infix::Binary(BinaryOp::LessThan)),
            TokenKind::Le => (70, 71, Infix::Binary(BinaryOp::LessThanOrEqual)),
            TokenKind::Gt => (70, 71, Infix::Binary(BinaryOp::GreaterThan)),
            TokenKind::Ge => (70, 71, Infix::Binary(BinaryOp::GreaterThanOrEqual)),
            TokenKind::Plus => (80, 81, Infix::Binary(BinaryOp::Add)),
            TokenKind::Minus => (80, 81, Infix::Binary(BinaryOp::Subtract)),
            TokenKind::Star => (90, 91, Infix::Binary(BinaryOp::Multiply)),
            TokenKind::Slash => (90, 91, Infix::Binary(BinaryOp::Divide)),
            TokenKind::Percent => (90, 91, Infix::Binary(BinaryOp::Modulo)),
            _ => return None,
        })
    }

    /// Parse an expression with Pratt parsing
    fn parse_expression(&mut self, min_bp: u8) -> Result<AstNode, SyntaxError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(SyntaxError::TooDeep {
                limit: MAX_NESTING,
                span: self.span(),
            });
        }
        let result = self.parse_expression_inner(min_bp);
        self.depth -= 1;
        result
    }

    fn parse_expression_inner(&mut self, min_bp: u8) -> Result<AstNode, SyntaxError> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let (left_bp, right_bp, infix) = match Self::binding_power(self.kind()) {
                Some(bp) => bp,
                None => break,
            };
            if left_bp < min_bp {
                break;
            }

            let op_token = self.advance();
            let rhs = self.parse_expression(right_bp)?;

            lhs = match infix {
                Infix::Pipe => AstNode::Pipe {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                Infix::Comma => AstNode::Comma {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                Infix::Alternative => AstNode::Alternative {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                Infix::Binary(op) => AstNode::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                Infix::Assign(op) => AstNode::Assign {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };

            // `a < b < c` and `.a = .b = 1` need explicit grouping
            if let Some((_, _, next)) = Self::binding_power(self.kind()) {
                if (infix.is_comparison() && next.is_comparison())
                    || (infix.is_assignment() && next.is_assignment())
                {
                    return Err(SyntaxError::NonAssociative {
                        op: format!("{} after {}", self.kind(), op_token.kind),
                        span: self.span(),
                    });
                }
            }
        }

        Ok(lhs)
    }

    /// Prefix forms whose body extends as far right as possible,
    /// plus unary minus and `term as $x | body`.
    fn parse_prefix(&mut self) -> Result<AstNode, SyntaxError> {
        match self.kind().clone() {
            TokenKind::Keyword(Keyword::Def) => {
                let def = self.parse_funcdef()?;
                let rest = self.parse_expression(0)?;
                Ok(AstNode::FuncDef {
                    def,
                    rest: Box::new(rest),
                })
            }
            TokenKind::Keyword(Keyword::Label) => {
                self.advance();
                let name = match self.kind().clone() {
                    TokenKind::Variable(name) => {
                        self.advance();
                        name
                    }
                    _ => return Err(self.expected("label name '$name'")),
                };
                self.expect(TokenKind::Pipe, "'|'")?;
                let body = self.parse_expression(0)?;
                Ok(AstNode::Label {
                    name,
                    body: Box::new(body),
                })
            }
            TokenKind::Keyword(kw @ (Keyword::Import | Keyword::Include)) => Err(SyntaxError::Unsupported {
                feature: kw.as_str().to_string(),
                span: self.span(),
            }),
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_expression(UNARY_BP)?;
                Ok(match operand {
                    AstNode::Literal(JValue::Number(n)) => AstNode::Literal(JValue::Number(-n)),
                    other => AstNode::Negate(Box::new(other)),
                })
            }
            _ => {
                let term = self.parse_postfix()?;
                if *self.kind() == TokenKind::Keyword(Keyword::As) {
                    self.advance();
                    let pattern = self.parse_pattern()?;
                    self.reject_destructuring_alternative()?;
                    self.expect(TokenKind::Pipe, "'|'")?;
                    let body = self.parse_expression(0)?;
                    Ok(AstNode::Bind {
                        source: Box::new(term),
                        pattern,
                        body: Box::new(body),
                    })
                } else {
                    Ok(term)
                }
            }
        }
    }

    fn reject_destructuring_alternative(&self) -> Result<(), SyntaxError> {
        if *self.kind() == TokenKind::Question && *self.peek_kind(1) == TokenKind::Alternative {
            return Err(SyntaxError::Unsupported {
                feature: "?//".to_string(),
                span: self.span(),
            });
        }
        Ok(())
    }

    /// A term followed by any number of suffixes: `.a`, `."a"`, `[e]`, `[]`,
    /// `[a:b]`, `?`.
    fn parse_postfix(&mut self) -> Result<AstNode, SyntaxError> {
        let mut lhs = self.parse_term()?;

        loop {
            match self.kind().clone() {
                TokenKind::Field(name) => {
                    self.advance();
                    lhs = AstNode::field(lhs, name);
                }
                TokenKind::Dot if matches!(self.peek_kind(1), TokenKind::Str(_)) => {
                    self.advance();
                    let key = self.parse_string_token(None)?;
                    lhs = AstNode::Index {
                        base: Box::new(lhs),
                        index: Box::new(key),
                    };
                }
                TokenKind::Dot if *self.peek_kind(1) == TokenKind::LeftBracket => {
                    self.advance();
                    lhs = self.parse_bracket_suffix(lhs)?;
                }
                TokenKind::LeftBracket => {
                    lhs = self.parse_bracket_suffix(lhs)?;
                }
                TokenKind::Question => {
                    self.advance();
                    lhs = AstNode::Optional(Box::new(lhs));
                }
                _ => break,
            }
        }

        Ok(lhs)
    }

    /// `[]`, `[e]`, `[e:]`, `[:e]`, `[e:e]` applied to `base`.
    fn parse_bracket_suffix(&mut self, base: AstNode) -> Result<AstNode, SyntaxError> {
        let open = self.span();
        self.advance(); // skip '['
        let base = Box::new(base);

        if *self.kind() == TokenKind::RightBracket {
            self.advance();
            return Ok(AstNode::Iterate { base });
        }

        if *self.kind() == TokenKind::Colon {
            self.advance();
            let to = self.parse_expression(0)?;
            self.expect_closing(TokenKind::RightBracket, '[', open)?;
            return Ok(AstNode::Slice {
                base,
                from: None,
                to: Some(Box::new(to)),
            });
        }

        let index = self.parse_expression(0)?;
        if *self.kind() == TokenKind::Colon {
            self.advance();
            let to = if *self.kind() == TokenKind::RightBracket {
                None
            } else {
                Some(Box::new(self.parse_expression(0)?))
            };
            self.expect_closing(TokenKind::RightBracket, '[', open)?;
            return Ok(AstNode::Slice {
                base,
                from: Some(Box::new(index)),
                to,
            });
        }

        self.expect_closing(TokenKind::RightBracket, '[', open)?;
        Ok(AstNode::Index {
            base,
            index: Box::new(index),
        })
    }

    /// Parse a primary expression (literals, paths, calls, constructors, grouping)
    fn parse_term(&mut self) -> Result<AstNode, SyntaxError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(AstNode::Literal(JValue::Number(n)))
            }
            TokenKind::Str(_) => self.parse_string_token(None),
            TokenKind::Format(name) => {
                self.advance();
                if matches!(self.kind(), TokenKind::Str(_)) {
                    self.parse_string_token(Some(name))
                } else {
                    Ok(AstNode::Format(name))
                }
            }
            TokenKind::Dot => {
                self.advance();
                if matches!(self.kind(), TokenKind::Str(_)) {
                    let key = self.parse_string_token(None)?;
                    return Ok(AstNode::Index {
                        base: Box::new(AstNode::Identity),
                        index: Box::new(key),
                    });
                }
                Ok(AstNode::Identity)
            }
            TokenKind::Field(name) => {
                self.advance();
                Ok(AstNode::field(AstNode::Identity, name))
            }
            TokenKind::DotDot => {
                self.advance();
                Ok(AstNode::RecurseDefault)
            }
            TokenKind::Variable(name) => {
                self.advance();
                if name == "__loc__" {
                    Ok(AstNode::Location {
                        line: token.span.line,
                    })
                } else {
                    Ok(AstNode::Variable(name))
                }
            }
            TokenKind::Ident(name) => {
                self.advance();
                self.parse_identifier(name)
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression(0)?;
                self.expect_closing(TokenKind::RightParen, '(', token.span)?;
                Ok(inner)
            }
            TokenKind::LeftBracket => {
                self.advance();
                if *self.kind() == TokenKind::RightBracket {
                    self.advance();
                    return Ok(AstNode::Array(None));
                }
                let inner = self.parse_expression(0)?;
                self.expect_closing(TokenKind::RightBracket, '[', token.span)?;
                Ok(AstNode::Array(Some(Box::new(inner))))
            }
            TokenKind::LeftBrace => self.parse_object(),
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::Try) => {
                self.advance();
                let body = self.parse_postfix()?;
                let handler = if *self.kind() == TokenKind::Keyword(Keyword::Catch) {
                    self.advance();
                    Some(Box::new(self.parse_postfix()?))
                } else {
                    None
                };
                Ok(AstNode::Try {
                    body: Box::new(body),
                    handler,
                })
            }
            TokenKind::Keyword(Keyword::Reduce) => {
                self.advance();
                let source = self.parse_postfix()?;
                self.expect_keyword(Keyword::As)?;
                let pattern = self.parse_pattern()?;
                let open = self.span();
                self.expect(TokenKind::LeftParen, "'('")?;
                let init = self.parse_expression(0)?;
                self.expect(TokenKind::Semicolon, "';'")?;
                let update = self.parse_expression(0)?;
                self.expect_closing(TokenKind::RightParen, '(', open)?;
                Ok(AstNode::Reduce {
                    source: Box::new(source),
                    pattern,
                    init: Box::new(init),
                    update: Box::new(update),
                })
            }
            TokenKind::Keyword(Keyword::Foreach) => {
                self.advance();
                let source = self.parse_postfix()?;
                self.expect_keyword(Keyword::As)?;
                let pattern = self.parse_pattern()?;
                let open = self.span();
                self.expect(TokenKind::LeftParen, "'('")?;
                let init = self.parse_expression(0)?;
                self.expect(TokenKind::Semicolon, "';'")?;
                let update = self.parse_expression(0)?;
                let extract = if *self.kind() == TokenKind::Semicolon {
                    self.advance();
                    Some(Box::new(self.parse_expression(0)?))
                } else {
                    None
                };
                self.expect_closing(TokenKind::RightParen, '(', open)?;
                Ok(AstNode::Foreach {
                    source: Box::new(source),
                    pattern,
                    init: Box::new(init),
                    update: Box::new(update),
                    extract,
                })
            }
            TokenKind::Keyword(kw @ (Keyword::Import | Keyword::Include)) => Err(SyntaxError::Unsupported {
                feature: kw.as_str().to_string(),
                span: token.span,
            }),
            TokenKind::Keyword(Keyword::Def | Keyword::Label) | TokenKind::Minus => {
                // Allowed wherever a term is, e.g. after `reduce` or `try`
                self.parse_prefix()
            }
            TokenKind::Eof => Err(SyntaxError::Expected {
                expected: "an expression".to_string(),
                found: token.kind.to_string(),
                span: token.span,
            }),
            _ => Err(self.unexpected()),
        }
    }

    /// `true`, `false`, `null`, `break $l`, `name` and `name(a; b)`.
    fn parse_identifier(&mut self, name: String) -> Result<AstNode, SyntaxError> {
        match name.as_str() {
            "true" => return Ok(AstNode::Literal(JValue::Bool(true))),
            "false" => return Ok(AstNode::Literal(JValue::Bool(false))),
            "null" => return Ok(AstNode::Literal(JValue::Null)),
            "break" => {
                if let TokenKind::Variable(label) = self.kind().clone() {
                    self.advance();
                    return Ok(AstNode::Break(label));
                }
            }
            _ => {}
        }

        let mut args = Vec::new();
        if *self.kind() == TokenKind::LeftParen {
            let open = self.span();
            self.advance();
            loop {
                args.push(self.parse_expression(0)?);
                if *self.kind() == TokenKind::Semicolon {
                    self.advance();
                    continue;
                }
                self.expect_closing(TokenKind::RightParen, '(', open)?;
                break;
            }
        }
        Ok(AstNode::Function { name, args })
    }

    /// Turn a string token into a literal or an interpolated format string.
    fn parse_string_token(&mut self, format: Option<String>) -> Result<AstNode, SyntaxError> {
        let parts = match self.advance().kind {
            TokenKind::Str(parts) => parts,
            _ => return Err(self.expected("string literal")),
        };

        let interpolated = parts.iter().any(|p| matches!(p, StrPart::Interp(_)));
        if !interpolated && format.is_none() {
            let text: String = parts
                .into_iter()
                .map(|p| match p {
                    StrPart::Literal(s) => s,
                    StrPart::Interp(_) => String::new(),
                })
                .collect();
            return Ok(AstNode::Literal(JValue::string(text)));
        }

        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                StrPart::Literal(s) => out.push(StringPart::Literal(s)),
                StrPart::Interp(tokens) => {
                    let mut sub = Parser::with_depth(tokens, self.depth);
                    if *sub.kind() == TokenKind::Eof {
                        return Err(SyntaxError::Expected {
                            expected: "an expression inside \\( )".to_string(),
                            found: sub.kind().to_string(),
                            span: sub.span(),
                        });
                    }
                    let expr = sub.parse_expression(0)?;
                    if *sub.kind() != TokenKind::Eof {
                        return Err(sub.expected("')'"));
                    }
                    out.push(StringPart::Expr(expr));
                }
            }
        }
        Ok(AstNode::FormatString { format, parts: out })
    }

    fn parse_if(&mut self) -> Result<AstNode, SyntaxError> {
        let open = self.span();
        self.advance(); // skip 'if'
        let mut branches = Vec::new();
        let cond = self.parse_expression(0)?;
        self.expect_keyword(Keyword::Then)?;
        let body = self.parse_expression(0)?;
        branches.push((cond, body));

        let mut otherwise = None;
        loop {
            match self.kind() {
                TokenKind::Keyword(Keyword::Elif) => {
                    self.advance();
                    let cond = self.parse_expression(0)?;
                    self.expect_keyword(Keyword::Then)?;
                    let body = self.parse_expression(0)?;
                    branches.push((cond, body));
                }
                TokenKind::Keyword(Keyword::Else) => {
                    self.advance();
                    otherwise = Some(Box::new(self.parse_expression(0)?));
                    break;
                }
                _ => break,
            }
        }

        if *self.kind() == TokenKind::Eof {
            return Err(SyntaxError::Expected {
                expected: "'end' closing 'if'".to_string(),
                found: self.kind().to_string(),
                span: open,
            });
        }
        self.expect_keyword(Keyword::End)?;
        Ok(AstNode::If {
            branches,
            otherwise,
        })
    }

    fn parse_object(&mut self) -> Result<AstNode, SyntaxError> {
        let open = self.span();
        self.advance(); // skip '{'
        let mut entries = Vec::new();

        if *self.kind() == TokenKind::RightBrace {
            self.advance();
            return Ok(AstNode::Object(entries));
        }

        loop {
            let key_token = self.current().clone();
            let entry = match key_token.kind {
                TokenKind::Variable(name) => {
                    self.advance();
                    if name == "__loc__" {
                        (
                            AstNode::literal("__loc__"),
                            AstNode::Location {
                                line: key_token.span.line,
                            },
                        )
                    } else {
                        (AstNode::literal(name.as_str()), AstNode::Variable(name))
                    }
                }
                TokenKind::Ident(name) => {
                    self.advance();
                    self.parse_object_entry_value(AstNode::literal(name))?
                }
                TokenKind::Keyword(kw) => {
                    self.advance();
                    self.parse_object_entry_value(AstNode::literal(kw.as_str()))?
                }
                TokenKind::Number(n) => {
                    return Err(SyntaxError::Expected {
                        expected: "object key".to_string(),
                        found: format!("number {}", n),
                        span: key_token.span,
                    });
                }
                TokenKind::Str(_) => {
                    let key = self.parse_string_token(None)?;
                    self.parse_object_entry_value(key)?
                }
                TokenKind::Format(name) => {
                    self.advance();
                    let key = self.parse_string_token(Some(name))?;
                    self.parse_object_entry_value(key)?
                }
                TokenKind::LeftParen => {
                    self.advance();
                    let key = self.parse_expression(0)?;
                    self.expect_closing(TokenKind::RightParen, '(', key_token.span)?;
                    self.expect(TokenKind::Colon, "':'")?;
                    let value = self.parse_object_value()?;
                    (key, value)
                }
                TokenKind::Eof => return Err(SyntaxError::Unclosed { delimiter: '{', span: open }),
                _ => return Err(self.expected("object key")),
            };
            entries.push(entry);

            match self.kind() {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RightBrace => {
                    self.advance();
                    return Ok(AstNode::Object(entries));
                }
                TokenKind::Eof => return Err(SyntaxError::Unclosed { delimiter: '{', span: open }),
                _ => return Err(self.expected("',' or '}'")),
            }
        }
    }

    /// After a key: either `: value` or the `{key}` shorthand for `{key: .key}`.
    fn parse_object_entry_value(&mut self, key: AstNode) -> Result<(AstNode, AstNode), SyntaxError> {
        if *self.kind() == TokenKind::Colon {
            self.advance();
            let value = self.parse_object_value()?;
            Ok((key, value))
        } else {
            let value = AstNode::Index {
                base: Box::new(AstNode::Identity),
                index: Box::new(key.clone()),
            };
            Ok((key, value))
        }
    }

    /// Object values are pipelines of anything binding tighter than `,`.
    fn parse_object_value(&mut self) -> Result<AstNode, SyntaxError> {
        let mut value = self.parse_expression(OBJECT_VALUE_BP)?;
        while *self.kind() == TokenKind::Pipe {
            self.advance();
            let rhs = self.parse_expression(OBJECT_VALUE_BP)?;
            value = AstNode::pipe(value, rhs);
        }
        Ok(value)
    }

    fn parse_funcdef(&mut self) -> Result<FuncDef, SyntaxError> {
        self.advance(); // skip 'def'
        let name = match self.kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                name
            }
            TokenKind::Keyword(kw) => {
                return Err(SyntaxError::ReservedWord {
                    word: kw.as_str().to_string(),
                    span: self.span(),
                })
            }
            _ => return Err(self.expected("function name")),
        };

        let mut params = Vec::new();
        if *self.kind() == TokenKind::LeftParen {
            let open = self.span();
            self.advance();
            loop {
                match self.kind().clone() {
                    TokenKind::Ident(p) => params.push(Param::Filter(p)),
                    TokenKind::Variable(p) => params.push(Param::Value(p)),
                    TokenKind::Keyword(kw) => {
                        return Err(SyntaxError::ReservedWord {
                            word: kw.as_str().to_string(),
                            span: self.span(),
                        })
                    }
                    _ => return Err(self.expected("parameter name")),
                }
                self.advance();
                if *self.kind() == TokenKind::Semicolon {
                    self.advance();
                    continue;
                }
                self.expect_closing(TokenKind::RightParen, '(', open)?;
                break;
            }
        }

        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_expression(0)?;
        self.expect(TokenKind::Semicolon, "';' after function body")?;
        Ok(FuncDef {
            name,
            params,
            body: Box::new(body),
        })
    }

    fn parse_pattern(&mut self) -> Result<Pattern, SyntaxError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Variable(name) => {
                self.advance();
                Ok(Pattern::Variable(name))
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut items = Vec::new();
                loop {
                    items.push(self.parse_pattern()?);
                    if *self.kind() == TokenKind::Comma {
                        self.advance();
                        continue;
                    }
                    self.expect_closing(TokenKind::RightBracket, '[', token.span)?;
                    break;
                }
                Ok(Pattern::Array(items))
            }
            TokenKind::LeftBrace => {
                self.advance();
                let mut entries = Vec::new();
                loop {
                    entries.push(self.parse_object_pattern_entry()?);
                    if *self.kind() == TokenKind::Comma {
                        self.advance();
                        continue;
                    }
                    self.expect_closing(TokenKind::RightBrace, '{', token.span)?;
                    break;
                }
                Ok(Pattern::Object(entries))
            }
            _ => Err(self.expected("'$name', '[' or '{' in pattern")),
        }
    }

    fn parse_object_pattern_entry(&mut self) -> Result<ObjectPatternEntry, SyntaxError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Variable(name) => {
                self.advance();
                let value = if *self.kind() == TokenKind::Colon {
                    self.advance();
                    Some(self.parse_pattern()?)
                } else {
                    None
                };
                Ok(ObjectPatternEntry {
                    key: AstNode::literal(name.as_str()),
                    bind: Some(name),
                    value,
                })
            }
            TokenKind::Ident(name) => {
                self.advance();
                self.expect(TokenKind::Colon, "':'")?;
                Ok(ObjectPatternEntry {
                    key: AstNode::literal(name),
                    bind: None,
                    value: Some(self.parse_pattern()?),
                })
            }
            TokenKind::Keyword(kw) => {
                self.advance();
                self.expect(TokenKind::Colon, "':'")?;
                Ok(ObjectPatternEntry {
                    key: AstNode::literal(kw.as_str()),
                    bind: None,
                    value: Some(self.parse_pattern()?),
                })
            }
            TokenKind::Str(_) => {
                let key = self.parse_string_token(None)?;
                self.expect(TokenKind::Colon, "':'")?;
                Ok(ObjectPatternEntry {
                    key,
                    bind: None,
                    value: Some(self.parse_pattern()?),
                })
            }
            TokenKind::LeftParen => {
                self.advance();
                let key = self.parse_expression(0)?;
                self.expect_closing(TokenKind::RightParen, '(', token.span)?;
                self.expect(TokenKind::Colon, "':'")?;
                Ok(ObjectPatternEntry {
                    key,
                    bind: None,
                    value: Some(self.parse_pattern()?),
                })
            }
            _ => Err(self.expected("object pattern entry")),
        }
    }

    /// Parse a complete filter; the whole token stream must be consumed.
    pub fn parse(&mut self) -> Result<AstNode, SyntaxError> {
        if *self.kind() == TokenKind::Eof {
            return Err(SyntaxError::Empty);
        }

        let ast = self.parse_expression(0)?;

        match self.kind() {
            TokenKind::Eof => Ok(ast),
            TokenKind::RightParen | TokenKind::RightBracket | TokenKind::RightBrace => Err(self.unexpected()),
            _ => Err(self.expected("end of filter")),
        }
    }
}

/// Parse a filter string into an AST
///
/// This is the main entry point for parsing.
pub fn parse(source: &str) -> Result<AstNode, SyntaxError> {
    let tokens = tokenize(source)?;
    parse_tokens(tokens)
}

/// Parse an already tokenized filter.
pub fn parse_tokens(tokens: Vec<Token>) -> Result<AstNode, SyntaxError> {
    if tokens.is_empty() {
        return Err(SyntaxError::Empty);
    }
    Parser::new(tokens).parse()
}
