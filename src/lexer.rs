// Filter lexer
// Turns filter source text into a flat token stream with source spans

use std::fmt;

use thiserror::Error;

/// Location of a token in the filter source.
///
/// `start`/`end` are byte offsets; `line` and `column` are 1-based and
/// point at the first character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Lexer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("unterminated string literal starting at {span}")]
    UnterminatedString { span: Span },

    #[error("invalid escape sequence '{sequence}' at {span}")]
    InvalidEscape { sequence: String, span: Span },

    #[error("invalid numeric literal '{text}' at {span}")]
    InvalidNumber { text: String, span: Span },

    #[error("unexpected character '{ch}' at {span}")]
    UnexpectedChar { ch: char, span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnterminatedString { span }
            | LexError::InvalidEscape { span, .. }
            | LexError::InvalidNumber { span, .. }
            | LexError::UnexpectedChar { span, .. } => *span,
        }
    }
}

/// Reserved words. They cannot be used as function names or bare identifiers,
/// though `.if`-style field access is still allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Def,
    If,
    Then,
    Elif,
    Else,
    End,
    As,
    Reduce,
    Foreach,
    Try,
    Catch,
    Label,
    Import,
    Include,
    And,
    Or,
}

impl Keyword {
    fn from_ident(s: &str) -> Option<Keyword> {
        Some(match s {
            "def" => Keyword::Def,
            "if" => Keyword::If,
            "then" => Keyword::Then,
            "elif" => Keyword::Elif,
            "else" => Keyword::Else,
            "end" => Keyword::End,
            "as" => Keyword::As,
            "reduce" => Keyword::Reduce,
            "foreach" => Keyword::Foreach,
            "try" => Keyword::Try,
            "catch" => Keyword::Catch,
            "label" => Keyword::Label,
            "import" => Keyword::Import,
            "include" => Keyword::Include,
            "and" => Keyword::And,
            "or" => Keyword::Or,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Def => "def",
            Keyword::If => "if",
            Keyword::Then => "then",
            Keyword::Elif => "elif",
            Keyword::Else => "else",
            Keyword::End => "end",
            Keyword::As => "as",
            Keyword::Reduce => "reduce",
            Keyword::Foreach => "foreach",
            Keyword::Try => "try",
            Keyword::Catch => "catch",
            Keyword::Label => "label",
            Keyword::Import => "import",
            Keyword::Include => "include",
            Keyword::And => "and",
            Keyword::Or => "or",
        }
    }
}

/// Piece of a string literal: literal text or an interpolated `\(...)` body.
#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Literal(String),
    /// Tokens of the interpolated expression, terminated by `Eof`.
    Interp(Vec<Token>),
}

/// Token types for the lexer
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals and names
    Ident(String),
    /// `.name` written without whitespace.
    Field(String),
    /// `$name`, stored without the sigil.
    Variable(String),
    /// `@name`, stored without the sigil.
    Format(String),
    Number(f64),
    Str(Vec<StrPart>),
    Keyword(Keyword),

    // Operators
    Pipe,
    Comma,
    Dot,
    DotDot,
    Question,
    Alternative,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    UpdateAssign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    AltAssign,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Colon,
    Semicolon,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Ident(n) => return write!(f, "'{}'", n),
            TokenKind::Field(n) => return write!(f, "'.{}'", n),
            TokenKind::Variable(n) => return write!(f, "'${}'", n),
            TokenKind::Format(n) => return write!(f, "'@{}'", n),
            TokenKind::Number(n) => return write!(f, "number {}", n),
            TokenKind::Str(_) => "string literal",
            TokenKind::Keyword(k) => return write!(f, "'{}'", k.as_str()),
            TokenKind::Pipe => "'|'",
            TokenKind::Comma => "','",
            TokenKind::Dot => "'.'",
            TokenKind::DotDot => "'..'",
            TokenKind::Question => "'?'",
            TokenKind::Alternative => "'//'",
            TokenKind::Eq => "'=='",
            TokenKind::Ne => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::Le => "'<='",
            TokenKind::Gt => "'>'",
            TokenKind::Ge => "'>='",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Percent => "'%'",
            TokenKind::Assign => "'='",
            TokenKind::UpdateAssign => "'|='",
            TokenKind::AddAssign => "'+='",
            TokenKind::SubAssign => "'-='",
            TokenKind::MulAssign => "'*='",
            TokenKind::DivAssign => "'/='",
            TokenKind::ModAssign => "'%='",
            TokenKind::AltAssign => "'//='",
            TokenKind::LeftParen => "'('",
            TokenKind::RightParen => "')'",
            TokenKind::LeftBracket => "'['",
            TokenKind::RightBracket => "']'",
            TokenKind::LeftBrace => "'{'",
            TokenKind::RightBrace => "'}'",
            TokenKind::Colon => "':'",
            TokenKind::Semicolon => "';'",
            TokenKind::Eof => "end of input",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Lexer for tokenizing filter expressions
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    byte_offset: usize,
    line: usize,
    column: usize,
}

#[inline]
fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

#[inline]
fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
            byte_offset: 0,
            line: 1,
            column: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current() {
            self.position += 1;
            self.byte_offset += ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn mark(&self) -> Span {
        Span {
            start: self.byte_offset,
            end: self.byte_offset,
            line: self.line,
            column: self.column,
        }
    }

    fn finish(&self, mut span: Span) -> Span {
        span.end = self.byte_offset;
        span
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '#' {
                while let Some(c) = self.current() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;
        while self.current().map_or(false, is_ident_char) {
            self.advance();
        }
        self.input[start..self.position].iter().collect()
    }

    fn read_number(&mut self, span: Span) -> Result<f64, LexError> {
        let start = self.position;

        while self.current().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }

        // Fractional part; `1.` is accepted, `.5` arrives here with the dot current
        if self.current() == Some('.') && self.peek(1) != Some('.') {
            self.advance();
            while self.current().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let mut valid = true;
        if matches!(self.current(), Some('e') | Some('E')) {
            self.advance();
            if matches!(self.current(), Some('+') | Some('-')) {
                self.advance();
            }
            if !self.current().map_or(false, |c| c.is_ascii_digit()) {
                valid = false;
            }
            while self.current().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        // `123abc` is one bad literal, not a number followed by a name
        while self.current().map_or(false, is_ident_char) {
            valid = false;
            self.advance();
        }

        let text: String = self.input[start..self.position].iter().collect();
        if !valid {
            return Err(LexError::InvalidNumber {
                text,
                span: self.finish(span),
            });
        }
        text.parse().map_err(|_| LexError::InvalidNumber {
            text: text.clone(),
            span: self.finish(span),
        })
    }

    fn read_hex4(&mut self, span: Span) -> Result<u32, LexError> {
        let mut hex = String::new();
        for _ in 0..4 {
            match self.current() {
                Some(h) if h.is_ascii_hexdigit() => {
                    hex.push(h);
                    self.advance();
                }
                _ => {
                    return Err(LexError::InvalidEscape {
                        sequence: format!("\\u{}", hex),
                        span: self.finish(span),
                    })
                }
            }
        }
        u32::from_str_radix(&hex, 16).map_err(|_| LexError::InvalidEscape {
            sequence: format!("\\u{}", hex),
            span: self.finish(span),
        })
    }

    fn read_unicode_escape(&mut self, span: Span) -> Result<char, LexError> {
        let high = self.read_hex4(span)?;
        let code = if (0xD800..0xDC00).contains(&high) {
            // Surrogate pair: a low half must follow
            if self.current() == Some('\\') && self.peek(1) == Some('u') {
                self.advance();
                self.advance();
                let low = self.read_hex4(span)?;
                if !(0xDC00..0xE000).contains(&low) {
                    return Err(LexError::InvalidEscape {
                        sequence: format!("\\u{:04x}\\u{:04x}", high, low),
                        span: self.finish(span),
                    });
                }
                0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
            } else {
                0xFFFD
            }
        } else if (0xDC00..0xE000).contains(&high) {
            0xFFFD
        } else {
            high
        };
        Ok(char::from_u32(code).unwrap_or('\u{FFFD}'))
    }

    /// Lex an interpolation body after `\(` up to its matching `)`.
    fn read_interpolation(&mut self, string_span: Span) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut depth = 0usize;
        loop {
            let token = self.next_token()?;
            match token.kind {
                TokenKind::Eof => {
                    return Err(LexError::UnterminatedString {
                        span: self.finish(string_span),
                    })
                }
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen if depth == 0 => {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        span: token.span,
                    });
                    return Ok(tokens);
                }
                TokenKind::RightParen => depth -= 1,
                _ => {}
            }
            tokens.push(token);
        }
    }

    fn read_string(&mut self, span: Span) -> Result<Vec<StrPart>, LexError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        self.advance(); // skip opening quote

        loop {
            match self.current() {
                None => {
                    return Err(LexError::UnterminatedString {
                        span: self.finish(span),
                    })
                }
                Some('"') => {
                    self.advance();
                    if !literal.is_empty() || parts.is_empty() {
                        parts.push(StrPart::Literal(literal));
                    }
                    return Ok(parts);
                }
                Some('\\') => {
                    let escape_span = self.mark();
                    self.advance();
                    let ch = match self.current() {
                        None => {
                            return Err(LexError::UnterminatedString {
                                span: self.finish(span),
                            })
                        }
                        Some('(') => {
                            self.advance();
                            if !literal.is_empty() {
                                parts.push(StrPart::Literal(std::mem::take(&mut literal)));
                            }
                            parts.push(StrPart::Interp(self.read_interpolation(span)?));
                            continue;
                        }
                        Some('u') => {
                            self.advance();
                            literal.push(self.read_unicode_escape(escape_span)?);
                            continue;
                        }
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some('/') => '/',
                        Some('b') => '\u{0008}',
                        Some('f') => '\u{000C}',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some(other) => {
                            self.advance();
                            return Err(LexError::InvalidEscape {
                                sequence: format!("\\{}", other),
                                span: self.finish(escape_span),
                            });
                        }
                    };
                    literal.push(ch);
                    self.advance();
                }
                Some(ch) => {
                    literal.push(ch);
                    self.advance();
                }
            }
        }
    }

    /// Consume `first` and, if the next char is `second`, that too.
    fn one_or_two(&mut self, second: char, single: TokenKind, double: TokenKind) -> TokenKind {
        self.advance();
        if self.current() == Some(second) {
            self.advance();
            double
        } else {
            single
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace_and_comments();
        let span = self.mark();

        let kind = match self.current() {
            None => TokenKind::Eof,

            Some('"') => TokenKind::Str(self.read_string(span)?),

            Some(ch) if ch.is_ascii_digit() => TokenKind::Number(self.read_number(span)?),
            Some('.') if self.peek(1).map_or(false, |c| c.is_ascii_digit()) => {
                TokenKind::Number(self.read_number(span)?)
            }

            Some(ch) if is_ident_start(ch) => {
                let name = self.read_identifier();
                match Keyword::from_ident(&name) {
                    Some(kw) => TokenKind::Keyword(kw),
                    None => TokenKind::Ident(name),
                }
            }

            Some('.') => {
                self.advance();
                match self.current() {
                    Some('.') => {
                        self.advance();
                        TokenKind::DotDot
                    }
                    Some(c) if is_ident_start(c) => TokenKind::Field(self.read_identifier()),
                    _ => TokenKind::Dot,
                }
            }

            Some('$') => {
                self.advance();
                match self.current() {
                    Some(c) if is_ident_start(c) => TokenKind::Variable(self.read_identifier()),
                    _ => return Err(LexError::UnexpectedChar { ch: '$', span: self.finish(span) }),
                }
            }

            Some('@') => {
                self.advance();
                match self.current() {
                    Some(c) if is_ident_start(c) => TokenKind::Format(self.read_identifier()),
                    _ => return Err(LexError::UnexpectedChar { ch: '@', span: self.finish(span) }),
                }
            }

            Some('|') => self.one_or_two('=', TokenKind::Pipe, TokenKind::UpdateAssign),
            Some('=') => self.one_or_two('=', TokenKind::Assign, TokenKind::Eq),
            Some('<') => self.one_or_two('=', TokenKind::Lt, TokenKind::Le),
            Some('>') => self.one_or_two('=', TokenKind::Gt, TokenKind::Ge),
            Some('+') => self.one_or_two('=', TokenKind::Plus, TokenKind::AddAssign),
            Some('-') => self.one_or_two('=', TokenKind::Minus, TokenKind::SubAssign),
            Some('*') => self.one_or_two('=', TokenKind::Star, TokenKind::MulAssign),
            Some('%') => self.one_or_two('=', TokenKind::Percent, TokenKind::ModAssign),
            Some('!') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                TokenKind::Ne
            }
            Some('/') => {
                self.advance();
                match self.current() {
                    Some('/') => self.one_or_two('=', TokenKind::Alternative, TokenKind::AltAssign),
                    Some('=') => {
                        self.advance();
                        TokenKind::DivAssign
                    }
                    _ => TokenKind::Slash,
                }
            }

            Some(',') => self.single(TokenKind::Comma),
            Some('?') => self.single(TokenKind::Question),
            Some('(') => self.single(TokenKind::LeftParen),
            Some(')') => self.single(TokenKind::RightParen),
            Some('[') => self.single(TokenKind::LeftBracket),
            Some(']') => self.single(TokenKind::RightBracket),
            Some('{') => self.single(TokenKind::LeftBrace),
            Some('}') => self.single(TokenKind::RightBrace),
            Some(':') => self.single(TokenKind::Colon),
            Some(';') => self.single(TokenKind::Semicolon),

            Some(ch) => {
                self.advance();
                return Err(LexError::UnexpectedChar { ch, span: self.finish(span) });
            }
        };

        Ok(Token {
            kind,
            span: self.finish(span),
        })
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }
}

/// Tokenize a whole filter. The returned stream always ends with `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn lit(s: &str) -> TokenKind {
        TokenKind::Str(vec![StrPart::Literal(s.to_string())])
    }

    #[test]
    fn test_lexer_numbers() {
        assert_eq!(
            kinds("42 3.14 .5 2.5e10 1E-5 1."),
            vec![
                TokenKind::Number(42.0),
                TokenKind::Number(3.14),
                TokenKind::Number(0.5),
                TokenKind::Number(2.5e10),
                TokenKind::Number(1e-5),
                TokenKind::Number(1.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_invalid_numbers() {
        assert!(matches!(tokenize("1e"), Err(LexError::InvalidNumber { .. })));
        assert!(matches!(tokenize("123abc"), Err(LexError::InvalidNumber { .. })));
    }

    #[test]
    fn test_lexer_strings() {
        assert_eq!(kinds(r#""hello""#), vec![lit("hello"), TokenKind::Eof]);
        assert_eq!(kinds(r#""""#), vec![lit(""), TokenKind::Eof]);
        assert_eq!(kinds(r#""a\n\"é""#), vec![lit("a\n\"é"), TokenKind::Eof]);
        assert_eq!(kinds(r#""😀""#), vec![lit("😀"), TokenKind::Eof]);
    }

    #[test]
    fn test_lexer_string_errors() {
        let err = tokenize("\"abc").unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString { .. }));
        let err = tokenize(r#""\q""#).unwrap_err();
        assert!(matches!(err, LexError::InvalidEscape { ref sequence, .. } if sequence == "\\q"));
    }

    #[test]
    fn test_lexer_interpolation() {
        let toks = kinds(r#""a\(.x + (1))b""#);
        match &toks[0] {
            TokenKind::Str(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], StrPart::Literal("a".into()));
                match &parts[1] {
                    StrPart::Interp(inner) => {
                        let inner: Vec<_> = inner.iter().map(|t| t.kind.clone()).collect();
                        assert_eq!(
                            inner,
                            vec![
                                TokenKind::Field("x".into()),
                                TokenKind::Plus,
                                TokenKind::LeftParen,
                                TokenKind::Number(1.0),
                                TokenKind::RightParen,
                                TokenKind::Eof,
                            ]
                        );
                    }
                    other => panic!("expected interpolation, got {:?}", other),
                }
                assert_eq!(parts[2], StrPart::Literal("b".into()));
            }
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn test_lexer_keywords_and_names() {
        assert_eq!(
            kinds("if then elif else end reduce foo not $x @base64 .bar .if"),
            vec![
                TokenKind::Keyword(Keyword::If),
                TokenKind::Keyword(Keyword::Then),
                TokenKind::Keyword(Keyword::Elif),
                TokenKind::Keyword(Keyword::Else),
                TokenKind::Keyword(Keyword::End),
                TokenKind::Keyword(Keyword::Reduce),
                TokenKind::Ident("foo".into()),
                TokenKind::Ident("not".into()),
                TokenKind::Variable("x".into()),
                TokenKind::Format("base64".into()),
                TokenKind::Field("bar".into()),
                TokenKind::Field("if".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_operators() {
        assert_eq!(
            kinds("| |= , . .. ? // //= == != < <= > >= + += - -= * *= / /= % %= ="),
            vec![
                TokenKind::Pipe,
                TokenKind::UpdateAssign,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::DotDot,
                TokenKind::Question,
                TokenKind::Alternative,
                TokenKind::AltAssign,
                TokenKind::Eq,
                TokenKind::Ne,
                TokenKind::Lt,
                TokenKind::Le,
                TokenKind::Gt,
                TokenKind::Ge,
                TokenKind::Plus,
                TokenKind::AddAssign,
                TokenKind::Minus,
                TokenKind::SubAssign,
                TokenKind::Star,
                TokenKind::MulAssign,
                TokenKind::Slash,
                TokenKind::DivAssign,
                TokenKind::Percent,
                TokenKind::ModAssign,
                TokenKind::Assign,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_comments() {
        assert_eq!(
            kinds(". # comment\n| length"),
            vec![
                TokenKind::Dot,
                TokenKind::Pipe,
                TokenKind::Ident("length".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_spans() {
        let toks = tokenize(".a |\n  .b").unwrap();
        assert_eq!(toks[0].span, Span { start: 0, end: 2, line: 1, column: 1 });
        assert_eq!(toks[2].span.line, 2);
        assert_eq!(toks[2].span.column, 3);
    }

    #[test]
    fn test_lexer_unexpected_char() {
        let err = tokenize(". @@@ .").unwrap_err();
        match err {
            LexError::UnexpectedChar { ch, span } => {
                assert_eq!(ch, '@');
                assert_eq!(span.column, 3);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
