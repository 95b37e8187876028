//! Tokenizer for condition and action expressions.

use crate::error::CompileError;

/// Token kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Integer(i64),
    Decimal(f64),
    String(String),
    /// Bare or double-quoted identifier. Keywords are recognized by the
    /// parser.
    Ident { name: String, quoted: bool },
    LParen,
    RParen,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eof,
}

/// A token with its 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    /// Whether this is the unquoted keyword `kw` (case-insensitive).
    pub fn is_keyword(&self, kw: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident { name, quoted: false } if name.eq_ignore_ascii_case(kw))
    }
}

pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the whole input. The last token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if eof {
                return Ok(tokens);
            }
        }
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> CompileError {
        CompileError::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn current(&self) -> u8 {
        self.bytes[self.pos]
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn advance(&mut self) {
        if self.current() == b'\n' {
            self.line += 1;
            self.column = 1;
        } else if self.current() & 0xC0 != 0x80 {
            // Continuation bytes do not start a new column.
            self.column += 1;
        }
        self.pos += 1;
    }

    fn skip_whitespace_and_comments(&mut self) {
        while !self.is_eof() {
            let c = self.current();
            if c.is_ascii_whitespace() {
                self.advance();
            } else if c == b'-' && self.peek() == Some(b'-') {
                while !self.is_eof() && self.current() != b'\n' {
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_whitespace_and_comments();
        let (line, column) = (self.line, self.column);
        if self.is_eof() {
            return Ok(Token {
                kind: TokenKind::Eof,
                line,
                column,
            });
        }
        let kind = self.scan_token(line, column)?;
        Ok(Token { kind, line, column })
    }

    fn scan_token(&mut self, line: usize, column: usize) -> Result<TokenKind, CompileError> {
        let c = self.current();
        if c.is_ascii_digit() {
            return self.scan_number(line, column);
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = self.pos;
            while !self.is_eof() && (self.current().is_ascii_alphanumeric() || self.current() == b'_') {
                self.advance();
            }
            return Ok(TokenKind::Ident {
                name: self.source[start..self.pos].to_string(),
                quoted: false,
            });
        }
        if c == b'"' {
            let name = self.scan_quoted(b'"', line, column)?;
            if name.is_empty() {
                return Err(self.error(line, column, "empty quoted identifier"));
            }
            return Ok(TokenKind::Ident { name, quoted: true });
        }
        if c == b'\'' {
            return self.scan_quoted(b'\'', line, column).map(TokenKind::String);
        }
        self.scan_operator(line, column)
    }

    fn scan_number(&mut self, line: usize, column: usize) -> Result<TokenKind, CompileError> {
        let start = self.pos;
        while !self.is_eof() && self.current().is_ascii_digit() {
            self.advance();
        }
        let mut decimal = false;
        if !self.is_eof() && self.current() == b'.' && self.peek().is_some_and(|b| b.is_ascii_digit()) {
            decimal = true;
            self.advance();
            while !self.is_eof() && self.current().is_ascii_digit() {
                self.advance();
            }
        }
        if !self.is_eof() && (self.current().is_ascii_alphabetic() || self.current() == b'_') {
            return Err(self.error(self.line, self.column, "malformed number"));
        }
        let text = &self.source[start..self.pos];
        if decimal {
            text.parse::<f64>()
                .map(TokenKind::Decimal)
                .map_err(|_| self.error(line, column, format!("invalid number '{text}'")))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Integer)
                .map_err(|_| self.error(line, column, format!("integer literal '{text}' out of range")))
        }
    }

    /// Scan a quoted run; a doubled quote stands for itself.
    fn scan_quoted(&mut self, quote: u8, line: usize, column: usize) -> Result<String, CompileError> {
        self.advance();
        let mut out = String::new();
        let mut run_start = self.pos;
        loop {
            if self.is_eof() {
                return Err(self.error(line, column, "unterminated quoted text"));
            }
            if self.current() == quote {
                out.push_str(&self.source[run_start..self.pos]);
                self.advance();
                if !self.is_eof() && self.current() == quote {
                    run_start = self.pos;
                    self.advance();
                    continue;
                }
                return Ok(out);
            }
            self.advance();
        }
    }

    fn scan_operator(&mut self, line: usize, column: usize) -> Result<TokenKind, CompileError> {
        let c = self.current();
        let next = self.peek();
        let (kind, width) = match (c, next) {
            (b'|', Some(b'|')) => (TokenKind::Concat, 2),
            (b'<', Some(b'=')) => (TokenKind::LtEq, 2),
            (b'<', Some(b'>')) | (b'!', Some(b'=')) => (TokenKind::NotEq, 2),
            (b'>', Some(b'=')) => (TokenKind::GtEq, 2),
            (b'=', Some(b'=')) => (TokenKind::Eq, 2),
            (b'(', _) => (TokenKind::LParen, 1),
            (b')', _) => (TokenKind::RParen, 1),
            (b',', _) => (TokenKind::Comma, 1),
            (b'.', _) => (TokenKind::Dot, 1),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'%', _) => (TokenKind::Percent, 1),
            (b'=', _) => (TokenKind::Eq, 1),
            (b'<', _) => (TokenKind::Lt, 1),
            (b'>', _) => (TokenKind::Gt, 1),
            _ => {
                let ch = self.source[self.pos..].chars().next().unwrap_or('?');
                return Err(self.error(line, column, format!("unexpected character '{ch}'")));
            }
        };
        for _ in 0..width {
            self.advance();
        }
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scans_paths_operators_and_literals() {
        let k = kinds("new.qty >= 10 AND old.name <> 'it''s'");
        assert_eq!(k[0], TokenKind::Ident { name: "new".into(), quoted: false });
        assert_eq!(k[1], TokenKind::Dot);
        assert_eq!(k[3], TokenKind::GtEq);
        assert_eq!(k[4], TokenKind::Integer(10));
        assert_eq!(k[9], TokenKind::NotEq);
        assert_eq!(k[10], TokenKind::String("it's".into()));
        assert_eq!(*k.last().unwrap(), TokenKind::Eof);
    }

    #[test]
    fn tracks_lines_and_columns() {
        let tokens = Lexer::new("a\n  + 1.5 -- trailing\n|| \"Quoted\"").tokenize().unwrap();
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
        assert_eq!(tokens[2].kind, TokenKind::Decimal(1.5));
        assert_eq!((tokens[3].line, tokens[3].column), (3, 1));
        assert_eq!(tokens[4].kind, TokenKind::Ident { name: "Quoted".into(), quoted: true });
    }

    #[test]
    fn reports_position_of_bad_input() {
        let err = Lexer::new("1 +\n  'open").tokenize().unwrap_err();
        assert_eq!(
            err,
            CompileError::Syntax { line: 2, column: 3, message: "unterminated quoted text".into() }
        );
        assert!(matches!(Lexer::new("a # b").tokenize(), Err(CompileError::Syntax { column: 3, .. })));
        assert!(Lexer::new("99999999999999999999").tokenize().is_err());
    }
}
