// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! Lexer: reads source left-to-right and produces one token per call,
//! carrying a kind, a source slice, and a 1-based line number. A synthetic
//! [`TokenKind::Line`] is emitted on physical newlines so the parser can use
//! it to terminate statements without a separate statement-end token.

#[cfg(test)]
#[path = "lexer_test.rs"]
mod lexer_test;

use crate::error::LexError;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Dot,
    DotDot,
    DotDotDot,
    Comma,
    Colon,
    ColonColon,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Tilde,
    Amp,
    Pipe,
    Caret,
    LtLt,
    GtGt,
    AmpAmp,
    PipePipe,

    Lt,
    Gt,
    LtEq,
    GtEq,
    EqEq,
    BangEq,

    Eq,
    Bang,
    Question,

    Identifier(String),
    Number(f64),
    String(String),

    // Reserved words.
    Class,
    Construct,
    Else,
    False,
    For,
    If,
    Import,
    In,
    Is,
    Null,
    Return,
    Static,
    Foreign,
    Super,
    This,
    True,
    Var,
    While,
    Fields,
    Field,
    Pre,
    Module,
    Function,
    Public,
    Private,
    Break,

    /// Emitted once per physical newline; used by the parser to terminate
    /// statements.
    Line,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "class" => TokenKind::Class,
        "construct" => TokenKind::Construct,
        "else" => TokenKind::Else,
        "false" => TokenKind::False,
        "for" => TokenKind::For,
        "if" => TokenKind::If,
        "import" => TokenKind::Import,
        "in" => TokenKind::In,
        "is" => TokenKind::Is,
        "null" => TokenKind::Null,
        "return" => TokenKind::Return,
        "static" => TokenKind::Static,
        "foreign" => TokenKind::Foreign,
        "super" => TokenKind::Super,
        "this" => TokenKind::This,
        "true" => TokenKind::True,
        "var" => TokenKind::Var,
        "while" => TokenKind::While,
        "fields" => TokenKind::Fields,
        "field" => TokenKind::Field,
        "pre" => TokenKind::Pre,
        "module" => TokenKind::Module,
        "function" => TokenKind::Function,
        "public" => TokenKind::Public,
        "private" => TokenKind::Private,
        "break" => TokenKind::Break,
        _ => return None,
    })
}

pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
    /// `true` once a non-line token has been produced on the current line;
    /// used to avoid emitting a spurious leading `Line` token.
    at_line_start: bool,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        let mut source = source;
        if let Some(rest) = source.strip_prefix("#!") {
            // Shebang on line 1 runs to the end of that line.
            if let Some(idx) = rest.find('\n') {
                source = &rest[idx..];
            } else {
                source = "";
            }
        }
        Self { chars: source.chars().peekable(), line: 1, at_line_start: true, errors: Vec::new() }
    }

    #[must_use]
    pub fn errors(&self) -> &[LexError] {
        &self.errors
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn peek_next(&mut self) -> Option<char> {
        let mut clone = self.chars.clone();
        clone.next();
        clone.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Skips spaces/tabs/carriage-returns and comments, but not newlines
    /// (those become `Line` tokens). Returns `true` if a newline was crossed.
    fn skip_whitespace_and_comments(&mut self) -> bool {
        let mut crossed_newline = false;
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('\n') => {
                    self.advance();
                    crossed_newline = true;
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                }
                Some('/') if self.peek_next() == Some('*') => {
                    self.skip_block_comment();
                }
                _ => break,
            }
        }
        crossed_newline
    }

    /// Nested block comments.
    fn skip_block_comment(&mut self) {
        let start_line = self.line;
        self.advance(); // '/'
        self.advance(); // '*'
        let mut depth = 1usize;
        while depth > 0 {
            match self.peek() {
                None => {
                    self.errors.push(LexError::UnterminatedBlockComment { line: start_line });
                    return;
                }
                Some('/') if self.peek_next() == Some('*') => {
                    self.advance();
                    self.advance();
                    depth += 1;
                }
                Some('*') if self.peek_next() == Some('/') => {
                    self.advance();
                    self.advance();
                    depth -= 1;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn lex_number(&mut self, first: char) -> TokenKind {
        let mut text = String::new();
        text.push(first);

        if first == '0' && (self.peek() == Some('x') || self.peek() == Some('X')) {
            text.push(self.advance().unwrap());
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                text.push(self.advance().unwrap());
            }
            return match i64::from_str_radix(&text[2..], 16) {
                Ok(v) => TokenKind::Number(v as f64),
                Err(_) => {
                    self.errors.push(LexError::InvalidNumber { line: self.line, text: text.clone() });
                    TokenKind::Number(0.0)
                }
            };
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            text.push(self.advance().unwrap());
        }
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            text.push(self.advance().unwrap());
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                text.push(self.advance().unwrap());
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mut clone = self.chars.clone();
            let mut lookahead = String::new();
            lookahead.push(clone.next().unwrap());
            if matches!(clone.peek(), Some('+' | '-')) {
                lookahead.push(clone.next().unwrap());
            }
            if clone.peek().is_some_and(char::is_ascii_digit) {
                text.push(self.advance().unwrap());
                if matches!(self.peek(), Some('+' | '-')) {
                    text.push(self.advance().unwrap());
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    text.push(self.advance().unwrap());
                }
            }
        }

        match text.parse::<f64>() {
            Ok(v) => TokenKind::Number(v),
            Err(_) => {
                self.errors.push(LexError::InvalidNumber { line: self.line, text: text.clone() });
                TokenKind::Number(0.0)
            }
        }
    }

    fn lex_string(&mut self) -> TokenKind {
        let start_line = self.line;
        let mut value = String::new();
        loop {
            match self.advance() {
                None => {
                    self.errors.push(LexError::UnterminatedString { line: start_line });
                    break;
                }
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some('0') => value.push('\0'),
                    Some('a') => value.push('\u{07}'),
                    Some('b') => value.push('\u{08}'),
                    Some('f') => value.push('\u{0C}'),
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('t') => value.push('\t'),
                    Some('v') => value.push('\u{0B}'),
                    Some('u') => {
                        let mut hex = String::new();
                        for _ in 0..4 {
                            if let Some(c) = self.advance() {
                                hex.push(c);
                            }
                        }
                        match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                            Some(c) => value.push(c),
                            None => self
                                .errors
                                .push(LexError::InvalidEscape { line: self.line, escape: 'u' }),
                        }
                    }
                    Some(other) => {
                        self.errors.push(LexError::InvalidEscape { line: self.line, escape: other });
                    }
                    None => {
                        self.errors.push(LexError::UnterminatedString { line: start_line });
                        break;
                    }
                },
                Some(c) => value.push(c),
            }
        }
        TokenKind::String(value)
    }

    fn lex_identifier(&mut self, first: char) -> TokenKind {
        let mut text = String::new();
        text.push(first);
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            text.push(self.advance().unwrap());
        }
        keyword(&text).unwrap_or(TokenKind::Identifier(text))
    }

    /// Produce the next token, or `None` once the source is exhausted past
    /// the final `Eof`.
    pub fn next_token(&mut self) -> Option<Token> {
        if self.skip_whitespace_and_comments() && !self.at_line_start {
            self.at_line_start = true;
            return Some(Token { kind: TokenKind::Line, line: self.line - 1 });
        }

        let line = self.line;
        let Some(c) = self.advance() else {
            return if self.at_line_start {
                self.at_line_start = false;
                None
            } else {
                self.at_line_start = false;
                Some(Token { kind: TokenKind::Eof, line })
            };
        };
        self.at_line_start = false;

        let kind = match c {
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            ',' => TokenKind::Comma,
            '~' => TokenKind::Tilde,
            '?' => TokenKind::Question,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            ':' => {
                if self.matches(':') {
                    TokenKind::ColonColon
                } else {
                    TokenKind::Colon
                }
            }
            '.' => {
                if self.matches('.') {
                    if self.matches('.') {
                        TokenKind::DotDotDot
                    } else {
                        TokenKind::DotDot
                    }
                } else {
                    TokenKind::Dot
                }
            }
            '&' => {
                if self.matches('&') {
                    TokenKind::AmpAmp
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if self.matches('|') {
                    TokenKind::PipePipe
                } else {
                    TokenKind::Pipe
                }
            }
            '<' => {
                if self.matches('=') {
                    TokenKind::LtEq
                } else if self.matches('<') {
                    TokenKind::LtLt
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.matches('=') {
                    TokenKind::GtEq
                } else if self.matches('>') {
                    TokenKind::GtGt
                } else {
                    TokenKind::Gt
                }
            }
            '=' => {
                if self.matches('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Eq
                }
            }
            '!' => {
                if self.matches('=') {
                    TokenKind::BangEq
                } else {
                    TokenKind::Bang
                }
            }
            '"' => self.lex_string(),
            c if c.is_ascii_digit() => self.lex_number(c),
            c if c.is_alphabetic() || c == '_' => self.lex_identifier(c),
            other => {
                self.errors.push(LexError::UnexpectedChar { line, ch: other });
                return self.next_token();
            }
        };

        Some(Token { kind, line })
    }

    /// Lex the entire source into a `Vec<Token>`, always terminated by `Eof`.
    #[cfg(test)]
    pub fn tokenize(source: &'a str) -> Vec<Token> {
        let mut lexer = Self::new(source);
        let mut tokens = Vec::new();
        loop {
            match lexer.next_token() {
                Some(tok) => {
                    let is_eof = tok.kind == TokenKind::Eof;
                    tokens.push(tok);
                    if is_eof {
                        break;
                    }
                }
                None => break,
            }
        }
        tokens
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.next_token()
    }
}
