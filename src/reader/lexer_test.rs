// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

use super::*;

fn kinds(source: &str) -> Vec<TokenKind> {
    Lexer::tokenize(source).into_iter().map(|t| t.kind).collect()
}

#[test]
fn lexes_punctuation() {
    assert_eq!(
        kinds("(){}[].,:"),
        vec![
            TokenKind::LeftParen,
            TokenKind::RightParen,
            TokenKind::LeftBrace,
            TokenKind::RightBrace,
            TokenKind::LeftBracket,
            TokenKind::RightBracket,
            TokenKind::Dot,
            TokenKind::Comma,
            TokenKind::Colon,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn lexes_ranges() {
    assert_eq!(kinds(".. ..."), vec![TokenKind::DotDot, TokenKind::DotDotDot, TokenKind::Eof]);
}

#[test]
fn lexes_keywords_not_identifiers() {
    assert_eq!(
        kinds("class foo"),
        vec![TokenKind::Class, TokenKind::Identifier("foo".to_string()), TokenKind::Eof]
    );
}

#[test]
fn lexes_decimal_and_hex_numbers() {
    assert_eq!(
        kinds("1 2.5 0xFF"),
        vec![TokenKind::Number(1.0), TokenKind::Number(2.5), TokenKind::Number(255.0), TokenKind::Eof]
    );
}

#[test]
fn lexes_string_escapes() {
    assert_eq!(
        kinds(r#""a\nb""#),
        vec![TokenKind::String("a\nb".to_string()), TokenKind::Eof]
    );
}

#[test]
fn lexes_unicode_escape() {
    assert_eq!(kinds(r#""A""#), vec![TokenKind::String("A".to_string()), TokenKind::Eof]);
}

#[test]
fn emits_line_tokens_between_statements() {
    assert_eq!(
        kinds("var a\nvar b"),
        vec![
            TokenKind::Var,
            TokenKind::Identifier("a".to_string()),
            TokenKind::Line,
            TokenKind::Var,
            TokenKind::Identifier("b".to_string()),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn skips_line_comments() {
    assert_eq!(kinds("1 // comment\n2"), vec![
        TokenKind::Number(1.0),
        TokenKind::Line,
        TokenKind::Number(2.0),
        TokenKind::Eof
    ]);
}

#[test]
fn skips_nested_block_comments() {
    assert_eq!(kinds("1 /* a /* b */ c */ 2"), vec![TokenKind::Number(1.0), TokenKind::Number(2.0), TokenKind::Eof]);
}

#[test]
fn ignores_leading_shebang() {
    assert_eq!(kinds("#!/usr/bin/env cardinal\nvar a"), vec![TokenKind::Var, TokenKind::Identifier("a".to_string()), TokenKind::Eof]);
}

#[test]
fn reports_unterminated_string() {
    let mut lexer = Lexer::new("\"abc");
    while lexer.next_token().is_some() {}
    assert!(matches!(lexer.errors(), [LexError::UnterminatedString { .. }]));
}
