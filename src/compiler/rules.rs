// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! Pratt-parser scaffolding: precedence levels and the per-frame state the
//! single-pass compiler threads through nested functions, loops and classes.

use crate::reader::lexer::TokenKind;

/// Precedence levels, weakest to strongest, matching the grammar table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Precedence {
    None,
    Assignment,
    Ternary,
    Or,
    And,
    Equality,
    Is,
    Comparison,
    BitwiseOr,
    BitwiseShift,
    Range,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Ternary,
            Precedence::Ternary => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Is,
            Precedence::Is => Precedence::Comparison,
            Precedence::Comparison => Precedence::BitwiseOr,
            Precedence::BitwiseOr => Precedence::BitwiseShift,
            Precedence::BitwiseShift => Precedence::Range,
            Precedence::Range => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

/// Precedence of an infix operator token; `None` if the token cannot appear
/// in infix position.
#[must_use]
pub fn infix_precedence(kind: &TokenKind) -> Precedence {
    match kind {
        TokenKind::Eq => Precedence::Assignment,
        TokenKind::Question => Precedence::Ternary,
        TokenKind::PipePipe => Precedence::Or,
        TokenKind::AmpAmp => Precedence::And,
        TokenKind::EqEq | TokenKind::BangEq => Precedence::Equality,
        TokenKind::Is => Precedence::Is,
        TokenKind::Lt | TokenKind::Gt | TokenKind::LtEq | TokenKind::GtEq => Precedence::Comparison,
        TokenKind::Pipe | TokenKind::Caret | TokenKind::Amp => Precedence::BitwiseOr,
        TokenKind::LtLt | TokenKind::GtGt => Precedence::BitwiseShift,
        TokenKind::DotDot | TokenKind::DotDotDot => Precedence::Range,
        TokenKind::Plus | TokenKind::Minus => Precedence::Term,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Factor,
        TokenKind::Dot | TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::ColonColon => {
            Precedence::Call
        }
        _ => Precedence::None,
    }
}

/// The binary-builtin method signature an infix operator token compiles to
/// (§6's method signature grammar: `+(_)`, `-(_)`, ... `is(_)`).
#[must_use]
pub fn binary_operator_signature(kind: &TokenKind) -> Option<&'static str> {
    Some(match kind {
        TokenKind::Plus => "+(_)",
        TokenKind::Minus => "-(_)",
        TokenKind::Star => "*(_)",
        TokenKind::Slash => "/(_)",
        TokenKind::Percent => "%(_)",
        TokenKind::Lt => "<(_)",
        TokenKind::Gt => ">(_)",
        TokenKind::LtEq => "<=(_)",
        TokenKind::GtEq => ">=(_)",
        TokenKind::EqEq => "==(_)",
        TokenKind::BangEq => "!=(_)",
        TokenKind::Is => "is(_)",
        TokenKind::DotDot => "..(_)",
        TokenKind::DotDotDot => "...(_)",
        TokenKind::Amp => "&(_)",
        TokenKind::Pipe => "|(_)",
        TokenKind::Caret => "^(_)",
        TokenKind::LtLt => "<<(_)",
        TokenKind::GtGt => ">>(_)",
        _ => return None,
    })
}

#[must_use]
pub fn unary_operator_signature(kind: &TokenKind) -> Option<&'static str> {
    Some(match kind {
        TokenKind::Minus => "-",
        TokenKind::Bang => "!",
        TokenKind::Tilde => "~",
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
    StaticMethod,
}

#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,
    /// `-1` while the initializer is still being compiled (not yet in scope
    /// for its own initializer expression).
    pub depth: i32,
    pub is_captured: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct UpvalueDesc {
    pub index: u8,
    pub is_local: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub loop_start: usize,
    pub break_jumps: Vec<usize>,
}

/// Per-function-literal compiler state. Nested function/method bodies push a
/// new frame; resolving a name walks outward through this stack, turning
/// enclosing locals into upvalues as it goes ("auto-flattening closures").
#[derive(Debug, Clone)]
pub struct FunctionState {
    pub name: String,
    pub kind: FunctionKind,
    pub arity: u8,
    pub chunk: crate::bytecode::Chunk,
    pub locals: Vec<Local>,
    pub scope_depth: i32,
    pub upvalues: Vec<UpvalueDesc>,
    pub loops: Vec<LoopState>,
}

impl FunctionState {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FunctionKind) -> Self {
        // Slot 0 is reserved for the receiver (`this`) in methods/script, or
        // simply unused-but-present in plain functions, matching the
        // convention that every frame's locals are relative to the same base.
        let receiver_name = if kind == FunctionKind::Function { "" } else { "this" };
        Self {
            name: name.into(),
            kind,
            arity: 0,
            chunk: crate::bytecode::Chunk::new(),
            locals: vec![Local { name: receiver_name.to_string(), depth: 0, is_captured: false }],
            scope_depth: 0,
            upvalues: Vec::new(),
            loops: Vec::new(),
        }
    }
}

/// Tracks the class body currently being compiled, for field/`this`/`super`
/// resolution.
#[derive(Debug, Clone, Default)]
pub struct ClassState {
    pub name: String,
    pub fields: Vec<String>,
    pub in_static: bool,
    /// Number of direct superclasses, primary first — how many times a
    /// bare `super(...)` constructor-chaining call repeats itself.
    pub super_count: u8,
    /// The constructor name currently being compiled (`new` for
    /// `construct new(...)`), so a bare `super(...)` inside its body knows
    /// which same-named constructor to chain to on each superclass. `None`
    /// outside a constructor body.
    pub ctor_name: Option<String>,
}

impl ClassState {
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<u32> {
        self.fields.iter().position(|f| f == name).map(|i| i as u32)
    }
}
