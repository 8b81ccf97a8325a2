// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! The single-pass compiler: lexes, parses (Pratt, top-down operator
//! precedence) and emits bytecode in one traversal. There is no intermediate
//! AST — each grammar rule's prefix/infix handler emits directly into the
//! current function's [`Chunk`].
//!
//! The compiler is itself a GC root while it runs: every string/number
//! constant it allocates is pushed onto `protected` and included in the root
//! set passed to [`Heap::alloc`] until the enclosing function is sealed into
//! an `Fn` object and becomes reachable through its own constant-pool slot.

mod class;
pub mod disassemble;
#[cfg(test)]
mod compiler_test;

use crate::bytecode::{Chunk, Op, MAX_PARAMETERS};
use crate::error::CompileError;
use crate::heap::Heap;
use crate::reader::lexer::{Lexer, Token, TokenKind};
use crate::realm::Realm;
use crate::value::object::{FnObj, Object};
use crate::value::{Handle, Value};
use rules::{
    binary_operator_signature, infix_precedence, unary_operator_signature, ClassState,
    FunctionKind, FunctionState, Local, Precedence, UpvalueDesc,
};

pub mod rules;

pub struct Compiler<'h, 'r> {
    tokens: Vec<Token>,
    pos: usize,
    previous_line: u32,
    heap: &'h mut Heap,
    realm: &'r mut Realm,
    module: Handle,
    source_path: String,
    states: Vec<FunctionState>,
    pub(crate) classes: Vec<ClassState>,
    errors: Vec<CompileError>,
    protected: Vec<Handle>,
}

/// Compile `source` (belonging to `module`) into a top-level `Fn` object, or
/// the list of diagnostics collected along the way. Compilation always
/// continues past the first error so later ones are also reported; on any
/// error the result is "no function produced", matching §4.2.
pub fn compile(
    source: &str,
    source_path: &str,
    module: Handle,
    heap: &mut Heap,
    realm: &mut Realm,
) -> Result<Handle, Vec<CompileError>> {
    let mut lexer = Lexer::new(source);
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
            None => {
                tokens.push(Token { kind: TokenKind::Eof, line: 1 });
                break;
            }
        }
    }

    let mut compiler = Compiler {
        tokens,
        pos: 0,
        previous_line: 1,
        heap,
        realm,
        module,
        source_path: source_path.to_string(),
        states: vec![FunctionState::new("script", FunctionKind::Script)],
        classes: Vec::new(),
        errors: Vec::new(),
        protected: Vec::new(),
    };

    for err in lexer.errors() {
        compiler.errors.push(CompileError::Lex(err.clone()));
    }

    compiler.advance();
    let mut tail_expr = false;
    while !compiler.check(&TokenKind::Eof) {
        compiler.skip_lines();
        if compiler.check(&TokenKind::Eof) {
            break;
        }
        tail_expr = compiler.declaration();
    }
    if tail_expr {
        compiler.undo_trailing_pop();
    } else {
        compiler.emit_op(Op::Null);
    }
    compiler.emit_op(Op::Return);

    if !compiler.errors.is_empty() {
        return Err(compiler.errors);
    }

    let top = compiler.states.pop().expect("script function state");
    let fn_obj = FnObj {
        chunk: top.chunk,
        arity: 0,
        upvalue_count: 0,
        module: compiler.module,
        name: "script".to_string(),
        source_path: compiler.source_path.clone(),
    };
    let handle = compiler.heap.alloc(Object::Fn(fn_obj), &compiler.protected);
    Ok(handle)
}

impl<'h, 'r> Compiler<'h, 'r> {
    // --- token stream primitives ---

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos - 1]
    }

    fn advance(&mut self) -> Token {
        if self.pos > 0 {
            self.previous_line = self.tokens[self.pos - 1].line;
        }
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        self.previous_line = tok.line;
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn check_match(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, what: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            let line = self.current().line;
            let found = format!("{:?}", self.current().kind);
            self.errors.push(CompileError::UnexpectedToken {
                line,
                expected: what.to_string(),
                found,
            });
        }
    }

    fn consume_identifier(&mut self, what: &str) -> String {
        if let TokenKind::Identifier(name) = &self.current().kind {
            let name = name.clone();
            self.advance();
            name
        } else {
            let line = self.current().line;
            self.errors.push(CompileError::UnexpectedToken {
                line,
                expected: what.to_string(),
                found: format!("{:?}", self.current().kind),
            });
            String::new()
        }
    }

    /// Statement terminator: one or more `Line` tokens, or EOF/`}`.
    fn skip_lines(&mut self) {
        while self.check(&TokenKind::Line) {
            self.advance();
        }
    }

    fn consume_line_or_end(&mut self) {
        if self.check(&TokenKind::Line) || self.check(&TokenKind::Eof) || self.check(&TokenKind::RightBrace) {
            self.skip_lines();
        } else {
            let line = self.current().line;
            self.errors.push(CompileError::Other { line, message: "expected end of statement".to_string() });
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(CompileError::Other { line: self.previous_line, message: message.into() });
    }

    // --- emission ---

    fn state(&mut self) -> &mut FunctionState {
        self.states.last_mut().expect("at least one function state")
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.state().chunk
    }

    fn emit_op(&mut self, op: Op) -> usize {
        let line = self.previous_line;
        self.chunk().emit_op(op, line)
    }

    fn emit_byte(&mut self, byte: u8) {
        self.chunk().emit_byte(byte);
    }

    fn emit_u16(&mut self, value: u16) {
        self.chunk().emit_u16(value);
    }

    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit_op(op);
        self.emit_u16(0xFFFF);
        self.chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let target = self.chunk().len();
        if target - offset - 2 > u16::MAX as usize {
            self.error("loop body too large to jump over");
        }
        let ofs = (target - offset - 2) as u16;
        self.chunk().patch_u16(offset, ofs);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(Op::Loop);
        let here = self.chunk().len() + 2;
        let ofs = (here - loop_start) as u16;
        self.emit_u16(ofs);
    }

    fn add_constant(&mut self, value: Value) -> u16 {
        match self.chunk().add_constant(value) {
            Some(idx) => idx,
            None => {
                self.error("too many constants in one function");
                0
            }
        }
    }

    fn intern_string(&mut self, text: &str) -> Value {
        let obj = Object::Str(crate::value::object::Str::new(text.to_string()));
        let handle = self.heap.alloc(obj, &self.protected);
        self.protected.push(handle);
        Value::Obj(handle)
    }

    fn emit_string_constant(&mut self, text: &str) {
        let value = self.intern_string(text);
        let idx = self.add_constant(value);
        self.emit_op(Op::Constant);
        self.emit_u16(idx);
    }

    fn emit_call_sig(&mut self, arity: u8, signature: &str) {
        let symbol = self.realm.methods.intern(signature);
        self.emit_op(Op::call(arity));
        self.emit_u16(symbol.0 as u16);
    }

    /// Parses a comma-separated argument list, evaluating each expression in
    /// place, up to (not including) `closer`. Returns the raw count — callers
    /// still need [`Compiler::check_arity`] before handing it to
    /// `Op::call`/`Op::super_call`, since `Call0..Call16`/`Super0..Super16`
    /// are a fixed contiguous run and an out-of-range arity would land on an
    /// unrelated opcode.
    fn parse_arg_list(&mut self, closer: &TokenKind) -> u32 {
        let mut arity: u32 = 0;
        if !self.check(closer) {
            loop {
                self.expression();
                arity += 1;
                if !self.check_match(&TokenKind::Comma) {
                    break;
                }
            }
        }
        arity
    }

    /// Clamps a call arity to `MAX_PARAMETERS`, pushing `TooManyParameters`
    /// once if it doesn't fit.
    fn check_arity(&mut self, arity: u32) -> u8 {
        if arity > MAX_PARAMETERS as u32 {
            self.errors.push(CompileError::TooManyParameters { line: self.previous_line });
            MAX_PARAMETERS
        } else {
            arity as u8
        }
    }

    // --- scopes & locals ---

    fn begin_scope(&mut self) {
        self.state().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.state().scope_depth -= 1;
        let depth = self.state().scope_depth;
        while let Some(local) = self.state().locals.last() {
            if local.depth <= depth {
                break;
            }
            let captured = local.is_captured;
            self.state().locals.pop();
            if captured {
                self.emit_op(Op::CloseUpvalue);
            } else {
                self.emit_op(Op::Pop);
            }
        }
    }

    fn declare_local(&mut self, name: String) {
        let depth = self.state().scope_depth;
        if depth == 0 {
            // Module scope: names are resolved as module variables instead.
            return;
        }
        if self.state().locals.iter().any(|l| l.depth == depth && l.name == name) {
            self.errors.push(CompileError::DuplicateVariable { line: self.previous_line, name });
            return;
        }
        if self.state().locals.len() >= 256 {
            self.errors.push(CompileError::TooManyLocals { line: self.previous_line });
            return;
        }
        self.state().locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn mark_initialized(&mut self) {
        let depth = self.state().scope_depth;
        if depth == 0 {
            return;
        }
        if let Some(local) = self.state().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn resolve_local(&self, level: usize, name: &str) -> Option<u8> {
        self.states[level].locals.iter().rposition(|l| l.name == name && l.depth != -1).map(|i| i as u8)
    }

    fn resolve_upvalue(&mut self, name: &str) -> Option<u8> {
        let current_idx = self.states.len() - 1;
        if current_idx == 0 {
            return None;
        }
        let mut found_level = None;
        for lvl in (0..current_idx).rev() {
            if self.resolve_local(lvl, name).is_some() {
                found_level = Some(lvl);
                break;
            }
        }
        let found_level = found_level?;
        let mut index = self.resolve_local(found_level, name).unwrap();
        self.states[found_level].locals[index as usize].is_captured = true;
        let mut is_local = true;
        for lvl in (found_level + 1)..=current_idx {
            index = self.add_upvalue(lvl, index, is_local);
            is_local = false;
        }
        Some(index)
    }

    fn add_upvalue(&mut self, level: usize, index: u8, is_local: bool) -> u8 {
        let upvalues = &mut self.states[level].upvalues;
        if let Some(pos) = upvalues.iter().position(|u| u.index == index && u.is_local == is_local) {
            return pos as u8;
        }
        if upvalues.len() >= 256 {
            self.errors.push(CompileError::TooManyUpvalues { line: self.previous_line });
            return (upvalues.len() - 1) as u8;
        }
        upvalues.push(UpvalueDesc { index, is_local });
        (upvalues.len() - 1) as u8
    }

    /// Seals the current (innermost) function state into an `Fn` heap object
    /// and returns it together with its captured-upvalue descriptor list, so
    /// the caller (the enclosing frame) can emit `CLOSURE` with the matching
    /// `(isLocal, index)` pairs. `tail_value` is `true` when the body's last
    /// statement was a bare expression whose value is already sitting on top
    /// of the stack (the caller suppressed its `Pop`) — in that case the
    /// value becomes the implicit return instead of `Null`.
    fn end_function(&mut self, name: String, tail_value: bool) -> (Handle, Vec<UpvalueDesc>) {
        let mut state = self.states.pop().expect("function state to end");
        if !tail_value {
            state.chunk.emit_op(Op::Null, self.previous_line);
        }
        state.chunk.emit_op(Op::Return, self.previous_line);
        let upvalue_count = state.upvalues.len() as u8;
        let fn_obj = FnObj {
            chunk: state.chunk,
            arity: state.arity,
            upvalue_count,
            module: self.module,
            name,
            source_path: self.source_path.clone(),
        };
        let handle = self.heap.alloc(Object::Fn(fn_obj), &self.protected);
        self.protected.push(handle);
        (handle, state.upvalues)
    }

    fn emit_closure(&mut self, fn_handle: Handle, upvalues: &[UpvalueDesc]) {
        let idx = self.add_constant(Value::Obj(fn_handle));
        self.emit_op(Op::Closure);
        self.emit_u16(idx);
        for uv in upvalues {
            self.emit_byte(u8::from(uv.is_local));
            self.emit_byte(uv.index);
        }
    }

    // --- declarations & statements ---

    /// Compiles one declaration/statement. Returns `true` when it was a bare
    /// expression statement (the only kind whose value a body-compiling loop
    /// may carry forward as an implicit return) — `false` for everything
    /// else, including declarations that aren't statements at all.
    fn declaration(&mut self) -> bool {
        let is_tail_expr = if self.check_match(&TokenKind::Class) {
            self.class_declaration();
            false
        } else if self.check_match(&TokenKind::Import) {
            self.import_declaration();
            false
        } else if self.check_match(&TokenKind::Function) {
            self.function_declaration();
            false
        } else {
            self.statement()
        };
        self.skip_lines();
        is_tail_expr
    }

    fn function_declaration(&mut self) {
        let name = self.consume_identifier("function name");
        self.declare_variable(&name);
        self.mark_initialized();
        self.compile_function_body(name.clone(), FunctionKind::Function);
        self.define_variable(&name);
    }

    /// `function name(params) { body }`: a named closure bound into the
    /// enclosing scope before its own body compiles, so it can recurse.
    fn compile_function_body(&mut self, name: String, kind: FunctionKind) {
        self.consume(&TokenKind::LeftParen, "'(' after function name");
        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                params.push(self.consume_identifier("parameter name"));
                if !self.check_match(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "')'");
        let arity = params.len() as u8;
        self.consume(&TokenKind::LeftBrace, "'{' before function body");
        self.states.push(FunctionState::new(name.clone(), kind));
        self.begin_scope();
        for p in &params {
            self.declare_local(p.clone());
            self.mark_initialized();
        }
        self.state().arity = arity;
        let tail_expr = self.block();
        if tail_expr {
            self.undo_trailing_pop();
        } else {
            self.end_scope();
        }
        let (handle, upvalues) = self.end_function(name, tail_expr);
        self.emit_closure(handle, &upvalues);
    }

    /// Removes the chunk's just-emitted trailing `Op::Pop`, letting the
    /// value it would have discarded flow into the enclosing function's
    /// implicit return instead. Only ever called right after compiling a
    /// body-ending bare expression statement, so the last byte is always
    /// exactly this `Pop`.
    fn undo_trailing_pop(&mut self) {
        let chunk = self.chunk();
        debug_assert_eq!(chunk.code.last().copied(), Some(Op::Pop as u8));
        chunk.code.pop();
        chunk.lines.pop();
    }

    fn import_declaration(&mut self) {
        let module_name = if let TokenKind::String(s) = &self.current().kind {
            let s = s.clone();
            self.advance();
            s
        } else {
            self.error("expected module name string after 'import'");
            String::new()
        };
        self.emit_string_constant(&module_name);
        let const_idx = (self.chunk().constants.len() - 1) as u16;
        self.emit_op(Op::LoadModule);
        self.emit_u16(const_idx);
        self.emit_op(Op::Pop);

        if self.check_match(&TokenKind::For) {
            loop {
                let var_name = self.consume_identifier("imported variable name");
                self.emit_string_constant(&module_name);
                let mod_const = (self.chunk().constants.len() - 1) as u16;
                self.emit_string_constant(&var_name);
                let var_const = (self.chunk().constants.len() - 1) as u16;
                self.emit_op(Op::ImportVariable);
                self.emit_u16(mod_const);
                self.emit_u16(var_const);
                self.declare_variable(&var_name);
                self.mark_initialized();
                self.define_variable(&var_name);
                if !self.check_match(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume_line_or_end();
    }

    /// Returns `true` iff this was a bare expression statement — see
    /// [`Compiler::declaration`].
    fn statement(&mut self) -> bool {
        if self.check_match(&TokenKind::Var) {
            self.var_statement();
            false
        } else if self.check_match(&TokenKind::If) {
            self.if_statement();
            false
        } else if self.check_match(&TokenKind::While) {
            self.while_statement();
            false
        } else if self.check_match(&TokenKind::For) {
            self.for_statement();
            false
        } else if self.check_match(&TokenKind::Return) {
            self.return_statement();
            false
        } else if self.check_match(&TokenKind::Break) {
            self.break_statement();
            false
        } else if self.check(&TokenKind::LeftBrace) {
            // A nested `{ }` used as a statement (an `if`/`while` body, say)
            // is always stack-neutral — it is not itself a function body, so
            // its own tail expression (if any) still gets popped here.
            self.advance();
            self.begin_scope();
            self.block();
            self.end_scope();
            false
        } else {
            self.expression_statement();
            true
        }
    }

    fn var_statement(&mut self) {
        let name = self.consume_identifier("variable name");
        if self.check_match(&TokenKind::Eq) {
            self.expression();
        } else {
            self.emit_op(Op::Null);
        }
        self.declare_variable(&name);
        self.mark_initialized();
        self.define_variable(&name);
        self.consume_line_or_end();
    }

    fn declare_variable(&mut self, name: &str) {
        if self.state().scope_depth > 0 {
            self.declare_local(name.to_string());
        }
    }

    fn define_variable(&mut self, name: &str) {
        if self.state().scope_depth > 0 {
            // Value is already on the stack in the local's slot; nothing to emit.
            return;
        }
        let value = self.intern_string(name);
        let idx = self.add_constant(value);
        self.emit_op(Op::StoreModuleVar);
        self.emit_u16(idx);
        self.emit_op(Op::Pop);
    }

    /// Compiles the declarations between the already-consumed `{` and its
    /// matching `}`. Returns `true` when the last one compiled was a bare
    /// expression statement, so a function-body caller can let its value
    /// flow into an implicit return (see [`Compiler::undo_trailing_pop`]); a
    /// caller compiling a plain nested block ignores the result, since that
    /// block's own statement must remain stack-neutral.
    fn block(&mut self) -> bool {
        self.skip_lines();
        let mut tail_expr = false;
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            tail_expr = self.declaration();
            self.skip_lines();
        }
        self.consume(&TokenKind::RightBrace, "'}'");
        tail_expr
    }

    fn if_statement(&mut self) {
        self.consume(&TokenKind::LeftParen, "'('");
        self.expression();
        self.consume(&TokenKind::RightParen, "')'");
        let then_jump = self.emit_jump(Op::JumpIf);
        self.statement();
        let else_jump = self.emit_jump(Op::Jump);
        self.patch_jump(then_jump);
        if self.check_match(&TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().len();
        self.state().loops.push(rules::LoopState { loop_start, break_jumps: Vec::new() });
        self.consume(&TokenKind::LeftParen, "'('");
        self.expression();
        self.consume(&TokenKind::RightParen, "')'");
        let exit_jump = self.emit_jump(Op::JumpIf);
        self.statement();
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        let loop_state = self.state().loops.pop().expect("loop state");
        for jump in loop_state.break_jumps {
            self.patch_jump(jump);
        }
    }

    /// `for (x in seq) { body }` desugars to:
    /// `var s = seq; var i = null; while ((i = s.iterate(i))) { var x = s.iteratorValue(i); body }`
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(&TokenKind::LeftParen, "'('");
        let var_name = self.consume_identifier("loop variable name");
        self.consume(&TokenKind::In, "'in'");
        self.expression();
        self.declare_local(" for(seq)".to_string());
        self.mark_initialized();
        self.consume(&TokenKind::RightParen, "')'");

        self.emit_op(Op::Null);
        self.declare_local(" for(iter)".to_string());
        self.mark_initialized();
        let iter_slot = (self.state().locals.len() - 1) as u8;
        let seq_slot = iter_slot - 1;

        let loop_start = self.chunk().len();
        self.state().loops.push(rules::LoopState { loop_start, break_jumps: Vec::new() });
        self.emit_load_local(seq_slot);
        self.emit_load_local(iter_slot);
        self.emit_call_sig(1, "iterate(_)");
        self.emit_store_local(iter_slot);
        let exit_jump = self.emit_jump(Op::JumpIf);

        self.begin_scope();
        self.emit_load_local(seq_slot);
        self.emit_load_local(iter_slot);
        self.emit_call_sig(1, "iteratorValue(_)");
        self.declare_local(var_name);
        self.mark_initialized();
        self.statement();
        self.end_scope();

        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        let loop_state = self.state().loops.pop().expect("loop state");
        for jump in loop_state.break_jumps {
            self.patch_jump(jump);
        }
        self.end_scope();
    }

    fn emit_load_local(&mut self, slot: u8) {
        let line = self.previous_line;
        self.chunk().emit_load_local(slot, line);
    }

    fn emit_store_local(&mut self, slot: u8) {
        let line = self.previous_line;
        self.chunk().emit_store_local(slot, line);
    }

    fn break_statement(&mut self) {
        if self.state().loops.is_empty() {
            self.errors.push(CompileError::BreakOutsideLoop { line: self.previous_line });
        } else {
            let jump = self.emit_jump(Op::Jump);
            self.state().loops.last_mut().expect("loop state").break_jumps.push(jump);
        }
        self.consume_line_or_end();
    }

    fn return_statement(&mut self) {
        if self.check(&TokenKind::Line) || self.check(&TokenKind::Eof) || self.check(&TokenKind::RightBrace) {
            self.emit_op(Op::Null);
        } else {
            self.expression();
        }
        self.emit_op(Op::Return);
        self.consume_line_or_end();
    }

    /// Always emits the `Pop` — a body-compiling loop that wants to keep this
    /// statement's value instead undoes it afterward via
    /// [`Compiler::undo_trailing_pop`], rather than this method taking a
    /// flag, since most callers (anything mid-block, or inside an `if`/
    /// `while` body) do want it popped.
    fn expression_statement(&mut self) {
        self.expression();
        self.emit_op(Op::Pop);
        self.consume_line_or_end();
    }

    // --- expressions (Pratt core) ---

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, min_prec: Precedence) {
        let can_assign = min_prec <= Precedence::Assignment;
        self.advance();
        self.prefix(can_assign);

        while infix_precedence(&self.current().kind) >= min_prec {
            self.advance();
            self.infix(can_assign);
        }

        if can_assign && self.check_match(&TokenKind::Eq) {
            self.error("invalid assignment target");
        }
    }

    fn prefix(&mut self, can_assign: bool) {
        let tok = self.previous().clone();
        match tok.kind {
            TokenKind::Number(n) => self.emit_number(n),
            TokenKind::String(s) => self.emit_string_constant(&s),
            TokenKind::True => {
                self.emit_op(Op::True);
            }
            TokenKind::False => {
                self.emit_op(Op::False);
            }
            TokenKind::Null => {
                self.emit_op(Op::Null);
            }
            TokenKind::This => self.named_this(),
            TokenKind::Super => self.named_super(),
            TokenKind::Identifier(name) => self.named_variable(&name, can_assign),
            TokenKind::LeftParen => {
                self.expression();
                self.consume(&TokenKind::RightParen, "')'");
            }
            TokenKind::LeftBracket => self.list_literal(),
            TokenKind::LeftBrace => self.map_or_block_literal(),
            TokenKind::Pipe | TokenKind::PipePipe => self.block_literal_with_params(tok.kind == TokenKind::PipePipe),
            TokenKind::Minus | TokenKind::Bang | TokenKind::Tilde => self.unary(tok.kind),
            _ => {
                self.errors.push(CompileError::UnexpectedToken {
                    line: tok.line,
                    expected: "expression".to_string(),
                    found: format!("{:?}", tok.kind),
                });
            }
        }
    }

    fn emit_number(&mut self, n: f64) {
        let idx = self.add_constant(Value::Num(n));
        self.emit_op(Op::Constant);
        self.emit_u16(idx);
    }

    fn unary(&mut self, op_kind: TokenKind) {
        self.parse_precedence(Precedence::Unary);
        let sig = unary_operator_signature(&op_kind).expect("unary operator token");
        self.emit_call_sig(0, sig);
    }

    fn infix(&mut self, can_assign: bool) {
        let tok = self.previous().clone();
        match tok.kind {
            TokenKind::Dot => self.dotted_call(can_assign),
            TokenKind::LeftParen => self.call_expr(),
            TokenKind::LeftBracket => self.subscript(can_assign),
            TokenKind::Question => self.ternary(),
            TokenKind::AmpAmp => self.logical_and(),
            TokenKind::PipePipe => self.logical_or(),
            _ => {
                if let Some(sig) = binary_operator_signature(&tok.kind) {
                    let prec = infix_precedence(&tok.kind);
                    self.parse_precedence(prec.next());
                    self.emit_call_sig(1, sig);
                } else {
                    self.error("unexpected infix operator");
                }
            }
        }
    }

    fn ternary(&mut self) {
        let then_jump = self.emit_jump(Op::JumpIf);
        self.parse_precedence(Precedence::Ternary);
        let else_jump = self.emit_jump(Op::Jump);
        self.consume(&TokenKind::Colon, "':'");
        self.patch_jump(then_jump);
        self.parse_precedence(Precedence::Assignment);
        self.patch_jump(else_jump);
    }

    fn logical_and(&mut self) {
        let end_jump = self.emit_jump(Op::And);
        self.parse_precedence(Precedence::And.next());
        self.patch_jump(end_jump);
    }

    fn logical_or(&mut self) {
        let end_jump = self.emit_jump(Op::Or);
        self.parse_precedence(Precedence::Or.next());
        self.patch_jump(end_jump);
    }

    fn call_expr(&mut self) {
        let raw_arity = self.parse_arg_list(&TokenKind::RightParen);
        self.consume(&TokenKind::RightParen, "')'");
        let arity = self.check_arity(raw_arity);
        // A bare call expression `f(args)` calls the `call(_...)` method on
        // whatever value `f` evaluates to (functions/closures are invoked
        // through this uniform protocol rather than a dedicated opcode).
        let sig = call_signature("call", arity);
        self.emit_call_sig(arity, &sig);
    }

    fn subscript(&mut self, can_assign: bool) {
        let raw_arity = self.parse_arg_list(&TokenKind::RightBracket);
        self.consume(&TokenKind::RightBracket, "']'");
        if can_assign && self.check_match(&TokenKind::Eq) {
            self.expression();
            // The call opcode's arity is the subscript args plus the
            // assigned value, so leave room for that extra slot here rather
            // than letting `check_arity` clamp to `MAX_PARAMETERS` and then
            // overflow by one when the value is added below.
            if raw_arity >= MAX_PARAMETERS as u32 {
                self.errors.push(CompileError::TooManyParameters { line: self.previous_line });
            }
            let arity = raw_arity.min(MAX_PARAMETERS as u32 - 1) as u8;
            let sig = subscript_signature(arity, true);
            self.emit_call_sig(arity + 1, &sig);
        } else {
            let arity = self.check_arity(raw_arity);
            let sig = subscript_signature(arity, false);
            self.emit_call_sig(arity, &sig);
        }
    }

    fn dotted_call(&mut self, can_assign: bool) {
        let name = self.consume_identifier("method or field name after '.'");
        if self.check_match(&TokenKind::LeftParen) {
            let raw_arity = self.parse_arg_list(&TokenKind::RightParen);
            self.consume(&TokenKind::RightParen, "')'");
            let arity = self.check_arity(raw_arity);
            let sig = call_signature(&name, arity);
            self.emit_call_sig(arity, &sig);
        } else if self.check(&TokenKind::LeftBrace) {
            self.advance();
            self.block_literal_with_params(false);
            let sig = call_signature(&name, 1);
            self.emit_call_sig(1, &sig);
        } else if can_assign && self.check_match(&TokenKind::Eq) {
            self.expression();
            let sig = format!("{name}=(_)");
            self.emit_call_sig(1, &sig);
        } else {
            self.emit_call_sig(0, &name);
        }
    }

    fn named_this(&mut self) {
        if self.classes.is_empty() {
            self.errors.push(CompileError::ThisOutsideMethod { line: self.previous_line });
        }
        self.named_variable("this", false);
    }

    fn named_super(&mut self) {
        if self.classes.is_empty() {
            self.errors.push(CompileError::SuperOutsideMethod { line: self.previous_line });
        }
        if self.check(&TokenKind::LeftParen) {
            self.bare_super_call();
            return;
        }
        self.consume(&TokenKind::Dot, "'.' after 'super'");
        let name = self.consume_identifier("method name after 'super.'");
        self.emit_load_local(0); // receiver
        let superclass_index: u8 = 0;
        if self.check_match(&TokenKind::LeftParen) {
            let raw_arity = self.parse_arg_list(&TokenKind::RightParen);
            self.consume(&TokenKind::RightParen, "')'");
            let arity = self.check_arity(raw_arity);
            let sig = call_signature(&name, arity);
            let symbol = self.realm.methods.intern(&sig);
            self.emit_op(Op::super_call(arity));
            self.emit_u16(symbol.0 as u16);
            self.emit_byte(superclass_index);
        } else {
            let symbol = self.realm.methods.intern(&name);
            self.emit_op(Op::super_call(0));
            self.emit_u16(symbol.0 as u16);
            self.emit_byte(superclass_index);
        }
    }

    /// `super(args)` with no method name chains to every superclass's own
    /// constructor of the same name as the one whose body is running,
    /// primary superclass first, in declaration order — the convention the
    /// worked multi-inheritance constructor example relies on. Each
    /// argument is evaluated once into a synthetic local and reloaded for
    /// every chained call rather than re-evaluated, since re-running the
    /// argument expressions once per superclass would duplicate their side
    /// effects.
    fn bare_super_call(&mut self) {
        self.consume(&TokenKind::LeftParen, "'('");
        let raw_arg_count = self.parse_arg_list(&TokenKind::RightParen);
        self.consume(&TokenKind::RightParen, "')'");
        let arg_count = self.check_arity(raw_arg_count);

        let mut arg_slots = Vec::with_capacity(arg_count as usize);
        for i in 0..arg_count {
            let slot_name = format!(" super arg{i}");
            self.declare_variable(&slot_name);
            self.mark_initialized();
            self.define_variable(&slot_name);
            let level = self.states.len() - 1;
            arg_slots.push(self.resolve_local(level, &slot_name).expect("just declared"));
        }

        let Some(class) = self.classes.last() else {
            self.emit_op(Op::Null);
            return;
        };
        let ctor_name = class.ctor_name.clone().unwrap_or_else(|| "new".to_string());
        let super_count = class.super_count;
        let init_sig = call_signature(&format!("init {ctor_name}"), arg_count);
        let symbol = self.realm.methods.intern(&init_sig);

        for superclass_index in 0..super_count {
            self.emit_load_local(0);
            for &slot in &arg_slots {
                self.emit_load_local(slot);
            }
            self.emit_op(Op::super_call(arg_count));
            self.emit_u16(symbol.0 as u16);
            self.emit_byte(superclass_index);
            self.emit_op(Op::Pop);
        }
        // `super(...)` is itself an expression; every expression leaves
        // exactly one value, matching `Null;Return` at the end of a body
        // with no explicit `return`.
        self.emit_op(Op::Null);
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let current_idx = self.states.len() - 1;
        if let Some(slot) = self.resolve_local(current_idx, name) {
            if can_assign && self.check_match(&TokenKind::Eq) {
                self.expression();
                self.emit_store_local(slot);
            } else {
                self.emit_load_local(slot);
            }
            return;
        }
        if let Some(slot) = self.resolve_upvalue(name) {
            if can_assign && self.check_match(&TokenKind::Eq) {
                self.expression();
                self.emit_op(Op::StoreUpvalue);
                self.emit_byte(slot);
            } else {
                self.emit_op(Op::LoadUpvalue);
                self.emit_byte(slot);
            }
            return;
        }
        if name.starts_with('_') {
            if let Some(class) = self.classes.last() {
                if let Some(field_idx) = class.field_index(name) {
                    if can_assign && self.check_match(&TokenKind::Eq) {
                        self.expression();
                        self.emit_op(Op::StoreFieldThis);
                    } else {
                        self.emit_op(Op::LoadFieldThis);
                    }
                    self.emit_u16(field_idx as u16);
                    return;
                }
            }
        }
        if !self.classes.is_empty() && name.chars().next().is_some_and(char::is_lowercase) {
            // Implicit `this.name(...)` call.
            self.emit_load_local(0);
            if self.check_match(&TokenKind::LeftParen) {
                let raw_arity = self.parse_arg_list(&TokenKind::RightParen);
                self.consume(&TokenKind::RightParen, "')'");
                let arity = self.check_arity(raw_arity);
                let sig = call_signature(name, arity);
                self.emit_call_sig(arity, &sig);
            } else if can_assign && self.check_match(&TokenKind::Eq) {
                self.expression();
                let sig = format!("{name}=(_)");
                self.emit_call_sig(1, &sig);
            } else {
                self.emit_call_sig(0, name);
            }
            return;
        }
        // Module variable (implicitly declared at module scope if unseen).
        let name_value = self.intern_string(name);
        let idx = self.add_constant(name_value);
        if can_assign && self.check_match(&TokenKind::Eq) {
            self.expression();
            self.emit_op(Op::StoreModuleVar);
            self.emit_u16(idx);
        } else {
            self.emit_op(Op::LoadModuleVar);
            self.emit_u16(idx);
        }
    }

    fn list_literal(&mut self) {
        self.named_variable("List", false);
        self.emit_call_sig(0, "new");
        self.skip_lines();
        while !self.check(&TokenKind::RightBracket) {
            self.expression();
            self.emit_call_sig(1, "add(_)");
            self.emit_op(Op::Pop);
            self.skip_lines();
            if !self.check_match(&TokenKind::Comma) {
                break;
            }
            self.skip_lines();
        }
        self.consume(&TokenKind::RightBracket, "']'");
    }

    fn map_or_block_literal(&mut self) {
        self.block_literal_with_params(false);
    }

    /// Parses `{ |params| body }` (or, via the `Pipe`/`PipePipe` entry point,
    /// a block whose leading `{` was already consumed as part of a call) as
    /// an anonymous function literal, compiling it as a nested closure.
    fn block_literal_with_params(&mut self, no_params: bool) {
        self.states.push(FunctionState::new("block", FunctionKind::Function));
        self.begin_scope();
        if !no_params && self.check_match(&TokenKind::Pipe) {
            if !self.check(&TokenKind::Pipe) {
                loop {
                    let pname = self.consume_identifier("parameter name");
                    self.declare_local(pname);
                    self.mark_initialized();
                    self.state().arity += 1;
                    if !self.check_match(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(&TokenKind::Pipe, "'|'");
        }
        self.skip_lines();
        let mut tail_expr = false;
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            tail_expr = self.declaration();
            self.skip_lines();
        }
        self.consume(&TokenKind::RightBrace, "'}'");
        if tail_expr {
            self.undo_trailing_pop();
        }
        let (handle, upvalues) = self.end_function("block".to_string(), tail_expr);
        self.emit_closure(handle, &upvalues);
    }
}

#[must_use]
pub fn call_signature(name: &str, arity: u8) -> String {
    if arity == 0 {
        return name.to_string();
    }
    let args = vec!["_"; arity as usize].join(",");
    format!("{name}({args})")
}

#[must_use]
pub fn subscript_signature(arity: u8, is_setter: bool) -> String {
    let args = vec!["_"; arity as usize].join(",");
    if is_setter {
        format!("[{args}]=(_)")
    } else {
        format!("[{args}]")
    }
}
