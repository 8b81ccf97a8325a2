// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! Class and method declaration lowering.
//!
//! Because the compiler never builds an AST, a class body is scanned twice:
//! once (over a saved token range, no code emitted) purely to collect field
//! names declared via `fields { ... }` / `field _x`, and again to actually
//! emit the `CLASS` opcode and each method. Fields must be known before any
//! method is compiled since a field reference compiles straight to a
//! `LOAD_FIELD_THIS`/`STORE_FIELD_THIS` with a numeric offset.

use super::rules::{binary_operator_signature, unary_operator_signature, ClassState, FunctionKind, FunctionState};
use super::{call_signature, subscript_signature, Compiler};
use crate::bytecode::{Chunk, Op};
use crate::error::CompileError;
use crate::reader::lexer::TokenKind;
use crate::value::object::FnObj;
use crate::value::{Object, Symbol, Value};

impl<'h, 'r> Compiler<'h, 'r> {
    pub(super) fn class_declaration(&mut self) {
        let class_name = self.consume_identifier("class name");
        let mut super_count = 0u8;
        if self.check_match(&TokenKind::Is) {
            loop {
                let super_name = self.consume_identifier("superclass name");
                self.named_variable(&super_name, false);
                super_count += 1;
                if !self.check_match(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::LeftBrace, "'{' before class body");
        let body_start = self.pos;
        let body_end = self.skip_balanced_braces();
        let fields = self.collect_fields(body_start, body_end);
        self.pos = body_start;

        let field_count = if fields.len() > u16::MAX as usize {
            self.errors.push(CompileError::TooManyFields { line: self.previous_line });
            u16::MAX
        } else {
            fields.len() as u16
        };

        let name_value = self.intern_string(&class_name);
        let name_idx = self.add_constant(name_value);
        self.emit_op(Op::Class);
        self.emit_u16(field_count);
        self.emit_byte(super_count);
        self.emit_u16(name_idx);

        // The class value left on the stack by `CLASS` is now exactly what a
        // freshly declared local/module variable for `class_name` holds, so
        // it is declared only now, not before the opcode ran.
        self.declare_variable(&class_name);
        self.mark_initialized();

        self.classes.push(ClassState {
            name: class_name.clone(),
            fields,
            in_static: false,
            super_count,
            ctor_name: None,
        });

        self.skip_lines();
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            if self.check_match(&TokenKind::Fields) {
                self.skip_fields_block();
            } else if self.check_match(&TokenKind::Field) {
                self.consume_identifier("field name");
            } else if self.check_match(&TokenKind::Foreign) {
                // Marks the class as host-backed; instance allocation and
                // destruction for foreign classes are wired up by the
                // embedder through `Realm::register_destructor`, not here.
            } else if self.check_match(&TokenKind::Pre) {
                self.pre_block();
            } else if self.check_match(&TokenKind::Static) {
                self.method_member(true);
            } else if self.check_match(&TokenKind::Construct) {
                self.construct_declaration();
            } else {
                self.method_member(false);
            }
            self.skip_lines();
        }
        self.consume(&TokenKind::RightBrace, "'}'");
        self.classes.pop();

        self.define_variable(&class_name);
    }

    fn skip_balanced_braces(&self) -> usize {
        let mut depth = 1i32;
        let mut i = self.pos;
        while i < self.tokens.len() {
            match self.tokens[i].kind {
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace => {
                    depth -= 1;
                    if depth == 0 {
                        return i;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        self.tokens.len().saturating_sub(1)
    }

    fn collect_fields(&self, start: usize, end: usize) -> Vec<String> {
        let mut fields = Vec::new();
        let mut i = start;
        while i < end {
            match &self.tokens[i].kind {
                TokenKind::Fields => {
                    i += 1;
                    if i < end && self.tokens[i].kind == TokenKind::LeftBrace {
                        i += 1;
                        while i < end && self.tokens[i].kind != TokenKind::RightBrace {
                            if let TokenKind::Identifier(name) = &self.tokens[i].kind {
                                if !fields.contains(name) {
                                    fields.push(name.clone());
                                }
                            }
                            i += 1;
                        }
                    }
                }
                TokenKind::Field => {
                    if let Some(tok) = self.tokens.get(i + 1) {
                        if let TokenKind::Identifier(name) = &tok.kind {
                            if !fields.contains(name) {
                                fields.push(name.clone());
                            }
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
        fields
    }

    fn skip_fields_block(&mut self) {
        self.consume(&TokenKind::LeftBrace, "'{' after 'fields'");
        self.skip_lines();
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            self.consume_identifier("field name");
            self.skip_lines();
            if !self.check_match(&TokenKind::Comma) {
                break;
            }
            self.skip_lines();
        }
        self.consume(&TokenKind::RightBrace, "'}'");
    }

    fn pre_block(&mut self) {
        self.consume(&TokenKind::LeftBrace, "'{' after 'pre'");
        self.states.push(FunctionState::new(" pre", FunctionKind::StaticMethod));
        self.begin_scope();
        let tail_expr = self.block();
        if tail_expr {
            self.undo_trailing_pop();
        } else {
            self.end_scope();
        }
        let (handle, upvalues) = self.end_function(" pre".to_string(), tail_expr);
        self.emit_closure(handle, &upvalues);
        let symbol = self.realm.methods.intern(" pre");
        self.emit_op(Op::MethodStatic);
        self.emit_u16(symbol.0 as u16);
    }

    fn method_member(&mut self, is_static: bool) {
        let Some((signature, params)) = self.parse_method_signature() else { return };
        let arity = params.len() as u8;
        self.consume(&TokenKind::LeftBrace, "'{' before method body");
        let kind = if is_static { FunctionKind::StaticMethod } else { FunctionKind::Method };
        self.states.push(FunctionState::new(signature.clone(), kind));
        if let Some(class) = self.classes.last_mut() {
            class.in_static = is_static;
        }
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
        let (handle, upvalues) = self.end_function(signature.clone(), tail_expr);
        self.emit_closure(handle, &upvalues);
        let symbol = self.realm.methods.intern(&signature);
        self.emit_op(if is_static { Op::MethodStatic } else { Op::MethodInstance });
        self.emit_u16(symbol.0 as u16);
    }

    fn construct_declaration(&mut self) {
        let ctor_name = self.consume_identifier("constructor name");
        self.consume(&TokenKind::LeftParen, "'('");
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
        let init_sig = call_signature(&format!("init {ctor_name}"), arity);

        self.consume(&TokenKind::LeftBrace, "'{' before constructor body");
        if let Some(class) = self.classes.last_mut() {
            class.ctor_name = Some(ctor_name.clone());
        }
        self.states.push(FunctionState::new(init_sig.clone(), FunctionKind::Initializer));
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
        let (handle, upvalues) = self.end_function(init_sig.clone(), tail_expr);
        self.emit_closure(handle, &upvalues);
        let init_symbol = self.realm.methods.intern(&init_sig);
        self.emit_op(Op::MethodInstance);
        self.emit_u16(init_symbol.0 as u16);

        self.emit_synthetic_allocator(&ctor_name, arity, init_symbol);
    }

    /// `name(args)` as a static method: `CONSTRUCT` swaps the receiver slot
    /// for a fresh instance, the initializer runs on it, and the instance
    /// (not the initializer's own return value) is what the call yields.
    fn emit_synthetic_allocator(&mut self, name: &str, arity: u8, init_symbol: Symbol) {
        let line = self.previous_line;
        let mut chunk = Chunk::new();
        chunk.emit_op(Op::Construct, line);
        for slot in 0..=arity {
            chunk.emit_load_local(slot, line);
        }
        chunk.emit_op(Op::call(arity), line);
        chunk.emit_u16(init_symbol.0 as u16);
        chunk.emit_op(Op::Pop, line);
        chunk.emit_load_local(0, line);
        chunk.emit_op(Op::Return, line);

        let fn_obj = FnObj {
            chunk,
            arity,
            upvalue_count: 0,
            module: self.module,
            name: name.to_string(),
            source_path: self.source_path.clone(),
        };
        let handle = self.heap.alloc(Object::Fn(fn_obj), &self.protected);
        self.protected.push(handle);
        let const_idx = self.add_constant(Value::Obj(handle));
        self.emit_op(Op::Closure);
        self.emit_u16(const_idx);
        let alloc_symbol = self.realm.methods.intern(&call_signature(name, arity));
        self.emit_op(Op::MethodStatic);
        self.emit_u16(alloc_symbol.0 as u16);
    }

    /// Parses a method signature (plain name, getter, setter, operator, or
    /// subscript) starting at the current token, returning the interned-style
    /// signature string together with the real parameter names to bind as
    /// locals in the method's own frame.
    fn parse_method_signature(&mut self) -> Option<(String, Vec<String>)> {
        let tok = self.current().kind.clone();
        match tok {
            TokenKind::LeftBracket => {
                self.advance();
                let mut params = Vec::new();
                if !self.check(&TokenKind::RightBracket) {
                    loop {
                        params.push(self.consume_identifier("subscript parameter"));
                        if !self.check_match(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.consume(&TokenKind::RightBracket, "']'");
                if self.check_match(&TokenKind::Eq) {
                    self.consume(&TokenKind::LeftParen, "'('");
                    params.push(self.consume_identifier("setter value parameter"));
                    self.consume(&TokenKind::RightParen, "')'");
                    let getter_arity = (params.len() - 1) as u8;
                    Some((subscript_signature(getter_arity, true), params))
                } else {
                    Some((subscript_signature(params.len() as u8, false), params))
                }
            }
            TokenKind::Minus | TokenKind::Bang | TokenKind::Tilde => {
                self.advance();
                if self.check_match(&TokenKind::LeftParen) {
                    let param = self.consume_identifier("parameter name");
                    self.consume(&TokenKind::RightParen, "')'");
                    let sig = binary_operator_signature(&tok)
                        .or_else(|| unary_operator_signature(&tok))
                        .unwrap_or("?");
                    Some((sig.to_string(), vec![param]))
                } else {
                    let sig = unary_operator_signature(&tok).expect("unary operator token");
                    Some((sig.to_string(), Vec::new()))
                }
            }
            _ if binary_operator_signature(&tok).is_some() => {
                self.advance();
                self.consume(&TokenKind::LeftParen, "'('");
                let param = self.consume_identifier("parameter name");
                self.consume(&TokenKind::RightParen, "')'");
                Some((binary_operator_signature(&tok).expect("checked above").to_string(), vec![param]))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if self.check_match(&TokenKind::Eq) {
                    self.consume(&TokenKind::LeftParen, "'('");
                    let param = self.consume_identifier("setter value parameter");
                    self.consume(&TokenKind::RightParen, "')'");
                    Some((format!("{name}=(_)"), vec![param]))
                } else if self.check_match(&TokenKind::LeftParen) {
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
                    let sig = call_signature(&name, params.len() as u8);
                    Some((sig, params))
                } else {
                    Some((name, Vec::new()))
                }
            }
            _ => {
                self.error("expected a method signature");
                None
            }
        }
    }
}
