// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! # Cardinal
//!
//! An embeddable, class-based scripting language runtime: a single-pass
//! compiler, a stack-based bytecode virtual machine, and a tri-color
//! mark-sweep garbage collector.
//!
//! ## Architecture
//!
//! - [`reader::lexer`] tokenizes source text.
//! - [`compiler`] parses and compiles directly to [`bytecode`] in one pass,
//!   no intermediate AST.
//! - [`vm`] owns the [`heap`], the [`realm`] of loaded modules and classes,
//!   and drives fiber-scheduled bytecode execution.
//! - [`intrinsics`] implements every core-class method that isn't itself
//!   Cardinal bytecode.
//! - [`process`] is the fiber: an independently scheduled stack of call
//!   frames and values.
//! - [`loader`] resolves `import` statements against the embedder-supplied
//!   module source callback.
//!
//! Embedding starts with [`Vm::new`] and a [`Configuration`]:
//!
//! ```
//! use cardinal::{Configuration, Vm};
//!
//! let mut vm = Vm::new(Configuration::default());
//! let result = vm.interpret("return 1 + 2\n", "main").unwrap();
//! assert_eq!(result.as_num(), Some(3.0));
//! ```

pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod error;
pub mod heap;
pub mod intrinsics;
pub mod loader;
pub mod process;
pub mod reader;
pub mod realm;
pub mod repl;
pub mod value;
pub mod vm;

/// Embedder-facing aliases for the two modules named differently internally
/// than in the public API.
pub use intrinsics as primitives;
pub use process as fiber;

pub use config::Configuration;
pub use error::{CardinalError, CompileError, ExitCode, RuntimeError};
pub use process::{Fiber, FiberStatus};
pub use value::{Handle, Symbol, Value};
pub use vm::Vm;

/// Crate version, for embedders that want to report which Cardinal runtime
/// they're linked against.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
