// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! A small embedder demo: run a script file, or read one line at a time
//! from an interactive prompt, against the public [`crate::Vm`] API. This
//! is not part of the embedding surface itself — it's `src/bin/cardinal.rs`'s
//! implementation, kept here so it's testable without spawning a process.

use crate::config::Configuration;
use crate::error::{CardinalError, ExitCode};
use crate::vm::Vm;
use std::io::{self, BufRead, Write};

/// Compile and run `source` as module `module_name`, writing the program's
/// own output through `config.print` (already wired by the caller) and any
/// error to `stderr`. Returns the exit code the embedding API's §6 exit-code
/// table prescribes.
pub fn run_source(source: &str, module_name: &str, config: Configuration) -> ExitCode {
    let mut vm = Vm::new(config);
    match vm.interpret(source, module_name) {
        Ok(_) => ExitCode::Success,
        Err(err) => {
            eprint!("{err}");
            ExitCode::from(&err)
        }
    }
}

/// Read-eval-print loop: one line of source per prompt, sharing a single
/// `Vm` (and so a single set of module-level variables) across lines.
/// Compile errors on one line don't end the session; the script is still
/// compiled as its own fresh module each time, since the language has no
/// standalone "eval this expression in an existing scope" primitive.
pub fn run_interactive<R: BufRead, W: Write>(mut input: R, mut output: W, config: Configuration) -> io::Result<()> {
    let mut vm = Vm::new(config);
    let mut line_no = 0usize;
    let mut line = String::new();
    loop {
        write!(output, "> ")?;
        output.flush()?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            return Ok(());
        }
        line_no += 1;
        let module_name = format!("repl:{line_no}");
        match vm.interpret(&line, &module_name) {
            Ok(value) => {
                if !matches!(value, crate::value::Value::Null) {
                    writeln!(output, "{}", vm.heap.print_value(value))?;
                }
            }
            Err(CardinalError::Compile(errors)) => {
                for e in errors {
                    writeln!(output, "error: {e}")?;
                }
            }
            Err(CardinalError::Runtime { error, .. }) => {
                writeln!(output, "error: {error}")?;
            }
        }
    }
}
