// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! `cardinal [script]` — run a script file, or start an interactive session
//! reading from stdin if no path is given.

use cardinal::config::Configuration;
use cardinal::error::ExitCode;
use cardinal::repl;
use std::io;
use std::process;

fn exit_status(code: ExitCode) -> i32 {
    match code {
        ExitCode::Success => 0,
        ExitCode::CompileError => 65,
        ExitCode::RuntimeError => 70,
    }
}

fn main() {
    env_logger::init();
    let mut args = std::env::args().skip(1);
    let status = match args.next() {
        Some(path) => run_file(&path),
        None => run_interactive(),
    };
    process::exit(status);
}

fn run_file(path: &str) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cardinal: can't read '{path}': {e}");
            return 74;
        }
    };
    let root_directory = std::path::Path::new(path).parent().map(std::path::Path::to_path_buf);
    let mut config = Configuration::default();
    if let Some(dir) = root_directory {
        config = config.with_root_directory(dir);
    }
    exit_status(repl::run_source(&source, path, config))
}

fn run_interactive() -> i32 {
    let stdin = io::stdin();
    match repl::run_interactive(stdin.lock(), io::stdout(), Configuration::default()) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("cardinal: {e}");
            74
        }
    }
}
