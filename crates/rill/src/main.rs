use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::process;

use rill_parser::parse;
use rill_vm::run;

fn main() {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => run_repl(),
        2 => match fs::read_to_string(&args[1]) {
            Ok(source) => run_source(&args[1], &source),
            Err(e) => {
                eprintln!("rill: cannot read '{}': {}", args[1], e);
                process::exit(1);
            }
        },
        _ => {
            eprintln!("Usage: rill [script.rill]");
            process::exit(1);
        }
    }
}

fn run_source(_path: &str, source: &str) {
    let (_program, lex_errors, parse_errors) = parse(source);
    let has_errors = !lex_errors.is_empty() || !parse_errors.is_empty();
    for e in &lex_errors {
        eprintln!("[LexError] {}", e);
    }
    for e in &parse_errors {
        eprintln!("[ParseError] {}", e);
    }
    if has_errors {
        eprintln!("{} error(s).", lex_errors.len() + parse_errors.len());
        process::exit(1);
    }

    match run(source) {
        Ok(_) => {}
        Err(e) => {
            eprintln!("[RuntimeError] {}", e);
            process::exit(1);
        }
    }
}

/// Bare fallback REPL for running the binary with no script argument. Each
/// line is compiled and run from scratch, with no state kept between lines;
/// `rill_repl` is the full REPL with persistent globals.
fn run_repl() {
    println!("rill v{} — Ctrl-D to exit", env!("CARGO_PKG_VERSION"));
    loop {
        print!(">> ");
        io::stdout().flush().unwrap();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => match run(&line) {
                Ok(v) => println!("{}", v),
                Err(e) => eprintln!("  Error: {}", e),
            },
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }
}
