//! Interactive REPL, compiled path only. Each line is compiled against the
//! previous lines' symbol table and constants, then run against a `Vm` that
//! keeps its globals between lines, so a `let` on one line is visible on
//! the next.

use std::io::{self, BufRead, Write};

use rill_vm::compiler::Compiler;
use rill_vm::{SymbolTable, Value, Vm};

fn main() {
    println!("rill REPL — Ctrl-D to exit, :help for commands");

    let mut state: Option<(Vec<Value>, SymbolTable)> = None;
    let mut globals: Option<Vec<Value>> = None;

    loop {
        print!(">> ");
        io::stdout().flush().unwrap();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Err(e) => {
                eprintln!("error: {e}");
                break;
            }
            Ok(_) => {}
        }

        match line.trim() {
            "" => continue,
            ":quit" | ":q" => break,
            ":help" => {
                print_help();
                continue;
            }
            _ => {}
        }

        let (program, lex_errors, parse_errors) = rill_parser::parse(&line);
        if !lex_errors.is_empty() || !parse_errors.is_empty() {
            for e in &lex_errors {
                eprintln!("  [lex]   {e}");
            }
            for e in &parse_errors {
                eprintln!("  [parse] {e}");
            }
            continue;
        }

        let mut compiler = match state.take() {
            Some((constants, symbol_table)) => Compiler::new_with_state(constants, symbol_table),
            None => Compiler::new(),
        };
        if let Err(e) = compiler.compile(&program) {
            eprintln!("  [compile] {e}");
            state = Some(compiler.into_state());
            continue;
        }

        let snapshot = compiler.state_snapshot();
        let bytecode = compiler.bytecode();

        let mut vm = match globals.take() {
            Some(g) => Vm::new_with_globals(g),
            None => Vm::new(),
        };
        match vm.run(bytecode) {
            Ok(()) => println!("{}", vm.last_popped_stack_elem()),
            Err(e) => eprintln!("  [runtime] {e}"),
        }
        globals = Some(vm.take_globals());
        state = Some(snapshot);
    }
}

fn print_help() {
    println!("  :quit / :q    exit the REPL");
    println!("  :help         show this message");
}
