pub mod builtins;
pub mod compiler;
pub mod error;
pub mod opcode;
pub mod symbol_table;
pub mod value;
pub mod vm;

pub use compiler::{Bytecode, Compiler};
pub use error::{VmError, VmResult};
pub use symbol_table::SymbolTable;
pub use value::Value;
pub use vm::Vm;

/// Compiles and runs a complete program in one shot, returning the value
/// left behind by the last expression statement. Used by the file-runner
/// front end; the REPL keeps its own persistent `Compiler`/`Vm` pair
/// instead so globals survive across lines.
pub fn run(source: &str) -> Result<Value, VmError> {
    let (program, lex_errors, parse_errors) = rill_parser::parse(source);
    if let Some(err) = lex_errors.first() {
        return Err(VmError::CompileError(err.to_string()));
    }
    if let Some(err) = parse_errors.first() {
        return Err(VmError::CompileError(err.to_string()));
    }
    let mut compiler = Compiler::new();
    compiler.compile(&program)?;
    let bytecode = compiler.bytecode();
    let mut vm = Vm::new();
    vm.run(bytecode)?;
    Ok(vm.last_popped_stack_elem().clone())
}
