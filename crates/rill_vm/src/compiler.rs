use crate::builtins::BUILTINS;
use crate::error::VmError;
use crate::opcode::{make, Op};
use crate::symbol_table::{Scope, SymbolTable};
use crate::value::{CompiledFunction, Value};
use rill_parser::{BlockStatement, Expr, ExprKind, InfixOp, PrefixOp, Program, Stmt, StmtKind};

#[derive(Debug, Clone)]
pub struct Bytecode {
    pub instructions: Vec<u8>,
    pub constants: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    op: Op,
    position: usize,
}

#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Vec<u8>,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Value>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
    scope_index: usize,
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbol_table = SymbolTable::new();
        for (index, (name, _)) in BUILTINS.iter().enumerate() {
            symbol_table.define_builtin(index, name);
        }
        Compiler {
            constants: Vec::new(),
            symbol_table,
            scopes: vec![CompilationScope::default()],
            scope_index: 0,
        }
    }

    /// Builds a compiler that continues compiling against an existing
    /// global symbol table and constant pool, for the REPL: each line is
    /// compiled separately but must see the previous lines' globals.
    pub fn new_with_state(constants: Vec<Value>, symbol_table: SymbolTable) -> Self {
        Compiler { constants, symbol_table, scopes: vec![CompilationScope::default()], scope_index: 0 }
    }

    pub fn into_state(self) -> (Vec<Value>, SymbolTable) {
        (self.constants, self.symbol_table)
    }

    /// A cheap snapshot of the state `into_state` would return, taken
    /// without consuming the compiler. The REPL needs this because it also
    /// needs `bytecode()`, which does consume it.
    pub fn state_snapshot(&self) -> (Vec<Value>, SymbolTable) {
        (self.constants.clone(), self.symbol_table.clone())
    }

    pub fn bytecode(mut self) -> Bytecode {
        let instructions = std::mem::take(&mut self.scopes[self.scope_index].instructions);
        Bytecode { instructions, constants: self.constants }
    }

    pub fn compile(&mut self, program: &Program) -> Result<(), VmError> {
        for stmt in &program.statements {
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    fn compile_statement(&mut self, stmt: &Stmt) -> Result<(), VmError> {
        match &stmt.inner {
            StmtKind::Let { name, value } => {
                let symbol = self.symbol_table.define(name);
                self.compile_expression(value)?;
                match symbol.scope {
                    Scope::Global => self.emit(Op::SetGlobal, &[symbol.index]),
                    Scope::Local => self.emit(Op::SetLocal, &[symbol.index]),
                    Scope::Free | Scope::Builtin => {
                        unreachable!("`let` always defines a Global or Local symbol")
                    }
                };
                Ok(())
            }
            StmtKind::Return { value } => {
                self.compile_expression(value)?;
                self.emit(Op::ReturnValue, &[]);
                Ok(())
            }
            StmtKind::Expression { value } => {
                self.compile_expression(value)?;
                self.emit(Op::Pop, &[]);
                Ok(())
            }
        }
    }

    fn compile_block(&mut self, block: &BlockStatement) -> Result<(), VmError> {
        for stmt in &block.statements {
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    fn compile_expression(&mut self, expr: &Expr) -> Result<(), VmError> {
        match &expr.inner {
            ExprKind::IntegerLiteral(value) => {
                let idx = self.add_constant(Value::Integer(*value));
                self.emit(Op::Constant, &[idx]);
            }
            ExprKind::StringLiteral(value) => {
                let idx = self.add_constant(Value::str(value.as_str()));
                self.emit(Op::Constant, &[idx]);
            }
            ExprKind::Boolean(true) => {
                self.emit(Op::True, &[]);
            }
            ExprKind::Boolean(false) => {
                self.emit(Op::False, &[]);
            }
            ExprKind::Identifier(name) => self.compile_identifier(name)?,
            ExprKind::Prefix { operator, right } => {
                self.compile_expression(right)?;
                match operator {
                    PrefixOp::Minus => self.emit(Op::Minus, &[]),
                    PrefixOp::Bang => self.emit(Op::Bang, &[]),
                };
            }
            ExprKind::Infix { operator, left, right } => self.compile_infix(*operator, left, right)?,
            ExprKind::If { condition, consequence, alternative } => {
                self.compile_if(condition, consequence, alternative.as_ref())?
            }
            ExprKind::ArrayLiteral(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Op::Array, &[elements.len()]);
            }
            ExprKind::HashLiteral(pairs) => {
                // Sorted by the key expression's source-text form, not
                // source order, so the compiled constant/instruction order
                // (and the resulting Hash's iteration order) is
                // deterministic regardless of how the literal was written.
                let mut sorted: Vec<&(Expr, Expr)> = pairs.iter().collect();
                sorted.sort_by(|(a, _), (b, _)| a.to_string().cmp(&b.to_string()));
                for (key, value) in sorted {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Op::Hash, &[pairs.len() * 2]);
            }
            ExprKind::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Op::Index, &[]);
            }
            ExprKind::FunctionLiteral { parameters, body } => self.compile_function_literal(parameters, body)?,
            ExprKind::Call { function, arguments } => {
                self.compile_expression(function)?;
                for arg in arguments {
                    self.compile_expression(arg)?;
                }
                self.emit(Op::Call, &[arguments.len()]);
            }
        }
        Ok(())
    }

    fn compile_identifier(&mut self, name: &str) -> Result<(), VmError> {
        let symbol = self
            .symbol_table
            .resolve(name)
            .ok_or_else(|| VmError::CompileError(format!("undefined variable {name}")))?;
        match symbol.scope {
            Scope::Global => self.emit(Op::GetGlobal, &[symbol.index]),
            Scope::Local => self.emit(Op::GetLocal, &[symbol.index]),
            Scope::Free => self.emit(Op::GetFree, &[symbol.index]),
            Scope::Builtin => self.emit(Op::GetBuiltin, &[symbol.index]),
        };
        Ok(())
    }

    fn compile_infix(&mut self, operator: InfixOp, left: &Expr, right: &Expr) -> Result<(), VmError> {
        if operator == InfixOp::Lt {
            // there is no OpLessThan: reorder the operands and reuse
            // OpGreaterThan, so `a < b` compiles identically to `b > a`.
            self.compile_expression(right)?;
            self.compile_expression(left)?;
            self.emit(Op::GreaterThan, &[]);
            return Ok(());
        }
        self.compile_expression(left)?;
        self.compile_expression(right)?;
        let op = match operator {
            InfixOp::Add => Op::Add,
            InfixOp::Sub => Op::Sub,
            InfixOp::Mul => Op::Mul,
            InfixOp::Div => Op::Div,
            InfixOp::Gt => Op::GreaterThan,
            InfixOp::Eq => Op::Equal,
            InfixOp::NotEq => Op::NotEqual,
            InfixOp::Lt => unreachable!("handled above"),
        };
        self.emit(op, &[]);
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expr,
        consequence: &BlockStatement,
        alternative: Option<&BlockStatement>,
    ) -> Result<(), VmError> {
        self.compile_expression(condition)?;
        let jump_not_truthy_pos = self.emit(Op::JumpNotTruthy, &[9999]);

        self.compile_block(consequence)?;
        if self.last_instruction_is(Op::Pop) {
            self.remove_last_pop();
        }

        let jump_pos = self.emit(Op::Jump, &[9999]);
        let after_consequence_pos = self.current_instructions().len();
        self.change_operand(jump_not_truthy_pos, after_consequence_pos);

        match alternative {
            Some(alt) => {
                self.compile_block(alt)?;
                if self.last_instruction_is(Op::Pop) {
                    self.remove_last_pop();
                }
            }
            None => {
                self.emit(Op::Null, &[]);
            }
        }
        let after_alternative_pos = self.current_instructions().len();
        self.change_operand(jump_pos, after_alternative_pos);
        Ok(())
    }

    fn compile_function_literal(&mut self, parameters: &[String], body: &BlockStatement) -> Result<(), VmError> {
        self.enter_scope();
        for param in parameters {
            self.symbol_table.define(param);
        }
        self.compile_block(body)?;
        if self.last_instruction_is(Op::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Op::ReturnValue) {
            self.emit(Op::Return, &[]);
        }

        let free_symbols = self.symbol_table.free_symbols.clone();
        let num_locals = self.symbol_table_num_definitions();
        let instructions = self.leave_scope();

        for free in &free_symbols {
            match free.scope {
                Scope::Local => self.emit(Op::GetLocal, &[free.index]),
                Scope::Free => self.emit(Op::GetFree, &[free.index]),
                Scope::Global | Scope::Builtin => {
                    unreachable!("captured free variables are never Global or Builtin")
                }
            };
        }

        let func = Value::CompiledFunction(std::rc::Rc::new(CompiledFunction {
            instructions,
            num_locals,
            num_parameters: parameters.len(),
        }));
        let const_idx = self.add_constant(func);
        self.emit(Op::Closure, &[const_idx, free_symbols.len()]);
        Ok(())
    }

    fn symbol_table_num_definitions(&self) -> usize {
        // recomputed rather than stored separately: every Define call in
        // the current scope bumped the local counter the symbol table
        // already tracks internally, so count locals via a fresh probe.
        self.symbol_table.local_count()
    }

    fn current_scope(&mut self) -> &mut CompilationScope {
        &mut self.scopes[self.scope_index]
    }

    fn current_instructions(&self) -> &[u8] {
        &self.scopes[self.scope_index].instructions
    }

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    fn emit(&mut self, op: Op, operands: &[usize]) -> usize {
        let instruction = make(op, operands);
        let position = self.add_instruction(instruction);
        self.set_last_instruction(op, position);
        position
    }

    fn add_instruction(&mut self, instruction: Vec<u8>) -> usize {
        let scope = self.current_scope();
        let position = scope.instructions.len();
        scope.instructions.extend(instruction);
        position
    }

    fn set_last_instruction(&mut self, op: Op, position: usize) {
        let scope = self.current_scope();
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction { op, position });
    }

    fn last_instruction_is(&self, op: Op) -> bool {
        self.scopes[self.scope_index].last_instruction.map(|i| i.op) == Some(op)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.current_scope();
        let last = scope.last_instruction.expect("remove_last_pop called with no last instruction");
        scope.instructions.truncate(last.position);
        scope.last_instruction = scope.previous_instruction;
    }

    fn replace_last_pop_with_return(&mut self) {
        let last_pos = self.scopes[self.scope_index].last_instruction.unwrap().position;
        let new_instruction = make(Op::ReturnValue, &[]);
        self.replace_instruction(last_pos, new_instruction);
        self.current_scope().last_instruction.as_mut().unwrap().op = Op::ReturnValue;
    }

    fn replace_instruction(&mut self, position: usize, new_instruction: Vec<u8>) {
        let scope = self.current_scope();
        scope.instructions[position..position + new_instruction.len()].copy_from_slice(&new_instruction);
    }

    fn change_operand(&mut self, op_position: usize, operand: usize) {
        let op = Op::from_u8(self.scopes[self.scope_index].instructions[op_position])
            .expect("change_operand called on a non-opcode byte");
        let new_instruction = make(op, &[operand]);
        self.replace_instruction(op_position, new_instruction);
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        self.scope_index += 1;
        let outer = std::mem::replace(&mut self.symbol_table, SymbolTable::new());
        self.symbol_table = outer.enclose();
    }

    fn leave_scope(&mut self) -> Vec<u8> {
        let scope = self.scopes.pop().expect("leave_scope called with no enclosing scope");
        self.scope_index -= 1;
        let inner = std::mem::replace(&mut self.symbol_table, SymbolTable::new());
        self.symbol_table = inner.leave();
        scope.instructions
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::disassemble;

    fn compile_src(src: &str) -> Bytecode {
        let (program, lex_errors, parse_errors) = rill_parser::parse(src);
        assert!(lex_errors.is_empty());
        assert!(parse_errors.is_empty());
        let mut compiler = Compiler::new();
        compiler.compile(&program).expect("compile should succeed");
        compiler.bytecode()
    }

    #[test]
    fn test_integer_arithmetic() {
        let bytecode = compile_src("1 + 2");
        assert_eq!(bytecode.constants, vec![Value::Integer(1), Value::Integer(2)]);
        let expected = disassemble(&{
            let mut ins = make(Op::Constant, &[0]);
            ins.extend(make(Op::Constant, &[1]));
            ins.extend(make(Op::Add, &[]));
            ins.extend(make(Op::Pop, &[]));
            ins
        });
        assert_eq!(disassemble(&bytecode.instructions), expected);
    }

    #[test]
    fn test_less_than_swaps_operands() {
        let bytecode = compile_src("1 < 2;");
        assert_eq!(bytecode.constants, vec![Value::Integer(2), Value::Integer(1)]);
    }

    #[test]
    fn test_boolean_expressions() {
        let bytecode = compile_src("true; false;");
        let expected = {
            let mut ins = make(Op::True, &[]);
            ins.extend(make(Op::Pop, &[]));
            ins.extend(make(Op::False, &[]));
            ins.extend(make(Op::Pop, &[]));
            ins
        };
        assert_eq!(bytecode.instructions, expected);
    }

    #[test]
    fn test_global_let_statements() {
        let bytecode = compile_src("let one = 1; let two = 2;");
        assert!(disassemble(&bytecode.instructions).contains("SetGlobal 0"));
        assert!(disassemble(&bytecode.instructions).contains("SetGlobal 1"));
    }

    #[test]
    fn test_conditionals_strip_trailing_pop_in_branches() {
        let bytecode = compile_src("if (true) { 10 }; 3333;");
        let dis = disassemble(&bytecode.instructions);
        // the branch value must not be popped before the outer Pop runs.
        assert!(dis.contains("Null"));
        assert!(dis.contains("JumpNotTruthy"));
    }

    #[test]
    fn test_function_body_tail_pop_becomes_return_value() {
        let bytecode = compile_src("fn() { 5 + 10 }");
        match &bytecode.constants[2] {
            Value::CompiledFunction(func) => {
                let dis = disassemble(&func.instructions);
                assert!(dis.trim_end().ends_with("ReturnValue"));
            }
            other => panic!("expected a compiled function constant, got {other:?}"),
        }
    }

    #[test]
    fn test_function_without_trailing_expression_emits_return() {
        let bytecode = compile_src("fn() { }");
        match bytecode.constants.last().unwrap() {
            Value::CompiledFunction(func) => assert_eq!(func.instructions, make(Op::Return, &[])),
            other => panic!("unexpected constant {other:?}"),
        }
    }

    #[test]
    fn test_closure_captures_free_variables() {
        let bytecode = compile_src("fn(a) { fn(b) { a + b } }");
        let outer = bytecode.constants.iter().find_map(|c| match c {
            Value::CompiledFunction(f) if disassemble(&f.instructions).contains("Closure") => Some(f.clone()),
            _ => None,
        });
        let outer = outer.expect("expected the outer function to build an inner Closure");
        let dis = disassemble(&outer.instructions);
        assert!(dis.contains("GetLocal 0"));
        assert!(dis.contains("Closure"));
    }

    #[test]
    fn test_undefined_identifier_is_compile_error() {
        let (program, _, _) = rill_parser::parse("foobar;");
        let mut compiler = Compiler::new();
        let err = compiler.compile(&program).unwrap_err();
        assert!(matches!(err, VmError::CompileError(_)));
    }

    #[test]
    fn test_compiler_determinism() {
        let a = compile_src("let x = 1; let y = fn(a, b) { a + b }; y(x, 2);");
        let b = compile_src("let x = 1; let y = fn(a, b) { a + b }; y(x, 2);");
        assert_eq!(a.instructions, b.instructions);
        assert_eq!(a.constants, b.constants);
    }

    #[test]
    fn test_hash_literal_compiles_keys_in_sorted_order_not_source_order() {
        // Keys are out of source order ("b", "a", "c"); the compiler must
        // sort by each key's string form before emitting, so the constant
        // pool holds key/value pairs in "a", "b", "c" order regardless.
        let bytecode = compile_src(r#"{"b": 1, "a": 2, "c": 3}"#);
        assert_eq!(
            bytecode.constants,
            vec![
                Value::str("a"),
                Value::Integer(2),
                Value::str("b"),
                Value::Integer(1),
                Value::str("c"),
                Value::Integer(3),
            ]
        );
        assert!(disassemble(&bytecode.instructions).contains("Hash 6"));
    }
}
