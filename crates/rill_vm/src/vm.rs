use crate::builtins::BUILTINS;
use crate::compiler::Bytecode;
use crate::error::VmError;
use crate::opcode::{read_u16, Op};
use crate::value::{Closure, CompiledFunction, HashPair, Value};
use indexmap::IndexMap;
use std::rc::Rc;

const STACK_SIZE: usize = 2048;
const GLOBALS_SIZE: usize = 65536;
const MAX_FRAMES: usize = 1024;

struct Frame {
    closure: Rc<Closure>,
    ip: usize,
    base_pointer: usize,
}

impl Frame {
    fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Frame { closure, ip: 0, base_pointer }
    }

    fn instructions(&self) -> &[u8] {
        &self.closure.func.instructions
    }
}

pub struct Vm {
    constants: Vec<Value>,
    stack: Vec<Value>,
    sp: usize,
    globals: Vec<Value>,
    frames: Vec<Frame>,
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            constants: Vec::new(),
            stack: Vec::with_capacity(STACK_SIZE),
            sp: 0,
            globals: vec![Value::Null; GLOBALS_SIZE],
            frames: Vec::with_capacity(MAX_FRAMES),
        }
    }

    /// Reuses the globals array across runs, for the REPL, where each line
    /// is compiled and run separately but must see earlier lines' state.
    pub fn new_with_globals(globals: Vec<Value>) -> Self {
        let mut vm = Vm::new();
        vm.globals = globals;
        vm
    }

    pub fn take_globals(self) -> Vec<Value> {
        self.globals
    }

    pub fn last_popped_stack_elem(&self) -> &Value {
        &self.stack[self.sp]
    }

    pub fn run(&mut self, bytecode: Bytecode) -> Result<(), VmError> {
        self.constants = bytecode.constants;
        let main_func =
            Rc::new(CompiledFunction { instructions: bytecode.instructions, num_locals: 0, num_parameters: 0 });
        let main_closure = Rc::new(Closure { func: main_func, free: Vec::new() });
        self.stack.clear();
        self.sp = 0;
        self.frames.clear();
        self.frames.push(Frame::new(main_closure, 0));

        while self.current_frame().ip < self.current_frame().instructions().len() {
            let ip = self.current_frame().ip;
            let op = Op::from_u8(self.current_frame().instructions()[ip])
                .ok_or(VmError::UnknownOpcode(self.current_frame().instructions()[ip]))?;
            self.current_frame_mut().ip += 1;

            match op {
                Op::Constant => {
                    let idx = self.read_u16_operand();
                    self.push(self.constants[idx].clone())?;
                }
                Op::Add | Op::Sub | Op::Mul | Op::Div => self.execute_binary_op(op)?,
                Op::Pop => {
                    self.pop();
                }
                Op::True => self.push(Value::Boolean(true))?,
                Op::False => self.push(Value::Boolean(false))?,
                Op::Equal | Op::NotEqual | Op::GreaterThan => self.execute_comparison(op)?,
                Op::Minus => self.execute_minus()?,
                Op::Bang => self.execute_bang()?,
                Op::JumpNotTruthy => {
                    let target = self.read_u16_operand();
                    let condition = self.pop();
                    if !condition.is_truthy() {
                        self.current_frame_mut().ip = target;
                    }
                }
                Op::Jump => {
                    let target = self.read_u16_operand();
                    self.current_frame_mut().ip = target;
                }
                Op::Null => self.push(Value::Null)?,
                Op::GetGlobal => {
                    let idx = self.read_u16_operand();
                    self.push(self.globals[idx].clone())?;
                }
                Op::SetGlobal => {
                    let idx = self.read_u16_operand();
                    let value = self.pop();
                    self.globals[idx] = value;
                }
                Op::GetLocal => {
                    let idx = self.read_u8_operand();
                    let base = self.current_frame().base_pointer;
                    self.push(self.stack[base + idx].clone())?;
                }
                Op::SetLocal => {
                    let idx = self.read_u8_operand();
                    let base = self.current_frame().base_pointer;
                    let value = self.pop();
                    self.stack[base + idx] = value;
                }
                Op::GetFree => {
                    let idx = self.read_u8_operand();
                    let value = self.current_frame().closure.free[idx].clone();
                    self.push(value)?;
                }
                Op::GetBuiltin => {
                    let idx = self.read_u8_operand();
                    let (name, func) = BUILTINS[idx];
                    self.push(Value::Builtin(name, func))?;
                }
                Op::Array => {
                    let len = self.read_u16_operand();
                    let items = self.stack[self.sp - len..self.sp].to_vec();
                    self.sp -= len;
                    self.push(Value::Array(Rc::new(items)))?;
                }
                Op::Hash => {
                    let len = self.read_u16_operand();
                    let mut map = IndexMap::new();
                    let pairs = self.stack[self.sp - len..self.sp].to_vec();
                    self.sp -= len;
                    for pair in pairs.chunks(2) {
                        let key = pair[0].clone();
                        let value = pair[1].clone();
                        let hash_key = key.hash_key()?;
                        map.insert(hash_key, HashPair { key, value });
                    }
                    self.push(Value::Hash(Rc::new(map)))?;
                }
                Op::Index => {
                    let index = self.pop();
                    let left = self.pop();
                    self.execute_index(left, index)?;
                }
                Op::Call => {
                    let num_args = self.read_u8_operand();
                    self.execute_call(num_args)?;
                }
                Op::ReturnValue => {
                    let value = self.pop();
                    let frame = self.frames.pop().expect("ReturnValue with no active frame");
                    self.sp = frame.base_pointer - 1;
                    self.push(value)?;
                }
                Op::Return => {
                    let frame = self.frames.pop().expect("Return with no active frame");
                    self.sp = frame.base_pointer - 1;
                    self.push(Value::Null)?;
                }
                Op::Closure => {
                    let const_idx = self.read_u16_operand();
                    let num_free = self.read_u8_operand();
                    self.execute_closure(const_idx, num_free)?;
                }
            }
        }
        Ok(())
    }

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("vm has no active frame")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("vm has no active frame")
    }

    fn read_u16_operand(&mut self) -> usize {
        let ip = self.current_frame().ip;
        let value = read_u16(&self.current_frame().instructions()[ip..]) as usize;
        self.current_frame_mut().ip += 2;
        value
    }

    fn read_u8_operand(&mut self) -> usize {
        let ip = self.current_frame().ip;
        let value = self.current_frame().instructions()[ip] as usize;
        self.current_frame_mut().ip += 1;
        value
    }

    fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.sp >= STACK_SIZE {
            panic!("stack overflow");
        }
        if self.sp == self.stack.len() {
            self.stack.push(value);
        } else {
            self.stack[self.sp] = value;
        }
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.sp -= 1;
        self.stack[self.sp].clone()
    }

    fn execute_binary_op(&mut self, op: Op) -> Result<(), VmError> {
        let right = self.pop();
        let left = self.pop();
        match (&left, &right) {
            (Value::Integer(l), Value::Integer(r)) => {
                let result = match op {
                    Op::Add => l.checked_add(*r),
                    Op::Sub => l.checked_sub(*r),
                    Op::Mul => l.checked_mul(*r),
                    Op::Div => {
                        if *r == 0 {
                            return Err(VmError::TypeError("division by zero".to_string()));
                        }
                        l.checked_div(*r)
                    }
                    _ => unreachable!("execute_binary_op called with a non-arithmetic opcode"),
                };
                let result = result.ok_or_else(|| VmError::TypeError("integer overflow".to_string()))?;
                self.push(Value::Integer(result))
            }
            (Value::String(l), Value::String(r)) if op == Op::Add => {
                self.push(Value::str(format!("{l}{r}")))
            }
            _ => Err(VmError::TypeError(format!(
                "unsupported types for binary operation: {} {}",
                left.type_name(),
                right.type_name()
            ))),
        }
    }

    fn execute_comparison(&mut self, op: Op) -> Result<(), VmError> {
        let right = self.pop();
        let left = self.pop();
        if op == Op::GreaterThan {
            return match (&left, &right) {
                (Value::Integer(l), Value::Integer(r)) => self.push(Value::Boolean(l > r)),
                _ => Err(VmError::TypeError(format!(
                    "unsupported types for comparison: {} {}",
                    left.type_name(),
                    right.type_name()
                ))),
            };
        }
        let equal = match (&left, &right) {
            (Value::Integer(_), Value::Integer(_))
            | (Value::Boolean(_), Value::Boolean(_))
            | (Value::Null, Value::Null)
            | (Value::String(_), Value::String(_)) => left == right,
            _ => {
                return Err(VmError::TypeError(format!(
                    "unknown operator: {} == {}",
                    left.type_name(),
                    right.type_name()
                )))
            }
        };
        self.push(Value::Boolean(if op == Op::Equal { equal } else { !equal }))
    }

    fn execute_minus(&mut self) -> Result<(), VmError> {
        match self.pop() {
            Value::Integer(i) => self.push(Value::Integer(-i)),
            other => Err(VmError::TypeError(format!("unsupported type for negation: {}", other.type_name()))),
        }
    }

    fn execute_bang(&mut self) -> Result<(), VmError> {
        let value = self.pop();
        self.push(Value::Boolean(!value.is_truthy()))
    }

    fn execute_index(&mut self, left: Value, index: Value) -> Result<(), VmError> {
        match (&left, &index) {
            (Value::Array(items), Value::Integer(i)) => {
                if *i < 0 || *i as usize >= items.len() {
                    self.push(Value::Null)
                } else {
                    self.push(items[*i as usize].clone())
                }
            }
            (Value::Hash(map), _) => {
                let key = index.hash_key()?;
                match map.get(&key) {
                    Some(pair) => self.push(pair.value.clone()),
                    None => self.push(Value::Null),
                }
            }
            _ => Err(VmError::TypeError(format!("index operator not supported: {}", left.type_name()))),
        }
    }

    fn execute_call(&mut self, num_args: usize) -> Result<(), VmError> {
        let callee = self.stack[self.sp - 1 - num_args].clone();
        match callee {
            Value::Closure(closure) => self.call_closure(closure, num_args),
            Value::Builtin(_, func) => {
                let args = self.stack[self.sp - num_args..self.sp].to_vec();
                let result = func(&args)?;
                self.sp -= num_args + 1;
                self.push(result)
            }
            other => Err(VmError::NotCallable(other.type_name().to_string())),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, num_args: usize) -> Result<(), VmError> {
        if num_args != closure.func.num_parameters {
            return Err(VmError::ArityError { expected: closure.func.num_parameters, got: num_args });
        }
        if self.frames.len() >= MAX_FRAMES {
            panic!("frame overflow");
        }
        let base_pointer = self.sp - num_args;
        let num_locals = closure.func.num_locals;
        self.sp = base_pointer + num_locals;
        while self.stack.len() < self.sp {
            self.stack.push(Value::Null);
        }
        self.frames.push(Frame::new(closure, base_pointer));
        Ok(())
    }

    fn execute_closure(&mut self, const_idx: usize, num_free: usize) -> Result<(), VmError> {
        let func = match &self.constants[const_idx] {
            Value::CompiledFunction(func) => func.clone(),
            other => return Err(VmError::TypeError(format!("not a function: {}", other.type_name()))),
        };
        let free = self.stack[self.sp - num_free..self.sp].to_vec();
        self.sp -= num_free;
        self.push(Value::Closure(Rc::new(Closure { func, free })))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use rill_parser::parse;

    fn run(src: &str) -> Value {
        let (program, lex_errors, parse_errors) = parse(src);
        assert!(lex_errors.is_empty(), "{:?}", lex_errors);
        assert!(parse_errors.is_empty(), "{:?}", parse_errors);
        let mut compiler = Compiler::new();
        compiler.compile(&program).expect("compile should succeed");
        let bytecode = compiler.bytecode();
        let mut vm = Vm::new();
        vm.run(bytecode).expect("run should succeed");
        vm.last_popped_stack_elem().clone()
    }

    #[test]
    fn test_scenario_1_integer_arithmetic() {
        assert_eq!(run("1 + 2"), Value::Integer(3));
    }

    #[test]
    fn test_scenario_2_if_else() {
        assert_eq!(run("if (1 > 2) { 10 } else { 20 }"), Value::Integer(20));
    }

    #[test]
    fn test_if_without_alternative_is_null_when_falsy() {
        assert_eq!(run("if (false) { 10 }"), Value::Null);
    }

    #[test]
    fn test_scenario_3_function_calls() {
        assert_eq!(run("let one = fn() { 1 }; let two = fn() { 2 }; one() + two()"), Value::Integer(3));
    }

    #[test]
    fn test_scenario_4_closures() {
        let src = "let newAdder = fn(a) { fn(b) { a + b } }; let addTwo = newAdder(2); addTwo(3)";
        assert_eq!(run(src), Value::Integer(5));
    }

    #[test]
    fn test_scenario_5_map_over_array_with_recursion() {
        let src = "let map = fn(arr, f) { let iter = fn(a, acc) { if (len(a) == 0) { acc } else { iter(rest(a), push(acc, f(first(a)))) } }; iter(arr, []) }; map([1, 2, 3], fn(x) { x * 2 })";
        match run(src) {
            Value::Array(items) => assert_eq!(*items, vec![Value::Integer(2), Value::Integer(4), Value::Integer(6)]),
            other => panic!("expected an array, got {other:?}"),
        }
    }

    #[test]
    fn test_scenario_6_hash_indexing() {
        assert_eq!(run(r#"{"a": 1, "b": 2}["b"]"#), Value::Integer(2));
        assert_eq!(run("{}[0]"), Value::Null);
    }

    #[test]
    fn test_hash_literal_iterates_in_sorted_key_order_not_source_order() {
        match run(r#"{"b": 1, "a": 2, "c": 3}"#) {
            Value::Hash(map) => {
                let keys: Vec<&str> = map
                    .values()
                    .map(|pair| match &pair.key {
                        Value::String(s) => s.as_ref(),
                        other => panic!("expected string key, got {other:?}"),
                    })
                    .collect();
                assert_eq!(keys, vec!["a", "b", "c"]);
            }
            other => panic!("expected a hash, got {other:?}"),
        }
    }

    #[test]
    fn test_closure_capture_law() {
        let src = "let makeCounter = fn() { let c = 0; fn() { c } }; makeCounter()()";
        assert_eq!(run(src), Value::Integer(0));
    }

    #[test]
    fn test_recursive_fibonacci() {
        let src = "let fib = fn(n) { if (n < 2) { n } else { fib(n - 1) + fib(n - 2) } }; fib(10)";
        assert_eq!(run(src), Value::Integer(55));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(run(r#""Hello" + " " + "World!""#), Value::str("Hello World!"));
    }

    #[test]
    fn test_array_index_out_of_bounds_is_null() {
        assert_eq!(run("[1, 2, 3][10]"), Value::Null);
        assert_eq!(run("[1, 2, 3][-1]"), Value::Null);
    }

    #[test]
    fn test_builtin_len_first_last_rest_push() {
        assert_eq!(run(r#"len("four")"#), Value::Integer(4));
        assert_eq!(run("first([1, 2, 3])"), Value::Integer(1));
        assert_eq!(run("last([1, 2, 3])"), Value::Integer(3));
        match run("rest([1, 2, 3])") {
            Value::Array(items) => assert_eq!(*items, vec![Value::Integer(2), Value::Integer(3)]),
            other => panic!("unexpected {other:?}"),
        }
        match run("push([1], 2)") {
            Value::Array(items) => assert_eq!(*items, vec![Value::Integer(1), Value::Integer(2)]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_division_by_zero_is_runtime_error() {
        let (program, _, _) = parse("10 / 0");
        let mut compiler = Compiler::new();
        compiler.compile(&program).unwrap();
        let mut vm = Vm::new();
        let err = vm.run(compiler.bytecode()).unwrap_err();
        assert!(matches!(err, VmError::TypeError(_)));
    }

    #[test]
    fn test_calling_non_function_is_runtime_error() {
        let (program, _, _) = parse("let x = 5; x();");
        let mut compiler = Compiler::new();
        compiler.compile(&program).unwrap();
        let mut vm = Vm::new();
        let err = vm.run(compiler.bytecode()).unwrap_err();
        assert!(matches!(err, VmError::NotCallable(_)));
    }

    #[test]
    fn test_wrong_arity_is_runtime_error() {
        let (program, _, _) = parse("let f = fn(a, b) { a + b }; f(1);");
        let mut compiler = Compiler::new();
        compiler.compile(&program).unwrap();
        let mut vm = Vm::new();
        let err = vm.run(compiler.bytecode()).unwrap_err();
        assert!(matches!(err, VmError::ArityError { expected: 2, got: 1 }));
    }

    #[test]
    fn test_stack_hygiene_after_run() {
        let (program, _, _) = parse("1; 2; 3;");
        let mut compiler = Compiler::new();
        compiler.compile(&program).unwrap();
        let mut vm = Vm::new();
        vm.run(compiler.bytecode()).unwrap();
        assert_eq!(vm.sp, 0);
        assert_eq!(*vm.last_popped_stack_elem(), Value::Integer(3));
    }
}
