use std::cell::RefCell;
use std::rc::Rc;

use crate::environment::Env;
use crate::error::EvalError;
use crate::value::{BuiltinFn, Value};

/// Same name/signature/behavior as `rill_vm::builtins::BUILTINS`, so the
/// tree-walking path and the compiled path agree on every program that
/// calls one of these.
pub const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("len", builtin_len),
    ("first", builtin_first),
    ("last", builtin_last),
    ("rest", builtin_rest),
    ("push", builtin_push),
    ("puts", builtin_puts),
];

pub fn register(env: &Env) {
    for (name, f) in BUILTINS {
        env.define(name, Value::Builtin(name, *f));
    }
}

fn builtin_len(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::ArityError { expected: 1, got: args.len() });
    }
    match &args[0] {
        Value::String(s) => Ok(Value::Integer(s.len() as i64)),
        Value::Array(items) => Ok(Value::Integer(items.borrow().len() as i64)),
        other => Err(EvalError::TypeError(format!(
            "argument to `len` not supported, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_first(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::ArityError { expected: 1, got: args.len() });
    }
    match &args[0] {
        Value::Array(items) => Ok(items.borrow().first().cloned().unwrap_or(Value::Null)),
        other => Err(EvalError::TypeError(format!(
            "argument to `first` must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_last(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::ArityError { expected: 1, got: args.len() });
    }
    match &args[0] {
        Value::Array(items) => Ok(items.borrow().last().cloned().unwrap_or(Value::Null)),
        other => Err(EvalError::TypeError(format!(
            "argument to `last` must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_rest(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::ArityError { expected: 1, got: args.len() });
    }
    match &args[0] {
        Value::Array(items) => {
            let items = items.borrow();
            if items.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::Array(Rc::new(RefCell::new(items[1..].to_vec()))))
            }
        }
        other => Err(EvalError::TypeError(format!(
            "argument to `rest` must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_push(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(EvalError::ArityError { expected: 2, got: args.len() });
    }
    match &args[0] {
        Value::Array(items) => {
            let mut new_items = items.borrow().clone();
            new_items.push(args[1].clone());
            Ok(Value::Array(Rc::new(RefCell::new(new_items))))
        }
        other => Err(EvalError::TypeError(format!(
            "argument to `push` must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_puts(args: &[Value]) -> Result<Value, EvalError> {
    for arg in args {
        println!("{arg}");
    }
    Ok(Value::Null)
}
