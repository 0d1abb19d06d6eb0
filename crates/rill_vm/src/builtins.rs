use crate::error::VmError;
use crate::value::{BuiltinFn, Value};
use std::rc::Rc;

/// Ordered registry shared by the compiler (which must resolve `len`,
/// `first`, ... to the same indices the VM registers them at) and the VM
/// itself.
pub const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("len", builtin_len),
    ("first", builtin_first),
    ("last", builtin_last),
    ("rest", builtin_rest),
    ("push", builtin_push),
    ("puts", builtin_puts),
];

pub fn lookup_index(name: &str) -> Option<usize> {
    BUILTINS.iter().position(|(n, _)| *n == name)
}

fn builtin_len(args: &[Value]) -> Result<Value, VmError> {
    if args.len() != 1 {
        return Err(VmError::ArityError { expected: 1, got: args.len() });
    }
    match &args[0] {
        Value::String(s) => Ok(Value::Integer(s.len() as i64)),
        Value::Array(items) => Ok(Value::Integer(items.len() as i64)),
        other => Err(VmError::TypeError(format!(
            "argument to `len` not supported, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_first(args: &[Value]) -> Result<Value, VmError> {
    if args.len() != 1 {
        return Err(VmError::ArityError { expected: 1, got: args.len() });
    }
    match &args[0] {
        Value::Array(items) => Ok(items.first().cloned().unwrap_or(Value::Null)),
        other => Err(VmError::TypeError(format!(
            "argument to `first` must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_last(args: &[Value]) -> Result<Value, VmError> {
    if args.len() != 1 {
        return Err(VmError::ArityError { expected: 1, got: args.len() });
    }
    match &args[0] {
        Value::Array(items) => Ok(items.last().cloned().unwrap_or(Value::Null)),
        other => Err(VmError::TypeError(format!(
            "argument to `last` must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_rest(args: &[Value]) -> Result<Value, VmError> {
    if args.len() != 1 {
        return Err(VmError::ArityError { expected: 1, got: args.len() });
    }
    match &args[0] {
        Value::Array(items) => {
            if items.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::Array(Rc::new(items[1..].to_vec())))
            }
        }
        other => Err(VmError::TypeError(format!(
            "argument to `rest` must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_push(args: &[Value]) -> Result<Value, VmError> {
    if args.len() != 2 {
        return Err(VmError::ArityError { expected: 2, got: args.len() });
    }
    match &args[0] {
        Value::Array(items) => {
            let mut new_items = (**items).clone();
            new_items.push(args[1].clone());
            Ok(Value::Array(Rc::new(new_items)))
        }
        other => Err(VmError::TypeError(format!(
            "argument to `push` must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_puts(args: &[Value]) -> Result<Value, VmError> {
    for arg in args {
        println!("{arg}");
    }
    Ok(Value::Null)
}
