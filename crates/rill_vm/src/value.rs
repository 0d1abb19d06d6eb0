use crate::error::VmError;
use indexmap::IndexMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

pub type BuiltinFn = fn(&[Value]) -> Result<Value, VmError>;

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Vec<u8>,
    pub num_locals: usize,
    pub num_parameters: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub func: Rc<CompiledFunction>,
    pub free: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKeyTag {
    Integer,
    Boolean,
    String,
}

/// A normalised hashable summary of a `Value` used as a hash-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKey {
    pub tag: HashKeyTag,
    pub fingerprint: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: Value,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    Null,
    String(Rc<str>),
    Array(Rc<Vec<Value>>),
    Hash(Rc<IndexMap<HashKey, HashPair>>),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
    Builtin(&'static str, BuiltinFn),
    Error(String),
    /// Wraps a return value on its way out of the tree-walking evaluator;
    /// the bytecode VM never constructs or observes this variant.
    ReturnSentinel(Box<Value>),
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Value {
        Value::String(s.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "INTEGER",
            Value::Boolean(_) => "BOOLEAN",
            Value::Null => "NULL",
            Value::String(_) => "STRING",
            Value::Array(_) => "ARRAY",
            Value::Hash(_) => "HASH",
            Value::CompiledFunction(_) => "COMPILED_FUNCTION",
            Value::Closure(_) => "CLOSURE",
            Value::Builtin(..) => "BUILTIN",
            Value::Error(_) => "ERROR",
            Value::ReturnSentinel(_) => "RETURN_VALUE",
        }
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Boolean(false) | Value::Null)
    }

    pub fn hash_key(&self) -> Result<HashKey, VmError> {
        match self {
            Value::Integer(i) => Ok(HashKey { tag: HashKeyTag::Integer, fingerprint: *i as u64 }),
            Value::Boolean(b) => Ok(HashKey { tag: HashKeyTag::Boolean, fingerprint: *b as u64 }),
            Value::String(s) => {
                let mut hasher = rustc_hash::FxHasher::default();
                s.hash(&mut hasher);
                Ok(HashKey { tag: HashKeyTag::String, fingerprint: hasher.finish() })
            }
            other => Err(VmError::HashKeyError(other.type_name().to_string())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{i}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Hash(pairs) => {
                write!(f, "{{")?;
                for (i, pair) in pairs.values().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", pair.key, pair.value)?;
                }
                write!(f, "}}")
            }
            Value::CompiledFunction(_) => write!(f, "CompiledFunction[...]"),
            Value::Closure(c) => write!(f, "Closure[{:p}]", Rc::as_ptr(c)),
            Value::Builtin(name, _) => write!(f, "builtin function {name}"),
            Value::Error(msg) => write!(f, "ERROR: {msg}"),
            Value::ReturnSentinel(v) => write!(f, "{v}"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Hash(a), Value::Hash(b)) => Rc::ptr_eq(a, b),
            (Value::CompiledFunction(a), Value::CompiledFunction(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a, _), Value::Builtin(b, _)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}
