use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use rill_parser::ast::BlockStatement;

use crate::environment::Env;
use crate::error::EvalError;

pub type BuiltinFn = fn(&[Value]) -> Result<Value, EvalError>;

/// A user-defined function together with the environment it closed over.
#[derive(Clone)]
pub struct FunctionDef {
    pub params: Vec<String>,
    pub body: BlockStatement,
    pub closure: Env,
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionDef({} params)", self.params.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKeyTag {
    Integer,
    Boolean,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKey {
    pub tag: HashKeyTag,
    pub fingerprint: u64,
}

#[derive(Debug, Clone)]
pub struct HashPair {
    pub key: Value,
    pub value: Value,
}

/// The runtime value produced by the tree-walking evaluator. Shaped like
/// the compiled path's tagged union closely enough that the two execution
/// strategies can be cross-checked, but kept independent: arrays and
/// hashes here are mutable through `RefCell`, matching the
/// reference-sharing environment this crate uses for closures.
#[derive(Clone)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    Null,
    String(Rc<String>),
    Array(Rc<RefCell<Vec<Value>>>),
    Hash(Rc<RefCell<IndexMap<HashKey, HashPair>>>),
    Function(Rc<FunctionDef>),
    Builtin(&'static str, BuiltinFn),
    Error(String),
    ReturnSentinel(Box<Value>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::String(Rc::new(s.into()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "INTEGER",
            Value::Boolean(_) => "BOOLEAN",
            Value::Null => "NULL",
            Value::String(_) => "STRING",
            Value::Array(_) => "ARRAY",
            Value::Hash(_) => "HASH",
            Value::Function(_) => "FUNCTION",
            Value::Builtin(..) => "BUILTIN",
            Value::Error(_) => "ERROR",
            Value::ReturnSentinel(_) => "RETURN_VALUE",
        }
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Boolean(false) | Value::Null)
    }

    pub fn hash_key(&self) -> Result<HashKey, EvalError> {
        match self {
            Value::Integer(n) => Ok(HashKey { tag: HashKeyTag::Integer, fingerprint: *n as u64 }),
            Value::Boolean(b) => Ok(HashKey { tag: HashKeyTag::Boolean, fingerprint: *b as u64 }),
            Value::String(s) => {
                let mut h: u64 = 0xcbf29ce484222325;
                for byte in s.as_bytes() {
                    h ^= *byte as u64;
                    h = h.wrapping_mul(0x100000001b3);
                }
                Ok(HashKey { tag: HashKeyTag::String, fingerprint: h })
            }
            other => Err(EvalError::HashKeyError(format!(
                "unusable as hash key: {}",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(items) => {
                let parts: Vec<String> = items.borrow().iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Hash(pairs) => {
                let parts: Vec<String> = pairs
                    .borrow()
                    .values()
                    .map(|pair| format!("{}: {}", pair.key, pair.value))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Function(def) => write!(f, "fn({}) {{ ... }}", def.params.join(", ")),
            Value::Builtin(name, _) => write!(f, "builtin function {name}"),
            Value::Error(msg) => write!(f, "ERROR: {msg}"),
            Value::ReturnSentinel(v) => write!(f, "{v}"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => *a.borrow() == *b.borrow(),
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}
