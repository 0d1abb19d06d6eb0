use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    UndefinedVariable { name: String },
    TypeError(String),
    ArityError { expected: usize, got: usize },
    HashKeyError(String),
    NotCallable(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::UndefinedVariable { name } => {
                write!(f, "[RuntimeError] identifier not found: {name}")
            }
            EvalError::TypeError(message) => write!(f, "[RuntimeError] {message}"),
            EvalError::ArityError { expected, got } => write!(
                f,
                "[RuntimeError] wrong number of arguments: want {expected}, got {got}"
            ),
            EvalError::HashKeyError(message) => write!(f, "[RuntimeError] {message}"),
            EvalError::NotCallable(type_name) => {
                write!(f, "[RuntimeError] not a function: {type_name}")
            }
        }
    }
}

impl std::error::Error for EvalError {}

pub type EvalResult = Result<crate::value::Value, EvalError>;
