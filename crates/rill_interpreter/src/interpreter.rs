use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use rill_parser::ast::{BlockStatement, Expr, ExprKind, InfixOp, PrefixOp, Program, Stmt, StmtKind};

use crate::environment::Env;
use crate::error::{EvalError, EvalResult};
use crate::stdlib;
use crate::value::{FunctionDef, HashPair, Value};

/// Evaluates the same AST the compiler lowers, directly, without going
/// through bytecode. Exists to cross-check the compiled path: same
/// program, same observable result.
pub struct Interpreter {
    env: Env,
}

impl Interpreter {
    pub fn new() -> Self {
        let env = Env::new();
        stdlib::register(&env);
        Interpreter { env }
    }

    pub fn run(&mut self, program: &Program) -> EvalResult {
        let mut last = Value::Null;
        for stmt in &program.statements {
            last = self.eval_statement(stmt)?;
            if let Value::ReturnSentinel(v) = last {
                return Ok(*v);
            }
        }
        Ok(last)
    }

    fn eval_statement(&mut self, stmt: &Stmt) -> EvalResult {
        match &stmt.inner {
            StmtKind::Let { name, value } => {
                // Defined before evaluation so a function literal on the
                // right-hand side can resolve its own name recursively.
                self.env.define(name, Value::Null);
                let v = self.eval_expr(value)?;
                self.env.define(name, v);
                Ok(Value::Null)
            }
            StmtKind::Return { value } => {
                let v = self.eval_expr(value)?;
                Ok(Value::ReturnSentinel(Box::new(v)))
            }
            StmtKind::Expression { value } => self.eval_expr(value),
        }
    }

    fn eval_block(&mut self, block: &BlockStatement, env: Env) -> EvalResult {
        let saved = std::mem::replace(&mut self.env, env);
        let mut last = Value::Null;
        for stmt in &block.statements {
            match self.eval_statement(stmt) {
                Ok(v) => {
                    last = v;
                    if matches!(last, Value::ReturnSentinel(_)) {
                        break;
                    }
                }
                Err(e) => {
                    self.env = saved;
                    return Err(e);
                }
            }
        }
        self.env = saved;
        Ok(last)
    }

    fn eval_expr(&mut self, expr: &Expr) -> EvalResult {
        match &expr.inner {
            ExprKind::IntegerLiteral(n) => Ok(Value::Integer(*n)),
            ExprKind::Boolean(b) => Ok(Value::Boolean(*b)),
            ExprKind::StringLiteral(s) => Ok(Value::str(s.clone())),
            ExprKind::Identifier(name) => self
                .env
                .get(name)
                .ok_or_else(|| EvalError::UndefinedVariable { name: name.clone() }),
            ExprKind::ArrayLiteral(items) => {
                let values: Vec<Value> =
                    items.iter().map(|i| self.eval_expr(i)).collect::<Result<_, _>>()?;
                Ok(Value::Array(Rc::new(RefCell::new(values))))
            }
            ExprKind::HashLiteral(pairs) => {
                // Sorted by the key expression's source-text form, same as
                // the compiler, so both execution strategies agree on
                // evaluation order and on the resulting Hash's iteration
                // order regardless of how the literal was written.
                let mut sorted: Vec<&(Expr, Expr)> = pairs.iter().collect();
                sorted.sort_by(|(a, _), (b, _)| a.to_string().cmp(&b.to_string()));
                let mut map = IndexMap::new();
                for (k, v) in sorted {
                    let key = self.eval_expr(k)?;
                    let value = self.eval_expr(v)?;
                    let hash_key = key.hash_key()?;
                    map.insert(hash_key, HashPair { key, value });
                }
                Ok(Value::Hash(Rc::new(RefCell::new(map))))
            }
            ExprKind::Prefix { operator, right } => {
                let v = self.eval_expr(right)?;
                self.eval_prefix(*operator, v)
            }
            ExprKind::Infix { operator, left, right } => {
                let l = self.eval_expr(left)?;
                let r = self.eval_expr(right)?;
                self.eval_infix(*operator, l, r)
            }
            ExprKind::If { condition, consequence, alternative } => {
                if self.eval_expr(condition)?.is_truthy() {
                    self.eval_block(consequence, Env::enclosed(&self.env))
                } else if let Some(alt) = alternative {
                    self.eval_block(alt, Env::enclosed(&self.env))
                } else {
                    Ok(Value::Null)
                }
            }
            ExprKind::FunctionLiteral { parameters, body } => {
                Ok(Value::Function(Rc::new(FunctionDef {
                    params: parameters.clone(),
                    body: body.clone(),
                    closure: self.env.clone(),
                })))
            }
            ExprKind::Call { function, arguments } => {
                let callee = self.eval_expr(function)?;
                let args: Vec<Value> =
                    arguments.iter().map(|a| self.eval_expr(a)).collect::<Result<_, _>>()?;
                self.call(callee, args)
            }
            ExprKind::Index { left, index } => {
                let collection = self.eval_expr(left)?;
                let idx = self.eval_expr(index)?;
                self.eval_index(collection, idx)
            }
        }
    }

    fn eval_prefix(&self, op: PrefixOp, value: Value) -> EvalResult {
        match op {
            PrefixOp::Minus => match value {
                Value::Integer(n) => Ok(Value::Integer(-n)),
                other => Err(EvalError::TypeError(format!("unknown operator: -{}", other.type_name()))),
            },
            PrefixOp::Bang => Ok(Value::Boolean(!value.is_truthy())),
        }
    }

    fn eval_infix(&self, op: InfixOp, l: Value, r: Value) -> EvalResult {
        match (&l, &r) {
            (Value::Integer(a), Value::Integer(b)) => self.eval_integer_infix(op, *a, *b),
            (Value::String(a), Value::String(b)) => self.eval_string_infix(op, a, b),
            _ if matches!(op, InfixOp::Eq) => Ok(Value::Boolean(l == r)),
            _ if matches!(op, InfixOp::NotEq) => Ok(Value::Boolean(l != r)),
            _ if std::mem::discriminant(&l) != std::mem::discriminant(&r) => Err(EvalError::TypeError(
                format!("type mismatch: {} {:?} {}", l.type_name(), op, r.type_name()),
            )),
            _ => Err(EvalError::TypeError(format!(
                "unknown operator: {} {:?} {}",
                l.type_name(),
                op,
                r.type_name()
            ))),
        }
    }

    fn eval_integer_infix(&self, op: InfixOp, a: i64, b: i64) -> EvalResult {
        match op {
            InfixOp::Add => a
                .checked_add(b)
                .map(Value::Integer)
                .ok_or_else(|| EvalError::TypeError("integer overflow".to_string())),
            InfixOp::Sub => a
                .checked_sub(b)
                .map(Value::Integer)
                .ok_or_else(|| EvalError::TypeError("integer overflow".to_string())),
            InfixOp::Mul => a
                .checked_mul(b)
                .map(Value::Integer)
                .ok_or_else(|| EvalError::TypeError("integer overflow".to_string())),
            InfixOp::Div => {
                if b == 0 {
                    Err(EvalError::TypeError("division by zero".to_string()))
                } else {
                    Ok(Value::Integer(a / b))
                }
            }
            InfixOp::Lt => Ok(Value::Boolean(a < b)),
            InfixOp::Gt => Ok(Value::Boolean(a > b)),
            InfixOp::Eq => Ok(Value::Boolean(a == b)),
            InfixOp::NotEq => Ok(Value::Boolean(a != b)),
        }
    }

    fn eval_string_infix(&self, op: InfixOp, a: &str, b: &str) -> EvalResult {
        match op {
            InfixOp::Add => Ok(Value::str(format!("{a}{b}"))),
            InfixOp::Eq => Ok(Value::Boolean(a == b)),
            InfixOp::NotEq => Ok(Value::Boolean(a != b)),
            _ => Err(EvalError::TypeError(format!("unknown operator: STRING {op:?} STRING"))),
        }
    }

    fn eval_index(&self, collection: Value, index: Value) -> EvalResult {
        match (&collection, &index) {
            (Value::Array(items), Value::Integer(i)) => {
                let items = items.borrow();
                if *i < 0 || *i as usize >= items.len() {
                    Ok(Value::Null)
                } else {
                    Ok(items[*i as usize].clone())
                }
            }
            (Value::Hash(pairs), _) => {
                let key = index.hash_key()?;
                Ok(pairs.borrow().get(&key).map(|p| p.value.clone()).unwrap_or(Value::Null))
            }
            (other, _) => Err(EvalError::TypeError(format!("index operator not supported: {}", other.type_name()))),
        }
    }

    fn call(&mut self, callee: Value, args: Vec<Value>) -> EvalResult {
        match callee {
            Value::Builtin(_, f) => f(&args),
            Value::Function(def) => {
                if args.len() != def.params.len() {
                    return Err(EvalError::ArityError { expected: def.params.len(), got: args.len() });
                }
                let call_env = Env::enclosed(&def.closure);
                for (param, arg) in def.params.iter().zip(args) {
                    call_env.define(param, arg);
                }
                match self.eval_block(&def.body, call_env)? {
                    Value::ReturnSentinel(v) => Ok(*v),
                    other => Ok(other),
                }
            }
            other => Err(EvalError::NotCallable(other.type_name().to_string())),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
