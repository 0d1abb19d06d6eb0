use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

struct Inner {
    store: HashMap<String, Value>,
    outer: Option<Env>,
}

/// A lexical scope chain. Cloning an `Env` is cheap and shares the
/// underlying store, which is how closures keep seeing later mutations to
/// variables they captured (the self-reference trick `Let` uses to support
/// recursive function literals relies on this).
#[derive(Clone)]
pub struct Env(Rc<RefCell<Inner>>);

impl Env {
    pub fn new() -> Self {
        Env(Rc::new(RefCell::new(Inner { store: HashMap::new(), outer: None })))
    }

    pub fn enclosed(outer: &Env) -> Self {
        Env(Rc::new(RefCell::new(Inner { store: HashMap::new(), outer: Some(outer.clone()) })))
    }

    pub fn define(&self, name: &str, value: Value) {
        self.0.borrow_mut().store.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let inner = self.0.borrow();
        if let Some(v) = inner.store.get(name) {
            return Some(v.clone());
        }
        inner.outer.as_ref()?.get(name)
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_get() {
        let env = Env::new();
        env.define("x", Value::Integer(5));
        assert_eq!(env.get("x"), Some(Value::Integer(5)));
    }

    #[test]
    fn test_enclosed_sees_outer() {
        let outer = Env::new();
        outer.define("x", Value::Integer(1));
        let inner = Env::enclosed(&outer);
        assert_eq!(inner.get("x"), Some(Value::Integer(1)));
    }

    #[test]
    fn test_enclosed_shadows_outer() {
        let outer = Env::new();
        outer.define("x", Value::Integer(1));
        let inner = Env::enclosed(&outer);
        inner.define("x", Value::Integer(2));
        assert_eq!(inner.get("x"), Some(Value::Integer(2)));
        assert_eq!(outer.get("x"), Some(Value::Integer(1)));
    }

    #[test]
    fn test_undefined_is_none() {
        let env = Env::new();
        assert_eq!(env.get("missing"), None);
    }

    #[test]
    fn test_clone_shares_store() {
        let env = Env::new();
        let snapshot = env.clone();
        env.define("x", Value::Integer(7));
        assert_eq!(snapshot.get("x"), Some(Value::Integer(7)));
    }
}
