pub mod environment;
pub mod error;
pub mod interpreter;
pub mod stdlib;
pub mod value;

pub use environment::Env;
pub use error::{EvalError, EvalResult};
pub use interpreter::Interpreter;
pub use value::Value;

/// Parses and evaluates a complete program in one shot, returning the
/// value of the last statement (or the unwrapped value of a top-level
/// `return`).
pub fn eval(source: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let (program, lex_errors, parse_errors) = rill_parser::parse(source);
    if let Some(e) = lex_errors.into_iter().next() {
        return Err(Box::new(e));
    }
    if let Some(e) = parse_errors.into_iter().next() {
        return Err(Box::new(e));
    }
    let mut interp = Interpreter::new();
    Ok(interp.run(&program)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> Value {
        eval(src).unwrap_or_else(|e| panic!("eval error for {src:?}: {e}"))
    }

    fn run_err(src: &str) -> EvalError {
        let (program, _, _) = rill_parser::parse(src);
        let mut interp = Interpreter::new();
        interp.run(&program).expect_err("expected an evaluation error")
    }

    #[test]
    fn t_arithmetic() {
        assert_eq!(run("1 + 2 * 3"), Value::Integer(7));
        assert_eq!(run("(1 + 2) * 3"), Value::Integer(9));
        assert_eq!(run("-5 + 10"), Value::Integer(5));
    }

    #[test]
    fn t_comparisons_and_booleans() {
        assert_eq!(run("1 < 2"), Value::Boolean(true));
        assert_eq!(run("1 == 1"), Value::Boolean(true));
        assert_eq!(run("!true"), Value::Boolean(false));
        assert_eq!(run("!!5"), Value::Boolean(true));
    }

    #[test]
    fn t_let_and_identifiers() {
        assert_eq!(run("let a = 5; let b = a + 1; b"), Value::Integer(6));
    }

    #[test]
    fn t_string_concat() {
        assert_eq!(run(r#""foo" + "bar""#), Value::str("foobar"));
    }

    #[test]
    fn t_if_else() {
        assert_eq!(run("if (1 > 2) { 10 } else { 20 }"), Value::Integer(20));
        assert_eq!(run("if (false) { 10 }"), Value::Null);
    }

    #[test]
    fn t_functions_and_closures() {
        assert_eq!(run("let one = fn() { 1 }; let two = fn() { 2 }; one() + two()"), Value::Integer(3));
        let src = "let newAdder = fn(a) { fn(b) { a + b } }; let addTwo = newAdder(2); addTwo(3)";
        assert_eq!(run(src), Value::Integer(5));
    }

    #[test]
    fn t_recursive_function() {
        let src = "let fib = fn(n) { if (n < 2) { n } else { fib(n-1) + fib(n-2) } }; fib(10)";
        assert_eq!(run(src), Value::Integer(55));
    }

    #[test]
    fn t_map_over_array_via_builtins() {
        let src = "let map = fn(arr, f) { let iter = fn(a, acc) { if (len(a) == 0) { acc } else { iter(rest(a), push(acc, f(first(a)))) } }; iter(arr, []) }; map([1, 2, 3], fn(x) { x * 2 })";
        match run(src) {
            Value::Array(items) => {
                assert_eq!(*items.borrow(), vec![Value::Integer(2), Value::Integer(4), Value::Integer(6)]);
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn t_hash_indexing() {
        assert_eq!(run(r#"{"a": 1, "b": 2}["b"]"#), Value::Integer(2));
        assert_eq!(run("{}[0]"), Value::Null);
    }

    #[test]
    fn t_hash_literal_iterates_in_sorted_key_order_not_source_order() {
        match run(r#"{"b": 1, "a": 2, "c": 3}"#) {
            Value::Hash(map) => {
                let keys: Vec<Value> = map.borrow().values().map(|pair| pair.key.clone()).collect();
                assert_eq!(keys, vec![Value::str("a"), Value::str("b"), Value::str("c")]);
            }
            other => panic!("expected hash, got {other:?}"),
        }
    }

    #[test]
    fn t_array_index_out_of_bounds_is_null() {
        assert_eq!(run("[1, 2, 3][10]"), Value::Null);
    }

    #[test]
    fn t_closure_capture_law() {
        let src = "let makeCounter = fn() { let c = 0; fn() { c } }; makeCounter()()";
        assert_eq!(run(src), Value::Integer(0));
    }

    #[test]
    fn t_undefined_identifier_is_runtime_error() {
        assert!(matches!(run_err("foobar"), EvalError::UndefinedVariable { .. }));
    }

    #[test]
    fn t_division_by_zero_is_runtime_error() {
        assert!(matches!(run_err("1 / 0"), EvalError::TypeError(_)));
    }

    #[test]
    fn t_wrong_arity_is_runtime_error() {
        assert!(matches!(run_err("let f = fn(a) { a }; f()"), EvalError::ArityError { .. }));
    }

    #[test]
    fn t_calling_non_function_is_runtime_error() {
        assert!(matches!(run_err("let x = 5; x()"), EvalError::NotCallable(_)));
    }

    #[test]
    fn t_builtin_len_first_last_rest_push() {
        assert_eq!(run("len([1, 2, 3])"), Value::Integer(3));
        assert_eq!(run("first([1, 2, 3])"), Value::Integer(1));
        assert_eq!(run("last([1, 2, 3])"), Value::Integer(3));
    }
}
