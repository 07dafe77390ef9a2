use std::cmp::Ordering;

use crate::expression::{BinaryOperator, Expression, Function};
use crate::value::Value;

use super::context::Scope;

/// Evaluates a condition expression. Missing paths are `Null`; evaluation
/// itself never fails.
pub fn evaluate(expression: &Expression, scope: &Scope) -> Value {
    match expression {
        Expression::Literal(value) => value.clone(),
        Expression::Path(path) => scope.get(path).cloned().unwrap_or_default(),
        Expression::Not(inner) => Value::Bool(!evaluate(inner, scope).is_truthy()),
        Expression::BinaryOp { op, left, right } => eval_binary_op(op, left, right, scope),
        Expression::FunctionCall {
            function,
            arguments,
        } => eval_function(function, arguments, scope),
    }
}

pub fn is_truthy(expression: &Expression, scope: &Scope) -> bool {
    evaluate(expression, scope).is_truthy()
}

fn eval_binary_op(op: &BinaryOperator, left: &Expression, right: &Expression, scope: &Scope) -> Value {
    // 短絡評価
    match op {
        BinaryOperator::And => {
            return Value::Bool(is_truthy(left, scope) && is_truthy(right, scope));
        }
        BinaryOperator::Or => {
            return Value::Bool(is_truthy(left, scope) || is_truthy(right, scope));
        }
        _ => {}
    }

    let left_val = evaluate(left, scope);
    let right_val = evaluate(right, scope);
    let result = match op {
        BinaryOperator::Equal => values_equal(&left_val, &right_val),
        BinaryOperator::NotEqual => !values_equal(&left_val, &right_val),
        BinaryOperator::LessThan => compare(&left_val, &right_val) == Some(Ordering::Less),
        BinaryOperator::GreaterThan => compare(&left_val, &right_val) == Some(Ordering::Greater),
        BinaryOperator::LessThanEqual => matches!(
            compare(&left_val, &right_val),
            Some(Ordering::Less | Ordering::Equal)
        ),
        BinaryOperator::GreaterThanEqual => matches!(
            compare(&left_val, &right_val),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        BinaryOperator::And | BinaryOperator::Or => false,
    };
    Value::Bool(result)
}

fn eval_function(function: &Function, arguments: &[Expression], scope: &Scope) -> Value {
    match function {
        Function::Len => {
            let len = match arguments.first().map(|arg| evaluate(arg, scope)) {
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Sequence(items)) => items.len(),
                Some(Value::Mapping(map)) => map.len(),
                _ => 0,
            };
            Value::Integer(len as i64)
        }
        Function::Exists => {
            let exists = match arguments.first() {
                Some(Expression::Path(path)) => scope.contains(path),
                Some(other) => evaluate(other, scope) != Value::Null,
                None => false,
            };
            Value::Bool(exists)
        }
        Function::Contains => {
            let (Some(haystack), Some(needle)) = (arguments.first(), arguments.get(1)) else {
                return Value::Bool(false);
            };
            let needle = evaluate(needle, scope);
            let found = match evaluate(haystack, scope) {
                Value::Sequence(items) => items.iter().any(|item| values_equal(item, &needle)),
                Value::Mapping(map) => map.contains_key(&needle.to_string()),
                Value::String(s) => s.contains(&needle.to_string()),
                _ => false,
            };
            Value::Bool(found)
        }
    }
}

/// Numbers compare numerically; otherwise a string on either side compares
/// string forms.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) => {
                left.to_string() == right.to_string()
            }
            _ => left == right,
        },
    }
}

/// Ordering for numbers and strings; `None` for anything else.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
    }
}

/// Whether a switch value matches a `case value="..."` attribute.
pub fn case_matches(value: &Value, case: &str) -> bool {
    match value {
        Value::Bool(b) => case.trim().parse::<bool>().is_ok_and(|c| c == *b),
        Value::Integer(_) | Value::Float(_) => match case.trim().parse::<f64>() {
            Ok(c) => value.as_f64() == Some(c),
            Err(_) => value.to_string() == case,
        },
        other => other.to_string() == case,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse_expression;
    use crate::value::{to_data, Data};
    use serde_json::json;

    fn eval(source: &str, data: &Data) -> Value {
        let expression = parse_expression(source).unwrap();
        evaluate(&expression, &Scope::root(data))
    }

    fn data() -> Data {
        to_data(json!({
            "user": {"name": "Alice", "admin": true, "age": 30},
            "items": ["a", "b", "c"],
            "count": 2,
            "ratio": 2.0,
            "empty": "",
            "status": "active"
        }))
    }

    #[test]
    fn test_truthiness_of_paths() {
        let data = data();
        assert_eq!(eval("user.admin", &data), Value::Bool(true));
        assert!(!eval("missing.path", &data).is_truthy());
        assert!(!eval("empty", &data).is_truthy());
        assert!(eval("items", &data).is_truthy());
    }

    #[test]
    fn test_comparisons() {
        let data = data();
        assert_eq!(eval("status == 'active'", &data), Value::Bool(true));
        assert_eq!(eval("status != \"active\"", &data), Value::Bool(false));
        assert_eq!(eval("count == ratio", &data), Value::Bool(true));
        assert_eq!(eval("count == '2'", &data), Value::Bool(true));
        assert_eq!(eval("user.age >= 18", &data), Value::Bool(true));
        assert_eq!(eval("user.name < 'Bob'", &data), Value::Bool(true));
        assert_eq!(eval("missing > 1", &data), Value::Bool(false));
        assert_eq!(eval("missing == null", &data), Value::Bool(true));
    }

    #[test]
    fn test_logic() {
        let data = data();
        assert_eq!(eval("user.admin && count > 1", &data), Value::Bool(true));
        assert_eq!(eval("!user.admin || missing", &data), Value::Bool(false));
        assert_eq!(eval("!(count > 5)", &data), Value::Bool(true));
    }

    #[test]
    fn test_functions() {
        let data = data();
        assert_eq!(eval("len(items)", &data), Value::Integer(3));
        assert_eq!(eval("len(user.name)", &data), Value::Integer(5));
        assert_eq!(eval("len(missing)", &data), Value::Integer(0));
        assert_eq!(eval("exists(user.name)", &data), Value::Bool(true));
        assert_eq!(eval("exists(user.email)", &data), Value::Bool(false));
        assert_eq!(eval("contains(items, 'b')", &data), Value::Bool(true));
        assert_eq!(eval("contains(user, 'age')", &data), Value::Bool(true));
        assert_eq!(eval("contains(status, 'act')", &data), Value::Bool(true));
        assert_eq!(eval("contains(missing, 'x')", &data), Value::Bool(false));
    }

    #[test]
    fn test_case_matches() {
        assert!(case_matches(&Value::from("active"), "active"));
        assert!(!case_matches(&Value::from("active"), "pending"));
        assert!(case_matches(&Value::Integer(2), "2.0"));
        assert!(case_matches(&Value::Float(1.5), "1.5"));
        assert!(case_matches(&Value::Bool(true), "true"));
        assert!(!case_matches(&Value::Bool(false), "true"));
        assert!(case_matches(&Value::Null, ""));
    }
}
