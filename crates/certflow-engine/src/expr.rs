use std::cmp::Ordering;

use serde::Deserialize;
use serde_json::Value;

use certflow_core::error::{CertflowError, Result};
use certflow_core::traits::ExpressionEvaluator;
use certflow_core::types::Variables;

/// Guard expression tree as written by the graph editor.
///
/// ```json
/// {"type": "comparison", "operator": "gt",
///  "left": {"type": "var", "selector": {"id": "apply-1", "name": "certificate.daysLeft"}},
///  "right": {"type": "const", "value": "30", "valueType": "number"}}
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Expr {
    Const {
        value: Value,
        #[serde(default, rename = "valueType")]
        value_type: Option<ValueType>,
    },
    Var {
        selector: Selector,
    },
    Comparison {
        operator: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        operator: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not {
        expr: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
}

/// Reference to an output published by an earlier node.
#[derive(Debug, Clone, Deserialize)]
pub struct Selector {
    pub id: String,
    pub name: String,
}

impl Selector {
    pub fn key(&self) -> String {
        format!("{}.{}", self.id, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOp {
    And,
    Or,
}

/// Evaluator for structured JSON guards.
///
/// Also accepts a bare boolean, and the short string form
/// `key == "value"` / `key != "value"` / `key contains "substr"`.
/// A variable that was never published makes its comparison false.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonExprEvaluator;

impl ExpressionEvaluator for JsonExprEvaluator {
    fn evaluate(&self, expression: &Value, variables: &Variables) -> Result<bool> {
        match expression {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => evaluate_condition(s, variables),
            Value::Object(_) => {
                let expr: Expr = serde_json::from_value(expression.clone())
                    .map_err(|e| CertflowError::Expression(e.to_string()))?;
                eval_bool(&expr, variables)
            }
            other => Err(CertflowError::Expression(format!("unsupported guard: {other}"))),
        }
    }
}

fn eval_bool(expr: &Expr, vars: &Variables) -> Result<bool> {
    match expr {
        Expr::Comparison { operator, left, right } => {
            let (Some(l), Some(r)) = (eval_value(left, vars)?, eval_value(right, vars)?) else {
                return Ok(false);
            };
            compare(*operator, &l, &r)
        }
        Expr::Logical { operator, left, right } => match operator {
            LogicalOp::And => Ok(eval_bool(left, vars)? && eval_bool(right, vars)?),
            LogicalOp::Or => Ok(eval_bool(left, vars)? || eval_bool(right, vars)?),
        },
        Expr::Not { expr } => Ok(!eval_bool(expr, vars)?),
        leaf => match eval_value(leaf, vars)? {
            Some(Value::Bool(b)) => Ok(b),
            None => Ok(false),
            Some(other) => Err(CertflowError::Expression(format!("not a boolean: {other}"))),
        },
    }
}

/// Value of a leaf; `None` for an unpublished variable.
fn eval_value(expr: &Expr, vars: &Variables) -> Result<Option<Value>> {
    match expr {
        Expr::Const { value, value_type } => coerce(value, *value_type).map(Some),
        Expr::Var { selector } => Ok(vars.get(&selector.key()).cloned()),
        other => eval_bool(other, vars).map(|b| Some(Value::Bool(b))),
    }
}

/// Constants are often stored as strings; `valueType` says how to read them.
fn coerce(value: &Value, value_type: Option<ValueType>) -> Result<Value> {
    let (Some(value_type), Value::String(s)) = (value_type, value) else {
        return Ok(value.clone());
    };
    let s = s.trim();
    match value_type {
        ValueType::String => Ok(Value::String(s.to_string())),
        ValueType::Boolean => match s {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(CertflowError::Expression(format!("invalid boolean constant '{s}'"))),
        },
        ValueType::Number => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| CertflowError::Expression(format!("invalid number constant '{s}'"))),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool> {
    match op {
        CompareOp::Eq => Ok(loosely_equal(left, right)),
        CompareOp::Neq => Ok(!loosely_equal(left, right)),
        _ => {
            let ordering = match (left.as_f64(), right.as_f64()) {
                (Some(l), Some(r)) => l.partial_cmp(&r),
                _ => None,
            }
            .ok_or_else(|| {
                CertflowError::Expression(format!("cannot order {left} and {right}"))
            })?;
            Ok(match op {
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Gte => ordering != Ordering::Less,
                CompareOp::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
    }
}

/// Numbers compare by value so `60` equals `60.0`.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

/// Evaluate a short string condition against the variable context.
///
/// Supported expressions:
/// - `key == "value"`
/// - `key != "value"`
/// - `key contains "substr"`
fn evaluate_condition(expr: &str, context: &Variables) -> Result<bool> {
    let expr = expr.trim();
    let text = |key: &str| context.get(key).map(render);

    if let Some((key, substr)) = parse_operator(expr, "contains") {
        return Ok(text(key).is_some_and(|s| s.contains(substr)));
    }
    if let Some((key, value)) = parse_operator(expr, "!=") {
        return Ok(text(key).is_some_and(|s| s != value));
    }
    if let Some((key, value)) = parse_operator(expr, "==") {
        return Ok(text(key).is_some_and(|s| s == value));
    }

    Err(CertflowError::Expression(format!("unparseable guard '{expr}'")))
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse `key OP "value"` expressions, returning (key, value).
fn parse_operator<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let (key, val) = expr.split_once(op)?;
    Some((key.trim(), val.trim().trim_matches('"')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Variables {
        let mut v = Variables::new();
        v.insert("apply-1.certificate.validity".into(), json!(true));
        v.insert("apply-1.certificate.daysLeft".into(), json!(60));
        v.insert("deploy-1.status".into(), json!("ok"));
        v
    }

    fn var(id: &str, name: &str) -> Value {
        json!({"type": "var", "selector": {"id": id, "name": name}})
    }

    fn eval(expr: Value) -> Result<bool> {
        JsonExprEvaluator.evaluate(&expr, &vars())
    }

    #[test]
    fn test_numeric_comparison_with_string_constant() {
        let gt = |n: &str| {
            json!({"type": "comparison", "operator": "gt",
                "left": var("apply-1", "certificate.daysLeft"),
                "right": {"type": "const", "value": n, "valueType": "number"}})
        };
        assert!(eval(gt("30")).unwrap());
        assert!(!eval(gt("60")).unwrap());
    }

    #[test]
    fn test_boolean_equality_and_logic() {
        let valid = json!({"type": "comparison", "operator": "eq",
            "left": var("apply-1", "certificate.validity"),
            "right": {"type": "const", "value": "true", "valueType": "boolean"}});
        assert!(eval(valid.clone()).unwrap());
        assert!(!eval(json!({"type": "not", "expr": valid.clone()})).unwrap());
        assert!(eval(json!({"type": "logical", "operator": "or",
            "left": {"type": "not", "expr": valid.clone()}, "right": valid})).unwrap());
    }

    #[test]
    fn test_missing_variable_is_false() {
        let expr = json!({"type": "comparison", "operator": "eq",
            "left": var("nope", "certificate.validity"),
            "right": {"type": "const", "value": true}});
        assert!(!eval(expr).unwrap());
    }

    #[test]
    fn test_string_conditions() {
        assert!(eval(json!(r#"deploy-1.status == "ok""#)).unwrap());
        assert!(eval(json!(r#"deploy-1.status != "failed""#)).unwrap());
        assert!(eval(json!(r#"apply-1.certificate.daysLeft == "60""#)).unwrap());
        assert!(!eval(json!(r#"missing == "ok""#)).unwrap());
    }

    #[test]
    fn test_malformed_guards_are_errors() {
        assert!(matches!(eval(json!({"type": "teleport"})), Err(CertflowError::Expression(_))));
        assert!(matches!(eval(json!("just words")), Err(CertflowError::Expression(_))));
        assert!(matches!(eval(json!(42)), Err(CertflowError::Expression(_))));
        let unordered = json!({"type": "comparison", "operator": "lt",
            "left": var("deploy-1", "status"), "right": {"type": "const", "value": 3}});
        assert!(matches!(eval(unordered), Err(CertflowError::Expression(_))));
    }

    #[test]
    fn test_bare_boolean() {
        assert!(eval(json!(true)).unwrap());
        assert!(!eval(json!(false)).unwrap());
    }
}
