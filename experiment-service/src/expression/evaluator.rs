// Condition Evaluator
// Evaluates condition ASTs against the (optional) user-supplied input value

use crate::expression::functions::BuiltinFunctions;
use crate::expression::parser::{BinaryOp, Expr, ParseExprError, UnaryOp};
use crate::expression::value::Value;

use std::cmp::Ordering;
use std::fmt;

/// Evaluation error
#[derive(Debug, Clone)]
pub struct EvalError {
    pub message: String,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluation error: {}", self.message)
    }
}

impl std::error::Error for EvalError {}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<ParseExprError> for EvalError {
    fn from(err: ParseExprError) -> Self {
        Self::new(err.to_string())
    }
}

/// Expression evaluator.
///
/// Every `input()` in the tree yields the same value, so a condition asks
/// its caller for input at most once.
pub struct Evaluator<'a> {
    input: Option<&'a str>,
    functions: BuiltinFunctions,
}

impl<'a> Evaluator<'a> {
    pub fn new(input: Option<&'a str>) -> Self {
        Self {
            input,
            functions: BuiltinFunctions::new(),
        }
    }

    /// Evaluate an expression
    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),

            Expr::Input => self
                .input
                .map(Value::from)
                .ok_or_else(|| EvalError::new("input() called but no input was provided")),

            Expr::FunctionCall { name, args } => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.functions.call(name, values)
            }

            Expr::Unary { op, expr } => {
                let val = self.eval(expr)?;
                self.eval_unary(*op, &val)
            }

            Expr::Binary { op, left, right } => {
                // Short-circuit evaluation for && and ||
                match op {
                    BinaryOp::And => {
                        let left_val = self.eval(left)?;
                        if !left_val.is_truthy() {
                            return Ok(Value::Bool(false));
                        }
                        let right_val = self.eval(right)?;
                        Ok(Value::Bool(right_val.is_truthy()))
                    }
                    BinaryOp::Or => {
                        let left_val = self.eval(left)?;
                        if left_val.is_truthy() {
                            return Ok(Value::Bool(true));
                        }
                        let right_val = self.eval(right)?;
                        Ok(Value::Bool(right_val.is_truthy()))
                    }
                    _ => {
                        let left_val = self.eval(left)?;
                        let right_val = self.eval(right)?;
                        self.eval_binary(*op, &left_val, &right_val)
                    }
                }
            }
        }
    }

    fn eval_unary(&self, op: UnaryOp, value: &Value) -> Result<Value, EvalError> {
        match op {
            UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
            UnaryOp::Neg => value
                .as_number()
                .map(|n| Value::Number(-n))
                .ok_or_else(|| EvalError::new(format!("cannot negate {}", value.type_name()))),
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
        match op {
            // Arithmetic
            BinaryOp::Add => self.eval_add(left, right),
            BinaryOp::Sub => self.eval_numeric_op(left, right, |a, b| Ok(a - b)),
            BinaryOp::Mul => self.eval_numeric_op(left, right, |a, b| Ok(a * b)),
            BinaryOp::Div => self.eval_numeric_op(left, right, |a, b| {
                if b == 0.0 {
                    Err(EvalError::new("division by zero"))
                } else {
                    Ok(a / b)
                }
            }),
            BinaryOp::Mod => self.eval_numeric_op(left, right, |a, b| {
                if b == 0.0 {
                    Err(EvalError::new("modulo by zero"))
                } else {
                    Ok(a % b)
                }
            }),

            // Comparison
            BinaryOp::Eq => Ok(Value::Bool(self.values_equal(left, right))),
            BinaryOp::Ne => Ok(Value::Bool(!self.values_equal(left, right))),
            BinaryOp::Lt => self.eval_comparison(left, right, Ordering::is_lt),
            BinaryOp::Le => self.eval_comparison(left, right, Ordering::is_le),
            BinaryOp::Gt => self.eval_comparison(left, right, Ordering::is_gt),
            BinaryOp::Ge => self.eval_comparison(left, right, Ordering::is_ge),

            // Logical operators short-circuit in eval()
            BinaryOp::And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
            BinaryOp::Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
        }
    }

    fn eval_add(&self, left: &Value, right: &Value) -> Result<Value, EvalError> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b.as_string()))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{}", a.as_string(), b))),
            _ => self.eval_numeric_op(left, right, |a, b| Ok(a + b)),
        }
    }

    fn eval_numeric_op<F>(&self, left: &Value, right: &Value, op: F) -> Result<Value, EvalError>
    where
        F: FnOnce(f64, f64) -> Result<f64, EvalError>,
    {
        let a = left
            .as_number()
            .ok_or_else(|| EvalError::new("left operand is not a number"))?;
        let b = right
            .as_number()
            .ok_or_else(|| EvalError::new("right operand is not a number"))?;
        op(a, b).map(Value::Number)
    }

    fn eval_comparison<F>(&self, left: &Value, right: &Value, op: F) -> Result<Value, EvalError>
    where
        F: FnOnce(Ordering) -> bool,
    {
        // Two non-numeric strings compare lexically
        if let (Value::String(a), Value::String(b)) = (left, right) {
            if left.as_number().is_none() || right.as_number().is_none() {
                return Ok(Value::Bool(op(a.cmp(b))));
            }
        }

        let a = left.as_number().ok_or_else(|| {
            EvalError::new(format!("left operand ({}) is not comparable", left.type_name()))
        })?;
        let b = right.as_number().ok_or_else(|| {
            EvalError::new(format!("right operand ({}) is not comparable", right.type_name()))
        })?;
        let ordering = a
            .partial_cmp(&b)
            .ok_or_else(|| EvalError::new("cannot compare NaN"))?;
        Ok(Value::Bool(op(ordering)))
    }

    fn values_equal(&self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            // Exact, case-sensitive
            (Value::String(a), Value::String(b)) => a == b,
            // Coerce numeric strings
            (Value::Number(a), Value::String(b)) | (Value::String(b), Value::Number(a)) => b
                .trim()
                .parse::<f64>()
                .map(|n| *a == n)
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parser::ExprParser;

    fn eval_with(input: Option<&str>, expr: &str) -> Result<Value, EvalError> {
        let parsed = ExprParser::parse_str(expr)?;
        Evaluator::new(input).eval(&parsed)
    }

    fn eval(expr: &str) -> Value {
        eval_with(None, expr).unwrap()
    }

    #[test]
    fn test_eval_literals() {
        assert_eq!(eval("null"), Value::Null);
        assert_eq!(eval("True"), Value::Bool(true));
        assert_eq!(eval("42"), Value::Number(42.0));
        assert_eq!(eval("'hello'"), Value::String("hello".to_string()));
    }

    #[test]
    fn test_eval_arithmetic() {
        assert_eq!(eval("1 + 2 * 3"), Value::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3"), Value::Number(9.0));
        assert_eq!(eval("7 % 4"), Value::Number(3.0));
        assert_eq!(eval("-2 + 5"), Value::Number(3.0));
        assert_eq!(eval("'a' + 'b'"), Value::from("ab"));
        assert!(eval_with(None, "1 / 0").is_err());
    }

    #[test]
    fn test_eval_comparison() {
        assert_eq!(eval("1 < 2"), Value::Bool(true));
        assert_eq!(eval("2 >= 3"), Value::Bool(false));
        assert_eq!(eval("'10' > 9"), Value::Bool(true));
        assert_eq!(eval("'apple' < 'banana'"), Value::Bool(true));
        assert_eq!(eval("'3' == 3"), Value::Bool(true));
    }

    #[test]
    fn test_string_equality_is_case_sensitive() {
        assert_eq!(eval("'Yes' == 'yes'"), Value::Bool(false));
        assert_eq!(eval("lower('Yes') == 'yes'"), Value::Bool(true));
    }

    #[test]
    fn test_eval_logical() {
        assert_eq!(eval("True and False"), Value::Bool(false));
        assert_eq!(eval("True && 1 < 2"), Value::Bool(true));
        assert_eq!(eval("False or not False"), Value::Bool(true));
        assert_eq!(eval("!(1 == 1) || 0"), Value::Bool(false));
    }

    #[test]
    fn test_short_circuit_skips_errors() {
        assert_eq!(eval("False and int('x')"), Value::Bool(false));
        assert_eq!(eval("True or 1 / 0"), Value::Bool(true));
    }

    #[test]
    fn test_eval_input() {
        assert_eq!(
            eval_with(Some("5"), "int(input()) > 3").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval_with(Some("y"), "input() == 'y' or input() == 'Y'").unwrap(),
            Value::Bool(true)
        );
        assert!(eval_with(None, "input() == 'y'").is_err());
    }

    #[test]
    fn test_unknown_function() {
        let err = eval_with(None, "exec('rm')").unwrap_err();
        assert!(err.message.contains("unknown function"));
    }
}
