// Condition Expression Module
// Restricted expression language for control-flow transition conditions

pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod value;

pub use evaluator::{EvalError, Evaluator};
pub use functions::BuiltinFunctions;
pub use lexer::{LexError, Lexer, Token};
pub use parser::{BinaryOp, Expr, ExprParser, ParseExprError, UnaryOp};
pub use value::Value;

/// A parsed transition condition
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, EvalError> {
        let expr = ExprParser::parse_str(source)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the condition calls `input()`
    pub fn uses_input(&self) -> bool {
        self.expr.uses_input()
    }

    /// Evaluate to a boolean using the truthiness of the result
    pub fn evaluate(&self, input: Option<&str>) -> Result<bool, EvalError> {
        Evaluator::new(input)
            .eval(&self.expr)
            .map(|value| value.is_truthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_round_trip() {
        let condition = Condition::parse("int(input()) >= 10").unwrap();
        assert!(condition.uses_input());
        assert_eq!(condition.source(), "int(input()) >= 10");
        assert!(condition.evaluate(Some("12")).unwrap());
        assert!(!condition.evaluate(Some("9")).unwrap());
    }

    #[test]
    fn test_condition_without_input() {
        let condition = Condition::parse("1 + 1 == 2").unwrap();
        assert!(!condition.uses_input());
        assert!(condition.evaluate(None).unwrap());
    }

    #[test]
    fn test_parse_error_becomes_eval_error() {
        let err = Condition::parse("1 +").unwrap_err();
        assert!(err.message.contains("parse error"));
    }
}
