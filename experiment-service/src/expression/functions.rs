// Built-in Functions for Conditions
// Conversion and string helpers callable from transition conditions

use crate::expression::evaluator::EvalError;
use crate::expression::value::Value;

/// Registry of built-in functions
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinFunctions;

impl BuiltinFunctions {
    pub fn new() -> Self {
        Self
    }

    /// Call a built-in function
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        match name {
            // Conversion functions
            "int" => self.fn_int(args),
            "float" => self.fn_float(args),
            "str" => self.fn_str(args),
            "bool" => self.fn_bool(args),

            // String functions
            "len" => self.fn_len(args),
            "lower" => self.fn_lower(args),
            "upper" => self.fn_upper(args),
            "strip" => self.fn_strip(args),

            _ => Err(EvalError::new(format!("unknown function: {}", name))),
        }
    }

    fn fn_int(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let value = self.single_arg(args, "int")?;
        match &value {
            Value::String(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| EvalError::new(format!("int(): invalid literal '{}'", s)))
            }
            other => other
                .as_number()
                .map(|n| Value::Number(n.trunc()))
                .ok_or_else(|| EvalError::new(format!("int(): cannot convert {}", other.type_name()))),
        }
    }

    fn fn_float(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let value = self.single_arg(args, "float")?;
        value
            .as_number()
            .map(Value::Number)
            .ok_or_else(|| EvalError::new(format!("float(): cannot convert '{}'", value)))
    }

    fn fn_str(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let value = self.single_arg(args, "str")?;
        Ok(Value::String(value.as_string()))
    }

    fn fn_bool(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let value = self.single_arg(args, "bool")?;
        Ok(Value::Bool(value.is_truthy()))
    }

    fn fn_len(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        match self.single_arg(args, "len")? {
            Value::String(s) => Ok(Value::from(s.chars().count() as i64)),
            other => Err(EvalError::new(format!(
                "len(): {} has no length",
                other.type_name()
            ))),
        }
    }

    fn fn_lower(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let value = self.single_arg(args, "lower")?;
        Ok(Value::String(value.as_string().to_lowercase()))
    }

    fn fn_upper(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let value = self.single_arg(args, "upper")?;
        Ok(Value::String(value.as_string().to_uppercase()))
    }

    fn fn_strip(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let value = self.single_arg(args, "strip")?;
        Ok(Value::String(value.as_string().trim().to_string()))
    }

    fn single_arg(&self, args: Vec<Value>, name: &str) -> Result<Value, EvalError> {
        let count = args.len();
        let mut args = args.into_iter();
        match (args.next(), count) {
            (Some(value), 1) => Ok(value),
            _ => Err(EvalError::new(format!(
                "{}() takes exactly one argument ({} given)",
                name, count
            ))),
        }
    }
}
