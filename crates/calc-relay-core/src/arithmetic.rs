use crate::command::Operator;

/// Notice sent back to the source chat when a division by zero is attempted.
pub const DIVISION_BY_ZERO_NOTICE: &str = "除数不能为0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ArithmeticError {
    #[error("division by zero")]
    DivisionByZero,
}

/// Apply one operation to the running value.
pub fn apply(value: f64, op: Operator, operand: f64) -> Result<f64, ArithmeticError> {
    match op {
        Operator::Add => Ok(value + operand),
        Operator::Subtract => Ok(value - operand),
        Operator::Multiply => Ok(value * operand),
        Operator::Divide if operand == 0.0 => Err(ArithmeticError::DivisionByZero),
        Operator::Divide => Ok(value / operand),
    }
}
