//! Integer interpreter for array dimensions.
//!
//! Dimensions are folded while the declaration is being parsed, so only
//! literals and the four arithmetic operators are accepted.

use crate::ast::{AstNode, BinaryOp, Literal};
use crate::error::{CompileError, CompileResult, Location};

pub fn evaluate(node: &AstNode) -> CompileResult<i64> {
  match node {
    AstNode::Literal {
      value: Literal::Int(value),
      ..
    } => Ok(*value),
    AstNode::Literal {
      value: Literal::Char(c),
      ..
    } => Ok(i64::from(*c)),
    AstNode::Binary { op, lhs, rhs, .. } => {
      let lhs = evaluate(lhs)?;
      let rhs = evaluate(rhs)?;
      match op {
        BinaryOp::Add => Ok(lhs.wrapping_add(rhs)),
        BinaryOp::Sub => Ok(lhs.wrapping_sub(rhs)),
        BinaryOp::Mul => Ok(lhs.wrapping_mul(rhs)),
        BinaryOp::Div if rhs == 0 => Err(CompileError::type_error(
          Location::unknown(),
          "division by zero in constant expression",
        )),
        BinaryOp::Div => Ok(lhs.wrapping_div(rhs)),
        _ => Err(not_constant(node)),
      }
    }
    _ => Err(not_constant(node)),
  }
}

fn not_constant(node: &AstNode) -> CompileError {
  CompileError::type_error(
    Location::unknown(),
    format!("array size must be a constant integer expression, but got {node}"),
  )
}
