//! The C type lattice shared by the parser and the code generator.

use std::fmt;

use crate::ast::BinaryOp;
use crate::error::{CompileError, CompileResult, Location};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
  Void,
  Int,
  Char,
  Ptr(Box<Type>),
  /// `len` stays `None` until an initialiser back-fills an elided dimension.
  Array { elem: Box<Type>, len: Option<i64> },
}

impl Type {
  pub fn pointer_to(base: Type) -> Self {
    Self::Ptr(Box::new(base))
  }

  pub fn array_of(elem: Type, len: Option<i64>) -> Self {
    Self::Array {
      elem: Box::new(elem),
      len,
    }
  }

  pub fn is_integer(&self) -> bool {
    matches!(self, Type::Int | Type::Char)
  }

  pub fn is_pointer(&self) -> bool {
    matches!(self, Type::Ptr(_))
  }

  pub fn is_array(&self) -> bool {
    matches!(self, Type::Array { .. })
  }

  pub fn is_void(&self) -> bool {
    matches!(self, Type::Void)
  }

  /// Pointee of a pointer, or element of an array.
  pub fn base(&self) -> Option<&Type> {
    match self {
      Type::Ptr(base) => Some(base),
      Type::Array { elem, .. } => Some(elem),
      _ => None,
    }
  }

  /// Arrays become pointers to their first element; everything else is kept.
  pub fn decay(&self) -> Type {
    match self {
      Type::Array { elem, .. } => Type::Ptr(elem.clone()),
      other => other.clone(),
    }
  }

  pub fn size(&self) -> CompileResult<i64> {
    match self {
      Type::Void => Err(CompileError::type_error(
        Location::unknown(),
        "cannot take size of void",
      )),
      Type::Char => Ok(1),
      Type::Int => Ok(4),
      Type::Ptr(_) => Ok(8),
      Type::Array { elem, len } => match len {
        Some(len) => elem.size()?.checked_mul(*len).ok_or_else(|| {
          CompileError::type_error(Location::unknown(), format!("array is too large: {self}"))
        }),
        None => Err(CompileError::internal(format!(
          "size of incomplete array type {self}"
        ))),
      },
    }
  }

  /// log2 of the size when it is a power of two, so scaling can use shifts.
  pub fn shift(&self) -> CompileResult<Option<u32>> {
    let size = self.size()?;
    Ok((size > 0 && (size as u64).is_power_of_two()).then(|| size.trailing_zeros()))
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Type::Void => f.write_str("void"),
      Type::Int => f.write_str("int"),
      Type::Char => f.write_str("char"),
      Type::Ptr(base) => write!(f, "{base}*"),
      Type::Array { .. } => {
        let mut dims = Vec::new();
        let mut inner = self;
        while let Type::Array { elem, len } = inner {
          dims.push(*len);
          inner = elem;
        }
        write!(f, "{inner}")?;
        for dim in dims {
          match dim {
            Some(len) => write!(f, "[{len}]")?,
            None => f.write_str("[]")?,
          }
        }
        Ok(())
      }
    }
  }
}

/// `result_type` found no valid typing for the operand pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Incompatible;

/// Type of `lhs <op> rhs`, after decaying arrays to pointers.
///
/// Pointer plus integer is accepted with a warning: the integer side is
/// reinterpreted as an offset into the pointee array. An integer minus a
/// pointer has no type. Assignment takes the pointer type of its target
/// whatever the pointees are, so `void *` converts both ways. Warnings are
/// appended to `warnings`; nothing else is mutated.
pub fn result_type(
  op: BinaryOp,
  lhs: &Type,
  rhs: &Type,
  warnings: &mut Vec<String>,
) -> Result<Type, Incompatible> {
  let lhs = lhs.decay();
  let rhs = rhs.decay();

  match (&lhs, &rhs) {
    (Type::Void, _) | (_, Type::Void) => Err(Incompatible),
    _ if op.is_comparison() => Ok(Type::Int),
    (Type::Ptr(a), Type::Ptr(b)) => match op {
      BinaryOp::Assign => Ok(lhs.clone()),
      BinaryOp::Add | BinaryOp::Sub => Ok(Type::pointer_to(result_type(op, a, b, warnings)?)),
      _ => Err(Incompatible),
    },
    (_, Type::Ptr(_)) if op == BinaryOp::Sub => Err(Incompatible),
    (Type::Ptr(_), other) | (other, Type::Ptr(_)) => {
      let pointer = if lhs.is_pointer() { &lhs } else { &rhs };
      match op {
        BinaryOp::Assign => Ok(pointer.clone()),
        BinaryOp::Add | BinaryOp::Sub => {
          warnings.push(format!("making a pointer from {other}"));
          Ok(pointer.clone())
        }
        _ => Err(Incompatible),
      }
    }
    _ => Ok(Type::Int),
  }
}
