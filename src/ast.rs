//! Typed syntax tree produced by the parser.
//!
//! Every expression node carries the type inferred for it while parsing, so
//! the code generator never re-derives types from context. Variables are
//! referenced by index into the symbol tables owned by
//! [`Context`](crate::context::Context).
//!
//! Two textual forms are provided: the S-expression dump printed by `-p`
//! (the `Display` impl), and [`render_source`], which prints a tree back as
//! fully parenthesised source that parses to the same tree.

use std::fmt;

use crate::tokenizer::{Punct, quote, quote_char};
use crate::ty::Type;

/// Index of a local variable in `Context::locals`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub usize);

/// Index of a global symbol (string literal or extern) in `Context::globals`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub usize);

/// Binary operators recognised by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Assign,
  Lt,
  Gt,
  Eq,
}

impl BinaryOp {
  pub fn from_punct(punct: Punct) -> Option<Self> {
    let op = match punct {
      Punct::Plus => BinaryOp::Add,
      Punct::Minus => BinaryOp::Sub,
      Punct::Star => BinaryOp::Mul,
      Punct::Slash => BinaryOp::Div,
      Punct::Assign => BinaryOp::Assign,
      Punct::Lt => BinaryOp::Lt,
      Punct::Gt => BinaryOp::Gt,
      Punct::EqEq => BinaryOp::Eq,
      _ => return None,
    };
    Some(op)
  }

  pub fn symbol(self) -> &'static str {
    match self {
      BinaryOp::Add => "+",
      BinaryOp::Sub => "-",
      BinaryOp::Mul => "*",
      BinaryOp::Div => "/",
      BinaryOp::Assign => "=",
      BinaryOp::Lt => "<",
      BinaryOp::Gt => ">",
      BinaryOp::Eq => "==",
    }
  }

  /// Binding strength for precedence climbing; higher binds tighter.
  pub fn priority(self) -> u8 {
    match self {
      BinaryOp::Assign => 1,
      BinaryOp::Eq => 2,
      BinaryOp::Lt | BinaryOp::Gt => 3,
      BinaryOp::Add | BinaryOp::Sub => 4,
      BinaryOp::Mul | BinaryOp::Div => 5,
    }
  }

  pub fn is_comparison(self) -> bool {
    matches!(self, BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Eq)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  AddressOf,
  Deref,
  PreInc,
  PreDec,
  LogicalNot,
}

impl UnaryOp {
  pub fn symbol(self) -> &'static str {
    match self {
      UnaryOp::AddressOf => "&",
      UnaryOp::Deref => "*",
      UnaryOp::PreInc => "++",
      UnaryOp::PreDec => "--",
      UnaryOp::LogicalNot => "!",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Literal {
  Int(i64),
  Char(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstNode {
  Literal {
    value: Literal,
    ty: Type,
  },
  StringLiteral {
    global: GlobalId,
    text: String,
    ty: Type,
  },
  LocalVar {
    var: LocalId,
    name: String,
    ty: Type,
  },
  GlobalVar {
    global: GlobalId,
    name: String,
    ty: Type,
  },
  /// A decayed local array: the address of element `off`.
  LocalRef {
    var: LocalId,
    name: String,
    off: i64,
    ty: Type,
  },
  /// A decayed global array or string literal. `name` is how the referenced
  /// symbol prints (the quoted text for string literals).
  GlobalRef {
    global: GlobalId,
    name: String,
    off: i64,
    ty: Type,
  },
  Binary {
    op: BinaryOp,
    ty: Type,
    lhs: Box<AstNode>,
    rhs: Box<AstNode>,
  },
  Unary {
    op: UnaryOp,
    ty: Type,
    operand: Box<AstNode>,
  },
  FunCall {
    name: String,
    args: Vec<AstNode>,
    ty: Type,
  },
  Decl {
    var: LocalId,
    name: String,
    ty: Type,
    init: Option<Box<AstNode>>,
  },
  ArrayInit {
    elems: Vec<AstNode>,
  },
  If {
    cond: Box<AstNode>,
    then: Box<AstNode>,
    els: Option<Box<AstNode>>,
  },
  For {
    init: Option<Box<AstNode>>,
    cond: Option<Box<AstNode>>,
    step: Option<Box<AstNode>>,
    body: Box<AstNode>,
  },
  Compound {
    stmts: Vec<AstNode>,
  },
}

static NO_TYPE: Type = Type::Void;

impl AstNode {
  pub fn int(value: i64) -> Self {
    Self::Literal {
      value: Literal::Int(value),
      ty: Type::Int,
    }
  }

  pub fn char(value: u8) -> Self {
    Self::Literal {
      value: Literal::Char(value),
      ty: Type::Char,
    }
  }

  pub fn binary(op: BinaryOp, ty: Type, lhs: AstNode, rhs: AstNode) -> Self {
    Self::Binary {
      op,
      ty,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  pub fn unary(op: UnaryOp, ty: Type, operand: AstNode) -> Self {
    Self::Unary {
      op,
      ty,
      operand: Box::new(operand),
    }
  }

  /// Static type of an expression. Statements and initialiser lists have
  /// none and report `void`.
  pub fn ty(&self) -> &Type {
    match self {
      AstNode::Literal { ty, .. }
      | AstNode::StringLiteral { ty, .. }
      | AstNode::LocalVar { ty, .. }
      | AstNode::GlobalVar { ty, .. }
      | AstNode::LocalRef { ty, .. }
      | AstNode::GlobalRef { ty, .. }
      | AstNode::Binary { ty, .. }
      | AstNode::Unary { ty, .. }
      | AstNode::FunCall { ty, .. } => ty,
      AstNode::Decl { .. }
      | AstNode::ArrayInit { .. }
      | AstNode::If { .. }
      | AstNode::For { .. }
      | AstNode::Compound { .. } => &NO_TYPE,
    }
  }

  /// Whether the node designates storage (may be assigned or have its
  /// address taken).
  pub fn is_lvalue(&self) -> bool {
    matches!(
      self,
      AstNode::LocalVar { .. }
        | AstNode::GlobalVar { .. }
        | AstNode::Unary {
          op: UnaryOp::Deref,
          ..
        }
    )
  }
}

fn write_list(f: &mut fmt::Formatter<'_>, nodes: &[AstNode], sep: &str) -> fmt::Result {
  for (i, node) in nodes.iter().enumerate() {
    if i > 0 {
      f.write_str(sep)?;
    }
    write!(f, "{node}")?;
  }
  Ok(())
}

fn write_opt(f: &mut fmt::Formatter<'_>, node: Option<&AstNode>) -> fmt::Result {
  match node {
    Some(node) => write!(f, "{node}"),
    None => f.write_str("()"),
  }
}

impl fmt::Display for AstNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AstNode::Literal {
        value: Literal::Int(value),
        ..
      } => write!(f, "{value}"),
      AstNode::Literal {
        value: Literal::Char(c),
        ..
      } => write!(f, "'{}'", quote_char(*c)),
      AstNode::StringLiteral { text, .. } => write!(f, "\"{}\"", quote(text)),
      AstNode::LocalVar { name, .. } | AstNode::GlobalVar { name, .. } => f.write_str(name),
      AstNode::LocalRef { name, off, .. } | AstNode::GlobalRef { name, off, .. } => {
        write!(f, "{name}[{off}]")
      }
      AstNode::Binary { op, lhs, rhs, .. } => write!(f, "({} {lhs} {rhs})", op.symbol()),
      AstNode::Unary { op, operand, .. } => write!(f, "({} {operand})", op.symbol()),
      AstNode::FunCall { name, args, .. } => {
        write!(f, "{name}(")?;
        write_list(f, args, ",")?;
        f.write_str(")")
      }
      AstNode::Decl { name, ty, init, .. } => match init {
        Some(init) => write!(f, "(decl {ty} {name} {init})"),
        None => write!(f, "(decl {ty} {name})"),
      },
      AstNode::ArrayInit { elems } => {
        f.write_str("{")?;
        write_list(f, elems, ",")?;
        f.write_str("}")
      }
      AstNode::If { cond, then, els } => match els {
        Some(els) => write!(f, "(if {cond} {then} {els})"),
        None => write!(f, "(if {cond} {then})"),
      },
      AstNode::For {
        init,
        cond,
        step,
        body,
      } => {
        f.write_str("(for ")?;
        write_opt(f, init.as_deref())?;
        f.write_str(" ")?;
        write_opt(f, cond.as_deref())?;
        f.write_str(" ")?;
        write_opt(f, step.as_deref())?;
        write!(f, " {body})")
      }
      AstNode::Compound { stmts } => {
        f.write_str("{")?;
        write_list(f, stmts, " ")?;
        f.write_str("}")
      }
    }
  }
}

/// The `-p` output: one S-expression per top-level node.
pub fn dump(nodes: &[AstNode]) -> String {
  nodes.iter().map(|node| format!("{node}\n")).collect()
}

/// Print a tree back as source text that parses to an identical tree.
pub fn render_source(nodes: &[AstNode]) -> String {
  nodes.iter().map(|node| format!("{}\n", source_stmt(node))).collect()
}

fn source_stmt(node: &AstNode) -> String {
  match node {
    AstNode::Decl { name, ty, init, .. } => {
      let declarator = source_declarator(ty, name);
      match init {
        Some(init) => format!("{declarator} = {};", source_init(init)),
        None => format!("{declarator};"),
      }
    }
    AstNode::If { cond, then, els } => {
      let mut out = format!("if ({}) {}", source_expr(cond), source_stmt(then));
      if let Some(els) = els {
        out.push_str(&format!(" else {}", source_stmt(els)));
      }
      out
    }
    AstNode::For {
      init,
      cond,
      step,
      body,
    } => {
      let init = init.as_deref().map_or(";".to_string(), source_stmt);
      let cond = cond.as_deref().map_or(String::new(), source_expr);
      let step = step.as_deref().map_or(String::new(), source_expr);
      format!("for ({init} {cond}; {step}) {}", source_stmt(body))
    }
    AstNode::Compound { stmts } => {
      let body: Vec<String> = stmts.iter().map(source_stmt).collect();
      format!("{{ {} }}", body.join(" "))
    }
    expr => format!("{};", source_expr(expr)),
  }
}

fn source_init(node: &AstNode) -> String {
  match node {
    AstNode::ArrayInit { elems } => {
      let elems: Vec<String> = elems.iter().map(source_expr).collect();
      format!("{{{}}}", elems.join(", "))
    }
    other => source_expr(other),
  }
}

/// `int *name[2][3]` style declarator for a declared type.
fn source_declarator(ty: &Type, name: &str) -> String {
  let mut dims = String::new();
  let mut inner = ty;
  while let Type::Array { elem, len } = inner {
    match len {
      Some(len) => dims.push_str(&format!("[{len}]")),
      None => dims.push_str("[]"),
    }
    inner = elem;
  }
  let mut stars = String::new();
  while let Type::Ptr(base) = inner {
    stars.push('*');
    inner = base;
  }
  format!("{inner} {stars}{name}{dims}")
}

fn source_expr(node: &AstNode) -> String {
  match node {
    AstNode::Literal { .. } | AstNode::StringLiteral { .. } => node.to_string(),
    AstNode::LocalVar { name, .. } | AstNode::GlobalVar { name, .. } => name.clone(),
    AstNode::LocalRef { name, off, .. } | AstNode::GlobalRef { name, off, .. } => {
      if *off == 0 {
        name.clone()
      } else {
        format!("({name} + {off})")
      }
    }
    AstNode::Binary { op, lhs, rhs, .. } => {
      format!("({} {} {})", source_expr(lhs), op.symbol(), source_expr(rhs))
    }
    AstNode::Unary { op, operand, .. } => format!("({}{})", op.symbol(), source_expr(operand)),
    AstNode::FunCall { name, args, .. } => {
      let args: Vec<String> = args.iter().map(source_expr).collect();
      format!("{name}({})", args.join(", "))
    }
    AstNode::ArrayInit { .. } => source_init(node),
    stmt => source_stmt(stmt),
  }
}
