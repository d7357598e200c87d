//! Recursive-descent parser producing a typed statement list.
//!
//! Expressions use precedence climbing: `parse_expr` takes the priority of
//! the operator to its left and stops at anything that binds looser (or as
//! tight, unless it is the right-associative `=`). Types are inferred as each
//! node is built, so type errors surface here rather than in code generation.
//! Declarations register locals in the [`Context`] as soon as they are
//! complete.

use crate::ast::{AstNode, BinaryOp, GlobalId, UnaryOp};
use crate::const_eval;
use crate::context::{Context, Var};
use crate::error::{CompileError, CompileResult, Location};
use crate::tokenizer::{Lexer, Punct, Token, TokenKind, describe_token, quote};
use crate::ty::{self, Incompatible, Type};

/// Registers available for passing call arguments.
pub const MAX_ARGS: usize = 6;

const KEYWORDS: [&str; 6] = ["int", "char", "void", "if", "else", "for"];

/// Parse a whole translation unit into its top-level statements.
pub fn parse(source: &str, ctx: &mut Context) -> CompileResult<Vec<AstNode>> {
  let mut parser = Parser::new(source, ctx);
  let mut nodes = Vec::new();
  while parser.lexer.peek_token()?.is_some() {
    nodes.push(parser.parse_stmt()?);
  }
  Ok(nodes)
}

/// Declare a global defined outside this translation unit, written with the
/// declaration grammar minus the initialiser (`int counter`, `char *name;`).
pub fn parse_extern(decl: &str, ctx: &mut Context) -> CompileResult<GlobalId> {
  let mut parser = Parser::new(decl, ctx);
  let (ty, name, loc) = parser.parse_declarator()?;
  parser.equal(Punct::Semicolon)?;
  if let Some(token) = parser.next()? {
    return Err(parser.parse_error(
      token.loc,
      format!("unexpected token after extern declaration: {token}"),
    ));
  }
  parser.check_complete(&ty, &name, loc)?;
  Ok(parser.ctx.declare_extern(name, ty))
}

fn type_keyword(token: &Token) -> Option<Type> {
  match &token.kind {
    TokenKind::Ident(name) => match name.as_str() {
      "int" => Some(Type::Int),
      "char" => Some(Type::Char),
      "void" => Some(Type::Void),
      _ => None,
    },
    _ => None,
  }
}

fn is_keyword(name: &str) -> bool {
  KEYWORDS.contains(&name)
}

/// Arrays and string literals used as values become a reference to their
/// first element.
fn convert_array(node: AstNode) -> AstNode {
  match node {
    AstNode::StringLiteral { global, text, .. } => AstNode::GlobalRef {
      global,
      name: format!("\"{}\"", quote(&text)),
      off: 0,
      ty: Type::pointer_to(Type::Char),
    },
    AstNode::LocalVar { var, name, ty } if ty.is_array() => AstNode::LocalRef {
      var,
      name,
      off: 0,
      ty: ty.decay(),
    },
    AstNode::GlobalVar { global, name, ty } if ty.is_array() => AstNode::GlobalRef {
      global,
      name,
      off: 0,
      ty: ty.decay(),
    },
    other => other,
  }
}

struct Parser<'a, 'c> {
  lexer: Lexer<'a>,
  ctx: &'c mut Context,
}

impl<'a, 'c> Parser<'a, 'c> {
  fn new(source: &'a str, ctx: &'c mut Context) -> Self {
    Self {
      lexer: Lexer::new(source),
      ctx,
    }
  }

  fn source(&self) -> &'a str {
    self.lexer.source()
  }

  fn parse_error(&self, loc: usize, message: impl Into<String>) -> CompileError {
    CompileError::parse(self.source(), loc, message)
  }

  fn type_error(&self, loc: usize, message: impl Into<String>) -> CompileError {
    CompileError::type_error(Location::at(self.source(), loc), message)
  }

  /// Anchor a type error raised without position information at `loc`.
  fn locate(&self, err: CompileError, loc: usize) -> CompileError {
    match err {
      CompileError::Type { at, message } if !at.is_known() => self.type_error(loc, message),
      other => other,
    }
  }

  fn next(&mut self) -> CompileResult<Option<Token>> {
    self.lexer.next_token()
  }

  /// Next token, treating end of input as an error.
  fn expect_token(&mut self, what: &str) -> CompileResult<Token> {
    let loc = self.lexer.offset();
    self
      .next()?
      .ok_or_else(|| self.parse_error(loc, format!("premature end of input, expected {what}")))
  }

  /// Consume the next token if it is the given punctuator.
  fn equal(&mut self, punct: Punct) -> CompileResult<bool> {
    match self.next()? {
      Some(token) if token.is_punct(punct) => Ok(true),
      Some(token) => {
        self.lexer.push_back(token)?;
        Ok(false)
      }
      None => Ok(false),
    }
  }

  fn skip(&mut self, punct: Punct) -> CompileResult<Token> {
    let loc = self.lexer.offset();
    match self.next()? {
      Some(token) if token.is_punct(punct) => Ok(token),
      other => Err(self.parse_error(
        other.as_ref().map_or(loc, |token| token.loc),
        format!(
          "'{}' expected, but got {}",
          punct.as_str(),
          describe_token(other.as_ref())
        ),
      )),
    }
  }

  fn peek_is_type(&mut self) -> CompileResult<bool> {
    Ok(
      self
        .lexer
        .peek_token()?
        .is_some_and(|token| type_keyword(&token).is_some()),
    )
  }

  /// Type a binary operation, forwarding any coercion warnings.
  fn result_type(
    &mut self,
    op: BinaryOp,
    lhs: &Type,
    rhs: &Type,
    loc: usize,
  ) -> CompileResult<Type> {
    let mut warnings = Vec::new();
    let ty = ty::result_type(op, lhs, rhs, &mut warnings).map_err(|Incompatible| {
      self.type_error(
        loc,
        format!(
          "incompatible operands: {}: <{lhs}> and <{rhs}>",
          op.symbol()
        ),
      )
    })?;
    if !warnings.is_empty() {
      let at = Location::at(self.source(), loc);
      for warning in warnings {
        self.ctx.warn(&at, warning);
      }
    }
    Ok(ty)
  }

  fn ensure_assignable(&self, node: &AstNode, loc: usize) -> CompileResult<()> {
    if !node.is_lvalue() {
      return Err(self.type_error(loc, format!("lvalue expected, but got {node}")));
    }
    if node.ty().is_array() {
      return Err(self.type_error(loc, format!("array is not assignable: {node}")));
    }
    if node.ty().is_void() {
      return Err(self.type_error(loc, format!("void value is not assignable: {node}")));
    }
    Ok(())
  }

  fn parse_stmt(&mut self) -> CompileResult<AstNode> {
    let token = self.expect_token("statement")?;
    if token.is_ident("if") {
      return self.parse_if();
    }
    if token.is_ident("for") {
      return self.parse_for();
    }
    if token.is_punct(Punct::LBrace) {
      return self.parse_compound(token.loc);
    }

    let is_decl = type_keyword(&token).is_some();
    self.lexer.push_back(token)?;
    if is_decl {
      return self.parse_decl();
    }
    let expr = self.parse_expr(0)?;
    self.skip(Punct::Semicolon)?;
    Ok(expr)
  }

  fn parse_if(&mut self) -> CompileResult<AstNode> {
    self.skip(Punct::LParen)?;
    let cond = self.parse_condition()?;
    self.skip(Punct::RParen)?;
    let then = self.parse_stmt()?;

    let els = match self.next()? {
      Some(token) if token.is_ident("else") => Some(Box::new(self.parse_stmt()?)),
      Some(token) => {
        self.lexer.push_back(token)?;
        None
      }
      None => None,
    };

    Ok(AstNode::If {
      cond: Box::new(cond),
      then: Box::new(then),
      els,
    })
  }

  fn parse_for(&mut self) -> CompileResult<AstNode> {
    self.skip(Punct::LParen)?;

    let init = if self.equal(Punct::Semicolon)? {
      None
    } else if self.peek_is_type()? {
      Some(Box::new(self.parse_decl()?))
    } else {
      let init = self.parse_expr(0)?;
      self.skip(Punct::Semicolon)?;
      Some(Box::new(init))
    };

    let cond = if self.equal(Punct::Semicolon)? {
      None
    } else {
      let cond = self.parse_condition()?;
      self.skip(Punct::Semicolon)?;
      Some(Box::new(cond))
    };

    let step = if self.equal(Punct::RParen)? {
      None
    } else {
      let step = self.parse_expr(0)?;
      self.skip(Punct::RParen)?;
      Some(Box::new(step))
    };

    let body = Box::new(self.parse_stmt()?);
    Ok(AstNode::For {
      init,
      cond,
      step,
      body,
    })
  }

  fn parse_condition(&mut self) -> CompileResult<AstNode> {
    let loc = self.lexer.offset();
    let cond = convert_array(self.parse_expr(0)?);
    if cond.ty().is_void() {
      return Err(self.type_error(loc, format!("void value used as condition: {cond}")));
    }
    Ok(cond)
  }

  fn parse_compound(&mut self, open: usize) -> CompileResult<AstNode> {
    let mut stmts = Vec::new();
    loop {
      match self.lexer.peek_token()? {
        None => {
          return Err(self.parse_error(open, "premature end of input: '}' expected"));
        }
        Some(token) if token.is_punct(Punct::RBrace) => {
          self.next()?;
          break;
        }
        Some(_) => stmts.push(self.parse_stmt()?),
      }
    }
    Ok(AstNode::Compound { stmts })
  }

  /// `type '*'* name ('[' size? ']')*`, returning the type, the name and the
  /// offset of the name.
  fn parse_declarator(&mut self) -> CompileResult<(Type, String, usize)> {
    let token = self.expect_token("type")?;
    let Some(mut ty) = type_keyword(&token) else {
      return Err(self.parse_error(token.loc, format!("type expected, but got {token}")));
    };
    while self.equal(Punct::Star)? {
      ty = Type::pointer_to(ty);
    }

    let name_token = self.expect_token("identifier")?;
    let name = match &name_token.kind {
      TokenKind::Ident(name) if !is_keyword(name) => name.clone(),
      _ => {
        return Err(self.parse_error(
          name_token.loc,
          format!("identifier expected, but got {name_token}"),
        ));
      }
    };

    let mut dims = Vec::new();
    while self.equal(Punct::LBracket)? {
      let loc = self.lexer.offset();
      if self.equal(Punct::RBracket)? {
        // Only the outermost dimension can come from the initialiser.
        if !dims.is_empty() {
          return Err(self.parse_error(loc, format!("array size not specified: {name}")));
        }
        dims.push(None);
        continue;
      }
      let size = self.parse_expr(0)?;
      let len = const_eval::evaluate(&size).map_err(|err| self.locate(err, loc))?;
      if len <= 0 {
        return Err(self.type_error(loc, format!("array size must be positive, but got {len}")));
      }
      self.skip(Punct::RBracket)?;
      dims.push(Some(len));
    }
    for len in dims.into_iter().rev() {
      ty = Type::array_of(ty, len);
    }

    Ok((ty, name, name_token.loc))
  }

  /// Reject declarations whose storage size cannot be known.
  fn check_complete(&self, ty: &Type, name: &str, loc: usize) -> CompileResult<()> {
    if matches!(ty, Type::Array { len: None, .. }) {
      return Err(self.parse_error(loc, format!("array size not specified: {name}")));
    }
    ty.size().map_err(|err| self.locate(err, loc))?;
    Ok(())
  }

  fn parse_decl(&mut self) -> CompileResult<AstNode> {
    let (mut ty, name, loc) = self.parse_declarator()?;

    let init = if self.equal(Punct::Assign)? {
      let init = match &mut ty {
        Type::Array { elem, len } => self.parse_array_init(elem, len)?,
        scalar => self.parse_scalar_init(scalar)?,
      };
      Some(Box::new(init))
    } else {
      None
    };
    self.skip(Punct::Semicolon)?;
    self.check_complete(&ty, &name, loc)?;

    let var = self.ctx.declare_local(name.clone(), ty.clone());
    Ok(AstNode::Decl {
      var,
      name,
      ty,
      init,
    })
  }

  fn parse_scalar_init(&mut self, ty: &Type) -> CompileResult<AstNode> {
    let loc = self.lexer.offset();
    let init = convert_array(self.parse_expr(0)?);
    self.result_type(BinaryOp::Assign, ty, init.ty(), loc)?;
    Ok(init)
  }

  /// String or brace initialiser for an array, back-filling an elided length.
  fn parse_array_init(&mut self, elem: &Type, len: &mut Option<i64>) -> CompileResult<AstNode> {
    let token = self.expect_token("initializer")?;

    if let TokenKind::Str(text) = &token.kind {
      if *elem != Type::Char {
        return Err(self.type_error(
          token.loc,
          format!("string initializer for array of {elem}"),
        ));
      }
      let needed = text.len() as i64 + 1;
      match *len {
        None => *len = Some(needed),
        Some(len) if needed > len => {
          return Err(self.type_error(
            token.loc,
            format!("initializer string is too long for char[{len}]: {token}"),
          ));
        }
        Some(_) => {}
      }
      let global = self.ctx.declare_string(text);
      let ty = self.ctx.global(global).ty.clone();
      return Ok(AstNode::StringLiteral {
        global,
        text: text.clone(),
        ty,
      });
    }

    if !token.is_punct(Punct::LBrace) {
      return Err(self.parse_error(
        token.loc,
        format!("initializer list expected, but got {token}"),
      ));
    }
    if elem.is_array() {
      return Err(self.type_error(
        token.loc,
        "brace initializer for array of arrays is not supported",
      ));
    }

    let mut elems = Vec::new();
    if !self.equal(Punct::RBrace)? {
      loop {
        let loc = self.lexer.offset();
        let value = convert_array(self.parse_expr(0)?);
        self.result_type(BinaryOp::Assign, elem, value.ty(), loc)?;
        elems.push(value);

        let sep = self.expect_token("'}'")?;
        if sep.is_punct(Punct::RBrace) {
          break;
        }
        if !sep.is_punct(Punct::Comma) {
          return Err(self.parse_error(sep.loc, format!("',' or '}}' expected, but got {sep}")));
        }
      }
    }

    let count = elems.len() as i64;
    match *len {
      None if count == 0 => {
        return Err(self.parse_error(token.loc, "array size not specified"));
      }
      None => *len = Some(count),
      Some(len) if count > len => {
        return Err(self.type_error(
          token.loc,
          format!("too many elements in initializer: {count} for {elem}[{len}]"),
        ));
      }
      Some(_) => {}
    }
    Ok(AstNode::ArrayInit { elems })
  }

  fn parse_expr(&mut self, prev_prio: u8) -> CompileResult<AstNode> {
    let mut node = self.parse_unary()?;

    loop {
      let Some(token) = self.next()? else {
        return Ok(node);
      };
      let op = match &token.kind {
        TokenKind::Punct(punct) => BinaryOp::from_punct(*punct),
        _ => None,
      };
      let Some(op) = op else {
        self.lexer.push_back(token)?;
        return Ok(node);
      };

      let prio = op.priority();
      if prio < prev_prio || (prio == prev_prio && op != BinaryOp::Assign) {
        self.lexer.push_back(token)?;
        return Ok(node);
      }

      if op == BinaryOp::Assign {
        self.ensure_assignable(&node, token.loc)?;
      } else {
        node = convert_array(node);
      }
      let rhs = convert_array(self.parse_expr(prio)?);
      let mut ty = self.result_type(op, node.ty(), rhs.ty(), token.loc)?;

      if op == BinaryOp::Assign {
        ty = node.ty().clone();
      } else if op == BinaryOp::Sub && node.ty().is_pointer() && rhs.ty().is_pointer() {
        // Pointer difference counts elements.
        ty = Type::Int;
      }
      node = AstNode::binary(op, ty, node, rhs);
    }
  }

  fn parse_unary(&mut self) -> CompileResult<AstNode> {
    let token = self.expect_token("expression")?;
    let op = match &token.kind {
      TokenKind::Punct(Punct::Amp) => Some(UnaryOp::AddressOf),
      TokenKind::Punct(Punct::Star) => Some(UnaryOp::Deref),
      TokenKind::Punct(Punct::PlusPlus) => Some(UnaryOp::PreInc),
      TokenKind::Punct(Punct::MinusMinus) => Some(UnaryOp::PreDec),
      TokenKind::Punct(Punct::Bang) => Some(UnaryOp::LogicalNot),
      _ => None,
    };
    let Some(op) = op else {
      self.lexer.push_back(token)?;
      return self.parse_postfix();
    };
    let loc = token.loc;
    let operand = self.parse_unary()?;

    match op {
      UnaryOp::AddressOf => {
        if !operand.is_lvalue() {
          return Err(self.type_error(loc, format!("lvalue expected, but got {operand}")));
        }
        let ty = Type::pointer_to(operand.ty().clone());
        Ok(AstNode::unary(op, ty, operand))
      }
      UnaryOp::Deref => {
        let operand = convert_array(operand);
        let Type::Ptr(base) = operand.ty().decay() else {
          return Err(self.type_error(loc, format!("pointer type expected, but got {operand}")));
        };
        Ok(AstNode::unary(op, *base, operand))
      }
      UnaryOp::PreInc | UnaryOp::PreDec => {
        self.ensure_assignable(&operand, loc)?;
        let ty = operand.ty().clone();
        Ok(AstNode::unary(op, ty, operand))
      }
      UnaryOp::LogicalNot => {
        let operand = convert_array(operand);
        if operand.ty().is_void() {
          return Err(self.type_error(loc, format!("void value used with '!': {operand}")));
        }
        Ok(AstNode::unary(op, Type::Int, operand))
      }
    }
  }

  /// Primary followed by any number of `[index]` suffixes, each desugared to
  /// `*(base + index)`.
  fn parse_postfix(&mut self) -> CompileResult<AstNode> {
    let mut node = self.parse_primary()?;

    loop {
      let loc = self.lexer.offset();
      if !self.equal(Punct::LBracket)? {
        return Ok(node);
      }
      let index = convert_array(self.parse_expr(0)?);
      self.skip(Punct::RBracket)?;
      let base = convert_array(node);

      let (base_ty, index_ty) = (base.ty().decay(), index.ty().decay());
      let ty = match (&base_ty, &index_ty) {
        (Type::Ptr(_), other) if other.is_integer() => base_ty.clone(),
        (other, Type::Ptr(_)) if other.is_integer() => index_ty.clone(),
        _ => {
          return Err(self.type_error(
            loc,
            format!("subscripted value is not an array or pointer: {base}"),
          ));
        }
      };
      let Some(elem) = ty.base().cloned() else {
        return Err(CompileError::internal("subscript type lost its pointee"));
      };
      node = AstNode::unary(
        UnaryOp::Deref,
        elem,
        AstNode::binary(BinaryOp::Add, ty, base, index),
      );
    }
  }

  fn parse_primary(&mut self) -> CompileResult<AstNode> {
    let token = self.expect_token("expression")?;
    let loc = token.loc;

    match token.kind {
      TokenKind::Int(value) => Ok(AstNode::int(value)),
      TokenKind::Char(c) => Ok(AstNode::char(c)),
      TokenKind::Str(text) => {
        let global = self.ctx.declare_string(&text);
        let ty = self.ctx.global(global).ty.clone();
        Ok(AstNode::StringLiteral { global, text, ty })
      }
      TokenKind::Ident(name) => {
        if is_keyword(&name) {
          return Err(self.parse_error(loc, format!("unexpected keyword: {name}")));
        }
        if self.equal(Punct::LParen)? {
          return self.parse_call(name, loc);
        }
        self.lookup(name, loc)
      }
      TokenKind::Punct(Punct::LParen) => {
        let node = self.parse_expr(0)?;
        self.skip(Punct::RParen)?;
        Ok(node)
      }
      TokenKind::Punct(punct) => Err(self.parse_error(
        loc,
        format!("unexpected token: '{}'", punct.as_str()),
      )),
    }
  }

  fn lookup(&self, name: String, loc: usize) -> CompileResult<AstNode> {
    match self.ctx.find_var(&name) {
      Some(Var::Local(var)) => {
        let ty = self.ctx.local(var).ty.clone();
        Ok(AstNode::LocalVar { var, name, ty })
      }
      Some(Var::Global(global)) => {
        let ty = self.ctx.global(global).ty.clone();
        Ok(AstNode::GlobalVar { global, name, ty })
      }
      None => Err(self.parse_error(loc, format!("undefined variable: {name}"))),
    }
  }

  fn parse_call(&mut self, name: String, loc: usize) -> CompileResult<AstNode> {
    let mut args = Vec::new();
    if !self.equal(Punct::RParen)? {
      loop {
        if args.len() == MAX_ARGS {
          return Err(self.parse_error(loc, format!("too many arguments: {name}")));
        }
        let arg_loc = self.lexer.offset();
        let arg = convert_array(self.parse_expr(0)?);
        if arg.ty().is_void() {
          return Err(self.type_error(
            arg_loc,
            format!("void value passed to {name}: {arg}"),
          ));
        }
        args.push(arg);

        let sep = self.expect_token("')'")?;
        if sep.is_punct(Punct::RParen) {
          break;
        }
        if !sep.is_punct(Punct::Comma) {
          return Err(self.parse_error(sep.loc, format!("',' or ')' expected, but got {sep}")));
        }
      }
    }
    Ok(AstNode::FunCall {
      name,
      args,
      ty: Type::Int,
    })
  }
}
