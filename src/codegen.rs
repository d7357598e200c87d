//! Code generation: lower the typed AST into AT&T x86-64 assembly.
//!
//! The emitter is a stack machine without register allocation. Every
//! expression leaves its value in `%rax`, zero-extended from its width; a
//! left operand is saved with `push`/`pop` while the right one is computed,
//! and `%r11` holds the right operand or a store address. Locals live below
//! `%rbp` at offsets fixed by [`layout_frame`] before any code is emitted.

use log::{debug, trace};

use crate::ast::{AstNode, BinaryOp, GlobalId, Literal, LocalId, UnaryOp};
use crate::context::Context;
use crate::error::{CompileError, CompileResult, Location};
use crate::parser::MAX_ARGS;
use crate::tokenizer::quote;
use crate::ty::Type;

const ARG_REGS: [&str; MAX_ARGS] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

/// Line-oriented assembly buffer.
#[derive(Debug, Default)]
pub struct Emitter {
  out: String,
}

impl Emitter {
  pub fn new() -> Self {
    Self::default()
  }

  /// An indented instruction or data directive.
  pub fn emit(&mut self, line: &str) {
    self.out.push_str("    ");
    self.out.push_str(line);
    self.out.push('\n');
  }

  /// A section or symbol directive, flush left.
  pub fn directive(&mut self, line: &str) {
    self.out.push_str(line);
    self.out.push('\n');
  }

  pub fn label(&mut self, label: &str) {
    self.out.push_str(label);
    self.out.push_str(":\n");
  }

  pub fn finish(self) -> String {
    self.out
  }
}

fn align_to(n: i64, align: i64) -> Option<i64> {
  Some(n.checked_add(align - 1)? / align * align)
}

/// Give every local an 8-byte aligned slot below `%rbp`, in declaration
/// order, and return the total frame size.
///
/// Slots are addressed with 32-bit displacements, so the frame must fit in
/// an `i32`.
pub fn layout_frame(ctx: &mut Context) -> CompileResult<i64> {
  let mut offset: i64 = 0;
  for local in &mut ctx.locals {
    offset = align_to(local.ty.size()?, 8)
      .and_then(|slot| offset.checked_add(slot))
      .filter(|&end| end <= i64::from(i32::MAX))
      .ok_or_else(|| {
        type_error(format!(
          "stack frame is too large at local {}: {}",
          local.name, local.ty
        ))
      })?;
    local.offset = offset;
  }
  Ok(offset)
}

/// Emit the whole program: string data, then one entry routine holding every
/// top-level statement.
pub fn generate(nodes: &[AstNode], ctx: &mut Context, entry: &str) -> CompileResult<String> {
  let frame_size = layout_frame(ctx)?;
  debug!(
    "frame layout: {} locals in {frame_size} bytes",
    ctx.locals.len()
  );

  let mut codegen = CodeGen {
    ctx,
    asm: Emitter::new(),
  };
  codegen.emit_data_section();
  codegen.emit_prologue(entry, frame_size);
  for node in nodes {
    codegen.emit_stmt(node)?;
  }
  codegen.asm.emit("leave");
  codegen.asm.emit("ret");

  Ok(codegen.asm.finish())
}

fn type_error(message: impl Into<String>) -> CompileError {
  CompileError::type_error(Location::unknown(), message)
}

struct CodeGen<'c> {
  ctx: &'c mut Context,
  asm: Emitter,
}

impl CodeGen<'_> {
  fn emit_data_section(&mut self) {
    if self.ctx.strings().next().is_none() {
      return;
    }
    self.asm.directive(".data");
    for (label, text) in self.ctx.strings() {
      self.asm.label(label);
      self.asm.emit(&format!(".string \"{}\"", quote(text)));
    }
  }

  fn emit_prologue(&mut self, entry: &str, frame_size: i64) {
    self.asm.directive(".text");
    self.asm.directive(&format!(".global {entry}"));
    self.asm.label(entry);
    self.asm.emit("push %rbp");
    self.asm.emit("mov %rsp, %rbp");
    if frame_size > 0 {
      self.asm.emit(&format!("sub ${frame_size}, %rsp"));
    }
  }

  fn local_slot(&self, var: LocalId, disp: i64) -> String {
    format!("{}(%rbp)", disp - self.ctx.local(var).offset)
  }

  fn global_slot(&self, global: GlobalId) -> String {
    format!("{}(%rip)", self.ctx.global(global).label)
  }

  /// Load a `ty` value from `src` into `%rax`. Arrays yield their address.
  fn emit_load(&mut self, ty: &Type, src: &str) -> CompileResult<()> {
    if ty.is_array() {
      self.asm.emit(&format!("lea {src}, %rax"));
      return Ok(());
    }
    match ty.size()? {
      1 => self.asm.emit(&format!("movzbl {src}, %eax")),
      4 => self.asm.emit(&format!("mov {src}, %eax")),
      8 => self.asm.emit(&format!("mov {src}, %rax")),
      size => {
        return Err(CompileError::internal(format!(
          "cannot load {size}-byte value of type {ty}"
        )));
      }
    }
    Ok(())
  }

  /// Store the low bytes of `%rax` to `dst`.
  fn emit_store(&mut self, ty: &Type, dst: &str) -> CompileResult<()> {
    if ty.is_array() {
      return Err(CompileError::internal(format!("cannot store to array type {ty}")));
    }
    let reg = match ty.size()? {
      1 => "%al",
      4 => "%eax",
      8 => "%rax",
      size => {
        return Err(CompileError::internal(format!(
          "cannot store {size}-byte value of type {ty}"
        )));
      }
    };
    self.asm.emit(&format!("mov {reg}, {dst}"));
    Ok(())
  }

  fn emit_stmt(&mut self, node: &AstNode) -> CompileResult<()> {
    trace!("emit {node}");
    match node {
      AstNode::Decl { var, init, .. } => match init {
        Some(init) => self.emit_decl_init(*var, init),
        None => Ok(()),
      },
      AstNode::If { cond, then, els } => self.emit_if(cond, then, els.as_deref()),
      AstNode::For {
        init,
        cond,
        step,
        body,
      } => self.emit_for(init.as_deref(), cond.as_deref(), step.as_deref(), body),
      AstNode::Compound { stmts } => {
        for stmt in stmts {
          self.emit_stmt(stmt)?;
        }
        Ok(())
      }
      AstNode::ArrayInit { .. } => Err(CompileError::internal(
        "initializer list outside a declaration",
      )),
      expr => self.emit_expr(expr),
    }
  }

  fn emit_if(&mut self, cond: &AstNode, then: &AstNode, els: Option<&AstNode>) -> CompileResult<()> {
    let else_label = self.ctx.next_label();
    self.emit_expr(cond)?;
    self.asm.emit("test %rax, %rax");
    self.asm.emit(&format!("je {else_label}"));
    self.emit_stmt(then)?;

    match els {
      Some(els) => {
        let end_label = self.ctx.next_label();
        self.asm.emit(&format!("jmp {end_label}"));
        self.asm.label(&else_label);
        self.emit_stmt(els)?;
        self.asm.label(&end_label);
      }
      None => self.asm.label(&else_label),
    }
    Ok(())
  }

  fn emit_for(
    &mut self,
    init: Option<&AstNode>,
    cond: Option<&AstNode>,
    step: Option<&AstNode>,
    body: &AstNode,
  ) -> CompileResult<()> {
    if let Some(init) = init {
      self.emit_stmt(init)?;
    }
    let begin = self.ctx.next_label();
    let end = self.ctx.next_label();

    self.asm.label(&begin);
    if let Some(cond) = cond {
      self.emit_expr(cond)?;
      self.asm.emit("test %rax, %rax");
      self.asm.emit(&format!("je {end}"));
    }
    self.emit_stmt(body)?;
    if let Some(step) = step {
      self.emit_expr(step)?;
    }
    self.asm.emit(&format!("jmp {begin}"));
    self.asm.label(&end);
    Ok(())
  }

  fn emit_decl_init(&mut self, var: LocalId, init: &AstNode) -> CompileResult<()> {
    let ty = self.ctx.local(var).ty.clone();

    match (&ty, init) {
      (Type::Array { elem, len }, AstNode::ArrayInit { elems }) => {
        let Some(len) = *len else {
          return Err(CompileError::internal(format!("incomplete array {ty}")));
        };
        let size = elem.size()?;
        for (i, value) in (0..).zip(elems) {
          self.emit_expr(value)?;
          let slot = self.local_slot(var, i * size);
          self.emit_store(elem, &slot)?;
        }
        let filled = elems.len() as i64;
        if filled < len {
          self.asm.emit("mov $0, %rax");
          for i in filled..len {
            let slot = self.local_slot(var, i * size);
            self.emit_store(elem, &slot)?;
          }
        }
        Ok(())
      }
      (Type::Array { len, .. }, AstNode::StringLiteral { text, .. }) => {
        let Some(len) = *len else {
          return Err(CompileError::internal(format!("incomplete array {ty}")));
        };
        let bytes = text.as_bytes();
        for i in 0..len {
          let byte = usize::try_from(i)
            .ok()
            .and_then(|i| bytes.get(i))
            .copied()
            .unwrap_or(0);
          let slot = self.local_slot(var, i);
          self.asm.emit(&format!("movb ${byte}, {slot}"));
        }
        Ok(())
      }
      (Type::Array { .. }, other) => Err(CompileError::internal(format!(
        "unsupported array initializer {other}"
      ))),
      (_, value) => {
        self.emit_expr(value)?;
        let slot = self.local_slot(var, 0);
        self.emit_store(&ty, &slot)
      }
    }
  }

  fn emit_expr(&mut self, node: &AstNode) -> CompileResult<()> {
    match node {
      AstNode::Literal { value, .. } => {
        let value = match value {
          Literal::Int(value) => *value,
          Literal::Char(c) => i64::from(*c),
        };
        self.asm.emit(&format!("mov ${value}, %rax"));
        Ok(())
      }
      AstNode::StringLiteral { global, .. } => {
        let slot = self.global_slot(*global);
        self.asm.emit(&format!("lea {slot}, %rax"));
        Ok(())
      }
      AstNode::LocalVar { var, ty, .. } => {
        let slot = self.local_slot(*var, 0);
        self.emit_load(ty, &slot)
      }
      AstNode::GlobalVar { global, ty, .. } => {
        let slot = self.global_slot(*global);
        self.emit_load(ty, &slot)
      }
      AstNode::LocalRef { var, off, ty, .. } => {
        let slot = self.local_slot(*var, 0);
        self.asm.emit(&format!("lea {slot}, %rax"));
        self.emit_ref_offset(ty, *off)
      }
      AstNode::GlobalRef {
        global, off, ty, ..
      } => {
        let slot = self.global_slot(*global);
        self.asm.emit(&format!("lea {slot}, %rax"));
        self.emit_ref_offset(ty, *off)
      }
      AstNode::Binary { op, lhs, rhs, .. } => self.emit_binary(*op, lhs, rhs),
      AstNode::Unary { op, ty, operand } => self.emit_unary(*op, ty, operand),
      AstNode::FunCall { name, args, .. } => self.emit_call(name, args),
      stmt => Err(CompileError::internal(format!(
        "statement used as a value: {stmt}"
      ))),
    }
  }

  fn emit_ref_offset(&mut self, ty: &Type, off: i64) -> CompileResult<()> {
    if off == 0 {
      return Ok(());
    }
    let Some(elem) = ty.base() else {
      return Err(CompileError::internal(format!("reference of non-pointer type {ty}")));
    };
    let bytes = off * elem.size()?;
    self.asm.emit(&format!("add ${bytes}, %rax"));
    Ok(())
  }

  /// Left operand in `%rax`, right operand in `%r11`.
  fn emit_operands(&mut self, lhs: &AstNode, rhs: &AstNode) -> CompileResult<()> {
    self.emit_expr(lhs)?;
    self.asm.emit("push %rax");
    self.emit_expr(rhs)?;
    self.asm.emit("mov %rax, %r11");
    self.asm.emit("pop %rax");
    Ok(())
  }

  /// Signed `%rax / %r11` with `%rdx` preserved.
  fn emit_idiv(&mut self) {
    self.asm.emit("push %rdx");
    self.asm.emit("cqo");
    self.asm.emit("idiv %r11");
    self.asm.emit("pop %rdx");
  }

  fn emit_compare(&mut self, set: &str) {
    self.asm.emit("cmp %r11, %rax");
    self.asm.emit(&format!("{set} %al"));
    self.asm.emit("movzbl %al, %eax");
  }

  fn emit_binary(&mut self, op: BinaryOp, lhs: &AstNode, rhs: &AstNode) -> CompileResult<()> {
    if op == BinaryOp::Assign {
      return self.emit_assign(lhs, rhs);
    }

    let (lhs_ty, rhs_ty) = (lhs.ty().decay(), rhs.ty().decay());
    if matches!(op, BinaryOp::Add | BinaryOp::Sub) && (lhs_ty.is_pointer() || rhs_ty.is_pointer()) {
      return self.emit_pointer_arith(op, lhs, rhs, &lhs_ty, &rhs_ty);
    }

    self.emit_operands(lhs, rhs)?;
    match op {
      BinaryOp::Add => self.asm.emit("add %r11, %rax"),
      BinaryOp::Sub => self.asm.emit("sub %r11, %rax"),
      BinaryOp::Mul => self.asm.emit("imul %r11, %rax"),
      BinaryOp::Div => self.emit_idiv(),
      BinaryOp::Lt => self.emit_compare("setl"),
      BinaryOp::Gt => self.emit_compare("setg"),
      BinaryOp::Eq => self.emit_compare("sete"),
      BinaryOp::Assign => {
        return Err(CompileError::internal("assignment reached arithmetic lowering"));
      }
    }
    Ok(())
  }

  fn emit_pointer_arith(
    &mut self,
    op: BinaryOp,
    lhs: &AstNode,
    rhs: &AstNode,
    lhs_ty: &Type,
    rhs_ty: &Type,
  ) -> CompileResult<()> {
    let insn = if op == BinaryOp::Add { "add" } else { "sub" };

    match (lhs_ty.base(), rhs_ty.base()) {
      (Some(_), Some(_)) if op == BinaryOp::Add => Err(type_error("no meaning for ptr plus ptr")),
      (Some(a), Some(b)) => {
        if a != b {
          return Err(type_error(format!(
            "incompatible pointer types in subtraction: <{lhs_ty}> and <{rhs_ty}>"
          )));
        }
        self.emit_operands(lhs, rhs)?;
        self.asm.emit("sub %r11, %rax");
        self.emit_unscale(a)
      }
      (Some(pointee), None) => {
        self.emit_operands(lhs, rhs)?;
        self.emit_scale("%r11", pointee)?;
        self.asm.emit(&format!("{insn} %r11, %rax"));
        Ok(())
      }
      (None, Some(_)) if op == BinaryOp::Sub => Err(type_error(format!(
        "cannot subtract a pointer from an integer: <{lhs_ty}> and <{rhs_ty}>"
      ))),
      (None, Some(pointee)) => {
        self.emit_operands(lhs, rhs)?;
        self.emit_scale("%rax", pointee)?;
        self.asm.emit(&format!("{insn} %r11, %rax"));
        Ok(())
      }
      (None, None) => Err(CompileError::internal(
        "pointer arithmetic without a pointer operand",
      )),
    }
  }

  /// Turn an element count in `reg` into a byte offset.
  fn emit_scale(&mut self, reg: &str, pointee: &Type) -> CompileResult<()> {
    match pointee.shift()? {
      Some(0) => {}
      Some(shift) => self.asm.emit(&format!("sal ${shift}, {reg}")),
      None => self.asm.emit(&format!("imul ${}, {reg}", pointee.size()?)),
    }
    Ok(())
  }

  /// Turn a byte distance in `%rax` into an element count.
  fn emit_unscale(&mut self, pointee: &Type) -> CompileResult<()> {
    match pointee.shift()? {
      Some(0) => {}
      Some(shift) => self.asm.emit(&format!("sar ${shift}, %rax")),
      None => {
        self.asm.emit(&format!("mov ${}, %r11", pointee.size()?));
        self.emit_idiv();
      }
    }
    Ok(())
  }

  fn emit_assign(&mut self, target: &AstNode, value: &AstNode) -> CompileResult<()> {
    match target {
      AstNode::LocalVar { var, ty, .. } => {
        self.emit_expr(value)?;
        let slot = self.local_slot(*var, 0);
        self.emit_store(ty, &slot)
      }
      AstNode::GlobalVar { global, ty, .. } => {
        self.emit_expr(value)?;
        let slot = self.global_slot(*global);
        self.emit_store(ty, &slot)
      }
      AstNode::Unary {
        op: UnaryOp::Deref,
        ty,
        operand,
      } => {
        self.emit_expr(value)?;
        self.asm.emit("push %rax");
        self.emit_expr(operand)?;
        self.asm.emit("mov %rax, %r11");
        self.asm.emit("pop %rax");
        self.emit_store(ty, "(%r11)")
      }
      other => Err(CompileError::internal(format!(
        "lvalue expected, but got {other}"
      ))),
    }
  }

  /// Address of an lvalue into `%rax`.
  fn emit_address(&mut self, node: &AstNode) -> CompileResult<()> {
    match node {
      AstNode::LocalVar { var, .. } => {
        let slot = self.local_slot(*var, 0);
        self.asm.emit(&format!("lea {slot}, %rax"));
        Ok(())
      }
      AstNode::GlobalVar { global, .. } => {
        let slot = self.global_slot(*global);
        self.asm.emit(&format!("lea {slot}, %rax"));
        Ok(())
      }
      AstNode::Unary {
        op: UnaryOp::Deref,
        operand,
        ..
      } => self.emit_expr(operand),
      other => Err(CompileError::internal(format!(
        "cannot take the address of {other}"
      ))),
    }
  }

  fn emit_unary(&mut self, op: UnaryOp, ty: &Type, operand: &AstNode) -> CompileResult<()> {
    match op {
      UnaryOp::AddressOf => self.emit_address(operand),
      UnaryOp::Deref => {
        self.emit_expr(operand)?;
        // An array element of an array is its own address.
        if ty.is_array() {
          return Ok(());
        }
        self.emit_load(ty, "(%rax)")
      }
      UnaryOp::PreInc | UnaryOp::PreDec => {
        self.emit_address(operand)?;
        self.asm.emit("mov %rax, %r11");
        self.emit_load(ty, "(%r11)")?;
        let step = match ty {
          Type::Ptr(pointee) => pointee.size()?,
          _ => 1,
        };
        let insn = if op == UnaryOp::PreInc { "add" } else { "sub" };
        self.asm.emit(&format!("{insn} ${step}, %rax"));
        self.emit_store(ty, "(%r11)")
      }
      UnaryOp::LogicalNot => {
        self.emit_expr(operand)?;
        self.asm.emit("cmp $0, %rax");
        self.asm.emit("sete %al");
        self.asm.emit("movzbl %al, %eax");
        Ok(())
      }
    }
  }

  fn emit_call(&mut self, name: &str, args: &[AstNode]) -> CompileResult<()> {
    if args.len() > ARG_REGS.len() {
      return Err(CompileError::internal(format!("too many arguments: {name}")));
    }
    for reg in ARG_REGS {
      self.asm.emit(&format!("push {reg}"));
    }
    for (arg, reg) in args.iter().zip(ARG_REGS) {
      self.emit_expr(arg)?;
      self.asm.emit(&format!("mov %rax, {reg}"));
    }
    self.asm.emit("mov $0, %rax");
    self.asm.emit(&format!("call {name}"));
    for reg in ARG_REGS.iter().rev() {
      self.asm.emit(&format!("pop {reg}"));
    }
    Ok(())
  }
}
