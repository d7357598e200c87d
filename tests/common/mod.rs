//! Interpreter for the instruction subset the code generator emits, so the
//! integration tests can run generated programs without an assembler.
//!
//! Calls to unknown functions are recorded with their six register arguments
//! and return 0. They also scribble over every caller-saved register, which
//! catches code that relies on a register surviving a call.

#![allow(dead_code)]

use std::collections::HashMap;

use qcc::ast::AstNode;
use qcc::context::Context;
use qcc::{codegen, parser};

const MEMORY_SIZE: usize = 1 << 16;
const STACK_TOP: u64 = 0xff00;
const DATA_BASE: u64 = 0x100;
const RETURN_SENTINEL: u64 = 0xdead_beef;
const STEP_LIMIT: usize = 1_000_000;
const CLOBBER: u64 = 0x5151_5151_5151_5151;

const ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
const CALLER_SAVED: [&str; 8] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9", "r10", "r11"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
  pub name: String,
  pub args: [i64; 6],
}

#[derive(Debug, Clone)]
enum Base {
  Reg(&'static str),
  Symbol(String),
}

#[derive(Debug, Clone)]
enum Operand {
  Imm(i64),
  Reg(&'static str, u32),
  Mem { base: Base, disp: i64 },
  Label(String),
}

#[derive(Debug, Clone)]
struct Insn {
  op: String,
  args: Vec<Operand>,
  text: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct Flags {
  zero: bool,
  less: bool,
  greater: bool,
}

fn register(name: &str) -> Option<(&'static str, u32)> {
  let reg = match name {
    "%rax" => ("rax", 8),
    "%eax" => ("rax", 4),
    "%al" => ("rax", 1),
    "%rbx" => ("rbx", 8),
    "%rcx" => ("rcx", 8),
    "%rdx" => ("rdx", 8),
    "%rsi" => ("rsi", 8),
    "%rdi" => ("rdi", 8),
    "%rbp" => ("rbp", 8),
    "%rsp" => ("rsp", 8),
    "%r8" => ("r8", 8),
    "%r9" => ("r9", 8),
    "%r10" => ("r10", 8),
    "%r11" => ("r11", 8),
    _ => return None,
  };
  Some(reg)
}

fn parse_operand(text: &str) -> Operand {
  let text = text.trim();
  if let Some(imm) = text.strip_prefix('$') {
    return Operand::Imm(imm.parse().unwrap_or_else(|_| panic!("bad immediate: {text}")));
  }
  if text.starts_with('%') {
    let (name, width) = register(text).unwrap_or_else(|| panic!("unknown register: {text}"));
    return Operand::Reg(name, width);
  }
  if let Some(open) = text.find('(') {
    let prefix = &text[..open];
    let inner = text[open + 1..].trim_end_matches(')');
    if inner == "%rip" {
      return Operand::Mem {
        base: Base::Symbol(prefix.to_string()),
        disp: 0,
      };
    }
    let (reg, _) = register(inner).unwrap_or_else(|| panic!("unknown base register: {text}"));
    let disp = if prefix.is_empty() {
      0
    } else {
      prefix.parse().unwrap_or_else(|_| panic!("bad displacement: {text}"))
    };
    return Operand::Mem {
      base: Base::Reg(reg),
      disp,
    };
  }
  Operand::Label(text.to_string())
}

fn unquote(literal: &str) -> Vec<u8> {
  let inner = literal
    .trim()
    .strip_prefix('"')
    .and_then(|s| s.strip_suffix('"'))
    .unwrap_or_else(|| panic!("bad .string operand: {literal}"));
  let mut out = Vec::new();
  let mut bytes = inner.bytes();
  while let Some(b) = bytes.next() {
    if b != b'\\' {
      out.push(b);
      continue;
    }
    match bytes.next() {
      Some(b'n') => out.push(b'\n'),
      Some(b't') => out.push(b'\t'),
      Some(b'"') => out.push(b'"'),
      Some(b'\\') => out.push(b'\\'),
      other => panic!("unknown escape in .string: {other:?}"),
    }
  }
  out
}

pub struct Machine {
  regs: HashMap<&'static str, u64>,
  memory: Vec<u8>,
  symbols: HashMap<String, u64>,
  labels: HashMap<String, usize>,
  program: Vec<Insn>,
  flags: Flags,
  data_end: u64,
  frame_base: u64,
  pub calls: Vec<Call>,
}

impl Machine {
  fn load(asm: &str) -> Self {
    let mut machine = Machine {
      regs: HashMap::new(),
      memory: vec![0; MEMORY_SIZE],
      symbols: HashMap::new(),
      labels: HashMap::new(),
      program: Vec::new(),
      flags: Flags::default(),
      data_end: DATA_BASE,
      frame_base: 0,
      calls: Vec::new(),
    };

    let mut in_data = false;
    let mut pending_label: Option<String> = None;
    for raw in asm.lines() {
      let line = raw.trim();
      match line {
        "" => continue,
        ".data" => {
          in_data = true;
          continue;
        }
        ".text" => {
          in_data = false;
          continue;
        }
        _ => {}
      }
      if line.starts_with(".global") {
        continue;
      }
      if let Some(label) = line.strip_suffix(':') {
        if in_data {
          pending_label = Some(label.to_string());
        } else {
          machine.labels.insert(label.to_string(), machine.program.len());
        }
        continue;
      }
      if let Some(literal) = line.strip_prefix(".string ") {
        let label = pending_label.take().expect(".string without a label");
        let mut bytes = unquote(literal);
        bytes.push(0);
        let addr = machine.alloc(bytes.len());
        machine.write_bytes(addr, &bytes);
        machine.symbols.insert(label, addr);
        continue;
      }

      let (op, rest) = line.split_once(' ').unwrap_or((line, ""));
      let args = if rest.is_empty() {
        Vec::new()
      } else {
        rest.split(',').map(parse_operand).collect()
      };
      machine.program.push(Insn {
        op: op.to_string(),
        args,
        text: line.to_string(),
      });
    }

    // Anything referenced through %rip but not defined is an extern global.
    let externs: Vec<String> = machine
      .program
      .iter()
      .flat_map(|insn| insn.args.iter())
      .filter_map(|arg| match arg {
        Operand::Mem {
          base: Base::Symbol(name),
          ..
        } => Some(name.clone()),
        _ => None,
      })
      .collect();
    for name in externs {
      if !machine.symbols.contains_key(&name) {
        let addr = machine.alloc(8);
        machine.symbols.insert(name, addr);
      }
    }
    machine
  }

  fn alloc(&mut self, size: usize) -> u64 {
    let addr = self.data_end;
    self.data_end += (size as u64 + 7) / 8 * 8;
    addr
  }

  fn reg(&self, name: &str) -> u64 {
    self.regs.get(name).copied().unwrap_or(0)
  }

  fn set_reg(&mut self, name: &'static str, width: u32, value: u64) {
    let old = self.reg(name);
    let new = match width {
      8 => value,
      4 => value & 0xffff_ffff,
      1 => (old & !0xff) | (value & 0xff),
      _ => panic!("unsupported register width {width}"),
    };
    self.regs.insert(name, new);
  }

  fn write_bytes(&mut self, addr: u64, bytes: &[u8]) {
    let start = addr as usize;
    self.memory[start..start + bytes.len()].copy_from_slice(bytes);
  }

  pub fn read_mem(&self, addr: u64, width: u32) -> u64 {
    let start = addr as usize;
    let mut buf = [0u8; 8];
    buf[..width as usize].copy_from_slice(&self.memory[start..start + width as usize]);
    u64::from_le_bytes(buf)
  }

  fn write_mem(&mut self, addr: u64, width: u32, value: u64) {
    let bytes = value.to_le_bytes();
    self.write_bytes(addr, &bytes[..width as usize]);
  }

  fn address(&self, operand: &Operand) -> u64 {
    match operand {
      Operand::Mem {
        base: Base::Reg(reg),
        disp,
      } => self.reg(reg).wrapping_add(*disp as u64),
      Operand::Mem {
        base: Base::Symbol(name),
        disp,
      } => self.symbols[name].wrapping_add(*disp as u64),
      other => panic!("not a memory operand: {other:?}"),
    }
  }

  fn read(&self, operand: &Operand, width: u32) -> u64 {
    let mask = if width == 8 {
      u64::MAX
    } else {
      (1u64 << (width * 8)) - 1
    };
    match operand {
      Operand::Imm(value) => *value as u64 & mask,
      Operand::Reg(name, _) => self.reg(name) & mask,
      Operand::Mem { .. } => self.read_mem(self.address(operand), width),
      Operand::Label(label) => panic!("label used as a value: {label}"),
    }
  }

  fn write(&mut self, operand: &Operand, width: u32, value: u64) {
    match operand {
      Operand::Reg(name, reg_width) => self.set_reg(name, (*reg_width).min(width), value),
      Operand::Mem { .. } => {
        let addr = self.address(operand);
        self.write_mem(addr, width, value);
      }
      other => panic!("cannot write to {other:?}"),
    }
  }

  fn push(&mut self, value: u64) {
    let rsp = self.reg("rsp") - 8;
    self.regs.insert("rsp", rsp);
    self.write_mem(rsp, 8, value);
  }

  fn pop(&mut self) -> u64 {
    let rsp = self.reg("rsp");
    let value = self.read_mem(rsp, 8);
    self.regs.insert("rsp", rsp + 8);
    value
  }

  fn jump(&self, target: &Operand) -> usize {
    match target {
      Operand::Label(label) => *self
        .labels
        .get(label)
        .unwrap_or_else(|| panic!("undefined label {label}")),
      other => panic!("bad jump target {other:?}"),
    }
  }

  fn run(&mut self, entry: &str) {
    self.regs.insert("rsp", STACK_TOP);
    self.push(RETURN_SENTINEL);
    let mut pc = *self
      .labels
      .get(entry)
      .unwrap_or_else(|| panic!("entry {entry} not found"));

    for _ in 0..STEP_LIMIT {
      let insn = self.program[pc].clone();
      pc += 1;
      let args = &insn.args;

      match insn.op.as_str() {
        "push" => {
          let value = self.read(&args[0], 8);
          self.push(value);
        }
        "pop" => {
          let value = self.pop();
          self.write(&args[0], 8, value);
        }
        "mov" => {
          let width = match (&args[0], &args[1]) {
            (Operand::Reg(_, width), _) | (_, Operand::Reg(_, width)) => *width,
            _ => panic!("mov needs a register operand: {}", insn.text),
          };
          let value = self.read(&args[0], width);
          self.write(&args[1], width, value);
        }
        "movb" => {
          let value = self.read(&args[0], 1);
          self.write(&args[1], 1, value);
        }
        "movzbl" => {
          let value = self.read(&args[0], 1);
          self.write(&args[1], 4, value);
        }
        "lea" => {
          let addr = self.address(&args[0]);
          self.write(&args[1], 8, addr);
        }
        "add" | "sub" | "imul" | "sal" | "sar" => {
          let src = self.read(&args[0], 8);
          let dst = self.read(&args[1], 8);
          let value = match insn.op.as_str() {
            "add" => dst.wrapping_add(src),
            "sub" => dst.wrapping_sub(src),
            "imul" => (dst as i64).wrapping_mul(src as i64) as u64,
            "sal" => dst << src,
            _ => ((dst as i64) >> src) as u64,
          };
          self.write(&args[1], 8, value);
        }
        "cqo" => {
          let sign = if (self.reg("rax") as i64) < 0 { u64::MAX } else { 0 };
          self.regs.insert("rdx", sign);
        }
        "idiv" => {
          let divisor = self.read(&args[0], 8) as i64;
          assert_ne!(divisor, 0, "division by zero at {}", insn.text);
          let dividend = self.reg("rax") as i64;
          self.regs.insert("rax", dividend.wrapping_div(divisor) as u64);
          self.regs.insert("rdx", dividend.wrapping_rem(divisor) as u64);
        }
        "cmp" => {
          let rhs = self.read(&args[0], 8) as i64;
          let lhs = self.read(&args[1], 8) as i64;
          self.flags = Flags {
            zero: lhs == rhs,
            less: lhs < rhs,
            greater: lhs > rhs,
          };
        }
        "test" => {
          let value = (self.read(&args[0], 8) & self.read(&args[1], 8)) as i64;
          self.flags = Flags {
            zero: value == 0,
            less: value < 0,
            greater: value > 0,
          };
        }
        "sete" | "setl" | "setg" => {
          let flag = match insn.op.as_str() {
            "sete" => self.flags.zero,
            "setl" => self.flags.less,
            _ => self.flags.greater,
          };
          self.write(&args[0], 1, u64::from(flag));
        }
        "je" => {
          if self.flags.zero {
            pc = self.jump(&args[0]);
          }
        }
        "jmp" => pc = self.jump(&args[0]),
        "call" => {
          let Operand::Label(name) = &args[0] else {
            panic!("indirect call: {}", insn.text);
          };
          let args = ARG_REGS.map(|reg| self.reg(reg) as i64);
          self.calls.push(Call {
            name: name.clone(),
            args,
          });
          for reg in CALLER_SAVED {
            self.regs.insert(reg, CLOBBER);
          }
          self.regs.insert("rax", 0);
        }
        "leave" => {
          self.frame_base = self.reg("rbp");
          self.regs.insert("rsp", self.frame_base);
          let rbp = self.pop();
          self.regs.insert("rbp", rbp);
        }
        "ret" => {
          let target = self.pop();
          assert_eq!(target, RETURN_SENTINEL, "return to unknown address");
          assert_eq!(self.reg("rsp"), STACK_TOP, "stack is unbalanced");
          return;
        }
        other => panic!("unsupported instruction {other}: {}", insn.text),
      }
    }
    panic!("step limit exceeded");
  }

  /// Value left in `%rax` by the last expression statement.
  pub fn rax(&self) -> i64 {
    self.reg("rax") as i64
  }

  pub fn frame_base(&self) -> u64 {
    self.frame_base
  }

  pub fn symbol(&self, name: &str) -> u64 {
    self.symbols[name]
  }

  pub fn calls_to(&self, name: &str) -> Vec<&Call> {
    self.calls.iter().filter(|call| call.name == name).collect()
  }
}

/// Assemble-free execution of a compiled program.
pub struct Run {
  pub ctx: Context,
  pub nodes: Vec<AstNode>,
  pub asm: String,
  pub machine: Machine,
}

impl Run {
  /// Current value of the most recently declared local called `name`, read
  /// with the width of its type.
  pub fn local(&self, name: &str) -> i64 {
    let local = self
      .ctx
      .locals
      .iter()
      .rev()
      .find(|local| local.name == name)
      .unwrap_or_else(|| panic!("no local named {name}"));
    let width = local.ty.size().unwrap() as u32;
    let addr = self.local_address(name);
    self.machine.read_mem(addr, width.min(8)) as i64
  }

  pub fn local_address(&self, name: &str) -> u64 {
    let local = self
      .ctx
      .locals
      .iter()
      .rev()
      .find(|local| local.name == name)
      .unwrap_or_else(|| panic!("no local named {name}"));
    self.machine.frame_base() - local.offset as u64
  }

  pub fn byte_at(&self, addr: u64) -> u8 {
    self.machine.read_mem(addr, 1) as u8
  }
}

pub fn run_with_externs(source: &str, externs: &[&str]) -> Run {
  let mut ctx = Context::new();
  for decl in externs {
    parser::parse_extern(decl, &mut ctx).unwrap();
  }
  let nodes = parser::parse(source, &mut ctx).unwrap();
  let asm = codegen::generate(&nodes, &mut ctx, "mymain").unwrap();
  let mut machine = Machine::load(&asm);
  machine.run("mymain");
  Run {
    ctx,
    nodes,
    asm,
    machine,
  }
}

pub fn run(source: &str) -> Run {
  run_with_externs(source, &[])
}
