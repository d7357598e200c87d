//! Compilation state shared by the parser and the code generator.

use log::warn;

use crate::ast::{GlobalId, LocalId};
use crate::error::Location;
use crate::tokenizer::quote;
use crate::ty::Type;

/// A stack-allocated variable. `offset` is filled by the frame layout pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
  pub name: String,
  pub ty: Type,
  pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalInit {
  /// File-local string literal data, emitted into `.data`.
  Str(String),
  /// Defined in another object; only referenced.
  Extern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
  pub name: String,
  pub ty: Type,
  pub label: String,
  pub init: GlobalInit,
}

/// What an identifier resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
  Local(LocalId),
  Global(GlobalId),
}

#[derive(Debug, Default)]
pub struct Context {
  pub globals: Vec<Global>,
  pub locals: Vec<Local>,
  pub warnings: Vec<String>,
  labels: usize,
}

impl Context {
  pub fn new() -> Self {
    Self::default()
  }

  /// Hand out the next `.L<n>` label. String literals and control flow share
  /// the counter, so labels never collide.
  pub fn next_label(&mut self) -> String {
    let label = format!(".L{}", self.labels);
    self.labels += 1;
    label
  }

  pub fn declare_local(&mut self, name: impl Into<String>, ty: Type) -> LocalId {
    self.locals.push(Local {
      name: name.into(),
      ty,
      offset: 0,
    });
    LocalId(self.locals.len() - 1)
  }

  /// Register a string literal as anonymous `char[len + 1]` data.
  pub fn declare_string(&mut self, text: &str) -> GlobalId {
    let label = self.next_label();
    self.globals.push(Global {
      name: format!("\"{}\"", quote(text)),
      ty: Type::array_of(Type::Char, Some(text.len() as i64 + 1)),
      label,
      init: GlobalInit::Str(text.to_string()),
    });
    GlobalId(self.globals.len() - 1)
  }

  pub fn declare_extern(&mut self, name: impl Into<String>, ty: Type) -> GlobalId {
    let name = name.into();
    self.globals.push(Global {
      label: name.clone(),
      name,
      ty,
      init: GlobalInit::Extern,
    });
    GlobalId(self.globals.len() - 1)
  }

  /// Resolve a name: the most recent local declaration wins, then named
  /// globals. String literals are never found by name.
  pub fn find_var(&self, name: &str) -> Option<Var> {
    if let Some(index) = self.locals.iter().rposition(|local| local.name == name) {
      return Some(Var::Local(LocalId(index)));
    }
    self
      .globals
      .iter()
      .position(|global| global.init == GlobalInit::Extern && global.name == name)
      .map(|index| Var::Global(GlobalId(index)))
  }

  pub fn local(&self, id: LocalId) -> &Local {
    &self.locals[id.0]
  }

  pub fn global(&self, id: GlobalId) -> &Global {
    &self.globals[id.0]
  }

  /// String literal data in declaration order, as `(label, text)`.
  pub fn strings(&self) -> impl Iterator<Item = (&str, &str)> {
    self.globals.iter().filter_map(|global| match &global.init {
      GlobalInit::Str(text) => Some((global.label.as_str(), text.as_str())),
      GlobalInit::Extern => None,
    })
  }

  /// Report a non-fatal diagnostic and keep it for callers to inspect.
  pub fn warn(&mut self, at: &Location, message: impl Into<String>) {
    let message = format!("{at}warning: {}", message.into());
    warn!("{message}");
    self.warnings.push(message);
  }
}
