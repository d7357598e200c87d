//! Shared error utilities used across the compilation pipeline.
//!
//! Every fault is fatal: the first error travels back to the driver through
//! `?` and compilation stops there. Positioned diagnostics are formatted in a
//! style reminiscent of chibicc, quoting the offending source line and
//! pointing at the byte with a caret.

use std::fmt;

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

/// A point in the source text that a diagnostic refers to.
///
/// Code generation works on the typed tree, which no longer carries source
/// offsets, so its diagnostics use [`Location::unknown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
  /// 1-based line number; 0 when unknown.
  pub line: usize,
  /// 1-based column, counted in characters.
  pub column: usize,
  source_line: String,
}

impl Location {
  /// Resolve a byte offset into a line/column pair and remember the line text.
  pub fn at(source: &str, loc: usize) -> Self {
    let mut safe_loc = loc.min(source.len());
    while !source.is_char_boundary(safe_loc) {
      safe_loc -= 1;
    }
    let line_start = source[..safe_loc].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[safe_loc..]
      .find('\n')
      .map_or(source.len(), |i| safe_loc + i);
    Self {
      line: source[..safe_loc].matches('\n').count() + 1,
      column: source[line_start..safe_loc].chars().count() + 1,
      source_line: source[line_start..line_end].trim_end_matches('\r').to_string(),
    }
  }

  pub fn unknown() -> Self {
    Self::default()
  }

  pub fn is_known(&self) -> bool {
    self.line > 0
  }

  fn excerpt(&self) -> String {
    if !self.is_known() {
      return String::new();
    }
    let marker = format!("{}^", " ".repeat(self.column - 1));
    format!("\n{}\n{marker}", self.source_line)
  }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_known() {
      write!(f, "{}:{}: ", self.line, self.column)
    } else {
      Ok(())
    }
  }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompileError {
  #[snafu(display("{at}lex error: {message}{}", at.excerpt()))]
  Lex { at: Location, message: String },

  #[snafu(display("{at}parse error: {message}{}", at.excerpt()))]
  Parse { at: Location, message: String },

  #[snafu(display("{at}type error: {message}{}", at.excerpt()))]
  Type { at: Location, message: String },

  #[snafu(display("internal error: {message}"))]
  Internal { message: String },

  #[snafu(display("cannot {action} {path}: {source}"))]
  Io {
    action: String,
    path: String,
    source: std::io::Error,
  },
}

impl CompileError {
  /// Malformed input at the character level, anchored at a byte offset.
  pub fn lex(source: &str, loc: usize, message: impl Into<String>) -> Self {
    Self::Lex {
      at: Location::at(source, loc),
      message: message.into(),
    }
  }

  /// Grammar violation anchored at the token starting at `loc`.
  pub fn parse(source: &str, loc: usize, message: impl Into<String>) -> Self {
    Self::Parse {
      at: Location::at(source, loc),
      message: message.into(),
    }
  }

  pub fn type_error(at: Location, message: impl Into<String>) -> Self {
    Self::Type {
      at,
      message: message.into(),
    }
  }

  /// A broken compiler invariant rather than bad input.
  pub fn internal(message: impl Into<String>) -> Self {
    Self::Internal {
      message: message.into(),
    }
  }
}
