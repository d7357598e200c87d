//! Crate root: wires together the compilation pipeline.
//!
//! - `tokenizer` hands out tokens one at a time with a single pushback slot.
//! - `parser` builds the typed AST and fills the symbol tables in `context`.
//! - `const_eval` folds array dimensions while declarations are parsed.
//! - `codegen` lays out the frame and lowers the AST to AT&T assembly.
//! - `ast` and `ty` hold the shared tree and type definitions.
//! - `error` centralises diagnostics shared by the other modules.

pub mod ast;
pub mod codegen;
pub mod const_eval;
pub mod context;
pub mod error;
pub mod parser;
pub mod tokenizer;
pub mod ty;

use log::debug;

pub use context::Context;
pub use error::{CompileError, CompileResult};

/// Symbol of the emitted routine unless overridden.
pub const DEFAULT_ENTRY: &str = "mymain";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
  #[default]
  Assembly,
  /// S-expression dump of the parsed tree.
  AstDump,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
  pub mode: OutputMode,
  pub entry: String,
  /// Declarations of globals defined elsewhere, e.g. `int counter`.
  pub externs: Vec<String>,
}

impl Default for CompileOptions {
  fn default() -> Self {
    Self {
      mode: OutputMode::Assembly,
      entry: DEFAULT_ENTRY.to_string(),
      externs: Vec::new(),
    }
  }
}

/// Run the pipeline over one source text.
pub fn compile(source: &str, options: &CompileOptions) -> CompileResult<String> {
  let mut ctx = Context::new();
  for decl in &options.externs {
    parser::parse_extern(decl, &mut ctx)?;
  }

  let nodes = parser::parse(source, &mut ctx)?;
  debug!(
    "parsed {} statements, {} locals, {} globals",
    nodes.len(),
    ctx.locals.len(),
    ctx.globals.len()
  );

  match options.mode {
    OutputMode::AstDump => Ok(ast::dump(&nodes)),
    OutputMode::Assembly => codegen::generate(&nodes, &mut ctx, &options.entry),
  }
}

/// Compile a source string into AT&T assembly with the default options.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  compile(source, &CompileOptions::default())
}

pub fn dump_ast(source: &str) -> CompileResult<String> {
  let options = CompileOptions {
    mode: OutputMode::AstDump,
    ..CompileOptions::default()
  };
  compile(source, &options)
}
