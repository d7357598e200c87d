use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use log::debug;
use qcc::error::IoSnafu;
use qcc::{CompileOptions, CompileResult, OutputMode};
use snafu::ResultExt;

/// Compile a small C subset to x86-64 AT&T assembly.
#[derive(Parser, Debug)]
#[command(name = "qcc", version, about)]
struct Cli {
  /// Print the parsed AST instead of assembly
  #[arg(short = 'p', long = "print-ast")]
  print_ast: bool,

  /// Symbol name of the emitted routine
  #[arg(long, value_name = "NAME", default_value = qcc::DEFAULT_ENTRY)]
  entry: String,

  /// Declare a global defined elsewhere, e.g. --extern "int counter"
  #[arg(long = "extern", value_name = "DECL")]
  externs: Vec<String>,

  /// Write output to FILE instead of stdout
  #[arg(short, long, value_name = "FILE")]
  output: Option<PathBuf>,

  /// Source file; standard input when omitted or "-"
  input: Option<PathBuf>,
}

fn read_source(input: Option<&Path>) -> CompileResult<String> {
  match input {
    Some(path) if path != Path::new("-") => fs::read_to_string(path).context(IoSnafu {
      action: "read",
      path: path.display().to_string(),
    }),
    _ => {
      let mut source = String::new();
      io::stdin()
        .read_to_string(&mut source)
        .context(IoSnafu {
          action: "read",
          path: "<stdin>",
        })?;
      Ok(source)
    }
  }
}

fn run(cli: Cli) -> CompileResult<()> {
  let source = read_source(cli.input.as_deref())?;
  debug!("read {} bytes of source", source.len());

  let options = CompileOptions {
    mode: if cli.print_ast {
      OutputMode::AstDump
    } else {
      OutputMode::Assembly
    },
    entry: cli.entry,
    externs: cli.externs,
  };
  let output = qcc::compile(&source, &options)?;

  match cli.output {
    Some(path) => fs::write(&path, output).context(IoSnafu {
      action: "write",
      path: path.display().to_string(),
    }),
    None => {
      print!("{output}");
      Ok(())
    }
  }
}

fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

  if let Err(err) = run(Cli::parse()) {
    eprintln!("{err}");
    process::exit(1);
  }
}
