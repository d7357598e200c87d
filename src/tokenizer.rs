//! Lexical analysis: a pull-based reader that hands out one token at a time.
//!
//! The parser gets exactly one token of lookahead through a single pushback
//! slot. Two-character operators (`==`, `++`, `--`) are recognised by reading
//! one character and consuming a second only when it completes the operator.

use std::fmt;

use crate::error::{CompileError, CompileResult};

/// Punctuation understood by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Punct {
  Plus,
  Minus,
  Star,
  Slash,
  Assign,
  Lt,
  Gt,
  EqEq,
  Amp,
  Bang,
  PlusPlus,
  MinusMinus,
  LParen,
  RParen,
  LBracket,
  RBracket,
  LBrace,
  RBrace,
  Comma,
  Semicolon,
}

impl Punct {
  pub fn as_str(self) -> &'static str {
    match self {
      Punct::Plus => "+",
      Punct::Minus => "-",
      Punct::Star => "*",
      Punct::Slash => "/",
      Punct::Assign => "=",
      Punct::Lt => "<",
      Punct::Gt => ">",
      Punct::EqEq => "==",
      Punct::Amp => "&",
      Punct::Bang => "!",
      Punct::PlusPlus => "++",
      Punct::MinusMinus => "--",
      Punct::LParen => "(",
      Punct::RParen => ")",
      Punct::LBracket => "[",
      Punct::RBracket => "]",
      Punct::LBrace => "{",
      Punct::RBrace => "}",
      Punct::Comma => ",",
      Punct::Semicolon => ";",
    }
  }

  fn single(c: u8) -> Option<Self> {
    let punct = match c {
      b'+' => Punct::Plus,
      b'-' => Punct::Minus,
      b'*' => Punct::Star,
      b'/' => Punct::Slash,
      b'=' => Punct::Assign,
      b'<' => Punct::Lt,
      b'>' => Punct::Gt,
      b'&' => Punct::Amp,
      b'!' => Punct::Bang,
      b'(' => Punct::LParen,
      b')' => Punct::RParen,
      b'[' => Punct::LBracket,
      b']' => Punct::RBracket,
      b'{' => Punct::LBrace,
      b'}' => Punct::RBrace,
      b',' => Punct::Comma,
      b';' => Punct::Semicolon,
      _ => return None,
    };
    Some(punct)
  }
}

/// Kinds of tokens recognised by the front-end, with their payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
  Ident(String),
  Punct(Punct),
  Int(i64),
  Char(u8),
  Str(String),
}

/// A token plus the byte range of the source it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  pub fn new(kind: TokenKind, loc: usize, len: usize) -> Self {
    Self { kind, loc, len }
  }

  pub fn is_punct(&self, punct: Punct) -> bool {
    self.kind == TokenKind::Punct(punct)
  }

  pub fn is_ident(&self, name: &str) -> bool {
    matches!(&self.kind, TokenKind::Ident(ident) if ident == name)
  }
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.kind {
      TokenKind::Ident(name) => f.write_str(name),
      TokenKind::Punct(punct) => f.write_str(punct.as_str()),
      TokenKind::Int(value) => write!(f, "{value}"),
      TokenKind::Char(c) => write!(f, "'{}'", quote_char(*c)),
      TokenKind::Str(text) => write!(f, "\"{}\"", quote(text)),
    }
  }
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>) -> String {
  match token {
    Some(t) => t.to_string(),
    None => "EOF".to_string(),
  }
}

/// Escape text for a double-quoted context (`.string` directives, AST dumps).
pub fn quote(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '"' => out.push_str("\\\""),
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\t' => out.push_str("\\t"),
      _ => out.push(c),
    }
  }
  out
}

/// Escape a byte for a single-quoted character literal.
pub fn quote_char(c: u8) -> String {
  match c {
    b'\'' => "\\'".to_string(),
    b'\\' => "\\\\".to_string(),
    b'\n' => "\\n".to_string(),
    b'\t' => "\\t".to_string(),
    _ => (c as char).to_string(),
  }
}

/// Cursor over the source text with a one-token pushback slot.
pub struct Lexer<'a> {
  source: &'a str,
  pos: usize,
  ungotten: Option<Token>,
}

impl<'a> Lexer<'a> {
  pub fn new(source: &'a str) -> Self {
    Self {
      source,
      pos: 0,
      ungotten: None,
    }
  }

  pub fn source(&self) -> &'a str {
    self.source
  }

  /// Byte offset the next token starts at (or the end of the input).
  pub fn offset(&self) -> usize {
    match &self.ungotten {
      Some(token) => token.loc,
      None => {
        let rest = &self.source[self.pos..];
        let trimmed = rest.trim_start_matches(|c: char| c.is_ascii_whitespace());
        self.pos + (rest.len() - trimmed.len())
      }
    }
  }

  /// Read the next token, draining the pushback slot first.
  pub fn next_token(&mut self) -> CompileResult<Option<Token>> {
    if let Some(token) = self.ungotten.take() {
      return Ok(Some(token));
    }
    self.read_token()
  }

  /// Return a token to the stream. Only one token may be pending at a time.
  pub fn push_back(&mut self, token: Token) -> CompileResult<()> {
    if self.ungotten.is_some() {
      return Err(CompileError::internal("push back buffer is already full"));
    }
    self.ungotten = Some(token);
    Ok(())
  }

  /// Look at the next token without consuming it.
  pub fn peek_token(&mut self) -> CompileResult<Option<Token>> {
    let token = self.next_token()?;
    if let Some(token) = &token {
      self.push_back(token.clone())?;
    }
    Ok(token)
  }

  fn getc(&mut self) -> Option<u8> {
    let c = self.source.as_bytes().get(self.pos).copied()?;
    self.pos += 1;
    Some(c)
  }

  fn ungetc(&mut self) {
    self.pos -= 1;
  }

  fn read_token(&mut self) -> CompileResult<Option<Token>> {
    while let Some(c) = self.getc() {
      if !c.is_ascii_whitespace() {
        self.ungetc();
        break;
      }
    }

    let start = self.pos;
    let Some(c) = self.getc() else {
      return Ok(None);
    };

    let kind = match c {
      b'0'..=b'9' => self.read_number(c),
      b'"' => self.read_string(start)?,
      b'\'' => self.read_char(start)?,
      c if c.is_ascii_alphabetic() || c == b'_' => self.read_ident(start),
      b'=' => self.read_rep(b'=', Punct::EqEq, Punct::Assign),
      b'+' => self.read_rep(b'+', Punct::PlusPlus, Punct::Plus),
      b'-' => self.read_rep(b'-', Punct::MinusMinus, Punct::Minus),
      _ => match Punct::single(c) {
        Some(punct) => TokenKind::Punct(punct),
        None => {
          let invalid = self.source[start..].chars().next().unwrap_or('\0');
          return Err(CompileError::lex(
            self.source,
            start,
            format!("unexpected character: '{invalid}'"),
          ));
        }
      },
    };

    Ok(Some(Token::new(kind, start, self.pos - start)))
  }

  /// Consume `second` if it follows, yielding the two-character operator.
  fn read_rep(&mut self, second: u8, double: Punct, single: Punct) -> TokenKind {
    match self.getc() {
      Some(c) if c == second => TokenKind::Punct(double),
      Some(_) => {
        self.ungetc();
        TokenKind::Punct(single)
      }
      None => TokenKind::Punct(single),
    }
  }

  fn read_number(&mut self, first: u8) -> TokenKind {
    let mut value = i64::from(first - b'0');
    while let Some(c) = self.getc() {
      if !c.is_ascii_digit() {
        self.ungetc();
        break;
      }
      value = value.wrapping_mul(10).wrapping_add(i64::from(c - b'0'));
    }
    TokenKind::Int(value)
  }

  fn read_ident(&mut self, start: usize) -> TokenKind {
    while let Some(c) = self.getc() {
      if !(c.is_ascii_alphanumeric() || c == b'_') {
        self.ungetc();
        break;
      }
    }
    TokenKind::Ident(self.source[start..self.pos].to_string())
  }

  fn read_string(&mut self, start: usize) -> CompileResult<TokenKind> {
    let mut buf = Vec::new();
    loop {
      let Some(c) = self.getc() else {
        return Err(CompileError::lex(self.source, start, "unterminated string"));
      };
      match c {
        b'"' => break,
        b'\\' => {
          let Some(escaped) = self.getc() else {
            return Err(CompileError::lex(self.source, start, "unterminated string"));
          };
          let value = match escaped {
            b'\\' => b'\\',
            b'n' => b'\n',
            b't' => b'\t',
            b'"' => b'"',
            _ => return Err(self.unknown_escape()),
          };
          buf.push(value);
        }
        _ => buf.push(c),
      }
    }
    Ok(TokenKind::Str(String::from_utf8_lossy(&buf).into_owned()))
  }

  fn read_char(&mut self, start: usize) -> CompileResult<TokenKind> {
    let source = self.source;
    let unterminated = || CompileError::lex(source, start, "unterminated char");
    let Some(mut c) = self.getc() else {
      return Err(unterminated());
    };
    if c == b'\\' {
      let Some(escaped) = self.getc() else {
        return Err(unterminated());
      };
      c = match escaped {
        b'\\' => b'\\',
        b'n' => b'\n',
        b't' => b'\t',
        b'"' => b'"',
        b'\'' => b'\'',
        _ => return Err(self.unknown_escape()),
      };
    }
    match self.getc() {
      Some(b'\'') => Ok(TokenKind::Char(c)),
      Some(_) => Err(CompileError::lex(source, start, "malformed char literal")),
      None => Err(unterminated()),
    }
  }

  fn unknown_escape(&self) -> CompileError {
    let at = self.pos - 2;
    let escape = self.source[at..].chars().take(2).collect::<String>();
    CompileError::lex(
      self.source,
      at,
      format!("unknown escape sequence: {escape}"),
    )
  }
}
