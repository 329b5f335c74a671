use thiserror::Error;

/// One diagnostic produced by the lex/parse/resolve stages. All three stages
/// accumulate a `Vec<StageError>` and surface it in batch (`spec.md` §7).
#[derive(Debug, Error, Clone)]
#[error("{}", self.render())]
pub struct StageError {
  pub line: u32,
  pub filename: Option<String>,
  /// Present for parse errors: the offending token's lexeme (or `"end"` at EOF).
  pub lexeme: Option<String>,
  pub message: String,
  pub stage: Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Lex,
  Parse,
  Resolve,
}

impl StageError {
  pub fn new(stage: Stage, line: u32, message: impl Into<String>) -> Self {
    StageError { line, filename: None, lexeme: None, message: message.into(), stage }
  }

  pub fn with_lexeme(mut self, lexeme: impl Into<String>) -> Self {
    self.lexeme = Some(lexeme.into());
    self
  }

  pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
    self.filename = Some(filename.into());
    self
  }

  /// Renders `spec.md` §6's `"[line N] SyntaxError at 'lex': message"` (or `at end`).
  fn render(&self) -> String {
    let kind = match self.stage {
      Stage::Lex => "LexError",
      Stage::Parse => "SyntaxError",
      Stage::Resolve => "ResolveError",
    };
    match &self.lexeme {
      Some(l) if l == "<eof>" => format!("[line {}] {kind} at end: {}", self.line, self.message),
      Some(l) => format!("[line {}] {kind} at '{}': {}", self.line, l, self.message),
      None => format!("[line {}] {kind}: {}", self.line, self.message),
    }
  }
}

/// A single runtime failure. Unlike the batched stage errors, execution stops at the
/// first one (`spec.md` §7: "runtime errors terminate the current execution
/// immediately").
#[derive(Debug, Error, Clone)]
#[error("Error: {message}")]
pub struct RuntimeError {
  pub line: u32,
  pub message: String,
}

impl RuntimeError {
  pub fn new(line: u32, message: impl Into<String>) -> Self {
    RuntimeError { line, message: message.into() }
  }
}
