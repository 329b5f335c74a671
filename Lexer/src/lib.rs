use log::trace;
use raven_core::tokens::{keyword_kind, LexErrorKind, Token, TokenKind};

/// Converts source text into a token stream. Grounded on `Lexer/src/lib.rs`'s
/// `Lexer<'a>{source, current, line_num, line_start}` shape and `skip_whitespace`/
/// `make_identifier_token`/`make_error_token` method split, simplified to `spec.md`
/// §4.A's rules: `#`-to-EOL comments (not the teacher's C-style `//`/`/* */`), and
/// newlines synthesized as real `NEWLINE` tokens rather than swallowed as
/// whitespace.
pub struct Lexer<'a> {
  source: &'a [u8],
  start: usize,
  current: usize,
  line: u32,
}

impl<'a> Lexer<'a> {
  pub fn new(source: &'a str) -> Self {
    Lexer { source: source.as_bytes(), start: 0, current: 0, line: 1 }
  }

  /// Lexes the whole source eagerly, the way the teacher's `lex` entry point does
  /// for the new compiler path.
  pub fn lex(source: &'a str) -> Vec<Token> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
      let tok = lexer.next_token();
      let is_eof = matches!(tok.kind, TokenKind::EOF);
      tokens.push(tok);
      if is_eof {
        break;
      }
    }
    tokens
  }

  fn is_at_end(&self) -> bool {
    self.current >= self.source.len()
  }

  fn peek(&self) -> u8 {
    if self.is_at_end() {
      0
    } else {
      self.source[self.current]
    }
  }

  fn peek_next(&self) -> u8 {
    if self.current + 1 >= self.source.len() {
      0
    } else {
      self.source[self.current + 1]
    }
  }

  fn advance(&mut self) -> u8 {
    let c = self.source[self.current];
    self.current += 1;
    c
  }

  fn matches(&mut self, expected: u8) -> bool {
    if self.is_at_end() || self.source[self.current] != expected {
      return false;
    }
    self.current += 1;
    true
  }

  fn make_token(&self, kind: TokenKind) -> Token {
    Token { kind, line: self.line, span: (self.start, self.current) }
  }

  fn error_token(&self, kind: LexErrorKind) -> Token {
    trace!("lex error at line {}: {}", self.line, kind.message());
    Token { kind: TokenKind::ERROR(kind), line: self.line, span: (self.start, self.current) }
  }

  /// Skips spaces/tabs and `#`-to-end-of-line comments. Stops *before* a newline —
  /// the caller emits that as its own token.
  fn skip_whitespace_and_comments(&mut self) {
    loop {
      match self.peek() {
        b' ' | b'\t' | b'\r' => {
          self.advance();
        }
        b'#' => {
          while self.peek() != b'\n' && !self.is_at_end() {
            self.advance();
          }
        }
        _ => return,
      }
    }
  }

  pub fn next_token(&mut self) -> Token {
    self.skip_whitespace_and_comments();
    self.start = self.current;

    if self.is_at_end() {
      return self.make_token(TokenKind::EOF);
    }

    let c = self.advance();

    if c == b'\n' {
      self.line += 1;
      return self.make_token(TokenKind::NEWLINE);
    }

    if c.is_ascii_alphabetic() || c == b'_' {
      return self.identifier();
    }

    if c.is_ascii_digit() {
      return self.number();
    }

    match c {
      b'"' => self.string(),
      b'`' => self.raw_string(),
      b'(' => self.make_token(TokenKind::LPAREN),
      b')' => self.make_token(TokenKind::RPAREN),
      b'[' => self.make_token(TokenKind::LBRACKET),
      b']' => self.make_token(TokenKind::RBRACKET),
      b'{' => self.make_token(TokenKind::LBRACE),
      b'}' => self.make_token(TokenKind::RBRACE),
      b',' => self.make_token(TokenKind::COMMA),
      b';' => self.make_token(TokenKind::SEMICOLON),
      b'+' => self.make_token(TokenKind::PLUS),
      b'-' => {
        let kind = if self.matches(b'>') { TokenKind::ARROW } else { TokenKind::MINUS };
        self.make_token(kind)
      }
      b'*' => self.make_token(TokenKind::STAR),
      b'/' => self.make_token(TokenKind::SLASH),
      b'%' => self.make_token(TokenKind::PERCENT),
      b'.' => self.make_token(TokenKind::DOT),
      b'@' => self.make_token(TokenKind::AT),
      b'|' => self.make_token(TokenKind::PIPE),
      b':' => {
        let kind = if self.matches(b':') { TokenKind::COLON_COLON } else { TokenKind::COLON };
        self.make_token(kind)
      }
      b'<' => {
        let kind = if self.matches(b'=') { TokenKind::LESS_EQ } else { TokenKind::LESS };
        self.make_token(kind)
      }
      b'>' => {
        let kind = if self.matches(b'=') { TokenKind::GREATER_EQ } else { TokenKind::GREATER };
        self.make_token(kind)
      }
      b'=' => {
        let kind = if self.matches(b'=') { TokenKind::EQ_EQ } else { TokenKind::EQUAL };
        self.make_token(kind)
      }
      b'!' => {
        if self.matches(b'=') {
          self.make_token(TokenKind::BANG_EQ)
        } else {
          self.error_token(LexErrorKind::UnexpectedChar)
        }
      }
      _ => self.error_token(LexErrorKind::UnexpectedChar),
    }
  }

  fn identifier(&mut self) -> Token {
    while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
      self.advance();
    }
    let text = std::str::from_utf8(&self.source[self.start..self.current]).unwrap_or("");
    let kind = keyword_kind(text).unwrap_or(TokenKind::IDENTIFIER);
    self.make_token(kind)
  }

  fn number(&mut self) -> Token {
    while self.peek().is_ascii_digit() {
      self.advance();
    }

    let mut is_float = false;
    if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
      is_float = true;
      self.advance();
      while self.peek().is_ascii_digit() {
        self.advance();
      }
    }

    if self.peek() == b'e' || self.peek() == b'E' {
      let save = self.current;
      self.advance();
      if self.peek() == b'+' || self.peek() == b'-' {
        self.advance();
      }
      if self.peek().is_ascii_digit() {
        is_float = true;
        while self.peek().is_ascii_digit() {
          self.advance();
        }
      } else {
        self.current = save;
      }
    }

    self.make_token(if is_float { TokenKind::FLOAT } else { TokenKind::INT })
  }

  fn string(&mut self) -> Token {
    while self.peek() != b'"' && !self.is_at_end() {
      if self.peek() == b'\\' {
        self.advance();
        if !self.is_at_end() {
          self.advance();
        }
        continue;
      }
      if self.peek() == b'\n' {
        self.line += 1;
      }
      self.advance();
    }

    if self.is_at_end() {
      return self.error_token(LexErrorKind::UnterminatedString);
    }

    self.advance(); // closing quote
    self.make_token(TokenKind::STRING)
  }

  fn raw_string(&mut self) -> Token {
    while self.peek() != b'`' && !self.is_at_end() {
      if self.peek() == b'\n' {
        self.line += 1;
      }
      self.advance();
    }

    if self.is_at_end() {
      return self.error_token(LexErrorKind::UnterminatedRawString);
    }

    self.advance(); // closing backtick
    self.make_token(TokenKind::RAW_STRING)
  }
}

pub use raven_core::strings::unescape;

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(src: &str) -> Vec<TokenKind> {
    Lexer::lex(src).into_iter().map(|t| t.kind).collect()
  }

  #[test]
  fn lexes_arithmetic_with_precedence_tokens() {
    let ks = kinds("1 + 2 * 3");
    assert_eq!(ks, vec![TokenKind::INT, TokenKind::PLUS, TokenKind::INT, TokenKind::STAR, TokenKind::INT, TokenKind::EOF]);
  }

  #[test]
  fn newline_is_its_own_token() {
    let ks = kinds("let x = 1\nx");
    assert!(ks.contains(&TokenKind::NEWLINE));
  }

  #[test]
  fn hash_comment_runs_to_end_of_line() {
    let ks = kinds("1 # comment\n2");
    assert_eq!(ks, vec![TokenKind::INT, TokenKind::NEWLINE, TokenKind::INT, TokenKind::EOF]);
  }

  #[test]
  fn raw_string_is_verbatim() {
    let tokens = Lexer::lex("`a\\nb`");
    assert_eq!(tokens[0].kind, TokenKind::RAW_STRING);
    assert_eq!(tokens[0].lexeme("`a\\nb`"), "`a\\nb`");
  }

  #[test]
  fn cons_and_concat_operators() {
    let ks = kinds("1 :: 2 @ 3");
    assert_eq!(ks, vec![
      TokenKind::INT,
      TokenKind::COLON_COLON,
      TokenKind::INT,
      TokenKind::AT,
      TokenKind::INT,
      TokenKind::EOF
    ]);
  }

  #[test]
  fn float_with_exponent() {
    let ks = kinds("1.5e10");
    assert_eq!(ks, vec![TokenKind::FLOAT, TokenKind::EOF]);
  }
}
