use raven_core::ast::{HashPatternKey, Pattern};
use raven_core::strings::unescape;
use raven_core::tokens::TokenKind;

use crate::{NodeResult, Parser};

impl<'a> Parser<'a> {
  /// Parses one pattern (`spec.md` §4.E). Used by `let`, function parameters,
  /// `for`, and `match` arms.
  pub(crate) fn parse_pattern(&mut self) -> NodeResult<Pattern> {
    self.guard_error_token()?;

    match self.current_kind().clone() {
      TokenKind::IDENTIFIER => {
        let idx = self.advance();
        if self.check(&TokenKind::LPAREN) {
          self.advance();
          self.skip_newlines();
          let mut fields = Vec::new();
          if !self.check(&TokenKind::RPAREN) {
            loop {
              fields.push(self.parse_pattern()?);
              self.skip_newlines();
              if !self.matches(&TokenKind::COMMA) {
                break;
              }
              self.skip_newlines();
            }
          }
          self.consume(&TokenKind::RPAREN, "Expected ')' after constructor pattern fields.")?;
          Ok(Pattern::Constructor { name: idx, fields })
        } else {
          Ok(Pattern::Identifier(idx))
        }
      }
      TokenKind::INT => {
        let idx = self.advance();
        let text = self.lexeme(idx);
        let val = text.parse::<i64>().map_err(|_| self.error_at_prev("Malformed integer pattern."))?;
        Ok(Pattern::Int(val))
      }
      TokenKind::FLOAT => {
        let idx = self.advance();
        let text = self.lexeme(idx);
        let val = text.parse::<f64>().map_err(|_| self.error_at_prev("Malformed float pattern."))?;
        Ok(Pattern::Float(val))
      }
      TokenKind::STRING => {
        let idx = self.advance();
        Ok(Pattern::Str(unescape(self.lexeme(idx))))
      }
      TokenKind::RAW_STRING => {
        let idx = self.advance();
        let text = self.lexeme(idx);
        Ok(Pattern::RawStr(text[1..text.len() - 1].to_string()))
      }
      TokenKind::NIL => {
        self.advance();
        Ok(Pattern::Nil)
      }
      TokenKind::TRUE => {
        self.advance();
        Ok(Pattern::True)
      }
      TokenKind::FALSE => {
        self.advance();
        Ok(Pattern::False)
      }
      TokenKind::MINUS => {
        // A negative numeric literal pattern, e.g. `case -1 -> ...`.
        self.advance();
        match self.current_kind().clone() {
          TokenKind::INT => {
            let idx = self.advance();
            let val = self.lexeme(idx).parse::<i64>().map_err(|_| self.error_at_prev("Malformed integer pattern."))?;
            Ok(Pattern::Int(-val))
          }
          TokenKind::FLOAT => {
            let idx = self.advance();
            let val = self.lexeme(idx).parse::<f64>().map_err(|_| self.error_at_prev("Malformed float pattern."))?;
            Ok(Pattern::Float(-val))
          }
          _ => Err(self.error_at_current("Expected a number after '-' in pattern.")),
        }
      }
      TokenKind::LBRACKET => self.parse_list_pattern(),
      TokenKind::LBRACE => self.parse_hash_pattern(),
      _ => Err(self.error_at_current("Expected a pattern.")),
    }
  }

  /// `[p, p, ...]` (exact-length list pattern) or `[p, p | rest]` (pair pattern,
  /// `spec.md` §4.E "Pair pattern `(h | t)`" — the surface syntax nests it inside
  /// list brackets).
  fn parse_list_pattern(&mut self) -> NodeResult<Pattern> {
    self.advance(); // '['
    self.skip_newlines();

    let mut heads = Vec::new();
    let mut tail: Option<Box<Pattern>> = None;

    if !self.check(&TokenKind::RBRACKET) {
      loop {
        heads.push(self.parse_pattern()?);
        self.skip_newlines();
        if self.matches(&TokenKind::PIPE) {
          self.skip_newlines();
          tail = Some(Box::new(self.parse_pattern()?));
          self.skip_newlines();
          break;
        }
        if !self.matches(&TokenKind::COMMA) {
          break;
        }
        self.skip_newlines();
      }
    }

    self.consume(&TokenKind::RBRACKET, "Expected ']' after list pattern.")?;

    match tail {
      None => Ok(Pattern::List(heads)),
      Some(tail) => {
        let mut acc = *tail;
        for head in heads.into_iter().rev() {
          acc = Pattern::Pair { head: Box::new(head), tail: Box::new(acc) };
        }
        Ok(acc)
      }
    }
  }

  /// `{key: pattern, ident, [expr]: pattern, ...}` (`spec.md` §4.E "Hash pattern").
  fn parse_hash_pattern(&mut self) -> NodeResult<Pattern> {
    self.advance(); // '{'
    self.skip_newlines();

    let mut entries = Vec::new();
    if !self.check(&TokenKind::RBRACE) {
      loop {
        let (key, sub) = self.parse_hash_pattern_entry()?;
        entries.push((key, sub));
        self.skip_newlines();
        if !self.matches(&TokenKind::COMMA) {
          break;
        }
        self.skip_newlines();
      }
    }

    self.consume(&TokenKind::RBRACE, "Expected '}' after hash pattern.")?;
    Ok(Pattern::Hash(entries))
  }

  fn parse_hash_pattern_entry(&mut self) -> NodeResult<(HashPatternKey, Pattern)> {
    if self.check(&TokenKind::LBRACKET) {
      self.advance();
      let expr = self.parse_expr()?;
      self.consume(&TokenKind::RBRACKET, "Expected ']' after computed hash pattern key.")?;
      self.consume(&TokenKind::COLON, "Expected ':' after computed hash pattern key.")?;
      self.skip_newlines();
      let sub = self.parse_pattern()?;
      return Ok((HashPatternKey::Computed(expr), sub));
    }

    let name = self.consume(&TokenKind::IDENTIFIER, "Expected a field name in hash pattern.")?;
    if self.matches(&TokenKind::COLON) {
      self.skip_newlines();
      let sub = self.parse_pattern()?;
      Ok((HashPatternKey::Ident(name), sub))
    } else {
      Ok((HashPatternKey::Implicit(name), Pattern::Identifier(name)))
    }
  }
}
