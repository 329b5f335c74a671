use raven_core::ast::NodeKind::*;
use raven_core::ast::{NodeId, Piece, VariantDecl};
use raven_core::tokens::TokenKind::{self, *};

use crate::{NodeResult, Parser, Terminators};

impl<'a> Parser<'a> {
  /// Parses a *piece* (`spec.md` glossary): statements up to (not including) one of
  /// `terminators`, or EOF. A statement parse failure is recorded and the parser
  /// resynchronizes at the next top-of-statement keyword (`spec.md` §4.C).
  pub(crate) fn parse_piece(&mut self, terminators: Terminators) -> NodeResult<Piece> {
    let mut stmts = Vec::new();
    self.skip_newlines();

    while !self.at_end() && !self.check_any(terminators.0) {
      match self.parse_statement() {
        Ok(id) => {
          stmts.push(id);
          self.check_statement_terminator(terminators);
        }
        Err(e) => {
          self.errors.push(e);
          self.synchronize();
        }
      }
      self.skip_newlines();
    }

    Ok(stmts)
  }

  /// `spec.md` §4.C "Statement terminator rule": after a statement, if not at a
  /// block terminator, a newline or semicolon is required.
  fn check_statement_terminator(&mut self, terminators: Terminators) {
    if self.at_end() || self.check_any(terminators.0) {
      return;
    }
    if self.check(&NEWLINE) || self.check(&SEMICOLON) {
      while self.check(&NEWLINE) || self.check(&SEMICOLON) {
        self.advance();
      }
    } else {
      let e = self.error_at_current("Expected ';' or newline after statement.");
      self.errors.push(e);
      self.synchronize();
    }
  }

  fn parse_statement(&mut self) -> NodeResult<NodeId> {
    self.guard_error_token()?;
    match self.current_kind() {
      LET => self.let_stmt(),
      FN if matches!(self.peek_kind(1), IDENTIFIER) => self.fn_stmt(),
      RETURN => self.return_stmt(),
      BREAK => {
        let idx = self.advance();
        Ok(self.emit(idx, BreakStmt))
      }
      CONTINUE => {
        let idx = self.advance();
        Ok(self.emit(idx, ContinueStmt))
      }
      TYPE => self.type_stmt(),
      _ => {
        let at = self.pos;
        let expr = self.parse_expr()?;
        Ok(self.emit(at, ExprStmt(expr)))
      }
    }
  }

  /// `let <pattern> = <expr>` (`spec.md` §6 "Source surface").
  fn let_stmt(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance(); // 'let'
    let pattern = self.parse_pattern()?;
    self.consume(&EQUAL, "Expected '=' after 'let' pattern.")?;
    self.skip_newlines();
    let value = self.parse_expr()?;
    Ok(self.emit(idx, LetStmt { pattern, value }))
  }

  /// `fn <name>(<patterns>) <piece> end`.
  fn fn_stmt(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance(); // 'fn'
    let name = self.consume(&IDENTIFIER, "Expected a function name after 'fn'.")?;
    let params = self.parse_param_list()?;
    let body = self.parse_piece(crate::END_ONLY)?;
    self.consume(&END, "Expected 'end' to close function body.")?;
    let at = self.pos;
    let body = self.emit(at, Piece(body));
    Ok(self.emit(idx, FnStmt { name, params, body }))
  }

  fn return_stmt(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance(); // 'return'
    let value = if self.check(&NEWLINE) || self.check(&SEMICOLON) || self.check(&END) || self.at_end() {
      None
    } else {
      Some(self.parse_expr()?)
    };
    Ok(self.emit(idx, ReturnStmt(value)))
  }

  /// `type <Name> <variants>` where each variant is `name` or `name(arity)`
  /// (`spec.md` §3 "type (variant declaration)").
  fn type_stmt(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance(); // 'type'
    let name = self.consume(&IDENTIFIER, "Expected a type name after 'type'.")?;
    let mut variants = Vec::new();
    self.skip_newlines();
    while self.check(&IDENTIFIER) {
      let variant_name = self.advance();
      let arity = if self.matches(&LPAREN) {
        let mut count = 0usize;
        if !self.check(&RPAREN) {
          count += 1;
          self.consume(&IDENTIFIER, "Expected a field name in variant declaration.")?;
          while self.matches(&COMMA) {
            count += 1;
            self.consume(&IDENTIFIER, "Expected a field name in variant declaration.")?;
          }
        }
        self.consume(&RPAREN, "Expected ')' after variant fields.")?;
        count
      } else {
        0
      };
      variants.push(VariantDecl { name: variant_name, arity });
      self.skip_newlines();
    }
    Ok(self.emit(idx, TypeStmt { name, variants }))
  }
}
