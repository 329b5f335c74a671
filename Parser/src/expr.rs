use raven_core::ast::NodeKind::*;
use raven_core::ast::{Arm, BinaryOp, HashKey, NodeId, NodeKind, UnaryOp};
use raven_core::strings::unescape;
use raven_core::tokens::TokenKind::{self, *};

use crate::{NodeResult, Parser, Precedence, IF_TERMINATORS, MATCH_TERMINATORS};

type PrefixFn<'a> = fn(&mut Parser<'a>) -> NodeResult<NodeId>;
type InfixFn<'a> = fn(&mut Parser<'a>, NodeId) -> NodeResult<NodeId>;

impl<'a> Parser<'a> {
  pub(crate) fn parse_expr(&mut self) -> NodeResult<NodeId> {
    self.guard_error_token()?;
    self.parse_precedence(Precedence::None)
  }

  /// The Pratt core (`spec.md` §4.C): consume the current token and invoke its
  /// prefix rule, then keep consuming infix operators whose precedence exceeds
  /// `min`, invoking their infix rule in turn.
  pub(crate) fn parse_precedence(&mut self, min: Precedence) -> NodeResult<NodeId> {
    let prefix = self.prefix_rule(self.current_kind()).ok_or_else(|| self.error_at_current("Expected an expression."))?;
    let mut left = prefix(self)?;

    loop {
      let Some((infix, prec)) = self.infix_rule(self.current_kind()) else { break };
      if prec <= min {
        break;
      }
      left = infix(self, left)?;
    }

    Ok(left)
  }

  fn prefix_rule(&self, kind: &TokenKind) -> Option<PrefixFn<'a>> {
    Some(match kind {
      INT => Self::int_literal,
      FLOAT => Self::float_literal,
      STRING => Self::string_literal,
      RAW_STRING => Self::raw_string_literal,
      TRUE => Self::true_literal,
      FALSE => Self::false_literal,
      NIL => Self::nil_literal,
      IDENTIFIER => Self::identifier_expr,
      LPAREN => Self::grouping,
      MINUS => Self::unary,
      NOT => Self::unary,
      FN => Self::func_literal,
      LBRACKET => Self::list_literal,
      LBRACE => Self::hash_literal,
      IF => Self::if_expr,
      WHILE => Self::while_expr,
      FOR => Self::for_expr,
      COND => Self::cond_expr,
      MATCH => Self::match_expr,
      _ => return None,
    })
  }

  fn infix_rule(&self, kind: &TokenKind) -> Option<(InfixFn<'a>, Precedence)> {
    Some(match kind {
      EQUAL => (Self::assign, Precedence::Assign),
      OR => (Self::binary, Precedence::Or),
      AND => (Self::binary, Precedence::And),
      EQ_EQ | BANG_EQ => (Self::binary, Precedence::Equality),
      LESS | LESS_EQ | GREATER | GREATER_EQ => (Self::binary, Precedence::Comparison),
      COLON_COLON | PIPE => (Self::binary, Precedence::Cons),
      AT => (Self::binary, Precedence::Concat),
      PLUS | MINUS => (Self::binary, Precedence::Term),
      STAR | SLASH | PERCENT => (Self::binary, Precedence::Factor),
      LPAREN => (Self::call, Precedence::Call),
      LBRACKET => (Self::index, Precedence::Call),
      DOT => (Self::access, Precedence::Call),
      _ => return None,
    })
  }

  fn int_literal(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance();
    let text = self.lexeme(idx);
    let val = text.parse::<i64>().map_err(|_| self.error_at_prev("Malformed integer literal."))?;
    Ok(self.emit(idx, IntLit(val)))
  }

  fn float_literal(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance();
    let text = self.lexeme(idx);
    let val = text.parse::<f64>().map_err(|_| self.error_at_prev("Malformed float literal."))?;
    Ok(self.emit(idx, FloatLit(val)))
  }

  fn string_literal(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance();
    let val = unescape(self.lexeme(idx));
    Ok(self.emit(idx, StringLit(val)))
  }

  fn raw_string_literal(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance();
    let text = self.lexeme(idx);
    Ok(self.emit(idx, RawStringLit(text[1..text.len() - 1].to_string())))
  }

  fn true_literal(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance();
    Ok(self.emit(idx, TrueLit))
  }

  fn false_literal(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance();
    Ok(self.emit(idx, FalseLit))
  }

  fn nil_literal(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance();
    Ok(self.emit(idx, NilLit))
  }

  fn identifier_expr(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance();
    Ok(self.emit(idx, Identifier(idx)))
  }

  fn grouping(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance(); // '('
    self.skip_newlines();
    let inner = self.parse_expr()?;
    self.skip_newlines();
    self.consume(&RPAREN, "Expected ')' after expression.")?;
    Ok(self.emit(idx, Group(inner)))
  }

  fn unary(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance();
    let op = if matches!(self.tok(idx).kind, MINUS) { UnaryOp::Neg } else { UnaryOp::Not };
    let operand = self.parse_precedence(Precedence::Unary.one_less())?;
    Ok(self.emit(idx, Unary { op, expr: operand }))
  }

  fn binary(&mut self, left: NodeId) -> NodeResult<NodeId> {
    let idx = self.advance();
    let kind = self.tok(idx).kind.clone();
    let (op, prec, right_assoc) = match kind {
      OR => (BinaryOp::Or, Precedence::Or, false),
      AND => (BinaryOp::And, Precedence::And, false),
      EQ_EQ => (BinaryOp::Eq, Precedence::Equality, false),
      BANG_EQ => (BinaryOp::Neq, Precedence::Equality, false),
      LESS => (BinaryOp::Lt, Precedence::Comparison, false),
      LESS_EQ => (BinaryOp::LtEq, Precedence::Comparison, false),
      GREATER => (BinaryOp::Gt, Precedence::Comparison, false),
      GREATER_EQ => (BinaryOp::GtEq, Precedence::Comparison, false),
      COLON_COLON | PIPE => (BinaryOp::Cons, Precedence::Cons, true),
      AT => (BinaryOp::Concat, Precedence::Concat, false),
      PLUS => (BinaryOp::Add, Precedence::Term, false),
      MINUS => (BinaryOp::Sub, Precedence::Term, false),
      STAR => (BinaryOp::Mul, Precedence::Factor, false),
      SLASH => (BinaryOp::Div, Precedence::Factor, false),
      PERCENT => (BinaryOp::Mod, Precedence::Factor, false),
      _ => unreachable!("infix_rule only dispatches here for these tokens"),
    };

    self.skip_newlines();
    let min = if right_assoc { prec.one_less() } else { prec };
    let right = self.parse_precedence(min)?;
    Ok(self.emit(idx, Binary { op, left, right }))
  }

  /// `=` accepts only identifier/index/access left-hand sides (`spec.md` §4.C
  /// "Assignment targets"); right-associative, so `a = b = 1` parses as
  /// `(= a (= b 1))`.
  fn assign(&mut self, target: NodeId) -> NodeResult<NodeId> {
    let idx = self.advance();
    if !matches!(self.ast.get(target).kind, Identifier(_) | Index { .. } | Access { .. }) {
      return Err(self.error_at(self.ast.get(target).at, "Invalid assignment target."));
    }
    self.skip_newlines();
    let value = self.parse_precedence(Precedence::Assign.one_less())?;
    Ok(self.emit(idx, Assign { target, value }))
  }

  fn call(&mut self, callee: NodeId) -> NodeResult<NodeId> {
    let idx = self.advance(); // '('
    self.skip_newlines();
    let mut args = Vec::new();
    if !self.check(&RPAREN) {
      loop {
        args.push(self.parse_expr()?);
        self.skip_newlines();
        if !self.matches(&COMMA) {
          break;
        }
        self.skip_newlines();
      }
    }
    self.consume(&RPAREN, "Expected ')' after arguments.")?;
    Ok(self.emit(idx, Call { callee, args }))
  }

  fn index(&mut self, target: NodeId) -> NodeResult<NodeId> {
    let idx = self.advance(); // '['
    self.skip_newlines();
    let index_expr = self.parse_expr()?;
    self.skip_newlines();
    self.consume(&RBRACKET, "Expected ']' after index expression.")?;
    Ok(self.emit(idx, Index { target, index: index_expr }))
  }

  fn access(&mut self, target: NodeId) -> NodeResult<NodeId> {
    let idx = self.advance(); // '.'
    let field = self.consume(&IDENTIFIER, "Expected a field name after '.'.")?;
    Ok(self.emit(idx, Access { target, field }))
  }

  fn func_literal(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance(); // 'fn'
    let params = self.parse_param_list()?;
    let body = self.parse_block_piece()?;
    Ok(self.emit(idx, FuncLit { params, body }))
  }

  pub(crate) fn parse_param_list(&mut self) -> NodeResult<Vec<raven_core::ast::Pattern>> {
    self.consume(&LPAREN, "Expected '(' to start a parameter list.")?;
    self.skip_newlines();
    let mut params = Vec::new();
    if !self.check(&RPAREN) {
      loop {
        params.push(self.parse_pattern()?);
        self.skip_newlines();
        if !self.matches(&COMMA) {
          break;
        }
        self.skip_newlines();
      }
    }
    self.consume(&RPAREN, "Expected ')' after parameter list.")?;
    Ok(params)
  }

  /// Consumes a `do ... end` piece, or just `end` (for an empty body).
  fn parse_block_piece(&mut self) -> NodeResult<NodeId> {
    let at = self.pos;
    let body = self.parse_piece(crate::END_ONLY)?;
    self.consume(&END, "Expected 'end' to close the block.")?;
    Ok(self.emit(at, Piece(body)))
  }

  fn list_literal(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance(); // '['
    self.skip_newlines();
    let mut items = Vec::new();
    if !self.check(&RBRACKET) {
      loop {
        items.push(self.parse_expr()?);
        self.skip_newlines();
        if !self.matches(&COMMA) {
          break;
        }
        self.skip_newlines();
      }
    }
    self.consume(&RBRACKET, "Expected ']' after list literal.")?;
    Ok(self.emit(idx, ListLit(items)))
  }

  fn hash_literal(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance(); // '{'
    self.skip_newlines();
    let mut keys = Vec::new();
    let mut values = Vec::new();
    if !self.check(&RBRACE) {
      loop {
        let key = if self.check(&LBRACKET) {
          self.advance();
          let expr = self.parse_expr()?;
          self.consume(&RBRACKET, "Expected ']' after computed hash key.")?;
          HashKey::Computed(expr)
        } else {
          let name = self.consume(&IDENTIFIER, "Expected a field name in hash literal.")?;
          HashKey::Ident(name)
        };
        self.consume(&COLON, "Expected ':' after hash key.")?;
        self.skip_newlines();
        let value = self.parse_expr()?;
        keys.push(key);
        values.push(value);
        self.skip_newlines();
        if !self.matches(&COMMA) {
          break;
        }
        self.skip_newlines();
      }
    }
    self.consume(&RBRACE, "Expected '}' after hash literal.")?;
    Ok(self.emit(idx, HashLit { keys, values }))
  }

  fn if_expr(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance(); // 'if'
    let mut branches = Vec::new();

    let cond = self.parse_expr()?;
    self.consume(&DO, "Expected 'do' after 'if' condition.")?;
    self.skip_newlines();
    let body = self.parse_piece(IF_TERMINATORS)?;
    let at = self.pos;
    branches.push((cond, self.emit(at, Piece(body))));

    while self.matches(&ELIF) {
      let cond = self.parse_expr()?;
      self.consume(&DO, "Expected 'do' after 'elif' condition.")?;
      self.skip_newlines();
      let body = self.parse_piece(IF_TERMINATORS)?;
      let at = self.pos;
      branches.push((cond, self.emit(at, Piece(body))));
    }

    let else_branch = if self.matches(&ELSE) {
      self.skip_newlines();
      let body = self.parse_piece(crate::END_ONLY)?;
      let at = self.pos;
      Some(self.emit(at, Piece(body)))
    } else {
      None
    };

    self.consume(&END, "Expected 'end' to close 'if'.")?;
    Ok(self.emit(idx, If { branches, else_branch }))
  }

  fn while_expr(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance(); // 'while'
    let cond = self.parse_expr()?;
    self.consume(&DO, "Expected 'do' after 'while' condition.")?;
    let body = self.parse_block_piece()?;
    Ok(self.emit(idx, While { cond, body }))
  }

  fn for_expr(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance(); // 'for'
    let pattern = self.parse_pattern()?;
    self.consume(&IN, "Expected 'in' after 'for' pattern.")?;
    let iter = self.parse_expr()?;
    self.consume(&DO, "Expected 'do' after 'for ... in ...'.")?;
    let body = self.parse_block_piece()?;
    Ok(self.emit(idx, For { pattern, iter, body }))
  }

  fn cond_expr(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance(); // 'cond'
    self.skip_newlines();
    let mut arms = Vec::new();
    while !self.check(&END) {
      let cond = self.parse_expr()?;
      self.consume(&ARROW, "Expected '->' after 'cond' branch condition.")?;
      let arm = self.parse_arm()?;
      arms.push((cond, arm));
      self.skip_newlines();
    }
    self.consume(&END, "Expected 'end' to close 'cond'.")?;
    Ok(self.emit(idx, Cond { arms }))
  }

  fn match_expr(&mut self) -> NodeResult<NodeId> {
    let idx = self.advance(); // 'match'
    let subject = self.parse_expr()?;
    self.consume(&DO, "Expected 'do' after 'match' subject.")?;
    self.skip_newlines();
    let mut arms = Vec::new();
    while self.matches(&CASE) {
      let pattern = self.parse_pattern()?;
      self.consume(&ARROW, "Expected '->' after 'match' pattern.")?;
      let arm = self.parse_arm()?;
      arms.push((pattern, arm));
      self.skip_newlines();
    }
    self.consume(&END, "Expected 'end' to close 'match'.")?;
    Ok(self.emit(idx, Match { subject, arms }))
  }

  /// `case <pattern> -> <expr|do…end>` / `<expr> -> <arm>` (`spec.md` §4.C "Match
  /// and cond").
  fn parse_arm(&mut self) -> NodeResult<Arm> {
    self.skip_newlines();
    if self.check(&DO) {
      let do_at = self.advance();
      let body = self.parse_piece(crate::END_ONLY)?;
      self.consume(&END, "Expected 'end' to close arm block.")?;
      Ok(Arm::Piece(self.emit(do_at, Piece(body))))
    } else {
      Ok(Arm::Expr(self.parse_expr()?))
    }
  }
}
