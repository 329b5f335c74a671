use raven_core::ast::NodeKind::*;
use raven_core::ast::{Arm, HashKey, HashPatternKey, NodeId, NodeKind, Pattern};

use crate::Resolver;

impl<'a> Resolver<'a> {
  pub(crate) fn resolve_stmt(&mut self, id: NodeId) {
    let ast = self.ast;
    match &ast.get(id).kind {
      ExprStmt(e) => self.resolve_expr(*e),
      LetStmt { pattern, value } => {
        let (pattern, value) = (pattern.clone(), *value);
        self.resolve_let(&pattern, value);
      }
      FnStmt { name, params, body } => {
        let (name, params, body) = (*name, params.clone(), *body);
        self.resolve_fn_stmt(name, &params, body);
      }
      ReturnStmt(value) => {
        let value = *value;
        if self.fn_depth == 0 {
          self.error_at(ast.get(id).at, "Cannot return from outside a function.");
        }
        if let Some(value) = value {
          self.resolve_expr(value);
        }
      }
      BreakStmt | ContinueStmt | TypeStmt { .. } => {}
      _ => unreachable!("not a statement node"),
    }
  }

  /// `let <pattern> = <value>` (`spec.md` §4.D). At the root scope the bound names
  /// become globals and are never tracked here; inside a local scope they are
  /// declared before `value` resolves (so a self-referential initializer is
  /// caught) and defined only once it finishes.
  fn resolve_let(&mut self, pattern: &Pattern, value: NodeId) {
    self.resolve_pattern_computed_keys(pattern);

    if self.scopes.is_empty() {
      self.resolve_expr(value);
      return;
    }

    let mut names = Vec::new();
    collect_pattern_names(pattern, &mut names);
    for name in &names {
      self.declare(*name);
    }
    self.resolve_expr(value);
    for name in &names {
      self.define(*name);
    }
  }

  /// `fn <name>(<params>) <piece> end`. Mirrors `let`'s declare-before-body,
  /// define-after-body order: a local function cannot call itself within its own
  /// body (only a root-scope function can, via the globals table's late binding).
  fn resolve_fn_stmt(&mut self, name: raven_core::tokens::TokenIdx, params: &[Pattern], body: NodeId) {
    let is_local = !self.scopes.is_empty();
    if is_local {
      self.declare(name);
    }
    self.resolve_function(params, body);
    if is_local {
      self.define(name);
    }
  }

  /// Shared by `fn` statements and `fn(...) ... end` literals: one scope for both
  /// the parameter bindings and the body, since they share one `Env` frame at
  /// runtime.
  fn resolve_function(&mut self, params: &[Pattern], body: NodeId) {
    for param in params {
      self.resolve_pattern_computed_keys(param);
    }

    self.push_scope();
    for param in params {
      let mut names = Vec::new();
      collect_pattern_names(param, &mut names);
      for name in names {
        self.declare(name);
        self.define(name);
      }
    }

    self.fn_depth += 1;
    self.resolve_piece_in_scope(body);
    self.fn_depth -= 1;
    self.pop_scope();
  }

  /// Resolves a `Piece` node's statements without pushing a new scope — used
  /// wherever the caller already pushed the one scope the piece's `Env` frame
  /// needs (function bodies, `for` bodies, `match` arms).
  fn resolve_piece_in_scope(&mut self, piece_id: NodeId) {
    let ast = self.ast;
    if let NodeKind::Piece(stmts) = &ast.get(piece_id).kind {
      let stmts = stmts.clone();
      for stmt in stmts {
        self.resolve_stmt(stmt);
      }
    }
  }

  /// Resolves a `Piece` node that introduces no bindings of its own (`if`/`while`
  /// bodies, `cond` arm blocks): pushes its `Env` frame, then resolves in it.
  fn resolve_block(&mut self, piece_id: NodeId) {
    self.push_scope();
    self.resolve_piece_in_scope(piece_id);
    self.pop_scope();
  }

  pub(crate) fn resolve_expr(&mut self, id: NodeId) {
    let ast = self.ast;
    match &ast.get(id).kind {
      Identifier(name) => {
        let name = *name;
        self.resolve_identifier_use(id, name);
      }
      IntLit(_) | FloatLit(_) | StringLit(_) | RawStringLit(_) | TrueLit | FalseLit | NilLit => {}
      Group(inner) => {
        let inner = *inner;
        self.resolve_expr(inner);
      }
      Unary { expr, .. } => {
        let expr = *expr;
        self.resolve_expr(expr);
      }
      Binary { left, right, .. } => {
        let (left, right) = (*left, *right);
        self.resolve_expr(left);
        self.resolve_expr(right);
      }
      Assign { target, value } => {
        let (target, value) = (*target, *value);
        self.resolve_expr(target);
        self.resolve_expr(value);
      }
      Call { callee, args } => {
        let (callee, args) = (*callee, args.clone());
        self.resolve_expr(callee);
        for arg in args {
          self.resolve_expr(arg);
        }
      }
      Index { target, index } => {
        let (target, index) = (*target, *index);
        self.resolve_expr(target);
        self.resolve_expr(index);
      }
      Access { target, .. } => {
        let target = *target;
        self.resolve_expr(target);
      }
      ListLit(items) => {
        let items = items.clone();
        for item in items {
          self.resolve_expr(item);
        }
      }
      HashLit { keys, values } => {
        let (keys, values) = (keys.clone(), values.clone());
        for (key, value) in keys.iter().zip(values.iter()) {
          if let HashKey::Computed(key_expr) = key {
            self.resolve_expr(*key_expr);
          }
          self.resolve_expr(*value);
        }
      }
      FuncLit { params, body } => {
        let (params, body) = (params.clone(), *body);
        self.resolve_function(&params, body);
      }
      If { branches, else_branch } => {
        let (branches, else_branch) = (branches.clone(), *else_branch);
        for (cond, body) in branches {
          self.resolve_expr(cond);
          self.resolve_block(body);
        }
        if let Some(body) = else_branch {
          self.resolve_block(body);
        }
      }
      While { cond, body } => {
        let (cond, body) = (*cond, *body);
        self.resolve_expr(cond);
        self.resolve_block(body);
      }
      For { pattern, iter, body } => {
        let (pattern, iter, body) = (pattern.clone(), *iter, *body);
        self.resolve_expr(iter);
        self.resolve_pattern_computed_keys(&pattern);

        self.push_scope();
        let mut names = Vec::new();
        collect_pattern_names(&pattern, &mut names);
        for name in names {
          self.declare(name);
          self.define(name);
        }
        self.resolve_piece_in_scope(body);
        self.pop_scope();
      }
      Cond { arms } => {
        let arms = arms.clone();
        for (cond, arm) in arms {
          self.resolve_expr(cond);
          self.resolve_arm(arm);
        }
      }
      Match { subject, arms } => {
        let (subject, arms) = (*subject, arms.clone());
        self.resolve_expr(subject);
        for (pattern, arm) in arms {
          self.resolve_match_arm(&pattern, arm);
        }
      }
      Piece(_) => unreachable!("Piece nodes are resolved via resolve_block/resolve_piece_in_scope"),
      _ => unreachable!("not an expression node"),
    }
  }

  fn resolve_arm(&mut self, arm: Arm) {
    match arm {
      Arm::Expr(expr) => self.resolve_expr(expr),
      Arm::Piece(piece) => self.resolve_block(piece),
    }
  }

  /// `case <pattern> -> <arm>`: the pattern's bindings share one `Env` frame with
  /// the arm, exactly like function parameters and their body.
  fn resolve_match_arm(&mut self, pattern: &Pattern, arm: Arm) {
    self.resolve_pattern_computed_keys(pattern);

    self.push_scope();
    let mut names = Vec::new();
    collect_pattern_names(pattern, &mut names);
    for name in names {
      self.declare(name);
      self.define(name);
    }

    match arm {
      Arm::Expr(expr) => self.resolve_expr(expr),
      Arm::Piece(piece) => self.resolve_piece_in_scope(piece),
    }

    self.pop_scope();
  }

  /// Computed hash-pattern keys (`[expr]: pattern`) are expressions evaluated in
  /// the scope enclosing the pattern, not the scope the pattern binds into
  /// (`spec.md` §4.E) — so these resolve before any binding scope is pushed.
  fn resolve_pattern_computed_keys(&mut self, pattern: &Pattern) {
    match pattern {
      Pattern::List(items) => items.iter().for_each(|p| self.resolve_pattern_computed_keys(p)),
      Pattern::Pair { head, tail } => {
        self.resolve_pattern_computed_keys(head);
        self.resolve_pattern_computed_keys(tail);
      }
      Pattern::Hash(entries) => {
        for (key, sub) in entries {
          if let HashPatternKey::Computed(expr) = key {
            self.resolve_expr(*expr);
          }
          self.resolve_pattern_computed_keys(sub);
        }
      }
      Pattern::Constructor { fields, .. } => fields.iter().for_each(|p| self.resolve_pattern_computed_keys(p)),
      _ => {}
    }
  }
}

/// Collects every name a pattern binds, in left-to-right order, the same order the
/// matcher binds them in at runtime (`spec.md` §4.E).
fn collect_pattern_names(pattern: &Pattern, out: &mut Vec<raven_core::tokens::TokenIdx>) {
  match pattern {
    Pattern::Identifier(name) => out.push(*name),
    Pattern::List(items) => items.iter().for_each(|p| collect_pattern_names(p, out)),
    Pattern::Pair { head, tail } => {
      collect_pattern_names(head, out);
      collect_pattern_names(tail, out);
    }
    // `Implicit` keys bind through `sub`, which is already `Pattern::Identifier`
    // with the same name, so no special case is needed here.
    Pattern::Hash(entries) => entries.iter().for_each(|(_, sub)| collect_pattern_names(sub, out)),
    Pattern::Constructor { fields, .. } => fields.iter().for_each(|p| collect_pattern_names(p, out)),
    Pattern::Int(_) | Pattern::Float(_) | Pattern::Str(_) | Pattern::RawStr(_) | Pattern::Nil | Pattern::True | Pattern::False => {}
  }
}
