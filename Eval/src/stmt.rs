use std::rc::Rc;

use raven_core::ast::NodeKind::*;
use raven_core::ast::{NodeId, NodeKind, Pattern};
use raven_core::errors::RuntimeError;
use raven_core::tokens::TokenIdx;
use raven_objects::{Closure, Constructor, Env, TreeClosure, Value};

use crate::{Interpreter, Outcome};

impl<'a> Interpreter<'a> {
  /// Evaluates a `Piece`'s statements in order, returning the last one's
  /// [`Outcome`] as the piece's own — a plain value falls through to the next
  /// statement, but `return`/`break`/`continue` stops the piece immediately
  /// (`spec.md` §4.F). `is_root` mirrors the resolver's `scopes.is_empty()` check
  /// exactly: it is `true` only for the program's outermost piece.
  pub(crate) fn eval_piece(&self, id: NodeId, env: &Rc<Env>, is_root: bool) -> Result<Outcome, RuntimeError> {
    let Piece(stmts) = &self.ast.get(id).kind else { unreachable!("eval_piece called on a non-Piece node") };
    let stmts = stmts.clone();
    let mut last = Value::Void;
    for stmt in stmts {
      match self.eval_stmt(stmt, env, is_root)? {
        Outcome::Value(v) => last = v,
        other => return Ok(other),
      }
    }
    Ok(Outcome::Value(last))
  }

  pub(crate) fn eval_stmt(&self, id: NodeId, env: &Rc<Env>, is_root: bool) -> Result<Outcome, RuntimeError> {
    let ast = self.ast;
    match &ast.get(id).kind {
      ExprStmt(e) => self.eval_expr(*e, env),

      LetStmt { pattern, value } => {
        let (pattern, value) = (pattern.clone(), *value);
        self.eval_let(&pattern, value, env, is_root)
      }

      FnStmt { name, params, body } => {
        let (name, params, body) = (*name, params.clone(), *body);
        self.eval_fn_stmt(name, params, body, env, is_root)
      }

      ReturnStmt(value) => {
        let value = *value;
        let v = match value {
          Some(expr) => crate::value!(self, expr, env),
          None => Value::Nil,
        };
        Ok(Outcome::Return(v))
      }

      BreakStmt => Ok(Outcome::Break),
      ContinueStmt => Ok(Outcome::Continue),

      TypeStmt { name, variants } => {
        let type_name: Rc<str> = Rc::from(self.tokens.lexeme(*name));
        for variant in variants {
          let ctor_name: Rc<str> = Rc::from(self.tokens.lexeme(variant.name));
          let ctor = Constructor { type_name: type_name.clone(), name: ctor_name.clone(), arity: variant.arity };
          self.globals.define(ctor_name, Value::Constructor(Rc::new(ctor)));
        }
        Ok(Outcome::Value(Value::Void))
      }

      _ => unreachable!("not a statement node"),
    }
  }

  /// `let <pattern> = <value>` (`spec.md` §4.D, §4.E). Root bindings go into the
  /// globals table name-by-name; local bindings go straight into `env`, matching
  /// the resolver's own root-vs-local split in `resolve_let`.
  fn eval_let(&self, pattern: &Pattern, value: NodeId, env: &Rc<Env>, is_root: bool) -> Result<Outcome, RuntimeError> {
    let v = crate::value!(self, value, env);
    let line = self.line_of(value);

    if is_root {
      // The matcher only knows how to bind positionally into an `Env`'s slots, so
      // a throwaway scope stages the match before its bindings are copied out into
      // name-keyed globals, in the same left-to-right order `collect_pattern_names`
      // walks (mirroring the resolver's own `collect_pattern_names`).
      let staging = Env::new(None);
      let mut computed = |eid: NodeId| self.eval_expr_value(eid, env);
      let matched = raven_matcher::try_match(pattern, &v, self.tokens, &staging, &mut computed)?;
      if !matched {
        return Err(RuntimeError::new(line, "'let' pattern did not match its value."));
      }
      let mut names = Vec::new();
      collect_pattern_names(pattern, &mut names);
      for (slot, name_tok) in names.into_iter().enumerate() {
        let name: Rc<str> = Rc::from(self.tokens.lexeme(name_tok));
        self.globals.define(name, staging.get(0, slot as u16));
      }
    } else {
      let mut computed = |eid: NodeId| self.eval_expr_value(eid, env);
      let matched = raven_matcher::try_match(pattern, &v, self.tokens, env, &mut computed)?;
      if !matched {
        return Err(RuntimeError::new(line, "'let' pattern did not match its value."));
      }
    }

    Ok(Outcome::Value(Value::Void))
  }

  /// `fn name(params) body end` (`spec.md` §4.D). A root-scope function is bound
  /// into globals before its body is ever run, so it can reference itself; a local
  /// function's own binding slot in `env` is reserved the same way, since `Env`
  /// slots are shared mutable storage through `Rc`.
  fn eval_fn_stmt(&self, name: TokenIdx, params: Vec<Pattern>, body: NodeId, env: &Rc<Env>, is_root: bool) -> Result<Outcome, RuntimeError> {
    let name_str: Rc<str> = Rc::from(self.tokens.lexeme(name));
    let arity = params.len();
    let closure = Value::Closure(Rc::new(Closure::Tree(TreeClosure {
      name: Some(name_str.clone()),
      params,
      body,
      env: Rc::clone(env),
      arity,
    })));

    if is_root {
      self.globals.define(name_str, closure);
    } else {
      env.define(closure);
    }

    Ok(Outcome::Value(Value::Void))
  }
}

/// Collects every name a pattern binds, left-to-right — the same order the
/// matcher binds them in at runtime. Duplicated from the resolver's private
/// helper of the same name (`Resolver/src/walk.rs`) since this crate has no
/// access to it and patterns are cheap to re-walk.
fn collect_pattern_names(pattern: &Pattern, out: &mut Vec<TokenIdx>) {
  match pattern {
    Pattern::Identifier(name) => out.push(*name),
    Pattern::List(items) => items.iter().for_each(|p| collect_pattern_names(p, out)),
    Pattern::Pair { head, tail } => {
      collect_pattern_names(head, out);
      collect_pattern_names(tail, out);
    }
    Pattern::Hash(entries) => entries.iter().for_each(|(_, sub)| collect_pattern_names(sub, out)),
    Pattern::Constructor { fields, .. } => fields.iter().for_each(|p| collect_pattern_names(p, out)),
    Pattern::Int(_) | Pattern::Float(_) | Pattern::Str(_) | Pattern::RawStr(_) | Pattern::Nil | Pattern::True | Pattern::False => {}
  }
}
