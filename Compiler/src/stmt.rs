use std::rc::Rc;

use raven_core::ast::NodeKind::*;
use raven_core::ast::{NodeId, NodeKind, Pattern};
use raven_core::bytecode::OpCode;
use raven_objects::{Constructor, Value};

use crate::Compiler;

impl<'a> Compiler<'a> {
  /// Compiles a `Piece`'s statements into the *current* scope — callers that need
  /// a fresh scope (an `if`/`while`/`match` body) push and pop it themselves via
  /// [`Compiler::compile_scoped_block`]; function/script bodies share their single
  /// parameter scope with their statements directly, mirroring
  /// `Resolver::resolve_piece_in_scope`.
  ///
  /// Leaves exactly one value on the stack: every statement compiles to push
  /// exactly one value (an expression's own, or `Value::Void` for declarations),
  /// and all but the last are immediately popped — the same "statement sequence
  /// is itself expression-valued" shape `Outcome`/`eval_piece` give the tree
  /// evaluator.
  pub(crate) fn compile_piece_in_scope(&mut self, id: NodeId) {
    let Piece(stmts) = &self.ast.get(id).kind else { unreachable!("compile_piece_in_scope called on a non-Piece node") };
    let stmts = stmts.clone();

    if stmts.is_empty() {
      self.emit_const(Value::Void, id);
      return;
    }

    let last = stmts.len() - 1;
    for (i, stmt) in stmts.iter().enumerate() {
      self.compile_stmt(*stmt);
      if i != last {
        self.emit(OpCode::Pop, *stmt);
      }
    }
  }

  /// Compiles a block that needs its own lexical scope (`if`/`while`/`cond`/`match`
  /// bodies — `Resolver::resolve_block`'s counterpart), preserving the block's
  /// resulting value across the scope's own cleanup via the `X` accumulator
  /// (`STORE` before popping locals, `LOAD` after — `spec.md` §4.H "LOAD, STORE").
  pub(crate) fn compile_scoped_block(&mut self, id: NodeId) {
    self.begin_scope();
    self.compile_piece_in_scope(id);
    self.emit(OpCode::Store, id);
    self.end_scope(id);
    self.emit(OpCode::Load, id);
  }

  pub(crate) fn compile_stmt(&mut self, id: NodeId) {
    let ast = self.ast;
    match &ast.get(id).kind {
      ExprStmt(e) => {
        let e = *e;
        self.compile_expr(e);
      }

      LetStmt { pattern, value } => {
        let (pattern, value) = (pattern.clone(), *value);
        self.compile_let(&pattern, value, id);
      }

      FnStmt { name, params, body } => {
        let (name, params, body) = (*name, params.clone(), *body);
        self.compile_fn_stmt(name, &params, body, id);
      }

      ReturnStmt(value) => {
        let value = *value;
        match value {
          Some(expr) => self.compile_expr(expr),
          None => {
            self.emit(OpCode::LoadNil, id);
          }
        }
        self.emit(OpCode::Return, id);
        // `return` never falls through to the next statement; nothing consumes a
        // value at this position, but `compile_piece_in_scope`'s caller still pops
        // non-last statements uniformly, so push a placeholder `Void` the pop can
        // discard (dead code at runtime — `Return` already unwound the frame).
        self.emit_const(Value::Void, id);
      }

      BreakStmt => {
        let base = self.current_loop_mut().break_base;
        self.emit_unwind_to(base, id);
        let site = self.emit_jump(OpCode::Jmp, id);
        self.current_loop_mut().break_jumps.push(site);
        self.emit_const(Value::Void, id);
      }

      ContinueStmt => {
        let base = self.current_loop_mut().continue_base;
        self.emit_unwind_to(base, id);
        let loop_start = self.current_loop_mut().continue_target;
        self.emit_loop(loop_start, id);
        self.emit_const(Value::Void, id);
      }

      TypeStmt { name, variants } => {
        let (name, variants) = (*name, variants.clone());
        let type_name = self.lexeme(name);
        for variant in &variants {
          let ctor_name = self.lexeme(variant.name);
          let ctor = Value::Constructor(Rc::new(Constructor { type_name: type_name.clone(), name: ctor_name.clone(), arity: variant.arity }));
          self.define_binding(ctor_name, ctor, id);
        }
        self.emit_const(Value::Void, id);
      }

      _ => unreachable!("not a statement node"),
    }
  }

  /// `let <pattern> = <value>` (`spec.md` §4.D, §4.E): compiles the initializer,
  /// then binds it via [`Compiler::compile_pattern_required`] — a global
  /// destructuring pattern (root scope, non-identifier) first stages into a single
  /// anonymous local so every sub-binding can read it positionally, then copies
  /// each bound name out to `DEF_GLOBAL`, mirroring the tree evaluator's own
  /// staging-`Env` trick in `Eval/src/stmt.rs::eval_let`.
  fn compile_let(&mut self, pattern: &Pattern, value: NodeId, at: NodeId) {
    self.compile_expr(value);

    if self.current().globals_scope() {
      if let Pattern::Identifier(name_tok) = pattern {
        let name = self.lexeme(*name_tok);
        let idx = match self.current().chunk.write_constant(Value::Str(name)) {
          Ok(idx) => idx,
          Err(_) => {
            self.error(at, "Too many constants in one chunk.");
            0
          }
        };
        self.emit_op_with_byte(OpCode::DefGlobal, idx, at);
        self.emit_const(Value::Void, at);
        return;
      }

      let staging_slot = self.add_temp_local();
      self.compile_pattern_required(pattern, staging_slot, at, "'let' pattern did not match its value.");
      let mut names = Vec::new();
      collect_pattern_names(pattern, &mut names);
      for name_tok in names {
        let name = self.lexeme(name_tok);
        self.emit_get_local(staging_slot, at);
        let idx = match self.current().chunk.write_constant(Value::Str(name)) {
          Ok(idx) => idx,
          Err(_) => {
            self.error(at, "Too many constants in one chunk.");
            0
          }
        };
        self.emit_op_with_byte(OpCode::DefGlobal, idx, at);
      }
      self.current().locals.pop();
      self.emit_const(Value::Void, at);
      return;
    }

    let slot = self.add_temp_local();
    self.compile_pattern_required(pattern, slot, at, "'let' pattern did not match its value.");
    self.emit_const(Value::Void, at);
  }

  /// `fn name(params) body end` (`spec.md` §4.D). A root-scope function is bound
  /// into globals *after* its `CLOSURE` is built (so it cannot read its own global
  /// slot while compiling — matching `DESIGN.md`'s "local function self-reference
  /// not allowed" decision: only the late-bound globals table lets a function call
  /// itself, and only once `DEF_GLOBAL` has run at least once at runtime).
  fn compile_fn_stmt(&mut self, name: raven_core::tokens::TokenIdx, params: &[Pattern], body: NodeId, at: NodeId) {
    let name_str = self.lexeme(name);
    self.compile_function(Some(name_str.clone()), params, body, at);
    self.define_binding(name_str, Value::Void /* placeholder, overwritten below */, at);
    self.emit_const(Value::Void, at);
  }

  /// Binds `value` under `name` in the current scope: a global at the script's
  /// outer scope, a fresh local slot (already holding the value the caller just
  /// pushed) everywhere else. `value` is only used for `DEF_GLOBAL`'s constant —
  /// local bindings take whatever is already on top of the stack (`Store`-free,
  /// the way `FnStmt`'s own `CLOSURE` result becomes the local directly).
  fn define_binding(&mut self, name: Rc<str>, value: Value, at: NodeId) {
    if self.current().globals_scope() {
      let idx = match self.current().chunk.write_constant(Value::Str(name)) {
        Ok(idx) => idx,
        Err(_) => {
          self.error(at, "Too many constants in one chunk.");
          0
        }
      };
      let _ = value;
      self.emit_op_with_byte(OpCode::DefGlobal, idx, at);
    } else {
      let depth = self.current().scope_depth;
      self.current().locals.push(super::Local { name: Some(name), depth, initialized: true, captured: false });
    }
  }
}

/// Collects every name a pattern binds, left-to-right. Duplicated from
/// `Eval/src/stmt.rs`'s private helper of the same name and name-mangled `NodeId`
/// shape; both crates re-walk the same tiny `Pattern` tree rather than sharing a
/// dependency neither otherwise needs.
pub(crate) fn collect_pattern_names(pattern: &Pattern, out: &mut Vec<raven_core::tokens::TokenIdx>) {
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
