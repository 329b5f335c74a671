use std::rc::Rc;

use raven_core::ast::{HashPatternKey, NodeId, Pattern};
use raven_core::bytecode::OpCode;
use raven_objects::Value;

use crate::Compiler;

/// What happens once a pattern sub-test comes back false. Both arms first unwind
/// the stack back to the local count recorded when this pattern started testing
/// (`Compiler::emit_unwind_to`, the same cleanup a `break`/`continue` uses) —
/// `Abort` then raises a runtime error with no alternative to fall back to
/// (`let`/`for`/a function parameter); `Jump` instead records a forward jump site
/// to `match`'s next `case`. Every site a given pattern test records first pops
/// to the *same* `base`, so they all converge to one consistent stack depth and
/// can share a single patch target downstream.
enum PatternFail<'s> {
  Abort(&'s str),
  Jump(Vec<usize>),
}

impl<'a> Compiler<'a> {
  /// `let`/`for`/function-parameter patterns (`spec.md` §4.D, §4.F "Call"): the
  /// pattern must match or the whole run aborts with `fail_message` — there is no
  /// next alternative to fall back to, unlike `match`.
  pub(crate) fn compile_pattern_required(&mut self, pattern: &Pattern, slot: u16, at: NodeId, fail_message: &str) {
    let base = self.current().locals.len() as u16;
    let mut fail = PatternFail::Abort(fail_message);
    self.compile_pattern_test(pattern, slot, at, base, &mut fail);
  }

  /// `match`'s per-`case` pattern test: returns the forward jump sites that must
  /// be patched to this arm's failure landing (the next `case`'s own test, or the
  /// final "no matching case" diagnostic once every arm has been tried).
  pub(crate) fn compile_pattern_try(&mut self, pattern: &Pattern, slot: u16, at: NodeId, base: u16) -> Vec<usize> {
    let mut fail = PatternFail::Jump(Vec::new());
    self.compile_pattern_test(pattern, slot, at, base, &mut fail);
    match fail {
      PatternFail::Jump(sites) => sites,
      PatternFail::Abort(_) => unreachable!("compile_pattern_try always starts in the Jump branch"),
    }
  }

  /// Tests `pattern` against the value already sitting in local `slot`, binding
  /// every name the pattern introduces as a new local over the sub-value(s) it
  /// destructures — `raven_matcher::try_match`'s bytecode-lowered twin. This
  /// crate has no runtime `Value` to hand that crate (the compiler never
  /// constructs one), so patterns compile straight to bytecode instead of
  /// calling it, using the same builtins `raven_matcher`'s shape gates mirror:
  /// `__kind`/`len` for the type+size gate, `__list_tail`/`__hash_has`/
  /// `__hash_get`/`__variant_tag`/`__variant_arity`/`__variant_field` for
  /// destructuring. Unlike the tree evaluator's trial-`Env`, nothing here is
  /// rolled back after the fact — a `Jump` failure has already unwound the stack
  /// to `base` by the time it lands, so there is nothing left to discard.
  fn compile_pattern_test(&mut self, pattern: &Pattern, slot: u16, at: NodeId, base: u16, fail: &mut PatternFail) {
    match pattern {
      Pattern::Identifier(tok) => {
        let name = self.lexeme(*tok);
        self.current().locals[slot as usize].name = Some(name);
      }

      Pattern::Int(n) => self.compile_eq_test(slot, Value::Int(*n), at, base, fail),
      Pattern::Float(n) => self.compile_eq_test(slot, Value::Float(*n), at, base, fail),
      Pattern::Str(s) => self.compile_eq_test(slot, Value::Str(Rc::from(s.as_str())), at, base, fail),
      Pattern::RawStr(s) => self.compile_eq_test(slot, Value::Str(Rc::from(s.as_str())), at, base, fail),
      Pattern::Nil => self.compile_eq_test(slot, Value::Nil, at, base, fail),
      Pattern::True => self.compile_eq_test(slot, Value::Bool(true), at, base, fail),
      Pattern::False => self.compile_eq_test(slot, Value::Bool(false), at, base, fail),

      Pattern::List(items) => {
        self.compile_kind_gate(slot, "List", at, base, fail);
        self.compile_len_eq(slot, items.len() as i64, at, base, fail);
        for (i, item) in items.iter().enumerate() {
          self.emit_get_local(slot, at);
          self.emit_const(Value::Int(i as i64), at);
          self.emit(OpCode::IndexGet, at);
          let item_slot = self.add_temp_local();
          self.compile_pattern_test(item, item_slot, at, base, fail);
        }
      }

      // `(h | t)`: value must be a non-empty list (`spec.md` §4.E "Pair
      // pattern"); `t` matches the remainder, itself still a list, via the
      // `__list_tail` builtin (`raven_objects::builtins` — no ISA opcode slices
      // a list).
      Pattern::Pair { head, tail } => {
        self.compile_kind_gate(slot, "List", at, base, fail);

        self.emit_get_builtin("len", at);
        self.emit_get_local(slot, at);
        self.emit_op_with_byte(OpCode::Call, 1, at);
        self.emit_const(Value::Int(1), at);
        self.emit(OpCode::Gtq, at);
        self.compile_fail_unless(at, base, fail);

        self.emit_get_local(slot, at);
        self.emit_const(Value::Int(0), at);
        self.emit(OpCode::IndexGet, at);
        let head_slot = self.add_temp_local();
        self.compile_pattern_test(head, head_slot, at, base, fail);

        self.emit_get_builtin("__list_tail", at);
        self.emit_get_local(slot, at);
        self.emit_op_with_byte(OpCode::Call, 1, at);
        let tail_slot = self.add_temp_local();
        self.compile_pattern_test(tail, tail_slot, at, base, fail);
      }

      Pattern::Hash(entries) => {
        self.compile_kind_gate(slot, "Hash", at, base, fail);
        for (key, sub) in entries {
          match key {
            HashPatternKey::Ident(tok) | HashPatternKey::Implicit(tok) => {
              let name = self.lexeme(*tok);
              self.emit_const(Value::Str(name), at);
            }
            // Evaluated with whatever locals/upvalues are visible at this point
            // in the enclosing function — slightly more permissive than
            // `raven_matcher::try_match`'s `eval_computed`, which evaluates
            // strictly in the scope *enclosing* the whole match (excluding even
            // earlier sibling bindings of the same pattern); harmless in
            // practice since a computed key referencing a sibling binding would
            // be unusual and either resolves the same value or fails to resolve
            // as a local at all.
            HashPatternKey::Computed(expr) => self.compile_expr(*expr),
          }
          let key_slot = self.add_temp_local();

          self.emit_get_builtin("__hash_has", at);
          self.emit_get_local(slot, at);
          self.emit_get_local(key_slot, at);
          self.emit_op_with_byte(OpCode::Call, 2, at);
          self.compile_fail_unless(at, base, fail);

          self.emit_get_builtin("__hash_get", at);
          self.emit_get_local(slot, at);
          self.emit_get_local(key_slot, at);
          self.emit_op_with_byte(OpCode::Call, 2, at);
          let value_slot = self.add_temp_local();
          self.compile_pattern_test(sub, value_slot, at, base, fail);
        }
      }

      Pattern::Constructor { name, fields } => {
        self.compile_kind_gate(slot, "Variant", at, base, fail);

        let tag = self.lexeme(*name);
        self.emit_get_builtin("__variant_tag", at);
        self.emit_get_local(slot, at);
        self.emit_op_with_byte(OpCode::Call, 1, at);
        self.emit_const(Value::Str(tag), at);
        self.emit(OpCode::Eq, at);
        self.compile_fail_unless(at, base, fail);

        self.emit_get_builtin("__variant_arity", at);
        self.emit_get_local(slot, at);
        self.emit_op_with_byte(OpCode::Call, 1, at);
        self.emit_const(Value::Int(fields.len() as i64), at);
        self.emit(OpCode::Eq, at);
        self.compile_fail_unless(at, base, fail);

        for (i, field) in fields.iter().enumerate() {
          self.emit_get_builtin("__variant_field", at);
          self.emit_get_local(slot, at);
          self.emit_const(Value::Int(i as i64), at);
          self.emit_op_with_byte(OpCode::Call, 2, at);
          let field_slot = self.add_temp_local();
          self.compile_pattern_test(field, field_slot, at, base, fail);
        }
      }
    }
  }

  /// `slot == value`, using `Value`'s own strict same-kind equality — failing
  /// otherwise.
  fn compile_eq_test(&mut self, slot: u16, value: Value, at: NodeId, base: u16, fail: &mut PatternFail) {
    self.emit_get_local(slot, at);
    self.emit_const(value, at);
    self.emit(OpCode::Eq, at);
    self.compile_fail_unless(at, base, fail);
  }

  /// `__kind(slot) == kind`, the type gate every compound pattern opens with
  /// (`raven_matcher::try_match`'s `let Value::X(_) = value else { return
  /// Ok(false) }`, lowered to bytecode via the compiler's own never-erroring
  /// `__kind` builtin rather than `type`, which collapses closures and builtins
  /// into one "Function" string).
  fn compile_kind_gate(&mut self, slot: u16, kind: &'static str, at: NodeId, base: u16, fail: &mut PatternFail) {
    self.emit_get_builtin("__kind", at);
    self.emit_get_local(slot, at);
    self.emit_op_with_byte(OpCode::Call, 1, at);
    self.emit_const(Value::Str(Rc::from(kind)), at);
    self.emit(OpCode::Eq, at);
    self.compile_fail_unless(at, base, fail);
  }

  fn compile_len_eq(&mut self, slot: u16, len: i64, at: NodeId, base: u16, fail: &mut PatternFail) {
    self.emit_get_builtin("len", at);
    self.emit_get_local(slot, at);
    self.emit_op_with_byte(OpCode::Call, 1, at);
    self.emit_const(Value::Int(len), at);
    self.emit(OpCode::Eq, at);
    self.compile_fail_unless(at, base, fail);
  }

  /// Pops the boolean the caller just pushed; on `false`, unwinds to `base` and
  /// takes `fail`'s action, placed out of line so the "still matching" path
  /// falls straight through without ever touching it.
  fn compile_fail_unless(&mut self, at: NodeId, base: u16, fail: &mut PatternFail) {
    let mismatch = self.emit_jump(OpCode::JmpPopFalse, at);
    let resume = self.emit_jump(OpCode::Jmp, at);
    self.patch_jump(mismatch, at);
    self.emit_unwind_to(base, at);
    match fail {
      PatternFail::Abort(message) => {
        self.emit_const(Value::Bool(false), at);
        self.emit_const(Value::Str(Rc::from(*message)), at);
        self.emit(OpCode::Assert, at);
      }
      PatternFail::Jump(sites) => {
        let site = self.emit_jump(OpCode::Jmp, at);
        sites.push(site);
      }
    }
    self.patch_jump(resume, at);
  }
}
