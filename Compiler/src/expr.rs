use std::rc::Rc;

use raven_core::ast::NodeKind::*;
use raven_core::ast::{Arm, BinaryOp, HashKey, NodeId, Pattern, UnaryOp};
use raven_core::bytecode::OpCode;
use raven_core::tokens::TokenIdx;
use raven_objects::{Closure, CompiledClosure, FunctionProto, Value};

use crate::Compiler;

impl<'a> Compiler<'a> {
  /// Compiles `id` so it leaves exactly one value on the stack — every expression
  /// node's bytecode is expression-valued, mirroring `Eval/src/expr.rs::eval_expr`'s
  /// `Outcome::Value` contract.
  pub(crate) fn compile_expr(&mut self, id: NodeId) {
    let ast = self.ast;
    match &ast.get(id).kind {
      Identifier(tok) => {
        let tok = *tok;
        self.compile_identifier_get(tok, id);
      }

      IntLit(n) => self.emit_const(Value::Int(*n), id),
      FloatLit(n) => self.emit_const(Value::Float(*n), id),
      StringLit(s) => self.emit_const(Value::Str(Rc::from(s.as_str())), id),
      RawStringLit(s) => self.emit_const(Value::Str(Rc::from(s.as_str())), id),
      TrueLit => {
        self.emit(OpCode::LoadTrue, id);
      }
      FalseLit => {
        self.emit(OpCode::LoadFalse, id);
      }
      NilLit => {
        self.emit(OpCode::LoadNil, id);
      }

      Group(inner) => {
        let inner = *inner;
        self.compile_expr(inner);
      }

      Unary { op, expr } => {
        let (op, expr) = (*op, *expr);
        self.compile_expr(expr);
        match op {
          UnaryOp::Not => {
            self.emit(OpCode::Not, id);
          }
          UnaryOp::Neg => {
            self.emit(OpCode::Neg, id);
          }
        }
      }

      Binary { op, left, right } => {
        let (op, left, right) = (*op, *left, *right);
        self.compile_binary(op, left, right, id);
      }

      Assign { target, value } => {
        let (target, value) = (*target, *value);
        self.compile_assign(target, value, id);
      }

      Call { callee, args } => {
        let (callee, args) = (*callee, args.clone());
        self.compile_expr(callee);
        let argc = args.len();
        for arg in args {
          self.compile_expr(arg);
        }
        if argc > 0xff {
          self.error(id, "Too many arguments in one call.");
        }
        self.emit_op_with_byte(OpCode::Call, argc as u8, id);
      }

      Index { target, index } => {
        let (target, index) = (*target, *index);
        self.compile_expr(target);
        self.compile_expr(index);
        self.emit(OpCode::IndexGet, id);
      }

      Access { target, field } => {
        let (target, field) = (*target, *field);
        let name = self.lexeme(field);
        self.compile_expr(target);
        self.emit_const(Value::Str(name), id);
        self.emit(OpCode::IndexGet, id);
      }

      ListLit(items) => {
        let items = items.clone();
        let count = items.len();
        for item in items {
          self.compile_expr(item);
        }
        self.emit_count(OpCode::Array8, OpCode::Array16, count, id);
      }

      HashLit { keys, values } => {
        let (keys, values) = (keys.clone(), values.clone());
        let count = keys.len();
        for (key, value_id) in keys.into_iter().zip(values) {
          match key {
            HashKey::Ident(tok) => self.emit_const(Value::Str(self.lexeme(tok)), id),
            HashKey::Computed(expr) => self.compile_expr(expr),
          }
          self.compile_expr(value_id);
        }
        self.emit_count(OpCode::Map8, OpCode::Map16, count, id);
      }

      FuncLit { params, body } => {
        let (params, body) = (params.clone(), *body);
        self.compile_function(None, &params, body, id);
      }

      If { branches, else_branch } => {
        let (branches, else_branch) = (branches.clone(), *else_branch);
        self.compile_if(&branches, else_branch, id);
      }

      While { cond, body } => {
        let (cond, body) = (*cond, *body);
        self.compile_while(cond, body, id);
      }

      For { pattern, iter, body } => {
        let (pattern, iter, body) = (pattern.clone(), *iter, *body);
        self.compile_for(&pattern, iter, body, id);
      }

      Cond { arms } => {
        let arms = arms.clone();
        self.compile_cond(&arms, id);
      }

      Match { subject, arms } => {
        let (subject, arms) = (*subject, arms.clone());
        self.compile_match(subject, &arms, id);
      }

      Piece(_) => unreachable!("Piece nodes compile via compile_piece_in_scope, never compile_expr"),
      _ => unreachable!("not an expression node"),
    }
  }

  fn compile_identifier_get(&mut self, tok: TokenIdx, at: NodeId) {
    let name = self.lexeme(tok);
    if let Some(slot) = self.resolve_local(&name, at) {
      self.emit_get_local(slot, at);
      return;
    }
    let fn_index = self.functions.len() - 1;
    if let Some(up) = self.resolve_upvalue(fn_index, &name, at) {
      self.emit_get_upvalue(up, at);
      return;
    }
    self.emit_get_global(&name, at);
  }

  /// `SET_LOCAL`/`SET_UPVALUE`/`SET_GLOBAL` all *peek* rather than pop — the value
  /// being stored stays on top of the stack afterwards, since assignment is itself
  /// expression-valued (`Eval/src/expr.rs::eval_assign` returns the stored value).
  fn compile_identifier_set(&mut self, tok: TokenIdx, at: NodeId) {
    let name = self.lexeme(tok);
    if let Some(slot) = self.resolve_local(&name, at) {
      self.emit_set_local(slot, at);
      return;
    }
    let fn_index = self.functions.len() - 1;
    if let Some(up) = self.resolve_upvalue(fn_index, &name, at) {
      self.emit_set_upvalue(up, at);
      return;
    }
    self.emit_set_global(&name, at);
  }

  /// `target = value` (`spec.md` §4.F). Evaluation order mirrors the tree
  /// evaluator's `eval_assign`: the right-hand side first, then the assignment
  /// target's own sub-expressions. `INDEX_SET` pops its index and container
  /// operands but only *peeks* the value underneath (mirroring `SET_LOCAL`'s own
  /// peek convention), so the stored value is left as the expression's result
  /// without having to push it twice.
  fn compile_assign(&mut self, target: NodeId, value: NodeId, at: NodeId) {
    let ast = self.ast;
    match &ast.get(target).kind {
      Identifier(tok) => {
        let tok = *tok;
        self.compile_expr(value);
        self.compile_identifier_set(tok, at);
      }
      Index { target: tgt, index } => {
        let (tgt, index) = (*tgt, *index);
        self.compile_expr(value);
        self.compile_expr(tgt);
        self.compile_expr(index);
        self.emit(OpCode::IndexSet, at);
      }
      Access { target: tgt, field } => {
        let (tgt, field) = (*tgt, *field);
        let name = self.lexeme(field);
        self.compile_expr(value);
        self.compile_expr(tgt);
        self.emit_const(Value::Str(name), at);
        self.emit(OpCode::IndexSet, at);
      }
      _ => unreachable!("the parser only allows identifier/index/access assignment targets"),
    }
  }

  /// `left op right` (`spec.md` §4.F). `and`/`or` short-circuit via `JMP_FALSE`
  /// (which only peeks, never pops, so the deciding operand survives on the stack
  /// as the expression's own result — `spec.md` §4.H design notes spell out both
  /// shapes exactly). `@` has no dedicated opcode in the ISA (`spec.md` §4.H lists
  /// only `CONS`); it compiles to the same `ADD` opcode arithmetic addition uses,
  /// with the VM's `ADD` handler special-casing a `List, List` operand pair as
  /// concatenation (`DESIGN.md`). Every other operator pushes both operands
  /// left-then-right and lets the opcode pop right-then-left.
  fn compile_binary(&mut self, op: BinaryOp, left: NodeId, right: NodeId, at: NodeId) {
    match op {
      BinaryOp::And => {
        self.compile_expr(left);
        let site = self.emit_jump(OpCode::JmpFalse, at);
        self.emit(OpCode::Pop, at);
        self.compile_expr(right);
        self.patch_jump(site, at);
        return;
      }
      BinaryOp::Or => {
        self.compile_expr(left);
        let site_false = self.emit_jump(OpCode::JmpFalse, at);
        let site_end = self.emit_jump(OpCode::Jmp, at);
        self.patch_jump(site_false, at);
        self.emit(OpCode::Pop, at);
        self.compile_expr(right);
        self.patch_jump(site_end, at);
        return;
      }
      _ => {}
    }

    self.compile_expr(left);
    self.compile_expr(right);
    let opcode = match op {
      BinaryOp::Add | BinaryOp::Concat => OpCode::Add,
      BinaryOp::Sub => OpCode::Sub,
      BinaryOp::Mul => OpCode::Mul,
      BinaryOp::Div => OpCode::Div,
      BinaryOp::Mod => OpCode::Mod,
      BinaryOp::Eq => OpCode::Eq,
      BinaryOp::Neq => OpCode::Neq,
      BinaryOp::Lt => OpCode::Lt,
      BinaryOp::LtEq => OpCode::Ltq,
      BinaryOp::Gt => OpCode::Gt,
      BinaryOp::GtEq => OpCode::Gtq,
      BinaryOp::Cons => OpCode::Cons,
      BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    };
    self.emit(opcode, at);
  }

  fn compile_arm(&mut self, arm: Arm, at: NodeId) {
    match arm {
      Arm::Expr(e) => self.compile_expr(e),
      Arm::Piece(p) => self.compile_scoped_block(p),
    }
  }

  /// `if cond do ... [elif cond do ...] [else ...] end` (`spec.md` §4.D). No
  /// taken branch and no `else` yields `nil`, matching `eval_expr`'s `If` arm
  /// exactly (unlike `while`/`for`, which always yield `Void`).
  fn compile_if(&mut self, branches: &[(NodeId, NodeId)], else_branch: Option<NodeId>, at: NodeId) {
    let mut end_jumps = Vec::new();
    for (cond, body) in branches {
      self.compile_expr(*cond);
      let skip = self.emit_jump(OpCode::JmpPopFalse, at);
      self.compile_scoped_block(*body);
      end_jumps.push(self.emit_jump(OpCode::Jmp, at));
      self.patch_jump(skip, at);
    }
    match else_branch {
      Some(body) => self.compile_scoped_block(body),
      None => self.emit_const(Value::Nil, at),
    }
    for site in end_jumps {
      self.patch_jump(site, at);
    }
  }

  /// `cond case cond -> arm ... end` (`spec.md` §4.D): same shape as `if`, but each
  /// arm is a bare expression or `do ... end` piece rather than always a block.
  fn compile_cond(&mut self, arms: &[(NodeId, Arm)], at: NodeId) {
    let mut end_jumps = Vec::new();
    for (cond, arm) in arms {
      self.compile_expr(*cond);
      let skip = self.emit_jump(OpCode::JmpPopFalse, at);
      self.compile_arm(*arm, at);
      end_jumps.push(self.emit_jump(OpCode::Jmp, at));
      self.patch_jump(skip, at);
    }
    self.emit_const(Value::Nil, at);
    for site in end_jumps {
      self.patch_jump(site, at);
    }
  }

  /// `while cond do ... end` (`spec.md` §4.D): always yields `Void`, so the body's
  /// own result is popped every iteration rather than threaded through. `continue`
  /// can backward-jump straight to the condition check, since it is compiled
  /// before the body and so already exists in the bytecode stream.
  fn compile_while(&mut self, cond: NodeId, body: NodeId, at: NodeId) {
    let loop_start = self.current().chunk.len();
    let locals_base = self.current().locals.len() as u16;
    self.current().loops.push(super::LoopCtx {
      continue_target: loop_start,
      break_jumps: Vec::new(),
      break_base: locals_base,
      continue_base: locals_base,
    });

    self.compile_expr(cond);
    let exit = self.emit_jump(OpCode::JmpPopFalse, at);
    self.compile_scoped_block(body);
    self.emit(OpCode::Pop, at);
    self.emit_loop(loop_start, at);
    self.patch_jump(exit, at);

    let ctx = self.current().loops.pop().expect("just pushed");
    for site in ctx.break_jumps {
      self.patch_jump(site, at);
    }
    self.emit_const(Value::Void, at);
  }

  /// `for pattern in iter do ... end` (`spec.md` §4.D, §4.E): eagerly materializes
  /// `iter` into a list via the `__for_items` builtin (`Objects/src/builtins.rs`,
  /// grounded on `Eval/src/expr.rs::eval_for`'s own list-or-hash-entries
  /// conversion), then walks it by index. `continue` must reach the
  /// increment-and-recheck code, which is compiled *before* the body — the
  /// classic `clox` for-loop desugaring (`body_jump` skips the increment on first
  /// entry; the body's own backward jump lands on it every subsequent pass) — so
  /// that the increment's bytecode offset already exists by the time a `continue`
  /// inside the body needs to target it.
  fn compile_for(&mut self, pattern: &Pattern, iter: NodeId, body: NodeId, at: NodeId) {
    let locals_base = self.current().locals.len() as u16;

    self.emit_get_builtin("__for_items", at);
    self.compile_expr(iter);
    self.emit_op_with_byte(OpCode::Call, 1, at);
    let items_slot = self.add_temp_local();

    self.emit_const(Value::Int(0), at);
    let index_slot = self.add_temp_local();

    let cond_check = self.current().chunk.len();
    self.emit_get_local(index_slot, at);
    self.emit_get_builtin("len", at);
    self.emit_get_local(items_slot, at);
    self.emit_op_with_byte(OpCode::Call, 1, at);
    self.emit(OpCode::Lt, at);
    let exit = self.emit_jump(OpCode::JmpPopFalse, at);

    let body_jump = self.emit_jump(OpCode::Jmp, at);
    let increment_start = self.current().chunk.len();
    self.emit_get_local(index_slot, at);
    self.emit_const(Value::Int(1), at);
    self.emit(OpCode::Add, at);
    self.emit_set_local(index_slot, at);
    self.emit(OpCode::Pop, at);
    self.emit_loop(cond_check, at);
    self.patch_jump(body_jump, at);

    self.current().loops.push(super::LoopCtx {
      continue_target: increment_start,
      break_jumps: Vec::new(),
      break_base: locals_base,
      continue_base: locals_base,
    });

    self.begin_scope();
    self.emit_get_local(items_slot, at);
    self.emit_get_local(index_slot, at);
    self.emit(OpCode::IndexGet, at);
    let elem_slot = self.add_temp_local();
    self.compile_pattern_required(pattern, elem_slot, at, "'for' pattern did not match an element.");
    self.compile_piece_in_scope(body);
    self.emit(OpCode::Store, at);
    self.end_scope(at);
    self.emit(OpCode::Load, at);
    self.emit(OpCode::Pop, at);

    self.emit_loop(increment_start, at);
    self.patch_jump(exit, at);
    // The condition-false exit lands here with `items_slot`/`index_slot` still on
    // the stack (it never went through the body, so nothing has unwound them
    // yet); clean them up before `break`'s own jump target, which is patched
    // below and lands *after* this — `break` already unwound to `locals_base`
    // itself (`BreakStmt`'s `emit_unwind_to`) and would double-pop if it landed
    // before this cleanup instead of after it.
    self.emit_unwind_to(locals_base, at);
    self.current().locals.truncate(locals_base as usize);

    let ctx = self.current().loops.pop().expect("just pushed");
    for site in ctx.break_jumps {
      self.patch_jump(site, at);
    }
    self.emit_const(Value::Void, at);
  }

  /// `match subject case pattern -> arm ... end` (`spec.md` §4.E, §4.F). `subject`
  /// is staged into its own outer scope so every arm's trial can test against the
  /// same slot; each arm opens a nested trial scope that either survives (via the
  /// `Store`/`end_scope`/`Load` accumulator dance, same as `compile_scoped_block`)
  /// on a match, or is silently discarded (`discard_scope_silently` — the runtime
  /// stack is already back at `trial_base`, popped by `compile_pattern_try`'s own
  /// per-site cleanup) on a failure that falls through to the next arm. Falling
  /// through every arm aborts with the same "no matching case" diagnostic the tree
  /// evaluator raises.
  fn compile_match(&mut self, subject: NodeId, arms: &[(Pattern, Arm)], at: NodeId) {
    self.begin_scope();
    self.compile_expr(subject);
    let subject_slot = self.add_temp_local();

    let mut end_jumps = Vec::new();
    for (pattern, arm) in arms {
      self.begin_scope();
      let trial_base = self.current().locals.len() as u16;
      let fail_sites = self.compile_pattern_try(pattern, subject_slot, at, trial_base);
      self.compile_arm(*arm, at);
      self.emit(OpCode::Store, at);
      self.end_scope(at);
      self.emit(OpCode::Load, at);
      end_jumps.push(self.emit_jump(OpCode::Jmp, at));
      for site in fail_sites {
        self.patch_jump(site, at);
      }
      self.discard_scope_silently(trial_base);
    }

    self.emit_const(Value::Bool(false), at);
    self.emit_const(Value::Str(Rc::from("No matching case in 'match' expression.")), at);
    self.emit(OpCode::Assert, at);
    self.emit_const(Value::Void, at);

    for site in end_jumps {
      self.patch_jump(site, at);
    }
    self.emit(OpCode::Store, at);
    self.end_scope(at);
    self.emit(OpCode::Load, at);
  }

  /// `fn (params) ... end` / `fn name(params) ... end` (`spec.md` §4.D). Builds a
  /// fresh [`FunctionState`](super::FunctionState), binds each parameter as a
  /// required pattern over the stack slot the call convention already placed it
  /// in (`CALL argc` leaves the callee's arguments at `stack[base..base+argc)`,
  /// so parameter slots need no separate push), then emits `CLOSURE` with one
  /// `(is_local, index)` pair per upvalue the body captured. The resulting
  /// prototype is carried in the constant pool as a placeholder
  /// [`CompiledClosure`] with no bound upvalues — `CLOSURE` is what actually
  /// allocates the real closure at runtime, reading the prototype back out and
  /// filling in its upvalues from the *currently executing* frame.
  pub(crate) fn compile_function(&mut self, name: Option<Rc<str>>, params: &[Pattern], body: NodeId, at: NodeId) {
    self.functions.push(super::FunctionState::new(false, name.clone(), params.len()));

    for param in params {
      let slot = self.add_temp_local();
      self.compile_pattern_required(param, slot, at, "Function argument did not match its parameter pattern.");
    }

    self.compile_piece_in_scope(body);
    self.emit(OpCode::Return, at);

    let finished = self.functions.pop().expect("just pushed");
    let upvalues = finished.upvalues;
    let proto = Rc::new(FunctionProto { name, arity: params.len(), chunk: finished.chunk, upvalue_count: upvalues.len() });
    let placeholder = Value::Closure(Rc::new(Closure::Compiled(CompiledClosure { function: proto, upvalues: Vec::new() })));

    let idx = match self.current().chunk.write_constant(placeholder) {
      Ok(idx) => idx,
      Err(_) => {
        self.error(at, "Too many constants in one chunk.");
        0
      }
    };
    self.emit_op_with_byte(OpCode::Closure, idx, at);
    for up in upvalues {
      self.emit_byte(up.is_local as u8, at);
      self.emit_byte(up.index, at);
    }
  }
}
