use std::rc::Rc;

use raven_core::ast::{Ast, NodeId};
use raven_core::bytecode::OpCode;
use raven_core::chunk::Chunk;
use raven_core::errors::{Stage, StageError};
use raven_core::tokens::{TokenIdx, TokenList};
use raven_objects::{FunctionProto, Value};

mod expr;
mod pattern;
mod stmt;

/// One in-scope binding the compiler is tracking for the function currently being
/// compiled. `name: None` marks a slot the compiler allocated for itself — pattern
/// destructuring temporaries that never get a user-visible name — which still
/// occupies a real VM stack slot and gets popped like any other local.
pub(crate) struct Local {
  pub(crate) name: Option<Rc<str>>,
  pub(crate) depth: u32,
  pub(crate) initialized: bool,
  /// Set once some nested function resolves this local as an `is_local=1`
  /// upvalue (`resolve_upvalue`). A captured local's scope-exit emits
  /// `CLOSE_UPVALUE` instead of a plain pop (`spec.md` §4.H "CLOSE_UPVALUE
  /// promotes the open upvalue at the top of the stack to a heap cell before
  /// POP") so the closure keeps seeing updates after the slot itself is gone.
  pub(crate) captured: bool,
}

/// One upvalue this function captures from an enclosing one, emitted as the
/// `(is_local, index)` pair `CLOSURE` reads (`spec.md` §4.H).
struct UpvalueDesc {
  index: u8,
  is_local: bool,
}

/// Tracks the jump sites a `break`/`continue` inside the loop currently being
/// compiled needs. `continue_target` is the bytecode offset `JMP_BACK` re-enters
/// the loop's condition check at (for a `for` loop, the increment clause ahead of
/// the condition — the classic desugaring that lets `continue` backward-jump to
/// code already emitted); `break_jumps` collects every `break`'s forward jump
/// site, patched once the whole loop has compiled.
///
/// `break`/`continue` need two *different* unwind depths for a `for` loop:
/// `break` leaves the loop entirely, so it must also discard the loop's own
/// persistent counters (the materialized item list and the running index);
/// `continue` only leaves the current iteration's body scope and must leave
/// those counters in place for the next pass. `break_base` is the local count
/// before those persistent slots exist (== `continue_base` for `while`, which
/// has none); `continue_base` is the local count right before the per-iteration
/// body scope begins.
struct LoopCtx {
  continue_target: usize,
  break_jumps: Vec<usize>,
  break_base: u16,
  continue_base: u16,
}

/// Per-function compilation state, pushed when a `fn` literal/statement starts
/// compiling and popped once its body finishes. Mirrors the teacher's single
/// `current_fn: usize` index into a flat constants vector (`Compiler/src/lib.rs`),
/// but as a real stack of states — `raven_objects::FunctionProto` is built
/// directly rather than punned through `Value::Obj(Object::Func(_))`.
struct FunctionState {
  /// True only for the program's outermost piece. Mirrors the resolver's own
  /// `scopes.is_empty()` root check: while `is_script` and `scope_depth == 0`,
  /// `let`/`fn` bindings compile to globals rather than locals.
  is_script: bool,
  name: Option<Rc<str>>,
  arity: usize,
  chunk: Chunk<Value>,
  locals: Vec<Local>,
  scope_depth: u32,
  upvalues: Vec<UpvalueDesc>,
  loops: Vec<LoopCtx>,
}

impl FunctionState {
  fn new(is_script: bool, name: Option<Rc<str>>, arity: usize) -> Self {
    FunctionState {
      is_script,
      name,
      arity,
      chunk: Chunk::default(),
      locals: Vec::new(),
      scope_depth: 0,
      upvalues: Vec::new(),
      loops: Vec::new(),
    }
  }

  /// Identifiers at `scope_depth == 0` in the script function are globals — every
  /// other depth, in every function, is a real local (`SPEC_FULL.md` §11, mirroring
  /// `Resolver::resolve_let`'s `scopes.is_empty()` check).
  fn globals_scope(&self) -> bool {
    self.is_script && self.scope_depth == 0
  }
}

/// Single-pass bytecode compiler (`spec.md` §4.H). Grounded on the teacher's
/// `Compiler/src/lib.rs` emit-helper shape (`emit_op_code`, `emit_op_code_with_byte`,
/// `emit_const`), adapted to `raven_core::chunk::Chunk<Value>`'s dedup-capped
/// single-byte constant pool. Local-slot tracking, jump patching and
/// upvalue/closure emission have no living teacher counterpart — `VirtualMachine
/// /src/run.rs`'s closure ops are all `todo!()` — and are built fresh here in the
/// classic single-pass (`clox`-style) shape: one flat `locals` vector per function,
/// its index *is* the VM stack slot, upvalues resolved by walking the enclosing
/// `FunctionState` chain.
pub struct Compiler<'a> {
  tokens: &'a TokenList<'a>,
  ast: &'a Ast,
  functions: Vec<FunctionState>,
  errors: Vec<StageError>,
}

/// Compiles the resolved program rooted at `root` (a `Piece`, as returned by
/// `raven_parser::Parser::parse`) into a single top-level [`FunctionProto`] — the
/// "script" function the VM starts a call frame on. `raven_resolver::resolve` is
/// expected to have already run over the same tree and reported no errors: this
/// compiler re-derives its own local/global split structurally (`FunctionState
/// ::globals_scope`) rather than consulting `Resolutions`, since the VM's flat
/// per-call stack slots are not the tree evaluator's `(depth, slot)` chain
/// addresses, but it does not re-check redefinition/self-reference/return-outside-
/// function — those stay the resolver's job.
pub fn compile(tokens: &TokenList, ast: &Ast, root: NodeId) -> Result<Rc<FunctionProto>, Vec<StageError>> {
  let mut compiler = Compiler { tokens, ast, functions: vec![FunctionState::new(true, None, 0)], errors: Vec::new() };

  compiler.compile_piece_in_scope(root);
  compiler.emit(OpCode::Exit, root);

  if !compiler.errors.is_empty() {
    return Err(compiler.errors);
  }

  let finished = compiler.functions.pop().expect("script function state");
  Ok(Rc::new(FunctionProto { name: None, arity: 0, chunk: finished.chunk, upvalue_count: finished.upvalues.len() }))
}

impl<'a> Compiler<'a> {
  fn current(&mut self) -> &mut FunctionState {
    self.functions.last_mut().expect("at least the script function is always on the stack")
  }

  fn line_of(&self, id: NodeId) -> u32 {
    self.tokens[self.ast.get(id).at].line
  }

  fn lexeme(&self, idx: TokenIdx) -> Rc<str> {
    Rc::from(self.tokens.lexeme(idx))
  }

  fn error(&mut self, id: NodeId, message: impl Into<String>) {
    self.errors.push(StageError::new(Stage::Resolve, self.line_of(id), message));
  }

  // --- emit helpers (teacher's `emit_op_code`/`emit_op_code_with_*` family) ---

  fn emit(&mut self, op: OpCode, at: NodeId) -> usize {
    let line = self.line_of(at);
    self.current().chunk.write_byte(op as u8, line)
  }

  fn emit_byte(&mut self, byte: u8, at: NodeId) {
    let line = self.line_of(at);
    self.current().chunk.write_byte(byte, line);
  }

  fn emit_op_with_byte(&mut self, op: OpCode, byte: u8, at: NodeId) {
    self.emit(op, at);
    self.emit_byte(byte, at);
  }

  /// Emits a 2-byte-operand jump opcode with a placeholder offset, returning the
  /// site `patch_jump`/`Chunk::read_u16` needs.
  fn emit_jump(&mut self, op: OpCode, at: NodeId) -> usize {
    self.emit(op, at);
    let line = self.line_of(at);
    self.current().chunk.write_short(0xffff, line)
  }

  fn patch_jump(&mut self, site: usize, at: NodeId) {
    if self.current().chunk.patch_jump(site).is_err() {
      self.error(at, "Jump target is too far away to encode.");
    }
  }

  /// Backward jump for loop bodies: unlike a forward jump, the distance is already
  /// known at emit time, so there is nothing to patch later.
  fn emit_loop(&mut self, loop_start: usize, at: NodeId) {
    self.emit(OpCode::JmpBack, at);
    let line = self.line_of(at);
    let offset = self.current().chunk.len() - loop_start + 2;
    if offset > 0xffff {
      self.error(at, "Loop body is too large to encode.");
    }
    self.current().chunk.write_short(offset as u16, line);
  }

  /// Emits `LOAD_CONST k`, registering `value` in the current function's constant
  /// pool (deduped, capped at 256 — `Chunk::write_constant`).
  fn emit_const(&mut self, value: Value, at: NodeId) {
    match self.current().chunk.write_constant(value) {
      Ok(idx) => self.emit_op_with_byte(OpCode::LoadConst, idx, at),
      Err(_) => self.error(at, "Too many constants in one chunk."),
    }
  }

  fn emit_get_global(&mut self, name: &str, at: NodeId) {
    let idx = match self.current().chunk.write_constant(Value::Str(Rc::from(name))) {
      Ok(idx) => idx,
      Err(_) => {
        self.error(at, "Too many constants in one chunk.");
        0
      }
    };
    self.emit_op_with_byte(OpCode::GetGlobal, idx, at);
  }

  // --- scope management (mirrors `Resolver::push_scope`/`pop_scope` exactly) ---

  fn begin_scope(&mut self) {
    self.current().scope_depth += 1;
  }

  /// Pops every local declared in the scope just left, batching plain pops into
  /// a single `POPN` (`spec.md` §4.H) but breaking the batch around any local a
  /// nested closure captured — that one gets `CLOSE_UPVALUE` (promoting it to a
  /// heap cell) then `POP` instead, so the closure keeps a live reference after
  /// the slot itself is gone.
  fn end_scope(&mut self, at: NodeId) {
    let depth = self.current().scope_depth;
    let mut pending = 0u32;
    while let Some(local) = self.current().locals.last() {
      if local.depth < depth {
        break;
      }
      if local.captured {
        self.emit_popn(pending, at);
        pending = 0;
        self.emit(OpCode::CloseUpvalue, at);
        self.emit(OpCode::Pop, at);
      } else {
        pending += 1;
      }
      self.current().locals.pop();
    }
    self.current().scope_depth -= 1;
    self.emit_popn(pending, at);
  }

  /// Pops the compiler's own bookkeeping for the scope just left without
  /// emitting any bytecode — used when a pattern-match failure path has already
  /// emitted the equivalent `POPN` itself (`pattern.rs::compile_pattern_test`'s
  /// `PatternFail::Jump` branch), so the real stack is already back at `base`.
  fn discard_scope_silently(&mut self, base: u16) {
    self.current().locals.truncate(base as usize);
    self.current().scope_depth -= 1;
  }

  /// Unwinds the stack down to `base` locals without touching the compiler's own
  /// `locals` bookkeeping (the scope is still lexically open — `break`/`continue`
  /// jump out of it, they don't end it). Mirrors `end_scope`'s captured-local
  /// handling: a captured local still gets `CLOSE_UPVALUE` rather than a plain
  /// pop.
  pub(crate) fn emit_unwind_to(&mut self, base: u16, at: NodeId) {
    let mut pending = 0u32;
    let n = self.current().locals.len();
    for i in (base as usize..n).rev() {
      if self.current().locals[i].captured {
        self.emit_popn(pending, at);
        pending = 0;
        self.emit(OpCode::CloseUpvalue, at);
        self.emit(OpCode::Pop, at);
      } else {
        pending += 1;
      }
    }
    self.emit_popn(pending, at);
  }

  fn current_loop_mut(&mut self) -> &mut LoopCtx {
    self.current().loops.last_mut().expect("break/continue only compile inside a loop body")
  }

  fn emit_get_local(&mut self, slot: u16, at: NodeId) {
    self.emit_op_with_byte(OpCode::GetLocal, slot as u8, at);
  }

  fn emit_set_local(&mut self, slot: u16, at: NodeId) {
    self.emit_op_with_byte(OpCode::SetLocal, slot as u8, at);
  }

  fn emit_get_upvalue(&mut self, index: u8, at: NodeId) {
    self.emit_op_with_byte(OpCode::GetUpvalue, index, at);
  }

  fn emit_set_upvalue(&mut self, index: u8, at: NodeId) {
    self.emit_op_with_byte(OpCode::SetUpvalue, index, at);
  }

  fn emit_set_global(&mut self, name: &str, at: NodeId) {
    let idx = match self.current().chunk.write_constant(Value::Str(Rc::from(name))) {
      Ok(idx) => idx,
      Err(_) => {
        self.error(at, "Too many constants in one chunk.");
        0
      }
    };
    self.emit_op_with_byte(OpCode::SetGlobal, idx, at);
  }

  /// Pushes the builtin callable named `name` (`raven_objects::builtins::install`)
  /// — the compiler's own primitive for operations with no dedicated opcode
  /// (type-kind tests, variant field access, hash membership) — as the start of a
  /// `CALL` sequence: push this, then each argument, then `emit(Call, argc)`.
  fn emit_get_builtin(&mut self, name: &str, at: NodeId) {
    self.emit_get_global(name, at);
  }

  /// Emits `ARRAY_8`/`MAP_8` (1-byte count) or, past 255 elements, the `_16`
  /// sibling (`spec.md` §4.H).
  fn emit_count(&mut self, op8: OpCode, op16: OpCode, count: usize, at: NodeId) {
    if count <= 0xff {
      self.emit_op_with_byte(op8, count as u8, at);
    } else if count <= 0xffff {
      self.emit(op16, at);
      let line = self.line_of(at);
      self.current().chunk.write_short(count as u16, line);
    } else {
      self.error(at, "Too many elements in one literal.");
    }
  }

  fn emit_popn(&mut self, count: u32, at: NodeId) {
    match count {
      0 => {}
      1 => {
        self.emit(OpCode::Pop, at);
      }
      n => {
        // `POPN` takes a single-byte operand (`spec.md` §4.H); a scope deeper than
        // 255 locals is compiled in chunks rather than treated as a hard error.
        let mut remaining = n;
        while remaining > 0 {
          let chunk_n = remaining.min(255) as u8;
          self.emit_op_with_byte(OpCode::PopN, chunk_n, at);
          remaining -= chunk_n as u32;
        }
      }
    }
  }

  /// Appends an anonymous temporary local occupying the slot the value currently
  /// on top of the stack sits in — used for pattern-matching scratch values that
  /// never get a user-visible name.
  fn add_temp_local(&mut self) -> u16 {
    let depth = self.current().scope_depth;
    self.current().locals.push(Local { name: None, depth, initialized: true, captured: false });
    (self.current().locals.len() - 1) as u16
  }

  /// Declares `name` in the current function: a real local if we are nested inside
  /// any scope (or inside any function body at all), a global if we are sitting at
  /// the script's own outermost scope. Returns the slot for a local binding;
  /// `None` means the caller should `DEF_GLOBAL`/`SET_GLOBAL` by name instead.
  fn declare_local(&mut self, name: Rc<str>, at: NodeId) -> Option<u16> {
    if self.current().globals_scope() {
      return None;
    }

    let depth = self.current().scope_depth;
    if self.current().locals.iter().any(|l| l.depth == depth && l.name.as_deref() == Some(name.as_ref())) {
      self.error(at, format!("Redefining '{name}' in the same scope."));
    }

    self.current().locals.push(Local { name: Some(name), depth, initialized: false, captured: false });
    Some((self.current().locals.len() - 1) as u16)
  }

  fn mark_initialized(&mut self, slot: u16) {
    self.current().locals[slot as usize].initialized = true;
  }

  /// Resolves `name` to a local slot in the *current* function only — does not
  /// cross into enclosing functions (that is `resolve_upvalue`'s job).
  fn resolve_local(&mut self, name: &str, at: NodeId) -> Option<u16> {
    let fs = self.current();
    for (i, local) in fs.locals.iter().enumerate().rev() {
      if local.name.as_deref() == Some(name) {
        if !local.initialized {
          self.error(at, format!("Cannot reference '{name}' before it has been initialized."));
        }
        return Some(i as u16);
      }
    }
    None
  }

  /// Resolves `name` as an upvalue of the function at `fn_index` in `self.functions`
  /// by walking outward one enclosing function at a time, adding a capture
  /// descriptor at each level it must pass through (classic `clox`
  /// `resolveUpvalue`; grounded on the teacher's `add_up_value`/`resolve_up_value`
  /// shape in `src/compiler/resolver.rs`, since the new-generation compiler never
  /// implemented it).
  fn resolve_upvalue(&mut self, fn_index: usize, name: &str, at: NodeId) -> Option<u8> {
    if fn_index == 0 {
      return None;
    }
    let enclosing = fn_index - 1;

    if let Some(slot) = self.resolve_local_in(enclosing, name, at) {
      self.functions[enclosing].locals[slot as usize].captured = true;
      return Some(self.add_upvalue(fn_index, slot, true));
    }

    if let Some(up) = self.resolve_upvalue(enclosing, name, at) {
      return Some(self.add_upvalue(fn_index, up, false));
    }

    None
  }

  fn resolve_local_in(&mut self, fn_index: usize, name: &str, at: NodeId) -> Option<u16> {
    for (i, local) in self.functions[fn_index].locals.iter().enumerate().rev() {
      if local.name.as_deref() == Some(name) {
        if !local.initialized {
          self.error(at, format!("Cannot reference '{name}' before it has been initialized."));
        }
        return Some(i as u16);
      }
    }
    None
  }

  fn add_upvalue(&mut self, fn_index: usize, index: u16, is_local: bool) -> u8 {
    let fs = &mut self.functions[fn_index];
    for (i, up) in fs.upvalues.iter().enumerate() {
      if up.index == index as u8 && up.is_local == is_local {
        return i as u8;
      }
    }
    fs.upvalues.push(UpvalueDesc { index: index as u8, is_local });
    (fs.upvalues.len() - 1) as u8
  }
}

/// Bytecode-shape properties (`spec.md` §8 "Jump patching", "Constants cap") over
/// the compiler's actual emitted output, plus a smoke test that a nested closure
/// emits an upvalue descriptor.
#[cfg(test)]
mod tests {
  use raven_core::bytecode::OpCode;
  use raven_core::tokens::TokenList;
  use raven_objects::Closure;
  use raven_parser::Parser;

  use super::*;

  fn compile_src(src: &'static str) -> Result<Rc<raven_objects::FunctionProto>, Vec<StageError>> {
    let tokens = TokenList::new(raven_lexer::Lexer::lex(src), src, "<test>");
    let (ast, root) = Parser::parse(&tokens).expect("source should parse");
    raven_resolver::resolve(&tokens, &ast, root).expect("source should resolve");
    compile(&tokens, &ast, root)
  }

  /// Walks one chunk's instruction stream, calling `on_op(ip, op)` at every
  /// instruction boundary. Correctly skips `CLOSURE`'s variable-length upvalue
  /// tail by reading the captured [`FunctionProto::upvalue_count`] back out of
  /// the constant pool entry it names.
  fn walk_instructions(chunk: &raven_core::chunk::Chunk<Value>, mut on_op: impl FnMut(usize, OpCode)) {
    let mut ip = 0usize;
    while ip < chunk.len() {
      let op = OpCode::from(chunk.code[ip]);
      on_op(ip, op);
      let mut step = 1 + op.operand_width();
      if op == OpCode::Closure {
        let const_idx = chunk.code[ip + 1] as usize;
        let Value::Closure(rc) = &chunk.constants[const_idx] else { panic!("CLOSURE must name a closure constant") };
        let Closure::Compiled(cc) = rc.as_ref() else { panic!("compiler only ever emits compiled closures") };
        step += cc.function.upvalue_count * 2;
      }
      ip += step;
    }
  }

  #[test]
  fn every_jump_operand_lands_within_bounds() {
    let proto = compile_src("let i = 0; while i < 10 do i = i + 1 end").expect("should compile");
    let code = &proto.chunk;
    walk_instructions(code, |ip, op| {
      if matches!(op, OpCode::Jmp | OpCode::JmpBack | OpCode::JmpFalse | OpCode::JmpPopFalse) {
        let operand = code.read_u16(ip + 1) as usize;
        let target = if op == OpCode::JmpBack { ip + 3 - operand } else { ip + 3 + operand };
        assert!(target <= code.len(), "jump target {target} out of bounds (len {})", code.len());
      }
    });
  }

  #[test]
  fn constants_pool_never_exceeds_256_entries() {
    let mut src = String::new();
    for i in 0..300 {
      src.push_str(&format!("let v{i} = {i}\n"));
    }
    let errors = compile_src(&src).expect_err("300 distinct int constants exceed the single-byte pool index");
    assert!(errors.iter().any(|e| e.message.contains("Too many constants")));
  }

  #[test]
  fn nested_function_emits_a_closure_opcode() {
    let proto = compile_src("fn outer() let i = 0; fn() i end end").expect("should compile");
    let mut saw_closure = false;
    walk_instructions(&proto.chunk, |_, op| saw_closure |= op == OpCode::Closure);
    assert!(saw_closure, "expected at least one CLOSURE opcode for the nested function literal");
  }
}
