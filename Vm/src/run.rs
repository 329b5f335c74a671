use std::cell::RefCell;
use std::rc::Rc;

use raven_core::bytecode::OpCode;
use raven_core::errors::RuntimeError;
use raven_objects::{Closure, CompiledClosure, HashObj, Upvalue, Value, Variant};

use crate::frame::Frame;
use crate::{Vm, MAX_FRAMES};

impl Vm {
  /// The opcode dispatch loop (`spec.md` §4.I). Runs until `EXIT` returns the one
  /// value the just-finished top-level piece left on the stack, or an opcode raises
  /// a [`RuntimeError`]. Nested calls push and pop their own [`Frame`]s directly on
  /// `self.frames` rather than recursing into a fresh native call — the same flat
  /// "one loop over whichever frame is current" shape as the teacher's own
  /// `VirtualMachine/src/run.rs`.
  pub(crate) fn dispatch(&mut self) -> Result<Value, RuntimeError> {
    loop {
      {
        let frame = self.frames.last().expect("dispatch always has an active frame");
        self.current_line = frame.compiled().function.chunk.decode_line(frame.ip);
      }

      let op = OpCode::from(self.read_byte());

      match op {
        OpCode::LoadTrue => self.push(Value::Bool(true)),
        OpCode::LoadFalse => self.push(Value::Bool(false)),
        OpCode::LoadNil => self.push(Value::Nil),

        OpCode::Load => {
          let v = self.x.clone();
          self.push(v);
        }
        OpCode::Store => {
          self.x = self.pop()?;
        }

        OpCode::Add => {
          let (l, r) = self.pop2()?;
          let v = match (&l, &r) {
            (Value::List(a), Value::List(b)) => {
              let mut items = a.borrow().clone();
              items.extend(b.borrow().iter().cloned());
              Value::List(Rc::new(RefCell::new(items)))
            }
            _ => self.numeric_op(&l, &r, |a, b| a + b, |a, b| a + b)?,
          };
          self.push(v);
        }
        OpCode::Sub => {
          let (l, r) = self.pop2()?;
          let v = self.numeric_op(&l, &r, |a, b| a - b, |a, b| a - b)?;
          self.push(v);
        }
        OpCode::Mul => {
          let (l, r) = self.pop2()?;
          let v = self.numeric_op(&l, &r, |a, b| a * b, |a, b| a * b)?;
          self.push(v);
        }
        OpCode::Div => {
          let (l, r) = self.pop2()?;
          if is_zero(&r) {
            return Err(self.error("Zero divisor."));
          }
          let v = self.numeric_op(&l, &r, |a, b| a / b, |a, b| a / b)?;
          self.push(v);
        }
        OpCode::Mod => {
          let (l, r) = self.pop2()?;
          if is_zero(&r) {
            return Err(self.error("Zero divisor."));
          }
          let v = self.numeric_op(&l, &r, |a, b| a % b, |a, b| a % b)?;
          self.push(v);
        }
        OpCode::Neg => {
          let v = self.pop()?;
          let v = match v {
            Value::Int(n) => Value::Int(-n),
            Value::Float(n) => Value::Float(-n),
            other => return Err(self.error(format!("Cannot negate a '{}'.", other.type_name()))),
          };
          self.push(v);
        }
        OpCode::Not => {
          let v = self.pop()?;
          self.push(Value::Bool(!v.truthy()));
        }

        OpCode::Eq => {
          let (l, r) = self.pop2()?;
          self.push(Value::Bool(l == r));
        }
        OpCode::Neq => {
          let (l, r) = self.pop2()?;
          self.push(Value::Bool(l != r));
        }
        OpCode::Lt => {
          let (l, r) = self.pop2()?;
          let ord = self.numeric_cmp(&l, &r)?;
          self.push(Value::Bool(ord.is_lt()));
        }
        OpCode::Ltq => {
          let (l, r) = self.pop2()?;
          let ord = self.numeric_cmp(&l, &r)?;
          self.push(Value::Bool(ord.is_le()));
        }
        OpCode::Gt => {
          let (l, r) = self.pop2()?;
          let ord = self.numeric_cmp(&l, &r)?;
          self.push(Value::Bool(ord.is_gt()));
        }
        OpCode::Gtq => {
          let (l, r) = self.pop2()?;
          let ord = self.numeric_cmp(&l, &r)?;
          self.push(Value::Bool(ord.is_ge()));
        }

        OpCode::Cons => {
          let (l, r) = self.pop2()?;
          let v = match r {
            Value::List(items) => {
              let mut v = Vec::with_capacity(items.borrow().len() + 1);
              v.push(l);
              v.extend(items.borrow().iter().cloned());
              Value::List(Rc::new(RefCell::new(v)))
            }
            other => return Err(self.error(format!("Cannot cons onto a '{}'.", other.type_name()))),
          };
          self.push(v);
        }

        OpCode::IndexGet => {
          let key = self.pop()?;
          let container = self.pop()?;
          let v = self.index_get(&container, &key)?;
          self.push(v);
        }
        OpCode::IndexSet => {
          let key = self.pop()?;
          let container = self.pop()?;
          let value = self.peek(0)?.clone();
          self.index_set(&container, &key, value)?;
        }

        OpCode::CloseUpvalue => {
          let top = self.stack.len() - 1;
          self.close_upvalues_from(top);
        }

        OpCode::Assert => {
          let message = self.pop()?;
          let cond = self.pop()?;
          if !cond.truthy() {
            let text = match message {
              Value::Str(s) => s.to_string(),
              other => other.to_string(),
            };
            return Err(self.error(text));
          }
        }

        OpCode::Pop => {
          self.pop()?;
        }
        OpCode::PopN => {
          let n = self.read_byte() as usize;
          let len = self.stack.len();
          self.stack.truncate(len - n);
        }

        OpCode::Return => {
          let result = self.pop()?;
          let frame = self.frames.pop().expect("RETURN only ever compiles inside a function body");
          self.close_upvalues_from(frame.base);
          self.stack.truncate(frame.base - 1);
          self.push(result);
        }

        OpCode::Exit => {
          let result = self.pop()?;
          self.frames.pop();
          return Ok(result);
        }

        OpCode::LoadConst => {
          let idx = self.read_byte();
          let v = self.current_chunk().constants[idx as usize].clone();
          self.push(v);
        }

        OpCode::Array8 => {
          let n = self.read_byte() as usize;
          self.make_array(n);
        }
        OpCode::Array16 => {
          let n = self.read_u16() as usize;
          self.make_array(n);
        }
        OpCode::Map8 => {
          let n = self.read_byte() as usize;
          self.make_map(n);
        }
        OpCode::Map16 => {
          let n = self.read_u16() as usize;
          self.make_map(n);
        }

        OpCode::DefGlobal => {
          let idx = self.read_byte();
          let name = self.const_str(idx);
          let value = self.pop()?;
          self.globals.define(name, value);
        }
        OpCode::SetGlobal => {
          let idx = self.read_byte();
          let name = self.const_str(idx);
          let value = self.peek(0)?.clone();
          if !self.globals.set(&name, value) {
            return Err(self.error(format!("Undefined global '{name}'.")));
          }
        }
        OpCode::GetGlobal => {
          let idx = self.read_byte();
          let name = self.const_str(idx);
          match self.globals.get(&name) {
            Some(v) => self.push(v),
            None => return Err(self.error(format!("Undefined name '{name}'."))),
          }
        }

        OpCode::SetLocal => {
          let slot = self.read_byte() as usize;
          let base = self.frames.last().expect("dispatch always has an active frame").base;
          let value = self.peek(0)?.clone();
          self.stack[base + slot] = value;
        }
        OpCode::GetLocal => {
          let slot = self.read_byte() as usize;
          let base = self.frames.last().expect("dispatch always has an active frame").base;
          let v = self.stack[base + slot].clone();
          self.push(v);
        }

        OpCode::SetUpvalue => {
          let idx = self.read_byte() as usize;
          let value = self.peek(0)?.clone();
          let up = Rc::clone(&self.frames.last().expect("dispatch always has an active frame").compiled().upvalues[idx]);
          match &mut *up.borrow_mut() {
            Upvalue::Open(slot) => self.stack[*slot] = value,
            Upvalue::Closed(v) => *v = value,
          }
        }
        OpCode::GetUpvalue => {
          let idx = self.read_byte() as usize;
          let up = Rc::clone(&self.frames.last().expect("dispatch always has an active frame").compiled().upvalues[idx]);
          let v = match &*up.borrow() {
            Upvalue::Open(slot) => self.stack[*slot].clone(),
            Upvalue::Closed(v) => v.clone(),
          };
          self.push(v);
        }

        OpCode::Call => {
          let argc = self.read_byte() as usize;
          self.call(argc)?;
        }

        OpCode::Jmp => {
          let offset = self.read_u16() as usize;
          self.frames.last_mut().expect("dispatch always has an active frame").ip += offset;
        }
        OpCode::JmpBack => {
          let offset = self.read_u16() as usize;
          self.frames.last_mut().expect("dispatch always has an active frame").ip -= offset;
        }
        OpCode::JmpFalse => {
          let offset = self.read_u16() as usize;
          if !self.peek(0)?.truthy() {
            self.frames.last_mut().expect("dispatch always has an active frame").ip += offset;
          }
        }
        OpCode::JmpPopFalse => {
          let offset = self.read_u16() as usize;
          let v = self.pop()?;
          if !v.truthy() {
            self.frames.last_mut().expect("dispatch always has an active frame").ip += offset;
          }
        }

        OpCode::Closure => {
          let idx = self.read_byte();
          self.make_closure(idx);
        }
      }
    }
  }

  fn read_byte(&mut self) -> u8 {
    let frame = self.frames.last_mut().expect("dispatch always has an active frame");
    let byte = frame.compiled().function.chunk.code[frame.ip];
    frame.ip += 1;
    byte
  }

  fn read_u16(&mut self) -> u16 {
    let frame = self.frames.last_mut().expect("dispatch always has an active frame");
    let short = frame.compiled().function.chunk.read_u16(frame.ip);
    frame.ip += 2;
    short
  }

  fn current_chunk(&self) -> &raven_core::chunk::Chunk<Value> {
    &self.frames.last().expect("dispatch always has an active frame").compiled().function.chunk
  }

  fn const_str(&self, idx: u8) -> Rc<str> {
    match &self.current_chunk().constants[idx as usize] {
      Value::Str(s) => s.clone(),
      _ => unreachable!("raven_compiler only ever writes Str constants for DEF_GLOBAL/SET_GLOBAL/GET_GLOBAL operands"),
    }
  }

  fn push(&mut self, v: Value) {
    self.stack.push(v);
  }

  fn pop(&mut self) -> Result<Value, RuntimeError> {
    self.stack.pop().ok_or_else(|| self.error("Stack underflow."))
  }

  fn pop2(&mut self) -> Result<(Value, Value), RuntimeError> {
    let r = self.pop()?;
    let l = self.pop()?;
    Ok((l, r))
  }

  fn peek(&self, depth: usize) -> Result<&Value, RuntimeError> {
    let len = self.stack.len();
    if depth >= len {
      return Err(self.error("Stack underflow."));
    }
    Ok(&self.stack[len - 1 - depth])
  }

  fn numeric_op(&self, l: &Value, r: &Value, int_op: fn(i64, i64) -> i64, float_op: fn(f64, f64) -> f64) -> Result<Value, RuntimeError> {
    match (l, r) {
      (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
      (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
      (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
      (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
      _ => Err(self.error("Operands must be numbers.")),
    }
  }

  fn numeric_cmp(&self, l: &Value, r: &Value) -> Result<std::cmp::Ordering, RuntimeError> {
    match (l, r) {
      (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
      (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b).ok_or_else(|| self.error("Cannot compare NaN.")),
      (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)).ok_or_else(|| self.error("Cannot compare NaN.")),
      (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).ok_or_else(|| self.error("Cannot compare NaN.")),
      _ => Err(self.error("Operands must be numbers.")),
    }
  }

  /// `INDEX_GET` serves both `Index{target,index}` and `Access{target,field}` — the
  /// compiler lowers both to the same opcode (a const field-name string standing in
  /// for a computed key), so the VM cannot reproduce the tree evaluator's distinct
  /// `"'{}' has no field access."` wording for a non-`Hash` access target; both
  /// shapes report `"'{}' is not indexable."` instead (see `DESIGN.md`).
  fn index_get(&self, container: &Value, key: &Value) -> Result<Value, RuntimeError> {
    match container {
      Value::List(l) => match key {
        Value::Int(i) => {
          let l = l.borrow();
          if *i < 0 || *i as usize >= l.len() {
            Err(self.error("List index out of range."))
          } else {
            Ok(l[*i as usize].clone())
          }
        }
        other => Err(self.error(format!("List index must be an Int, got '{}'.", other.type_name()))),
      },
      Value::Hash(h) => h.borrow().get(key).ok_or_else(|| self.error("Key not found in hash.")),
      other => Err(self.error(format!("'{}' is not indexable.", other.type_name()))),
    }
  }

  fn index_set(&self, container: &Value, key: &Value, value: Value) -> Result<(), RuntimeError> {
    match container {
      Value::List(l) => match key {
        Value::Int(i) => {
          let mut l = l.borrow_mut();
          if *i < 0 || *i as usize >= l.len() {
            Err(self.error("List index out of range."))
          } else {
            l[*i as usize] = value;
            Ok(())
          }
        }
        other => Err(self.error(format!("List index must be an Int, got '{}'.", other.type_name()))),
      },
      Value::Hash(h) => {
        h.borrow_mut().insert(key.clone(), value);
        Ok(())
      }
      other => Err(self.error(format!("'{}' is not indexable.", other.type_name()))),
    }
  }

  fn make_array(&mut self, n: usize) {
    let len = self.stack.len();
    let items = self.stack.split_off(len - n);
    self.push(Value::List(Rc::new(RefCell::new(items))));
  }

  fn make_map(&mut self, n: usize) {
    let len = self.stack.len();
    let drained = self.stack.split_off(len - n * 2);
    let mut hash = HashObj::default();
    for pair in drained.chunks_exact(2) {
      hash.insert(pair[0].clone(), pair[1].clone());
    }
    self.push(Value::Hash(Rc::new(RefCell::new(hash))));
  }

  /// Promotes every open upvalue whose stack slot is `>= base` to `Closed`,
  /// snapshotting its current value (`spec.md` §4.I, §9). Used both by `RETURN`
  /// (closing every local the returning frame captured) and by the single-slot
  /// `CLOSE_UPVALUE` opcode (`base` == the one slot about to go out of scope).
  fn close_upvalues_from(&mut self, base: usize) {
    let stack = &self.stack;
    self.open_upvalues.retain(|up| {
      let open_slot = match &*up.borrow() {
        Upvalue::Open(slot) => Some(*slot),
        Upvalue::Closed(_) => None,
      };
      match open_slot {
        Some(slot) if slot >= base => {
          let value = stack[slot].clone();
          *up.borrow_mut() = Upvalue::Closed(value);
          false
        }
        _ => true,
      }
    });
  }

  fn capture_upvalue(&mut self, slot: usize) -> Rc<RefCell<Upvalue>> {
    for up in &self.open_upvalues {
      if let Upvalue::Open(s) = &*up.borrow() {
        if *s == slot {
          return Rc::clone(up);
        }
      }
    }
    let up = Rc::new(RefCell::new(Upvalue::Open(slot)));
    self.open_upvalues.push(Rc::clone(&up));
    up
  }

  /// `CLOSURE k`: `k` names a placeholder `Value::Closure(Closure::Compiled(..))`
  /// in the constant pool whose `upvalues` vec is always empty (only its `function`
  /// prototype matters) — the real upvalue cells are built here, by reading
  /// `proto.upvalue_count` `(is_local, index)` byte pairs directly out of the
  /// bytecode stream immediately following `k` (`spec.md` §4.H "CLOSURE").
  fn make_closure(&mut self, idx: u8) {
    let placeholder = self.current_chunk().constants[idx as usize].clone();
    let proto = match placeholder {
      Value::Closure(rc) => match rc.as_ref() {
        Closure::Compiled(cc) => Rc::clone(&cc.function),
        Closure::Tree(_) => unreachable!("CLOSURE only ever names a compiled-closure placeholder"),
      },
      _ => unreachable!("raven_compiler only ever writes a Closure placeholder for CLOSURE's operand"),
    };

    let mut upvalues = Vec::with_capacity(proto.upvalue_count);
    for _ in 0..proto.upvalue_count {
      let is_local = self.read_byte() != 0;
      let index = self.read_byte() as usize;
      let up = if is_local {
        let slot = self.frames.last().expect("dispatch always has an active frame").base + index;
        self.capture_upvalue(slot)
      } else {
        Rc::clone(&self.frames.last().expect("dispatch always has an active frame").compiled().upvalues[index])
      };
      upvalues.push(up);
    }

    let closure = Value::Closure(Rc::new(Closure::Compiled(CompiledClosure { function: proto, upvalues })));
    self.push(closure);
  }

  /// `CALL argc`: the callee sits at `stack[len - argc - 1]`, with its `argc`
  /// arguments above it. Dispatches on the callee's kind (`spec.md` §4.I, mirroring
  /// `Eval/src/call.rs`'s arity/callability checks and error wording so both
  /// execution strategies fail the same way on the same program).
  fn call(&mut self, argc: usize) -> Result<(), RuntimeError> {
    let callee_idx = self.stack.len() - argc - 1;
    let callee = self.stack[callee_idx].clone();

    match callee {
      Value::Closure(rc) => {
        let cc = match rc.as_ref() {
          Closure::Compiled(cc) => cc,
          Closure::Tree(_) => return Err(self.error("Cannot call a tree-evaluator closure from the bytecode VM.")),
        };
        if cc.function.arity != argc {
          return Err(self.error(format!("Expected {} argument(s) but got {}.", cc.function.arity, argc)));
        }
        if self.frames.len() >= MAX_FRAMES {
          return Err(self.error("Stack overflow."));
        }
        self.frames.push(Frame { closure: Rc::clone(&rc), ip: 0, base: callee_idx + 1 });
        Ok(())
      }
      Value::Builtin(b) => {
        if b.arity != argc {
          return Err(self.error(format!("'{}' expects {} argument(s) but got {}.", b.name, b.arity, argc)));
        }
        let args = self.stack[callee_idx + 1..].to_vec();
        let result = (b.func)(&args).map_err(|m| self.error(m))?;
        self.stack.truncate(callee_idx);
        self.push(result);
        Ok(())
      }
      Value::Constructor(c) => {
        if c.arity != argc {
          return Err(self.error(format!("'{}' expects {} argument(s) but got {}.", c.name, c.arity, argc)));
        }
        let args = self.stack[callee_idx + 1..].to_vec();
        let variant = Value::Variant(Rc::new(Variant { type_name: c.type_name.clone(), name: c.name.clone(), fields: args }));
        self.stack.truncate(callee_idx);
        self.push(variant);
        Ok(())
      }
      other => Err(self.error(format!("'{}' is not callable.", other.type_name()))),
    }
  }
}

fn is_zero(v: &Value) -> bool {
  matches!(v, Value::Int(0)) || matches!(v, Value::Float(x) if *x == 0.0)
}
