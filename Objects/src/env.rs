use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::value::Value;

/// A chain of frames, walked by `(depth, slot)` addresses the resolver assigns
/// (`spec.md` §3 "Environment"). Used by the tree evaluator; the VM instead
/// addresses a flat value stack directly, since its frames are contiguous stack
/// regions rather than a linked structure — but both consult the same resolver
/// annotations.
#[derive(Default)]
pub struct Env {
  slots: RefCell<Vec<Value>>,
  parent: Option<Rc<Env>>,
}

impl Env {
  pub fn new(parent: Option<Rc<Env>>) -> Rc<Env> {
    Rc::new(Env { slots: RefCell::new(Vec::new()), parent })
  }

  /// Appends a new binding to this frame, returning its slot index.
  pub fn define(&self, value: Value) -> u16 {
    let mut slots = self.slots.borrow_mut();
    slots.push(value);
    (slots.len() - 1) as u16
  }

  fn ancestor(self: &Rc<Self>, depth: u16) -> Rc<Env> {
    let mut env = Rc::clone(self);
    for _ in 0..depth {
      env = Rc::clone(env.parent.as_ref().expect("resolver guarantees a valid depth"));
    }
    env
  }

  pub fn get(self: &Rc<Self>, depth: u16, slot: u16) -> Value {
    self.ancestor(depth).slots.borrow()[slot as usize].clone()
  }

  pub fn set(self: &Rc<Self>, depth: u16, slot: u16, value: Value) {
    self.ancestor(depth).slots.borrow_mut()[slot as usize] = value;
  }

  pub fn len(&self) -> usize {
    self.slots.borrow().len()
  }
}

/// The process-wide global table (`spec.md` §3 "A *global* environment is the
/// root."). Kept separate from [`Env`] since the resolver tags root-scope
/// references specially rather than giving them a depth/slot pair.
#[derive(Default)]
pub struct Globals {
  table: RefCell<HashMap<Rc<str>, Value>>,
}

impl Globals {
  pub fn new() -> Self {
    Globals::default()
  }

  pub fn define(&self, name: Rc<str>, value: Value) {
    self.table.borrow_mut().insert(name, value);
  }

  pub fn get(&self, name: &str) -> Option<Value> {
    self.table.borrow().get(name).cloned()
  }

  /// `SET_GLOBAL` fails if the name is not already defined (`spec.md` §4.I).
  pub fn set(&self, name: &str, value: Value) -> bool {
    let mut table = self.table.borrow_mut();
    match table.get_mut(name) {
      Some(slot) => {
        *slot = value;
        true
      }
      None => false,
    }
  }
}
