use std::rc::Rc;

use raven_objects::{Closure, CompiledClosure};

/// One active call: a closure plus an instruction pointer into its chunk and the
/// stack index where its arguments/locals begin (`spec.md` §4.I "frames as
/// contiguous stack regions", §3 "Frame"). Unlike the tree evaluator's `Env`
/// chain, a VM frame never owns storage of its own — its locals live directly in
/// [`crate::Vm`]'s single operand stack, addressed as `base + slot`.
pub(crate) struct Frame {
  pub(crate) closure: Rc<Closure>,
  pub(crate) ip: usize,
  pub(crate) base: usize,
}

impl Frame {
  /// The VM only ever runs bytecode-compiled closures — a `Closure::Tree` can
  /// never reach a `Frame` since `raven_eval` is a wholly separate execution
  /// path that never touches `raven_vm`.
  pub(crate) fn compiled(&self) -> &CompiledClosure {
    match self.closure.as_ref() {
      Closure::Compiled(cc) => cc,
      Closure::Tree(_) => unreachable!("a tree-evaluator closure can never be pushed onto the VM's frame stack"),
    }
  }
}
