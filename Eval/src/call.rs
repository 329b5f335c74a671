use std::rc::Rc;

use raven_core::errors::RuntimeError;
use raven_objects::{Closure, Env, Value, Variant};

use crate::{Interpreter, Outcome};

impl<'a> Interpreter<'a> {
  /// Call semantics (`spec.md` §4.F "Call"): arity is checked up front, then each
  /// argument is matched against its parameter pattern atomically, then the body
  /// runs in a fresh frame parented to the closure's captured environment — never
  /// the caller's. A `Constructor` call builds a `Variant` directly with no body to
  /// run at all; a `Builtin` call defers straight to its host function.
  pub(crate) fn call_value(&self, callee: &Value, args: Vec<Value>, line: u32) -> Result<Value, RuntimeError> {
    match callee {
      Value::Closure(rc) => match rc.as_ref() {
        Closure::Tree(tc) => {
          if tc.arity != args.len() {
            return Err(RuntimeError::new(line, format!("Expected {} argument(s) but got {}.", tc.arity, args.len())));
          }

          let call_env = Env::new(Some(Rc::clone(&tc.env)));
          for (param, arg) in tc.params.iter().zip(args.into_iter()) {
            let enclosing = &tc.env;
            let mut computed = |eid| self.eval_expr_value(eid, enclosing);
            let matched = raven_matcher::try_match(param, &arg, self.tokens, &call_env, &mut computed)?;
            if !matched {
              return Err(RuntimeError::new(line, "Function argument does not match its parameter pattern."));
            }
          }

          match self.eval_piece(tc.body, &call_env, false)? {
            Outcome::Value(v) => Ok(v),
            Outcome::Return(v) => Ok(v),
            Outcome::Break | Outcome::Continue => Err(RuntimeError::new(line, "Cannot 'break'/'continue' outside of a loop.")),
          }
        }
        Closure::Compiled(_) => Err(RuntimeError::new(line, "Cannot call a bytecode-compiled closure from the tree evaluator.")),
      },

      Value::Builtin(b) => {
        if b.arity != args.len() {
          return Err(RuntimeError::new(line, format!("'{}' expects {} argument(s) but got {}.", b.name, b.arity, args.len())));
        }
        (b.func)(&args).map_err(|message| RuntimeError::new(line, message))
      }

      Value::Constructor(c) => {
        if c.arity != args.len() {
          return Err(RuntimeError::new(line, format!("'{}' expects {} argument(s) but got {}.", c.name, c.arity, args.len())));
        }
        Ok(Value::Variant(Rc::new(Variant { type_name: c.type_name.clone(), name: c.name.clone(), fields: args })))
      }

      other => Err(RuntimeError::new(line, format!("'{}' is not callable.", other.type_name()))),
    }
  }
}
