use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::closure::Closure;
use crate::hash::HashObj;

/// The tagged union of every runtime value in Raven (`spec.md` §3 "Value"),
/// widened from the teacher's 5-variant `Object` (`Core/src/values.rs`) to the
/// full set the spec names: `List`/`Hash`/`Closure`/`Builtin`/`Constructor`/
/// `Variant`/`Void` join the teacher's `Bool`/`Int`/`Float`/`Str`. `Nil`/`Void`/
/// `Bool` are plain `Copy` variants rather than heap-boxed singletons — Rust's
/// enum already gives them by-value identity, so there is nothing to special-case
/// the way the teacher special-cases `OBJ_NONE`/`OBJ_TRUE`/`OBJ_FALSE`.
#[derive(Clone)]
pub enum Value {
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(Rc<str>),
  List(Rc<RefCell<Vec<Value>>>),
  Hash(Rc<RefCell<HashObj>>),
  Closure(Rc<Closure>),
  Builtin(Rc<Builtin>),
  Constructor(Rc<Constructor>),
  Variant(Rc<Variant>),
  Nil,
  Void,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
  Bool,
  Int,
  Float,
  Str,
  List,
  Hash,
  Closure,
  Builtin,
  Constructor,
  Variant,
  Nil,
  Void,
}

/// A host function exposed to Raven programs. Not named in `spec.md`'s external
/// interfaces, but required by its Value model (`spec.md` §3 lists `builtin` as a
/// value kind) — grounded on the teacher's `Objects/src/native_func_obj.rs`,
/// trimmed to the handful of natives a complete REPL/CLI needs (`print`, `len`,
/// `type`).
pub struct Builtin {
  pub name: &'static str,
  pub arity: usize,
  pub func: fn(&[Value]) -> Result<Value, String>,
}

/// A declared `type`'s variant constructor, callable like a function
/// (`spec.md` §3 "variant declaration"; §4.E constructor patterns).
pub struct Constructor {
  pub type_name: Rc<str>,
  pub name: Rc<str>,
  pub arity: usize,
}

/// An instance produced by calling a [`Constructor`].
pub struct Variant {
  pub type_name: Rc<str>,
  pub name: Rc<str>,
  pub fields: Vec<Value>,
}

impl Value {
  pub fn kind(&self) -> ValueKind {
    match self {
      Value::Bool(_) => ValueKind::Bool,
      Value::Int(_) => ValueKind::Int,
      Value::Float(_) => ValueKind::Float,
      Value::Str(_) => ValueKind::Str,
      Value::List(_) => ValueKind::List,
      Value::Hash(_) => ValueKind::Hash,
      Value::Closure(_) => ValueKind::Closure,
      Value::Builtin(_) => ValueKind::Builtin,
      Value::Constructor(_) => ValueKind::Constructor,
      Value::Variant(_) => ValueKind::Variant,
      Value::Nil => ValueKind::Nil,
      Value::Void => ValueKind::Void,
    }
  }

  pub fn type_name(&self) -> &'static str {
    match self.kind() {
      ValueKind::Bool => "Bool",
      ValueKind::Int => "Int",
      ValueKind::Float => "Float",
      ValueKind::Str => "Str",
      ValueKind::List => "List",
      ValueKind::Hash => "Hash",
      ValueKind::Closure => "Function",
      ValueKind::Builtin => "Function",
      ValueKind::Constructor => "Constructor",
      ValueKind::Variant => "Variant",
      ValueKind::Nil => "Nil",
      ValueKind::Void => "Void",
    }
  }

  /// `nil` and `false` are falsy; everything else is truthy (`spec.md` §4.F).
  pub fn truthy(&self) -> bool {
    !matches!(self, Value::Nil | Value::Bool(false))
  }

  pub fn is_callable(&self) -> bool {
    matches!(self, Value::Closure(_) | Value::Builtin(_) | Value::Constructor(_))
  }
}

/// Strict, same-kind equality (`spec.md` §4.F): integers/floats by value, strings by
/// byte-equality, everything else (lists, hashes, closures, builtins, constructors,
/// variants) by identity. Cross-kind comparisons are always `false` — the teacher's
/// own `Object::PartialEq` coerces `Bool`/`Int`/`Float` into each other, which
/// `spec.md` explicitly forbids (see `DESIGN.md`).
impl PartialEq for Value {
  fn eq(&self, other: &Value) -> bool {
    match (self, other) {
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Int(a), Value::Int(b)) => a == b,
      (Value::Float(a), Value::Float(b)) => a == b,
      (Value::Str(a), Value::Str(b)) => a.as_bytes() == b.as_bytes(),
      (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
      (Value::Hash(a), Value::Hash(b)) => Rc::ptr_eq(a, b),
      (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
      (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
      (Value::Constructor(a), Value::Constructor(b)) => Rc::ptr_eq(a, b),
      (Value::Variant(a), Value::Variant(b)) => Rc::ptr_eq(a, b),
      (Value::Nil, Value::Nil) => true,
      (Value::Void, Value::Void) => true,
      _ => false,
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Bool(b) => write!(f, "{b}"),
      Value::Int(i) => write!(f, "{i}"),
      Value::Float(x) => write!(f, "{x}"),
      Value::Str(s) => write!(f, "{s}"),
      Value::List(items) => {
        write!(f, "[")?;
        for (i, item) in items.borrow().iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{item}")?;
        }
        write!(f, "]")
      }
      Value::Hash(h) => {
        write!(f, "{{")?;
        for (i, (k, v)) in h.borrow().entries().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{k}: {v}")?;
        }
        write!(f, "}}")
      }
      Value::Closure(_) => write!(f, "<function>"),
      Value::Builtin(b) => write!(f, "<builtin {}>", b.name),
      Value::Constructor(c) => write!(f, "<constructor {}::{}>", c.type_name, c.name),
      Value::Variant(v) => {
        write!(f, "{}(", v.name)?;
        for (i, field) in v.fields.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{field}")?;
        }
        write!(f, ")")
      }
      Value::Nil => write!(f, "nil"),
      Value::Void => write!(f, "void"),
    }
  }
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{self}")
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;

  use super::*;

  #[test]
  fn nil_and_false_are_falsy_everything_else_is_truthy() {
    assert!(!Value::Nil.truthy());
    assert!(!Value::Bool(false).truthy());
    assert!(Value::Bool(true).truthy());
    assert!(Value::Int(0).truthy());
    assert!(Value::Str(Rc::from("")).truthy());
  }

  #[test]
  fn equality_never_coerces_across_kinds() {
    assert_ne!(Value::Int(1), Value::Float(1.0));
    assert_ne!(Value::Int(0), Value::Bool(false));
    assert_eq!(Value::Int(1), Value::Int(1));
  }

  #[test]
  fn string_equality_is_by_byte_content_not_identity() {
    let a = Value::Str(Rc::from("hi"));
    let b = Value::Str(Rc::from("hi"));
    assert_eq!(a, b);
  }

  #[test]
  fn list_equality_is_by_identity_not_content() {
    let a = Value::List(Rc::new(RefCell::new(vec![Value::Int(1)])));
    let b = Value::List(Rc::new(RefCell::new(vec![Value::Int(1)])));
    assert_ne!(a, b);
    let c = a.clone();
    assert_eq!(a, c);
  }
}
