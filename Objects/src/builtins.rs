use std::rc::Rc;

use crate::env::Globals;
use crate::value::{Builtin, Value};

/// Host functions exposed to every Raven program, installed into a fresh
/// [`Globals`] table before either execution path runs. Grounded on the teacher's
/// `Natives` registry (`src/natives.rs`'s `add_native_function`/`call_native`
/// table), trimmed to the handful `DESIGN.md` calls for: `print`, `len`, `type`.
/// The `__variant_*` trio are not part of `spec.md`'s source surface — they are
/// the compiler's own primitives for lowering constructor *patterns* to bytecode
/// (`raven_compiler` emits calls to them rather than adding opcodes the spec's
/// §4.H list doesn't name); the tree evaluator never needs them since
/// `raven_matcher` inspects `Value::Variant` directly. `__list_tail`/`__hash_has`/
/// `__hash_get` serve the same purpose for list/hash pattern lowering — the ISA
/// has no slice or "does this key exist" opcode, so the compiler reaches for a
/// builtin call instead, the same way it does for constructor tags.
pub fn install(globals: &Globals) {
  for b in [PRINT, LEN, TYPE, KIND, VARIANT_TAG, VARIANT_ARITY, VARIANT_FIELD, LIST_TAIL, HASH_HAS, HASH_GET, FOR_ITEMS] {
    let name: Rc<str> = Rc::from(b.name);
    globals.define(name, Value::Builtin(Rc::new(b)));
  }
}

const PRINT: Builtin = Builtin { name: "print", arity: 1, func: native_print };
const LEN: Builtin = Builtin { name: "len", arity: 1, func: native_len };
const TYPE: Builtin = Builtin { name: "type", arity: 1, func: native_type };
/// Identical to `type` today, kept as its own builtin so `raven_compiler`'s
/// pattern lowering never depends on the user-facing `type` builtin staying
/// shaped the way a pattern gate needs it — a future `type` that, say, starts
/// raising on some input shouldn't silently break list/hash/constructor
/// pattern matching, which needs a plain never-erroring name-of-shape query.
const KIND: Builtin = Builtin { name: "__kind", arity: 1, func: native_kind };
const VARIANT_TAG: Builtin = Builtin { name: "__variant_tag", arity: 1, func: native_variant_tag };
const VARIANT_ARITY: Builtin = Builtin { name: "__variant_arity", arity: 1, func: native_variant_arity };
const VARIANT_FIELD: Builtin = Builtin { name: "__variant_field", arity: 2, func: native_variant_field };
const LIST_TAIL: Builtin = Builtin { name: "__list_tail", arity: 1, func: native_list_tail };
const HASH_HAS: Builtin = Builtin { name: "__hash_has", arity: 2, func: native_hash_has };
const HASH_GET: Builtin = Builtin { name: "__hash_get", arity: 2, func: native_hash_get };
/// `for`'s own shape gate, grounded on `Eval/src/expr.rs::eval_for`'s `items`
/// computation: eagerly materializes whatever `for` iterates over into a plain
/// `List`, so the compiler's `for`-loop lowering only ever has one shape (an
/// indexable list plus a running index) to deal with, rather than opcodes for
/// both a list cursor and a hash cursor.
const FOR_ITEMS: Builtin = Builtin { name: "__for_items", arity: 1, func: native_for_items };

fn native_print(args: &[Value]) -> Result<Value, String> {
  println!("{}", args[0]);
  Ok(Value::Void)
}

fn native_len(args: &[Value]) -> Result<Value, String> {
  match &args[0] {
    Value::List(l) => Ok(Value::Int(l.borrow().len() as i64)),
    Value::Hash(h) => Ok(Value::Int(h.borrow().len() as i64)),
    Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
    other => Err(format!("'{}' has no length.", other.type_name())),
  }
}

fn native_type(args: &[Value]) -> Result<Value, String> {
  Ok(Value::Str(Rc::from(args[0].type_name())))
}

fn native_kind(args: &[Value]) -> Result<Value, String> {
  Ok(Value::Str(Rc::from(args[0].type_name())))
}

fn native_variant_tag(args: &[Value]) -> Result<Value, String> {
  match &args[0] {
    Value::Variant(v) => Ok(Value::Str(v.name.clone())),
    other => Err(format!("'{}' is not a variant.", other.type_name())),
  }
}

fn native_variant_arity(args: &[Value]) -> Result<Value, String> {
  match &args[0] {
    Value::Variant(v) => Ok(Value::Int(v.fields.len() as i64)),
    other => Err(format!("'{}' is not a variant.", other.type_name())),
  }
}

fn native_variant_field(args: &[Value]) -> Result<Value, String> {
  let (Value::Variant(v), Value::Int(i)) = (&args[0], &args[1]) else {
    return Err("__variant_field expects (variant, index).".to_string());
  };
  v.fields.get(*i as usize).cloned().ok_or_else(|| "variant field index out of range.".to_string())
}

fn native_list_tail(args: &[Value]) -> Result<Value, String> {
  match &args[0] {
    Value::List(l) => {
      let tail = l.borrow().iter().skip(1).cloned().collect::<Vec<_>>();
      Ok(Value::List(Rc::new(std::cell::RefCell::new(tail))))
    }
    other => Err(format!("'{}' is not a List.", other.type_name())),
  }
}

fn native_hash_has(args: &[Value]) -> Result<Value, String> {
  match &args[0] {
    Value::Hash(h) => Ok(Value::Bool(h.borrow().contains(&args[1]))),
    other => Err(format!("'{}' is not a Hash.", other.type_name())),
  }
}

fn native_hash_get(args: &[Value]) -> Result<Value, String> {
  match &args[0] {
    Value::Hash(h) => h.borrow().get(&args[1]).ok_or_else(|| "key not found in hash.".to_string()),
    other => Err(format!("'{}' is not a Hash.", other.type_name())),
  }
}

fn native_for_items(args: &[Value]) -> Result<Value, String> {
  match &args[0] {
    Value::List(l) => Ok(Value::List(Rc::new(std::cell::RefCell::new(l.borrow().clone())))),
    Value::Hash(h) => {
      let items = h.borrow().entries().map(|(k, v)| Value::List(Rc::new(std::cell::RefCell::new(vec![k, v])))).collect();
      Ok(Value::List(Rc::new(std::cell::RefCell::new(items))))
    }
    other => Err(format!("'{}' is not iterable.", other.type_name())),
  }
}
