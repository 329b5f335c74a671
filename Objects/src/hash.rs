use std::rc::Rc;

use hashbrown::HashMap;

use crate::value::Value;

/// Identity key for the fourth sub-table: any value kind other than int/float/string
/// (`spec.md` §3 "object-identity-keyed (used for bool/list/hash/nil keys)" — widened
/// here to every remaining kind, since a closure/constructor/variant can just as well
/// be used as a hash key).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum IdKey {
  Bool(bool),
  Nil,
  Void,
  Ptr(usize),
}

fn identity_key(v: &Value) -> IdKey {
  match v {
    Value::Bool(b) => IdKey::Bool(*b),
    Value::Nil => IdKey::Nil,
    Value::Void => IdKey::Void,
    Value::List(rc) => IdKey::Ptr(Rc::as_ptr(rc) as *const () as usize),
    Value::Hash(rc) => IdKey::Ptr(Rc::as_ptr(rc) as *const () as usize),
    Value::Closure(rc) => IdKey::Ptr(Rc::as_ptr(rc) as *const () as usize),
    Value::Builtin(rc) => IdKey::Ptr(Rc::as_ptr(rc) as *const () as usize),
    Value::Constructor(rc) => IdKey::Ptr(Rc::as_ptr(rc) as *const () as usize),
    Value::Variant(rc) => IdKey::Ptr(Rc::as_ptr(rc) as *const () as usize),
    Value::Int(_) | Value::Float(_) | Value::Str(_) => unreachable!("handled by their own sub-table"),
  }
}

/// Four parallel chained tables partitioned by key kind (`spec.md` §3 "Hash object").
/// Each sub-table is a `hashbrown::HashMap`, whose iteration is already bounded by its
/// occupancy rather than its capacity — the same "O(populated) iteration" property
/// `spec.md` asks a hand-rolled bucket array for, without reimplementing chaining by
/// hand. Iteration order across sub-tables is fixed (int, float, string, identity);
/// within a sub-table it follows `hashbrown`'s own iteration order rather than true
/// insertion order (see `DESIGN.md` Open Question decisions).
#[derive(Default)]
pub struct HashObj {
  int: HashMap<i64, Value>,
  float: HashMap<u64, (f64, Value)>,
  string: HashMap<Rc<str>, Value>,
  identity: HashMap<IdKey, (Value, Value)>,
}

impl HashObj {
  pub fn insert(&mut self, key: Value, value: Value) {
    match key {
      Value::Int(i) => {
        self.int.insert(i, value);
      }
      Value::Float(x) => {
        self.float.insert(x.to_bits(), (x, value));
      }
      Value::Str(s) => {
        self.string.insert(s, value);
      }
      other => {
        let k = identity_key(&other);
        self.identity.insert(k, (other, value));
      }
    }
  }

  pub fn get(&self, key: &Value) -> Option<Value> {
    match key {
      Value::Int(i) => self.int.get(i).cloned(),
      Value::Float(x) => self.float.get(&x.to_bits()).map(|(_, v)| v.clone()),
      Value::Str(s) => self.string.get(s.as_ref()).cloned(),
      other => self.identity.get(&identity_key(other)).map(|(_, v)| v.clone()),
    }
  }

  pub fn contains(&self, key: &Value) -> bool {
    self.get(key).is_some()
  }

  pub fn len(&self) -> usize {
    self.int.len() + self.float.len() + self.string.len() + self.identity.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Iterates populated entries int-keyed, then float-keyed, then string-keyed, then
  /// identity-keyed (`SPEC_FULL.md` §11.2 — also the order the `for` expression walks
  /// a hash).
  pub fn entries(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
    self
      .int
      .iter()
      .map(|(k, v)| (Value::Int(*k), v.clone()))
      .chain(self.float.values().map(|(k, v)| (Value::Float(*k), v.clone())))
      .chain(self.string.iter().map(|(k, v)| (Value::Str(k.clone()), v.clone())))
      .chain(self.identity.values().map(|(k, v)| (k.clone(), v.clone())))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn int_float_string_keys_are_distinct_partitions() {
    let mut h = HashObj::default();
    h.insert(Value::Int(1), Value::Str(Rc::from("int")));
    h.insert(Value::Float(1.0), Value::Str(Rc::from("float")));
    h.insert(Value::Str(Rc::from("1")), Value::Str(Rc::from("string")));
    assert_eq!(h.len(), 3);
    assert_eq!(h.get(&Value::Int(1)), Some(Value::Str(Rc::from("int"))));
    assert_eq!(h.get(&Value::Float(1.0)), Some(Value::Str(Rc::from("float"))));
    assert_eq!(h.get(&Value::Str(Rc::from("1"))), Some(Value::Str(Rc::from("string"))));
  }

  #[test]
  fn bool_and_nil_keys_share_the_identity_table_but_stay_distinct() {
    let mut h = HashObj::default();
    h.insert(Value::Bool(true), Value::Int(1));
    h.insert(Value::Bool(false), Value::Int(2));
    h.insert(Value::Nil, Value::Int(3));
    assert_eq!(h.len(), 3);
    assert_eq!(h.get(&Value::Bool(true)), Some(Value::Int(1)));
    assert_eq!(h.get(&Value::Bool(false)), Some(Value::Int(2)));
    assert_eq!(h.get(&Value::Nil), Some(Value::Int(3)));
  }

  #[test]
  fn missing_key_is_none() {
    let h = HashObj::default();
    assert!(h.get(&Value::Int(42)).is_none());
    assert!(!h.contains(&Value::Int(42)));
  }

  #[test]
  fn reinserting_a_key_overwrites_its_value() {
    let mut h = HashObj::default();
    h.insert(Value::Str(Rc::from("a")), Value::Int(1));
    h.insert(Value::Str(Rc::from("a")), Value::Int(2));
    assert_eq!(h.len(), 1);
    assert_eq!(h.get(&Value::Str(Rc::from("a"))), Some(Value::Int(2)));
  }
}
