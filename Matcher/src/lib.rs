use std::rc::Rc;

use raven_core::ast::{HashPatternKey, Pattern};
use raven_core::errors::RuntimeError;
use raven_core::ast::NodeId;
use raven_core::tokens::TokenList;
use raven_objects::{Env, Value};

/// Matches `pattern` against `value`, binding into `scope` (`spec.md` §4.E). No
/// teacher counterpart exists — `eval.c`'s pattern matching is inline and several
/// kinds are themselves `[TODO]` stubs (constructor patterns, implicit hash keys).
/// Built fresh from the contract `match(pattern, value, target_scope) -> bool`, in
/// the corpus's general fresh-scope-per-trial idiom: callers allocate a new child
/// [`Env`] for each trial and keep it only once this returns `Ok(true)` — a failed
/// match may have pushed partial bindings into `scope`, but the caller discards the
/// whole scope rather than unwinding them one at a time, which is what makes the
/// match atomic from the caller's perspective.
///
/// `eval_computed` evaluates a hash-pattern's computed key expression (`[expr]:
/// pattern`) in the scope *enclosing* the match, not `scope` itself — callers
/// supply it so this crate never has to depend on either execution engine.
pub fn try_match(
  pattern: &Pattern,
  value: &Value,
  tokens: &TokenList,
  scope: &Rc<Env>,
  eval_computed: &mut dyn FnMut(NodeId) -> Result<Value, RuntimeError>,
) -> Result<bool, RuntimeError> {
  match pattern {
    Pattern::Identifier(_) => {
      scope.define(value.clone());
      Ok(true)
    }

    Pattern::Int(n) => Ok(matches!(value, Value::Int(v) if v == n)),
    Pattern::Float(n) => Ok(matches!(value, Value::Float(v) if v == n)),
    Pattern::Str(s) => Ok(matches!(value, Value::Str(v) if v.as_bytes() == s.as_bytes())),
    // `rstr` patterns compare raw bytes against string values (`spec.md` §4.E).
    Pattern::RawStr(s) => Ok(matches!(value, Value::Str(v) if v.as_bytes() == s.as_bytes())),
    Pattern::Nil => Ok(matches!(value, Value::Nil)),
    Pattern::True => Ok(matches!(value, Value::Bool(true))),
    Pattern::False => Ok(matches!(value, Value::Bool(false))),

    Pattern::List(items) => {
      let Value::List(list) = value else { return Ok(false) };
      let list = list.borrow();
      if list.len() != items.len() {
        return Ok(false);
      }
      for (item_pattern, item_value) in items.iter().zip(list.iter()) {
        if !try_match(item_pattern, item_value, tokens, scope, eval_computed)? {
          return Ok(false);
        }
      }
      Ok(true)
    }

    // `(h | t)`: value must be a non-empty list; `t` matches against the remaining
    // tail, itself still a list (`spec.md` §4.E "Pair pattern").
    Pattern::Pair { head, tail } => {
      let Value::List(list) = value else { return Ok(false) };
      let list = list.borrow();
      let Some((first, rest)) = list.split_first() else { return Ok(false) };
      if !try_match(head, first, tokens, scope, eval_computed)? {
        return Ok(false);
      }
      let rest_value = Value::List(Rc::new(std::cell::RefCell::new(rest.to_vec())));
      try_match(tail, &rest_value, tokens, scope, eval_computed)
    }

    Pattern::Hash(entries) => {
      let Value::Hash(hash) = value else { return Ok(false) };
      for (key, sub) in entries {
        let key_value = match key {
          HashPatternKey::Ident(tok) | HashPatternKey::Implicit(tok) => Value::Str(Rc::from(tokens.lexeme(*tok))),
          HashPatternKey::Computed(expr) => eval_computed(*expr)?,
        };
        let Some(found) = hash.borrow().get(&key_value) else { return Ok(false) };
        if !try_match(sub, &found, tokens, scope, eval_computed)? {
          return Ok(false);
        }
      }
      Ok(true)
    }

    Pattern::Constructor { name, fields } => {
      let Value::Variant(variant) = value else { return Ok(false) };
      let tag = tokens.lexeme(*name);
      if variant.name.as_ref() != tag || variant.fields.len() != fields.len() {
        return Ok(false);
      }
      for (field_pattern, field_value) in fields.iter().zip(variant.fields.iter()) {
        if !try_match(field_pattern, field_value, tokens, scope, eval_computed)? {
          return Ok(false);
        }
      }
      Ok(true)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use raven_core::ast::Pattern;
  use raven_objects::Env;
  use std::cell::RefCell;

  fn noop(_: NodeId) -> Result<Value, RuntimeError> {
    unreachable!("no computed keys in these tests")
  }

  fn tokens_for(src: &'static str) -> TokenList<'static> {
    TokenList::new(raven_lexer::Lexer::lex(src), src, "<test>")
  }

  #[test]
  fn identifier_pattern_always_matches_and_binds() {
    let tokens = tokens_for("x");
    let scope = Env::new(None);
    let ok = try_match(&Pattern::Identifier(0), &Value::Int(42), &tokens, &scope, &mut noop).unwrap();
    assert!(ok);
    assert_eq!(scope.get(0, 0), Value::Int(42));
  }

  #[test]
  fn list_pattern_requires_equal_length() {
    let tokens = tokens_for("x");
    let scope = Env::new(None);
    let pattern = Pattern::List(vec![Pattern::Identifier(0), Pattern::Identifier(0)]);
    let list = Value::List(Rc::new(RefCell::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)])));
    assert!(!try_match(&pattern, &list, &tokens, &scope, &mut noop).unwrap());
  }

  #[test]
  fn pair_pattern_splits_head_and_tail() {
    let tokens = tokens_for("x");
    let scope = Env::new(None);
    let pattern = Pattern::Pair { head: Box::new(Pattern::Identifier(0)), tail: Box::new(Pattern::Identifier(0)) };
    let list = Value::List(Rc::new(RefCell::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)])));
    assert!(try_match(&pattern, &list, &tokens, &scope, &mut noop).unwrap());
    assert_eq!(scope.get(0, 0), Value::Int(1));
    let Value::List(tail) = scope.get(0, 1) else { panic!("expected a list tail") };
    assert_eq!(tail.borrow().as_slice(), &[Value::Int(2), Value::Int(3)]);
  }

  #[test]
  fn pair_pattern_rejects_empty_list() {
    let tokens = tokens_for("x");
    let scope = Env::new(None);
    let pattern = Pattern::Pair { head: Box::new(Pattern::Identifier(0)), tail: Box::new(Pattern::Identifier(0)) };
    let list = Value::List(Rc::new(RefCell::new(vec![])));
    assert!(!try_match(&pattern, &list, &tokens, &scope, &mut noop).unwrap());
  }

  #[test]
  fn failed_match_does_not_poison_caller_scope() {
    // The matcher may push partial bindings into `scope` before failing; callers
    // are expected to discard the whole scope rather than trust it, so a false
    // result plus a fresh scope for the next trial is always atomic from the
    // caller's point of view (`spec.md` §8 "Pattern atomicity").
    let tokens = tokens_for("x");
    let pattern = Pattern::List(vec![Pattern::Int(1), Pattern::Int(99)]);
    let list = Value::List(Rc::new(RefCell::new(vec![Value::Int(1), Value::Int(2)])));
    let trial = Env::new(None);
    assert!(!try_match(&pattern, &list, &tokens, &trial, &mut noop).unwrap());
  }
}
