use std::cell::RefCell;
use std::rc::Rc;

use raven_core::ast::NodeKind::*;
use raven_core::ast::{Arm, BinaryOp, HashKey, NodeId, Pattern, UnaryOp};
use raven_core::errors::RuntimeError;
use raven_objects::{Closure, Env, HashObj, TreeClosure, Value};

use crate::value;
use crate::{Interpreter, Outcome};

impl<'a> Interpreter<'a> {
  pub(crate) fn eval_expr(&self, id: NodeId, env: &Rc<Env>) -> Result<Outcome, RuntimeError> {
    let ast = self.ast;
    match &ast.get(id).kind {
      Identifier(name) => {
        let name_tok = *name;
        let v = match self.resolutions.get(id) {
          Some(raven_resolver::Resolution::Local { depth, slot }) => env.get(depth, slot),
          _ => {
            let name = self.tokens.lexeme(name_tok);
            self.globals.get(name).ok_or_else(|| RuntimeError::new(self.line_of(id), format!("Undefined name '{name}'.")))?
          }
        };
        Ok(Outcome::Value(v))
      }

      IntLit(n) => Ok(Outcome::Value(Value::Int(*n))),
      FloatLit(n) => Ok(Outcome::Value(Value::Float(*n))),
      StringLit(s) => Ok(Outcome::Value(Value::Str(Rc::from(s.as_str())))),
      RawStringLit(s) => Ok(Outcome::Value(Value::Str(Rc::from(s.as_str())))),
      TrueLit => Ok(Outcome::Value(Value::Bool(true))),
      FalseLit => Ok(Outcome::Value(Value::Bool(false))),
      NilLit => Ok(Outcome::Value(Value::Nil)),

      Group(inner) => self.eval_expr(*inner, env),

      Unary { op, expr } => {
        let operand = value!(self, *expr, env);
        let line = self.line_of(id);
        let v = match op {
          UnaryOp::Not => Value::Bool(!operand.truthy()),
          UnaryOp::Neg => match operand {
            Value::Int(n) => Value::Int(-n),
            Value::Float(n) => Value::Float(-n),
            other => return Err(RuntimeError::new(line, format!("Cannot negate a '{}'.", other.type_name()))),
          },
        };
        Ok(Outcome::Value(v))
      }

      Binary { op, left, right } => self.eval_binary(*op, *left, *right, env, id),

      Assign { target, value } => self.eval_assign(*target, *value, env, id),

      Call { callee, args } => {
        let callee_v = value!(self, *callee, env);
        let mut arg_vals = Vec::with_capacity(args.len());
        for arg in args {
          arg_vals.push(value!(self, *arg, env));
        }
        let line = self.line_of(id);
        Ok(Outcome::Value(self.call_value(&callee_v, arg_vals, line)?))
      }

      Index { target, index } => {
        let container = value!(self, *target, env);
        let key = value!(self, *index, env);
        let line = self.line_of(id);
        Ok(Outcome::Value(self.index_get(&container, &key, line)?))
      }

      Access { target, field } => {
        let container = value!(self, *target, env);
        let line = self.line_of(id);
        let name = self.tokens.lexeme(*field);
        match &container {
          Value::Hash(h) => {
            let key = Value::Str(Rc::from(name));
            let found = h.borrow().get(&key).ok_or_else(|| RuntimeError::new(line, format!("Key '{name}' not found in hash.")))?;
            Ok(Outcome::Value(found))
          }
          other => Err(RuntimeError::new(line, format!("'{}' has no field access.", other.type_name()))),
        }
      }

      ListLit(items) => {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
          values.push(value!(self, *item, env));
        }
        Ok(Outcome::Value(Value::List(Rc::new(RefCell::new(values)))))
      }

      HashLit { keys, values } => {
        let mut hash = HashObj::default();
        for (key, value_id) in keys.iter().zip(values.iter()) {
          let key_v = match key {
            HashKey::Ident(tok) => Value::Str(Rc::from(self.tokens.lexeme(*tok))),
            HashKey::Computed(expr) => value!(self, *expr, env),
          };
          let v = value!(self, *value_id, env);
          hash.insert(key_v, v);
        }
        Ok(Outcome::Value(Value::Hash(Rc::new(RefCell::new(hash)))))
      }

      FuncLit { params, body } => {
        let arity = params.len();
        let closure = Closure::Tree(TreeClosure { name: None, params: params.clone(), body: *body, env: Rc::clone(env), arity });
        Ok(Outcome::Value(Value::Closure(Rc::new(closure))))
      }

      If { branches, else_branch } => {
        for (cond, body) in branches {
          if value!(self, *cond, env).truthy() {
            let body_env = Env::new(Some(Rc::clone(env)));
            return self.eval_piece(*body, &body_env, false);
          }
        }
        if let Some(body) = else_branch {
          let body_env = Env::new(Some(Rc::clone(env)));
          return self.eval_piece(*body, &body_env, false);
        }
        Ok(Outcome::Value(Value::Nil))
      }

      While { cond, body } => self.eval_while(*cond, *body, env),

      For { pattern, iter, body } => self.eval_for(pattern, *iter, *body, env, id),

      Cond { arms } => {
        for (cond, arm) in arms {
          if value!(self, *cond, env).truthy() {
            return self.eval_cond_arm(*arm, env);
          }
        }
        Ok(Outcome::Value(Value::Nil))
      }

      Match { subject, arms } => self.eval_match(*subject, arms, env, id),

      Piece(_) => unreachable!("Piece nodes are evaluated via eval_piece, never eval_expr"),
      _ => unreachable!("not an expression node"),
    }
  }

  fn eval_cond_arm(&self, arm: Arm, env: &Rc<Env>) -> Result<Outcome, RuntimeError> {
    match arm {
      Arm::Expr(e) => self.eval_expr(e, env),
      Arm::Piece(p) => {
        let body_env = Env::new(Some(Rc::clone(env)));
        self.eval_piece(p, &body_env, false)
      }
    }
  }

  fn eval_while(&self, cond: NodeId, body: NodeId, env: &Rc<Env>) -> Result<Outcome, RuntimeError> {
    loop {
      if !value!(self, cond, env).truthy() {
        return Ok(Outcome::Value(Value::Void));
      }
      let body_env = Env::new(Some(Rc::clone(env)));
      match self.eval_piece(body, &body_env, false)? {
        Outcome::Value(_) | Outcome::Continue => {}
        Outcome::Break => return Ok(Outcome::Value(Value::Void)),
        other @ Outcome::Return(_) => return Ok(other),
      }
    }
  }

  /// `for <pattern> in <iter> do <body> end` (`SPEC_FULL.md` §11.2): iterating a
  /// list binds each element directly; iterating a hash binds each entry as a
  /// 2-element `[key, value]` list, in the hash's own int/float/string/identity
  /// order. The pattern and the body share one `Env` frame, same as a match arm.
  fn eval_for(&self, pattern: &Pattern, iter: NodeId, body: NodeId, env: &Rc<Env>, id: NodeId) -> Result<Outcome, RuntimeError> {
    let iter_v = value!(self, iter, env);
    let line = self.line_of(id);

    let items: Vec<Value> = match &iter_v {
      Value::List(l) => l.borrow().clone(),
      Value::Hash(h) => h.borrow().entries().map(|(k, v)| Value::List(Rc::new(RefCell::new(vec![k, v])))).collect(),
      other => return Err(RuntimeError::new(line, format!("'{}' is not iterable.", other.type_name()))),
    };

    for item in items {
      let body_env = Env::new(Some(Rc::clone(env)));
      let mut computed = |eid: NodeId| self.eval_expr_value(eid, env);
      let matched = raven_matcher::try_match(pattern, &item, self.tokens, &body_env, &mut computed)?;
      if !matched {
        return Err(RuntimeError::new(line, "'for' pattern did not match an element."));
      }
      match self.eval_piece(body, &body_env, false)? {
        Outcome::Value(_) | Outcome::Continue => {}
        Outcome::Break => return Ok(Outcome::Value(Value::Void)),
        other @ Outcome::Return(_) => return Ok(other),
      }
    }
    Ok(Outcome::Value(Value::Void))
  }

  /// `match <subject> case <pattern> -> <arm> ... end` (`spec.md` §4.E, §4.F). The
  /// first matching arm wins; a pattern's bindings and its arm share one `Env`
  /// frame, so a `do ... end` arm sees the same scope the pattern bound into.
  fn eval_match(&self, subject: NodeId, arms: &[(Pattern, Arm)], env: &Rc<Env>, id: NodeId) -> Result<Outcome, RuntimeError> {
    let subject_v = value!(self, subject, env);
    for (pattern, arm) in arms {
      let body_env = Env::new(Some(Rc::clone(env)));
      let mut computed = |eid: NodeId| self.eval_expr_value(eid, env);
      if raven_matcher::try_match(pattern, &subject_v, self.tokens, &body_env, &mut computed)? {
        return match arm {
          Arm::Expr(e) => self.eval_expr(*e, &body_env),
          Arm::Piece(p) => self.eval_piece(*p, &body_env, false),
        };
      }
    }
    Err(RuntimeError::new(self.line_of(id), "No matching case in 'match' expression."))
  }

  fn eval_assign(&self, target: NodeId, value_id: NodeId, env: &Rc<Env>, id: NodeId) -> Result<Outcome, RuntimeError> {
    let v = value!(self, value_id, env);
    let line = self.line_of(id);

    match &self.ast.get(target).kind {
      Identifier(name_tok) => {
        let name_tok = *name_tok;
        match self.resolutions.get(target) {
          Some(raven_resolver::Resolution::Local { depth, slot }) => env.set(depth, slot, v.clone()),
          _ => {
            let name = self.tokens.lexeme(name_tok);
            if !self.globals.set(name, v.clone()) {
              return Err(RuntimeError::new(line, format!("Undefined global '{name}'.")));
            }
          }
        }
      }
      Index { target: tgt, index } => {
        let (tgt, index) = (*tgt, *index);
        let container = value!(self, tgt, env);
        let key = value!(self, index, env);
        self.index_set(&container, &key, v.clone(), line)?;
      }
      Access { target: tgt, field } => {
        let (tgt, field) = (*tgt, *field);
        let container = value!(self, tgt, env);
        let name = self.tokens.lexeme(field);
        match &container {
          Value::Hash(h) => {
            h.borrow_mut().insert(Value::Str(Rc::from(name)), v.clone());
          }
          other => return Err(RuntimeError::new(line, format!("'{}' has no field access.", other.type_name()))),
        }
      }
      _ => unreachable!("the parser only allows identifier/index/access assignment targets"),
    }

    Ok(Outcome::Value(v))
  }

  fn index_get(&self, container: &Value, key: &Value, line: u32) -> Result<Value, RuntimeError> {
    match container {
      Value::List(l) => match key {
        Value::Int(i) => {
          let l = l.borrow();
          if *i < 0 || *i as usize >= l.len() {
            Err(RuntimeError::new(line, "List index out of range."))
          } else {
            Ok(l[*i as usize].clone())
          }
        }
        other => Err(RuntimeError::new(line, format!("List index must be an Int, got '{}'.", other.type_name()))),
      },
      Value::Hash(h) => h.borrow().get(key).ok_or_else(|| RuntimeError::new(line, "Key not found in hash.")),
      other => Err(RuntimeError::new(line, format!("'{}' is not indexable.", other.type_name()))),
    }
  }

  fn index_set(&self, container: &Value, key: &Value, value: Value, line: u32) -> Result<(), RuntimeError> {
    match container {
      Value::List(l) => match key {
        Value::Int(i) => {
          let mut l = l.borrow_mut();
          if *i < 0 || *i as usize >= l.len() {
            Err(RuntimeError::new(line, "List index out of range."))
          } else {
            l[*i as usize] = value;
            Ok(())
          }
        }
        other => Err(RuntimeError::new(line, format!("List index must be an Int, got '{}'.", other.type_name()))),
      },
      Value::Hash(h) => {
        h.borrow_mut().insert(key.clone(), value);
        Ok(())
      }
      other => Err(RuntimeError::new(line, format!("'{}' is not indexable.", other.type_name()))),
    }
  }

  /// Binary operator semantics (`spec.md` §4.F): arithmetic demands both operands
  /// numeric, widening to `Float` if either side is; comparisons demand the same;
  /// `==`/`!=` defer to [`Value`]'s own strict same-kind equality; `::`/`|` (both
  /// parsed as [`BinaryOp::Cons`]) prepend onto a list; `@` concatenates two lists;
  /// `and`/`or` short-circuit and yield whichever operand decided the result,
  /// rather than coercing to `Bool` (`DESIGN.md` Open Question decision).
  fn eval_binary(&self, op: BinaryOp, left: NodeId, right: NodeId, env: &Rc<Env>, id: NodeId) -> Result<Outcome, RuntimeError> {
    let line = self.line_of(id);

    if matches!(op, BinaryOp::And | BinaryOp::Or) {
      let l = value!(self, left, env);
      let short_circuit = match op {
        BinaryOp::And => !l.truthy(),
        BinaryOp::Or => l.truthy(),
        _ => unreachable!(),
      };
      return if short_circuit { Ok(Outcome::Value(l)) } else { self.eval_expr(right, env) };
    }

    let l = value!(self, left, env);
    let r = value!(self, right, env);

    let v = match op {
      BinaryOp::Add => numeric_op(&l, &r, line, |a, b| a + b, |a, b| a + b)?,
      BinaryOp::Sub => numeric_op(&l, &r, line, |a, b| a - b, |a, b| a - b)?,
      BinaryOp::Mul => numeric_op(&l, &r, line, |a, b| a * b, |a, b| a * b)?,
      BinaryOp::Div => {
        if is_zero(&r) {
          return Err(RuntimeError::new(line, "Zero divisor."));
        }
        numeric_op(&l, &r, line, |a, b| a / b, |a, b| a / b)?
      }
      BinaryOp::Mod => {
        if is_zero(&r) {
          return Err(RuntimeError::new(line, "Zero divisor."));
        }
        numeric_op(&l, &r, line, |a, b| a % b, |a, b| a % b)?
      }
      BinaryOp::Eq => Value::Bool(l == r),
      BinaryOp::Neq => Value::Bool(l != r),
      BinaryOp::Lt => Value::Bool(numeric_cmp(&l, &r, line)?.is_lt()),
      BinaryOp::LtEq => Value::Bool(numeric_cmp(&l, &r, line)?.is_le()),
      BinaryOp::Gt => Value::Bool(numeric_cmp(&l, &r, line)?.is_gt()),
      BinaryOp::GtEq => Value::Bool(numeric_cmp(&l, &r, line)?.is_ge()),
      BinaryOp::Cons => match r {
        Value::List(items) => {
          let mut v = Vec::with_capacity(items.borrow().len() + 1);
          v.push(l);
          v.extend(items.borrow().iter().cloned());
          Value::List(Rc::new(RefCell::new(v)))
        }
        other => return Err(RuntimeError::new(line, format!("Cannot cons onto a '{}'.", other.type_name()))),
      },
      BinaryOp::Concat => match (&l, &r) {
        (Value::List(a), Value::List(b)) => {
          let mut v = a.borrow().clone();
          v.extend(b.borrow().iter().cloned());
          Value::List(Rc::new(RefCell::new(v)))
        }
        _ => return Err(RuntimeError::new(line, "'@' requires both operands to be Lists.")),
      },
      BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    };

    Ok(Outcome::Value(v))
  }
}

fn is_zero(v: &Value) -> bool {
  matches!(v, Value::Int(0)) || matches!(v, Value::Float(x) if *x == 0.0)
}

fn numeric_op(l: &Value, r: &Value, line: u32, int_op: fn(i64, i64) -> i64, float_op: fn(f64, f64) -> f64) -> Result<Value, RuntimeError> {
  match (l, r) {
    (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
    (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
    (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
    (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
    _ => Err(RuntimeError::new(line, "Operands must be numbers.")),
  }
}

fn numeric_cmp(l: &Value, r: &Value, line: u32) -> Result<std::cmp::Ordering, RuntimeError> {
  match (l, r) {
    (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
    (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b).ok_or_else(|| RuntimeError::new(line, "Cannot compare NaN.")),
    (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)).ok_or_else(|| RuntimeError::new(line, "Cannot compare NaN.")),
    (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).ok_or_else(|| RuntimeError::new(line, "Cannot compare NaN.")),
    _ => Err(RuntimeError::new(line, "Operands must be numbers.")),
  }
}
