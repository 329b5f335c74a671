use std::rc::Rc;

use raven_core::ast::{Ast, NodeId};
use raven_core::errors::RuntimeError;
use raven_core::tokens::TokenList;
use raven_objects::{builtins, Env, Globals, Value};
use raven_resolver::Resolutions;

mod call;
mod expr;
mod stmt;

/// What evaluating one node produced: a plain value, or non-local control intent
/// bound for the nearest enclosing function call / loop (`spec.md` §9 "re-architect
/// [mode bits] to explicit control outcomes"). Both statements and expressions
/// return this uniformly — an `if`/`match`/`while` is itself an expression whose
/// body is a sequence of statements, so `return`/`break`/`continue` reached from
/// deep inside one must unwind through every expression between it and its target,
/// not just through statements.
pub enum Outcome {
  Value(Value),
  Return(Value),
  Break,
  Continue,
}

/// Evaluates `$id` and unwraps it to a plain [`Value`]; any non-local [`Outcome`]
/// short-circuits the caller by returning it unchanged. Named after the teacher's
/// own `operand!` dispatch-loop macro (`VirtualMachine/src/run.rs`).
macro_rules! value {
  ($self:ident, $id:expr, $env:expr) => {
    match $self.eval_expr($id, $env)? {
      crate::Outcome::Value(v) => v,
      other => return Ok(other),
    }
  };
}
pub(crate) use value;

/// Tree-walking evaluator (`spec.md` §4.F). Holds the resolved program (tokens,
/// AST, resolver annotations) plus the process-wide globals table; `root_env` is a
/// single parentless [`Env`] every top-level closure captures as its lexical
/// parent, even though top-level bindings themselves never live in it — the
/// resolver never addresses a root-scope binding by `(depth, slot)`, so nothing
/// ever actually indexes into `root_env`'s own slots. It exists purely so
/// `Env::new(Some(parent))` has something to hang off of when a closure defined at
/// the top level is later called.
pub struct Interpreter<'a> {
  tokens: &'a TokenList<'a>,
  ast: &'a Ast,
  resolutions: &'a Resolutions,
  globals: Globals,
  root_env: Rc<Env>,
}

impl<'a> Interpreter<'a> {
  pub fn new(tokens: &'a TokenList<'a>, ast: &'a Ast, resolutions: &'a Resolutions) -> Self {
    let globals = Globals::new();
    builtins::install(&globals);
    Interpreter { tokens, ast, resolutions, globals, root_env: Env::new(None) }
  }

  /// Same as [`Interpreter::new`], but reuses an already-built [`Globals`] table
  /// instead of installing a fresh one — lets a REPL session thread one table
  /// across lines so earlier `let`/`fn`/`type` declarations stay visible
  /// (`spec.md` §5: "one global environment for the whole session"). The caller
  /// is responsible for having installed builtins on `globals` once, up front.
  pub fn with_globals(tokens: &'a TokenList<'a>, ast: &'a Ast, resolutions: &'a Resolutions, globals: Globals) -> Self {
    Interpreter { tokens, ast, resolutions, globals, root_env: Env::new(None) }
  }

  pub fn globals(&self) -> &Globals {
    &self.globals
  }

  /// Hands the globals table back to the caller, so a REPL loop can thread it
  /// into the next line's [`Interpreter::with_globals`] call.
  pub fn into_globals(self) -> Globals {
    self.globals
  }

  /// Runs one top-level piece (a REPL line, or a whole file). `spec.md` §6 "REPL":
  /// the caller decides what to do with a non-`void` result; a stray `break`/
  /// `continue`/`return` at the top level is a runtime error rather than a panic,
  /// since the resolver itself only rejects `return` outside a function (`spec.md`
  /// §4.D), not a loose `break`/`continue`.
  pub fn run(&self, root: NodeId) -> Result<Value, RuntimeError> {
    let result = self.eval_piece(root, &self.root_env, true).and_then(|outcome| match outcome {
      Outcome::Value(v) => Ok(v),
      Outcome::Return(_) => Err(RuntimeError::new(0, "Cannot return from outside a function.")),
      Outcome::Break => Err(RuntimeError::new(0, "Cannot 'break' outside of a loop.")),
      Outcome::Continue => Err(RuntimeError::new(0, "Cannot 'continue' outside of a loop.")),
    });
    if let Err(err) = &result {
      log::trace!("runtime error at line {}: {}", err.line, err.message);
    }
    result
  }

  fn line_of(&self, id: NodeId) -> u32 {
    self.tokens[self.ast.get(id).at].line
  }

  /// Evaluates `id` and demands a plain value — used where a non-local [`Outcome`]
  /// cannot meaningfully occur (a hash-pattern's computed key expression).
  fn eval_expr_value(&self, id: NodeId, env: &Rc<Env>) -> Result<Value, RuntimeError> {
    match self.eval_expr(id, env)? {
      Outcome::Value(v) => Ok(v),
      _ => Err(RuntimeError::new(self.line_of(id), "'break'/'continue'/'return' cannot appear in this position.")),
    }
  }
}

/// End-to-end scenarios over the whole lex → parse → resolve → evaluate pipeline
/// (`spec.md` §8 "End-to-end scenarios"), exercised against this crate's tree
/// evaluator specifically.
#[cfg(test)]
mod tests {
  use raven_core::tokens::TokenList;
  use raven_lexer::Lexer;
  use raven_parser::Parser;

  use super::*;

  fn run(src: &'static str) -> Value {
    let tokens = TokenList::new(Lexer::lex(src), src, "<test>");
    let (ast, root) = Parser::parse(&tokens).expect("parse should succeed");
    let resolutions = raven_resolver::resolve(&tokens, &ast, root).expect("resolve should succeed");
    let interpreter = Interpreter::new(&tokens, &ast, &resolutions);
    interpreter.run(root).expect("evaluation should succeed")
  }

  fn run_err(src: &'static str) -> RuntimeError {
    let tokens = TokenList::new(Lexer::lex(src), src, "<test>");
    let (ast, root) = Parser::parse(&tokens).expect("parse should succeed");
    let resolutions = raven_resolver::resolve(&tokens, &ast, root).expect("resolve should succeed");
    let interpreter = Interpreter::new(&tokens, &ast, &resolutions);
    interpreter.run(root).expect_err("evaluation should fail")
  }

  #[test]
  fn arithmetic_precedence() {
    assert_eq!(run("let x = 1 + 2 * 3; x"), Value::Int(7));
  }

  #[test]
  fn function_call() {
    assert_eq!(run("let add = fn(a,b) a + b end; add(2,3)"), Value::Int(5));
  }

  #[test]
  fn pair_pattern_destructures_list() {
    let Value::List(tail) = run("let [a, b | t] = [1,2,3,4]; t") else { panic!("expected a list") };
    assert_eq!(tail.borrow().as_slice(), &[Value::Int(3), Value::Int(4)]);
  }

  #[test]
  fn closure_captures_enclosing_local_by_reference() {
    let src = "fn cnt() let i = 0; fn() i = i + 1; i end end; let c = cnt(); c(); c(); c()";
    assert_eq!(run(src), Value::Int(3));
  }

  #[test]
  fn match_binds_list_elements() {
    assert_eq!(run("match [1,2] do case [x, y] -> x + y case _ -> 0 end"), Value::Int(3));
  }

  #[test]
  fn hash_literal_and_dual_access() {
    assert_eq!(run("let h = { a: 1, b: 2 }; h.a + h[\"b\"]"), Value::Int(3));
  }

  #[test]
  fn cond_picks_first_truthy_arm() {
    assert_eq!(run("cond 1 < 2 -> \"yes\" true -> \"no\" end"), Value::Str(Rc::from("yes")));
  }

  #[test]
  fn for_loop_iterates_a_list() {
    assert_eq!(run("let total = 0; for x in [1,2,3] do total = total + x end; total"), Value::Int(6));
  }

  #[test]
  fn division_by_zero_is_a_runtime_error() {
    let err = run_err("1 / 0");
    assert!(err.message.contains("Zero divisor"));
  }

  #[test]
  fn arity_mismatch_is_a_runtime_error() {
    let err = run_err("let f = fn(a) a end; f(1, 2)");
    assert!(err.message.contains("Expected 1 argument"));
  }
}
