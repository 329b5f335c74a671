use hashbrown::HashMap;
use log::trace;
use raven_core::ast::{Ast, NodeId, NodeKind};
use raven_core::errors::{Stage, StageError};
use raven_core::tokens::{TokenIdx, TokenList};

mod scope;
mod walk;

pub use scope::Resolution;

/// The full table of identifier-use resolutions produced by one resolve pass,
/// keyed by AST node identity (`SPEC_FULL.md` §11.1). Looked up by the tree
/// evaluator and the bytecode compiler for every `Identifier`/`Assign` node.
pub struct Resolutions {
  table: HashMap<NodeId, Resolution>,
}

impl Resolutions {
  pub fn get(&self, id: NodeId) -> Option<Resolution> {
    self.table.get(&id).copied()
  }
}

/// Two-pass lexical resolver (`spec.md` §4.D). Grounded on
/// `Analyzers/src/symbols/mod.rs`'s `SymbolTableArena` and `resolver.rs`'s
/// `declare_id` (the teacher's collision/capacity checks are kept almost verbatim);
/// `resolve_id` is `todo!()` in the teacher and is built here from scratch as a
/// Lox-style scope stack rather than the teacher's flat depth-tagged symbol list,
/// since every `Piece` the evaluator executes needs its own `Env` frame and the
/// scope stack mirrors that directly.
pub(crate) struct Resolver<'a> {
  tokens: &'a TokenList<'a>,
  ast: &'a Ast,
  scopes: Vec<scope::Scope<'a>>,
  fn_depth: u32,
  resolutions: HashMap<NodeId, Resolution>,
  errors: Vec<StageError>,
}

/// Resolves every identifier use reachable from `root` (the program's top-level
/// piece, as returned by `raven_parser::Parser::parse`). The root scope is never
/// pushed as a local scope: `let`/`fn` bindings there become globals, matching
/// `spec.md` §4.D "References in the root scope resolve to the global environment".
pub fn resolve(tokens: &TokenList, ast: &Ast, root: NodeId) -> Result<Resolutions, Vec<StageError>> {
  let mut resolver = Resolver { tokens, ast, scopes: Vec::new(), fn_depth: 0, resolutions: HashMap::new(), errors: Vec::new() };

  if let NodeKind::Piece(stmts) = &ast.get(root).kind {
    let stmts = stmts.clone();
    for stmt in stmts {
      resolver.resolve_stmt(stmt);
    }
  }

  if resolver.errors.is_empty() {
    Ok(Resolutions { table: resolver.resolutions })
  } else {
    Err(resolver.errors)
  }
}

impl<'a> Resolver<'a> {
  fn push_scope(&mut self) {
    self.scopes.push(scope::Scope::new());
  }

  fn pop_scope(&mut self) {
    self.scopes.pop();
  }

  /// Declares `name` in the innermost scope, flagging it not-yet-defined. Errors
  /// "redefining a local in the same scope" on collision (`spec.md` §4.D).
  fn declare(&mut self, name_idx: TokenIdx) {
    let name = self.tokens.lexeme(name_idx);
    let Some(scope) = self.scopes.last_mut() else { return };

    if scope.contains_key(name) {
      self.error_at(name_idx, &format!("Redefining '{name}' in the same scope."));
      return;
    }

    let slot = scope.len() as u16;
    scope.insert(name, scope::Binding { slot, defined: false });
  }

  /// Marks `name` defined in the innermost scope, making it visible to later
  /// sibling initializers and to the rest of the block.
  fn define(&mut self, name_idx: TokenIdx) {
    let name = self.tokens.lexeme(name_idx);
    if let Some(binding) = self.scopes.last_mut().and_then(|scope| scope.get_mut(name)) {
      binding.defined = true;
    }
  }

  /// Resolves one identifier use, innermost scope outward. Falls back to `Global`
  /// when no enclosing scope declares the name — resolved (or not) by the runtime
  /// globals table, not here.
  fn resolve_identifier_use(&mut self, use_id: NodeId, name_idx: TokenIdx) {
    let name = self.tokens.lexeme(name_idx);

    for (i, scope) in self.scopes.iter().enumerate().rev() {
      if let Some(binding) = scope.get(name) {
        if !binding.defined {
          self.error_at(name_idx, &format!("Cannot reference '{name}' before it has been initialized."));
          return;
        }
        let depth = (self.scopes.len() - 1 - i) as u16;
        self.resolutions.insert(use_id, Resolution::Local { depth, slot: binding.slot });
        return;
      }
    }

    self.resolutions.insert(use_id, Resolution::Global);
  }

  fn error_at(&mut self, token_idx: TokenIdx, message: &str) {
    trace!("resolver error at token {token_idx}: {message}");
    let tok = &self.tokens[token_idx];
    let lexeme = self.tokens.lexeme(token_idx).to_string();
    self.errors.push(StageError::new(Stage::Resolve, tok.line, message).with_lexeme(lexeme));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use raven_core::ast::NodeKind;
  use raven_lexer::Lexer;
  use raven_parser::Parser;

  fn resolve_src(src: &str) -> Result<(TokenList<'_>, Ast, Resolutions), Vec<StageError>> {
    let tokens = Lexer::lex(src);
    let list = TokenList::new(tokens, src, "<test>");
    let (ast, root) = Parser::parse(&list).expect("source should parse");
    let resolutions = resolve(&list, &ast, root)?;
    Ok((list, ast, resolutions))
  }

  /// Finds the `NodeId` of the last `Identifier` expression node referring to `name`.
  fn find_identifier_use(ast: &Ast, list: &TokenList, name: &str) -> NodeId {
    (0..ast.len() as NodeId)
      .rev()
      .find(|&id| matches!(&ast.get(id).kind, NodeKind::Identifier(tok) if list.lexeme(*tok) == name))
      .unwrap_or_else(|| panic!("no Identifier node found for '{name}'"))
  }

  #[test]
  fn root_let_binding_resolves_to_global() {
    let (list, ast, resolutions) = resolve_src("let x = 1\nx").unwrap();
    let use_id = find_identifier_use(&ast, &list, "x");
    assert_eq!(resolutions.get(use_id), Some(Resolution::Global));
  }

  #[test]
  fn function_parameter_resolves_to_local_slot_zero() {
    let (list, ast, resolutions) = resolve_src("fn f(a)\n a\nend").unwrap();
    let use_id = find_identifier_use(&ast, &list, "a");
    assert_eq!(resolutions.get(use_id), Some(Resolution::Local { depth: 0, slot: 0 }));
  }

  #[test]
  fn nested_block_identifier_use_has_positive_depth() {
    let (list, ast, resolutions) = resolve_src("fn f(a)\n if true do\n a\n end end\nend").unwrap();
    let use_id = find_identifier_use(&ast, &list, "a");
    assert_eq!(resolutions.get(use_id), Some(Resolution::Local { depth: 1, slot: 0 }));
  }

  #[test]
  fn redefining_a_local_in_the_same_scope_errors() {
    let errs = resolve_src("fn f(a, a)\n a\nend").unwrap_err();
    assert!(errs.iter().any(|e| e.message.contains("Redefining")));
  }

  #[test]
  fn self_referential_local_initializer_errors() {
    let errs = resolve_src("fn f()\n let x = x\nend").unwrap_err();
    assert!(errs.iter().any(|e| e.message.contains("before it has been initialized")));
  }

  #[test]
  fn return_outside_function_errors() {
    let errs = resolve_src("return 1").unwrap_err();
    assert!(errs.iter().any(|e| e.message.contains("Cannot return from outside a function")));
  }
}
