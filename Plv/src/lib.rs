//! The Program Lifecycle Visualizer's trimmed-down successor. `spec.md` §1 names
//! the teacher's own `debug.c`-style pretty-printers and `PLV/` JSON exporter as an
//! explicitly out-of-scope external collaborator; this crate exists only so
//! `raven_vm`'s optional `PLV` Cargo feature has something real behind it, grounded
//! on `PLV/src/lib.rs`/`disassembler.rs` but reduced to a bytecode disassembly view
//! — no token/AST JSON export, no wall-clock stage timing.

mod disassembler;

use raven_objects::{Closure, FunctionProto};

pub use disassembler::describe;

/// Human-readable bytecode listing for `proto` and every function prototype
/// nested in its own constant pool.
pub fn disassemble(proto: &FunctionProto) -> String {
  let mut out = String::new();
  disassemble_into(proto, &mut out);
  out
}

fn disassemble_into(proto: &FunctionProto, out: &mut String) {
  out.push_str(&disassembler::disassemble_fn(proto));
  for constant in &proto.chunk.constants {
    if let raven_objects::Value::Closure(rc) = constant {
      if let Closure::Compiled(cc) = rc.as_ref() {
        disassemble_into(&cc.function, out);
      }
    }
  }
}

/// A minimal JSON wrapper around [`disassemble`] — the one piece of the teacher's
/// `PLVJsonGenerator::export` this workspace still has a use for.
pub fn export_json(proto: &FunctionProto) -> serde_json::Value {
  serde_json::json!({
    "name": proto.name.as_deref().unwrap_or("<script>"),
    "arity": proto.arity,
    "disassembly": disassemble(proto),
  })
}

#[cfg(test)]
mod tests {
  use raven_core::tokens::TokenList;
  use raven_parser::Parser;

  use super::*;

  fn compile(src: &'static str) -> std::rc::Rc<FunctionProto> {
    let tokens = TokenList::new(raven_lexer::Lexer::lex(src), src, "<test>");
    let (ast, root) = Parser::parse(&tokens).expect("source should parse");
    raven_resolver::resolve(&tokens, &ast, root).expect("source should resolve");
    raven_compiler::compile(&tokens, &ast, root).expect("source should compile")
  }

  #[test]
  fn disassembly_lists_every_opcode_mnemonic_used() {
    let proto = compile("let x = 1 + 2 * 3");
    let listing = disassemble(&proto);
    assert!(listing.contains("LOAD_CONST"));
    assert!(listing.contains("MUL"));
    assert!(listing.contains("ADD"));
    assert!(listing.contains("DEF_GLOBAL"));
  }

  #[test]
  fn nested_closure_prototype_is_disassembled_too() {
    let proto = compile("fn outer() let i = 0; fn() i end end");
    let listing = disassemble(&proto);
    assert!(listing.contains("== outer =="));
    assert!(listing.matches("CLOSURE").count() >= 1);
  }

  #[test]
  fn export_json_carries_name_and_arity() {
    let proto = compile("let add = fn(a, b) a + b end");
    let json = export_json(&proto);
    assert_eq!(json["name"], "<script>");
    assert_eq!(json["arity"], 0);
    assert!(json["disassembly"].as_str().unwrap().contains("CLOSURE"));
  }
}
