use hashbrown::HashMap;

/// Where a resolved identifier use lives at runtime. `Global` covers both root-scope
/// bindings and any identifier the resolver never finds in an enclosing local scope
/// — the tree evaluator and bytecode compiler defer the actual lookup to
/// `GET_GLOBAL`/`SET_GLOBAL`, which may still fail at runtime (`spec.md` §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
  Local { depth: u16, slot: u16 },
  Global,
}

/// One lexical scope: identifier lexeme → its slot and whether its initializer has
/// finished evaluating yet.
pub(crate) struct Binding {
  pub slot: u16,
  pub defined: bool,
}

pub(crate) type Scope<'a> = HashMap<&'a str, Binding>;
