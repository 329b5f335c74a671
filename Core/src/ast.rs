use crate::tokens::TokenIdx;

/// Identity of an AST node. Assigned once, in arena-push order, and never recomputed
/// — the resolver's annotation table is keyed by this, not by lexeme or structural
/// equality, mirroring the original evaluator's pointer-keyed `table_get(e->vars,
/// expr)` (see `SPEC_FULL.md` §11.1).
pub type NodeId = u32;

/// Owned, tagged-sum AST arena. Sibling lists are ordinary `Vec`s carrying their own
/// length — no null-sentinel termination (`spec.md` §9 redesign flag).
#[derive(Default)]
pub struct Ast {
  nodes: Vec<Node>,
}

pub struct Node {
  pub id: NodeId,
  /// Back-pointer into the token stream, used for diagnostics.
  pub at: TokenIdx,
  pub kind: NodeKind,
}

impl Ast {
  pub fn push(&mut self, at: TokenIdx, kind: NodeKind) -> NodeId {
    let id = self.nodes.len() as NodeId;
    self.nodes.push(Node { id, at, kind });
    id
  }

  pub fn get(&self, id: NodeId) -> &Node {
    &self.nodes[id as usize]
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}

/// A *piece* (`spec.md` glossary): an ordered sequence of statement node ids forming
/// a block.
pub type Piece = Vec<NodeId>;

pub enum NodeKind {
  Piece(Piece),

  // --- Statements ---
  ExprStmt(NodeId),
  FnStmt { name: TokenIdx, params: Vec<Pattern>, body: NodeId },
  LetStmt { pattern: Pattern, value: NodeId },
  ReturnStmt(Option<NodeId>),
  BreakStmt,
  ContinueStmt,
  TypeStmt { name: TokenIdx, variants: Vec<VariantDecl> },

  // --- Expressions ---
  Identifier(TokenIdx),
  IntLit(i64),
  FloatLit(f64),
  StringLit(String),
  RawStringLit(String),
  TrueLit,
  FalseLit,
  NilLit,
  FuncLit { params: Vec<Pattern>, body: NodeId },
  ListLit(Vec<NodeId>),
  HashLit { keys: Vec<HashKey>, values: Vec<NodeId> },
  Group(NodeId),
  Unary { op: UnaryOp, expr: NodeId },
  Binary { op: BinaryOp, left: NodeId, right: NodeId },
  Assign { target: NodeId, value: NodeId },
  Call { callee: NodeId, args: Vec<NodeId> },
  Index { target: NodeId, index: NodeId },
  Access { target: NodeId, field: TokenIdx },
  If { branches: Vec<(NodeId, NodeId)>, else_branch: Option<NodeId> },
  While { cond: NodeId, body: NodeId },
  For { pattern: Pattern, iter: NodeId, body: NodeId },
  Cond { arms: Vec<(NodeId, Arm)> },
  Match { subject: NodeId, arms: Vec<(Pattern, Arm)> },
}

/// The right-hand side of a `match`/`cond` branch: a bare expression, or a `do …
/// end` piece.
#[derive(Clone, Copy)]
pub enum Arm {
  Expr(NodeId),
  Piece(NodeId),
}

#[derive(Clone)]
pub enum HashKey {
  Ident(TokenIdx),
  Computed(NodeId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
  Neg,
  Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Mod,
  Eq,
  Neq,
  Lt,
  LtEq,
  Gt,
  GtEq,
  Cons,
  Concat,
  And,
  Or,
}

pub struct VariantDecl {
  pub name: TokenIdx,
  pub arity: usize,
}

/// Patterns do not get their own `NodeId`: bindings are positional (declared in the
/// same left-to-right order at resolve time and bind time), so no identity-keyed
/// lookup is ever needed for them — only nested computed keys reference existing
/// expression nodes.
#[derive(Clone)]
pub enum Pattern {
  Identifier(TokenIdx),
  Int(i64),
  Float(f64),
  Str(String),
  RawStr(String),
  Nil,
  True,
  False,
  List(Vec<Pattern>),
  Pair { head: Box<Pattern>, tail: Box<Pattern> },
  Hash(Vec<(HashPatternKey, Pattern)>),
  Constructor { name: TokenIdx, fields: Vec<Pattern> },
}

#[derive(Clone)]
pub enum HashPatternKey {
  Ident(TokenIdx),
  Computed(NodeId),
  /// `{x}` inside a hash pattern binds `x` both as the key lookup and the bound name.
  Implicit(TokenIdx),
}
