use crate::number::CmpOp;
use crate::operator::Shape;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    NaN,
    Var(char),
    Int(i64),
    Paren(Id),
    Binary(String, Id, Id),
    Prefix(String, Id),
    Postfix(String, Id),
    Compare(CmpOp, Id, Id),
    And(Id, Id),
    Or(Id, Id),
    Not(Id),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
}

pub type Id = id_arena::Id<Node>;
pub type Arena = id_arena::Arena<Node>;

/// Left-hand side of a definition, e.g. `a⊕b`.
#[derive(Debug, Clone, PartialEq)]
pub struct Head {
    pub symbol: String,
    pub shape: Shape,
    pub params: Vec<char>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    If(Id),
    Else,
    Always,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub expr: Id,
    pub guard: Guard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub head: Head,
    pub branches: Vec<Branch>,
}
