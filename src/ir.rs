//! Procedure representation shared by the transformer, the recursive
//! template, the source renderer and the interpreter.

use crate::number::{CmpOp, Number};
use crate::operator::{compute_name, count_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Add,
    Sub,
    Neg,
    Mul,
    FloorDiv,
    FloorMod,
    Sat,
    Abs,
    Min,
    Max,
    IsNaN,
    IsInf,
    IsSpecial,
}

impl Builtin {
    pub const ALL: [Builtin; 13] = [
        Builtin::Add,
        Builtin::Sub,
        Builtin::Neg,
        Builtin::Mul,
        Builtin::FloorDiv,
        Builtin::FloorMod,
        Builtin::Sat,
        Builtin::Abs,
        Builtin::Min,
        Builtin::Max,
        Builtin::IsNaN,
        Builtin::IsInf,
        Builtin::IsSpecial,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Add => "add",
            Builtin::Sub => "sub",
            Builtin::Neg => "neg",
            Builtin::Mul => "mul",
            Builtin::FloorDiv => "floordiv",
            Builtin::FloorMod => "floormod",
            Builtin::Sat => "sat",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::IsNaN => "is_nan",
            Builtin::IsInf => "is_inf",
            Builtin::IsSpecial => "is_special",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.name() == name)
    }

    pub fn arity(&self) -> usize {
        match self {
            Builtin::Neg
            | Builtin::Sat
            | Builtin::Abs
            | Builtin::IsNaN
            | Builtin::IsInf
            | Builtin::IsSpecial => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callee {
    /// Compute (`count == false`) or count procedure of a registered operator.
    Operator { id: String, count: bool },
    Builtin(Builtin),
}

impl Callee {
    pub fn compute(id: impl Into<String>) -> Self {
        Callee::Operator {
            id: id.into(),
            count: false,
        }
    }

    pub fn count(id: impl Into<String>) -> Self {
        Callee::Operator {
            id: id.into(),
            count: true,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Callee::Operator { id, count: false } => compute_name(id),
            Callee::Operator { id, count: true } => count_name(id),
            Callee::Builtin(b) => b.name().to_string(),
        }
    }

    pub fn operator_id(&self) -> Option<&str> {
        match self {
            Callee::Operator { id, .. } => Some(id),
            Callee::Builtin(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    Value(Number),
    /// Index into [`Procedure::locals`].
    Var(usize),
    Call(Callee, Vec<Id>),
    Compare(CmpOp, Id, Id),
    And(Id, Id),
    Or(Id, Id),
    Not(Id),
    /// Unsaturated addition, used to accumulate operation counts.
    Sum(Id, Id),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: Kind,
}

pub type Id = id_arena::Id<Node>;
pub type Arena = id_arena::Arena<Node>;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let(usize, Id),
    Assign(usize, Id),
    Return(Id),
    If {
        arms: Vec<(Id, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
    Repeat { times: Id, body: Vec<Stmt> },
}

impl Stmt {
    /// True when control never falls through this statement.
    pub fn terminates(&self) -> bool {
        match self {
            Stmt::Return(_) => true,
            Stmt::If { arms, otherwise } => {
                arms.iter().all(|(_, body)| body.iter().any(Stmt::terminates))
                    && otherwise.as_ref().map_or(false, |body| body.iter().any(Stmt::terminates))
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub name: String,
    /// Parameters first, then `let` locals.
    pub locals: Vec<String>,
    pub arity: usize,
    pub body: Vec<Stmt>,
}

impl Procedure {
    pub fn params(&self) -> &[String] {
        &self.locals[..self.arity]
    }

    /// Every expression root reachable from the body, in source order.
    pub fn roots(&self) -> Vec<Id> {
        fn walk(stmts: &[Stmt], out: &mut Vec<Id>) {
            for stmt in stmts {
                match stmt {
                    Stmt::Let(_, e) | Stmt::Assign(_, e) | Stmt::Return(e) => out.push(*e),
                    Stmt::If { arms, otherwise } => {
                        for (cond, body) in arms {
                            out.push(*cond);
                            walk(body, out);
                        }
                        if let Some(body) = otherwise {
                            walk(body, out);
                        }
                    }
                    Stmt::Repeat { times, body } => {
                        out.push(*times);
                        walk(body, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.body, &mut out);
        out
    }

    /// Expressions returned by the procedure, in source order.
    pub fn returns(&self) -> Vec<Id> {
        fn walk(stmts: &[Stmt], out: &mut Vec<Id>) {
            for stmt in stmts {
                match stmt {
                    Stmt::Return(e) => out.push(*e),
                    Stmt::If { arms, otherwise } => {
                        for (_, body) in arms {
                            walk(body, out);
                        }
                        if let Some(body) = otherwise {
                            walk(body, out);
                        }
                    }
                    Stmt::Repeat { body, .. } => walk(body, out),
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.body, &mut out);
        out
    }
}

/// Visits `root` and its descendants, parents before children.
pub fn visit(arena: &Arena, root: Id, f: &mut impl FnMut(Id, &Kind)) {
    let Some(node) = arena.get(root) else {
        return;
    };
    f(root, &node.kind);
    match &node.kind {
        Kind::Value(_) | Kind::Var(_) => {}
        Kind::Call(_, args) => {
            for arg in args {
                visit(arena, *arg, f);
            }
        }
        Kind::Compare(_, l, r) | Kind::And(l, r) | Kind::Or(l, r) | Kind::Sum(l, r) => {
            visit(arena, *l, f);
            visit(arena, *r, f);
        }
        Kind::Not(e) => visit(arena, *e, f),
    }
}

/// A compute procedure and its count procedure, sharing one arena.
#[derive(Debug, Clone)]
pub struct Unit {
    pub arena: Arena,
    pub compute: Procedure,
    pub count: Procedure,
}

impl Unit {
    /// Ids of every operator either procedure calls, first-seen order.
    pub fn callees(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for root in self.compute.roots().into_iter().chain(self.count.roots()) {
            visit(&self.arena, root, &mut |_, kind| {
                if let Kind::Call(callee, _) = kind {
                    if let Some(id) = callee.operator_id() {
                        if !ids.iter().any(|i| i == id) {
                            ids.push(id.to_string());
                        }
                    }
                }
            });
        }
        ids
    }
}
