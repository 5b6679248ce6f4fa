//! Expression trees built by the generator and by the expression parser.
//!
//! Operator nodes refer to operators by id; symbols, priorities and
//! procedures are looked up in the registry when the tree is rendered or
//! evaluated.

use crate::error::{Error, Result};
use crate::registry::Registry;
use serde_json::{json, Value};

pub type Id = id_arena::Id<Node>;
pub type Arena = id_arena::Arena<Node>;

/// Slot a node occupies in its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Left,
    Right,
    Unary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Number { value: i64, base: u32 },
    Variable(String),
    Unary { op: String, child: Id },
    Binary { op: String, left: Id, right: Id },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub position: Option<Position>,
}

#[derive(Debug, Clone)]
pub struct Tree {
    pub arena: Arena,
    pub root: Id,
}

/// Incremental tree construction; children are built before parents and
/// get their position stamped when attached.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    arena: Arena,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, kind: NodeKind) -> Id {
        self.arena.alloc(Node { kind, position: None })
    }

    fn stamp(&mut self, id: Id, position: Position) {
        if let Some(node) = self.arena.get_mut(id) {
            node.position = Some(position);
        }
    }

    pub fn number(&mut self, value: i64, base: u32) -> Id {
        self.alloc(NodeKind::Number { value, base })
    }

    pub fn variable(&mut self, name: impl Into<String>) -> Id {
        self.alloc(NodeKind::Variable(name.into()))
    }

    pub fn unary(&mut self, op: impl Into<String>, child: Id) -> Id {
        self.stamp(child, Position::Unary);
        self.alloc(NodeKind::Unary { op: op.into(), child })
    }

    pub fn binary(&mut self, op: impl Into<String>, left: Id, right: Id) -> Id {
        self.stamp(left, Position::Left);
        self.stamp(right, Position::Right);
        self.alloc(NodeKind::Binary {
            op: op.into(),
            left,
            right,
        })
    }

    pub fn finish(self, root: Id) -> Tree {
        Tree {
            arena: self.arena,
            root,
        }
    }
}

impl Tree {
    pub fn node(&self, id: Id) -> Result<&Node> {
        self.arena
            .get(id)
            .ok_or_else(|| Error::Evaluation("failed to get expression node from arena".into()))
    }

    pub fn root(&self) -> Result<&Node> {
        self.node(self.root)
    }

    /// Operator ids in post-order, with repetition.
    pub fn operators(&self) -> Vec<String> {
        fn walk(tree: &Tree, id: Id, out: &mut Vec<String>) {
            let Some(node) = tree.arena.get(id) else {
                return;
            };
            match &node.kind {
                NodeKind::Unary { op, child } => {
                    walk(tree, *child, out);
                    out.push(op.clone());
                }
                NodeKind::Binary { op, left, right } => {
                    walk(tree, *left, out);
                    walk(tree, *right, out);
                    out.push(op.clone());
                }
                _ => {}
            }
        }
        let mut out = Vec::new();
        walk(self, self.root, &mut out);
        out
    }

    /// Rewrites every use of operator `from` to `to`.
    pub fn replace_operator(&mut self, from: &str, to: &str) -> usize {
        let mut replaced = 0;
        for (_, node) in self.arena.iter_mut() {
            match &mut node.kind {
                NodeKind::Unary { op, .. } | NodeKind::Binary { op, .. } if op.as_str() == from => {
                    *op = to.to_string();
                    replaced += 1;
                }
                _ => {}
            }
        }
        replaced
    }

    fn to_json_impl(&self, id: Id, registry: &Registry) -> Result<Value> {
        let symbol = |op: &str| {
            registry
                .get(op)
                .map(|o| o.symbol.clone())
                .ok_or_else(|| Error::UnknownOperator(op.to_string()))
        };
        Ok(match &self.node(id)?.kind {
            NodeKind::Number { value, base } => json!({"type": "numeric_atoms", "value": value, "base": base}),
            NodeKind::Variable(name) => json!({"type": "variable", "variable": name}),
            NodeKind::Unary { op, child } => json!({
                "type": "unary",
                "operator": symbol(op)?,
                "unary_expr": self.to_json_impl(*child, registry)?,
            }),
            NodeKind::Binary { op, left, right } => json!({
                "type": "binary",
                "operator": symbol(op)?,
                "left_expr": self.to_json_impl(*left, registry)?,
                "right_expr": self.to_json_impl(*right, registry)?,
            }),
        })
    }

    /// Serialized form stored with each expression record.
    pub fn to_json(&self, registry: &Registry) -> Result<Value> {
        self.to_json_impl(self.root, registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initial;

    fn sample() -> Tree {
        let mut b = TreeBuilder::new();
        let three = b.number(3, 10);
        let x = b.variable("x");
        let neg = b.unary("3", x);
        let two = b.number(2, 2);
        let mul = b.binary("4", neg, two);
        let add = b.binary("1", three, mul);
        b.finish(add)
    }

    #[test]
    fn builder_stamps_positions() -> Result<()> {
        let tree = sample();
        let NodeKind::Binary { left, right, .. } = tree.root()?.kind else {
            panic!("expected binary root");
        };
        assert_eq!(tree.root()?.position, None);
        assert_eq!(tree.node(left)?.position, Some(Position::Left));
        assert_eq!(tree.node(right)?.position, Some(Position::Right));
        assert_eq!(tree.operators(), vec!["3", "4", "1"]);
        Ok(())
    }

    #[test]
    fn tree_serializes_with_symbols() -> Result<()> {
        let registry = initial::registry()?;
        let value = sample().to_json(&registry)?;
        assert_eq!(value["type"], "binary");
        assert_eq!(value["operator"], "+");
        assert_eq!(value["left_expr"], json!({"type": "numeric_atoms", "value": 3, "base": 10}));
        assert_eq!(value["right_expr"]["left_expr"]["unary_expr"]["variable"], "x");
        Ok(())
    }

    #[test]
    fn replace_operator_rewrites_every_use() {
        let mut tree = sample();
        assert_eq!(tree.replace_operator("4", "5"), 1);
        assert_eq!(tree.operators(), vec!["3", "5", "1"]);
    }
}
