//! Stochastic expression-tree generation.

use crate::error::{Error, Result};
use crate::expr::{Id, Tree, TreeBuilder};
use crate::operator::{OperatorInfo, Shape};
use crate::registry::Registry;
use log::{debug, trace};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeWeights {
    pub binary: f64,
    pub unary_prefix: f64,
    pub unary_postfix: f64,
    pub atoms: f64,
}

impl Default for NodeWeights {
    fn default() -> Self {
        Self {
            binary: 0.5,
            unary_prefix: 0.15,
            unary_postfix: 0.15,
            atoms: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtomWeights {
    pub variable: f64,
    pub number: f64,
}

impl Default for AtomWeights {
    fn default() -> Self {
        Self {
            variable: 0.5,
            number: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomChoice {
    Variable,
    Number,
    VariableAndNumber,
}

/// Literal base selection; `random` draws a base per literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseChoice {
    pub random: bool,
    pub base: u32,
}

impl Default for BaseChoice {
    fn default() -> Self {
        Self { random: false, base: 10 }
    }
}

impl BaseChoice {
    pub fn fixed(&self) -> Option<u32> {
        (!self.random).then_some(self.base)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionSettings {
    pub variables: Vec<String>,
    pub min_value: i64,
    pub max_value: i64,
    pub max_depth: usize,
    pub node_weights: NodeWeights,
    pub atom_weights: AtomWeights,
    pub base: BaseChoice,
    /// Weight operator selection by `OperatorInfo::weight`.
    pub operator_weights: bool,
    pub max_attempts: usize,
}

impl Default for ExpressionSettings {
    fn default() -> Self {
        Self {
            variables: vec!["x".into(), "y".into()],
            min_value: 0,
            max_value: 100,
            max_depth: 3,
            node_weights: NodeWeights::default(),
            atom_weights: AtomWeights::default(),
            base: BaseChoice::default(),
            operator_weights: false,
            max_attempts: 1000,
        }
    }
}

#[derive(Clone, Copy)]
enum NodeType {
    Binary,
    Prefix,
    Postfix,
    Atom,
}

pub struct ExpressionGenerator<'a> {
    settings: &'a ExpressionSettings,
    max_base: u32,
    variables: Vec<String>,
    prefix: Vec<&'a OperatorInfo>,
    postfix: Vec<&'a OperatorInfo>,
    binary: Vec<&'a OperatorInfo>,
}

impl<'a> ExpressionGenerator<'a> {
    pub fn new(registry: &'a Registry, settings: &'a ExpressionSettings, max_base: u32) -> Self {
        let (prefix, postfix, binary) = registry.partition();
        Self {
            settings,
            max_base,
            variables: settings.variables.clone(),
            prefix,
            postfix,
            binary,
        }
    }

    /// Restricts operator choice to orders up to `order`.
    pub fn with_max_order(mut self, order: u32) -> Self {
        for ops in [&mut self.prefix, &mut self.postfix, &mut self.binary] {
            ops.retain(|op| op.order <= order);
        }
        self
    }

    pub fn with_variables(mut self, variables: Vec<String>) -> Self {
        self.variables = variables;
        self
    }

    fn value<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        let (min, max) = (self.settings.min_value, self.settings.max_value.max(self.settings.min_value));
        let mid = rng.gen_range(min..=max);
        rng.gen_range(min..=mid)
    }

    fn base<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        match self.settings.base.fixed() {
            Some(base) => base,
            None => rng.gen_range(2..=self.max_base.max(2)),
        }
    }

    fn number<R: Rng + ?Sized>(&self, rng: &mut R, b: &mut TreeBuilder) -> Id {
        let value = self.value(rng);
        let base = self.base(rng);
        b.number(value, base)
    }

    fn variable<R: Rng + ?Sized>(&self, rng: &mut R, b: &mut TreeBuilder) -> Result<Id> {
        let name = self
            .variables
            .choose(rng)
            .ok_or_else(|| Error::Generation("no variables to draw from".into()))?;
        Ok(b.variable(name.clone()))
    }

    fn atom<R: Rng + ?Sized>(&self, rng: &mut R, b: &mut TreeBuilder, choice: AtomChoice) -> Result<Id> {
        match choice {
            AtomChoice::Variable => self.variable(rng, b),
            AtomChoice::Number => Ok(self.number(rng, b)),
            AtomChoice::VariableAndNumber => {
                let w = self.settings.atom_weights;
                let variable = match WeightedIndex::new([w.variable, w.number]) {
                    Ok(dist) => dist.sample(rng) == 0,
                    Err(_) => rng.gen_bool(0.5),
                };
                if variable {
                    self.variable(rng, b)
                } else {
                    Ok(self.number(rng, b))
                }
            }
        }
    }

    fn pick<R: Rng + ?Sized>(&self, rng: &mut R, ops: &[&'a OperatorInfo]) -> Option<&'a OperatorInfo> {
        if self.settings.operator_weights {
            if let Ok(dist) = WeightedIndex::new(ops.iter().map(|op| op.weight.max(0.0))) {
                return ops.get(dist.sample(rng)).copied();
            }
        }
        ops.choose(rng).copied()
    }

    /// Node type by weight over the categories that have operators; an
    /// empty category is never drawn.
    fn node_type<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<NodeType> {
        let w = self.settings.node_weights;
        let candidates = [
            (NodeType::Binary, w.binary, !self.binary.is_empty()),
            (NodeType::Prefix, w.unary_prefix, !self.prefix.is_empty()),
            (NodeType::Postfix, w.unary_postfix, !self.postfix.is_empty()),
            (NodeType::Atom, w.atoms, true),
        ];
        let weights = candidates.iter().map(|(_, w, ok)| if *ok { w.max(0.0) } else { 0.0 });
        let dist = WeightedIndex::new(weights)
            .map_err(|e| Error::Generation(format!("unusable node weights: {}", e)))?;
        Ok(candidates[dist.sample(rng)].0)
    }

    fn apply<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        b: &mut TreeBuilder,
        op: &OperatorInfo,
        depth: usize,
        max_depth: usize,
        choice: AtomChoice,
        fixed: Option<&OperatorInfo>,
    ) -> Result<Id> {
        match op.shape() {
            Shape::Binary => {
                let left = self.node(rng, b, depth + 1, max_depth, choice, fixed)?;
                let right = self.node(rng, b, depth + 1, max_depth, choice, fixed)?;
                Ok(b.binary(op.id.clone(), left, right))
            }
            _ => {
                let child = self.node(rng, b, depth + 1, max_depth, choice, fixed)?;
                Ok(b.unary(op.id.clone(), child))
            }
        }
    }

    fn node<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        b: &mut TreeBuilder,
        depth: usize,
        max_depth: usize,
        choice: AtomChoice,
        fixed: Option<&OperatorInfo>,
    ) -> Result<Id> {
        if depth >= max_depth {
            return self.atom(rng, b, choice);
        }
        if let Some(op) = fixed {
            return if rng.gen_bool(0.5) {
                self.atom(rng, b, choice)
            } else {
                self.apply(rng, b, op, depth, max_depth, choice, fixed)
            };
        }
        let pool = match self.node_type(rng)? {
            NodeType::Atom => return self.atom(rng, b, choice),
            NodeType::Binary => &self.binary,
            NodeType::Prefix => &self.prefix,
            NodeType::Postfix => &self.postfix,
        };
        let op = self
            .pick(rng, pool)
            .ok_or_else(|| Error::Generation("operator pool emptied during generation".into()))?;
        self.apply(rng, b, op, depth, max_depth, choice, None)
    }

    pub fn tree<R: Rng + ?Sized>(&self, rng: &mut R, max_depth: usize, choice: AtomChoice) -> Result<Tree> {
        let mut b = TreeBuilder::new();
        let root = self.node(rng, &mut b, 0, max_depth, choice, None)?;
        Ok(b.finish(root))
    }

    /// Every operator node in the tree applies `op`.
    pub fn fixed_operator_tree<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        op: &OperatorInfo,
        max_depth: usize,
        choice: AtomChoice,
    ) -> Result<Tree> {
        let mut b = TreeBuilder::new();
        let root = self.node(rng, &mut b, 0, max_depth, choice, Some(op))?;
        Ok(b.finish(root))
    }

    /// `op` applied once to random literals.
    pub fn single_operator_tree<R: Rng + ?Sized>(&self, rng: &mut R, op: &OperatorInfo) -> Tree {
        let mut b = TreeBuilder::new();
        let root = match op.shape() {
            Shape::Binary => {
                let left = self.number(rng, &mut b);
                let right = self.number(rng, &mut b);
                b.binary(op.id.clone(), left, right)
            }
            _ => {
                let child = self.number(rng, &mut b);
                b.unary(op.id.clone(), child)
            }
        };
        b.finish(root)
    }

    /// Builds `branches` trees from operators of order at most `order` and
    /// rewrites one used operator, in all of them, to an operator of exactly
    /// `order` with the same arity.
    pub fn order_matched<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        max_depth: usize,
        choice: AtomChoice,
        order: u32,
        branches: usize,
    ) -> Result<Vec<Tree>> {
        let targets: Vec<&OperatorInfo> = self
            .binary
            .iter()
            .chain(&self.prefix)
            .chain(&self.postfix)
            .copied()
            .filter(|op| op.order == order)
            .collect();
        let target = targets
            .choose(rng)
            .copied()
            .ok_or_else(|| Error::Generation(format!("no operator of order {}", order)))?;

        let restricted = Self {
            settings: self.settings,
            max_base: self.max_base,
            variables: self.variables.clone(),
            prefix: self.prefix.clone(),
            postfix: self.postfix.clone(),
            binary: self.binary.clone(),
        }
        .with_max_order(order);
        let arity_of = |id: &str| {
            restricted
                .binary
                .iter()
                .chain(&restricted.prefix)
                .chain(&restricted.postfix)
                .find(|op| op.id == id)
                .map(|op| op.arity)
        };

        for attempt in 0..self.settings.max_attempts.max(1) {
            let mut trees = (0..branches.max(1))
                .map(|_| restricted.tree(rng, max_depth, choice))
                .collect::<Result<Vec<_>>>()?;
            let mut used: Vec<String> = trees.iter().flat_map(Tree::operators).collect();
            used.sort();
            used.dedup();
            let candidates: Vec<&String> = used
                .iter()
                .filter(|id| arity_of(id) == Some(target.arity))
                .collect();
            let Some(replaced) = candidates.choose(rng) else {
                trace!("order-matched attempt {} used no operator of arity {}", attempt, target.arity);
                continue;
            };
            for tree in trees.iter_mut() {
                tree.replace_operator(replaced, &target.id);
            }
            debug!(
                "order-matched {} tree(s) by rewriting {} to {} (order {})",
                trees.len(),
                replaced,
                target.id,
                order
            );
            return Ok(trees);
        }
        Err(Error::Generation(format!(
            "no tree used an operator of arity {} in {} attempts",
            target.arity, self.settings.max_attempts
        )))
    }
}
