//! Random branch conditions for generated definitions.
//!
//! A condition is one or more comparisons `operand CMP value` joined by
//! `and`/`or`, where the operand is a parameter optionally wrapped in one
//! operator application. Pairs are randomly grouped in parentheses.

use crate::error::{Error, Result};
use crate::number::CmpOp;
use crate::operator::{OperatorInfo, Shape};
use crate::registry::Registry;
use log::trace;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionSettings {
    pub comparison_ops: Vec<String>,
    pub connectors: Vec<String>,
    pub min_value: i64,
    pub max_value: i64,
    /// Weight of drawing `i + 1` comparisons per condition.
    pub count_weights: Vec<f64>,
}

impl Default for ConditionSettings {
    fn default() -> Self {
        Self {
            comparison_ops: ["==", "!=", "<", ">", "<=", ">="].map(String::from).to_vec(),
            connectors: vec!["and".into(), "or".into()],
            min_value: 0,
            max_value: 10,
            count_weights: vec![0.6, 0.3, 0.1],
        }
    }
}

impl ConditionSettings {
    pub fn validate(&self) -> Result<()> {
        if self.comparison_ops.is_empty() {
            return Err(Error::Config("no comparison operators configured".into()));
        }
        for op in &self.comparison_ops {
            if CmpOp::from_symbol(op).is_none() {
                return Err(Error::Config(format!("unknown comparison operator `{}`", op)));
            }
        }
        if let Some(c) = self.connectors.iter().find(|c| !matches!(c.as_str(), "and" | "or")) {
            return Err(Error::Config(format!("unknown logical connector `{}`", c)));
        }
        if self.min_value > self.max_value {
            return Err(Error::Config("condition value range is empty".into()));
        }
        WeightedIndex::new(&self.count_weights)
            .map_err(|e| Error::Config(format!("condition count weights: {}", e)))?;
        Ok(())
    }
}

/// Integer literal as definition text; negatives go through prefix minus.
pub fn literal(n: i64) -> String {
    if n < 0 {
        format!("(-{})", n.unsigned_abs())
    } else {
        n.to_string()
    }
}

pub struct ConditionGenerator<'a> {
    settings: &'a ConditionSettings,
    variables: Vec<String>,
    prefix: Vec<&'a OperatorInfo>,
    postfix: Vec<&'a OperatorInfo>,
    binary: Vec<&'a OperatorInfo>,
}

impl<'a> ConditionGenerator<'a> {
    /// Operands may apply any non-base operator of order at most
    /// `max_order`.
    pub fn new(registry: &'a Registry, settings: &'a ConditionSettings, variables: Vec<String>, max_order: u32) -> Self {
        let (mut prefix, mut postfix, mut binary) = registry.partition();
        for ops in [&mut prefix, &mut postfix, &mut binary] {
            ops.retain(|op| op.order <= max_order);
        }
        Self {
            settings,
            variables,
            prefix,
            postfix,
            binary,
        }
    }

    fn value<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        let (min, max) = (self.settings.min_value, self.settings.max_value.max(self.settings.min_value));
        let mid = rng.gen_range(min..=max);
        rng.gen_range(min..=mid)
    }

    fn operand<R: Rng + ?Sized>(&self, rng: &mut R, var: &str) -> String {
        let shape = [None, Some(Shape::Prefix), Some(Shape::Postfix), Some(Shape::Binary)]
            .choose(rng)
            .copied()
            .flatten();
        let pool = match shape {
            Some(Shape::Prefix) => &self.prefix,
            Some(Shape::Postfix) => &self.postfix,
            Some(Shape::Binary) => &self.binary,
            None => return var.to_string(),
        };
        match pool.choose(rng) {
            Some(op) if op.shape() == Shape::Binary => {
                format!("({} {} {})", var, op.symbol, literal(self.value(rng)))
            }
            Some(op) => format!("({})", op.surface_form(var, "")),
            None => var.to_string(),
        }
    }

    fn comparison<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<String> {
        let var = self
            .variables
            .choose(rng)
            .ok_or_else(|| Error::Generation("no variables for conditions".into()))?;
        let cmp = self
            .settings
            .comparison_ops
            .choose(rng)
            .ok_or_else(|| Error::Generation("no comparison operators".into()))?;
        let operand = self.operand(rng, var);
        Ok(format!("{} {} {}", operand, cmp, literal(self.value(rng))))
    }

    pub fn condition<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<String> {
        let count = WeightedIndex::new(&self.settings.count_weights)
            .map(|dist| dist.sample(rng) + 1)
            .unwrap_or(1);
        let mut parts = vec![self.comparison(rng)?];
        for _ in 1..count {
            let Some(connector) = self.settings.connectors.choose(rng) else {
                break;
            };
            parts.push(connector.clone());
            parts.push(self.comparison(rng)?);
            if rng.gen_bool(0.5) {
                let tail = parts.split_off(parts.len() - 3);
                parts.push(format!("({})", tail.join(" ")));
            }
        }
        let condition = parts.join(" ");
        trace!("generated condition `{}`", condition);
        Ok(condition)
    }
}
