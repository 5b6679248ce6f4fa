//! Acceptance checks a candidate must pass before the registry takes it.
//!
//! Checks run cheapest first and stop at the first failure: parameter
//! usage, pass-through detection, duplicate branch returns, duplicate body,
//! sample execution of both procedures and finally the resulting order.

use crate::codegen;
use crate::error::{Result, ValidationFailure};
use crate::interp::{Callable, Limits, Machine, ProcedureCache};
use crate::ir;
use crate::number::Number;
use crate::operator::OperatorInfo;
use crate::registry::{body_hash, Registry};
use log::debug;
use rand::Rng;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Validator {
    pub samples: usize,
    /// Sample operands are drawn from `-sample_bound..=sample_bound`.
    pub sample_bound: i64,
    pub limits: Limits,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            samples: 5,
            sample_bound: i32::MAX as i64,
            limits: Limits::default(),
        }
    }
}

fn check_arity(unit: &ir::Unit) -> std::result::Result<(), ValidationFailure> {
    let mut used = HashSet::new();
    for root in unit.compute.roots() {
        ir::visit(&unit.arena, root, &mut |_, kind| {
            if let ir::Kind::Var(slot) = kind {
                used.insert(*slot);
            }
        });
    }
    match unit.compute.params().iter().enumerate().find(|(slot, _)| !used.contains(slot)) {
        Some((_, name)) => Err(ValidationFailure::UnusedParameter(name.clone())),
        None => Ok(()),
    }
}

/// A lone `return op_x(..)` with as many arguments as the procedure has
/// parameters and no other call adds nothing over `op_x`.
fn check_pass_through(unit: &ir::Unit) -> std::result::Result<(), ValidationFailure> {
    let [ir::Stmt::Return(root)] = unit.compute.body.as_slice() else {
        return Ok(());
    };
    let mut calls = 0;
    ir::visit(&unit.arena, *root, &mut |_, kind| {
        if matches!(kind, ir::Kind::Call(..)) {
            calls += 1;
        }
    });
    let trivial = match unit.arena.get(*root).map(|n| &n.kind) {
        Some(ir::Kind::Call(ir::Callee::Operator { .. }, args)) => {
            calls == 1 && args.len() == unit.compute.arity
        }
        _ => false,
    };
    if trivial {
        Err(ValidationFailure::TrivialPassThrough)
    } else {
        Ok(())
    }
}

fn check_duplicate_returns(unit: &ir::Unit) -> Result<()> {
    let mut seen = HashSet::new();
    for root in unit.compute.returns() {
        let text = codegen::render_expr(&unit.arena, &unit.compute, root)?;
        if !seen.insert(text.clone()) {
            return Err(ValidationFailure::DuplicateReturn(text).into());
        }
    }
    Ok(())
}

fn check_duplicate_body(candidate: &OperatorInfo, registry: &Registry) -> std::result::Result<(), ValidationFailure> {
    let hash = candidate.compute_source.as_deref().and_then(body_hash);
    match hash.as_deref().and_then(|h| registry.find_duplicate_body(h)) {
        Some(existing) => Err(ValidationFailure::DuplicateBody(existing.to_string())),
        None => Ok(()),
    }
}

fn describe(args: &[Number]) -> String {
    let args: Vec<String> = args.iter().map(Number::to_string).collect();
    format!("({})", args.join(", "))
}

impl Validator {
    fn check_executable<R: Rng + ?Sized>(&self, callable: &Callable, rng: &mut R) -> std::result::Result<(), ValidationFailure> {
        let mut machine = Machine::new(self.limits);
        let bound = self.sample_bound.max(0);
        for _ in 0..self.samples {
            let args: Vec<Number> = (0..callable.arity)
                .map(|_| Number::Int(rng.gen_range(-bound..=bound)))
                .collect();
            let failure = |reason: String| ValidationFailure::NotExecutable {
                input: describe(&args),
                reason,
            };
            machine.compute(callable, &args).map_err(|e| failure(e.to_string()))?;
            match machine.count(callable, &args).map_err(|e| failure(e.to_string()))? {
                Number::Int(n) if n >= 1 => {}
                other => return Err(failure(format!("count procedure returned {}", other))),
            }
        }
        Ok(())
    }

    /// Runs every acceptance check on `candidate`, whose sources must
    /// already be rendered from `unit`. On success the candidate carries
    /// its dependencies and order and is ready for [`Registry::add`].
    pub fn validate<R: Rng + ?Sized>(
        &self,
        candidate: &mut OperatorInfo,
        unit: ir::Unit,
        registry: &Registry,
        cache: &mut ProcedureCache,
        rng: &mut R,
        requested_order: Option<u32>,
    ) -> Result<()> {
        check_arity(&unit)?;
        check_pass_through(&unit)?;
        check_duplicate_returns(&unit)?;
        check_duplicate_body(candidate, registry)?;

        candidate.dependencies = unit.callees();
        let callable = cache.link(registry, &candidate.id, unit)?;
        self.check_executable(&callable, rng)?;

        let order = registry.calculate_order(candidate)?;
        if let Some(expected) = requested_order {
            if order != expected {
                return Err(ValidationFailure::OrderMismatch { expected, actual: order }.into());
            }
        }
        candidate.order = order;
        debug!("candidate {} `{}` passed validation at order {}", candidate.id, candidate.symbol, order);
        Ok(())
    }
}
