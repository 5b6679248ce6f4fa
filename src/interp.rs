//! Interpreter for compiled procedures.
//!
//! A [`Callable`] owns one operator's compute and count procedures with
//! every operator call site already linked to the callee's `Callable`, so
//! dispatch is an index into `targets` rather than a lookup by name.

use crate::error::{Error, Result};
use crate::ir;
use crate::number::Number;
use crate::procedure;
use crate::registry::Registry;
use log::trace;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEADLINE_CHECK_INTERVAL: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Compute,
    Count,
}

#[derive(Debug)]
pub struct Callable {
    pub id: String,
    pub arity: usize,
    unit: ir::Unit,
    /// Linked callee per arena node index; `None` for non-call nodes.
    targets: Vec<Option<Arc<Callable>>>,
}

impl Callable {
    pub fn unit(&self) -> &ir::Unit {
        &self.unit
    }

    fn procedure(&self, mode: Mode) -> &ir::Procedure {
        match mode {
            Mode::Compute => &self.unit.compute,
            Mode::Count => &self.unit.count,
        }
    }
}

/// Runtime limits applied to every top-level call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub threshold: i64,
    pub max_steps: u64,
    pub timeout: Option<Duration>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            threshold: i32::MAX as i64,
            max_steps: 50_000_000,
            timeout: None,
        }
    }
}

enum Flow {
    Next,
    Return(Number),
}

pub struct Machine {
    limits: Limits,
    steps: u64,
    deadline: Option<Instant>,
    name: String,
}

impl Machine {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            steps: 0,
            deadline: None,
            name: String::new(),
        }
    }

    pub fn threshold(&self) -> i64 {
        self.limits.threshold
    }

    fn start(&mut self, callable: &Callable, mode: Mode) {
        self.steps = 0;
        self.deadline = self.limits.timeout.map(|t| Instant::now() + t);
        self.name = callable.procedure(mode).name.clone();
    }

    pub fn compute(&mut self, callable: &Callable, args: &[Number]) -> Result<Number> {
        self.start(callable, Mode::Compute);
        self.invoke(callable, Mode::Compute, args)
    }

    pub fn count(&mut self, callable: &Callable, args: &[Number]) -> Result<Number> {
        self.start(callable, Mode::Count);
        self.invoke(callable, Mode::Count, args)
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(Error::BudgetExhausted(self.name.clone()));
        }
        if self.steps % DEADLINE_CHECK_INTERVAL == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() > deadline {
                    return Err(Error::BudgetExhausted(self.name.clone()));
                }
            }
        }
        Ok(())
    }

    fn invoke(&mut self, callable: &Callable, mode: Mode, args: &[Number]) -> Result<Number> {
        let procedure = callable.procedure(mode);
        if args.len() != procedure.arity {
            return Err(Error::Evaluation(format!(
                "{} expects {} argument(s), got {}",
                procedure.name,
                procedure.arity,
                args.len()
            )));
        }
        let mut locals = vec![Number::NaN; procedure.locals.len()];
        locals[..args.len()].copy_from_slice(args);
        let result = match self.exec_block(callable, &procedure.body, &mut locals)? {
            Flow::Return(v) => v,
            Flow::Next => {
                return Err(Error::Evaluation(format!("{} finished without returning", procedure.name)))
            }
        };
        Ok(match mode {
            Mode::Compute => result.clamp(self.limits.threshold),
            Mode::Count => result,
        })
    }

    fn exec_block(&mut self, callable: &Callable, stmts: &[ir::Stmt], locals: &mut [Number]) -> Result<Flow> {
        for stmt in stmts {
            self.tick()?;
            match stmt {
                ir::Stmt::Let(slot, e) | ir::Stmt::Assign(slot, e) => {
                    let value = self.eval(callable, *e, locals)?;
                    let cell = locals
                        .get_mut(*slot)
                        .ok_or_else(|| Error::Evaluation(format!("local slot {} is not declared", slot)))?;
                    *cell = value;
                }
                ir::Stmt::Return(e) => return Ok(Flow::Return(self.eval(callable, *e, locals)?)),
                ir::Stmt::If { arms, otherwise } => {
                    let mut taken = None;
                    for (cond, body) in arms {
                        if self.eval(callable, *cond, locals)?.is_truthy() {
                            taken = Some(body);
                            break;
                        }
                    }
                    if let Some(body) = taken.or(otherwise.as_ref()) {
                        if let Flow::Return(v) = self.exec_block(callable, body, locals)? {
                            return Ok(Flow::Return(v));
                        }
                    }
                }
                ir::Stmt::Repeat { times, body } => {
                    let times = match self.eval(callable, *times, locals)? {
                        Number::Int(n) if n >= 0 => n as u64,
                        other => {
                            return Err(Error::Evaluation(format!("cannot repeat {} times", other)));
                        }
                    };
                    for _ in 0..times {
                        if let Flow::Return(v) = self.exec_block(callable, body, locals)? {
                            return Ok(Flow::Return(v));
                        }
                    }
                }
            }
        }
        Ok(Flow::Next)
    }

    fn eval(&mut self, callable: &Callable, id: ir::Id, locals: &[Number]) -> Result<Number> {
        self.tick()?;
        let kind = &callable
            .unit
            .arena
            .get(id)
            .ok_or_else(|| Error::Evaluation("failed to get ir from arena".into()))?
            .kind;
        let threshold = self.limits.threshold;
        let flag = |b: bool| Number::Int(b as i64);
        match kind {
            ir::Kind::Value(v) => Ok(*v),
            ir::Kind::Var(slot) => locals
                .get(*slot)
                .copied()
                .ok_or_else(|| Error::Evaluation(format!("local slot {} is not declared", slot))),
            ir::Kind::Compare(op, lhs, rhs) => {
                let lhs = self.eval(callable, *lhs, locals)?;
                let rhs = self.eval(callable, *rhs, locals)?;
                Ok(flag(lhs.compare(*op, rhs)))
            }
            ir::Kind::And(lhs, rhs) => {
                let v = self.eval(callable, *lhs, locals)?.is_truthy() && self.eval(callable, *rhs, locals)?.is_truthy();
                Ok(flag(v))
            }
            ir::Kind::Or(lhs, rhs) => {
                let v = self.eval(callable, *lhs, locals)?.is_truthy() || self.eval(callable, *rhs, locals)?.is_truthy();
                Ok(flag(v))
            }
            ir::Kind::Not(e) => Ok(flag(!self.eval(callable, *e, locals)?.is_truthy())),
            ir::Kind::Sum(lhs, rhs) => {
                let lhs = self.eval(callable, *lhs, locals)?;
                let rhs = self.eval(callable, *rhs, locals)?;
                Ok(lhs.count_add(rhs))
            }
            ir::Kind::Call(callee, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(callable, *arg, locals)?);
                }
                match callee {
                    ir::Callee::Builtin(b) => Ok(apply_builtin(*b, &values, threshold)),
                    ir::Callee::Operator { id: name, count } => {
                        let target = callable
                            .targets
                            .get(id.index())
                            .and_then(Option::as_ref)
                            .ok_or_else(|| Error::Evaluation(format!("call to op_{} is not linked", name)))?;
                        let mode = if *count { Mode::Count } else { Mode::Compute };
                        self.invoke(target, mode, &values)
                    }
                }
            }
        }
    }
}

fn apply_builtin(builtin: ir::Builtin, args: &[Number], threshold: i64) -> Number {
    let a = args.first().copied().unwrap_or(Number::NaN);
    let b = args.get(1).copied().unwrap_or(Number::NaN);
    let flag = |v: bool| Number::Int(v as i64);
    match builtin {
        ir::Builtin::Add => a.add(b, threshold),
        ir::Builtin::Sub => a.sub(b, threshold),
        ir::Builtin::Neg => a.neg(threshold),
        ir::Builtin::Mul => a.mul(b, threshold),
        ir::Builtin::FloorDiv => a.floor_div(b),
        ir::Builtin::FloorMod => a.floor_mod(b),
        ir::Builtin::Sat => a.clamp(threshold),
        ir::Builtin::Abs => a.abs(),
        ir::Builtin::Min => a.min(b),
        ir::Builtin::Max => a.max(b),
        ir::Builtin::IsNaN => flag(a.is_nan()),
        ir::Builtin::IsInf => flag(a.is_infinite()),
        ir::Builtin::IsSpecial => flag(a.is_special()),
    }
}

/// Per-worker cache of linked callables, keyed by operator id and checked
/// against the registry revision of that id.
#[derive(Debug, Default)]
pub struct ProcedureCache {
    entries: HashMap<String, (u64, Arc<Callable>)>,
}

impl ProcedureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn invalidate(&mut self, id: &str) {
        self.entries.remove(id);
    }

    /// Drops every entry whose operator changed or disappeared.
    pub fn retain_current(&mut self, registry: &Registry) {
        self.entries
            .retain(|id, (revision, _)| registry.revision(id) == Some(*revision));
    }

    pub fn load(&mut self, registry: &Registry, id: &str) -> Result<Arc<Callable>> {
        let revision = registry
            .revision(id)
            .ok_or_else(|| Error::UnknownOperator(id.to_string()))?;
        if let Some((cached, callable)) = self.entries.get(id) {
            if *cached == revision {
                return Ok(Arc::clone(callable));
            }
        }
        let op = registry
            .get(id)
            .ok_or_else(|| Error::UnknownOperator(id.to_string()))?;
        let (Some(compute), Some(count)) = (op.compute_source.as_deref(), op.count_source.as_deref()) else {
            return Err(Error::Evaluation(format!("operator {} has no procedures", id)));
        };
        trace!("compiling procedures of operator {}", id);
        let unit = procedure::compile_unit(compute, count)?;
        let callable = Arc::new(self.link(registry, id, unit)?);
        self.entries
            .insert(id.to_string(), (revision, Arc::clone(&callable)));
        Ok(callable)
    }

    /// Links a unit against the registry without caching it. Used for
    /// candidates that are not registered yet.
    pub fn link(&mut self, registry: &Registry, id: &str, unit: ir::Unit) -> Result<Callable> {
        let mut targets = vec![None; unit.arena.len()];
        for (node_id, node) in unit.arena.iter() {
            let ir::Kind::Call(ir::Callee::Operator { id: callee, .. }, args) = &node.kind else {
                continue;
            };
            if callee == id {
                return Err(Error::Compile(format!("op_{} calls itself", id)));
            }
            let target = self.load(registry, callee).map_err(|e| match e {
                Error::UnknownOperator(dependency) => Error::DependencyMissing {
                    operator: id.to_string(),
                    dependency,
                },
                other => other,
            })?;
            if target.arity != args.len() {
                return Err(Error::Compile(format!(
                    "op_{} takes {} argument(s) but is called with {}",
                    callee,
                    target.arity,
                    args.len()
                )));
            }
            targets[node_id.index()] = Some(target);
        }
        Ok(Callable {
            id: id.to_string(),
            arity: unit.compute.arity,
            unit,
            targets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initial;

    fn run(registry: &Registry, id: &str, args: &[i64]) -> Result<(Number, Number)> {
        let mut cache = ProcedureCache::new();
        let callable = cache.load(registry, id)?;
        let args: Vec<Number> = args.iter().map(|a| Number::Int(*a)).collect();
        let mut machine = Machine::new(Limits::default());
        Ok((machine.compute(&callable, &args)?, machine.count(&callable, &args)?))
    }

    #[test]
    fn initial_operators_should_compute_and_count() -> Result<()> {
        let reg = initial::registry()?;
        assert_eq!(run(&reg, "1", &[3, 4])?, (Number::Int(7), Number::Int(1)));
        assert_eq!(run(&reg, "3", &[5])?, (Number::Int(-5), Number::Int(1)));
        assert_eq!(run(&reg, "4", &[6, -3])?, (Number::Int(-18), Number::Int(3)));
        assert_eq!(run(&reg, "5", &[-7, 2])?, (Number::Int(-4), Number::Int(3)));
        assert_eq!(run(&reg, "6", &[7, 0])?, (Number::NaN, Number::Int(1)));
        assert_eq!(run(&reg, "4", &[0, 9])?.1, Number::Int(1));
        Ok(())
    }

    #[test]
    fn compute_results_saturate_at_threshold() -> Result<()> {
        let reg = initial::registry()?;
        let mut cache = ProcedureCache::new();
        let mul = cache.load(&reg, "4")?;
        let mut machine = Machine::new(Limits {
            threshold: 100,
            ..Limits::default()
        });
        assert_eq!(machine.compute(&mul, &[Number::Int(11), Number::Int(-10)])?, Number::NegInf);
        assert_eq!(machine.compute(&mul, &[Number::Int(10), Number::Int(10)])?, Number::Int(100));
        assert_eq!(machine.compute(&mul, &[Number::NaN, Number::Int(10)])?, Number::NaN);
        Ok(())
    }

    #[test]
    fn runaway_loops_exhaust_the_budget() -> Result<()> {
        let reg = initial::registry()?;
        let unit = procedure::compile_unit(
            "fn op_spin(a) {\n    let r = 0;\n    repeat abs(a) {\n        r = op_1(r, 1);\n    }\n    return r;\n}\n",
            "fn op_count_spin(a) {\n    return 1;\n}\n",
        )?;
        let callable = ProcedureCache::new().link(&reg, "spin", unit)?;
        let mut machine = Machine::new(Limits {
            max_steps: 1000,
            ..Limits::default()
        });
        assert_eq!(machine.compute(&callable, &[Number::Int(10)])?, Number::Int(10));
        assert!(matches!(
            machine.compute(&callable, &[Number::Int(1_000_000)]),
            Err(Error::BudgetExhausted(_))
        ));
        Ok(())
    }

    #[test]
    fn cache_reuses_and_refreshes_entries() -> Result<()> {
        let mut reg = initial::registry()?;
        let mut cache = ProcedureCache::new();
        let first = cache.load(&reg, "4")?;
        assert!(Arc::ptr_eq(&first, &cache.load(&reg, "4")?));
        assert_eq!(cache.len(), 1);
        reg.remove("1")?;
        cache.retain_current(&reg);
        assert!(cache.is_empty());
        assert!(matches!(cache.load(&reg, "4"), Err(Error::UnknownOperator(_))));
        Ok(())
    }

    #[test]
    fn linking_rejects_missing_dependencies() -> Result<()> {
        let reg = initial::registry()?;
        let unit = procedure::compile_unit(
            "fn op_x(a) {\n    return op_zz(a);\n}\n",
            "fn op_count_x(a) {\n    return 1;\n}\n",
        )?;
        assert!(matches!(
            ProcedureCache::new().link(&reg, "x", unit),
            Err(Error::DependencyMissing { .. })
        ));
        Ok(())
    }
}
