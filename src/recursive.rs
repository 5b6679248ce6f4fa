//! Loop-based operators built directly as procedures.
//!
//! The new operator seeds an accumulator, then applies a callee one order
//! below `abs(loop)` times, negating each step when the loop operand is
//! negative. From order 3 on, loop operands above an order-specific cap
//! yield NaN instead of running.

use crate::error::{Error, Result};
use crate::ir::{self, Builtin, Callee, Kind, Stmt};
use crate::number::{CmpOp, Number};
use crate::operator::{compute_name, count_name, OperatorInfo};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

const PARAMS: [&str; 2] = ["a", "b"];
const RESULT: usize = 2;
const TEMP: usize = 3;
const COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Result,
    Param(usize),
}

/// Initial accumulator value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seed {
    Param(usize),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub callee: String,
    pub callee_arity: usize,
    /// Parameter index driving the loop.
    pub loop_param: usize,
    pub seed: Seed,
    /// Callee operands; only the first is used for unary callees.
    pub operands: (Operand, Operand),
    pub cap: Option<i64>,
}

/// Operand orders a binary callee may be applied with.
pub const OPERAND_ORDERS: [(Operand, Operand); 5] = [
    (Operand::Result, Operand::Result),
    (Operand::Result, Operand::Param(0)),
    (Operand::Result, Operand::Param(1)),
    (Operand::Param(0), Operand::Result),
    (Operand::Param(1), Operand::Result),
];

/// Iteration cap for a given order; none below order 3.
pub fn iteration_cap(order: u32, caps: &BTreeMap<u32, i64>, threshold: i64) -> Option<i64> {
    if order < 3 {
        return None;
    }
    Some(caps.get(&order).copied().unwrap_or(threshold))
}

impl Template {
    pub fn random<R: Rng + ?Sized>(
        rng: &mut R,
        callee: &OperatorInfo,
        order: u32,
        caps: &BTreeMap<u32, i64>,
        threshold: i64,
        seed_range: (i64, i64),
    ) -> Self {
        let seed = match rng.gen_range(0..3) {
            0 => Seed::Param(0),
            1 => Seed::Param(1),
            _ => Seed::Int(rng.gen_range(seed_range.0..=seed_range.1)),
        };
        let operands = if callee.is_binary() {
            *OPERAND_ORDERS
                .choose(rng)
                .unwrap_or(&(Operand::Result, Operand::Result))
        } else {
            (Operand::Result, Operand::Result)
        };
        Self {
            callee: callee.id.clone(),
            callee_arity: callee.arity as usize,
            loop_param: rng.gen_range(0..2),
            seed,
            operands,
            cap: iteration_cap(order, caps, threshold),
        }
    }
}

struct Builder {
    arena: ir::Arena,
}

impl Builder {
    fn node(&mut self, kind: Kind) -> ir::Id {
        self.arena.alloc(ir::Node { kind })
    }

    fn int(&mut self, n: i64) -> ir::Id {
        self.node(Kind::Value(Number::Int(n)))
    }

    fn var(&mut self, slot: usize) -> ir::Id {
        self.node(Kind::Var(slot))
    }

    fn builtin(&mut self, builtin: Builtin, args: Vec<ir::Id>) -> ir::Id {
        self.node(Kind::Call(Callee::Builtin(builtin), args))
    }

    fn operand(&mut self, operand: Operand) -> ir::Id {
        match operand {
            Operand::Result => self.var(RESULT),
            Operand::Param(p) => self.var(p),
        }
    }

    fn callee_args(&mut self, template: &Template) -> Vec<ir::Id> {
        let first = self.operand(template.operands.0);
        if template.callee_arity == 1 {
            vec![first]
        } else {
            vec![first, self.operand(template.operands.1)]
        }
    }

    /// `is_special(L) or abs(L) > cap`
    fn guard(&mut self, template: &Template) -> ir::Id {
        let lp = self.var(template.loop_param);
        let special = self.builtin(Builtin::IsSpecial, vec![lp]);
        match template.cap {
            None => special,
            Some(cap) => {
                let lp = self.var(template.loop_param);
                let magnitude = self.builtin(Builtin::Abs, vec![lp]);
                let cap = self.int(cap);
                let over = self.node(Kind::Compare(CmpOp::Gt, magnitude, cap));
                self.node(Kind::Or(special, over))
            }
        }
    }

    fn seed(&mut self, template: &Template) -> ir::Id {
        match template.seed {
            Seed::Param(p) => self.var(p),
            Seed::Int(n) => self.int(n),
        }
    }

    /// Loop body shared by both procedures; `count` adds the accumulation
    /// of callee operation counts.
    fn body(&mut self, template: &Template, count: bool) -> Vec<Stmt> {
        let args = self.callee_args(template);
        let call = self.node(Kind::Call(Callee::compute(template.callee.clone()), args));
        let saturated = self.builtin(Builtin::Sat, vec![call]);
        let mut body = vec![Stmt::Let(TEMP, saturated)];
        if count {
            let args = self.callee_args(template);
            let cost = self.node(Kind::Call(Callee::count(template.callee.clone()), args));
            let acc = self.var(COUNT);
            let sum = self.node(Kind::Sum(acc, cost));
            body.push(Stmt::Assign(COUNT, sum));
        }
        let lp = self.var(template.loop_param);
        let zero = self.int(0);
        let positive = self.node(Kind::Compare(CmpOp::Gt, lp, zero));
        let temp = self.var(TEMP);
        let temp_neg = self.var(TEMP);
        let negated = self.builtin(Builtin::Neg, vec![temp_neg]);
        body.push(Stmt::If {
            arms: vec![(positive, vec![Stmt::Assign(RESULT, temp)])],
            otherwise: Some(vec![Stmt::Assign(RESULT, negated)]),
        });
        body
    }

    fn procedure(&mut self, id: &str, template: &Template, count: bool) -> ir::Procedure {
        let guard = self.guard(template);
        let bail = if count {
            self.int(1)
        } else {
            self.node(Kind::Value(Number::NaN))
        };
        let seed = self.seed(template);
        let mut stmts = vec![
            Stmt::If {
                arms: vec![(guard, vec![Stmt::Return(bail)])],
                otherwise: None,
            },
            Stmt::Let(RESULT, seed),
        ];
        let mut locals: Vec<String> = PARAMS.iter().map(|p| p.to_string()).collect();
        locals.push("result".into());
        locals.push("temp".into());
        if count {
            let zero = self.int(0);
            stmts.push(Stmt::Let(COUNT, zero));
            locals.push("count".into());
        }
        let lp = self.var(template.loop_param);
        let times = self.builtin(Builtin::Abs, vec![lp]);
        let body = self.body(template, count);
        stmts.push(Stmt::Repeat { times, body });
        let ret = if count {
            let acc = self.var(COUNT);
            let one = self.int(1);
            self.builtin(Builtin::Max, vec![acc, one])
        } else {
            self.var(RESULT)
        };
        stmts.push(Stmt::Return(ret));
        ir::Procedure {
            name: if count { count_name(id) } else { compute_name(id) },
            locals,
            arity: PARAMS.len(),
            body: stmts,
        }
    }
}

/// Builds the compute and count procedures of a new binary loop operator.
pub fn build(id: &str, template: &Template) -> Result<ir::Unit> {
    if !(1..=2).contains(&template.callee_arity) {
        return Err(Error::Generation(format!(
            "callee {} has arity {}",
            template.callee, template.callee_arity
        )));
    }
    let mut builder = Builder { arena: ir::Arena::new() };
    let compute = builder.procedure(id, template, false);
    let count = builder.procedure(id, template, true);
    Ok(ir::Unit {
        arena: builder.arena,
        compute,
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen;
    use crate::initial;
    use crate::interp::{Limits, Machine, ProcedureCache};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn template(callee: &str, arity: usize, loop_param: usize, seed: Seed, operands: (Operand, Operand), cap: Option<i64>) -> Template {
        Template {
            callee: callee.into(),
            callee_arity: arity,
            loop_param,
            seed,
            operands,
            cap,
        }
    }

    #[test]
    fn template_should_render_capped_loop() -> Result<()> {
        let t = template("4", 2, 1, Seed::Int(-3), (Operand::Result, Operand::Param(0)), Some(1000));
        let (compute, count) = codegen::render_unit(&build("z", &t)?)?;
        assert_eq!(
            compute,
            "fn op_z(a, b) {\n    if is_special(b) or abs(b) > 1000 {\n        return NaN;\n    }\n    let result = -3;\n    repeat abs(b) {\n        let temp = sat(op_4(result, a));\n        if b > 0 {\n            result = temp;\n        } else {\n            result = neg(temp);\n        }\n    }\n    return result;\n}\n"
        );
        assert!(count.contains("        count = count + op_count_4(result, a);\n"));
        assert!(count.ends_with("    return max(count, 1);\n}\n"));
        Ok(())
    }

    #[test]
    fn loop_operator_should_iterate_callee() -> Result<()> {
        let reg = initial::registry()?;
        // result = a * a^b for non-negative b
        let t = template("4", 2, 1, Seed::Param(0), (Operand::Result, Operand::Param(0)), None);
        let callable = ProcedureCache::new().link(&reg, "pow", build("pow", &t)?)?;
        let mut machine = Machine::new(Limits::default());
        let args = [Number::Int(2), Number::Int(3)];
        assert_eq!(machine.compute(&callable, &args)?, Number::Int(16));
        assert_eq!(machine.count(&callable, &args)?, Number::Int(2 + 2 + 2));
        assert_eq!(machine.compute(&callable, &[Number::Int(2), Number::Int(0)])?, Number::Int(2));
        assert_eq!(machine.count(&callable, &[Number::Int(2), Number::Int(0)])?, Number::Int(1));
        assert_eq!(machine.compute(&callable, &[Number::Int(2), Number::NaN])?, Number::NaN);
        Ok(())
    }

    #[test]
    fn negative_loop_operand_negates_each_step() -> Result<()> {
        let reg = initial::registry()?;
        let t = template("3", 1, 0, Seed::Param(1), (Operand::Result, Operand::Result), Some(100));
        let callable = ProcedureCache::new().link(&reg, "flip", build("flip", &t)?)?;
        let mut machine = Machine::new(Limits::default());
        // each step: temp = -result, result = -temp = result
        assert_eq!(machine.compute(&callable, &[Number::Int(-3), Number::Int(5)])?, Number::Int(5));
        assert_eq!(machine.compute(&callable, &[Number::Int(3), Number::Int(5)])?, Number::Int(-5));
        assert_eq!(machine.compute(&callable, &[Number::Int(101), Number::Int(5)])?, Number::NaN);
        assert_eq!(machine.count(&callable, &[Number::Int(101), Number::Int(5)])?, Number::Int(1));
        Ok(())
    }

    #[test]
    fn random_templates_respect_callee_arity_and_caps() -> Result<()> {
        let reg = initial::registry()?;
        let caps: BTreeMap<u32, i64> = [(3, 1_000_000), (4, 1000)].into_iter().collect();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let neg = reg.get("3").ok_or_else(|| Error::UnknownOperator("3".into()))?;
        let mul = reg.get("4").ok_or_else(|| Error::UnknownOperator("4".into()))?;
        for _ in 0..32 {
            let t = Template::random(&mut rng, mul, 3, &caps, 99, (-100, 100));
            assert_eq!(t.cap, Some(1_000_000));
            assert!(OPERAND_ORDERS.contains(&t.operands));
            if let Seed::Int(n) = t.seed {
                assert!((-100..=100).contains(&n));
            }
            let t = Template::random(&mut rng, neg, 2, &caps, 99, (-100, 100));
            assert_eq!(t.cap, None);
            assert_eq!(t.callee_arity, 1);
        }
        assert_eq!(iteration_cap(6, &caps, 99), Some(99));
        Ok(())
    }
}
