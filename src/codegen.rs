//! Renders procedures to source text. The output is what the operator store
//! keeps and what [`crate::procedure`] compiles back.

use crate::error::{Error, Result};
use crate::ir;
use crate::number::Number;

const INDENT: &str = "    ";

fn precedence(kind: &ir::Kind) -> u8 {
    match kind {
        ir::Kind::Or(..) => 1,
        ir::Kind::And(..) => 2,
        ir::Kind::Not(..) => 3,
        ir::Kind::Compare(..) => 4,
        ir::Kind::Sum(..) => 5,
        _ => 6,
    }
}

pub fn literal(value: Number) -> String {
    match value {
        Number::Int(n) => n.to_string(),
        Number::PosInf => "inf".to_string(),
        Number::NegInf => "-inf".to_string(),
        Number::NaN => "NaN".to_string(),
    }
}

pub struct CodeGen<'a> {
    ir_arena: &'a ir::Arena,
    locals: &'a [String],
    out: String,
}

impl<'a> CodeGen<'a> {
    pub fn new(ir_arena: &'a ir::Arena, procedure: &'a ir::Procedure) -> Self {
        Self {
            ir_arena,
            locals: &procedure.locals,
            out: String::new(),
        }
    }

    fn local(&self, slot: usize) -> Result<&str> {
        self.locals
            .get(slot)
            .map(String::as_str)
            .ok_or_else(|| Error::Compile(format!("local slot {} is not declared", slot)))
    }

    fn generate_impl(&self, id: ir::Id, min: u8) -> Result<String> {
        let kind = &self
            .ir_arena
            .get(id)
            .ok_or_else(|| Error::Compile("failed to get ir from arena".into()))?
            .kind;

        let text = match kind {
            ir::Kind::Value(v) => literal(*v),
            ir::Kind::Var(slot) => self.local(*slot)?.to_string(),
            ir::Kind::Call(callee, args) => {
                let args = args
                    .iter()
                    .map(|a| self.generate_impl(*a, 0))
                    .collect::<Result<Vec<_>>>()?;
                format!("{}({})", callee.name(), args.join(", "))
            }
            ir::Kind::Compare(op, lhs, rhs) => format!(
                "{} {} {}",
                self.generate_impl(*lhs, 5)?,
                op,
                self.generate_impl(*rhs, 5)?
            ),
            ir::Kind::And(lhs, rhs) => format!(
                "{} and {}",
                self.generate_impl(*lhs, 2)?,
                self.generate_impl(*rhs, 3)?
            ),
            ir::Kind::Or(lhs, rhs) => format!(
                "{} or {}",
                self.generate_impl(*lhs, 1)?,
                self.generate_impl(*rhs, 2)?
            ),
            ir::Kind::Not(e) => format!("not {}", self.generate_impl(*e, 3)?),
            ir::Kind::Sum(lhs, rhs) => format!(
                "{} + {}",
                self.generate_impl(*lhs, 5)?,
                self.generate_impl(*rhs, 6)?
            ),
        };
        if precedence(kind) < min {
            Ok(format!("({})", text))
        } else {
            Ok(text)
        }
    }

    fn line(&mut self, depth: usize, text: &str) {
        for _ in 0..depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn generate_block(&mut self, stmts: &[ir::Stmt], depth: usize) -> Result<()> {
        for stmt in stmts {
            match stmt {
                ir::Stmt::Let(slot, e) => {
                    let text = format!("let {} = {};", self.local(*slot)?, self.generate_impl(*e, 0)?);
                    self.line(depth, &text);
                }
                ir::Stmt::Assign(slot, e) => {
                    let text = format!("{} = {};", self.local(*slot)?, self.generate_impl(*e, 0)?);
                    self.line(depth, &text);
                }
                ir::Stmt::Return(e) => {
                    let text = format!("return {};", self.generate_impl(*e, 0)?);
                    self.line(depth, &text);
                }
                ir::Stmt::If { arms, otherwise } => {
                    for (i, (cond, body)) in arms.iter().enumerate() {
                        let cond = self.generate_impl(*cond, 0)?;
                        if i == 0 {
                            self.line(depth, &format!("if {} {{", cond));
                        } else {
                            self.line(depth, &format!("}} else if {} {{", cond));
                        }
                        self.generate_block(body, depth + 1)?;
                    }
                    if let Some(body) = otherwise {
                        self.line(depth, "} else {");
                        self.generate_block(body, depth + 1)?;
                    }
                    self.line(depth, "}");
                }
                ir::Stmt::Repeat { times, body } => {
                    let text = format!("repeat {} {{", self.generate_impl(*times, 0)?);
                    self.line(depth, &text);
                    self.generate_block(body, depth + 1)?;
                    self.line(depth, "}");
                }
            }
        }
        Ok(())
    }

    pub fn generate(mut self, procedure: &ir::Procedure) -> Result<String> {
        let header = format!("fn {}({}) {{", procedure.name, procedure.params().join(", "));
        self.line(0, &header);
        self.generate_block(&procedure.body, 1)?;
        self.out.push_str("}\n");
        Ok(self.out)
    }
}

pub fn render(arena: &ir::Arena, procedure: &ir::Procedure) -> Result<String> {
    CodeGen::new(arena, procedure).generate(procedure)
}

/// Compute and count source of a unit.
pub fn render_unit(unit: &ir::Unit) -> Result<(String, String)> {
    Ok((render(&unit.arena, &unit.compute)?, render(&unit.arena, &unit.count)?))
}

/// Single-line rendering of one expression, used in diagnostics.
pub fn render_expr(arena: &ir::Arena, procedure: &ir::Procedure, id: ir::Id) -> Result<String> {
    CodeGen::new(arena, procedure).generate_impl(id, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::number::CmpOp;

    #[test]
    fn codegen_should_parenthesize_by_precedence() -> Result<()> {
        let mut arena = ir::Arena::new();
        let mut node = |kind| arena.alloc(ir::Node { kind });
        let a = node(ir::Kind::Var(0));
        let b = node(ir::Kind::Var(1));
        let zero = node(ir::Kind::Value(Number::Int(0)));
        let lt = node(ir::Kind::Compare(CmpOp::Lt, a, zero));
        let gt = node(ir::Kind::Compare(CmpOp::Gt, b, zero));
        let or = node(ir::Kind::Or(lt, gt));
        let and = node(ir::Kind::And(or, lt));
        let not = node(ir::Kind::Not(and));
        let neg = node(ir::Kind::Value(Number::Int(-4)));
        let ret = node(ir::Kind::Call(ir::Callee::compute("x1"), vec![a, neg]));
        let procedure = ir::Procedure {
            name: "op_t".into(),
            locals: vec!["a".into(), "b".into()],
            arity: 2,
            body: vec![ir::Stmt::If {
                arms: vec![(not, vec![ir::Stmt::Return(ret)])],
                otherwise: None,
            }],
        };
        let text = render(&arena, &procedure)?;
        assert_eq!(
            text,
            "fn op_t(a, b) {\n    if not ((a < 0 or b > 0) and a < 0) {\n        return op_x1(a, -4);\n    }\n}\n"
        );
        Ok(())
    }
}
