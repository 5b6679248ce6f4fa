//! Lowers a parsed definition into a compute procedure and a count
//! procedure in one pass. Both share the branch structure; every call site
//! contributes a call to the callee's count procedure to the count
//! expression of the branch it appears in.

use crate::error::{Error, Result};
use crate::lexer::Lexicon;
use crate::number::Number;
use crate::operator::{compute_name, count_name, Shape};
use crate::parser::Parsed;
use crate::{ast, ir};

const PARAM_NAMES: [&str; 2] = ["a", "b"];

pub struct IrGen {
    ast_arena: ast::Arena,
    lexicon: Lexicon,
    params: Vec<char>,
    ir_arena: ir::Arena,
}

impl IrGen {
    fn new(parsed: Parsed) -> Self {
        Self {
            params: parsed.definition.head.params.clone(),
            ast_arena: parsed.arena,
            lexicon: parsed.lexicon,
            ir_arena: ir::Arena::new(),
        }
    }

    fn new_node(&mut self, kind: ir::Kind) -> ir::Id {
        self.ir_arena.alloc(ir::Node { kind })
    }

    fn resolve(&self, symbol: &str, shape: Shape) -> Result<String> {
        let entry = self
            .lexicon
            .roles(symbol)
            .and_then(|roles| roles.get(shape))
            .ok_or_else(|| Error::Transform(format!("no {} operator `{}`", shape, symbol)))?;
        if entry.temporary {
            return Err(Error::Transform(format!(
                "`{}` refers to the operator being defined",
                symbol
            )));
        }
        Ok(entry.id.clone())
    }

    fn call(&mut self, symbol: &str, shape: Shape, args: Vec<ir::Id>, counts: &mut Vec<ir::Id>) -> Result<ir::Id> {
        let id = self.resolve(symbol, shape)?;
        let count = self.new_node(ir::Kind::Call(ir::Callee::count(id.clone()), args.clone()));
        counts.push(count);
        Ok(self.new_node(ir::Kind::Call(ir::Callee::compute(id), args)))
    }

    fn is_atom(&self, id: ast::Id) -> bool {
        match self.ast_arena.get(id).map(|n| &n.kind) {
            Some(ast::NodeKind::Paren(inner)) => self.is_atom(*inner),
            Some(ast::NodeKind::NaN | ast::NodeKind::Var(_) | ast::NodeKind::Int(_)) => true,
            _ => false,
        }
    }

    fn generate_impl(&mut self, root: ast::Id, counts: &mut Vec<ir::Id>) -> Result<ir::Id> {
        let kind = self
            .ast_arena
            .get(root)
            .ok_or_else(|| Error::Transform("failed to get ast node from arena".into()))?
            .kind
            .clone();
        match kind {
            ast::NodeKind::NaN => Ok(self.new_node(ir::Kind::Value(Number::NaN))),
            ast::NodeKind::Int(n) => Ok(self.new_node(ir::Kind::Value(Number::Int(n)))),
            ast::NodeKind::Var(v) => {
                let slot = self
                    .params
                    .iter()
                    .position(|p| *p == v)
                    .ok_or_else(|| Error::Transform(format!("variable `{}` is not a parameter", v)))?;
                Ok(self.new_node(ir::Kind::Var(slot)))
            }
            ast::NodeKind::Paren(e) => self.generate_impl(e, counts),
            ast::NodeKind::Binary(symbol, lhs, rhs) => {
                let lhs = self.generate_impl(lhs, counts)?;
                let rhs = self.generate_impl(rhs, counts)?;
                self.call(&symbol, Shape::Binary, vec![lhs, rhs], counts)
            }
            ast::NodeKind::Prefix(symbol, e) => {
                let e = self.generate_impl(e, counts)?;
                self.call(&symbol, Shape::Prefix, vec![e], counts)
            }
            ast::NodeKind::Postfix(symbol, e) => {
                let e = self.generate_impl(e, counts)?;
                self.call(&symbol, Shape::Postfix, vec![e], counts)
            }
            ast::NodeKind::Compare(op, lhs, rhs) => {
                let lhs = self.generate_impl(lhs, counts)?;
                let rhs = self.generate_impl(rhs, counts)?;
                Ok(self.new_node(ir::Kind::Compare(op, lhs, rhs)))
            }
            ast::NodeKind::And(lhs, rhs) => {
                let lhs = self.generate_impl(lhs, counts)?;
                let rhs = self.generate_impl(rhs, counts)?;
                Ok(self.new_node(ir::Kind::And(lhs, rhs)))
            }
            ast::NodeKind::Or(lhs, rhs) => {
                let lhs = self.generate_impl(lhs, counts)?;
                let rhs = self.generate_impl(rhs, counts)?;
                Ok(self.new_node(ir::Kind::Or(lhs, rhs)))
            }
            ast::NodeKind::Not(e) => {
                let e = self.generate_impl(e, counts)?;
                Ok(self.new_node(ir::Kind::Not(e)))
            }
        }
    }

    fn count_expr(&mut self, atom: bool, counts: Vec<ir::Id>) -> ir::Id {
        let mut calls = counts.into_iter();
        match (atom, calls.next()) {
            (false, Some(first)) => calls.fold(first, |acc, c| self.new_node(ir::Kind::Sum(acc, c))),
            _ => self.new_node(ir::Kind::Value(Number::Int(1))),
        }
    }

    fn generate(&mut self, branches: &[ast::Branch]) -> Result<(Vec<ir::Stmt>, Vec<ir::Stmt>)> {
        let mut compute = Vec::new();
        let mut count = Vec::new();
        let mut open: Option<(Vec<(ir::Id, Vec<ir::Stmt>)>, Vec<(ir::Id, Vec<ir::Stmt>)>)> = None;

        for branch in branches {
            let mut counts = Vec::new();
            let expr = self.generate_impl(branch.expr, &mut counts)?;
            let guard = match &branch.guard {
                ast::Guard::If(cond) => Some(self.generate_impl(*cond, &mut counts)?),
                _ => None,
            };
            let atom = self.is_atom(branch.expr);
            let cost = self.count_expr(atom, counts);

            match (&branch.guard, guard) {
                (ast::Guard::If(_), Some(cond)) => {
                    let (compute_arms, count_arms) = open.get_or_insert_with(Default::default);
                    compute_arms.push((cond, vec![ir::Stmt::Return(expr)]));
                    count_arms.push((cond, vec![ir::Stmt::Return(cost)]));
                }
                (ast::Guard::Else, _) => {
                    let (compute_arms, count_arms) = open
                        .take()
                        .ok_or_else(|| Error::Transform("`else` branch without a preceding `if`".into()))?;
                    compute.push(ir::Stmt::If {
                        arms: compute_arms,
                        otherwise: Some(vec![ir::Stmt::Return(expr)]),
                    });
                    count.push(ir::Stmt::If {
                        arms: count_arms,
                        otherwise: Some(vec![ir::Stmt::Return(cost)]),
                    });
                }
                _ => {
                    if let Some((compute_arms, count_arms)) = open.take() {
                        compute.push(ir::Stmt::If { arms: compute_arms, otherwise: None });
                        count.push(ir::Stmt::If { arms: count_arms, otherwise: None });
                    }
                    compute.push(ir::Stmt::Return(expr));
                    count.push(ir::Stmt::Return(cost));
                }
            }
        }
        if let Some((compute_arms, count_arms)) = open.take() {
            compute.push(ir::Stmt::If { arms: compute_arms, otherwise: None });
            count.push(ir::Stmt::If { arms: count_arms, otherwise: None });
        }

        // No branch matched: compute yields NaN and counts one operation.
        if !compute.iter().any(ir::Stmt::terminates) {
            let nan = self.new_node(ir::Kind::Value(Number::NaN));
            let one = self.new_node(ir::Kind::Value(Number::Int(1)));
            compute.push(ir::Stmt::Return(nan));
            count.push(ir::Stmt::Return(one));
        }
        Ok((compute, count))
    }
}

/// Transforms a parsed definition into the procedures of operator `id`.
pub fn generate(parsed: Parsed, id: &str) -> Result<ir::Unit> {
    let branches = parsed.definition.branches.clone();
    let mut irgen = IrGen::new(parsed);
    let (compute_body, count_body) = irgen.generate(&branches)?;
    let locals: Vec<String> = PARAM_NAMES[..irgen.params.len()].iter().map(|p| p.to_string()).collect();
    Ok(ir::Unit {
        arena: irgen.ir_arena,
        compute: ir::Procedure {
            name: compute_name(id),
            arity: locals.len(),
            locals: locals.clone(),
            body: compute_body,
        },
        count: ir::Procedure {
            name: count_name(id),
            arity: locals.len(),
            locals,
            body: count_body,
        },
    })
}
