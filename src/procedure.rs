//! Compiler for procedure source text.
//!
//! Stored operators carry their procedures as source. Loading one parses it
//! back into the same IR the transformer emits, which the interpreter then
//! runs directly.

use crate::error::{Error, Result};
use crate::ir;
use crate::number::{CmpOp, Number};
use peg::ParseLiteral;
use std::cell::RefCell;

#[derive(Debug, Default)]
pub struct Context {
    pub arena: RefCell<ir::Arena>,
    locals: RefCell<Vec<String>>,
}

impl Context {
    fn alloc(&self, kind: ir::Kind) -> ir::Id {
        let mut arena = self.arena.borrow_mut();
        arena.alloc(ir::Node { kind })
    }

    fn lookup(&self, name: &str) -> std::result::Result<usize, &'static str> {
        self.locals
            .borrow()
            .iter()
            .position(|l| l == name)
            .ok_or("declared variable")
    }

    fn declare(&self, name: &str) -> usize {
        let mut locals = self.locals.borrow_mut();
        match locals.iter().position(|l| l == name) {
            Some(slot) => slot,
            None => {
                locals.push(name.to_string());
                locals.len() - 1
            }
        }
    }

    fn declare_param(&self, name: &str) -> std::result::Result<(), &'static str> {
        if self.lookup(name).is_ok() {
            return Err("distinct parameter name");
        }
        self.declare(name);
        Ok(())
    }

    fn call(&self, name: &str, args: Vec<ir::Id>) -> std::result::Result<ir::Id, &'static str> {
        let callee = if let Some(id) = name.strip_prefix("op_count_") {
            ir::Callee::count(id)
        } else if let Some(id) = name.strip_prefix("op_") {
            ir::Callee::compute(id)
        } else {
            let builtin = ir::Builtin::from_name(name).ok_or("known procedure")?;
            if builtin.arity() != args.len() {
                return Err("builtin call with matching argument count");
            }
            ir::Callee::Builtin(builtin)
        };
        Ok(self.alloc(ir::Kind::Call(callee, args)))
    }
}

peg::parser! {
    grammar procedure_parser(context: &Context) for str {
        #[cache]
        rule _() = quiet!{[' '|'\t'|'\r'|'\n']*{}}

        rule node(r: rule<ir::Kind>) -> ir::Id = n: r() {
            context.alloc(n)
        }

        rule ident_char() = ['a'..='z' | 'A'..='Z' | '0'..='9' | '_']

        rule kw(word: &'static str) = ##parse_string_literal(word) !ident_char()

        rule keyword() = ("fn" / "if" / "else" / "return" / "let" / "repeat" / "and" / "or" / "not" / "NaN" / "inf") !ident_char()

        rule ident() -> &'input str
            = quiet!{ !keyword() s:$(['a'..='z' | 'A'..='Z' | '_'] ident_char()*) { s } }
            / expected!("identifier")

        rule literal() -> Number
            = kw("NaN") { Number::NaN }
            / "-" kw("inf") { Number::NegInf }
            / kw("inf") { Number::PosInf }
            / n:$("-"? ['0'..='9']+) {? n.parse().map(Number::Int).or(Err("integer")) }

        rule value() -> ir::Kind = v:literal() { ir::Kind::Value(v) }

        rule cmp() -> CmpOp
            = s:$("==" / "!=" / "<=" / ">=" / "<" / ">") {? CmpOp::from_symbol(s).ok_or("comparison") }

        rule call() -> ir::Id
            = name:ident() _ "(" _ args:(expr() ** (_ "," _)) _ ")" {? context.call(name, args) }

        rule var() -> ir::Kind = name:ident() {? context.lookup(name).map(ir::Kind::Var) }

        rule expr() -> ir::Id = precedence! {
            x:(@) _ kw("or") _ y:@ { context.alloc(ir::Kind::Or(x, y)) }
            --
            x:(@) _ kw("and") _ y:@ { context.alloc(ir::Kind::And(x, y)) }
            --
            kw("not") _ e:@ { context.alloc(ir::Kind::Not(e)) }
            --
            x:(@) _ op:cmp() _ y:@ { context.alloc(ir::Kind::Compare(op, x, y)) }
            --
            x:(@) _ "+" _ y:@ { context.alloc(ir::Kind::Sum(x, y)) }
            --
            n:node(<value()>) { n }
            c:call() { c }
            n:node(<var()>) { n }
            "(" _ e:expr() _ ")" { e }
        }

        rule block() -> Vec<ir::Stmt> = "{" _ s:(stmt() ** _) _ "}" { s }

        rule stmt() -> ir::Stmt
            = kw("return") _ e:expr() _ ";" { ir::Stmt::Return(e) }
            / kw("let") _ name:ident() _ "=" _ e:expr() _ ";" {
                ir::Stmt::Let(context.declare(name), e)
            }
            / kw("if") _ c:expr() _ b:block()
              rest:(_ kw("else") _ kw("if") _ c:expr() _ b:block() { (c, b) })*
              otherwise:(_ kw("else") _ b:block() { b })? {
                let mut arms = vec![(c, b)];
                arms.extend(rest);
                ir::Stmt::If { arms, otherwise }
            }
            / kw("repeat") _ t:expr() _ b:block() { ir::Stmt::Repeat { times: t, body: b } }
            / name:ident() _ "=" !"=" _ e:expr() _ ";" {?
                context.lookup(name).map(|slot| ir::Stmt::Assign(slot, e))
            }

        rule param() -> () = name:ident() {? context.declare_param(name) }

        pub rule procedure() -> (String, usize, Vec<ir::Stmt>)
            = _ kw("fn") _ name:ident() _ "(" _ params:(param() ** (_ "," _)) _ ")" _ body:block() _ {
                (name.to_string(), params.len(), body)
            }
    }
}

fn compile_into(context: &Context, source: &str) -> Result<ir::Procedure> {
    context.locals.borrow_mut().clear();
    let (name, arity, body) = procedure_parser::procedure(source, context)
        .map_err(|e| Error::Compile(format!("failed to compile procedure: {}", e)))?;
    Ok(ir::Procedure {
        name,
        locals: context.locals.take(),
        arity,
        body,
    })
}

/// Compiles one procedure into its own arena.
pub fn compile(source: &str) -> Result<(ir::Arena, ir::Procedure)> {
    let context = Context::default();
    let procedure = compile_into(&context, source)?;
    Ok((context.arena.take(), procedure))
}

/// Compiles a compute procedure and its count procedure into one unit.
pub fn compile_unit(compute_source: &str, count_source: &str) -> Result<ir::Unit> {
    let context = Context::default();
    let compute = compile_into(&context, compute_source)?;
    let count = compile_into(&context, count_source)?;
    if compute.arity != count.arity {
        return Err(Error::Compile(format!(
            "{} takes {} parameter(s) but {} takes {}",
            compute.name, compute.arity, count.name, count.arity
        )));
    }
    Ok(ir::Unit {
        arena: context.arena.take(),
        compute,
        count,
    })
}
