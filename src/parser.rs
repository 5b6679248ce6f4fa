use crate::ast;
use crate::error::{Error, Result};
use crate::lexer::{Lexed, Lexicon, Token};
use crate::number::CmpOp;
use crate::operator::{OperatorInfo, Shape};
use crate::registry::Registry;
use log::debug;
use std::cell::RefCell;

#[derive(Debug)]
pub struct Context {
    pub arena: RefCell<ast::Arena>,
    lexicon: Lexicon,
    lexed: Lexed,
}

impl Context {
    fn alloc(&self, kind: ast::NodeKind) -> ast::Id {
        let mut arena = self.arena.borrow_mut();
        arena.alloc(ast::Node { kind })
    }

    fn symbol(&self, token: Token, shape: Shape) -> std::result::Result<String, &'static str> {
        match self.lexed.symbol(token) {
            Some(s) if self.lexicon.admits(s, shape) => Ok(s.to_string()),
            _ => Err(match shape {
                Shape::Prefix => "prefix operator",
                Shape::Postfix => "postfix operator",
                Shape::Binary => "binary operator",
            }),
        }
    }
}

peg::parser! {
    grammar definition_parser(context: &Context) for [Token] {
        rule node(r: rule<ast::NodeKind>) -> ast::Id = n: r() {
            context.alloc(n)
        }

        rule sym(shape: Shape) -> String = t:[Token::Sym(_)] {? context.symbol(t, shape) }

        rule var() -> char = t:[Token::Var(_)] {? t.var().ok_or("variable") }

        rule cmp() -> CmpOp = t:[Token::Cmp(_)] {? t.cmp().ok_or("comparison operator") }

        rule head() -> ast::Head
            = a:var() s:sym(Shape::Binary) b:var() {
                ast::Head { symbol: s, shape: Shape::Binary, params: vec![a, b] }
            }
            / s:sym(Shape::Prefix) a:var() {
                ast::Head { symbol: s, shape: Shape::Prefix, params: vec![a] }
            }
            / a:var() s:sym(Shape::Postfix) {
                ast::Head { symbol: s, shape: Shape::Postfix, params: vec![a] }
            }

        rule factor_kind() -> ast::NodeKind
            = [Token::NaN] { ast::NodeKind::NaN }
            / t:[Token::Var(_)] {? t.var().map(ast::NodeKind::Var).ok_or("variable") }
            / t:[Token::Int(_)] {? t.int().map(ast::NodeKind::Int).ok_or("integer") }
            / [Token::LParen] e:expr() [Token::RParen] { ast::NodeKind::Paren(e) }

        rule factor() -> ast::Id = node(<factor_kind()>)

        rule operand_start() = [Token::Var(_) | Token::Int(_) | Token::NaN | Token::LParen]

        rule term() -> ast::Id
            = s:sym(Shape::Prefix) f:factor() { context.alloc(ast::NodeKind::Prefix(s, f)) }
            / f:factor() s:sym(Shape::Postfix) !operand_start() {
                context.alloc(ast::NodeKind::Postfix(s, f))
            }
            / factor()

        rule expr() -> ast::Id
            = first:term() rest:(s:sym(Shape::Binary) t:term() { (s, t) })* {
                rest.into_iter().fold(first, |lhs, (s, rhs)| {
                    context.alloc(ast::NodeKind::Binary(s, lhs, rhs))
                })
            }

        rule comparison() -> ast::NodeKind
            = l:expr() op:cmp() r:expr() { ast::NodeKind::Compare(op, l, r) }

        rule condition() -> ast::Id = precedence! {
            _:position!() c:@ _:position!() {
                context.alloc(c)
            }
            --
            x:(@) [Token::Or] y:@ { ast::NodeKind::Or(x, y) }
            --
            x:(@) [Token::And] y:@ { ast::NodeKind::And(x, y) }
            --
            [Token::Not] c:@ { ast::NodeKind::Not(c) }
            --
            c:comparison() { c }
            [Token::LParen] c:condition() [Token::RParen] { ast::NodeKind::Paren(c) }
        }

        rule guard() -> ast::Guard
            = [Token::Comma] [Token::If] c:condition() { ast::Guard::If(c) }
            / [Token::Comma] [Token::Else] { ast::Guard::Else }
            / { ast::Guard::Always }

        rule branch() -> ast::Branch = e:expr() g:guard() { ast::Branch { expr: e, guard: g } }

        pub rule definition() -> ast::Definition
            = h:head() [Token::Assign] [Token::LBrace] b:(branch() ++ [Token::Semi]) [Token::RBrace] {
                ast::Definition { head: h, branches: b }
            }
    }
}

/// A parsed definition together with the lexicon its symbols resolve in.
#[derive(Debug)]
pub struct Parsed {
    pub arena: ast::Arena,
    pub definition: ast::Definition,
    pub lexicon: Lexicon,
}

pub fn parse(source: &str, lexicon: Lexicon) -> Result<Parsed> {
    let lexed = lexicon.tokenize(source)?;
    let context = Context {
        arena: RefCell::new(ast::Arena::new()),
        lexicon,
        lexed,
    };
    let definition = definition_parser::definition(&context.lexed.tokens, &context).map_err(|e| {
        let offset = context.lexed.offset(e.location).unwrap_or(source.chars().count());
        Error::DefinitionSyntax(format!("expected {} at offset {} in `{}`", e.expected, offset, source))
    })?;
    let Context { arena, lexicon, .. } = context;
    Ok(Parsed {
        arena: arena.into_inner(),
        definition,
        lexicon,
    })
}

/// Definition parser bound to a registry snapshot. The lexicon is rebuilt
/// whenever the registry's generation moves.
#[derive(Debug, Clone)]
pub struct DefinitionParser {
    lexicon: Lexicon,
    generation: u64,
}

impl DefinitionParser {
    pub fn new(registry: &Registry) -> Self {
        Self {
            lexicon: Lexicon::from_registry(registry),
            generation: registry.generation(),
        }
    }

    pub fn sync(&mut self, registry: &Registry) {
        if self.generation != registry.generation() {
            debug!("rebuilding definition lexicon at generation {}", registry.generation());
            *self = Self::new(registry);
        }
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn parse(&self, source: &str) -> Result<Parsed> {
        parse(source, self.lexicon.clone())
    }

    /// Parses the definition of an operator that is not registered yet. Its
    /// own symbol is visible to the lexer but marked temporary.
    pub fn parse_candidate(&self, source: &str, candidate: &OperatorInfo) -> Result<Parsed> {
        let lexicon = self
            .lexicon
            .clone()
            .with_candidate(&candidate.symbol, candidate.shape(), &candidate.id);
        let parsed = parse(source, lexicon)?;
        let head = &parsed.definition.head;
        if head.symbol != candidate.symbol || head.shape != candidate.shape() {
            return Err(Error::DefinitionSyntax(format!(
                "definition head `{}` ({}) does not define `{}` ({})",
                head.symbol,
                head.shape,
                candidate.symbol,
                candidate.shape()
            )));
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initial;

    fn candidate(symbol: &str, shape: Shape) -> OperatorInfo {
        OperatorInfo::new("new", symbol, shape)
    }

    fn kind(parsed: &Parsed, id: ast::Id) -> &ast::NodeKind {
        &parsed.arena[id].kind
    }

    #[test]
    fn parser_should_read_branch_definitions() -> Result<()> {
        let parser = DefinitionParser::new(&initial::registry()?);
        let parsed = parser.parse_candidate("a⊕b = { a+b , if a>0 ; a-b , else }", &candidate("⊕", Shape::Binary))?;
        let def = &parsed.definition;
        assert_eq!(def.head.params, vec!['a', 'b']);
        assert_eq!(def.branches.len(), 2);
        assert!(matches!(def.branches[0].guard, ast::Guard::If(_)));
        assert_eq!(def.branches[1].guard, ast::Guard::Else);
        assert!(matches!(kind(&parsed, def.branches[0].expr), ast::NodeKind::Binary(s, _, _) if s == "+"));
        Ok(())
    }

    #[test]
    fn binary_chains_fold_left() -> Result<()> {
        let parser = DefinitionParser::new(&initial::registry()?);
        let parsed = parser.parse_candidate("⊖a = { a-1*2 }", &candidate("⊖", Shape::Prefix))?;
        let root = parsed.definition.branches[0].expr;
        match kind(&parsed, root) {
            ast::NodeKind::Binary(s, lhs, _) => {
                assert_eq!(s, "*");
                assert!(matches!(kind(&parsed, *lhs), ast::NodeKind::Binary(m, _, _) if m == "-"));
            }
            other => panic!("unexpected root {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn conditions_bind_and_tighter_than_or() -> Result<()> {
        let parser = DefinitionParser::new(&initial::registry()?);
        let parsed = parser.parse_candidate(
            "a⊘ = { -a , if a<0 or not a==3 and (a>1) ; NaN }",
            &candidate("⊘", Shape::Postfix),
        )?;
        let ast::Guard::If(cond) = parsed.definition.branches[0].guard else {
            panic!("expected guard");
        };
        match kind(&parsed, cond) {
            ast::NodeKind::Or(_, rhs) => assert!(matches!(kind(&parsed, *rhs), ast::NodeKind::And(_, _))),
            other => panic!("unexpected condition {:?}", other),
        }
        assert!(matches!(kind(&parsed, parsed.definition.branches[1].expr), ast::NodeKind::NaN));
        Ok(())
    }

    #[test]
    fn postfix_operands_parse_inside_expressions() -> Result<()> {
        let parser = DefinitionParser::new(&initial::registry()?);
        let parsed = parser.parse_candidate("a⊘ = { (a)⊘ + 1 }", &candidate("⊘", Shape::Postfix))?;
        let root = parsed.definition.branches[0].expr;
        match kind(&parsed, root) {
            ast::NodeKind::Binary(s, lhs, _) => {
                assert_eq!(s, "+");
                assert!(matches!(kind(&parsed, *lhs), ast::NodeKind::Postfix(p, _) if p == "⊘"));
            }
            other => panic!("unexpected root {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn malformed_text_is_a_syntax_error() -> Result<()> {
        let parser = DefinitionParser::new(&initial::registry()?);
        let op = candidate("⊕", Shape::Binary);
        for text in ["a⊕b = { a+ }", "a⊕b = { a , if }", "a⊕b { a }", "a⊕b = { a ; }"] {
            assert!(
                matches!(parser.parse_candidate(text, &op), Err(Error::DefinitionSyntax(_))),
                "accepted {}",
                text
            );
        }
        assert!(matches!(
            parser.parse_candidate("a+b = { a }", &op),
            Err(Error::DefinitionSyntax(_))
        ));
        Ok(())
    }
}
