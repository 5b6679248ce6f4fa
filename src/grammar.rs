//! Precedence grammar over the prioritized operators, and the parser that
//! reads expressions with it.
//!
//! One level per distinct priority, loosest first. A level either defers to
//! the next one or applies one of its operators:
//!
//! ```text
//! ?expr_i: expr_{i+1}
//!     | "p" expr_i               prefix
//!     | expr_i "q"               postfix
//!     | expr_i "l" expr_{i+1}    left-associative binary
//!     | expr_{i+1} "r" expr_i    right-associative binary
//! ```
//!
//! The innermost level reads an integer literal, a base-tagged literal, a
//! variable or a parenthesized `expr_0`. Symbols are matched longest first.

use crate::base::BaseConverter;
use crate::error::{Error, Result};
use crate::expr::{Id, Tree, TreeBuilder};
use crate::operator::{Associativity, Shape};
use crate::registry::Registry;
use log::debug;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
    pub id: String,
    pub symbol: String,
    pub shape: Shape,
    pub associativity: Associativity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub priority: u32,
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone)]
struct SymbolEntry {
    symbol: Vec<char>,
    level: usize,
    alternative: usize,
}

#[derive(Debug, Clone)]
pub struct ExpressionGrammar {
    levels: Vec<Level>,
    prefix: Vec<SymbolEntry>,
    infix: Vec<SymbolEntry>,
    bases: Vec<(Vec<char>, u32)>,
    converter: BaseConverter,
    generation: u64,
}

fn by_length_desc<T>(entries: &mut [T], len: impl Fn(&T) -> usize) {
    entries.sort_by(|a, b| len(b).cmp(&len(a)));
}

impl ExpressionGrammar {
    /// Builds the grammar from the registry's prioritized operators.
    pub fn from_registry(registry: &Registry, converter: &BaseConverter) -> Result<Self> {
        let operators = registry.operators_by_priority();
        if operators.is_empty() {
            return Err(Error::Grammar("no prioritized operators to build a grammar from".into()));
        }

        let mut levels: Vec<Level> = Vec::new();
        let mut prefix = Vec::new();
        let mut infix = Vec::new();
        for op in operators {
            let priority = op.priority.unwrap_or_default();
            if levels.last().map(|l| l.priority) != Some(priority) {
                levels.push(Level {
                    priority,
                    alternatives: Vec::new(),
                });
            }
            let level = levels.len() - 1;
            let alternatives = &mut levels[level].alternatives;
            let entry = SymbolEntry {
                symbol: op.symbol.chars().collect(),
                level,
                alternative: alternatives.len(),
            };
            match op.shape() {
                Shape::Prefix => prefix.push(entry),
                _ => infix.push(entry),
            }
            alternatives.push(Alternative {
                id: op.id.clone(),
                symbol: op.symbol.clone(),
                shape: op.shape(),
                associativity: op.associativity.unwrap_or(Associativity::Left),
            });
        }
        by_length_desc(&mut prefix, |e| e.symbol.len());
        by_length_desc(&mut infix, |e| e.symbol.len());

        let mut bases: Vec<(Vec<char>, u32)> = registry
            .base_operators()
            .filter_map(|op| Some((op.symbol.chars().collect(), op.base_tag?)))
            .collect();
        by_length_desc(&mut bases, |(s, _)| s.len());

        debug!("built expression grammar with {} level(s)", levels.len());
        Ok(Self {
            levels,
            prefix,
            infix,
            bases,
            converter: converter.clone(),
            generation: registry.generation(),
        })
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Registry generation the grammar was built from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, registry: &Registry) -> bool {
        self.generation == registry.generation()
    }

    pub fn parse(&self, text: &str) -> Result<Tree> {
        let mut parser = ExprParser {
            grammar: self,
            chars: text.chars().collect(),
            pos: 0,
            builder: TreeBuilder::new(),
        };
        let root = parser.level(0)?;
        parser.skip_ws();
        if parser.pos < parser.chars.len() {
            return Err(parser.error("end of expression"));
        }
        Ok(parser.builder.finish(root))
    }
}

impl fmt::Display for ExpressionGrammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "start: expr_0")?;
        for (i, level) in self.levels.iter().enumerate() {
            writeln!(f, "?expr_{}: expr_{}", i, i + 1)?;
            for alt in &level.alternatives {
                let rule = match (alt.shape, alt.associativity) {
                    (Shape::Prefix, _) => format!("\"{}\" expr_{}", alt.symbol, i),
                    (Shape::Postfix, _) => format!("expr_{} \"{}\"", i, alt.symbol),
                    (Shape::Binary, Associativity::Left) => format!("expr_{} \"{}\" expr_{}", i, alt.symbol, i + 1),
                    (Shape::Binary, Associativity::Right) => format!("expr_{} \"{}\" expr_{}", i + 1, alt.symbol, i),
                };
                writeln!(f, "    | {} -> op_{}", rule, alt.id)?;
            }
        }
        let inner = self.levels.len();
        writeln!(f, "expr_{}: INT -> number", inner)?;
        writeln!(f, "    | \"(\" expr_0 \")\"")?;
        writeln!(f, "%import common.INT")?;
        writeln!(f, "%import common.WS")?;
        write!(f, "%ignore WS")
    }
}

struct ExprParser<'g> {
    grammar: &'g ExpressionGrammar,
    chars: Vec<char>,
    pos: usize,
    builder: TreeBuilder,
}

impl<'g> ExprParser<'g> {
    fn error(&self, expected: &str) -> Error {
        let found: String = self.chars[self.pos.min(self.chars.len())..].iter().take(8).collect();
        Error::Grammar(format!("expected {} at offset {}, found `{}`", expected, self.pos, found))
    }

    fn skip_ws(&mut self) {
        while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn looking_at(&self, symbol: &[char]) -> bool {
        self.chars.get(self.pos..self.pos + symbol.len()) == Some(symbol)
    }

    /// Longest symbol of level `level` at the cursor.
    fn longest(&self, table: &'g [SymbolEntry], level: usize) -> Option<&'g SymbolEntry> {
        table.iter().find(|e| e.level == level && self.looking_at(&e.symbol))
    }

    fn alternative(&self, entry: &SymbolEntry) -> &'g Alternative {
        &self.grammar.levels[entry.level].alternatives[entry.alternative]
    }

    fn level(&mut self, i: usize) -> Result<Id> {
        let grammar = self.grammar;
        if i == grammar.levels.len() {
            return self.atom();
        }
        self.skip_ws();
        let mut node = match self.longest(&grammar.prefix, i) {
            Some(entry) => {
                self.pos += entry.symbol.len();
                let alt = self.alternative(entry);
                let child = self.level(i)?;
                self.builder.unary(alt.id.clone(), child)
            }
            None => self.level(i + 1)?,
        };
        loop {
            self.skip_ws();
            let Some(entry) = self.longest(&grammar.infix, i) else {
                break;
            };
            self.pos += entry.symbol.len();
            let alt = self.alternative(entry);
            match (alt.shape, alt.associativity) {
                (Shape::Binary, Associativity::Right) => {
                    let rhs = self.level(i)?;
                    node = self.builder.binary(alt.id.clone(), node, rhs);
                    break;
                }
                (Shape::Binary, Associativity::Left) => {
                    let rhs = self.level(i + 1)?;
                    node = self.builder.binary(alt.id.clone(), node, rhs);
                }
                _ => node = self.builder.unary(alt.id.clone(), node),
            }
        }
        Ok(node)
    }

    fn digits(&mut self, accept: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&accept) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    /// `(-123)`, the rendering of a negative decimal literal.
    fn negative_literal(&mut self) -> Option<i64> {
        let save = self.pos;
        self.pos += 1;
        self.skip_ws();
        if self.peek() == Some('-') {
            self.pos += 1;
            let digits = self.digits(|c| c.is_ascii_digit());
            self.skip_ws();
            if !digits.is_empty() && self.peek() == Some(')') {
                if let Ok(n) = format!("-{}", digits).parse() {
                    self.pos += 1;
                    return Some(n);
                }
            }
        }
        self.pos = save;
        None
    }

    fn atom(&mut self) -> Result<Id> {
        let grammar = self.grammar;
        self.skip_ws();
        let Some(c) = self.peek() else {
            return Err(self.error("operand"));
        };
        if c == '(' {
            if let Some(n) = self.negative_literal() {
                return Ok(self.builder.number(n, 10));
            }
            self.pos += 1;
            let inner = self.level(0)?;
            self.skip_ws();
            if self.peek() != Some(')') {
                return Err(self.error("`)`"));
            }
            self.pos += 1;
            return Ok(inner);
        }
        if c.is_ascii_digit() {
            let digits = self.digits(|c| c.is_ascii_digit());
            let n = digits
                .parse()
                .map_err(|_| Error::Grammar(format!("integer literal `{}` is out of range", digits)))?;
            return Ok(self.builder.number(n, 10));
        }
        if let Some((symbol, base)) = grammar.bases.iter().find(|(s, _)| self.looking_at(s)) {
            self.pos += symbol.len();
            let converter = &grammar.converter;
            let negative = self.peek() == Some('-');
            if negative {
                self.pos += 1;
            }
            let digits = self.digits(|c| converter.digit_value(c, *base).is_some());
            let text = if negative { format!("-{}", digits) } else { digits };
            let n = converter
                .from_base(&text, *base)
                .map_err(|e| Error::Grammar(format!("bad base-{} literal: {}", base, e)))?;
            return Ok(self.builder.number(n, *base));
        }
        if c.is_alphabetic() || c == '_' {
            let name = self.digits(|c| c.is_alphanumeric() || c == '_');
            return Ok(self.builder.variable(name));
        }
        Err(self.error("operand"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::NodeKind;
    use crate::initial;
    use crate::operator::OperatorInfo;

    fn grammar(registry: &Registry) -> Result<ExpressionGrammar> {
        ExpressionGrammar::from_registry(registry, &BaseConverter::default())
    }

    /// Fully parenthesized form of a parsed tree, by operator id.
    fn shape(tree: &Tree, id: Id) -> Result<String> {
        Ok(match &tree.node(id)?.kind {
            NodeKind::Number { value, .. } => value.to_string(),
            NodeKind::Variable(v) => v.clone(),
            NodeKind::Unary { op, child } => format!("{}({})", op, shape(tree, *child)?),
            NodeKind::Binary { op, left, right } => {
                format!("({} {} {})", shape(tree, *left)?, op, shape(tree, *right)?)
            }
        })
    }

    fn parse(registry: &Registry, text: &str) -> Result<String> {
        let tree = grammar(registry)?.parse(text)?;
        shape(&tree, tree.root)
    }

    #[test]
    fn default_priorities_bind_multiplication_tighter() -> Result<()> {
        let reg = initial::registry()?;
        assert_eq!(parse(&reg, "3+4*2")?, "(3 1 (4 4 2))");
        assert_eq!(parse(&reg, "3-4-5")?, "((3 2 4) 2 5)");
        assert_eq!(parse(&reg, "(3-4)*-x")?, "((3 2 4) 4 3(x))");
        assert_eq!(parse(&reg, "3--4 % (-2)")?, "(3 2 (3(4) 6 -2))");
        Ok(())
    }

    #[test]
    fn grammar_text_lists_levels_loosest_first() -> Result<()> {
        let text = grammar(&initial::registry()?)?.to_string();
        assert!(text.starts_with("start: expr_0\n?expr_0: expr_1\n    | expr_0 \"+\" expr_1 -> op_1\n"));
        assert!(text.contains("?expr_2: expr_3\n    | \"-\" expr_2 -> op_3\n"));
        assert!(text.contains("expr_3: INT -> number\n"));
        Ok(())
    }

    #[test]
    fn right_associative_and_postfix_levels() -> Result<()> {
        let mut reg = initial::registry()?;
        let mut pow = OperatorInfo::new("p", "⊙", Shape::Binary);
        pow.priority = Some(5);
        pow.associativity = Some(Associativity::Right);
        let mut fact = OperatorInfo::new("f", "⊘", Shape::Postfix);
        fact.priority = Some(4);
        fact.associativity = Some(Associativity::Left);
        reg.add(pow)?;
        reg.add(fact)?;
        assert_eq!(parse(&reg, "1⊙2⊙3")?, "(1 p (2 p 3))");
        assert_eq!(parse(&reg, "1⊙2⊘*3")?, "(f((1 p 2)) 4 3)");
        assert_eq!(parse(&reg, "-2⊘")?, "3(f(2))");
        Ok(())
    }

    #[test]
    fn shorter_symbols_match_when_a_longer_one_belongs_to_another_level() -> Result<()> {
        let mut reg = initial::registry()?;
        let mut loose = OperatorInfo::new("n2", "¬¬", Shape::Prefix);
        loose.priority = Some(0);
        loose.associativity = Some(Associativity::Left);
        let mut tight = OperatorInfo::new("n1", "¬", Shape::Prefix);
        tight.priority = Some(4);
        tight.associativity = Some(Associativity::Left);
        reg.add(loose)?;
        reg.add(tight)?;
        assert_eq!(parse(&reg, "1+¬¬2")?, "(1 1 n1(n1(2)))");
        assert_eq!(parse(&reg, "¬¬2+1")?, "n2((2 1 1))");
        Ok(())
    }

    #[test]
    fn base_tagged_literals_read_in_their_base() -> Result<()> {
        let mut reg = initial::registry()?;
        let mut hex = OperatorInfo::new("b16", "⌗", Shape::Prefix);
        hex.base_tag = Some(16);
        reg.add(hex)?;
        let tree = grammar(&reg)?.parse("⌗FF+1")?;
        let NodeKind::Binary { left, .. } = tree.root()?.kind else {
            panic!("expected binary root");
        };
        assert_eq!(tree.node(left)?.kind, NodeKind::Number { value: 255, base: 16 });
        Ok(())
    }

    #[test]
    fn surface_form_of_every_operator_parses() -> Result<()> {
        let reg = initial::registry()?;
        let g = grammar(&reg)?;
        for op in reg.operators_by_priority() {
            let tree = g.parse(&op.surface_form("1", "2"))?;
            assert_eq!(tree.operators(), vec![op.id.clone()]);
        }
        Ok(())
    }

    #[test]
    fn malformed_expressions_are_rejected() -> Result<()> {
        let reg = initial::registry()?;
        let g = grammar(&reg)?;
        for text in ["3+", "(3", "3 4", "*3", ""] {
            assert!(matches!(g.parse(text), Err(Error::Grammar(_))), "accepted {:?}", text);
        }
        assert!(matches!(
            ExpressionGrammar::from_registry(&Registry::new(), &BaseConverter::default()),
            Err(Error::Grammar(_))
        ));
        Ok(())
    }
}
