//! Expression evaluation, rendering and metrics.
//!
//! Evaluation is a strict post-order walk, left operand before right. Each
//! operator application runs the operator's compute and count procedures
//! on the already evaluated operands and appends one step to the trace.

use crate::base::BaseConverter;
use crate::error::{Error, Result};
use crate::expr::{Id, NodeKind, Position, Tree};
use crate::grammar::ExpressionGrammar;
use crate::interp::{Limits, Machine, ProcedureCache};
use crate::number::Number;
use crate::operator::{Associativity, OperatorInfo, Shape};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Text used for special results and grouping in rendered output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialTokens {
    pub nan: String,
    pub inf: String,
    pub neg_inf: String,
    pub left_paren: String,
    pub right_paren: String,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            nan: "NaN".into(),
            inf: "Inf".into(),
            neg_inf: "-Inf".into(),
            left_paren: "(".into(),
            right_paren: ")".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralStyle {
    /// Base-tag symbol followed by the digits in that base.
    Based,
    /// Decimal value between `$` marks.
    Marked,
    /// Plain decimal.
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub layer: usize,
    pub text: String,
}

/// Whether some application produced a result with more digits, in the
/// target base, than each of its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongerResult {
    pub target_base: u32,
    pub flag: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub result: Number,
    /// Total elementary operations; `None` when a variable was involved.
    pub degree: Option<u64>,
    pub trace: Vec<TraceStep>,
    pub longer_result: Option<LongerResult>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    pub highest_order: u32,
    pub priorities: BTreeSet<u32>,
    pub operation_count: u64,
    pub used_operators: BTreeMap<String, u32>,
}

impl Metrics {
    /// Number of distinct priorities touched.
    pub fn hierarchical_complexity(&self) -> usize {
        self.priorities.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordOptions {
    /// Fixed literal base, when literals were not drawn with random bases.
    pub base: Option<u32>,
    pub result_base: Option<u32>,
    pub longer_result_base: Option<u32>,
}

/// One line of the expression store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionRecord {
    pub id: u64,
    pub expression: String,
    pub expression_no_base_symbol: String,
    pub highest_order: u32,
    pub priority_hierarchical_complexity: usize,
    pub normalized_expansion_degree: Value,
    pub operation_count: u64,
    pub complexity_ratio: f64,
    pub tree: Value,
    pub used_operators: BTreeMap<String, u32>,
    pub dependent_operators: Vec<String>,
    pub result: Value,
    pub base: Option<u32>,
    pub result_base: Option<u32>,
    pub longer_result_info: Option<LongerResult>,
    pub trace: Vec<TraceStep>,
    pub text: String,
}

/// Infix rendering of expression trees against one registry snapshot.
#[derive(Clone, Copy)]
pub struct Renderer<'a> {
    registry: &'a Registry,
    converter: &'a BaseConverter,
    tokens: &'a SpecialTokens,
    all_brackets: bool,
}

impl<'a> Renderer<'a> {
    pub fn new(registry: &'a Registry, converter: &'a BaseConverter, tokens: &'a SpecialTokens) -> Self {
        Self {
            registry,
            converter,
            tokens,
            all_brackets: false,
        }
    }

    /// Parenthesize every operator application regardless of priority.
    pub fn with_all_brackets(mut self, all_brackets: bool) -> Self {
        self.all_brackets = all_brackets;
        self
    }

    fn operator(&self, id: &str) -> Result<&'a OperatorInfo> {
        self.registry
            .get(id)
            .ok_or_else(|| Error::Evaluation(format!("expression uses unknown operator {}", id)))
    }

    /// Base-tagged literal. Plain decimal stands for base 10 when no
    /// operator tags that base.
    fn based(&self, value: i64, base: u32) -> Result<String> {
        match self.registry.by_base(base) {
            Some(op) => Ok(format!("{}{}", op.symbol, self.converter.to_base(value, base)?)),
            None if base == 10 => Ok(value.to_string()),
            None => Err(Error::Evaluation(format!("no operator tags base-{} literals", base))),
        }
    }

    fn literal(&self, value: i64, base: u32, style: LiteralStyle) -> Result<String> {
        Ok(match style {
            LiteralStyle::Based => self.based(value, base)?,
            LiteralStyle::Marked => format!("${}$", value),
            LiteralStyle::Plain if value < 0 => {
                format!("{}{}{}", self.tokens.left_paren, value, self.tokens.right_paren)
            }
            LiteralStyle::Plain => value.to_string(),
        })
    }

    /// Text of a value in the trace or as a result; plain decimal unless
    /// a base is given.
    pub fn value_text(&self, value: Number, base: Option<u32>) -> Result<String> {
        Ok(match value {
            Number::Int(n) => match base {
                Some(base) => self.based(n, base)?,
                None => n.to_string(),
            },
            Number::NaN => self.tokens.nan.clone(),
            Number::PosInf => self.tokens.inf.clone(),
            Number::NegInf => self.tokens.neg_inf.clone(),
        })
    }

    fn needs_parens(&self, child: &OperatorInfo, parent: Option<&OperatorInfo>, position: Option<Position>) -> bool {
        let Some(parent) = parent else {
            return false;
        };
        if self.all_brackets {
            return true;
        }
        match (child.priority, parent.priority) {
            (Some(c), Some(p)) if c < p => true,
            (Some(c), Some(p)) if c == p => matches!(
                (parent.associativity, position),
                (Some(Associativity::Left), Some(Position::Right)) | (Some(Associativity::Right), Some(Position::Left))
            ),
            (Some(_), Some(_)) => false,
            _ => true,
        }
    }

    fn render_impl(&self, tree: &Tree, id: Id, parent: Option<&OperatorInfo>, style: LiteralStyle) -> Result<String> {
        let node = tree.node(id)?;
        let (op, text) = match &node.kind {
            NodeKind::Number { value, base } => return self.literal(*value, *base, style),
            NodeKind::Variable(name) => return Ok(name.clone()),
            NodeKind::Unary { op, child } => {
                let op = self.operator(op)?;
                let inner = self.render_impl(tree, *child, Some(op), style)?;
                let text = match op.shape() {
                    Shape::Postfix => format!("{}{}", inner, op.symbol),
                    _ => format!("{}{}", op.symbol, inner),
                };
                (op, text)
            }
            NodeKind::Binary { op, left, right } => {
                let op = self.operator(op)?;
                let lhs = self.render_impl(tree, *left, Some(op), style)?;
                let rhs = self.render_impl(tree, *right, Some(op), style)?;
                (op, format!("{}{}{}", lhs, op.symbol, rhs))
            }
        };
        if self.needs_parens(op, parent, node.position) {
            Ok(format!("{}{}{}", self.tokens.left_paren, text, self.tokens.right_paren))
        } else {
            Ok(text)
        }
    }

    /// Infix rendering with the minimal parentheses the priorities need.
    pub fn render(&self, tree: &Tree, style: LiteralStyle) -> Result<String> {
        self.render_impl(tree, tree.root, None, style)
    }

    pub fn metrics(&self, tree: &Tree) -> Result<Metrics> {
        let mut metrics = Metrics::default();
        for id in tree.operators() {
            let op = self.operator(&id)?;
            metrics.highest_order = metrics.highest_order.max(op.order);
            if let Some(p) = op.priority {
                metrics.priorities.insert(p);
            }
            metrics.operation_count += 1;
            *metrics.used_operators.entry(id).or_default() += 1;
        }
        Ok(metrics)
    }

}

pub struct Evaluator<'a> {
    renderer: Renderer<'a>,
    cache: &'a mut ProcedureCache,
    machine: Machine,
}

struct Walk {
    trace: Vec<TraceStep>,
    longer: Option<LongerResult>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        registry: &'a Registry,
        converter: &'a BaseConverter,
        tokens: &'a SpecialTokens,
        cache: &'a mut ProcedureCache,
        limits: Limits,
    ) -> Self {
        Self {
            renderer: Renderer::new(registry, converter, tokens),
            cache,
            machine: Machine::new(limits),
        }
    }

    pub fn with_all_brackets(mut self, all_brackets: bool) -> Self {
        self.renderer = self.renderer.with_all_brackets(all_brackets);
        self
    }

    pub fn renderer(&self) -> &Renderer<'a> {
        &self.renderer
    }

    pub fn render(&self, tree: &Tree, style: LiteralStyle) -> Result<String> {
        self.renderer.render(tree, style)
    }

    fn digit_len(&self, value: Number, base: u32) -> Result<Option<usize>> {
        match value {
            Number::Int(n) => Ok(Some(self.renderer.converter.to_base(n, base)?.chars().count())),
            _ => Ok(None),
        }
    }

    fn note_length(&self, walk: &mut Walk, result: Number, operands: &[Number]) -> Result<()> {
        let Some(longer) = walk.longer.as_mut().filter(|l| !l.flag) else {
            return Ok(());
        };
        let base = longer.target_base;
        let Some(result_len) = self.digit_len(result, base)? else {
            return Ok(());
        };
        let mut longest = 0;
        for operand in operands {
            match self.digit_len(*operand, base)? {
                Some(len) => longest = longest.max(len),
                None => return Ok(()),
            }
        }
        if result_len > longest {
            if let Some(longer) = walk.longer.as_mut() {
                longer.flag = true;
            }
        }
        Ok(())
    }

    fn apply(&mut self, op: &OperatorInfo, args: &[Number]) -> Result<(Number, u64)> {
        let callable = self.cache.load(self.renderer.registry, &op.id)?;
        let result = self.machine.compute(&callable, args)?;
        let count = self.machine.count(&callable, args)?;
        Ok((result, count.as_count()))
    }

    fn evaluate_impl(&mut self, tree: &Tree, id: Id, layer: usize, walk: &mut Walk, trace_base: Option<u32>) -> Result<(Number, Option<u64>)> {
        match &tree.node(id)?.kind {
            NodeKind::Number { value, .. } => Ok((Number::Int(*value), Some(0))),
            NodeKind::Variable(_) => Ok((Number::NaN, None)),
            NodeKind::Unary { op, child } => {
                let (value, degree) = self.evaluate_impl(tree, *child, layer + 1, walk, trace_base)?;
                let op = self.renderer.operator(op)?;
                let (result, count) = self.apply(op, &[value])?;
                self.note_length(walk, result, &[value])?;
                let operand = self.renderer.value_text(value, trace_base)?;
                let text = match op.shape() {
                    Shape::Postfix => format!("{}{}", operand, op.symbol),
                    _ => format!("{}{}", op.symbol, operand),
                };
                let text = format!("{}={}", text, self.renderer.value_text(result, trace_base)?);
                walk.trace.push(TraceStep { layer, text });
                Ok((result, degree.map(|d| d.saturating_add(count))))
            }
            NodeKind::Binary { op, left, right } => {
                let (lhs, left_degree) = self.evaluate_impl(tree, *left, layer + 1, walk, trace_base)?;
                let (rhs, right_degree) = self.evaluate_impl(tree, *right, layer + 1, walk, trace_base)?;
                let op = self.renderer.operator(op)?;
                let (result, count) = self.apply(op, &[lhs, rhs])?;
                self.note_length(walk, result, &[lhs, rhs])?;
                let text = format!(
                    "{}{}{}={}",
                    self.renderer.value_text(lhs, trace_base)?,
                    op.symbol,
                    self.renderer.value_text(rhs, trace_base)?,
                    self.renderer.value_text(result, trace_base)?
                );
                walk.trace.push(TraceStep { layer, text });
                let degree = match (left_degree, right_degree) {
                    (Some(l), Some(r)) => Some(l.saturating_add(r).saturating_add(count)),
                    _ => None,
                };
                Ok((result, degree))
            }
        }
    }

    /// Evaluates `tree`. Trace operands are rendered in `trace_base`, or in
    /// decimal without one; the longer-result check runs in
    /// `longer_result_base` when given.
    pub fn evaluate(
        &mut self,
        tree: &Tree,
        trace_base: Option<u32>,
        longer_result_base: Option<u32>,
    ) -> Result<Evaluation> {
        let mut walk = Walk {
            trace: Vec::new(),
            longer: longer_result_base.map(|target_base| LongerResult { target_base, flag: false }),
        };
        let (result, degree) = self.evaluate_impl(tree, tree.root, 0, &mut walk, trace_base)?;
        Ok(Evaluation {
            result,
            degree,
            trace: walk.trace,
            longer_result: walk.longer,
        })
    }

    /// Parses `text` with `grammar` and evaluates it.
    pub fn calculate(&mut self, grammar: &ExpressionGrammar, text: &str) -> Result<Number> {
        let tree = grammar.parse(text)?;
        Ok(self.evaluate(&tree, None, None)?.result)
    }

    fn result_value(&self, result: Number, result_base: Option<u32>) -> Result<Value> {
        Ok(match (result, result_base) {
            (Number::Int(n), Some(base)) => Value::String(self.renderer.based(n, base)?),
            (Number::Int(n), None) => Value::from(n),
            (special, _) => Value::String(self.renderer.value_text(special, None)?),
        })
    }

    fn dependents(&self, metrics: &Metrics) -> Vec<String> {
        let mut out = Vec::new();
        for id in metrics.used_operators.keys() {
            if let Some(op) = self.renderer.registry.get(id) {
                out.extend(op.dependencies.iter().cloned());
            }
        }
        out
    }

    /// Evaluates and renders `tree` into one expression-store record.
    pub fn record(&mut self, id: u64, tree: &Tree, options: &RecordOptions) -> Result<ExpressionRecord> {
        let expression = self.renderer.render(tree, LiteralStyle::Based)?;
        let expression_no_base_symbol = self.renderer.render(tree, LiteralStyle::Marked)?;
        let metrics = self.renderer.metrics(tree)?;
        let evaluation = self.evaluate(tree, options.longer_result_base, options.longer_result_base)?;

        let (degree, ratio) = match evaluation.degree {
            Some(d) if metrics.operation_count > 0 => (Value::from(d), d as f64 / metrics.operation_count as f64),
            Some(d) => (Value::from(d), 0.0),
            None => (Value::String(self.renderer.tokens.nan.clone()), 0.0),
        };
        let result = self.result_value(evaluation.result, options.result_base)?;
        let result_text = match &result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Ok(ExpressionRecord {
            id,
            text: format!("{}={}", expression, result_text),
            expression,
            expression_no_base_symbol,
            highest_order: metrics.highest_order,
            priority_hierarchical_complexity: metrics.hierarchical_complexity(),
            normalized_expansion_degree: degree,
            operation_count: metrics.operation_count,
            complexity_ratio: ratio,
            tree: tree.to_json(self.renderer.registry)?,
            dependent_operators: self.dependents(&metrics),
            used_operators: metrics.used_operators,
            result,
            base: options.base,
            result_base: options.result_base,
            longer_result_info: evaluation.longer_result,
            trace: evaluation.trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::TreeBuilder;
    use crate::initial;

    struct Fixture {
        registry: Registry,
        converter: BaseConverter,
        tokens: SpecialTokens,
        cache: ProcedureCache,
    }

    impl Fixture {
        fn new() -> Result<Self> {
            Ok(Self {
                registry: initial::registry()?,
                converter: BaseConverter::default(),
                tokens: SpecialTokens::default(),
                cache: ProcedureCache::new(),
            })
        }

        fn evaluator(&mut self, limits: Limits) -> Evaluator<'_> {
            Evaluator::new(&self.registry, &self.converter, &self.tokens, &mut self.cache, limits)
        }
    }

    #[test]
    fn calculator_respects_default_priorities() -> Result<()> {
        let mut fx = Fixture::new()?;
        let grammar = ExpressionGrammar::from_registry(&fx.registry, &fx.converter)?;
        let mut evaluator = fx.evaluator(Limits::default());
        assert_eq!(evaluator.calculate(&grammar, "3+4*2")?, Number::Int(11));
        assert_eq!(evaluator.calculate(&grammar, "(3+4)*2")?, Number::Int(14));
        assert_eq!(evaluator.calculate(&grammar, "7/0+1")?, Number::NaN);
        assert_eq!(evaluator.calculate(&grammar, "-7%3")?, Number::Int(2));
        Ok(())
    }

    #[test]
    fn overflow_renders_infinity_with_a_finite_degree() -> Result<()> {
        let mut fx = Fixture::new()?;
        let mut b = TreeBuilder::new();
        let lhs = b.number(20, 10);
        let rhs = b.number(30, 10);
        let root = b.binary("4", lhs, rhs);
        let tree = b.finish(root);
        let mut evaluator = fx.evaluator(Limits {
            threshold: 100,
            ..Limits::default()
        });
        let record = evaluator.record(0, &tree, &RecordOptions::default())?;
        assert_eq!(record.result, Value::String("Inf".into()));
        assert_eq!(record.normalized_expansion_degree, Value::from(20u64));
        assert_eq!(record.trace, vec![TraceStep { layer: 0, text: "20*30=Inf".into() }]);
        Ok(())
    }

    #[test]
    fn rendering_adds_parentheses_only_where_priorities_need_them() -> Result<()> {
        let mut fx = Fixture::new()?;
        let mut b = TreeBuilder::new();
        let one = b.number(1, 10);
        let two = b.number(2, 10);
        let three = b.number(3, 10);
        let four = b.number(4, 10);
        let sum = b.binary("1", one, two);
        let diff = b.binary("2", three, four);
        let neg = b.unary("3", diff);
        let product = b.binary("4", sum, neg);
        let tree = b.finish(product);
        let evaluator = fx.evaluator(Limits::default());
        assert_eq!(evaluator.render(&tree, LiteralStyle::Plain)?, "(1+2)*-(3-4)");
        assert_eq!(evaluator.render(&tree, LiteralStyle::Marked)?, "($1$+$2$)*-($3$-$4$)");

        let mut b = TreeBuilder::new();
        let (x, y, z) = (b.number(9, 10), b.number(5, 10), b.number(-2, 10));
        let inner = b.binary("2", y, z);
        let outer = b.binary("2", x, inner);
        let tree = b.finish(outer);
        assert_eq!(evaluator.render(&tree, LiteralStyle::Plain)?, "9-(5-(-2))");
        let all = evaluator.with_all_brackets(true);
        assert_eq!(all.render(&tree, LiteralStyle::Plain)?, "9-(5-(-2))");
        Ok(())
    }

    #[test]
    fn rendered_expressions_parse_back_to_the_same_value() -> Result<()> {
        let mut fx = Fixture::new()?;
        let grammar = ExpressionGrammar::from_registry(&fx.registry, &fx.converter)?;
        let mut b = TreeBuilder::new();
        let (a, c, d) = (b.number(6, 10), b.number(-4, 10), b.number(5, 10));
        let neg = b.unary("3", c);
        let quotient = b.binary("5", a, neg);
        let root = b.binary("6", quotient, d);
        let tree = b.finish(root);
        let mut evaluator = fx.evaluator(Limits::default());
        let text = evaluator.render(&tree, LiteralStyle::Plain)?;
        let direct = evaluator.evaluate(&tree, None, None)?;
        assert_eq!(evaluator.calculate(&grammar, &text)?, direct.result);
        assert_eq!(direct.trace.len(), 3);
        assert_eq!(direct.trace[0].layer, 2);
        assert_eq!(direct.trace[2].layer, 0);
        Ok(())
    }

    #[test]
    fn variables_poison_result_and_degree() -> Result<()> {
        let mut fx = Fixture::new()?;
        let mut b = TreeBuilder::new();
        let x = b.variable("x");
        let one = b.number(1, 10);
        let root = b.binary("1", x, one);
        let tree = b.finish(root);
        let mut evaluator = fx.evaluator(Limits::default());
        let record = evaluator.record(3, &tree, &RecordOptions::default())?;
        assert_eq!(record.result, Value::String("NaN".into()));
        assert_eq!(record.normalized_expansion_degree, Value::String("NaN".into()));
        assert_eq!(record.complexity_ratio, 0.0);
        assert_eq!(record.used_operators.get("1"), Some(&1));
        assert_eq!(record.text, "x+1=NaN");
        Ok(())
    }

    #[test]
    fn longer_results_are_flagged() -> Result<()> {
        let mut fx = Fixture::new()?;
        let mut b = TreeBuilder::new();
        let (x, y) = (b.number(9, 10), b.number(9, 10));
        let root = b.binary("4", x, y);
        let tree = b.finish(root);
        let mut evaluator = fx.evaluator(Limits::default());
        let evaluation = evaluator.evaluate(&tree, Some(10), Some(10))?;
        assert_eq!(evaluation.longer_result, Some(LongerResult { target_base: 10, flag: true }));
        assert_eq!(evaluation.degree, Some(9));
        Ok(())
    }

    #[test]
    fn literals_need_a_tagging_operator_outside_base_ten() -> Result<()> {
        let mut fx = Fixture::new()?;
        let mut b = TreeBuilder::new();
        let (x, y) = (b.number(5, 2), b.number(3, 10));
        let root = b.binary("1", x, y);
        let tree = b.finish(root);
        let evaluator = fx.evaluator(Limits::default());
        assert!(matches!(evaluator.render(&tree, LiteralStyle::Based), Err(Error::Evaluation(_))));
        assert_eq!(evaluator.render(&tree, LiteralStyle::Plain)?, "5+3");

        let mut b = TreeBuilder::new();
        let (x, y) = (b.number(12, 10), b.number(3, 10));
        let root = b.binary("4", x, y);
        let tree = b.finish(root);
        assert_eq!(evaluator.render(&tree, LiteralStyle::Based)?, "12*3");
        Ok(())
    }

    #[test]
    fn traces_stay_decimal_below_base_ten() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.converter = BaseConverter::new(crate::base::DEFAULT_DIGITS, 8)?;
        let mut b = TreeBuilder::new();
        let (x, y) = (b.number(12, 10), b.number(11, 10));
        let root = b.binary("1", x, y);
        let tree = b.finish(root);
        let mut evaluator = fx.evaluator(Limits::default());
        let record = evaluator.record(1, &tree, &RecordOptions::default())?;
        assert_eq!(record.result, Value::from(23));
        assert_eq!(record.trace, vec![TraceStep { layer: 0, text: "12+11=23".into() }]);
        assert_eq!(record.text, "12+11=23");
        Ok(())
    }
}
