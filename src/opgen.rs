//! Operator synthesis.
//!
//! Two producers feed the same acceptance path. Parsed operators get a
//! generated definition text that goes through the definition parser and
//! the transformer; recursive operators are built directly as loop
//! procedures over a callee one order below. Either way the candidate is
//! validated against a registry snapshot before anyone may add it.

use crate::base::BaseConverter;
use crate::codegen;
use crate::condition::{ConditionGenerator, ConditionSettings};
use crate::error::{Error, Result};
use crate::evaluator::{LiteralStyle, Renderer, SpecialTokens};
use crate::exprgen::{AtomChoice, ExpressionGenerator, ExpressionSettings};
use crate::interp::{Limits, ProcedureCache};
use crate::ir;
use crate::irgen;
use crate::operator::{DefinitionKind, OperatorInfo, Shape};
use crate::parser::DefinitionParser;
use crate::recursive::{self, Template};
use crate::registry::Registry;
use crate::validate::Validator;
use log::{debug, info, trace};
use rand::distributions::{Alphanumeric, WeightedIndex};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const ID_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindWeights {
    pub simple: f64,
    pub branch: f64,
    pub recursive: f64,
}

impl Default for KindWeights {
    fn default() -> Self {
        Self {
            simple: 0.2,
            branch: 0.2,
            recursive: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorSettings {
    pub symbol_min_len: usize,
    pub symbol_max_len: usize,
    /// Inclusive code point ranges symbols are drawn from.
    pub symbol_ranges: Vec<[u32; 2]>,
    pub max_if_branches: usize,
    pub kind_weights: KindWeights,
    /// Loop operand cap per order; orders without an entry use the global
    /// threshold.
    pub iteration_caps: BTreeMap<u32, i64>,
    pub seed_range: [i64; 2],
    pub max_attempts: usize,
    pub samples: usize,
    pub sample_bound: i64,
    /// Sample bound for loop operators without an iteration cap; their
    /// loop operand is the sample itself.
    pub loop_sample_bound: i64,
    /// Shapes branch expressions; variables are replaced by the operand
    /// names.
    pub expression: ExpressionSettings,
    pub condition: ConditionSettings,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            symbol_min_len: 1,
            symbol_max_len: 1,
            symbol_ranges: vec![[0x2200, 0x22FF], [0x2A00, 0x2AFF], [0x2190, 0x21FF]],
            max_if_branches: 3,
            kind_weights: KindWeights::default(),
            iteration_caps: [(3, 1_000_000), (4, 1000), (5, 100)].into_iter().collect(),
            seed_range: [-100, 100],
            max_attempts: 50,
            samples: 5,
            sample_bound: i32::MAX as i64,
            loop_sample_bound: 10_000,
            expression: ExpressionSettings {
                variables: vec!["a".into(), "b".into()],
                min_value: 0,
                max_value: 10,
                max_depth: 2,
                ..ExpressionSettings::default()
            },
            condition: ConditionSettings::default(),
        }
    }
}

impl OperatorSettings {
    pub fn validate(&self) -> Result<()> {
        if self.symbol_min_len == 0 || self.symbol_min_len > self.symbol_max_len {
            return Err(Error::Config(format!(
                "symbol length bounds {}..={} are unusable",
                self.symbol_min_len, self.symbol_max_len
            )));
        }
        for [lo, hi] in &self.symbol_ranges {
            let usable = (*lo..=*hi)
                .filter_map(char::from_u32)
                .all(crate::lexer::is_symbol_char);
            if lo > hi || !usable {
                return Err(Error::Config(format!(
                    "symbol range U+{:04X}..U+{:04X} contains non-operator characters",
                    lo, hi
                )));
            }
        }
        if self.max_if_branches < 2 {
            return Err(Error::Config("branch definitions need at least two branches".into()));
        }
        let w = self.kind_weights;
        WeightedIndex::new([w.simple, w.branch, w.recursive])
            .map_err(|e| Error::Config(format!("definition kind weights: {}", e)))?;
        if self.sample_bound < 0 || self.loop_sample_bound < 0 {
            return Err(Error::Config("sample bounds must not be negative".into()));
        }
        if self.seed_range[0] > self.seed_range[1] {
            return Err(Error::Config("recursive seed range is empty".into()));
        }
        self.condition.validate()
    }
}

/// A candidate that passed validation against some registry snapshot.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub operator: OperatorInfo,
    pub unit: ir::Unit,
}

pub struct OperatorGenerator<'a> {
    settings: &'a OperatorSettings,
    converter: &'a BaseConverter,
    validator: Validator,
    threshold: i64,
    alphabet: Vec<char>,
}

impl<'a> OperatorGenerator<'a> {
    pub fn new(settings: &'a OperatorSettings, converter: &'a BaseConverter, limits: Limits) -> Self {
        let alphabet = settings
            .symbol_ranges
            .iter()
            .flat_map(|[lo, hi]| (*lo..=*hi).filter_map(char::from_u32))
            .collect();
        Self {
            settings,
            converter,
            validator: Validator {
                samples: settings.samples,
                sample_bound: settings.sample_bound,
                limits,
            },
            threshold: limits.threshold,
            alphabet,
        }
    }

    /// Draws symbols until one is not registered yet.
    pub fn random_symbol<R: Rng + ?Sized>(&self, rng: &mut R, registry: &Registry) -> Result<String> {
        let taken = registry.symbols();
        for _ in 0..self.settings.max_attempts.max(1) {
            let len = rng.gen_range(self.settings.symbol_min_len..=self.settings.symbol_max_len.max(self.settings.symbol_min_len));
            let symbol: String = (0..len).filter_map(|_| self.alphabet.choose(rng)).collect();
            if symbol.is_empty() {
                break;
            }
            if !taken.contains(symbol.as_str()) {
                return Ok(symbol);
            }
            trace!("symbol `{}` already taken, drawing again", symbol);
        }
        Err(Error::Generation("could not draw an unused operator symbol".into()))
    }

    pub fn random_id<R: Rng + ?Sized>(&self, rng: &mut R, registry: &Registry) -> String {
        loop {
            let id: String = (0..ID_LEN).map(|_| char::from(rng.sample(Alphanumeric))).collect();
            if !registry.contains(&id) {
                return id;
            }
        }
    }

    /// Registers one literal-prefix operator per base in `2..=max_base`
    /// that does not have one yet.
    pub fn seed_base_operators<R: Rng + ?Sized>(&self, rng: &mut R, registry: &mut Registry) -> Result<usize> {
        let mut added = 0;
        for base in 2..=self.converter.max_base() {
            if registry.by_base(base).is_some() {
                continue;
            }
            let mut op = OperatorInfo::new(self.random_id(rng, registry), self.random_symbol(rng, registry)?, Shape::Prefix);
            op.base_tag = Some(base);
            debug!("base {} literal prefix is `{}`", base, op.symbol);
            registry.add(op)?;
            added += 1;
        }
        info!("registered {} base operator(s)", added);
        Ok(added)
    }

    fn random_shape<R: Rng + ?Sized>(rng: &mut R) -> Shape {
        if rng.gen_bool(0.5) {
            Shape::Binary
        } else if rng.gen_bool(0.5) {
            Shape::Prefix
        } else {
            Shape::Postfix
        }
    }

    /// Definition text for a new operator of `shape` whose branches use
    /// operators up to `order` and at least one of exactly `order`.
    pub fn definition_text<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        registry: &Registry,
        symbol: &str,
        shape: Shape,
        kind: DefinitionKind,
        order: u32,
    ) -> Result<String> {
        let variables: Vec<String> = ["a", "b"][..shape.arity() as usize].iter().map(|v| v.to_string()).collect();
        let generator = ExpressionGenerator::new(registry, &self.settings.expression, self.converter.max_base())
            .with_variables(variables.clone());
        let tokens = SpecialTokens::default();
        let renderer = Renderer::new(registry, self.converter, &tokens).with_all_brackets(true);
        let depth = rng.gen_range(1..=self.settings.expression.max_depth.max(1));
        let lhs = OperatorInfo::new("", symbol, shape).surface_form("a", "b");

        let branches = match kind {
            DefinitionKind::Branch => rng.gen_range(2..=self.settings.max_if_branches.max(2)),
            _ => 1,
        };
        let trees = generator.order_matched(rng, depth, AtomChoice::VariableAndNumber, order, branches)?;
        let exprs = trees
            .iter()
            .map(|tree| renderer.render(tree, LiteralStyle::Plain))
            .collect::<Result<Vec<_>>>()?;

        let rhs = match exprs.split_last() {
            Some((last, guarded)) if !guarded.is_empty() => {
                let conditions = ConditionGenerator::new(registry, &self.settings.condition, variables, order);
                let mut parts = Vec::with_capacity(exprs.len());
                for expr in guarded {
                    parts.push(format!("{} , if {}", expr, conditions.condition(rng)?));
                }
                parts.push(format!("{}, else", last));
                parts.join(" ; ")
            }
            Some((only, _)) => only.clone(),
            None => return Err(Error::Generation("no branch expressions".into())),
        };
        Ok(format!("{} = {{ {} }}", lhs, rhs))
    }

    /// Proposes and validates one parsed operator.
    pub fn parsed_candidate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        registry: &Registry,
        parser: &DefinitionParser,
        cache: &mut ProcedureCache,
        kind: DefinitionKind,
        order: u32,
    ) -> Result<Accepted> {
        let shape = Self::random_shape(rng);
        let mut op = OperatorInfo::new(self.random_id(rng, registry), self.random_symbol(rng, registry)?, shape);
        let text = self.definition_text(rng, registry, &op.symbol, shape, kind, order)?;
        op.definition_kind = Some(kind);
        self.accept_definition(rng, registry, parser, cache, op, text, Some(order))
    }

    /// Parses, lowers and validates `text` as the definition of `op`.
    pub fn accept_definition<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        registry: &Registry,
        parser: &DefinitionParser,
        cache: &mut ProcedureCache,
        mut op: OperatorInfo,
        text: String,
        order: Option<u32>,
    ) -> Result<Accepted> {
        trace!("candidate {} `{}`: {}", op.id, op.symbol, text);
        let parsed = parser.parse_candidate(&text, &op)?;
        if op.definition_kind.is_none() {
            op.definition_kind = Some(if parsed.definition.branches.len() > 1 {
                DefinitionKind::Branch
            } else {
                DefinitionKind::Simple
            });
        }
        let unit = irgen::generate(parsed, &op.id)?;
        let (compute, count) = codegen::render_unit(&unit)?;
        op.definition_text = Some(text);
        op.compute_source = Some(compute);
        op.count_source = Some(count);
        self.validator.validate(&mut op, unit.clone(), registry, cache, rng, order)?;
        Ok(Accepted { operator: op, unit })
    }

    /// Proposes and validates one loop operator of `order` (at least 2).
    pub fn recursive_candidate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        registry: &Registry,
        cache: &mut ProcedureCache,
        order: u32,
    ) -> Result<Accepted> {
        let callees: Vec<&OperatorInfo> = registry
            .iter()
            .filter(|op| !op.is_base() && op.compute_source.is_some() && op.order + 1 == order)
            .collect();
        let callee = callees
            .choose(rng)
            .copied()
            .ok_or_else(|| Error::Generation(format!("no operator of order {} to iterate", order.saturating_sub(1))))?;
        let seed_range = (self.settings.seed_range[0], self.settings.seed_range[1]);
        let template = Template::random(rng, callee, order, &self.settings.iteration_caps, self.threshold, seed_range);

        let mut op = OperatorInfo::new(self.random_id(rng, registry), self.random_symbol(rng, registry)?, Shape::Binary);
        op.definition_kind = Some(DefinitionKind::Recursive);
        let unit = recursive::build(&op.id, &template)?;
        let (compute, count) = codegen::render_unit(&unit)?;
        op.compute_source = Some(compute);
        op.count_source = Some(count);
        let validator = match template.cap {
            Some(_) => self.validator,
            None => Validator {
                sample_bound: self.validator.sample_bound.min(self.settings.loop_sample_bound),
                ..self.validator
            },
        };
        validator.validate(&mut op, unit.clone(), registry, cache, rng, Some(order))?;
        Ok(Accepted { operator: op, unit })
    }

    fn pick_kind<R: Rng + ?Sized>(&self, rng: &mut R, order: u32) -> DefinitionKind {
        let w = self.settings.kind_weights;
        let recursive = if order >= 2 { w.recursive } else { 0.0 };
        match WeightedIndex::new([w.simple, w.branch, recursive]).map(|d| d.sample(rng)) {
            Ok(0) => DefinitionKind::Simple,
            Ok(1) => DefinitionKind::Branch,
            Ok(_) => DefinitionKind::Recursive,
            Err(_) => DefinitionKind::Simple,
        }
    }

    /// Proposes candidates of `order` until one passes validation. Only
    /// candidate-local failures are retried.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        registry: &Registry,
        parser: &DefinitionParser,
        cache: &mut ProcedureCache,
        order: u32,
    ) -> Result<Accepted> {
        let mut last = None;
        for attempt in 0..self.settings.max_attempts.max(1) {
            let kind = self.pick_kind(rng, order);
            let result = match kind {
                DefinitionKind::Recursive => self.recursive_candidate(rng, registry, cache, order),
                _ => self.parsed_candidate(rng, registry, parser, cache, kind, order),
            };
            match result {
                Ok(accepted) => {
                    debug!(
                        "accepted {:?} operator {} `{}` at order {} after {} attempt(s)",
                        kind,
                        accepted.operator.id,
                        accepted.operator.symbol,
                        order,
                        attempt + 1
                    );
                    return Ok(accepted);
                }
                Err(e) if e.is_candidate_local() || matches!(e, Error::Generation(_)) => {
                    trace!("discarded {:?} candidate: {}", kind, e);
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Generation(format!(
            "no operator of order {} accepted in {} attempts{}",
            order,
            self.settings.max_attempts,
            last.map(|e| format!(" (last: {})", e)).unwrap_or_default()
        )))
    }

    /// Generates and registers `count` operators of `order`, one at a time.
    pub fn generate_into<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        registry: &mut Registry,
        parser: &mut DefinitionParser,
        cache: &mut ProcedureCache,
        order: u32,
        count: usize,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            parser.sync(registry);
            let accepted = self.generate(rng, registry, parser, cache, order)?;
            ids.push(accepted.operator.id.clone());
            registry.add(accepted.operator)?;
        }
        info!("registered {} operator(s) of order {}", ids.len(), order);
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initial;
    use rand_chacha::ChaCha8Rng;

    fn settings() -> OperatorSettings {
        OperatorSettings {
            max_attempts: 200,
            sample_bound: 1000,
            ..OperatorSettings::default()
        }
    }

    #[test]
    fn base_operators_cover_every_base_once() -> Result<()> {
        let settings = settings();
        let converter = BaseConverter::new("0123456789ABCDEF", 16)?;
        let generator = OperatorGenerator::new(&settings, &converter, Limits::default());
        let mut registry = initial::registry()?;
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        assert_eq!(generator.seed_base_operators(&mut rng, &mut registry)?, 15);
        assert_eq!(generator.seed_base_operators(&mut rng, &mut registry)?, 0);
        for base in 2..=16 {
            let op = registry.by_base(base).ok_or_else(|| Error::UnknownOperator(format!("base {}", base)))?;
            assert_eq!(op.shape(), Shape::Prefix);
            assert!(op.compute_source.is_none());
        }
        Ok(())
    }

    #[test]
    fn generated_operators_reach_the_requested_order() -> Result<()> {
        let settings = settings();
        let converter = BaseConverter::default();
        let generator = OperatorGenerator::new(&settings, &converter, Limits::default());
        let mut registry = initial::registry()?;
        let mut parser = DefinitionParser::new(&registry);
        let mut cache = ProcedureCache::new();
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        for order in [1, 2, 3] {
            for id in generator.generate_into(&mut rng, &mut registry, &mut parser, &mut cache, order, 3)? {
                let op = registry.get(&id).ok_or_else(|| Error::UnknownOperator(id.clone()))?;
                assert_eq!(op.order, order);
                assert!(!op.temporary);
                let mut recorded = op.dependencies.clone();
                let mut scanned = registry.extract_dependencies(op);
                recorded.sort();
                scanned.sort();
                assert_eq!(recorded, scanned);
            }
        }
        Ok(())
    }

    #[test]
    fn parsed_operators_reproduce_their_sources() -> Result<()> {
        let settings = settings();
        let converter = BaseConverter::default();
        let generator = OperatorGenerator::new(&settings, &converter, Limits::default());
        let registry = initial::registry()?;
        let parser = DefinitionParser::new(&registry);
        let mut cache = ProcedureCache::new();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let mut checked = 0;
        for _ in 0..200 {
            let Ok(accepted) = generator.parsed_candidate(&mut rng, &registry, &parser, &mut cache, DefinitionKind::Branch, 2) else {
                continue;
            };
            let op = &accepted.operator;
            let text = op.definition_text.as_deref().unwrap_or_default();
            let unit = irgen::generate(parser.parse_candidate(text, op)?, &op.id)?;
            let (compute, count) = codegen::render_unit(&unit)?;
            assert_eq!(Some(compute), op.compute_source);
            assert_eq!(Some(count), op.count_source);
            checked += 1;
        }
        assert!(checked > 0);
        Ok(())
    }

    #[test]
    fn recursive_operators_need_a_callee_one_order_below() -> Result<()> {
        let settings = settings();
        let converter = BaseConverter::default();
        let generator = OperatorGenerator::new(&settings, &converter, Limits::default());
        let registry = initial::registry()?;
        let mut cache = ProcedureCache::new();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        assert!(matches!(
            generator.recursive_candidate(&mut rng, &registry, &mut cache, 4),
            Err(Error::Generation(_))
        ));
        let mut accepted = None;
        for _ in 0..50 {
            if let Ok(a) = generator.recursive_candidate(&mut rng, &registry, &mut cache, 3) {
                accepted = Some(a);
                break;
            }
        }
        let op = accepted.ok_or_else(|| Error::Generation("no recursive operator accepted".into()))?.operator;
        assert_eq!(op.definition_kind, Some(DefinitionKind::Recursive));
        assert_eq!(op.definition_text, None);
        assert_eq!(op.order, 3);
        assert!(op.compute_source.as_deref().is_some_and(|s| s.contains("abs(")));
        Ok(())
    }

    #[test]
    fn order_two_loops_are_accepted_with_default_settings() -> Result<()> {
        let settings = OperatorSettings::default();
        let converter = BaseConverter::default();
        let generator = OperatorGenerator::new(&settings, &converter, Limits::default());
        let registry = initial::registry()?;
        let mut cache = ProcedureCache::new();
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let accepted = (0..10)
            .filter_map(|_| generator.recursive_candidate(&mut rng, &registry, &mut cache, 2).ok())
            .count();
        assert!(accepted > 0);
        Ok(())
    }

    #[test]
    fn default_settings_generate_every_order() -> Result<()> {
        let settings = OperatorSettings::default();
        let converter = BaseConverter::default();
        let generator = OperatorGenerator::new(&settings, &converter, Limits::default());
        let mut registry = initial::registry()?;
        let mut parser = DefinitionParser::new(&registry);
        let mut cache = ProcedureCache::new();
        let mut rng = ChaCha8Rng::seed_from_u64(29);
        for order in [1, 2, 3] {
            let ids = generator.generate_into(&mut rng, &mut registry, &mut parser, &mut cache, order, 1)?;
            assert_eq!(ids.len(), 1);
            assert!(registry.get(&ids[0]).is_some_and(|op| op.order == order));
        }
        Ok(())
    }

    #[test]
    fn settings_reject_letters_in_symbol_ranges() {
        let settings = OperatorSettings {
            symbol_ranges: vec![[0x41, 0x5A]],
            ..OperatorSettings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
        assert!(OperatorSettings::default().validate().is_ok());
    }
}
