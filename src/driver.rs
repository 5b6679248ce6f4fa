use std::path::{Path, PathBuf};

use crate::base::BaseConverter;
use crate::batch::{Batch, ExpressionBatch, ExpressionRequest};
use crate::config::Config;
use crate::evaluator::Evaluator;
use crate::grammar::ExpressionGrammar;
use crate::initial;
use crate::interp::ProcedureCache;
use crate::operator::{OperatorInfo, Shape};
use crate::opgen::OperatorGenerator;
use crate::parser::DefinitionParser;
use crate::priority;
use crate::registry::Registry;
use crate::store::{self, UsageIndex};
use anyhow::{anyhow, Context, Result};
use log::info;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

pub const OPERATORS_FILE: &str = "operators.jsonl";
pub const EXPRESSIONS_FILE: &str = "expressions.jsonl";
pub const USAGE_FILE: &str = "op2expr.jsonl";

/// A directory holding one operator store and the expressions generated
/// from it.
pub struct Workspace {
    dir: PathBuf,
    config: Config,
    converter: BaseConverter,
    registry: Registry,
    rng: ChaCha8Rng,
}

impl Workspace {
    fn with_registry(dir: &Path, config: Config, registry: Registry) -> Result<Self> {
        let converter = config.converter()?;
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            converter,
            registry,
            rng,
        })
    }

    /// Creates a store with the arithmetic seeds, one literal prefix per
    /// base and fresh priorities.
    pub fn init(dir: &Path, config: Config) -> Result<Self> {
        let path = dir.join(OPERATORS_FILE);
        if path.exists() {
            return Err(anyhow!("{} already exists", path.display()));
        }
        let mut ws = Self::with_registry(dir, config, initial::registry()?)?;
        OperatorGenerator::new(&ws.config.operators, &ws.converter, ws.config.limits())
            .seed_base_operators(&mut ws.rng, &mut ws.registry)?;
        priority::assign_priorities(&mut ws.registry, &mut ws.rng)?;
        ws.save()?;
        info!("initialized {} with {} operator(s)", dir.display(), ws.registry.len());
        Ok(ws)
    }

    pub fn open(dir: &Path, config: Config) -> Result<Self> {
        let path = dir.join(OPERATORS_FILE);
        let registry =
            store::load_registry(&path).with_context(|| format!("Failed to load operators from {}", path.display()))?;
        Self::with_registry(dir, config, registry)
    }

    fn save(&self) -> Result<()> {
        store::save_operators(&self.dir.join(OPERATORS_FILE), &self.registry)?;
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a user-written definition for `symbol`.
    pub fn define(&mut self, symbol: &str, shape: Shape, text: &str) -> Result<String> {
        let generator = OperatorGenerator::new(&self.config.operators, &self.converter, self.config.limits());
        let parser = DefinitionParser::new(&self.registry);
        let op = OperatorInfo::new(generator.random_id(&mut self.rng, &self.registry), symbol, shape);
        let accepted = generator
            .accept_definition(
                &mut self.rng,
                &self.registry,
                &parser,
                &mut ProcedureCache::new(),
                op,
                text.to_string(),
                None,
            )
            .with_context(|| format!("Rejected definition `{}`", text))?;
        let id = accepted.operator.id.clone();
        self.registry.add(accepted.operator)?;
        priority::assign_missing(&mut self.registry, &mut self.rng)?;
        self.save()?;
        Ok(id)
    }

    pub fn generate_operators(&mut self, order: u32, count: usize) -> Result<Vec<String>> {
        if order == 0 {
            return Err(anyhow!("operator order starts at 1"));
        }
        let seed = self.rng.gen();
        let ids = Batch::new(&self.config, &self.converter)?.operators(&mut self.registry, order, count, seed)?;
        priority::assign_missing(&mut self.registry, &mut self.rng)?;
        self.save()?;
        Ok(ids)
    }

    pub fn assign_priorities(&mut self) -> Result<()> {
        priority::assign_priorities(&mut self.registry, &mut self.rng)?;
        self.save()
    }

    pub fn grammar(&self) -> Result<ExpressionGrammar> {
        Ok(ExpressionGrammar::from_registry(&self.registry, &self.converter)?)
    }

    fn next_expression_id(&self) -> Result<u64> {
        let path = self.dir.join(EXPRESSIONS_FILE);
        if !path.exists() {
            return Ok(0);
        }
        Ok(store::load_expressions(&path)?
            .iter()
            .map(|r| r.id + 1)
            .max()
            .unwrap_or(0))
    }

    /// Generates expressions, appends them to the expression store and
    /// refreshes the usage index. Ids continue after the stored ones.
    pub fn generate_expressions(&mut self, mut request: ExpressionRequest) -> Result<ExpressionBatch> {
        request.first_id = self.next_expression_id()?;
        let seed = self.rng.gen();
        let batch = Batch::new(&self.config, &self.converter)?.expressions(&self.registry, &request, seed)?;
        store::append_expressions(&self.dir.join(EXPRESSIONS_FILE), &batch.records)?;

        let usage_path = self.dir.join(USAGE_FILE);
        let mut usage = UsageIndex::load(&usage_path)?;
        for record in &batch.records {
            usage.record(record);
        }
        usage.save(&usage_path)?;
        Ok(batch)
    }

    /// Evaluates an expression typed in the current grammar.
    pub fn calculate(&self, text: &str) -> Result<String> {
        let grammar = self.grammar()?;
        let mut cache = ProcedureCache::new();
        let mut evaluator = Evaluator::new(
            &self.registry,
            &self.converter,
            &self.config.tokens,
            &mut cache,
            self.config.limits(),
        );
        let value = evaluator.calculate(&grammar, text)?;
        Ok(evaluator.renderer().value_text(value, None)?)
    }

    /// Removes `id` and its dependents. Returns the removed ids.
    pub fn remove(&mut self, id: &str) -> Result<Vec<String>> {
        let removed: Vec<String> = self.registry.remove(id)?.into_iter().map(|op| op.id).collect();
        let usage_path = self.dir.join(USAGE_FILE);
        let mut usage = UsageIndex::load(&usage_path)?;
        usage.retain_registered(&self.registry);
        usage.save(&usage_path)?;
        self.save()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::DefinitionKind;
    use std::fs;

    fn config() -> Config {
        let mut config = Config {
            max_base: 8,
            seed: 11,
            workers: 2,
            ..Config::default()
        };
        config.operators.symbol_ranges = vec![[0x2A00, 0x2AFF]];
        config.operators.max_attempts = 200;
        config.operators.sample_bound = 1000;
        config.expressions.max_value = 20;
        config
    }

    #[test]
    fn workspace_should_survive_reopening() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ws = Workspace::init(dir.path(), config())?;
        assert_eq!(ws.registry().base_operators().count(), 7);
        assert!(Workspace::init(dir.path(), config()).is_err());

        let ids = ws.generate_operators(2, 2)?;
        let reopened = Workspace::open(dir.path(), config())?;
        for id in &ids {
            let op = reopened.registry().get(id).ok_or_else(|| anyhow!("{} missing", id))?;
            assert_eq!(op.order, 2);
            assert!(op.priority.is_some());
        }
        assert_eq!(reopened.registry().len(), ws.registry().len());
        Ok(())
    }

    #[test]
    fn workspace_should_define_and_calculate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ws = Workspace::init(dir.path(), config())?;
        assert_eq!(ws.calculate("1+2*3")?, "7");

        let id = ws.define("⊕", Shape::Binary, "a⊕b = { (a*b)+1 }")?;
        let op = ws.registry().get(&id).ok_or_else(|| anyhow!("{} missing", id))?;
        assert_eq!(op.definition_kind, Some(DefinitionKind::Simple));
        assert_eq!(op.order, 2);
        assert_eq!(ws.calculate("(2⊕3)")?, "7");
        assert!(ws.define("⊖", Shape::Binary, "a⊖b = { a }").is_err());

        let removed = ws.remove("4")?;
        assert!(removed.contains(&id));
        assert!(ws.registry().get(&id).is_none());
        Ok(())
    }

    #[test]
    fn workspace_should_append_expressions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ws = Workspace::init(dir.path(), config())?;
        let first = ws.generate_expressions(ExpressionRequest::new(6, 0))?;
        let second = ws.generate_expressions(ExpressionRequest::new(4, 0))?;
        assert_eq!((first.records.len(), first.failed), (6, 0));
        assert_eq!((second.records.len(), second.failed), (4, 0));
        let stored = store::load_expressions(&dir.path().join(EXPRESSIONS_FILE))?;
        assert_eq!(stored.len(), first.records.len() + second.records.len());
        if let (Some(a), Some(b)) = (first.records.last(), second.records.first()) {
            assert!(b.id > a.id);
        }

        let usage = UsageIndex::load(&dir.path().join(USAGE_FILE))?;
        for record in &stored {
            for op in record.used_operators.keys() {
                assert!(usage.expressions(op).contains(&record.id));
            }
        }
        assert!(fs::read_to_string(dir.path().join(USAGE_FILE))?.contains("\"op_id\""));
        Ok(())
    }
}
