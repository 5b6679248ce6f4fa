//! Parallel generation of operators and expression records.
//!
//! Every item draws from its own `ChaCha8Rng` seeded with `seed + index`,
//! so a batch is reproducible regardless of how rayon schedules it.
//! Operator candidates are proposed in parallel against a registry
//! snapshot; the caller's thread merges them one at a time and rechecks
//! anything that another proposal of the same round could have taken.

use crate::base::BaseConverter;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::evaluator::{Evaluator, ExpressionRecord, RecordOptions};
use crate::exprgen::{AtomChoice, ExpressionGenerator};
use crate::interp::ProcedureCache;
use crate::opgen::{Accepted, OperatorGenerator};
use crate::parser::DefinitionParser;
use crate::registry::{body_hash, Registry};
use log::{debug, info, warn};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shaping {
    Random,
    /// Every operator node applies this operator.
    FixedOperator(String),
    /// This operator applied once to literals.
    SingleOperator(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionRequest {
    pub count: usize,
    pub first_id: u64,
    pub shaping: Shaping,
    pub max_order: Option<u32>,
    pub atoms: AtomChoice,
}

impl ExpressionRequest {
    pub fn new(count: usize, first_id: u64) -> Self {
        Self {
            count,
            first_id,
            shaping: Shaping::Random,
            max_order: None,
            atoms: AtomChoice::Number,
        }
    }
}

#[derive(Debug, Default)]
pub struct ExpressionBatch {
    pub records: Vec<ExpressionRecord>,
    pub failed: usize,
}

fn item_rng(seed: u64, index: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed.wrapping_add(index))
}

pub struct Batch<'a> {
    config: &'a Config,
    converter: &'a BaseConverter,
    pool: ThreadPool,
}

impl<'a> Batch<'a> {
    pub fn new(config: &'a Config, converter: &'a BaseConverter) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .build()
            .map_err(|e| Error::Config(format!("cannot start worker pool: {}", e)))?;
        Ok(Self { config, converter, pool })
    }

    /// Generates `request.count` records. An expression that fails to
    /// generate or evaluate is logged and skipped.
    pub fn expressions(&self, registry: &Registry, request: &ExpressionRequest, seed: u64) -> Result<ExpressionBatch> {
        let fixed = match &request.shaping {
            Shaping::Random => None,
            Shaping::FixedOperator(id) | Shaping::SingleOperator(id) => {
                Some(registry.get(id).ok_or_else(|| Error::UnknownOperator(id.clone()))?)
            }
        };
        let mut generator = ExpressionGenerator::new(registry, &self.config.expressions, self.converter.max_base());
        if let Some(order) = request.max_order {
            generator = generator.with_max_order(order);
        }
        let limits = self.config.limits();
        let records = &self.config.records;

        let results: Vec<Result<ExpressionRecord>> = self.pool.install(|| {
            (0..request.count)
                .into_par_iter()
                .map_init(ProcedureCache::new, |cache, i| {
                    let id = request.first_id + i as u64;
                    let mut rng = item_rng(seed, id);
                    let depth = self.config.expressions.max_depth;
                    let tree = match (&request.shaping, fixed) {
                        (Shaping::FixedOperator(_), Some(op)) => {
                            generator.fixed_operator_tree(&mut rng, op, depth, request.atoms)?
                        }
                        (Shaping::SingleOperator(_), Some(op)) => generator.single_operator_tree(&mut rng, op),
                        _ => generator.tree(&mut rng, depth, request.atoms)?,
                    };
                    let result_base = if records.random_result_base {
                        Some(rng.gen_range(2..=self.converter.max_base()))
                    } else {
                        records.result_base
                    };
                    let options = RecordOptions {
                        base: self.config.expressions.base.fixed(),
                        result_base,
                        longer_result_base: records.longer_result_base,
                    };
                    Evaluator::new(registry, self.converter, &self.config.tokens, cache, limits)
                        .with_all_brackets(records.all_brackets)
                        .record(id, &tree, &options)
                })
                .collect()
        });

        let mut batch = ExpressionBatch::default();
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(record) => batch.records.push(record),
                Err(e) => {
                    warn!("skipping expression {}: {}", request.first_id + i as u64, e);
                    batch.failed += 1;
                }
            }
        }
        info!(
            "generated {} expression(s), {} skipped",
            batch.records.len(),
            batch.failed
        );
        Ok(batch)
    }

    /// Generates and registers `count` operators of `order`.
    pub fn operators(&self, registry: &mut Registry, order: u32, count: usize, seed: u64) -> Result<Vec<String>> {
        let generator = OperatorGenerator::new(&self.config.operators, self.converter, self.config.limits());
        let mut added = Vec::with_capacity(count);
        let mut round: u64 = 0;
        while added.len() < count {
            if round as usize >= self.config.operators.max_attempts.max(1) {
                return Err(Error::Generation(format!(
                    "only {} of {} operator(s) of order {} merged after {} rounds",
                    added.len(),
                    count,
                    order,
                    round
                )));
            }
            let wanted = count - added.len();
            let snapshot: &Registry = registry;
            let proposals: Vec<Result<Accepted>> = self.pool.install(|| {
                (0..wanted)
                    .into_par_iter()
                    .map_init(
                        || (ProcedureCache::new(), DefinitionParser::new(snapshot)),
                        |(cache, parser), i| {
                            let mut rng = item_rng(seed, (round << 32) | i as u64);
                            generator.generate(&mut rng, snapshot, parser, cache, order)
                        },
                    )
                    .collect()
            });
            round += 1;

            let mut merged = 0;
            let mut first_error = None;
            for proposal in proposals {
                match proposal {
                    Ok(accepted) => {
                        if let Some(id) = self.merge(registry, accepted)? {
                            added.push(id);
                            merged += 1;
                        }
                    }
                    Err(e) if e.is_candidate_local() || matches!(e, Error::Generation(_)) => {
                        debug!("proposal failed: {}", e);
                        first_error.get_or_insert(e);
                    }
                    Err(e) => return Err(e),
                }
            }
            if merged == 0 {
                if let Some(e) = first_error {
                    return Err(e);
                }
            }
            debug!("round {} merged {} operator(s) of order {}", round, merged, order);
        }
        info!("registered {} operator(s) of order {}", added.len(), order);
        Ok(added)
    }

    /// Registers `accepted` unless an operator merged earlier in the same
    /// round already took its id, symbol or body.
    fn merge(&self, registry: &mut Registry, accepted: Accepted) -> Result<Option<String>> {
        let op = accepted.operator;
        if let Some(existing) = op
            .compute_source
            .as_deref()
            .and_then(body_hash)
            .and_then(|hash| registry.find_duplicate_body(&hash))
        {
            debug!("dropping {}: body duplicates {}", op.id, existing);
            return Ok(None);
        }
        let id = op.id.clone();
        match registry.add(op) {
            Ok(()) => Ok(Some(id)),
            Err(e @ (Error::DuplicateId(_) | Error::SymbolConflict { .. })) => {
                debug!("dropping {}: {}", id, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initial;
    use crate::interp::Limits;

    fn config() -> Config {
        let mut config = Config {
            max_base: 16,
            workers: 2,
            ..Config::default()
        };
        config.operators.max_attempts = 200;
        config.operators.sample_bound = 1000;
        config.expressions.max_value = 20;
        config
    }

    #[test]
    fn expression_batches_are_reproducible() -> Result<()> {
        let config = config();
        let converter = config.converter()?;
        let mut registry = initial::registry()?;
        OperatorGenerator::new(&config.operators, &converter, Limits::default())
            .seed_base_operators(&mut ChaCha8Rng::seed_from_u64(1), &mut registry)?;
        let batch = Batch::new(&config, &converter)?;

        let request = ExpressionRequest::new(25, 100);
        let first = batch.expressions(&registry, &request, 9)?;
        let second = batch.expressions(&registry, &request, 9)?;
        assert_eq!(first.records.len() + first.failed, 25);
        assert_eq!(first.records, second.records);
        assert!(first.records.iter().all(|r| (100..125).contains(&r.id)));
        Ok(())
    }

    #[test]
    fn single_operator_batches_use_only_that_operator() -> Result<()> {
        let config = config();
        let converter = config.converter()?;
        let registry = initial::registry()?;
        let batch = Batch::new(&config, &converter)?;
        let request = ExpressionRequest {
            shaping: Shaping::SingleOperator("4".into()),
            ..ExpressionRequest::new(10, 0)
        };
        let out = batch.expressions(&registry, &request, 3)?;
        assert_eq!(out.records.len(), 10);
        for record in &out.records {
            assert_eq!(record.used_operators.keys().collect::<Vec<_>>(), vec!["4"]);
            assert_eq!(record.operation_count, 1);
        }

        let missing = ExpressionRequest {
            shaping: Shaping::FixedOperator("nope".into()),
            ..ExpressionRequest::new(1, 0)
        };
        assert!(matches!(
            batch.expressions(&registry, &missing, 3),
            Err(Error::UnknownOperator(_))
        ));
        Ok(())
    }

    #[test]
    fn parallel_operator_proposals_merge_without_conflicts() -> Result<()> {
        let config = config();
        let converter = config.converter()?;
        let mut registry = initial::registry()?;
        let batch = Batch::new(&config, &converter)?;
        let ids = batch.operators(&mut registry, 2, 4, 5)?;
        assert_eq!(ids.len(), 4);
        for id in &ids {
            let op = registry.get(id).ok_or_else(|| Error::UnknownOperator(id.clone()))?;
            assert_eq!(op.order, 2);
            assert_eq!(registry.calculate_order(op)?, 2);
        }
        let bodies: std::collections::HashSet<_> = registry
            .iter()
            .filter_map(|op| op.compute_source.as_deref().and_then(body_hash))
            .collect();
        assert_eq!(bodies.len(), registry.len());
        Ok(())
    }
}
