//! Priority and associativity assignment.
//!
//! Priorities are buckets; every bucket has exactly one associativity.
//! Prefix operators only join right-associative buckets and postfix
//! operators only left-associative ones, so the two never share a level.
//! Binary operators may join any bucket and adopt its associativity, or
//! open a fresh bucket with a random associativity.

use crate::error::Result;
use crate::operator::{Associativity, Shape};
use crate::registry::Registry;
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct PriorityAssigner {
    buckets: BTreeMap<u32, Associativity>,
    max_priority: u32,
}

impl PriorityAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the bucket table from priorities already present in the
    /// registry, so only unprioritized operators get assigned.
    pub fn from_registry(registry: &Registry) -> Self {
        let mut assigner = Self::new();
        for op in registry.operators_by_priority() {
            if let (Some(p), Some(assoc)) = (op.priority, op.associativity) {
                assigner.buckets.entry(p).or_insert(assoc);
                assigner.max_priority = assigner.max_priority.max(p);
            }
        }
        assigner
    }

    pub fn buckets(&self) -> &BTreeMap<u32, Associativity> {
        &self.buckets
    }

    fn pick<R: Rng + ?Sized>(&mut self, rng: &mut R, shape: Shape) -> (u32, Associativity) {
        let fresh = self.max_priority + 1;
        let fixed = match shape {
            Shape::Prefix => Some(Associativity::Right),
            Shape::Postfix => Some(Associativity::Left),
            Shape::Binary => None,
        };
        let mut candidates: Vec<u32> = self
            .buckets
            .iter()
            .filter(|(_, a)| fixed.map_or(true, |f| **a == f))
            .map(|(p, _)| *p)
            .collect();
        candidates.push(fresh);
        let priority = *candidates.choose(rng).unwrap_or(&fresh);

        if priority == fresh {
            let assoc = fixed.unwrap_or_else(|| {
                if rng.gen_bool(0.5) {
                    Associativity::Left
                } else {
                    Associativity::Right
                }
            });
            self.max_priority = fresh;
            self.buckets.insert(fresh, assoc);
            (fresh, assoc)
        } else {
            let assoc = self.buckets.get(&priority).copied().unwrap_or(Associativity::Left);
            (priority, fixed.unwrap_or(assoc))
        }
    }

    /// Assigns every non-base operator without a priority, in registration
    /// order.
    pub fn assign<R: Rng + ?Sized>(&mut self, registry: &mut Registry, rng: &mut R) -> Result<()> {
        let pending: Vec<(String, Shape)> = registry
            .iter()
            .filter(|op| !op.is_base() && op.priority.is_none())
            .map(|op| (op.id.clone(), op.shape()))
            .collect();
        for (id, shape) in pending {
            let (priority, assoc) = self.pick(rng, shape);
            registry.set_priority(&id, priority, assoc)?;
            debug!("assigned {} operator {} priority {} ({:?})", shape, id, priority, assoc);
        }
        Ok(())
    }
}

/// Clears every priority and assigns all operators from scratch.
pub fn assign_priorities<R: Rng + ?Sized>(registry: &mut Registry, rng: &mut R) -> Result<()> {
    info!("assigning priorities to {} operator(s)", registry.len());
    registry.clear_priorities();
    let mut assigner = PriorityAssigner::new();
    assigner.assign(registry, rng)?;
    info!("assigned {} priority level(s)", assigner.buckets.len());
    Ok(())
}

/// Assigns only operators that have no priority yet, keeping existing
/// levels intact.
pub fn assign_missing<R: Rng + ?Sized>(registry: &mut Registry, rng: &mut R) -> Result<()> {
    let mut assigner = PriorityAssigner::from_registry(registry);
    assigner.assign(registry, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initial;
    use crate::operator::{Fixity, OperatorInfo};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashMap;

    fn registry_with_extra(extra: usize) -> Result<Registry> {
        let mut registry = initial::registry()?;
        let shapes = [Shape::Prefix, Shape::Postfix, Shape::Binary];
        for i in 0..extra {
            let symbol = char::from_u32(0x2200 + i as u32).map(String::from).unwrap_or_default();
            registry.add(OperatorInfo::new(format!("x{}", i), symbol, shapes[i % 3]))?;
        }
        Ok(registry)
    }

    fn check_buckets(registry: &Registry) {
        let mut assoc: HashMap<u32, Associativity> = HashMap::new();
        let mut fixities: HashMap<u32, Vec<Fixity>> = HashMap::new();
        for op in registry.iter() {
            let (Some(p), Some(a)) = (op.priority, op.associativity) else {
                panic!("operator {} has no priority", op.id);
            };
            assert_eq!(*assoc.entry(p).or_insert(a), a, "bucket {} mixes associativity", p);
            match op.shape() {
                Shape::Prefix => assert_eq!(a, Associativity::Right),
                Shape::Postfix => assert_eq!(a, Associativity::Left),
                Shape::Binary => {}
            }
            if let Some(f) = op.fixity {
                fixities.entry(p).or_default().push(f);
            }
        }
        for (p, fs) in fixities {
            assert!(
                !(fs.contains(&Fixity::Prefix) && fs.contains(&Fixity::Postfix)),
                "bucket {} mixes prefix and postfix",
                p
            );
        }
    }

    proptest! {
        #[test]
        fn buckets_are_consistent_after_assignment(seed in any::<u64>(), extra in 0usize..24) {
            let mut registry = registry_with_extra(extra).map_err(|e| TestCaseError::fail(e.to_string()))?;
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            assign_priorities(&mut registry, &mut rng).map_err(|e| TestCaseError::fail(e.to_string()))?;
            check_buckets(&registry);
            let max = registry.iter().filter_map(|op| op.priority).max().unwrap_or(0);
            prop_assert!(max as usize <= registry.len());
        }
    }

    #[test]
    fn assign_missing_keeps_existing_levels() -> Result<()> {
        let mut registry = registry_with_extra(6)?;
        let before: Vec<_> = initial::operators()
            .into_iter()
            .map(|op| (op.id, op.priority, op.associativity))
            .collect();
        assign_missing(&mut registry, &mut ChaCha8Rng::seed_from_u64(5))?;
        for (id, priority, assoc) in before {
            let op = registry.get(&id).ok_or_else(|| crate::error::Error::UnknownOperator(id.clone()))?;
            assert_eq!((op.priority, op.associativity), (priority, assoc));
        }
        check_buckets(&registry);
        Ok(())
    }

    #[test]
    fn base_operators_receive_no_priority() -> Result<()> {
        let mut registry = initial::registry()?;
        let mut base = OperatorInfo::new("b2", "ⁱ", Shape::Prefix);
        base.base_tag = Some(2);
        registry.add(base)?;
        assign_priorities(&mut registry, &mut ChaCha8Rng::seed_from_u64(0))?;
        assert_eq!(registry.by_base(2).and_then(|op| op.priority), None);
        Ok(())
    }
}
