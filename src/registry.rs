//! Storage and indices for accepted operators.
//!
//! The registry only grows by appending operators whose dependencies are
//! already present, so the dependency graph is acyclic by construction and
//! insertion order is a valid topological order.

use crate::error::{Error, Result};
use crate::operator::{Associativity, DefinitionKind, OperatorInfo, Shape};
use log::{debug, info};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

fn call_site_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\bop_(\w+)\(").ok()).as_ref()
}

/// Hash of a procedure body with its header line stripped, so that two
/// procedures that differ only by name hash equally.
pub fn body_hash(source: &str) -> Option<String> {
    let start = source.find('{')?;
    let end = source.rfind('}')?;
    if end <= start {
        return None;
    }
    let body = source[start + 1..end]
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    Some(hex::encode(Sha256::digest(body.as_bytes())))
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    operators: Vec<OperatorInfo>,
    by_id: HashMap<String, usize>,
    by_symbol: HashMap<String, Vec<String>>,
    by_base: BTreeMap<u32, String>,
    body_hashes: HashMap<String, String>,
    revisions: HashMap<String, u64>,
    generation: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_operators(operators: impl IntoIterator<Item = OperatorInfo>) -> Result<Self> {
        let mut registry = Self::new();
        for op in operators {
            registry.add(op)?;
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Bumped on every structural change; caches and parsers compare it to
    /// decide whether to rebuild.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn revision(&self, id: &str) -> Option<u64> {
        self.revisions.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperatorInfo> {
        self.operators.iter()
    }

    pub fn get(&self, id: &str) -> Option<&OperatorInfo> {
        self.by_id.get(id).map(|&i| &self.operators[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn by_symbol(&self, symbol: &str) -> Vec<&OperatorInfo> {
        self.by_symbol
            .get(symbol)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn by_base(&self, base: u32) -> Option<&OperatorInfo> {
        self.by_base.get(&base).and_then(|id| self.get(id))
    }

    pub fn base_operators(&self) -> impl Iterator<Item = &OperatorInfo> {
        self.by_base.values().filter_map(|id| self.get(id))
    }

    pub fn symbols(&self) -> HashSet<&str> {
        self.operators.iter().map(|op| op.symbol.as_str()).collect()
    }

    /// Looks up the operator a symbol denotes in a given placement.
    pub fn resolve(&self, symbol: &str, shape: Shape) -> Option<&OperatorInfo> {
        self.by_symbol(symbol)
            .into_iter()
            .find(|op| op.shape() == shape && !op.is_base())
    }

    pub fn find_duplicate_body(&self, hash: &str) -> Option<&str> {
        self.body_hashes.get(hash).map(String::as_str)
    }

    pub fn add(&mut self, mut op: OperatorInfo) -> Result<()> {
        if self.by_id.contains_key(&op.id) {
            return Err(Error::DuplicateId(op.id));
        }
        let shape = op.shape();
        if self.by_symbol(&op.symbol).iter().any(|o| o.shape() == shape) {
            return Err(Error::SymbolConflict {
                symbol: op.symbol,
                shape: shape.to_string(),
            });
        }
        if let Some(tag) = op.base_tag {
            if self.by_base.contains_key(&tag) {
                return Err(Error::DuplicateBase(tag));
            }
        }
        if let Some(missing) = op.dependencies.iter().find(|d| !self.by_id.contains_key(*d)) {
            return Err(Error::DependencyMissing {
                operator: op.id.clone(),
                dependency: missing.clone(),
            });
        }

        op.temporary = false;
        let id = op.id.clone();
        if let Some(hash) = op.compute_source.as_deref().and_then(body_hash) {
            self.body_hashes.entry(hash).or_insert_with(|| id.clone());
        }
        self.by_symbol.entry(op.symbol.clone()).or_default().push(id.clone());
        if let Some(tag) = op.base_tag {
            self.by_base.insert(tag, id.clone());
        }
        self.by_id.insert(id.clone(), self.operators.len());
        self.generation += 1;
        self.revisions.insert(id.clone(), self.generation);
        debug!("registered operator {} `{}` (order {})", id, op.symbol, op.order);
        self.operators.push(op);
        Ok(())
    }

    /// Every operator that depends on `id`, directly or transitively.
    pub fn dependents_of(&self, id: &str) -> HashSet<String> {
        let mut found: HashSet<String> = HashSet::new();
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for op in &self.operators {
                if op.dependencies.contains(&current) && found.insert(op.id.clone()) {
                    frontier.push(op.id.clone());
                }
            }
        }
        found
    }

    /// Removes `id` and everything that depends on it. Returns the removed
    /// operators in registration order.
    pub fn remove(&mut self, id: &str) -> Result<Vec<OperatorInfo>> {
        if !self.by_id.contains_key(id) {
            return Err(Error::UnknownOperator(id.to_string()));
        }
        let mut doomed = self.dependents_of(id);
        doomed.insert(id.to_string());

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.operators)
            .into_iter()
            .partition(|op| doomed.contains(&op.id));
        self.operators = kept;
        self.reindex();
        self.generation += 1;
        for op in &removed {
            self.revisions.remove(&op.id);
        }
        info!("removed {} operator(s) cascading from {}", removed.len(), id);
        Ok(removed)
    }

    fn reindex(&mut self) {
        self.by_id.clear();
        self.by_symbol.clear();
        self.by_base.clear();
        self.body_hashes.clear();
        for (i, op) in self.operators.iter().enumerate() {
            self.by_id.insert(op.id.clone(), i);
            self.by_symbol.entry(op.symbol.clone()).or_default().push(op.id.clone());
            if let Some(tag) = op.base_tag {
                self.by_base.insert(tag, op.id.clone());
            }
            if let Some(hash) = op.compute_source.as_deref().and_then(body_hash) {
                self.body_hashes.entry(hash).or_insert_with(|| op.id.clone());
            }
        }
    }

    /// Operator ids called from the compute procedure, minus self-reference.
    pub fn extract_dependencies(&self, op: &OperatorInfo) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        let (Some(source), Some(pattern)) = (op.compute_source.as_deref(), call_site_pattern()) else {
            return deps;
        };
        for cap in pattern.captures_iter(source) {
            let dep = &cap[1];
            if dep != op.id && !deps.iter().any(|d| d == dep) {
                deps.push(dep.to_string());
            }
        }
        deps
    }

    pub fn calculate_order(&self, op: &OperatorInfo) -> Result<u32> {
        let mut highest = None;
        for dep in &op.dependencies {
            let order = self
                .get(dep)
                .ok_or_else(|| Error::DependencyMissing {
                    operator: op.id.clone(),
                    dependency: dep.clone(),
                })?
                .order;
            highest = Some(highest.map_or(order, |h: u32| h.max(order)));
        }
        Ok(match (highest, op.definition_kind) {
            (None, _) => 1,
            (Some(h), Some(DefinitionKind::Recursive)) => h + 1,
            (Some(h), _) => h,
        })
    }

    pub fn max_order(&self) -> u32 {
        self.operators.iter().map(|op| op.order).max().unwrap_or(0)
    }

    /// Non-base operators split into prefix, postfix and binary lists.
    pub fn partition(&self) -> (Vec<&OperatorInfo>, Vec<&OperatorInfo>, Vec<&OperatorInfo>) {
        let mut prefix = Vec::new();
        let mut postfix = Vec::new();
        let mut binary = Vec::new();
        for op in self.operators.iter().filter(|op| !op.is_base()) {
            match op.shape() {
                Shape::Prefix => prefix.push(op),
                Shape::Postfix => postfix.push(op),
                Shape::Binary => binary.push(op),
            }
        }
        (prefix, postfix, binary)
    }

    /// Prioritized non-base operators, loosest binding first. The sort is
    /// stable so equal priorities keep registration order.
    pub fn operators_by_priority(&self) -> Vec<&OperatorInfo> {
        let mut ops: Vec<&OperatorInfo> = self
            .operators
            .iter()
            .filter(|op| !op.is_base() && op.priority.is_some())
            .collect();
        ops.sort_by_key(|op| op.priority);
        ops
    }

    pub fn clear_priorities(&mut self) {
        for op in self.operators.iter_mut() {
            op.priority = None;
            op.associativity = None;
        }
        self.generation += 1;
    }

    pub fn set_priority(&mut self, id: &str, priority: u32, associativity: Associativity) -> Result<()> {
        let index = *self
            .by_id
            .get(id)
            .ok_or_else(|| Error::UnknownOperator(id.to_string()))?;
        let op = &mut self.operators[index];
        op.priority = Some(priority);
        op.associativity = Some(associativity);
        self.generation += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initial;

    fn op(id: &str, symbol: &str, deps: &[&str], kind: DefinitionKind) -> OperatorInfo {
        let mut op = OperatorInfo::new(id, symbol, Shape::Binary);
        op.definition_kind = Some(kind);
        op.dependencies = deps.iter().map(|d| d.to_string()).collect();
        op
    }

    #[test]
    fn registry_should_reject_duplicates_and_dangling_dependencies() -> Result<()> {
        let mut reg = initial::registry()?;
        assert!(matches!(reg.add(op("1", "⊕", &[], DefinitionKind::Simple)), Err(Error::DuplicateId(_))));
        assert!(matches!(reg.add(op("x1", "+", &[], DefinitionKind::Simple)), Err(Error::SymbolConflict { .. })));
        assert!(matches!(
            reg.add(op("x2", "⊕", &["nope"], DefinitionKind::Simple)),
            Err(Error::DependencyMissing { .. })
        ));
        assert_eq!(reg.len(), 6);
        Ok(())
    }

    #[test]
    fn prefix_and_binary_may_share_a_symbol() -> Result<()> {
        let reg = initial::registry()?;
        assert_eq!(reg.resolve("-", Shape::Binary).map(|o| o.id.as_str()), Some("2"));
        assert_eq!(reg.resolve("-", Shape::Prefix).map(|o| o.id.as_str()), Some("3"));
        assert!(reg.resolve("-", Shape::Postfix).is_none());
        Ok(())
    }

    #[test]
    fn order_follows_dependency_kinds() -> Result<()> {
        let mut reg = initial::registry()?;
        let mut simple = op("s1", "⊕", &["4", "1"], DefinitionKind::Simple);
        simple.order = reg.calculate_order(&simple)?;
        assert_eq!(simple.order, 2);
        reg.add(simple)?;

        let mut rec = op("r1", "⊗", &["s1"], DefinitionKind::Recursive);
        rec.order = reg.calculate_order(&rec)?;
        assert_eq!(rec.order, 3);

        let leaf = op("l1", "⊘", &[], DefinitionKind::Branch);
        assert_eq!(reg.calculate_order(&leaf)?, 1);
        Ok(())
    }

    #[test]
    fn dependencies_are_extracted_from_call_sites() -> Result<()> {
        let reg = initial::registry()?;
        let mut candidate = op("me", "⊕", &[], DefinitionKind::Branch);
        candidate.compute_source = Some(
            "fn op_me(a, b) {\n    if op_4(a, b) > 0 {\n        return op_1(op_4(a, 2), b);\n    }\n    return op_me(a, b);\n}\n"
                .to_string(),
        );
        assert_eq!(reg.extract_dependencies(&candidate), vec!["4".to_string(), "1".to_string()]);
        Ok(())
    }

    #[test]
    fn remove_should_cascade_to_transitive_dependents() -> Result<()> {
        let mut reg = initial::registry()?;
        reg.add(op("d1", "⊕", &["1"], DefinitionKind::Simple))?;
        reg.add(op("d2", "⊗", &["d1"], DefinitionKind::Simple))?;
        reg.add(op("d3", "⊘", &["2"], DefinitionKind::Simple))?;
        let removed: Vec<String> = reg.remove("1")?.into_iter().map(|o| o.id).collect();
        assert_eq!(removed, vec!["1", "4", "d1", "d2"]);
        assert!(reg.get("d3").is_some());
        assert!(reg.resolve("⊕", Shape::Binary).is_none());
        assert!(matches!(reg.remove("1"), Err(Error::UnknownOperator(_))));
        Ok(())
    }

    #[test]
    fn priority_order_is_stable() -> Result<()> {
        let reg = initial::registry()?;
        let ids: Vec<&str> = reg.operators_by_priority().iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "4", "5", "6", "3"]);
        Ok(())
    }

    #[test]
    fn body_hash_ignores_procedure_name() {
        let a = body_hash("fn op_x(a, b) {\n    return op_1(b, a);\n}\n");
        let b = body_hash("fn op_y(a, b) {\n    return op_1(b, a);\n}\n");
        let c = body_hash("fn op_y(a, b) {\n    return op_1(a, b);\n}\n");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
