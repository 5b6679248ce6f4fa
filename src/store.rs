//! Line-delimited JSON stores for operators and expression records.

use crate::error::Result;
use crate::evaluator::ExpressionRecord;
use crate::operator::OperatorInfo;
use crate::registry::Registry;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

fn write_lines<T: Serialize>(writer: &mut impl Write, items: impl IntoIterator<Item = T>) -> Result<usize> {
    let mut n = 0;
    for item in items {
        serde_json::to_writer(&mut *writer, &item)?;
        writer.write_all(b"\n")?;
        n += 1;
    }
    Ok(n)
}

fn append<T: Serialize>(path: &Path, items: impl IntoIterator<Item = T>) -> Result<usize> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    let n = write_lines(&mut writer, items)?;
    writer.flush()?;
    Ok(n)
}

/// Replaces `path` with one line per item. Readers never see a partial file.
fn replace<T: Serialize>(path: &Path, items: impl IntoIterator<Item = T>) -> Result<usize> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("jsonl.tmp");
    let n = {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        let n = write_lines(&mut writer, items)?;
        writer.flush()?;
        n
    };
    fs::rename(&tmp, path)?;
    Ok(n)
}

fn read_lines<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut items = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        items.push(serde_json::from_str(&line)?);
    }
    Ok(items)
}

/// Rewrites the operator store from `registry`, in registration order.
pub fn save_operators(path: &Path, registry: &Registry) -> Result<()> {
    let n = replace(path, registry.iter())?;
    debug!("saved {} operator(s) to {}", n, path.display());
    Ok(())
}

pub fn append_operators<'a>(path: &Path, operators: impl IntoIterator<Item = &'a OperatorInfo>) -> Result<usize> {
    append(path, operators)
}

pub fn load_operators(path: &Path) -> Result<Vec<OperatorInfo>> {
    read_lines(path)
}

/// Rebuilds a registry from the store. Dependencies precede their
/// dependents because the store keeps registration order.
pub fn load_registry(path: &Path) -> Result<Registry> {
    let registry = Registry::from_operators(load_operators(path)?)?;
    debug!("loaded {} operator(s) from {}", registry.len(), path.display());
    Ok(registry)
}

pub fn append_expressions(path: &Path, records: &[ExpressionRecord]) -> Result<usize> {
    append(path, records)
}

pub fn load_expressions(path: &Path) -> Result<Vec<ExpressionRecord>> {
    read_lines(path)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct UsageLine {
    op_id: String,
    expr_id: Vec<u64>,
}

/// Which expressions use which operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageIndex {
    by_operator: BTreeMap<String, Vec<u64>>,
}

impl UsageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut index = Self::new();
        if !path.exists() {
            return Ok(index);
        }
        for line in read_lines::<UsageLine>(path)? {
            index.by_operator.entry(line.op_id).or_default().extend(line.expr_id);
        }
        Ok(index)
    }

    pub fn record(&mut self, record: &ExpressionRecord) {
        for op in record.used_operators.keys() {
            let ids = self.by_operator.entry(op.clone()).or_default();
            if !ids.contains(&record.id) {
                ids.push(record.id);
            }
        }
    }

    pub fn expressions(&self, op_id: &str) -> &[u64] {
        self.by_operator.get(op_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drops operators that no longer exist in `registry`.
    pub fn retain_registered(&mut self, registry: &Registry) {
        let before = self.by_operator.len();
        self.by_operator.retain(|op, _| registry.contains(op));
        if self.by_operator.len() != before {
            warn!("dropped {} stale operator(s) from the usage index", before - self.by_operator.len());
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        replace(
            path,
            self.by_operator.iter().map(|(op, ids)| UsageLine {
                op_id: op.clone(),
                expr_id: ids.clone(),
            }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initial;

    #[test]
    fn operator_store_restores_the_registry() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ops").join("operators.jsonl");
        let registry = initial::registry()?;
        save_operators(&path, &registry)?;
        assert!(!path.with_extension("jsonl.tmp").exists());

        let loaded = load_registry(&path)?;
        let ids: Vec<_> = loaded.iter().map(|op| op.id.as_str()).collect();
        let expected: Vec<_> = registry.iter().map(|op| op.id.as_str()).collect();
        assert_eq!(ids, expected);
        assert_eq!(loaded.get("4").map(|op| op.order), Some(2));
        Ok(())
    }

    #[test]
    fn usage_index_merges_lines_per_operator() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("op2expr.jsonl");
        fs::write(&path, "{\"op_id\":\"1\",\"expr_id\":[3]}\n\n{\"op_id\":\"1\",\"expr_id\":[5]}\n")?;
        let mut index = UsageIndex::load(&path)?;
        assert_eq!(index.expressions("1"), &[3, 5]);
        assert!(index.expressions("9").is_empty());

        index.retain_registered(&Registry::new());
        index.save(&path)?;
        assert_eq!(fs::read_to_string(&path)?, "");
        Ok(())
    }
}
