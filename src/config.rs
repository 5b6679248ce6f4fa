//! Run configuration, read from YAML, TOML or JSON.

use crate::base::{BaseConverter, DEFAULT_DIGITS};
use crate::error::Error;
use crate::evaluator::SpecialTokens;
use crate::exprgen::ExpressionSettings;
use crate::interp::Limits;
use crate::opgen::OperatorSettings;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

/// How results and traces of expression records are rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordSettings {
    /// Render results in a base drawn per record.
    pub random_result_base: bool,
    pub result_base: Option<u32>,
    /// Flag records where some step produced more digits than its operands
    /// in this base.
    pub longer_result_base: Option<u32>,
    pub all_brackets: bool,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            random_result_base: false,
            result_base: None,
            longer_result_base: None,
            all_brackets: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_base: u32,
    pub digits: String,
    /// Magnitudes above this saturate to signed infinity.
    pub threshold: i64,
    pub max_steps: u64,
    pub timeout_ms: Option<u64>,
    pub seed: u64,
    /// Worker threads; 0 uses one per core.
    pub workers: usize,
    pub tokens: SpecialTokens,
    pub operators: OperatorSettings,
    pub expressions: ExpressionSettings,
    pub records: RecordSettings,
    pub logging: LogSettings,
}

impl Default for Config {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_base: 36,
            digits: DEFAULT_DIGITS.into(),
            threshold: limits.threshold,
            max_steps: limits.max_steps,
            timeout_ms: None,
            seed: 0,
            workers: 0,
            tokens: SpecialTokens::default(),
            operators: OperatorSettings::default(),
            expressions: ExpressionSettings::default(),
            records: RecordSettings::default(),
            logging: LogSettings::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            Some("toml") => {
                toml::from_str(&content).with_context(|| format!("Failed to parse TOML config: {}", path.display()))?
            }
            _ => {
                if let Ok(config) = serde_yaml::from_str(&content) {
                    config
                } else if let Ok(config) = toml::from_str(&content) {
                    config
                } else {
                    return Err(anyhow!(
                        "Could not parse config file {} (tried YAML, TOML)",
                        path.display()
                    ));
                }
            }
        };
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Loads `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.converter()?;
        if self.threshold <= 0 {
            return Err(Error::Config(format!("threshold {} must be positive", self.threshold)));
        }
        let e = &self.expressions;
        if e.min_value > e.max_value {
            return Err(Error::Config(format!(
                "expression value range {}..={} is empty",
                e.min_value, e.max_value
            )));
        }
        // Decimal literals need no digits beyond the converter's.
        if e.base.base != 10 && (e.base.base < 2 || e.base.base > self.max_base) {
            return Err(Error::UnsupportedBase {
                base: e.base.base,
                max: self.max_base,
            });
        }
        for base in [self.records.result_base, self.records.longer_result_base].into_iter().flatten() {
            if base < 2 || base > self.max_base {
                return Err(Error::UnsupportedBase {
                    base,
                    max: self.max_base,
                });
            }
        }
        self.operators.validate()
    }

    pub fn converter(&self) -> crate::Result<BaseConverter> {
        BaseConverter::new(&self.digits, self.max_base)
    }

    pub fn limits(&self) -> Limits {
        Limits {
            threshold: self.threshold,
            max_steps: self.max_steps,
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> Result<PathBuf> {
        let path = dir.path().join(name);
        fs::File::create(&path)?.write_all(content.as_bytes())?;
        Ok(path)
    }

    #[test]
    fn config_should_load_each_format() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let yaml = write(
            &dir,
            "run.yaml",
            "max_base: 16\nthreshold: 1000\nexpressions:\n  max_depth: 4\n  base:\n    random: true\noperators:\n  iteration_caps:\n    3: 500\n",
        )?;
        let config = Config::load(&yaml)?;
        assert_eq!(config.max_base, 16);
        assert_eq!(config.limits().threshold, 1000);
        assert_eq!(config.expressions.max_depth, 4);
        assert!(config.expressions.base.random);
        assert_eq!(config.operators.iteration_caps.get(&3), Some(&500));
        assert_eq!(config.tokens, SpecialTokens::default());

        let toml = write(&dir, "run.toml", "seed = 7\n[tokens]\ninf = \"∞\"\n")?;
        let config = Config::load(&toml)?;
        assert_eq!(config.seed, 7);
        assert_eq!(config.tokens.inf, "∞");

        let json = write(&dir, "run.json", r#"{"records": {"result_base": 2}}"#)?;
        assert_eq!(Config::load(&json)?.records.result_base, Some(2));
        Ok(())
    }

    #[test]
    fn config_should_reject_inconsistent_bases() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write(&dir, "bad.yaml", "max_base: 8\nrecords:\n  result_base: 16\n")?;
        assert!(Config::load(&path).is_err());
        let path = write(&dir, "short.yaml", "max_base: 12\ndigits: \"0123456789\"\n")?;
        assert!(Config::load(&path).is_err());
        let path = write(&dir, "octal.yaml", "max_base: 8\n")?;
        assert_eq!(Config::load(&path)?.expressions.base.fixed(), Some(10));
        let path = write(&dir, "wide.yaml", "max_base: 8\nexpressions:\n  base:\n    base: 9\n")?;
        assert!(Config::load(&path).is_err());
        Ok(())
    }
}
