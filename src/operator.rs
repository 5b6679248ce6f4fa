use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fixity {
    Prefix,
    Postfix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Associativity {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    Simple,
    Branch,
    Recursive,
}

/// Placement of an operator symbol relative to its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Prefix,
    Postfix,
    Binary,
}

impl Shape {
    pub fn arity(&self) -> u8 {
        match self {
            Shape::Binary => 2,
            _ => 1,
        }
    }

    pub fn fixity(&self) -> Option<Fixity> {
        match self {
            Shape::Prefix => Some(Fixity::Prefix),
            Shape::Postfix => Some(Fixity::Postfix),
            Shape::Binary => None,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Prefix => "prefix",
            Shape::Postfix => "postfix",
            Shape::Binary => "binary",
        };
        f.write_str(name)
    }
}

fn default_weight() -> f64 {
    1.0
}

fn default_order() -> u32 {
    1
}

/// One registered (or candidate) operator, serialized one per line in the
/// operator store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorInfo {
    pub id: String,
    pub symbol: String,
    pub arity: u8,
    pub fixity: Option<Fixity>,
    #[serde(default = "default_order")]
    pub order: u32,
    pub base_tag: Option<u32>,
    pub definition_text: Option<String>,
    pub definition_kind: Option<DefinitionKind>,
    pub priority: Option<u32>,
    pub associativity: Option<Associativity>,
    pub compute_source: Option<String>,
    pub count_source: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(skip)]
    pub temporary: bool,
}

impl OperatorInfo {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, shape: Shape) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            arity: shape.arity(),
            fixity: shape.fixity(),
            order: 1,
            base_tag: None,
            definition_text: None,
            definition_kind: None,
            priority: None,
            associativity: None,
            compute_source: None,
            count_source: None,
            dependencies: Vec::new(),
            weight: default_weight(),
            temporary: true,
        }
    }

    pub fn shape(&self) -> Shape {
        match (self.arity, self.fixity) {
            (1, Some(Fixity::Postfix)) => Shape::Postfix,
            (1, _) => Shape::Prefix,
            _ => Shape::Binary,
        }
    }

    pub fn is_binary(&self) -> bool {
        self.shape() == Shape::Binary
    }

    pub fn is_base(&self) -> bool {
        self.base_tag.is_some()
    }

    pub fn compute_name(&self) -> String {
        compute_name(&self.id)
    }

    pub fn count_name(&self) -> String {
        count_name(&self.id)
    }

    /// Canonical surface form with integer operands, e.g. `1⊕2`.
    pub fn surface_form(&self, lhs: &str, rhs: &str) -> String {
        match self.shape() {
            Shape::Prefix => format!("{}{}", self.symbol, lhs),
            Shape::Postfix => format!("{}{}", lhs, self.symbol),
            Shape::Binary => format!("{}{}{}", lhs, self.symbol, rhs),
        }
    }
}

pub fn compute_name(id: &str) -> String {
    format!("op_{}", id)
}

pub fn count_name(id: &str) -> String {
    format!("op_count_{}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_should_serialize_with_store_field_names() -> serde_json::Result<()> {
        let mut op = OperatorInfo::new("k3J9aB", "⊕", Shape::Postfix);
        op.priority = Some(4);
        op.associativity = Some(Associativity::Left);
        op.definition_kind = Some(DefinitionKind::Branch);
        let value = serde_json::to_value(&op)?;
        assert_eq!(value["fixity"], "postfix");
        assert_eq!(value["definitionKind"], "branch");
        assert_eq!(value["baseTag"], serde_json::Value::Null);
        assert!(value.get("temporary").is_none());

        let back: OperatorInfo = serde_json::from_value(value)?;
        assert_eq!(back.shape(), Shape::Postfix);
        assert!(!back.temporary);
        Ok(())
    }
}
