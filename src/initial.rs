//! The arithmetic operators every registry starts from.

use crate::error::Result;
use crate::operator::{Associativity, DefinitionKind, OperatorInfo, Shape};
use crate::registry::Registry;

/// Selection weight for an operator of a given order, decaying with order
/// but never below 0.05.
pub fn exponential_decay(order: u32) -> f64 {
    (-0.2 * order as f64).exp().max(0.05)
}

const UNIT_COUNT: &str = "fn op_count_{id}({params}) {\n    return 1;\n}\n";

struct Seed {
    id: &'static str,
    symbol: &'static str,
    shape: Shape,
    priority: u32,
    associativity: Associativity,
    order: u32,
    kind: DefinitionKind,
    definition: &'static str,
    compute: &'static str,
    count: Option<&'static str>,
    dependencies: &'static [&'static str],
    weight: f64,
}

fn seeds() -> Vec<Seed> {
    vec![
        Seed {
            id: "1",
            symbol: "+",
            shape: Shape::Binary,
            priority: 1,
            associativity: Associativity::Left,
            order: 1,
            kind: DefinitionKind::Simple,
            definition: "a+b",
            compute: "fn op_1(a, b) {\n    return add(a, b);\n}\n",
            count: None,
            dependencies: &[],
            weight: 1.0,
        },
        Seed {
            id: "2",
            symbol: "-",
            shape: Shape::Binary,
            priority: 1,
            associativity: Associativity::Left,
            order: 1,
            kind: DefinitionKind::Simple,
            definition: "a-b",
            compute: "fn op_2(a, b) {\n    return sub(a, b);\n}\n",
            count: None,
            dependencies: &[],
            weight: 1.0,
        },
        Seed {
            id: "3",
            symbol: "-",
            shape: Shape::Prefix,
            priority: 3,
            associativity: Associativity::Right,
            order: 1,
            kind: DefinitionKind::Simple,
            definition: "-a",
            compute: "fn op_3(a) {\n    return neg(a);\n}\n",
            count: None,
            dependencies: &[],
            weight: 1.0,
        },
        Seed {
            id: "4",
            symbol: "*",
            shape: Shape::Binary,
            priority: 2,
            associativity: Associativity::Left,
            order: 2,
            kind: DefinitionKind::Recursive,
            definition: "a*b",
            compute: "fn op_4(a, b) {\n    return mul(a, b);\n}\n",
            count: Some(
                "fn op_count_4(a, b) {\n    if is_special(a) or is_special(b) {\n        return 1;\n    }\n    return max(min(abs(a), abs(b)), 1);\n}\n",
            ),
            dependencies: &["1"],
            weight: exponential_decay(2),
        },
        Seed {
            id: "5",
            symbol: "/",
            shape: Shape::Binary,
            priority: 2,
            associativity: Associativity::Left,
            order: 2,
            kind: DefinitionKind::Recursive,
            definition: "a/b",
            compute: "fn op_5(a, b) {\n    return floordiv(a, b);\n}\n",
            count: Some(
                "fn op_count_5(a, b) {\n    if is_special(a) or is_special(b) or b == 0 {\n        return 1;\n    }\n    return max(floordiv(abs(a), abs(b)), 1);\n}\n",
            ),
            dependencies: &["2"],
            weight: 0.05,
        },
        Seed {
            id: "6",
            symbol: "%",
            shape: Shape::Binary,
            priority: 2,
            associativity: Associativity::Left,
            order: 2,
            kind: DefinitionKind::Recursive,
            definition: "a%b",
            compute: "fn op_6(a, b) {\n    return floormod(a, b);\n}\n",
            count: Some(
                "fn op_count_6(a, b) {\n    if is_special(a) or is_special(b) or b == 0 {\n        return 1;\n    }\n    return max(floordiv(abs(a), abs(b)), 1);\n}\n",
            ),
            dependencies: &["2"],
            weight: 0.05,
        },
    ]
}

pub fn operators() -> Vec<OperatorInfo> {
    seeds()
        .into_iter()
        .map(|seed| {
            let params = if seed.shape == Shape::Binary { "a, b" } else { "a" };
            let mut op = OperatorInfo::new(seed.id, seed.symbol, seed.shape);
            op.priority = Some(seed.priority);
            op.associativity = Some(seed.associativity);
            op.order = seed.order;
            op.definition_kind = Some(seed.kind);
            op.definition_text = Some(seed.definition.to_string());
            op.compute_source = Some(seed.compute.to_string());
            op.count_source = Some(match seed.count {
                Some(src) => src.to_string(),
                None => UNIT_COUNT.replace("{id}", seed.id).replace("{params}", params),
            });
            op.dependencies = seed.dependencies.iter().map(|d| d.to_string()).collect();
            op.weight = seed.weight;
            op
        })
        .collect()
}

pub fn registry() -> Result<Registry> {
    Registry::from_operators(operators())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_should_floor_at_five_percent() {
        assert!((exponential_decay(2) - (-0.4f64).exp()).abs() < 1e-12);
        assert_eq!(exponential_decay(40), 0.05);
    }

    #[test]
    fn initial_registry_should_hold_arithmetic() -> Result<()> {
        let reg = registry()?;
        assert_eq!(reg.len(), 6);
        for op in reg.iter() {
            assert_eq!(reg.calculate_order(op)?, op.order);
        }
        assert_eq!(reg.get("3").and_then(|o| o.count_source.as_deref()), Some("fn op_count_3(a) {\n    return 1;\n}\n"));
        Ok(())
    }
}
