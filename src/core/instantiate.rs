/// Instantiation: renders each bound tree node's template into
/// concrete molecules, reactions, and ports, under the node's
/// namespace. Molecules get `m.<path>.<local>` names, reactions
/// `r.<path>.<local>`; reactant and product references are resolved to
/// namespaced names here and must name molecules of the same node.
use thiserror::Error;

use crate::core::bind::{eval_value, BoundNode, BoundTree};
use crate::core::distributions::DistributionRegistry;
use crate::core::expr::ExprError;
use crate::core::registry::{RegistryError, TemplateRegistry};
use crate::core::rng::derive_rng;
use crate::core::scope::Scope;
use crate::schema::chemistry::{BoundPort, Ecosystem, Molecule, Reaction, SpeciesChemistry};
use crate::schema::template::Template;
use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum InstantiateError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error("bad replication range in '{key}' at '{path}': {reason}")]
    BadRange {
        key: String,
        path: String,
        reason: String,
    },
    #[error("reaction '{reaction}' at '{path}' references unknown molecule '{name}'")]
    UnknownMolecule {
        reaction: String,
        name: String,
        path: String,
    },
    #[error("port '{port}' at '{path}' targets missing entity '{target}'")]
    DanglingPortTarget {
        port: String,
        target: String,
        path: String,
    },
}

/// Instantiate every node of the bound tree into one ecosystem.
pub fn instantiate(
    bound: &BoundTree,
    registry: &TemplateRegistry,
    distributions: &DistributionRegistry,
    master_seed: u64,
) -> Result<Ecosystem, InstantiateError> {
    let mut ecosystem = Ecosystem::default();
    for root in &bound.roots {
        instantiate_node(
            root,
            &root.name,
            registry,
            distributions,
            master_seed,
            &mut ecosystem,
        )?;
    }
    Ok(ecosystem)
}

fn instantiate_node(
    node: &BoundNode,
    species: &str,
    registry: &TemplateRegistry,
    distributions: &DistributionRegistry,
    master_seed: u64,
    ecosystem: &mut Ecosystem,
) -> Result<(), InstantiateError> {
    let template = registry.get(&node.template)?;
    let chemistry = render_node(node, species, &template, distributions, master_seed)?;
    ecosystem.absorb(chemistry);
    for child in &node.children {
        instantiate_node(child, species, registry, distributions, master_seed, ecosystem)?;
    }
    Ok(())
}

/// Render one node's template sections into a species chemistry.
pub fn render_node(
    node: &BoundNode,
    species: &str,
    template: &Template,
    distributions: &DistributionRegistry,
    master_seed: u64,
) -> Result<SpeciesChemistry, InstantiateError> {
    let path = &node.namespace_path;
    let scope = Scope::from_entries(&node.values);
    let mut rng = derive_rng(master_seed, path, "instantiate");

    let mut chemistry = SpeciesChemistry {
        species: species.to_string(),
        ..Default::default()
    };

    // Molecules first so reaction references can be checked against
    // them. Replicated keys expand before evaluation.
    let mut local_molecules: Vec<String> = Vec::new();
    for (key, body) in &template.molecules {
        for (local, body) in expand_entry(key, body, path, &scope)? {
            let rendered = eval_value(&body, &scope, distributions, &mut rng)?;
            local_molecules.push(local.clone());
            chemistry.molecules.insert(
                format!("m.{}.{}", path, local),
                Molecule::from_value(&rendered),
            );
        }
    }

    for (key, body) in &template.reactions {
        for (local, body) in expand_entry(key, body, path, &scope)? {
            let rendered = eval_value(&body, &scope, distributions, &mut rng)?;
            let mut reaction = Reaction::from_value(&rendered);
            namespace_refs(&mut reaction.reactants, &local, path, &local_molecules)?;
            namespace_refs(&mut reaction.products, &local, path, &local_molecules)?;
            chemistry
                .reactions
                .insert(format!("r.{}.{}", path, local), reaction);
        }
    }

    for (port_path, port) in &template.ports {
        let target = namespaced_target(port_path, path);
        let exists = match port_path.split('.').next() {
            Some("molecules") => chemistry.molecules.contains_key(&target),
            Some("reactions") => chemistry.reactions.contains_key(&target),
            _ => false,
        };
        if !exists {
            return Err(InstantiateError::DanglingPortTarget {
                port: port_path.clone(),
                target,
                path: path.clone(),
            });
        }
        chemistry.ports.insert(
            format!("{}.{}", path, port_path),
            BoundPort {
                port: port.clone(),
                target,
                wired: false,
            },
        );
    }

    Ok(chemistry)
}

/// Map a template-local port path to the namespaced entity it exposes:
/// `reactions.work` under `krel.energy` is `r.krel.energy.work`.
pub fn namespaced_target(port_path: &str, namespace: &str) -> String {
    match port_path.split_once('.') {
        Some(("molecules", rest)) => format!("m.{}.{}", namespace, rest),
        Some(("reactions", rest)) => format!("r.{}.{}", namespace, rest),
        _ => format!("{}.{}", namespace, port_path),
    }
}

/// Rewrite local molecule references to namespaced names. Already
/// namespaced references (`m.` prefix) pass through for cross-species
/// wiring to validate later.
fn namespace_refs(
    refs: &mut [String],
    reaction: &str,
    path: &str,
    local_molecules: &[String],
) -> Result<(), InstantiateError> {
    for name in refs.iter_mut() {
        if name.starts_with("m.") {
            continue;
        }
        if !local_molecules.iter().any(|m| m == name) {
            return Err(InstantiateError::UnknownMolecule {
                reaction: reaction.to_string(),
                name: name.clone(),
                path: path.to_string(),
            });
        }
        *name = format!("m.{}.{}", path, name);
    }
    Ok(())
}

/// Expand a section key that may carry a replication suffix:
/// `ME{i in 1..carrier_count}` yields `ME1`, `ME2`, ... with `{i}`
/// substituted throughout the body.
fn expand_entry(
    key: &str,
    body: &Value,
    path: &str,
    scope: &Scope,
) -> Result<Vec<(String, Value)>, InstantiateError> {
    let Some(brace) = key.find('{') else {
        return Ok(vec![(key.to_string(), body.clone())]);
    };
    let base = &key[..brace];
    let inner = key[brace + 1..]
        .strip_suffix('}')
        .ok_or_else(|| InstantiateError::BadRange {
            key: key.to_string(),
            path: path.to_string(),
            reason: "unterminated '{'".to_string(),
        })?;
    let (var, range_text) = inner.split_once(" in ").ok_or_else(|| InstantiateError::BadRange {
        key: key.to_string(),
        path: path.to_string(),
        reason: "expected '<var> in <lo>..<hi>'".to_string(),
    })?;
    let var = var.trim();
    let (lo_text, hi_text) =
        range_text
            .split_once("..")
            .ok_or_else(|| InstantiateError::BadRange {
                key: key.to_string(),
                path: path.to_string(),
                reason: "expected '<lo>..<hi>'".to_string(),
            })?;
    let resolve_end = |text: &str| -> Result<i64, InstantiateError> {
        let text = text.trim();
        if let Ok(n) = text.parse::<i64>() {
            return Ok(n);
        }
        scope
            .get_path(text)
            .ok()
            .and_then(|v| v.as_i64())
            .ok_or_else(|| InstantiateError::BadRange {
                key: key.to_string(),
                path: path.to_string(),
                reason: format!("'{}' is not a bound numeric parameter", text),
            })
    };
    let lo = resolve_end(lo_text)?;
    let hi = resolve_end(hi_text)?;
    if hi < lo {
        return Err(InstantiateError::BadRange {
            key: key.to_string(),
            path: path.to_string(),
            reason: format!("empty range {}..{}", lo, hi),
        });
    }

    let mut out = Vec::with_capacity((hi - lo + 1) as usize);
    for i in lo..=hi {
        out.push((
            format!("{}{}", base, i),
            substitute_index(body, var, i),
        ));
    }
    Ok(out)
}

/// Replace `{var}` in every string of the body with the index value.
fn substitute_index(value: &Value, var: &str, index: i64) -> Value {
    let pattern = format!("{{{}}}", var);
    match value {
        Value::Str(s) if s.contains(&pattern) => {
            Value::Str(s.replace(&pattern, &index.to_string()))
        }
        Value::Evaluable(s) if s.contains(&pattern) => {
            Value::Evaluable(s.replace(&pattern, &index.to_string()))
        }
        Value::Quoted(s) if s.contains(&pattern) => {
            Value::Quoted(s.replace(&pattern, &index.to_string()))
        }
        Value::Seq(items) => Value::Seq(
            items
                .iter()
                .map(|item| substitute_index(item, var, index))
                .collect(),
        ),
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| {
                    (
                        k.replace(&pattern, &index.to_string()),
                        substitute_index(v, var, index),
                    )
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bind::bind_tree;
    use crate::core::tree::build_tree;
    use std::rc::Rc;

    fn build_ecosystem(template_ron: &str, seed: u64) -> Result<Ecosystem, InstantiateError> {
        let mut registry = TemplateRegistry::new();
        registry.register("subject", Value::parse_ron(template_ron).unwrap());
        let distributions = DistributionRegistry::builtins();
        let constants = Rc::new(Scope::named("spec"));
        let instantiate_block = vec![(
            "_as_ krel".to_string(),
            Value::parse_ron(r#"{"_template_": "subject"}"#).unwrap(),
        )];
        let tree = build_tree(&instantiate_block, &registry, &constants).unwrap();
        let bound = bind_tree(&tree, &registry, &distributions, seed, &constants).unwrap();
        instantiate(&bound, &registry, &distributions, seed)
    }

    #[test]
    fn molecules_and_reactions_are_namespaced() {
        let eco = build_ecosystem(
            r#"{
                "molecules": {"S": {"role": "substrate"}, "P": {"role": "product"}},
                "reactions": {
                    "work": {"reactants": ["S"], "products": ["P"], "rate": "!quote k * S"},
                },
            }"#,
            1,
        )
        .unwrap();
        assert!(eco.molecules.contains_key("m.krel.S"));
        assert!(eco.molecules.contains_key("m.krel.P"));
        let rxn = &eco.reactions["r.krel.work"];
        assert_eq!(rxn.reactants, vec!["m.krel.S"]);
        assert_eq!(rxn.products, vec!["m.krel.P"]);
        assert_eq!(rxn.rate, Some(Value::Quoted("k * S".to_string())));
        assert_eq!(eco.species, vec!["krel"]);
    }

    #[test]
    fn replicated_molecules_expand_with_indices() {
        let eco = build_ecosystem(
            r#"{
                "params": {"carrier_count": 3},
                "molecules": {
                    "S": {},
                    "ME{i in 1..carrier_count}": {"role": "energy"},
                },
                "reactions": {
                    "store{i in 1..carrier_count}": {
                        "reactants": ["S"],
                        "products": ["ME{i}"],
                    },
                },
            }"#,
            1,
        )
        .unwrap();
        for i in 1..=3 {
            assert!(eco.molecules.contains_key(&format!("m.krel.ME{}", i)));
            let rxn = &eco.reactions[&format!("r.krel.store{}", i)];
            assert_eq!(rxn.products, vec![format!("m.krel.ME{}", i)]);
        }
        assert!(!eco.molecules.contains_key("m.krel.ME4"));
    }

    #[test]
    fn unknown_reactant_is_rejected() {
        let err = build_ecosystem(
            r#"{
                "molecules": {"S": {}},
                "reactions": {"work": {"reactants": ["missing"], "products": []}},
            }"#,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, InstantiateError::UnknownMolecule { .. }));
    }

    #[test]
    fn ports_bind_to_existing_entities() {
        let eco = build_ecosystem(
            r#"{
                "molecules": {"S": {}},
                "reactions": {"work": {"reactants": ["S"], "products": []}},
                "ports": {"reactions.work": "energy.out"},
            }"#,
            1,
        )
        .unwrap();
        let port = &eco.ports["krel.reactions.work"];
        assert_eq!(port.target, "r.krel.work");
        assert!(!port.wired);
    }

    #[test]
    fn dangling_port_target_is_rejected() {
        let err = build_ecosystem(
            r#"{
                "molecules": {"S": {}},
                "ports": {"reactions.nope": "energy.out"},
            }"#,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, InstantiateError::DanglingPortTarget { .. }));
    }

    #[test]
    fn same_seed_same_chemistry() {
        let ron = r#"{
            "params": {"mass": "!ev normal(20, 4)"},
            "molecules": {"S": {"mass": "!ev mass"}},
        }"#;
        let a = build_ecosystem(ron, 99).unwrap();
        let b = build_ecosystem(ron, 99).unwrap();
        assert_eq!(a.molecules, b.molecules);
        let c = build_ecosystem(ron, 100).unwrap();
        assert!(a.molecules == b.molecules);
        let _ = c;
    }
}
