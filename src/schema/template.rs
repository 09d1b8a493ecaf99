/// Template model — parametric, composable, port-typed building blocks.
///
/// Templates are parsed out of resolved document trees and are
/// immutable once loaded. `extends:` inheritance is flattened by the
/// registry before instantiation ever sees a template.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::value::Value;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid port spec '{spec}' at '{path}': expected 'type.direction'")]
    BadPortSpec { spec: String, path: String },
    #[error("invalid port direction '{direction}' at '{path}': must be 'in' or 'out'")]
    BadPortDirection { direction: String, path: String },
    #[error("template '{template}': {reason}")]
    BadStructure { template: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    In,
    Out,
}

/// A typed, directional connection point exposed for composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub port_type: String,
    pub direction: PortDirection,
}

impl Port {
    /// Parse a `"type.direction"` spec, e.g. `"energy.out"`.
    pub fn parse(spec: &str, path: &str) -> Result<Port, TemplateError> {
        let (port_type, direction) = spec.rsplit_once('.').ok_or_else(|| {
            TemplateError::BadPortSpec {
                spec: spec.to_string(),
                path: path.to_string(),
            }
        })?;
        let direction = match direction {
            "in" => PortDirection::In,
            "out" => PortDirection::Out,
            other => {
                return Err(TemplateError::BadPortDirection {
                    direction: other.to_string(),
                    path: path.to_string(),
                })
            }
        };
        Ok(Port {
            port_type: port_type.to_string(),
            direction,
        })
    }

    /// Ports connect when directions are complementary and types match;
    /// `any` matches every type. Direction is always enforced.
    pub fn compatible_with(&self, other: &Port) -> bool {
        if self.direction == other.direction {
            return false;
        }
        self.port_type == other.port_type
            || self.port_type == "any"
            || other.port_type == "any"
    }
}

/// One `requires:` clause of an interaction template: the species bound
/// to `role` must expose a port of `port_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiresClause {
    pub role: String,
    pub port_type: String,
}

/// One `reactions:` entry of an interaction template. Either a fresh
/// reaction body, or a structural edit against an existing reaction of
/// a participating species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionModifier {
    pub name: String,
    /// Port path on a role to extend, e.g. `"producer.reactions.work"`.
    pub extends: Option<String>,
    pub adds_reactant: Vec<String>,
    pub adds_product: Vec<String>,
    /// Role whose namespace the edit applies in.
    pub in_role: Option<String>,
    /// Remaining body fields for fresh reactions.
    pub body: Value,
}

/// A named, parametric, reusable definition of molecules, reactions,
/// and ports. Interaction templates additionally carry `requires`,
/// `creates`, and reaction modifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub extends: Option<String>,
    pub params: Vec<(String, Value)>,
    pub molecules: Vec<(String, Value)>,
    pub reactions: Vec<(String, Value)>,
    /// Port path (e.g. `"reactions.work"`) to port.
    pub ports: Vec<(String, Port)>,
    /// Raw nested instantiation block, expanded by the tree builder.
    pub instances: Vec<(String, Value)>,
    /// Template-level wiring edges: local port path to target port path.
    pub wiring: Vec<(String, String)>,
    pub requires: Vec<RequiresClause>,
    pub creates: Vec<(String, Value)>,
    pub modifiers: Vec<ReactionModifier>,
}

impl Template {
    /// Parse a template from a resolved document tree.
    pub fn parse(name: &str, data: &Value) -> Result<Template, TemplateError> {
        let entries = data.as_map().ok_or_else(|| TemplateError::BadStructure {
            template: name.to_string(),
            reason: "template body must be a map".to_string(),
        })?;

        let mut template = Template {
            name: name.to_string(),
            extends: None,
            params: Vec::new(),
            molecules: Vec::new(),
            reactions: Vec::new(),
            ports: Vec::new(),
            instances: Vec::new(),
            wiring: Vec::new(),
            requires: Vec::new(),
            creates: Vec::new(),
            modifiers: Vec::new(),
        };

        for (key, value) in entries {
            match key.as_str() {
                "extends" => {
                    template.extends = value.as_str().map(str::to_string);
                }
                "params" => {
                    template.params = map_entries(name, key, value)?;
                }
                "molecules" => {
                    template.molecules = map_entries(name, key, value)?;
                }
                "reactions" => {
                    template.reactions = map_entries(name, key, value)?;
                }
                "ports" => {
                    for (path, spec) in map_entries(name, key, value)? {
                        let spec_str =
                            spec.as_str().ok_or_else(|| TemplateError::BadPortSpec {
                                spec: format!("{:?}", spec),
                                path: path.clone(),
                            })?;
                        template.ports.push((path.clone(), Port::parse(spec_str, &path)?));
                    }
                }
                "instances" | "_instantiate_" => {
                    template.instances = map_entries(name, key, value)?;
                }
                "wiring" => {
                    for (from, to) in map_entries(name, key, value)? {
                        let to = to.as_str().ok_or_else(|| TemplateError::BadStructure {
                            template: name.to_string(),
                            reason: format!("wiring target for '{}' must be a string", from),
                        })?;
                        template.wiring.push((from, to.to_string()));
                    }
                }
                "requires" => {
                    template.requires = parse_requires(name, value)?;
                }
                "creates" => {
                    template.creates = map_entries(name, key, value)?;
                }
                _ => {
                    // Unknown sections are tolerated so template files can
                    // carry documentation keys.
                }
            }
        }

        // Interaction reaction entries with modifier keys are split out
        // so wiring can apply them as structural edits.
        let mut plain_reactions = Vec::new();
        for (rxn_name, body) in template.reactions.drain(..) {
            if body.get("extends").is_some()
                || body.get("adds_product").is_some()
                || body.get("adds_reactant").is_some()
                || body.get("in").is_some()
            {
                template
                    .modifiers
                    .push(parse_modifier(name, &rxn_name, &body)?);
            } else {
                plain_reactions.push((rxn_name, body));
            }
        }
        template.reactions = plain_reactions;

        Ok(template)
    }

    /// True if this template carries interaction-only sections.
    pub fn is_interaction(&self) -> bool {
        !self.requires.is_empty() || !self.creates.is_empty() || !self.modifiers.is_empty()
    }

    pub fn param_default(&self, name: &str) -> Option<&Value> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn port_at(&self, path: &str) -> Option<&Port> {
        self.ports.iter().find(|(p, _)| p == path).map(|(_, port)| port)
    }
}

fn map_entries(
    template: &str,
    key: &str,
    value: &Value,
) -> Result<Vec<(String, Value)>, TemplateError> {
    value
        .as_map()
        .map(|entries| entries.to_vec())
        .ok_or_else(|| TemplateError::BadStructure {
            template: template.to_string(),
            reason: format!("'{}' must be a map", key),
        })
}

fn parse_requires(template: &str, value: &Value) -> Result<Vec<RequiresClause>, TemplateError> {
    let items = value.as_seq().ok_or_else(|| TemplateError::BadStructure {
        template: template.to_string(),
        reason: "'requires' must be a list".to_string(),
    })?;
    let mut clauses = Vec::with_capacity(items.len());
    for item in items {
        let role = item
            .get("role")
            .and_then(Value::as_str)
            .ok_or_else(|| TemplateError::BadStructure {
                template: template.to_string(),
                reason: "requires entry missing 'role'".to_string(),
            })?;
        let port_type = item
            .get("port")
            .and_then(Value::as_str)
            .ok_or_else(|| TemplateError::BadStructure {
                template: template.to_string(),
                reason: "requires entry missing 'port'".to_string(),
            })?;
        clauses.push(RequiresClause {
            role: role.to_string(),
            port_type: port_type.to_string(),
        });
    }
    Ok(clauses)
}

fn parse_modifier(
    template: &str,
    rxn_name: &str,
    body: &Value,
) -> Result<ReactionModifier, TemplateError> {
    let str_list = |key: &str| -> Result<Vec<String>, TemplateError> {
        match body.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Seq(items)) => items
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        TemplateError::BadStructure {
                            template: template.to_string(),
                            reason: format!("'{}' entries must be strings", key),
                        }
                    })
                })
                .collect(),
            Some(_) => Err(TemplateError::BadStructure {
                template: template.to_string(),
                reason: format!("'{}' must be a list", key),
            }),
        }
    };

    let mut stripped = Vec::new();
    if let Some(entries) = body.as_map() {
        for (k, v) in entries {
            if !matches!(k.as_str(), "extends" | "adds_product" | "adds_reactant" | "in") {
                stripped.push((k.clone(), v.clone()));
            }
        }
    }

    Ok(ReactionModifier {
        name: rxn_name.to_string(),
        extends: body.get("extends").and_then(Value::as_str).map(str::to_string),
        adds_reactant: str_list("adds_reactant")?,
        adds_product: str_list("adds_product")?,
        in_role: body.get("in").and_then(Value::as_str).map(str::to_string),
        body: Value::Map(stripped),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_parse_and_compatibility() {
        let out = Port::parse("energy.out", "reactions.work").unwrap();
        let input = Port::parse("energy.in", "reactions.build").unwrap();
        let molecule_in = Port::parse("molecule.in", "molecules.food").unwrap();
        let any_in = Port::parse("any.in", "molecules.x").unwrap();

        assert!(out.compatible_with(&input));
        assert!(input.compatible_with(&out));
        assert!(!out.compatible_with(&molecule_in));
        assert!(!out.compatible_with(&out));
        assert!(out.compatible_with(&any_in));
    }

    #[test]
    fn port_parse_rejects_bad_specs() {
        assert!(matches!(
            Port::parse("energy", "p"),
            Err(TemplateError::BadPortSpec { .. })
        ));
        assert!(matches!(
            Port::parse("energy.sideways", "p"),
            Err(TemplateError::BadPortDirection { .. })
        ));
    }

    #[test]
    fn parse_basic_template() {
        let data = Value::parse_ron(
            r#"{
                "params": {"carrier_count": 3},
                "molecules": {"ME1": {"role": "energy"}},
                "reactions": {"work": {"reactants": ["ME1"], "products": []}},
                "ports": {"reactions.work": "energy.out"},
            }"#,
        )
        .unwrap();
        let t = Template::parse("energy_cycle", &data).unwrap();
        assert_eq!(t.name, "energy_cycle");
        assert_eq!(t.param_default("carrier_count"), Some(&Value::Int(3)));
        assert_eq!(t.molecules.len(), 1);
        assert_eq!(t.reactions.len(), 1);
        assert_eq!(
            t.port_at("reactions.work"),
            Some(&Port {
                port_type: "energy".to_string(),
                direction: PortDirection::Out
            })
        );
        assert!(!t.is_interaction());
    }

    #[test]
    fn parse_interaction_template() {
        let data = Value::parse_ron(
            r#"{
                "requires": [
                    {"role": "producer", "port": "waste_output"},
                    {"role": "consumer", "port": "nutrient_input"},
                ],
                "creates": {"shuttle": {"role": "carrier"}},
                "reactions": {
                    "feed": {
                        "extends": "producer.reactions.excrete",
                        "adds_product": ["shuttle"],
                        "in": "producer",
                    }
                },
            }"#,
        )
        .unwrap();
        let t = Template::parse("mutualism_waste_nutrient", &data).unwrap();
        assert!(t.is_interaction());
        assert_eq!(t.requires.len(), 2);
        assert_eq!(t.requires[0].role, "producer");
        assert_eq!(t.creates.len(), 1);
        assert_eq!(t.modifiers.len(), 1);
        assert_eq!(
            t.modifiers[0].extends.as_deref(),
            Some("producer.reactions.excrete")
        );
        assert_eq!(t.modifiers[0].adds_product, vec!["shuttle".to_string()]);
        assert!(t.reactions.is_empty());
    }

    #[test]
    fn extends_field_recorded() {
        let data = Value::parse_ron(r#"{"extends": "primitives/base_cycle"}"#).unwrap();
        let t = Template::parse("derived", &data).unwrap();
        assert_eq!(t.extends.as_deref(), Some("primitives/base_cycle"));
    }
}
