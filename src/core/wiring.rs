/// Port wiring: connects declared ports across instantiated nodes,
/// realizes interaction templates, and applies `_modify_` edits. The
/// ecosystem is mutable here and frozen afterwards.
use thiserror::Error;

use crate::core::bind::{eval_value, BoundNode, BoundTree};
use crate::core::distributions::DistributionRegistry;
use crate::core::expr::ExprError;
use crate::core::registry::{RegistryError, TemplateRegistry};
use crate::core::rng::derive_rng;
use crate::core::scope::Scope;
use crate::schema::chemistry::{Connection, Ecosystem, Molecule, Reaction};
use crate::schema::template::{PortDirection, ReactionModifier, Template};
use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum WiringError {
    #[error("port '{port}' not found (referenced from '{from}')")]
    PortNotFound { port: String, from: String },
    #[error("port type mismatch wiring '{from}' to '{to}': {reason}")]
    PortTypeMismatch {
        from: String,
        to: String,
        reason: String,
    },
    #[error(
        "interaction '{interaction}' requires role '{role}' (species '{species}') \
         to expose a '{port_type}' port"
    )]
    InteractionRequirement {
        interaction: String,
        role: String,
        species: String,
        port_type: String,
    },
    #[error("interaction '{interaction}' has no binding for role '{role}'")]
    UnboundRole { interaction: String, role: String },
    #[error("interaction '{interaction}' references unknown entity '{name}'")]
    UnknownEntity { interaction: String, name: String },
    #[error("modifier in '{interaction}' targets missing reaction '{target}'")]
    ModifierTargetMissing { interaction: String, target: String },
    #[error("'_modify_' targets missing entity '{path}'")]
    ModifyTargetMissing { path: String },
    #[error("dangling input port '{port}' left unwired")]
    DanglingPort { port: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Expr(#[from] ExprError),
}

/// Wire the ecosystem: direct edges, then interactions, then edits.
pub fn wire(
    ecosystem: &mut Ecosystem,
    bound: &BoundTree,
    interactions: &[(String, Value)],
    modify: &[(String, Value)],
    registry: &TemplateRegistry,
    distributions: &DistributionRegistry,
    master_seed: u64,
) -> Result<(), WiringError> {
    for node in bound.walk() {
        connect_node_edges(ecosystem, node)?;
    }
    for (name, body) in interactions {
        realize_interaction(ecosystem, name, body, registry, distributions, master_seed)?;
    }
    for (path, edits) in modify {
        apply_modify(ecosystem, path, edits)?;
    }
    check_dangling(ecosystem)
}

fn connect_node_edges(ecosystem: &mut Ecosystem, node: &BoundNode) -> Result<(), WiringError> {
    for (local, target) in &node.pending_edges {
        let from_key = format!("{}.{}", node.namespace_path, local);
        let to_key = resolve_port_key(ecosystem, target, &node.namespace_path).ok_or_else(|| {
            WiringError::PortNotFound {
                port: target.clone(),
                from: from_key.clone(),
            }
        })?;
        connect(ecosystem, &from_key, &to_key)?;
    }
    Ok(())
}

/// Resolve a wiring target written relative to the node: try the path
/// as given, then prefixed with each ancestor namespace, innermost
/// first.
fn resolve_port_key(ecosystem: &Ecosystem, target: &str, node_path: &str) -> Option<String> {
    if ecosystem.ports.contains_key(target) {
        return Some(target.to_string());
    }
    let mut prefix = node_path;
    loop {
        let candidate = format!("{}.{}", prefix, target);
        if ecosystem.ports.contains_key(&candidate) {
            return Some(candidate);
        }
        match prefix.rfind('.') {
            Some(cut) => prefix = &prefix[..cut],
            None => return None,
        }
    }
}

/// Connect two ports, type-checked. The consuming reaction learns its
/// energy source here.
fn connect(ecosystem: &mut Ecosystem, a_key: &str, b_key: &str) -> Result<(), WiringError> {
    let a = ecosystem
        .ports
        .get(a_key)
        .ok_or_else(|| WiringError::PortNotFound {
            port: a_key.to_string(),
            from: a_key.to_string(),
        })?
        .clone();
    let b = ecosystem
        .ports
        .get(b_key)
        .ok_or_else(|| WiringError::PortNotFound {
            port: b_key.to_string(),
            from: a_key.to_string(),
        })?
        .clone();

    if !a.port.compatible_with(&b.port) {
        let reason = if a.port.direction == b.port.direction {
            format!("both ports face '{:?}'", a.port.direction)
        } else {
            format!(
                "type '{}' does not match '{}'",
                a.port.port_type, b.port.port_type
            )
        };
        return Err(WiringError::PortTypeMismatch {
            from: a_key.to_string(),
            to: b_key.to_string(),
            reason,
        });
    }

    let (out_key, out_port, in_key, in_port) = if a.port.direction == PortDirection::Out {
        (a_key, &a, b_key, &b)
    } else {
        (b_key, &b, a_key, &a)
    };

    ecosystem.connections.push(Connection {
        from_port: out_key.to_string(),
        to_port: in_key.to_string(),
        port_type: out_port.port.port_type.clone(),
    });

    if in_port.target.starts_with("r.") && out_port.port.port_type == "energy" {
        if let Some(reaction) = ecosystem.reactions.get_mut(&in_port.target) {
            reaction.energy_source = Some(out_port.target.clone());
        }
    }

    for key in [a_key, b_key] {
        if let Some(port) = ecosystem.ports.get_mut(key) {
            port.wired = true;
        }
    }
    Ok(())
}

/// Role bindings of one interaction entry: explicit `role: species`
/// keys, or a `between: [a, b]` list assigned in `requires` order.
fn bind_roles(
    interaction: &str,
    body: &Value,
    template: &Template,
) -> Result<Vec<(String, String)>, WiringError> {
    let mut roles: Vec<(String, String)> = Vec::new();
    if let Some(between) = body.get("between").and_then(Value::as_seq) {
        for (clause, species) in template.requires.iter().zip(between) {
            if let Some(species) = species.as_str() {
                roles.push((clause.role.clone(), species.to_string()));
            }
        }
    }
    if let Some(entries) = body.as_map() {
        for (key, value) in entries {
            if template.requires.iter().any(|c| &c.role == key) {
                if let Some(species) = value.as_str() {
                    roles.push((key.clone(), species.to_string()));
                }
            }
        }
    }
    for clause in &template.requires {
        if !roles.iter().any(|(role, _)| role == &clause.role) {
            return Err(WiringError::UnboundRole {
                interaction: interaction.to_string(),
                role: clause.role.clone(),
            });
        }
    }
    Ok(roles)
}

fn realize_interaction(
    ecosystem: &mut Ecosystem,
    name: &str,
    body: &Value,
    registry: &TemplateRegistry,
    distributions: &DistributionRegistry,
    master_seed: u64,
) -> Result<(), WiringError> {
    let template_name = body
        .get("_template_")
        .and_then(Value::as_str)
        .ok_or_else(|| WiringError::UnknownEntity {
            interaction: name.to_string(),
            name: "_template_".to_string(),
        })?;
    let template = registry.get(template_name)?;
    let roles = bind_roles(name, body, &template)?;

    // Every requires clause must find a port of its type on the bound
    // species, before anything is created.
    for clause in &template.requires {
        let species = roles
            .iter()
            .find(|(role, _)| role == &clause.role)
            .map(|(_, s)| s.as_str())
            .unwrap_or_default();
        let satisfied = ecosystem
            .species_ports(species)
            .any(|(_, bound)| bound.port.port_type == clause.port_type);
        if !satisfied {
            return Err(WiringError::InteractionRequirement {
                interaction: name.to_string(),
                role: clause.role.clone(),
                species: species.to_string(),
                port_type: clause.port_type.clone(),
            });
        }
    }

    let mut rng = derive_rng(master_seed, name, "wire");
    let scope = interaction_scope(body, &roles);

    let mut created: Vec<String> = Vec::new();
    for (local, mol_body) in &template.creates {
        let rendered = eval_value(mol_body, &scope, distributions, &mut rng)?;
        created.push(local.clone());
        ecosystem.molecules.insert(
            format!("m.{}.{}", name, local),
            Molecule::from_value(&rendered),
        );
    }

    for (local, rxn_body) in &template.reactions {
        let rendered = eval_value(rxn_body, &scope, distributions, &mut rng)?;
        let mut reaction = Reaction::from_value(&rendered);
        resolve_interaction_refs(ecosystem, name, &roles, &created, &mut reaction.reactants)?;
        resolve_interaction_refs(ecosystem, name, &roles, &created, &mut reaction.products)?;
        ecosystem
            .reactions
            .insert(format!("r.{}.{}", name, local), reaction);
    }

    for modifier in &template.modifiers {
        apply_modifier(ecosystem, name, &roles, &created, modifier)?;
    }

    ecosystem.interactions.push(name.to_string());
    Ok(())
}

fn interaction_scope(body: &Value, roles: &[(String, String)]) -> Scope {
    let mut scope = Scope::named("interaction");
    if let Some(entries) = body.as_map() {
        for (key, value) in entries {
            if key == "_template_" || key == "between" {
                continue;
            }
            if roles.iter().any(|(role, _)| role == key) {
                continue;
            }
            scope.set_local(key, value.clone());
        }
    }
    scope
}

/// Resolve molecule references inside interaction reactions: created
/// molecules by bare name, role-scoped paths like
/// `producer.molecules.waste`, or already-namespaced `m.` paths.
fn resolve_interaction_refs(
    ecosystem: &Ecosystem,
    interaction: &str,
    roles: &[(String, String)],
    created: &[String],
    refs: &mut [String],
) -> Result<(), WiringError> {
    for name in refs.iter_mut() {
        if name.starts_with("m.") {
            continue;
        }
        if created.iter().any(|c| c == name) {
            *name = format!("m.{}.{}", interaction, name);
            continue;
        }
        let resolved = name.split_once('.').and_then(|(role, rest)| {
            let species = roles.iter().find(|(r, _)| r == role).map(|(_, s)| s)?;
            let rest = rest.strip_prefix("molecules.").unwrap_or(rest);
            let candidate = format!("m.{}.{}", species, rest);
            ecosystem.molecules.contains_key(&candidate).then_some(candidate)
        });
        match resolved {
            Some(full) => *name = full,
            None => {
                return Err(WiringError::UnknownEntity {
                    interaction: interaction.to_string(),
                    name: name.clone(),
                })
            }
        }
    }
    Ok(())
}

/// Apply one `extends` modifier: a structural edit against an existing
/// reaction of a participating species.
fn apply_modifier(
    ecosystem: &mut Ecosystem,
    interaction: &str,
    roles: &[(String, String)],
    created: &[String],
    modifier: &ReactionModifier,
) -> Result<(), WiringError> {
    let Some(extends) = &modifier.extends else {
        return Ok(());
    };
    let target_key = resolve_role_reaction(ecosystem, roles, extends).ok_or_else(|| {
        WiringError::ModifierTargetMissing {
            interaction: interaction.to_string(),
            target: extends.clone(),
        }
    })?;

    let mut adds_reactant = modifier.adds_reactant.clone();
    let mut adds_product = modifier.adds_product.clone();
    resolve_interaction_refs(ecosystem, interaction, roles, created, &mut adds_reactant)?;
    resolve_interaction_refs(ecosystem, interaction, roles, created, &mut adds_product)?;

    let reaction = ecosystem
        .reactions
        .get_mut(&target_key)
        .ok_or_else(|| WiringError::ModifierTargetMissing {
            interaction: interaction.to_string(),
            target: target_key.clone(),
        })?;
    reaction.reactants.extend(adds_reactant);
    reaction.products.extend(adds_product);
    Ok(())
}

/// Resolve `role.reactions.name` to a reaction key: through the role's
/// port of that path if one exists, else the direct namespaced key.
fn resolve_role_reaction(
    ecosystem: &Ecosystem,
    roles: &[(String, String)],
    path: &str,
) -> Option<String> {
    let (role, rest) = path.split_once('.')?;
    let species = roles.iter().find(|(r, _)| r == role).map(|(_, s)| s)?;
    let port_key = format!("{}.{}", species, rest);
    if let Some(port) = ecosystem.ports.get(&port_key) {
        return Some(port.target.clone());
    }
    let rest = rest.strip_prefix("reactions.").unwrap_or(rest);
    let direct = format!("r.{}.{}", species, rest);
    if ecosystem.reactions.contains_key(&direct) {
        return Some(direct);
    }
    // The reaction may live on a nested node of the species.
    let prefix = format!("r.{}.", species);
    let suffix = format!(".{}", rest);
    ecosystem
        .reactions
        .keys()
        .find(|key| key.starts_with(&prefix) && key.ends_with(&suffix))
        .cloned()
}

/// Apply one `_modify_` entry: `_set_` replaces fields, `_append_`
/// extends list fields, on the entity named by the path.
fn apply_modify(ecosystem: &mut Ecosystem, path: &str, edits: &Value) -> Result<(), WiringError> {
    if let Some(reaction) = ecosystem.reactions.get_mut(path) {
        if let Some(sets) = edits.get("_set_").and_then(Value::as_map) {
            for (field, value) in sets {
                set_reaction_field(reaction, field, value);
            }
        }
        if let Some(appends) = edits.get("_append_").and_then(Value::as_map) {
            for (field, value) in appends {
                append_reaction_field(reaction, field, value);
            }
        }
        return Ok(());
    }
    if let Some(molecule) = ecosystem.molecules.get_mut(path) {
        if let Some(sets) = edits.get("_set_").and_then(Value::as_map) {
            for (field, value) in sets {
                match field.as_str() {
                    "role" => molecule.role = value.as_str().map(str::to_string),
                    "tags" => {
                        molecule.tags = value
                            .as_seq()
                            .map(|items| {
                                items
                                    .iter()
                                    .filter_map(|v| v.as_str().map(str::to_string))
                                    .collect()
                            })
                            .unwrap_or_default()
                    }
                    _ => molecule.properties.insert(field, value.clone()),
                }
            }
        }
        if let Some(appends) = edits.get("_append_").and_then(Value::as_map) {
            for (field, value) in appends {
                if field == "tags" {
                    if let Some(tag) = value.as_str() {
                        molecule.tags.push(tag.to_string());
                    }
                }
            }
        }
        return Ok(());
    }
    Err(WiringError::ModifyTargetMissing {
        path: path.to_string(),
    })
}

fn set_reaction_field(reaction: &mut Reaction, field: &str, value: &Value) {
    match field {
        "rate" => reaction.rate = Some(value.clone()),
        "energy_source" => reaction.energy_source = value.as_str().map(str::to_string),
        "reactants" => reaction.reactants = str_list(value),
        "products" => reaction.products = str_list(value),
        _ => reaction.properties.insert(field, value.clone()),
    }
}

fn append_reaction_field(reaction: &mut Reaction, field: &str, value: &Value) {
    let additions = match value {
        Value::Str(s) => vec![s.clone()],
        other => str_list(other),
    };
    match field {
        "reactants" => reaction.reactants.extend(additions),
        "products" => reaction.products.extend(additions),
        _ => {}
    }
}

fn str_list(value: &Value) -> Vec<String> {
    value
        .as_seq()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Input ports must end up wired; output ports may stay exposed for
/// later consumers.
fn check_dangling(ecosystem: &Ecosystem) -> Result<(), WiringError> {
    for (key, bound) in &ecosystem.ports {
        if bound.port.direction == PortDirection::In && !bound.wired {
            return Err(WiringError::DanglingPort { port: key.clone() });
        }
    }
    Ok(())
}
