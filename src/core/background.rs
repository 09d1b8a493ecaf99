/// Background fill: adds bounded random molecules and reactions under
/// the `bg` namespace, each candidate checked against the active guards
/// before committing. Guards see the accumulated ecosystem, prior
/// background additions included, so cumulative violations are caught.
use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;

use crate::core::bind::eval_value;
use crate::core::distributions::DistributionRegistry;
use crate::core::expr::ExprError;
use crate::core::guards::{Candidate, GuardError, GuardSet};
use crate::core::rng::derive_rng;
use crate::core::scope::Scope;
use crate::schema::chemistry::{Ecosystem, Molecule, Reaction};
use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum BackgroundError {
    #[error(
        "background fill exhausted after {retries} retries adding {kind}; last rejection: {last}"
    )]
    Exhausted {
        kind: String,
        retries: u32,
        last: String,
    },
    #[error(transparent)]
    Guard(#[from] GuardError),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error("background entity '{name}' is {hops} hops from the main network (max {max})")]
    Isolated { name: String, hops: u32, max: u32 },
}

const DEFAULT_MAX_RETRIES: u32 = 20;
const DEFAULT_PREFER_EXISTING: f64 = 0.8;
const DEFAULT_MAX_ISOLATION: u32 = 2;

struct FillConfig {
    molecule_count: u64,
    reaction_count: u64,
    molecule_body: Value,
    reaction_body: Value,
    prefer_existing: f64,
    max_isolation: u32,
    max_retries: u32,
}

fn read_config(
    spec: &Value,
    distributions: &DistributionRegistry,
    rng: &mut StdRng,
) -> Result<FillConfig, BackgroundError> {
    let scope = Scope::named("background");
    let mut eval_count = |section: &str| -> Result<u64, BackgroundError> {
        match spec.get_path(&format!("{}.count", section)) {
            None => Ok(0),
            Some(raw) => {
                let value = eval_value(raw, &scope, distributions, rng)?;
                Ok(value.as_i64().unwrap_or(0).max(0) as u64)
            }
        }
    };
    let molecule_count = eval_count("molecules")?;
    let reaction_count = eval_count("reactions")?;

    let body_of = |section: &str| -> Value {
        spec.get(section)
            .and_then(Value::as_map)
            .map(|entries| {
                Value::Map(
                    entries
                        .iter()
                        .filter(|(k, _)| k != "count")
                        .cloned()
                        .collect(),
                )
            })
            .unwrap_or_else(Value::map)
    };

    Ok(FillConfig {
        molecule_count,
        reaction_count,
        molecule_body: body_of("molecules"),
        reaction_body: body_of("reactions"),
        prefer_existing: spec
            .get_path("attachment.prefer_existing")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_PREFER_EXISTING),
        max_isolation: spec
            .get_path("attachment.max_isolation")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_MAX_ISOLATION as i64) as u32,
        max_retries: spec
            .get("max_retries")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_MAX_RETRIES as i64) as u32,
    })
}

/// Fill the ecosystem with background content per the `background`
/// section of the spec. Only appends; template-derived structure is
/// never touched.
pub fn fill(
    ecosystem: &mut Ecosystem,
    spec: &Value,
    guard_names: &[String],
    guards: &GuardSet,
    distributions: &DistributionRegistry,
    master_seed: u64,
) -> Result<(), BackgroundError> {
    let mut rng = derive_rng(master_seed, "bg", "fill");
    let config = read_config(spec, distributions, &mut rng)?;
    let scope = Scope::named("background");

    for i in 1..=config.molecule_count {
        let name = format!("m.bg.BG{}", i);
        let mut last = String::from("no attempt");
        let mut committed = false;
        for _ in 0..config.max_retries.max(1) {
            let rendered = eval_value(&config.molecule_body, &scope, distributions, &mut rng)?;
            let molecule = Molecule::from_value(&rendered);
            let candidate = Candidate::Molecule {
                name: name.clone(),
                molecule: molecule.clone(),
            };
            match guards.check(guard_names, ecosystem, &candidate) {
                Ok(()) => {
                    ecosystem.molecules.insert(name.clone(), molecule);
                    committed = true;
                    break;
                }
                Err(GuardError::Violation { reason, .. }) => last = reason,
                Err(unknown) => return Err(unknown.into()),
            }
        }
        if !committed {
            return Err(BackgroundError::Exhausted {
                kind: format!("molecule '{}'", name),
                retries: config.max_retries,
                last,
            });
        }
    }

    for i in 1..=config.reaction_count {
        let name = format!("r.bg.BR{}", i);
        let mut last = String::from("no attempt");
        let mut committed = false;
        for _ in 0..config.max_retries.max(1) {
            let reaction = propose_reaction(ecosystem, &config, distributions, &mut rng)?;
            let candidate = Candidate::Reaction {
                name: name.clone(),
                reaction: reaction.clone(),
            };
            match guards.check(guard_names, ecosystem, &candidate) {
                Ok(()) => {
                    for m in reaction.molecules() {
                        ecosystem
                            .molecules
                            .entry(m.to_string())
                            .or_insert_with(Molecule::default);
                    }
                    ecosystem.reactions.insert(name.clone(), reaction);
                    committed = true;
                    break;
                }
                Err(GuardError::Violation { reason, .. }) => last = reason,
                Err(unknown) => return Err(unknown.into()),
            }
        }
        if !committed {
            return Err(BackgroundError::Exhausted {
                kind: format!("reaction '{}'", name),
                retries: config.max_retries,
                last,
            });
        }
    }

    check_isolation(ecosystem, config.max_isolation)
}

/// Propose one background reaction: pick a reactant, preferring an
/// existing molecule with probability `prefer_existing`, and produce a
/// fresh or existing background molecule.
fn propose_reaction(
    ecosystem: &Ecosystem,
    config: &FillConfig,
    distributions: &DistributionRegistry,
    rng: &mut StdRng,
) -> Result<Reaction, BackgroundError> {
    let scope = Scope::named("background");
    let rendered = eval_value(&config.reaction_body, &scope, distributions, rng)?;
    let mut reaction = Reaction::from_value(&rendered);

    if reaction.reactants.is_empty() {
        let species: Vec<&String> = ecosystem
            .molecules
            .keys()
            .filter(|k| Ecosystem::species_of(k).is_some())
            .collect();
        // Background molecules already attached to some reaction keep
        // new content near the main network.
        let attached: Vec<&String> = ecosystem
            .molecules
            .keys()
            .filter(|k| {
                k.starts_with("m.bg.")
                    && ecosystem
                        .reactions
                        .values()
                        .any(|r| r.molecules().any(|m| m == k.as_str()))
            })
            .collect();
        let pool = if attached.is_empty()
            || species.is_empty()
            || rng.gen_range(0.0..1.0) < config.prefer_existing
        {
            if species.is_empty() { &attached } else { &species }
        } else {
            &attached
        };
        let reactant = if pool.is_empty() {
            format!("m.bg.W{}", rng.gen_range(1..1000))
        } else {
            pool[rng.gen_range(0..pool.len())].clone()
        };
        reaction.reactants.push(reactant);
    }
    if reaction.products.is_empty() {
        let background: Vec<&String> = ecosystem
            .molecules
            .keys()
            .filter(|k| k.starts_with("m.bg."))
            .collect();
        let product = if background.is_empty() {
            format!("m.bg.W{}", rng.gen_range(1..1000))
        } else {
            background[rng.gen_range(0..background.len())].clone()
        };
        reaction.products.push(product);
    }
    Ok(reaction)
}

/// Every background entity must sit within `max_isolation` hops of a
/// species molecule in the undirected reaction adjacency graph.
fn check_isolation(ecosystem: &Ecosystem, max_isolation: u32) -> Result<(), BackgroundError> {
    use std::collections::VecDeque;

    let has_species_molecules = ecosystem
        .molecules
        .keys()
        .any(|k| Ecosystem::species_of(k).is_some());
    if !has_species_molecules {
        return Ok(());
    }

    // Multi-source BFS from all species molecules.
    let mut distance: rustc_hash::FxHashMap<&str, u32> = rustc_hash::FxHashMap::default();
    let mut queue: VecDeque<&str> = VecDeque::new();
    for name in ecosystem.molecules.keys() {
        if Ecosystem::species_of(name).is_some() {
            distance.insert(name, 0);
            queue.push_back(name);
        }
    }
    while let Some(current) = queue.pop_front() {
        let d = distance[current];
        for reaction in ecosystem.reactions.values() {
            if !reaction.molecules().any(|m| m == current) {
                continue;
            }
            for neighbor in reaction.molecules() {
                if !distance.contains_key(neighbor) {
                    distance.insert(neighbor, d + 1);
                    queue.push_back(neighbor);
                }
            }
        }
    }

    for name in ecosystem.molecules.keys() {
        if !name.starts_with("m.bg.") {
            continue;
        }
        // Molecules no reaction touches are ambient substrate; the
        // isolation bound applies to reaction-connected additions.
        let connected = ecosystem
            .reactions
            .values()
            .any(|r| r.molecules().any(|m| m == name.as_str()));
        if !connected {
            continue;
        }
        match distance.get(name.as_str()) {
            Some(d) if *d <= max_isolation => {}
            Some(d) => {
                return Err(BackgroundError::Isolated {
                    name: name.clone(),
                    hops: *d,
                    max: max_isolation,
                })
            }
            None => {
                return Err(BackgroundError::Isolated {
                    name: name.clone(),
                    hops: u32::MAX,
                    max: max_isolation,
                })
            }
        }
    }
    Ok(())
}
