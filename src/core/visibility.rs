/// Visibility stage: projects the ground-truth ecosystem into the
/// agent-visible scenario. A seeded subset of each entity type becomes
/// visible under freshly generated opaque names; everything else is
/// hidden outright. Per-field levels redact inside visible entities.
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::core::rng::derive_rng;
use crate::schema::chemistry::{Ecosystem, Molecule, Reaction};
use crate::schema::scenario::{Region, Scenario, VisibilityMapping};
use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum VisibilityError {
    #[error(
        "visible fraction for {entity} is {realized:.3}, outside tolerance {tolerance} of {expected:.3}"
    )]
    Tolerance {
        entity: String,
        realized: f64,
        expected: f64,
        tolerance: f64,
    },
    #[error("visibility mapping is not injective: opaque name '{opaque}' assigned twice")]
    NotInjective { opaque: String },
    #[error("unknown visibility level '{level}' for field '{field}'")]
    BadLevel { level: String, field: String },
}

/// How much of a field survives projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldLevel {
    Unknown,
    Partial,
    Mostly,
    Full,
}

impl FieldLevel {
    fn parse(level: &str, field: &str) -> Result<FieldLevel, VisibilityError> {
        match level {
            "unknown" => Ok(FieldLevel::Unknown),
            "partial" => Ok(FieldLevel::Partial),
            "mostly" => Ok(FieldLevel::Mostly),
            "full" => Ok(FieldLevel::Full),
            other => Err(VisibilityError::BadLevel {
                level: other.to_string(),
                field: field.to_string(),
            }),
        }
    }

    /// Keep the field this time around?
    fn keep(self, rng: &mut StdRng) -> bool {
        match self {
            FieldLevel::Unknown => false,
            FieldLevel::Partial => rng.gen_range(0.0..1.0) < 0.5,
            FieldLevel::Mostly => rng.gen_range(0.0..1.0) < 0.8,
            FieldLevel::Full => true,
        }
    }
}

struct EntityVisibility {
    fraction_known: f64,
    fields: Vec<(String, FieldLevel)>,
}

impl EntityVisibility {
    fn parse(spec: Option<&Value>) -> Result<EntityVisibility, VisibilityError> {
        let mut visibility = EntityVisibility {
            fraction_known: 1.0,
            fields: Vec::new(),
        };
        let Some(spec) = spec else {
            return Ok(visibility);
        };
        if let Some(f) = spec.get("fraction_known").and_then(Value::as_f64) {
            visibility.fraction_known = f.clamp(0.0, 1.0);
        }
        if let Some(fields) = spec.get("fields").and_then(Value::as_map) {
            for (field, level) in fields {
                let level = level.as_str().unwrap_or("full");
                visibility
                    .fields
                    .push((field.clone(), FieldLevel::parse(level, field)?));
            }
        }
        Ok(visibility)
    }

    fn level_for(&self, field: &str) -> FieldLevel {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, level)| *level)
            .unwrap_or(FieldLevel::Full)
    }
}

const SYLLABLES: &[&str] = &[
    "vre", "khal", "zor", "eth", "mir", "tak", "ool", "shen", "dra", "quil", "nox", "yev",
];

/// Generate a fresh opaque name, alien-vocabulary style. Collisions
/// take a numeric suffix so the mapping stays injective.
fn opaque_name(rng: &mut StdRng, used: &mut FxHashSet<String>) -> String {
    let syllable_count = rng.gen_range(2..=3);
    let mut name = String::new();
    for _ in 0..syllable_count {
        name.push_str(SYLLABLES[rng.gen_range(0..SYLLABLES.len())]);
    }
    let mut candidate = name.clone();
    let mut suffix = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{}{}", name, suffix);
        suffix += 1;
    }
    candidate
}

/// Sample `round(fraction * n)` names without replacement, seeded.
fn visible_subset(
    names: &[&String],
    fraction: f64,
    rng: &mut StdRng,
) -> (Vec<String>, Vec<String>) {
    let k = (fraction * names.len() as f64).round() as usize;
    let mut shuffled: Vec<&String> = names.to_vec();
    shuffled.shuffle(rng);
    let visible: Vec<String> = shuffled[..k].iter().map(|s| s.to_string()).collect();
    let hidden: Vec<String> = shuffled[k..].iter().map(|s| s.to_string()).collect();
    (visible, hidden)
}

/// Project the ecosystem and regions into a scenario.
pub fn project(
    ecosystem: &Ecosystem,
    regions: &[Region],
    spec: Option<&Value>,
    metadata: &Value,
    master_seed: u64,
) -> Result<(Scenario, VisibilityMapping), VisibilityError> {
    let molecule_spec = EntityVisibility::parse(spec.and_then(|s| s.get("molecules")))?;
    let reaction_spec = EntityVisibility::parse(spec.and_then(|s| s.get("reactions")))?;
    let tolerance = spec
        .and_then(|s| s.get("tolerance"))
        .and_then(Value::as_f64)
        .unwrap_or(0.05);

    let mut mapping = VisibilityMapping::default();
    let mut used_names: FxHashSet<String> = FxHashSet::default();

    let mut molecule_rng = derive_rng(master_seed, "molecules", "visibility");
    let molecule_names: Vec<&String> = ecosystem.molecules.keys().collect();
    let (visible_molecules, hidden_molecules) = visible_subset(
        &molecule_names,
        molecule_spec.fraction_known,
        &mut molecule_rng,
    );
    check_tolerance(
        "molecules",
        visible_molecules.len(),
        molecule_names.len(),
        molecule_spec.fraction_known,
        tolerance,
    )?;
    mapping.hidden_molecules = sorted(hidden_molecules);
    for name in sorted(visible_molecules) {
        let opaque = opaque_name(&mut molecule_rng, &mut used_names);
        mapping.names.insert(name, opaque);
    }

    let mut reaction_rng = derive_rng(master_seed, "reactions", "visibility");
    let reaction_names: Vec<&String> = ecosystem.reactions.keys().collect();
    let (visible_reactions, hidden_reactions) = visible_subset(
        &reaction_names,
        reaction_spec.fraction_known,
        &mut reaction_rng,
    );
    check_tolerance(
        "reactions",
        visible_reactions.len(),
        reaction_names.len(),
        reaction_spec.fraction_known,
        tolerance,
    )?;
    mapping.hidden_reactions = sorted(hidden_reactions);
    for name in sorted(visible_reactions) {
        let opaque = opaque_name(&mut reaction_rng, &mut used_names);
        mapping.names.insert(name, opaque);
    }

    check_injective(&mapping)?;

    let mut scenario = Scenario {
        seed: master_seed,
        metadata: metadata.clone(),
        ..Default::default()
    };

    for (name, molecule) in &ecosystem.molecules {
        let Some(opaque) = mapping.opaque(name) else {
            continue;
        };
        let body = project_molecule(molecule, &molecule_spec, &mut molecule_rng);
        scenario.molecules.insert(opaque.to_string(), body);
    }

    for (name, reaction) in &ecosystem.reactions {
        let Some(opaque) = mapping.opaque(name) else {
            continue;
        };
        let body = project_reaction(reaction, &reaction_spec, &mapping, &mut reaction_rng);
        scenario.reactions.insert(opaque.to_string(), body);
    }

    // Region substrate keys are rewritten through the mapping; hidden
    // substrates disappear from the observable view.
    for region in regions {
        let mut projected = Region {
            id: region.id.clone(),
            substrates: Default::default(),
            populations: region.populations.clone(),
        };
        for (substrate, concentration) in &region.substrates {
            if let Some(opaque) = mapping.opaque(substrate) {
                projected.substrates.insert(opaque.to_string(), *concentration);
            } else if !substrate.starts_with("m.") {
                projected
                    .substrates
                    .insert(substrate.clone(), *concentration);
            }
        }
        scenario.regions.push(projected);
    }

    Ok((scenario, mapping))
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

fn check_tolerance(
    entity: &str,
    visible: usize,
    total: usize,
    expected: f64,
    tolerance: f64,
) -> Result<(), VisibilityError> {
    if total == 0 {
        return Ok(());
    }
    let realized = visible as f64 / total as f64;
    if (realized - expected).abs() > tolerance {
        return Err(VisibilityError::Tolerance {
            entity: entity.to_string(),
            realized,
            expected,
            tolerance,
        });
    }
    Ok(())
}

fn check_injective(mapping: &VisibilityMapping) -> Result<(), VisibilityError> {
    let mut seen: FxHashSet<&String> = FxHashSet::default();
    for opaque in mapping.names.values() {
        if !seen.insert(opaque) {
            return Err(VisibilityError::NotInjective {
                opaque: opaque.clone(),
            });
        }
    }
    Ok(())
}

fn project_molecule(
    molecule: &Molecule,
    spec: &EntityVisibility,
    rng: &mut StdRng,
) -> Value {
    let mut body = Value::map();
    if let Some(role) = &molecule.role {
        if spec.level_for("role").keep(rng) {
            body.insert("role", Value::Str(role.clone()));
        }
    }
    if !molecule.tags.is_empty() && spec.level_for("tags").keep(rng) {
        body.insert(
            "tags",
            Value::Seq(molecule.tags.iter().map(|t| Value::Str(t.clone())).collect()),
        );
    }
    if let Some(entries) = molecule.properties.as_map() {
        for (field, value) in entries {
            if spec.level_for(field).keep(rng) {
                body.insert(field, value.clone());
            }
        }
    }
    body
}

/// References to hidden molecules are dropped from the projected lists;
/// their existence must not leak through a visible reaction.
fn project_reaction(
    reaction: &Reaction,
    spec: &EntityVisibility,
    mapping: &VisibilityMapping,
    rng: &mut StdRng,
) -> Value {
    let rewrite = |names: &[String]| -> Value {
        Value::Seq(
            names
                .iter()
                .filter_map(|n| mapping.opaque(n))
                .map(|n| Value::Str(n.to_string()))
                .collect(),
        )
    };
    let mut body = Value::map();
    if spec.level_for("reactants").keep(rng) {
        body.insert("reactants", rewrite(&reaction.reactants));
    }
    if spec.level_for("products").keep(rng) {
        body.insert("products", rewrite(&reaction.products));
    }
    if let Some(rate) = &reaction.rate {
        if spec.level_for("rate").keep(rng) {
            body.insert("rate", rate.clone());
        }
    }
    if let Some(source) = &reaction.energy_source {
        if spec.level_for("energy_source").keep(rng) {
            if let Some(opaque) = mapping.opaque(source) {
                body.insert("energy_source", Value::Str(opaque.to_string()));
            }
        }
    }
    if let Some(entries) = reaction.properties.as_map() {
        for (field, value) in entries {
            if spec.level_for(field).keep(rng) {
                body.insert(field, value.clone());
            }
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big_ecosystem(n: usize) -> Ecosystem {
        let mut eco = Ecosystem::default();
        for i in 0..n {
            eco.molecules
                .insert(format!("m.krel.M{:04}", i), Molecule::default());
        }
        eco
    }

    fn vis_spec(fraction: f64) -> Value {
        Value::parse_ron(&format!(
            r#"{{"molecules": {{"fraction_known": {}}}}}"#,
            fraction
        ))
        .unwrap()
    }

    #[test]
    fn fraction_tolerance_over_thousand_entities() {
        let eco = big_ecosystem(1000);
        let (scenario, mapping) =
            project(&eco, &[], Some(&vis_spec(0.7)), &Value::map(), 21).unwrap();
        let visible = scenario.molecules.len();
        assert!((650..=750).contains(&visible), "visible = {}", visible);
        assert_eq!(mapping.names.len(), visible);
        assert_eq!(mapping.hidden_molecules.len(), 1000 - visible);
    }

    #[test]
    fn mapping_is_injective_and_deterministic() {
        let eco = big_ecosystem(300);
        let (_, a) = project(&eco, &[], Some(&vis_spec(0.5)), &Value::map(), 4).unwrap();
        let (_, b) = project(&eco, &[], Some(&vis_spec(0.5)), &Value::map(), 4).unwrap();
        assert_eq!(a, b);
        assert!(a.is_injective());
        let (_, c) = project(&eco, &[], Some(&vis_spec(0.5)), &Value::map(), 5).unwrap();
        assert_ne!(a.names, c.names);
    }

    #[test]
    fn hidden_references_do_not_leak() {
        let mut eco = Ecosystem::default();
        eco.molecules
            .insert("m.krel.S".to_string(), Molecule::default());
        eco.molecules
            .insert("m.krel.H".to_string(), Molecule::default());
        eco.reactions.insert(
            "r.krel.work".to_string(),
            Reaction {
                reactants: vec!["m.krel.S".to_string(), "m.krel.H".to_string()],
                products: vec![],
                ..Default::default()
            },
        );
        // Force exactly one of two molecules visible, all reactions
        // visible.
        let spec = Value::parse_ron(
            r#"{
                "molecules": {"fraction_known": 0.5},
                "reactions": {"fraction_known": 1.0},
                "tolerance": 0.05,
            }"#,
        )
        .unwrap();
        let (scenario, mapping) = project(&eco, &[], Some(&spec), &Value::map(), 8).unwrap();
        assert_eq!(mapping.hidden_molecules.len(), 1);
        let hidden = &mapping.hidden_molecules[0];
        let (_, body) = scenario.reactions.iter().next().unwrap();
        let reactants = body.get("reactants").and_then(Value::as_seq).unwrap();
        assert_eq!(reactants.len(), 1);
        for r in reactants {
            assert_ne!(r.as_str(), Some(hidden.as_str()));
            assert!(!r.as_str().unwrap().starts_with("m."));
        }
    }

    #[test]
    fn unknown_field_level_omits_everywhere() {
        let mut eco = Ecosystem::default();
        eco.molecules.insert(
            "m.krel.S".to_string(),
            Molecule {
                role: Some("energy".to_string()),
                ..Default::default()
            },
        );
        let spec = Value::parse_ron(
            r#"{
                "molecules": {
                    "fraction_known": 1.0,
                    "fields": {"role": "unknown"},
                },
            }"#,
        )
        .unwrap();
        let (scenario, _) = project(&eco, &[], Some(&spec), &Value::map(), 1).unwrap();
        let (_, body) = scenario.molecules.iter().next().unwrap();
        assert_eq!(body.get("role"), None);
    }

    #[test]
    fn bad_level_rejected() {
        let spec = Value::parse_ron(
            r#"{"molecules": {"fields": {"role": "sideways"}}}"#,
        )
        .unwrap();
        let err = project(
            &Ecosystem::default(),
            &[],
            Some(&spec),
            &Value::map(),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, VisibilityError::BadLevel { .. }));
    }

    #[test]
    fn region_substrates_rewritten() {
        let mut eco = Ecosystem::default();
        eco.molecules
            .insert("m.bg.BG1".to_string(), Molecule::default());
        let mut region = Region {
            id: "region1".to_string(),
            substrates: Default::default(),
            populations: Default::default(),
        };
        region.substrates.insert("m.bg.BG1".to_string(), 0.4);
        let (scenario, mapping) =
            project(&eco, &[region], Some(&vis_spec(1.0)), &Value::map(), 2).unwrap();
        let opaque = mapping.opaque("m.bg.BG1").unwrap();
        assert_eq!(scenario.regions[0].substrates[opaque], 0.4);
    }
}
