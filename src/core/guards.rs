/// Guards — named predicates over a candidate background addition,
/// evaluated read-only against the accumulated ecosystem. Background
/// fill re-checks every active guard after each committed addition, so
/// violations from cumulative effects are caught, not just per-candidate
/// ones.
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::schema::chemistry::{Ecosystem, Molecule, Reaction};

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("unknown guard '{name}'; available: [{available}]")]
    Unknown { name: String, available: String },
    #[error("guard '{guard}' rejected '{candidate}': {reason}")]
    Violation {
        guard: String,
        candidate: String,
        reason: String,
    },
}

/// A background addition under consideration.
#[derive(Debug, Clone)]
pub enum Candidate {
    Molecule { name: String, molecule: Molecule },
    Reaction { name: String, reaction: Reaction },
}

impl Candidate {
    pub fn name(&self) -> &str {
        match self {
            Candidate::Molecule { name, .. } => name,
            Candidate::Reaction { name, .. } => name,
        }
    }
}

/// `Ok(())` to accept, `Err(reason)` to reject.
pub type GuardFn = fn(&Ecosystem, &Candidate) -> Result<(), String>;

pub struct GuardSet {
    guards: FxHashMap<String, GuardFn>,
}

impl GuardSet {
    pub fn new() -> GuardSet {
        GuardSet {
            guards: FxHashMap::default(),
        }
    }

    pub fn builtins() -> GuardSet {
        let mut set = GuardSet::new();
        set.register("no_new_species_dependencies", no_new_species_dependencies);
        set.register("no_new_cycles", no_new_cycles);
        set.register("no_signaling", no_signaling);
        set.register("no_essential", no_essential);
        set.register("no_competition", no_competition);
        set
    }

    pub fn register(&mut self, name: &str, guard: GuardFn) {
        self.guards.insert(name.to_string(), guard);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.guards.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check a candidate against the named active guards.
    pub fn check(
        &self,
        active: &[String],
        ecosystem: &Ecosystem,
        candidate: &Candidate,
    ) -> Result<(), GuardError> {
        for name in active {
            let guard = self.guards.get(name).ok_or_else(|| GuardError::Unknown {
                name: name.clone(),
                available: self.names().join(", "),
            })?;
            guard(ecosystem, candidate).map_err(|reason| GuardError::Violation {
                guard: name.clone(),
                candidate: candidate.name().to_string(),
                reason,
            })?;
        }
        Ok(())
    }
}

impl Default for GuardSet {
    fn default() -> Self {
        GuardSet::builtins()
    }
}

/// A background reaction must not couple two species: consuming from
/// one while producing into another creates a dependency the spec
/// never declared.
fn no_new_species_dependencies(_: &Ecosystem, candidate: &Candidate) -> Result<(), String> {
    let Candidate::Reaction { reaction, .. } = candidate else {
        return Ok(());
    };
    let mut species: FxHashSet<&str> = FxHashSet::default();
    for name in reaction.molecules() {
        if let Some(s) = Ecosystem::species_of(name) {
            species.insert(s);
        }
    }
    if species.len() > 1 {
        let mut names: Vec<&str> = species.into_iter().collect();
        names.sort();
        Err(format!("couples species {}", names.join(" and ")))
    } else {
        Ok(())
    }
}

/// Reject a reaction whose addition would close a directed cycle in the
/// molecule graph: some product already reaches some reactant.
fn no_new_cycles(ecosystem: &Ecosystem, candidate: &Candidate) -> Result<(), String> {
    let Candidate::Reaction { reaction, .. } = candidate else {
        return Ok(());
    };
    for product in &reaction.products {
        for reactant in &reaction.reactants {
            if reaches(ecosystem, product, reactant) {
                return Err(format!(
                    "'{}' already reaches '{}', adding the reverse edge closes a cycle",
                    product, reactant
                ));
            }
        }
    }
    Ok(())
}

/// BFS over molecule-to-molecule edges induced by existing reactions.
pub fn reaches(ecosystem: &Ecosystem, from: &str, to: &str) -> bool {
    if from == to {
        return true;
    }
    let mut visited: FxHashSet<&str> = FxHashSet::default();
    let mut queue: Vec<&str> = vec![from];
    visited.insert(from);
    while let Some(current) = queue.pop() {
        for reaction in ecosystem.reactions.values() {
            if !reaction.reactants.iter().any(|r| r == current) {
                continue;
            }
            for product in &reaction.products {
                if product == to {
                    return true;
                }
                if visited.insert(product) {
                    queue.push(product);
                }
            }
        }
    }
    false
}

fn no_signaling(ecosystem: &Ecosystem, candidate: &Candidate) -> Result<(), String> {
    let is_signal = |molecule: &Molecule| {
        molecule.role.as_deref() == Some("signal") || molecule.has_tag("signal")
    };
    match candidate {
        Candidate::Molecule { molecule, .. } => {
            if is_signal(molecule) {
                return Err("signaling molecules may not come from background".to_string());
            }
        }
        Candidate::Reaction { reaction, .. } => {
            for name in reaction.molecules() {
                if ecosystem.molecules.get(name).is_some_and(is_signal) {
                    return Err(format!("touches signaling molecule '{}'", name));
                }
            }
        }
    }
    Ok(())
}

/// Background content must stay inessential: never consume a molecule
/// tagged essential, never introduce one.
fn no_essential(ecosystem: &Ecosystem, candidate: &Candidate) -> Result<(), String> {
    let is_essential = |molecule: &Molecule| {
        molecule.role.as_deref() == Some("essential") || molecule.has_tag("essential")
    };
    match candidate {
        Candidate::Molecule { molecule, .. } => {
            if is_essential(molecule) {
                return Err("essential molecules may not come from background".to_string());
            }
        }
        Candidate::Reaction { reaction, .. } => {
            for name in &reaction.reactants {
                if ecosystem.molecules.get(name).is_some_and(is_essential) {
                    return Err(format!("consumes essential molecule '{}'", name));
                }
            }
        }
    }
    Ok(())
}

/// A background reaction may not compete with a species for a resource
/// that a species reaction already consumes.
fn no_competition(ecosystem: &Ecosystem, candidate: &Candidate) -> Result<(), String> {
    let Candidate::Reaction { reaction, .. } = candidate else {
        return Ok(());
    };
    for reactant in &reaction.reactants {
        let contested = ecosystem.reactions.iter().any(|(key, existing)| {
            Ecosystem::species_of(key).is_some()
                && existing.reactants.iter().any(|r| r == reactant)
        });
        if contested {
            return Err(format!("competes for '{}'", reactant));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reaction(reactants: &[&str], products: &[&str]) -> Reaction {
        Reaction {
            reactants: reactants.iter().map(|s| s.to_string()).collect(),
            products: products.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn ecosystem_with(reactions: &[(&str, Reaction)]) -> Ecosystem {
        let mut eco = Ecosystem::default();
        for (name, rxn) in reactions {
            for m in rxn.molecules() {
                eco.molecules
                    .entry(m.to_string())
                    .or_insert_with(Molecule::default);
            }
            eco.reactions.insert(name.to_string(), rxn.clone());
        }
        eco
    }

    #[test]
    fn unknown_guard_lists_available() {
        let set = GuardSet::builtins();
        let eco = Ecosystem::default();
        let candidate = Candidate::Molecule {
            name: "m.bg.BG1".to_string(),
            molecule: Molecule::default(),
        };
        let err = set
            .check(&["no_such_guard".to_string()], &eco, &candidate)
            .unwrap_err();
        assert!(err.to_string().contains("no_new_cycles"));
    }

    #[test]
    fn cycle_closure_rejected() {
        // m.bg.A -> m.bg.B exists; candidate B -> A closes the loop.
        let eco = ecosystem_with(&[("r.bg.fwd", reaction(&["m.bg.A"], &["m.bg.B"]))]);
        let set = GuardSet::builtins();
        let active = vec!["no_new_cycles".to_string()];
        let bad = Candidate::Reaction {
            name: "r.bg.back".to_string(),
            reaction: reaction(&["m.bg.B"], &["m.bg.A"]),
        };
        assert!(matches!(
            set.check(&active, &eco, &bad),
            Err(GuardError::Violation { .. })
        ));
        let fine = Candidate::Reaction {
            name: "r.bg.side".to_string(),
            reaction: reaction(&["m.bg.B"], &["m.bg.C"]),
        };
        assert!(set.check(&active, &eco, &fine).is_ok());
    }

    #[test]
    fn species_coupling_rejected() {
        let eco = Ecosystem::default();
        let set = GuardSet::builtins();
        let active = vec!["no_new_species_dependencies".to_string()];
        let coupling = Candidate::Reaction {
            name: "r.bg.x".to_string(),
            reaction: reaction(&["m.krel.S"], &["m.kova.P"]),
        };
        let err = set.check(&active, &eco, &coupling).unwrap_err();
        assert!(err.to_string().contains("kova"));
        assert!(err.to_string().contains("krel"));
        let single = Candidate::Reaction {
            name: "r.bg.y".to_string(),
            reaction: reaction(&["m.krel.S"], &["m.bg.Q"]),
        };
        assert!(set.check(&active, &eco, &single).is_ok());
    }

    #[test]
    fn signal_and_essential_molecules_blocked() {
        let set = GuardSet::builtins();
        let eco = Ecosystem::default();
        let signal = Candidate::Molecule {
            name: "m.bg.S".to_string(),
            molecule: Molecule {
                role: Some("signal".to_string()),
                ..Default::default()
            },
        };
        assert!(set
            .check(&["no_signaling".to_string()], &eco, &signal)
            .is_err());
        let essential = Candidate::Molecule {
            name: "m.bg.E".to_string(),
            molecule: Molecule {
                tags: vec!["essential".to_string()],
                ..Default::default()
            },
        };
        assert!(set
            .check(&["no_essential".to_string()], &eco, &essential)
            .is_err());
    }

    #[test]
    fn competition_for_species_resource_rejected() {
        let eco = ecosystem_with(&[("r.krel.eat", reaction(&["m.krel.food"], &[]))]);
        let set = GuardSet::builtins();
        let active = vec!["no_competition".to_string()];
        let rival = Candidate::Reaction {
            name: "r.bg.steal".to_string(),
            reaction: reaction(&["m.krel.food"], &["m.bg.W"]),
        };
        assert!(set.check(&active, &eco, &rival).is_err());
        let harmless = Candidate::Reaction {
            name: "r.bg.own".to_string(),
            reaction: reaction(&["m.bg.W"], &[]),
        };
        assert!(set.check(&active, &eco, &harmless).is_ok());
    }
}
