/// Difficulty metrics computed from ground truth and the visibility
/// mapping, for the reporting layer.
use rustc_hash::FxHashMap;

use crate::schema::chemistry::Ecosystem;
use crate::schema::scenario::{Metrics, VisibilityMapping};

/// Longest dependency chain in the reaction graph: the most molecule
/// hops from any source molecule to anything it ultimately produces.
/// Cycles do not extend the chain.
pub fn reasoning_depth(ecosystem: &Ecosystem) -> u32 {
    // Edges: reactant -> product per reaction.
    let mut edges: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for reaction in ecosystem.reactions.values() {
        for reactant in &reaction.reactants {
            let targets = edges.entry(reactant).or_default();
            for product in &reaction.products {
                targets.push(product);
            }
        }
    }

    fn depth_of<'a>(
        node: &'a str,
        edges: &FxHashMap<&'a str, Vec<&'a str>>,
        memo: &mut FxHashMap<&'a str, u32>,
        on_stack: &mut Vec<&'a str>,
    ) -> u32 {
        if let Some(cached) = memo.get(node) {
            return *cached;
        }
        if on_stack.contains(&node) {
            return 0;
        }
        on_stack.push(node);
        let mut best = 0;
        if let Some(targets) = edges.get(node) {
            for target in targets {
                best = best.max(1 + depth_of(target, edges, memo, on_stack));
            }
        }
        on_stack.pop();
        memo.insert(node, best);
        best
    }

    let mut memo = FxHashMap::default();
    let mut best = 0;
    for node in edges.keys() {
        best = best.max(depth_of(node, &edges, &mut memo, &mut Vec::new()));
    }
    best
}

/// Fraction of molecule and reaction entities hidden from the agent.
pub fn hidden_fraction(ecosystem: &Ecosystem, mapping: &VisibilityMapping) -> f64 {
    let total = ecosystem.molecules.len() + ecosystem.reactions.len();
    if total == 0 {
        return 0.0;
    }
    let hidden = mapping.hidden_molecules.len() + mapping.hidden_reactions.len();
    hidden as f64 / total as f64
}

pub fn compute(ecosystem: &Ecosystem, mapping: &VisibilityMapping) -> Metrics {
    let depth = reasoning_depth(ecosystem);
    let hidden = mapping.hidden_molecules.len() + mapping.hidden_reactions.len();
    Metrics {
        reasoning_depth: depth,
        hidden_fraction: hidden_fraction(ecosystem, mapping),
        discovery_cost: hidden as f64 + depth as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::chemistry::{Molecule, Reaction};

    fn chain_ecosystem() -> Ecosystem {
        let mut eco = Ecosystem::default();
        for name in ["m.k.A", "m.k.B", "m.k.C", "m.k.D"] {
            eco.molecules.insert(name.to_string(), Molecule::default());
        }
        let mut add = |name: &str, from: &str, to: &str| {
            eco.reactions.insert(
                name.to_string(),
                Reaction {
                    reactants: vec![from.to_string()],
                    products: vec![to.to_string()],
                    ..Default::default()
                },
            );
        };
        add("r.k.ab", "m.k.A", "m.k.B");
        add("r.k.bc", "m.k.B", "m.k.C");
        add("r.k.cd", "m.k.C", "m.k.D");
        eco
    }

    #[test]
    fn depth_of_linear_chain() {
        assert_eq!(reasoning_depth(&chain_ecosystem()), 3);
    }

    #[test]
    fn cycles_do_not_diverge() {
        let mut eco = chain_ecosystem();
        eco.reactions.insert(
            "r.k.da".to_string(),
            Reaction {
                reactants: vec!["m.k.D".to_string()],
                products: vec!["m.k.A".to_string()],
                ..Default::default()
            },
        );
        // Still finite; the cycle contributes its own length at most.
        assert!(reasoning_depth(&eco) <= 7);
    }

    #[test]
    fn metrics_combine_depth_and_hidden() {
        let eco = chain_ecosystem();
        let mapping = VisibilityMapping {
            hidden_molecules: vec!["m.k.D".to_string()],
            hidden_reactions: vec!["r.k.cd".to_string()],
            ..Default::default()
        };
        let metrics = compute(&eco, &mapping);
        assert_eq!(metrics.reasoning_depth, 3);
        assert!((metrics.hidden_fraction - 2.0 / 7.0).abs() < 1e-9);
        assert!((metrics.discovery_cost - 5.0).abs() < 1e-9);
    }

    #[test]
    fn empty_ecosystem_is_zero() {
        let metrics = compute(&Ecosystem::default(), &VisibilityMapping::default());
        assert_eq!(metrics.reasoning_depth, 0);
        assert_eq!(metrics.hidden_fraction, 0.0);
        assert_eq!(metrics.discovery_cost, 0.0);
    }
}
