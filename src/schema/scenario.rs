/// Output artifacts of a generation run.
///
/// `Scenario` (agent-visible, opaque names) and `GroundTruth` (full
/// fidelity) are two projections over the same generated ecosystem,
/// related by the `VisibilityMapping` — never separate chemistries.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::chemistry::Ecosystem;
use super::value::Value;

/// A spatial container holding substrate concentrations and organism
/// populations. Pure data placement, no chemistry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub substrates: BTreeMap<String, f64>,
    /// Species name → organism count.
    pub populations: BTreeMap<String, u64>,
}

/// Injective map from ground-truth internal names to agent-visible
/// opaque names, plus the lists of entities hidden outright.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VisibilityMapping {
    pub names: BTreeMap<String, String>,
    pub hidden_molecules: Vec<String>,
    pub hidden_reactions: Vec<String>,
}

impl VisibilityMapping {
    pub fn opaque(&self, internal: &str) -> Option<&str> {
        self.names.get(internal).map(String::as_str)
    }

    pub fn is_hidden(&self, internal: &str) -> bool {
        self.hidden_molecules.iter().any(|n| n == internal)
            || self.hidden_reactions.iter().any(|n| n == internal)
    }

    /// True when no two internal names share an opaque name.
    pub fn is_injective(&self) -> bool {
        let mut seen = std::collections::BTreeSet::new();
        self.names.values().all(|opaque| seen.insert(opaque))
    }
}

/// The agent-visible projection: redacted entities under opaque names.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scenario {
    pub molecules: BTreeMap<String, Value>,
    pub reactions: BTreeMap<String, Value>,
    pub regions: Vec<Region>,
    pub seed: u64,
    pub metadata: Value,
}

/// The complete world state, including everything hidden from the
/// agent. Consumed by the simulator and by difficulty metrics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroundTruth {
    pub ecosystem: Ecosystem,
    pub regions: Vec<Region>,
}

/// Difficulty metrics computed from ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// Longest dependency chain in the reaction graph.
    pub reasoning_depth: u32,
    /// Fraction of entities hidden from the agent.
    pub hidden_fraction: f64,
    /// Hidden entity count plus reasoning depth.
    pub discovery_cost: f64,
}

/// Everything a generation run returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub scenario: Scenario,
    pub ground_truth: GroundTruth,
    pub visibility: VisibilityMapping,
    pub metrics: Metrics,
}
