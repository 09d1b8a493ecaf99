/// Concrete chemistry produced by instantiation: molecules, reactions,
/// per-species chemistries, and the merged ecosystem.
///
/// Internal names are namespaced: `m.<namespace>.<local>` for
/// molecules, `r.<namespace>.<local>` for reactions. The `bg` namespace
/// is reserved for background fill and is not a species.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::template::Port;
use super::value::Value;

/// A concrete molecule. `properties` keeps any fields the template
/// declared beyond the known ones (Quoted rate expressions included).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Molecule {
    pub role: Option<String>,
    pub tags: Vec<String>,
    pub properties: Value,
}

impl Molecule {
    pub fn from_value(data: &Value) -> Molecule {
        let mut molecule = Molecule {
            role: None,
            tags: Vec::new(),
            properties: Value::map(),
        };
        if let Some(entries) = data.as_map() {
            for (key, value) in entries {
                match key.as_str() {
                    "role" => molecule.role = value.as_str().map(str::to_string),
                    "tags" => {
                        if let Some(items) = value.as_seq() {
                            molecule.tags = items
                                .iter()
                                .filter_map(|v| v.as_str().map(str::to_string))
                                .collect();
                        }
                    }
                    _ => molecule.properties.insert(key, value.clone()),
                }
            }
        }
        molecule
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// A concrete reaction with namespaced molecule references.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reaction {
    pub reactants: Vec<String>,
    pub products: Vec<String>,
    /// Usually a `Quoted` expression, compiled later by the simulator.
    pub rate: Option<Value>,
    /// Set by port wiring: namespaced path of the energy provider.
    pub energy_source: Option<String>,
    pub properties: Value,
}

impl Reaction {
    pub fn from_value(data: &Value) -> Reaction {
        let mut reaction = Reaction {
            reactants: Vec::new(),
            products: Vec::new(),
            rate: None,
            energy_source: None,
            properties: Value::map(),
        };
        if let Some(entries) = data.as_map() {
            for (key, value) in entries {
                match key.as_str() {
                    "reactants" => reaction.reactants = str_list(value),
                    "products" => reaction.products = str_list(value),
                    "rate" => reaction.rate = Some(value.clone()),
                    "energy_source" => {
                        reaction.energy_source = value.as_str().map(str::to_string)
                    }
                    _ => reaction.properties.insert(key, value.clone()),
                }
            }
        }
        reaction
    }

    /// All molecule names this reaction touches.
    pub fn molecules(&self) -> impl Iterator<Item = &str> {
        self.reactants
            .iter()
            .chain(self.products.iter())
            .map(String::as_str)
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

/// A port declared by an instantiated node, addressed by its full key
/// `<namespace>.<port_path>` and pointing at a namespaced entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundPort {
    pub port: Port,
    /// Namespaced path of the entity behind the port, e.g.
    /// `r.krel.energy.work`.
    pub target: String,
    /// True once wiring has connected or explicitly exposed this port.
    pub wired: bool,
}

/// Per-species chemistry, owned by the instantiation stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeciesChemistry {
    pub species: String,
    pub molecules: BTreeMap<String, Molecule>,
    pub reactions: BTreeMap<String, Reaction>,
    pub ports: BTreeMap<String, BoundPort>,
}

/// A wired connection between two ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from_port: String,
    pub to_port: String,
    pub port_type: String,
}

/// The union of all species chemistries plus cross-species content
/// created by interactions and background fill. Mutated only by the
/// wiring and fill stages; frozen afterwards.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Ecosystem {
    pub molecules: BTreeMap<String, Molecule>,
    pub reactions: BTreeMap<String, Reaction>,
    pub ports: BTreeMap<String, BoundPort>,
    pub species: Vec<String>,
    pub connections: Vec<Connection>,
    /// Names of realized interaction namespaces.
    pub interactions: Vec<String>,
}

impl Ecosystem {
    /// Merge one species chemistry into the ecosystem.
    pub fn absorb(&mut self, chemistry: SpeciesChemistry) {
        if !chemistry.species.is_empty() && !self.species.contains(&chemistry.species) {
            self.species.push(chemistry.species.clone());
        }
        self.molecules.extend(chemistry.molecules);
        self.reactions.extend(chemistry.reactions);
        self.ports.extend(chemistry.ports);
    }

    /// Extract the species segment from a namespaced path, e.g.
    /// `m.krel.energy.ME1` → `krel`. Background (`bg`) is not a species.
    pub fn species_of(path: &str) -> Option<&str> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let species = if first == "m" || first == "r" {
            parts.next()?
        } else {
            first
        };
        if species == "bg" {
            None
        } else {
            Some(species)
        }
    }

    /// Ports exposed by a species, by port type.
    pub fn species_ports(&self, species: &str) -> impl Iterator<Item = (&String, &BoundPort)> {
        let prefix = format!("{}.", species);
        self.ports
            .iter()
            .filter(move |(key, _)| key.starts_with(&prefix))
    }
}
