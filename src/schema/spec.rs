/// Generator spec — the declarative description a scenario is
/// synthesized from, parsed out of a structurally resolved document.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::value::Value;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("generator spec must be a map at the top level")]
    NotAMap,
    #[error("spec section '{section}': {reason}")]
    BadSection { section: String, reason: String },
}

/// Parsed generator spec sections. Unknown top-level keys are kept in
/// `constants` so `!ref` paths can target them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeneratorSpec {
    /// `_params_` — spec-level parameters, bound before tree expansion.
    pub params: Vec<(String, Value)>,
    /// `_instantiate_` — `_as_` blocks expanded by the tree builder.
    pub instantiate: Vec<(String, Value)>,
    /// `interactions` — cross-species wiring via interaction templates.
    pub interactions: Vec<(String, Value)>,
    /// `background` — bounded random fill configuration.
    pub background: Option<Value>,
    /// `parameters.containers` — region and population generation.
    pub containers: Option<Value>,
    /// `_visibility_` — per-entity-type observability configuration.
    pub visibility: Option<Value>,
    /// `_guards_` — active guard names for background fill.
    pub guards: Vec<String>,
    /// `_modify_` — post-wiring structural edits.
    pub modify: Vec<(String, Value)>,
    /// `_metadata_` — carried through to the scenario verbatim.
    pub metadata: Value,
    /// Remaining top-level sections, addressable by `!ref`.
    pub constants: Vec<(String, Value)>,
}

impl GeneratorSpec {
    pub fn parse(doc: &Value) -> Result<GeneratorSpec, SpecError> {
        let entries = doc.as_map().ok_or(SpecError::NotAMap)?;
        let mut spec = GeneratorSpec {
            metadata: Value::map(),
            ..Default::default()
        };

        for (key, value) in entries {
            match key.as_str() {
                "_params_" => spec.params = section_map(key, value)?,
                "_instantiate_" => spec.instantiate = section_map(key, value)?,
                "interactions" => spec.interactions = section_map(key, value)?,
                "background" => spec.background = Some(value.clone()),
                "parameters" => {
                    spec.containers = value.get("containers").cloned();
                }
                "_visibility_" => spec.visibility = Some(value.clone()),
                "_guards_" => spec.guards = parse_guards(value)?,
                "_modify_" => spec.modify = section_map(key, value)?,
                "_metadata_" => spec.metadata = value.clone(),
                _ => spec.constants.push((key.clone(), value.clone())),
            }
        }
        Ok(spec)
    }
}

fn section_map(section: &str, value: &Value) -> Result<Vec<(String, Value)>, SpecError> {
    value
        .as_map()
        .map(|entries| entries.to_vec())
        .ok_or_else(|| SpecError::BadSection {
            section: section.to_string(),
            reason: "must be a map".to_string(),
        })
}

/// Guard entries are either bare names or maps with a `name` key.
fn parse_guards(value: &Value) -> Result<Vec<String>, SpecError> {
    let items = value.as_seq().ok_or_else(|| SpecError::BadSection {
        section: "_guards_".to_string(),
        reason: "must be a list".to_string(),
    })?;
    let mut names = Vec::with_capacity(items.len());
    for item in items {
        let name = item
            .as_str()
            .or_else(|| item.get("name").and_then(Value::as_str))
            .ok_or_else(|| SpecError::BadSection {
                section: "_guards_".to_string(),
                reason: "guard entries must be names or maps with 'name'".to_string(),
            })?;
        names.push(name.to_string());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_spec() {
        let doc = Value::parse_ron(
            r#"{
                "_params_": {"chains": 2},
                "_instantiate_": {"_as_ krel": {"_template_": "producer"}},
                "interactions": {"feeding": {"_template_": "exchange"}},
                "background": {"molecules": {"count": 5}},
                "parameters": {"containers": {"regions": {"count": 3}}},
                "_visibility_": {"molecules": {"fraction_known": 0.7}},
                "_guards_": ["no_new_cycles", {"name": "no_essential"}],
                "_metadata_": {"difficulty": "b10"},
                "constants": {"high": 0.8},
            }"#,
        )
        .unwrap();
        let spec = GeneratorSpec::parse(&doc).unwrap();
        assert_eq!(spec.params.len(), 1);
        assert_eq!(spec.instantiate.len(), 1);
        assert_eq!(spec.interactions.len(), 1);
        assert!(spec.background.is_some());
        assert!(spec.containers.is_some());
        assert_eq!(spec.guards, vec!["no_new_cycles", "no_essential"]);
        assert_eq!(spec.metadata.get("difficulty").and_then(Value::as_str), Some("b10"));
        assert_eq!(spec.constants.len(), 1);
        assert_eq!(spec.constants[0].0, "constants");
    }

    #[test]
    fn non_map_spec_rejected() {
        assert!(matches!(
            GeneratorSpec::parse(&Value::Int(3)),
            Err(SpecError::NotAMap)
        ));
    }

    #[test]
    fn bad_guard_entry_rejected() {
        let doc = Value::Map(vec![(
            "_guards_".to_string(),
            Value::Seq(vec![Value::Int(1)]),
        )]);
        assert!(GeneratorSpec::parse(&doc).is_err());
    }
}
