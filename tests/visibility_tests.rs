/// Visibility integration tests — opaque projection over a generated
/// ecosystem, end to end through the engine.

use bioforge::core::pipeline::ScenarioEngine;
use bioforge::core::registry::TemplateRegistry;
use bioforge::schema::value::Value;

/// Engine with one template holding a large flat molecule pool and a
/// band of reactions over it.
fn wide_engine() -> ScenarioEngine {
    let mut registry = TemplateRegistry::new();
    registry.register(
        "pool",
        Value::parse_ron(
            r#"{
                "molecules": {
                    "M{i in 1..1000}": {"role": "metabolite"},
                },
                "reactions": {
                    "convert{i in 1..200}": {
                        "reactants": ["M{i}"],
                        "products": ["M1000"],
                    },
                },
            }"#,
        )
        .unwrap(),
    );
    ScenarioEngine::builder()
        .with_templates(registry)
        .build()
        .unwrap()
}

fn pool_spec(visibility: &str) -> Value {
    Value::parse_ron(&format!(
        r#"{{
            "_instantiate_": {{
                "_as_ murk": {{"_template_": "pool"}},
            }},
            "_visibility_": {visibility},
        }}"#
    ))
    .unwrap()
}

#[test]
fn visible_count_lands_inside_tolerance_band() {
    let spec = pool_spec(r#"{"molecules": {"fraction_known": 0.7}}"#);
    let output = wide_engine().generate(&spec, 31).unwrap();

    let visible = output.scenario.molecules.len();
    assert!((650..=750).contains(&visible), "visible = {}", visible);
    assert_eq!(
        visible + output.visibility.hidden_molecules.len(),
        1000
    );
}

#[test]
fn opaque_names_carry_no_internal_structure() {
    let spec = pool_spec(r#"{"molecules": {"fraction_known": 0.5}}"#);
    let output = wide_engine().generate(&spec, 8).unwrap();

    assert!(output.visibility.is_injective());
    for name in output.scenario.molecules.keys() {
        assert!(!name.contains('.'), "leaked namespace: {}", name);
        assert!(!name.contains("M"), "leaked local name: {}", name);
        assert!(!name.contains("murk"), "leaked species: {}", name);
    }
}

#[test]
fn visible_reactions_reference_only_visible_molecules() {
    let spec = pool_spec(
        r#"{
            "molecules": {"fraction_known": 0.5},
            "reactions": {"fraction_known": 1.0},
        }"#,
    );
    let output = wide_engine().generate(&spec, 12).unwrap();

    assert_eq!(output.scenario.reactions.len(), 200);
    for (name, body) in &output.scenario.reactions {
        for list in ["reactants", "products"] {
            let Some(items) = body.get(list).and_then(Value::as_seq) else {
                continue;
            };
            for item in items {
                let reference = item.as_str().unwrap();
                assert!(
                    output.scenario.molecules.contains_key(reference),
                    "reaction {} references {} which is not visible",
                    name,
                    reference
                );
            }
        }
    }
}

#[test]
fn projection_is_stable_per_seed() {
    let spec = pool_spec(r#"{"molecules": {"fraction_known": 0.6}}"#);
    let a = wide_engine().generate(&spec, 19).unwrap();
    let b = wide_engine().generate(&spec, 19).unwrap();
    assert_eq!(a.scenario, b.scenario);
    assert_eq!(a.visibility, b.visibility);

    let c = wide_engine().generate(&spec, 20).unwrap();
    assert_ne!(a.visibility.names, c.visibility.names);
}

#[test]
fn redacted_fields_stay_out_of_the_scenario() {
    let spec = pool_spec(
        r#"{
            "molecules": {
                "fraction_known": 1.0,
                "fields": {"role": "unknown"},
            },
        }"#,
    );
    let output = wide_engine().generate(&spec, 3).unwrap();
    assert_eq!(output.scenario.molecules.len(), 1000);
    for body in output.scenario.molecules.values() {
        assert_eq!(body.get("role"), None);
    }
}

#[test]
fn hidden_fraction_feeds_difficulty_metrics() {
    let spec = pool_spec(
        r#"{
            "molecules": {"fraction_known": 0.5},
            "reactions": {"fraction_known": 0.5},
        }"#,
    );
    let output = wide_engine().generate(&spec, 5).unwrap();
    let hidden = output.visibility.hidden_molecules.len()
        + output.visibility.hidden_reactions.len();
    assert!(hidden > 0);
    let expected = hidden as f64 / (1000 + 200) as f64;
    assert!((output.metrics.hidden_fraction - expected).abs() < 1e-9);
    assert!(output.metrics.discovery_cost >= hidden as f64);
}
