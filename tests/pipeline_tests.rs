/// Pipeline integration tests — spec file to generated scenario.

use bioforge::core::pipeline::{ScenarioEngine, Stage};
use bioforge::schema::value::Value;

fn engine() -> ScenarioEngine {
    ScenarioEngine::builder()
        .templates_dir("tests/fixtures/templates")
        .build()
        .unwrap()
}

fn load_spec(name: &str) -> Value {
    let text = std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap();
    Value::parse_ron(&text).unwrap()
}

#[test]
fn energy_cycle_expands_replicated_carriers() {
    let spec = Value::parse_ron(
        r#"{
            "_instantiate_": {
                "_as_ krel": {"_template_": "energy_cycle"},
            },
        }"#,
    )
    .unwrap();
    let output = engine().generate(&spec, 11).unwrap();
    let eco = &output.ground_truth.ecosystem;

    assert_eq!(eco.species, vec!["krel"]);
    for i in 1..=3 {
        let molecule = &eco.molecules[&format!("m.krel.ME{}", i)];
        assert_eq!(molecule.role.as_deref(), Some("energy"));
        assert!(molecule.has_tag("carrier"));
    }
    assert!(!eco.molecules.contains_key("m.krel.ME4"));

    let activation = &eco.reactions["r.krel.activation"];
    assert_eq!(activation.reactants, vec!["m.krel.S"]);
    assert_eq!(activation.products, vec!["m.krel.ME1"]);
    let regeneration = &eco.reactions["r.krel.regeneration"];
    assert_eq!(regeneration.products, vec!["m.krel.S"]);

    // The energy output port is exposed but optional to wire.
    assert!(eco.ports.contains_key("krel.reactions.work"));
    assert!(eco.connections.is_empty());
}

#[test]
fn replicated_pathways_share_one_energy_port() {
    let output = engine().generate(&load_spec("producer_spec.ron"), 5).unwrap();
    let eco = &output.ground_truth.ecosystem;

    assert_eq!(eco.species, vec!["vorn"]);
    for i in 1..=2 {
        assert!(eco
            .molecules
            .contains_key(&format!("m.vorn.pathway{}.polymer", i)));
        let build = &eco.reactions[&format!("r.vorn.pathway{}.build", i)];
        assert_eq!(build.energy_source.as_deref(), Some("r.vorn.energy.work"));
    }
    assert!(!eco.reactions.contains_key("r.vorn.pathway3.build"));

    // Both connections fan out from the same producer port.
    assert_eq!(eco.connections.len(), 2);
    for connection in &eco.connections {
        assert_eq!(connection.from_port, "vorn.energy.reactions.work");
        assert_eq!(connection.port_type, "energy");
    }
    let mut targets: Vec<&str> = eco
        .connections
        .iter()
        .map(|c| c.to_port.as_str())
        .collect();
    targets.sort();
    assert_eq!(
        targets,
        vec![
            "vorn.pathway1.reactions.build",
            "vorn.pathway2.reactions.build"
        ]
    );
}

#[test]
fn mutualism_creates_shared_molecule() {
    let output = engine().generate(&load_spec("mutualism_spec.ron"), 3).unwrap();
    let eco = &output.ground_truth.ecosystem;

    assert_eq!(eco.interactions, vec!["feeding"]);
    let shuttle = &eco.molecules["m.feeding.shuttle"];
    assert_eq!(shuttle.role.as_deref(), Some("carrier"));

    // The producer's excrete reaction gained the shuttle product.
    let excrete = &eco.reactions["r.aleph.excrete"];
    assert!(excrete.products.iter().any(|p| p == "m.feeding.shuttle"));
    // The consumer side is untouched.
    let eat = &eco.reactions["r.bet.eat"];
    assert_eq!(eat.products, Vec::<String>::new());
}

#[test]
fn mutualism_without_required_port_names_the_species() {
    let err = engine()
        .generate(&load_spec("bad_mutualism_spec.ron"), 3)
        .unwrap_err();
    assert_eq!(err.stage, Stage::Wired);
    let msg = err.to_string();
    assert!(msg.contains("'aleph'"), "got: {}", msg);
    assert!(msg.contains("waste_output"), "got: {}", msg);
}

#[test]
fn full_spec_runs_every_stage() {
    let output = engine().generate(&load_spec("full_spec.ron"), 42).unwrap();
    let eco = &output.ground_truth.ecosystem;

    // Background fill added exactly the configured counts, outside any
    // species namespace.
    let bg_molecules = eco.molecules.keys().filter(|k| k.starts_with("m.bg.")).count();
    let bg_reactions = eco.reactions.keys().filter(|k| k.starts_with("r.bg.")).count();
    assert_eq!(bg_molecules, 4);
    assert_eq!(bg_reactions, 3);
    assert_eq!(eco.species, vec!["vorn", "shale"]);

    // Containers: two regions with sampled substrates and populations.
    let regions = &output.ground_truth.regions;
    assert_eq!(regions.len(), 2);
    for region in regions {
        let brine = region.substrates["brine"];
        assert!((1.0..3.0).contains(&brine));
        assert_eq!(region.populations["shale"], 6);
    }

    // Visibility split: visible + hidden partitions each entity type.
    let mapping = &output.visibility;
    assert!(mapping.is_injective());
    let visible_molecules = mapping.names.keys().filter(|k| k.starts_with("m.")).count();
    assert_eq!(
        visible_molecules + mapping.hidden_molecules.len(),
        eco.molecules.len()
    );
    let visible_reactions = mapping.names.keys().filter(|k| k.starts_with("r.")).count();
    assert_eq!(
        visible_reactions + mapping.hidden_reactions.len(),
        eco.reactions.len()
    );

    assert_eq!(
        output.scenario.metadata.get("difficulty").and_then(Value::as_str),
        Some("b10")
    );
    assert!(output.metrics.reasoning_depth >= 1);
}

#[test]
fn same_spec_same_seed_same_output() {
    let spec = load_spec("full_spec.ron");
    let a = engine().generate(&spec, 1234).unwrap();
    let b = engine().generate(&spec, 1234).unwrap();
    assert_eq!(a, b);
}

#[test]
fn different_seeds_diverge() {
    let spec = load_spec("full_spec.ron");
    let a = engine().generate(&spec, 1).unwrap();
    let b = engine().generate(&spec, 2).unwrap();
    // Structure is spec-driven either way; the sampled content is not.
    assert_eq!(
        a.ground_truth.ecosystem.species,
        b.ground_truth.ecosystem.species
    );
    assert_ne!(a.visibility.names, b.visibility.names);
}

#[test]
fn validate_spec_runs_without_generating() {
    let engine = engine();
    assert!(engine.validate_spec(&load_spec("full_spec.ron"), 1).is_ok());

    let bad = Value::parse_ron(
        r#"{
            "_instantiate_": {
                "_as_ krel": {"_template_": "no_such_template"},
            },
        }"#,
    )
    .unwrap();
    let err = engine.validate_spec(&bad, 1).unwrap_err();
    assert_eq!(err.stage, Stage::Bound);
    assert!(err.to_string().contains("no_such_template"));
}

#[test]
fn out_of_range_override_is_rejected() {
    let spec = Value::parse_ron(
        r#"{
            "_instantiate_": {
                "_as_ krel": {
                    "_template_": "energy_cycle",
                    "efficiency": 1.4,
                },
            },
        }"#,
    )
    .unwrap();
    let err = engine().generate(&spec, 7).unwrap_err();
    assert_eq!(err.stage, Stage::Bound);
    assert_eq!(err.path, "krel");
    assert!(err.to_string().contains("efficiency"));
}
