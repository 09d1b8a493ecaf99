/// The generation pipeline: spec document → Scenario + GroundTruth.
///
/// A strict state machine over the stages
/// `Resolved → Bound → Instantiated → Wired → Filled → Contained →
/// Visible → Validated`. Every transition fails closed: the first gate
/// failure aborts the run with the stage and offending path, and no
/// partial scenario is ever returned.
use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use crate::core::background::{self, BackgroundError};
use crate::core::bind::{self, BindError};
use crate::core::containers::{self, ContainerError};
use crate::core::distributions::DistributionRegistry;
use crate::core::guards::GuardSet;
use crate::core::instantiate::{self, InstantiateError};
use crate::core::metrics;
use crate::core::registry::{RegistryError, TemplateRegistry};
use crate::core::resolve::{self, IncludeLoader, NoIncludes, ResolveError};
use crate::core::scope::Scope;
use crate::core::tree::{self, TreeError};
use crate::core::visibility::{self, VisibilityError};
use crate::core::wiring::{self, WiringError};
use crate::schema::chemistry::Ecosystem;
use crate::schema::scenario::{GenerationOutput, GroundTruth};
use crate::schema::spec::{GeneratorSpec, SpecError};
use crate::schema::value::Value;

/// Pipeline states, in order. Each stage name appears in errors and in
/// per-stage RNG derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolved,
    Bound,
    Instantiated,
    Wired,
    Filled,
    Contained,
    Visible,
    Validated,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Resolved => "resolved",
            Stage::Bound => "bound",
            Stage::Instantiated => "instantiated",
            Stage::Wired => "wired",
            Stage::Filled => "filled",
            Stage::Contained => "contained",
            Stage::Visible => "visible",
            Stage::Validated => "validated",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Instantiate(#[from] InstantiateError),
    #[error(transparent)]
    Wiring(#[from] WiringError),
    #[error(transparent)]
    Background(#[from] BackgroundError),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Visibility(#[from] VisibilityError),
    #[error("structural validation: {0}")]
    Structural(String),
}

/// A gate failure: the stage that failed, the offending namespace path
/// (or section), and the violated invariant.
#[derive(Debug, Error)]
#[error("stage '{stage}' failed at '{path}': {source}")]
pub struct PipelineError {
    pub stage: Stage,
    pub path: String,
    #[source]
    pub source: StageFailure,
}

fn fail(stage: Stage, path: &str, source: impl Into<StageFailure>) -> PipelineError {
    PipelineError {
        stage,
        path: path.to_string(),
        source: source.into(),
    }
}

/// The top-level scenario engine. Built via `ScenarioEngine::builder()`
/// with explicit registries; nothing global, so independent
/// `(spec, seed)` runs share no mutable state.
pub struct ScenarioEngine {
    templates: TemplateRegistry,
    distributions: DistributionRegistry,
    guards: GuardSet,
    includes: Box<dyn IncludeLoader>,
}

pub struct ScenarioEngineBuilder {
    templates: TemplateRegistry,
    templates_dir: Option<String>,
    distributions: DistributionRegistry,
    guards: GuardSet,
    includes: Option<Box<dyn IncludeLoader>>,
}

impl ScenarioEngine {
    pub fn builder() -> ScenarioEngineBuilder {
        ScenarioEngineBuilder {
            templates: TemplateRegistry::new(),
            templates_dir: None,
            distributions: DistributionRegistry::builtins(),
            guards: GuardSet::builtins(),
            includes: None,
        }
    }

    /// Run the whole pipeline for one `(spec, seed)` pair.
    pub fn generate(
        &self,
        doc: &Value,
        master_seed: u64,
    ) -> Result<GenerationOutput, PipelineError> {
        let (spec, registry) = self.resolve_stage(doc)?;

        debug!(stage = "bound", seed = master_seed, "binding parameters");
        let bound = self.bind_stage(&spec, &registry, master_seed)?;

        debug!(stage = "instantiated", "rendering templates");
        let mut ecosystem =
            instantiate::instantiate(&bound, &registry, &self.distributions, master_seed)
                .map_err(|e| {
                    let path = instantiate_path(&e).to_string();
                    fail(Stage::Instantiated, &path, e)
                })?;

        debug!(stage = "wired", interactions = spec.interactions.len(), "wiring ports");
        wiring::wire(
            &mut ecosystem,
            &bound,
            &spec.interactions,
            &spec.modify,
            &registry,
            &self.distributions,
            master_seed,
        )
        .map_err(|e| fail(Stage::Wired, "wiring", e))?;

        if let Some(background) = &spec.background {
            debug!(stage = "filled", "background fill");
            background::fill(
                &mut ecosystem,
                background,
                &spec.guards,
                &self.guards,
                &self.distributions,
                master_seed,
            )
            .map_err(|e| fail(Stage::Filled, "bg", e))?;
        }

        debug!(stage = "contained", "placing containers");
        let regions = containers::place(
            spec.containers.as_ref(),
            &ecosystem,
            &self.distributions,
            master_seed,
        )
        .map_err(|e| fail(Stage::Contained, "containers", e))?;

        debug!(stage = "visible", "projecting visibility");
        let (scenario, mapping) = visibility::project(
            &ecosystem,
            &regions,
            spec.visibility.as_ref(),
            &spec.metadata,
            master_seed,
        )
        .map_err(|e| fail(Stage::Visible, "visibility", e))?;

        validate(&ecosystem, &spec, bound.roots.len())
            .map_err(|(path, reason)| fail(Stage::Validated, &path, StageFailure::Structural(reason)))?;

        let metrics = metrics::compute(&ecosystem, &mapping);
        Ok(GenerationOutput {
            scenario,
            ground_truth: GroundTruth { ecosystem, regions },
            visibility: mapping,
            metrics,
        })
    }

    /// Validate a spec document without generating: runs resolution,
    /// tree building, and binding gates only.
    pub fn validate_spec(&self, doc: &Value, master_seed: u64) -> Result<(), PipelineError> {
        let (spec, registry) = self.resolve_stage(doc)?;
        self.bind_stage(&spec, &registry, master_seed)?;
        Ok(())
    }

    fn resolve_stage(
        &self,
        doc: &Value,
    ) -> Result<(GeneratorSpec, TemplateRegistry), PipelineError> {
        debug!(stage = "resolved", "resolving placeholders");
        // Top-level sections are addressable by `!ref`.
        let mut constants = Scope::named("spec");
        if let Some(entries) = doc.as_map() {
            for (key, value) in entries {
                constants.set_local(key, value.clone());
            }
        }
        let resolved = resolve::resolve_structural(doc, &constants, self.includes.as_ref())
            .map_err(|e| fail(Stage::Resolved, "spec", e))?;
        debug_assert!(!resolved.has_structural_placeholder());

        let spec = GeneratorSpec::parse(&resolved).map_err(|e| fail(Stage::Resolved, "spec", e))?;

        let mut registry = self.templates.clone();
        if let Some(inline) = resolved.get("templates") {
            registry.register_from_doc(inline);
        }
        Ok((spec, registry))
    }

    fn bind_stage(
        &self,
        spec: &GeneratorSpec,
        registry: &TemplateRegistry,
        master_seed: u64,
    ) -> Result<bind::BoundTree, PipelineError> {
        let constants = Rc::new(Scope::from_entries(&spec.constants));
        let params = bind::bind_spec_params(
            &spec.params,
            &constants,
            &self.distributions,
            master_seed,
        )
        .map_err(|e| fail(Stage::Bound, "_params_", e))?;
        let spec_scope = Rc::new(constants.child(&params, Some("_params_")));

        let tree = tree::build_tree(&spec.instantiate, registry, &spec_scope)
            .map_err(|e| fail(Stage::Bound, "_instantiate_", e))?;
        let bound = bind::bind_tree(
            &tree,
            registry,
            &self.distributions,
            master_seed,
            &spec_scope,
        )
        .map_err(|e| {
            let path = bind_path(&e).to_string();
            fail(Stage::Bound, &path, e)
        })?;
        Ok(bound)
    }
}

fn bind_path(error: &BindError) -> &str {
    match error {
        BindError::UnresolvedParam { path, .. }
        | BindError::OutOfRange { path, .. }
        | BindError::ResidualEvaluable { path, .. } => path,
        _ => "_params_",
    }
}

fn instantiate_path(error: &InstantiateError) -> &str {
    match error {
        InstantiateError::BadRange { path, .. }
        | InstantiateError::UnknownMolecule { path, .. }
        | InstantiateError::DanglingPortTarget { path, .. } => path,
        _ => "instantiate",
    }
}

/// Terminal structural invariants, re-checked over the finished
/// ecosystem before anything is returned.
fn validate(
    ecosystem: &Ecosystem,
    spec: &GeneratorSpec,
    root_count: usize,
) -> Result<(), (String, String)> {
    if ecosystem.species.len() != root_count {
        return Err((
            "species".to_string(),
            format!(
                "expected {} species from the spec, ecosystem has {}",
                root_count,
                ecosystem.species.len()
            ),
        ));
    }
    for (name, _) in &spec.interactions {
        if !ecosystem.interactions.iter().any(|i| i == name) {
            return Err((
                name.clone(),
                format!("declared interaction '{}' was not realized", name),
            ));
        }
    }
    for (key, reaction) in &ecosystem.reactions {
        for molecule in reaction.molecules() {
            if !ecosystem.molecules.contains_key(molecule) {
                return Err((
                    key.clone(),
                    format!("reaction references missing molecule '{}'", molecule),
                ));
            }
        }
    }
    for connection in &ecosystem.connections {
        for port in [&connection.from_port, &connection.to_port] {
            if !ecosystem.ports.contains_key(port) {
                return Err((
                    port.clone(),
                    "connection references missing port".to_string(),
                ));
            }
        }
    }
    Ok(())
}

impl ScenarioEngineBuilder {
    /// Load templates from a directory of `.ron` files.
    pub fn templates_dir(mut self, path: &str) -> Self {
        self.templates_dir = Some(path.to_string());
        self
    }

    /// Provide templates directly (for testing without files).
    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_distributions(mut self, distributions: DistributionRegistry) -> Self {
        self.distributions = distributions;
        self
    }

    pub fn with_guards(mut self, guards: GuardSet) -> Self {
        self.guards = guards;
        self
    }

    pub fn with_includes(mut self, loader: Box<dyn IncludeLoader>) -> Self {
        self.includes = Some(loader);
        self
    }

    pub fn build(self) -> Result<ScenarioEngine, PipelineError> {
        let mut templates = self.templates;
        if let Some(dir) = &self.templates_dir {
            templates
                .load_from_dir(std::path::Path::new(dir))
                .map_err(|e| fail(Stage::Resolved, dir, e))?;
        }
        Ok(ScenarioEngine {
            templates,
            distributions: self.distributions,
            guards: self.guards,
            includes: self.includes.unwrap_or_else(|| Box::new(NoIncludes)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(templates: &[(&str, &str)]) -> ScenarioEngine {
        let mut registry = TemplateRegistry::new();
        for (name, ron) in templates {
            registry.register(name, Value::parse_ron(ron).unwrap());
        }
        ScenarioEngine::builder()
            .with_templates(registry)
            .build()
            .unwrap()
    }

    fn energy_cycle_engine() -> ScenarioEngine {
        engine_with(&[(
            "energy_cycle",
            r#"{
                "params": {"carrier_count": 3},
                "molecules": {
                    "S": {"role": "substrate"},
                    "ME{i in 1..carrier_count}": {"role": "energy"},
                },
                "reactions": {
                    "activation": {"reactants": ["S"], "products": ["ME1"]},
                    "work": {"reactants": ["ME1"], "products": []},
                    "regeneration": {"reactants": [], "products": ["S"]},
                },
                "ports": {"reactions.work": "energy.out"},
            }"#,
        )])
    }

    fn energy_cycle_spec() -> Value {
        Value::parse_ron(
            r#"{
                "_instantiate_": {
                    "_as_ krel": {"_template_": "energy_cycle"},
                },
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn full_run_produces_output() {
        let engine = energy_cycle_engine();
        let output = engine.generate(&energy_cycle_spec(), 1).unwrap();
        let eco = &output.ground_truth.ecosystem;
        for i in 1..=3 {
            let m = &eco.molecules[&format!("m.krel.ME{}", i)];
            assert_eq!(m.role.as_deref(), Some("energy"));
        }
        assert!(!eco.molecules.contains_key("m.krel.ME4"));
        assert_eq!(eco.reactions.len(), 3);
        for name in ["activation", "work", "regeneration"] {
            assert!(eco.reactions.contains_key(&format!("r.krel.{}", name)));
        }
        assert_eq!(output.scenario.seed, 1);
        assert_eq!(output.ground_truth.regions.len(), 1);
    }

    #[test]
    fn failure_names_stage_and_path() {
        let engine = engine_with(&[]);
        let err = engine.generate(&energy_cycle_spec(), 1).unwrap_err();
        assert_eq!(err.stage, Stage::Bound);
        let msg = err.to_string();
        assert!(msg.contains("'bound'"));
        assert!(msg.contains("_instantiate_"));
        assert!(msg.contains("energy_cycle"));
    }

    #[test]
    fn generation_is_deterministic() {
        let engine = energy_cycle_engine();
        let spec = Value::parse_ron(
            r#"{
                "_instantiate_": {
                    "_as_ krel": {
                        "_template_": "energy_cycle",
                        "carrier_count": "!ev 1 + poisson(2)",
                    },
                },
                "background": {
                    "molecules": {"count": 3},
                    "reactions": {"count": 2},
                },
                "_visibility_": {"molecules": {"fraction_known": 0.6, "tolerance": 0.2}},
            }"#,
        )
        .unwrap();
        let a = engine.generate(&spec, 77).unwrap();
        let b = engine.generate(&spec, 77).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn validate_spec_catches_missing_template() {
        let engine = engine_with(&[]);
        assert!(engine.validate_spec(&energy_cycle_spec(), 1).is_err());
        let engine = energy_cycle_engine();
        assert!(engine.validate_spec(&energy_cycle_spec(), 1).is_ok());
    }

    #[test]
    fn inline_templates_register() {
        let engine = engine_with(&[]);
        let spec = Value::parse_ron(
            r#"{
                "templates": {
                    "mini": {"molecules": {"X": {}}},
                },
                "_instantiate_": {
                    "_as_ solo": {"_template_": "mini"},
                },
            }"#,
        )
        .unwrap();
        let output = engine.generate(&spec, 2).unwrap();
        assert!(output
            .ground_truth
            .ecosystem
            .molecules
            .contains_key("m.solo.X"));
    }

    #[test]
    fn declared_interaction_must_be_realized() {
        // Interactions are realized during wiring; an entry without a
        // template is already a wiring failure.
        let engine = energy_cycle_engine();
        let spec = Value::parse_ron(
            r#"{
                "_instantiate_": {
                    "_as_ krel": {"_template_": "energy_cycle"},
                },
                "interactions": {
                    "feeding": {"between": ["krel"]},
                },
            }"#,
        )
        .unwrap();
        let err = engine.generate(&spec, 1).unwrap_err();
        assert_eq!(err.stage, Stage::Wired);
    }
}
