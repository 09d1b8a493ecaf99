/// Container stage: places substrate concentrations and organism
/// populations into regions. Pure data placement over a frozen
/// ecosystem, no chemistry is created here.
use thiserror::Error;

use crate::core::bind::eval_value;
use crate::core::distributions::DistributionRegistry;
use crate::core::expr::ExprError;
use crate::core::rng::derive_rng;
use crate::core::scope::Scope;
use crate::schema::chemistry::Ecosystem;
use crate::schema::scenario::Region;
use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error("populations name unknown species '{name}'; ecosystem has: [{available}]")]
    UnknownSpecies { name: String, available: String },
    #[error("containers section: {0}")]
    BadSection(String),
}

/// Build the region list from the `parameters.containers` section.
/// Absent section yields a single region holding every species.
pub fn place(
    containers: Option<&Value>,
    ecosystem: &Ecosystem,
    distributions: &DistributionRegistry,
    master_seed: u64,
) -> Result<Vec<Region>, ContainerError> {
    let Some(spec) = containers else {
        return Ok(vec![default_region(ecosystem)]);
    };

    let count = match spec.get_path("regions.count") {
        None => 1,
        Some(raw) => {
            let scope = Scope::named("containers");
            let mut rng = derive_rng(master_seed, "regions", "contain");
            let value = eval_value(raw, &scope, distributions, &mut rng)?;
            let n = value.as_i64().unwrap_or(0);
            if n < 1 {
                return Err(ContainerError::BadSection(format!(
                    "regions.count must be positive, got {}",
                    n
                )));
            }
            n as u64
        }
    };

    let substrates = spec.get_path("regions.substrates").and_then(Value::as_map);
    let populations = spec.get("populations").and_then(Value::as_map);

    if let Some(entries) = populations {
        for (species, _) in entries {
            if !ecosystem.species.iter().any(|s| s == species) {
                return Err(ContainerError::UnknownSpecies {
                    name: species.clone(),
                    available: ecosystem.species.join(", "),
                });
            }
        }
    }

    let mut regions = Vec::with_capacity(count as usize);
    for i in 1..=count {
        let id = format!("region{}", i);
        let mut rng = derive_rng(master_seed, &id, "contain");
        let scope = Scope::named(&id);
        let mut region = Region {
            id: id.clone(),
            substrates: Default::default(),
            populations: Default::default(),
        };

        if let Some(entries) = substrates {
            for (substrate, raw) in entries {
                let value = eval_value(raw, &scope, distributions, &mut rng)?;
                let concentration = value.as_f64().unwrap_or(0.0).max(0.0);
                region.substrates.insert(substrate.clone(), concentration);
            }
        }

        match populations {
            Some(entries) => {
                for (species, raw) in entries {
                    let value = eval_value(raw, &scope, distributions, &mut rng)?;
                    let population = value.as_i64().unwrap_or(0).max(0) as u64;
                    region.populations.insert(species.clone(), population);
                }
            }
            None => {
                for species in &ecosystem.species {
                    region.populations.insert(species.clone(), 1);
                }
            }
        }
        regions.push(region);
    }
    Ok(regions)
}

fn default_region(ecosystem: &Ecosystem) -> Region {
    let mut region = Region {
        id: "region1".to_string(),
        substrates: Default::default(),
        populations: Default::default(),
    };
    for species in &ecosystem.species {
        region.populations.insert(species.clone(), 1);
    }
    region
}
