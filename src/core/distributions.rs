/// Distribution sampler registry.
///
/// Pure functions mapping a distribution call + RNG state to a concrete
/// value. The registry is an explicit object passed into the pipeline
/// (no global lookup tables), populated with the built-ins at startup.
use rand::rngs::StdRng;
use rand::Rng;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("unknown distribution '{0}'")]
    Unknown(String),
    #[error("distribution '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("distribution '{name}': bad argument: {reason}")]
    BadArgument { name: &'static str, reason: String },
    #[error("choice() over an empty list")]
    EmptyChoice,
}

pub type SamplerFn = fn(&[Value], &mut StdRng) -> Result<Value, DistributionError>;

pub struct DistributionRegistry {
    samplers: FxHashMap<String, SamplerFn>,
}

impl DistributionRegistry {
    /// Empty registry. Most callers want `builtins()`.
    pub fn new() -> DistributionRegistry {
        DistributionRegistry {
            samplers: FxHashMap::default(),
        }
    }

    /// Registry with the standard distribution set.
    pub fn builtins() -> DistributionRegistry {
        let mut registry = DistributionRegistry::new();
        registry.register("normal", normal);
        registry.register("uniform", uniform);
        registry.register("lognormal", lognormal);
        registry.register("poisson", poisson);
        registry.register("exponential", exponential);
        registry.register("choice", choice);
        registry.register("discrete", discrete);
        registry
    }

    pub fn register(&mut self, name: &str, sampler: SamplerFn) {
        self.samplers.insert(name.to_string(), sampler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.samplers.contains_key(name)
    }

    pub fn sample(
        &self,
        name: &str,
        args: &[Value],
        rng: &mut StdRng,
    ) -> Result<Value, DistributionError> {
        let sampler = self
            .samplers
            .get(name)
            .ok_or_else(|| DistributionError::Unknown(name.to_string()))?;
        sampler(args, rng)
    }
}

impl Default for DistributionRegistry {
    fn default() -> Self {
        Self::builtins()
    }
}

fn numeric_args<const N: usize>(
    name: &'static str,
    args: &[Value],
) -> Result<[f64; N], DistributionError> {
    if args.len() != N {
        return Err(DistributionError::Arity {
            name,
            expected: N,
            got: args.len(),
        });
    }
    let mut out = [0.0; N];
    for (i, arg) in args.iter().enumerate() {
        out[i] = arg.as_f64().ok_or_else(|| DistributionError::BadArgument {
            name,
            reason: format!("argument {} is not numeric", i + 1),
        })?;
    }
    Ok(out)
}

/// Standard normal via Box–Muller; the pack carries no rand_distr, so
/// the transform lives here.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

fn normal(args: &[Value], rng: &mut StdRng) -> Result<Value, DistributionError> {
    let [mean, sd] = numeric_args::<2>("normal", args)?;
    Ok(Value::Float(mean + sd * standard_normal(rng)))
}

fn uniform(args: &[Value], rng: &mut StdRng) -> Result<Value, DistributionError> {
    let [lo, hi] = numeric_args::<2>("uniform", args)?;
    if hi < lo {
        return Err(DistributionError::BadArgument {
            name: "uniform",
            reason: format!("upper bound {} below lower bound {}", hi, lo),
        });
    }
    if hi == lo {
        return Ok(Value::Float(lo));
    }
    Ok(Value::Float(rng.gen_range(lo..hi)))
}

fn lognormal(args: &[Value], rng: &mut StdRng) -> Result<Value, DistributionError> {
    let [mu, sigma] = numeric_args::<2>("lognormal", args)?;
    Ok(Value::Float((mu + sigma * standard_normal(rng)).exp()))
}

/// Knuth's multiplication method. Fine for the lambda ranges generator
/// specs use (counts, not bulk statistics).
fn poisson(args: &[Value], rng: &mut StdRng) -> Result<Value, DistributionError> {
    let [lambda] = numeric_args::<1>("poisson", args)?;
    if lambda < 0.0 {
        return Err(DistributionError::BadArgument {
            name: "poisson",
            reason: format!("lambda {} is negative", lambda),
        });
    }
    let limit = (-lambda).exp();
    let mut k: i64 = 0;
    let mut p = 1.0;
    loop {
        p *= rng.gen_range(0.0..1.0f64);
        if p <= limit {
            return Ok(Value::Int(k));
        }
        k += 1;
    }
}

fn exponential(args: &[Value], rng: &mut StdRng) -> Result<Value, DistributionError> {
    let [rate] = numeric_args::<1>("exponential", args)?;
    if rate <= 0.0 {
        return Err(DistributionError::BadArgument {
            name: "exponential",
            reason: format!("rate {} must be positive", rate),
        });
    }
    let u: f64 = rng.gen_range(f64::EPSILON..1.0);
    Ok(Value::Float(-u.ln() / rate))
}

/// Uniform pick from a list: `choice([a, b, c])`.
fn choice(args: &[Value], rng: &mut StdRng) -> Result<Value, DistributionError> {
    if args.len() != 1 {
        return Err(DistributionError::Arity {
            name: "choice",
            expected: 1,
            got: args.len(),
        });
    }
    let items = args[0].as_seq().ok_or_else(|| DistributionError::BadArgument {
        name: "choice",
        reason: "argument must be a list".to_string(),
    })?;
    if items.is_empty() {
        return Err(DistributionError::EmptyChoice);
    }
    Ok(items[rng.gen_range(0..items.len())].clone())
}

/// Weighted pick from `discrete([[value, weight], ..])`.
fn discrete(args: &[Value], rng: &mut StdRng) -> Result<Value, DistributionError> {
    if args.len() != 1 {
        return Err(DistributionError::Arity {
            name: "discrete",
            expected: 1,
            got: args.len(),
        });
    }
    let pairs = args[0].as_seq().ok_or_else(|| DistributionError::BadArgument {
        name: "discrete",
        reason: "argument must be a list of [value, weight] pairs".to_string(),
    })?;
    if pairs.is_empty() {
        return Err(DistributionError::EmptyChoice);
    }

    let mut entries = Vec::with_capacity(pairs.len());
    let mut total = 0.0;
    for pair in pairs {
        let pair = pair.as_seq().filter(|p| p.len() == 2).ok_or_else(|| {
            DistributionError::BadArgument {
                name: "discrete",
                reason: "each entry must be a [value, weight] pair".to_string(),
            }
        })?;
        let weight = pair[1].as_f64().filter(|w| *w >= 0.0).ok_or_else(|| {
            DistributionError::BadArgument {
                name: "discrete",
                reason: "weights must be non-negative numbers".to_string(),
            }
        })?;
        total += weight;
        entries.push((&pair[0], weight));
    }
    if total <= 0.0 {
        return Err(DistributionError::BadArgument {
            name: "discrete",
            reason: "total weight is zero".to_string(),
        });
    }

    let mut pick = rng.gen_range(0.0..total);
    for (value, weight) in &entries {
        if pick < *weight {
            return Ok((*value).clone());
        }
        pick -= weight;
    }
    Ok(entries.last().unwrap().0.clone())
}
