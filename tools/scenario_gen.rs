/// Scenario generator CLI.
///
/// Usage:
///   scenario_gen generate <spec.ron> --seed <n> [--templates <dir>] [--output <path>]
///   scenario_gen generate <spec.ron> --seeds <lo>..<hi> --output-dir <dir> [--templates <dir>]
///   scenario_gen validate <spec.ron> [--seed <n>] [--templates <dir>]
///   scenario_gen metrics <output.ron>
///
/// Exit code 0 on success; nonzero with the failing stage and path on
/// any gate failure.

use std::path::Path;

use bioforge::core::metrics;
use bioforge::core::pipeline::ScenarioEngine;
use bioforge::core::resolve::FsIncludeLoader;
use bioforge::schema::scenario::GenerationOutput;
use bioforge::schema::value::Value;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        std::process::exit(if args.len() < 3 { 1 } else { 0 });
    }

    let command = args[1].as_str();
    let input = args[2].clone();

    let mut seed: u64 = 0;
    let mut seeds: Option<(u64, u64)> = None;
    let mut templates_dir: Option<String> = None;
    let mut output: Option<String> = None;
    let mut output_dir: Option<String> = None;

    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" if i + 1 < args.len() => {
                i += 1;
                seed = match args[i].parse() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("--seed expects an integer, got '{}'", args[i]);
                        std::process::exit(1);
                    }
                };
            }
            "--seeds" if i + 1 < args.len() => {
                i += 1;
                seeds = match parse_seed_range(&args[i]) {
                    Some(range) => Some(range),
                    None => {
                        eprintln!("--seeds expects '<lo>..<hi>', got '{}'", args[i]);
                        std::process::exit(1);
                    }
                };
            }
            "--templates" if i + 1 < args.len() => {
                i += 1;
                templates_dir = Some(args[i].clone());
            }
            "--output" if i + 1 < args.len() => {
                i += 1;
                output = Some(args[i].clone());
            }
            "--output-dir" if i + 1 < args.len() => {
                i += 1;
                output_dir = Some(args[i].clone());
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let exit = match command {
        "generate" => run_generate(&input, seed, seeds, templates_dir, output, output_dir),
        "validate" => run_validate(&input, seed, templates_dir),
        "metrics" => run_metrics(&input),
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            1
        }
    };
    std::process::exit(exit);
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  scenario_gen generate <spec.ron> --seed <n> [--templates <dir>] [--output <path>]");
    eprintln!("  scenario_gen generate <spec.ron> --seeds <lo>..<hi> --output-dir <dir> [--templates <dir>]");
    eprintln!("  scenario_gen validate <spec.ron> [--seed <n>] [--templates <dir>]");
    eprintln!("  scenario_gen metrics <output.ron>");
}

fn parse_seed_range(text: &str) -> Option<(u64, u64)> {
    let (lo, hi) = text.split_once("..")?;
    let lo: u64 = lo.trim().parse().ok()?;
    let hi: u64 = hi.trim().parse().ok()?;
    (hi >= lo).then_some((lo, hi))
}

fn build_engine(spec_path: &str, templates_dir: Option<String>) -> Result<ScenarioEngine, String> {
    let mut builder = ScenarioEngine::builder();
    if let Some(dir) = templates_dir {
        builder = builder.templates_dir(&dir);
    }
    // Includes resolve relative to the spec file.
    if let Some(parent) = Path::new(spec_path).parent() {
        builder = builder.with_includes(Box::new(FsIncludeLoader::new(parent)));
    }
    builder.build().map_err(|e| e.to_string())
}

fn load_spec(path: &str) -> Result<Value, String> {
    let text =
        std::fs::read_to_string(path).map_err(|e| format!("cannot read '{}': {}", path, e))?;
    Value::parse_ron(&text).map_err(|e| format!("cannot parse '{}': {}", path, e))
}

fn write_output(output: &GenerationOutput, path: &str) -> Result<(), String> {
    let pretty = ron::ser::PrettyConfig::default();
    let text = ron::ser::to_string_pretty(output, pretty)
        .map_err(|e| format!("serialization failed: {}", e))?;
    std::fs::write(path, text).map_err(|e| format!("cannot write '{}': {}", path, e))
}

fn run_generate(
    spec_path: &str,
    seed: u64,
    seeds: Option<(u64, u64)>,
    templates_dir: Option<String>,
    output: Option<String>,
    output_dir: Option<String>,
) -> i32 {
    let engine = match build_engine(spec_path, templates_dir) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    };
    let doc = match load_spec(spec_path) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    };

    match seeds {
        None => match engine.generate(&doc, seed) {
            Ok(generated) => {
                match output {
                    Some(path) => {
                        if let Err(e) = write_output(&generated, &path) {
                            eprintln!("{}", e);
                            return 1;
                        }
                        println!("wrote {}", path);
                    }
                    None => print_summary(seed, &generated),
                }
                0
            }
            Err(e) => {
                eprintln!("{}", e);
                1
            }
        },
        Some((lo, hi)) => {
            let Some(dir) = output_dir else {
                eprintln!("--seeds requires --output-dir");
                return 1;
            };
            if let Err(e) = std::fs::create_dir_all(&dir) {
                eprintln!("cannot create '{}': {}", dir, e);
                return 1;
            }
            for s in lo..=hi {
                match engine.generate(&doc, s) {
                    Ok(generated) => {
                        let path = format!("{}/scenario_{:06}.ron", dir, s);
                        if let Err(e) = write_output(&generated, &path) {
                            eprintln!("{}", e);
                            return 1;
                        }
                    }
                    Err(e) => {
                        eprintln!("seed {}: {}", s, e);
                        return 1;
                    }
                }
            }
            println!("wrote {} scenarios to {}", hi - lo + 1, dir);
            0
        }
    }
}

fn print_summary(seed: u64, generated: &GenerationOutput) {
    let eco = &generated.ground_truth.ecosystem;
    println!("seed {}", seed);
    println!(
        "  ground truth: {} molecules, {} reactions, {} species, {} connections",
        eco.molecules.len(),
        eco.reactions.len(),
        eco.species.len(),
        eco.connections.len()
    );
    println!(
        "  observable:   {} molecules, {} reactions, {} regions",
        generated.scenario.molecules.len(),
        generated.scenario.reactions.len(),
        generated.scenario.regions.len()
    );
    println!(
        "  metrics:      depth {}, hidden {:.2}, discovery cost {:.1}",
        generated.metrics.reasoning_depth,
        generated.metrics.hidden_fraction,
        generated.metrics.discovery_cost
    );
}

fn run_validate(spec_path: &str, seed: u64, templates_dir: Option<String>) -> i32 {
    let engine = match build_engine(spec_path, templates_dir) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    };
    let doc = match load_spec(spec_path) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    };
    match engine.validate_spec(&doc, seed) {
        Ok(()) => {
            println!("{}: ok", spec_path);
            0
        }
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    }
}

fn run_metrics(output_path: &str) -> i32 {
    let text = match std::fs::read_to_string(output_path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("cannot read '{}': {}", output_path, e);
            return 1;
        }
    };
    let generated: GenerationOutput = match ron::from_str(&text) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("cannot parse '{}': {}", output_path, e);
            return 1;
        }
    };
    // Recompute from ground truth rather than trusting the stored copy.
    let metrics = metrics::compute(&generated.ground_truth.ecosystem, &generated.visibility);
    println!("reasoning_depth: {}", metrics.reasoning_depth);
    println!("hidden_fraction: {:.3}", metrics.hidden_fraction);
    println!("discovery_cost: {:.1}", metrics.discovery_cost);
    0
}
