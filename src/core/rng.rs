/// Deterministic child-RNG derivation.
///
/// Every RNG in the pipeline is derived from
/// `(master_seed, namespace_path, stage)` via a stable hash, never from
/// a single advancing stream. Sibling iteration order therefore cannot
/// perturb unrelated results, and independent runs with the same seed
/// reproduce exactly.
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Derive a seeded RNG for one (node, stage) pair.
pub fn derive_rng(master_seed: u64, namespace_path: &str, stage: &str) -> StdRng {
    StdRng::seed_from_u64(derive_seed(master_seed, namespace_path, stage))
}

/// The seed value behind `derive_rng`, exposed for sub-derivations.
pub fn derive_seed(master_seed: u64, namespace_path: &str, stage: &str) -> u64 {
    // FxHasher is a stable hash (unlike std's RandomState), so the
    // derivation is identical across processes and platforms.
    let mut hasher = FxHasher::default();
    master_seed.hash(&mut hasher);
    namespace_path.hash(&mut hasher);
    stage.hash(&mut hasher);
    hasher.finish()
}
