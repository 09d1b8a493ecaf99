//! Bioforge — procedural synthesis of alien biochemistry scenarios.
//!
//! Expands declarative scenario specs (templates, distributions,
//! interaction rules) under a master seed into a concrete ecosystem,
//! then projects it through a visibility mapping into an agent-facing
//! scenario plus hidden ground truth. Same spec, same seed, same
//! scenario — always.

pub mod core;
pub mod schema;
