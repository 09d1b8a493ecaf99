pub mod background;
pub mod bind;
pub mod containers;
pub mod distributions;
pub mod expr;
pub mod guards;
pub mod instantiate;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod resolve;
pub mod rng;
pub mod scope;
pub mod tree;
pub mod visibility;
pub mod wiring;
