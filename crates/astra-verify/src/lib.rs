//! Star-set verification for fully connected ReLU networks.
//!
//! The engine decides safety properties by abstract interpretation over star
//! sets, refined by branch-and-bound over unstable ReLU neurons:
//!
//! * [`network`] models the sequential FC/ReLU networks being verified,
//! * [`property`] expresses input regions and disjunctive unsafe regions,
//! * [`star`] implements the star-set domain,
//! * [`bounds`] computes pre-activation intervals per activation layer,
//! * [`propagation`] pushes stars through layers with the triangle relaxation,
//! * [`refinement`] picks branching targets and splits stars,
//! * [`lp`] decides predicate feasibility,
//! * [`search`] ties everything into the verification driver.

pub mod bounds;
pub mod lp;
pub mod network;
pub mod propagation;
pub mod property;
pub mod refinement;
pub mod search;
pub mod star;

pub use bounds::{BoundsMap, BoundsOracle, IntervalBoundsOracle, PreActivationBounds, Stability};
pub use lp::{Feasibility, FeasibilitySolver};
pub use network::{Layer, LinearLayer, Network, ReluLayer};
pub use property::{LinearConstraints, SafetyProperty};
pub use refinement::RefinementTarget;
pub use search::{SearchConfig, SearchOrder, StarVerifier};
pub use star::Star;

pub use astra_core::{AstraError, Result, VerificationOutcome, Verdict};

#[cfg(test)]
mod tests;
