//! Core types for star-set neural network verification.
//!
//! This crate provides the shared vocabulary between the verification engine
//! and its consumers: the verdict of a run, the statistics attached to it,
//! and the error taxonomy. It deliberately contains no geometry and no
//! search logic; those live in `astra-verify`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Verdict of a verification run.
///
/// `Verified` means every star produced by the search was proven disjoint
/// from the unsafe output region. `Falsified` carries a concrete input
/// inside the property's input region whose forward execution lands in the
/// unsafe region. `Unknown` is returned when a resource budget ran out or
/// an LP failure left at least one branch undecided; an undecided branch
/// is never counted as safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Verdict {
    /// The property holds for every input in the region.
    Verified,
    /// The property is violated.
    Falsified {
        /// Concrete input satisfying the property's input constraints.
        counterexample: Vec<f64>,
        /// Network output at the counterexample.
        output: Vec<f64>,
    },
    /// The search could not decide the property.
    Unknown {
        /// Why the run was inconclusive.
        reason: String,
    },
}

impl Verdict {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verdict::Verified)
    }

    pub fn is_falsified(&self) -> bool {
        matches!(self, Verdict::Falsified { .. })
    }
}

/// Outcome of a verification run: the verdict plus search statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub verdict: Verdict,
    /// Number of stars pulled from the worklist.
    pub stars_explored: usize,
    /// Deepest refinement cursor reached, as (layer, neuron).
    pub max_depth_reached: (usize, usize),
    /// Branches whose safety check failed inside the LP solver.
    pub unknown_branches: usize,
    /// Wall-clock time of the whole run.
    pub time_elapsed: Duration,
}

/// Error types for verification runs.
///
/// Structural errors (`UnsupportedTopology`, `MissingBounds`,
/// `InvalidProperty`, `DimensionMismatch`) abort a run. `LpFailure` is
/// caught per branch by the search driver and degrades that branch's
/// contribution to an unknown verdict.
#[derive(Debug)]
pub enum AstraError {
    /// The network shape is outside the supported sequential FC/ReLU form.
    UnsupportedTopology(String),

    /// The bounds map has no entry for a layer the search needs.
    MissingBounds(String),

    /// The property is malformed (empty disjunction, unbounded input box, ...).
    InvalidProperty(String),

    /// The LP feasibility solver could not decide a system.
    LpFailure(String),

    DimensionMismatch {
        expected: usize,
        got: usize,
        context: String,
    },
}

impl std::fmt::Display for AstraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AstraError::UnsupportedTopology(s) => write!(f, "Unsupported topology: {}", s),
            AstraError::MissingBounds(id) => {
                write!(f, "Bounds map has no entry for layer '{}'", id)
            }
            AstraError::InvalidProperty(s) => write!(f, "Invalid property: {}", s),
            AstraError::LpFailure(s) => write!(f, "LP solver failure: {}", s),
            AstraError::DimensionMismatch {
                expected,
                got,
                context,
            } => write!(
                f,
                "Dimension mismatch in {}: expected {}, got {}",
                context, expected, got
            ),
        }
    }
}

impl std::error::Error for AstraError {}

pub type Result<T> = std::result::Result<T, AstraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_predicates() {
        assert!(Verdict::Verified.is_verified());
        assert!(!Verdict::Verified.is_falsified());

        let falsified = Verdict::Falsified {
            counterexample: vec![0.5, -0.5],
            output: vec![1.2],
        };
        assert!(falsified.is_falsified());
        assert!(!falsified.is_verified());

        let unknown = Verdict::Unknown {
            reason: "budget exhausted".to_string(),
        };
        assert!(!unknown.is_verified());
        assert!(!unknown.is_falsified());
    }

    #[test]
    fn verdict_serialization_round_trip() {
        let verdict = Verdict::Falsified {
            counterexample: vec![0.25],
            output: vec![-1.0],
        };
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(json.contains("Falsified"));
        let back: Verdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, verdict);
    }

    #[test]
    fn outcome_serialization() {
        let outcome = VerificationOutcome {
            verdict: Verdict::Verified,
            stars_explored: 17,
            max_depth_reached: (3, 1),
            unknown_branches: 0,
            time_elapsed: Duration::from_millis(42),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("stars_explored"));
        let back: VerificationOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stars_explored, 17);
        assert_eq!(back.max_depth_reached, (3, 1));
    }

    #[test]
    fn error_display() {
        let err = AstraError::MissingBounds("relu_1".to_string());
        assert!(format!("{}", err).contains("relu_1"));

        let err = AstraError::DimensionMismatch {
            expected: 4,
            got: 3,
            context: "basis rows".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("basis rows"));
        assert!(msg.contains("expected 4"));

        let err = AstraError::LpFailure("pivot budget exhausted".to_string());
        assert!(format!("{}", err).contains("pivot budget"));
    }
}
