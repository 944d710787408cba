//! Safety properties: an input region and a disjunctive unsafe output region.
//!
//! A property pairs a conjunctive linear system over the network input with a
//! list of conjunctive systems over the output. The property holds when no
//! input satisfying the input system maps into *any* of the output systems.

use astra_core::{AstraError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// A conjunction of linear constraints `coefs·x ≤ biases`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearConstraints {
    /// One row per constraint, one column per variable.
    pub coefs: Array2<f64>,
    /// One entry per constraint row.
    pub biases: Array1<f64>,
}

impl LinearConstraints {
    pub fn new(coefs: Array2<f64>, biases: Array1<f64>) -> Result<Self> {
        if coefs.nrows() != biases.len() {
            return Err(AstraError::DimensionMismatch {
                expected: coefs.nrows(),
                got: biases.len(),
                context: "constraint biases".to_string(),
            });
        }
        Ok(Self { coefs, biases })
    }

    /// Number of variables the system ranges over.
    pub fn dimension(&self) -> usize {
        self.coefs.ncols()
    }

    pub fn num_constraints(&self) -> usize {
        self.coefs.nrows()
    }

    /// Whether a concrete point satisfies every row.
    pub fn contains(&self, point: &Array1<f64>, tolerance: f64) -> bool {
        let lhs = self.coefs.dot(point);
        lhs.iter()
            .zip(self.biases.iter())
            .all(|(v, b)| *v <= *b + tolerance)
    }
}

/// A safety property: input region plus unsafe output disjunction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyProperty {
    /// Conjunctive constraints over the network input.
    pub input: LinearConstraints,
    /// Disjunction of conjunctive systems over the network output. Reaching
    /// any one of them violates the property.
    pub unsafe_outputs: Vec<LinearConstraints>,
}

impl SafetyProperty {
    pub fn new(input: LinearConstraints, unsafe_outputs: Vec<LinearConstraints>) -> Result<Self> {
        if unsafe_outputs.is_empty() {
            return Err(AstraError::InvalidProperty(
                "unsafe output disjunction is empty".to_string(),
            ));
        }
        let output_dim = unsafe_outputs[0].dimension();
        for (idx, disjunct) in unsafe_outputs.iter().enumerate() {
            if disjunct.dimension() != output_dim {
                return Err(AstraError::DimensionMismatch {
                    expected: output_dim,
                    got: disjunct.dimension(),
                    context: format!("output disjunct {}", idx),
                });
            }
            if disjunct.num_constraints() == 0 {
                return Err(AstraError::InvalidProperty(format!(
                    "output disjunct {} has no constraints",
                    idx
                )));
            }
        }
        Ok(Self {
            input,
            unsafe_outputs,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input.dimension()
    }

    pub fn output_dim(&self) -> usize {
        self.unsafe_outputs[0].dimension()
    }

    /// Whether a concrete output lands in the unsafe region.
    pub fn output_is_unsafe(&self, output: &Array1<f64>, tolerance: f64) -> bool {
        self.unsafe_outputs
            .iter()
            .any(|disjunct| disjunct.contains(output, tolerance))
    }
}
