//! Pre-activation bounds and the oracle that produces them.
//!
//! The refinement search needs, for every ReLU layer, an interval per neuron
//! bracketing its pre-activation value over the whole input region. The
//! bounds classify each neuron as positively stable, negatively stable, or
//! unstable, which drives both the triangle relaxation and the branching
//! decisions. Bounds are computed once per run from the property's input
//! region and are not re-tightened per branch.

use crate::network::{Layer, Network};
use crate::property::LinearConstraints;
use astra_core::{AstraError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Stability classification of one neuron with respect to its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stability {
    /// Lower bound is non-negative; the ReLU acts as identity.
    PositiveStable,
    /// Upper bound is non-positive; the ReLU outputs zero.
    NegativeStable,
    /// The interval straddles zero; the neuron must be relaxed or split.
    Unstable,
}

/// Per-neuron pre-activation intervals for one ReLU layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreActivationBounds {
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

impl PreActivationBounds {
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(AstraError::DimensionMismatch {
                expected: lower.len(),
                got: upper.len(),
                context: "bounds upper".to_string(),
            });
        }
        debug_assert!(
            lower.iter().zip(upper.iter()).all(|(l, u)| l <= u),
            "pre-activation lower bounds must not exceed upper bounds"
        );
        Ok(Self { lower, upper })
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn stability(&self, neuron: usize) -> Stability {
        if self.lower[neuron] >= 0.0 {
            Stability::PositiveStable
        } else if self.upper[neuron] <= 0.0 {
            Stability::NegativeStable
        } else {
            Stability::Unstable
        }
    }

    /// Indices of neurons the bounds cannot decide.
    pub fn unstable_neurons(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| self.stability(i) == Stability::Unstable)
            .collect()
    }
}

/// Pre-activation bounds for every ReLU layer, keyed by layer identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundsMap {
    entries: HashMap<String, PreActivationBounds>,
}

impl BoundsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identifier: impl Into<String>, bounds: PreActivationBounds) {
        self.entries.insert(identifier.into(), bounds);
    }

    pub fn get(&self, identifier: &str) -> Result<&PreActivationBounds> {
        self.entries
            .get(identifier)
            .ok_or_else(|| AstraError::MissingBounds(identifier.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Source of pre-activation bounds for a verification run.
///
/// The search is parametric over this trait so tighter analyses can be
/// plugged in without touching the refinement logic.
pub trait BoundsOracle {
    fn compute(&self, network: &Network, input: &LinearConstraints) -> Result<BoundsMap>;
}

/// Interval bound propagation over the input box.
///
/// The input region must contain, for every input dimension, an upper and a
/// lower bound row with a single nonzero coefficient. General halfspace rows
/// are ignored for bound computation; they still constrain the search
/// geometrically through the star predicate.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalBoundsOracle;

impl IntervalBoundsOracle {
    /// Extract the axis-aligned bounding box from single-coefficient rows.
    fn input_box(input: &LinearConstraints, dim: usize) -> Result<(Array1<f64>, Array1<f64>)> {
        let mut lower = vec![f64::NEG_INFINITY; dim];
        let mut upper = vec![f64::INFINITY; dim];

        for (row, bias) in input.coefs.rows().into_iter().zip(input.biases.iter()) {
            let mut nonzero = row.iter().enumerate().filter(|(_, v)| **v != 0.0);
            let (idx, coef) = match (nonzero.next(), nonzero.next()) {
                (Some((idx, coef)), None) => (idx, *coef),
                _ => continue,
            };
            // coef·x_idx <= bias
            if coef > 0.0 {
                upper[idx] = upper[idx].min(bias / coef);
            } else {
                lower[idx] = lower[idx].max(bias / coef);
            }
        }

        for i in 0..dim {
            if !lower[i].is_finite() || !upper[i].is_finite() {
                return Err(AstraError::InvalidProperty(format!(
                    "input dimension {} is unbounded",
                    i
                )));
            }
            if lower[i] > upper[i] {
                return Err(AstraError::InvalidProperty(format!(
                    "input dimension {} has empty range [{}, {}]",
                    i, lower[i], upper[i]
                )));
            }
        }
        Ok((Array1::from(lower), Array1::from(upper)))
    }

    /// Interval image of `W·x + b` for `x` in `[lower, upper]`.
    fn affine_interval(
        weight: &Array2<f64>,
        bias: &Array1<f64>,
        lower: &Array1<f64>,
        upper: &Array1<f64>,
    ) -> (Array1<f64>, Array1<f64>) {
        let mut out_lower = bias.clone();
        let mut out_upper = bias.clone();
        for (i, row) in weight.rows().into_iter().enumerate() {
            for (j, w) in row.iter().enumerate() {
                if *w >= 0.0 {
                    out_lower[i] += w * lower[j];
                    out_upper[i] += w * upper[j];
                } else {
                    out_lower[i] += w * upper[j];
                    out_upper[i] += w * lower[j];
                }
            }
        }
        (out_lower, out_upper)
    }
}

impl BoundsOracle for IntervalBoundsOracle {
    fn compute(&self, network: &Network, input: &LinearConstraints) -> Result<BoundsMap> {
        let dim = network.input_dim()?;
        if input.dimension() != dim {
            return Err(AstraError::DimensionMismatch {
                expected: dim,
                got: input.dimension(),
                context: "input constraints".to_string(),
            });
        }
        let (mut lower, mut upper) = Self::input_box(input, dim)?;

        let mut map = BoundsMap::new();
        for layer in network.layers() {
            match layer {
                Layer::Linear(linear) => {
                    let (l, u) = Self::affine_interval(&linear.weight, &linear.bias, &lower, &upper);
                    lower = l;
                    upper = u;
                }
                Layer::Relu(relu) => {
                    let bounds = PreActivationBounds::new(lower.clone(), upper.clone())?;
                    debug!(
                        layer = %relu.identifier,
                        unstable = bounds.unstable_neurons().len(),
                        "computed pre-activation bounds"
                    );
                    map.insert(relu.identifier.clone(), bounds);
                    lower.mapv_inplace(|v| v.max(0.0));
                    upper.mapv_inplace(|v| v.max(0.0));
                }
            }
        }
        Ok(map)
    }
}
