//! Abstract transformers pushing stars through network layers.
//!
//! Linear layers are exact on stars. ReLU layers are over-approximated with
//! the triangle relaxation: every neuron the bounds cannot decide gets a
//! fresh predicate variable constrained to the area-minimal convex hull of
//! the ReLU graph over its pre-activation interval. Splitting later replaces
//! the relaxation with the two exact branches, so the relaxation only ever
//! appears past the star's refinement cursor.

use crate::bounds::{BoundsMap, PreActivationBounds, Stability};
use crate::network::{Layer, LinearLayer, Network};
use crate::star::Star;
use astra_core::{AstraError, Result};
use ndarray::{s, Array1, Array2, Axis};

/// Exact push-forward through a fully connected layer.
pub fn linear_forward(star: &Star, layer: &LinearLayer) -> Result<Star> {
    star.affine_map(&layer.weight, &layer.bias)
}

fn with_zero_column(matrix: &Array2<f64>) -> Array2<f64> {
    let zeros = Array2::zeros((matrix.nrows(), 1));
    ndarray::concatenate(Axis(1), &[matrix.view(), zeros.view()])
        .expect("row counts match when appending a column")
}

/// Over-approximate ReLU push-forward starting at neuron `start_idx`.
///
/// Neurons below `start_idx` are assumed already resolved by earlier splits
/// and left untouched. For the rest:
///
/// * positively stable neurons pass through unchanged,
/// * negatively stable neurons are projected to zero,
/// * unstable neurons get a fresh variable `z` with the triangle constraints
///   `z ≥ 0`, `z ≥ x` and `z ≤ k·(x − lb)` where `k = ub / (ub − lb)`.
pub fn approx_relu_forward(
    star: &Star,
    bounds: &PreActivationBounds,
    start_idx: usize,
) -> Result<Star> {
    let dim = star.dim();
    if bounds.len() != dim {
        return Err(AstraError::DimensionMismatch {
            expected: dim,
            got: bounds.len(),
            context: "relu bounds".to_string(),
        });
    }

    let mut center = star.center.clone();
    let mut basis = star.basis.clone();
    let mut predicate = star.predicate.clone();
    let mut predicate_bias = star.predicate_bias.clone();

    for i in start_idx..dim {
        match bounds.stability(i) {
            Stability::PositiveStable => {}
            Stability::NegativeStable => {
                center[i] = 0.0;
                basis.row_mut(i).fill(0.0);
            }
            Stability::Unstable => {
                let lb = bounds.lower[i];
                let ub = bounds.upper[i];
                let c_i = center[i];
                let row_i = basis.row(i).to_owned();
                let vars = basis.ncols();

                basis = with_zero_column(&basis);
                predicate = with_zero_column(&predicate);

                // The neuron's output becomes the new variable.
                center[i] = 0.0;
                basis.row_mut(i).fill(0.0);
                basis[[i, vars]] = 1.0;

                // z >= 0, written as -z <= 0.
                let mut nonneg = Array1::zeros(vars + 1);
                nonneg[vars] = -1.0;

                // z >= x, written as b_i·α - z <= -c_i.
                let mut above_input = Array1::zeros(vars + 1);
                above_input.slice_mut(s![..vars]).assign(&row_i);
                above_input[vars] = -1.0;

                // z <= k·(x - lb), written as -k·b_i·α + z <= k·(c_i - lb).
                let slope = ub / (ub - lb);
                let mut below_chord = Array1::zeros(vars + 1);
                below_chord
                    .slice_mut(s![..vars])
                    .assign(&row_i.mapv(|v| -slope * v));
                below_chord[vars] = 1.0;

                let mut extended = Array2::zeros((predicate.nrows() + 3, vars + 1));
                extended
                    .slice_mut(s![..predicate.nrows(), ..])
                    .assign(&predicate);
                extended.row_mut(predicate.nrows()).assign(&nonneg);
                extended.row_mut(predicate.nrows() + 1).assign(&above_input);
                extended.row_mut(predicate.nrows() + 2).assign(&below_chord);
                predicate = extended;

                let rows = predicate_bias.len();
                let mut extended_bias = Array1::zeros(rows + 3);
                extended_bias.slice_mut(s![..rows]).assign(&predicate_bias);
                extended_bias[rows] = 0.0;
                extended_bias[rows + 1] = -c_i;
                extended_bias[rows + 2] = slope * (c_i - lb);
                predicate_bias = extended_bias;
            }
        }
    }

    let mut result = Star::new(center, basis, predicate, predicate_bias)?;
    result.ref_layer = star.ref_layer;
    result.ref_neuron = star.ref_neuron;
    Ok(result)
}

/// Propagate a star from its refinement cursor to the network output.
///
/// The ReLU at the cursor layer starts at the cursor neuron; every earlier
/// neuron of that layer was already resolved by the splits that produced
/// this star. All later ReLU layers start at neuron zero.
pub fn abs_propagation(star: &Star, network: &Network, bounds: &BoundsMap) -> Result<Star> {
    let mut current = star.clone();
    for (idx, layer) in network.layers().iter().enumerate().skip(star.ref_layer) {
        match layer {
            Layer::Linear(linear) => {
                current = linear_forward(&current, linear)?;
            }
            Layer::Relu(relu) => {
                let layer_bounds = bounds.get(&relu.identifier)?;
                let start_idx = if idx == star.ref_layer {
                    star.ref_neuron
                } else {
                    0
                };
                current = approx_relu_forward(&current, layer_bounds, start_idx)?;
            }
        }
    }
    Ok(current)
}
