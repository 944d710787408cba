//! Refinement targets and star splitting.
//!
//! The branch-and-bound search walks ReLU neurons in layer order, neuron
//! order. A star's cursors name the next undecided neuron; splitting on it
//! produces children whose cursors have advanced by one neuron. When a layer
//! is exhausted the star is pushed forward to the next activation, and a star
//! whose cursor moved past the last activation is a leaf: every ReLU on its
//! path was decided exactly, so its output star is exact.

use crate::bounds::{BoundsMap, Stability};
use crate::lp::FeasibilitySolver;
use crate::network::{Layer, Network};
use crate::propagation::linear_forward;
use crate::star::Star;
use astra_core::{AstraError, Result};
use ndarray::Array1;
use tracing::trace;

/// The neuron the search will branch on next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefinementTarget {
    /// Index of the activation layer in the network's layer list.
    pub layer: usize,
    /// Neuron index within that layer.
    pub neuron: usize,
}

/// Push a star forward through linear layers until the next activation.
///
/// With `skip` set, the activation at the current cursor is stepped over
/// without transforming the star; it has already been applied neuron by
/// neuron by the splits that produced this star. The flag is consumed by
/// exactly one activation boundary.
pub fn propagate_until_relu(star: &Star, network: &Network, skip: bool) -> Result<Star> {
    let mut current = star.clone();
    let mut skip = skip;
    let mut idx = current.ref_layer;
    while idx < network.len() {
        match &network.layers()[idx] {
            Layer::Linear(linear) => {
                current = linear_forward(&current, linear)?;
                idx += 1;
            }
            Layer::Relu(_) => {
                if skip {
                    skip = false;
                    idx += 1;
                } else {
                    break;
                }
            }
        }
    }
    if idx != current.ref_layer {
        current.ref_neuron = 0;
    }
    current.ref_layer = idx;
    Ok(current)
}

/// Find the next neuron to branch on, advancing the star if its current
/// activation is exhausted. Returns `None` when every activation has been
/// decided; the accompanying star is then fully propagated and exact.
pub fn next_target_sequential(
    star: &Star,
    network: &Network,
) -> Result<(Option<RefinementTarget>, Star)> {
    let mut current = star.clone();
    if matches!(
        network.layers().get(current.ref_layer),
        Some(Layer::Linear(_))
    ) {
        current = propagate_until_relu(&current, network, false)?;
    }
    if current.ref_layer >= network.len() {
        return Ok((None, current));
    }
    if current.ref_neuron < current.dim() {
        let target = RefinementTarget {
            layer: current.ref_layer,
            neuron: current.ref_neuron,
        };
        return Ok((Some(target), current));
    }
    // This activation is exhausted; step over it to the next one.
    current = propagate_until_relu(&current, network, true)?;
    if current.ref_layer >= network.len() {
        return Ok((None, current));
    }
    let target = RefinementTarget {
        layer: current.ref_layer,
        neuron: current.ref_neuron,
    };
    Ok((Some(target), current))
}

fn inactive_child(star: &Star, neuron: usize, constrain: bool) -> Star {
    let row = star.basis.row(neuron).to_owned();
    let offset = star.center[neuron];

    let mut child = if constrain {
        // x_neuron <= 0 over the predicate variables.
        star.with_constraint(&row, -offset)
    } else {
        star.clone()
    };
    child.center[neuron] = 0.0;
    child.basis.row_mut(neuron).fill(0.0);
    child.ref_neuron = neuron + 1;
    child
}

fn active_child(star: &Star, neuron: usize, constrain: bool) -> Star {
    let mut child = if constrain {
        // x_neuron >= 0 over the predicate variables.
        let row: Array1<f64> = star.basis.row(neuron).mapv(|v| -v);
        star.with_constraint(&row, star.center[neuron])
    } else {
        star.clone()
    };
    child.ref_neuron = neuron + 1;
    child
}

/// Split a star on one ReLU neuron.
///
/// Stable neurons yield a single child with the activation applied exactly.
/// Unstable neurons yield up to two children, one per activation phase, each
/// carrying the halfspace constraint of its phase; children whose predicate
/// became infeasible are dropped.
pub fn split_on_target(
    star: &Star,
    target: RefinementTarget,
    network: &Network,
    bounds: &BoundsMap,
    solver: &FeasibilitySolver,
) -> Result<Vec<Star>> {
    let identifier = match network.layers().get(target.layer) {
        Some(Layer::Relu(relu)) => &relu.identifier,
        _ => {
            return Err(AstraError::UnsupportedTopology(format!(
                "refinement target layer {} is not an activation",
                target.layer
            )))
        }
    };
    let layer_bounds = bounds.get(identifier)?;
    if target.neuron >= star.dim() {
        return Err(AstraError::DimensionMismatch {
            expected: star.dim(),
            got: target.neuron,
            context: "refinement target neuron".to_string(),
        });
    }

    match layer_bounds.stability(target.neuron) {
        Stability::PositiveStable => Ok(vec![active_child(star, target.neuron, false)]),
        Stability::NegativeStable => Ok(vec![inactive_child(star, target.neuron, false)]),
        Stability::Unstable => {
            let mut children = Vec::with_capacity(2);
            for child in [
                inactive_child(star, target.neuron, true),
                active_child(star, target.neuron, true),
            ] {
                if !child.is_empty(solver)? {
                    children.push(child);
                }
            }
            trace!(
                layer = target.layer,
                neuron = target.neuron,
                children = children.len(),
                "split unstable neuron"
            );
            Ok(children)
        }
    }
}
