//! Star sets: affine images of polytopes.
//!
//! A star represents `{ c + B·α : P·α ≤ d }`: a center vector, a basis of
//! generator directions, and a predicate system over the free variables `α`.
//! It is the unit of abstract state for the whole engine: exact under affine
//! maps, closed under halfspace intersection, and testable for emptiness via
//! one LP feasibility query.
//!
//! Stars are immutable after construction. The two cursor fields record how
//! far a star has been pushed through the network: `ref_layer` is the next
//! unprocessed layer, `ref_neuron` the next neuron of that layer awaiting a
//! branch decision. Every propagation or split builds a fresh star with
//! cursors at least as large as its parent's.

use crate::lp::{Feasibility, FeasibilitySolver};
use crate::property::LinearConstraints;
use astra_core::{AstraError, Result};
use ndarray::{Array1, Array2, Axis};

#[derive(Debug, Clone)]
pub struct Star {
    /// Center vector; its dimension is the width of the reference layer.
    pub center: Array1<f64>,
    /// Basis matrix, one row per output dimension, one column per predicate
    /// variable.
    pub basis: Array2<f64>,
    /// Predicate coefficient matrix, one column per predicate variable.
    pub predicate: Array2<f64>,
    /// Predicate right-hand side, one entry per predicate row.
    pub predicate_bias: Array1<f64>,
    /// Index of the next layer not yet processed.
    pub ref_layer: usize,
    /// Index of the next neuron within `ref_layer` awaiting a decision.
    pub ref_neuron: usize,
}

impl Star {
    /// Build a star with explicit geometry and cursors at the origin.
    pub fn new(
        center: Array1<f64>,
        basis: Array2<f64>,
        predicate: Array2<f64>,
        predicate_bias: Array1<f64>,
    ) -> Result<Self> {
        if basis.nrows() != center.len() {
            return Err(AstraError::DimensionMismatch {
                expected: center.len(),
                got: basis.nrows(),
                context: "basis rows".to_string(),
            });
        }
        if predicate.ncols() != basis.ncols() {
            return Err(AstraError::DimensionMismatch {
                expected: basis.ncols(),
                got: predicate.ncols(),
                context: "predicate columns".to_string(),
            });
        }
        if predicate.nrows() != predicate_bias.len() {
            return Err(AstraError::DimensionMismatch {
                expected: predicate.nrows(),
                got: predicate_bias.len(),
                context: "predicate bias".to_string(),
            });
        }
        Ok(Self {
            center,
            basis,
            predicate,
            predicate_bias,
            ref_layer: 0,
            ref_neuron: 0,
        })
    }

    /// Build the root star of a search from an input constraint system:
    /// zero center, identity basis, and the system itself as predicate.
    /// Every point of the input region is its own `α`.
    pub fn from_constraints(constraints: &LinearConstraints) -> Self {
        let dim = constraints.dimension();
        Self {
            center: Array1::zeros(dim),
            basis: Array2::eye(dim),
            predicate: constraints.coefs.clone(),
            predicate_bias: constraints.biases.clone(),
            ref_layer: 0,
            ref_neuron: 0,
        }
    }

    /// Output dimension at the star's reference layer.
    pub fn dim(&self) -> usize {
        self.center.len()
    }

    /// Number of free predicate variables.
    pub fn num_vars(&self) -> usize {
        self.basis.ncols()
    }

    pub fn num_constraints(&self) -> usize {
        self.predicate.nrows()
    }

    /// Exact affine push-forward: `center' = W·c + b`, `basis' = W·B`.
    /// The predicate system and cursors are untouched.
    pub fn affine_map(&self, weight: &Array2<f64>, bias: &Array1<f64>) -> Result<Star> {
        if weight.ncols() != self.dim() {
            return Err(AstraError::DimensionMismatch {
                expected: self.dim(),
                got: weight.ncols(),
                context: "affine map input".to_string(),
            });
        }
        Ok(Star {
            center: weight.dot(&self.center) + bias,
            basis: weight.dot(&self.basis),
            predicate: self.predicate.clone(),
            predicate_bias: self.predicate_bias.clone(),
            ref_layer: self.ref_layer,
            ref_neuron: self.ref_neuron,
        })
    }

    /// Append a single predicate row `row·α ≤ bias`.
    pub fn with_constraint(&self, row: &Array1<f64>, bias: f64) -> Star {
        let mut predicate = Array2::zeros((self.predicate.nrows() + 1, self.num_vars()));
        predicate
            .slice_mut(ndarray::s![..self.predicate.nrows(), ..])
            .assign(&self.predicate);
        predicate.row_mut(self.predicate.nrows()).assign(row);

        let mut predicate_bias = Array1::zeros(self.predicate_bias.len() + 1);
        predicate_bias
            .slice_mut(ndarray::s![..self.predicate_bias.len()])
            .assign(&self.predicate_bias);
        predicate_bias[self.predicate_bias.len()] = bias;

        Star {
            center: self.center.clone(),
            basis: self.basis.clone(),
            predicate,
            predicate_bias,
            ref_layer: self.ref_layer,
            ref_neuron: self.ref_neuron,
        }
    }

    /// Intersect the star with a halfspace system over its *output*
    /// coordinates: `coefs·x ≤ biases` with `x = c + B·α` becomes
    /// `(coefs·B)·α ≤ biases − coefs·c` appended to the predicate.
    pub fn intersect_halfspaces(&self, system: &LinearConstraints) -> Result<Star> {
        if system.dimension() != self.dim() {
            return Err(AstraError::DimensionMismatch {
                expected: self.dim(),
                got: system.dimension(),
                context: "halfspace intersection".to_string(),
            });
        }
        let new_rows = system.coefs.dot(&self.basis);
        let new_bias = &system.biases - &system.coefs.dot(&self.center);

        let predicate = ndarray::concatenate(
            Axis(0),
            &[self.predicate.view(), new_rows.view()],
        )
        .expect("predicate column counts match");
        let predicate_bias = ndarray::concatenate(
            Axis(0),
            &[self.predicate_bias.view(), new_bias.view()],
        )
        .expect("bias lengths are one-dimensional");

        Ok(Star {
            center: self.center.clone(),
            basis: self.basis.clone(),
            predicate,
            predicate_bias,
            ref_layer: self.ref_layer,
            ref_neuron: self.ref_neuron,
        })
    }

    /// Test whether the predicate polytope is empty. Feasible means the star
    /// contains at least one point.
    pub fn is_empty(&self, solver: &FeasibilitySolver) -> Result<bool> {
        Ok(!solver
            .solve(&self.predicate, &self.predicate_bias)?
            .is_feasible())
    }

    /// Sample one point of the star: a feasible `α` mapped through the
    /// generator set. Returns `None` for an empty star.
    pub fn sample(&self, solver: &FeasibilitySolver) -> Result<Option<Array1<f64>>> {
        match solver.solve(&self.predicate, &self.predicate_bias)? {
            Feasibility::Feasible(alpha) => Ok(Some(&self.center + &self.basis.dot(&alpha))),
            Feasibility::Infeasible => Ok(None),
        }
    }

    /// Sample a feasible predicate assignment `α` without mapping it through
    /// the basis. Used by counterexample extraction, where the predicate
    /// variables of the anchored star *are* the input coordinates.
    pub fn sample_predicate(&self, solver: &FeasibilitySolver) -> Result<Option<Array1<f64>>> {
        match solver.solve(&self.predicate, &self.predicate_bias)? {
            Feasibility::Feasible(alpha) => Ok(Some(alpha)),
            Feasibility::Infeasible => Ok(None),
        }
    }

    /// Evaluate the generator set at a concrete `α`.
    pub fn point_at(&self, alpha: &Array1<f64>) -> Array1<f64> {
        &self.center + &self.basis.dot(alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn unit_box_star() -> Star {
        // [-1, 1]^2 as a root star.
        let constraints = LinearConstraints::new(
            array![[1.0, 0.0], [-1.0, 0.0], [0.0, 1.0], [0.0, -1.0]],
            array![1.0, 1.0, 1.0, 1.0],
        )
        .unwrap();
        Star::from_constraints(&constraints)
    }

    #[test]
    fn root_star_has_identity_geometry() {
        let star = unit_box_star();
        assert_eq!(star.dim(), 2);
        assert_eq!(star.num_vars(), 2);
        assert_eq!(star.num_constraints(), 4);
        assert_eq!(star.ref_layer, 0);
        assert_eq!(star.ref_neuron, 0);
        let alpha = array![0.3, -0.7];
        assert_eq!(star.point_at(&alpha), alpha);
    }

    #[test]
    fn affine_map_is_exact() {
        let star = unit_box_star();
        let weight = array![[2.0, 1.0], [0.0, -1.0]];
        let bias = array![0.5, -0.5];
        let mapped = star.affine_map(&weight, &bias).unwrap();

        // For any alpha, mapped point must equal W·(c + B·alpha) + b.
        for alpha in [array![0.0, 0.0], array![1.0, -1.0], array![0.25, 0.75]] {
            let direct = weight.dot(&star.point_at(&alpha)) + &bias;
            let through = mapped.point_at(&alpha);
            for i in 0..2 {
                assert!((direct[i] - through[i]).abs() < 1e-12);
            }
        }
        // Predicate untouched.
        assert_eq!(mapped.num_constraints(), star.num_constraints());
    }

    #[test]
    fn affine_map_dimension_check() {
        let star = unit_box_star();
        let weight = array![[1.0, 0.0, 0.0]];
        let bias = array![0.0];
        assert!(star.affine_map(&weight, &bias).is_err());
    }

    #[test]
    fn constraint_append_grows_predicate_by_one() {
        let star = unit_box_star();
        let cut = star.with_constraint(&array![1.0, 1.0], 0.0);
        assert_eq!(cut.num_constraints(), star.num_constraints() + 1);
        assert_eq!(cut.num_vars(), star.num_vars());
    }

    #[test]
    fn emptiness_after_contradictory_cut() {
        let solver = FeasibilitySolver::default();
        let star = unit_box_star();
        assert!(!star.is_empty(&solver).unwrap());

        // alpha_0 >= 2 contradicts alpha_0 <= 1.
        let empty = star.with_constraint(&array![-1.0, 0.0], -2.0);
        assert!(empty.is_empty(&solver).unwrap());
    }

    #[test]
    fn emptiness_is_idempotent() {
        let solver = FeasibilitySolver::default();
        let star = unit_box_star().with_constraint(&array![1.0, 1.0], -0.5);
        let first = star.is_empty(&solver).unwrap();
        for _ in 0..4 {
            assert_eq!(star.is_empty(&solver).unwrap(), first);
        }
    }

    #[test]
    fn halfspace_intersection_maps_through_basis() {
        let star = unit_box_star();
        let weight = array![[1.0, 1.0]];
        let bias = array![1.0];
        let mapped = star.affine_map(&weight, &bias).unwrap();

        // Output x = alpha_0 + alpha_1 + 1, constrain x <= 0, i.e. the
        // corner region alpha_0 + alpha_1 <= -1.
        let system = LinearConstraints::new(array![[1.0]], array![0.0]).unwrap();
        let cut = mapped.intersect_halfspaces(&system).unwrap();
        assert_eq!(cut.num_constraints(), 5);

        let solver = FeasibilitySolver::default();
        assert!(!cut.is_empty(&solver).unwrap());
        let point = cut.sample_predicate(&solver).unwrap().unwrap();
        assert!(point[0] + point[1] <= -1.0 + 1e-6);

        // Constrain x <= -3: unreachable from the box.
        let system = LinearConstraints::new(array![[1.0]], array![-3.0]).unwrap();
        let cut = mapped.intersect_halfspaces(&system).unwrap();
        assert!(cut.is_empty(&solver).unwrap());
    }

    #[test]
    fn sample_lies_inside_the_star() {
        let solver = FeasibilitySolver::default();
        let star = unit_box_star();
        let point = star.sample(&solver).unwrap().unwrap();
        assert!(point[0] >= -1.0 - 1e-6 && point[0] <= 1.0 + 1e-6);
        assert!(point[1] >= -1.0 - 1e-6 && point[1] <= 1.0 + 1e-6);

        let empty = star.with_constraint(&array![-1.0, 0.0], -2.0);
        assert!(empty.sample(&solver).unwrap().is_none());
    }
}
