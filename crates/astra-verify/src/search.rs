//! Branch-and-bound verification driver.
//!
//! The driver maintains a worklist of stars. Each star is pushed through the
//! remaining layers with the triangle relaxation; a branch whose relaxed
//! output misses every unsafe disjunct is safe and pruned. A branch that
//! still reaches the unsafe region is split on its next undecided neuron. A
//! leaf star has no relaxation left, so a non-empty intersection there is a
//! real violation and yields a concrete counterexample.

use crate::bounds::{BoundsOracle, IntervalBoundsOracle};
use crate::lp::FeasibilitySolver;
use crate::network::Network;
use crate::propagation::abs_propagation;
use crate::property::SafetyProperty;
use crate::refinement::{next_target_sequential, propagate_until_relu, split_on_target};
use crate::star::Star;
use astra_core::{AstraError, Result, VerificationOutcome, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Worklist discipline for the refinement search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchOrder {
    /// Explore the most recently split star first.
    DepthFirst,
    /// Explore stars in the order they were produced.
    BreadthFirst,
}

fn default_order() -> SearchOrder {
    SearchOrder::DepthFirst
}

fn default_max_stars() -> usize {
    10_000
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_lp_pivot_budget() -> usize {
    50_000
}

/// Knobs for a verification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_order")]
    pub order: SearchOrder,
    /// Budget on stars pulled from the worklist before giving up.
    #[serde(default = "default_max_stars")]
    pub max_stars: usize,
    /// Wall-clock budget for the whole run.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Pivot budget per LP feasibility query.
    #[serde(default = "default_lp_pivot_budget")]
    pub lp_pivot_budget: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            order: default_order(),
            max_stars: default_max_stars(),
            timeout_secs: default_timeout_secs(),
            lp_pivot_budget: default_lp_pivot_budget(),
        }
    }
}

/// Star-set verifier over a pluggable bounds oracle.
#[derive(Debug, Clone)]
pub struct StarVerifier<O = IntervalBoundsOracle> {
    config: SearchConfig,
    oracle: O,
}

impl StarVerifier<IntervalBoundsOracle> {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            oracle: IntervalBoundsOracle,
        }
    }
}

impl Default for StarVerifier<IntervalBoundsOracle> {
    fn default() -> Self {
        Self::new(SearchConfig::default())
    }
}

impl<O: BoundsOracle> StarVerifier<O> {
    pub fn with_oracle(config: SearchConfig, oracle: O) -> Self {
        Self { config, oracle }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Decide whether `property` holds for `network`.
    ///
    /// Structural errors abort the run. LP failures inside a single branch
    /// are recorded and degrade the verdict to `Unknown` rather than
    /// aborting; an undecided branch is never treated as safe.
    pub fn verify(
        &self,
        network: &Network,
        property: &SafetyProperty,
    ) -> Result<VerificationOutcome> {
        network.validate()?;
        let input_dim = network.input_dim()?;
        if property.input_dim() != input_dim {
            return Err(AstraError::DimensionMismatch {
                expected: input_dim,
                got: property.input_dim(),
                context: "property input".to_string(),
            });
        }
        let output_dim = network.output_dim()?;
        if property.output_dim() != output_dim {
            return Err(AstraError::DimensionMismatch {
                expected: output_dim,
                got: property.output_dim(),
                context: "property output".to_string(),
            });
        }

        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let solver = FeasibilitySolver::new(self.config.lp_pivot_budget);
        let bounds = self.oracle.compute(network, &property.input)?;
        info!(
            layers = network.len(),
            disjuncts = property.unsafe_outputs.len(),
            "starting refinement search"
        );

        let root = Star::from_constraints(&property.input);
        let mut worklist = VecDeque::new();
        worklist.push_back(propagate_until_relu(&root, network, false)?);

        let mut stars_explored = 0usize;
        let mut max_depth = (0usize, 0usize);
        let mut unknown_branches = 0usize;
        let mut budget_reason: Option<String> = None;

        while let Some(star) = match self.config.order {
            SearchOrder::DepthFirst => worklist.pop_back(),
            SearchOrder::BreadthFirst => worklist.pop_front(),
        } {
            if start.elapsed() >= timeout {
                budget_reason = Some(format!("timeout after {:?}", start.elapsed()));
                break;
            }
            if stars_explored >= self.config.max_stars {
                budget_reason = Some(format!("star budget of {} exhausted", self.config.max_stars));
                break;
            }
            stars_explored += 1;
            let depth = (star.ref_layer, star.ref_neuron);
            if depth > max_depth {
                max_depth = depth;
            }

            let (target, star) = next_target_sequential(&star, network)?;
            let output_star = abs_propagation(&star, network, &bounds)?;

            let unsafe_star = match self.first_unsafe_intersection(&output_star, property, &solver)
            {
                Ok(hit) => hit,
                Err(AstraError::LpFailure(msg)) => {
                    warn!(%msg, "dropping branch after LP failure");
                    unknown_branches += 1;
                    continue;
                }
                Err(other) => return Err(other),
            };
            let Some(unsafe_star) = unsafe_star else {
                // The relaxed output misses every disjunct: branch is safe.
                continue;
            };

            match target {
                None => {
                    // Leaf stars carry no relaxation, so the intersection is
                    // exact and witnesses a genuine violation.
                    match self.extract_counterexample(&unsafe_star, network, input_dim, &solver) {
                        Ok(Some((counterexample, output))) => {
                            info!(stars_explored, "found counterexample");
                            return Ok(VerificationOutcome {
                                verdict: Verdict::Falsified {
                                    counterexample,
                                    output,
                                },
                                stars_explored,
                                max_depth_reached: max_depth,
                                unknown_branches,
                                time_elapsed: start.elapsed(),
                            });
                        }
                        Ok(None) => {
                            // The intersection was declared non-empty but no
                            // witness came back; treat the branch as undecided.
                            unknown_branches += 1;
                        }
                        Err(AstraError::LpFailure(msg)) => {
                            warn!(%msg, "dropping leaf after LP failure");
                            unknown_branches += 1;
                        }
                        Err(other) => return Err(other),
                    }
                }
                Some(target) => {
                    match split_on_target(&star, target, network, &bounds, &solver) {
                        Ok(children) => {
                            debug!(
                                layer = target.layer,
                                neuron = target.neuron,
                                children = children.len(),
                                "refining branch"
                            );
                            worklist.extend(children);
                        }
                        Err(AstraError::LpFailure(msg)) => {
                            warn!(%msg, "dropping branch after LP failure during split");
                            unknown_branches += 1;
                        }
                        Err(other) => return Err(other),
                    }
                }
            }
        }

        let verdict = if let Some(reason) = budget_reason {
            Verdict::Unknown { reason }
        } else if unknown_branches > 0 {
            Verdict::Unknown {
                reason: format!("{} branches undecided after LP failures", unknown_branches),
            }
        } else {
            Verdict::Verified
        };
        info!(?verdict, stars_explored, "search finished");
        Ok(VerificationOutcome {
            verdict,
            stars_explored,
            max_depth_reached: max_depth,
            unknown_branches,
            time_elapsed: start.elapsed(),
        })
    }

    /// Intersect the output star with each unsafe disjunct and return the
    /// first non-empty intersection.
    fn first_unsafe_intersection(
        &self,
        output_star: &Star,
        property: &SafetyProperty,
        solver: &FeasibilitySolver,
    ) -> Result<Option<Star>> {
        for disjunct in &property.unsafe_outputs {
            let intersected = output_star.intersect_halfspaces(disjunct)?;
            if !intersected.is_empty(solver)? {
                return Ok(Some(intersected));
            }
        }
        Ok(None)
    }

    /// Recover a concrete input from an unsafe leaf intersection.
    ///
    /// Leaf stars never gained predicate variables, so a feasible predicate
    /// assignment of the intersection *is* a point of the input region. The
    /// forward execution is recomputed for reporting only.
    fn extract_counterexample(
        &self,
        unsafe_star: &Star,
        network: &Network,
        input_dim: usize,
        solver: &FeasibilitySolver,
    ) -> Result<Option<(Vec<f64>, Vec<f64>)>> {
        if unsafe_star.num_vars() != input_dim {
            return Err(AstraError::DimensionMismatch {
                expected: input_dim,
                got: unsafe_star.num_vars(),
                context: "leaf predicate variables".to_string(),
            });
        }
        let Some(alpha) = unsafe_star.sample_predicate(solver)? else {
            return Ok(None);
        };
        let output = network.execute(&alpha)?;
        Ok(Some((alpha.to_vec(), output.to_vec())))
    }
}
