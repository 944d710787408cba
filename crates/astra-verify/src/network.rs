//! Sequential FC/ReLU network model.
//!
//! The engine verifies networks of the shape `Linear (ReLU Linear)* [ReLU]`:
//! an alternating sequence of fully connected layers and element-wise ReLU
//! activations. `Network::validate` rejects anything else up front so the
//! search never has to reason about partial support.

use astra_core::{AstraError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// A fully connected layer computing `W·x + b`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearLayer {
    pub weight: Array2<f64>,
    pub bias: Array1<f64>,
}

impl LinearLayer {
    pub fn new(weight: Array2<f64>, bias: Array1<f64>) -> Result<Self> {
        if weight.nrows() != bias.len() {
            return Err(AstraError::DimensionMismatch {
                expected: weight.nrows(),
                got: bias.len(),
                context: "linear layer bias".to_string(),
            });
        }
        Ok(Self { weight, bias })
    }

    pub fn input_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.nrows()
    }
}

/// An element-wise ReLU activation. The identifier keys the pre-activation
/// bounds map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReluLayer {
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Layer {
    Linear(LinearLayer),
    Relu(ReluLayer),
}

impl Layer {
    pub fn is_relu(&self) -> bool {
        matches!(self, Layer::Relu(_))
    }
}

/// A sequential network as an ordered list of layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    layers: Vec<Layer>,
}

impl Network {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn add_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Input dimension, taken from the first linear layer.
    pub fn input_dim(&self) -> Result<usize> {
        match self.layers.first() {
            Some(Layer::Linear(linear)) => Ok(linear.input_dim()),
            _ => Err(AstraError::UnsupportedTopology(
                "network must start with a linear layer".to_string(),
            )),
        }
    }

    /// Output dimension, taken from the last linear layer.
    pub fn output_dim(&self) -> Result<usize> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| match layer {
                Layer::Linear(linear) => Some(linear.output_dim()),
                Layer::Relu(_) => None,
            })
            .ok_or_else(|| {
                AstraError::UnsupportedTopology("network has no linear layer".to_string())
            })
    }

    /// Index of the last ReLU layer, if any. The refinement cursor of a leaf
    /// star points one past this layer.
    pub fn last_relu_index(&self) -> Option<usize> {
        self.layers.iter().rposition(Layer::is_relu)
    }

    /// Check the alternating FC/ReLU shape and the dimension chain between
    /// consecutive linear layers.
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(AstraError::UnsupportedTopology(
                "network has no layers".to_string(),
            ));
        }
        let mut current_dim: Option<usize> = None;
        let mut prev_was_relu = true;
        for (idx, layer) in self.layers.iter().enumerate() {
            match layer {
                Layer::Linear(linear) => {
                    if let Some(dim) = current_dim {
                        if linear.input_dim() != dim {
                            return Err(AstraError::DimensionMismatch {
                                expected: dim,
                                got: linear.input_dim(),
                                context: format!("layer {} input", idx),
                            });
                        }
                    }
                    current_dim = Some(linear.output_dim());
                    prev_was_relu = false;
                }
                Layer::Relu(relu) => {
                    if prev_was_relu {
                        return Err(AstraError::UnsupportedTopology(format!(
                            "activation '{}' at index {} does not follow a linear layer",
                            relu.identifier, idx
                        )));
                    }
                    prev_was_relu = true;
                }
            }
        }
        Ok(())
    }

    /// Concrete forward execution. Used only to report the output attached
    /// to a counterexample, never to decide a verdict.
    pub fn execute(&self, input: &Array1<f64>) -> Result<Array1<f64>> {
        let expected = self.input_dim()?;
        if input.len() != expected {
            return Err(AstraError::DimensionMismatch {
                expected,
                got: input.len(),
                context: "execution input".to_string(),
            });
        }
        let mut current = input.clone();
        for layer in &self.layers {
            current = match layer {
                Layer::Linear(linear) => linear.weight.dot(&current) + &linear.bias,
                Layer::Relu(_) => current.mapv(|v| v.max(0.0)),
            };
        }
        Ok(current)
    }
}
