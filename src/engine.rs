use std::collections::HashMap;

use log::trace;

use crate::error::GraphError;
use crate::graph::{Dimension, DynamicDimension, OperandDescriptor};
use crate::network::{Extent, LayerId, Network, ScaleMode, TensorId, to_extents};
use crate::weights::{WeightBuffer, WeightRegistry, WeightToken, Weights};

/// Rank the reference engine's per-channel scale primitive requires.
pub const CANONICAL_RANK: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub canonical_rank: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            canonical_rank: CANONICAL_RANK,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), GraphError> {
        // Channel mode scales axis 1, so anything below 2 cannot hold a channel.
        if self.canonical_rank < 2 {
            return Err(GraphError::InvalidConfig {
                reason: format!(
                    "canonical rank must be at least 2, got {}",
                    self.canonical_rank
                ),
            });
        }
        Ok(())
    }
}

/// Target engine under construction: the network, the weights it references
/// and the table of named tensors converters read from and write to.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    network: Network,
    weights: WeightRegistry,
    itensors: HashMap<String, TensorId>,
    /// Named, bounded axes of inputs declared from a model description.
    dynamic_dims: HashMap<String, Vec<(usize, DynamicDimension)>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, GraphError> {
        config.validate()?;
        Ok(Engine {
            config,
            network: Network::new(config.canonical_rank),
            weights: WeightRegistry::new(),
            itensors: HashMap::new(),
            dynamic_dims: HashMap::new(),
        })
    }

    pub fn canonical_rank(&self) -> usize {
        self.config.canonical_rank
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub fn weights(&self) -> &WeightRegistry {
        &self.weights
    }

    /// Declare a network input and bind it by name.
    pub fn declare_input(&mut self, name: &str, dims: &[Extent]) -> TensorId {
        let id = self.network.add_input(name, dims);
        self.itensors.insert(name.to_string(), id);
        id
    }

    /// Declare an input from its source descriptor. Dynamic axes become
    /// `Unknown` extents; their name and max size are kept for runtime checks.
    pub fn declare_model_input(&mut self, name: &str, descriptor: &OperandDescriptor) -> TensorId {
        let id = self.declare_input(name, &to_extents(&descriptor.shape));
        let dynamic: Vec<(usize, DynamicDimension)> = descriptor
            .shape
            .iter()
            .enumerate()
            .filter_map(|(axis, dim)| match dim {
                Dimension::Dynamic(d) => Some((axis, d.clone())),
                Dimension::Static(_) => None,
            })
            .collect();
        if !dynamic.is_empty() {
            self.dynamic_dims.insert(name.to_string(), dynamic);
        }
        id
    }

    /// Dynamic axes of input `name`, as `(axis, dimension)` pairs.
    pub fn dynamic_dims(&self, name: &str) -> &[(usize, DynamicDimension)] {
        self.dynamic_dims
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get_itensor(&self, name: &str) -> Result<TensorId, GraphError> {
        self.itensors
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownTensor {
                name: name.to_string(),
            })
    }

    pub fn set_itensor(&mut self, name: &str, tensor: TensorId) {
        self.itensors.insert(name.to_string(), tensor);
    }

    pub fn has_itensor(&self, name: &str) -> bool {
        self.itensors.contains_key(name)
    }

    /// Bind `name` to `tensor`. A persistent binding is also declared as a
    /// network output.
    pub fn bind_named_output(
        &mut self,
        name: &str,
        tensor: TensorId,
        persistent: bool,
    ) -> Result<(), GraphError> {
        self.network.set_tensor_name(tensor, name)?;
        self.set_itensor(name, tensor);
        if persistent {
            self.network.mark_output(tensor)?;
        }
        trace!("bound `{}` (persistent: {})", name, persistent);
        Ok(())
    }

    /// Move `buffer` into the engine. The engine owns it for its whole lifetime.
    pub fn register_weights(&mut self, key: &str, buffer: WeightBuffer) -> WeightToken {
        self.weights.register(key, buffer)
    }

    pub fn weights_for(&self, token: &WeightToken) -> Option<&[f32]> {
        self.weights.get(token)
    }

    /// Add a scale layer whose coefficients must already be registered here.
    pub fn add_scale(
        &mut self,
        input: TensorId,
        mode: ScaleMode,
        shift: Weights,
        scale: Weights,
        power: Weights,
        channel_axis: usize,
    ) -> Result<LayerId, GraphError> {
        for weights in [&shift, &scale, &power] {
            if let Weights::Registered(token) = weights {
                if !self.weights.contains(token) {
                    return Err(GraphError::build(format!(
                        "weights `{}` are not registered with this engine",
                        token.key()
                    )));
                }
            }
        }
        self.network
            .add_scale(input, mode, shift, scale, power, channel_axis)
    }

    pub fn add_shuffle(
        &mut self,
        input: TensorId,
        reshape: &[Extent],
    ) -> Result<LayerId, GraphError> {
        self.network.add_shuffle(input, reshape)
    }
}
