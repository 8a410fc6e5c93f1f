//! In-memory target network: a tensor table plus an ordered list of layers.
//!
//! Only the two layer kinds batch-norm lowering needs are modelled: `Scale`
//! (`out = (in * scale + shift) ^ power`) and `Shuffle` (reshape without data
//! movement).

use std::fmt;

use crate::error::GraphError;
use crate::graph::Dimension;
use crate::weights::Weights;

/// One extent of a tensor's dims. `Unknown` is a runtime-sized axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extent {
    Known(u32),
    Unknown,
}

impl Extent {
    pub fn known(self) -> Option<u32> {
        match self {
            Extent::Known(v) => Some(v),
            Extent::Unknown => None,
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extent::Known(v) => write!(f, "{}", v),
            Extent::Unknown => write!(f, "?"),
        }
    }
}

/// Source dims to engine extents. Dynamic dimensions become `Unknown`.
pub fn to_extents(shape: &[Dimension]) -> Vec<Extent> {
    shape
        .iter()
        .map(|dim| match dim {
            Dimension::Static(v) => Extent::Known(*v),
            Dimension::Dynamic(_) => Extent::Unknown,
        })
        .collect()
}

pub fn dims_to_string(dims: &[Extent]) -> String {
    let parts: Vec<String> = dims.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

/// Product of all extents, or `None` if any extent is unknown.
pub fn known_volume(dims: &[Extent]) -> Option<u64> {
    dims.iter()
        .try_fold(1u64, |acc, d| d.known().and_then(|v| acc.checked_mul(v as u64)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(usize);

impl TensorId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl LayerId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// How many coefficients a scale layer applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    /// One coefficient for the whole tensor.
    Uniform,
    /// One coefficient per index of the channel axis.
    Channel,
    /// One coefficient per element from the channel axis onwards.
    Elementwise,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Scale {
        mode: ScaleMode,
        shift: Weights,
        scale: Weights,
        power: Weights,
        channel_axis: usize,
    },
    Shuffle {
        reshape: Vec<Extent>,
    },
}

impl LayerKind {
    fn short_name(&self) -> &'static str {
        match self {
            LayerKind::Scale { .. } => "Scale",
            LayerKind::Shuffle { .. } => "Shuffle",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Layer {
    name: String,
    kind: LayerKind,
    input: TensorId,
    output: TensorId,
}

impl Layer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    pub fn input(&self) -> TensorId {
        self.input
    }

    pub fn output(&self) -> TensorId {
        self.output
    }
}

#[derive(Debug, Clone)]
struct TensorEntry {
    name: String,
    dims: Vec<Extent>,
}

#[derive(Debug, Clone)]
pub struct Network {
    min_scale_rank: usize,
    tensors: Vec<TensorEntry>,
    layers: Vec<Layer>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
}

impl Network {
    /// `min_scale_rank` is the smallest input rank a `Scale` layer accepts.
    pub fn new(min_scale_rank: usize) -> Self {
        Network {
            min_scale_rank,
            tensors: Vec::new(),
            layers: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn add_input(&mut self, name: &str, dims: &[Extent]) -> TensorId {
        let id = self.push_tensor(name.to_string(), dims.to_vec());
        self.inputs.push(id);
        id
    }

    pub fn add_scale(
        &mut self,
        input: TensorId,
        mode: ScaleMode,
        shift: Weights,
        scale: Weights,
        power: Weights,
        channel_axis: usize,
    ) -> Result<LayerId, GraphError> {
        let dims = self.tensor_dims(input)?.to_vec();
        let rank = dims.len();
        if rank < self.min_scale_rank {
            return Err(GraphError::build(format!(
                "scale layer requires rank >= {}, input {} has rank {}",
                self.min_scale_rank,
                dims_to_string(&dims),
                rank
            )));
        }
        if mode != ScaleMode::Uniform && channel_axis >= rank {
            return Err(GraphError::build(format!(
                "channel axis {} out of range for rank {}",
                channel_axis, rank
            )));
        }

        let expected = match mode {
            ScaleMode::Uniform => Some(1u64),
            ScaleMode::Channel => dims[channel_axis].known().map(u64::from),
            ScaleMode::Elementwise => known_volume(&dims[channel_axis..]),
        };
        for (term, weights) in [("shift", &shift), ("scale", &scale), ("power", &power)] {
            let count = weights.count() as u64;
            if count == 0 {
                continue;
            }
            if let Some(expected) = expected {
                if count != expected {
                    return Err(GraphError::build(format!(
                        "{:?} scale expects {} {} coefficients for input {}, got {}",
                        mode,
                        expected,
                        term,
                        dims_to_string(&dims),
                        count
                    )));
                }
            }
        }
        let counts: Vec<usize> = [&shift, &scale, &power]
            .iter()
            .map(|w| w.count())
            .filter(|&c| c > 0)
            .collect();
        if counts.windows(2).any(|w| w[0] != w[1]) {
            return Err(GraphError::build(format!(
                "scale coefficient counts disagree: {:?}",
                counts
            )));
        }

        Ok(self.push_layer(
            LayerKind::Scale {
                mode,
                shift,
                scale,
                power,
                channel_axis,
            },
            input,
            dims,
        ))
    }

    /// Reshape `input` to `reshape`. An `Unknown` target extent copies the
    /// input's extent on the same axis.
    pub fn add_shuffle(
        &mut self,
        input: TensorId,
        reshape: &[Extent],
    ) -> Result<LayerId, GraphError> {
        let in_dims = self.tensor_dims(input)?.to_vec();
        let mut out_dims = Vec::with_capacity(reshape.len());
        for (axis, extent) in reshape.iter().enumerate() {
            match extent {
                Extent::Known(_) => out_dims.push(*extent),
                Extent::Unknown => {
                    let copied = in_dims.get(axis).ok_or_else(|| {
                        GraphError::build(format!(
                            "reshape {} copies axis {} which input {} does not have",
                            dims_to_string(reshape),
                            axis,
                            dims_to_string(&in_dims)
                        ))
                    })?;
                    out_dims.push(*copied);
                }
            }
        }
        if let (Some(a), Some(b)) = (known_volume(&in_dims), known_volume(&out_dims)) {
            if a != b {
                return Err(GraphError::build(format!(
                    "cannot reshape {} ({} elements) to {} ({} elements)",
                    dims_to_string(&in_dims),
                    a,
                    dims_to_string(&out_dims),
                    b
                )));
            }
        }
        Ok(self.push_layer(
            LayerKind::Shuffle {
                reshape: reshape.to_vec(),
            },
            input,
            out_dims,
        ))
    }

    pub fn layer(&self, id: LayerId) -> Result<&Layer, GraphError> {
        self.layers
            .get(id.0)
            .ok_or_else(|| GraphError::build(format!("layer #{} does not exist", id.0)))
    }

    /// Every layer here has exactly one output.
    pub fn layer_output(&self, id: LayerId, index: usize) -> Result<TensorId, GraphError> {
        let layer = self.layer(id)?;
        if index != 0 {
            return Err(GraphError::build(format!(
                "layer `{}` has no output {}",
                layer.name, index
            )));
        }
        Ok(layer.output)
    }

    pub fn set_layer_name(&mut self, id: LayerId, name: &str) -> Result<(), GraphError> {
        let layer = self
            .layers
            .get_mut(id.0)
            .ok_or_else(|| GraphError::build(format!("layer #{} does not exist", id.0)))?;
        layer.name = name.to_string();
        Ok(())
    }

    pub fn set_tensor_name(&mut self, id: TensorId, name: &str) -> Result<(), GraphError> {
        let tensor = self.entry_mut(id)?;
        tensor.name = name.to_string();
        Ok(())
    }

    pub fn tensor_name(&self, id: TensorId) -> Result<&str, GraphError> {
        Ok(&self.entry(id)?.name)
    }

    pub fn tensor_dims(&self, id: TensorId) -> Result<&[Extent], GraphError> {
        Ok(&self.entry(id)?.dims)
    }

    pub fn mark_output(&mut self, id: TensorId) -> Result<(), GraphError> {
        self.entry(id)?;
        if !self.outputs.contains(&id) {
            self.outputs.push(id);
        }
        Ok(())
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    fn entry(&self, id: TensorId) -> Result<&TensorEntry, GraphError> {
        self.tensors
            .get(id.0)
            .ok_or_else(|| GraphError::build(format!("tensor #{} does not exist", id.0)))
    }

    fn entry_mut(&mut self, id: TensorId) -> Result<&mut TensorEntry, GraphError> {
        self.tensors
            .get_mut(id.0)
            .ok_or_else(|| GraphError::build(format!("tensor #{} does not exist", id.0)))
    }

    fn push_tensor(&mut self, name: String, dims: Vec<Extent>) -> TensorId {
        self.tensors.push(TensorEntry { name, dims });
        TensorId(self.tensors.len() - 1)
    }

    fn push_layer(&mut self, kind: LayerKind, input: TensorId, out_dims: Vec<Extent>) -> LayerId {
        let index = self.layers.len();
        let default_name = format!("({} #{})", kind.short_name(), index);
        let output = self.push_tensor(format!("{}_output", default_name), out_dims);
        self.layers.push(Layer {
            name: default_name,
            kind,
            input,
            output,
        });
        LayerId(index)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in &self.inputs {
            let t = &self.tensors[id.0];
            writeln!(f, "input  {} {}", t.name, dims_to_string(&t.dims))?;
        }
        for layer in &self.layers {
            let input = &self.tensors[layer.input.0];
            let output = &self.tensors[layer.output.0];
            writeln!(
                f,
                "layer  {} [{}]: {} -> {} {}",
                layer.name,
                layer.kind.short_name(),
                input.name,
                output.name,
                dims_to_string(&output.dims)
            )?;
        }
        for id in &self.outputs {
            let t = &self.tensors[id.0];
            writeln!(f, "output {} {}", t.name, dims_to_string(&t.dims))?;
        }
        Ok(())
    }
}
