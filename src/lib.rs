pub mod converters;
pub mod engine;
pub mod error;
pub mod executors;
pub mod fusion;
pub mod graph;
pub mod loader;
pub mod naming;
pub mod network;
pub mod rank;
pub mod runtime_checks;
pub mod scope;
pub mod staging;
pub mod weights;

pub use converters::{
    BatchNormConverter, ConversionContext, ConvertOptions, ConverterRegistry, OpConverter,
};
pub use engine::{CANONICAL_RANK, Engine, EngineConfig};
pub use error::GraphError;
pub use executors::host::{HostInput, HostOutput, run_network, run_network_named};
pub use graph::{
    DataType, Dimension, DynamicDimension, ModelDesc, OpDesc, OperandDescriptor, Place,
    VariableDesc,
};
pub use loader::load_model_from_path;
pub use network::{Extent, LayerId, Network, ScaleMode, TensorId};
pub use scope::{ParameterTensor, Scope, Variable, VariableStore};
pub use staging::{HostTensor, SyncCopier, TensorCopy};
pub use weights::{WeightBuffer, WeightRegistry, WeightToken, Weights};
