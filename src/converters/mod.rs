//! Operator converters and the registry that dispatches to them.

pub mod batch_norm;

use std::collections::HashMap;

use log::debug;

use crate::engine::Engine;
use crate::error::GraphError;
use crate::graph::{ModelDesc, OpDesc};
use crate::scope::VariableStore;
use crate::staging::TensorCopy;

pub use batch_norm::BatchNormConverter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Single-operator test builds: outputs are bound by name but not declared
    /// as network outputs.
    pub test_mode: bool,
}

/// Everything a converter may touch while lowering one operator.
pub struct ConversionContext<'a> {
    pub scope: &'a dyn VariableStore,
    pub copier: &'a dyn TensorCopy,
    pub engine: &'a mut Engine,
    pub test_mode: bool,
}

pub trait OpConverter {
    /// Source operator type this converter handles.
    fn op_type(&self) -> &'static str;

    fn convert(&self, ctx: &mut ConversionContext<'_>, op: &OpDesc) -> Result<(), GraphError>;
}

pub struct ConverterRegistry {
    converters: HashMap<&'static str, Box<dyn OpConverter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        ConverterRegistry {
            converters: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(BatchNormConverter));
        registry
    }

    pub fn register(&mut self, converter: Box<dyn OpConverter>) {
        self.converters.insert(converter.op_type(), converter);
    }

    pub fn get(&self, op_type: &str) -> Option<&dyn OpConverter> {
        self.converters.get(op_type).map(|c| c.as_ref())
    }

    /// Lower one operator. Failures are wrapped with the operator's identity.
    pub fn convert_op(
        &self,
        ctx: &mut ConversionContext<'_>,
        op: &OpDesc,
    ) -> Result<(), GraphError> {
        let converter = self
            .get(&op.op_type)
            .ok_or_else(|| GraphError::UnsupportedOperation {
                op_type: op.op_type.clone(),
            })?;
        converter
            .convert(ctx, op)
            .map_err(|err| err.with_operator(&op.op_type, &op.display_name()))
    }

    /// Declare the model inputs, lower every operator in order and check that
    /// each declared model output ended up bound.
    pub fn convert_model(
        &self,
        model: &ModelDesc,
        scope: &dyn VariableStore,
        copier: &dyn TensorCopy,
        engine: &mut Engine,
        options: ConvertOptions,
    ) -> Result<(), GraphError> {
        for (name, descriptor) in &model.inputs {
            engine.declare_model_input(name, descriptor);
        }

        let mut ctx = ConversionContext {
            scope,
            copier,
            engine,
            test_mode: options.test_mode,
        };
        for op in &model.operations {
            debug!("converting `{}` -> {}", op.op_type, op.display_name());
            self.convert_op(&mut ctx, op)?;
        }

        for name in &model.outputs {
            ctx.engine.get_itensor(name)?;
        }
        Ok(())
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::graph::{DataType, OperandDescriptor, to_dimension_vector};
    use crate::scope::Scope;
    use crate::staging::SyncCopier;

    #[test]
    fn test_defaults_include_batch_norm() {
        let registry = ConverterRegistry::with_defaults();
        assert!(registry.get("batch_norm").is_some());
        assert!(registry.get("conv2d").is_none());
    }

    #[test]
    fn test_unsupported_operation() {
        let mut model = ModelDesc::default();
        model.inputs.insert(
            "x".to_string(),
            OperandDescriptor {
                data_type: DataType::Float32,
                shape: to_dimension_vector(&[1, 3]),
            },
        );
        model
            .operations
            .push(OpDesc::new("conv2d").with_input("Input", "x").with_output("Output", "y"));

        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let err = ConverterRegistry::with_defaults()
            .convert_model(
                &model,
                &Scope::new(),
                &SyncCopier::host_only(),
                &mut engine,
                ConvertOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::UnsupportedOperation { ref op_type } if op_type == "conv2d"));
    }

    #[test]
    fn test_unbound_model_output() {
        let mut model = ModelDesc::default();
        model.outputs.push("missing".to_string());
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let err = ConverterRegistry::with_defaults()
            .convert_model(
                &model,
                &Scope::new(),
                &SyncCopier::host_only(),
                &mut engine,
                ConvertOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownTensor { .. }));
    }
}
