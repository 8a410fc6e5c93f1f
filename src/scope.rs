//! Source-side variable storage.
//!
//! A [`Scope`] owns the model's persistable parameters. Converters only ever
//! see it through [`VariableStore`], which hands out shared borrows.

use std::collections::HashMap;

use crate::error::GraphError;
use crate::graph::{DataType, ModelDesc, Place, VariableDesc};

/// Immutable parameter storage: raw little-endian bytes tagged with an element
/// type, dims and residency.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTensor {
    data_type: DataType,
    dims: Vec<usize>,
    place: Place,
    bytes: Vec<u8>,
}

impl ParameterTensor {
    pub fn new(data_type: DataType, dims: Vec<usize>, place: Place, bytes: Vec<u8>) -> Self {
        ParameterTensor {
            data_type,
            dims,
            place,
            bytes,
        }
    }

    pub fn from_f32(dims: Vec<usize>, place: Place, values: &[f32]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        ParameterTensor::new(DataType::Float32, dims, place, bytes)
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn place(&self) -> Place {
        self.place
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Element count implied by the dims. A rank-0 tensor holds one element.
    pub fn element_count(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }
}

/// A named slot in the scope. A variable may exist without holding a tensor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variable {
    tensor: Option<ParameterTensor>,
}

impl Variable {
    pub fn empty() -> Self {
        Variable::default()
    }

    pub fn tensor(&self) -> Option<&ParameterTensor> {
        self.tensor.as_ref()
    }
}

impl From<ParameterTensor> for Variable {
    fn from(tensor: ParameterTensor) -> Self {
        Variable {
            tensor: Some(tensor),
        }
    }
}

pub trait VariableStore {
    /// Returns the tensor held by `name`, or `None` when the variable is
    /// missing or empty.
    fn lookup(&self, name: &str) -> Option<&ParameterTensor>;
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: HashMap<String, Variable>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, var: impl Into<Variable>) {
        self.vars.insert(name.into(), var.into());
    }

    pub fn find_var(&self, name: &str) -> Option<&Variable> {
        self.vars.get(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn from_model(model: &ModelDesc) -> Result<Self, GraphError> {
        let mut scope = Scope::new();
        for (name, desc) in &model.parameters {
            scope.insert(name.clone(), Self::variable_from_desc(name, desc)?);
        }
        Ok(scope)
    }

    fn variable_from_desc(name: &str, desc: &VariableDesc) -> Result<Variable, GraphError> {
        let Some(bytes) = &desc.data else {
            return Ok(Variable::empty());
        };
        let dims: Vec<usize> = desc.shape.iter().map(|&d| d as usize).collect();
        let expected = dims
            .iter()
            .try_fold(desc.data_type.bytes_per_element(), |acc, &d| {
                acc.checked_mul(d)
            })
            .ok_or_else(|| GraphError::ShapeMismatch {
                name: name.to_string(),
                reason: format!("shape {:?} overflows", desc.shape),
            })?;
        if bytes.len() != expected {
            return Err(GraphError::ShapeMismatch {
                name: name.to_string(),
                reason: format!(
                    "shape {:?} requires {} bytes, got {}",
                    desc.shape,
                    expected,
                    bytes.len()
                ),
            });
        }
        Ok(ParameterTensor::new(desc.data_type, dims, desc.place, bytes.clone()).into())
    }
}

impl VariableStore for Scope {
    fn lookup(&self, name: &str) -> Option<&ParameterTensor> {
        self.find_var(name).and_then(Variable::tensor)
    }
}
