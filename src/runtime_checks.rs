use std::collections::HashMap;

use crate::error::GraphError;
use crate::graph::DynamicDimension;
use crate::network::Extent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorKind {
    Input,
    Output,
}

impl TensorKind {
    fn as_str(self) -> &'static str {
        match self {
            TensorKind::Input => "input",
            TensorKind::Output => "output",
        }
    }
}

/// Concrete shapes seen so far in one execution, keyed by tensor name, and
/// the value each named dynamic dimension was bound to.
#[derive(Debug, Default, Clone)]
pub struct RuntimeShapeState {
    validated: HashMap<String, Vec<usize>>,
    bound_dims: HashMap<String, usize>,
}

impl RuntimeShapeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shape_of(&self, name: &str) -> Option<&[usize]> {
        self.validated.get(name).map(Vec::as_slice)
    }

    pub fn validate_named_shapes(
        &mut self,
        actual_shapes: &HashMap<String, Vec<usize>>,
        declared: &HashMap<String, Vec<Extent>>,
        kind: TensorKind,
    ) -> Result<(), GraphError> {
        for name in declared.keys() {
            if !actual_shapes.contains_key(name) {
                return Err(GraphError::RuntimeTensorMissing {
                    kind: kind.as_str().to_string(),
                    name: name.clone(),
                });
            }
        }

        for (name, actual_shape) in actual_shapes {
            let dims = declared
                .get(name)
                .ok_or_else(|| GraphError::RuntimeTensorUnexpected {
                    kind: kind.as_str().to_string(),
                    name: name.clone(),
                })?;
            self.validate_shape(name, actual_shape, dims, kind)?;
        }

        Ok(())
    }

    /// Check a concrete shape against declared dims. `Unknown` extents accept
    /// any size.
    pub fn validate_shape(
        &mut self,
        name: &str,
        actual_shape: &[usize],
        declared: &[Extent],
        kind: TensorKind,
    ) -> Result<(), GraphError> {
        if actual_shape.len() != declared.len() {
            return Err(GraphError::RuntimeTensorRankMismatch {
                kind: kind.as_str().to_string(),
                name: name.to_string(),
                expected_rank: declared.len(),
                actual_rank: actual_shape.len(),
            });
        }

        for (axis, (actual, expected)) in actual_shape
            .iter()
            .copied()
            .zip(declared)
            .enumerate()
        {
            if let Extent::Known(expected) = expected {
                if actual != *expected as usize {
                    return Err(GraphError::RuntimeStaticDimensionMismatch {
                        kind: kind.as_str().to_string(),
                        name: name.to_string(),
                        axis,
                        expected: *expected,
                        actual,
                    });
                }
            }
        }

        self.validated
            .insert(name.to_string(), actual_shape.to_vec());
        Ok(())
    }
}

impl RuntimeShapeState {
    /// Check the dynamic axes of `name`. Each axis must stay within its max
    /// size, and every axis sharing a dimension name must agree on its value.
    pub fn validate_dynamic_dims(
        &mut self,
        name: &str,
        actual_shape: &[usize],
        dynamic: &[(usize, DynamicDimension)],
        kind: TensorKind,
    ) -> Result<(), GraphError> {
        for (axis, dim) in dynamic {
            let Some(&actual) = actual_shape.get(*axis) else {
                return Err(GraphError::RuntimeTensorRankMismatch {
                    kind: kind.as_str().to_string(),
                    name: name.to_string(),
                    expected_rank: axis + 1,
                    actual_rank: actual_shape.len(),
                });
            };
            if actual > dim.max_size as usize {
                return Err(GraphError::RuntimeDynamicDimensionExceeded {
                    kind: kind.as_str().to_string(),
                    name: name.to_string(),
                    axis: *axis,
                    dim_name: dim.name.clone(),
                    max_size: dim.max_size,
                    actual,
                });
            }
            match self.bound_dims.get(&dim.name) {
                Some(&bound) if bound != actual => {
                    return Err(GraphError::RuntimeDynamicDimensionNameMismatch {
                        dim_name: dim.name.clone(),
                        expected: bound,
                        actual,
                    });
                }
                Some(_) => {}
                None => {
                    self.bound_dims.insert(dim.name.clone(), actual);
                }
            }
        }
        Ok(())
    }
}

pub fn validate_shape_data_length(
    name: &str,
    shape: &[usize],
    data_len: usize,
) -> Result<(), GraphError> {
    let expected = shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| GraphError::RuntimeTensorShapeOverflow {
            name: name.to_string(),
            shape: shape.to_vec(),
        })?;

    if data_len != expected {
        return Err(GraphError::RuntimeTensorDataLengthMismatch {
            kind: TensorKind::Input.as_str().to_string(),
            name: name.to_string(),
            expected,
            actual: data_len,
        });
    }

    Ok(())
}
