//! Host staging of parameter tensors.
//!
//! Fusion arithmetic runs on the host, so every parameter is copied into a
//! converter-owned [`HostTensor`] first, even when it already lives on the
//! host.

use std::collections::BTreeSet;

use log::trace;

use crate::error::GraphError;
use crate::graph::{DataType, Place};
use crate::scope::ParameterTensor;

/// Host-resident float32 working copy of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    name: String,
    dims: Vec<usize>,
    data: Vec<f32>,
}

impl HostTensor {
    pub fn new(name: impl Into<String>, dims: Vec<usize>, data: Vec<f32>) -> Self {
        HostTensor {
            name: name.into(),
            dims,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Synchronous copy primitive. Returns only once the data is on the host.
pub trait TensorCopy {
    fn copy_sync(
        &self,
        name: &str,
        tensor: &ParameterTensor,
        target: Place,
    ) -> Result<HostTensor, GraphError>;
}

/// Copier over a fixed set of online device ordinals.
#[derive(Debug, Clone, Default)]
pub struct SyncCopier {
    online: BTreeSet<u32>,
}

impl SyncCopier {
    /// A copier that can only read host memory.
    pub fn host_only() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: impl IntoIterator<Item = u32>) -> Self {
        SyncCopier {
            online: devices.into_iter().collect(),
        }
    }

    pub fn is_online(&self, place: Place) -> bool {
        match place {
            Place::Host => true,
            Place::Device(id) => self.online.contains(&id),
        }
    }
}

impl TensorCopy for SyncCopier {
    fn copy_sync(
        &self,
        name: &str,
        tensor: &ParameterTensor,
        target: Place,
    ) -> Result<HostTensor, GraphError> {
        let source = tensor.place();
        let failed = |reason: String| GraphError::TransferFailed {
            name: name.to_string(),
            place: source.to_string(),
            reason,
        };

        if target != Place::Host {
            return Err(failed(format!(
                "staging target must be host memory, got {}",
                target
            )));
        }
        if !self.is_online(source) {
            return Err(failed(format!("{} is not available", source)));
        }
        if tensor.data_type() != DataType::Float32 {
            return Err(failed(format!(
                "expected float32 storage, got {:?}",
                tensor.data_type()
            )));
        }

        let expected = tensor
            .element_count()
            .ok_or_else(|| GraphError::ShapeMismatch {
                name: name.to_string(),
                reason: format!("dims {:?} overflow", tensor.dims()),
            })?;
        let bytes = tensor.bytes();
        if bytes.len() != expected * 4 {
            return Err(GraphError::ShapeMismatch {
                name: name.to_string(),
                reason: format!(
                    "dims {:?} require {} elements, storage holds {} bytes",
                    tensor.dims(),
                    expected,
                    bytes.len()
                ),
            });
        }

        let data: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        trace!(
            "staged `{}` ({} elements) from {} to host",
            name,
            data.len(),
            source
        );

        Ok(HostTensor {
            name: name.to_string(),
            dims: tensor.dims().to_vec(),
            data,
        })
    }
}

/// Stage one parameter to host memory.
pub fn stage_to_host(
    copier: &dyn TensorCopy,
    name: &str,
    tensor: &ParameterTensor,
) -> Result<HostTensor, GraphError> {
    copier.copy_sync(name, tensor, Place::Host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_copy_is_independent() {
        let src = ParameterTensor::from_f32(vec![2], Place::Host, &[1.5, -2.0]);
        let host = stage_to_host(&SyncCopier::host_only(), "w", &src).unwrap();
        assert_eq!(host.data(), &[1.5, -2.0]);
        assert_eq!(host.dims(), &[2]);
        assert_eq!(host.name(), "w");
        // Source storage is untouched and still readable.
        assert_eq!(src.bytes().len(), 8);
    }

    #[test]
    fn test_device_copy_requires_online_device() {
        let src = ParameterTensor::from_f32(vec![1], Place::Device(1), &[3.0]);

        let err = stage_to_host(&SyncCopier::with_devices([0]), "mean", &src).unwrap_err();
        match err {
            GraphError::TransferFailed { name, place, .. } => {
                assert_eq!(name, "mean");
                assert_eq!(place, "device:1");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let host = stage_to_host(&SyncCopier::with_devices([0, 1]), "mean", &src).unwrap();
        assert_eq!(host.data(), &[3.0]);
    }

    #[test]
    fn test_rejects_non_float_storage() {
        let src = ParameterTensor::new(DataType::Int32, vec![1], Place::Host, vec![0; 4]);
        let err = stage_to_host(&SyncCopier::host_only(), "w", &src).unwrap_err();
        assert!(matches!(err, GraphError::TransferFailed { .. }));
    }

    #[test]
    fn test_rejects_inconsistent_storage() {
        let src = ParameterTensor::new(DataType::Float32, vec![3], Place::Host, vec![0; 8]);
        let err = stage_to_host(&SyncCopier::host_only(), "w", &src).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_rejects_device_target() {
        let src = ParameterTensor::from_f32(vec![1], Place::Host, &[1.0]);
        let err = SyncCopier::with_devices([0])
            .copy_sync("w", &src, Place::Device(0))
            .unwrap_err();
        assert!(matches!(err, GraphError::TransferFailed { .. }));
    }
}
