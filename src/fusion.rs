//! Folding of frozen batch-normalization statistics into one affine transform.
//!
//! At inference time `(x - mean) / sqrt(var + eps) * gamma + beta` is affine
//! per channel, so it collapses to `x * scale + bias` with
//!
//! ```text
//! scale[i] = gamma[i] / sqrt(var[i] + eps)
//! bias[i]  = beta[i] - mean[i] * scale[i]
//! ```

use crate::error::GraphError;
use crate::staging::HostTensor;
use crate::weights::WeightBuffer;

/// Host copies of the four normalization parameters.
#[derive(Debug)]
pub struct NormParams {
    pub scale: HostTensor,
    pub bias: HostTensor,
    pub mean: HostTensor,
    pub variance: HostTensor,
}

impl NormParams {
    /// Shared element count of all four tensors.
    pub fn channels(&self) -> Result<usize, GraphError> {
        let channels = self.scale.len();
        for other in [&self.bias, &self.mean, &self.variance] {
            if other.len() != channels {
                return Err(GraphError::ShapeMismatch {
                    name: other.name().to_string(),
                    reason: format!(
                        "has {} elements but `{}` has {}",
                        other.len(),
                        self.scale.name(),
                        channels
                    ),
                });
            }
        }
        Ok(channels)
    }
}

/// Freshly allocated fused coefficients, owned until registered with an engine.
#[derive(Debug)]
pub struct FusedAffine {
    pub scale: WeightBuffer,
    pub bias: WeightBuffer,
}

pub fn fuse_batch_norm(params: &NormParams, epsilon: f32) -> Result<FusedAffine, GraphError> {
    let channels = params.channels()?;
    let mut scale = Vec::with_capacity(channels);
    let mut bias = Vec::with_capacity(channels);

    let gamma = params.scale.data();
    let beta = params.bias.data();
    let mean = params.mean.data();
    let variance = params.variance.data();
    for i in 0..channels {
        let s = gamma[i] / (variance[i] + epsilon).sqrt();
        scale.push(s);
        bias.push(beta[i] - mean[i] * s);
    }

    Ok(FusedAffine {
        scale: WeightBuffer::new(scale),
        bias: WeightBuffer::new(bias),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, values: &[f32]) -> HostTensor {
        HostTensor::new(name, vec![values.len()], values.to_vec())
    }

    fn params(gamma: &[f32], beta: &[f32], mean: &[f32], var: &[f32]) -> NormParams {
        NormParams {
            scale: host("scale", gamma),
            bias: host("bias", beta),
            mean: host("mean", mean),
            variance: host("variance", var),
        }
    }

    #[test]
    fn test_unit_example() {
        let p = params(&[2.0; 3], &[1.0; 3], &[0.0; 3], &[3.0; 3]);
        let fused = fuse_batch_norm(&p, 1.0).unwrap();
        assert_eq!(fused.scale.as_slice(), &[1.0, 1.0, 1.0]);
        assert_eq!(fused.bias.as_slice(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_matches_closed_form() {
        let gamma = [0.5, -1.25, 3.0, 1.0];
        let beta = [0.1, 0.0, -2.0, 4.5];
        let mean = [1.0, -3.0, 0.25, 0.0];
        let var = [0.04, 2.0, 9.0, 1e-8];
        let eps = 1e-5;
        let fused = fuse_batch_norm(&params(&gamma, &beta, &mean, &var), eps).unwrap();
        for i in 0..4 {
            let s = gamma[i] / (var[i] + eps).sqrt();
            assert_eq!(fused.scale.as_slice()[i], s);
            assert_eq!(fused.bias.as_slice()[i], beta[i] - mean[i] * s);
        }
    }

    #[test]
    fn test_epsilon_guards_zero_variance() {
        let fused = fuse_batch_norm(&params(&[1.0], &[0.0], &[0.0], &[0.0]), 1e-4).unwrap();
        assert!(fused.scale.as_slice()[0].is_finite());
        assert!((fused.scale.as_slice()[0] - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_length_mismatch_names_parameter() {
        let p = params(&[1.0, 1.0], &[0.0, 0.0], &[0.0], &[1.0, 1.0]);
        let err = fuse_batch_norm(&p, 1e-5).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { ref name, .. } if name == "mean"));
    }

    #[test]
    fn test_empty_channels() {
        let fused = fuse_batch_norm(&params(&[], &[], &[], &[]), 1e-5).unwrap();
        assert!(fused.scale.is_empty());
        assert!(fused.bias.is_empty());
    }
}
