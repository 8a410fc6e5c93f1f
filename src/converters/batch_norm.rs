//! Inference-time batch normalization lowered to a single per-channel scale
//! layer.
//!
//! The four frozen parameters are staged to the host, folded into one scale
//! and one shift vector, moved into the engine's weight registry and applied
//! with a channel-mode scale layer on axis 1. Inputs below the engine's
//! canonical rank are reshaped around that layer (see [`crate::rank`]).

use log::{debug, trace};

use super::{ConversionContext, OpConverter};
use crate::error::GraphError;
use crate::fusion::{NormParams, fuse_batch_norm};
use crate::graph::OpDesc;
use crate::network::{Extent, ScaleMode, dims_to_string};
use crate::rank::with_canonical_rank;
use crate::scope::{ParameterTensor, VariableStore};
use crate::staging::{TensorCopy, stage_to_host};
use crate::weights::Weights;

pub const OP_TYPE: &str = "batch_norm";

const CHANNEL_AXIS: usize = 1;

/// Parameter slots in resolution order.
pub const PARAMETER_SLOTS: [&str; 4] = ["Scale", "Bias", "Mean", "Variance"];

pub struct BatchNormConverter;

struct Resolved<'s> {
    name: &'s str,
    tensor: &'s ParameterTensor,
}

impl BatchNormConverter {
    /// Look up all four parameters before anything else happens. The first
    /// absent one aborts the conversion.
    fn resolve_parameters<'s>(
        op: &'s OpDesc,
        scope: &'s dyn VariableStore,
    ) -> Result<[Resolved<'s>; 4], GraphError> {
        let resolve = |role: &str| -> Result<Resolved<'s>, GraphError> {
            let missing = |name: &str| GraphError::MissingParameter {
                op: OP_TYPE.to_string(),
                role: role.to_string(),
                name: name.to_string(),
            };
            let name = op.input(role).ok_or_else(|| missing("<unbound>"))?;
            let tensor = scope.lookup(name).ok_or_else(|| missing(name))?;
            Ok(Resolved { name, tensor })
        };
        let [scale, bias, mean, variance] = PARAMETER_SLOTS;
        Ok([
            resolve(scale)?,
            resolve(bias)?,
            resolve(mean)?,
            resolve(variance)?,
        ])
    }

    fn stage_parameters(
        copier: &dyn TensorCopy,
        resolved: &[Resolved<'_>; 4],
    ) -> Result<NormParams, GraphError> {
        let [scale, bias, mean, variance] = resolved;
        Ok(NormParams {
            scale: stage_to_host(copier, scale.name, scale.tensor)?,
            bias: stage_to_host(copier, bias.name, bias.tensor)?,
            mean: stage_to_host(copier, mean.name, mean.tensor)?,
            variance: stage_to_host(copier, variance.name, variance.tensor)?,
        })
    }

    fn epsilon(op: &OpDesc) -> Result<f32, GraphError> {
        let epsilon = op.attr_f32("epsilon")?;
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(GraphError::InvalidAttribute {
                op: OP_TYPE.to_string(),
                name: "epsilon".to_string(),
                reason: format!("must be a finite positive number, got {}", epsilon),
            });
        }
        Ok(epsilon)
    }

    fn check_channels(
        input_name: &str,
        dims: &[Extent],
        channels: usize,
    ) -> Result<(), GraphError> {
        let Some(extent) = dims.get(CHANNEL_AXIS) else {
            return Err(GraphError::ShapeMismatch {
                name: input_name.to_string(),
                reason: format!(
                    "input {} has no channel axis {}",
                    dims_to_string(dims),
                    CHANNEL_AXIS
                ),
            });
        };
        if let Extent::Known(c) = extent {
            if *c as usize != channels {
                return Err(GraphError::ShapeMismatch {
                    name: input_name.to_string(),
                    reason: format!(
                        "input {} has {} channels, parameters have {}",
                        dims_to_string(dims),
                        c,
                        channels
                    ),
                });
            }
        }
        Ok(())
    }
}

impl OpConverter for BatchNormConverter {
    fn op_type(&self) -> &'static str {
        OP_TYPE
    }

    fn convert(&self, ctx: &mut ConversionContext<'_>, op: &OpDesc) -> Result<(), GraphError> {
        let output_name = op.required_output("Y")?;
        debug!("lowering batch_norm `{}` to a fused channel scale", output_name);

        let resolved = Self::resolve_parameters(op, ctx.scope)?;
        let epsilon = Self::epsilon(op)?;
        let input_name = op.required_input("X")?;
        let input = ctx.engine.get_itensor(input_name)?;

        let params = Self::stage_parameters(ctx.copier, &resolved)?;
        let channels = params.channels()?;
        let fused = fuse_batch_norm(&params, epsilon)?;
        drop(params);
        trace!("{}: fused {} channels (epsilon {})", output_name, channels, epsilon);

        let dims = ctx.engine.network().tensor_dims(input)?.to_vec();
        Self::check_channels(input_name, &dims, channels)?;

        // The registry owns the fused buffers from here on.
        let [scale_param, bias_param, _, _] = &resolved;
        let shift = ctx.engine.register_weights(bias_param.name, fused.bias);
        let scale = ctx.engine.register_weights(scale_param.name, fused.scale);

        let adapted = with_canonical_rank(ctx.engine, input, OP_TYPE, output_name, |engine, x| {
            engine.add_scale(
                x,
                ScaleMode::Channel,
                Weights::Registered(shift),
                Weights::Registered(scale),
                Weights::Empty,
                CHANNEL_AXIS,
            )
        })?;
        if adapted.expanded {
            trace!(
                "{}: applied through rank {} view of {}",
                output_name,
                ctx.engine.canonical_rank(),
                dims_to_string(&dims)
            );
        }

        ctx.engine
            .bind_named_output(output_name, adapted.output, !ctx.test_mode)
    }
}
