//! Canonical-rank adaptation.
//!
//! Some engine primitives (the per-channel scale layer in particular) only
//! accept tensors of the engine's canonical rank. [`with_canonical_rank`]
//! wraps any such layer in an expand/restore pair of shuffle layers when the
//! input rank is too small, so callers never compute the shapes themselves.

use log::trace;

use crate::engine::Engine;
use crate::error::GraphError;
use crate::naming::{NameRole, diagnostic_name};
use crate::network::{Extent, LayerId, TensorId, dims_to_string};

/// Pad `dims` with trailing 1s up to `canonical_rank`. Unknown extents stay
/// unknown. Dims already at or above canonical rank come back unchanged.
pub fn expand_dims(dims: &[Extent], canonical_rank: usize) -> Vec<Extent> {
    let mut expanded = dims.to_vec();
    while expanded.len() < canonical_rank {
        expanded.push(Extent::Known(1));
    }
    expanded
}

/// Inverse of [`expand_dims`] for an input of rank `original_rank`.
pub fn restore_dims(expanded: &[Extent], original_rank: usize) -> Vec<Extent> {
    expanded[..original_rank.min(expanded.len())].to_vec()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adapted {
    /// The layer built by the caller's closure.
    pub core: LayerId,
    /// Output of the last layer emitted, with the same dims as the original
    /// input.
    pub output: TensorId,
    pub expanded: bool,
}

/// Build the layer produced by `body` on a canonical-rank view of `input`.
///
/// `body` receives the tensor it must consume and returns the layer it added.
/// Every layer and intermediate tensor created here is named from `prefix`
/// and `output_name`.
pub fn with_canonical_rank<F>(
    engine: &mut Engine,
    input: TensorId,
    prefix: &str,
    output_name: &str,
    body: F,
) -> Result<Adapted, GraphError>
where
    F: FnOnce(&mut Engine, TensorId) -> Result<LayerId, GraphError>,
{
    let dims = engine.network().tensor_dims(input)?.to_vec();
    let canonical_rank = engine.canonical_rank();
    let name = |role| diagnostic_name(prefix, role, output_name);

    if dims.len() >= canonical_rank {
        let core = body(engine, input)?;
        engine.network_mut().set_layer_name(core, &name(NameRole::CoreLayer))?;
        let output = engine.network().layer_output(core, 0)?;
        return Ok(Adapted {
            core,
            output,
            expanded: false,
        });
    }

    let expanded_dims = expand_dims(&dims, canonical_rank);
    trace!(
        "{}: expanding {} to {}",
        output_name,
        dims_to_string(&dims),
        dims_to_string(&expanded_dims)
    );
    let expand = engine.add_shuffle(input, &expanded_dims)?;
    let expanded = engine.network().layer_output(expand, 0)?;
    engine
        .network_mut()
        .set_layer_name(expand, &name(NameRole::ExpandLayer))?;
    engine
        .network_mut()
        .set_tensor_name(expanded, &name(NameRole::ExpandOutput))?;

    let core = body(engine, expanded)?;
    let core_out = engine.network().layer_output(core, 0)?;
    engine.network_mut().set_layer_name(core, &name(NameRole::CoreLayer))?;
    engine
        .network_mut()
        .set_tensor_name(core_out, &name(NameRole::CoreOutput))?;

    let restore = engine.add_shuffle(core_out, &restore_dims(&expanded_dims, dims.len()))?;
    engine
        .network_mut()
        .set_layer_name(restore, &name(NameRole::RestoreLayer))?;
    let output = engine.network().layer_output(restore, 0)?;

    Ok(Adapted {
        core,
        output,
        expanded: true,
    })
}
