//! Reference execution of a built network on the host, in f32.
//!
//! Used to check that a lowered network computes what the source operator
//! computed. Unknown extents are resolved from the concrete input shapes.

use std::collections::HashMap;

use log::trace;

use crate::engine::Engine;
use crate::error::GraphError;
use crate::network::{Extent, LayerKind, ScaleMode, TensorId, dims_to_string};
use crate::runtime_checks::{RuntimeShapeState, TensorKind, validate_shape_data_length};
use crate::weights::Weights;

/// Input tensor data for host execution
#[derive(Debug, Clone)]
pub struct HostInput {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Output tensor with actual data
#[derive(Debug, Clone)]
pub struct HostOutput {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Value {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// Run the network and return every declared network output.
pub fn run_network(engine: &Engine, inputs: Vec<HostInput>) -> Result<Vec<HostOutput>, GraphError> {
    let network = engine.network();
    let (mut values, mut shapes) = evaluate(engine, inputs)?;

    let mut results = Vec::new();
    for &id in network.outputs() {
        let name = network.tensor_name(id)?.to_string();
        let value = take_value(&mut values, id, &name)?;
        shapes.validate_shape(&name, &value.shape, network.tensor_dims(id)?, TensorKind::Output)?;
        results.push(HostOutput {
            name,
            shape: value.shape,
            data: value.data,
        });
    }
    Ok(results)
}

/// Run the network and return the tensors bound to `names` in the engine,
/// whether or not they were declared as outputs.
pub fn run_network_named(
    engine: &Engine,
    inputs: Vec<HostInput>,
    names: &[&str],
) -> Result<Vec<HostOutput>, GraphError> {
    let network = engine.network();
    let (values, mut shapes) = evaluate(engine, inputs)?;

    let mut results = Vec::new();
    for &name in names {
        let id = engine.get_itensor(name)?;
        let value = values
            .get(&id)
            .cloned()
            .ok_or_else(|| GraphError::RuntimeFailed {
                reason: format!("tensor `{}` was never computed", name),
            })?;
        shapes.validate_shape(name, &value.shape, network.tensor_dims(id)?, TensorKind::Output)?;
        results.push(HostOutput {
            name: name.to_string(),
            shape: value.shape,
            data: value.data,
        });
    }
    Ok(results)
}

fn take_value(
    values: &mut HashMap<TensorId, Value>,
    id: TensorId,
    name: &str,
) -> Result<Value, GraphError> {
    values.remove(&id).ok_or_else(|| GraphError::RuntimeFailed {
        reason: format!("tensor `{}` was never computed", name),
    })
}

fn evaluate(
    engine: &Engine,
    inputs: Vec<HostInput>,
) -> Result<(HashMap<TensorId, Value>, RuntimeShapeState), GraphError> {
    let network = engine.network();

    let mut declared = HashMap::new();
    let mut ids = HashMap::new();
    for &id in network.inputs() {
        let name = network.tensor_name(id)?.to_string();
        declared.insert(name.clone(), network.tensor_dims(id)?.to_vec());
        ids.insert(name, id);
    }

    let mut state = RuntimeShapeState::new();
    let mut actual_shapes = HashMap::new();
    for input in &inputs {
        validate_shape_data_length(&input.name, &input.shape, input.data.len())?;
        actual_shapes.insert(input.name.clone(), input.shape.clone());
    }
    state.validate_named_shapes(&actual_shapes, &declared, TensorKind::Input)?;
    for input in &inputs {
        state.validate_dynamic_dims(
            &input.name,
            &input.shape,
            engine.dynamic_dims(&input.name),
            TensorKind::Input,
        )?;
    }

    let mut values: HashMap<TensorId, Value> = HashMap::new();
    for input in inputs {
        if let Some(&id) = ids.get(&input.name) {
            values.insert(
                id,
                Value {
                    shape: input.shape,
                    data: input.data,
                },
            );
        }
    }

    for layer in network.layers() {
        let input = values.get(&layer.input()).ok_or_else(|| GraphError::RuntimeFailed {
            reason: format!("layer `{}` input was never computed", layer.name()),
        })?;
        let output = match layer.kind() {
            LayerKind::Shuffle { reshape } => run_shuffle(layer.name(), input, reshape)?,
            LayerKind::Scale {
                mode,
                shift,
                scale,
                power,
                channel_axis,
            } => {
                let coeffs = ScaleCoefficients {
                    shift: resolve_weights(engine, shift)?,
                    scale: resolve_weights(engine, scale)?,
                    power: resolve_weights(engine, power)?,
                };
                run_scale(layer.name(), input, *mode, &coeffs, *channel_axis)?
            }
        };
        trace!("executed `{}` -> {:?}", layer.name(), output.shape);
        values.insert(layer.output(), output);
    }

    Ok((values, state))
}

fn resolve_weights<'e>(
    engine: &'e Engine,
    weights: &Weights,
) -> Result<Option<&'e [f32]>, GraphError> {
    match weights {
        Weights::Empty => Ok(None),
        Weights::Registered(token) => {
            engine
                .weights_for(token)
                .map(Some)
                .ok_or_else(|| GraphError::RuntimeFailed {
                    reason: format!("weights `{}` are not registered", token.key()),
                })
        }
    }
}

fn run_shuffle(layer: &str, input: &Value, reshape: &[Extent]) -> Result<Value, GraphError> {
    let mut shape = Vec::with_capacity(reshape.len());
    for (axis, extent) in reshape.iter().enumerate() {
        let size = match extent {
            Extent::Known(v) => *v as usize,
            Extent::Unknown => *input.shape.get(axis).ok_or_else(|| GraphError::RuntimeFailed {
                reason: format!("layer `{}` copies missing axis {}", layer, axis),
            })?,
        };
        shape.push(size);
    }
    let volume: usize = shape.iter().product();
    if volume != input.data.len() {
        return Err(GraphError::RuntimeFailed {
            reason: format!(
                "layer `{}` cannot reshape {:?} to {} (resolved {:?})",
                layer,
                input.shape,
                dims_to_string(reshape),
                shape
            ),
        });
    }
    Ok(Value {
        shape,
        data: input.data.clone(),
    })
}

struct ScaleCoefficients<'e> {
    shift: Option<&'e [f32]>,
    scale: Option<&'e [f32]>,
    power: Option<&'e [f32]>,
}

fn run_scale(
    layer: &str,
    input: &Value,
    mode: ScaleMode,
    coeffs: &ScaleCoefficients<'_>,
    channel_axis: usize,
) -> Result<Value, GraphError> {
    let shape = &input.shape;
    let (count, inner) = match mode {
        ScaleMode::Uniform => (1, input.data.len().max(1)),
        ScaleMode::Channel => {
            let channels = *shape.get(channel_axis).ok_or_else(|| GraphError::RuntimeFailed {
                reason: format!("layer `{}` has no channel axis {}", layer, channel_axis),
            })?;
            (channels, shape[channel_axis + 1..].iter().product())
        }
        ScaleMode::Elementwise => {
            let tail: usize = shape.get(channel_axis..).map_or(1, |s| s.iter().product());
            (tail, 1)
        }
    };
    for (term, values) in [
        ("shift", coeffs.shift),
        ("scale", coeffs.scale),
        ("power", coeffs.power),
    ] {
        if let Some(values) = values {
            if values.len() != count {
                return Err(GraphError::RuntimeFailed {
                    reason: format!(
                        "layer `{}` needs {} {} coefficients for shape {:?}, has {}",
                        layer,
                        count,
                        term,
                        shape,
                        values.len()
                    ),
                });
            }
        }
    }

    let data = input
        .data
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let c = match mode {
                ScaleMode::Uniform => 0,
                _ => (i / inner) % count,
            };
            let mut y = x * coeffs.scale.map_or(1.0, |s| s[c]) + coeffs.shift.map_or(0.0, |s| s[c]);
            if let Some(p) = coeffs.power {
                y = y.powf(p[c]);
            }
            y
        })
        .collect();

    Ok(Value {
        shape: shape.clone(),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::weights::WeightBuffer;

    fn k(v: u32) -> Extent {
        Extent::Known(v)
    }

    #[test]
    fn test_channel_scale_indexing() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let x = engine.declare_input("x", &[k(1), k(2), k(1), k(2)]);
        let scale = engine.register_weights("s", WeightBuffer::new(vec![10.0, 100.0]));
        let shift = engine.register_weights("b", WeightBuffer::new(vec![1.0, 2.0]));
        let layer = engine
            .add_scale(
                x,
                ScaleMode::Channel,
                Weights::Registered(shift),
                Weights::Registered(scale),
                Weights::Empty,
                1,
            )
            .unwrap();
        let out = engine.network().layer_output(layer, 0).unwrap();
        engine.bind_named_output("y", out, true).unwrap();

        let outputs = run_network(
            &engine,
            vec![HostInput {
                name: "x".to_string(),
                shape: vec![1, 2, 1, 2],
                data: vec![1.0, 2.0, 3.0, 4.0],
            }],
        )
        .unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].name, "y");
        assert_eq!(outputs[0].data, vec![11.0, 21.0, 302.0, 402.0]);
    }

    #[test]
    fn test_uniform_scale_with_power() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let x = engine.declare_input("x", &[k(1), k(1), k(1), k(3)]);
        let power = engine.register_weights("p", WeightBuffer::new(vec![2.0]));
        let layer = engine
            .add_scale(
                x,
                ScaleMode::Uniform,
                Weights::Empty,
                Weights::Empty,
                Weights::Registered(power),
                0,
            )
            .unwrap();
        let out = engine.network().layer_output(layer, 0).unwrap();
        engine.bind_named_output("y", out, true).unwrap();

        let outputs = run_network(
            &engine,
            vec![HostInput {
                name: "x".to_string(),
                shape: vec![1, 1, 1, 3],
                data: vec![1.0, 2.0, 3.0],
            }],
        )
        .unwrap();
        assert_eq!(outputs[0].data, vec![1.0, 4.0, 9.0]);
    }

    #[test]
    fn test_shuffle_resolves_unknown_extent() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let x = engine.declare_input("x", &[Extent::Unknown, k(3)]);
        let layer = engine
            .add_shuffle(x, &[Extent::Unknown, k(3), k(1), k(1)])
            .unwrap();
        let out = engine.network().layer_output(layer, 0).unwrap();
        engine.bind_named_output("y", out, false).unwrap();

        let outputs = run_network_named(
            &engine,
            vec![HostInput {
                name: "x".to_string(),
                shape: vec![2, 3],
                data: vec![0.0; 6],
            }],
            &["y"],
        )
        .unwrap();
        assert_eq!(outputs[0].shape, vec![2, 3, 1, 1]);
    }

    #[test]
    fn test_rejects_wrong_input_shape() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        engine.declare_input("x", &[Extent::Unknown, k(3)]);
        let err = run_network(
            &engine,
            vec![HostInput {
                name: "x".to_string(),
                shape: vec![2, 4],
                data: vec![0.0; 8],
            }],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GraphError::RuntimeStaticDimensionMismatch { axis: 1, .. }
        ));
    }

    #[test]
    fn test_rejects_missing_input() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        engine.declare_input("x", &[k(1)]);
        let err = run_network(&engine, Vec::new()).unwrap_err();
        assert!(matches!(err, GraphError::RuntimeTensorMissing { .. }));
    }
}
