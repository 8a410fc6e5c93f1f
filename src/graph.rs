use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::error::GraphError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct DynamicDimension {
    pub name: String,
    pub max_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(untagged)]
pub enum Dimension {
    Static(u32),
    Dynamic(DynamicDimension),
}

pub fn to_dimension_vector(shape: &[u32]) -> Vec<Dimension> {
    shape.iter().copied().map(Dimension::Static).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Float16,
    Float32,
    Int32,
    Int64,
}

impl DataType {
    pub fn bytes_per_element(self) -> usize {
        match self {
            DataType::Float16 => 2,
            DataType::Float32 => 4,
            DataType::Int32 => 4,
            DataType::Int64 => 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperandDescriptor {
    pub data_type: DataType,
    #[serde(default)]
    pub shape: Vec<Dimension>,
}

impl OperandDescriptor {
    pub fn static_or_max_shape(&self) -> Vec<u32> {
        self.shape
            .iter()
            .map(|dim| match dim {
                Dimension::Static(v) => *v,
                Dimension::Dynamic(d) => d.max_size,
            })
            .collect()
    }
}

/// Where a parameter tensor's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Place {
    #[default]
    Host,
    Device(u32),
}

impl std::fmt::Display for Place {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Place::Host => write!(f, "host"),
            Place::Device(id) => write!(f, "device:{}", id),
        }
    }
}

/// A persistable variable as declared in a model file. `data: None` is an
/// empty variable: declared, but never initialized.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDesc {
    pub data_type: DataType,
    #[serde(default)]
    pub shape: Vec<u32>,
    #[serde(default)]
    pub place: Place,
    #[serde_as(as = "Option<Base64>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
}

/// One operator of the source model: named input/output slots, each mapping
/// to a list of variable names, plus free-form attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpDesc {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl OpDesc {
    pub fn new(op_type: impl Into<String>) -> Self {
        OpDesc {
            op_type: op_type.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, slot: &str, name: &str) -> Self {
        self.inputs
            .entry(slot.to_string())
            .or_default()
            .push(name.to_string());
        self
    }

    pub fn with_output(mut self, slot: &str, name: &str) -> Self {
        self.outputs
            .entry(slot.to_string())
            .or_default()
            .push(name.to_string());
        self
    }

    pub fn with_attribute(mut self, name: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    /// First variable name bound to `slot`, if any.
    pub fn input(&self, slot: &str) -> Option<&str> {
        self.inputs
            .get(slot)
            .and_then(|names| names.first())
            .map(String::as_str)
    }

    pub fn output(&self, slot: &str) -> Option<&str> {
        self.outputs
            .get(slot)
            .and_then(|names| names.first())
            .map(String::as_str)
    }

    pub fn required_input(&self, slot: &str) -> Result<&str, GraphError> {
        self.input(slot).ok_or_else(|| GraphError::MissingInput {
            op: self.op_type.clone(),
            slot: slot.to_string(),
        })
    }

    pub fn required_output(&self, slot: &str) -> Result<&str, GraphError> {
        self.output(slot).ok_or_else(|| GraphError::MissingOutput {
            op: self.op_type.clone(),
            slot: slot.to_string(),
        })
    }

    pub fn attr_f32(&self, name: &str) -> Result<f32, GraphError> {
        let value = self
            .attributes
            .get(name)
            .ok_or_else(|| GraphError::MissingAttribute {
                op: self.op_type.clone(),
                name: name.to_string(),
            })?;
        value
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| GraphError::InvalidAttribute {
                op: self.op_type.clone(),
                name: name.to_string(),
                reason: format!("expected a number, got {}", value),
            })
    }

    /// First output name, used to identify the operator in diagnostics.
    pub fn display_name(&self) -> String {
        self.outputs
            .values()
            .flat_map(|names| names.first())
            .next()
            .cloned()
            .unwrap_or_else(|| self.op_type.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDesc {
    #[serde(default)]
    pub inputs: BTreeMap<String, OperandDescriptor>,
    #[serde(default)]
    pub operations: Vec<OpDesc>,
    #[serde(default)]
    pub parameters: BTreeMap<String, VariableDesc>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_bytes_per_element() {
        assert_eq!(DataType::Float16.bytes_per_element(), 2);
        assert_eq!(DataType::Float32.bytes_per_element(), 4);
        assert_eq!(DataType::Int32.bytes_per_element(), 4);
        assert_eq!(DataType::Int64.bytes_per_element(), 8);
    }

    #[test]
    fn test_dimension_deserialization() {
        let dims: Vec<Dimension> =
            serde_json::from_str(r#"[{"name": "batch", "maxSize": 16}, 3]"#).unwrap();
        assert_eq!(
            dims,
            vec![
                Dimension::Dynamic(DynamicDimension {
                    name: "batch".to_string(),
                    max_size: 16,
                }),
                Dimension::Static(3),
            ]
        );
    }

    #[test]
    fn test_operand_descriptor_static_or_max_shape() {
        let mut desc = OperandDescriptor {
            data_type: DataType::Float32,
            shape: to_dimension_vector(&[2, 3]),
        };
        assert_eq!(desc.static_or_max_shape(), vec![2, 3]);

        desc.shape[0] = Dimension::Dynamic(DynamicDimension {
            name: "batch".to_string(),
            max_size: 8,
        });
        assert_eq!(desc.static_or_max_shape(), vec![8, 3]);
    }

    #[test]
    fn test_place_deserialization() {
        assert_eq!(serde_json::from_str::<Place>("\"host\"").unwrap(), Place::Host);
        assert_eq!(
            serde_json::from_str::<Place>(r#"{"device": 1}"#).unwrap(),
            Place::Device(1)
        );
        assert_eq!(Place::Device(2).to_string(), "device:2");
    }

    #[test]
    fn test_variable_desc_without_data_is_empty() {
        let var: VariableDesc =
            serde_json::from_str(r#"{"dataType": "float32", "shape": [3]}"#).unwrap();
        assert!(var.data.is_none());
        assert_eq!(var.place, Place::Host);
    }

    #[test]
    fn test_op_desc_slots() {
        let op = OpDesc::new("batch_norm")
            .with_input("X", "x")
            .with_output("Y", "y")
            .with_attribute("epsilon", serde_json::json!(1e-5));
        assert_eq!(op.input("X"), Some("x"));
        assert_eq!(op.required_output("Y").unwrap(), "y");
        assert!((op.attr_f32("epsilon").unwrap() - 1e-5).abs() < 1e-12);
        assert_eq!(op.display_name(), "y");
        assert!(matches!(
            op.required_input("Scale"),
            Err(GraphError::MissingInput { .. })
        ));
    }

    #[test]
    fn test_op_desc_attr_errors() {
        let op = OpDesc::new("batch_norm").with_attribute("epsilon", serde_json::json!("small"));
        assert!(matches!(
            op.attr_f32("epsilon"),
            Err(GraphError::InvalidAttribute { .. })
        ));
        assert!(matches!(
            op.attr_f32("momentum"),
            Err(GraphError::MissingAttribute { .. })
        ));
    }
}
