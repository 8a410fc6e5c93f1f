//! Engine-lifetime weight storage.
//!
//! Layers never hold coefficient data directly. Converters move a
//! [`WeightBuffer`] into the [`WeightRegistry`] and get back a
//! [`WeightToken`] that layers use to refer to it. The registry is the sole
//! owner from then on.

use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn};

use crate::error::GraphError;

/// Owned coefficient storage. Deliberately not `Clone`: it can only be moved
/// into a registry.
#[derive(Debug, PartialEq)]
pub struct WeightBuffer {
    values: Vec<f32>,
}

impl WeightBuffer {
    pub fn new(values: Vec<f32>) -> Self {
        WeightBuffer { values }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Receipt for a registered buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WeightToken {
    key: String,
    len: usize,
}

impl WeightToken {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Coefficient operand of a scale layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Weights {
    /// No coefficients; the layer uses the identity for this term.
    Empty,
    Registered(WeightToken),
}

impl Weights {
    pub fn count(&self) -> usize {
        match self {
            Weights::Empty => 0,
            Weights::Registered(token) => token.len(),
        }
    }
}

#[derive(Debug, Default)]
pub struct WeightRegistry {
    buffers: BTreeMap<String, WeightBuffer>,
}

impl WeightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `buffer` into the registry under `key`.
    ///
    /// If `key` is already taken (two operators sharing a parameter variable),
    /// the buffer is stored under `key__N` with the smallest free `N`; the
    /// returned token always carries the key actually used.
    pub fn register(&mut self, key: &str, buffer: WeightBuffer) -> WeightToken {
        let mut actual = key.to_string();
        let mut suffix = 1usize;
        while self.buffers.contains_key(&actual) {
            actual = format!("{}__{}", key, suffix);
            suffix += 1;
        }
        if actual != key {
            warn!("weight key `{}` already registered, storing as `{}`", key, actual);
        }
        let token = WeightToken {
            key: actual.clone(),
            len: buffer.len(),
        };
        self.buffers.insert(actual, buffer);
        token
    }

    pub fn get(&self, token: &WeightToken) -> Option<&[f32]> {
        self.buffers.get(&token.key).map(WeightBuffer::as_slice)
    }

    pub fn get_by_key(&self, key: &str) -> Option<&[f32]> {
        self.buffers.get(key).map(WeightBuffer::as_slice)
    }

    pub fn contains(&self, token: &WeightToken) -> bool {
        self.buffers.contains_key(&token.key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Write every buffer as a JSON object of key to values.
    pub fn export_json(&self, path: &Path) -> Result<(), GraphError> {
        let weights: BTreeMap<&str, &[f32]> = self
            .buffers
            .iter()
            .map(|(key, buffer)| (key.as_str(), buffer.as_slice()))
            .collect();
        let json = serde_json::to_vec_pretty(&weights).map_err(|source| GraphError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|err| GraphError::export(path.to_path_buf(), err))?;
        info!("exported {} weight buffers to {}", weights.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_moves_buffer() {
        let mut registry = WeightRegistry::new();
        let token = registry.register("bn.scale", WeightBuffer::new(vec![1.0, 2.0]));
        assert_eq!(token.key(), "bn.scale");
        assert_eq!(token.len(), 2);
        assert_eq!(registry.get(&token), Some(&[1.0, 2.0][..]));
        assert_eq!(registry.get_by_key("bn.scale"), Some(&[1.0, 2.0][..]));
    }

    #[test]
    fn test_register_collision_gets_suffix() {
        let mut registry = WeightRegistry::new();
        let first = registry.register("shared", WeightBuffer::new(vec![1.0]));
        let second = registry.register("shared", WeightBuffer::new(vec![2.0]));
        let third = registry.register("shared", WeightBuffer::new(vec![3.0]));
        assert_eq!(first.key(), "shared");
        assert_eq!(second.key(), "shared__1");
        assert_eq!(third.key(), "shared__2");
        assert_eq!(registry.get(&first), Some(&[1.0][..]));
        assert_eq!(registry.get(&second), Some(&[2.0][..]));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_export_json() {
        let mut registry = WeightRegistry::new();
        registry.register("bn.scale", WeightBuffer::new(vec![0.5, 2.0]));
        registry.register("bn.bias", WeightBuffer::new(vec![-1.0]));

        let path = std::env::temp_dir().join(format!("normfold-weights-{}.json", std::process::id()));
        registry.export_json(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let read: BTreeMap<String, Vec<f32>> = serde_json::from_str(&text).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read["bn.scale"], vec![0.5, 2.0]);
        assert_eq!(read["bn.bias"], vec![-1.0]);
    }

    #[test]
    fn test_export_json_reports_io_failure() {
        let registry = WeightRegistry::new();
        let path = Path::new("/nonexistent-normfold-dir/weights.json");
        let err = registry.export_json(path).unwrap_err();
        assert!(matches!(err, GraphError::Export { path: ref reported, .. } if reported == path));
    }

    #[test]
    fn test_weights_count() {
        let mut registry = WeightRegistry::new();
        let token = registry.register("w", WeightBuffer::new(vec![0.0; 4]));
        assert_eq!(Weights::Registered(token).count(), 4);
        assert_eq!(Weights::Empty.count(), 0);
    }
}
