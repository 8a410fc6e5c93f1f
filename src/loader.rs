use std::path::Path;

use crate::error::GraphError;
use crate::graph::ModelDesc;

/// Load a JSON model description: inputs, operators, parameters and outputs.
pub fn load_model_from_path(path: &Path) -> Result<ModelDesc, GraphError> {
    let text = std::fs::read_to_string(path).map_err(|source| GraphError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| GraphError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let err = load_model_from_path(Path::new("/nonexistent/model.json")).unwrap_err();
        assert!(matches!(err, GraphError::Io { .. }));
    }

    #[test]
    fn test_parse_error_reports_path() {
        let path = std::env::temp_dir().join(format!("normfold-bad-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_model_from_path(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        match err {
            GraphError::Parse { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
