//! Deterministic diagnostic names for emitted layers and intermediate tensors.
//!
//! Everything is derived from the operator's declared output name so a layer
//! in the built network can be traced back to the source operator.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRole {
    /// Shuffle layer lifting the input to canonical rank.
    ExpandLayer,
    /// Output tensor of the expand layer.
    ExpandOutput,
    /// The operator's main layer.
    CoreLayer,
    /// Output tensor of the main layer, when a restore layer follows it.
    CoreOutput,
    /// Shuffle layer dropping back to the original rank.
    RestoreLayer,
}

impl NameRole {
    fn tag(self) -> &'static str {
        match self {
            NameRole::ExpandLayer | NameRole::ExpandOutput => "expand",
            NameRole::CoreLayer | NameRole::CoreOutput => "core",
            NameRole::RestoreLayer => "restore",
        }
    }

    fn is_layer(self) -> bool {
        matches!(
            self,
            NameRole::ExpandLayer | NameRole::CoreLayer | NameRole::RestoreLayer
        )
    }
}

pub fn diagnostic_name(prefix: &str, role: NameRole, output_name: &str) -> String {
    if role.is_layer() {
        format!("{}/{} (Output: {})", prefix, role.tag(), output_name)
    } else {
        format!("{}/{}_out: {}", prefix, role.tag(), output_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_stable() {
        assert_eq!(
            diagnostic_name("batch_norm", NameRole::ExpandLayer, "y"),
            "batch_norm/expand (Output: y)"
        );
        assert_eq!(
            diagnostic_name("batch_norm", NameRole::ExpandOutput, "y"),
            "batch_norm/expand_out: y"
        );
        assert_eq!(
            diagnostic_name("batch_norm", NameRole::CoreOutput, "y"),
            "batch_norm/core_out: y"
        );
        assert_eq!(
            diagnostic_name("batch_norm", NameRole::RestoreLayer, "y"),
            "batch_norm/restore (Output: y)"
        );
    }

    #[test]
    fn test_roles_do_not_collide() {
        let roles = [
            NameRole::ExpandLayer,
            NameRole::ExpandOutput,
            NameRole::CoreLayer,
            NameRole::CoreOutput,
            NameRole::RestoreLayer,
        ];
        let mut names: Vec<String> = roles
            .iter()
            .map(|&r| diagnostic_name("bn", r, "out"))
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), roles.len());
        // Never equal to the bound output name itself.
        assert!(!names.iter().any(|n| n == "out"));
    }
}
