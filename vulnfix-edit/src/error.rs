//! Error types for vulnfix-edit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EditError {
    /// The file is not a JSON object we can edit.
    #[error("invalid manifest {path}: {message}")]
    InvalidManifest { path: String, message: String },

    #[error("parse manifest: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O and other runtime failures.
    #[error("runtime error: {0}")]
    Runtime(#[from] anyhow::Error),
}

pub type EditResult<T> = Result<T, EditError>;

#[cfg(test)]
mod tests {
    use super::EditError;

    #[test]
    fn invalid_manifest_names_the_file() {
        let err = EditError::InvalidManifest {
            path: "packages/web/package.json".to_string(),
            message: "top level is an array".to_string(),
        };
        assert!(err.to_string().contains("packages/web/package.json"));
    }

    #[test]
    fn runtime_wraps_anyhow() {
        let err = EditError::from(anyhow::anyhow!("disk full"));
        assert!(err.to_string().contains("runtime error: disk full"));
    }
}
