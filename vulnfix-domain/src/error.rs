use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("unknown node id {0}")]
    UnknownNode(usize),

    #[error("tree walk exceeded {budget} steps; the graph is larger than any lockfile we accept")]
    TraversalBudget { budget: usize },
}

#[derive(Debug, Error)]
pub enum LockfileError {
    #[error("no supported lockfile found (looked for {0})")]
    Missing(String),

    #[error("unsupported lockfileVersion {0}")]
    UnsupportedVersion(String),

    #[error("invalid lockfile entry `{location}`: {reason}")]
    InvalidEntry { location: String, reason: String },

    #[error("parse JSON lockfile: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parse YAML lockfile: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("this lockfile format is read-only")]
    ReadOnly,

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
