use thiserror::Error;

/// Why a single candidate did not end up fixed.
///
/// These never abort a run; the orchestrator records them on the attempt.
/// An unchanged manifest is a skip, not an error (`SkipReason::ManifestUnchanged`).
#[derive(Debug, Error)]
pub enum FixError {
    #[error("no suitable update for {package}@{version}")]
    NoSuitableVersion { package: String, version: String },

    #[error("install or test failed: {cause}")]
    InstallOrTestFailure { cause: String },

    #[error("git operation failed: {cause}")]
    GitOperationFailure { cause: String },

    #[error("scanner transport failed: {cause}")]
    ScannerTransport { cause: String },
}

impl FixError {
    pub fn install(err: &anyhow::Error) -> Self {
        FixError::InstallOrTestFailure {
            cause: format!("{err:#}"),
        }
    }

    pub fn git(err: &anyhow::Error) -> Self {
        FixError::GitOperationFailure {
            cause: format!("{err:#}"),
        }
    }
}
