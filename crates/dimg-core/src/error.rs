//! Error taxonomy for dimg.
//!
//! Every variant returned from this crate is fatal for the run. Problems that
//! only skip one entry (such as an unknown requested image name) are logged
//! where they occur and never surface as a `DimgError`.

/// dimg errors.
#[derive(Debug, thiserror::Error)]
pub enum DimgError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("dependency cycle detected involving images: {dimgs:?}")]
    DependencyCycle { dimgs: Vec<String> },

    #[error("invalid remote git url {url:?}: {reason}")]
    InvalidRemoteUrl { url: String, reason: String },

    #[error("git error in repo '{repo}': {message}")]
    GitOperation { repo: String, message: String },

    #[error("diff parse error in git artifact '{artifact}': unexpected line in state `{state}`: {line:?}")]
    DiffParse {
        artifact: String,
        state: String,
        line: String,
    },

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("builder error in stage '{stage}': {message}")]
    Builder { stage: String, message: String },

    #[error("image backend error: {0}")]
    Backend(String),

    #[error("build lock error on {path}: {message}")]
    Lock { path: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DimgError {
    /// Build a git error carrying the repository identity.
    pub fn git(repo: impl Into<String>, message: impl Into<String>) -> Self {
        DimgError::GitOperation {
            repo: repo.into(),
            message: message.into(),
        }
    }

    /// True for implementation/schema mismatches, as opposed to user input
    /// problems.
    pub fn is_internal(&self) -> bool {
        matches!(self, DimgError::InternalInvariant(_))
    }

    /// True for problems the user can fix by editing the configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DimgError::Configuration(_)
                | DimgError::DependencyCycle { .. }
                | DimgError::InvalidRemoteUrl { .. }
        )
    }
}

/// Result type for dimg operations.
pub type Result<T> = std::result::Result<T, DimgError>;
