use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the orchestration session.
///
/// Collaborator errors are carried unchanged as the `source` of the variant
/// naming the stage that failed.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("library `{0}` has not been loaded")]
    LibraryNotLoaded(String),
    #[error("failed to load library `{id}`")]
    LibraryLoad {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to instantiate model `{model}`")]
    Instantiation {
        model: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to translate model `{model}`")]
    Translation {
        model: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("model `{0}` has not been compiled")]
    ModelNotCompiled(String),
    #[error("simulation of model `{model}` failed")]
    Integration {
        model: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration")]
    Config(#[from] toml::de::Error),
}

impl PipelineError {
    pub fn is_not_compiled(&self) -> bool {
        matches!(self, PipelineError::ModelNotCompiled(_))
    }
}

/// Convenience type for `Result<T, PipelineError>`.
pub type PipelineResult<T> = Result<T, PipelineError>;
