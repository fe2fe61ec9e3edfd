use crate::collaborators::{SimulationResult, SolverStrategy, TimeSpan};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where library declarations merged ahead of a model come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LibrarySource {
    /// The model is instantiated on its own.
    #[default]
    None,
    /// A library previously stored with `load_library`.
    Cached(String),
    /// A standard library version, loaded by the frontend on demand.
    Standard(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlattenRequest {
    pub model: String,
    pub path: PathBuf,
    pub library: LibrarySource,
    pub scalarize: bool,
}

impl FlattenRequest {
    pub fn new(model: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            path: path.into(),
            library: LibrarySource::None,
            scalarize: true,
        }
    }

    pub fn with_library(mut self, library: LibrarySource) -> Self {
        self.library = library;
        self
    }

    pub fn with_scalarize(mut self, scalarize: bool) -> Self {
        self.scalarize = scalarize;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    /// Translate from source first, replacing any registered artifact.
    File { path: PathBuf, library: LibrarySource },
    /// Use the artifact already registered under the model name.
    Registry,
}

/// One simulation run. Unset span and solver fall back to the session
/// configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRequest {
    pub model: String,
    pub source: ModelSource,
    pub span: Option<TimeSpan>,
    pub solver: Option<SolverStrategy>,
}

impl SimulationRequest {
    pub fn from_file(model: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            source: ModelSource::File {
                path: path.into(),
                library: LibrarySource::None,
            },
            span: None,
            solver: None,
        }
    }

    pub fn registered(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            source: ModelSource::Registry,
            span: None,
            solver: None,
        }
    }

    pub fn with_span(mut self, span: TimeSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_solver(mut self, solver: impl Into<SolverStrategy>) -> Self {
        self.solver = Some(solver.into());
        self
    }

    /// Has no effect on registry requests.
    pub fn with_library(mut self, library: LibrarySource) -> Self {
        if let ModelSource::File { library: current, .. } = &mut self.source {
            *current = library;
        }
        self
    }
}

/// Outcome of `resimulate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Resimulation {
    Simulated(SimulationResult),
    /// The run failed in a way the recovery policy absorbs. `available` lists
    /// the compiled models at the time of the call.
    Recovered { model: String, available: Vec<String> },
}

impl Resimulation {
    pub fn is_recovered(&self) -> bool {
        matches!(self, Resimulation::Recovered { .. })
    }

    pub fn result(&self) -> Option<&SimulationResult> {
        match self {
            Resimulation::Simulated(result) => Some(result),
            Resimulation::Recovered { .. } => None,
        }
    }

    pub fn into_result(self) -> Option<SimulationResult> {
        match self {
            Resimulation::Simulated(result) => Some(result),
            Resimulation::Recovered { .. } => None,
        }
    }
}

/// Which `resimulate` failures become [`Resimulation::Recovered`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryPolicy {
    /// Only a missing compiled model.
    #[default]
    NotCompiled,
    /// Every failure.
    AnyFailure,
    /// Nothing; all failures propagate.
    Strict,
}

impl RecoveryPolicy {
    pub fn recovers(self, err: &PipelineError) -> bool {
        match self {
            RecoveryPolicy::NotCompiled => err.is_not_compiled(),
            RecoveryPolicy::AnyFailure => true,
            RecoveryPolicy::Strict => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_policies_classify_failures() {
        let missing = PipelineError::ModelNotCompiled("M".to_string());
        let failed = PipelineError::Integration {
            model: "M".to_string(),
            source: anyhow::anyhow!("diverged"),
        };

        assert!(RecoveryPolicy::NotCompiled.recovers(&missing));
        assert!(!RecoveryPolicy::NotCompiled.recovers(&failed));
        assert!(RecoveryPolicy::AnyFailure.recovers(&failed));
        assert!(!RecoveryPolicy::Strict.recovers(&missing));
    }

    #[test]
    fn library_only_applies_to_file_requests() {
        let file = SimulationRequest::from_file("M", "m.mo").with_library(LibrarySource::Cached("L".into()));
        assert_eq!(
            file.source,
            ModelSource::File {
                path: PathBuf::from("m.mo"),
                library: LibrarySource::Cached("L".into()),
            }
        );

        let registered = SimulationRequest::registered("M")
            .with_library(LibrarySource::Standard("MSL:3.2.3".into()))
            .with_solver("rk4");
        assert_eq!(registered.source, ModelSource::Registry);
        assert_eq!(registered.solver, Some(SolverStrategy::new("rk4")));
        assert_eq!(registered.span, None);
    }
}
