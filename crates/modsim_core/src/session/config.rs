use super::diagnostics::DiagnosticsState;
use super::request::{LibrarySource, RecoveryPolicy};
use crate::backend::IntegratorSettings;
use crate::collaborators::{SolverStrategy, TimeSpan};
use crate::error::{PipelineError, PipelineResult};
use crate::frontend::stdlib;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Session settings, typically read from a TOML file.
///
/// ```toml
/// stop_time = 10.0
/// solver = "tsit5"
/// recovery = "any-failure"
///
/// [integrator]
/// intervals = 1000
///
/// [libraries]
/// Plant = "models/plant.mo"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub start_time: f64,
    pub stop_time: f64,
    pub solver: SolverStrategy,
    pub standard_library: String,
    pub scalarize: bool,
    pub recovery: RecoveryPolicy,
    pub diagnostics: DiagnosticsState,
    pub integrator: IntegratorSettings,
    /// Extra library ids and the source files that define them.
    pub libraries: BTreeMap<String, PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            stop_time: 1.0,
            solver: SolverStrategy::default(),
            standard_library: stdlib::DEFAULT_VERSION.to_string(),
            scalarize: true,
            recovery: RecoveryPolicy::default(),
            diagnostics: DiagnosticsState::default(),
            integrator: IntegratorSettings::default(),
            libraries: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> PipelineResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn span(&self) -> TimeSpan {
        TimeSpan::new(self.start_time, self.stop_time)
    }

    /// The configured standard library version, as a flatten source.
    pub fn standard_library_source(&self) -> LibrarySource {
        LibrarySource::Standard(self.standard_library.clone())
    }
}
