//! The orchestration core: library cache, flattening, translation into the
//! model registry, simulation and recovery-aware resimulation.

pub mod config;
pub mod diagnostics;
pub mod library_cache;
pub mod registry;
pub mod request;

pub use config::SessionConfig;
pub use diagnostics::DiagnosticsState;
pub use library_cache::LibraryCache;
pub use registry::ModelRegistry;
pub use request::{FlattenRequest, LibrarySource, ModelSource, RecoveryPolicy, Resimulation, SimulationRequest};

use crate::backend::ReferenceBackend;
use crate::collaborators::{is_parse_failure, Backend, Flattened, Frontend, SimulationResult, SolverStrategy, TimeSpan};
use crate::error::{PipelineError, PipelineResult};
use crate::frontend::ReferenceFrontend;
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;

/// One orchestration context. Every cache it uses is owned here, so separate
/// sessions never observe each other.
///
/// Operations that change the registry, the library cache or the diagnostics
/// flags take `&mut self`; callers sharing a session across threads wrap it
/// in a lock.
pub struct Session<F = ReferenceFrontend, B = ReferenceBackend>
where
    F: Frontend,
    B: Backend<F::Flat>,
{
    frontend: F,
    backend: B,
    libraries: LibraryCache<F::Program>,
    registry: ModelRegistry<B::Artifact>,
    diagnostics: DiagnosticsState,
    config: SessionConfig,
}

impl Session {
    pub fn new() -> Self {
        Self::from_config(SessionConfig::default())
    }

    /// Builds a session on the reference collaborators.
    pub fn from_config(config: SessionConfig) -> Self {
        let mut frontend = ReferenceFrontend::new();
        for (id, path) in &config.libraries {
            frontend.register_library(id.clone(), path.clone());
        }
        let backend = ReferenceBackend::new(config.integrator.clone());
        Self::with_collaborators(frontend, backend, config)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl<F, B> Session<F, B>
where
    F: Frontend,
    B: Backend<F::Flat>,
{
    pub fn with_collaborators(frontend: F, backend: B, config: SessionConfig) -> Self {
        let mut session = Self {
            frontend,
            backend,
            libraries: LibraryCache::default(),
            registry: ModelRegistry::default(),
            diagnostics: DiagnosticsState::default(),
            config,
        };
        if session.config.diagnostics.frontend {
            session.enable_frontend_diagnostics();
        }
        if session.config.diagnostics.backend {
            session.enable_backend_diagnostics();
        }
        session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn frontend(&self) -> &F {
        &self.frontend
    }

    pub fn frontend_mut(&mut self) -> &mut F {
        &mut self.frontend
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn diagnostics(&self) -> DiagnosticsState {
        self.diagnostics
    }

    /// Loads library `id` through the frontend and caches it, replacing an
    /// earlier load of the same id.
    pub fn load_library(&mut self, id: &str) -> PipelineResult<()> {
        let program = self
            .frontend
            .load_library(id)
            .map_err(|source| PipelineError::LibraryLoad {
                id: id.to_string(),
                source,
            })?;
        if self.libraries.insert(id, program) {
            info!("reloaded library {}", id);
        } else {
            info!("loaded library {}", id);
        }
        Ok(())
    }

    pub fn library(&self, id: &str) -> PipelineResult<&F::Program> {
        self.libraries.get(id)
    }

    pub fn loaded_libraries(&self) -> Vec<String> {
        self.libraries.ids()
    }

    /// Parses `path` into the frontend's program form.
    pub fn intermediate(&self, path: &Path) -> PipelineResult<F::Program> {
        let parsed = self.parse(path)?;
        Ok(self.frontend.to_program(parsed))
    }

    fn parse(&self, path: &Path) -> PipelineResult<F::Parsed> {
        self.frontend.parse(path).map_err(|source| PipelineError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn flatten(&self, request: &FlattenRequest) -> PipelineResult<Flattened<F::Flat, F::Functions>> {
        let model = request.model.as_str();
        let instantiation = |source| PipelineError::Instantiation {
            model: model.to_string(),
            source,
        };

        let (flat, functions) = match &request.library {
            LibrarySource::None => {
                let program = self.intermediate(&request.path)?;
                self.frontend
                    .instantiate(model, &program, request.scalarize)
                    .map_err(instantiation)?
            }
            LibrarySource::Cached(id) => {
                let program = self.intermediate(&request.path)?;
                let library = self.libraries.get(id)?;
                let merged = self.frontend.prepend(library, program);
                self.frontend
                    .instantiate(model, &merged, request.scalarize)
                    .map_err(instantiation)?
            }
            LibrarySource::Standard(version) => {
                self.frontend
                    .load_standard_library(version)
                    .map_err(|source| PipelineError::LibraryLoad {
                        id: version.clone(),
                        source,
                    })?;
                self.frontend
                    .flatten_with_standard_library(model, &request.path, version, request.scalarize)
                    .map_err(|source| {
                        if is_parse_failure(&source) {
                            PipelineError::Parse {
                                path: request.path.clone(),
                                source,
                            }
                        } else {
                            instantiation(source)
                        }
                    })?
            }
        };

        Ok(Flattened {
            model: flat,
            functions,
        })
    }

    pub fn to_text(&self, flat: &F::Flat) -> String {
        self.frontend.to_text(flat)
    }

    /// Flattens and compiles `model`, registering the artifact under its name.
    pub fn translate(&mut self, model: &str, path: &Path, library: LibrarySource) -> PipelineResult<()> {
        let request = FlattenRequest::new(model, path)
            .with_library(library)
            .with_scalarize(self.config.scalarize);
        // The function cache only matters to instantiation; the backend
        // compiles from the flat model alone.
        let Flattened { model: flat, .. } = self.flatten(&request)?;

        let artifact = self
            .backend
            .compile(model, &flat)
            .map_err(|source| PipelineError::Translation {
                model: model.to_string(),
                source,
            })?;

        if self.registry.register(model, artifact) {
            warn!("replaced compiled model {}", model);
        }
        info!("translated {} from {}", model, path.display());
        Ok(())
    }

    /// Names of the compiled models, sorted.
    pub fn compiled_models(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn compiled(&self, model: &str) -> PipelineResult<Arc<B::Artifact>> {
        self.registry.get(model)
    }

    /// Runs one simulation. File requests always retranslate first.
    pub fn simulate(&mut self, request: &SimulationRequest) -> PipelineResult<SimulationResult> {
        if let ModelSource::File { path, library } = &request.source {
            self.translate(&request.model, path, library.clone())?;
        }
        let span = request.span.unwrap_or_else(|| self.config.span());
        let solver = request.solver.clone().unwrap_or_else(|| self.config.solver.clone());
        self.simulate_registered(&request.model, span, &solver)
    }

    fn simulate_registered(&self, model: &str, span: TimeSpan, solver: &SolverStrategy) -> PipelineResult<SimulationResult> {
        let artifact = self.registry.get(model)?;
        info!(
            "simulating {} over [{}, {}] with {}",
            model, span.start, span.stop, solver
        );
        self.backend
            .integrate(&artifact, span, solver)
            .map_err(|source| PipelineError::Integration {
                model: model.to_string(),
                source,
            })
    }

    /// Simulates an already compiled model. Failures selected by the
    /// configured [`RecoveryPolicy`] are logged with the list of compiled
    /// models and reported as [`Resimulation::Recovered`].
    pub fn resimulate(&self, model: &str, span: TimeSpan, solver: &SolverStrategy) -> PipelineResult<Resimulation> {
        match self.simulate_registered(model, span, solver) {
            Ok(result) => Ok(Resimulation::Simulated(result)),
            Err(err) if self.config.recovery.recovers(&err) => {
                error!(
                    "cannot resimulate {}: {}. Translate the model before resimulating it.",
                    model, err
                );
                let available = self.compiled_models();
                info!("compiled models: [{}]", available.join(", "));
                Ok(Resimulation::Recovered {
                    model: model.to_string(),
                    available,
                })
            }
            Err(err) => Err(err),
        }
    }

    pub fn enable_frontend_diagnostics(&mut self) {
        self.diagnostics.frontend = true;
        self.frontend.set_verbose(true);
    }

    pub fn enable_backend_diagnostics(&mut self) {
        self.diagnostics.backend = true;
        self.backend.set_verbose(true);
    }
}
