pub mod autodiff;
pub mod backend;
pub mod collaborators;
pub mod error;
pub mod frontend;
/// The `modsim_core` crate drives equation-based models from source text to
/// simulation results.
///
/// Key components:
/// - **Session**: `Session` owns the library cache and the registry of compiled models, and runs the pipeline.
/// - **Collaborators**: `Frontend` (parse, instantiate, flatten) and `Backend` (compile, integrate) seams.
/// - **Frontend**: a reference parser and instantiator for a small declarative modeling language.
/// - **Backend**: causalization into a bytecode VM, and fixed-step RK4, Tsit5, Rosenbrock and implicit Euler integrators.
pub mod session;
pub mod traits;

pub use collaborators::{Backend, Flattened, Frontend, SimulationResult, SolverStrategy, SyntaxError, TimeSpan};
pub use error::{PipelineError, PipelineResult};
pub use session::{
    FlattenRequest, LibrarySource, ModelSource, RecoveryPolicy, Resimulation, Session, SessionConfig,
    SimulationRequest,
};
