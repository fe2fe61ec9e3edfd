use super::solvers::{ExplicitRungeKutta, ImplicitEuler, Rosenbrock2, RK4, TSIT5};
use super::system::{CompiledModel, EquationSystem};
use super::IntegratorSettings;
use crate::collaborators::{SimulationResult, SolverStrategy, TimeSpan};
use crate::traits::{Differentiable, Steppable};
use anyhow::{bail, Context, Result};
use nalgebra::DMatrix;
use num_complex::Complex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Rk4,
    Tsit5,
    Ros2,
    ImplicitEuler,
    /// Chooses between `Tsit5` and `Ros2` from the Jacobian spectrum at the
    /// initial state.
    Auto,
}

impl Method {
    pub fn from_token(token: &str) -> Result<Self> {
        Ok(match token.to_ascii_lowercase().as_str() {
            "rk4" => Method::Rk4,
            "tsit5" => Method::Tsit5,
            "ros2" | "rosenbrock" => Method::Ros2,
            "implicit-euler" | "euler-implicit" => Method::ImplicitEuler,
            "auto" => Method::Auto,
            other => bail!(
                "unknown solver `{}` (expected rk4, tsit5, ros2, implicit-euler or auto)",
                other
            ),
        })
    }

    pub fn token(self) -> &'static str {
        match self {
            Method::Rk4 => "rk4",
            Method::Tsit5 => "tsit5",
            Method::Ros2 => "ros2",
            Method::ImplicitEuler => "implicit-euler",
            Method::Auto => "auto",
        }
    }
}

enum Stepper {
    Explicit(ExplicitRungeKutta),
    Rosenbrock(Rosenbrock2),
    Implicit(ImplicitEuler),
}

impl Stepper {
    fn new(method: Method, dim: usize, settings: &IntegratorSettings) -> Self {
        match method {
            Method::Rk4 => Stepper::Explicit(ExplicitRungeKutta::new(&RK4, dim)),
            Method::Tsit5 => Stepper::Explicit(ExplicitRungeKutta::new(&TSIT5, dim)),
            Method::Ros2 | Method::Auto => Stepper::Rosenbrock(Rosenbrock2::new(dim)),
            Method::ImplicitEuler => Stepper::Implicit(ImplicitEuler::new(
                dim,
                settings.newton_tolerance,
                settings.newton_max_steps,
            )),
        }
    }

    fn step(&mut self, system: &impl Differentiable, t: &mut f64, state: &mut [f64], dt: f64) -> Result<()> {
        match self {
            Stepper::Explicit(s) => s.step(system, t, state, dt),
            Stepper::Rosenbrock(s) => s.step(system, t, state, dt),
            Stepper::Implicit(s) => s.step(system, t, state, dt),
        }
    }
}

/// Per-run figures reported when backend diagnostics are on.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub method: Method,
    pub steps: usize,
    pub step_size: f64,
    pub stiffness_ratio: Option<f64>,
}

/// Integrates `model` on a fixed grid of `settings.intervals` steps over `span`.
/// The first and last samples are exactly `span.start` and `span.stop`.
pub fn integrate(
    model: &CompiledModel,
    span: TimeSpan,
    strategy: &SolverStrategy,
    settings: &IntegratorSettings,
) -> Result<(SimulationResult, RunStatistics)> {
    let requested = Method::from_token(strategy.as_str())?;
    if !span.start.is_finite() || !span.stop.is_finite() {
        bail!("time span [{}, {}] is not finite", span.start, span.stop);
    }
    if span.stop < span.start {
        bail!(
            "stop time {} precedes start time {}",
            span.stop,
            span.start
        );
    }

    let system = EquationSystem::new(model);
    let dim = model.states.len();
    let mut state = model.initial_state.clone();

    let intervals = if span.stop == span.start { 0 } else { settings.intervals.max(1) };
    let dt = if intervals == 0 { 0.0 } else { (span.stop - span.start) / intervals as f64 };

    let (method, stiffness_ratio) = match requested {
        Method::Auto => {
            let ratio = stiffness_ratio(&system, span.start, &state);
            let radius = spectral_radius(&system, span.start, &state);
            let stiff = ratio.is_some_and(|r| r > settings.stiffness_threshold) || radius * dt > 2.0;
            (if stiff { Method::Ros2 } else { Method::Tsit5 }, ratio)
        }
        other => (other, None),
    };
    let mut stepper = Stepper::new(method, dim, settings);

    let mut times = Vec::with_capacity(intervals + 1);
    let mut values = Vec::with_capacity(intervals + 1);
    let mut t = span.start;
    times.push(t);
    values.push(system.observe(t, &state));

    for i in 0..intervals {
        if dim > 0 {
            stepper
                .step(&system, &mut t, &mut state, dt)
                .with_context(|| format!("{} step failed at t = {}", method.token(), t))?;
        }
        // Recompute from the grid so the last sample lands exactly on `stop`.
        t = if i + 1 == intervals {
            span.stop
        } else {
            span.start + (i + 1) as f64 * dt
        };
        if let Some(index) = state.iter().position(|v| !v.is_finite()) {
            bail!(
                "solution diverged at t = {}: `{}` is {}",
                t,
                model.states[index],
                state[index]
            );
        }
        times.push(t);
        values.push(system.observe(t, &state));
    }

    Ok((
        SimulationResult {
            model: model.name.clone(),
            solver: method.token().to_string(),
            variables: model.variables(),
            times,
            values,
        },
        RunStatistics {
            method,
            steps: intervals,
            step_size: dt,
            stiffness_ratio,
        },
    ))
}

fn eigenvalues(system: &impl Differentiable, t: f64, state: &[f64]) -> Vec<Complex<f64>> {
    let dim = state.len();
    if dim == 0 {
        return Vec::new();
    }
    let mut jacobian = vec![0.0; dim * dim];
    system.jacobian(t, state, &mut jacobian);
    let matrix = DMatrix::from_row_slice(dim, dim, &jacobian);
    matrix.complex_eigenvalues().iter().copied().collect()
}

/// Ratio of the fastest to the slowest decay rate at (t, state), if any
/// mode decays.
pub fn stiffness_ratio(system: &impl Differentiable, t: f64, state: &[f64]) -> Option<f64> {
    let rates: Vec<f64> = eigenvalues(system, t, state)
        .into_iter()
        .filter(|lambda| lambda.re < 0.0)
        .map(|lambda| -lambda.re)
        .collect();
    let fastest = rates.iter().cloned().fold(f64::NAN, f64::max);
    let slowest = rates.iter().cloned().fold(f64::NAN, f64::min);
    if rates.is_empty() || slowest <= 0.0 {
        return None;
    }
    Some(fastest / slowest)
}

fn spectral_radius(system: &impl Differentiable, t: f64, state: &[f64]) -> f64 {
    eigenvalues(system, t, state)
        .into_iter()
        .map(|lambda| lambda.norm())
        .fold(0.0, f64::max)
}
