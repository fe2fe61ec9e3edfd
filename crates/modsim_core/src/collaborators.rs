//! Contracts between the orchestration core and the collaborators it drives.
//!
//! The session never looks inside the values these traits produce. A frontend
//! turns source files into flat models; a backend turns flat models into
//! simulatable artifacts and integrates them. Everything crossing the seam is
//! either an associated type owned by the collaborator or one of the small
//! value types defined here.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Malformed source text. Frontends report parse failures with this type so
/// the session can tell them apart from instantiation failures.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{}:{line}:{column}: {message}", path.display())]
pub struct SyntaxError {
    pub path: PathBuf,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// A source file that could not be read. Reported alongside [`SyntaxError`]
/// as a parse-stage failure.
#[derive(Debug, Error)]
#[error("failed to read {}", path.display())]
pub struct SourceUnavailable {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// True when `err` came from reading or parsing source text rather than from
/// a later stage.
pub fn is_parse_failure(err: &anyhow::Error) -> bool {
    err.downcast_ref::<SyntaxError>().is_some() || err.downcast_ref::<SourceUnavailable>().is_some()
}

/// Closed time interval handed to the integrator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: f64,
    pub stop: f64,
}

impl TimeSpan {
    pub fn new(start: f64, stop: f64) -> Self {
        Self { start, stop }
    }
}

impl Default for TimeSpan {
    fn default() -> Self {
        Self::new(0.0, 1.0)
    }
}

/// Token selecting an integration method. Forwarded to the backend untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolverStrategy(String);

impl SolverStrategy {
    /// Two-stage Rosenbrock method, suitable for stiff systems.
    pub const DEFAULT_STIFF: &'static str = "ros2";

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SolverStrategy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STIFF)
    }
}

impl fmt::Display for SolverStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SolverStrategy {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// Trajectory produced by one integration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub model: String,
    pub solver: String,
    pub variables: Vec<String>,
    pub times: Vec<f64>,
    /// One row per entry of `times`, columns ordered as `variables`.
    pub values: Vec<Vec<f64>>,
}

impl SimulationResult {
    pub fn start_time(&self) -> Option<f64> {
        self.times.first().copied()
    }

    pub fn end_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    pub fn series(&self, variable: &str) -> Option<Vec<f64>> {
        let column = self.variables.iter().position(|v| v == variable)?;
        Some(self.values.iter().map(|row| row[column]).collect())
    }

    pub fn final_value(&self, variable: &str) -> Option<f64> {
        let column = self.variables.iter().position(|v| v == variable)?;
        self.values.last().map(|row| row[column])
    }
}

/// A flat model together with the function cache produced by the same
/// instantiation. The two are only meaningful as a pair.
#[derive(Debug, Clone)]
pub struct Flattened<Flat, Functions> {
    pub model: Flat,
    pub functions: Functions,
}

/// Source text to flat equation system.
pub trait Frontend {
    /// Syntax tree of one source file.
    type Parsed;
    /// Ordered list of declarations; libraries and models both use this form.
    type Program: Clone;
    /// Flat equation system.
    type Flat;
    /// Auxiliary symbol/function table from instantiation.
    type Functions;

    fn parse(&self, path: &Path) -> Result<Self::Parsed>;

    fn to_program(&self, parsed: Self::Parsed) -> Self::Program;

    /// Builds `library ++ model`; library declarations resolve first.
    fn prepend(&self, library: &Self::Program, model: Self::Program) -> Self::Program;

    fn instantiate(
        &self,
        model: &str,
        program: &Self::Program,
        scalarize: bool,
    ) -> Result<(Self::Flat, Self::Functions)>;

    /// Loads the library registered under `id` into program form.
    fn load_library(&self, id: &str) -> Result<Self::Program>;

    fn load_standard_library(&self, version: &str) -> Result<()>;

    /// Parses `path`, merges the standard library `version` ahead of it and
    /// instantiates `model`, all in one call. Read and parse failures are
    /// reported as [`SourceUnavailable`] or [`SyntaxError`].
    fn flatten_with_standard_library(
        &self,
        model: &str,
        path: &Path,
        version: &str,
        scalarize: bool,
    ) -> Result<(Self::Flat, Self::Functions)>;

    fn to_text(&self, flat: &Self::Flat) -> String;

    fn set_verbose(&mut self, _verbose: bool) {}
}

/// Flat equation system to simulatable artifact and trajectories.
pub trait Backend<Flat> {
    type Artifact;

    fn compile(&self, model: &str, flat: &Flat) -> Result<Self::Artifact>;

    fn integrate(
        &self,
        artifact: &Self::Artifact,
        span: TimeSpan,
        strategy: &SolverStrategy,
    ) -> Result<SimulationResult>;

    fn set_verbose(&mut self, _verbose: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SimulationResult {
        SimulationResult {
            model: "M".to_string(),
            solver: "rk4".to_string(),
            variables: vec!["x".to_string(), "y".to_string()],
            times: vec![0.0, 0.5, 1.0],
            values: vec![vec![1.0, 0.0], vec![2.0, 0.5], vec![3.0, 1.0]],
        }
    }

    #[test]
    fn series_extracts_one_column() {
        let result = sample();
        assert_eq!(result.series("y"), Some(vec![0.0, 0.5, 1.0]));
        assert_eq!(result.series("z"), None);
        assert_eq!(result.final_value("x"), Some(3.0));
        assert_eq!(result.start_time(), Some(0.0));
        assert_eq!(result.end_time(), Some(1.0));
    }

    #[test]
    fn default_strategy_is_the_stiff_method() {
        assert_eq!(SolverStrategy::default().as_str(), "ros2");
        assert_eq!(TimeSpan::default(), TimeSpan::new(0.0, 1.0));
    }
}
