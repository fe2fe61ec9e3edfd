//! Reference backend: compiles flat models to bytecode and integrates them.

pub mod bytecode;
pub mod integrate;
pub mod solvers;
pub mod system;

pub use integrate::{Method, RunStatistics};
pub use system::{CompiledModel, EquationSystem};

use crate::collaborators::{Backend, SimulationResult, SolverStrategy, TimeSpan};
use crate::frontend::ast::{ComponentRef, Expr};
use crate::frontend::flat::FlatModel;
use anyhow::{anyhow, bail, Context, Result};
use bytecode::Compiler;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    /// Number of output intervals; every interval is one solver step.
    pub intervals: usize,
    pub newton_tolerance: f64,
    pub newton_max_steps: usize,
    /// Eigenvalue spread above which `auto` picks the stiff method.
    pub stiffness_threshold: f64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            intervals: 500,
            newton_tolerance: 1e-10,
            newton_max_steps: 25,
            stiffness_threshold: 1e3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceBackend {
    settings: IntegratorSettings,
    verbose: bool,
}

impl ReferenceBackend {
    pub fn new(settings: IntegratorSettings) -> Self {
        Self {
            settings,
            verbose: false,
        }
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }
}

/// How one equation contributes to the system.
enum Definition {
    Derivative(String, Expr),
    Algebraic(String, Expr),
}

fn classify(lhs: &Expr, rhs: &Expr, variables: &HashSet<&str>) -> Option<Definition> {
    match lhs {
        Expr::Der(cref) => Some(Definition::Derivative(cref.flat_name(), rhs.clone())),
        Expr::Ref(cref) if variables.contains(cref.flat_name().as_str()) => {
            Some(Definition::Algebraic(cref.flat_name(), rhs.clone()))
        }
        _ => None,
    }
}

fn references(expr: &Expr) -> Vec<String> {
    let mut names = Vec::new();
    expr.visit_refs(&mut |cref: &ComponentRef| names.push(cref.flat_name()));
    names
}

/// Evaluates parameter bindings in dependency order.
fn evaluate_parameters(flat: &FlatModel) -> Result<HashMap<String, f64>> {
    let mut known = HashMap::new();
    let mut pending: Vec<_> = flat.parameters.iter().collect();

    while !pending.is_empty() {
        let before = pending.len();
        let mut deferred = Vec::new();
        for parameter in pending {
            if references(&parameter.binding).iter().all(|name| known.contains_key(name)) {
                let value = bytecode::evaluate(&parameter.binding, &known)
                    .with_context(|| format!("in binding of `{}`", parameter.name))?;
                known.insert(parameter.name.clone(), value);
            } else {
                deferred.push(parameter);
            }
        }
        if deferred.len() == before {
            let names: Vec<_> = deferred.iter().map(|p| p.name.as_str()).collect();
            bail!(
                "parameters {} depend on variables or on each other cyclically",
                names.join(", ")
            );
        }
        pending = deferred;
    }
    Ok(known)
}

/// Orders algebraic definitions so each is computed after its inputs.
fn sort_algebraics(definitions: &HashMap<String, Expr>, declared: &[String]) -> Result<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        name: &str,
        definitions: &HashMap<String, Expr>,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| n == name).unwrap_or(0);
                bail!("algebraic loop: {} -> {}", path[start..].join(" -> "), name);
            }
            None => {}
        }
        marks.insert(name.to_string(), Mark::Visiting);
        path.push(name.to_string());
        if let Some(expr) = definitions.get(name) {
            for dependency in references(expr) {
                if definitions.contains_key(&dependency) {
                    visit(&dependency, definitions, marks, path, order)?;
                }
            }
        }
        path.pop();
        marks.insert(name.to_string(), Mark::Done);
        order.push(name.to_string());
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut order = Vec::new();
    for name in declared.iter().filter(|n| definitions.contains_key(*n)) {
        visit(name, definitions, &mut marks, &mut Vec::new(), &mut order)?;
    }
    Ok(order)
}

impl Backend<FlatModel> for ReferenceBackend {
    type Artifact = CompiledModel;

    fn compile(&self, model: &str, flat: &FlatModel) -> Result<CompiledModel> {
        let flat = flat.scalarize()?;
        let parameters = evaluate_parameters(&flat)?;

        let declared: Vec<String> = flat.variables.iter().map(|v| v.name.clone()).collect();
        let variables: HashSet<&str> = declared.iter().map(String::as_str).collect();

        let mut derivatives: HashMap<String, Expr> = HashMap::new();
        let mut algebraics: HashMap<String, Expr> = HashMap::new();
        for equation in &flat.equations {
            let definition = classify(&equation.lhs, &equation.rhs, &variables)
                .or_else(|| classify(&equation.rhs, &equation.lhs, &variables))
                .ok_or_else(|| {
                    anyhow!(
                        "equation `{} = {}` does not define a derivative or a variable",
                        equation.lhs,
                        equation.rhs
                    )
                })?;
            let (target, name, expr) = match definition {
                Definition::Derivative(name, expr) => (&mut derivatives, name, expr),
                Definition::Algebraic(name, expr) => (&mut algebraics, name, expr),
            };
            if !variables.contains(name.as_str()) {
                bail!("der({}) refers to an undeclared variable", name);
            }
            if target.insert(name.clone(), expr).is_some() {
                bail!("`{}` is defined by more than one equation", name);
            }
        }

        for name in &declared {
            match (derivatives.contains_key(name), algebraics.contains_key(name)) {
                (true, true) => bail!("`{}` has both a derivative and an algebraic equation", name),
                (false, false) => bail!("no equation determines `{}`", name),
                _ => {}
            }
        }

        let states: Vec<String> = declared
            .iter()
            .filter(|name| derivatives.contains_key(*name))
            .cloned()
            .collect();
        let algebraic_order = sort_algebraics(&algebraics, &declared)?;

        let mut initial_state = Vec::with_capacity(states.len());
        for name in &states {
            let start = match flat.variable(name).and_then(|v| v.start.as_ref()) {
                Some(expr) => bytecode::evaluate(expr, &parameters)
                    .with_context(|| format!("in start value of `{}`", name))?,
                None => 0.0,
            };
            initial_state.push(start);
        }

        let slots: Vec<String> = states.iter().chain(&algebraic_order).cloned().collect();
        let compiler = Compiler::new(&slots, &parameters);
        let algebraic_code = algebraic_order
            .iter()
            .map(|name| {
                compiler
                    .compile(&algebraics[name])
                    .with_context(|| format!("in equation for `{}`", name))
            })
            .collect::<Result<Vec<_>>>()?;
        let derivative_code = states
            .iter()
            .map(|name| {
                compiler
                    .compile(&derivatives[name])
                    .with_context(|| format!("in equation for der({})", name))
            })
            .collect::<Result<Vec<_>>>()?;

        if self.verbose {
            debug!(
                "compiled {}: {} states, {} algebraic variables, {} parameters",
                model,
                states.len(),
                algebraic_order.len(),
                parameters.len()
            );
        }

        let parameters = flat
            .parameters
            .iter()
            .filter_map(|p| parameters.get(&p.name).map(|v| (p.name.clone(), *v)))
            .collect();

        Ok(CompiledModel {
            name: model.to_string(),
            states,
            algebraics: algebraic_order,
            initial_state,
            parameters,
            algebraic_code,
            derivative_code,
        })
    }

    fn integrate(&self, artifact: &CompiledModel, span: TimeSpan, strategy: &SolverStrategy) -> Result<SimulationResult> {
        let (result, stats) = integrate::integrate(artifact, span, strategy, &self.settings)?;
        if self.verbose {
            debug!(
                "integrated {} with {}: {} steps of {}{}",
                artifact.name,
                stats.method.token(),
                stats.steps,
                stats.step_size,
                stats
                    .stiffness_ratio
                    .map(|r| format!(", stiffness ratio {:.3e}", r))
                    .unwrap_or_default()
            );
        }
        Ok(result)
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }
}
