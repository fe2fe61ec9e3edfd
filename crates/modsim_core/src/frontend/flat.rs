use super::ast::{ComponentRef, Expr};
use anyhow::{anyhow, bail, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct FlatParameter {
    pub name: String,
    pub binding: Expr,
    pub constant: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatVariable {
    pub name: String,
    /// `Some(n)` for an array of `n` scalars; `None` once scalarized.
    pub size: Option<usize>,
    pub start: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatEquation {
    pub lhs: Expr,
    pub rhs: Expr,
}

/// Hierarchy-free equation system. Every name is fully qualified with the
/// dotted path of the component that declared it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlatModel {
    pub name: String,
    pub parameters: Vec<FlatParameter>,
    pub variables: Vec<FlatVariable>,
    pub equations: Vec<FlatEquation>,
}

impl FlatModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_scalarized(&self) -> bool {
        self.variables.iter().all(|v| v.size.is_none())
    }

    pub fn parameter(&self, name: &str) -> Option<&FlatParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&FlatVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Expands array variables into indexed scalars and array equations into
    /// one equation per element. Scalar models are returned unchanged.
    pub fn scalarize(&self) -> Result<FlatModel> {
        let sizes: HashMap<&str, usize> = self
            .variables
            .iter()
            .filter_map(|v| v.size.map(|n| (v.name.as_str(), n)))
            .collect();

        let mut variables = Vec::new();
        for variable in &self.variables {
            match variable.size {
                None => variables.push(variable.clone()),
                Some(n) => {
                    for i in 1..=n {
                        variables.push(FlatVariable {
                            name: format!("{}[{}]", variable.name, i),
                            size: None,
                            start: variable.start.clone(),
                        });
                    }
                }
            }
        }

        let mut equations = Vec::new();
        for equation in &self.equations {
            let mut width: Option<usize> = None;
            let mut mismatch = None;
            let mut visit = |cref: &ComponentRef| {
                if cref.index.is_some() {
                    return;
                }
                if let Some(&n) = sizes.get(cref.name.as_str()) {
                    match width {
                        None => width = Some(n),
                        Some(w) if w != n => mismatch = Some((w, n)),
                        _ => {}
                    }
                }
            };
            equation.lhs.visit_refs(&mut visit);
            equation.rhs.visit_refs(&mut visit);

            if let Some((a, b)) = mismatch {
                bail!(
                    "array sizes {} and {} do not match in `{} = {}`",
                    a,
                    b,
                    equation.lhs,
                    equation.rhs
                );
            }

            let expand = |expr: &Expr, element: Option<usize>| {
                expr.try_map_refs(&mut |cref: &ComponentRef| -> Result<Expr> {
                    let scalar = match (cref.index, sizes.get(cref.name.as_str())) {
                        (Some(i), Some(&n)) if i > n => {
                            return Err(anyhow!("subscript {} out of range for `{}`", i, cref.name))
                        }
                        (Some(_), None) => {
                            return Err(anyhow!("`{}` is not an array", cref.name))
                        }
                        (Some(_), Some(_)) => cref.flat_name(),
                        (None, Some(_)) => match element {
                            Some(i) => format!("{}[{}]", cref.name, i),
                            None => cref.name.clone(),
                        },
                        (None, None) => cref.name.clone(),
                    };
                    Ok(Expr::Ref(ComponentRef::new(scalar)))
                })
            };

            match width {
                None => equations.push(FlatEquation {
                    lhs: expand(&equation.lhs, None)?,
                    rhs: expand(&equation.rhs, None)?,
                }),
                Some(n) => {
                    for i in 1..=n {
                        equations.push(FlatEquation {
                            lhs: expand(&equation.lhs, Some(i))?,
                            rhs: expand(&equation.rhs, Some(i))?,
                        });
                    }
                }
            }
        }

        Ok(FlatModel {
            name: self.name.clone(),
            parameters: self.parameters.clone(),
            variables,
            equations,
        })
    }
}

impl fmt::Display for FlatModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "class {}", self.name)?;
        for parameter in &self.parameters {
            let prefix = if parameter.constant { "constant" } else { "parameter" };
            writeln!(
                f,
                "  {} Real {} = {};",
                prefix, parameter.name, parameter.binding
            )?;
        }
        for variable in &self.variables {
            write!(f, "  Real {}", variable.name)?;
            if let Some(n) = variable.size {
                write!(f, "[{}]", n)?;
            }
            if let Some(start) = &variable.start {
                write!(f, "(start = {})", start)?;
            }
            writeln!(f, ";")?;
        }
        writeln!(f, "equation")?;
        for equation in &self.equations {
            writeln!(f, "  {} = {};", equation.lhs, equation.rhs)?;
        }
        write!(f, "end {};", self.name)
    }
}

/// Functions and classes referenced while instantiating one model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionCache {
    /// Function name to arity.
    pub functions: BTreeMap<String, usize>,
    /// Fully qualified names of the classes that contributed declarations.
    pub classes: BTreeSet<String>,
}

impl FunctionCache {
    pub fn record_function(&mut self, name: &str, arity: usize) {
        self.functions.insert(name.to_string(), arity);
    }

    pub fn record_class(&mut self, name: impl Into<String>) {
        self.classes.insert(name.into());
    }

    pub fn contains_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::BinaryOp;

    fn var(name: &str) -> Expr {
        Expr::Ref(ComponentRef::new(name))
    }

    fn array_model() -> FlatModel {
        let mut model = FlatModel::new("Decay");
        model.parameters.push(FlatParameter {
            name: "k".to_string(),
            binding: Expr::Number(2.0),
            constant: false,
        });
        model.variables.push(FlatVariable {
            name: "x".to_string(),
            size: Some(3),
            start: Some(Expr::Number(1.0)),
        });
        model.equations.push(FlatEquation {
            lhs: Expr::Der(ComponentRef::new("x")),
            rhs: Expr::Neg(Box::new(Expr::binary(var("k"), BinaryOp::Mul, var("x")))),
        });
        model
    }

    #[test]
    fn scalarize_expands_arrays_and_array_equations() {
        let scalar = array_model().scalarize().expect("scalarize");
        assert!(scalar.is_scalarized());
        assert_eq!(scalar.variables.len(), 3);
        assert_eq!(scalar.variables[2].name, "x[3]");
        assert_eq!(scalar.equations.len(), 3);
        assert_eq!(scalar.equations[1].lhs.to_string(), "der(x[2])");
        assert_eq!(scalar.equations[1].rhs.to_string(), "-(k * x[2])");
    }

    #[test]
    fn scalarize_rejects_out_of_range_subscripts() {
        let mut model = array_model();
        model.equations.push(FlatEquation {
            lhs: Expr::Ref(ComponentRef::indexed("x", 4)),
            rhs: Expr::Number(0.0),
        });
        let err = model.scalarize().expect_err("out of range");
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn text_rendering_is_stable() {
        let text = array_model().to_string();
        assert_eq!(
            text,
            "class Decay\n  parameter Real k = 2.0;\n  Real x[3](start = 1.0);\nequation\n  der(x) = -(k * x);\nend Decay;"
        );
        assert_eq!(text, array_model().to_string());
    }
}
