//! Turns a class of a [`Program`] into a [`FlatModel`].
//!
//! Class lookup takes the first declaration with a matching name, walking
//! outward from the class being instantiated to the top level. Since
//! libraries are prepended to user programs, library classes shadow user
//! classes of the same name.

use super::ast::{
    ClassDecl, ClassKind, ComponentDecl, ComponentRef, Element, Expr, Modifier, Program, Variability,
};
use super::flat::{FlatEquation, FlatModel, FlatParameter, FlatVariable, FunctionCache};
use super::parser::is_builtin_function;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::{BTreeMap, HashMap};

const MAX_CONSTANT_DEPTH: usize = 32;

pub fn instantiate(model: &str, program: &Program, scalarize: bool) -> Result<(FlatModel, FunctionCache)> {
    let path: Vec<String> = model.split('.').map(str::to_string).collect();
    let class = find_class(program, &path).ok_or_else(|| anyhow!("class `{}` not found", model))?;
    if class.partial {
        bail!("cannot instantiate partial class `{}`", model);
    }
    if class.kind == ClassKind::Package {
        bail!("cannot instantiate package `{}`", model);
    }

    let mut instantiator = Instantiator {
        program,
        flat: FlatModel::new(model),
        functions: FunctionCache::default(),
        declared: HashMap::new(),
    };
    let mut stack = Vec::new();
    instantiator.instantiate_class(&path, class, "", &Modification::default(), &mut stack)?;
    instantiator.check_references()?;

    let Instantiator { flat, functions, .. } = instantiator;
    let flat = if scalarize { flat.scalarize()? } else { flat };
    Ok((flat, functions))
}

/// Finds a class by its full path, descending into nested classes.
fn find_class<'p>(program: &'p Program, path: &[String]) -> Option<&'p ClassDecl> {
    let (first, rest) = path.split_first()?;
    let mut class = program.classes.iter().find(|c| &c.name == first)?;
    for segment in rest {
        class = class.nested(segment)?;
    }
    Some(class)
}

/// Resolves `name` as seen from inside the class at `scope`.
fn resolve_class<'p>(program: &'p Program, scope: &[String], name: &str) -> Option<(Vec<String>, &'p ClassDecl)> {
    let segments: Vec<String> = name.split('.').map(str::to_string).collect();
    for depth in (0..=scope.len()).rev() {
        let mut candidate = scope[..depth].to_vec();
        candidate.extend(segments.iter().cloned());
        if let Some(class) = find_class(program, &candidate) {
            return Some((candidate, class));
        }
    }
    None
}

/// Modifier with its expressions already resolved in the scope that wrote it.
#[derive(Debug, Clone, Default)]
struct Modification {
    value: Option<Expr>,
    children: BTreeMap<String, Modification>,
}

impl Modification {
    /// Combines two modifications; `outer` wins where both set a value.
    fn merge(outer: &Modification, inner: Modification) -> Modification {
        let mut children = inner.children;
        for (name, child) in &outer.children {
            let merged = match children.remove(name) {
                Some(existing) => Modification::merge(child, existing),
                None => child.clone(),
            };
            children.insert(name.clone(), merged);
        }
        Modification {
            value: outer.value.clone().or(inner.value),
            children,
        }
    }

    fn child(&self, name: &str) -> Modification {
        self.children.get(name).cloned().unwrap_or_default()
    }
}

/// Where an expression was written.
#[derive(Clone, Copy)]
enum Scope<'s, 'p> {
    /// Inside a class being instantiated under `prefix`.
    Instance {
        prefix: &'s str,
        path: &'s [String],
        class: &'p ClassDecl,
    },
    /// Inside the binding of a package constant.
    Package { path: &'s [String], class: &'p ClassDecl },
}

impl<'s, 'p> Scope<'s, 'p> {
    fn path(&self) -> &'s [String] {
        match *self {
            Scope::Instance { path, .. } | Scope::Package { path, .. } => path,
        }
    }
}

fn constant_in<'c>(class: &'c ClassDecl, name: &str) -> Option<&'c ComponentDecl> {
    class
        .component(name)
        .filter(|c| c.variability == Variability::Constant)
}

struct Instantiator<'p> {
    program: &'p Program,
    flat: FlatModel,
    functions: FunctionCache,
    /// Flat name to array size.
    declared: HashMap<String, Option<usize>>,
}

impl<'p> Instantiator<'p> {
    fn instantiate_class(
        &mut self,
        path: &[String],
        class: &'p ClassDecl,
        prefix: &str,
        modification: &Modification,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        let qualified = path.join(".");
        if stack.contains(&qualified) {
            bail!("class `{}` contains or extends itself", qualified);
        }
        stack.push(qualified.clone());
        self.functions.record_class(qualified);

        let context = Scope::Instance { prefix, path, class };

        for element in &class.elements {
            match element {
                Element::Class(_) => {}
                Element::Extends(clause) => {
                    let (base_path, base) = resolve_class(self.program, path, &clause.base)
                        .ok_or_else(|| anyhow!("base class `{}` not found", clause.base))?;
                    let local = self.resolve_modifiers(&clause.modifiers, context)?;
                    let merged = Modification::merge(modification, local);
                    self.instantiate_class(&base_path, base, prefix, &merged, stack)?;
                }
                Element::Component(decl) => {
                    let local = Modification {
                        value: decl
                            .binding
                            .as_ref()
                            .map(|binding| self.resolve_expr(binding, context, 0))
                            .transpose()?,
                        children: self.resolve_modifiers(&decl.modifiers, context)?.children,
                    };
                    let merged = Modification::merge(&modification.child(&decl.name), local);
                    let name = format!("{}{}", prefix, decl.name);

                    if decl.is_builtin_type() {
                        self.declare(&name, decl.size)?;
                        match decl.variability {
                            Variability::Parameter | Variability::Constant => {
                                if decl.size.is_some() {
                                    bail!("array parameter `{}` is not supported", name);
                                }
                                let binding = merged
                                    .value
                                    .ok_or_else(|| anyhow!("parameter `{}` has no value", name))?;
                                self.flat.parameters.push(FlatParameter {
                                    name,
                                    binding,
                                    constant: decl.variability == Variability::Constant,
                                });
                            }
                            Variability::Continuous => {
                                let start = merged.child("start").value;
                                self.flat.variables.push(FlatVariable {
                                    name: name.clone(),
                                    size: decl.size,
                                    start,
                                });
                                if let Some(value) = merged.value {
                                    self.flat.equations.push(FlatEquation {
                                        lhs: Expr::Ref(ComponentRef::new(name)),
                                        rhs: value,
                                    });
                                }
                            }
                        }
                    } else {
                        if decl.size.is_some() {
                            bail!("array of components `{}` is not supported", name);
                        }
                        let (type_path, type_class) = resolve_class(self.program, path, &decl.type_name)
                            .ok_or_else(|| anyhow!("type `{}` of `{}` not found", decl.type_name, name))?;
                        if type_class.kind == ClassKind::Package || type_class.partial {
                            bail!("component `{}` cannot have type `{}`", name, decl.type_name);
                        }
                        let nested_prefix = format!("{}.", name);
                        self.instantiate_class(&type_path, type_class, &nested_prefix, &merged, stack)
                            .with_context(|| format!("in component `{}`", name))?;
                    }
                }
            }
        }

        for equation in &class.equations {
            let lhs = self.resolve_expr(&equation.lhs, context, 0)?;
            let rhs = self.resolve_expr(&equation.rhs, context, 0)?;
            self.flat.equations.push(FlatEquation { lhs, rhs });
        }

        stack.pop();
        Ok(())
    }

    fn declare(&mut self, name: &str, size: Option<usize>) -> Result<()> {
        if self.declared.insert(name.to_string(), size).is_some() {
            bail!("duplicate declaration of `{}`", name);
        }
        Ok(())
    }

    fn resolve_modifiers(&mut self, modifiers: &[Modifier], context: Scope<'_, 'p>) -> Result<Modification> {
        let mut resolved = Modification::default();
        for modifier in modifiers {
            let value = modifier
                .value
                .as_ref()
                .map(|value| self.resolve_expr(value, context, 0))
                .transpose()?;
            let children = self.resolve_modifiers(&modifier.children, context)?.children;
            resolved
                .children
                .insert(modifier.name.clone(), Modification { value, children });
        }
        Ok(resolved)
    }

    fn resolve_expr(&mut self, expr: &Expr, context: Scope<'_, 'p>, depth: usize) -> Result<Expr> {
        Ok(match expr {
            Expr::Number(n) => Expr::Number(*n),
            Expr::Time => Expr::Time,
            Expr::Ref(cref) => self.resolve_ref(cref, context, depth)?,
            Expr::Der(cref) => match self.resolve_ref(cref, context, depth)? {
                Expr::Ref(resolved) => Expr::Der(resolved),
                _ => bail!("der() applied to constant `{}`", cref),
            },
            Expr::Binary(lhs, op, rhs) => Expr::binary(
                self.resolve_expr(lhs, context, depth)?,
                *op,
                self.resolve_expr(rhs, context, depth)?,
            ),
            Expr::Neg(inner) => Expr::Neg(Box::new(self.resolve_expr(inner, context, depth)?)),
            Expr::Call(name, args) => {
                if !is_builtin_function(name) {
                    bail!("unknown function `{}`", name);
                }
                if args.len() != 1 {
                    bail!("function `{}` takes 1 argument, got {}", name, args.len());
                }
                self.functions.record_function(name, args.len());
                Expr::Call(
                    name.clone(),
                    args.iter()
                        .map(|arg| self.resolve_expr(arg, context, depth))
                        .collect::<Result<_>>()?,
                )
            }
        })
    }

    fn resolve_ref(&mut self, cref: &ComponentRef, context: Scope<'_, 'p>, depth: usize) -> Result<Expr> {
        if let Scope::Instance { prefix, path, class } = context {
            if self.is_local(class, path, cref.head(), &mut Vec::new()) {
                return Ok(Expr::Ref(ComponentRef {
                    name: format!("{}{}", prefix, cref.name),
                    index: cref.index,
                }));
            }
        }

        if cref.index.is_some() {
            bail!("unknown array `{}`", cref.name);
        }
        let (scope, class, constant) = self
            .lookup_constant(context, &cref.name)
            .ok_or_else(|| anyhow!("unknown identifier `{}`", cref.name))?;
        if depth >= MAX_CONSTANT_DEPTH {
            bail!("constant `{}` is defined in terms of itself", cref.name);
        }
        let binding = constant
            .binding
            .as_ref()
            .ok_or_else(|| anyhow!("constant `{}` has no value", cref.name))?;
        let package = Scope::Package { path: &scope, class };
        self.resolve_expr(binding, package, depth + 1)
    }

    /// True when `name` is a component declared in `class` or inherited by it.
    fn is_local(&self, class: &'p ClassDecl, scope: &[String], name: &str, seen: &mut Vec<String>) -> bool {
        if class.component(name).is_some() {
            return true;
        }
        for element in &class.elements {
            if let Element::Extends(clause) = element {
                if let Some((base_path, base)) = resolve_class(self.program, scope, &clause.base) {
                    let key = base_path.join(".");
                    if seen.contains(&key) {
                        continue;
                    }
                    seen.push(key);
                    if self.is_local(base, &base_path, name, seen) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Finds a `constant` either qualified (`Pkg.c`) or in an enclosing class.
    fn lookup_constant(
        &self,
        context: Scope<'_, 'p>,
        name: &str,
    ) -> Option<(Vec<String>, &'p ClassDecl, &'p ComponentDecl)> {
        let scope = context.path();

        match name.rsplit_once('.') {
            None => {
                if let Scope::Package { class, .. } = context {
                    if let Some(constant) = constant_in(class, name) {
                        return Some((scope.to_vec(), class, constant));
                    }
                }
                for depth in (1..scope.len()).rev() {
                    let enclosing = &scope[..depth];
                    if let Some(class) = find_class(self.program, enclosing) {
                        if let Some(constant) = constant_in(class, name) {
                            return Some((enclosing.to_vec(), class, constant));
                        }
                    }
                }
                None
            }
            Some((package, component)) => {
                let (path, class) = resolve_class(self.program, scope, package)?;
                let constant = constant_in(class, component)?;
                Some((path, class, constant))
            }
        }
    }

    /// Every reference in the flat model must name a declared scalar or array.
    fn check_references(&self) -> Result<()> {
        let check = |expr: &Expr| -> Result<()> {
            let mut failure = None;
            expr.visit_refs(&mut |cref| {
                if failure.is_some() {
                    return;
                }
                failure = match self.declared.get(&cref.name) {
                    None => Some(format!("unknown variable `{}`", cref.name)),
                    Some(None) if cref.index.is_some() => Some(format!("`{}` is not an array", cref.name)),
                    Some(Some(n)) if cref.index.is_some_and(|i| i == 0 || i > *n) => {
                        Some(format!("subscript out of range in `{}`", cref))
                    }
                    _ => None,
                };
            });
            match failure {
                Some(message) => Err(anyhow!(message)),
                None => Ok(()),
            }
        };

        for parameter in &self.flat.parameters {
            check(&parameter.binding).with_context(|| format!("in binding of `{}`", parameter.name))?;
        }
        for variable in &self.flat.variables {
            if let Some(start) = &variable.start {
                check(start).with_context(|| format!("in start value of `{}`", variable.name))?;
            }
        }
        for equation in &self.flat.equations {
            check(&equation.lhs)?;
            check(&equation.rhs)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::parse_source;
    use std::path::Path;

    fn program(source: &str) -> Program {
        Program::from_parsed(parse_source(Path::new("test.mo"), source).expect("parse"))
    }

    const LIBRARY: &str = r#"
        package Lib
          constant Real two = 2.0;
          constant Real four = two * two;
          model Spring
            parameter Real k = 1.0;
            Real x(start = 1.0);
            Real v;
          equation
            der(x) = v;
            der(v) = -k * x;
          end Spring;
          partial model Base
            parameter Real rate = four;
            Real y(start = 0.0);
          end Base;
        end Lib;
    "#;

    #[test]
    fn flattens_subcomponents_with_dotted_names_and_modifiers() {
        let source = format!(
            "{}\nmodel System\n  parameter Real stiffness = 3.0;\n  Lib.Spring s(k = stiffness, x(start = 0.25));\nend System;",
            LIBRARY
        );
        let (flat, functions) = instantiate("System", &program(&source), true).expect("instantiate");

        assert_eq!(flat.name, "System");
        let k = flat.parameter("s.k").expect("s.k");
        assert_eq!(k.binding.to_string(), "stiffness");
        assert_eq!(
            flat.variable("s.x").and_then(|v| v.start.clone()),
            Some(Expr::Number(0.25))
        );
        assert_eq!(flat.equations.len(), 2);
        assert_eq!(flat.equations[1].lhs.to_string(), "der(s.v)");
        assert_eq!(flat.equations[1].rhs.to_string(), "-s.k * s.x");
        assert!(functions.classes.contains("Lib.Spring"));
    }

    #[test]
    fn extends_inlines_base_and_package_constants() {
        let source = format!(
            "{}\nmodel Decay\n  extends Lib.Base(rate = Lib.two);\nequation\n  der(y) = -rate * y + sin(time);\nend Decay;",
            LIBRARY
        );
        let (flat, functions) = instantiate("Decay", &program(&source), true).expect("instantiate");
        assert_eq!(flat.parameter("rate").map(|p| p.binding.clone()), Some(Expr::Number(2.0)));
        assert!(functions.contains_function("sin"));

        let unmodified = format!(
            "{}\nmodel Plain\n  extends Lib.Base;\nequation\n  der(y) = rate;\nend Plain;",
            LIBRARY
        );
        let (flat, _) = instantiate("Plain", &program(&unmodified), true).expect("instantiate");
        assert_eq!(flat.parameter("rate").map(|p| p.binding.to_string()), Some("2.0 * 2.0".to_string()));
    }

    #[test]
    fn first_declaration_wins() {
        let source = "model M Real x(start = 1); equation der(x) = 1; end M;\n\
                      model M Real z; equation der(z) = 2; end M;";
        let (flat, _) = instantiate("M", &program(source), true).expect("instantiate");
        assert!(flat.variable("x").is_some());
        assert!(flat.variable("z").is_none());
    }

    #[test]
    fn rejects_unknown_identifiers_and_functions() {
        let err = instantiate("M", &program("model M Real x; equation der(x) = y; end M;"), true)
            .expect_err("unknown identifier");
        assert!(format!("{:#}", err).contains("unknown identifier `y`"));

        let err = instantiate("M", &program("model M Real x; equation der(x) = foo(x); end M;"), true)
            .expect_err("unknown function");
        assert!(err.to_string().contains("unknown function `foo`"));
    }

    #[test]
    fn rejects_missing_partial_and_recursive_classes() {
        let p = program(LIBRARY);
        assert!(instantiate("Missing", &p, true).is_err());
        assert!(instantiate("Lib.Base", &p, true).is_err());
        assert!(instantiate("Lib", &p, true).is_err());

        let recursive = program("model R extends R; end R;");
        let err = instantiate("R", &recursive, true).expect_err("cycle");
        assert!(err.to_string().contains("itself"));
    }

    #[test]
    fn parameters_require_values() {
        let err = instantiate("M", &program("model M parameter Real p; end M;"), true)
            .expect_err("missing value");
        assert!(err.to_string().contains("has no value"));
    }

    #[test]
    fn rejects_bad_subscripts() {
        let err = instantiate("M", &program("model M Real y; equation der(y) = y[1]; end M;"), false)
            .expect_err("scalar subscripted");
        assert!(err.to_string().contains("`y` is not an array"), "{}", err);

        let err = instantiate("M", &program("model M Real x[2]; equation der(x) = -x[3]; end M;"), false)
            .expect_err("out of range");
        assert!(err.to_string().contains("subscript out of range in `x[3]`"), "{}", err);
    }

    #[test]
    fn scalarize_flag_controls_array_expansion() {
        let source = "model A Real x[2](each start = 1); equation der(x) = -x; end A;";
        let (kept, _) = instantiate("A", &program(source), false).expect("instantiate");
        assert_eq!(kept.variables.len(), 1);
        assert_eq!(kept.equations.len(), 1);

        let (expanded, _) = instantiate("A", &program(source), true).expect("instantiate");
        assert_eq!(expanded.variables.len(), 2);
        assert_eq!(expanded.equations.len(), 2);
    }
}
