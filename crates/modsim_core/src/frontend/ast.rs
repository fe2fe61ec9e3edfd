use std::fmt;
use std::path::PathBuf;

/// Reference to a component, optionally subscripted: `a.b.c` or `x[2]`.
/// Subscripts are 1-based, as written in source.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentRef {
    pub name: String,
    pub index: Option<usize>,
}

impl ComponentRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }

    pub fn indexed(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index: Some(index),
        }
    }

    /// Name of the scalar this reference denotes after scalarization.
    pub fn flat_name(&self) -> String {
        match self.index {
            Some(i) => format!("{}[{}]", self.name, i),
            None => self.name.clone(),
        }
    }

    /// First segment of a dotted name.
    pub fn head(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.flat_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
            BinaryOp::Pow => 4,
        }
    }
}

/// Expression tree shared by source declarations and flat models.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Ref(ComponentRef),
    Time,
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Neg(Box<Expr>),
    Call(String, Vec<Expr>),
    Der(ComponentRef),
}

impl Expr {
    pub fn binary(lhs: Expr, op: BinaryOp, rhs: Expr) -> Self {
        Expr::Binary(Box::new(lhs), op, Box::new(rhs))
    }

    /// Applies `f` to every component reference, including the argument of `der`.
    pub fn try_map_refs<E>(
        &self,
        f: &mut impl FnMut(&ComponentRef) -> Result<Expr, E>,
    ) -> Result<Expr, E> {
        Ok(match self {
            Expr::Number(n) => Expr::Number(*n),
            Expr::Time => Expr::Time,
            Expr::Ref(cref) => f(cref)?,
            Expr::Der(cref) => match f(cref)? {
                Expr::Ref(mapped) => Expr::Der(mapped),
                other => other,
            },
            Expr::Binary(lhs, op, rhs) => Expr::binary(lhs.try_map_refs(f)?, *op, rhs.try_map_refs(f)?),
            Expr::Neg(inner) => Expr::Neg(Box::new(inner.try_map_refs(f)?)),
            Expr::Call(name, args) => Expr::Call(
                name.clone(),
                args.iter()
                    .map(|arg| arg.try_map_refs(f))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Visits every component reference; `der(x)` reports `x`.
    pub fn visit_refs(&self, f: &mut impl FnMut(&ComponentRef)) {
        match self {
            Expr::Number(_) | Expr::Time => {}
            Expr::Ref(cref) | Expr::Der(cref) => f(cref),
            Expr::Binary(lhs, _, rhs) => {
                lhs.visit_refs(f);
                rhs.visit_refs(f);
            }
            Expr::Neg(inner) => inner.visit_refs(f),
            Expr::Call(_, args) => args.iter().for_each(|arg| arg.visit_refs(f)),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary(_, op, _) => op.precedence(),
            Expr::Neg(_) => 3,
            _ => 5,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

/// Prints `1` as `1.0` so literals read as Real in the rendered text.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => f.write_str(&format_number(*n)),
            Expr::Ref(cref) => write!(f, "{}", cref),
            Expr::Time => f.write_str("time"),
            Expr::Der(cref) => write!(f, "der({})", cref),
            Expr::Neg(inner) => {
                f.write_str("-")?;
                inner.fmt_operand(f, 4)
            }
            Expr::Call(name, args) => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Expr::Binary(lhs, op, rhs) => {
                let p = op.precedence();
                lhs.fmt_operand(f, p)?;
                write!(f, " {} ", op.symbol())?;
                // Right operands of non-commutative operators bind tighter.
                rhs.fmt_operand(f, p + 1)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Model,
    Block,
    Class,
    Record,
    Connector,
    Package,
}

impl ClassKind {
    pub fn from_keyword(word: &str) -> Option<Self> {
        Some(match word {
            "model" => ClassKind::Model,
            "block" => ClassKind::Block,
            "class" => ClassKind::Class,
            "record" => ClassKind::Record,
            "connector" => ClassKind::Connector,
            "package" => ClassKind::Package,
            _ => return None,
        })
    }

    pub fn keyword(self) -> &'static str {
        match self {
            ClassKind::Model => "model",
            ClassKind::Block => "block",
            ClassKind::Class => "class",
            ClassKind::Record => "record",
            ClassKind::Connector => "connector",
            ClassKind::Package => "package",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variability {
    Continuous,
    Parameter,
    Constant,
}

/// `name(children) = value`, possibly prefixed with `each`.
#[derive(Debug, Clone, PartialEq)]
pub struct Modifier {
    pub name: String,
    pub each: bool,
    pub value: Option<Expr>,
    pub children: Vec<Modifier>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtendsClause {
    pub base: String,
    pub modifiers: Vec<Modifier>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDecl {
    pub name: String,
    pub type_name: String,
    pub variability: Variability,
    pub size: Option<usize>,
    pub modifiers: Vec<Modifier>,
    pub binding: Option<Expr>,
    pub description: Option<String>,
}

impl ComponentDecl {
    pub fn is_builtin_type(&self) -> bool {
        matches!(self.type_name.as_str(), "Real" | "Integer" | "Boolean")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Extends(ExtendsClause),
    Component(ComponentDecl),
    Class(ClassDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub lhs: Expr,
    pub rhs: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub kind: ClassKind,
    pub partial: bool,
    pub description: Option<String>,
    pub elements: Vec<Element>,
    pub equations: Vec<Equation>,
}

impl ClassDecl {
    pub fn nested(&self, name: &str) -> Option<&ClassDecl> {
        self.elements.iter().find_map(|element| match element {
            Element::Class(class) if class.name == name => Some(class),
            _ => None,
        })
    }

    pub fn component(&self, name: &str) -> Option<&ComponentDecl> {
        self.elements.iter().find_map(|element| match element {
            Element::Component(component) if component.name == name => Some(component),
            _ => None,
        })
    }

    fn strip_descriptions(&mut self) {
        self.description = None;
        for element in &mut self.elements {
            match element {
                Element::Component(component) => component.description = None,
                Element::Class(class) => class.strip_descriptions(),
                Element::Extends(_) => {}
            }
        }
    }
}

/// Syntax tree of one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProgram {
    pub path: PathBuf,
    pub classes: Vec<ClassDecl>,
}

/// Ordered declaration list consumed by instantiation. Libraries and user
/// models share this form so they can be concatenated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub classes: Vec<ClassDecl>,
}

impl Program {
    /// Drops documentation strings, which carry no meaning past parsing.
    pub fn from_parsed(parsed: ParsedProgram) -> Self {
        let mut classes = parsed.classes;
        for class in &mut classes {
            class.strip_descriptions();
        }
        Self { classes }
    }

    /// `library ++ model`. Lookups take the first match, so library
    /// declarations win over same-named model declarations.
    pub fn prepend(library: &Program, model: Program) -> Program {
        let mut classes = library.classes.clone();
        classes.extend(model.classes);
        Program { classes }
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::Ref(ComponentRef::new(name))
    }

    #[test]
    fn display_parenthesizes_by_precedence() {
        let expr = Expr::binary(
            Expr::binary(var("a"), BinaryOp::Add, var("b")),
            BinaryOp::Mul,
            Expr::binary(var("c"), BinaryOp::Sub, Expr::Number(1.0)),
        );
        assert_eq!(expr.to_string(), "(a + b) * (c - 1.0)");

        let nested = Expr::binary(
            var("a"),
            BinaryOp::Sub,
            Expr::binary(var("b"), BinaryOp::Sub, var("c")),
        );
        assert_eq!(nested.to_string(), "a - (b - c)");
    }

    #[test]
    fn negation_and_calls_render_like_source() {
        let expr = Expr::Neg(Box::new(Expr::binary(
            var("g"),
            BinaryOp::Mul,
            Expr::Call("sin".to_string(), vec![var("theta")]),
        )));
        assert_eq!(expr.to_string(), "-(g * sin(theta))");
        assert_eq!(Expr::Der(ComponentRef::indexed("x", 2)).to_string(), "der(x[2])");
    }

    #[test]
    fn prepend_puts_library_first() {
        let class = |name: &str| ClassDecl {
            name: name.to_string(),
            kind: ClassKind::Model,
            partial: false,
            description: None,
            elements: Vec::new(),
            equations: Vec::new(),
        };
        let library = Program {
            classes: vec![class("Lib")],
        };
        let model = Program {
            classes: vec![class("M")],
        };
        let merged = Program::prepend(&library, model);
        assert_eq!(merged.class_names(), vec!["Lib", "M"]);
    }
}
