use crate::frontend::ast::{BinaryOp, Expr};
use crate::traits::Scalar;
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Abs,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Builtin::Sin,
            "cos" => Builtin::Cos,
            "tan" => Builtin::Tan,
            "exp" => Builtin::Exp,
            "log" => Builtin::Log,
            "sqrt" => Builtin::Sqrt,
            "abs" => Builtin::Abs,
            _ => return None,
        })
    }

    fn apply<T: Scalar>(self, a: T) -> T {
        match self {
            Builtin::Sin => a.sin(),
            Builtin::Cos => a.cos(),
            Builtin::Tan => a.tan(),
            Builtin::Exp => a.exp(),
            Builtin::Log => a.ln(),
            Builtin::Sqrt => a.sqrt(),
            Builtin::Abs => a.abs(),
        }
    }
}

/// OpCodes for the stack-based virtual machine.
/// The VM operates on a stack of `Scalar` values (f64 or Dual).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant. Parameters are folded into constants at compile time.
    LoadConst(f64),
    /// Pushes the value of a slot: states first, then algebraic variables.
    LoadVar(usize),
    /// Pushes the simulation time.
    LoadTime,
    /// Pops (b, a), pushes a + b.
    Add,
    /// Pops (b, a), pushes a - b.
    Sub,
    /// Pops (b, a), pushes a * b.
    Mul,
    /// Pops (b, a), pushes a / b.
    Div,
    /// Pops (b, a), pushes a ^ b.
    Pow,
    /// Pops a, pushes -a.
    Neg,
    /// Pops a, pushes f(a).
    Call(Builtin),
}

/// A compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack-based virtual machine.
///
/// The VM is stateless; `execute` takes the slot values, the time, and a
/// scratch stack reused across calls.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(bytecode: &Bytecode, slots: &[T], t: T, stack: &mut Vec<T>) -> T {
        stack.clear();

        let pop = |stack: &mut Vec<T>| stack.pop().unwrap_or_else(T::zero);

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(value) => stack.push(T::constant(value)),
                OpCode::LoadVar(slot) => stack.push(slots[slot]),
                OpCode::LoadTime => stack.push(t),
                OpCode::Add => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a + b);
                }
                OpCode::Sub => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a - b);
                }
                OpCode::Mul => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a * b);
                }
                OpCode::Div => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a / b);
                }
                OpCode::Pow => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a.powf(b));
                }
                OpCode::Neg => {
                    let a = pop(stack);
                    stack.push(-a);
                }
                OpCode::Call(function) => {
                    let a = pop(stack);
                    stack.push(function.apply(a));
                }
            }
        }

        // Compiled code always leaves exactly one value.
        pop(stack)
    }
}

/// Compiles flat expressions into `Bytecode`, resolving variables to slots
/// and parameters to their evaluated values.
pub struct Compiler<'a> {
    slots: HashMap<&'a str, usize>,
    parameters: &'a HashMap<String, f64>,
}

impl<'a> Compiler<'a> {
    pub fn new(slot_names: &'a [String], parameters: &'a HashMap<String, f64>) -> Self {
        let slots = slot_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        Self { slots, parameters }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Time => ops.push(OpCode::LoadTime),
            Expr::Ref(cref) => {
                let name = cref.flat_name();
                if let Some(&slot) = self.slots.get(name.as_str()) {
                    ops.push(OpCode::LoadVar(slot));
                } else if let Some(&value) = self.parameters.get(&name) {
                    ops.push(OpCode::LoadConst(value));
                } else {
                    bail!("unknown variable or parameter `{}`", name);
                }
            }
            Expr::Der(cref) => bail!("der({}) may only appear on the left-hand side", cref),
            Expr::Binary(lhs, op, rhs) => {
                self.compile_recursive(lhs, ops)?;
                self.compile_recursive(rhs, ops)?;
                ops.push(match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Div => OpCode::Div,
                    BinaryOp::Pow => OpCode::Pow,
                });
            }
            Expr::Neg(inner) => {
                self.compile_recursive(inner, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(name, args) => {
                let function = Builtin::from_name(name).ok_or_else(|| anyhow!("unknown function `{}`", name))?;
                match args.as_slice() {
                    [arg] => self.compile_recursive(arg, ops)?,
                    _ => bail!("function `{}` takes 1 argument, got {}", name, args.len()),
                }
                ops.push(OpCode::Call(function));
            }
        }
        Ok(())
    }
}

/// Evaluates an expression that may only reference already-known values.
pub fn evaluate(expr: &Expr, known: &HashMap<String, f64>) -> Result<f64> {
    let compiler = Compiler::new(&[], known);
    let code = compiler.compile(expr)?;
    Ok(VM::execute::<f64>(&code, &[], 0.0, &mut Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Dual;
    use crate::frontend::ast::ComponentRef;

    fn var(name: &str) -> Expr {
        Expr::Ref(ComponentRef::new(name))
    }

    #[test]
    fn compiles_slots_parameters_and_calls() {
        let slots = vec!["x".to_string(), "y".to_string()];
        let mut parameters = HashMap::new();
        parameters.insert("k".to_string(), 3.0);
        let compiler = Compiler::new(&slots, &parameters);

        // k * sin(x) - y ^ 2 + time
        let expr = Expr::binary(
            Expr::binary(
                Expr::binary(
                    var("k"),
                    BinaryOp::Mul,
                    Expr::Call("sin".to_string(), vec![var("x")]),
                ),
                BinaryOp::Sub,
                Expr::binary(var("y"), BinaryOp::Pow, Expr::Number(2.0)),
            ),
            BinaryOp::Add,
            Expr::Time,
        );
        let code = compiler.compile(&expr).expect("compile");
        assert_eq!(code.ops[0], OpCode::LoadConst(3.0));

        let mut stack = Vec::new();
        let value = VM::execute(&code, &[0.5, 2.0], 1.5, &mut stack);
        assert!((value - (3.0 * 0.5_f64.sin() - 4.0 + 1.5)).abs() < 1e-12);

        let dual = VM::execute(
            &code,
            &[Dual::new(0.5, 1.0), Dual::new(2.0, 0.0)],
            Dual::new(1.5, 0.0),
            &mut Vec::new(),
        );
        assert!((dual.eps - 3.0 * 0.5_f64.cos()).abs() < 1e-12);
    }

    #[test]
    fn unknown_names_are_compile_errors() {
        let parameters = HashMap::new();
        let compiler = Compiler::new(&[], &parameters);
        assert!(compiler.compile(&var("missing")).is_err());
        assert!(compiler.compile(&Expr::Der(ComponentRef::new("x"))).is_err());
    }

    #[test]
    fn evaluate_folds_known_values() {
        let mut known = HashMap::new();
        known.insert("a".to_string(), 2.0);
        let value = evaluate(&Expr::binary(var("a"), BinaryOp::Div, Expr::Number(4.0)), &known).expect("evaluate");
        assert!((value - 0.5).abs() < 1e-12);
    }
}
