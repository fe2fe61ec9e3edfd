use super::bytecode::{Bytecode, VM};
use crate::autodiff::{dual_jacobian, Dual};
use crate::traits::{Differentiable, DynamicalSystem, Scalar};
use std::cell::RefCell;

/// Simulatable form of a flat model.
///
/// Slots are laid out as the states followed by the algebraic variables.
/// `algebraic_code[i]` computes slot `states.len() + i` and may read every
/// slot before it; `derivative_code[i]` computes `der(states[i])`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledModel {
    pub name: String,
    pub states: Vec<String>,
    pub algebraics: Vec<String>,
    pub initial_state: Vec<f64>,
    /// Evaluated parameter values, in declaration order.
    pub parameters: Vec<(String, f64)>,
    pub algebraic_code: Vec<Bytecode>,
    pub derivative_code: Vec<Bytecode>,
}

impl CompiledModel {
    /// Names of the recorded trajectory columns: states, then algebraics.
    pub fn variables(&self) -> Vec<String> {
        self.states.iter().chain(&self.algebraics).cloned().collect()
    }
}

/// A compiled model evaluated as the flow x' = f(t, x).
pub struct EquationSystem<'a> {
    model: &'a CompiledModel,
    slots: RefCell<Vec<f64>>,
    stack: RefCell<Vec<f64>>,
}

impl<'a> EquationSystem<'a> {
    pub fn new(model: &'a CompiledModel) -> Self {
        let width = model.states.len() + model.algebraics.len();
        Self {
            model,
            slots: RefCell::new(Vec::with_capacity(width)),
            stack: RefCell::new(Vec::with_capacity(16)),
        }
    }

    fn evaluate<T: Scalar>(&self, t: T, x: &[T], slots: &mut Vec<T>, stack: &mut Vec<T>, out: &mut [T]) {
        slots.clear();
        slots.extend_from_slice(x);
        for code in &self.model.algebraic_code {
            let value = VM::execute(code, slots, t, stack);
            slots.push(value);
        }
        for (i, code) in self.model.derivative_code.iter().enumerate() {
            out[i] = VM::execute(code, slots, t, stack);
        }
    }

    /// Values of every recorded variable at (t, x).
    pub fn observe(&self, t: f64, x: &[f64]) -> Vec<f64> {
        let mut slots = Vec::new();
        let mut out = vec![0.0; x.len()];
        self.evaluate(t, x, &mut slots, &mut self.stack.borrow_mut(), &mut out);
        slots
    }
}

impl DynamicalSystem<f64> for EquationSystem<'_> {
    fn dimension(&self) -> usize {
        self.model.states.len()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        let mut slots = self.slots.borrow_mut();
        let mut stack = self.stack.borrow_mut();
        self.evaluate(t, x, &mut slots, &mut stack, out);
    }
}

impl DynamicalSystem<Dual> for EquationSystem<'_> {
    fn dimension(&self) -> usize {
        self.model.states.len()
    }

    fn apply(&self, t: Dual, x: &[Dual], out: &mut [Dual]) {
        let mut slots = Vec::with_capacity(x.len() + self.model.algebraics.len());
        let mut stack = Vec::with_capacity(16);
        self.evaluate(t, x, &mut slots, &mut stack, out);
    }
}

impl Differentiable for EquationSystem<'_> {
    fn jacobian(&self, t: f64, x: &[f64], out: &mut [f64]) {
        dual_jacobian(self, t, x, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::bytecode::OpCode;

    /// x' = -2 y, y' = x, with a = x + y recorded as an algebraic.
    fn rotation() -> CompiledModel {
        CompiledModel {
            name: "Rotation".to_string(),
            states: vec!["x".to_string(), "y".to_string()],
            algebraics: vec!["a".to_string()],
            initial_state: vec![1.0, 0.0],
            parameters: Vec::new(),
            algebraic_code: vec![Bytecode {
                ops: vec![OpCode::LoadVar(0), OpCode::LoadVar(1), OpCode::Add],
            }],
            derivative_code: vec![
                Bytecode {
                    ops: vec![OpCode::LoadConst(-2.0), OpCode::LoadVar(1), OpCode::Mul],
                },
                Bytecode {
                    ops: vec![OpCode::LoadVar(0)],
                },
            ],
        }
    }

    #[test]
    fn evaluates_flow_observations_and_jacobian() {
        let model = rotation();
        let system = EquationSystem::new(&model);
        assert_eq!(DynamicalSystem::<f64>::dimension(&system), 2);

        let mut out = vec![0.0; 2];
        system.apply(0.0, &[1.0, 3.0], &mut out);
        assert_eq!(out, vec![-6.0, 1.0]);

        assert_eq!(system.observe(0.0, &[1.0, 3.0]), vec![1.0, 3.0, 4.0]);
        assert_eq!(model.variables(), vec!["x", "y", "a"]);

        let mut jac = vec![0.0; 4];
        system.jacobian(0.0, &[1.0, 3.0], &mut jac);
        assert_eq!(jac, vec![0.0, -2.0, 1.0, 0.0]);
    }
}
