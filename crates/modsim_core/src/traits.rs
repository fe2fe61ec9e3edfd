use anyhow::Result;
use num_traits::{One, Zero};
use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A numeric type the bytecode VM can evaluate over.
/// Implemented for `f64` (plain evaluation) and `Dual` (forward-mode derivatives).
pub trait Scalar:
    Copy
    + Debug
    + Zero
    + One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + 'static
{
    /// Lifts a constant into the scalar type (zero derivative part).
    fn constant(value: f64) -> Self;
    /// The real part.
    fn value(self) -> f64;
    fn powf(self, exponent: Self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tan(self) -> Self;
    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sqrt(self) -> Self;
    fn abs(self) -> Self;
}

impl Scalar for f64 {
    fn constant(value: f64) -> Self {
        value
    }
    fn value(self) -> f64 {
        self
    }
    fn powf(self, exponent: Self) -> Self {
        f64::powf(self, exponent)
    }
    fn sin(self) -> Self {
        f64::sin(self)
    }
    fn cos(self) -> Self {
        f64::cos(self)
    }
    fn tan(self) -> Self {
        f64::tan(self)
    }
    fn exp(self) -> Self {
        f64::exp(self)
    }
    fn ln(self) -> Self {
        f64::ln(self)
    }
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
    fn abs(self) -> Self {
        f64::abs(self)
    }
}

/// Represents a continuous-time flow x' = f(t, x).
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A flow whose Jacobian ∂f/∂x can be evaluated. Needed by the implicit solvers.
pub trait Differentiable: DynamicalSystem<f64> {
    /// Writes the Jacobian at (t, x) into `out`, row-major, `dimension()²` entries.
    fn jacobian(&self, t: f64, x: &[f64], out: &mut [f64]);
}

/// A solver that can step a system forward.
pub trait Steppable {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    fn step(
        &mut self,
        system: &impl Differentiable,
        t: &mut f64,
        state: &mut [f64],
        dt: f64,
    ) -> Result<()>;
}
