use crate::traits::{Differentiable, Steppable};
use anyhow::{anyhow, bail, Result};
use nalgebra::{DMatrix, DVector};

/// Butcher tableau of an explicit Runge-Kutta method.
pub struct Tableau {
    pub a: &'static [&'static [f64]],
    pub b: &'static [f64],
    pub c: &'static [f64],
}

/// Classic Runge-Kutta 4th order.
pub const RK4: Tableau = Tableau {
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
    c: &[0.0, 0.5, 0.5, 1.0],
};

/// Tsitouras 5/4, advanced with the 5th order weights.
pub const TSIT5: Tableau = Tableau {
    a: &[
        &[],
        &[0.161],
        &[-0.008480655492356989, 0.335480655492357],
        &[2.897153057105493, -6.359448489975075, 4.3622954328695815],
        &[
            5.325864828439257,
            -11.748883564062828,
            7.4955393428898365,
            -0.09249506636175525,
        ],
        &[
            5.86145544294642,
            -12.92096931784711,
            8.159367898576159,
            -0.071584973281401,
            -0.028269050394068383,
        ],
    ],
    b: &[
        0.09646076681806523,
        0.01,
        0.4798896504144996,
        1.379008574103742,
        -3.290069515436081,
        2.324710524099774,
    ],
    c: &[0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0],
};

pub struct ExplicitRungeKutta {
    tableau: &'static Tableau,
    k: Vec<Vec<f64>>,
    tmp: Vec<f64>,
}

impl ExplicitRungeKutta {
    pub fn new(tableau: &'static Tableau, dim: usize) -> Self {
        Self {
            tableau,
            k: vec![vec![0.0; dim]; tableau.b.len()],
            tmp: vec![0.0; dim],
        }
    }
}

impl Steppable for ExplicitRungeKutta {
    fn step(&mut self, system: &impl Differentiable, t: &mut f64, state: &mut [f64], dt: f64) -> Result<()> {
        let t0 = *t;
        let tableau = self.tableau;

        for stage in 0..tableau.b.len() {
            for i in 0..state.len() {
                let increment: f64 = tableau.a[stage]
                    .iter()
                    .enumerate()
                    .map(|(j, a)| a * self.k[j][i])
                    .sum();
                self.tmp[i] = state[i] + dt * increment;
            }
            system.apply(t0 + tableau.c[stage] * dt, &self.tmp, &mut self.k[stage]);
        }

        for i in 0..state.len() {
            let increment: f64 = tableau
                .b
                .iter()
                .enumerate()
                .map(|(j, b)| b * self.k[j][i])
                .sum();
            state[i] += dt * increment;
        }

        *t = t0 + dt;
        Ok(())
    }
}

/// Two-stage L-stable Rosenbrock method (ROS2).
///
/// W = I - γ h J, k1 = W⁻¹ f(t, y), k2 = W⁻¹ (f(t + h, y + h k1) - 2 k1),
/// y' = y + h (3 k1 + k2) / 2, with γ = 1 + 1/√2.
pub struct Rosenbrock2 {
    jacobian: Vec<f64>,
    f0: Vec<f64>,
    f1: Vec<f64>,
    tmp: Vec<f64>,
}

impl Rosenbrock2 {
    pub const GAMMA: f64 = 1.0 + std::f64::consts::FRAC_1_SQRT_2;

    pub fn new(dim: usize) -> Self {
        Self {
            jacobian: vec![0.0; dim * dim],
            f0: vec![0.0; dim],
            f1: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

impl Steppable for Rosenbrock2 {
    fn step(&mut self, system: &impl Differentiable, t: &mut f64, state: &mut [f64], dt: f64) -> Result<()> {
        let dim = state.len();
        let t0 = *t;

        system.jacobian(t0, state, &mut self.jacobian);
        let w = iteration_matrix(dim, &self.jacobian, Self::GAMMA * dt);
        let lu = w.lu();

        system.apply(t0, state, &mut self.f0);
        let k1 = lu
            .solve(&DVector::from_column_slice(&self.f0))
            .ok_or_else(|| anyhow!("singular Rosenbrock matrix at t = {}", t0))?;

        for i in 0..dim {
            self.tmp[i] = state[i] + dt * k1[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.f1);
        for i in 0..dim {
            self.f1[i] -= 2.0 * k1[i];
        }
        let k2 = lu
            .solve(&DVector::from_column_slice(&self.f1))
            .ok_or_else(|| anyhow!("singular Rosenbrock matrix at t = {}", t0))?;

        for i in 0..dim {
            state[i] += dt * (1.5 * k1[i] + 0.5 * k2[i]);
        }

        *t = t0 + dt;
        Ok(())
    }
}

/// Backward Euler with a Newton iteration on y - y₀ - h f(t + h, y) = 0.
pub struct ImplicitEuler {
    tolerance: f64,
    max_steps: usize,
    jacobian: Vec<f64>,
    residual: Vec<f64>,
    f: Vec<f64>,
}

impl ImplicitEuler {
    pub fn new(dim: usize, tolerance: f64, max_steps: usize) -> Self {
        Self {
            tolerance,
            max_steps,
            jacobian: vec![0.0; dim * dim],
            residual: vec![0.0; dim],
            f: vec![0.0; dim],
        }
    }
}

impl Steppable for ImplicitEuler {
    fn step(&mut self, system: &impl Differentiable, t: &mut f64, state: &mut [f64], dt: f64) -> Result<()> {
        let dim = state.len();
        let t1 = *t + dt;
        let previous = state.to_vec();

        // Explicit Euler predictor.
        system.apply(*t, state, &mut self.f);
        for i in 0..dim {
            state[i] += dt * self.f[i];
        }

        let mut converged = false;
        for _ in 0..self.max_steps {
            system.apply(t1, state, &mut self.f);
            for i in 0..dim {
                self.residual[i] = state[i] - previous[i] - dt * self.f[i];
            }

            system.jacobian(t1, state, &mut self.jacobian);
            let delta = iteration_matrix(dim, &self.jacobian, dt)
                .lu()
                .solve(&DVector::from_column_slice(&self.residual))
                .ok_or_else(|| anyhow!("singular Newton matrix at t = {}", t1))?;

            let mut norm: f64 = 0.0;
            for i in 0..dim {
                state[i] -= delta[i];
                norm = norm.max(delta[i].abs());
            }
            if norm < self.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            bail!(
                "Newton iteration did not converge in {} steps at t = {}",
                self.max_steps,
                t1
            );
        }

        *t = t1;
        Ok(())
    }
}

/// I - scale * J, with `jacobian` row-major.
fn iteration_matrix(dim: usize, jacobian: &[f64], scale: f64) -> DMatrix<f64> {
    let mut matrix = DMatrix::from_row_slice(dim, dim, jacobian) * (-scale);
    for i in 0..dim {
        matrix[(i, i)] += 1.0;
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::DynamicalSystem;

    /// x' = λ x
    struct Linear(f64);

    impl DynamicalSystem<f64> for Linear {
        fn dimension(&self) -> usize {
            1
        }
        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = self.0 * x[0];
        }
    }

    impl Differentiable for Linear {
        fn jacobian(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = self.0;
        }
    }

    /// Harmonic oscillator x'' = -x.
    struct Oscillator;

    impl DynamicalSystem<f64> for Oscillator {
        fn dimension(&self) -> usize {
            2
        }
        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[1];
            out[1] = -x[0];
        }
    }

    impl Differentiable for Oscillator {
        fn jacobian(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
            out.copy_from_slice(&[0.0, 1.0, -1.0, 0.0]);
        }
    }

    fn run(solver: &mut impl Steppable, system: &impl Differentiable, state: &mut [f64], dt: f64, steps: usize) {
        let mut t = 0.0;
        for _ in 0..steps {
            solver.step(system, &mut t, state, dt).expect("step");
        }
        assert!((t - dt * steps as f64).abs() < 1e-9);
    }

    #[test]
    fn explicit_methods_track_the_harmonic_oscillator() {
        for (tableau, tolerance) in [(&RK4, 1e-6), (&TSIT5, 1e-7)] {
            let mut state = vec![1.0, 0.0];
            run(&mut ExplicitRungeKutta::new(tableau, 2), &Oscillator, &mut state, 0.01, 100);
            assert!((state[0] - 1.0_f64.cos()).abs() < tolerance);
            assert!((state[1] + 1.0_f64.sin()).abs() < tolerance);
        }
    }

    #[test]
    fn rosenbrock_is_second_order_accurate() {
        let mut state = vec![1.0];
        run(&mut Rosenbrock2::new(1), &Linear(-1.0), &mut state, 0.01, 100);
        assert!((state[0] - (-1.0_f64).exp()).abs() < 5e-4);
    }

    #[test]
    fn implicit_methods_stay_bounded_on_stiff_decay() {
        let stiff = Linear(-1.0e4);
        let mut ros = vec![1.0];
        run(&mut Rosenbrock2::new(1), &stiff, &mut ros, 0.1, 10);
        assert!(ros[0].abs() < 1e-3);

        let mut euler = vec![1.0];
        run(&mut ImplicitEuler::new(1, 1e-12, 10), &stiff, &mut euler, 0.1, 10);
        assert!(euler[0].abs() < 1e-3);

        let mut explicit = vec![1.0];
        run(&mut ExplicitRungeKutta::new(&RK4, 1), &stiff, &mut explicit, 0.1, 10);
        assert!(explicit[0].abs() > 1.0);
    }
}
