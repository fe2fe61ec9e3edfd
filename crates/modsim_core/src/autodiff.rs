use crate::traits::{DynamicalSystem, Scalar};
use num_traits::{One, Zero};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Dual number for forward-mode differentiation.
/// val: real part
/// eps: infinitesimal part
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::new(0.0, 0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.eps == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let denom = rhs.val * rhs.val;
        Self::new(
            self.val / rhs.val,
            (self.eps * rhs.val - self.val * rhs.eps) / denom,
        )
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl Scalar for Dual {
    fn constant(value: f64) -> Self {
        Self::new(value, 0.0)
    }

    fn value(self) -> f64 {
        self.val
    }

    fn powf(self, n: Self) -> Self {
        let val_pow = self.val.powf(n.val);
        // A constant exponent must not go through ln(x), which is NaN for x < 0.
        if n.eps == 0.0 {
            return Self::new(val_pow, n.val * self.val.powf(n.val - 1.0) * self.eps);
        }
        let eps_new = val_pow * (n.eps * self.val.ln() + n.val * self.eps / self.val);
        Self::new(val_pow, eps_new)
    }

    fn sin(self) -> Self {
        Self::new(self.val.sin(), self.eps * self.val.cos())
    }

    fn cos(self) -> Self {
        Self::new(self.val.cos(), -self.eps * self.val.sin())
    }

    fn tan(self) -> Self {
        let t = self.val.tan();
        Self::new(t, self.eps * (1.0 + t * t))
    }

    fn exp(self) -> Self {
        let e = self.val.exp();
        Self::new(e, e * self.eps)
    }

    fn ln(self) -> Self {
        Self::new(self.val.ln(), self.eps / self.val)
    }

    fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        Self::new(s, self.eps / (2.0 * s))
    }

    fn abs(self) -> Self {
        Self::new(
            self.val.abs(),
            if self.val >= 0.0 { self.eps } else { -self.eps },
        )
    }
}

/// Computes the Jacobian of `system` at (t, x) column by column, seeding one
/// state component at a time with a unit infinitesimal part.
pub fn dual_jacobian<S>(system: &S, t: f64, x: &[f64], out: &mut [f64])
where
    S: DynamicalSystem<Dual> + ?Sized,
{
    let n = x.len();
    let mut dual_x = vec![Dual::zero(); n];
    let mut dual_out = vec![Dual::zero(); n];
    let t_dual = Dual::new(t, 0.0);

    for j in 0..n {
        for i in 0..n {
            dual_x[i] = Dual::new(x[i], if i == j { 1.0 } else { 0.0 });
        }
        system.apply(t_dual, &dual_x, &mut dual_out);
        for i in 0..n {
            out[i * n + j] = dual_out[i].eps;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quadratic;

    impl DynamicalSystem<Dual> for Quadratic {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: Dual, x: &[Dual], out: &mut [Dual]) {
            out[0] = x[0] * x[1];
            out[1] = x[0].powf(Dual::constant(2.0)) - x[1].sin();
        }
    }

    #[test]
    fn jacobian_matches_analytic_derivatives() {
        let mut jac = vec![0.0; 4];
        dual_jacobian(&Quadratic, 0.0, &[3.0, 0.5], &mut jac);

        assert!((jac[0] - 0.5).abs() < 1e-12);
        assert!((jac[1] - 3.0).abs() < 1e-12);
        assert!((jac[2] - 6.0).abs() < 1e-12);
        assert!((jac[3] + 0.5_f64.cos()).abs() < 1e-12);
    }

    #[test]
    fn constant_power_of_negative_base_is_finite() {
        let x = Dual::new(-2.0, 1.0);
        let squared = x.powf(Dual::constant(2.0));
        assert!((squared.val - 4.0).abs() < 1e-12);
        assert!((squared.eps + 4.0).abs() < 1e-12);
    }
}
