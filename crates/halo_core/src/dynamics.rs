//! CR3BP equations of motion in the synodic frame and their variational equations.
//!
//! The augmented state stores the 6-state followed by the row-major STM, so
//! `aug[6 + 6 * i + j]` is `Phi[(i, j)]`.

use nalgebra::Matrix3;

use crate::system::Cr3bpSystem;
use crate::traits::DynamicalSystem;
use crate::types::{State, Stm, AUGMENTED_DIM};

/// Gravitational terms shared by the acceleration and its Jacobian.
struct PrimaryTerms {
    dx1: f64,
    dx2: f64,
    r1_3: f64,
    r2_3: f64,
    r1_5: f64,
    r2_5: f64,
}

impl PrimaryTerms {
    #[inline]
    fn new(mu: f64, x: f64, y: f64, z: f64) -> Self {
        let dx1 = x + mu;
        let dx2 = x - 1.0 + mu;
        let rho = y * y + z * z;
        let r1_sq = dx1 * dx1 + rho;
        let r2_sq = dx2 * dx2 + rho;
        let r1 = r1_sq.sqrt();
        let r2 = r2_sq.sqrt();
        let r1_3 = r1_sq * r1;
        let r2_3 = r2_sq * r2;
        Self {
            dx1,
            dx2,
            r1_3,
            r2_3,
            r1_5: r1_3 * r1_sq,
            r2_5: r2_3 * r2_sq,
        }
    }
}

#[inline]
fn accelerations(mu: f64, x: &[f64], terms: &PrimaryTerms) -> [f64; 3] {
    let one_minus_mu = 1.0 - mu;
    let (px, py, pz) = (x[0], x[1], x[2]);
    let (vx, vy) = (x[3], x[4]);
    let ax = 2.0 * vy + px
        - one_minus_mu * terms.dx1 / terms.r1_3
        - mu * terms.dx2 / terms.r2_3;
    let ay = -2.0 * vx + py - one_minus_mu * py / terms.r1_3 - mu * py / terms.r2_3;
    let az = -one_minus_mu * pz / terms.r1_3 - mu * pz / terms.r2_3;
    [ax, ay, az]
}

/// Hessian of the effective potential (upper-right block of the velocity rows).
#[inline]
fn potential_hessian(mu: f64, x: &[f64], terms: &PrimaryTerms) -> Matrix3<f64> {
    let one_minus_mu = 1.0 - mu;
    let (y, z) = (x[1], x[2]);
    let inv3 = one_minus_mu / terms.r1_3 + mu / terms.r2_3;
    let w1 = 3.0 * one_minus_mu / terms.r1_5;
    let w2 = 3.0 * mu / terms.r2_5;

    let uxx = 1.0 - inv3 + w1 * terms.dx1 * terms.dx1 + w2 * terms.dx2 * terms.dx2;
    let uyy = 1.0 - inv3 + (w1 + w2) * y * y;
    let uzz = -inv3 + (w1 + w2) * z * z;
    let uxy = (w1 * terms.dx1 + w2 * terms.dx2) * y;
    let uxz = (w1 * terms.dx1 + w2 * terms.dx2) * z;
    let uyz = (w1 + w2) * y * z;

    Matrix3::new(uxx, uxy, uxz, uxy, uyy, uyz, uxz, uyz, uzz)
}

/// Time derivative of a 6-state.
pub fn equations_of_motion(mu: f64, state: &State) -> State {
    let terms = PrimaryTerms::new(mu, state[0], state[1], state[2]);
    let [ax, ay, az] = accelerations(mu, state.as_slice(), &terms);
    State::new(state[3], state[4], state[5], ax, ay, az)
}

/// Jacobian of the 6-state vector field.
pub fn jacobian(mu: f64, state: &State) -> Stm {
    let terms = PrimaryTerms::new(mu, state[0], state[1], state[2]);
    let hessian = potential_hessian(mu, state.as_slice(), &terms);
    let mut jac = Stm::zeros();
    jac.fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&Matrix3::identity());
    jac.fixed_view_mut::<3, 3>(3, 0).copy_from(&hessian);
    jac[(3, 4)] = 2.0;
    jac[(4, 3)] = -2.0;
    jac
}

/// Vector field for either the bare state or the state augmented with its STM.
#[derive(Debug, Clone, Copy)]
pub struct Cr3bpDynamics {
    mu: f64,
    with_stm: bool,
}

impl Cr3bpDynamics {
    /// Six-dimensional flow.
    pub fn new(system: &Cr3bpSystem) -> Self {
        Self {
            mu: system.mu(),
            with_stm: false,
        }
    }

    /// Forty-two-dimensional flow carrying the variational equations.
    pub fn with_stm(system: &Cr3bpSystem) -> Self {
        Self {
            mu: system.mu(),
            with_stm: true,
        }
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }
}

impl DynamicalSystem for Cr3bpDynamics {
    fn dimension(&self) -> usize {
        if self.with_stm {
            AUGMENTED_DIM
        } else {
            6
        }
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let mu = self.mu;
        let terms = PrimaryTerms::new(mu, x[0], x[1], x[2]);
        let [ax, ay, az] = accelerations(mu, x, &terms);
        out[0] = x[3];
        out[1] = x[4];
        out[2] = x[5];
        out[3] = ax;
        out[4] = ay;
        out[5] = az;

        if !self.with_stm {
            return;
        }

        let u = potential_hessian(mu, x, &terms);
        let phi = &x[6..AUGMENTED_DIM];
        let phi_dot = &mut out[6..AUGMENTED_DIM];
        for j in 0..6 {
            // Position rows of Phi' are the velocity rows of Phi.
            phi_dot[j] = phi[18 + j];
            phi_dot[6 + j] = phi[24 + j];
            phi_dot[12 + j] = phi[30 + j];

            let (p0, p1, p2) = (phi[j], phi[6 + j], phi[12 + j]);
            let (v0, v1) = (phi[18 + j], phi[24 + j]);
            phi_dot[18 + j] = u[(0, 0)] * p0 + u[(0, 1)] * p1 + u[(0, 2)] * p2 + 2.0 * v1;
            phi_dot[24 + j] = u[(1, 0)] * p0 + u[(1, 1)] * p1 + u[(1, 2)] * p2 - 2.0 * v0;
            phi_dot[30 + j] = u[(2, 0)] * p0 + u[(2, 1)] * p1 + u[(2, 2)] * p2;
        }
    }
}

/// Packs a state with an identity STM.
pub fn augment(state: &State) -> [f64; AUGMENTED_DIM] {
    let mut aug = [0.0; AUGMENTED_DIM];
    aug[..6].copy_from_slice(state.as_slice());
    for i in 0..6 {
        aug[6 + 7 * i] = 1.0;
    }
    aug
}

/// Unpacks an augmented vector into the state and its row-major STM.
pub fn split(aug: &[f64]) -> (State, Stm) {
    let state = State::from_column_slice(&aug[..6]);
    let stm = Stm::from_row_slice(&aug[6..AUGMENTED_DIM]);
    (state, stm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::NamedSystem;

    fn sample_state() -> State {
        State::new(0.82, 0.03, 0.02, 0.01, 0.13, -0.02)
    }

    #[test]
    fn trait_flow_matches_equations_of_motion() {
        let system = NamedSystem::EarthMoon.system();
        let state = sample_state();
        let expected = equations_of_motion(system.mu(), &state);
        let mut out = [0.0; 6];
        Cr3bpDynamics::new(&system).apply(0.0, state.as_slice(), &mut out);
        for i in 0..6 {
            assert_eq!(out[i], expected[i]);
        }
    }

    #[test]
    fn jacobian_matches_central_differences() {
        let mu = NamedSystem::EarthMoon.mass_parameter();
        let state = sample_state();
        let analytic = jacobian(mu, &state);
        let h = 1e-6;
        for j in 0..6 {
            let mut plus = state;
            let mut minus = state;
            plus[j] += h;
            minus[j] -= h;
            let column =
                (equations_of_motion(mu, &plus) - equations_of_motion(mu, &minus)) / (2.0 * h);
            for i in 0..6 {
                assert!(
                    (analytic[(i, j)] - column[i]).abs() < 1e-6,
                    "J[{}, {}] = {} vs {}",
                    i,
                    j,
                    analytic[(i, j)],
                    column[i]
                );
            }
        }
    }

    #[test]
    fn variational_rhs_is_jacobian_times_stm() {
        let system = NamedSystem::EarthMoon.system();
        let state = sample_state();
        let mut aug = augment(&state);
        // Arbitrary non-identity STM.
        for (k, value) in aug[6..].iter_mut().enumerate() {
            *value += 0.01 * (k as f64).sin();
        }
        let (_, phi) = split(&aug);
        let mut out = [0.0; AUGMENTED_DIM];
        Cr3bpDynamics::with_stm(&system).apply(0.0, &aug, &mut out);
        let (_, phi_dot) = split(&out);
        let expected = jacobian(system.mu(), &state) * phi;
        assert!((phi_dot - expected).amax() < 1e-12);
    }

    #[test]
    fn augment_starts_from_identity() {
        let state = sample_state();
        let (unpacked, phi) = split(&augment(&state));
        assert_eq!(unpacked, state);
        assert_eq!(phi, Stm::identity());
    }

    #[test]
    fn collision_produces_non_finite_derivative() {
        let system = NamedSystem::EarthMoon.system();
        let at_earth = State::new(-system.mu(), 0.0, 0.0, 0.0, 0.0, 0.0);
        let derivative = equations_of_motion(system.mu(), &at_earth);
        assert!(derivative.iter().any(|v| !v.is_finite()));
    }
}
