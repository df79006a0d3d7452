//! Richardson's third-order Lindstedt-Poincare approximation of halo orbits.
//!
//! The expansion lives in a frame centered on the collinear point, scaled by
//! gamma (distance to the smaller primary), with the x axis parallel to the
//! synodic x axis. Time is already in synodic units. The result is a seed for
//! the differential corrector, not a periodic solution of the full equations.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{HaloError, Result};
use crate::propagation::evenly_spaced;
use crate::system::Cr3bpSystem;
use crate::types::{Hemisphere, LagrangePoint, State};

/// Sampled third-order halo approximation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticalHalo {
    pub lagrange_point: LagrangePoint,
    pub hemisphere: Hemisphere,
    /// Requested out-of-plane amplitude (primary-separation units).
    pub z_amplitude: f64,
    /// In-plane amplitude implied by the amplitude constraint (primary-separation units).
    pub x_amplitude: f64,
    pub gamma: f64,
    pub period: f64,
    pub times: Vec<f64>,
    pub positions: Vec<Vector3<f64>>,
    pub velocities: Vec<Vector3<f64>>,
}

/// Seed handed to the differential corrector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HaloGuess {
    pub lagrange_point: LagrangePoint,
    pub hemisphere: Hemisphere,
    pub z_amplitude: f64,
    /// `[x0, 0, z0, 0, vy0, 0]`.
    pub initial_state: State,
    pub half_period: f64,
}

impl AnalyticalHalo {
    pub fn initial_state(&self) -> State {
        let position = self.positions[0];
        let velocity = self.velocities[0];
        State::new(
            position[0],
            position[1],
            position[2],
            velocity[0],
            velocity[1],
            velocity[2],
        )
    }

    /// Corrector seed at the `y = 0` crossing, with the symmetric components zeroed.
    pub fn initial_guess(&self) -> HaloGuess {
        let state = self.initial_state();
        HaloGuess {
            lagrange_point: self.lagrange_point,
            hemisphere: self.hemisphere,
            z_amplitude: self.z_amplitude,
            initial_state: State::new(state[0], 0.0, state[2], 0.0, state[4], 0.0),
            half_period: 0.5 * self.period,
        }
    }
}

/// Richardson expansion coefficients for one system and collinear point.
#[derive(Debug, Clone, Copy)]
struct Coefficients {
    lambda: f64,
    k: f64,
    delta: f64,
    a21: f64,
    a22: f64,
    a23: f64,
    a24: f64,
    a31: f64,
    a32: f64,
    b21: f64,
    b22: f64,
    b31: f64,
    b32: f64,
    d21: f64,
    d31: f64,
    d32: f64,
    s1: f64,
    s2: f64,
    l1: f64,
    l2: f64,
}

/// Legendre expansion coefficient c_n of the potential about the collinear point.
fn legendre_coefficient(mu: f64, gamma: f64, point: LagrangePoint, n: i32) -> f64 {
    let sign = if n % 2 == 0 { 1.0 } else { -1.0 };
    let g3 = gamma.powi(3);
    match point {
        LagrangePoint::L1 => {
            (mu + sign * (1.0 - mu) * gamma.powi(n + 1) / (1.0 - gamma).powi(n + 1)) / g3
        }
        LagrangePoint::L2 => {
            (sign * mu + sign * (1.0 - mu) * gamma.powi(n + 1) / (1.0 + gamma).powi(n + 1)) / g3
        }
    }
}

impl Coefficients {
    fn new(mu: f64, gamma: f64, point: LagrangePoint) -> Self {
        let c2 = legendre_coefficient(mu, gamma, point, 2);
        let c3 = legendre_coefficient(mu, gamma, point, 3);
        let c4 = legendre_coefficient(mu, gamma, point, 4);

        // In-plane linear frequency: lambda^4 + (c2 - 2) lambda^2 - (c2 - 1)(1 + 2 c2) = 0.
        let lambda_sq =
            0.5 * ((2.0 - c2) + ((c2 - 2.0).powi(2) + 4.0 * (c2 - 1.0) * (1.0 + 2.0 * c2)).sqrt());
        let lambda = lambda_sq.sqrt();
        let k = (lambda_sq + 1.0 + 2.0 * c2) / (2.0 * lambda);
        let delta = lambda_sq - c2;

        let d1 = 3.0 * lambda_sq / k * (k * (6.0 * lambda_sq - 1.0) - 2.0 * lambda);
        let d2 = 8.0 * lambda_sq / k * (k * (11.0 * lambda_sq - 1.0) - 2.0 * lambda);

        let a21 = 3.0 * c3 * (k * k - 2.0) / (4.0 * (1.0 + 2.0 * c2));
        let a22 = 3.0 * c3 / (4.0 * (1.0 + 2.0 * c2));
        let a23 = -3.0 * c3 * lambda / (4.0 * k * d1)
            * (3.0 * k.powi(3) * lambda - 6.0 * k * (k - lambda) + 4.0);
        let a24 = -3.0 * c3 * lambda / (4.0 * k * d1) * (2.0 + 3.0 * k * lambda);
        let b21 = -3.0 * c3 * lambda / (2.0 * d1) * (3.0 * k * lambda - 4.0);
        let b22 = 3.0 * c3 * lambda / d1;
        let d21 = -c3 / (2.0 * lambda_sq);

        let a31 = -9.0 * lambda / (4.0 * d2)
            * (4.0 * c3 * (k * a23 - b21) + k * c4 * (4.0 + k * k))
            + (9.0 * lambda_sq + 1.0 - c2) / (2.0 * d2)
                * (3.0 * c3 * (2.0 * a23 - k * b21) + c4 * (2.0 + 3.0 * k * k));
        let a32 = -1.0 / d2
            * (9.0 * lambda / 4.0 * (4.0 * c3 * (k * a24 - b22) + k * c4)
                + 1.5 * (9.0 * lambda_sq + 1.0 - c2) * (c3 * (k * b22 + d21 - 2.0 * a24) - c4));
        let b31 = 3.0 / (8.0 * d2)
            * (8.0 * lambda * (3.0 * c3 * (k * b21 - 2.0 * a23) - c4 * (2.0 + 3.0 * k * k))
                + (9.0 * lambda_sq + 1.0 + 2.0 * c2)
                    * (4.0 * c3 * (k * a23 - b21) + k * c4 * (4.0 + k * k)));
        let b32 = 1.0 / d2
            * (9.0 * lambda * (c3 * (k * b22 + d21 - 2.0 * a24) - c4)
                + 3.0 / 8.0
                    * (9.0 * lambda_sq + 1.0 + 2.0 * c2)
                    * (4.0 * c3 * (k * a24 - b22) + k * c4));
        let d31 = 3.0 / (64.0 * lambda_sq) * (4.0 * c3 * a24 + c4);
        let d32 = 3.0 / (64.0 * lambda_sq) * (4.0 * c3 * (a23 - d21) + c4 * (4.0 + k * k));

        let s_denom = 2.0 * lambda * (lambda * (1.0 + k * k) - 2.0 * k);
        let s1 = (1.5 * c3 * (2.0 * a21 * (k * k - 2.0) - a23 * (k * k + 2.0) - 2.0 * k * b21)
            - 3.0 / 8.0 * c4 * (3.0 * k.powi(4) - 8.0 * k * k + 8.0))
            / s_denom;
        let s2 = (1.5
            * c3
            * (2.0 * a22 * (k * k - 2.0) + a24 * (k * k + 2.0) + 2.0 * k * b22 + 5.0 * d21)
            + 3.0 / 8.0 * c4 * (12.0 - k * k))
            / s_denom;

        let a1 = -1.5 * c3 * (2.0 * a21 + a23 + 5.0 * d21) - 3.0 / 8.0 * c4 * (12.0 - k * k);
        let a2 = 1.5 * c3 * (a24 - 2.0 * a22) + 9.0 / 8.0 * c4;
        let l1 = a1 + 2.0 * lambda_sq * s1;
        let l2 = a2 + 2.0 * lambda_sq * s2;

        Self {
            lambda,
            k,
            delta,
            a21,
            a22,
            a23,
            a24,
            a31,
            a32,
            b21,
            b22,
            b31,
            b32,
            d21,
            d31,
            d32,
            s1,
            s2,
            l1,
            l2,
        }
    }

    /// In-plane amplitude (gamma units) from l1 Ax^2 + l2 Az^2 + Delta = 0.
    fn x_amplitude(&self, az: f64) -> Option<f64> {
        let ax_sq = -(self.delta + self.l2 * az * az) / self.l1;
        (ax_sq.is_finite() && ax_sq >= 0.0).then(|| ax_sq.sqrt())
    }
}

/// Samples Richardson's third-order halo approximation.
///
/// `z_amplitude` is the non-negative out-of-plane amplitude in primary-separation
/// units; `hemisphere` picks the sign of the z excursion. `Az = 0` yields the
/// planar Lyapunov seed at the halo bifurcation amplitude.
pub fn richardson_halo(
    system: &Cr3bpSystem,
    point: LagrangePoint,
    z_amplitude: f64,
    hemisphere: Hemisphere,
    samples: usize,
) -> Result<AnalyticalHalo> {
    if !z_amplitude.is_finite() || z_amplitude < 0.0 {
        return Err(HaloError::InvalidInput(format!(
            "z amplitude must be finite and non-negative, got {}",
            z_amplitude
        )));
    }
    if samples == 0 {
        return Err(HaloError::InvalidInput(
            "at least one sample is required".to_string(),
        ));
    }

    let mu = system.mu();
    let gamma = system.collinear_distance(point);
    let coeffs = Coefficients::new(mu, gamma, point);

    let az = z_amplitude / gamma;
    let ax = coeffs.x_amplitude(az).ok_or_else(|| {
        HaloError::InvalidInput(format!(
            "amplitude constraint has no real in-plane solution for Az = {}",
            z_amplitude
        ))
    })?;

    let omega = 1.0 + coeffs.s1 * ax * ax + coeffs.s2 * az * az;
    let rate = coeffs.lambda * omega;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(HaloError::InvalidInput(format!(
            "frequency correction is non-physical for Az = {}",
            z_amplitude
        )));
    }
    let period = 2.0 * PI / rate;

    let lagrange_x = system.lagrange_point_x(point);
    let dm = hemisphere.sign();
    let c = &coeffs;

    let times = evenly_spaced(period, samples);
    let mut positions = Vec::with_capacity(samples);
    let mut velocities = Vec::with_capacity(samples);
    for &t in &times {
        let tau = rate * t;
        let (s1, c1) = tau.sin_cos();
        let (s2, c2) = (2.0 * tau).sin_cos();
        let (s3, c3) = (3.0 * tau).sin_cos();

        let x_2 = c.a23 * ax * ax - c.a24 * az * az;
        let x_3 = c.a31 * ax.powi(3) - c.a32 * ax * az * az;
        let y_2 = c.b21 * ax * ax - c.b22 * az * az;
        let y_3 = c.b31 * ax.powi(3) - c.b32 * ax * az * az;
        let z_3 = c.d32 * az * ax * ax - c.d31 * az.powi(3);

        let x = c.a21 * ax * ax + c.a22 * az * az - ax * c1 + x_2 * c2 + x_3 * c3;
        let y = c.k * ax * s1 + y_2 * s2 + y_3 * s3;
        let z = dm * az * c1 + dm * c.d21 * ax * az * (c2 - 3.0) + dm * z_3 * c3;

        let vx = rate * (ax * s1 - 2.0 * x_2 * s2 - 3.0 * x_3 * s3);
        let vy = rate * (c.k * ax * c1 + 2.0 * y_2 * c2 + 3.0 * y_3 * c3);
        let vz = rate * (-dm * az * s1 - 2.0 * dm * c.d21 * ax * az * s2 - 3.0 * dm * z_3 * s3);

        positions.push(Vector3::new(lagrange_x + gamma * x, gamma * y, gamma * z));
        velocities.push(Vector3::new(gamma * vx, gamma * vy, gamma * vz));
    }

    Ok(AnalyticalHalo {
        lagrange_point: point,
        hemisphere,
        z_amplitude,
        x_amplitude: gamma * ax,
        gamma,
        period,
        times,
        positions,
        velocities,
    })
}
