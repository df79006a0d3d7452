//! CR3BP system parameters and derived geometry.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{HaloError, Result};
use crate::types::{LagrangePoint, State};

const LAGRANGE_NEWTON_MAX_ITERS: usize = 100;
const LAGRANGE_NEWTON_TOL: f64 = 1e-15;

/// A circular restricted three-body system, fully described by its mass parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cr3bpSystem {
    mu: f64,
}

impl Cr3bpSystem {
    pub fn new(mu: f64) -> Result<Self> {
        if !mu.is_finite() || mu <= 0.0 || mu > 0.5 {
            return Err(HaloError::InvalidMassParameter(mu));
        }
        Ok(Self { mu })
    }

    /// Builds the system from the two primary masses (any consistent unit).
    pub fn from_masses(m1: f64, m2: f64) -> Result<Self> {
        if !(m1 > 0.0 && m2 > 0.0) {
            return Err(HaloError::InvalidInput(format!(
                "primary masses must be positive, got {} and {}",
                m1, m2
            )));
        }
        let (large, small) = if m1 >= m2 { (m1, m2) } else { (m2, m1) };
        Self::new(small / (large + small))
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    /// Synodic position of the larger primary.
    pub fn primary_position(&self) -> Vector3<f64> {
        Vector3::new(-self.mu, 0.0, 0.0)
    }

    /// Synodic position of the smaller primary.
    pub fn secondary_position(&self) -> Vector3<f64> {
        Vector3::new(1.0 - self.mu, 0.0, 0.0)
    }

    /// Distance gamma from the collinear point to the smaller primary.
    ///
    /// Solves the x-axis force balance with a bracketed Newton iteration; the
    /// balance is monotone in gamma on the bracket so the root is unique.
    pub fn collinear_distance(&self, point: LagrangePoint) -> f64 {
        let mu = self.mu;
        let hill = (mu / 3.0).cbrt();
        match point {
            LagrangePoint::L1 => bracketed_newton(
                |g| {
                    let f = (1.0 - mu - g) - (1.0 - mu) / (1.0 - g).powi(2) + mu / (g * g);
                    let df = -1.0 - 2.0 * (1.0 - mu) / (1.0 - g).powi(3) - 2.0 * mu / g.powi(3);
                    (f, df)
                },
                0.0,
                1.0,
                hill.min(0.5),
            ),
            LagrangePoint::L2 => bracketed_newton(
                |g| {
                    let f = (1.0 - mu + g) - (1.0 - mu) / (1.0 + g).powi(2) - mu / (g * g);
                    let df = 1.0 + 2.0 * (1.0 - mu) / (1.0 + g).powi(3) + 2.0 * mu / g.powi(3);
                    (f, df)
                },
                0.0,
                2.0,
                hill,
            ),
        }
    }

    /// Synodic x coordinate of the collinear point.
    pub fn lagrange_point_x(&self, point: LagrangePoint) -> f64 {
        let gamma = self.collinear_distance(point);
        match point {
            LagrangePoint::L1 => 1.0 - self.mu - gamma,
            LagrangePoint::L2 => 1.0 - self.mu + gamma,
        }
    }

    /// Distances to the larger and smaller primary.
    pub fn primary_distances(&self, position: &Vector3<f64>) -> (f64, f64) {
        let mu = self.mu;
        let (x, y, z) = (position[0], position[1], position[2]);
        let r1 = ((x + mu).powi(2) + y * y + z * z).sqrt();
        let r2 = ((x - 1.0 + mu).powi(2) + y * y + z * z).sqrt();
        (r1, r2)
    }

    /// Effective (pseudo-)potential, Omega = (x^2 + y^2)/2 + (1-mu)/r1 + mu/r2.
    pub fn effective_potential(&self, position: &Vector3<f64>) -> f64 {
        let (r1, r2) = self.primary_distances(position);
        0.5 * (position[0].powi(2) + position[1].powi(2))
            + (1.0 - self.mu) / r1
            + self.mu / r2
    }

    pub fn jacobi_constant(&self, state: &State) -> f64 {
        let position = state.fixed_rows::<3>(0).into_owned();
        let speed_sq = state.fixed_rows::<3>(3).norm_squared();
        2.0 * self.effective_potential(&position) - speed_sq
    }
}

/// Catalogue of commonly studied primary pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamedSystem {
    EarthMoon,
    SunEarth,
    SunMars,
    SunJupiter,
    JupiterEuropa,
    SaturnTitan,
}

impl NamedSystem {
    pub const ALL: [NamedSystem; 6] = [
        NamedSystem::EarthMoon,
        NamedSystem::SunEarth,
        NamedSystem::SunMars,
        NamedSystem::SunJupiter,
        NamedSystem::JupiterEuropa,
        NamedSystem::SaturnTitan,
    ];

    pub fn mass_parameter(self) -> f64 {
        match self {
            NamedSystem::EarthMoon => 1.215_058_560_962_404e-2,
            NamedSystem::SunEarth => 3.003_480_594e-6,
            NamedSystem::SunMars => 3.227_151e-7,
            NamedSystem::SunJupiter => 9.538_811e-4,
            NamedSystem::JupiterEuropa => 2.528_017e-5,
            NamedSystem::SaturnTitan => 2.366_393e-4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NamedSystem::EarthMoon => "earth-moon",
            NamedSystem::SunEarth => "sun-earth",
            NamedSystem::SunMars => "sun-mars",
            NamedSystem::SunJupiter => "sun-jupiter",
            NamedSystem::JupiterEuropa => "jupiter-europa",
            NamedSystem::SaturnTitan => "saturn-titan",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Self::ALL
            .into_iter()
            .find(|system| system.name() == normalized)
    }

    pub fn system(self) -> Cr3bpSystem {
        Cr3bpSystem {
            mu: self.mass_parameter(),
        }
    }
}

impl fmt::Display for NamedSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Newton iteration that falls back to bisection whenever a step leaves the bracket.
/// `f` returns the residual and its derivative; the residual must change sign on (lo, hi).
fn bracketed_newton<F>(f: F, mut lo: f64, mut hi: f64, guess: f64) -> f64
where
    F: Fn(f64) -> (f64, f64),
{
    let mut x = guess.clamp(lo + f64::EPSILON, hi - f64::EPSILON);
    for _ in 0..LAGRANGE_NEWTON_MAX_ITERS {
        let (value, derivative) = f(x);
        if value == 0.0 {
            return x;
        }
        // Residuals are monotone on the bracket, so the sign tells which side the root is on.
        let increasing = derivative > 0.0;
        if (value > 0.0) == increasing {
            hi = x;
        } else {
            lo = x;
        }
        let newton = x - value / derivative;
        let next = if newton.is_finite() && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
        if (next - x).abs() <= LAGRANGE_NEWTON_TOL * x.abs().max(1.0) {
            return next;
        }
        x = next;
    }
    x
}
