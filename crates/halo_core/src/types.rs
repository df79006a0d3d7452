//! Core value types and settings.
//!
//! Settings structs follow one convention: every field has a sensible
//! default and partial configurations deserialize with `#[serde(default)]`.

use nalgebra::{Matrix6, Vector6};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nondimensional synodic state `[x, y, z, vx, vy, vz]`.
pub type State = Vector6<f64>;

/// 6x6 state transition matrix.
pub type Stm = Matrix6<f64>;

/// Length of a state augmented with its row-major STM.
pub const AUGMENTED_DIM: usize = 42;

/// Collinear libration points supported by the halo solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LagrangePoint {
    L1,
    L2,
}

impl LagrangePoint {
    pub fn index(self) -> u8 {
        match self {
            LagrangePoint::L1 => 1,
            LagrangePoint::L2 => 2,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            1 => Some(LagrangePoint::L1),
            2 => Some(LagrangePoint::L2),
            _ => None,
        }
    }
}

impl fmt::Display for LagrangePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.index())
    }
}

/// Which side of the x-y plane the halo's maximum z excursion lies on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hemisphere {
    #[default]
    Northern,
    Southern,
}

impl Hemisphere {
    /// Richardson's class switch: +1 for northern (class I), -1 for southern (class II).
    pub fn sign(self) -> f64 {
        match self {
            Hemisphere::Northern => 1.0,
            Hemisphere::Southern => -1.0,
        }
    }
}

/// Adaptive integrator configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub abs_tol: f64,
    pub rel_tol: f64,
    pub initial_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    pub max_steps: u64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            abs_tol: 1e-14,
            rel_tol: 1e-14,
            initial_step: 1e-3,
            min_step: 1e-14,
            max_step: 0.1,
            max_steps: 1_000_000,
        }
    }
}

/// Newton loop configuration for the differential corrector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectorSettings {
    /// Acceptance bound on |vx| and |vz| at the half-period crossing.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for CorrectorSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 20,
        }
    }
}

/// Everything needed to turn an analytical seed into an accepted orbit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HaloSettings {
    pub integrator: IntegratorSettings,
    pub corrector: CorrectorSettings,
    /// Max-norm bound on the full-period return error of an accepted orbit.
    pub periodicity_tolerance: f64,
}

impl Default for HaloSettings {
    fn default() -> Self {
        Self {
            integrator: IntegratorSettings::default(),
            corrector: CorrectorSettings::default(),
            periodicity_tolerance: 1e-6,
        }
    }
}

/// Stable manifolds approach the orbit forward in time, unstable ones leave it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifoldStability {
    Stable,
    #[default]
    Unstable,
}

impl ManifoldStability {
    /// Propagation direction: forward for unstable, backward for stable.
    pub fn time_direction(self) -> f64 {
        match self {
            ManifoldStability::Unstable => 1.0,
            ManifoldStability::Stable => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifoldSettings {
    pub stability: ManifoldStability,
    /// Signed perturbation magnitude; the sign picks the branch.
    pub epsilon: f64,
    /// Propagation time span (always positive; direction comes from `stability`).
    pub duration: f64,
    /// Number of seed points evenly spaced over one period.
    pub trajectories: usize,
    /// Samples recorded along each trajectory, endpoints included.
    pub points_per_trajectory: usize,
}

impl Default for ManifoldSettings {
    fn default() -> Self {
        Self {
            stability: ManifoldStability::Unstable,
            epsilon: 1e-6,
            duration: 6.0,
            trajectories: 50,
            points_per_trajectory: 200,
        }
    }
}

/// Batch amplitude sweep policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub amplitude_step: f64,
    pub max_amplitude: f64,
    pub max_consecutive_failures: usize,
    pub min_period: f64,
    pub hemisphere: Hemisphere,
    pub halo: HaloSettings,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            amplitude_step: 1e-6,
            max_amplitude: 0.01,
            max_consecutive_failures: 10,
            min_period: 1.0,
            hemisphere: Hemisphere::Northern,
            halo: HaloSettings::default(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_defaults_pick_northern_unstable() {
        assert_eq!(Hemisphere::default(), Hemisphere::Northern);
        assert_eq!(ManifoldStability::default(), ManifoldStability::Unstable);
        assert_eq!(SweepSettings::default().hemisphere, Hemisphere::Northern);
        assert_eq!(ManifoldSettings::default().stability, ManifoldStability::Unstable);
    }
}
