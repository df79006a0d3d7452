//! Monodromy matrix and its real eigenstructure.

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::corrector::HaloOrbit;
use crate::error::{HaloError, Result};
use crate::propagation::propagate_with_stm;
use crate::types::{HaloSettings, State, Stm};

/// Imaginary parts below this (relative to the modulus) count as real.
const REAL_EIGENVALUE_TOL: f64 = 1e-8;

/// Unit eigenvectors of the dominant real eigenvalue pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EigenDirections {
    pub stable: State,
    pub unstable: State,
    pub stable_value: f64,
    pub unstable_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonodromyAnalysis {
    pub matrix: Stm,
    pub eigenvalues: Vec<Complex<f64>>,
    pub directions: EigenDirections,
    /// Max-norm full-period return error measured while building the matrix.
    pub periodicity_error: f64,
}

impl MonodromyAnalysis {
    pub fn stability_index(&self) -> f64 {
        0.5 * (self.directions.unstable_value.abs() + self.directions.stable_value.abs())
    }

    /// True when at least two eigenvalues lie within `tolerance` of the unit circle.
    pub fn has_unit_pair(&self, tolerance: f64) -> bool {
        self.eigenvalues
            .iter()
            .filter(|value| (value.norm() - 1.0).abs() <= tolerance)
            .count()
            >= 2
    }
}

/// Propagates one period with the STM. Returns Phi(T, 0) and the return error.
pub fn monodromy_matrix(orbit: &HaloOrbit, settings: &HaloSettings) -> Result<(Stm, f64)> {
    let (end, stm) = propagate_with_stm(
        &orbit.system,
        &orbit.initial_state,
        orbit.period,
        &settings.integrator,
    )?;
    let error = (end - orbit.initial_state).amax();
    if !error.is_finite() || error > settings.periodicity_tolerance {
        return Err(HaloError::NotPeriodic { error });
    }
    Ok((stm, error))
}

/// Builds the monodromy matrix and extracts the stable and unstable directions.
pub fn analyze_monodromy(orbit: &HaloOrbit, settings: &HaloSettings) -> Result<MonodromyAnalysis> {
    let (matrix, periodicity_error) = monodromy_matrix(orbit, settings)?;
    let (directions, eigenvalues) = eigendirections(&matrix)?;
    Ok(MonodromyAnalysis {
        matrix,
        eigenvalues,
        directions,
        periodicity_error,
    })
}

/// Picks the largest real eigenvalue above one as unstable and the smallest
/// real eigenvalue below one as stable, and computes their eigenvectors.
pub fn eigendirections(matrix: &Stm) -> Result<(EigenDirections, Vec<Complex<f64>>)> {
    let eigenvalues: Vec<Complex<f64>> = matrix.complex_eigenvalues().iter().copied().collect();

    let real: Vec<f64> = eigenvalues
        .iter()
        .filter(|value| value.im.abs() <= REAL_EIGENVALUE_TOL * value.norm().max(1.0))
        .map(|value| value.re)
        .collect();

    let unstable_value = real
        .iter()
        .copied()
        .filter(|value| value.abs() > 1.0)
        .max_by(|a, b| a.abs().total_cmp(&b.abs()))
        .ok_or(HaloError::NoRealEigenstructure)?;
    let stable_value = real
        .iter()
        .copied()
        .filter(|value| value.abs() < 1.0)
        .min_by(|a, b| a.abs().total_cmp(&b.abs()))
        .ok_or(HaloError::NoRealEigenstructure)?;

    let directions = EigenDirections {
        stable: real_eigenvector(matrix, stable_value)?,
        unstable: real_eigenvector(matrix, unstable_value)?,
        stable_value,
        unstable_value,
    };
    Ok((directions, eigenvalues))
}

/// Null direction of `M - lambda I`: the right singular vector of the smallest
/// singular value, normalized with its largest component positive.
fn real_eigenvector(matrix: &Stm, lambda: f64) -> Result<State> {
    let shifted = matrix - Stm::identity() * lambda;
    let svd = shifted.svd(false, true);
    let v_t = svd.v_t.ok_or(HaloError::NoRealEigenstructure)?;
    let index = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(index, _)| index)
        .ok_or(HaloError::NoRealEigenstructure)?;

    let mut vector: State = v_t.row(index).transpose();
    let norm = vector.norm();
    if !(norm > 0.0) || !norm.is_finite() {
        return Err(HaloError::NoRealEigenstructure);
    }
    vector /= norm;
    if vector[vector.iamax()] < 0.0 {
        vector = -vector;
    }
    Ok(vector)
}
