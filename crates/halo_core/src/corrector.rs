//! Half-period differential corrector for symmetric halo orbits.
//!
//! Halo orbits are symmetric about the x-z plane, so a state starting on
//! `y = 0` with `vx = vz = 0` that crosses `y = 0` again with `vx = vz = 0`
//! closes after twice that crossing time. Each Newton step propagates the
//! state with its STM to the crossing and adjusts two initial components plus
//! the half-period so that the crossing velocities vanish.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::analytical::{richardson_halo, HaloGuess};
use crate::dynamics::equations_of_motion;
use crate::error::{HaloError, Result};
use crate::propagation::{
    propagate, propagate_to_crossing, sample_trajectory, Crossing, Trajectory,
};
use crate::system::Cr3bpSystem;
use crate::types::{
    CorrectorSettings, HaloSettings, Hemisphere, IntegratorSettings, LagrangePoint, State,
};

/// Crossing search window as a multiple of the current half-period estimate.
const CROSSING_WINDOW: f64 = 2.0;
/// Row-scaled determinant below which the Newton matrix counts as singular.
const SINGULARITY_THRESHOLD: f64 = 1e-12;
const ROW_NORM_FLOOR: f64 = 1e-14;

/// Which initial coordinate stays fixed while the corrector iterates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionFormula {
    /// Hold `z0`, solve for `x0`, `vy0` and the half-period.
    SpatialTarget,
    /// Hold `x0`, solve for `z0`, `vy0` and the half-period.
    PlanarTarget,
}

impl CorrectionFormula {
    /// State index adjusted alongside `vy0`.
    fn free_index(self) -> usize {
        match self {
            CorrectionFormula::SpatialTarget => 0,
            CorrectionFormula::PlanarTarget => 2,
        }
    }
}

impl fmt::Display for CorrectionFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrectionFormula::SpatialTarget => f.write_str("spatial (fixed z0)"),
            CorrectionFormula::PlanarTarget => f.write_str("planar (fixed x0)"),
        }
    }
}

/// Planar targets must hold `x0`: with `z0 = 0` the spatial matrix has a zero row.
pub fn select_formula(z_amplitude: f64) -> CorrectionFormula {
    if z_amplitude == 0.0 {
        CorrectionFormula::PlanarTarget
    } else {
        CorrectionFormula::SpatialTarget
    }
}

/// Why an otherwise well-posed correction gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionFailure {
    MaxIterations,
    /// No `y = 0` crossing inside the search window.
    NoCrossing,
    /// The integrator failed, typically a close approach to a primary.
    IntegrationBreakdown,
}

impl fmt::Display for CorrectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CorrectionFailure::MaxIterations => "iteration budget exhausted",
            CorrectionFailure::NoCrossing => "no y = 0 crossing found",
            CorrectionFailure::IntegrationBreakdown => "integration broke down",
        };
        f.write_str(text)
    }
}

/// A corrected periodic halo orbit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaloOrbit {
    pub system: Cr3bpSystem,
    /// `[x0, 0, z0, 0, vy0, 0]` on the x-z plane.
    pub initial_state: State,
    pub period: f64,
    pub lagrange_point: LagrangePoint,
    pub z_amplitude: f64,
    pub hemisphere: Hemisphere,
}

impl HaloOrbit {
    pub fn half_period(&self) -> f64 {
        0.5 * self.period
    }

    pub fn jacobi_constant(&self) -> f64 {
        self.system.jacobi_constant(&self.initial_state)
    }

    /// Max-norm distance between the initial state and its image after one period.
    pub fn periodicity_error(&self, settings: &IntegratorSettings) -> Result<f64> {
        let end = propagate(&self.system, &self.initial_state, self.period, settings)?;
        Ok((end - self.initial_state).amax())
    }

    /// Largest of `|y|`, `|vx|`, `|vz|` after half a period.
    pub fn symmetry_residual(&self, settings: &IntegratorSettings) -> Result<f64> {
        let mid = propagate(&self.system, &self.initial_state, self.half_period(), settings)?;
        Ok(mid[1].abs().max(mid[3].abs()).max(mid[5].abs()))
    }

    /// `count` evenly spaced states over one period.
    pub fn sample(&self, count: usize, settings: &IntegratorSettings) -> Result<Trajectory> {
        Ok(sample_trajectory(
            &self.system,
            &self.initial_state,
            self.period,
            count,
            settings,
        )?)
    }
}

/// Result of one correction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CorrectionOutcome {
    Converged {
        orbit: HaloOrbit,
        iterations: usize,
    },
    Failed {
        reason: CorrectionFailure,
        last_residual: f64,
        iterations: usize,
    },
}

impl CorrectionOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, CorrectionOutcome::Converged { .. })
    }

    pub fn orbit(&self) -> Option<&HaloOrbit> {
        match self {
            CorrectionOutcome::Converged { orbit, .. } => Some(orbit),
            CorrectionOutcome::Failed { .. } => None,
        }
    }

    pub fn into_orbit(self) -> Result<HaloOrbit> {
        match self {
            CorrectionOutcome::Converged { orbit, .. } => Ok(orbit),
            CorrectionOutcome::Failed {
                reason,
                last_residual,
                ..
            } => Err(HaloError::NotConverged {
                reason,
                residual: last_residual,
            }),
        }
    }
}

fn validate(guess: &HaloGuess, settings: &CorrectorSettings) -> Result<()> {
    if !(settings.tolerance > 0.0) {
        return Err(HaloError::InvalidInput(
            "corrector tolerance must be positive".to_string(),
        ));
    }
    if settings.max_iterations == 0 {
        return Err(HaloError::InvalidInput(
            "max_iterations must be greater than zero".to_string(),
        ));
    }
    if !guess.half_period.is_finite() || guess.half_period <= 0.0 {
        return Err(HaloError::InvalidInput(format!(
            "half-period estimate must be positive, got {}",
            guess.half_period
        )));
    }
    if guess.initial_state.iter().any(|v| !v.is_finite()) {
        return Err(HaloError::InvalidInput(
            "initial guess contains non-finite components".to_string(),
        ));
    }
    Ok(())
}

/// Solves for `(d_free, d_vy0, d_half_period)` that cancel the crossing's `y`, `vx`, `vz`.
fn newton_step(mu: f64, crossing: &Crossing, formula: CorrectionFormula) -> Result<Vector3<f64>> {
    let free = formula.free_index();
    let phi = &crossing.stm;
    let rate = equations_of_motion(mu, &crossing.state);

    let mut matrix = Matrix3::zeros();
    let mut rhs = Vector3::zeros();
    for (row, &component) in [1usize, 3, 5].iter().enumerate() {
        matrix[(row, 0)] = phi[(component, free)];
        matrix[(row, 1)] = phi[(component, 4)];
        matrix[(row, 2)] = rate[component];
        rhs[row] = -crossing.state[component];
    }

    let singular = HaloError::SingularCorrection { formula };
    let mut scale = 1.0;
    for row in matrix.row_iter() {
        let norm = row.norm();
        if !(norm > ROW_NORM_FLOOR) {
            return Err(singular);
        }
        scale *= norm;
    }
    if (matrix.determinant() / scale).abs() < SINGULARITY_THRESHOLD {
        return Err(singular);
    }
    matrix.lu().solve(&rhs).ok_or(singular)
}

/// Runs the half-period differential corrector from `guess`.
///
/// Ordinary non-convergence comes back as `CorrectionOutcome::Failed`; a
/// singular Newton matrix (wrong formula for the configuration) is an error.
pub fn correct_halo(
    system: &Cr3bpSystem,
    guess: &HaloGuess,
    formula: CorrectionFormula,
    corrector: &CorrectorSettings,
    integrator: &IntegratorSettings,
) -> Result<CorrectionOutcome> {
    validate(guess, corrector)?;

    let free = formula.free_index();
    let mut state = guess.initial_state;
    let mut half_period = guess.half_period;
    let mut residual = f64::INFINITY;
    let mut iterations = 0usize;

    loop {
        let window = CROSSING_WINDOW * half_period;
        let crossing = match propagate_to_crossing(system, &state, window, integrator) {
            Ok(Some(crossing)) => crossing,
            Ok(None) => {
                debug!("no crossing within t = {:.6} after {} corrections", window, iterations);
                return Ok(CorrectionOutcome::Failed {
                    reason: CorrectionFailure::NoCrossing,
                    last_residual: residual,
                    iterations,
                });
            }
            Err(err) => {
                debug!("integration failed after {} corrections: {}", iterations, err);
                return Ok(CorrectionOutcome::Failed {
                    reason: CorrectionFailure::IntegrationBreakdown,
                    last_residual: residual,
                    iterations,
                });
            }
        };

        residual = crossing.state[3].abs().max(crossing.state[5].abs());
        debug!(
            iteration = iterations,
            residual,
            half_period = crossing.time,
            "halo correction step"
        );

        if residual < corrector.tolerance {
            let orbit = HaloOrbit {
                system: *system,
                initial_state: state,
                period: 2.0 * crossing.time,
                lagrange_point: guess.lagrange_point,
                z_amplitude: guess.z_amplitude,
                hemisphere: guess.hemisphere,
            };
            return Ok(CorrectionOutcome::Converged { orbit, iterations });
        }
        if iterations >= corrector.max_iterations {
            return Ok(CorrectionOutcome::Failed {
                reason: CorrectionFailure::MaxIterations,
                last_residual: residual,
                iterations,
            });
        }

        let delta = newton_step(system.mu(), &crossing, formula)?;
        state[free] += delta[0];
        state[4] += delta[1];
        half_period = crossing.time + delta[2];
        iterations += 1;

        if state.iter().any(|v| !v.is_finite()) || !(half_period > 0.0) {
            return Ok(CorrectionOutcome::Failed {
                reason: CorrectionFailure::IntegrationBreakdown,
                last_residual: residual,
                iterations,
            });
        }
    }
}

/// Seeds with Richardson's approximation, picks the formula from `z_amplitude`
/// and corrects.
pub fn compute_halo(
    system: &Cr3bpSystem,
    point: LagrangePoint,
    z_amplitude: f64,
    hemisphere: Hemisphere,
    settings: &HaloSettings,
) -> Result<CorrectionOutcome> {
    let seed = richardson_halo(system, point, z_amplitude, hemisphere, 1)?;
    correct_halo(
        system,
        &seed.initial_guess(),
        select_formula(z_amplitude),
        &settings.corrector,
        &settings.integrator,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::NamedSystem;

    fn l1_guess(system: &Cr3bpSystem, z_amplitude: f64) -> HaloGuess {
        richardson_halo(
            system,
            LagrangePoint::L1,
            z_amplitude,
            Hemisphere::Northern,
            1,
        )
        .expect("seed")
        .initial_guess()
    }

    #[test]
    fn formula_selection_depends_only_on_zero_amplitude() {
        assert_eq!(select_formula(0.0), CorrectionFormula::PlanarTarget);
        assert_eq!(select_formula(1e-9), CorrectionFormula::SpatialTarget);
        assert_eq!(select_formula(0.02), CorrectionFormula::SpatialTarget);
    }

    #[test]
    fn earth_moon_l1_halo_converges() {
        let system = Cr3bpSystem::new(0.0121505856).expect("system");
        let settings = HaloSettings::default();
        let outcome = compute_halo(
            &system,
            LagrangePoint::L1,
            0.005,
            Hemisphere::Northern,
            &settings,
        )
        .expect("correction");
        assert!(outcome.is_converged(), "outcome = {:?}", outcome);
        let orbit = outcome.into_orbit().expect("orbit");

        assert!(orbit.period > 1.5 && orbit.period < 3.5, "period = {}", orbit.period);
        assert_eq!(orbit.initial_state[2], l1_guess(&system, 0.005).initial_state[2]);
        assert!(orbit.initial_state[2] > 0.0);

        let integrator = settings.integrator;
        let periodicity = orbit.periodicity_error(&integrator).expect("periodicity");
        assert!(periodicity < 1e-6, "periodicity error = {:e}", periodicity);
        let symmetry = orbit.symmetry_residual(&integrator).expect("symmetry");
        assert!(symmetry < 1e-9, "symmetry residual = {:e}", symmetry);
    }

    #[test]
    fn southern_l2_halo_converges_below_plane() {
        let system = NamedSystem::EarthMoon.system();
        let orbit = compute_halo(
            &system,
            LagrangePoint::L2,
            0.01,
            Hemisphere::Southern,
            &HaloSettings::default(),
        )
        .expect("correction")
        .into_orbit()
        .expect("orbit");
        assert!(orbit.initial_state[2] < 0.0);
        assert!(orbit.initial_state[0] > system.lagrange_point_x(LagrangePoint::L1));
        assert!(orbit.period > 1.5 && orbit.period < 4.0, "period = {}", orbit.period);
    }

    #[test]
    fn spatial_formula_is_singular_for_planar_target() {
        let system = NamedSystem::EarthMoon.system();
        let result = correct_halo(
            &system,
            &l1_guess(&system, 0.0),
            CorrectionFormula::SpatialTarget,
            &CorrectorSettings::default(),
            &IntegratorSettings::default(),
        );
        assert!(matches!(
            result,
            Err(HaloError::SingularCorrection {
                formula: CorrectionFormula::SpatialTarget
            })
        ));
    }

    #[test]
    fn planar_formula_converges_to_lyapunov_orbit() {
        let system = NamedSystem::EarthMoon.system();
        let guess = l1_guess(&system, 0.0);
        let outcome = correct_halo(
            &system,
            &guess,
            CorrectionFormula::PlanarTarget,
            &CorrectorSettings::default(),
            &IntegratorSettings::default(),
        )
        .expect("correction");
        let orbit = outcome.orbit().expect("converged");
        assert_eq!(orbit.initial_state[0], guess.initial_state[0]);
        assert_eq!(orbit.initial_state[2], 0.0);
        assert!(orbit.period > 1.5 && orbit.period < 3.5, "period = {}", orbit.period);
    }

    #[test]
    fn iteration_budget_is_reported_as_failure() {
        let system = NamedSystem::EarthMoon.system();
        let settings = CorrectorSettings {
            tolerance: 1e-12,
            max_iterations: 1,
        };
        let outcome = correct_halo(
            &system,
            &l1_guess(&system, 0.005),
            CorrectionFormula::SpatialTarget,
            &settings,
            &IntegratorSettings::default(),
        )
        .expect("correction");
        match &outcome {
            CorrectionOutcome::Failed {
                reason,
                last_residual,
                iterations,
            } => {
                assert_eq!(*reason, CorrectionFailure::MaxIterations);
                assert_eq!(*iterations, 1);
                assert!(last_residual.is_finite());
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(matches!(
            outcome.into_orbit(),
            Err(HaloError::NotConverged {
                reason: CorrectionFailure::MaxIterations,
                ..
            })
        ));
    }

    #[test]
    fn short_search_window_reports_missing_crossing() {
        let system = NamedSystem::EarthMoon.system();
        let mut guess = l1_guess(&system, 0.005);
        guess.half_period = 0.01;
        let outcome = correct_halo(
            &system,
            &guess,
            CorrectionFormula::SpatialTarget,
            &CorrectorSettings::default(),
            &IntegratorSettings::default(),
        )
        .expect("correction");
        assert!(matches!(
            outcome,
            CorrectionOutcome::Failed {
                reason: CorrectionFailure::NoCrossing,
                iterations: 0,
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_settings() {
        let system = NamedSystem::EarthMoon.system();
        let settings = CorrectorSettings {
            tolerance: 0.0,
            max_iterations: 10,
        };
        assert!(matches!(
            correct_halo(
                &system,
                &l1_guess(&system, 0.005),
                CorrectionFormula::SpatialTarget,
                &settings,
                &IntegratorSettings::default(),
            ),
            Err(HaloError::InvalidInput(_))
        ));
    }
}
