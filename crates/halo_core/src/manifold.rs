//! Stable and unstable invariant manifolds of a halo orbit.
//!
//! Seeds sit at evenly spaced phases along one period. Each seed is the orbit
//! state displaced by `epsilon` along the monodromy eigenvector carried to that
//! phase by the STM. Unstable seeds run forward in time, stable seeds backward.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::corrector::HaloOrbit;
use crate::error::{HaloError, IntegrationError, Result};
use crate::monodromy::{analyze_monodromy, monodromy_matrix, EigenDirections};
use crate::propagation::{sample_until_failure, stm_history, Trajectory};
use crate::types::{HaloSettings, IntegratorSettings, ManifoldSettings, ManifoldStability, State};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TrajectoryStatus {
    Completed,
    /// Integration broke down (usually a close approach to a primary) at `time`.
    /// Samples stop at the last output time before it.
    Truncated { time: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifoldTrajectory {
    /// Orbit phase of the seed, in `[0, period)`.
    pub phase_time: f64,
    pub seed: State,
    pub trajectory: Trajectory,
    pub status: TrajectoryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifold {
    pub stability: ManifoldStability,
    pub epsilon: f64,
    /// Ordered by phase time.
    pub trajectories: Vec<ManifoldTrajectory>,
}

impl Manifold {
    pub fn truncated_count(&self) -> usize {
        self.trajectories
            .iter()
            .filter(|t| matches!(t.status, TrajectoryStatus::Truncated { .. }))
            .count()
    }
}

fn validate(settings: &ManifoldSettings) -> Result<()> {
    if !settings.epsilon.is_finite() || settings.epsilon == 0.0 {
        return Err(HaloError::InvalidInput(format!(
            "manifold epsilon must be finite and non-zero, got {}",
            settings.epsilon
        )));
    }
    if !settings.duration.is_finite() || settings.duration <= 0.0 {
        return Err(HaloError::InvalidInput(format!(
            "manifold duration must be positive, got {}",
            settings.duration
        )));
    }
    if settings.trajectories == 0 {
        return Err(HaloError::InvalidInput(
            "at least one manifold trajectory is required".to_string(),
        ));
    }
    if settings.points_per_trajectory < 2 {
        return Err(HaloError::InvalidInput(
            "points_per_trajectory must be at least 2".to_string(),
        ));
    }
    Ok(())
}

/// Perturbed seed states `(phase_time, seed)` in phase order.
pub fn manifold_seeds(
    orbit: &HaloOrbit,
    directions: &EigenDirections,
    settings: &ManifoldSettings,
    integrator: &IntegratorSettings,
) -> Result<Vec<(f64, State)>> {
    validate(settings)?;
    let vector = match settings.stability {
        ManifoldStability::Stable => directions.stable,
        ManifoldStability::Unstable => directions.unstable,
    };

    let count = settings.trajectories;
    let phases: Vec<f64> = (0..count)
        .map(|i| orbit.period * (i as f64) / (count as f64))
        .collect();
    let history = stm_history(&orbit.system, &orbit.initial_state, &phases, integrator)?;

    phases
        .iter()
        .zip(history.iter())
        .map(|(&phase, (state, stm))| {
            let carried = stm * vector;
            let norm = carried.norm();
            if !(norm > 0.0) || !norm.is_finite() {
                return Err(HaloError::NoRealEigenstructure);
            }
            Ok((phase, state + carried * (settings.epsilon / norm)))
        })
        .collect()
}

/// Solver time of the failure, or the last sample when the error carries none.
fn breakdown_time(trajectory: &Trajectory, err: &IntegrationError) -> f64 {
    err.time()
        .unwrap_or_else(|| trajectory.last().map_or(0.0, |(t, _)| t))
}

fn trace_seed(
    orbit: &HaloOrbit,
    phase_time: f64,
    seed: State,
    settings: &ManifoldSettings,
    integrator: &IntegratorSettings,
) -> ManifoldTrajectory {
    let span = settings.duration * settings.stability.time_direction();
    let (trajectory, failure) = sample_until_failure(
        &orbit.system,
        &seed,
        span,
        settings.points_per_trajectory,
        integrator,
    );
    let status = match failure {
        None => TrajectoryStatus::Completed,
        Some(err) => {
            let time = breakdown_time(&trajectory, &err);
            debug!("manifold seed at phase {:.6} truncated at t = {:.6}: {}", phase_time, time, err);
            TrajectoryStatus::Truncated { time }
        }
    };
    ManifoldTrajectory {
        phase_time,
        seed,
        trajectory,
        status,
    }
}

/// Generates the requested manifold branch of `orbit`.
///
/// When `directions` is `None` the monodromy eigenstructure is computed first.
/// Either way the orbit must close within `halo.periodicity_tolerance`, or the
/// call fails with `NotPeriodic`.
pub fn generate_manifold(
    orbit: &HaloOrbit,
    directions: Option<&EigenDirections>,
    settings: &ManifoldSettings,
    halo: &HaloSettings,
) -> Result<Manifold> {
    validate(settings)?;
    let directions = match directions {
        Some(directions) => {
            monodromy_matrix(orbit, halo)?;
            *directions
        }
        None => analyze_monodromy(orbit, halo)?.directions,
    };
    let seeds = manifold_seeds(orbit, &directions, settings, &halo.integrator)?;

    #[cfg(feature = "parallel")]
    let iter = seeds.par_iter();
    #[cfg(not(feature = "parallel"))]
    let iter = seeds.iter();

    let trajectories: Vec<ManifoldTrajectory> = iter
        .map(|&(phase, seed)| trace_seed(orbit, phase, seed, settings, &halo.integrator))
        .collect();

    Ok(Manifold {
        stability: settings.stability,
        epsilon: settings.epsilon,
        trajectories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytical::richardson_halo;
    use crate::corrector::compute_halo;
    use crate::propagation::propagate;
    use crate::system::NamedSystem;
    use crate::types::{Hemisphere, LagrangePoint};

    fn earth_moon_halo() -> HaloOrbit {
        compute_halo(
            &NamedSystem::EarthMoon.system(),
            LagrangePoint::L1,
            0.005,
            Hemisphere::Northern,
            &HaloSettings::default(),
        )
        .expect("correction")
        .into_orbit()
        .expect("orbit")
    }

    fn settings(stability: ManifoldStability, duration: f64) -> ManifoldSettings {
        ManifoldSettings {
            stability,
            epsilon: 1e-6,
            duration,
            trajectories: 4,
            points_per_trajectory: 20,
        }
    }

    /// Position deviation of each trajectory's last sample from the unperturbed
    /// orbit flowed over the same span.
    fn final_deviations(orbit: &HaloOrbit, manifold: &Manifold, span: f64) -> Vec<f64> {
        let integrator = IntegratorSettings::default();
        manifold
            .trajectories
            .iter()
            .map(|traj| {
                let on_orbit =
                    propagate(&orbit.system, &orbit.initial_state, traj.phase_time, &integrator)
                        .expect("phase");
                let base = propagate(&orbit.system, &on_orbit, span, &integrator).expect("base");
                let (_, last) = traj.trajectory.last().expect("samples");
                (last.fixed_rows::<3>(0) - base.fixed_rows::<3>(0)).norm()
            })
            .collect()
    }

    /// Richardson seed dressed up as an orbit; it does not close.
    fn seed_orbit() -> HaloOrbit {
        let system = NamedSystem::EarthMoon.system();
        let seed = richardson_halo(&system, LagrangePoint::L1, 0.005, Hemisphere::Northern, 1)
            .expect("seed");
        HaloOrbit {
            system,
            initial_state: seed.initial_guess().initial_state,
            period: seed.period,
            lagrange_point: LagrangePoint::L1,
            z_amplitude: 0.005,
            hemisphere: Hemisphere::Northern,
        }
    }

    #[test]
    fn seeds_are_epsilon_away_from_orbit_in_phase_order() {
        let orbit = earth_moon_halo();
        let halo = HaloSettings::default();
        let directions = analyze_monodromy(&orbit, &halo).expect("analysis").directions;
        let settings = settings(ManifoldStability::Unstable, 1.0);
        let seeds = manifold_seeds(&orbit, &directions, &settings, &halo.integrator).expect("seeds");
        assert_eq!(seeds.len(), 4);
        assert_eq!(seeds[0].0, 0.0);
        assert!(seeds.windows(2).all(|pair| pair[0].0 < pair[1].0));
        assert!(seeds.last().map_or(false, |(t, _)| *t < orbit.period));

        let expected = (seeds[0].1 - orbit.initial_state).norm();
        assert!((expected - 1e-6).abs() < 1e-12);

        let again = manifold_seeds(&orbit, &directions, &settings, &halo.integrator).expect("seeds");
        assert_eq!(seeds, again);
    }

    #[test]
    fn unstable_manifold_departs_forward_in_time() {
        let orbit = earth_moon_halo();
        let halo = HaloSettings::default();
        let settings = settings(ManifoldStability::Unstable, orbit.period);
        let manifold = generate_manifold(&orbit, None, &settings, &halo).expect("manifold");

        assert_eq!(manifold.trajectories.len(), 4);
        assert_eq!(manifold.truncated_count(), 0);
        for traj in &manifold.trajectories {
            assert_eq!(traj.trajectory.len(), 20);
            assert!(traj.trajectory.times.iter().all(|t| *t >= 0.0));
        }
        for deviation in final_deviations(&orbit, &manifold, orbit.period) {
            assert!(deviation > 5e-5, "deviation = {:e}", deviation);
        }
    }

    #[test]
    fn stable_manifold_runs_backward_and_approaches_forward() {
        let orbit = earth_moon_halo();
        let halo = HaloSettings::default();
        let settings = settings(ManifoldStability::Stable, orbit.period);
        let manifold = generate_manifold(&orbit, None, &settings, &halo).expect("manifold");

        for traj in &manifold.trajectories {
            assert!(traj.trajectory.times.iter().all(|t| *t <= 0.0));
        }
        for deviation in final_deviations(&orbit, &manifold, -orbit.period) {
            assert!(deviation > 5e-5, "backward deviation = {:e}", deviation);
        }

        // Forward in time the same seeds fall back onto the orbit.
        let integrator = halo.integrator;
        for traj in &manifold.trajectories {
            let on_orbit =
                propagate(&orbit.system, &orbit.initial_state, traj.phase_time, &integrator)
                    .expect("phase");
            let base = propagate(&orbit.system, &on_orbit, orbit.period, &integrator).expect("base");
            let end = propagate(&orbit.system, &traj.seed, orbit.period, &integrator).expect("end");
            let deviation = (end - base).norm();
            assert!(deviation < 1e-7, "forward deviation = {:e}", deviation);
        }
    }

    #[test]
    fn non_periodic_orbit_blocks_generation() {
        let result = generate_manifold(
            &seed_orbit(),
            None,
            &settings(ManifoldStability::Unstable, 1.0),
            &HaloSettings::default(),
        );
        assert!(matches!(result, Err(HaloError::NotPeriodic { .. })));
    }

    #[test]
    fn supplied_directions_do_not_bypass_periodicity_check() {
        let halo = HaloSettings::default();
        let directions = analyze_monodromy(&earth_moon_halo(), &halo)
            .expect("analysis")
            .directions;
        let result = generate_manifold(
            &seed_orbit(),
            Some(&directions),
            &settings(ManifoldStability::Unstable, 1.0),
            &halo,
        );
        assert!(matches!(result, Err(HaloError::NotPeriodic { .. })));
    }

    #[test]
    fn breakdown_time_prefers_the_solver_time() {
        let trajectory = Trajectory {
            times: vec![0.0, -0.5],
            states: vec![State::zeros(), State::zeros()],
        };
        let stalled = IntegrationError::StepSizeTooSmall { t: -0.62, h: 1e-14 };
        assert_eq!(breakdown_time(&trajectory, &stalled), -0.62);
        let budget = IntegrationError::MaxStepsExceeded(100);
        assert_eq!(breakdown_time(&trajectory, &budget), -0.5);
    }

    #[test]
    fn rejects_zero_epsilon() {
        let mut bad = settings(ManifoldStability::Unstable, 1.0);
        bad.epsilon = 0.0;
        assert!(matches!(
            generate_manifold(&seed_orbit(), None, &bad, &HaloSettings::default()),
            Err(HaloError::InvalidInput(_))
        ));
    }
}
