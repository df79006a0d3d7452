//! Propagation helpers over the CR3BP flow.
//!
//! Every helper owns a fresh integrator, so calls are independent and can run
//! on separate threads.

use serde::{Deserialize, Serialize};

use crate::dynamics::{augment, split, Cr3bpDynamics};
use crate::error::IntegrationError;
use crate::solvers::{Dopri5, EventOutcome};
use crate::system::Cr3bpSystem;
use crate::types::{IntegratorSettings, State, Stm, AUGMENTED_DIM};

/// Sampled states along a propagated arc.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: Vec<State>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn last(&self) -> Option<(f64, &State)> {
        self.times.last().copied().zip(self.states.last())
    }
}

/// First `y = 0` crossing after the initial epoch.
#[derive(Debug, Clone, Copy)]
pub struct Crossing {
    pub time: f64,
    pub state: State,
    pub stm: Stm,
}

/// `count` evenly spaced times from 0 to `end`, endpoints included.
pub fn evenly_spaced(end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let denom = (count - 1) as f64;
            let mut times: Vec<f64> = (0..count).map(|i| end * (i as f64) / denom).collect();
            times[count - 1] = end;
            times
        }
    }
}

/// Propagates a 6-state for `duration` (negative runs backward).
pub fn propagate(
    system: &Cr3bpSystem,
    state: &State,
    duration: f64,
    settings: &IntegratorSettings,
) -> Result<State, IntegrationError> {
    let mut y = [0.0; 6];
    y.copy_from_slice(state.as_slice());
    let mut solver = Dopri5::new(6, *settings);
    solver.integrate(&Cr3bpDynamics::new(system), 0.0, &mut y, duration)?;
    Ok(State::from_column_slice(&y))
}

/// Propagates a state together with its STM, starting from Phi = I.
pub fn propagate_with_stm(
    system: &Cr3bpSystem,
    state: &State,
    duration: f64,
    settings: &IntegratorSettings,
) -> Result<(State, Stm), IntegrationError> {
    let mut aug = augment(state);
    let mut solver = Dopri5::new(AUGMENTED_DIM, *settings);
    solver.integrate(&Cr3bpDynamics::with_stm(system), 0.0, &mut aug, duration)?;
    Ok(split(&aug))
}

/// Propagates state and STM forward to the first crossing of the `y = 0`
/// plane, searching up to `max_time`. Returns `None` when no crossing occurs.
pub fn propagate_to_crossing(
    system: &Cr3bpSystem,
    state: &State,
    max_time: f64,
    settings: &IntegratorSettings,
) -> Result<Option<Crossing>, IntegrationError> {
    let mut aug = augment(state);
    let mut solver = Dopri5::new(AUGMENTED_DIM, *settings);
    let plane = |_t: f64, x: &[f64]| x[1];
    let outcome = solver.integrate_to_event(
        &Cr3bpDynamics::with_stm(system),
        &plane,
        0.0,
        &mut aug,
        max_time,
    )?;
    Ok(match outcome {
        EventOutcome::Event { t } => {
            let (state, stm) = split(&aug);
            Some(Crossing {
                time: t,
                state,
                stm,
            })
        }
        EventOutcome::Completed { .. } => None,
    })
}

/// State and STM at each requested time (monotone, starting at or after 0).
pub fn stm_history(
    system: &Cr3bpSystem,
    state: &State,
    times: &[f64],
    settings: &IntegratorSettings,
) -> Result<Vec<(State, Stm)>, IntegrationError> {
    let mut aug = augment(state);
    let mut solver = Dopri5::new(AUGMENTED_DIM, *settings);
    let mut history = Vec::with_capacity(times.len());
    solver.integrate_with_stops(
        &Cr3bpDynamics::with_stm(system),
        0.0,
        &mut aug,
        times,
        |_, y| history.push(split(y)),
    )?;
    Ok(history)
}

/// Samples `samples` evenly spaced states over `duration` (negative runs
/// backward). On an integration failure, returns what was sampled so far
/// together with the error.
pub fn sample_until_failure(
    system: &Cr3bpSystem,
    state: &State,
    duration: f64,
    samples: usize,
    settings: &IntegratorSettings,
) -> (Trajectory, Option<IntegrationError>) {
    let times = evenly_spaced(duration, samples);
    let mut trajectory = Trajectory {
        times: Vec::with_capacity(times.len()),
        states: Vec::with_capacity(times.len()),
    };
    let mut y = [0.0; 6];
    y.copy_from_slice(state.as_slice());
    let mut solver = Dopri5::new(6, *settings);
    let result = solver.integrate_with_stops(
        &Cr3bpDynamics::new(system),
        0.0,
        &mut y,
        &times,
        |t, x| {
            trajectory.times.push(t);
            trajectory.states.push(State::from_column_slice(x));
        },
    );
    (trajectory, result.err())
}

/// Samples `samples` evenly spaced states over `duration`.
pub fn sample_trajectory(
    system: &Cr3bpSystem,
    state: &State,
    duration: f64,
    samples: usize,
    settings: &IntegratorSettings,
) -> Result<Trajectory, IntegrationError> {
    match sample_until_failure(system, state, duration, samples, settings) {
        (trajectory, None) => Ok(trajectory),
        (_, Some(error)) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::NamedSystem;
    use approx::assert_relative_eq;

    fn lyapunov_like_state() -> State {
        State::new(0.85, 0.0, 0.0, 0.0, -0.05, 0.0)
    }

    #[test]
    fn evenly_spaced_includes_endpoints() {
        assert_eq!(evenly_spaced(2.0, 5), vec![0.0, 0.5, 1.0, 1.5, 2.0]);
        assert_eq!(evenly_spaced(-1.0, 3), vec![0.0, -0.5, -1.0]);
        assert_eq!(evenly_spaced(3.0, 1), vec![0.0]);
        assert!(evenly_spaced(3.0, 0).is_empty());
    }

    #[test]
    fn jacobi_constant_is_conserved() {
        let system = NamedSystem::EarthMoon.system();
        let state = lyapunov_like_state();
        let settings = IntegratorSettings::default();
        let trajectory = sample_trajectory(&system, &state, 3.0, 7, &settings).expect("sample");
        let c0 = system.jacobi_constant(&state);
        for sample in &trajectory.states {
            assert_relative_eq!(system.jacobi_constant(sample), c0, epsilon = 1e-11);
        }
    }

    #[test]
    fn stm_matches_finite_difference_of_flow() {
        let system = NamedSystem::EarthMoon.system();
        let state = lyapunov_like_state();
        let settings = IntegratorSettings::default();
        let duration = 1.2;
        let (_, stm) = propagate_with_stm(&system, &state, duration, &settings).expect("stm");
        let h = 1e-7;
        for j in 0..6 {
            let mut plus = state;
            let mut minus = state;
            plus[j] += h;
            minus[j] -= h;
            let column = (propagate(&system, &plus, duration, &settings).expect("plus")
                - propagate(&system, &minus, duration, &settings).expect("minus"))
                / (2.0 * h);
            for i in 0..6 {
                assert!(
                    (stm[(i, j)] - column[i]).abs() < 1e-5 * stm[(i, j)].abs().max(1.0),
                    "Phi[{}, {}] = {} vs {}",
                    i,
                    j,
                    stm[(i, j)],
                    column[i]
                );
            }
        }
    }

    #[test]
    fn crossing_lands_on_plane() {
        let system = NamedSystem::EarthMoon.system();
        let state = lyapunov_like_state();
        let crossing = propagate_to_crossing(&system, &state, 10.0, &IntegratorSettings::default())
            .expect("integrate")
            .expect("crossing");
        assert!(crossing.state[1].abs() < 1e-13);
        assert!(crossing.time > 0.0);
    }

    #[test]
    fn stm_history_starts_at_identity() {
        let system = NamedSystem::EarthMoon.system();
        let state = lyapunov_like_state();
        let history = stm_history(
            &system,
            &state,
            &[0.0, 0.4, 0.8],
            &IntegratorSettings::default(),
        )
        .expect("history");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].0, state);
        assert_eq!(history[0].1, Stm::identity());
    }

    #[test]
    fn collision_truncates_sampling() {
        let system = NamedSystem::EarthMoon.system();
        // Drop straight onto the Moon from rest just above it.
        let state = State::new(1.0 - system.mu(), 0.0, 1e-3, 0.0, 0.0, 0.0);
        let (trajectory, error) =
            sample_until_failure(&system, &state, 5.0, 50, &IntegratorSettings::default());
        assert!(error.is_some());
        assert!(trajectory.len() < 50);
        assert!(sample_trajectory(&system, &state, 5.0, 50, &IntegratorSettings::default()).is_err());
    }
}
