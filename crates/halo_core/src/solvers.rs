use serde::Serialize;

use crate::error::IntegrationError;
use crate::traits::{DynamicalSystem, EventFunction};
use crate::types::IntegratorSettings;

// Dormand-Prince 5(4) tableau.
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th order weights (also the last row of A, which makes the scheme FSAL).
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Difference between the 5th and embedded 4th order weights.
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;
const ERROR_EXPONENT: f64 = 1.0 / 5.0;

const EVENT_TIME_TOL: f64 = 1e-15;
const EVENT_MAX_ITERS: usize = 100;

/// Counters accumulated across calls on one integrator.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IntegrationStats {
    pub fn_evals: u64,
    pub accepted_steps: u64,
    pub rejected_steps: u64,
}

/// How an event-terminated integration ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventOutcome {
    /// The event function crossed zero at `t`.
    Event { t: f64 },
    /// Reached the final time without a crossing.
    Completed { t: f64 },
}

struct NoEvent;

impl EventFunction for NoEvent {
    fn eval(&self, _t: f64, _x: &[f64]) -> f64 {
        1.0
    }
}

/// Adaptive Dormand-Prince 5(4) integrator.
///
/// Stage buffers are allocated once for a fixed state dimension; stepping
/// never allocates. Integration runs forward or backward depending on the sign
/// of `tf - t0`.
pub struct Dopri5 {
    settings: IntegratorSettings,
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    k7: Vec<f64>,
    tmp: Vec<f64>,
    y_new: Vec<f64>,
    h_next: f64,
    steps_taken: u64,
    pub stats: IntegrationStats,
}

impl Dopri5 {
    pub fn new(dim: usize, settings: IntegratorSettings) -> Self {
        Self {
            settings,
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            k7: vec![0.0; dim],
            tmp: vec![0.0; dim],
            y_new: vec![0.0; dim],
            h_next: settings.initial_step.abs(),
            steps_taken: 0,
            stats: IntegrationStats::default(),
        }
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    /// Integrates `y` in place from `t0` to `tf`.
    pub fn integrate<S: DynamicalSystem>(
        &mut self,
        system: &S,
        t0: f64,
        y: &mut [f64],
        tf: f64,
    ) -> Result<(), IntegrationError> {
        self.begin(system, t0, y, tf)?;
        let mut t = t0;
        self.drive(system, &NoEvent, &mut t, y, tf)?;
        Ok(())
    }

    /// Integrates through each time in `stops` (monotone in the integration
    /// direction), landing on every stop exactly and handing the state to `visit`.
    pub fn integrate_with_stops<S, F>(
        &mut self,
        system: &S,
        t0: f64,
        y: &mut [f64],
        stops: &[f64],
        mut visit: F,
    ) -> Result<(), IntegrationError>
    where
        S: DynamicalSystem,
        F: FnMut(f64, &[f64]),
    {
        let Some(&last) = stops.last() else {
            return Ok(());
        };
        self.begin(system, t0, y, last)?;
        let direction = if last >= t0 { 1.0 } else { -1.0 };
        let mut t = t0;
        for &stop in stops {
            if !stop.is_finite() || (stop - t) * direction < 0.0 {
                return Err(IntegrationError::InvalidInput(
                    "output times must be finite and monotone in the integration direction"
                        .to_string(),
                ));
            }
            self.drive(system, &NoEvent, &mut t, y, stop)?;
            visit(t, y);
        }
        Ok(())
    }

    /// Integrates until `event` changes sign or `tf` is reached.
    ///
    /// A zero of the event function at `t0` itself is ignored. The crossing
    /// time is refined with Brent's method on single steps taken from the last
    /// accepted state, so the returned state carries the full step accuracy.
    pub fn integrate_to_event<S, E>(
        &mut self,
        system: &S,
        event: &E,
        t0: f64,
        y: &mut [f64],
        tf: f64,
    ) -> Result<EventOutcome, IntegrationError>
    where
        S: DynamicalSystem,
        E: EventFunction,
    {
        self.begin(system, t0, y, tf)?;
        let mut t = t0;
        match self.drive(system, event, &mut t, y, tf)? {
            Some(t_event) => Ok(EventOutcome::Event { t: t_event }),
            None => Ok(EventOutcome::Completed { t }),
        }
    }

    fn begin<S: DynamicalSystem>(
        &mut self,
        system: &S,
        t0: f64,
        y: &[f64],
        tf: f64,
    ) -> Result<(), IntegrationError> {
        let dim = self.k1.len();
        if system.dimension() != dim || y.len() != dim {
            return Err(IntegrationError::InvalidInput(format!(
                "dimension mismatch: integrator {}, system {}, state {}",
                dim,
                system.dimension(),
                y.len()
            )));
        }
        if !t0.is_finite() || !tf.is_finite() {
            return Err(IntegrationError::InvalidInput(
                "t0 and tf must be finite".to_string(),
            ));
        }
        if let Some(index) = y.iter().position(|v| !v.is_finite()) {
            return Err(IntegrationError::InvalidInput(format!(
                "initial state component {} is not finite",
                index
            )));
        }
        let s = &self.settings;
        if !(s.abs_tol > 0.0) || !(s.rel_tol >= 0.0) {
            return Err(IntegrationError::InvalidInput(
                "abs_tol must be positive and rel_tol non-negative".to_string(),
            ));
        }
        if !(s.min_step > 0.0) || !(s.max_step >= s.min_step) || !(s.initial_step != 0.0) {
            return Err(IntegrationError::InvalidInput(
                "step limits must satisfy 0 < min_step <= max_step and initial_step != 0"
                    .to_string(),
            ));
        }
        self.h_next = s.initial_step.abs().clamp(s.min_step, s.max_step);
        self.steps_taken = 0;
        Ok(())
    }

    /// Advances from `*t` to `tf`, stopping early at an event crossing.
    fn drive<S, E>(
        &mut self,
        system: &S,
        event: &E,
        t: &mut f64,
        y: &mut [f64],
        tf: f64,
    ) -> Result<Option<f64>, IntegrationError>
    where
        S: DynamicalSystem,
        E: EventFunction,
    {
        let span = tf - *t;
        if span == 0.0 {
            return Ok(None);
        }
        let direction = span.signum();
        let min_step = self.settings.min_step;
        let max_step = self.settings.max_step;

        system.apply(*t, y, &mut self.k1);
        self.stats.fn_evals += 1;
        let mut g_prev = event.eval(*t, y);
        let mut h = self.h_next;

        loop {
            let remaining = (tf - *t) * direction;
            if remaining <= 0.0 {
                *t = tf;
                return Ok(None);
            }
            let last = h >= remaining;
            let step = if last { remaining } else { h } * direction;

            let error = self.attempt(system, *t, y, step);
            self.steps_taken += 1;
            if self.steps_taken > self.settings.max_steps {
                return Err(IntegrationError::MaxStepsExceeded(self.settings.max_steps));
            }

            if error <= 1.0 {
                self.stats.accepted_steps += 1;
                let t_new = if last { tf } else { *t + step };
                let g_new = event.eval(t_new, &self.y_new);
                if crossed(g_prev, g_new) {
                    let t_event = self.locate_event(system, event, *t, y, step, g_prev, g_new);
                    y.copy_from_slice(&self.y_new);
                    *t = t_event;
                    self.h_next = step.abs();
                    return Ok(Some(t_event));
                }
                g_prev = g_new;
                *t = t_new;
                y.copy_from_slice(&self.y_new);
                std::mem::swap(&mut self.k1, &mut self.k7);
            } else {
                self.stats.rejected_steps += 1;
                if step.abs() <= min_step {
                    if self.y_new.iter().any(|v| !v.is_finite()) {
                        return Err(IntegrationError::NonFiniteState { t: *t + step });
                    }
                    return Err(IntegrationError::StepSizeTooSmall {
                        t: *t,
                        h: step.abs(),
                    });
                }
            }

            let factor = if error.is_nan() {
                MIN_FACTOR
            } else if error == 0.0 {
                MAX_FACTOR
            } else {
                (SAFETY * error.powf(-ERROR_EXPONENT)).clamp(MIN_FACTOR, MAX_FACTOR)
            };
            let proposed = (step.abs() * factor).clamp(min_step, max_step);
            if !(last && error <= 1.0) {
                h = proposed;
                self.h_next = proposed;
            }
        }
    }

    /// One Dormand-Prince step of size `h` from `(t, y)`; `k1` must hold f(t, y).
    /// Leaves the 5th order solution in `y_new` and f(t + h, y_new) in `k7`,
    /// and returns the scaled error norm.
    fn attempt<S: DynamicalSystem>(&mut self, system: &S, t: f64, y: &[f64], h: f64) -> f64 {
        let n = y.len();

        for i in 0..n {
            self.tmp[i] = y[i] + h * A21 * self.k1[i];
        }
        system.apply(t + C2 * h, &self.tmp, &mut self.k2);

        for i in 0..n {
            self.tmp[i] = y[i] + h * (A31 * self.k1[i] + A32 * self.k2[i]);
        }
        system.apply(t + C3 * h, &self.tmp, &mut self.k3);

        for i in 0..n {
            self.tmp[i] = y[i] + h * (A41 * self.k1[i] + A42 * self.k2[i] + A43 * self.k3[i]);
        }
        system.apply(t + C4 * h, &self.tmp, &mut self.k4);

        for i in 0..n {
            self.tmp[i] = y[i]
                + h * (A51 * self.k1[i] + A52 * self.k2[i] + A53 * self.k3[i] + A54 * self.k4[i]);
        }
        system.apply(t + C5 * h, &self.tmp, &mut self.k5);

        for i in 0..n {
            self.tmp[i] = y[i]
                + h * (A61 * self.k1[i]
                    + A62 * self.k2[i]
                    + A63 * self.k3[i]
                    + A64 * self.k4[i]
                    + A65 * self.k5[i]);
        }
        system.apply(t + h, &self.tmp, &mut self.k6);

        for i in 0..n {
            self.y_new[i] = y[i]
                + h * (B1 * self.k1[i]
                    + B3 * self.k3[i]
                    + B4 * self.k4[i]
                    + B5 * self.k5[i]
                    + B6 * self.k6[i]);
        }
        system.apply(t + h, &self.y_new, &mut self.k7);
        self.stats.fn_evals += 6;

        let mut max_err: f64 = 0.0;
        for i in 0..n {
            let err_i = h
                * (E1 * self.k1[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]
                    + E7 * self.k7[i]);
            let scale =
                self.settings.abs_tol + self.settings.rel_tol * y[i].abs().max(self.y_new[i].abs());
            let scaled = err_i.abs() / scale;
            if scaled.is_nan() {
                return f64::NAN;
            }
            max_err = max_err.max(scaled);
        }
        max_err
    }

    /// Finds the crossing inside the step `[t, t + step]` and leaves the state
    /// at the crossing in `y_new`.
    #[allow(clippy::too_many_arguments)]
    fn locate_event<S, E>(
        &mut self,
        system: &S,
        event: &E,
        t: f64,
        y: &[f64],
        step: f64,
        g_start: f64,
        g_end: f64,
    ) -> f64
    where
        S: DynamicalSystem,
        E: EventFunction,
    {
        let tau = brent_root(
            |tau| {
                self.attempt(system, t, y, tau);
                event.eval(t + tau, &self.y_new)
            },
            0.0,
            step,
            g_start,
            g_end,
            EVENT_TIME_TOL,
            EVENT_MAX_ITERS,
        );
        self.attempt(system, t, y, tau);
        t + tau
    }
}

fn crossed(g_prev: f64, g_new: f64) -> bool {
    g_prev * g_new < 0.0 || (g_new == 0.0 && g_prev != 0.0)
}

/// Brent's method for a root of `f` bracketed by `[a, b]`, given `f(a)` and `f(b)`.
pub fn brent_root<F>(mut f: F, a: f64, b: f64, fa: f64, fb: f64, tol: f64, max_iter: usize) -> f64
where
    F: FnMut(f64) -> f64,
{
    if fa == 0.0 {
        return a;
    }
    if fb == 0.0 {
        return b;
    }
    let (mut a, mut b, mut fa, mut fb) = (a, b, fa, fb);
    let (mut c, mut fc) = (b, fb);
    let mut d = b - a;
    let mut e = d;

    for _ in 0..max_iter {
        if (fb > 0.0) == (fc > 0.0) {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }
        let tol1 = 2.0 * f64::EPSILON * b.abs() + 0.5 * tol;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol1 || fb == 0.0 {
            return b;
        }
        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            // Inverse quadratic interpolation, or secant when only two points are distinct.
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * xm * s, 1.0 - s)
            } else {
                let qa = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * qa * (qa - r) - (b - a) * (r - 1.0)),
                    (qa - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let min1 = 3.0 * xm * q - (tol1 * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }
        a = b;
        fa = fb;
        if d.abs() > tol1 {
            b += d;
        } else {
            b += tol1.copysign(xm);
        }
        fb = f(b);
    }
    b
}
