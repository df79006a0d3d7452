/// Represents a continuous-time dynamical system x' = f(t, x).
pub trait DynamicalSystem {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// x: current state
    /// t: current time
    /// out: buffer to write dx/dt into (same length as x)
    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]);
}

/// A scalar function g(t, x) whose zero crossings stop an integration.
pub trait EventFunction {
    fn eval(&self, t: f64, x: &[f64]) -> f64;
}

impl<F> EventFunction for F
where
    F: Fn(f64, &[f64]) -> f64,
{
    fn eval(&self, t: f64, x: &[f64]) -> f64 {
        self(t, x)
    }
}
