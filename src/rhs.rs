// rhs.rs
use crate::history::History;
use crate::IntegratorError;

/// Which past time a delayed term needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delay {
    /// A delay length relative to the evaluation time, `t - tau`.
    Lag(f64),
    /// An explicit past time.
    At(f64),
}

/// Read-only view of the history handed to the right-hand side.
///
/// `Past` is bound to the time at which the right-hand side is evaluated, so
/// `Delay::Lag(tau)` means `y(t - tau)`.
#[derive(Debug, Clone, Copy)]
pub struct Past<'a> {
    history: &'a History,
    time: f64,
}

impl<'a> Past<'a> {
    pub fn new(history: &'a History, time: f64) -> Self {
        Self { history, time }
    }

    /// Time at which the right-hand side is being evaluated.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn resolve(&self, delay: Delay) -> f64 {
        match delay {
            Delay::Lag(tau) => self.time - tau,
            Delay::At(t) => t,
        }
    }

    /// Writes the `order`-th derivative of the state at the delayed time.
    pub fn state_at(&self, delay: Delay, order: usize, out: &mut [f64]) -> Result<(), IntegratorError> {
        let time = self.resolve(delay);
        self.history
            .state_at(time, order, out)
            .map_err(|e| self.short_delay(delay, e))
    }

    /// One component of [`Past::state_at`].
    pub fn component(&self, delay: Delay, index: usize, order: usize) -> Result<f64, IntegratorError> {
        let dimension = self.history.dimension();
        if index >= dimension {
            return Err(IntegratorError::DimensionMismatch {
                expected: dimension,
                found: index + 1,
            });
        }
        let time = self.resolve(delay);
        let bracket = self
            .history
            .query_bracket(time)
            .map_err(|e| self.short_delay(delay, e))?;
        Ok(bracket.component(time, order, index))
    }

    /// A lag reaching past the newest anchor is shorter than the step in progress.
    fn short_delay(&self, delay: Delay, error: IntegratorError) -> IntegratorError {
        match (delay, error) {
            (Delay::Lag(tau), IntegratorError::FutureQuery { latest, .. }) => {
                IntegratorError::DelayTooShort {
                    delay: tau,
                    step: self.time - latest,
                }
            }
            (_, e) => e,
        }
    }
}

/// Right-hand side `f(t, y(t), y(t - tau_1), ...)` of a delay differential equation.
///
/// Implementations must be pure: the same inputs give the same derivative.
/// Delayed states are only reachable through `past`.
pub trait Rhs {
    fn dimension(&self) -> usize;

    /// Delay lengths the equation uses. The integrator caps its step size at
    /// the shortest one and derives discontinuity times from all of them.
    fn delays(&self) -> Vec<f64>;

    fn eval(&self, t: f64, y: &[f64], past: &Past<'_>, dydt: &mut [f64]) -> Result<(), IntegratorError>;
}

pub type RhsFunction =
    Box<dyn Fn(f64, &[f64], &Past<'_>, &mut [f64]) -> Result<(), IntegratorError> + Send>;

/// A right-hand side given as a closure together with its dimension and delays.
pub struct DdeSystem {
    pub dimension: usize,
    pub delays: Vec<f64>,
    pub function: RhsFunction,
}

impl DdeSystem {
    pub fn new<F>(dimension: usize, delays: Vec<f64>, function: F) -> Self
    where
        F: Fn(f64, &[f64], &Past<'_>, &mut [f64]) -> Result<(), IntegratorError> + Send + 'static,
    {
        Self {
            dimension,
            delays,
            function: Box::new(function),
        }
    }
}

impl Rhs for DdeSystem {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn delays(&self) -> Vec<f64> {
        self.delays.clone()
    }

    fn eval(&self, t: f64, y: &[f64], past: &Past<'_>, dydt: &mut [f64]) -> Result<(), IntegratorError> {
        (self.function)(t, y, past, dydt)
    }
}

impl<R: Rhs + ?Sized> Rhs for &R {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn delays(&self) -> Vec<f64> {
        (**self).delays()
    }

    fn eval(&self, t: f64, y: &[f64], past: &Past<'_>, dydt: &mut [f64]) -> Result<(), IntegratorError> {
        (**self).eval(t, y, past, dydt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Anchor;

    fn ramp() -> History {
        // y = (t, -t)
        let mut history = History::new(2);
        for i in 0..=4 {
            let t = i as f64 * 0.5;
            history.append(Anchor::new(t, &[t, -t], &[1.0, -1.0])).unwrap();
        }
        history
    }

    #[test]
    fn test_two_delays_in_one_evaluation() {
        let history = ramp();
        let system = DdeSystem::new(
            1,
            vec![0.25, 1.5],
            |_t, _y, past, dydt| {
                let near = past.component(Delay::Lag(0.25), 0, 0)?;
                let far = past.component(Delay::Lag(1.5), 1, 0)?;
                let again = past.component(Delay::Lag(0.25), 0, 0)?;
                assert_eq!(near, again);
                dydt[0] = near + far;
                Ok(())
            },
        );

        let past = Past::new(&history, 2.0);
        let mut dydt = [0.0];
        system.eval(2.0, &[0.0], &past, &mut dydt).unwrap();
        // y0(1.75) + y1(0.5) = 1.75 - 0.5
        assert!((dydt[0] - 1.25).abs() < 1e-12, "dydt = {}", dydt[0]);
    }

    #[test]
    fn test_lookups_ahead_of_history() {
        let history = ramp();
        let past = Past::new(&history, 2.3);

        match past.component(Delay::Lag(0.1), 0, 0) {
            Err(IntegratorError::DelayTooShort { delay, step }) => {
                assert_eq!(delay, 0.1);
                assert!((step - 0.3).abs() < 1e-12);
            }
            other => panic!("expected DelayTooShort, got {:?}", other),
        }
        assert!(matches!(
            past.component(Delay::At(2.1), 0, 0),
            Err(IntegratorError::FutureQuery { .. })
        ));
        assert!(matches!(
            past.component(Delay::At(1.0), 2, 0),
            Err(IntegratorError::DimensionMismatch { .. })
        ));

        let mut y = [0.0; 2];
        past.state_at(Delay::Lag(0.3), 1, &mut y).unwrap();
        assert!((y[0] - 1.0).abs() < 1e-12);
        assert!((y[1] + 1.0).abs() < 1e-12);
    }
}
