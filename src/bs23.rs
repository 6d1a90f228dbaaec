// bs23.rs
//! Bogacki–Shampine 3(2) step controller.
//!
//! A step starts from the newest anchor of the history and uses its stored
//! derivative as the first stage. The last stage is evaluated at the new
//! state, so every committed anchor carries `f(t, y)` as its derivative and
//! the next step gets its first stage for free. The method is third order,
//! matching the cubic Hermite history it reads delayed states from.
use log::trace;
use nalgebra::DVector;

use crate::common::{error_norm, IntegrationParameters, ERROR_EXPONENT};
use crate::history::{Anchor, History};
use crate::rhs::{Past, Rhs};
use crate::IntegratorError;

const C2: f64 = 1.0 / 2.0;
const C3: f64 = 3.0 / 4.0;

const A21: f64 = 1.0 / 2.0;
const A32: f64 = 3.0 / 4.0;

const B1: f64 = 2.0 / 9.0;
const B2: f64 = 1.0 / 3.0;
const B3: f64 = 4.0 / 9.0;

// third order solution minus the embedded second order one
const E1: f64 = -5.0 / 72.0;
const E2: f64 = 1.0 / 12.0;
const E3: f64 = 1.0 / 9.0;
const E4: f64 = -1.0 / 8.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    Accepted { next_step: f64 },
    Rejected { next_step: f64 },
}

/// A computed but not yet committed step.
#[derive(Debug, Clone)]
pub struct TrialStep {
    pub anchor: Anchor,
    pub h: f64,
    pub error_norm: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Right-hand side evaluations.
    pub nfev: usize,
    pub naccpt: usize,
    pub nrejct: usize,
    /// Steps committed without error control.
    pub nblind: usize,
}

pub struct StepController {
    atol: f64,
    rtol: f64,
    safety_factor: f64,
    min_factor: f64,
    max_factor: f64,
    min_step: f64,
    max_step: f64,
    pub stats: Statistics,
}

impl StepController {
    /// `max_step` is the effective bound, already capped at the shortest delay.
    pub fn new(params: &IntegrationParameters, max_step: f64) -> Self {
        Self {
            atol: params.atol,
            rtol: params.rtol,
            safety_factor: params.safety_factor,
            min_factor: params.min_factor,
            max_factor: params.max_factor,
            min_step: params.min_step,
            max_step,
            stats: Statistics::default(),
        }
    }

    pub fn min_step(&self) -> f64 {
        self.min_step
    }

    pub fn max_step(&self) -> f64 {
        self.max_step
    }

    pub fn clamp_step(&self, h: f64) -> f64 {
        h.clamp(self.min_step, self.max_step)
    }

    /// Computes a step of size `h` from the newest anchor without committing it.
    pub fn trial_step<R: Rhs>(
        &mut self,
        rhs: &R,
        history: &History,
        h: f64,
    ) -> Result<TrialStep, IntegratorError> {
        let start = history.last().ok_or(IntegratorError::EmptyHistory)?;
        let t = start.time;
        let y = &start.state;
        let k1 = &start.derivative;
        let n = y.len();

        let mut k2 = DVector::zeros(n);
        let y2 = y + k1 * (A21 * h);
        self.evaluate(rhs, history, t + C2 * h, &y2, &mut k2)?;

        let mut k3 = DVector::zeros(n);
        let y3 = y + &k2 * (A32 * h);
        self.evaluate(rhs, history, t + C3 * h, &y3, &mut k3)?;

        let y_new = y + (k1 * B1 + &k2 * B2 + &k3 * B3) * h;
        let t_new = t + h;
        let mut k4 = DVector::zeros(n);
        self.evaluate(rhs, history, t_new, &y_new, &mut k4)?;

        let error = (k1 * E1 + &k2 * E2 + &k3 * E3 + &k4 * E4) * h;
        let norm = error_norm(
            error.as_slice(),
            y.as_slice(),
            y_new.as_slice(),
            self.atol,
            self.rtol,
        );

        Ok(TrialStep {
            anchor: Anchor {
                time: t_new,
                state: y_new,
                derivative: k4,
            },
            h,
            error_norm: norm,
        })
    }

    /// Decides acceptance and the next step size from an error norm.
    pub fn adapt(&self, h: f64, norm: f64) -> StepOutcome {
        if norm <= 1.0 {
            let factor = if norm == 0.0 {
                self.max_factor
            } else {
                (self.safety_factor * norm.powf(ERROR_EXPONENT)).min(self.max_factor)
            };
            StepOutcome::Accepted {
                next_step: self.clamp_step(h * factor),
            }
        } else {
            let factor = if norm.is_finite() {
                (self.safety_factor * norm.powf(ERROR_EXPONENT)).max(self.min_factor)
            } else {
                self.min_factor
            };
            StepOutcome::Rejected {
                next_step: h * factor,
            }
        }
    }

    /// Takes one error-controlled step, retrying with smaller steps until one
    /// is accepted. Appends exactly one anchor and returns the proposed size
    /// of the following step.
    pub fn advance<R: Rhs>(
        &mut self,
        rhs: &R,
        history: &mut History,
        h: f64,
    ) -> Result<f64, IntegratorError> {
        let time = history.last().ok_or(IntegratorError::EmptyHistory)?.time;
        let mut h = self.clamp_step(h);
        loop {
            let trial = self.trial_step(rhs, history, h)?;
            match self.adapt(h, trial.error_norm) {
                StepOutcome::Accepted { next_step } => {
                    history.append(trial.anchor)?;
                    self.stats.naccpt += 1;
                    return Ok(next_step);
                }
                StepOutcome::Rejected { next_step } => {
                    self.stats.nrejct += 1;
                    trace!(
                        "rejected step at t = {}: h = {:e}, error = {:e}",
                        time,
                        h,
                        trial.error_norm
                    );
                    if h <= self.min_step {
                        return Err(IntegratorError::StepSizeUnderflow {
                            time,
                            step: next_step,
                        });
                    }
                    h = next_step.max(self.min_step);
                }
            }
        }
    }

    /// Commits a step of size `h` regardless of its error estimate.
    pub fn blind_step<R: Rhs>(
        &mut self,
        rhs: &R,
        history: &mut History,
        h: f64,
    ) -> Result<(), IntegratorError> {
        let trial = self.trial_step(rhs, history, h)?;
        history.append(trial.anchor)?;
        self.stats.nblind += 1;
        Ok(())
    }

    fn evaluate<R: Rhs>(
        &mut self,
        rhs: &R,
        history: &History,
        t: f64,
        y: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> Result<(), IntegratorError> {
        let past = Past::new(history, t);
        self.stats.nfev += 1;
        rhs.eval(t, y.as_slice(), &past, out.as_mut_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhs::{DdeSystem, Delay};
    use approx::assert_relative_eq;

    fn decay() -> DdeSystem {
        DdeSystem::new(1, vec![], |_t, y, _past, dydt| {
            dydt[0] = -y[0];
            Ok(())
        })
    }

    fn controller(rtol: f64, atol: f64) -> StepController {
        let params = IntegrationParameters {
            rtol,
            atol,
            ..Default::default()
        };
        StepController::new(&params, params.max_step)
    }

    #[test]
    fn test_adapt_factors() {
        let controller = controller(1e-6, 1e-6);

        match controller.adapt(0.1, 0.0) {
            StepOutcome::Accepted { next_step } => assert_relative_eq!(next_step, 0.5, epsilon = 1e-15),
            other => panic!("unexpected {:?}", other),
        }
        match controller.adapt(0.1, 1.0) {
            StepOutcome::Accepted { next_step } => assert_relative_eq!(next_step, 0.09, epsilon = 1e-15),
            other => panic!("unexpected {:?}", other),
        }
        match controller.adapt(0.1, 8.0) {
            StepOutcome::Rejected { next_step } => assert_relative_eq!(next_step, 0.045, epsilon = 1e-15),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            controller.adapt(0.1, f64::INFINITY),
            StepOutcome::Rejected { next_step: 0.1 * 0.2 }
        );
        // accepted steps never exceed max_step
        assert_eq!(
            controller.adapt(9.0, 1e-9),
            StepOutcome::Accepted { next_step: 10.0 }
        );
    }

    #[test]
    fn test_exponential_decay_without_delays() {
        let rhs = decay();
        let mut history = History::new(1);
        history.append(Anchor::new(0.0, &[1.0], &[-1.0])).unwrap();

        let mut controller = controller(1e-9, 1e-12);
        let mut h = 0.01;
        while history.last().unwrap().time < 2.0 {
            h = controller.advance(&rhs, &mut history, h).unwrap();
        }

        let mut y = [0.0];
        history.state_at(2.0, 0, &mut y).unwrap();
        assert_relative_eq!(y[0], (-2.0f64).exp(), max_relative = 1e-6);

        let stats = controller.stats;
        assert_eq!(stats.naccpt, history.len() - 1);
        assert_eq!(stats.nfev, 3 * (stats.naccpt + stats.nrejct));
        println!("accepted {} rejected {}", stats.naccpt, stats.nrejct);
    }

    #[test]
    fn test_committed_derivative_is_rhs_output() {
        let rhs = DdeSystem::new(2, vec![0.5], |t, y, past, dydt| {
            let lagged = past.component(Delay::Lag(0.5), 0, 0)?;
            dydt[0] = y[1];
            dydt[1] = -lagged + t.sin();
            Ok(())
        });
        let mut history = History::new(2);
        history.append(Anchor::new(-0.5, &[1.0, 0.0], &[0.0, 0.0])).unwrap();
        history.append(Anchor::new(0.0, &[1.0, 0.0], &[0.0, -1.0])).unwrap();

        let mut controller = StepController::new(&IntegrationParameters::default(), 0.5);
        let mut h = 0.1;
        for _ in 0..20 {
            h = controller.advance(&rhs, &mut history, h).unwrap();
        }

        let mut dydt = [0.0; 2];
        for anchor in &history.anchors()[2..] {
            let past = Past::new(&history, anchor.time);
            rhs.eval(anchor.time, anchor.state.as_slice(), &past, &mut dydt).unwrap();
            assert_relative_eq!(dydt[0], anchor.derivative[0], epsilon = 1e-12);
            assert_relative_eq!(dydt[1], anchor.derivative[1], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rejected_at_min_step_is_underflow() {
        let rhs = DdeSystem::new(1, vec![], |_t, _y, _past, dydt| {
            dydt[0] = f64::NAN;
            Ok(())
        });
        let mut history = History::new(1);
        history.append(Anchor::new(0.0, &[1.0], &[0.0])).unwrap();

        let params = IntegrationParameters {
            min_step: 1e-3,
            ..Default::default()
        };
        let mut controller = StepController::new(&params, 1.0);
        match controller.advance(&rhs, &mut history, 1.0) {
            Err(IntegratorError::StepSizeUnderflow { time, step }) => {
                assert_eq!(time, 0.0);
                assert!(step < 1e-3);
            }
            other => panic!("expected StepSizeUnderflow, got {:?}", other),
        }
        // rejected steps leave no trace in the history
        assert_eq!(history.len(), 1);
        assert!(controller.stats.nrejct > 0);
    }

    #[test]
    fn test_blind_step_commits_regardless_of_error() {
        let rhs = decay();
        let mut history = History::new(1);
        // inconsistent derivative: f(0, 1) = -1
        history.append(Anchor::new(0.0, &[1.0], &[5.0])).unwrap();

        let mut controller = controller(1e-12, 1e-12);
        let trial = controller.trial_step(&rhs, &history, 0.5).unwrap();
        assert!(trial.error_norm > 1.0);

        controller.blind_step(&rhs, &mut history, 0.5).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().unwrap().time, 0.5);
        assert_eq!(controller.stats.nblind, 1);
        assert_eq!(controller.stats.naccpt, 0);
    }
}
