// common.rs
use log::warn;

use crate::IntegratorError;

pub const EPS: f64 = f64::EPSILON;
/// Bogacki–Shampine error estimate is second order, so the step size scales
/// with the cube root of the error ratio.
pub const ERROR_EXPONENT: f64 = -1.0 / 3.0;
/// How far the history cursor walks before falling back to binary search.
pub const LINEAR_SCAN_LIMIT: usize = 16;
/// Lookups this many ulps past the newest anchor still count as "now".
pub const FUTURE_SLACK_ULPS: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    /// Past points may still be added.
    Seeding,
    /// At least one forward call has been made; the past is sealed.
    Running,
}

/// Step size control and tolerances of one integrator.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationParameters {
    pub atol: f64,
    pub rtol: f64,
    /// Step size tried first. Clamped to `[min_step, max_step]` and to the
    /// shortest delay.
    pub first_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    pub safety_factor: f64,
    /// Upper bound for `h_new / h` after an accepted step.
    pub max_factor: f64,
    /// Lower bound for `h_new / h` after a rejected step.
    pub min_factor: f64,
    /// Steps allowed within a single `integrate` call.
    pub max_steps: usize,
}

impl Default for IntegrationParameters {
    fn default() -> Self {
        Self {
            atol: 1e-10,
            rtol: 1e-5,
            first_step: 1.0,
            min_step: 1e-10,
            max_step: 10.0,
            safety_factor: 0.9,
            max_factor: 5.0,
            min_factor: 0.2,
            max_steps: 1_000_000,
        }
    }
}

impl IntegrationParameters {
    pub fn validated(mut self) -> Result<Self, IntegratorError> {
        let (rtol, atol) = validate_tol(self.rtol, self.atol)?;
        self.rtol = rtol;
        self.atol = atol;

        for (name, value) in [
            ("min_step", self.min_step),
            ("max_step", self.max_step),
            ("first_step", self.first_step),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(parameter_error(format!("{name} must be positive and finite, got {value}")));
            }
        }
        if self.max_step < self.min_step {
            return Err(parameter_error(format!(
                "max_step ({}) is smaller than min_step ({})",
                self.max_step, self.min_step
            )));
        }
        if !(self.safety_factor > 0.0 && self.safety_factor <= 1.0) {
            return Err(parameter_error(format!(
                "safety_factor must lie in (0, 1], got {}",
                self.safety_factor
            )));
        }
        if !(self.min_factor > 0.0 && self.min_factor < 1.0) {
            return Err(parameter_error(format!(
                "min_factor must lie in (0, 1), got {}",
                self.min_factor
            )));
        }
        if !(self.max_factor > 1.0 && self.max_factor.is_finite()) {
            return Err(parameter_error(format!(
                "max_factor must be finite and larger than 1, got {}",
                self.max_factor
            )));
        }
        if self.max_steps == 0 {
            return Err(parameter_error("max_steps must be positive".to_string()));
        }
        Ok(self)
    }
}

pub fn validate_tol(rtol: f64, atol: f64) -> Result<(f64, f64), IntegratorError> {
    if !(atol >= 0.0 && atol.is_finite()) {
        return Err(IntegratorError::ParameterError {
            message: format!("atol must be non-negative and finite, got {atol}"),
        });
    }
    if !rtol.is_finite() || rtol < 0.0 {
        return Err(IntegratorError::ParameterError {
            message: format!("rtol must be non-negative and finite, got {rtol}"),
        });
    }

    let rtol = if rtol < 100.0 * EPS {
        if atol == 0.0 && rtol == 0.0 {
            return Err(IntegratorError::ParameterError {
                message: "atol and rtol cannot both be zero".to_string(),
            });
        }
        warn!("rtol too small, using {}", 100.0 * EPS);
        100.0 * EPS
    } else {
        rtol
    };

    Ok((rtol, atol))
}

/// Checks the declared delays and returns the shortest and the longest one,
/// or `None` for an equation without delays.
pub fn delay_bounds(delays: &[f64]) -> Result<Option<(f64, f64)>, IntegratorError> {
    let mut bounds: Option<(f64, f64)> = None;
    for &delay in delays {
        if !(delay.is_finite() && delay > 0.0) {
            return Err(IntegratorError::ParameterError {
                message: format!("delays must be positive and finite, got {delay}"),
            });
        }
        bounds = Some(match bounds {
            Some((lo, hi)) => (lo.min(delay), hi.max(delay)),
            None => (delay, delay),
        });
    }
    Ok(bounds)
}

/// Maximum over components of the error weighted by the mixed tolerance.
pub fn error_norm(error: &[f64], y: &[f64], y_new: &[f64], atol: f64, rtol: f64) -> f64 {
    error
        .iter()
        .zip(y)
        .zip(y_new)
        .map(|((&e, &yi), &yn)| {
            if e == 0.0 {
                // exact components count as converged even with atol = 0
                return 0.0;
            }
            let scale = atol + rtol * yi.abs().max(yn.abs());
            e.abs() / scale
        })
        .fold(0.0, |acc: f64, r| if r.is_nan() { f64::INFINITY } else { acc.max(r) })
}

/// Upper bound on rounding in `(t + h) - tau` near `latest`.
pub fn future_slack(latest: f64) -> f64 {
    FUTURE_SLACK_ULPS * EPS * latest.abs().max(1.0)
}

fn parameter_error(message: String) -> IntegratorError {
    IntegratorError::ParameterError { message }
}
