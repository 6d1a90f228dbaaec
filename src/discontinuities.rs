// discontinuities.rs
//! Stepping over the derivative discontinuities of the initial past.
//!
//! When the stored derivative of the newest past anchor differs from what the
//! right-hand side yields there, the first error estimates are meaningless.
//! The jump in the derivative at the start time reappears one delay later in
//! the second derivative, and so on. These points are stepped onto with
//! equal steps and without error control, after which adaptive stepping
//! resumes from an anchor whose derivative is consistent.
use log::{debug, info};

use crate::bs23::StepController;
use crate::history::History;
use crate::rhs::{Past, Rhs};
use crate::IntegratorError;

#[derive(Debug, Clone, PartialEq)]
pub struct DiscontinuityOptions {
    /// How many delays a discontinuity is followed through.
    pub propagations: usize,
    /// Discontinuities closer than this to the previous one are skipped.
    pub min_distance: f64,
    /// Bound for the blind steps; capped at the integrator's maximum step.
    pub max_step: Option<f64>,
}

impl Default for DiscontinuityOptions {
    fn default() -> Self {
        Self {
            propagations: 1,
            min_distance: 1e-5,
            max_step: None,
        }
    }
}

/// `start + tau_i1 + ... + tau_ik` for `1 <= k <= propagations`, sorted.
/// Times within `min_distance` of the previously kept one are dropped.
pub fn discontinuity_times(
    start: f64,
    delays: &[f64],
    propagations: usize,
    min_distance: f64,
) -> Vec<f64> {
    let mut unique = delays.to_vec();
    unique.sort_by(f64::total_cmp);
    unique.dedup();

    // combinations with repetition, as (smallest usable index, partial sum)
    let mut sums = Vec::new();
    let mut frontier = vec![(0usize, 0.0f64)];
    for _ in 0..propagations {
        let mut next = Vec::new();
        for &(first, sum) in &frontier {
            for (j, &delay) in unique.iter().enumerate().skip(first) {
                next.push((j, sum + delay));
            }
        }
        sums.extend(next.iter().map(|&(_, sum)| sum));
        frontier = next;
    }
    sums.sort_by(f64::total_cmp);

    let mut times: Vec<f64> = Vec::with_capacity(sums.len());
    for sum in sums {
        let t = start + sum;
        if times.last().map_or(true, |&last| t - last >= min_distance) {
            times.push(t);
        }
    }
    times
}

/// Steps from the newest anchor onto `target` with equal steps no larger
/// than `step`, committing each without error control.
pub fn integrate_blindly<R: Rhs>(
    controller: &mut StepController,
    rhs: &R,
    history: &mut History,
    target: f64,
    step: f64,
) -> Result<(), IntegratorError> {
    let start = newest_time(history)?;
    if target <= start {
        return Ok(());
    }

    let count = ((target - start) / step).ceil().max(1.0) as usize;
    let h = (target - start) / count as f64;
    for i in 0..count {
        let h = if i + 1 == count {
            target - newest_time(history)?
        } else {
            h
        };
        controller.blind_step(rhs, history, h)?;
    }
    Ok(())
}

/// Blindly steps past the discontinuities caused by the start of the
/// integration and returns the time reached.
pub fn step_on_discontinuities<R: Rhs>(
    controller: &mut StepController,
    rhs: &R,
    history: &mut History,
    delays: &[f64],
    options: &DiscontinuityOptions,
) -> Result<f64, IntegratorError> {
    if delays.is_empty() {
        return Err(IntegratorError::ParameterError {
            message: "discontinuities are derived from delays, but the equation declares none"
                .to_string(),
        });
    }
    if !(options.min_distance >= 0.0 && options.min_distance.is_finite()) {
        return Err(IntegratorError::ParameterError {
            message: format!("min_distance must be non-negative, got {}", options.min_distance),
        });
    }
    let step = match options.max_step {
        Some(s) if s > 0.0 && s.is_finite() => s.min(controller.max_step()),
        Some(s) => {
            return Err(IntegratorError::ParameterError {
                message: format!("max_step for blind steps must be positive, got {s}"),
            })
        }
        None => controller.max_step(),
    };

    let start = newest_time(history)?;
    let mismatch = derivative_mismatch(controller, rhs, history)?;
    info!("derivative mismatch at t = {start}: {mismatch:e}");

    let times = discontinuity_times(start, delays, options.propagations, options.min_distance);
    info!(
        "stepping blindly over {} discontinuities with steps of at most {step}",
        times.len()
    );
    for target in times {
        if target - newest_time(history)? > options.min_distance {
            integrate_blindly(controller, rhs, history, target, step)?;
            debug!("reached discontinuity at t = {target}");
        }
    }

    newest_time(history)
}

/// Largest deviation between the stored derivative of the newest anchor and
/// the right-hand side evaluated there.
fn derivative_mismatch<R: Rhs>(
    controller: &mut StepController,
    rhs: &R,
    history: &History,
) -> Result<f64, IntegratorError> {
    let anchor = history.last().ok_or(IntegratorError::EmptyHistory)?;
    let mut actual = vec![0.0; anchor.state.len()];
    let past = Past::new(history, anchor.time);
    rhs.eval(anchor.time, anchor.state.as_slice(), &past, &mut actual)?;
    controller.stats.nfev += 1;

    Ok(actual
        .iter()
        .zip(anchor.derivative.iter())
        .map(|(a, d)| (a - d).abs())
        .fold(0.0, f64::max))
}

fn newest_time(history: &History) -> Result<f64, IntegratorError> {
    history
        .last()
        .map(|a| a.time)
        .ok_or(IntegratorError::EmptyHistory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::IntegrationParameters;
    use crate::history::Anchor;
    use crate::rhs::{DdeSystem, Delay};
    use approx::assert_relative_eq;

    #[test]
    fn test_single_delay_propagates_in_multiples() {
        let times = discontinuity_times(0.0, &[15.0], 3, 1e-5);
        assert_eq!(times, vec![15.0, 30.0, 45.0]);
    }

    #[test]
    fn test_combinations_of_two_delays() {
        let times = discontinuity_times(1.0, &[1.5, 1.0, 1.0], 2, 1e-5);
        assert_eq!(times, vec![2.0, 2.5, 3.0, 3.5, 4.0]);
    }

    #[test]
    fn test_close_discontinuities_are_merged() {
        let times = discontinuity_times(0.0, &[1.0, 1.0 + 1e-7, 2.0], 1, 1e-5);
        assert_eq!(times, vec![1.0, 2.0]);
        assert!(discontinuity_times(0.0, &[1.0], 0, 1e-5).is_empty());
    }

    #[test]
    fn test_blind_steps_land_on_discontinuities() {
        let rhs = DdeSystem::new(1, vec![1.0], |_t, _y, past, dydt| {
            dydt[0] = -past.component(Delay::Lag(1.0), 0, 0)?;
            Ok(())
        });
        let mut history = History::new(1);
        history.append(Anchor::new(-1.0, &[1.0], &[0.0])).unwrap();
        history.append(Anchor::new(0.0, &[1.0], &[0.0])).unwrap();

        let params = IntegrationParameters::default();
        let mut controller = StepController::new(&params, 1.0);
        let options = DiscontinuityOptions {
            propagations: 2,
            max_step: Some(0.1),
            ..Default::default()
        };
        let reached =
            step_on_discontinuities(&mut controller, &rhs, &mut history, &[1.0], &options).unwrap();

        assert_relative_eq!(reached, 2.0, epsilon = 1e-12);
        assert_eq!(controller.stats.nblind, 20);
        assert_eq!(controller.stats.naccpt, 0);
        assert!(history
            .anchors()
            .iter()
            .any(|a| (a.time - 1.0).abs() < 1e-12));

        // y = 1 - t on [0, 1]; the zero derivative stored at t = 0 costs 2h/9
        // in the first step, the remaining steps are exact for a line
        let mut y = [0.0];
        history.state_at(1.0, 0, &mut y).unwrap();
        assert_relative_eq!(y[0], 2.0 * 0.1 / 9.0, epsilon = 1e-12);
    }

    #[test]
    fn test_requires_delays() {
        let rhs = DdeSystem::new(1, vec![], |_t, _y, _past, dydt| {
            dydt[0] = 0.0;
            Ok(())
        });
        let mut history = History::new(1);
        history.append(Anchor::new(0.0, &[1.0], &[0.0])).unwrap();
        let mut controller = StepController::new(&IntegrationParameters::default(), 1.0);

        assert!(matches!(
            step_on_discontinuities(
                &mut controller,
                &rhs,
                &mut history,
                &[],
                &DiscontinuityOptions::default()
            ),
            Err(IntegratorError::ParameterError { .. })
        ));
    }
}
