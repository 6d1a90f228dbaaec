// lib.rs
//! Adaptive integration of delay differential equations.
//!
//! The trajectory is kept as a history of anchors (time, state, derivative)
//! joined by cubic Hermite polynomials. A Bogacki–Shampine 3(2) controller
//! advances the newest anchor while the right-hand side reads delayed states
//! from the history.
use anyhow::{anyhow, Context};
use thiserror::Error;

pub mod bs23;
pub mod common;
pub mod dense_output;
pub mod discontinuities;
pub mod history;
pub mod integrator;
pub mod rhs;

pub use bs23::Statistics;
pub use common::{IntegrationParameters, SolverStatus};
pub use dense_output::{DenseOutput, HermiteSegment};
pub use discontinuities::DiscontinuityOptions;
pub use history::{Anchor, History};
pub use integrator::DdeIntegrator;
pub use rhs::{DdeSystem, Delay, Past, Rhs, RhsFunction};

#[derive(Debug, Error, Clone)]
pub enum IntegratorError {
    #[error("anchor at t = {time} does not follow the newest anchor at t = {last}")]
    OrderViolation { time: f64, last: f64 },

    #[error("state requested at t = {time}, ahead of the integration time {latest}")]
    FutureQuery { time: f64, latest: f64 },

    #[error("delay {delay} is shorter than the step size {step}")]
    DelayTooShort { delay: f64, step: f64 },

    #[error("step size underflow at t = {time}: required step size {step} is below the minimum")]
    StepSizeUnderflow { time: f64, step: f64 },

    #[error("target time {target} lies before the current time {current}")]
    BackwardIntegration { target: f64, current: f64 },

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("no past anchors have been added")]
    EmptyHistory,

    #[error("past point at t = {time} added after integration started")]
    HistorySealed { time: f64 },

    #[error("gave up after {steps} steps at t = {time}")]
    TooManySteps { steps: usize, time: f64 },

    #[error("parameter error: {message}")]
    ParameterError { message: String },
}

#[derive(Debug)]
pub enum SolveResult {
    Success {
        t: Vec<f64>,
        y: Vec<Vec<f64>>,
        history: Option<History>,
    },
    Failed {
        error: anyhow::Error,
        t: Vec<f64>,
        y: Vec<Vec<f64>>,
    },
}

pub struct SolveDdeOptions {
    pub params: IntegrationParameters,
    /// Step blindly over the discontinuities of the past before sampling.
    pub step_on_discontinuities: bool,
    pub discontinuities: DiscontinuityOptions,
    /// Return the full history of anchors for later interpolation.
    pub keep_history: bool,
}

impl Default for SolveDdeOptions {
    fn default() -> Self {
        Self {
            params: IntegrationParameters::default(),
            step_on_discontinuities: true,
            discontinuities: DiscontinuityOptions::default(),
            keep_history: false,
        }
    }
}

/// Integrates `rhs` from the anchors in `past` and samples the solution every
/// `sampling_step` over `duration`, starting where the past ends (or where
/// discontinuity stepping ends).
pub fn solve_dde<R: Rhs>(
    rhs: R,
    past: Vec<Anchor>,
    duration: f64,
    sampling_step: f64,
    options: Option<SolveDdeOptions>,
) -> SolveResult {
    let opts = options.unwrap_or_default();
    let mut t_values = Vec::new();
    let mut y_values = Vec::new();

    let outcome = sample(
        rhs,
        past,
        duration,
        sampling_step,
        &opts,
        &mut t_values,
        &mut y_values,
    );

    match outcome {
        Ok(dde_history) => SolveResult::Success {
            t: t_values,
            y: y_values,
            history: if opts.keep_history {
                Some(dde_history)
            } else {
                None
            },
        },
        Err(error) => SolveResult::Failed {
            error,
            t: t_values,
            y: y_values,
        },
    }
}

fn sample<R: Rhs>(
    rhs: R,
    past: Vec<Anchor>,
    duration: f64,
    sampling_step: f64,
    opts: &SolveDdeOptions,
    t_values: &mut Vec<f64>,
    y_values: &mut Vec<Vec<f64>>,
) -> anyhow::Result<History> {
    if !(sampling_step > 0.0 && sampling_step.is_finite()) {
        return Err(anyhow!("sampling step must be positive, got {}", sampling_step));
    }
    if !(duration >= 0.0 && duration.is_finite()) {
        return Err(anyhow!("duration must be non-negative, got {}", duration));
    }

    let mut dde = DdeIntegrator::new(rhs, opts.params.clone())?;
    for anchor in &past {
        dde.add_past_point(anchor.time, anchor.state.as_slice(), anchor.derivative.as_slice())
            .with_context(|| format!("adding past point at t = {}", anchor.time))?;
    }

    if opts.step_on_discontinuities {
        dde.step_on_discontinuities(&opts.discontinuities)
            .context("stepping on discontinuities")?;
    }

    let start = dde.current_time();
    let count = (duration / sampling_step).ceil() as usize;
    for k in 0..count {
        let time = start + k as f64 * sampling_step;
        let state = dde
            .integrate(time)
            .with_context(|| format!("integrating to t = {}", time))?;
        t_values.push(time);
        y_values.push(state);
    }

    let stats = dde.statistics();
    log::info!(
        "{} samples, {} accepted, {} rejected, {} blind steps, {} evaluations",
        t_values.len(),
        stats.naccpt,
        stats.nrejct,
        stats.nblind,
        stats.nfev
    );

    Ok(dde.history().clone())
}
