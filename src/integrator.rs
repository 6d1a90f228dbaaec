// integrator.rs
use log::debug;

use crate::bs23::{Statistics, StepController};
use crate::common::{delay_bounds, IntegrationParameters, SolverStatus};
use crate::dense_output::DenseOutput;
use crate::discontinuities::{self, DiscontinuityOptions};
use crate::history::{Anchor, History};
use crate::rhs::Rhs;
use crate::IntegratorError;

/// Integrates a delay differential equation from a user-supplied past.
///
/// The past is seeded with [`DdeIntegrator::add_past_point`]; integration
/// starts at the newest past anchor. Every accepted step becomes an anchor of
/// the history, which the right-hand side reads delayed states from.
pub struct DdeIntegrator<R: Rhs> {
    rhs: R,
    history: History,
    params: IntegrationParameters,
    controller: StepController,
    delays: Vec<f64>,
    max_delay: Option<f64>,
    h: f64,
    status: SolverStatus,
}

impl<R: Rhs> DdeIntegrator<R> {
    pub fn new(rhs: R, params: IntegrationParameters) -> Result<Self, IntegratorError> {
        let params = params.validated()?;
        let delays = rhs.delays();
        let bounds = delay_bounds(&delays)?;
        let history = History::new(rhs.dimension());

        // short delay policy: never step further than the shortest delay
        let max_step = match bounds {
            Some((min_delay, _)) => {
                if min_delay < params.min_step {
                    return Err(IntegratorError::DelayTooShort {
                        delay: min_delay,
                        step: params.min_step,
                    });
                }
                params.max_step.min(min_delay)
            }
            None => params.max_step,
        };
        let controller = StepController::new(&params, max_step);
        let h = controller.clamp_step(params.first_step);

        Ok(Self {
            rhs,
            history,
            params,
            controller,
            delays,
            max_delay: bounds.map(|(_, hi)| hi),
            h,
            status: SolverStatus::Seeding,
        })
    }

    pub fn add_past_point(
        &mut self,
        time: f64,
        state: &[f64],
        derivative: &[f64],
    ) -> Result<(), IntegratorError> {
        if self.status != SolverStatus::Seeding {
            return Err(IntegratorError::HistorySealed { time });
        }
        self.history.append(Anchor::new(time, state, derivative))
    }

    pub fn add_past_points<'a, I>(&mut self, points: I) -> Result<(), IntegratorError>
    where
        I: IntoIterator<Item = (f64, &'a [f64], &'a [f64])>,
    {
        for (time, state, derivative) in points {
            self.add_past_point(time, state, derivative)?;
        }
        Ok(())
    }

    /// Seeds a past that is constant at `state` up to `time`: two anchors with
    /// zero derivative, the longest delay apart.
    pub fn constant_past(&mut self, state: &[f64], time: f64) -> Result<(), IntegratorError> {
        let zero = vec![0.0; state.len()];
        let span = self.max_delay.unwrap_or(1.0);
        self.add_past_point(time - span, state, &zero)?;
        self.add_past_point(time, state, &zero)
    }

    /// Blindly steps over the discontinuities of the initial past.
    /// Returns the time reached.
    pub fn step_on_discontinuities(
        &mut self,
        options: &DiscontinuityOptions,
    ) -> Result<f64, IntegratorError> {
        self.initiate()?;
        let reached = discontinuities::step_on_discontinuities(
            &mut self.controller,
            &self.rhs,
            &mut self.history,
            &self.delays,
            options,
        )?;
        let blind = options
            .max_step
            .map_or(self.controller.max_step(), |s| s.min(self.controller.max_step()));
        self.h = self.controller.clamp_step(blind);
        Ok(reached)
    }

    /// Steps onto `target` with equal steps of at most `step`, ignoring the
    /// error estimate. Returns the state at `target`.
    pub fn integrate_blindly(&mut self, target: f64, step: f64) -> Result<Vec<f64>, IntegratorError> {
        self.check_target(target)?;
        self.initiate()?;
        if !(step > 0.0 && step.is_finite()) {
            return Err(IntegratorError::ParameterError {
                message: format!("blind step must be positive, got {step}"),
            });
        }
        let step = step.min(self.controller.max_step());
        discontinuities::integrate_blindly(
            &mut self.controller,
            &self.rhs,
            &mut self.history,
            target,
            step,
        )?;
        self.h = self.controller.clamp_step(step);
        self.state_at(target)
    }

    /// Integrates until the newest anchor is at or beyond `target` and
    /// returns the state interpolated at `target`.
    pub fn integrate(&mut self, target: f64) -> Result<Vec<f64>, IntegratorError> {
        self.check_target(target)?;
        self.initiate()?;

        let mut steps = 0;
        while self.current_time() < target {
            if steps == self.params.max_steps {
                return Err(IntegratorError::TooManySteps {
                    steps,
                    time: self.current_time(),
                });
            }
            self.h = self
                .controller
                .advance(&self.rhs, &mut self.history, self.h)?;
            steps += 1;
        }

        self.state_at(target)
    }

    /// Time of the newest anchor; NaN before any past point was added.
    pub fn current_time(&self) -> f64 {
        self.history.last().map_or(f64::NAN, |a| a.time)
    }

    /// Step size the next adaptive step will try.
    pub fn step_size(&self) -> f64 {
        self.h
    }

    /// State of the stored trajectory at `time`, which may not lie ahead of
    /// [`DdeIntegrator::current_time`].
    pub fn state_at(&self, time: f64) -> Result<Vec<f64>, IntegratorError> {
        self.history.call(time)
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn statistics(&self) -> Statistics {
        self.controller.stats
    }

    pub fn status(&self) -> SolverStatus {
        self.status
    }

    pub fn rhs(&self) -> &R {
        &self.rhs
    }

    fn check_target(&self, target: f64) -> Result<(), IntegratorError> {
        if self.history.is_empty() {
            return Err(IntegratorError::EmptyHistory);
        }
        let current = self.current_time();
        if target.is_nan() || target < current {
            return Err(IntegratorError::BackwardIntegration { target, current });
        }
        Ok(())
    }

    fn initiate(&mut self) -> Result<(), IntegratorError> {
        if self.status == SolverStatus::Running {
            return Ok(());
        }
        if self.history.is_empty() {
            return Err(IntegratorError::EmptyHistory);
        }
        debug!(
            "starting at t = {} with {} past anchors, max step {}, first step {}",
            self.current_time(),
            self.history.len(),
            self.controller.max_step(),
            self.h
        );
        self.status = SolverStatus::Running;
        Ok(())
    }
}
