// dense_output.rs
use crate::history::{Anchor, History};
use crate::IntegratorError;

/// Continuous state of a stored trajectory.
pub trait DenseOutput {
    fn call(&self, t: f64) -> Result<Vec<f64>, IntegratorError>;
    fn t_min(&self) -> f64;
    fn t_max(&self) -> f64;
}

/// Cubic Hermite polynomial through two anchors, matching state and
/// derivative at both ends.
///
/// Evaluation outside `[lo.time, hi.time]` extrapolates the same cubic.
#[derive(Debug, Clone, Copy)]
pub struct HermiteSegment<'a> {
    lo: &'a Anchor,
    hi: &'a Anchor,
}

impl<'a> HermiteSegment<'a> {
    pub fn new(lo: &'a Anchor, hi: &'a Anchor) -> Self {
        Self { lo, hi }
    }

    /// Writes the `order`-th time derivative at `t` into `out`.
    /// The cubic has no derivatives beyond the third, so those are zero.
    pub fn eval(&self, t: f64, order: usize, out: &mut [f64]) {
        match self.weights(t, order) {
            Some(w) => {
                for (i, yi) in out.iter_mut().enumerate() {
                    *yi = self.combine(&w, i);
                }
            }
            None => out.iter_mut().for_each(|x| *x = 0.0),
        }
    }

    /// Single component of [`HermiteSegment::eval`].
    pub fn component(&self, t: f64, order: usize, index: usize) -> f64 {
        self.weights(t, order).map_or(0.0, |w| self.combine(&w, index))
    }

    fn combine(&self, w: &[f64; 4], i: usize) -> f64 {
        w[0] * self.lo.state[i]
            + w[1] * self.lo.derivative[i]
            + w[2] * self.hi.state[i]
            + w[3] * self.hi.derivative[i]
    }

    /// Weights of (y_lo, y'_lo, y_hi, y'_hi) for the `order`-th derivative at `t`.
    fn weights(&self, t: f64, order: usize) -> Option<[f64; 4]> {
        let h = self.hi.time - self.lo.time;
        let s = (t - self.lo.time) / h;
        let s2 = s * s;
        let s3 = s2 * s;

        // basis functions h00, h10, h01, h11 and their derivatives in s
        let [b00, b10, b01, b11] = match order {
            0 => [
                2.0 * s3 - 3.0 * s2 + 1.0,
                s3 - 2.0 * s2 + s,
                -2.0 * s3 + 3.0 * s2,
                s3 - s2,
            ],
            1 => [
                6.0 * s2 - 6.0 * s,
                3.0 * s2 - 4.0 * s + 1.0,
                -6.0 * s2 + 6.0 * s,
                3.0 * s2 - 2.0 * s,
            ],
            2 => [12.0 * s - 6.0, 6.0 * s - 4.0, -12.0 * s + 6.0, 6.0 * s - 2.0],
            3 => [12.0, 6.0, -12.0, 6.0],
            _ => return None,
        };

        // d/dt = (1/h) d/ds
        let chain = h.powi(order as i32);
        Some([b00 / chain, b10 * h / chain, b01 / chain, b11 * h / chain])
    }
}

impl DenseOutput for HermiteSegment<'_> {
    fn call(&self, t: f64) -> Result<Vec<f64>, IntegratorError> {
        let mut y = vec![0.0; self.lo.state.len()];
        self.eval(t, 0, &mut y);
        Ok(y)
    }

    fn t_min(&self) -> f64 {
        self.lo.time
    }

    fn t_max(&self) -> f64 {
        self.hi.time
    }
}

/// The whole history, from its first anchor to the newest one. Times before
/// the first anchor extrapolate; times after the newest are a `FutureQuery`.
impl DenseOutput for History {
    fn call(&self, t: f64) -> Result<Vec<f64>, IntegratorError> {
        let mut y = vec![0.0; self.dimension()];
        self.state_at(t, 0, &mut y)?;
        Ok(y)
    }

    fn t_min(&self) -> f64 {
        self.first().map_or(f64::NAN, |a| a.time)
    }

    fn t_max(&self) -> f64 {
        self.last().map_or(f64::NAN, |a| a.time)
    }
}
